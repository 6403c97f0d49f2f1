//! TOML persistence for the profile/macro library.
//!
//! Profiles and macros live in `~/.config/padhub/` as `profiles.toml` and
//! `macros.toml`, loaded once at startup into the [`ProfileStore`] and
//! written back by an action worker plus a periodic autosave task. Loaded
//! macros whose duration cache disagrees with their actions are repaired
//! here, before the engine ever sees them.

use crate::profile::model::{Macro, MacroId, Profile, ProfileId};
use crate::profile::store::{ProfileStore, StoreError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const CONFIG_DIR: &str = ".config/padhub";
const PROFILES_FILE: &str = "profiles.toml";
const MACROS_FILE: &str = "macros.toml";

/// Errors from library persistence.
#[derive(Debug, Error)]
pub enum LibraryError {
    #[error("Failed to access library files: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse library file {file}: {reason}")]
    Parse { file: String, reason: String },

    #[error("Failed to serialize library: {0}")]
    Serialize(String),
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ProfilesFile {
    #[serde(default)]
    profiles: Vec<Profile>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct MacrosFile {
    #[serde(default)]
    macros: Vec<Macro>,
}

/// File-backed profile/macro library.
pub struct ProfileLibrary {
    base_path: PathBuf,
}

impl ProfileLibrary {
    /// Library under the user config directory.
    pub fn at_default_location() -> Self {
        let mut base_path = dirs::home_dir().unwrap_or_else(|| {
            warn!("Could not determine home directory, using current directory");
            PathBuf::from(".")
        });
        base_path.push(CONFIG_DIR);
        Self { base_path }
    }

    /// Library rooted at an explicit directory.
    pub fn with_base_path(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    pub async fn ensure_exists(&self) -> Result<(), LibraryError> {
        if !tokio::fs::try_exists(&self.base_path).await? {
            info!("Creating library directory {}", self.base_path.display());
            tokio::fs::create_dir_all(&self.base_path).await?;
        }
        Ok(())
    }

    /// Loads the library; missing files yield an empty library.
    pub async fn load(&self) -> Result<(Vec<Profile>, Vec<Macro>), LibraryError> {
        let profiles: ProfilesFile = self.read_file(PROFILES_FILE).await?;
        let macros: MacrosFile = self.read_file(MACROS_FILE).await?;

        let mut macros = macros.macros;
        for definition in macros.iter_mut() {
            if !definition.duration_consistent() {
                warn!(
                    "{} has a stale duration cache, recomputing",
                    definition.id
                );
                let actions = definition.actions().to_vec();
                definition.set_actions(actions);
            }
        }

        info!(
            "Loaded library: {} profiles, {} macros from {}",
            profiles.profiles.len(),
            macros.len(),
            self.base_path.display()
        );
        Ok((profiles.profiles, macros))
    }

    /// Writes the full library state back to disk.
    pub async fn save(&self, profiles: Vec<Profile>, macros: Vec<Macro>) -> Result<(), LibraryError> {
        self.ensure_exists().await?;

        let profiles_content = toml::to_string_pretty(&ProfilesFile { profiles })
            .map_err(|e| LibraryError::Serialize(e.to_string()))?;
        tokio::fs::write(self.base_path.join(PROFILES_FILE), profiles_content).await?;

        let macros_content = toml::to_string_pretty(&MacrosFile { macros })
            .map_err(|e| LibraryError::Serialize(e.to_string()))?;
        tokio::fs::write(self.base_path.join(MACROS_FILE), macros_content).await?;

        debug!("Library saved to {}", self.base_path.display());
        Ok(())
    }

    /// Snapshots the store and persists it.
    pub async fn save_store(&self, store: &ProfileStore) -> Result<(), LibraryError> {
        let profiles = store.profiles().await;
        let macros = store.macros().await;
        self.save(profiles, macros).await
    }

    async fn read_file<T: Default + for<'de> Deserialize<'de>>(
        &self,
        file: &str,
    ) -> Result<T, LibraryError> {
        let path = self.base_path.join(file);
        if !tokio::fs::try_exists(&path).await? {
            debug!("{} does not exist, using empty default", path.display());
            return Ok(T::default());
        }

        let content = tokio::fs::read_to_string(&path).await?;
        toml::from_str(&content).map_err(|e| LibraryError::Parse {
            file: file.to_string(),
            reason: e.to_string(),
        })
    }
}

/// Mutating operations accepted by the library worker.
#[derive(Debug)]
pub enum LibraryAction {
    SaveLibrary {
        response_tx: oneshot::Sender<Result<(), LibraryError>>,
    },
    ActivateProfile {
        id: ProfileId,
        response_tx: oneshot::Sender<Result<(), StoreError>>,
    },
    UpsertProfile {
        profile: Profile,
        response_tx: oneshot::Sender<Result<(), LibraryError>>,
    },
    UpsertMacro {
        definition: Macro,
        response_tx: oneshot::Sender<Result<(), LibraryError>>,
    },
    RemoveMacro {
        id: MacroId,
        response_tx: oneshot::Sender<Result<(), StoreError>>,
    },
}

macro_rules! respond {
    ($result:expr, $response_tx:expr) => {
        if $response_tx.send($result).is_err() {
            error!("Failed to send library worker response");
        }
    };
}

/// Owns the library worker and the autosave task.
pub struct LibraryManager {
    tx: mpsc::Sender<LibraryAction>,
    worker_handle: JoinHandle<()>,
    autosave_handle: JoinHandle<()>,
}

impl LibraryManager {
    /// Spawns the worker loop and an autosave task over the shared store.
    pub fn spawn(
        library: Arc<ProfileLibrary>,
        store: Arc<ProfileStore>,
        autosave_interval_secs: u64,
    ) -> Self {
        let (tx, mut rx) = mpsc::channel::<LibraryAction>(32);

        let worker_store = store.clone();
        let worker_library = library.clone();
        let worker_handle = tokio::spawn(async move {
            while let Some(action) = rx.recv().await {
                match action {
                    LibraryAction::SaveLibrary { response_tx } => {
                        respond!(worker_library.save_store(&worker_store).await, response_tx);
                    }
                    LibraryAction::ActivateProfile { id, response_tx } => {
                        respond!(worker_store.activate(id).await, response_tx);
                    }
                    LibraryAction::UpsertProfile {
                        profile,
                        response_tx,
                    } => {
                        worker_store.upsert_profile(profile).await;
                        respond!(worker_library.save_store(&worker_store).await, response_tx);
                    }
                    LibraryAction::UpsertMacro {
                        definition,
                        response_tx,
                    } => {
                        worker_store.upsert_macro(definition).await;
                        respond!(worker_library.save_store(&worker_store).await, response_tx);
                    }
                    LibraryAction::RemoveMacro { id, response_tx } => {
                        respond!(worker_store.remove_macro(id).await, response_tx);
                    }
                }
            }
            debug!("Library worker channel closed");
        });

        let autosave_handle = Self::start_autosave_task(library, store, autosave_interval_secs);

        Self {
            tx,
            worker_handle,
            autosave_handle,
        }
    }

    pub fn sender(&self) -> mpsc::Sender<LibraryAction> {
        self.tx.clone()
    }

    /// Stops both background tasks. Pending saves are abandoned; callers
    /// wanting a final flush send `SaveLibrary` first.
    pub fn stop(&self) {
        self.worker_handle.abort();
        self.autosave_handle.abort();
    }

    fn start_autosave_task(
        library: Arc<ProfileLibrary>,
        store: Arc<ProfileStore>,
        interval_secs: u64,
    ) -> JoinHandle<()> {
        info!("Starting library autosave task ({}s interval)", interval_secs);
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(tokio::time::Duration::from_secs(interval_secs.max(1)));
            // The first tick fires immediately; skip it so startup does not
            // rewrite files it just read.
            interval.tick().await;

            loop {
                interval.tick().await;
                match library.save_store(&store).await {
                    Ok(()) => debug!("Library autosaved"),
                    Err(e) => error!("Failed to autosave library: {}", e),
                }
            }
        })
    }
}
