//! Profile store: the engine-facing adapter over persisted profiles and
//! macros.
//!
//! Serves immutable snapshots (`Arc<Profile>`, `Arc<Macro>`) to the router
//! and broadcasts active-profile changes over a watch channel, so an
//! in-flight resolve always sees one consistent profile. `activate` is the
//! single mutator of the activation flag: it flips the chosen profile on
//! and every other profile off in one write-lock scope.

use crate::profile::model::{Macro, MacroId, Profile, ProfileId};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{watch, RwLock};
use tracing::{debug, info, warn};

/// Errors from store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Unknown profile: {0}")]
    UnknownProfile(ProfileId),

    #[error("Unknown macro: {0}")]
    UnknownMacro(MacroId),

    /// More than one profile claimed the active flag in loaded data. The
    /// store repairs this on load and keeps the most recently updated one;
    /// the variant exists so callers can surface the conflict.
    #[error("{count} profiles claim the active flag")]
    ProfileInconsistent { count: usize },
}

/// Thread-safe store of profiles and macros with active-profile broadcast.
#[derive(Debug)]
pub struct ProfileStore {
    profiles: RwLock<HashMap<ProfileId, Arc<Profile>>>,
    macros: RwLock<HashMap<MacroId, Arc<Macro>>>,
    active_tx: watch::Sender<Arc<Profile>>,
}

impl ProfileStore {
    /// Builds the store from loaded library data.
    ///
    /// The exactly-one-active invariant is enforced here: with no active
    /// profile the most recently updated one is activated (or a default
    /// profile is created for an empty library); with several, the most
    /// recently updated wins and the rest are deactivated. Both repairs
    /// are logged for the persistence layer to pick up on the next save.
    pub fn new(profiles: Vec<Profile>, macros: Vec<Macro>) -> Self {
        let mut profiles = profiles;
        let active_count = profiles.iter().filter(|p| p.active).count();

        match active_count {
            1 => {}
            0 => {
                if profiles.is_empty() {
                    info!("Empty profile library, creating default profile");
                    let mut default_profile = Profile::new(ProfileId(1), "Default Profile");
                    default_profile.description = "Default controller configuration".to_string();
                    default_profile.active = true;
                    profiles.push(default_profile);
                } else {
                    let newest = most_recently_updated(&profiles);
                    warn!("No active profile in library, activating {}", newest);
                    set_single_active(&mut profiles, newest);
                }
            }
            count => {
                let err = StoreError::ProfileInconsistent { count };
                let newest = most_recently_updated_active(&profiles);
                warn!("{}, falling back to most recently updated: {}", err, newest);
                set_single_active(&mut profiles, newest);
            }
        }

        let active = profiles
            .iter()
            .find(|p| p.active)
            .cloned()
            .map(Arc::new)
            .unwrap_or_else(|| Arc::new(Profile::new(ProfileId(1), "Default Profile")));

        let (active_tx, _) = watch::channel(active);
        let profile_map = profiles
            .into_iter()
            .map(|p| (p.id, Arc::new(p)))
            .collect::<HashMap<_, _>>();
        let macro_map = macros
            .into_iter()
            .map(|m| (m.id, Arc::new(m)))
            .collect::<HashMap<_, _>>();

        info!(
            "Profile store ready: {} profiles, {} macros",
            profile_map.len(),
            macro_map.len()
        );

        Self {
            profiles: RwLock::new(profile_map),
            macros: RwLock::new(macro_map),
            active_tx,
        }
    }

    /// Current active profile snapshot.
    pub fn active_profile(&self) -> Arc<Profile> {
        self.active_tx.borrow().clone()
    }

    /// Subscription for active-profile changes (activation switches and
    /// edits to the currently active profile).
    pub fn subscribe(&self) -> watch::Receiver<Arc<Profile>> {
        self.active_tx.subscribe()
    }

    /// Activates `id` and deactivates every other profile atomically.
    pub async fn activate(&self, id: ProfileId) -> Result<(), StoreError> {
        let mut profiles = self.profiles.write().await;
        if !profiles.contains_key(&id) {
            return Err(StoreError::UnknownProfile(id));
        }

        for (pid, profile) in profiles.iter_mut() {
            let should_be_active = *pid == id;
            if profile.active != should_be_active {
                let updated = Arc::make_mut(profile);
                updated.active = should_be_active;
                updated.touch();
            }
        }

        let snapshot = profiles
            .get(&id)
            .cloned()
            .ok_or(StoreError::UnknownProfile(id))?;
        drop(profiles);

        info!("Activated {} ({})", id, snapshot.name);
        self.active_tx.send_replace(snapshot);
        Ok(())
    }

    /// Lazy macro lookup, used when a trigger fires.
    pub async fn macro_by_id(&self, id: MacroId) -> Option<Arc<Macro>> {
        let found = self.macros.read().await.get(&id).cloned();
        if found.is_none() {
            debug!("Lookup for unknown {}", id);
        }
        found
    }

    pub async fn profile_by_id(&self, id: ProfileId) -> Option<Arc<Profile>> {
        self.profiles.read().await.get(&id).cloned()
    }

    /// Inserts or replaces a profile. Edits to the active profile are
    /// rebroadcast so running routers pick them up.
    pub async fn upsert_profile(&self, profile: Profile) {
        let id = profile.id;
        let was_active = self.active_tx.borrow().id == id;
        let mut profile = profile;
        // The activation flag is owned by `activate`; an upsert cannot
        // sneak a second active profile in.
        profile.active = was_active;
        let snapshot = Arc::new(profile);

        self.profiles.write().await.insert(id, snapshot.clone());
        debug!("Upserted {}", id);

        if was_active {
            self.active_tx.send_replace(snapshot);
        }
    }

    /// Inserts or replaces a macro definition.
    pub async fn upsert_macro(&self, definition: Macro) {
        let id = definition.id;
        self.macros.write().await.insert(id, Arc::new(definition));
        debug!("Upserted {}", id);
    }

    pub async fn remove_macro(&self, id: MacroId) -> Result<(), StoreError> {
        self.macros
            .write()
            .await
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::UnknownMacro(id))
    }

    /// Snapshot of all profiles, for persistence.
    pub async fn profiles(&self) -> Vec<Profile> {
        self.profiles
            .read()
            .await
            .values()
            .map(|p| p.as_ref().clone())
            .collect()
    }

    /// Snapshot of all macros, for persistence.
    pub async fn macros(&self) -> Vec<Macro> {
        self.macros
            .read()
            .await
            .values()
            .map(|m| m.as_ref().clone())
            .collect()
    }
}

fn most_recently_updated(profiles: &[Profile]) -> ProfileId {
    profiles
        .iter()
        .max_by_key(|p| p.updated_at)
        .map(|p| p.id)
        .unwrap_or(ProfileId(1))
}

fn most_recently_updated_active(profiles: &[Profile]) -> ProfileId {
    profiles
        .iter()
        .filter(|p| p.active)
        .max_by_key(|p| p.updated_at)
        .map(|p| p.id)
        .unwrap_or(ProfileId(1))
}

fn set_single_active(profiles: &mut [Profile], id: ProfileId) {
    for profile in profiles.iter_mut() {
        profile.active = profile.id == id;
    }
}
