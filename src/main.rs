pub mod config;
pub mod engine;
pub mod input;
pub mod output;
pub mod profile;

use crate::config::EngineSettings;
use crate::engine::router::RouterHandle;
use crate::input::collector::{CollectorHandle, CollectorSettings};
use crate::output::ChannelSink;
use crate::profile::library::{LibraryManager, ProfileLibrary};
use crate::profile::store::ProfileStore;
use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    setup()?;

    let settings = EngineSettings::load_or_init().await?;
    info!("Engine settings: {:?}", settings);

    // Load the profile/macro library and build the store. Load-time
    // repairs (stale duration caches, activation conflicts) land back on
    // disk with the first save.
    let library = Arc::new(ProfileLibrary::at_default_location());
    library.ensure_exists().await?;
    let (profiles, macros) = library.load().await?;
    let store = Arc::new(ProfileStore::new(profiles, macros));
    let library_manager = LibraryManager::spawn(
        library.clone(),
        store.clone(),
        settings.autosave_interval_secs,
    );

    info!(
        "Active profile: {} ({})",
        store.active_profile().id,
        store.active_profile().name
    );

    // Raw input pipeline: gilrs collector -> router.
    let (input_tx, input_rx) = mpsc::channel(settings.input_channel_capacity);
    let collector_settings = CollectorSettings {
        axis_noise_floor: settings.axis_noise_floor,
        poll_interval_us: settings.poll_interval_us,
    };
    let _collector_handle = CollectorHandle::spawn(Some(collector_settings), input_tx)
        .map_err(|e| eyre!("Failed to spawn input collector: {}", e))?;

    // Synthetic output boundary. The injection backend (virtual HID
    // device) consumes this channel; the shipped binary narrates it.
    let (output_tx, mut output_rx) = mpsc::channel(settings.output_channel_capacity);
    let output_task = tokio::spawn(async move {
        while let Some(action) = output_rx.recv().await {
            debug!("Synthetic output: {:?}", action);
        }
    });

    let mut router_handle = RouterHandle::spawn(
        "gamepad-0",
        store.clone(),
        input_rx,
        Box::new(ChannelSink::new(output_tx)),
        settings.tick_interval(),
    );

    info!("padhub running, press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");

    // Router shutdown cancels all sessions and force-releases held
    // synthetic buttons before the sink goes away.
    router_handle
        .shutdown()
        .await
        .map_err(|e| eyre!("Router shutdown failed: {}", e))?;

    library
        .save_store(&store)
        .await
        .map_err(|e| eyre!("Final library save failed: {}", e))?;
    library_manager.stop();
    output_task.abort();

    info!("Shutdown complete");
    Ok(())
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info")
    }
    setup_logging_env();
    Ok(())
}

fn setup_logging_env() {
    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .init();
}
