pub mod audit;
pub mod compression;
pub mod confirmation;
pub mod coordinator;
pub mod db;
pub mod dedup;
pub mod dwell;
pub mod error;
pub mod models;
pub mod orchestrator;
pub mod settings;
pub mod staging;
mod utils;

use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use log::{info, warn};
use tokio::sync::mpsc;

use audit::FileAuditLogger;
use compression::ArchiveCompressionService;
use confirmation::SqliteConfirmationTracker;
use coordinator::{CoordinatorEvent, HoverCoordinator, ItemResolver};
use db::Database;
use dedup::DedupCache;
use dwell::MonotonicClock;
use orchestrator::ActionOrchestrator;
use settings::{AppPaths, SettingsStore};
use staging::{FileUndoStagingManager, UndoStaging};

pub use error::{ActionError, ActionResult};

/// Everything a host application needs once the pipeline is wired up.
pub struct AppState {
    pub paths: AppPaths,
    pub settings: SettingsStore,
    pub db: Database,
    pub audit: Arc<FileAuditLogger>,
    pub coordinator: HoverCoordinator,
    pub events: mpsc::UnboundedReceiver<CoordinatorEvent>,
}

/// Install the `env_logger` backend. Reads `RUST_LOG`, defaults to `info`; later calls are no-ops.
pub fn init_logging() {
    let _ = env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .try_init();
}

/// Assemble the production collaborators under `app_data_dir`.
///
/// The coordinator comes back stopped; call `start` from inside a tokio runtime.
pub fn bootstrap(app_data_dir: PathBuf, resolver: Arc<dyn ItemResolver>) -> Result<AppState> {
    std::fs::create_dir_all(&app_data_dir)
        .with_context(|| format!("failed to create {}", app_data_dir.display()))?;
    let paths = AppPaths::new(app_data_dir);

    let settings = SettingsStore::new(paths.settings_path())?;
    let current = settings.get();

    let db = Database::new(paths.database_path())?;
    let confirmations = Arc::new(SqliteConfirmationTracker::new(db.clone())?);

    let staging = Arc::new(FileUndoStagingManager::new(paths.staging_dir()));
    // Clear out whatever expired while the app was not running.
    if let Err(err) = staging.prune_older_than(current.undo.retention()) {
        warn!("Startup staging sweep failed: {err:#}");
    }

    let audit = Arc::new(FileAuditLogger::new(paths.log_dir()));
    let dedup = Arc::new(DedupCache::new(current.dedup.ttl(), current.dedup.capacity));

    let orchestrator = Arc::new(ActionOrchestrator::new(
        Arc::new(ArchiveCompressionService::new()),
        audit.clone(),
        staging,
        confirmations,
        dedup.clone(),
        current.undo.retention(),
    ));

    let (coordinator, events) = HoverCoordinator::new(
        current.trigger.dwell_config(),
        Arc::new(MonotonicClock::new()),
        resolver,
        orchestrator,
        dedup,
        current.zip.mode,
    );

    info!("dwellzip ready at {}", paths.root().display());

    Ok(AppState {
        paths,
        settings,
        db,
        audit,
        coordinator,
        events,
    })
}
