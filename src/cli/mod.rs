mod http_client;
mod init;
mod sync;
mod watch;

pub use http_client::{ApiClient, ApiResponse};
pub use init::{InitOutcome, run_init};
pub use sync::{SyncOptions, SyncState, SyncSummary, run_sync};
pub use watch::{WatchOptions, run_watch};

use std::path::Path;

use crate::config::ServerConfig;
use crate::store::{SqliteStore, Store};

/// Opens the store of an initialized data directory.
pub fn open_store(config: &ServerConfig) -> anyhow::Result<SqliteStore> {
    let db_path = config.db_path();
    if !db_path.exists() {
        anyhow::bail!(
            "Database not found at {}. Run 'schoolyard init' first.",
            db_path.display()
        );
    }

    let store = SqliteStore::new(&db_path)?;
    store.initialize()?;
    if !store.superadmin_exists()? {
        anyhow::bail!(
            "Server not initialized. Run 'schoolyard init --data-dir {}' first.",
            config.data_dir.display()
        );
    }
    Ok(store)
}

#[cfg(unix)]
pub(crate) fn set_restrictive_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Err(e) = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)) {
        tracing::warn!("Failed to set permissions on {}: {e}", path.display());
    }
}

#[cfg(not(unix))]
pub(crate) fn set_restrictive_permissions(_path: &Path) {}
