//! Embedded database connections

use orchestra_core::{OrchestraError, Result};
use std::path::Path;
use tracing::debug;
use turso::{params, Builder, Connection};

/// Open (creating if needed) a local database file in WAL mode
///
/// Failures are reported through `kind`, e.g. `OrchestraError::Checkpoint`.
/// The parent directory is created first.
pub async fn open_local<P: AsRef<Path>>(
    path: P,
    kind: fn(String) -> OrchestraError,
) -> Result<Connection> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| kind(format!("cannot create {}: {}", parent.display(), e)))?;
        }
    }

    let path_str = path.to_string_lossy().to_string();
    let fail = |e: turso::Error| kind(format!("{}: {}", path_str, e));

    let db = Builder::new_local(&path_str).build().await.map_err(fail)?;
    let conn = db.connect().map_err(fail)?;

    // PRAGMA statements return rows, so go through query()
    let _ = conn
        .query("PRAGMA journal_mode=WAL", params![])
        .await
        .map_err(fail)?;
    let _ = conn
        .query("PRAGMA busy_timeout=5000", params![])
        .await
        .map_err(fail)?;

    debug!("Opened database {}", path_str);
    Ok(conn)
}
