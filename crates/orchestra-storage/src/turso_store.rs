//! Turso-backed checkpoint store
//!
//! Layout:
//!   - `checkpoints`: latest state per thread, upserted on every save
//!   - `checkpoint_history`: one row per save, never updated

use crate::checkpoint::CheckpointStore;
use crate::db::open_local;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use orchestra_core::{OrchestraError, Phase, Result, TaskState, ThreadId, ThreadSummary};
use std::path::Path;
use tokio::sync::Mutex;
use tracing::{debug, instrument};
use turso::{params, Connection};

const SCHEMA: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS checkpoints (
        thread_id TEXT PRIMARY KEY,
        phase TEXT NOT NULL,
        step INTEGER NOT NULL,
        state_json TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS checkpoint_history (
        id INTEGER PRIMARY KEY,
        thread_id TEXT NOT NULL,
        phase TEXT NOT NULL,
        step INTEGER NOT NULL,
        state_json TEXT NOT NULL,
        saved_at TEXT NOT NULL
    )"#,
    "CREATE INDEX IF NOT EXISTS idx_history_thread ON checkpoint_history(thread_id)",
];

fn db_err(e: turso::Error) -> OrchestraError {
    OrchestraError::Checkpoint(e.to_string())
}

/// Durable checkpoints in an embedded database file
pub struct TursoCheckpointStore {
    conn: Mutex<Connection>,
}

impl TursoCheckpointStore {
    /// Open the store, creating file and schema when missing
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = open_local(path.as_ref(), OrchestraError::Checkpoint).await?;
        for stmt in SCHEMA {
            conn.execute(stmt, params![]).await.map_err(db_err)?;
        }

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Every save of a thread, oldest first
    pub async fn history(&self, thread_id: &ThreadId) -> Result<Vec<ThreadSummary>> {
        let conn = self.conn.lock().await;
        let mut rows = conn
            .query(
                "SELECT phase, step, saved_at FROM checkpoint_history WHERE thread_id = ? ORDER BY id ASC",
                params![thread_id.as_str()],
            )
            .await
            .map_err(db_err)?;

        let mut entries = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            let phase: String = row.get(0).map_err(db_err)?;
            let step: i64 = row.get(1).map_err(db_err)?;
            let saved_at: String = row.get(2).map_err(db_err)?;
            entries.push(summary_from_columns(thread_id.clone(), &phase, step, &saved_at)?);
        }
        Ok(entries)
    }
}

fn summary_from_columns(
    thread_id: ThreadId,
    phase: &str,
    step: i64,
    timestamp: &str,
) -> Result<ThreadSummary> {
    let phase: Phase = phase
        .parse()
        .map_err(|e: String| OrchestraError::Checkpoint(e))?;
    let updated_at = DateTime::parse_from_rfc3339(timestamp)
        .map_err(|e| OrchestraError::Checkpoint(format!("bad timestamp {}: {}", timestamp, e)))?
        .with_timezone(&Utc);

    Ok(ThreadSummary {
        thread_id,
        phase,
        step: usize::try_from(step).unwrap_or_default(),
        updated_at,
    })
}

#[async_trait]
impl CheckpointStore for TursoCheckpointStore {
    #[instrument(skip(self, state), fields(thread = %thread_id, phase = %state.phase))]
    async fn save(&self, thread_id: &ThreadId, state: &TaskState) -> Result<()> {
        let state_json = serde_json::to_string(state)?;
        let phase = state.phase.to_string();
        let step = state.planner_invocations as i64;
        let now = Utc::now().to_rfc3339();

        let conn = self.conn.lock().await;
        conn.execute(
            r#"
            INSERT INTO checkpoints (thread_id, phase, step, state_json, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(thread_id) DO UPDATE SET
                phase = excluded.phase,
                step = excluded.step,
                state_json = excluded.state_json,
                updated_at = excluded.updated_at
            "#,
            params![
                thread_id.as_str(),
                phase.clone(),
                step,
                state_json.clone(),
                now.clone()
            ],
        )
        .await
        .map_err(db_err)?;

        conn.execute(
            "INSERT INTO checkpoint_history (thread_id, phase, step, state_json, saved_at) VALUES (?, ?, ?, ?, ?)",
            params![thread_id.as_str(), phase, step, state_json, now],
        )
        .await
        .map_err(db_err)?;

        debug!("Checkpoint saved");
        Ok(())
    }

    async fn load(&self, thread_id: &ThreadId) -> Result<Option<TaskState>> {
        let conn = self.conn.lock().await;
        let mut rows = conn
            .query(
                "SELECT state_json FROM checkpoints WHERE thread_id = ?",
                params![thread_id.as_str()],
            )
            .await
            .map_err(db_err)?;

        match rows.next().await.map_err(db_err)? {
            Some(row) => {
                let json: String = row.get(0).map_err(db_err)?;
                Ok(Some(serde_json::from_str(&json)?))
            }
            None => Ok(None),
        }
    }

    async fn list_threads(&self) -> Result<Vec<ThreadSummary>> {
        let conn = self.conn.lock().await;
        let mut rows = conn
            .query(
                "SELECT thread_id, phase, step, updated_at FROM checkpoints ORDER BY updated_at DESC",
                params![],
            )
            .await
            .map_err(db_err)?;

        let mut threads = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            let thread_id: String = row.get(0).map_err(db_err)?;
            let phase: String = row.get(1).map_err(db_err)?;
            let step: i64 = row.get(2).map_err(db_err)?;
            let updated_at: String = row.get(3).map_err(db_err)?;
            threads.push(summary_from_columns(
                ThreadId::from(thread_id),
                &phase,
                step,
                &updated_at,
            )?);
        }
        Ok(threads)
    }
}
