//! Checkpoint store abstraction

use async_trait::async_trait;
use orchestra_core::{Result, TaskState, ThreadId, ThreadSummary};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Persists full task state keyed by thread (allows mocking in tests)
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Persist the state, replacing any previous checkpoint of the thread
    async fn save(&self, thread_id: &ThreadId, state: &TaskState) -> Result<()>;

    /// Latest checkpoint of a thread, if any
    async fn load(&self, thread_id: &ThreadId) -> Result<Option<TaskState>>;

    /// All persisted threads, most recently updated first
    async fn list_threads(&self) -> Result<Vec<ThreadSummary>>;
}

pub(crate) fn summarize(state: &TaskState) -> ThreadSummary {
    ThreadSummary {
        thread_id: state.thread_id.clone(),
        phase: state.phase,
        step: state.planner_invocations,
        updated_at: state.updated_at,
    }
}

/// Process-local checkpoint store
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    states: RwLock<HashMap<ThreadId, TaskState>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn save(&self, thread_id: &ThreadId, state: &TaskState) -> Result<()> {
        self.states
            .write()
            .await
            .insert(thread_id.clone(), state.clone());
        Ok(())
    }

    async fn load(&self, thread_id: &ThreadId) -> Result<Option<TaskState>> {
        Ok(self.states.read().await.get(thread_id).cloned())
    }

    async fn list_threads(&self) -> Result<Vec<ThreadSummary>> {
        let mut threads: Vec<ThreadSummary> =
            self.states.read().await.values().map(summarize).collect();
        threads.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(threads)
    }
}
