//! Orchestrator: the cyclic planner/router loop
//!
//! One thread runs strictly sequentially: plan, route, run one node, persist,
//! repeat. Independent threads share nothing but the injected collaborators,
//! so any number of them can be driven concurrently from one [`Orchestrator`].

use crate::nodes::ActionNodes;
use crate::planner::{planner_update, Planner};
use crate::state_machine::{transition, Action, Event};
use orchestra_agent::Oracle;
use orchestra_core::config::EngineConfig;
use orchestra_core::fail_open::fail_open_with_retries;
use orchestra_core::{
    truncate_preview, Decision, OrchestraError, Phase, Result, TaskState, ThreadId,
};
use orchestra_sandbox::{CapabilitySynthesizer, SandboxExecutor};
use orchestra_storage::{CheckpointStore, Warehouse};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Attempts per checkpoint write before the loop moves on without it
pub const CHECKPOINT_RETRIES: usize = 3;

const PROGRESS_DETAIL_CHARS: usize = 200;

/// Why a run stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Report produced on the planner's own decision
    Completed,
    /// Report forced by the iteration cap
    IterationCap,
    /// Cancelled between cycles; the thread can be resumed
    Cancelled,
}

/// Result of driving a thread
#[derive(Debug, Clone)]
pub struct Outcome {
    pub thread_id: ThreadId,
    pub stop_reason: StopReason,
    pub final_report: Option<String>,
    pub planner_invocations: usize,
    pub state: TaskState,
}

/// Emitted after every transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressEvent {
    pub thread_id: ThreadId,
    pub step: usize,
    /// Phase whose work just finished
    pub phase: Phase,
    pub detail: String,
}

/// The control-flow engine
pub struct Orchestrator {
    planner: Planner,
    nodes: ActionNodes,
    store: Arc<dyn CheckpointStore>,
    max_iterations: usize,
    progress: Option<UnboundedSender<ProgressEvent>>,
}

impl Orchestrator {
    /// Wire an orchestrator from its collaborators
    ///
    /// The oracle is shared by the planner, the nodes and the synthesizer.
    pub fn new(
        oracle: Arc<dyn Oracle>,
        warehouse: Arc<dyn Warehouse>,
        executor: SandboxExecutor,
        store: Arc<dyn CheckpointStore>,
        config: &EngineConfig,
    ) -> Self {
        let synthesizer = CapabilitySynthesizer::new(oracle.clone());
        Self {
            planner: Planner::new(oracle.clone(), config.preview_chars),
            nodes: ActionNodes::new(oracle, warehouse, synthesizer, executor),
            store,
            max_iterations: config.max_iterations,
            progress: None,
        }
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Stream a [`ProgressEvent`] after every transition
    pub fn with_progress(mut self, sender: UnboundedSender<ProgressEvent>) -> Self {
        self.progress = Some(sender);
        self
    }

    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    /// Start a thread, or continue it if a checkpoint already exists
    #[instrument(skip_all, fields(thread = %thread_id))]
    pub async fn run(
        &self,
        thread_id: ThreadId,
        query: &str,
        cancel: &CancellationToken,
    ) -> Result<Outcome> {
        let state = match self.store.load(&thread_id).await? {
            Some(existing) => {
                if existing.user_query != query {
                    warn!(
                        "Thread {} already exists for a different query; continuing the stored one",
                        thread_id
                    );
                }
                info!("Continuing thread {} at {}", thread_id, existing.phase);
                existing
            }
            None => {
                info!("Starting thread {}", thread_id);
                let state = TaskState::new(thread_id, query);
                self.persist(&state).await;
                state
            }
        };
        self.drive(state, cancel).await
    }

    /// Continue a persisted thread from its checkpoint
    #[instrument(skip_all, fields(thread = %thread_id))]
    pub async fn resume(&self, thread_id: &ThreadId, cancel: &CancellationToken) -> Result<Outcome> {
        let state = self
            .store
            .load(thread_id)
            .await?
            .ok_or_else(|| OrchestraError::ThreadNotFound(thread_id.to_string()))?;
        info!("Resuming thread {} at {}", thread_id, state.phase);
        self.drive(state, cancel).await
    }

    async fn drive(&self, mut state: TaskState, cancel: &CancellationToken) -> Result<Outcome> {
        loop {
            if state.phase.is_terminal() {
                let stop_reason = if state.degraded {
                    StopReason::IterationCap
                } else {
                    StopReason::Completed
                };
                info!(
                    "Thread {} done after {} planner invocations ({:?})",
                    state.thread_id, state.planner_invocations, stop_reason
                );
                return Ok(outcome(state, stop_reason));
            }

            if cancel.is_cancelled() {
                info!("Thread {} cancelled at {}", state.thread_id, state.phase);
                self.persist(&state).await;
                return Ok(outcome(state, StopReason::Cancelled));
            }

            let phase = state.phase;
            let event = if phase == Phase::Planning {
                self.planning_cycle(&mut state).await
            } else {
                let update = self.nodes.run(phase, &state).await;
                state.apply(update);
                Event::NodeCompleted
            };

            let (next, actions) = transition(phase, event);
            for action in actions {
                match action {
                    Action::LogActivity { message } => info!("{}", message),
                    Action::MarkDegraded => state.degraded = true,
                }
            }
            debug!("{} -> {}", phase, next);
            state.phase = next;

            self.persist(&state).await;
            self.emit(&state, phase);
        }
    }

    /// Consult the planner, or skip it once the cap is reached
    async fn planning_cycle(&self, state: &mut TaskState) -> Event {
        if state.planner_invocations >= self.max_iterations {
            warn!(
                "Thread {} reached the iteration cap ({})",
                state.thread_id, self.max_iterations
            );
            state.apply(planner_update(Decision::iteration_cap()));
            return Event::IterationCapReached {
                cap: self.max_iterations,
            };
        }

        state.planner_invocations += 1;
        let update = self.planner.plan(state).await;
        let decision = update.decision.clone().unwrap_or_else(Decision::parse_failure);
        state.apply(update);
        Event::PlannerDecided { decision }
    }

    async fn persist(&self, state: &TaskState) {
        let store = &self.store;
        fail_open_with_retries(
            "checkpoint::save",
            || store.save(&state.thread_id, state),
            CHECKPOINT_RETRIES,
        )
        .await;
    }

    fn emit(&self, state: &TaskState, finished: Phase) {
        let Some(sender) = &self.progress else {
            return;
        };
        let detail = match finished {
            Phase::Planning => state
                .pending_decision
                .as_ref()
                .map(|d| {
                    let action = d
                        .next_action
                        .as_ref()
                        .map(|a| a.as_str().to_string())
                        .unwrap_or_else(|| "<none>".to_string());
                    format!("{} ({})", action, d.rationale)
                })
                .unwrap_or_default(),
            _ => state
                .message_log
                .last()
                .map(|m| truncate_preview(&m.content, PROGRESS_DETAIL_CHARS))
                .unwrap_or_default(),
        };
        let event = ProgressEvent {
            thread_id: state.thread_id.clone(),
            step: state.planner_invocations,
            phase: finished,
            detail,
        };
        // A dropped receiver only means nobody is watching
        if sender.send(event).is_err() {
            debug!("Progress receiver gone");
        }
    }
}

fn outcome(state: TaskState, stop_reason: StopReason) -> Outcome {
    Outcome {
        thread_id: state.thread_id.clone(),
        stop_reason,
        final_report: state.final_report.clone(),
        planner_invocations: state.planner_invocations,
        state,
    }
}
