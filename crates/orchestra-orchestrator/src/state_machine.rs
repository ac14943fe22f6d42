//! Pure state machine for the planner loop
//!
//! No async, no I/O. `transition(phase, event)` returns the next phase and
//! the side effects the engine must carry out. Events that do not fit the
//! current phase force the terminal path through [`Phase::Report`]; the
//! function never panics.

use crate::router::route;
use orchestra_core::{Decision, NextAction, Phase};

/// Events that trigger state transitions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Planner produced a decision
    PlannerDecided { decision: Decision },
    /// Planning was skipped because the iteration cap was reached
    IterationCapReached { cap: usize },
    /// The current action node finished
    NodeCompleted,
}

/// Side effects to execute as part of a transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    LogActivity { message: String },
    /// Flag the thread as terminated by the cap
    MarkDegraded,
}

/// Pure transition function
pub fn transition(phase: Phase, event: Event) -> (Phase, Vec<Action>) {
    match (phase, event) {
        (Phase::Planning, Event::PlannerDecided { decision }) => {
            let next = route(&decision);
            let action = decision
                .next_action
                .as_ref()
                .map(|a| a.as_str().to_string())
                .unwrap_or_else(|| "<none>".to_string());
            let mut actions = Vec::new();
            if next == Phase::Report && decision.next_action != Some(NextAction::Report) {
                actions.push(Action::LogActivity {
                    message: format!("Unroutable action '{}', falling back to report", action),
                });
            }
            actions.push(Action::LogActivity {
                message: format!("Planner chose {} -> {}", action, next),
            });
            (next, actions)
        }

        (Phase::Planning, Event::IterationCapReached { cap }) => (
            Phase::Report,
            vec![
                Action::LogActivity {
                    message: format!("Iteration cap of {} reached, forcing report", cap),
                },
                Action::MarkDegraded,
            ],
        ),

        // Query generation always feeds straight into execution
        (Phase::QueryGen, Event::NodeCompleted) => (Phase::QueryExec, vec![]),

        (Phase::QueryExec, Event::NodeCompleted)
        | (Phase::DynamicAnalysis, Event::NodeCompleted)
        | (Phase::Interpret, Event::NodeCompleted) => (Phase::Planning, vec![]),

        (Phase::Report, Event::NodeCompleted) => (
            Phase::Done,
            vec![Action::LogActivity {
                message: "Report complete".to_string(),
            }],
        ),

        // Terminal state absorbs everything
        (Phase::Done, _) => (Phase::Done, vec![]),

        (phase, event) => (
            Phase::Report,
            vec![Action::LogActivity {
                message: format!(
                    "Invalid transition: {} cannot handle {:?}, forcing report",
                    phase, event
                ),
            }],
        ),
    }
}
