//! # orchestra-orchestrator
//!
//! The control-flow engine: a cyclic planner/router state machine.
//!
//! ```text
//!   PLANNING --decision--> QUERY_GEN -> QUERY_EXEC --+
//!      ^   |                                         |
//!      |   +--> DYNAMIC_ANALYSIS / INTERPRET --------+--> PLANNING
//!      |   +--> REPORT -> DONE
//! ```
//!
//! - [`state_machine`]: pure transition table, no I/O
//! - [`router`]: decision to phase mapping
//! - [`Planner`]: asks the oracle for the next [`Decision`](orchestra_core::Decision)
//! - [`ActionNodes`]: the task-performing nodes
//! - [`Orchestrator`]: runs the loop, persists after every transition

mod engine;
mod nodes;
mod planner;
pub mod prompts;
pub mod router;
pub mod state_machine;

pub use engine::{Orchestrator, Outcome, ProgressEvent, StopReason, CHECKPOINT_RETRIES};
pub use nodes::{ActionNodes, NO_PAYLOAD_MESSAGE, NO_QUERY_MESSAGE, PARTIAL_REPORT_NOTICE};
pub use planner::{parse_decision, Planner};
