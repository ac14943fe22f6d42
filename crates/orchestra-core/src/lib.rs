//! # orchestra-core
//!
//! Core types for the Orchestra analytics assistant.
//!
//! Orchestra answers free-form business questions by looping a planner over a
//! small set of actions (query the warehouse, synthesize and sandbox custom
//! analysis, interpret, report) until a report is produced.
//!
//! ## Core Paradigm
//!
//! - One [`TaskState`] per thread, threaded through every node
//! - Nodes return a [`StateUpdate`]; only [`TaskState::apply`] mutates state
//! - Logs are append-only, the final report is write-once
//! - Every recoverable failure degrades to text the planner can read

mod error;
pub mod config;
pub mod fail_open;
mod query;
mod types;

pub use config::OrchestraConfig;
pub use error::{OrchestraError, Result};
pub use query::{QueryResult, Record, DATA_SENTINEL, EMPTY_RESULT_SUMMARY};
pub use types::*;
