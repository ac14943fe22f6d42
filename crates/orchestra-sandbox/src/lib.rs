//! # orchestra-sandbox
//!
//! Dynamic capabilities: task-specific analysis logic written by the oracle
//! on demand and executed only inside a disposable isolation unit.
//!
//! - [`CapabilitySynthesizer`] asks the oracle for logic and binds it to data
//! - [`DynamicCapability::render_script`] wraps it in a fixed harness
//! - [`SandboxExecutor`] runs the harness through a [`SandboxRunner`] under a
//!   concurrency bound and a timeout, and always answers with text
//!
//! Generated logic is never inspected or executed in the host process. The
//! isolation boundary is the only safety mechanism.

mod capability;
mod executor;
mod runner;
mod synthesizer;

pub use capability::{DynamicCapability, ANALYSIS_END_MARKER, ANALYSIS_START_MARKER, EXECUTION_ERROR_PREFIX};
pub use executor::{SandboxExecutor, SANDBOX_ERROR_PREFIX};
pub use runner::{DockerRunner, ResourceLimits, SandboxRunner, StaticRunner};
pub use synthesizer::{CapabilitySynthesizer, DEFAULT_TASK_DESCRIPTION};
