//! # orchestra-agent
//!
//! Reasoning oracle access for Orchestra.
//!
//! The loop never reasons on its own: every decision, query, synthesized
//! program, interpretation and report comes from an [`Oracle`]. This crate
//! provides:
//! - The [`Oracle`] trait injected into the orchestrator
//! - An OpenAI-compatible HTTP client with retries and a circuit breaker
//! - [`TimeoutOracle`] to bound every call
//! - [`ScriptedOracle`] for tests

mod auth;
mod circuit_breaker;
mod client;
mod oracle;
mod types;

pub use auth::{api_key, api_key_from};
pub use circuit_breaker::{CircuitBreaker, CircuitState};
pub use client::OracleClient;
pub use oracle::{Oracle, ScriptedOracle, ScriptedReply, TimeoutOracle};
pub use types::*;
