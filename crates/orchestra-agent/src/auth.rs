//! Credential lookup for the oracle endpoint

use orchestra_core::{OrchestraError, Result};

/// Read the API key from the configured environment variable
pub fn api_key(env_var: &str) -> Result<String> {
    api_key_from(env_var, |key| std::env::var(key).ok())
}

/// Read the API key through an arbitrary lookup
pub fn api_key_from<F>(env_var: &str, lookup: F) -> Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(env_var) {
        Some(key) if !key.trim().is_empty() => {
            tracing::debug!("Using API key from {}", env_var);
            Ok(key.trim().to_string())
        }
        _ => Err(OrchestraError::Auth(format!(
            "No API key found. Set {}=<key> or change oracle.api_key_env in .orchestra/config.toml",
            env_var
        ))),
    }
}
