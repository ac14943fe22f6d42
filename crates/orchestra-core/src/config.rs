//! Configuration management for Orchestra
//!
//! Settings live in `.orchestra/config.toml` under the project root. Every
//! field has a default, so a missing file or a partial file is fine.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{OrchestraError, Result};

/// Directory holding config and default databases
pub const CONFIG_DIR: &str = ".orchestra";

/// Project-level Orchestra configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrchestraConfig {
    /// Reasoning oracle endpoint
    #[serde(default)]
    pub oracle: OracleConfig,

    /// Isolation settings for synthesized capabilities
    #[serde(default)]
    pub sandbox: SandboxConfig,

    /// Decision loop limits
    #[serde(default)]
    pub engine: EngineConfig,

    /// Checkpoint and warehouse locations
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Oracle (chat completion) settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OracleConfig {
    #[serde(default = "default_model")]
    pub model: String,

    /// Base URL of an OpenAI-compatible API
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Environment variable containing the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,

    #[serde(default)]
    pub temperature: f32,

    /// Retries for rate limits and 5xx responses
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Upper bound for a single completion
    #[serde(default = "default_oracle_timeout_secs")]
    pub timeout_secs: u64,
}

/// Sandbox settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Image providing python + pandas
    #[serde(default = "default_image")]
    pub image: String,

    #[serde(default = "default_docker_bin")]
    pub docker_bin: String,

    /// Memory cap in docker notation (e.g. "512m")
    #[serde(default = "default_memory_limit")]
    pub memory_limit: String,

    #[serde(default)]
    pub cpus: Option<f32>,

    #[serde(default = "default_pids_limit")]
    pub pids_limit: u32,

    #[serde(default = "default_sandbox_timeout_secs")]
    pub timeout_secs: u64,

    /// Bound on concurrently live isolation units
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
}

/// Decision loop settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum planner invocations per thread
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,

    /// Characters of the most recent output shown to the planner
    #[serde(default = "default_preview_chars")]
    pub preview_chars: usize,
}

/// Storage settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_checkpoint_path")]
    pub checkpoint_path: PathBuf,

    /// Analytic database queried by the loop
    #[serde(default)]
    pub warehouse_path: Option<PathBuf>,
}

// Default value providers
fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_max_tokens() -> usize {
    4096
}

fn default_max_retries() -> u32 {
    5
}

fn default_oracle_timeout_secs() -> u64 {
    120
}

fn default_image() -> String {
    "agent-sandbox:latest".to_string()
}

fn default_docker_bin() -> String {
    "docker".to_string()
}

fn default_memory_limit() -> String {
    "512m".to_string()
}

fn default_pids_limit() -> u32 {
    128
}

fn default_sandbox_timeout_secs() -> u64 {
    60
}

fn default_max_concurrent() -> usize {
    4
}

fn default_max_iterations() -> usize {
    12
}

fn default_preview_chars() -> usize {
    2000
}

fn default_checkpoint_path() -> PathBuf {
    PathBuf::from(CONFIG_DIR).join("checkpoints.db")
}

impl OrchestraConfig {
    /// Load configuration from `.orchestra/config.toml` or use defaults
    pub fn load_or_default(root: &Path) -> Result<Self> {
        let config_path = root.join(CONFIG_DIR).join("config.toml");

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            toml::from_str(&content)
                .map_err(|e| OrchestraError::Config(format!("Failed to parse config file: {}", e)))
        } else {
            Ok(Self::default())
        }
    }

    /// Write default configuration to `.orchestra/config.toml`
    pub fn write_default(root: &Path) -> Result<PathBuf> {
        let config_dir = root.join(CONFIG_DIR);
        std::fs::create_dir_all(&config_dir)?;

        let config_path = config_dir.join("config.toml");
        let content = toml::to_string_pretty(&Self::default())
            .map_err(|e| OrchestraError::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(&config_path, content)?;
        Ok(config_path)
    }

    /// Apply `OPENAI_MODEL` and `DATABASE_URL` from the process environment
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary lookup
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(model) = lookup("OPENAI_MODEL").filter(|m| !m.trim().is_empty()) {
            self.oracle.model = model;
        }
        if let Some(url) = lookup("DATABASE_URL").filter(|u| !u.trim().is_empty()) {
            self.storage.warehouse_path = Some(PathBuf::from(strip_db_scheme(&url)));
        }
    }
}

/// Accept `sqlite://path`, `file:path` or a bare path
fn strip_db_scheme(url: &str) -> &str {
    url.strip_prefix("sqlite://")
        .or_else(|| url.strip_prefix("file:"))
        .unwrap_or(url)
}

impl OracleConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl SandboxConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl StorageConfig {
    /// Checkpoint path resolved against the project root
    pub fn checkpoint_path_in(&self, root: &Path) -> PathBuf {
        if self.checkpoint_path.is_absolute() {
            self.checkpoint_path.clone()
        } else {
            root.join(&self.checkpoint_path)
        }
    }
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            base_url: default_base_url(),
            api_key_env: default_api_key_env(),
            max_tokens: default_max_tokens(),
            temperature: 0.0,
            max_retries: default_max_retries(),
            timeout_secs: default_oracle_timeout_secs(),
        }
    }
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            image: default_image(),
            docker_bin: default_docker_bin(),
            memory_limit: default_memory_limit(),
            cpus: None,
            pids_limit: default_pids_limit(),
            timeout_secs: default_sandbox_timeout_secs(),
            max_concurrent: default_max_concurrent(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            preview_chars: default_preview_chars(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            checkpoint_path: default_checkpoint_path(),
            warehouse_path: None,
        }
    }
}
