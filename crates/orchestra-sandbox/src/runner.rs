//! Isolation unit runners

use async_trait::async_trait;
use orchestra_core::config::SandboxConfig;
use orchestra_core::fail_open::fail_open;
use orchestra_core::{OrchestraError, Result};
use std::process::Stdio;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

/// Maximum characters of each stream carried into an error message
const OUTPUT_TAIL_CHARS: usize = 600;

/// Resource bounds applied to every isolation unit
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceLimits {
    /// Memory cap in docker notation, e.g. "512m"
    pub memory_cap: String,
    pub network_disabled: bool,
    pub cpus: Option<f32>,
    pub pids_limit: u32,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self::from(&SandboxConfig::default())
    }
}

impl From<&SandboxConfig> for ResourceLimits {
    fn from(config: &SandboxConfig) -> Self {
        Self {
            memory_cap: config.memory_limit.clone(),
            network_disabled: true,
            cpus: config.cpus,
            pids_limit: config.pids_limit,
        }
    }
}

/// Runs one script in a fresh isolation unit (allows mocking in tests)
///
/// Returns captured stdout. Any failure of the isolation layer is an `Err`;
/// turning it into text is the executor's job.
#[async_trait]
pub trait SandboxRunner: Send + Sync {
    async fn run(&self, script: &str, limits: &ResourceLimits) -> Result<String>;
}

/// Runs scripts in throwaway docker containers
#[derive(Debug, Clone)]
pub struct DockerRunner {
    docker_bin: String,
    image: String,
}

impl DockerRunner {
    pub fn new(docker_bin: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            docker_bin: docker_bin.into(),
            image: image.into(),
        }
    }

    pub fn from_config(config: &SandboxConfig) -> Self {
        Self::new(config.docker_bin.clone(), config.image.clone())
    }

    /// Arguments for `docker run`, script is fed on stdin
    pub fn run_args(&self, container_name: &str, limits: &ResourceLimits) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "run".into(),
            "--rm".into(),
            "-i".into(),
            "--name".into(),
            container_name.into(),
        ];
        if limits.network_disabled {
            args.push("--network=none".into());
        }
        args.extend([
            "--memory".into(),
            limits.memory_cap.clone(),
            "--memory-swap".into(),
            limits.memory_cap.clone(),
            "--pids-limit".into(),
            limits.pids_limit.to_string(),
        ]);
        if let Some(cpus) = limits.cpus {
            args.extend(["--cpus".into(), cpus.to_string()]);
        }
        args.extend([
            "--security-opt".into(),
            "no-new-privileges".into(),
            "--cap-drop".into(),
            "ALL".into(),
            self.image.clone(),
            "python".into(),
            "-".into(),
        ]);
        args
    }
}

/// Removes the container when dropped, whatever happened to the run
struct ContainerGuard {
    docker_bin: String,
    name: String,
}

impl Drop for ContainerGuard {
    fn drop(&mut self) {
        let docker_bin = self.docker_bin.clone();
        let name = self.name.clone();
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!("No runtime to tear down container {}", name);
            return;
        };
        handle.spawn(async move {
            // "No such container" is the normal case after --rm
            let removed = fail_open("sandbox::teardown", || async {
                Command::new(&docker_bin)
                    .args(["rm", "-f", &name])
                    .stdout(Stdio::null())
                    .stderr(Stdio::null())
                    .status()
                    .await
                    .map_err(|e| OrchestraError::Sandbox(format!("docker rm {}: {}", name, e)))
            })
            .await;
            if removed.is_some() {
                debug!("Container {} torn down", name);
            }
        });
    }
}

#[async_trait]
impl SandboxRunner for DockerRunner {
    #[instrument(skip(self, script, limits), fields(image = %self.image))]
    async fn run(&self, script: &str, limits: &ResourceLimits) -> Result<String> {
        let name = format!("orchestra-sbx-{}", Uuid::new_v4().simple());
        let _guard = ContainerGuard {
            docker_bin: self.docker_bin.clone(),
            name: name.clone(),
        };

        debug!("Starting container {}", name);
        let mut child = Command::new(&self.docker_bin)
            .args(self.run_args(&name, limits))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                OrchestraError::Sandbox(format!("Failed to launch {}: {}", self.docker_bin, e))
            })?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| OrchestraError::Sandbox("Container stdin unavailable".to_string()))?;
        stdin
            .write_all(script.as_bytes())
            .await
            .map_err(|e| OrchestraError::Sandbox(format!("Failed to send script: {}", e)))?;
        drop(stdin);

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| OrchestraError::Sandbox(format!("Container wait failed: {}", e)))?;

        debug!("Container {} finished with {}", name, output.status);
        collect_output(output)
    }
}

/// Stdout of a finished unit, or an error carrying the tail of both streams
///
/// Output printed before a non-zero exit is kept in the error text.
pub(crate) fn collect_output(output: std::process::Output) -> Result<String> {
    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    if output.status.success() {
        return Ok(stdout);
    }

    let code = output
        .status
        .code()
        .map(|c| c.to_string())
        .unwrap_or_else(|| "signal".to_string());
    let mut message = format!(
        "unit exited with status {}{}: {}",
        code,
        if code == "137" { " (killed, memory cap?)" } else { "" },
        tail(&String::from_utf8_lossy(&output.stderr), OUTPUT_TAIL_CHARS)
    );
    if !stdout.trim().is_empty() {
        message.push_str("\noutput before exit:\n");
        message.push_str(&tail(&stdout, OUTPUT_TAIL_CHARS));
    }
    Err(OrchestraError::Sandbox(message))
}

fn tail(text: &str, max_chars: usize) -> String {
    let chars: Vec<char> = text.trim().chars().collect();
    chars[chars.len().saturating_sub(max_chars)..].iter().collect()
}

/// Canned runner for testing
///
/// Replies with a fixed result after an optional delay and records every
/// script plus the peak number of concurrent runs.
pub struct StaticRunner {
    reply: std::result::Result<String, String>,
    delay: Option<Duration>,
    scripts: Mutex<Vec<String>>,
    live: AtomicUsize,
    peak: AtomicUsize,
}

impl StaticRunner {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self::with_reply(Ok(stdout.into()))
    }

    pub fn failing(message: impl Into<String>) -> Self {
        Self::with_reply(Err(message.into()))
    }

    fn with_reply(reply: std::result::Result<String, String>) -> Self {
        Self {
            reply,
            delay: None,
            scripts: Mutex::new(Vec::new()),
            live: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn scripts(&self) -> Vec<String> {
        self.scripts.lock().map(|s| s.clone()).unwrap_or_default()
    }

    /// Highest number of runs observed in flight at once
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SandboxRunner for StaticRunner {
    async fn run(&self, script: &str, _limits: &ResourceLimits) -> Result<String> {
        if let Ok(mut scripts) = self.scripts.lock() {
            scripts.push(script.to_string());
        }
        let now_live = self.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now_live, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        self.live.fetch_sub(1, Ordering::SeqCst);
        self.reply.clone().map_err(OrchestraError::Sandbox)
    }
}
