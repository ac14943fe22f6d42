//! Sandbox executor: bounded, time-limited, never fails

use crate::capability::DynamicCapability;
use crate::runner::{DockerRunner, ResourceLimits, SandboxRunner};
use orchestra_core::config::SandboxConfig;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};

/// Prefix of every text result describing an isolation-layer failure
pub const SANDBOX_ERROR_PREFIX: &str = "Sandbox Environment Error: ";

/// Runs dynamic capabilities inside disposable isolation units
///
/// At most `max_concurrent` units are live at once across all threads sharing
/// this executor. Waiting for a slot counts against the timeout.
#[derive(Clone)]
pub struct SandboxExecutor {
    runner: Arc<dyn SandboxRunner>,
    limits: ResourceLimits,
    timeout: Duration,
    permits: Arc<Semaphore>,
}

impl std::fmt::Debug for SandboxExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SandboxExecutor")
            .field("limits", &self.limits)
            .field("timeout", &self.timeout)
            .field("available_permits", &self.permits.available_permits())
            .finish()
    }
}

impl SandboxExecutor {
    pub fn new(
        runner: Arc<dyn SandboxRunner>,
        limits: ResourceLimits,
        timeout: Duration,
        max_concurrent: usize,
    ) -> Self {
        Self {
            runner,
            limits,
            timeout,
            permits: Arc::new(Semaphore::new(max_concurrent.clamp(1, Semaphore::MAX_PERMITS))),
        }
    }

    /// Docker-backed executor from config
    pub fn from_config(config: &SandboxConfig) -> Self {
        Self::new(
            Arc::new(DockerRunner::from_config(config)),
            ResourceLimits::from(config),
            config.timeout(),
            config.max_concurrent,
        )
    }

    /// Execute a capability and return its captured output
    ///
    /// Every failure of the isolation layer, including the timeout, comes back
    /// as text prefixed with [`SANDBOX_ERROR_PREFIX`].
    #[instrument(skip(self, capability), fields(task = %capability.source_task_description))]
    pub async fn execute(&self, capability: &DynamicCapability) -> String {
        let script = capability.render_script();
        let started = tokio::time::Instant::now();

        let permit = match tokio::time::timeout(self.timeout, self.permits.acquire()).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(e)) => return sandbox_error(format!("executor closed: {}", e)),
            Err(_) => {
                warn!("No sandbox slot freed up within {:?}", self.timeout);
                return sandbox_error(format!(
                    "no isolation unit available within {}s",
                    self.timeout.as_secs_f32()
                ));
            }
        };

        let remaining = self.timeout.saturating_sub(started.elapsed());
        debug!("Running capability ({} bytes script)", script.len());
        let result = tokio::time::timeout(remaining, self.runner.run(&script, &self.limits)).await;
        drop(permit);

        match result {
            Ok(Ok(stdout)) => {
                info!("Capability finished in {:?}", started.elapsed());
                stdout
            }
            Ok(Err(e)) => {
                warn!("Sandbox run failed: {}", e);
                sandbox_error(e)
            }
            Err(_) => {
                warn!("Sandbox run exceeded {:?}", self.timeout);
                sandbox_error(format!(
                    "execution timed out after {}s",
                    self.timeout.as_secs_f32()
                ))
            }
        }
    }
}

fn sandbox_error(detail: impl std::fmt::Display) -> String {
    format!("{}{}", SANDBOX_ERROR_PREFIX, detail)
}
