//! Service readiness polling.
//!
//! [`ReadinessPoller`] is a bounded, fixed-interval retry loop around an
//! arbitrary async predicate. The probe functions below are the predicates the
//! lab start uses; the poller knows nothing about them.

use std::fmt::Display;
use std::future::Future;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{LabError, Result};
use crate::exec::{CommandExecutor, CommandSpec};

/// Outcome of one [`ReadinessPoller::wait`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceResult {
    pub ready: bool,
    pub elapsed_seconds: f64,
    /// Timeout description (empty when ready).
    pub error: String,
}

impl ServiceResult {
    /// Convert a timed-out wait into [`LabError::Timeout`].
    pub fn into_result(self, service: &str) -> Result<Self> {
        if self.ready {
            Ok(self)
        } else {
            Err(LabError::Timeout {
                service: service.to_string(),
                elapsed_secs: self.elapsed_seconds,
            })
        }
    }
}

/// Shortest pause between two checks.
pub const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Bounded retry-until-ready loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessPoller {
    pub timeout: Duration,
    pub interval: Duration,
}

impl ReadinessPoller {
    /// An interval below [`MIN_INTERVAL`] is raised to it.
    pub fn new(timeout: Duration, interval: Duration) -> Self {
        Self {
            timeout,
            interval: interval.max(MIN_INTERVAL),
        }
    }

    /// Poll `check` until it reports ready or the timeout passes.
    ///
    /// A check that errors counts as not ready. After every failed check the
    /// wait gives up if the deadline has passed or the next check would land
    /// beyond it, so `check` runs at most `floor(timeout / interval) + 1`
    /// times and a zero timeout runs it exactly once. The interval is never
    /// shorter than [`MIN_INTERVAL`], so the loop always parks between checks.
    pub async fn wait<F, Fut, E>(&self, service: &str, mut check: F) -> ServiceResult
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<bool, E>>,
        E: Display,
    {
        let interval = self.interval.max(MIN_INTERVAL);
        let start = Instant::now();
        let deadline = start + self.timeout;

        info!(
            service,
            timeout_secs = self.timeout.as_secs_f64(),
            interval_secs = interval.as_secs_f64(),
            "Waiting for service"
        );

        loop {
            match check().await {
                Ok(true) => {
                    let elapsed = start.elapsed().as_secs_f64();
                    info!(service, elapsed_secs = elapsed, "Service is ready");
                    return ServiceResult {
                        ready: true,
                        elapsed_seconds: elapsed,
                        error: String::new(),
                    };
                }
                Ok(false) => {}
                Err(e) => debug!(service, error = %e, "Readiness check failed"),
            }

            let now = Instant::now();
            if now >= deadline || now + interval > deadline {
                let elapsed = now.duration_since(start).as_secs_f64();
                warn!(service, elapsed_secs = elapsed, "Service timed out");
                return ServiceResult {
                    ready: false,
                    elapsed_seconds: elapsed,
                    error: format!("{service} timed out after {elapsed:.0}s"),
                };
            }

            tokio::time::sleep(interval).await;
        }
    }
}

/// Probe an HTTPS endpoint with `curl` (self-signed certs accepted).
pub async fn indexer_probe(
    executor: &dyn CommandExecutor,
    url: &str,
    username: &str,
    password: &str,
) -> Result<bool> {
    let spec = CommandSpec::new("curl")
        .args(["-k", "-s", "-f", url, "-u"])
        .arg(format!("{username}:{password}"))
        .timeout(Duration::from_secs(10));
    Ok(executor.run(&spec).await?.success())
}

/// Probe the manager API from inside its container via `<runtime> exec`.
pub async fn manager_api_probe(
    executor: &dyn CommandExecutor,
    runtime_program: &str,
    container: &str,
    username: &str,
    password: &str,
) -> Result<bool> {
    let spec = CommandSpec::new(runtime_program)
        .args(["exec", container, "curl", "-k", "-s", "-f"])
        .args(["https://localhost:55000", "-u"])
        .arg(format!("{username}:{password}"))
        .timeout(Duration::from_secs(15));
    Ok(executor.run(&spec).await?.success())
}

/// An SSH endpoint exposed by a lab container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshTarget {
    pub name: &'static str,
    pub host: String,
    pub port: u16,
    pub user: &'static str,
}

/// Check that key-based, non-interactive SSH login works.
pub async fn ssh_probe(
    executor: &dyn CommandExecutor,
    target: &SshTarget,
    key_path: &Path,
) -> Result<bool> {
    let spec = CommandSpec::new("ssh")
        .arg("-i")
        .arg(key_path.to_string_lossy())
        .args([
            "-o",
            "ConnectTimeout=5",
            "-o",
            "StrictHostKeyChecking=no",
            "-o",
            "BatchMode=yes",
            "-p",
        ])
        .arg(target.port.to_string())
        .arg(format!("{}@{}", target.user, target.host))
        .args(["echo", "SSH OK"])
        .timeout(Duration::from_secs(10));
    Ok(executor.run(&spec).await?.success())
}
