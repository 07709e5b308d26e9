//! Container health checks and aggregation.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::runtime::RuntimeClient;

/// Result of probing a single unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResult {
    pub unit_name: String,
    pub healthy: bool,
    /// Health-check state, runtime state, `not_found`, or `error`.
    pub status: String,
    pub error: Option<String>,
}

/// Aggregate view across units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthSummary {
    pub all_healthy: bool,
    pub healthy_count: usize,
    pub unhealthy_count: usize,
    pub results: Vec<HealthResult>,
}

/// Probe one unit, retrying lookup failures.
///
/// `retries` is the total number of attempts (values below 1 are treated as
/// 1). A unit with a healthcheck is healthy iff its health state is
/// `healthy`; without one, iff it is running. A found unit is reported
/// immediately, whatever its state.
pub async fn check_unit(
    name: &str,
    client: &dyn RuntimeClient,
    retries: u32,
    retry_delay: Duration,
) -> HealthResult {
    let attempts = retries.max(1);
    let mut last_error = None;
    let mut last_not_found = true;

    for attempt in 1..=attempts {
        let unit = match client.inspect_unit(name).await {
            Ok(unit) => unit,
            Err(e) => {
                warn!(unit = name, attempt, attempts, error = %e, "Unit lookup failed");
                last_not_found = e.is_not_found();
                last_error = Some(e.to_string());
                if attempt < attempts {
                    tokio::time::sleep(retry_delay).await;
                }
                continue;
            }
        };

        return match unit.health {
            Some(health) => {
                debug!(unit = name, health = %health, state = %unit.state, "Unit health");
                HealthResult {
                    unit_name: name.to_string(),
                    healthy: health == "healthy",
                    status: health,
                    error: None,
                }
            }
            None => {
                debug!(unit = name, state = %unit.state, "Unit has no healthcheck");
                HealthResult {
                    unit_name: name.to_string(),
                    healthy: unit.is_running(),
                    status: unit.state,
                    error: None,
                }
            }
        };
    }

    HealthResult {
        unit_name: name.to_string(),
        healthy: false,
        status: if last_not_found { "not_found" } else { "error" }.to_string(),
        error: last_error,
    }
}

/// Summarise results. An empty set is never healthy.
pub fn aggregate(results: Vec<HealthResult>) -> HealthSummary {
    let healthy_count = results.iter().filter(|r| r.healthy).count();
    let unhealthy_count = results.len() - healthy_count;

    HealthSummary {
        all_healthy: unhealthy_count == 0 && !results.is_empty(),
        healthy_count,
        unhealthy_count,
        results,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LabError;
    use crate::fakes::FakeRuntime;
    use crate::runtime::UnitDescriptor;

    fn result(name: &str, healthy: bool) -> HealthResult {
        HealthResult {
            unit_name: name.to_string(),
            healthy,
            status: if healthy { "healthy" } else { "unhealthy" }.to_string(),
            error: None,
        }
    }

    #[test]
    fn test_aggregate_empty_is_not_healthy() {
        let summary = aggregate(Vec::new());
        assert!(!summary.all_healthy);
        assert_eq!(summary.healthy_count, 0);
        assert_eq!(summary.unhealthy_count, 0);
    }

    #[test]
    fn test_aggregate_counts() {
        for (k, m) in [(1, 0), (3, 0), (0, 2), (2, 1), (4, 4)] {
            let mut results: Vec<_> = (0..k).map(|i| result(&format!("h{i}"), true)).collect();
            results.extend((0..m).map(|i| result(&format!("u{i}"), false)));

            let summary = aggregate(results);
            assert_eq!(summary.healthy_count, k);
            assert_eq!(summary.unhealthy_count, m);
            assert_eq!(summary.all_healthy, m == 0 && k + m > 0);
            assert_eq!(summary.results.len(), k + m);
        }
    }

    #[tokio::test]
    async fn test_explicit_health_wins_over_running() {
        let runtime = FakeRuntime::new();
        runtime.add_unit("indexer", "running", Some("starting"));

        let result = check_unit("indexer", &runtime, 3, Duration::from_secs(1)).await;
        assert!(!result.healthy);
        assert_eq!(result.status, "starting");
        assert_eq!(runtime.inspect_count("indexer"), 1);
    }

    #[tokio::test]
    async fn test_running_without_healthcheck_is_healthy() {
        let runtime = FakeRuntime::new();
        runtime.add_unit("kali", "running", None);
        runtime.add_unit("victim", "exited", None);

        assert!(check_unit("kali", &runtime, 1, Duration::ZERO).await.healthy);
        let victim = check_unit("victim", &runtime, 1, Duration::ZERO).await;
        assert!(!victim.healthy);
        assert_eq!(victim.status, "exited");
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_unit_exhausts_retries() {
        let runtime = FakeRuntime::new();
        let start = tokio::time::Instant::now();

        let result = check_unit("ghost", &runtime, 3, Duration::from_secs(2)).await;
        assert!(!result.healthy);
        assert_eq!(result.status, "not_found");
        assert!(result.error.unwrap().contains("ghost"));
        assert_eq!(runtime.inspect_count("ghost"), 3);
        // Sleeps only between attempts.
        assert_eq!(start.elapsed(), Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unit_appearing_on_retry() {
        let runtime = FakeRuntime::new();
        runtime.script_unit(
            "manager",
            vec![
                Err(LabError::NotFound("manager".to_string())),
                Ok(UnitDescriptor {
                    name: "manager".to_string(),
                    state: "running".to_string(),
                    health: Some("healthy".to_string()),
                }),
            ],
        );

        let result = check_unit("manager", &runtime, 3, Duration::from_secs(1)).await;
        assert!(result.healthy);
        assert_eq!(runtime.inspect_count("manager"), 2);
    }

    #[tokio::test]
    async fn test_zero_retries_still_probes_once() {
        let runtime = FakeRuntime::new();
        runtime.add_unit("dns", "running", None);
        assert!(check_unit("dns", &runtime, 0, Duration::ZERO).await.healthy);
        assert_eq!(runtime.inspect_count("dns"), 1);
    }

    #[tokio::test]
    async fn test_non_lookup_error_reports_error_status() {
        let runtime = FakeRuntime::new();
        runtime.script_unit("mail", vec![Err(LabError::tool("docker", "daemon down"))]);

        let result = check_unit("mail", &runtime, 1, Duration::ZERO).await;
        assert_eq!(result.status, "error");
        assert!(result.error.unwrap().contains("daemon down"));
    }
}
