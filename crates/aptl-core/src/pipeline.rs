//! Ordered step execution with per-step failure policy.
//!
//! A pipeline is a fixed slice of [`StepSpec`]s run in order against a
//! mutable context. A failed [`StepPolicy::Critical`] step halts the run;
//! a failed [`StepPolicy::BestEffort`] step is logged and skipped past.
//! Nothing is rolled back.

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::error::Result;
use crate::result::LabResult;

/// Future returned by a step action.
pub type StepFuture<'a> = BoxFuture<'a, Result<()>>;

/// A step body. It may read and update the shared context.
pub type StepAction<C> = for<'a> fn(&'a mut C) -> StepFuture<'a>;

/// How a step failure affects the rest of the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepPolicy {
    /// Failure halts the pipeline.
    Critical,
    /// Failure is logged as a warning.
    BestEffort,
}

/// One named step of a pipeline.
pub struct StepSpec<C> {
    pub name: &'static str,
    pub policy: StepPolicy,
    pub action: StepAction<C>,
}

impl<C> StepSpec<C> {
    pub fn critical(name: &'static str, action: StepAction<C>) -> Self {
        Self {
            name,
            policy: StepPolicy::Critical,
            action,
        }
    }

    pub fn best_effort(name: &'static str, action: StepAction<C>) -> Self {
        Self {
            name,
            policy: StepPolicy::BestEffort,
            action,
        }
    }
}

/// Outcome of a single executed step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "error", rename_all = "snake_case")]
pub enum StepStatus {
    Succeeded,
    /// A best-effort step failed; the run continued.
    Warned(String),
    /// A critical step failed; the run halted here.
    Failed(String),
}

/// Record of one executed step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    pub name: String,
    pub policy: StepPolicy,
    pub status: StepStatus,
}

/// Result of a complete pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineOutcome {
    /// Executed steps, in order. Steps after a critical failure are absent.
    pub steps: Vec<StepRecord>,

    /// Error text of the critical step that halted the run.
    pub failure: Option<String>,
}

impl PipelineOutcome {
    pub fn succeeded(&self) -> bool {
        self.failure.is_none()
    }

    /// Number of best-effort steps that failed.
    pub fn warning_count(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| matches!(s.status, StepStatus::Warned(_)))
            .count()
    }

    /// Name of the step that halted the run.
    pub fn failed_step(&self) -> Option<&str> {
        self.steps
            .iter()
            .find(|s| matches!(s.status, StepStatus::Failed(_)))
            .map(|s| s.name.as_str())
    }

    /// Collapse into a [`LabResult`], using `message` on success.
    pub fn into_lab_result(self, message: &str) -> LabResult {
        match self.failure {
            Some(error) => LabResult::failed(error),
            None => LabResult::ok(message),
        }
    }
}

/// Sequential step runner.
pub struct Pipeline;

impl Pipeline {
    /// Run `steps` in order against `ctx`.
    pub async fn run<C: Send>(ctx: &mut C, steps: &[StepSpec<C>]) -> PipelineOutcome {
        let mut outcome = PipelineOutcome::default();
        let total = steps.len();

        for (index, step) in steps.iter().enumerate() {
            let number = index + 1;
            info!(step = number, total, "Step {number}: {}...", step.name);

            let status = match ((step.action)(ctx).await, step.policy) {
                (Ok(()), _) => StepStatus::Succeeded,
                (Err(e), StepPolicy::BestEffort) => {
                    warn!(step = number, error = %e, "{} failed; continuing", step.name);
                    StepStatus::Warned(e.to_string())
                }
                (Err(e), StepPolicy::Critical) => {
                    error!(step = number, error = %e, "{} failed", step.name);
                    StepStatus::Failed(e.to_string())
                }
            };

            let halted = match &status {
                StepStatus::Failed(error) => Some(error.clone()),
                _ => None,
            };
            outcome.steps.push(StepRecord {
                name: step.name.to_string(),
                policy: step.policy,
                status,
            });

            if halted.is_some() {
                outcome.failure = halted;
                break;
            }
        }

        outcome
    }
}
