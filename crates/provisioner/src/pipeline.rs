//! Ordered stage execution.
//!
//! Stages run strictly in declaration order. A stage whose precondition
//! already holds is skipped; a failing stage either aborts the pipeline or
//! is logged and passed over, depending on its [`FailurePolicy`].

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::context::ProvisionContext;
use crate::ui;

/// What happens when a stage fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Stop the pipeline; the process exits non-zero.
    Abort,
    /// Log a warning and carry on with the next stage.
    WarnAndContinue,
}

/// One named, idempotent unit of provisioning.
#[async_trait]
pub trait Stage: Send + Sync {
    /// Human-readable stage name.
    fn name(&self) -> &str;

    /// Failure policy. Defaults to [`FailurePolicy::Abort`].
    fn policy(&self) -> FailurePolicy {
        FailurePolicy::Abort
    }

    /// Whether the stage's end state already holds.
    async fn is_satisfied(&self, _ctx: &ProvisionContext) -> anyhow::Result<bool> {
        Ok(false)
    }

    /// Perform the stage.
    async fn run(&self, ctx: &ProvisionContext) -> anyhow::Result<()>;
}

/// Result of a single stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "message", rename_all = "snake_case")]
pub enum StageOutcome {
    /// The action ran and succeeded.
    Completed,
    /// The precondition held; nothing was done.
    Skipped,
    /// The action failed under [`FailurePolicy::WarnAndContinue`].
    Warned(String),
}

/// A stage name with its outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageRecord {
    /// Stage name.
    pub name: String,
    /// Outcome.
    pub outcome: StageOutcome,
}

/// Outcomes of every stage that ran, in order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PipelineReport {
    /// Executed stages.
    pub stages: Vec<StageRecord>,
}

impl PipelineReport {
    /// Outcome of a named stage, if it ran.
    #[must_use]
    pub fn outcome(&self, name: &str) -> Option<&StageOutcome> {
        self.stages
            .iter()
            .find(|record| record.name == name)
            .map(|record| &record.outcome)
    }

    /// Stages that failed without aborting.
    pub fn warnings(&self) -> impl Iterator<Item = &StageRecord> {
        self.stages
            .iter()
            .filter(|record| matches!(record.outcome, StageOutcome::Warned(_)))
    }
}

/// An abort-policy stage failed.
#[derive(Debug, Error)]
#[error("Stage '{stage}' failed: {error:#}")]
pub struct PipelineFailure {
    /// Failing stage.
    pub stage: String,
    /// Underlying error.
    pub error: anyhow::Error,
    /// Stages that ran before the failure, the failing one excluded.
    pub report: PipelineReport,
}

/// Runs a fixed, ordered list of stages.
pub struct StagePipeline {
    stages: Vec<Box<dyn Stage>>,
    step_offset: usize,
    step_total: usize,
}

impl StagePipeline {
    /// Create a pipeline.
    #[must_use]
    pub fn new(stages: Vec<Box<dyn Stage>>) -> Self {
        let step_total = stages.len();
        Self {
            stages,
            step_offset: 0,
            step_total,
        }
    }

    /// Number progress output as if `offset` steps ran before this pipeline.
    #[must_use]
    pub fn with_step_offset(mut self, offset: usize) -> Self {
        self.step_offset = offset;
        self.step_total = offset + self.stages.len();
        self
    }

    /// Stage names in execution order.
    #[must_use]
    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Execute every stage in order.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineFailure`] as soon as an abort-policy stage fails;
    /// later stages do not run.
    pub async fn run(&self, ctx: &ProvisionContext) -> Result<PipelineReport, PipelineFailure> {
        let mut report = PipelineReport::default();

        for (index, stage) in self.stages.iter().enumerate() {
            let name = stage.name();
            ui::print_progress_step(self.step_offset + index + 1, self.step_total, name);
            info!(stage = name, "Starting stage");

            let outcome = match Self::execute(stage.as_ref(), ctx).await {
                Ok(outcome) => outcome,
                Err(e) => match stage.policy() {
                    FailurePolicy::Abort => {
                        error!(stage = name, error = %format!("{e:#}"), "Stage failed, aborting");
                        return Err(PipelineFailure {
                            stage: name.to_string(),
                            error: e,
                            report,
                        });
                    }
                    FailurePolicy::WarnAndContinue => {
                        let message = format!("{e:#}");
                        warn!(stage = name, error = %message, "Stage failed, continuing");
                        ui::print_warning(&format!("{name} failed: {message}"));
                        StageOutcome::Warned(message)
                    }
                },
            };

            match outcome {
                StageOutcome::Skipped => ui::print_skip(&format!("{name}: already in place, skipping")),
                StageOutcome::Completed => ui::print_success(name),
                StageOutcome::Warned(_) => {}
            }

            report.stages.push(StageRecord {
                name: name.to_string(),
                outcome,
            });
        }

        Ok(report)
    }

    async fn execute(stage: &dyn Stage, ctx: &ProvisionContext) -> anyhow::Result<StageOutcome> {
        if stage.is_satisfied(ctx).await? {
            info!(stage = stage.name(), "Precondition satisfied, skipping");
            return Ok(StageOutcome::Skipped);
        }
        stage.run(ctx).await?;
        Ok(StageOutcome::Completed)
    }
}
