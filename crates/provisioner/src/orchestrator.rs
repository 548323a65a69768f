//! Provisioning orchestration.
//!
//! Resolves configuration and the host profile once, hands both to the
//! stage pipeline through an explicit [`ProvisionContext`] and reports how
//! the run went.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{error, info};

use crate::config::{ConfigStore, ProvisioningConfig};
use crate::context::{ProvisionContext, ProvisionSettings};
use crate::exec::{CommandRunner, SystemRunner};
use crate::host::HostProfile;
use crate::pipeline::{PipelineReport, Stage, StageOutcome, StagePipeline};
use crate::prompt::{NonInteractive, Prompter, TerminalPrompter};
use crate::stages::{default_stages, ReplicationStage, PRELUDE_STEPS};
use crate::ui;
use crate::user::EffectiveUser;

/// Options for one provisioning run.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Config store path; defaults to `<effective home>/.provision.conf`.
    pub store_path: Option<PathBuf>,
    /// Fail instead of prompting.
    pub non_interactive: bool,
    /// Write a JSON run report here.
    pub report_path: Option<PathBuf>,
    /// Host name for URLs and the summary; defaults to the system host name.
    pub site_host: Option<String>,
    /// Run settings.
    pub settings: ProvisionSettings,
}

/// JSON run report.
#[derive(Debug, Serialize)]
pub struct RunReport {
    /// When the report was written (RFC 3339).
    pub finished_at: String,
    /// Detected host.
    pub host: HostProfile,
    /// Resolved configuration.
    pub config: ProvisioningConfig,
    /// Stage outcomes.
    pub pipeline: PipelineReport,
    /// Stage that aborted the run, if any.
    pub aborted_at: Option<String>,
    /// Whether replication converged; `None` when the stage did not run.
    pub replication_converged: Option<bool>,
}

/// Whether the replication stage converged, if it ran at all.
#[must_use]
pub fn replication_converged(report: &PipelineReport) -> Option<bool> {
    match report.outcome(ReplicationStage.name())? {
        StageOutcome::Completed => Some(true),
        StageOutcome::Warned(_) => Some(false),
        StageOutcome::Skipped => None,
    }
}

/// Drives a full provisioning run.
pub struct Provisioner {
    options: RunOptions,
    runner: Arc<dyn CommandRunner>,
    user: Option<EffectiveUser>,
    host_root: Option<PathBuf>,
    stages: Option<Vec<Box<dyn Stage>>>,
}

impl Provisioner {
    /// Create a provisioner that executes commands on this host.
    #[must_use]
    pub fn new(options: RunOptions) -> Self {
        Self::with_runner(options, Arc::new(SystemRunner))
    }

    /// Create a provisioner with a specific command runner.
    #[must_use]
    pub fn with_runner(options: RunOptions, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            options,
            runner,
            user: None,
            host_root: None,
            stages: None,
        }
    }

    /// Act for this user instead of detecting it from the environment.
    #[must_use]
    pub fn with_user(mut self, user: EffectiveUser) -> Self {
        self.user = Some(user);
        self
    }

    /// Read OS release metadata below `root` instead of `/`.
    #[must_use]
    pub fn with_host_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.host_root = Some(root.into());
        self
    }

    /// Replace the stage list.
    #[must_use]
    pub fn with_stages(mut self, stages: Vec<Box<dyn Stage>>) -> Self {
        self.stages = Some(stages);
        self
    }

    /// Run every step.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration or host detection fails, or when an
    /// abort-policy stage fails.
    pub async fn run(mut self) -> Result<PipelineReport> {
        let stages = self.stages.take().unwrap_or_else(default_stages);
        let total = PRELUDE_STEPS + stages.len();

        ui::print_banner();
        let user = match self.user.take() {
            Some(user) => user,
            None => EffectiveUser::detect().context("Failed to determine the effective user")?,
        };
        info!(user = %user.name, elevated = user.elevated, "Effective user");

        ui::print_progress_step(1, total, "Resolve configuration");
        let store_path = self
            .options
            .store_path
            .clone()
            .unwrap_or_else(|| ConfigStore::default_path(&user.home));
        let store = ConfigStore::new(store_path, user.home.clone());
        let mut prompter: Box<dyn Prompter + Send> = if self.options.non_interactive {
            Box::new(NonInteractive)
        } else {
            Box::new(TerminalPrompter::new())
        };
        let config = store
            .resolve(&mut *prompter)
            .context("Configuration is incomplete")?;
        user.hand_over(self.runner.as_ref(), store.path())
            .context("Failed to hand the config store to the effective user")?;
        ui::print_kv("Repository", &config.repository_url);
        ui::print_kv("Install directory", &config.install_directory.display().to_string());
        ui::print_kv("Environment", &config.environment_mode.to_string());

        ui::print_progress_step(2, total, "Detect host");
        let host = match &self.host_root {
            Some(root) => HostProfile::detect_from(root)?,
            None => HostProfile::detect()?,
        };
        ui::print_kv("Host", &host.to_string());

        let mut settings = self.options.settings.clone();
        if let Some(name) = self
            .options
            .site_host
            .clone()
            .or_else(sysinfo::System::host_name)
        {
            settings.site_host = name;
        }

        let ctx = ProvisionContext::new(
            config.clone(),
            host.clone(),
            user,
            settings,
            Arc::clone(&self.runner),
        )
        .with_prompter(prompter);

        let pipeline = StagePipeline::new(stages).with_step_offset(PRELUDE_STEPS);
        match pipeline.run(&ctx).await {
            Ok(report) => {
                self.write_report(&host, &config, &report, None)?;
                print_summary(&report);
                Ok(report)
            }
            Err(failure) => {
                error!(stage = %failure.stage, "Provisioning aborted");
                self.write_report(&host, &config, &failure.report, Some(&failure.stage))?;
                Err(failure.into())
            }
        }
    }

    fn write_report(
        &self,
        host: &HostProfile,
        config: &ProvisioningConfig,
        pipeline: &PipelineReport,
        aborted_at: Option<&str>,
    ) -> Result<()> {
        let Some(path) = &self.options.report_path else {
            return Ok(());
        };
        let report = RunReport {
            finished_at: chrono::Utc::now().to_rfc3339(),
            host: host.clone(),
            config: config.clone(),
            pipeline: pipeline.clone(),
            aborted_at: aborted_at.map(str::to_string),
            replication_converged: replication_converged(pipeline),
        };
        let json = serde_json::to_string_pretty(&report)?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write report to {}", path.display()))?;
        info!(path = %path.display(), "Wrote run report");
        Ok(())
    }
}

fn print_summary(report: &PipelineReport) {
    let count = |wanted: fn(&StageOutcome) -> bool| {
        report.stages.iter().filter(|r| wanted(&r.outcome)).count()
    };

    ui::print_section("Provisioning Complete");
    ui::print_kv(
        "Completed",
        &count(|o| matches!(o, StageOutcome::Completed)).to_string(),
    );
    ui::print_kv(
        "Already in place",
        &count(|o| matches!(o, StageOutcome::Skipped)).to_string(),
    );

    let warnings: Vec<_> = report.warnings().collect();
    if !warnings.is_empty() {
        ui::print_warning(&format!("{} stage(s) finished with warnings:", warnings.len()));
        for record in warnings {
            if let StageOutcome::Warned(message) = &record.outcome {
                ui::print_list_item(&format!("{}: {message}", record.name));
            }
        }
    }

    match replication_converged(report) {
        Some(true) => ui::print_success("Database replication converged"),
        Some(false) => ui::print_error("Database replication did NOT converge (see diagnostics above)"),
        None => ui::print_info("Database replication was not attempted"),
    }
}
