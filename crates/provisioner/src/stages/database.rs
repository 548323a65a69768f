//! MySQL master/replica bootstrap stage.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use tracing::warn;

use crate::context::ProvisionContext;
use crate::envfile::EnvFile;
use crate::pipeline::{FailurePolicy, Stage};
use crate::replication::{
    DatabaseCredentials, DockerMysqlEngine, ReplicationBootstrapper, ReplicationOutcome,
};
use crate::ui;

/// Bootstrap master/replica replication between the database containers.
pub struct ReplicationStage;

#[async_trait]
impl Stage for ReplicationStage {
    fn name(&self) -> &str {
        "Bootstrap database replication"
    }

    fn policy(&self) -> FailurePolicy {
        FailurePolicy::WarnAndContinue
    }

    async fn run(&self, ctx: &ProvisionContext) -> Result<()> {
        let settings = &ctx.settings.replication;
        let env = EnvFile::load(&ctx.config.env_file())
            .context("Failed to read the application environment")?;
        let credentials = DatabaseCredentials::from_env(&env, &settings.default_user)?;

        let engine = DockerMysqlEngine::new(
            ctx.runner.clone(),
            settings.master_container.as_str(),
            settings.slave_container.as_str(),
            credentials.root_password.as_str(),
        );
        let outcome = ReplicationBootstrapper::new(engine, settings.clone())
            .run(&credentials)
            .await;

        match outcome {
            ReplicationOutcome::Converged { state, .. } => {
                ui::print_success(&format!(
                    "Replica following {}:{} (lag {})",
                    state.master_log_file.unwrap_or_default(),
                    state.master_log_position.unwrap_or_default(),
                    state
                        .seconds_behind_master
                        .map_or_else(|| "unknown".to_string(), |s| format!("{s}s"))
                ));
                Ok(())
            }
            ReplicationOutcome::Failed {
                phase,
                error,
                diagnostics,
                ..
            } => {
                warn!(?phase, %error, "Replication did not converge");
                ui::print_section("Replication diagnostics");
                for line in diagnostics.to_string().lines() {
                    println!("  {line}");
                }
                Err(anyhow!(error).context(format!("Replication failed during {phase:?}")))
            }
        }
    }
}
