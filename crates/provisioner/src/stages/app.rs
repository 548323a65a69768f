//! Application `.env` and compose start-up.

use std::collections::BTreeSet;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tracing::{debug, info};

use super::give_to_user;
use crate::context::ProvisionContext;
use crate::envfile;
use crate::exec::CommandSpec;
use crate::pipeline::Stage;
use crate::ui;

/// Materialize `.env` and bring the compose project up.
pub struct ApplicationStage;

impl ApplicationStage {
    fn compose(ctx: &ProvisionContext) -> CommandSpec {
        CommandSpec::new("docker")
            .arg("compose")
            .current_dir(&ctx.config.install_directory)
    }

    fn declared_services(ctx: &ProvisionContext) -> Result<BTreeSet<String>> {
        let output = ctx
            .runner
            .run_checked(&Self::compose(ctx).args(["config", "--services"]))
            .context("docker compose config failed")?;
        Ok(lines(&output.stdout))
    }

    fn running_services(ctx: &ProvisionContext) -> BTreeSet<String> {
        ctx.runner
            .run(&Self::compose(ctx).args(["ps", "--services", "--filter", "status=running"]))
            .ok()
            .filter(|o| o.success())
            .map(|o| lines(&o.stdout))
            .unwrap_or_default()
    }
}

fn lines(output: &str) -> BTreeSet<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

#[async_trait]
impl Stage for ApplicationStage {
    fn name(&self) -> &str {
        "Configure application"
    }

    async fn run(&self, ctx: &ProvisionContext) -> Result<()> {
        let materialized = ctx
            .with_prompt(|prompter| {
                envfile::materialize(&ctx.config, prompter, &ctx.settings.site_host)
            })
            .context("Failed to prepare the application environment")?;
        if materialized.written {
            give_to_user(ctx, &materialized.path)?;
        }
        if materialized.created {
            ui::print_success(&format!(
                "Created {} ({} secrets filled)",
                materialized.path.display(),
                materialized.filled_secrets.len()
            ));
        }

        ui::print_info("Building and starting containers...");
        ctx.runner
            .run_checked(&Self::compose(ctx).args(["up", "-d", "--build"]))
            .context("docker compose up failed")?;

        let declared = Self::declared_services(ctx)?;
        if declared.is_empty() {
            bail!("docker compose reports no services");
        }
        info!(services = ?declared, "Waiting for services");

        ctx.settings
            .readiness
            .await_ready("application containers", || {
                let running = Self::running_services(ctx);
                let pending: Vec<_> = declared.difference(&running).collect();
                debug!(?pending, "Services not running yet");
                pending.is_empty()
            })
            .await?;
        ui::print_success(&format!("{} services running", declared.len()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::context::testing::context_in;
    use crate::envfile::EnvFile;
    use crate::exec::fake::ScriptedRunner;
    use tempfile::tempdir;

    fn seed_checkout(ctx: &ProvisionContext) {
        let dir = &ctx.config.install_directory;
        std::fs::create_dir_all(dir).unwrap();
        std::fs::write(
            dir.join(".env.example"),
            "MYSQL_ROOT_PASSWORD=change_me\nDEBUG=True\n",
        )
        .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_for_every_declared_service() {
        let dir = tempdir().unwrap();
        let runner = Arc::new(
            ScriptedRunner::new()
                .reply("config --services", 0, "web\nmysql-master\nmysql-slave\n")
                .reply("status=running", 0, "web\nmysql-master\nmysql-slave\n"),
        );
        let ctx = context_in(dir.path(), runner.clone());
        seed_checkout(&ctx);

        ApplicationStage.run(&ctx).await.unwrap();

        let env = EnvFile::load(&ctx.config.env_file()).unwrap();
        assert_eq!(env.get("DEBUG").as_deref(), Some("False"));
        assert_ne!(env.get("MYSQL_ROOT_PASSWORD").as_deref(), Some("change_me"));
        assert!(runner.called("docker compose up -d --build"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_refreshed_env_is_handed_back_to_user() {
        let dir = tempdir().unwrap();
        let runner = Arc::new(
            ScriptedRunner::new()
                .reply("config --services", 0, "web\n")
                .reply("status=running", 0, "web\n"),
        );
        let mut ctx = context_in(dir.path(), runner.clone());
        ctx.user.elevated = true;
        seed_checkout(&ctx);
        std::fs::write(ctx.config.env_file(), "MYSQL_ROOT_PASSWORD=kept\nDEBUG=True\n").unwrap();

        ApplicationStage.run(&ctx).await.unwrap();

        let env_path = ctx.config.env_file();
        assert!(runner.called(&format!("chown deploy: {}", env_path.display())));
        assert_eq!(
            EnvFile::load(&env_path).unwrap().get("MYSQL_ROOT_PASSWORD").as_deref(),
            Some("kept")
        );

        // Nothing to rewrite on the next run, so nothing to hand over.
        let chowns = runner.calls().iter().filter(|c| c.starts_with("chown")).count();
        ApplicationStage.run(&ctx).await.unwrap();
        let after = runner.calls().iter().filter(|c| c.starts_with("chown")).count();
        assert_eq!(chowns, after);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_service_times_out() {
        let dir = tempdir().unwrap();
        let runner = Arc::new(
            ScriptedRunner::new()
                .reply("config --services", 0, "web\nmysql-slave\n")
                .reply("status=running", 0, "web\n"),
        );
        let ctx = context_in(dir.path(), runner.clone());
        seed_checkout(&ctx);

        let err = ApplicationStage.run(&ctx).await.unwrap_err();

        assert!(err.to_string().contains("application containers"));
        let polls = runner.calls().iter().filter(|c| c.contains("status=running")).count();
        assert_eq!(polls, 3);
    }
}
