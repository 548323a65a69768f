//! Closing access summary.

use anyhow::Result;
use async_trait::async_trait;

use crate::context::ProvisionContext;
use crate::envfile::EnvFile;
use crate::exec::CommandSpec;
use crate::pipeline::{FailurePolicy, Stage};
use crate::ui;

/// Print how to reach the provisioned host and application.
pub struct AccessSummaryStage;

#[async_trait]
impl Stage for AccessSummaryStage {
    fn name(&self) -> &str {
        "Access summary"
    }

    fn policy(&self) -> FailurePolicy {
        FailurePolicy::WarnAndContinue
    }

    async fn run(&self, ctx: &ProvisionContext) -> Result<()> {
        let host = &ctx.settings.site_host;
        let site_url = EnvFile::load(&ctx.config.env_file())
            .ok()
            .and_then(|env| env.get("SITE_URL"))
            .unwrap_or_else(|| format!("http://{host}"));

        ui::print_section("Access");
        ui::print_kv("Host", host);
        ui::print_kv("Environment", &ctx.config.environment_mode.to_string());
        ui::print_kv("Application", &site_url);
        ui::print_kv("Checkout", &ctx.config.install_directory.display().to_string());
        ui::print_kv("SSH", &format!("ssh {}@{host} (key authentication only)", ctx.user.name));
        ui::print_kv(
            "Backups (NFS)",
            &format!("{host}:{}", ctx.config.backup_dir().display()),
        );

        let ps = CommandSpec::new("docker")
            .args(["compose", "ps", "--format", "{{.Name}}: {{.Status}}"])
            .current_dir(&ctx.config.install_directory);
        let output = ctx.runner.run_checked(&ps)?;
        ui::print_section("Containers");
        for line in output.stdout.lines().filter(|l| !l.trim().is_empty()) {
            ui::print_list_item(line.trim());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::context::testing::context_in;
    use crate::exec::fake::ScriptedRunner;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_summary_lists_containers() {
        let dir = tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new().reply("compose ps", 0, "web: Up 1 minute\n"));
        let ctx = context_in(dir.path(), runner.clone());

        AccessSummaryStage.run(&ctx).await.unwrap();
        assert!(runner.called("docker compose ps"));
    }

    #[tokio::test]
    async fn test_summary_fails_without_docker() {
        let dir = tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new().reply("compose ps", 1, ""));
        let ctx = context_in(dir.path(), runner);

        assert!(AccessSummaryStage.run(&ctx).await.is_err());
    }
}
