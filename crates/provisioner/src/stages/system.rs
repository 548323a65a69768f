//! Packages, container runtime and the compose shim.

use std::os::unix::fs::PermissionsExt;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::info;

use crate::config::write_atomic;
use crate::context::ProvisionContext;
use crate::exec::CommandSpec;
use crate::pipeline::{FailurePolicy, Stage};
use crate::ui;

const COMPOSE_SHIM: &str = "#!/bin/sh\nexec docker compose \"$@\"\n";

/// Refresh package metadata.
pub struct UpdatePackagesStage;

#[async_trait]
impl Stage for UpdatePackagesStage {
    fn name(&self) -> &str {
        "Update packages"
    }

    async fn run(&self, ctx: &ProvisionContext) -> Result<()> {
        ctx.runner
            .run_all(&ctx.packages.update())
            .with_context(|| format!("{} update failed", ctx.packages.manager()))?;
        Ok(())
    }
}

/// Install git, curl, the SSH and NFS servers and CA certificates.
pub struct BaseToolsStage;

#[async_trait]
impl Stage for BaseToolsStage {
    fn name(&self) -> &str {
        "Install base tools"
    }

    async fn is_satisfied(&self, ctx: &ProvisionContext) -> Result<bool> {
        Ok(ctx
            .packages
            .missing_base_packages(|bin| ctx.runner.command_exists(bin))
            .is_empty())
    }

    async fn run(&self, ctx: &ProvisionContext) -> Result<()> {
        let missing = ctx
            .packages
            .missing_base_packages(|bin| ctx.runner.command_exists(bin));
        info!(packages = ?missing, "Installing base packages");
        ctx.runner
            .run_all(&ctx.packages.install(&missing))
            .context("Failed to install base packages")?;
        Ok(())
    }
}

/// Install Docker Engine and wait for the daemon.
pub struct ContainerRuntimeStage;

#[async_trait]
impl Stage for ContainerRuntimeStage {
    fn name(&self) -> &str {
        "Install container runtime"
    }

    async fn is_satisfied(&self, ctx: &ProvisionContext) -> Result<bool> {
        Ok(ctx.runner.command_exists("docker"))
    }

    async fn run(&self, ctx: &ProvisionContext) -> Result<()> {
        ctx.runner
            .run_all(&ctx.packages.install_docker())
            .context("Failed to install Docker")?;

        ui::print_info("Waiting for the Docker daemon...");
        let info = CommandSpec::new("docker").arg("info");
        ctx.settings
            .readiness
            .await_ready("docker daemon", || ctx.runner.succeeds(&info))
            .await?;
        Ok(())
    }
}

/// Provide `docker-compose` for tooling that predates the compose plugin.
pub struct ComposeShimStage;

#[async_trait]
impl Stage for ComposeShimStage {
    fn name(&self) -> &str {
        "Install compose shim"
    }

    fn policy(&self) -> FailurePolicy {
        FailurePolicy::WarnAndContinue
    }

    async fn is_satisfied(&self, ctx: &ProvisionContext) -> Result<bool> {
        Ok(ctx.runner.command_exists("docker-compose"))
    }

    async fn run(&self, ctx: &ProvisionContext) -> Result<()> {
        let path = &ctx.settings.compose_shim_path;
        write_atomic(path, COMPOSE_SHIM.as_bytes())
            .with_context(|| format!("Failed to write {}", path.display()))?;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
            .with_context(|| format!("Failed to make {} executable", path.display()))?;
        info!(path = %path.display(), "Installed docker-compose shim");
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
    async fn test_base_tools_installs_only_missing() {
        let dir = tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new().with_installed(&[
            "git",
            "curl",
            "sshd",
            "update-ca-certificates",
        ]));
        let ctx = context_in(dir.path(), runner.clone());

        assert!(!BaseToolsStage.is_satisfied(&ctx).await.unwrap());
        BaseToolsStage.run(&ctx).await.unwrap();
        assert_eq!(runner.calls(), vec!["apt-get install -y nfs-kernel-server"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_docker_install_waits_for_daemon() {
        let dir = tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new().reply("docker info", 1, ""));
        let ctx = context_in(dir.path(), runner.clone());

        let err = ContainerRuntimeStage.run(&ctx).await.unwrap_err();

        assert!(err.to_string().contains("docker daemon"));
        let pings = runner.calls().iter().filter(|c| *c == "docker info").count();
        assert_eq!(pings, 3);
        assert!(runner.called("systemctl enable --now docker"));
    }

    #[tokio::test]
    async fn test_compose_shim_written_executable() {
        let dir = tempdir().unwrap();
        let ctx = context_in(dir.path(), Arc::new(ScriptedRunner::new()));

        ComposeShimStage.run(&ctx).await.unwrap();

        let path = &ctx.settings.compose_shim_path;
        assert_eq!(std::fs::read_to_string(path).unwrap(), COMPOSE_SHIM);
        let mode = std::fs::metadata(path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
    }
}
