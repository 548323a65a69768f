//! SCM identity and the application checkout.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tracing::{info, warn};

use super::give_to_user;
use crate::context::ProvisionContext;
use crate::exec::CommandSpec;
use crate::pipeline::{FailurePolicy, Stage};
use crate::ui;

const SSH_OPTIONS: &str = "ssh -o StrictHostKeyChecking=accept-new -o BatchMode=yes";

/// SSH host of an scp-style or `ssh://` repository URL.
#[must_use]
pub fn scm_ssh_host(url: &str) -> Option<String> {
    let rest = url
        .strip_prefix("ssh://")
        .or_else(|| (!url.contains("://")).then_some(url))?;
    let rest = rest.split_once('@').map_or(rest, |(_, host)| host);
    let host = rest.split([':', '/']).next()?;
    (!host.is_empty()).then(|| host.to_string())
}

/// Generate the effective user's deploy key and check it against the SCM host.
pub struct ScmIdentityStage;

#[async_trait]
impl Stage for ScmIdentityStage {
    fn name(&self) -> &str {
        "Set up SCM identity"
    }

    fn policy(&self) -> FailurePolicy {
        FailurePolicy::WarnAndContinue
    }

    async fn is_satisfied(&self, ctx: &ProvisionContext) -> Result<bool> {
        Ok(ctx.user.home.join(".ssh/id_ed25519").exists())
    }

    async fn run(&self, ctx: &ProvisionContext) -> Result<()> {
        let ssh_dir = ctx.user.home.join(".ssh");
        let key = ssh_dir.join("id_ed25519");
        let as_user = ctx.user.run_as();

        ctx.runner
            .run_checked(
                &CommandSpec::new("mkdir")
                    .args(["-p", "-m", "700"])
                    .arg(ssh_dir.display().to_string())
                    .as_user(as_user),
            )
            .context("Failed to create ~/.ssh")?;
        ctx.runner
            .run_checked(
                &CommandSpec::new("ssh-keygen")
                    .args(["-t", "ed25519", "-N", "", "-q", "-C"])
                    .arg(format!("{}@{}", ctx.user.name, ctx.settings.site_host))
                    .arg("-f")
                    .arg(key.display().to_string())
                    .as_user(as_user),
            )
            .context("ssh-keygen failed")?;

        let public = std::fs::read_to_string(key.with_extension("pub"))
            .context("Failed to read the generated public key")?;
        ui::print_info("Add this deploy key to your repository host:");
        println!("\n{}\n", public.trim());

        let Some(host) = scm_ssh_host(&ctx.config.repository_url) else {
            info!("Repository uses HTTPS, skipping SSH authentication check");
            return Ok(());
        };
        let output = ctx.runner.run(
            &CommandSpec::new("ssh")
                .args(["-T", "-o", "StrictHostKeyChecking=accept-new", "-o", "BatchMode=yes"])
                .arg(format!("git@{host}"))
                .as_user(as_user),
        )?;
        let transcript = format!("{}{}", output.stdout, output.stderr);
        if output.success()
            || (output.code == Some(1) && transcript.contains("successfully authenticated"))
        {
            info!(%host, "SCM authentication succeeded");
            return Ok(());
        }
        warn!(%host, code = ?output.code, "SCM authentication failed");
        bail!("{host} rejected the key; add it to your account, then re-run")
    }
}

/// Clone the application, or fast-forward an existing checkout.
pub struct CloneRepositoryStage;

#[async_trait]
impl Stage for CloneRepositoryStage {
    fn name(&self) -> &str {
        "Clone application repository"
    }

    async fn run(&self, ctx: &ProvisionContext) -> Result<()> {
        let dir = &ctx.config.install_directory;
        let url = &ctx.config.repository_url;
        let as_user = ctx.user.run_as();
        let git = || {
            CommandSpec::new("git")
                .args(["-c", &format!("core.sshCommand={SSH_OPTIONS}")])
                .as_user(as_user)
        };

        if dir.join(".git").exists() {
            info!(dir = %dir.display(), "Updating existing checkout");
            ctx.runner
                .run_checked(&git().args(["-C", &dir.display().to_string(), "pull", "--ff-only"]))
                .context("git pull --ff-only failed; resolve local changes in the checkout")?;
            return Ok(());
        }

        ctx.runner
            .run_checked(&git().args(["ls-remote", "--heads", url.as_str()]))
            .with_context(|| format!("Repository {url} is not reachable"))?;

        ctx.runner
            .run_checked(&CommandSpec::new("mkdir").arg("-p").arg(dir.display().to_string()))
            .with_context(|| format!("Failed to create {}", dir.display()))?;
        give_to_user(ctx, dir)?;

        ctx.runner
            .run_checked(&git().args(["clone", url.as_str(), &dir.display().to_string()]))
            .with_context(|| format!("Failed to clone {url}"))?;
        info!(%url, dir = %dir.display(), "Cloned repository");
        Ok(())
    }
}
