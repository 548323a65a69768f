//! NFS export of the backups directory.

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::info;

use super::give_to_user;
use crate::context::ProvisionContext;
use crate::exec::CommandSpec;
use crate::file_editor::directive_value;
use crate::packages::Service;
use crate::pipeline::{FailurePolicy, Stage};

/// Export `<install dir>/backups` over NFS.
pub struct BackupExportStage;

impl BackupExportStage {
    fn export_options(ctx: &ProvisionContext) -> String {
        format!("{}(rw,sync,no_subtree_check)", ctx.settings.backup_clients)
    }
}

#[async_trait]
impl Stage for BackupExportStage {
    fn name(&self) -> &str {
        "Configure backup export"
    }

    fn policy(&self) -> FailurePolicy {
        FailurePolicy::WarnAndContinue
    }

    async fn is_satisfied(&self, ctx: &ProvisionContext) -> Result<bool> {
        let backup_dir = ctx.config.backup_dir();
        let exported = directive_value(&ctx.settings.exports_file, &backup_dir.display().to_string())?;
        if exported.as_deref() != Some(Self::export_options(ctx).as_str()) {
            return Ok(false);
        }
        let unit = ctx.packages.unit(Service::Nfs);
        Ok(ctx
            .runner
            .succeeds(&CommandSpec::new("systemctl").args(["is-active", "--quiet", unit])))
    }

    async fn run(&self, ctx: &ProvisionContext) -> Result<()> {
        let backup_dir = ctx.config.backup_dir();
        std::fs::create_dir_all(&backup_dir)
            .with_context(|| format!("Failed to create {}", backup_dir.display()))?;
        give_to_user(ctx, &backup_dir)?;

        ctx.upsert(
            &ctx.settings.exports_file,
            &backup_dir.display().to_string(),
            &Self::export_options(ctx),
        )
        .context("Failed to update the NFS exports")?;

        ctx.runner
            .run_all(&ctx.packages.enable_service(Service::Nfs))
            .context("Failed to enable the NFS server")?;
        ctx.runner
            .run_checked(&CommandSpec::new("exportfs").arg("-ra"))
            .context("exportfs -ra failed")?;
        info!(dir = %backup_dir.display(), "Backup directory exported");
        Ok(())
    }
}
