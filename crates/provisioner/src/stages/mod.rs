//! The provisioning stages, in execution order.
//!
//! Configuration resolution and host detection happen in the orchestrator
//! before any of these run; everything here receives the resolved
//! [`ProvisionContext`](crate::context::ProvisionContext).

mod app;
mod backup;
mod database;
mod repository;
mod ssh;
mod summary;
mod system;

use std::path::Path;

use anyhow::{Context, Result};

pub use app::ApplicationStage;
pub use backup::BackupExportStage;
pub use database::ReplicationStage;
pub use repository::{CloneRepositoryStage, ScmIdentityStage};
pub use ssh::HardenSshStage;
pub use summary::AccessSummaryStage;
pub use system::{BaseToolsStage, ComposeShimStage, ContainerRuntimeStage, UpdatePackagesStage};

use crate::context::ProvisionContext;
use crate::pipeline::Stage;

/// Number of steps the orchestrator runs before the pipeline.
pub const PRELUDE_STEPS: usize = 2;

/// The fixed stage list.
#[must_use]
pub fn default_stages() -> Vec<Box<dyn Stage>> {
    vec![
        Box::new(UpdatePackagesStage),
        Box::new(BaseToolsStage),
        Box::new(ContainerRuntimeStage),
        Box::new(ComposeShimStage),
        Box::new(HardenSshStage),
        Box::new(ScmIdentityStage),
        Box::new(CloneRepositoryStage),
        Box::new(BackupExportStage),
        Box::new(ApplicationStage),
        Box::new(ReplicationStage),
        Box::new(AccessSummaryStage),
    ]
}

/// Hand a path created by the elevated process over to the effective user.
pub(crate) fn give_to_user(ctx: &ProvisionContext, path: &Path) -> Result<()> {
    ctx.user
        .hand_over(ctx.runner.as_ref(), path)
        .with_context(|| format!("Failed to hand {} to {}", path.display(), ctx.user.name))
}
