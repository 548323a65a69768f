//! Host provisioner library.
//!
//! Brings a fresh Linux host from bare OS to a running containerized
//! application: packages, container runtime, SSH hardening, repository
//! checkout, NFS backup export, `.env` materialization and a MySQL
//! master/replica bootstrap. Every stage is idempotent, so re-running
//! converges rather than duplicating work.
//!
//! # Example
//!
//! ```ignore
//! use provision_cli::{Provisioner, RunOptions};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let report = Provisioner::new(RunOptions::default()).run().await?;
//!     println!("{} warnings", report.warnings().count());
//!     Ok(())
//! }
//! ```

// Allow product names without backticks in doc comments
#![allow(clippy::doc_markdown)]
// Allow async functions that don't use await (may need await in future)
#![allow(clippy::unused_async)]
// Allow imports after statements in functions
#![allow(clippy::items_after_statements)]

pub mod commands;
pub mod config;
pub mod context;
pub mod envfile;
pub mod error;
pub mod exec;
pub mod file_editor;
pub mod host;
pub mod orchestrator;
pub mod packages;
pub mod pipeline;
pub mod poller;
pub mod prompt;
pub mod replication;
pub mod ssh;
pub mod stages;
pub mod ui;
pub mod user;

// Re-export commonly used types at the crate root
pub use config::{ConfigStore, EnvironmentMode, ProvisioningConfig};
pub use context::{ProvisionContext, ProvisionSettings};
pub use error::ProvisionError;
pub use orchestrator::{Provisioner, RunOptions};
pub use pipeline::{FailurePolicy, PipelineReport, Stage, StageOutcome, StagePipeline};
pub use replication::{ReplicationBootstrapper, ReplicationOutcome};
