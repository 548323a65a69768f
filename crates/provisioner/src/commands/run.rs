use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::Args;

use crate::context::ProvisionSettings;
use crate::orchestrator::{Provisioner, RunOptions};
use crate::poller::ReadinessPoller;
use crate::replication::ReplicationSettings;

/// Provision this host
#[derive(Args, Debug)]
pub struct RunCommand {
    /// Persisted configuration file (default: ~/.provision.conf)
    #[arg(short, long, value_name = "FILE", env = "PROVISION_CONFIG")]
    config: Option<PathBuf>,

    /// Fail instead of prompting for missing values
    #[arg(long, env = "PROVISION_NON_INTERACTIVE")]
    non_interactive: bool,

    /// Write a JSON run report to this file
    #[arg(long, value_name = "FILE")]
    report: Option<PathBuf>,

    /// Host name used in generated URLs (default: system host name)
    #[arg(long, env = "PROVISION_SITE_HOST")]
    site_host: Option<String>,

    /// NFS clients allowed to mount the backup export
    #[arg(long, default_value = "*", env = "PROVISION_BACKUP_CLIENTS")]
    backup_clients: String,

    /// Database master container
    #[arg(long, default_value = "mysql-master", env = "PROVISION_MASTER_CONTAINER")]
    master_container: String,

    /// Database replica container
    #[arg(long, default_value = "mysql-slave", env = "PROVISION_SLAVE_CONTAINER")]
    slave_container: String,

    /// Master host as reachable from the replica
    #[arg(long, default_value = "mysql-master", env = "PROVISION_MASTER_HOST")]
    master_host: String,

    /// Master port as reachable from the replica
    #[arg(long, default_value_t = 3306, env = "PROVISION_MASTER_PORT")]
    master_port: u16,

    /// Replication user when MYSQL_REPLICATION_USER is not set
    #[arg(long, default_value = "replicator", env = "PROVISION_REPLICATION_USER")]
    replication_user: String,

    /// Readiness check attempts
    #[arg(long, default_value_t = 30, env = "PROVISION_POLL_ATTEMPTS")]
    poll_attempts: u32,

    /// Seconds between readiness checks
    #[arg(long, default_value_t = 5, env = "PROVISION_POLL_INTERVAL")]
    poll_interval: u64,

    /// Seconds to let the replica settle before checking it
    #[arg(long, default_value_t = 5, env = "PROVISION_SETTLE_DELAY")]
    settle_delay: u64,
}

impl RunCommand {
    fn options(&self) -> RunOptions {
        let poller = ReadinessPoller::new(self.poll_attempts, Duration::from_secs(self.poll_interval));
        RunOptions {
            store_path: self.config.clone(),
            non_interactive: self.non_interactive,
            report_path: self.report.clone(),
            site_host: self.site_host.clone(),
            settings: ProvisionSettings {
                backup_clients: self.backup_clients.clone(),
                readiness: poller,
                replication: ReplicationSettings {
                    master_container: self.master_container.clone(),
                    slave_container: self.slave_container.clone(),
                    master_host: self.master_host.clone(),
                    master_port: self.master_port,
                    default_user: self.replication_user.clone(),
                    poller,
                    settle_delay: Duration::from_secs(self.settle_delay),
                },
                ..ProvisionSettings::default()
            },
        }
    }

    pub async fn run(&self) -> Result<()> {
        Provisioner::new(self.options()).run().await?;
        Ok(())
    }
}
