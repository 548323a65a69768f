//! Explicit run context handed to every stage.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::config::ProvisioningConfig;
use crate::error::Result;
use crate::exec::CommandRunner;
use crate::file_editor::{Edit, FileEditor};
use crate::host::HostProfile;
use crate::packages::PackageActions;
use crate::poller::ReadinessPoller;
use crate::prompt::{NonInteractive, Prompter};
use crate::replication::ReplicationSettings;
use crate::user::EffectiveUser;

/// Run settings that are not persisted between runs.
#[derive(Debug, Clone)]
pub struct ProvisionSettings {
    /// SSH daemon configuration file.
    pub sshd_config: PathBuf,
    /// NFS exports file.
    pub exports_file: PathBuf,
    /// NFS client spec for the backup export.
    pub backup_clients: String,
    /// Where the `docker-compose` forwarding shim is written.
    pub compose_shim_path: PathBuf,
    /// Host name used in generated URLs and the access summary.
    pub site_host: String,
    /// Poller for infrastructure readiness (daemon, containers).
    pub readiness: ReadinessPoller,
    /// Replication topology and timing.
    pub replication: ReplicationSettings,
}

impl Default for ProvisionSettings {
    fn default() -> Self {
        Self {
            sshd_config: PathBuf::from("/etc/ssh/sshd_config"),
            exports_file: PathBuf::from("/etc/exports"),
            backup_clients: "*".to_string(),
            compose_shim_path: PathBuf::from("/usr/local/bin/docker-compose"),
            site_host: "localhost".to_string(),
            readiness: ReadinessPoller::new(30, Duration::from_secs(2)),
            replication: ReplicationSettings::default(),
        }
    }
}

/// Everything a stage may read, resolved once before the pipeline starts.
pub struct ProvisionContext {
    /// Resolved configuration.
    pub config: ProvisioningConfig,
    /// Detected host.
    pub host: HostProfile,
    /// User the run acts for.
    pub user: EffectiveUser,
    /// Run settings.
    pub settings: ProvisionSettings,
    /// Package commands for this host.
    pub packages: PackageActions,
    /// Command executor.
    pub runner: Arc<dyn CommandRunner>,
    editor: Mutex<FileEditor>,
    prompter: Mutex<Box<dyn Prompter + Send>>,
}

impl ProvisionContext {
    /// Build a context. Privileged-file backups cover `/etc`.
    #[must_use]
    pub fn new(
        config: ProvisioningConfig,
        host: HostProfile,
        user: EffectiveUser,
        settings: ProvisionSettings,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        Self::with_editor(config, host, user, settings, runner, FileEditor::new())
    }

    /// Build a context with a specific file editor.
    #[must_use]
    pub fn with_editor(
        config: ProvisioningConfig,
        host: HostProfile,
        user: EffectiveUser,
        settings: ProvisionSettings,
        runner: Arc<dyn CommandRunner>,
        editor: FileEditor,
    ) -> Self {
        let packages = PackageActions::for_host(&host);
        Self {
            config,
            host,
            user,
            settings,
            packages,
            runner,
            editor: Mutex::new(editor),
            prompter: Mutex::new(Box::new(NonInteractive)),
        }
    }

    /// Route stage prompts to `prompter`. Contexts start non-interactive.
    #[must_use]
    pub fn with_prompter(mut self, prompter: Box<dyn Prompter + Send>) -> Self {
        self.prompter = Mutex::new(prompter);
        self
    }

    /// Borrow the run's prompter.
    pub fn with_prompt<T>(&self, f: impl FnOnce(&mut dyn Prompter) -> T) -> T {
        let mut prompter = self
            .prompter
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        f(&mut **prompter)
    }

    /// Upsert a directive through the run's shared file editor.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be edited.
    pub fn upsert(&self, path: &Path, directive: &str, value: &str) -> Result<Edit> {
        let mut editor = self
            .editor
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        editor.upsert(path, directive, value)
    }
}
