use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Subcommand, ValueEnum};

use crate::exec::SystemRunner;
use crate::file_editor::FileEditor;
use crate::host::HostProfile;
use crate::packages::PackageActions;
use crate::ssh::set_password_auth;
use crate::ui;

/// SSH daemon maintenance
#[derive(Args, Debug)]
pub struct SshCommand {
    /// SSH daemon configuration file
    #[arg(long, default_value = "/etc/ssh/sshd_config", global = true)]
    sshd_config: PathBuf,

    #[command(subcommand)]
    action: SshAction,
}

#[derive(Subcommand, Debug)]
enum SshAction {
    /// Temporarily allow password logins, e.g. to copy a key over.
    ///
    /// Turn it back off afterwards; provisioning always leaves it off.
    PasswordAuth {
        /// Desired state
        #[arg(value_enum)]
        state: Toggle,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum Toggle {
    On,
    Off,
}

impl SshCommand {
    pub async fn run(&self) -> Result<()> {
        match self.action {
            SshAction::PasswordAuth { state } => self.password_auth(state == Toggle::On),
        }
    }

    fn password_auth(&self, enabled: bool) -> Result<()> {
        let host = HostProfile::detect()?;
        let packages = PackageActions::for_host(&host);
        let mut editor = FileEditor::new();

        let changed = set_password_auth(
            |path, directive, value| editor.upsert(path, directive, value),
            &self.sshd_config,
            enabled,
            &SystemRunner,
            &packages,
        )?;

        let state = if enabled { "enabled" } else { "disabled" };
        if changed {
            ui::print_success(&format!("Password authentication {state}"));
        } else {
            ui::print_info(&format!("Password authentication already {state}"));
        }
        if enabled {
            ui::print_warning("Disable it again once the key is in place: provision ssh password-auth off");
        }
        Ok(())
    }
}
