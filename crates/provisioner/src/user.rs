//! Effective user resolution.
//!
//! When the provisioner runs under `sudo`, files it creates on the operator's
//! behalf (config store, checkout, SSH identity) must belong to the invoking
//! user, not to root.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{ProvisionError, Result};
use crate::exec::{CommandRunner, CommandSpec};

/// The identity on whose behalf the provisioner acts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectiveUser {
    /// Login name.
    pub name: String,
    /// Home directory.
    pub home: PathBuf,
    /// Whether the process runs elevated on this user's behalf.
    pub elevated: bool,
}

impl EffectiveUser {
    /// Detect the effective user from `SUDO_USER` and `/etc/passwd`.
    ///
    /// # Errors
    ///
    /// Returns an error if no home directory can be determined.
    pub fn detect() -> Result<Self> {
        let sudo_user = std::env::var("SUDO_USER").ok();
        let passwd = std::fs::read_to_string("/etc/passwd").unwrap_or_default();
        let fallback_name = std::env::var("USER").unwrap_or_else(|_| "root".to_string());
        Self::resolve(
            sudo_user.as_deref(),
            &passwd,
            &fallback_name,
            dirs::home_dir().as_deref(),
        )
    }

    /// Resolve from explicit inputs.
    ///
    /// A `sudo_user` other than root wins and its home comes from the passwd
    /// database; otherwise the process user and its home are used.
    ///
    /// # Errors
    ///
    /// Returns an error if no home directory can be determined.
    pub fn resolve(
        sudo_user: Option<&str>,
        passwd: &str,
        process_user: &str,
        process_home: Option<&Path>,
    ) -> Result<Self> {
        if let Some(name) = sudo_user.filter(|u| !u.is_empty() && *u != "root") {
            let home = passwd_home(passwd, name)
                .unwrap_or_else(|| PathBuf::from("/home").join(name));
            debug!(user = name, home = %home.display(), "Acting on behalf of sudo user");
            return Ok(Self {
                name: name.to_string(),
                home,
                elevated: true,
            });
        }

        let home = process_home
            .map(Path::to_path_buf)
            .or_else(|| passwd_home(passwd, process_user))
            .ok_or_else(|| {
                ProvisionError::validation("home directory", "could not determine home directory")
            })?;

        Ok(Self {
            name: process_user.to_string(),
            home,
            elevated: false,
        })
    }

    /// User to pass to [`crate::exec::CommandSpec::as_user`].
    ///
    /// `None` when the process already runs as this user.
    #[must_use]
    pub fn run_as(&self) -> Option<&str> {
        self.elevated.then_some(self.name.as_str())
    }

    /// `chown` a path the elevated process wrote back to this user. A no-op
    /// when the process already runs as the user.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::CommandExecution`] if `chown` fails.
    pub fn hand_over(&self, runner: &dyn CommandRunner, path: &Path) -> Result<()> {
        let Some(user) = self.run_as() else {
            return Ok(());
        };
        runner.run_checked(
            &CommandSpec::new("chown").args([format!("{user}:"), path.display().to_string()]),
        )?;
        debug!(user, path = %path.display(), "Handed over to effective user");
        Ok(())
    }
}

/// Look up a user's home directory in passwd-formatted content.
fn passwd_home(passwd: &str, name: &str) -> Option<PathBuf> {
    passwd.lines().find_map(|line| {
        let fields: Vec<&str> = line.split(':').collect();
        (fields.len() >= 7 && fields[0] == name && !fields[5].is_empty())
            .then(|| PathBuf::from(fields[5]))
    })
}
