//! External command execution.
//!
//! Every stage talks to the host through [`CommandRunner`] so that the
//! pipeline and the replication protocol can be exercised against scripted
//! runners in tests.

use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use tracing::debug;

use crate::error::{ProvisionError, Result};

/// A command to execute, described as data.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandSpec {
    /// Program name or path.
    pub program: String,
    /// Arguments.
    pub args: Vec<String>,
    /// Extra environment variables. Values are never logged.
    pub env: Vec<(String, String)>,
    /// Working directory.
    pub current_dir: Option<PathBuf>,
    /// Run on behalf of this user (via `sudo -u`) instead of the process user.
    pub as_user: Option<String>,
    /// Data written to the child's stdin.
    pub stdin: Option<String>,
}

impl CommandSpec {
    /// Create a command for the given program.
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    /// Run a script through `sh -c`.
    #[must_use]
    pub fn shell(script: impl Into<String>) -> Self {
        Self::new("sh").arg("-c").arg(script)
    }

    /// Append an argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set an environment variable for the child.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Set the working directory.
    #[must_use]
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    /// Run as another user.
    #[must_use]
    pub fn as_user(mut self, user: Option<&str>) -> Self {
        self.as_user = user.map(str::to_string);
        self
    }

    /// Feed data to stdin.
    #[must_use]
    pub fn stdin(mut self, data: impl Into<String>) -> Self {
        self.stdin = Some(data.into());
        self
    }

    /// Human-readable command line, without environment values.
    #[must_use]
    pub fn display(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 4);
        if let Some(user) = &self.as_user {
            parts.push(format!("sudo -u {user} -H --"));
        }
        parts.push(self.program.clone());
        for arg in &self.args {
            if arg.contains(char::is_whitespace) {
                parts.push(format!("'{arg}'"));
            } else {
                parts.push(arg.clone());
            }
        }
        parts.join(" ")
    }
}

/// Captured result of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code (`None` when killed by a signal).
    pub code: Option<i32>,
    /// Captured stdout.
    pub stdout: String,
    /// Captured stderr.
    pub stderr: String,
}

impl CommandOutput {
    /// Whether the command exited with status zero.
    #[must_use]
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Trimmed stdout.
    #[must_use]
    pub fn stdout_trimmed(&self) -> &str {
        self.stdout.trim()
    }
}

/// Executes commands on the host.
pub trait CommandRunner: Send + Sync {
    /// Run a command and capture its output.
    ///
    /// # Errors
    ///
    /// Returns an error only if the command could not be spawned; a non-zero
    /// exit status is reported through [`CommandOutput::code`].
    fn run(&self, cmd: &CommandSpec) -> Result<CommandOutput>;

    /// Whether a program is available on `PATH`.
    fn command_exists(&self, program: &str) -> bool;

    /// Run a command and fail on a non-zero exit status.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::CommandExecution`] when the command fails.
    fn run_checked(&self, cmd: &CommandSpec) -> Result<CommandOutput> {
        let output = self.run(cmd)?;
        if output.success() {
            Ok(output)
        } else {
            Err(ProvisionError::CommandExecution {
                command: cmd.display(),
                code: output.code,
                stderr: output.stderr.trim().to_string(),
            })
        }
    }

    /// Run a sequence of commands, stopping at the first failure.
    ///
    /// # Errors
    ///
    /// Returns the first command failure.
    fn run_all(&self, cmds: &[CommandSpec]) -> Result<()> {
        for cmd in cmds {
            self.run_checked(cmd)?;
        }
        Ok(())
    }

    /// Run a command and report only whether it succeeded.
    fn succeeds(&self, cmd: &CommandSpec) -> bool {
        self.run(cmd).is_ok_and(|o| o.success())
    }
}

/// Runs commands with `std::process::Command`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl SystemRunner {
    fn build(cmd: &CommandSpec) -> Command {
        let mut command = if let Some(user) = &cmd.as_user {
            let mut sudo = Command::new("sudo");
            sudo.args(["-u", user, "-H", "--", &cmd.program]);
            sudo
        } else {
            Command::new(&cmd.program)
        };
        command.args(&cmd.args);
        for (key, value) in &cmd.env {
            command.env(key, value);
        }
        if let Some(dir) = &cmd.current_dir {
            command.current_dir(dir);
        }
        command
    }
}

impl CommandRunner for SystemRunner {
    fn run(&self, cmd: &CommandSpec) -> Result<CommandOutput> {
        debug!(command = %cmd.display(), "Running command");

        let mut command = Self::build(cmd);
        command
            .stdin(if cmd.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = command.spawn()?;
        if let (Some(data), Some(mut stdin)) = (&cmd.stdin, child.stdin.take()) {
            stdin.write_all(data.as_bytes())?;
        }
        let output = child.wait_with_output()?;

        let result = CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        debug!(command = %cmd.program, code = ?result.code, "Command finished");
        Ok(result)
    }

    fn command_exists(&self, program: &str) -> bool {
        which::which(program).is_ok()
    }
}

/// Scripted runner for unit tests.
#[cfg(test)]
pub(crate) mod fake {
    use std::collections::HashSet;
    use std::sync::Mutex;

    use super::{CommandOutput, CommandRunner, CommandSpec};
    use crate::error::Result;

    /// Replies to commands by substring match on their display form (plus
    /// any stdin) and records every command it sees.
    #[derive(Default)]
    pub(crate) struct ScriptedRunner {
        replies: Vec<(String, CommandOutput)>,
        installed: Mutex<HashSet<String>>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedRunner {
        pub(crate) fn new() -> Self {
            Self::default()
        }

        /// Reply to commands containing `pattern`. Earlier rules win.
        pub(crate) fn reply(mut self, pattern: &str, code: i32, stdout: &str) -> Self {
            self.replies.push((
                pattern.to_string(),
                CommandOutput {
                    code: Some(code),
                    stdout: stdout.to_string(),
                    stderr: if code == 0 { String::new() } else { format!("{pattern} failed") },
                },
            ));
            self
        }

        /// Like [`Self::reply`] with an explicit stderr.
        pub(crate) fn reply_stderr(mut self, pattern: &str, code: i32, stderr: &str) -> Self {
            self.replies.push((
                pattern.to_string(),
                CommandOutput {
                    code: Some(code),
                    stdout: String::new(),
                    stderr: stderr.to_string(),
                },
            ));
            self
        }

        pub(crate) fn with_installed(self, programs: &[&str]) -> Self {
            self.installed
                .lock()
                .unwrap()
                .extend(programs.iter().map(|p| (*p).to_string()));
            self
        }

        pub(crate) fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        pub(crate) fn called(&self, pattern: &str) -> bool {
            self.calls().iter().any(|c| c.contains(pattern))
        }
    }

    impl CommandRunner for ScriptedRunner {
        fn run(&self, cmd: &CommandSpec) -> Result<CommandOutput> {
            let mut line = cmd.display();
            if let Some(input) = &cmd.stdin {
                line.push_str(" <<< ");
                line.push_str(input.trim_end());
            }
            self.calls.lock().unwrap().push(line.clone());
            Ok(self
                .replies
                .iter()
                .find(|(pattern, _)| line.contains(pattern.as_str()))
                .map(|(_, output)| output.clone())
                .unwrap_or_else(|| CommandOutput {
                    code: Some(0),
                    ..CommandOutput::default()
                }))
        }

        fn command_exists(&self, program: &str) -> bool {
            self.installed.lock().unwrap().contains(program)
        }
    }
}
