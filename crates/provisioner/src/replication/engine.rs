//! Database control surface and its Docker/MySQL implementation.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use tracing::{debug, info, warn};

use super::{LogCoordinate, ReplicaStatus, ReplicationError};
use crate::exec::{CommandOutput, CommandRunner, CommandSpec};

/// One side of the replication pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Instance {
    /// Source of the binary log.
    Master,
    /// Replica applying the log.
    Slave,
}

impl fmt::Display for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Master => write!(f, "master"),
            Self::Slave => write!(f, "slave"),
        }
    }
}

/// Result of creating the replication principal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserProvisioning {
    /// The user was created now.
    Created,
    /// The user was already there.
    AlreadyExisted,
}

/// Everything the replica needs to follow the master.
#[derive(Clone, PartialEq, Eq)]
pub struct ReplicationSource {
    /// Master host as reachable from the replica.
    pub host: String,
    /// Master port.
    pub port: u16,
    /// Replication user.
    pub user: String,
    /// Replication password.
    pub password: String,
    /// Where to start reading.
    pub coordinate: LogCoordinate,
}

impl fmt::Debug for ReplicationSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplicationSource")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("coordinate", &self.coordinate)
            .finish()
    }
}

/// Server version as reported by `SELECT VERSION()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ServerVersion {
    /// Major, minor and patch numbers.
    pub number: (u32, u32, u32),
    /// MariaDB keeps the `MASTER`/`SLAVE` statements.
    pub mariadb: bool,
}

impl ServerVersion {
    /// Parse strings such as `8.4.2`, `5.7.44-log` or `10.11.6-MariaDB-1:10.11.6+maria~ubu2204`.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        let numeric = raw.split(|c: char| !c.is_ascii_digit() && c != '.').next()?;
        let mut parts = numeric.split('.').map(str::parse::<u32>);
        let major = parts.next()?.ok()?;
        let minor = parts.next().and_then(Result::ok).unwrap_or(0);
        let patch = parts.next().and_then(Result::ok).unwrap_or(0);
        Some(Self {
            number: (major, minor, patch),
            mariadb: raw.to_ascii_lowercase().contains("mariadb"),
        })
    }

    /// `START REPLICA`, `SHOW REPLICA STATUS` and `CHANGE REPLICATION
    /// SOURCE TO` (MySQL 8.0.23+). MySQL 8.4 no longer accepts the old forms.
    #[must_use]
    pub fn uses_replica_terms(&self) -> bool {
        !self.mariadb && self.number >= (8, 0, 23)
    }

    /// `SHOW BINARY LOG STATUS` (MySQL 8.2+).
    #[must_use]
    pub fn uses_binary_log_status(&self) -> bool {
        !self.mariadb && self.number >= (8, 2, 0)
    }
}

impl fmt::Display for ServerVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (major, minor, patch) = self.number;
        write!(f, "{major}.{minor}.{patch}")?;
        if self.mariadb {
            write!(f, " (MariaDB)")?;
        }
        Ok(())
    }
}

/// Operations the replication bootstrap needs from the database pair.
///
/// Implementations perform no retries; waiting is the caller's job.
pub trait ReplicationEngine: Send + Sync {
    /// Whether an instance answers queries.
    fn ping(&self, instance: Instance) -> bool;

    /// Create the replication user on the master.
    ///
    /// # Errors
    ///
    /// Fails when the statement fails for any reason other than the user
    /// already existing.
    fn create_replication_user(
        &self,
        user: &str,
        password: &str,
    ) -> Result<UserProvisioning, ReplicationError>;

    /// Grant replication privileges to the user.
    ///
    /// # Errors
    ///
    /// Fails when the grant fails.
    fn grant_replication(&self, user: &str) -> Result<(), ReplicationError>;

    /// Current binary log file and position, unparsed.
    ///
    /// # Errors
    ///
    /// Fails when the status cannot be queried.
    fn master_status(&self) -> Result<(String, String), ReplicationError>;

    /// Stop the replica threads.
    ///
    /// # Errors
    ///
    /// Fails when the statement fails.
    fn stop_replica(&self) -> Result<(), ReplicationError>;

    /// Point the replica at a source.
    ///
    /// # Errors
    ///
    /// Fails when the statement fails.
    fn change_source(&self, source: &ReplicationSource) -> Result<(), ReplicationError>;

    /// Start the replica threads.
    ///
    /// # Errors
    ///
    /// Fails when the statement fails.
    fn start_replica(&self) -> Result<(), ReplicationError>;

    /// Current replica status.
    ///
    /// # Errors
    ///
    /// Fails when the status cannot be queried.
    fn replica_status(&self) -> Result<ReplicaStatus, ReplicationError>;

    /// Container-level status line for diagnostics.
    fn container_status(&self, instance: Instance) -> String;

    /// Server-level connectivity check, independent of [`Self::ping`], for
    /// diagnostics.
    fn alternate_ping(&self, instance: Instance) -> String;
}

/// Drives MySQL containers through `docker exec`.
///
/// The root password reaches the client through `MYSQL_PWD` forwarded from
/// the `docker` process environment; it never appears in an argument list.
///
/// Statement vocabulary follows each server's version, read once per
/// instance. An unreadable version falls back to the `MASTER`/`SLAVE` forms.
pub struct DockerMysqlEngine {
    runner: Arc<dyn CommandRunner>,
    master: String,
    slave: String,
    root_password: String,
    master_version: OnceLock<Option<ServerVersion>>,
    slave_version: OnceLock<Option<ServerVersion>>,
}

impl DockerMysqlEngine {
    /// Create an engine for a master and slave container.
    #[must_use]
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        master: impl Into<String>,
        slave: impl Into<String>,
        root_password: impl Into<String>,
    ) -> Self {
        Self {
            runner,
            master: master.into(),
            slave: slave.into(),
            root_password: root_password.into(),
            master_version: OnceLock::new(),
            slave_version: OnceLock::new(),
        }
    }

    /// Version of an instance, queried on first use.
    pub fn server_version(&self, instance: Instance) -> Option<ServerVersion> {
        let cell = match instance {
            Instance::Master => &self.master_version,
            Instance::Slave => &self.slave_version,
        };
        if let Some(version) = cell.get() {
            return *version;
        }
        let version = match self.query(instance, "read server version", "SELECT VERSION()") {
            Ok(output) => ServerVersion::parse(output.stdout_trimmed()),
            Err(e) => {
                warn!(%instance, error = %e, "Could not read server version");
                return None;
            }
        };
        match version {
            Some(v) => info!(%instance, version = %v, "Database server version"),
            None => warn!(%instance, "Unrecognised server version, using MASTER/SLAVE statements"),
        }
        *cell.get_or_init(|| version)
    }

    fn replica_terms(&self) -> bool {
        self.server_version(Instance::Slave)
            .is_some_and(|v| v.uses_replica_terms())
    }

    fn container(&self, instance: Instance) -> &str {
        match instance {
            Instance::Master => &self.master,
            Instance::Slave => &self.slave,
        }
    }

    fn exec(&self, instance: Instance, tool: &[&str]) -> CommandSpec {
        CommandSpec::new("docker")
            .args(["exec", "-i", "-e", "MYSQL_PWD", self.container(instance)])
            .args(tool.iter().copied())
            .env("MYSQL_PWD", self.root_password.as_str())
    }

    /// SQL goes over stdin; statements with passwords must not reach argv.
    fn sql_command(&self, instance: Instance, sql: &str) -> CommandSpec {
        self.exec(instance, &["mysql", "-uroot", "-N", "-B"])
            .stdin(format!("{sql};\n"))
    }

    fn query(
        &self,
        instance: Instance,
        operation: &'static str,
        sql: &str,
    ) -> Result<CommandOutput, ReplicationError> {
        self.execute(operation, &self.sql_command(instance, sql))
    }

    fn execute(
        &self,
        operation: &'static str,
        cmd: &CommandSpec,
    ) -> Result<CommandOutput, ReplicationError> {
        debug!(operation, command = %cmd.display(), "Running SQL");
        let output = self
            .runner
            .run(cmd)
            .map_err(|e| ReplicationError::engine(operation, e.to_string()))?;
        if output.success() {
            Ok(output)
        } else {
            Err(ReplicationError::engine(operation, output.stderr.trim()))
        }
    }
}

impl ReplicationEngine for DockerMysqlEngine {
    fn ping(&self, instance: Instance) -> bool {
        self.runner.succeeds(&self.sql_command(instance, "SELECT 1"))
    }

    fn create_replication_user(
        &self,
        user: &str,
        password: &str,
    ) -> Result<UserProvisioning, ReplicationError> {
        let sql = format!(
            "CREATE USER {}@'%' IDENTIFIED BY {}",
            sql_quote(user),
            sql_quote(password)
        );
        match self.query(Instance::Master, "create replication user", &sql) {
            Ok(_) => Ok(UserProvisioning::Created),
            Err(ReplicationError::Engine { message, .. }) if is_duplicate_user(&message) => {
                info!(user, "Replication user already exists");
                Ok(UserProvisioning::AlreadyExisted)
            }
            Err(e) => Err(e),
        }
    }

    fn grant_replication(&self, user: &str) -> Result<(), ReplicationError> {
        let sql = format!(
            "GRANT REPLICATION SLAVE ON *.* TO {}@'%'; FLUSH PRIVILEGES",
            sql_quote(user)
        );
        self.query(Instance::Master, "grant replication", &sql)
            .map(|_| ())
    }

    fn master_status(&self) -> Result<(String, String), ReplicationError> {
        let sql = if self
            .server_version(Instance::Master)
            .is_some_and(|v| v.uses_binary_log_status())
        {
            "SHOW BINARY LOG STATUS"
        } else {
            "SHOW MASTER STATUS"
        };
        let output = self.query(Instance::Master, "show master status", sql)?;
        Ok(parse_master_status(&output.stdout))
    }

    fn stop_replica(&self) -> Result<(), ReplicationError> {
        let sql = if self.replica_terms() { "STOP REPLICA" } else { "STOP SLAVE" };
        self.query(Instance::Slave, "stop replica", sql).map(|_| ())
    }

    fn change_source(&self, source: &ReplicationSource) -> Result<(), ReplicationError> {
        let sql = change_source_sql(source, self.replica_terms());
        self.query(Instance::Slave, "change source", &sql).map(|_| ())
    }

    fn start_replica(&self) -> Result<(), ReplicationError> {
        let sql = if self.replica_terms() { "START REPLICA" } else { "START SLAVE" };
        self.query(Instance::Slave, "start replica", sql).map(|_| ())
    }

    fn replica_status(&self) -> Result<ReplicaStatus, ReplicationError> {
        let sql = if self.replica_terms() {
            "SHOW REPLICA STATUS"
        } else {
            "SHOW SLAVE STATUS"
        };
        // Vertical output needs column names, so no -N here.
        let cmd = self
            .exec(Instance::Slave, &["mysql", "-uroot"])
            .stdin(format!("{sql}\\G\n"));
        let output = self.execute("show replica status", &cmd)?;
        Ok(ReplicaStatus::from_fields(&parse_vertical_report(&output.stdout)))
    }

    fn container_status(&self, instance: Instance) -> String {
        let name = self.container(instance);
        let cmd = CommandSpec::new("docker").args([
            "ps",
            "-a",
            "--filter",
            &format!("name={name}"),
            "--format",
            "{{.Names}} {{.Status}}",
        ]);
        match self.runner.run(&cmd) {
            Ok(output) if !output.stdout_trimmed().is_empty() => output.stdout_trimmed().to_string(),
            Ok(output) if output.success() => format!("{name}: no such container"),
            Ok(output) => format!("{name}: docker ps failed: {}", output.stderr.trim()),
            Err(e) => format!("{name}: {e}"),
        }
    }

    fn alternate_ping(&self, instance: Instance) -> String {
        let cmd = self.exec(instance, &["mysqladmin", "ping", "-uroot"]);
        match self.runner.run(&cmd) {
            Ok(output) if output.success() => output.stdout_trimmed().to_string(),
            Ok(output) => format!("unreachable: {}", output.stderr.trim()),
            Err(e) => format!("unreachable: {e}"),
        }
    }
}

fn is_duplicate_user(message: &str) -> bool {
    message.contains("1396") || message.to_ascii_lowercase().contains("already exists")
}

/// Render the statement pointing a replica at `source`: `CHANGE REPLICATION
/// SOURCE TO` when `replica_terms`, else `CHANGE MASTER TO`.
#[must_use]
pub fn change_source_sql(source: &ReplicationSource, replica_terms: bool) -> String {
    if replica_terms {
        return format!(
            "CHANGE REPLICATION SOURCE TO SOURCE_HOST={}, SOURCE_PORT={}, SOURCE_USER={}, \
             SOURCE_PASSWORD={}, SOURCE_LOG_FILE={}, SOURCE_LOG_POS={}, GET_SOURCE_PUBLIC_KEY=1",
            sql_quote(&source.host),
            source.port,
            sql_quote(&source.user),
            sql_quote(&source.password),
            sql_quote(&source.coordinate.file),
            source.coordinate.position,
        );
    }
    format!(
        "CHANGE MASTER TO MASTER_HOST={}, MASTER_PORT={}, MASTER_USER={}, MASTER_PASSWORD={}, \
         MASTER_LOG_FILE={}, MASTER_LOG_POS={}, GET_MASTER_PUBLIC_KEY=1",
        sql_quote(&source.host),
        source.port,
        sql_quote(&source.user),
        sql_quote(&source.password),
        sql_quote(&source.coordinate.file),
        source.coordinate.position,
    )
}

/// Quote a string literal for MySQL.
#[must_use]
pub fn sql_quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('\'');
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            _ => out.push(c),
        }
    }
    out.push('\'');
    out
}

/// File and position columns of batch-mode `SHOW MASTER STATUS` output.
/// Missing columns come back empty.
#[must_use]
pub fn parse_master_status(output: &str) -> (String, String) {
    let mut columns = output
        .lines()
        .find(|line| !line.trim().is_empty())
        .unwrap_or_default()
        .split('\t');
    let file = columns.next().unwrap_or_default().trim().to_string();
    let position = columns.next().unwrap_or_default().trim().to_string();
    (file, position)
}

/// Parse `\G`-style `Key: value` output. Row separators are ignored.
#[must_use]
pub fn parse_vertical_report(output: &str) -> BTreeMap<String, String> {
    output
        .lines()
        .filter(|line| !line.trim_start().starts_with('*'))
        .filter_map(|line| line.split_once(':'))
        .map(|(key, value)| (key.trim().to_string(), value.trim().to_string()))
        .filter(|(key, _)| !key.is_empty() && !key.contains(' '))
        .collect()
}
