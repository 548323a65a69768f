//! Master/replica replication bootstrap.
//!
//! The bootstrap is a small state machine:
//!
//! ```text
//! WaitMaster -> WaitSlave -> ProvisionReplUser -> CaptureMasterCoordinate
//!     -> ApplyToSlave -> Verify -> Converged
//! ```
//!
//! Any phase may end the run in `Failed`, which carries a diagnostic dump.
//! Every visited phase is recorded so a run can be audited afterwards.

pub mod engine;

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

pub use engine::{
    DockerMysqlEngine, Instance, ReplicationEngine, ReplicationSource, ServerVersion,
    UserProvisioning,
};

use crate::envfile::EnvFile;
use crate::error::ProvisionError;
use crate::poller::ReadinessPoller;

/// Env key of the database root password.
pub const ROOT_PASSWORD_KEY: &str = "MYSQL_ROOT_PASSWORD";
/// Env key of the replication user.
pub const REPLICATION_USER_KEY: &str = "MYSQL_REPLICATION_USER";
/// Env key of the replication password.
pub const REPLICATION_PASSWORD_KEY: &str = "MYSQL_REPLICATION_PASSWORD";

/// Replication failures.
#[derive(Error, Debug)]
pub enum ReplicationError {
    /// A required credential is missing from the environment file.
    #[error("Missing credential {0} in the application environment")]
    MissingCredential(String),

    /// An instance never became reachable.
    #[error("{instance} not ready: {source}")]
    NotReady {
        instance: Instance,
        #[source]
        source: ProvisionError,
    },

    /// A control operation failed.
    #[error("{operation} failed: {message}")]
    Engine { operation: String, message: String },

    /// The master reported an unusable log coordinate.
    #[error("Invalid master log coordinate: {0}")]
    InvalidCoordinate(String),

    /// Replica threads are not both running after the settle delay.
    #[error("Replica threads not running (IO: {io_running}, SQL: {sql_running})")]
    NotConverged { io_running: bool, sql_running: bool },
}

impl ReplicationError {
    /// Build an engine failure.
    pub fn engine(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Engine {
            operation: operation.into(),
            message: message.into(),
        }
    }
}

/// Database credentials read once from the generated environment file.
#[derive(Clone, PartialEq, Eq)]
pub struct DatabaseCredentials {
    /// Root password of both instances.
    pub root_password: String,
    /// Replication principal.
    pub replication_user: String,
    /// Replication principal's password.
    pub replication_password: String,
}

impl fmt::Debug for DatabaseCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseCredentials")
            .field("root_password", &"<redacted>")
            .field("replication_user", &self.replication_user)
            .field("replication_password", &"<redacted>")
            .finish()
    }
}

impl DatabaseCredentials {
    /// Extract credentials. Without a replication user, `default_user` is
    /// used; without a replication password, the root password is reused.
    ///
    /// # Errors
    ///
    /// Returns [`ReplicationError::MissingCredential`] when the root password
    /// is absent or empty.
    pub fn from_env(env: &EnvFile, default_user: &str) -> Result<Self, ReplicationError> {
        let present = |key: &str| env.get(key).filter(|v| !v.trim().is_empty());

        let root_password = present(ROOT_PASSWORD_KEY)
            .ok_or_else(|| ReplicationError::MissingCredential(ROOT_PASSWORD_KEY.to_string()))?;
        let replication_user =
            present(REPLICATION_USER_KEY).unwrap_or_else(|| default_user.to_string());
        let replication_password = present(REPLICATION_PASSWORD_KEY).unwrap_or_else(|| {
            warn!("{REPLICATION_PASSWORD_KEY} not set, reusing the root password");
            root_password.clone()
        });

        Ok(Self {
            root_password,
            replication_user,
            replication_password,
        })
    }
}

/// Topology and timing of the replication pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicationSettings {
    /// Master container name.
    pub master_container: String,
    /// Replica container name.
    pub slave_container: String,
    /// Master host as seen from the replica.
    pub master_host: String,
    /// Master port as seen from the replica.
    pub master_port: u16,
    /// Replication user when the environment file names none.
    pub default_user: String,
    /// Liveness wait per instance.
    pub poller: ReadinessPoller,
    /// Pause between starting the replica and reading its status.
    pub settle_delay: Duration,
}

impl Default for ReplicationSettings {
    fn default() -> Self {
        Self {
            master_container: "mysql-master".to_string(),
            slave_container: "mysql-slave".to_string(),
            master_host: "mysql-master".to_string(),
            master_port: 3306,
            default_user: "replicator".to_string(),
            poller: ReadinessPoller::default(),
            settle_delay: Duration::from_secs(5),
        }
    }
}

/// Binary log file and byte offset on the master.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogCoordinate {
    /// Log file name.
    pub file: String,
    /// Position within the file.
    pub position: u64,
}

impl LogCoordinate {
    /// Validate raw binary log status columns.
    ///
    /// # Errors
    ///
    /// Fails when either column is empty or the position is not numeric.
    pub fn parse(file: &str, position: &str) -> Result<Self, ReplicationError> {
        let file = file.trim();
        let position = position.trim();
        if file.is_empty() || position.is_empty() {
            return Err(ReplicationError::InvalidCoordinate(
                "empty file or position (is binary logging enabled?)".to_string(),
            ));
        }
        let position = position.parse().map_err(|_| {
            ReplicationError::InvalidCoordinate(format!("position '{position}' is not numeric"))
        })?;
        Ok(Self {
            file: file.to_string(),
            position,
        })
    }
}

impl fmt::Display for LogCoordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.position)
    }
}

/// Parsed replica status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReplicaStatus {
    /// IO thread running.
    pub io_running: bool,
    /// SQL thread running.
    pub sql_running: bool,
    /// Replication lag, when known.
    pub seconds_behind: Option<u64>,
    /// Source log file being read.
    pub source_log_file: Option<String>,
    /// Last IO thread error.
    pub last_io_error: String,
    /// Last SQL thread error.
    pub last_sql_error: String,
}

impl ReplicaStatus {
    /// Build from a vertical status report. Both the legacy
    /// (`Slave_*`/`Master_*`) and the current (`Replica_*`/`Source_*`)
    /// field names are understood.
    #[must_use]
    pub fn from_fields(fields: &BTreeMap<String, String>) -> Self {
        let field = |names: &[&str]| {
            names
                .iter()
                .find_map(|name| fields.get(*name))
                .map(String::as_str)
        };
        let running = |names: &[&str]| field(names).is_some_and(|v| v.eq_ignore_ascii_case("yes"));

        Self {
            io_running: running(&["Slave_IO_Running", "Replica_IO_Running"]),
            sql_running: running(&["Slave_SQL_Running", "Replica_SQL_Running"]),
            seconds_behind: field(&["Seconds_Behind_Master", "Seconds_Behind_Source"])
                .and_then(|v| v.parse().ok()),
            source_log_file: field(&["Master_Log_File", "Source_Log_File"])
                .filter(|v| !v.is_empty())
                .map(str::to_string),
            last_io_error: field(&["Last_IO_Error"]).unwrap_or_default().to_string(),
            last_sql_error: field(&["Last_SQL_Error"]).unwrap_or_default().to_string(),
        }
    }

    /// Both replica threads are running.
    #[must_use]
    pub fn is_replicating(&self) -> bool {
        self.io_running && self.sql_running
    }
}

impl fmt::Display for ReplicaStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let yes_no = |b: bool| if b { "Yes" } else { "No" };
        write!(
            f,
            "IO running: {}, SQL running: {}, lag: {}",
            yes_no(self.io_running),
            yes_no(self.sql_running),
            self.seconds_behind
                .map_or_else(|| "unknown".to_string(), |s| format!("{s}s"))
        )?;
        if !self.last_io_error.is_empty() {
            write!(f, ", last IO error: {}", self.last_io_error)?;
        }
        if !self.last_sql_error.is_empty() {
            write!(f, ", last SQL error: {}", self.last_sql_error)?;
        }
        Ok(())
    }
}

/// Observed replication state of one run. Never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReplicationState {
    /// Master log file captured for this run.
    pub master_log_file: Option<String>,
    /// Master log position captured for this run.
    pub master_log_position: Option<u64>,
    /// IO thread running at verification.
    pub io_thread_running: bool,
    /// SQL thread running at verification.
    pub sql_thread_running: bool,
    /// Lag at verification, when known.
    pub seconds_behind_master: Option<u64>,
}

/// Bootstrap phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ReplicationPhase {
    WaitMaster,
    WaitSlave,
    ProvisionReplUser,
    CaptureMasterCoordinate,
    ApplyToSlave,
    Verify,
    Converged,
    Failed,
}

impl ReplicationPhase {
    /// Whether the machine stops here.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Converged | Self::Failed)
    }
}

/// Diagnostic dump collected when a bootstrap fails.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostics {
    /// `docker ps` line per instance.
    pub containers: Vec<(Instance, String)>,
    /// Alternate connectivity check per instance.
    pub pings: Vec<(Instance, String)>,
    /// Replica status, when it could be read.
    pub replica_status: Option<ReplicaStatus>,
    /// Operator guidance.
    pub guidance: Vec<String>,
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Containers:")?;
        for (instance, line) in &self.containers {
            writeln!(f, "  {instance}: {line}")?;
        }
        writeln!(f, "Connectivity:")?;
        for (instance, line) in &self.pings {
            writeln!(f, "  {instance}: {line}")?;
        }
        match &self.replica_status {
            Some(status) => writeln!(f, "Replica status: {status}")?,
            None => writeln!(f, "Replica status: unavailable")?,
        }
        writeln!(f, "Next steps:")?;
        for hint in &self.guidance {
            writeln!(f, "  - {hint}")?;
        }
        Ok(())
    }
}

/// How a bootstrap ended.
#[derive(Debug)]
pub enum ReplicationOutcome {
    /// Both replica threads are running.
    Converged {
        /// Final observed state.
        state: ReplicationState,
        /// Visited phases, ending in `Converged`.
        history: Vec<ReplicationPhase>,
    },
    /// The bootstrap stopped in `phase`.
    Failed {
        /// Phase that failed.
        phase: ReplicationPhase,
        /// Cause.
        error: ReplicationError,
        /// Observed state up to the failure.
        state: ReplicationState,
        /// Diagnostic dump.
        diagnostics: Diagnostics,
        /// Visited phases, ending in `Failed`.
        history: Vec<ReplicationPhase>,
    },
}

impl ReplicationOutcome {
    /// Whether replication converged.
    #[must_use]
    pub fn is_converged(&self) -> bool {
        matches!(self, Self::Converged { .. })
    }

    /// Visited phases.
    #[must_use]
    pub fn history(&self) -> &[ReplicationPhase] {
        match self {
            Self::Converged { history, .. } | Self::Failed { history, .. } => history,
        }
    }
}

/// Runs the bootstrap state machine against an engine.
pub struct ReplicationBootstrapper<E> {
    engine: E,
    settings: ReplicationSettings,
}

impl<E: ReplicationEngine> ReplicationBootstrapper<E> {
    /// Create a bootstrapper.
    pub fn new(engine: E, settings: ReplicationSettings) -> Self {
        Self { engine, settings }
    }

    /// Drive the machine to a terminal phase.
    pub async fn run(&self, credentials: &DatabaseCredentials) -> ReplicationOutcome {
        let mut phase = ReplicationPhase::WaitMaster;
        let mut history = Vec::new();
        let mut state = ReplicationState::default();
        let mut coordinate: Option<LogCoordinate> = None;
        let mut last_status: Option<ReplicaStatus> = None;

        while !phase.is_terminal() {
            history.push(phase);
            info!(?phase, "Replication phase");

            let step = match phase {
                ReplicationPhase::WaitMaster => self
                    .wait_for(Instance::Master)
                    .await
                    .map(|()| ReplicationPhase::WaitSlave),
                ReplicationPhase::WaitSlave => self
                    .wait_for(Instance::Slave)
                    .await
                    .map(|()| ReplicationPhase::ProvisionReplUser),
                ReplicationPhase::ProvisionReplUser => self
                    .provision_user(credentials)
                    .map(|()| ReplicationPhase::CaptureMasterCoordinate),
                ReplicationPhase::CaptureMasterCoordinate => {
                    self.capture_coordinate().map(|captured| {
                        state.master_log_file = Some(captured.file.clone());
                        state.master_log_position = Some(captured.position);
                        coordinate = Some(captured);
                        ReplicationPhase::ApplyToSlave
                    })
                }
                ReplicationPhase::ApplyToSlave => match &coordinate {
                    Some(coordinate) => self
                        .apply_to_slave(credentials, coordinate)
                        .map(|()| ReplicationPhase::Verify),
                    None => Err(ReplicationError::InvalidCoordinate(
                        "no coordinate captured".to_string(),
                    )),
                },
                ReplicationPhase::Verify => {
                    let (status, verdict) = self.verify().await;
                    if let Some(status) = &status {
                        state.io_thread_running = status.io_running;
                        state.sql_thread_running = status.sql_running;
                        state.seconds_behind_master = status.seconds_behind;
                    }
                    last_status = status;
                    verdict.map(|()| ReplicationPhase::Converged)
                }
                ReplicationPhase::Converged | ReplicationPhase::Failed => break,
            };

            match step {
                Ok(next) => phase = next,
                Err(error) => {
                    warn!(?phase, %error, "Replication bootstrap failed");
                    history.push(ReplicationPhase::Failed);
                    let diagnostics = self.diagnose(phase, last_status);
                    return ReplicationOutcome::Failed {
                        phase,
                        error,
                        state,
                        diagnostics,
                        history,
                    };
                }
            }
        }

        history.push(ReplicationPhase::Converged);
        info!(lag = ?state.seconds_behind_master, "Replication converged");
        ReplicationOutcome::Converged { state, history }
    }

    async fn wait_for(&self, instance: Instance) -> Result<(), ReplicationError> {
        self.settings
            .poller
            .await_ready(&format!("{instance} database"), || self.engine.ping(instance))
            .await
            .map(|_| ())
            .map_err(|source| ReplicationError::NotReady { instance, source })
    }

    fn provision_user(&self, credentials: &DatabaseCredentials) -> Result<(), ReplicationError> {
        let created = self.engine.create_replication_user(
            &credentials.replication_user,
            &credentials.replication_password,
        )?;
        info!(user = %credentials.replication_user, ?created, "Replication user ready");
        self.engine.grant_replication(&credentials.replication_user)
    }

    fn capture_coordinate(&self) -> Result<LogCoordinate, ReplicationError> {
        let (file, position) = self.engine.master_status()?;
        let coordinate = LogCoordinate::parse(&file, &position)?;
        info!(%coordinate, "Captured master log coordinate");
        Ok(coordinate)
    }

    fn apply_to_slave(
        &self,
        credentials: &DatabaseCredentials,
        coordinate: &LogCoordinate,
    ) -> Result<(), ReplicationError> {
        self.engine.stop_replica()?;
        self.engine.change_source(&ReplicationSource {
            host: self.settings.master_host.clone(),
            port: self.settings.master_port,
            user: credentials.replication_user.clone(),
            password: credentials.replication_password.clone(),
            coordinate: coordinate.clone(),
        })?;
        self.engine.start_replica()
    }

    /// Replica status after the settle delay, if it could be read, and the
    /// convergence verdict.
    async fn verify(&self) -> (Option<ReplicaStatus>, Result<(), ReplicationError>) {
        tokio::time::sleep(self.settings.settle_delay).await;
        let status = match self.engine.replica_status() {
            Ok(status) => status,
            Err(e) => return (None, Err(e)),
        };
        info!(%status, "Replica status");
        let verdict = if status.is_replicating() {
            Ok(())
        } else {
            Err(ReplicationError::NotConverged {
                io_running: status.io_running,
                sql_running: status.sql_running,
            })
        };
        (Some(status), verdict)
    }

    fn diagnose(&self, phase: ReplicationPhase, known: Option<ReplicaStatus>) -> Diagnostics {
        let instances = [Instance::Master, Instance::Slave];
        let replica_status = known.or_else(|| self.engine.replica_status().ok());

        Diagnostics {
            containers: instances
                .iter()
                .map(|&i| (i, self.engine.container_status(i)))
                .collect(),
            pings: instances
                .iter()
                .map(|&i| (i, self.engine.alternate_ping(i)))
                .collect(),
            replica_status,
            guidance: self.guidance(phase),
        }
    }

    fn guidance(&self, phase: ReplicationPhase) -> Vec<String> {
        let master = &self.settings.master_container;
        let slave = &self.settings.slave_container;
        let mut hints = match phase {
            ReplicationPhase::WaitMaster => vec![format!("Check the master logs: docker logs {master}")],
            ReplicationPhase::WaitSlave => vec![format!("Check the replica logs: docker logs {slave}")],
            ReplicationPhase::ProvisionReplUser => vec![format!(
                "Confirm {ROOT_PASSWORD_KEY} matches the password the data volume was initialized with"
            )],
            ReplicationPhase::CaptureMasterCoordinate => vec![
                "Enable binary logging on the master (log-bin) and a unique server-id".to_string(),
            ],
            ReplicationPhase::ApplyToSlave | ReplicationPhase::Verify => vec![
                "Inspect Last_IO_Error and Last_SQL_Error in the replica status".to_string(),
                format!(
                    "Confirm the replica can reach {}:{}",
                    self.settings.master_host, self.settings.master_port
                ),
            ],
            ReplicationPhase::Converged | ReplicationPhase::Failed => Vec::new(),
        };
        hints.push("Re-run the provisioner once fixed; the bootstrap is safe to repeat".to_string());
        hints
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    /// In-memory replication pair.
    struct Simulated {
        master_up: bool,
        sql_thread: bool,
        user_exists: bool,
        coordinate: (String, String),
        applied: Mutex<Option<ReplicationSource>>,
        running: Mutex<bool>,
        pings: Mutex<u32>,
    }

    impl Simulated {
        fn healthy() -> Self {
            Self {
                master_up: true,
                sql_thread: true,
                user_exists: false,
                coordinate: ("log.000003".into(), "157".into()),
                applied: Mutex::new(None),
                running: Mutex::new(false),
                pings: Mutex::new(0),
            }
        }
    }

    impl ReplicationEngine for &Simulated {
        fn ping(&self, instance: Instance) -> bool {
            *self.pings.lock().unwrap() += 1;
            instance == Instance::Slave || self.master_up
        }

        fn create_replication_user(
            &self,
            _user: &str,
            _password: &str,
        ) -> Result<UserProvisioning, ReplicationError> {
            Ok(if self.user_exists {
                UserProvisioning::AlreadyExisted
            } else {
                UserProvisioning::Created
            })
        }

        fn grant_replication(&self, _user: &str) -> Result<(), ReplicationError> {
            Ok(())
        }

        fn master_status(&self) -> Result<(String, String), ReplicationError> {
            Ok(self.coordinate.clone())
        }

        fn stop_replica(&self) -> Result<(), ReplicationError> {
            *self.running.lock().unwrap() = false;
            Ok(())
        }

        fn change_source(&self, source: &ReplicationSource) -> Result<(), ReplicationError> {
            *self.applied.lock().unwrap() = Some(source.clone());
            Ok(())
        }

        fn start_replica(&self) -> Result<(), ReplicationError> {
            *self.running.lock().unwrap() = true;
            Ok(())
        }

        fn replica_status(&self) -> Result<ReplicaStatus, ReplicationError> {
            let running = *self.running.lock().unwrap();
            Ok(ReplicaStatus {
                io_running: running,
                sql_running: running && self.sql_thread,
                seconds_behind: running.then_some(0),
                source_log_file: Some(self.coordinate.0.clone()),
                last_io_error: String::new(),
                last_sql_error: if self.sql_thread {
                    String::new()
                } else {
                    "Error 1062: Duplicate entry".to_string()
                },
            })
        }

        fn container_status(&self, instance: Instance) -> String {
            format!("mysql-{instance} Up 2 minutes")
        }

        fn alternate_ping(&self, _instance: Instance) -> String {
            "mysqld is alive".to_string()
        }
    }

    fn credentials() -> DatabaseCredentials {
        DatabaseCredentials {
            root_password: "root".into(),
            replication_user: "replicator".into(),
            replication_password: "repl".into(),
        }
    }

    fn settings() -> ReplicationSettings {
        ReplicationSettings {
            poller: ReadinessPoller::new(3, Duration::from_secs(5)),
            ..ReplicationSettings::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_converges_with_captured_coordinate() {
        let engine = Simulated::healthy();
        let outcome = ReplicationBootstrapper::new(&engine, settings())
            .run(&credentials())
            .await;

        let ReplicationOutcome::Converged { state, history } = outcome else {
            panic!("expected convergence");
        };
        assert_eq!(state.master_log_file.as_deref(), Some("log.000003"));
        assert_eq!(state.master_log_position, Some(157));
        assert!(state.io_thread_running && state.sql_thread_running);
        assert_eq!(
            history,
            vec![
                ReplicationPhase::WaitMaster,
                ReplicationPhase::WaitSlave,
                ReplicationPhase::ProvisionReplUser,
                ReplicationPhase::CaptureMasterCoordinate,
                ReplicationPhase::ApplyToSlave,
                ReplicationPhase::Verify,
                ReplicationPhase::Converged,
            ]
        );

        let applied = engine.applied.lock().unwrap().clone().unwrap();
        assert_eq!(applied.coordinate.file, "log.000003");
        assert_eq!(applied.coordinate.position, 157);
        assert_eq!(applied.host, "mysql-master");
        assert_eq!(applied.user, "replicator");
    }

    #[tokio::test(start_paused = true)]
    async fn test_stopped_sql_thread_fails_with_status() {
        let engine = Simulated {
            sql_thread: false,
            ..Simulated::healthy()
        };
        let outcome = ReplicationBootstrapper::new(&engine, settings())
            .run(&credentials())
            .await;

        let ReplicationOutcome::Failed {
            phase,
            error,
            diagnostics,
            history,
            ..
        } = outcome
        else {
            panic!("expected failure");
        };
        assert_eq!(phase, ReplicationPhase::Verify);
        assert!(matches!(
            error,
            ReplicationError::NotConverged {
                io_running: true,
                sql_running: false
            }
        ));
        assert_eq!(history.last(), Some(&ReplicationPhase::Failed));

        let status = diagnostics.replica_status.clone().unwrap();
        assert!(!status.sql_running);
        let rendered = diagnostics.to_string();
        assert!(rendered.contains("SQL running: No"));
        assert!(rendered.contains("Duplicate entry"));
        assert!(rendered.contains("mysqld is alive"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_master_times_out() {
        let engine = Simulated {
            master_up: false,
            ..Simulated::healthy()
        };
        let outcome = ReplicationBootstrapper::new(&engine, settings())
            .run(&credentials())
            .await;

        assert!(!outcome.is_converged());
        assert_eq!(
            outcome.history(),
            &[ReplicationPhase::WaitMaster, ReplicationPhase::Failed]
        );
        assert_eq!(*engine.pings.lock().unwrap(), 3);
        let ReplicationOutcome::Failed { error, diagnostics, .. } = outcome else {
            unreachable!()
        };
        assert!(matches!(
            error,
            ReplicationError::NotReady {
                instance: Instance::Master,
                source: ProvisionError::Timeout { attempts: 3, .. }
            }
        ));
        assert!(diagnostics.guidance[0].contains("docker logs mysql-master"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_coordinate_fails_before_touching_slave() {
        let engine = Simulated {
            coordinate: ("log.000003".into(), "abc".into()),
            ..Simulated::healthy()
        };
        let outcome = ReplicationBootstrapper::new(&engine, settings())
            .run(&credentials())
            .await;

        let ReplicationOutcome::Failed { phase, error, .. } = outcome else {
            panic!("expected failure");
        };
        assert_eq!(phase, ReplicationPhase::CaptureMasterCoordinate);
        assert!(matches!(error, ReplicationError::InvalidCoordinate(_)));
        assert!(engine.applied.lock().unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_existing_user_is_not_a_failure() {
        let engine = Simulated {
            user_exists: true,
            ..Simulated::healthy()
        };
        let outcome = ReplicationBootstrapper::new(&engine, settings())
            .run(&credentials())
            .await;
        assert!(outcome.is_converged());
    }

    #[test]
    fn test_log_coordinate_parse() {
        assert_eq!(
            LogCoordinate::parse("log.000003", "157").unwrap(),
            LogCoordinate {
                file: "log.000003".into(),
                position: 157
            }
        );
        assert!(LogCoordinate::parse("", "157").is_err());
        assert!(LogCoordinate::parse("log.000003", "").is_err());
        assert!(LogCoordinate::parse("log.000003", "-1").is_err());
    }

    #[test]
    fn test_status_accepts_both_vocabularies() {
        let legacy: BTreeMap<String, String> = [
            ("Slave_IO_Running", "Yes"),
            ("Slave_SQL_Running", "Yes"),
            ("Seconds_Behind_Master", "4"),
            ("Master_Log_File", "mysql-bin.000001"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        let current: BTreeMap<String, String> = [
            ("Replica_IO_Running", "Yes"),
            ("Replica_SQL_Running", "No"),
            ("Seconds_Behind_Source", "NULL"),
            ("Last_SQL_Error", "boom"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let legacy = ReplicaStatus::from_fields(&legacy);
        assert!(legacy.is_replicating());
        assert_eq!(legacy.seconds_behind, Some(4));
        assert_eq!(legacy.source_log_file.as_deref(), Some("mysql-bin.000001"));

        let current = ReplicaStatus::from_fields(&current);
        assert!(current.io_running);
        assert!(!current.sql_running);
        assert_eq!(current.seconds_behind, None);
        assert_eq!(current.last_sql_error, "boom");
    }

    #[test]
    fn test_credentials_from_env() {
        let env = EnvFile::parse("MYSQL_ROOT_PASSWORD=root\nMYSQL_REPLICATION_PASSWORD=\n");
        let creds = DatabaseCredentials::from_env(&env, "replicator").unwrap();
        assert_eq!(creds.replication_user, "replicator");
        assert_eq!(creds.replication_password, "root");
        assert!(!format!("{creds:?}").contains("root\""));

        let missing = EnvFile::parse("MYSQL_ROOT_PASSWORD=\n");
        assert!(matches!(
            DatabaseCredentials::from_env(&missing, "replicator"),
            Err(ReplicationError::MissingCredential(key)) if key == ROOT_PASSWORD_KEY
        ));
    }
}
