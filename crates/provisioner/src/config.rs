//! Persisted provisioning configuration.
//!
//! The store is a small `KEY="value"` file holding the three settings the
//! pipeline cannot run without. Anything missing or invalid is asked for
//! interactively, defaulted where a default exists, validated again and the
//! merged result is written back over the store.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{ProvisionError, Result};
use crate::prompt::Prompter;
use crate::ui;

/// Store key for the repository URL.
pub const KEY_REPO_URL: &str = "REPO_URL";
/// Store key for the install directory.
pub const KEY_PROJECT_DIR: &str = "PROJECT_DIR";
/// Store key for the environment mode.
pub const KEY_ENV_MODE: &str = "ENV_MODE";

/// File name of the store inside the effective user's home.
pub const STORE_FILE_NAME: &str = ".provision.conf";

/// Default number of prompts per field before giving up.
pub const DEFAULT_PROMPT_ATTEMPTS: u32 = 3;

static LINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:export\s+)?([A-Za-z_][A-Za-z0-9_]*)=(.*)$").expect("valid regex")
});

static SCM_URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:(?:ssh|git|https?)://\S+|[A-Za-z0-9._-]+@[A-Za-z0-9.-]+:\S+)$")
        .expect("valid regex")
});

/// Deployment flavour of the application environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EnvironmentMode {
    /// Development: operator-chosen credentials, debug enabled.
    #[default]
    Dev,
    /// Production: generated secrets, hardened flags.
    Prod,
}

impl std::fmt::Display for EnvironmentMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dev => write!(f, "dev"),
            Self::Prod => write!(f, "prod"),
        }
    }
}

impl std::str::FromStr for EnvironmentMode {
    type Err = ProvisionError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "dev" | "development" => Ok(Self::Dev),
            "prod" | "production" => Ok(Self::Prod),
            other => Err(ProvisionError::validation(
                KEY_ENV_MODE,
                format!("unknown mode '{other}'. Supported: dev, prod"),
            )),
        }
    }
}

/// Fully resolved configuration. All fields are non-empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisioningConfig {
    /// Development or production.
    pub environment_mode: EnvironmentMode,
    /// Application repository (SSH or HTTPS).
    pub repository_url: String,
    /// Absolute checkout directory.
    pub install_directory: PathBuf,
}

impl ProvisioningConfig {
    /// Repository name derived from the URL.
    #[must_use]
    pub fn repo_name(&self) -> String {
        repo_name(&self.repository_url).unwrap_or_else(|| "app".to_string())
    }

    /// Generated application environment file.
    #[must_use]
    pub fn env_file(&self) -> PathBuf {
        self.install_directory.join(".env")
    }

    /// Environment template shipped with the application.
    #[must_use]
    pub fn env_template(&self) -> PathBuf {
        self.install_directory.join(".env.example")
    }

    /// Directory exported for backups.
    #[must_use]
    pub fn backup_dir(&self) -> PathBuf {
        self.install_directory.join("backups")
    }
}

#[derive(Debug, Clone, Copy)]
enum ConfigField {
    EnvMode,
    RepoUrl,
    ProjectDir,
}

impl ConfigField {
    fn key(self) -> &'static str {
        match self {
            Self::EnvMode => KEY_ENV_MODE,
            Self::RepoUrl => KEY_REPO_URL,
            Self::ProjectDir => KEY_PROJECT_DIR,
        }
    }

    fn prompt(self) -> &'static str {
        match self {
            Self::EnvMode => "Environment mode (dev/prod)",
            Self::RepoUrl => "Application repository URL",
            Self::ProjectDir => "Install directory",
        }
    }
}

/// Loads, resolves and persists [`ProvisioningConfig`].
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
    home: PathBuf,
    prompt_attempts: u32,
}

impl ConfigStore {
    /// Create a store at `path` for a user whose home is `home`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, home: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            home: home.into(),
            prompt_attempts: DEFAULT_PROMPT_ATTEMPTS,
        }
    }

    /// Default store location for a home directory.
    #[must_use]
    pub fn default_path(home: &Path) -> PathBuf {
        home.join(STORE_FILE_NAME)
    }

    /// Set how many times each field is prompted for.
    #[must_use]
    pub fn with_prompt_attempts(mut self, attempts: u32) -> Self {
        self.prompt_attempts = attempts.max(1);
        self
    }

    /// Path of the store file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read raw key/value pairs. A missing file yields an empty map.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read.
    pub fn load(&self) -> Result<BTreeMap<String, String>> {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "No persisted configuration");
            return Ok(BTreeMap::new());
        }
        let content = std::fs::read_to_string(&self.path)?;
        Ok(parse_store(&content))
    }

    /// Resolve every field, prompting for what is missing or invalid, then
    /// persist the merged result.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::Validation`] once a field has failed
    /// validation on every allowed attempt, or when the prompter cannot ask.
    pub fn resolve(&self, prompter: &mut dyn Prompter) -> Result<ProvisioningConfig> {
        let stored = self.load()?;

        let environment_mode = self.resolve_field(
            prompter,
            ConfigField::EnvMode,
            stored.get(KEY_ENV_MODE),
            Some("dev"),
            |v| v.parse::<EnvironmentMode>(),
        )?;

        let repository_url = self.resolve_field(
            prompter,
            ConfigField::RepoUrl,
            stored.get(KEY_REPO_URL),
            None,
            validate_repo_url,
        )?;

        let default_dir = default_install_dir(&self.home, &repository_url)
            .to_string_lossy()
            .into_owned();
        let install_directory = self.resolve_field(
            prompter,
            ConfigField::ProjectDir,
            stored.get(KEY_PROJECT_DIR),
            Some(default_dir.as_str()),
            |v| normalize_install_dir(v, &self.home, &repository_url),
        )?;

        let config = ProvisioningConfig {
            environment_mode,
            repository_url,
            install_directory,
        };
        self.persist(&config)?;

        info!(
            mode = %config.environment_mode,
            repo = %config.repository_url,
            dir = %config.install_directory.display(),
            "Configuration resolved"
        );
        Ok(config)
    }

    fn resolve_field<T>(
        &self,
        prompter: &mut dyn Prompter,
        field: ConfigField,
        stored: Option<&String>,
        default: Option<&str>,
        validate: impl Fn(&str) -> Result<T>,
    ) -> Result<T> {
        if let Some(value) = stored {
            match validate(value) {
                Ok(parsed) => return Ok(parsed),
                Err(e) => warn!(key = field.key(), error = %e, "Ignoring persisted value"),
            }
        }

        let mut last_error = None;
        for attempt in 1..=self.prompt_attempts {
            let raw = prompter.input(field.prompt(), default)?;
            let value = match raw.trim() {
                "" => default.unwrap_or_default(),
                typed => typed,
            };
            match validate(value) {
                Ok(parsed) => return Ok(parsed),
                Err(e) => {
                    debug!(key = field.key(), attempt, error = %e, "Rejected input");
                    ui::print_warning(&e.to_string());
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| ProvisionError::validation(field.key(), "no value")))
    }

    /// Overwrite the store with exactly the three keys.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn persist(&self, config: &ProvisioningConfig) -> Result<()> {
        let content = format!(
            "{KEY_REPO_URL}=\"{}\"\n{KEY_PROJECT_DIR}=\"{}\"\n{KEY_ENV_MODE}=\"{}\"\n",
            escape(&config.repository_url),
            escape(&config.install_directory.to_string_lossy()),
            config.environment_mode,
        );
        write_atomic(&self.path, content.as_bytes())?;
        debug!(path = %self.path.display(), "Persisted configuration");
        Ok(())
    }
}

/// Parse `KEY=value` lines, skipping anything malformed.
#[must_use]
pub fn parse_store(content: &str) -> BTreeMap<String, String> {
    let mut values = BTreeMap::new();
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let Some(caps) = LINE_RE.captures(line) else {
            debug!(line, "Skipping malformed config line");
            continue;
        };
        match unquote(caps[2].trim()) {
            Some(value) => {
                values.insert(caps[1].to_string(), value);
            }
            None => debug!(line, "Skipping config line with unbalanced quotes"),
        }
    }
    values
}

fn unquote(raw: &str) -> Option<String> {
    if let Some(inner) = raw.strip_prefix('"') {
        let inner = inner.strip_suffix('"')?;
        let mut out = String::with_capacity(inner.len());
        let mut chars = inner.chars();
        while let Some(c) = chars.next() {
            if c == '\\' {
                out.push(chars.next()?);
            } else if c == '"' {
                return None;
            } else {
                out.push(c);
            }
        }
        Some(out)
    } else if let Some(inner) = raw.strip_prefix('\'') {
        inner.strip_suffix('\'').map(str::to_string)
    } else if raw.contains(['"', '\'']) {
        None
    } else {
        Some(raw.to_string())
    }
}

fn escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Write a file by renaming a sibling temp file over it.
///
/// # Errors
///
/// Returns an error if the directory cannot be created or the write fails.
pub fn write_atomic(path: &Path, content: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(content)?;
    tmp.as_file().sync_all()?;
    if let Ok(meta) = std::fs::metadata(path) {
        std::fs::set_permissions(tmp.path(), meta.permissions())?;
    }
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Check that a repository URL is non-empty and looks like an SCM remote.
///
/// # Errors
///
/// Returns [`ProvisionError::Validation`] otherwise.
pub fn validate_repo_url(url: &str) -> Result<String> {
    let url = url.trim();
    if url.is_empty() {
        return Err(ProvisionError::validation(KEY_REPO_URL, "must not be empty"));
    }
    if !SCM_URL_RE.is_match(url) {
        return Err(ProvisionError::validation(
            KEY_REPO_URL,
            format!("'{url}' is not an SSH or HTTP(S) repository URL"),
        ));
    }
    if repo_name(url).is_none() {
        return Err(ProvisionError::validation(
            KEY_REPO_URL,
            format!("cannot derive a repository name from '{url}'"),
        ));
    }
    Ok(url.to_string())
}

/// Last path segment of a repository URL without a `.git` suffix.
#[must_use]
pub fn repo_name(url: &str) -> Option<String> {
    let trimmed = url.trim().trim_end_matches('/');
    let segment = trimmed.rsplit(['/', ':']).next()?;
    let name = segment.strip_suffix(".git").unwrap_or(segment);
    (!name.is_empty()).then(|| name.to_string())
}

/// Default checkout location: `<home>/<repo name>`.
#[must_use]
pub fn default_install_dir(home: &Path, url: &str) -> PathBuf {
    home.join(repo_name(url).unwrap_or_else(|| "app".to_string()))
}

/// Validate an install directory, expanding `~` and refusing to install
/// straight into the home directory.
///
/// # Errors
///
/// Returns [`ProvisionError::Validation`] for empty or relative paths.
pub fn normalize_install_dir(raw: &str, home: &Path, url: &str) -> Result<PathBuf> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(ProvisionError::validation(KEY_PROJECT_DIR, "must not be empty"));
    }

    let path = if raw == "~" {
        home.to_path_buf()
    } else if let Some(rest) = raw.strip_prefix("~/") {
        home.join(rest)
    } else {
        PathBuf::from(raw)
    };

    if !path.is_absolute() {
        return Err(ProvisionError::validation(
            KEY_PROJECT_DIR,
            format!("'{raw}' is not an absolute path"),
        ));
    }

    if path == home {
        let substituted = default_install_dir(home, url);
        ui::print_info(&format!(
            "Refusing to install into the home directory, using {}",
            substituted.display()
        ));
        return Ok(substituted);
    }

    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt::{NonInteractive, Scripted};
    use tempfile::tempdir;

    #[test]
    fn test_mode_parsing() {
        assert_eq!("dev".parse::<EnvironmentMode>().unwrap(), EnvironmentMode::Dev);
        assert_eq!(
            " Production ".parse::<EnvironmentMode>().unwrap(),
            EnvironmentMode::Prod
        );
        assert!("staging".parse::<EnvironmentMode>().is_err());
    }

    #[test]
    fn test_repo_name_derivation() {
        assert_eq!(repo_name("git@host:org/My-Repo.git").unwrap(), "My-Repo");
        assert_eq!(repo_name("https://github.com/org/app").unwrap(), "app");
        assert_eq!(repo_name("https://github.com/org/app.git/").unwrap(), "app");
        assert_eq!(repo_name("git@host:solo.git").unwrap(), "solo");
        assert!(repo_name("https://github.com/org/.git").is_none());
    }

    #[test]
    fn test_default_dir_last_segment() {
        let dir = default_install_dir(Path::new("/home/deploy"), "git@host:org/My-Repo.git");
        assert_eq!(dir.file_name().unwrap(), "My-Repo");
        assert_eq!(dir, PathBuf::from("/home/deploy/My-Repo"));
    }

    #[test]
    fn test_repo_url_validation() {
        assert!(validate_repo_url("git@github.com:org/app.git").is_ok());
        assert!(validate_repo_url("https://gitlab.com/org/app.git").is_ok());
        assert!(validate_repo_url("ssh://git@host:2222/org/app.git").is_ok());
        assert!(validate_repo_url("").is_err());
        assert!(validate_repo_url("not a url").is_err());
        assert!(validate_repo_url("ftp://host/app").is_err());
    }

    #[test]
    fn test_home_directory_guard() {
        let home = Path::new("/home/deploy");
        let url = "git@host:org/My-Repo.git";
        assert_eq!(
            normalize_install_dir("/home/deploy", home, url).unwrap(),
            PathBuf::from("/home/deploy/My-Repo")
        );
        assert_eq!(
            normalize_install_dir("/home/deploy/", home, url).unwrap(),
            PathBuf::from("/home/deploy/My-Repo")
        );
        assert_eq!(
            normalize_install_dir("~", home, url).unwrap(),
            PathBuf::from("/home/deploy/My-Repo")
        );
        assert_eq!(
            normalize_install_dir("~/apps/site", home, url).unwrap(),
            PathBuf::from("/home/deploy/apps/site")
        );
        assert_eq!(
            normalize_install_dir("/opt/site", home, url).unwrap(),
            PathBuf::from("/opt/site")
        );
        assert!(normalize_install_dir("relative/dir", home, url).is_err());
        assert!(normalize_install_dir("  ", home, url).is_err());
    }

    #[test]
    fn test_parse_store_is_permissive() {
        let content = r#"
# comment
REPO_URL="git@host:org/app.git"
PROJECT_DIR='/srv/app'
export ENV_MODE=prod
garbage line without equals
BROKEN="unterminated
1BAD=value
"#;
        let values = parse_store(content);
        assert_eq!(values.len(), 3);
        assert_eq!(values[KEY_REPO_URL], "git@host:org/app.git");
        assert_eq!(values[KEY_PROJECT_DIR], "/srv/app");
        assert_eq!(values[KEY_ENV_MODE], "prod");
    }

    #[test]
    fn test_parse_store_unescapes() {
        let values = parse_store(r#"PROJECT_DIR="/srv/with \"quote\"""#);
        assert_eq!(values[KEY_PROJECT_DIR], r#"/srv/with "quote""#);
    }

    #[test]
    fn test_resolve_prompts_and_applies_defaults() {
        let home = tempdir().unwrap();
        let store = ConfigStore::new(home.path().join(STORE_FILE_NAME), home.path());

        // Empty mode -> default dev, URL typed, empty dir -> derived default.
        let mut prompter = Scripted::new(&["", "git@host:org/My-Repo.git", ""]);
        let config = store.resolve(&mut prompter).unwrap();

        assert_eq!(config.environment_mode, EnvironmentMode::Dev);
        assert_eq!(config.repository_url, "git@host:org/My-Repo.git");
        assert_eq!(config.install_directory, home.path().join("My-Repo"));
        assert_eq!(prompter.asked.len(), 3);
    }

    #[test]
    fn test_resolve_reprompts_invalid_input() {
        let home = tempdir().unwrap();
        let store = ConfigStore::new(home.path().join(STORE_FILE_NAME), home.path());

        let mut prompter = Scripted::new(&[
            "staging",
            "prod",
            "nope",
            "https://host/org/app",
            "/srv/app",
        ]);
        let config = store.resolve(&mut prompter).unwrap();

        assert_eq!(config.environment_mode, EnvironmentMode::Prod);
        assert_eq!(config.repository_url, "https://host/org/app");
        assert_eq!(config.install_directory, PathBuf::from("/srv/app"));
    }

    #[test]
    fn test_resolve_fails_after_exhausting_attempts() {
        let home = tempdir().unwrap();
        let store = ConfigStore::new(home.path().join(STORE_FILE_NAME), home.path())
            .with_prompt_attempts(2);

        let mut prompter = Scripted::new(&["dev", "bad url", "also bad"]);
        let err = store.resolve(&mut prompter).unwrap_err();
        assert!(matches!(err, ProvisionError::Validation { ref field, .. } if field == KEY_REPO_URL));
        assert!(!store.path().exists());
    }

    #[test]
    fn test_round_trip_without_prompts() {
        let home = tempdir().unwrap();
        let store = ConfigStore::new(home.path().join(STORE_FILE_NAME), home.path());

        let mut prompter = Scripted::new(&["prod", "git@host:org/app.git", "/opt/app"]);
        let first = store.resolve(&mut prompter).unwrap();

        let reloaded = store.resolve(&mut NonInteractive).unwrap();
        assert_eq!(first, reloaded);

        let persisted = std::fs::read_to_string(store.path()).unwrap();
        assert_eq!(
            persisted,
            "REPO_URL=\"git@host:org/app.git\"\nPROJECT_DIR=\"/opt/app\"\nENV_MODE=\"prod\"\n"
        );
    }

    #[test]
    fn test_invalid_persisted_value_is_reprompted() {
        let home = tempdir().unwrap();
        let path = home.path().join(STORE_FILE_NAME);
        std::fs::write(
            &path,
            "REPO_URL=\"git@host:org/app.git\"\nPROJECT_DIR=\"relative\"\nENV_MODE=\"qa\"\n",
        )
        .unwrap();
        let store = ConfigStore::new(&path, home.path());

        let mut prompter = Scripted::new(&["dev", "/srv/app"]);
        let config = store.resolve(&mut prompter).unwrap();
        assert_eq!(config.environment_mode, EnvironmentMode::Dev);
        assert_eq!(config.install_directory, PathBuf::from("/srv/app"));
        assert_eq!(prompter.asked.len(), 2);
    }

    #[test]
    fn test_persisted_home_dir_is_substituted() {
        let home = tempdir().unwrap();
        let path = home.path().join(STORE_FILE_NAME);
        std::fs::write(
            &path,
            format!(
                "REPO_URL=\"git@host:org/My-Repo.git\"\nPROJECT_DIR=\"{}\"\nENV_MODE=\"dev\"\n",
                home.path().display()
            ),
        )
        .unwrap();
        let store = ConfigStore::new(&path, home.path());

        let config = store.resolve(&mut NonInteractive).unwrap();
        assert_eq!(config.install_directory, home.path().join("My-Repo"));
    }

    #[test]
    fn test_non_interactive_missing_field_fails() {
        let home = tempdir().unwrap();
        let store = ConfigStore::new(home.path().join(STORE_FILE_NAME), home.path());
        assert!(matches!(
            store.resolve(&mut NonInteractive),
            Err(ProvisionError::Validation { .. })
        ));
    }
}
