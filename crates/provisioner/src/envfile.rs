//! Application `.env` materialization.
//!
//! The generated file starts as a copy of `.env.example` from the checkout.
//! Placeholder secrets are replaced once; later runs keep whatever secrets
//! the file already holds and only re-apply the mode-dependent flags.

use std::path::{Path, PathBuf};

use rand::distributions::Alphanumeric;
use rand::Rng;
use tracing::{debug, info};

use crate::config::{write_atomic, EnvironmentMode, ProvisioningConfig};
use crate::error::{ProvisionError, Result};
use crate::prompt::Prompter;

/// Length of generated secrets.
pub const GENERATED_SECRET_LEN: usize = 32;

const PLACEHOLDER_MARKERS: &[&str] = &["change_me", "changeme", "your_"];

/// A `KEY=value` file that keeps comments and ordering intact.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvFile {
    lines: Vec<String>,
}

impl EnvFile {
    /// Parse file content.
    #[must_use]
    pub fn parse(content: &str) -> Self {
        Self {
            lines: content.lines().map(str::to_string).collect(),
        }
    }

    /// Read a file from disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read.
    pub fn load(path: &Path) -> Result<Self> {
        Ok(Self::parse(&std::fs::read_to_string(path)?))
    }

    /// Write the file atomically.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save(&self, path: &Path) -> Result<()> {
        write_atomic(path, self.render().as_bytes())
    }

    /// Serialized content, newline-terminated.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = self.lines.join("\n");
        out.push('\n');
        out
    }

    /// Keys in file order.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.lines
            .iter()
            .filter_map(|line| split_assignment(line).map(|(k, _)| k.to_string()))
            .collect()
    }

    /// Unquoted value of a key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<String> {
        self.lines
            .iter()
            .filter_map(|line| split_assignment(line))
            .find(|(k, _)| *k == key)
            .map(|(_, v)| unquote(v).to_string())
    }

    /// Whether a key is assigned.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Set a key, rewriting its first assignment or appending one.
    /// Returns whether the content changed.
    pub fn set(&mut self, key: &str, value: &str) -> bool {
        let desired = format!("{key}={value}");
        let existing = self
            .lines
            .iter()
            .position(|line| split_assignment(line).is_some_and(|(k, _)| k == key));
        match existing {
            Some(idx) if self.lines[idx] == desired => false,
            Some(idx) => {
                self.lines[idx] = desired;
                true
            }
            None => {
                self.lines.push(desired);
                true
            }
        }
    }
}

fn split_assignment(line: &str) -> Option<(&str, &str)> {
    let trimmed = line.trim_start();
    if trimmed.starts_with('#') {
        return None;
    }
    let trimmed = trimmed.strip_prefix("export ").unwrap_or(trimmed);
    let (key, value) = trimmed.split_once('=')?;
    let key = key.trim();
    let valid = !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !key.starts_with(|c: char| c.is_ascii_digit());
    valid.then_some((key, value.trim()))
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if let Some(inner) = value
            .strip_prefix(quote)
            .and_then(|v| v.strip_suffix(quote))
        {
            return inner;
        }
    }
    value
}

/// Whether a key holds a credential.
#[must_use]
pub fn is_secret_key(key: &str) -> bool {
    let key = key.to_ascii_uppercase();
    key.contains("PASSWORD") || key.contains("SECRET") || key.contains("TOKEN") || key.ends_with("_KEY")
}

/// Whether a value is a template placeholder rather than a real secret.
#[must_use]
pub fn is_placeholder(value: &str) -> bool {
    let lowered = value.trim().to_ascii_lowercase();
    lowered.is_empty() || PLACEHOLDER_MARKERS.iter().any(|m| lowered.contains(m))
}

/// Random alphanumeric secret.
#[must_use]
pub fn generate_secret() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(GENERATED_SECRET_LEN)
        .map(char::from)
        .collect()
}

/// Flags that depend on the environment mode.
#[must_use]
pub fn mode_flags(mode: EnvironmentMode, site_host: &str) -> Vec<(&'static str, String)> {
    match mode {
        EnvironmentMode::Dev => vec![
            ("DEBUG", "True".to_string()),
            ("SESSION_COOKIE_SECURE", "False".to_string()),
            ("CSRF_COOKIE_SECURE", "False".to_string()),
            ("APP_ENV", "development".to_string()),
            ("SITE_URL", format!("http://{site_host}")),
        ],
        EnvironmentMode::Prod => vec![
            ("DEBUG", "False".to_string()),
            ("SESSION_COOKIE_SECURE", "True".to_string()),
            ("CSRF_COOKIE_SECURE", "True".to_string()),
            ("APP_ENV", "production".to_string()),
            ("SITE_URL", format!("https://{site_host}")),
        ],
    }
}

/// What [`materialize`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Materialized {
    /// Path of the generated file.
    pub path: PathBuf,
    /// Whether the file was created from the template on this run.
    pub created: bool,
    /// Whether the file was (re)written on this run.
    pub written: bool,
    /// Secret keys that were filled in.
    pub filled_secrets: Vec<String>,
    /// The file as written.
    pub env: EnvFile,
}

/// Create or refresh `<install dir>/.env`.
///
/// # Errors
///
/// Returns a validation error when neither `.env` nor `.env.example`
/// exists, or when a dev secret cannot be obtained from the prompter.
pub fn materialize(
    config: &ProvisioningConfig,
    prompter: &mut dyn Prompter,
    site_host: &str,
) -> Result<Materialized> {
    let path = config.env_file();
    let (mut env, created) = if path.exists() {
        debug!(path = %path.display(), "Keeping existing environment file");
        (EnvFile::load(&path)?, false)
    } else {
        let template = config.env_template();
        if !template.exists() {
            return Err(ProvisionError::validation(
                ".env.example",
                format!("template not found at {}", template.display()),
            ));
        }
        info!(template = %template.display(), "Creating environment file from template");
        (EnvFile::load(&template)?, true)
    };

    let mut filled_secrets = Vec::new();
    if created {
        for key in env.keys() {
            let current = env.get(&key).unwrap_or_default();
            if !is_secret_key(&key) || !is_placeholder(&current) {
                continue;
            }
            let value = secret_value(config.environment_mode, &key, prompter)?;
            env.set(&key, &value);
            filled_secrets.push(key);
        }
    }

    let mut changed = created;
    for (key, value) in mode_flags(config.environment_mode, site_host) {
        if env.contains(key) {
            changed |= env.set(key, &value);
        }
    }

    if changed {
        env.save(&path)?;
        info!(path = %path.display(), secrets = filled_secrets.len(), "Wrote environment file");
    }

    Ok(Materialized {
        path,
        created,
        written: changed,
        filled_secrets,
        env,
    })
}

fn secret_value(mode: EnvironmentMode, key: &str, prompter: &mut dyn Prompter) -> Result<String> {
    match mode {
        EnvironmentMode::Prod => Ok(generate_secret()),
        EnvironmentMode::Dev => {
            let default = format!("dev_{}", key.to_ascii_lowercase());
            if !prompter.is_interactive() {
                return Ok(default);
            }
            let answer = prompter.input(&format!("Value for {key}"), Some(&default))?;
            let answer = answer.trim();
            Ok(if answer.is_empty() {
                default
            } else {
                answer.to_string()
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt::{NonInteractive, Scripted};
    use tempfile::tempdir;

    const TEMPLATE: &str = "\
# Database
MYSQL_ROOT_PASSWORD=change_me
MYSQL_REPLICATION_USER=replicator
MYSQL_REPLICATION_PASSWORD=
DJANGO_SECRET_KEY=your_secret_key_here
API_TOKEN=\"changeme\"
DEBUG=True
SITE_URL=http://localhost
MYSQL_DATABASE=app
";

    fn config(dir: &Path, mode: EnvironmentMode) -> ProvisioningConfig {
        ProvisioningConfig {
            environment_mode: mode,
            repository_url: "git@github.com:org/app.git".into(),
            install_directory: dir.to_path_buf(),
        }
    }

    #[test]
    fn test_secret_and_placeholder_rules() {
        assert!(is_secret_key("MYSQL_ROOT_PASSWORD"));
        assert!(is_secret_key("DJANGO_SECRET_KEY"));
        assert!(is_secret_key("STRIPE_KEY"));
        assert!(is_secret_key("GITHUB_TOKEN"));
        assert!(!is_secret_key("MYSQL_DATABASE"));
        assert!(!is_secret_key("KEYBOARD"));

        assert!(is_placeholder(""));
        assert!(is_placeholder("CHANGE_ME"));
        assert!(is_placeholder("your_password"));
        assert!(!is_placeholder("s3cr3t"));
    }

    #[test]
    fn test_get_set_preserve_layout() {
        let mut env = EnvFile::parse(TEMPLATE);
        assert_eq!(env.get("API_TOKEN").as_deref(), Some("changeme"));
        assert_eq!(env.get("MISSING"), None);
        assert!(env.set("MYSQL_DATABASE", "prod_db"));
        assert!(!env.set("MYSQL_DATABASE", "prod_db"));
        assert!(env.set("NEW_KEY", "1"));

        let rendered = env.render();
        assert!(rendered.starts_with("# Database\n"));
        assert!(rendered.contains("\nMYSQL_DATABASE=prod_db\n"));
        assert!(rendered.ends_with("NEW_KEY=1\n"));
    }

    #[test]
    fn test_prod_generates_secrets_and_flags() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join(".env.example"), TEMPLATE).unwrap();
        let cfg = config(dir.path(), EnvironmentMode::Prod);

        let result = materialize(&cfg, &mut NonInteractive, "app.example.com").unwrap();

        assert!(result.created);
        assert_eq!(result.filled_secrets.len(), 4);
        let env = EnvFile::load(&cfg.env_file()).unwrap();
        let root = env.get("MYSQL_ROOT_PASSWORD").unwrap();
        assert_eq!(root.len(), GENERATED_SECRET_LEN);
        assert!(root.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(root, env.get("MYSQL_REPLICATION_PASSWORD").unwrap());
        assert_eq!(env.get("MYSQL_REPLICATION_USER").as_deref(), Some("replicator"));
        assert_eq!(env.get("DEBUG").as_deref(), Some("False"));
        assert_eq!(env.get("SITE_URL").as_deref(), Some("https://app.example.com"));
        // Flags absent from the template are not introduced.
        assert!(!env.contains("APP_ENV"));
    }

    #[test]
    fn test_dev_prompts_with_default() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join(".env.example"), "MYSQL_ROOT_PASSWORD=\nDB_PASSWORD=\n").unwrap();
        let cfg = config(dir.path(), EnvironmentMode::Dev);
        let mut prompter = Scripted::new(&["rootpw", ""]);

        let result = materialize(&cfg, &mut prompter, "devbox").unwrap();

        assert_eq!(prompter.asked.len(), 2);
        assert_eq!(result.env.get("MYSQL_ROOT_PASSWORD").as_deref(), Some("rootpw"));
        assert_eq!(result.env.get("DB_PASSWORD").as_deref(), Some("dev_db_password"));
    }

    #[test]
    fn test_existing_env_keeps_secrets() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join(".env.example"), TEMPLATE).unwrap();
        std::fs::write(
            dir.path().join(".env"),
            "MYSQL_ROOT_PASSWORD=already-set\nAPI_TOKEN=changeme\nDEBUG=True\n",
        )
        .unwrap();
        let cfg = config(dir.path(), EnvironmentMode::Prod);

        let result = materialize(&cfg, &mut NonInteractive, "host").unwrap();

        assert!(!result.created);
        assert!(result.written);
        assert!(result.filled_secrets.is_empty());
        let content = std::fs::read_to_string(cfg.env_file()).unwrap();
        assert_eq!(
            content,
            "MYSQL_ROOT_PASSWORD=already-set\nAPI_TOKEN=changeme\nDEBUG=False\n"
        );

        let again = materialize(&cfg, &mut NonInteractive, "host").unwrap();
        assert!(!again.written);
    }

    #[test]
    fn test_missing_template_is_validation_error() {
        let dir = tempdir().unwrap();
        let cfg = config(dir.path(), EnvironmentMode::Dev);
        let err = materialize(&cfg, &mut NonInteractive, "host").unwrap_err();
        assert!(matches!(err, ProvisionError::Validation { .. }));
    }
}
