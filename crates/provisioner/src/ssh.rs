//! SSH daemon hardening.
//!
//! sshd keeps the first value it reads for a directive, and stock Debian and
//! Ubuntu configs pull in `sshd_config.d/*.conf` from their first line. A
//! drop-in from cloud-init can therefore override the main file. Directives
//! are written to a drop-in that sorts ahead of the others as well as to the
//! main file, and the daemon's own view (`sshd -T`) is checked afterwards.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use tracing::{debug, info};

use crate::exec::{CommandRunner, CommandSpec};
use crate::file_editor::Edit;
use crate::packages::{PackageActions, Service};

/// Directives the provisioned host always ends up with.
pub const HARDENED_DIRECTIVES: &[(&str, &str)] =
    &[("PermitRootLogin", "no"), ("PasswordAuthentication", "no")];

/// Drop-in written next to the other included files.
pub const DROP_IN_NAME: &str = "00-provision.conf";

/// Directive lines before the first `Match` block, as (keyword, value).
fn global_directives(content: &str) -> Vec<(&str, String)> {
    content
        .lines()
        .map(str::trim)
        .take_while(|line| !line.starts_with("Match "))
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let keyword = parts.next()?;
            Some((keyword, parts.collect::<Vec<_>>().join(" ")))
        })
        .collect()
}

fn read_optional(path: &Path) -> Result<Option<String>> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
    }
}

/// Files matched by one `Include` pattern, in the order sshd reads them.
///
/// Relative patterns resolve against the directory of `sshd_config`. Only a
/// wildcard in the final path component is expanded.
fn expand_include(sshd_config: &Path, pattern: &str) -> Result<Vec<PathBuf>> {
    let base = sshd_config.parent().unwrap_or_else(|| Path::new("/"));
    let pattern = base.join(pattern);
    let Some(name) = pattern.file_name().map(|n| n.to_string_lossy().into_owned()) else {
        return Ok(Vec::new());
    };
    let Some((prefix, suffix)) = name.split_once('*') else {
        return Ok(vec![pattern]);
    };
    let dir = pattern.parent().unwrap_or(base);
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e).with_context(|| format!("Failed to list {}", dir.display())),
    };
    let mut files: Vec<PathBuf> = entries
        .filter_map(std::result::Result::ok)
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .map(|n| n.to_string_lossy())
                .is_some_and(|n| n.len() >= prefix.len() + suffix.len() && n.starts_with(prefix) && n.ends_with(suffix))
        })
        .collect();
    files.sort();
    Ok(files)
}

/// Value sshd will use for `directive`, following `Include` lines the way
/// the daemon does: first occurrence wins.
///
/// # Errors
///
/// Returns an error if a config file exists but cannot be read.
pub fn effective_value(sshd_config: &Path, directive: &str) -> Result<Option<String>> {
    let Some(content) = read_optional(sshd_config)? else {
        return Ok(None);
    };
    for (keyword, value) in global_directives(&content) {
        if keyword.eq_ignore_ascii_case("Include") {
            for pattern in value.split_whitespace() {
                for file in expand_include(sshd_config, pattern)? {
                    let Some(included) = read_optional(&file)? else {
                        continue;
                    };
                    if let Some((_, v)) = global_directives(&included)
                        .into_iter()
                        .find(|(k, _)| k.eq_ignore_ascii_case(directive))
                    {
                        debug!(file = %file.display(), directive, value = %v, "Directive set by include");
                        return Ok(Some(v));
                    }
                }
            }
        } else if keyword.eq_ignore_ascii_case(directive) {
            return Ok(Some(value));
        }
    }
    Ok(None)
}

/// Drop-in path when the main config includes a `*.conf` directory.
///
/// # Errors
///
/// Returns an error if the config exists but cannot be read.
pub fn drop_in_path(sshd_config: &Path) -> Result<Option<PathBuf>> {
    let Some(content) = read_optional(sshd_config)? else {
        return Ok(None);
    };
    let base = sshd_config.parent().unwrap_or_else(|| Path::new("/"));
    Ok(global_directives(&content)
        .into_iter()
        .filter(|(k, _)| k.eq_ignore_ascii_case("Include"))
        .flat_map(|(_, v)| v.split_whitespace().map(str::to_string).collect::<Vec<_>>())
        .find(|pattern| pattern.ends_with("/*.conf"))
        .and_then(|pattern| base.join(pattern).parent().map(|dir| dir.join(DROP_IN_NAME))))
}

/// Files a directive is written to: the drop-in (when includes are in use)
/// and the main config.
///
/// # Errors
///
/// Returns an error if the config exists but cannot be read.
pub fn edit_targets(sshd_config: &Path) -> Result<Vec<PathBuf>> {
    let mut targets: Vec<PathBuf> = drop_in_path(sshd_config)?.into_iter().collect();
    targets.push(sshd_config.to_path_buf());
    Ok(targets)
}

/// Whether every hardening directive is effective in the config files.
///
/// # Errors
///
/// Returns an error if a config exists but cannot be read.
pub fn is_hardened(sshd_config: &Path) -> Result<bool> {
    for (directive, expected) in HARDENED_DIRECTIVES {
        let current = effective_value(sshd_config, directive)?;
        if !current.is_some_and(|v| v.eq_ignore_ascii_case(expected)) {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Effective daemon settings as reported by `sshd -T`, keyed by lowercase
/// keyword.
///
/// # Errors
///
/// Returns an error if `sshd -T` fails.
pub fn daemon_settings(runner: &dyn CommandRunner) -> Result<BTreeMap<String, String>> {
    let output = runner
        .run_checked(&CommandSpec::new("sshd").arg("-T"))
        .context("sshd -T failed")?;
    Ok(output
        .stdout
        .lines()
        .filter_map(|line| {
            let (key, value) = line.trim().split_once(' ')?;
            Some((key.to_ascii_lowercase(), value.trim().to_string()))
        })
        .collect())
}

/// Fail unless the daemon reports every `expected` directive.
///
/// # Errors
///
/// Returns an error naming the first directive the daemon disagrees on.
pub fn verify_daemon(runner: &dyn CommandRunner, expected: &[(&str, &str)]) -> Result<()> {
    let settings = daemon_settings(runner)?;
    for (directive, value) in expected {
        let actual = settings.get(&directive.to_ascii_lowercase());
        if !actual.is_some_and(|a| a.eq_ignore_ascii_case(value)) {
            bail!(
                "sshd still reports {directive} {}; another included config overrides it",
                actual.map_or("<unset>", String::as_str)
            );
        }
    }
    Ok(())
}

/// Validate the daemon config, then reload the service.
///
/// # Errors
///
/// Returns an error if validation or the reload fails.
pub fn validate_and_reload(runner: &dyn CommandRunner, packages: &PackageActions) -> Result<()> {
    runner
        .run_checked(&CommandSpec::new("sshd").arg("-t"))
        .context("sshd rejected the edited configuration")?;
    runner
        .run_checked(&packages.reload_service(Service::Ssh))
        .context("Failed to reload the SSH service")?;
    info!(unit = packages.unit(Service::Ssh), "SSH service reloaded");
    Ok(())
}

/// Set `PasswordAuthentication` and apply it. Returns whether any file
/// changed; unchanged files skip the reload.
///
/// # Errors
///
/// Returns an error if editing, validation or the reload fails, or when the
/// daemon does not pick the value up.
pub fn set_password_auth(
    mut upsert: impl FnMut(&Path, &str, &str) -> crate::error::Result<Edit>,
    sshd_config: &Path,
    enabled: bool,
    runner: &dyn CommandRunner,
    packages: &PackageActions,
) -> Result<bool> {
    let value = if enabled { "yes" } else { "no" };
    let mut changed = false;
    for target in edit_targets(sshd_config)? {
        let edit = upsert(&target, "PasswordAuthentication", value)
            .with_context(|| format!("Failed to edit {}", target.display()))?;
        changed |= edit != Edit::Unchanged;
    }
    if !changed {
        return Ok(false);
    }
    validate_and_reload(runner, packages)?;
    verify_daemon(runner, &[("PasswordAuthentication", value)])?;
    Ok(true)
}
