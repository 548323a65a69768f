//! Idempotent directive edits for line-oriented config files.
//!
//! A target file is treated as a mapping from directive name to directive
//! line. [`FileEditor::upsert`] makes directive `D` read `D V` whether it was
//! absent, commented out or set to something else, and leaves the file
//! byte-identical when called again with the same arguments.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use regex::Regex;
use tracing::{debug, info};

use crate::config::write_atomic;
use crate::error::Result;

/// Outcome of an upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edit {
    /// An existing (possibly commented) line was rewritten.
    Replaced,
    /// The directive was appended.
    Appended,
    /// The file already had the desired line.
    Unchanged,
}

/// Applies directive upserts and backs up privileged files before their
/// first edit.
///
/// One editor is meant to live for one provisioning run; every run backs up
/// again.
#[derive(Debug)]
pub struct FileEditor {
    privileged_roots: Vec<PathBuf>,
    backed_up: HashSet<PathBuf>,
}

impl Default for FileEditor {
    fn default() -> Self {
        Self::new()
    }
}

impl FileEditor {
    /// Editor that backs up files under `/etc`.
    #[must_use]
    pub fn new() -> Self {
        Self::with_privileged_roots(vec![PathBuf::from("/etc")])
    }

    /// Editor that backs up files under the given roots.
    #[must_use]
    pub fn with_privileged_roots(roots: Vec<PathBuf>) -> Self {
        Self {
            privileged_roots: roots,
            backed_up: HashSet::new(),
        }
    }

    /// Ensure `directive value` is the effective line for `directive`.
    ///
    /// The first line matching `^\s*#?\s*<directive>(\s|$)` is rewritten;
    /// otherwise the line is appended (before the first `Match` block, if
    /// any). The file is created if missing.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, backed up or written.
    pub fn upsert(&mut self, path: &Path, directive: &str, value: &str) -> Result<Edit> {
        let existing = match std::fs::read_to_string(path) {
            Ok(content) => Some(content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };

        if existing.is_some() {
            self.backup_once(path)?;
        }

        let original = existing.unwrap_or_default();
        let (updated, edit) = upsert_content(&original, directive, value);
        if edit == Edit::Unchanged {
            debug!(path = %path.display(), directive, "Directive already set");
            return Ok(edit);
        }

        write_atomic(path, updated.as_bytes())?;
        info!(path = %path.display(), directive, value, ?edit, "Updated directive");
        Ok(edit)
    }

    fn backup_once(&mut self, path: &Path) -> Result<()> {
        if !self.privileged_roots.iter().any(|root| path.starts_with(root)) {
            return Ok(());
        }
        if !self.backed_up.insert(path.to_path_buf()) {
            return Ok(());
        }
        let backup = backup_path(path);
        std::fs::copy(path, &backup)?;
        info!(path = %path.display(), backup = %backup.display(), "Backed up file");
        Ok(())
    }
}

/// `<file>.bak.<YYYYmmddHHMMSS>` next to the original.
fn backup_path(path: &Path) -> PathBuf {
    let stamp = chrono::Local::now().format("%Y%m%d%H%M%S");
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(format!(".bak.{stamp}"));
    path.with_file_name(name)
}

fn directive_regex(directive: &str) -> Regex {
    Regex::new(&format!(r"^\s*#?\s*{}(?:\s|$)", regex::escape(directive)))
        .expect("escaped directive is a valid regex")
}

/// Pure form of [`FileEditor::upsert`].
#[must_use]
pub fn upsert_content(content: &str, directive: &str, value: &str) -> (String, Edit) {
    let pattern = directive_regex(directive);
    let desired = format!("{directive} {value}");

    let mut lines: Vec<&str> = content.lines().collect();
    let global = global_section_len(&lines);
    let edit = if let Some(idx) = lines[..global].iter().position(|line| pattern.is_match(line)) {
        if lines[idx] == desired {
            return (content.to_string(), Edit::Unchanged);
        }
        lines[idx] = &desired;
        Edit::Replaced
    } else {
        lines.insert(global, &desired);
        Edit::Appended
    };

    let mut out = lines.join("\n");
    out.push('\n');
    (out, edit)
}

/// Lines before the first sshd-style `Match` block. Directives after it are
/// conditional and never count as the global setting.
fn global_section_len(lines: &[&str]) -> usize {
    lines
        .iter()
        .position(|line| line.trim_start().starts_with("Match "))
        .unwrap_or(lines.len())
}

/// Effective value of a directive: the first uncommented occurrence ahead
/// of any `Match` block.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read.
pub fn directive_value(path: &Path, directive: &str) -> Result<Option<String>> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let pattern = directive_regex(directive);
    let lines: Vec<&str> = content.lines().collect();
    Ok(lines[..global_section_len(&lines)]
        .iter()
        .filter(|line| !line.trim_start().starts_with('#'))
        .find(|line| pattern.is_match(line))
        .map(|line| line.trim()[directive.len()..].trim().to_string()))
}
