//! Host OS detection.
//!
//! Detection runs once, before any mutating stage, and the resulting
//! [`HostProfile`] is read-only for the rest of the run.

use std::collections::HashMap;
use std::path::Path;

use serde::Serialize;
use tracing::{debug, info};

use crate::error::{ProvisionError, Result};

/// Distribution family, which decides package manager and service names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OsFamily {
    /// Debian, Ubuntu and derivatives (apt).
    Debian,
    /// RHEL, CentOS, Fedora, Rocky, Alma, Amazon Linux (dnf/yum).
    RedHat,
}

impl std::fmt::Display for OsFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Debian => write!(f, "debian"),
            Self::RedHat => write!(f, "redhat"),
        }
    }
}

impl OsFamily {
    fn from_id(id: &str) -> Option<Self> {
        match id {
            "debian" | "ubuntu" | "raspbian" | "linuxmint" | "pop" | "elementary" | "kali" => {
                Some(Self::Debian)
            }
            "rhel" | "centos" | "fedora" | "rocky" | "almalinux" | "amzn" | "ol" | "scientific" => {
                Some(Self::RedHat)
            }
            _ => None,
        }
    }
}

/// Immutable description of the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostProfile {
    /// Distribution family.
    pub family: OsFamily,
    /// Distribution id (`ubuntu`, `rocky`, ...).
    pub id: String,
    /// Version string (`22.04`, `9.3`, ...). May be empty on rolling releases.
    pub version: String,
}

impl HostProfile {
    /// Detect the running host.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::UnsupportedPlatform`] if no release metadata
    /// is recognised.
    pub fn detect() -> Result<Self> {
        Self::detect_from(Path::new("/"))
    }

    /// Detect a host whose filesystem is rooted at `root`.
    ///
    /// Reads `etc/os-release`, then falls back to `etc/redhat-release` and
    /// `etc/debian_version`.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::UnsupportedPlatform`] if no release metadata
    /// is recognised.
    pub fn detect_from(root: &Path) -> Result<Self> {
        let etc = root.join("etc");

        if let Ok(content) = std::fs::read_to_string(etc.join("os-release")) {
            if let Some(profile) = Self::from_os_release(&content) {
                info!(family = %profile.family, id = %profile.id, version = %profile.version, "Detected host");
                return Ok(profile);
            }
            debug!("os-release present but not recognised");
        }

        if let Ok(content) = std::fs::read_to_string(etc.join("redhat-release")) {
            let profile = Self {
                family: OsFamily::RedHat,
                id: "rhel".to_string(),
                version: first_version_token(&content).unwrap_or_default(),
            };
            info!(version = %profile.version, "Detected RedHat family from redhat-release");
            return Ok(profile);
        }

        if let Ok(content) = std::fs::read_to_string(etc.join("debian_version")) {
            let profile = Self {
                family: OsFamily::Debian,
                id: "debian".to_string(),
                version: content.trim().to_string(),
            };
            info!(version = %profile.version, "Detected Debian family from debian_version");
            return Ok(profile);
        }

        Err(ProvisionError::UnsupportedPlatform(format!(
            "no recognised release metadata under {}",
            etc.display()
        )))
    }

    /// Build a profile from `os-release` content, matching `ID` first and
    /// then each `ID_LIKE` entry.
    #[must_use]
    pub fn from_os_release(content: &str) -> Option<Self> {
        let fields = parse_os_release(content);
        let id = fields.get("ID").map(|s| s.to_lowercase())?;
        let family = OsFamily::from_id(&id).or_else(|| {
            fields
                .get("ID_LIKE")
                .into_iter()
                .flat_map(|like| like.split_whitespace())
                .find_map(|candidate| OsFamily::from_id(&candidate.to_lowercase()))
        })?;
        Some(Self {
            family,
            id,
            version: fields.get("VERSION_ID").cloned().unwrap_or_default(),
        })
    }

    /// Major version number, if the version string starts with one.
    #[must_use]
    pub fn major_version(&self) -> Option<u32> {
        self.version.split('.').next()?.parse().ok()
    }
}

impl std::fmt::Display for HostProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.version.is_empty() {
            write!(f, "{} ({})", self.id, self.family)
        } else {
            write!(f, "{} {} ({})", self.id, self.version, self.family)
        }
    }
}

fn parse_os_release(content: &str) -> HashMap<String, String> {
    content
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            if line.starts_with('#') {
                return None;
            }
            let (key, value) = line.split_once('=')?;
            let value = value.trim().trim_matches(|c| c == '"' || c == '\'');
            Some((key.trim().to_string(), value.to_string()))
        })
        .collect()
}

fn first_version_token(content: &str) -> Option<String> {
    content
        .split_whitespace()
        .find(|tok| tok.chars().next().is_some_and(|c| c.is_ascii_digit()))
        .map(str::to_string)
}
