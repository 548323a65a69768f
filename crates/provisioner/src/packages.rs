//! Per-family package and service commands.

use crate::exec::CommandSpec;
use crate::host::{HostProfile, OsFamily};

/// Tools every provisioned host needs, as (binary, debian package, redhat package).
const BASE_TOOLS: &[(&str, &str, &str)] = &[
    ("git", "git", "git"),
    ("curl", "curl", "curl"),
    ("sshd", "openssh-server", "openssh-server"),
    ("exportfs", "nfs-kernel-server", "nfs-utils"),
    ("update-ca-certificates", "ca-certificates", "ca-certificates"),
];

/// Logical services whose unit names differ between families.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Service {
    /// OpenSSH daemon.
    Ssh,
    /// NFS server.
    Nfs,
    /// Docker engine.
    Docker,
}

/// Maps abstract actions to concrete commands for one host.
#[derive(Debug, Clone)]
pub struct PackageActions {
    family: OsFamily,
    manager: &'static str,
}

impl PackageActions {
    /// Select the package manager for a host.
    #[must_use]
    pub fn for_host(host: &HostProfile) -> Self {
        let manager = match host.family {
            OsFamily::Debian => "apt-get",
            OsFamily::RedHat => {
                if host.id == "fedora" || host.major_version().map_or(true, |v| v >= 8) {
                    "dnf"
                } else {
                    "yum"
                }
            }
        };
        Self {
            family: host.family,
            manager,
        }
    }

    /// Package manager binary.
    #[must_use]
    pub fn manager(&self) -> &'static str {
        self.manager
    }

    /// Refresh package metadata.
    #[must_use]
    pub fn update(&self) -> Vec<CommandSpec> {
        match self.family {
            OsFamily::Debian => vec![CommandSpec::new(self.manager)
                .arg("update")
                .env("DEBIAN_FRONTEND", "noninteractive")],
            OsFamily::RedHat => vec![CommandSpec::new(self.manager).args(["makecache", "-y"])],
        }
    }

    /// Install packages non-interactively.
    #[must_use]
    pub fn install(&self, packages: &[&str]) -> Vec<CommandSpec> {
        if packages.is_empty() {
            return Vec::new();
        }
        let cmd = CommandSpec::new(self.manager)
            .args(["install", "-y"])
            .args(packages.iter().copied());
        let cmd = match self.family {
            OsFamily::Debian => cmd.env("DEBIAN_FRONTEND", "noninteractive"),
            OsFamily::RedHat => cmd,
        };
        vec![cmd]
    }

    /// Enable and start a service.
    #[must_use]
    pub fn enable_service(&self, service: Service) -> Vec<CommandSpec> {
        vec![CommandSpec::new("systemctl").args(["enable", "--now", self.unit(service)])]
    }

    /// Reload a running service's configuration.
    #[must_use]
    pub fn reload_service(&self, service: Service) -> CommandSpec {
        CommandSpec::new("systemctl").args(["reload-or-restart", self.unit(service)])
    }

    /// Systemd unit name of a service on this family.
    #[must_use]
    pub fn unit(&self, service: Service) -> &'static str {
        match (service, self.family) {
            (Service::Ssh, OsFamily::Debian) => "ssh",
            (Service::Ssh, OsFamily::RedHat) => "sshd",
            (Service::Nfs, OsFamily::Debian) => "nfs-kernel-server",
            (Service::Nfs, OsFamily::RedHat) => "nfs-server",
            (Service::Docker, _) => "docker",
        }
    }

    /// Packages for base tools whose binaries are missing.
    #[must_use]
    pub fn missing_base_packages(&self, is_present: impl Fn(&str) -> bool) -> Vec<&'static str> {
        BASE_TOOLS
            .iter()
            .filter(|(binary, _, _)| !is_present(binary))
            .map(|(_, debian, redhat)| match self.family {
                OsFamily::Debian => *debian,
                OsFamily::RedHat => *redhat,
            })
            .collect()
    }

    /// Install Docker Engine via the upstream convenience script.
    #[must_use]
    pub fn install_docker(&self) -> Vec<CommandSpec> {
        let mut cmds = vec![CommandSpec::shell(
            "curl -fsSL https://get.docker.com -o /tmp/get-docker.sh && sh /tmp/get-docker.sh",
        )];
        cmds.extend(self.enable_service(Service::Docker));
        cmds
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host(family: OsFamily, id: &str, version: &str) -> HostProfile {
        HostProfile {
            family,
            id: id.into(),
            version: version.into(),
        }
    }

    #[test]
    fn test_manager_selection() {
        assert_eq!(
            PackageActions::for_host(&host(OsFamily::Debian, "ubuntu", "22.04")).manager(),
            "apt-get"
        );
        assert_eq!(
            PackageActions::for_host(&host(OsFamily::RedHat, "centos", "7")).manager(),
            "yum"
        );
        assert_eq!(
            PackageActions::for_host(&host(OsFamily::RedHat, "rocky", "9.3")).manager(),
            "dnf"
        );
        assert_eq!(
            PackageActions::for_host(&host(OsFamily::RedHat, "fedora", "")).manager(),
            "dnf"
        );
    }

    #[test]
    fn test_install_command() {
        let actions = PackageActions::for_host(&host(OsFamily::Debian, "debian", "12"));
        let cmds = actions.install(&["git", "curl"]);
        assert_eq!(cmds.len(), 1);
        assert_eq!(cmds[0].display(), "apt-get install -y git curl");
        assert!(cmds[0]
            .env
            .contains(&("DEBIAN_FRONTEND".to_string(), "noninteractive".to_string())));
        assert!(actions.install(&[]).is_empty());
    }

    #[test]
    fn test_service_units() {
        let debian = PackageActions::for_host(&host(OsFamily::Debian, "ubuntu", "24.04"));
        let redhat = PackageActions::for_host(&host(OsFamily::RedHat, "rocky", "9"));
        assert_eq!(debian.unit(Service::Ssh), "ssh");
        assert_eq!(redhat.unit(Service::Ssh), "sshd");
        assert_eq!(
            redhat.enable_service(Service::Nfs)[0].display(),
            "systemctl enable --now nfs-server"
        );
    }

    #[test]
    fn test_missing_base_packages() {
        let redhat = PackageActions::for_host(&host(OsFamily::RedHat, "rocky", "9"));
        let missing = redhat.missing_base_packages(|bin| bin != "exportfs");
        assert_eq!(missing, vec!["nfs-utils"]);

        let debian = PackageActions::for_host(&host(OsFamily::Debian, "debian", "12"));
        assert!(debian.missing_base_packages(|_| true).is_empty());
        assert_eq!(debian.missing_base_packages(|_| false).len(), BASE_TOOLS.len());
    }
}
