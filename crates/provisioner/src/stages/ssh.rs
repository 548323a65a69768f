//! SSH hardening stage.

use anyhow::{Context, Result};
use async_trait::async_trait;

use crate::context::ProvisionContext;
use crate::pipeline::Stage;
use crate::ssh::{edit_targets, is_hardened, validate_and_reload, verify_daemon, HARDENED_DIRECTIVES};

/// Disable root and password logins.
pub struct HardenSshStage;

#[async_trait]
impl Stage for HardenSshStage {
    fn name(&self) -> &str {
        "Harden SSH"
    }

    async fn is_satisfied(&self, ctx: &ProvisionContext) -> Result<bool> {
        if !is_hardened(&ctx.settings.sshd_config)? {
            return Ok(false);
        }
        Ok(verify_daemon(ctx.runner.as_ref(), HARDENED_DIRECTIVES).is_ok())
    }

    async fn run(&self, ctx: &ProvisionContext) -> Result<()> {
        for path in edit_targets(&ctx.settings.sshd_config)? {
            for (directive, value) in HARDENED_DIRECTIVES {
                ctx.upsert(&path, directive, value)
                    .with_context(|| format!("Failed to set {directive} in {}", path.display()))?;
            }
        }
        validate_and_reload(ctx.runner.as_ref(), &ctx.packages)?;
        verify_daemon(ctx.runner.as_ref(), HARDENED_DIRECTIVES)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::context::testing::context_in;
    use crate::exec::fake::ScriptedRunner;
    use tempfile::tempdir;

    const DAEMON_HARDENED: &str = "permitrootlogin no\npasswordauthentication no\n";

    #[tokio::test]
    async fn test_hardening_is_idempotent() {
        let dir = tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new().reply("sshd -T", 0, DAEMON_HARDENED));
        let ctx = context_in(dir.path(), runner.clone());
        std::fs::write(
            &ctx.settings.sshd_config,
            "#PermitRootLogin yes\nPasswordAuthentication yes\nMatch User sftp\n  ChrootDirectory /srv\n",
        )
        .unwrap();

        assert!(!HardenSshStage.is_satisfied(&ctx).await.unwrap());
        HardenSshStage.run(&ctx).await.unwrap();

        let content = std::fs::read_to_string(&ctx.settings.sshd_config).unwrap();
        assert_eq!(
            content,
            "PermitRootLogin no\nPasswordAuthentication no\nMatch User sftp\n  ChrootDirectory /srv\n"
        );
        assert_eq!(
            runner.calls(),
            vec!["sshd -t", "systemctl reload-or-restart ssh", "sshd -T"]
        );
        assert!(HardenSshStage.is_satisfied(&ctx).await.unwrap());
    }

    #[tokio::test]
    async fn test_match_only_directive_gets_global_line() {
        let dir = tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new().reply("sshd -T", 0, DAEMON_HARDENED));
        let ctx = context_in(dir.path(), runner);
        std::fs::write(
            &ctx.settings.sshd_config,
            "PermitRootLogin no\nMatch Address 10.0.0.0/8\n    PasswordAuthentication no\n",
        )
        .unwrap();

        assert!(!HardenSshStage.is_satisfied(&ctx).await.unwrap());
        HardenSshStage.run(&ctx).await.unwrap();

        let content = std::fs::read_to_string(&ctx.settings.sshd_config).unwrap();
        assert_eq!(
            content,
            "PermitRootLogin no\nPasswordAuthentication no\nMatch Address 10.0.0.0/8\n    PasswordAuthentication no\n"
        );
    }

    #[tokio::test]
    async fn test_cloud_init_drop_in_is_overridden() {
        let dir = tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new().reply("sshd -T", 0, DAEMON_HARDENED));
        let ctx = context_in(dir.path(), runner);
        let drop_ins = dir.path().join("sshd_config.d");
        std::fs::create_dir_all(&drop_ins).unwrap();
        std::fs::write(drop_ins.join("50-cloud-init.conf"), "PasswordAuthentication yes\n").unwrap();
        std::fs::write(
            &ctx.settings.sshd_config,
            "Include sshd_config.d/*.conf\nPermitRootLogin no\nPasswordAuthentication no\n",
        )
        .unwrap();

        assert!(!HardenSshStage.is_satisfied(&ctx).await.unwrap());
        HardenSshStage.run(&ctx).await.unwrap();

        assert_eq!(
            std::fs::read_to_string(drop_ins.join("00-provision.conf")).unwrap(),
            "PermitRootLogin no\nPasswordAuthentication no\n"
        );
        assert!(HardenSshStage.is_satisfied(&ctx).await.unwrap());
    }

    #[tokio::test]
    async fn test_daemon_disagreement_fails_the_stage() {
        let dir = tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new().reply(
            "sshd -T",
            0,
            "permitrootlogin no\npasswordauthentication yes\n",
        ));
        let ctx = context_in(dir.path(), runner);
        std::fs::write(&ctx.settings.sshd_config, "PasswordAuthentication yes\n").unwrap();

        let err = HardenSshStage.run(&ctx).await.unwrap_err();
        assert!(err.to_string().contains("sshd still reports PasswordAuthentication yes"));
        assert!(!HardenSshStage.is_satisfied(&ctx).await.unwrap());
    }
}
