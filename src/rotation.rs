//! Network identity rotation.
//!
//! On container platforms a fresh identity comes with a fresh process, so the
//! worker exits and lets the supervisor relaunch it. Where a switch script
//! exists (a VPN client, a proxy reload) the worker runs it and carries on.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::model::Owner;

/// What a rotation achieved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rotation {
    /// New identity in place; keep working with fresh counters.
    Rotated,
    /// Only a process restart can provide a new identity.
    Restart,
}

#[async_trait]
pub trait IdentityRotator: Send + Sync {
    async fn rotate(&self) -> Result<Rotation>;
}

/// Always asks for a restart.
pub struct ProcessRestart;

#[async_trait]
impl IdentityRotator for ProcessRestart {
    async fn rotate(&self) -> Result<Rotation> {
        Ok(Rotation::Restart)
    }
}

/// Runs an external executable to switch identity.
pub struct CommandRotator {
    command: PathBuf,
    owner: Owner,
}

impl CommandRotator {
    pub fn new(command: impl Into<PathBuf>, owner: Owner) -> Self {
        Self {
            command: command.into(),
            owner,
        }
    }
}

/// Relative paths resolve against the process working directory; bare
/// names go through PATH.
fn resolve(command: &Path) -> Result<PathBuf> {
    if command.is_relative() && command.components().count() > 1 {
        Ok(std::env::current_dir()?.join(command))
    } else {
        Ok(command.to_path_buf())
    }
}

#[async_trait]
impl IdentityRotator for CommandRotator {
    async fn rotate(&self) -> Result<Rotation> {
        let command = resolve(&self.command)?;
        debug!(command = %command.display(), "running rotation command");

        let status = Command::new(&command)
            .env("BIOCRAWL_HOSTNAME", &self.owner.hostname)
            .env("BIOCRAWL_INSTANCE_ID", self.owner.instance_id.to_string())
            .status()
            .await
            .map_err(|e| Error::Rotation(format!("cannot run {}: {e}", command.display())))?;

        if status.success() {
            info!(command = %command.display(), "network identity rotated");
            Ok(Rotation::Rotated)
        } else {
            Err(Error::Rotation(format!(
                "{} exited with status {}",
                command.display(),
                status.code().unwrap_or(-1)
            )))
        }
    }
}

/// Ask an echo service for the current public address. Best effort.
pub async fn egress_ip(url: &str, timeout: Duration) -> Option<String> {
    let client = reqwest::Client::builder().timeout(timeout).build().ok()?;
    match client.get(url).send().await {
        Ok(resp) if resp.status().is_success() => {
            resp.text().await.ok().map(|ip| ip.trim().to_string())
        }
        Ok(resp) => {
            warn!(status = %resp.status(), "egress IP lookup failed");
            None
        }
        Err(e) => {
            warn!(error = %e, "egress IP lookup failed");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn process_restart_never_rotates_in_place() {
        assert_eq!(ProcessRestart.rotate().await.unwrap(), Rotation::Restart);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn command_exit_status_decides_rotation() {
        let ok = CommandRotator::new("true", Owner::new("host-a"));
        assert_eq!(ok.rotate().await.unwrap(), Rotation::Rotated);

        let failing = CommandRotator::new("false", Owner::new("host-a"));
        assert!(matches!(failing.rotate().await, Err(Error::Rotation(_))));
    }

    #[tokio::test]
    async fn missing_command_is_a_rotation_error() {
        let missing = CommandRotator::new("./no/such/rotate.sh", Owner::new("host-a"));
        assert!(matches!(missing.rotate().await, Err(Error::Rotation(_))));
    }
}
