//! Backup wire dispatch and backup-target resolution.

use crate::config::ManagerConfig;
use crate::controller::Controller;
use crate::error::{Result, VolplaneError};
use crate::types::BackupInfo;
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;

/// Backup operations bound to one controller.
pub struct BackupOps {
    ctrl: Arc<Controller>,
}

impl BackupOps {
    pub(crate) fn new(ctrl: Arc<Controller>) -> Self {
        Self { ctrl }
    }

    /// Back up a snapshot to the given target and return the backup URL.
    ///
    /// The in-flight record is stored after the wire call returns; the
    /// handle mutex is never held across the external process.
    pub async fn create(&self, snapshot: &str, target: &str) -> Result<String> {
        let out = self.ctrl.engine(&["backup", "create", snapshot, "--dest", target]).await?;
        let url = out.trim().to_string();

        let mut current = self.ctrl.current_backup.lock().await;
        *current = Some(BackupInfo {
            url: url.clone(),
            volume_name: self.ctrl.name().to_string(),
            snapshot_name: snapshot.to_string(),
            ..Default::default()
        });
        Ok(url)
    }

    /// The most recent backup started through this handle, if any.
    pub async fn latest(&self) -> Option<BackupInfo> {
        self.ctrl.current_backup.lock().await.clone()
    }

    /// Restore a backup into this controller's volume.
    pub async fn restore(&self, url: &str) -> Result<()> {
        self.ctrl.engine(&["backup", "restore", url]).await?;
        Ok(())
    }
}

/// Resolves backup URLs against a backup target.
#[async_trait]
pub trait BackupCatalog: Send + Sync {
    /// Look up one backup record. `Ok(None)` means the store answered and
    /// the backup does not exist.
    async fn get(&self, backup_url: &str) -> anyhow::Result<Option<BackupInfo>>;
}

/// Catalog backed by the engine CLI (`backup inspect <url>`).
pub struct EngineBackupCatalog {
    engine_binary: PathBuf,
    engine_timeout: Duration,
}

impl EngineBackupCatalog {
    pub fn new(config: &ManagerConfig) -> Self {
        Self {
            engine_binary: config.engine_binary.clone(),
            engine_timeout: config.engine_timeout,
        }
    }
}

#[async_trait]
impl BackupCatalog for EngineBackupCatalog {
    async fn get(&self, backup_url: &str) -> anyhow::Result<Option<BackupInfo>> {
        let mut cmd = Command::new(&self.engine_binary);
        cmd.args(["backup", "inspect", backup_url])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.engine_timeout, cmd.output())
            .await
            .map_err(|_| anyhow::anyhow!("backup inspect '{}' timed out", backup_url))??;

        if !output.status.success() {
            return Err(anyhow::anyhow!(
                "backup inspect '{}' exited with {}: {}",
                backup_url,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        if stdout.trim().is_empty() {
            return Ok(None);
        }

        let info: BackupInfo = serde_json::from_str(stdout.trim()).map_err(|e| {
            VolplaneError::Parse {
                reason: format!("cannot decode backup record `{}`: {}", stdout.trim(), e),
            }
        })?;
        Ok(Some(info))
    }
}
