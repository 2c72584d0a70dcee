//! Controller process handle.
//!
//! A [`Controller`] wraps one running controller process, addressed by URL,
//! and drives it through the engine CLI binary:
//!
//! ```text
//! <engine> --url <controller-url> ls
//! <engine> --url <controller-url> add <address>
//! <engine> --url <controller-url> rm <address>
//! <engine> --url <controller-url> info
//! ```
//!
//! Handles are handed out by the [`registry`], which guarantees at most one
//! live handle per volume so serialized handle state (the in-flight backup
//! record) is never duplicated.

pub mod backup;
pub mod registry;
pub mod snapshot;

pub use backup::{BackupCatalog, BackupOps, EngineBackupCatalog};
pub use registry::ControllerRegistry;
pub use snapshot::SnapshotOps;

use crate::config::ManagerConfig;
use crate::error::{Result, VolplaneError};
use crate::types::{BackupInfo, InstanceInfo, ReplicaInfo, ReplicaMode};
use serde::Deserialize;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::warn;

/// JSON payload of the engine `info` subcommand.
#[derive(Debug, Deserialize)]
struct EngineVolumeInfo {
    #[allow(dead_code)]
    name: String,
    #[serde(rename = "replicaCount")]
    #[allow(dead_code)]
    replica_count: i64,
    endpoint: String,
}

/// Handle to one running controller process.
pub struct Controller {
    name: String,
    url: String,
    engine_binary: PathBuf,
    engine_timeout: Duration,

    /// In-flight backup record; mutations go through this mutex. The mutex
    /// serializes the record only, never the external controller process.
    pub(crate) current_backup: Mutex<Option<BackupInfo>>,
}

impl Controller {
    pub(crate) fn new(name: String, url: String, config: &ManagerConfig) -> Self {
        Self {
            name,
            url,
            engine_binary: config.engine_binary.clone(),
            engine_timeout: config.engine_timeout,
            current_backup: Mutex::new(None),
        }
    }

    /// Volume name this controller serves.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Controller process URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Run one engine subcommand against this controller and return stdout.
    ///
    /// The invocation is bounded by the configured engine timeout; on
    /// timeout the output future is dropped and `kill_on_drop` reaps the
    /// child even if it has written partial output.
    pub(crate) async fn engine(&self, args: &[&str]) -> Result<String> {
        let mut cmd = Command::new(&self.engine_binary);
        cmd.arg("--url")
            .arg(&self.url)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.engine_timeout, cmd.output())
            .await
            .map_err(|_| VolplaneError::Controller {
                volume: self.name.clone(),
                reason: format!("`{}` timed out after {:?}", args.join(" "), self.engine_timeout),
            })?
            .map_err(|e| VolplaneError::Controller {
                volume: self.name.clone(),
                reason: format!("failed to run `{}`: {}", args.join(" "), e),
            })?;

        if !output.status.success() {
            return Err(VolplaneError::Controller {
                volume: self.name.clone(),
                reason: format!(
                    "`{}` exited with {}: {}",
                    args.join(" "),
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Replica set as the controller sees it, parsed from `ls` output.
    pub async fn replica_states(&self) -> Result<Vec<ReplicaInfo>> {
        let out = self.engine(&["ls"]).await?;

        let mut replicas = Vec::new();
        for line in out.lines() {
            if line.starts_with("ADDRESS") || line.trim().is_empty() {
                continue;
            }
            replicas.push(parse_replica_line(line)?);
        }
        Ok(replicas)
    }

    /// Add a replica to the live controller by address.
    pub async fn add_replica(&self, replica: &ReplicaInfo) -> Result<()> {
        self.engine(&["add", &replica.instance.address]).await.map_err(|e| {
            VolplaneError::Controller {
                volume: self.name.clone(),
                reason: format!(
                    "failed to add replica '{}': {}",
                    replica.instance.address,
                    reason_of(e)
                ),
            }
        })?;
        Ok(())
    }

    /// Remove a replica from the live controller by address.
    pub async fn remove_replica(&self, replica: &ReplicaInfo) -> Result<()> {
        self.engine(&["rm", &replica.instance.address]).await.map_err(|e| {
            VolplaneError::Controller {
                volume: self.name.clone(),
                reason: format!(
                    "failed to rm replica '{}': {}",
                    replica.instance.address,
                    reason_of(e)
                ),
            }
        })?;
        Ok(())
    }

    /// Device endpoint the controller exposes, or an empty string when the
    /// query fails. An unreachable controller is not fatal here; the health
    /// check handles that separately.
    pub async fn endpoint(&self) -> String {
        match self.info().await {
            Ok(info) => info.endpoint,
            Err(e) => {
                warn!(volume = %self.name, error = %e, "failed to query controller endpoint");
                String::new()
            }
        }
    }

    async fn info(&self) -> Result<EngineVolumeInfo> {
        let out = self.engine(&["info"]).await?;
        serde_json::from_str(&out).map_err(|e| VolplaneError::Parse {
            reason: format!("cannot decode controller info `{}`: {}", out.trim(), e),
        })
    }

    /// Snapshot operations bound to this controller's URL.
    pub fn snapshots(self: &Arc<Self>) -> SnapshotOps {
        SnapshotOps::new(Arc::clone(self))
    }

    /// Backup operations bound to this controller's URL.
    pub fn backups(self: &Arc<Self>) -> BackupOps {
        BackupOps::new(Arc::clone(self))
    }
}

fn reason_of(err: VolplaneError) -> String {
    match err {
        VolplaneError::Controller { reason, .. } => reason,
        other => other.to_string(),
    }
}

/// Parse one non-header line of controller `ls` output.
///
/// The first whitespace-delimited field is the replica address, the second
/// its mode; extra fields are ignored. The parser is purely syntactic and
/// does not validate addresses.
pub fn parse_replica_line(line: &str) -> Result<ReplicaInfo> {
    let mut fields = line.split_whitespace();
    let (address, mode) = match (fields.next(), fields.next()) {
        (Some(address), Some(mode)) => (address, mode),
        _ => {
            return Err(VolplaneError::Parse {
                reason: format!("cannot parse replica line `{}`", line),
            })
        }
    };

    Ok(ReplicaInfo {
        instance: InstanceInfo { address: address.to_string(), ..Default::default() },
        mode: Some(ReplicaMode::parse(mode)),
        bad_timestamp: None,
    })
}
