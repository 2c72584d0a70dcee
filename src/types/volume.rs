//! Volume domain types.

use crate::types::instance::{ControllerInfo, ReplicaInfo};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Desired and observed state of one volume.
///
/// The orchestrator persists this record; `state` and `endpoint` are derived
/// on every read and never stored canonically.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VolumeInfo {
    /// Unique volume name, immutable after creation
    pub name: String,

    /// Size in bytes
    pub size: i64,

    /// Desired number of healthy replicas
    pub number_of_replicas: usize,

    /// Engine image the controller and replicas run
    pub engine_image: String,

    /// Backup URL to restore on creation
    pub from_backup: Option<String>,

    /// Seconds before an unresponsive replica is considered stale
    pub stale_replica_timeout: u64,

    /// Recurring snapshot/backup jobs
    pub recurring_jobs: Vec<RecurringJob>,

    /// RFC3339 creation timestamp
    pub created: String,

    /// Derived state; recomputed on every read
    #[serde(default)]
    pub state: VolumeState,

    /// Device path while attached, empty otherwise; derived
    #[serde(default)]
    pub endpoint: String,

    /// The controller process, if one exists
    pub controller: Option<ControllerInfo>,

    /// Replica records by replica name
    pub replicas: HashMap<String, ReplicaInfo>,
}

impl VolumeInfo {
    /// Count of replicas with no bad timestamp.
    pub fn good_replica_count(&self) -> usize {
        self.replicas.values().filter(|r| r.is_good()).count()
    }
}

/// Observed volume state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VolumeState {
    /// Record exists, nothing derived yet
    #[default]
    Created,
    /// No controller, at least one good replica
    Detached,
    /// Attached with the full complement of good replicas
    Healthy,
    /// Attached with fewer good replicas than desired
    Degraded,
    /// No good replicas left
    Faulted,
}

impl std::fmt::Display for VolumeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Detached => "detached",
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Faulted => "faulted",
        };
        write!(f, "{}", s)
    }
}

/// A recurring snapshot or backup job attached to a volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecurringJob {
    pub name: String,

    /// Standard 5-field cron expression
    pub cron: String,

    pub task: RecurringTask,

    /// How many snapshots/backups this job retains
    pub retain: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecurringTask {
    Snapshot,
    Backup,
}

/// Validate a recurring job list before it is persisted and forwarded to a
/// volume's monitor.
pub fn validate_recurring_jobs(jobs: &[RecurringJob]) -> Result<(), String> {
    let mut seen = std::collections::HashSet::new();
    for job in jobs {
        if job.name.is_empty() {
            return Err("recurring job with empty name".to_string());
        }
        if !seen.insert(job.name.as_str()) {
            return Err(format!("duplicate recurring job name '{}'", job.name));
        }
        if job.cron.split_whitespace().count() != 5 {
            return Err(format!("job '{}': cron expression must have 5 fields", job.name));
        }
        if job.retain == 0 {
            return Err(format!("job '{}': retain must be at least 1", job.name));
        }
    }
    Ok(())
}

/// A backup record resolved from a backup target.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupInfo {
    pub url: String,

    #[serde(default)]
    pub volume_name: String,

    /// Size of the backed-up volume in bytes, as recorded by the engine
    #[serde(default)]
    pub volume_size: String,

    #[serde(default)]
    pub snapshot_name: String,

    #[serde(default)]
    pub created: String,
}
