//! Instance domain types.
//!
//! An instance is an external process (replica or controller) managed by the
//! orchestrator. The core never touches the process directly; it only holds
//! the orchestrator's record of it.

use serde::{Deserialize, Serialize};

/// Record of an external process managed by the orchestrator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceInfo {
    /// Orchestrator-assigned instance ID
    pub id: String,

    /// Human-readable instance name
    pub name: String,

    /// Host the instance is scheduled on
    pub host_id: String,

    /// Wire address; populated once the instance is running
    pub address: String,

    /// Whether the process is currently running
    pub running: bool,
}

/// Replica mode as reported by the owning controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ReplicaMode {
    /// Read-write, in sync
    Rw,
    /// Write-only, catching up
    Wo,
    /// Errored
    Err,
}

impl ReplicaMode {
    /// Parse a mode token from controller `ls` output.
    ///
    /// An unexpected token signals a broken replica, not a protocol change,
    /// so anything unknown maps to `Err`.
    pub fn parse(s: &str) -> Self {
        match s {
            "RW" => Self::Rw,
            "WO" => Self::Wo,
            _ => Self::Err,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rw => "RW",
            Self::Wo => "WO",
            Self::Err => "ERR",
        }
    }
}

impl std::fmt::Display for ReplicaMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A replica process holding one copy of a volume's data.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaInfo {
    #[serde(flatten)]
    pub instance: InstanceInfo,

    /// Mode reported by the controller; meaningful only while the owning
    /// controller reports this replica.
    pub mode: Option<ReplicaMode>,

    /// RFC3339 timestamp of when the replica was marked bad; `None` while
    /// the replica is good.
    pub bad_timestamp: Option<String>,
}

impl ReplicaInfo {
    /// A replica is good while it has no bad timestamp.
    pub fn is_good(&self) -> bool {
        self.bad_timestamp.is_none()
    }
}

/// The controller process presenting a volume's block device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerInfo {
    #[serde(flatten)]
    pub instance: InstanceInfo,
}
