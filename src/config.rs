//! Manager tuning knobs.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Tunables for the volume manager and its per-volume monitors.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Engine CLI binary used for controller wire commands.
    pub engine_binary: PathBuf,

    /// Upper bound on any single engine invocation. A hung engine process
    /// must not starve the monitor loop.
    pub engine_timeout: Duration,

    /// How long a bad replica is retained before cleanup removes it.
    pub keep_bad_replicas_period: Duration,

    /// Interval between controller health checks per attached volume.
    pub check_interval: Duration,

    /// Interval between bad-replica cleanup passes per attached volume.
    pub cleanup_interval: Duration,

    /// Consecutive controller wire failures tolerated before the monitor
    /// forces a detach.
    pub controller_error_limit: u32,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            engine_binary: PathBuf::from("volplane-engine"),
            engine_timeout: Duration::from_secs(30),
            keep_bad_replicas_period: Duration::from_secs(2 * 60 * 60),
            check_interval: Duration::from_secs(30),
            cleanup_interval: Duration::from_secs(60),
            controller_error_limit: 3,
        }
    }
}
