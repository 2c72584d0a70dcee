//! Domain types shared across the control plane.

pub mod instance;
pub mod volume;

pub use instance::{ControllerInfo, InstanceInfo, ReplicaInfo, ReplicaMode};
pub use volume::{
    validate_recurring_jobs, BackupInfo, RecurringJob, RecurringTask, VolumeInfo, VolumeState,
};
