//! Orchestrator abstraction.
//!
//! The orchestrator is the external plane that materializes controller and
//! replica processes and persists volume records. Concrete backends
//! (container runtimes, test doubles) implement [`Orchestrator`]; the core
//! treats their errors as opaque and wraps them with volume context.

use crate::types::{ControllerInfo, InstanceInfo, RecurringJob, ReplicaInfo, VolumeInfo};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// A host known to the orchestrator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostInfo {
    pub uuid: String,
    pub name: String,
    pub address: String,
}

/// Driver for the external process and metadata plane.
///
/// Contract notes the core relies on:
/// - `get_volume` returns exactly what `create_volume`/`update_volume` last
///   wrote, including the nested controller and replica records.
/// - `create_replica`/`create_controller` persist the new instance into the
///   owning volume's record; `remove_instance` drops it again.
/// - `start_instance` returns the updated record with `running = true` and a
///   populated `address`.
/// - `stop_instance` on a stopped instance and `remove_instance` on an
///   absent instance succeed; cleanup relies on this idempotence.
#[async_trait]
pub trait Orchestrator: Send + Sync {
    async fn create_volume(&self, volume: &VolumeInfo) -> anyhow::Result<VolumeInfo>;

    async fn get_volume(&self, name: &str) -> anyhow::Result<Option<VolumeInfo>>;

    async fn list_volumes(&self) -> anyhow::Result<Vec<VolumeInfo>>;

    async fn update_volume(&self, volume: &VolumeInfo) -> anyhow::Result<VolumeInfo>;

    async fn delete_volume(&self, name: &str) -> anyhow::Result<()>;

    /// Create a stopped replica process record for the volume.
    async fn create_replica(
        &self,
        volume_name: &str,
        replica_name: &str,
    ) -> anyhow::Result<ReplicaInfo>;

    /// Create and start a controller process bound to the given replicas.
    async fn create_controller(
        &self,
        volume_name: &str,
        controller_name: &str,
        replicas: &[ReplicaInfo],
    ) -> anyhow::Result<ControllerInfo>;

    async fn start_instance(&self, instance_id: &str) -> anyhow::Result<InstanceInfo>;

    async fn stop_instance(&self, instance_id: &str) -> anyhow::Result<InstanceInfo>;

    async fn remove_instance(&self, instance_id: &str) -> anyhow::Result<()>;

    /// Stamp the replica's record with a bad timestamp. Replicas are matched
    /// by address, which is all the controller's `ls` output carries.
    async fn mark_bad_replica(&self, volume_name: &str, replica: &ReplicaInfo)
        -> anyhow::Result<()>;

    fn get_current_host_id(&self) -> String;

    async fn list_hosts(&self) -> anyhow::Result<HashMap<String, HostInfo>>;

    async fn get_host(&self, id: &str) -> anyhow::Result<Option<HostInfo>>;

    /// The recurring-job scheduler bound to this orchestrator.
    fn scheduler(&self) -> Arc<dyn JobScheduler>;
}

/// Programs recurring snapshot/backup jobs for a volume. Cron evaluation
/// itself happens outside the core; the monitor only forwards updates.
#[async_trait]
pub trait JobScheduler: Send + Sync {
    async fn schedule(&self, volume_name: &str, jobs: &[RecurringJob]) -> anyhow::Result<()>;

    async fn unschedule(&self, volume_name: &str) -> anyhow::Result<()>;
}
