//! Volume lifecycle and replica reconciliation.
//!
//! The manager owns volume CRUD and the attach/detach choreography that
//! composes replica processes into a live controller. It keeps no cache of
//! volume state; every operation re-reads the orchestrator's record so a
//! stale record can never contradict observed replica health. The only
//! in-memory state is the monitor registry and the in-flight replica-add
//! accounting, both behind the manager mutex.

pub mod monitor;

use crate::config::ManagerConfig;
use crate::controller::{BackupCatalog, BackupOps, Controller, ControllerRegistry, SnapshotOps};
use crate::error::{AggregateError, Result, VolplaneError};
use crate::orchestrator::{HostInfo, Orchestrator};
use crate::settings::Settings;
use crate::types::{
    validate_recurring_jobs, BackupInfo, RecurringJob, ReplicaInfo, ReplicaMode, VolumeInfo,
    VolumeState,
};
use chrono::{DateTime, FixedOffset, Utc};
use self::monitor::VolumeMonitor;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Derive the observed state of a volume from its replicas and controller.
///
/// State is never stored canonically; it is recomputed on every read.
pub fn volume_state(volume: &VolumeInfo) -> VolumeState {
    let good = volume.good_replica_count();
    if good == 0 {
        VolumeState::Faulted
    } else if volume.controller.is_none() {
        VolumeState::Detached
    } else if good == volume.number_of_replicas {
        VolumeState::Healthy
    } else {
        VolumeState::Degraded
    }
}

fn replica_name(volume_name: &str) -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("{}-replica-{}", volume_name, &id[..8])
}

fn controller_name(volume_name: &str) -> String {
    format!("{}-controller", volume_name)
}

struct ManagerState {
    monitors: HashMap<String, VolumeMonitor>,
    adding_replicas: HashMap<String, i64>,
}

/// The volume manager.
pub struct VolumeManager {
    orc: Arc<dyn Orchestrator>,
    settings: Arc<dyn Settings>,
    backups: Arc<dyn BackupCatalog>,
    registry: ControllerRegistry,
    config: ManagerConfig,
    inner: Mutex<ManagerState>,
}

impl VolumeManager {
    pub fn new(
        orc: Arc<dyn Orchestrator>,
        settings: Arc<dyn Settings>,
        backups: Arc<dyn BackupCatalog>,
        config: ManagerConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            orc,
            settings,
            backups,
            registry: ControllerRegistry::new(config.clone()),
            config,
            inner: Mutex::new(ManagerState {
                monitors: HashMap::new(),
                adding_replicas: HashMap::new(),
            }),
        })
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    fn state(&self) -> MutexGuard<'_, ManagerState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// On boot, re-assume ownership of every volume whose controller is
    /// running on this host. This restores monitor entries after a manager
    /// restart.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let host_id = self.orc.get_current_host_id();
        let volumes = self
            .orc
            .list_volumes()
            .await
            .map_err(|e| VolplaneError::orchestrator("failed to list volumes on startup", e))?;

        for volume in &volumes {
            if let Some(ctrl) = &volume.controller {
                if ctrl.instance.running && ctrl.instance.host_id == host_id {
                    info!(volume = %volume.name, "re-assuming ownership of attached volume");
                    self.start_monitoring(&volume.name);
                }
            }
        }
        Ok(())
    }

    // ========================
    // CRUD
    // ========================

    /// Create a volume, optionally restoring it from a backup.
    #[instrument(skip_all, fields(volume = %volume.name))]
    pub async fn create(self: &Arc<Self>, mut volume: VolumeInfo) -> Result<VolumeInfo> {
        if volume.name.is_empty() {
            return Err(VolplaneError::Config { reason: "volume name must not be empty".to_string() });
        }
        if volume.number_of_replicas == 0 {
            return Err(VolplaneError::Config {
                reason: "number of replicas must be at least 1".to_string(),
            });
        }
        if self.get(&volume.name).await?.is_some() {
            return Err(VolplaneError::AlreadyExists { volume: volume.name });
        }

        let settings = self.settings.get_settings().await.map_err(|e| VolplaneError::Config {
            reason: format!("failed to load settings: {:#}", e),
        })?;
        if volume.engine_image.is_empty() {
            volume.engine_image = settings.engine_image.clone();
        }
        if volume.engine_image.is_empty() {
            return Err(VolplaneError::Config { reason: "no engine image configured".to_string() });
        }

        if let Some(from_backup) = volume.from_backup.clone() {
            if settings.backup_target.is_empty() {
                return Err(VolplaneError::Config {
                    reason: "no backup target configured".to_string(),
                });
            }
            let backup = self
                .backups
                .get(&from_backup)
                .await
                .map_err(|e| {
                    VolplaneError::orchestrator(
                        format!("error getting backup '{}' to create volume", from_backup),
                        e,
                    )
                })?
                .ok_or_else(|| VolplaneError::Config {
                    reason: format!("backup '{}' not found", from_backup),
                })?;
            return self.create_from_backup(volume, backup).await;
        }

        self.do_create(volume).await
    }

    async fn do_create(&self, mut volume: VolumeInfo) -> Result<VolumeInfo> {
        volume.created = Utc::now().to_rfc3339();
        volume.state = VolumeState::Created;
        volume.controller = None;
        volume.replicas = HashMap::new();

        let mut vol = self.orc.create_volume(&volume).await.map_err(|e| {
            VolplaneError::orchestrator(format!("failed to create volume '{}'", volume.name), e)
        })?;

        let mut replicas = HashMap::new();
        for _ in 0..vol.number_of_replicas {
            let name = replica_name(&vol.name);
            let replica = self.orc.create_replica(&vol.name, &name).await.map_err(|e| {
                VolplaneError::orchestrator(
                    format!("error creating replica '{}' for volume '{}'", name, vol.name),
                    e,
                )
            })?;
            replicas.insert(replica.instance.name.clone(), replica);
        }
        vol.replicas = replicas;
        Ok(vol)
    }

    async fn create_from_backup(
        self: &Arc<Self>,
        mut volume: VolumeInfo,
        backup: BackupInfo,
    ) -> Result<VolumeInfo> {
        let size: i64 = backup.volume_size.parse().map_err(|e| VolplaneError::Parse {
            reason: format!("error parsing backup volume size '{}': {}", backup.volume_size, e),
        })?;
        volume.size = size;

        let vol = self.do_create(volume).await?;

        let restored = async {
            self.do_attach(&vol).await?;
            let attached = self.get(&vol.name).await?.ok_or_else(|| {
                VolplaneError::VolumeNotFound { volume: vol.name.clone() }
            })?;
            let ctrl = self.registry.get(Some(&attached)).await.ok_or_else(|| {
                VolplaneError::Internal(format!(
                    "no running controller after attaching volume '{}'",
                    vol.name
                ))
            })?;
            ctrl.backups().restore(&backup.url).await?;
            self.do_detach(&attached).await?;
            Ok::<(), VolplaneError>(())
        }
        .await;

        if let Err(e) = restored {
            self.cleanup_failed_create(&vol.name).await;
            return Err(VolplaneError::Internal(format!(
                "failed to restore backup '{}' into volume '{}': {}",
                backup.url, vol.name, e
            )));
        }

        self.get(&vol.name)
            .await?
            .ok_or_else(|| VolplaneError::VolumeNotFound { volume: vol.name.clone() })
    }

    async fn cleanup_failed_create(self: &Arc<Self>, name: &str) {
        if let Err(e) = self.delete(name).await {
            warn!(volume = %name, error = %e, "error deleting volume after failed create");
        } else {
            debug!(volume = %name, "cleaned up after failed create");
        }
    }

    /// Delete a volume: detach, remove every replica instance, drop the
    /// record. Deleting a missing volume succeeds with a warning.
    #[instrument(skip(self))]
    pub async fn delete(&self, name: &str) -> Result<()> {
        let Some(volume) = self.get(name).await? else {
            warn!(volume = %name, "delete of missing volume");
            return Ok(());
        };

        self.do_detach(&volume).await.map_err(|e| {
            VolplaneError::Internal(format!("error detaching for delete of volume '{}': {}", name, e))
        })?;

        for replica in volume.replicas.values() {
            self.orc.remove_instance(&replica.instance.id).await.map_err(|e| {
                VolplaneError::orchestrator(
                    format!(
                        "error removing replica '{}' of volume '{}'",
                        replica.instance.name, name
                    ),
                    e,
                )
            })?;
        }

        self.orc
            .delete_volume(name)
            .await
            .map_err(|e| VolplaneError::orchestrator(format!("failed to delete volume '{}'", name), e))
    }

    /// The volume record with derived state and endpoint, or `None`.
    pub async fn get(&self, name: &str) -> Result<Option<VolumeInfo>> {
        let vol = self
            .orc
            .get_volume(name)
            .await
            .map_err(|e| VolplaneError::orchestrator(format!("failed to get volume '{}'", name), e))?;
        let Some(mut volume) = vol else {
            return Ok(None);
        };

        volume.state = volume_state(&volume);
        volume.endpoint = match self.registry.get(Some(&volume)).await {
            Some(ctrl) => ctrl.endpoint().await,
            None => String::new(),
        };
        Ok(Some(volume))
    }

    /// All volume records with derived state applied.
    pub async fn list(&self) -> Result<Vec<VolumeInfo>> {
        let mut volumes = self
            .orc
            .list_volumes()
            .await
            .map_err(|e| VolplaneError::orchestrator("failed to list volumes", e))?;
        for volume in &mut volumes {
            volume.state = volume_state(volume);
        }
        Ok(volumes)
    }

    // ========================
    // Attach / Detach
    // ========================

    #[instrument(skip_all, fields(volume = %name))]
    pub async fn attach(self: &Arc<Self>, name: &str) -> Result<()> {
        let volume = self
            .get(name)
            .await?
            .ok_or_else(|| VolplaneError::VolumeNotFound { volume: name.to_string() })?;
        self.do_attach(&volume).await
    }

    async fn do_attach(self: &Arc<Self>, volume: &VolumeInfo) -> Result<()> {
        let mut volume = volume.clone();

        if let Some(ctrl) = &volume.controller {
            if ctrl.instance.running && ctrl.instance.host_id == self.orc.get_current_host_id() {
                self.start_monitoring(&volume.name);
                return Ok(());
            }
            // We may only own a locally hosted controller.
            self.detach(&volume.name).await.map_err(|e| {
                VolplaneError::Internal(format!(
                    "failed to detach before reattaching volume '{}': {}",
                    volume.name, e
                ))
            })?;
            match self.get(&volume.name).await? {
                Some(v) => volume = v,
                None => {
                    return Err(VolplaneError::VolumeNotFound { volume: volume.name.clone() })
                }
            }
        }

        let mut live: HashMap<String, ReplicaInfo> = HashMap::new();
        let mut recent_bad: Option<(String, ReplicaInfo, DateTime<FixedOffset>)> = None;
        let mut running: Vec<ReplicaInfo> = Vec::new();

        for (key, replica) in &volume.replicas {
            if replica.instance.running {
                running.push(replica.clone());
            }
            match &replica.bad_timestamp {
                None => {
                    live.insert(key.clone(), replica.clone());
                }
                Some(ts) => match DateTime::parse_from_rfc3339(ts) {
                    Ok(t) => {
                        if recent_bad.as_ref().map_or(true, |(_, _, best)| t > *best) {
                            recent_bad = Some((key.clone(), replica.clone(), t));
                        }
                    }
                    Err(e) => {
                        warn!(
                            volume = %volume.name, replica = %key, timestamp = %ts, error = %e,
                            "unparseable bad timestamp, replica skipped from promotion"
                        );
                    }
                },
            }
        }

        // A prior controller may have left replicas running under the wrong
        // topology; stop everything before starting the chosen set.
        self.stop_replicas(&volume.name, running).await?;

        if live.is_empty() {
            if let Some((key, replica, _)) = recent_bad {
                warn!(
                    volume = %volume.name, replica = %replica.instance.name,
                    "no good replicas, starting from the most recently failed one"
                );
                live.insert(key, replica);
            }
        }
        if live.is_empty() {
            return Err(VolplaneError::Internal(format!(
                "no replicas to start the controller for volume '{}'",
                volume.name
            )));
        }

        let started = self.start_replicas(&volume.name, live.into_values().collect()).await?;

        let ctrl = self
            .orc
            .create_controller(&volume.name, &controller_name(&volume.name), &started)
            .await
            .map_err(|e| {
                VolplaneError::orchestrator(
                    format!("failed to start the controller for volume '{}'", volume.name),
                    e,
                )
            })?;
        debug!(volume = %volume.name, controller = %ctrl.instance.name, "controller started");

        self.start_monitoring(&volume.name);
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn detach(&self, name: &str) -> Result<()> {
        let Some(volume) = self.get(name).await? else {
            warn!(volume = %name, "detach of missing volume");
            return Ok(());
        };
        self.do_detach(&volume).await
    }

    async fn do_detach(&self, volume: &VolumeInfo) -> Result<()> {
        // First things first: no concurrent repair may fire mid-detach.
        self.stop_monitoring(&volume.name);

        if let Some(ctrl) = &volume.controller {
            if ctrl.instance.running {
                // The controller holds the replicas open; if it cannot be
                // stopped the replicas must stay up.
                self.orc.stop_instance(&ctrl.instance.id).await.map_err(|e| {
                    VolplaneError::orchestrator(
                        format!(
                            "error stopping controller '{}' of volume '{}'",
                            ctrl.instance.id, volume.name
                        ),
                        e,
                    )
                })?;
            }
        }

        self.stop_replicas(&volume.name, volume.replicas.values().cloned().collect()).await?;

        if let Some(ctrl) = &volume.controller {
            self.orc.remove_instance(&ctrl.instance.id).await.map_err(|e| {
                VolplaneError::orchestrator(
                    format!(
                        "error removing controller '{}' of volume '{}'",
                        ctrl.instance.id, volume.name
                    ),
                    e,
                )
            })?;
        }

        self.registry.remove(&volume.name).await;
        Ok(())
    }

    /// Stop the given replicas in parallel, collecting every failure.
    async fn stop_replicas(&self, volume_name: &str, replicas: Vec<ReplicaInfo>) -> Result<()> {
        let (tx, mut rx) = mpsc::unbounded_channel::<VolplaneError>();
        for replica in replicas {
            let orc = Arc::clone(&self.orc);
            let tx = tx.clone();
            let volume_name = volume_name.to_string();
            tokio::spawn(async move {
                if let Err(e) = orc.stop_instance(&replica.instance.id).await {
                    let _ = tx.send(VolplaneError::orchestrator(
                        format!(
                            "failed to stop replica '{}' for volume '{}'",
                            replica.instance.name, volume_name
                        ),
                        e,
                    ));
                }
            });
        }
        drop(tx);

        let mut errs = AggregateError::new();
        while let Some(err) = rx.recv().await {
            error!(error = %err, "replica stop failed");
            errs.push(err);
        }
        errs.into_result()
    }

    /// Start the given replicas in parallel; returns the updated records
    /// (running, with addresses) or the aggregate of every failure.
    async fn start_replicas(
        &self,
        volume_name: &str,
        replicas: Vec<ReplicaInfo>,
    ) -> Result<Vec<ReplicaInfo>> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Result<ReplicaInfo>>();
        for replica in replicas {
            let orc = Arc::clone(&self.orc);
            let tx = tx.clone();
            let volume_name = volume_name.to_string();
            tokio::spawn(async move {
                let res = match orc.start_instance(&replica.instance.id).await {
                    Ok(instance) => Ok(ReplicaInfo { instance, ..replica }),
                    Err(e) => Err(VolplaneError::orchestrator(
                        format!(
                            "failed to start replica '{}' for volume '{}'",
                            replica.instance.name, volume_name
                        ),
                        e,
                    )),
                };
                let _ = tx.send(res);
            });
        }
        drop(tx);

        let mut errs = AggregateError::new();
        let mut started = Vec::new();
        while let Some(res) = rx.recv().await {
            match res {
                Ok(replica) => started.push(replica),
                Err(err) => {
                    error!(error = %err, "replica start failed");
                    errs.push(err);
                }
            }
        }
        errs.into_result()?;
        Ok(started)
    }

    // ========================
    // Reconciliation
    // ========================

    /// One reconciliation step: read the controller's replica set, evict
    /// errored replicas, detach when nothing usable remains, repair drift.
    ///
    /// Called by the per-volume monitor.
    pub async fn check_controller(
        self: &Arc<Self>,
        ctrl: &Arc<Controller>,
        volume: &VolumeInfo,
    ) -> Result<()> {
        let replicas = ctrl.replica_states().await?;
        debug!(
            volume = %volume.name,
            desired = volume.number_of_replicas,
            reported = replicas.len(),
            "checking controller"
        );

        let mut good: Vec<ReplicaInfo> = Vec::new();
        let mut wo: Vec<ReplicaInfo> = Vec::new();
        let (tx, mut rx) = mpsc::unbounded_channel::<VolplaneError>();

        for replica in replicas {
            match replica.mode {
                Some(ReplicaMode::Rw) => good.push(replica),
                Some(ReplicaMode::Wo) => wo.push(replica),
                _ => {
                    warn!(volume = %volume.name, address = %replica.instance.address, "evicting errored replica");
                    metrics::counter!("volplane_replica_evictions_total").increment(1);

                    let rm_ctrl = Arc::clone(ctrl);
                    let rm_tx = tx.clone();
                    let rm_replica = replica.clone();
                    tokio::spawn(async move {
                        if let Err(e) = rm_ctrl.remove_replica(&rm_replica).await {
                            let _ = rm_tx.send(e);
                        }
                    });

                    let orc = Arc::clone(&self.orc);
                    let mark_tx = tx.clone();
                    let volume_name = volume.name.clone();
                    tokio::spawn(async move {
                        if let Err(e) = orc.mark_bad_replica(&volume_name, &replica).await {
                            let _ = mark_tx.send(VolplaneError::orchestrator(
                                format!(
                                    "failed to mark replica '{}' bad for volume '{}'",
                                    replica.instance.address, volume_name
                                ),
                                e,
                            ));
                        }
                    });
                }
            }
        }
        drop(tx);

        let mut errs = AggregateError::new();
        while let Some(err) = rx.recv().await {
            error!(error = %err, "errored replica handling failed");
            errs.push(err);
        }
        errs.into_result()?;

        if good.is_empty() {
            error!(volume = %volume.name, "no good replicas left, shutting the volume down");
            return self.detach(&volume.name).await;
        }

        let adding = self.adding_replicas_count(&volume.name, 0);
        debug!(
            volume = %volume.name,
            rw = good.len(),
            wo = wo.len(),
            adding,
            "replicas by state"
        );

        // Repair only when nothing is already catching up and no prior
        // repair is still in flight.
        if good.len() < volume.number_of_replicas && wo.is_empty() && adding == 0 {
            return self.create_and_add_replica(&volume.name, ctrl).await;
        }

        if good.len() + wo.len() > volume.number_of_replicas {
            warn!(
                volume = %volume.name,
                has = good.len() + wo.len(),
                needs = volume.number_of_replicas,
                "volume has more replicas than needed"
            );
        }

        Ok(())
    }

    /// Create and start a fresh replica, then hand it to the controller in
    /// the background. The in-flight add is accounted in `adding_replicas`
    /// so the next check does not start a duplicate repair.
    async fn create_and_add_replica(
        self: &Arc<Self>,
        volume_name: &str,
        ctrl: &Arc<Controller>,
    ) -> Result<()> {
        let name = replica_name(volume_name);
        let replica = self.orc.create_replica(volume_name, &name).await.map_err(|e| {
            VolplaneError::orchestrator(
                format!("failed to create a replica for volume '{}'", volume_name),
                e,
            )
        })?;
        let instance = self.orc.start_instance(&replica.instance.id).await.map_err(|e| {
            VolplaneError::orchestrator(
                format!(
                    "failed to start replica '{}' for volume '{}'",
                    replica.instance.name, volume_name
                ),
                e,
            )
        })?;
        let replica = ReplicaInfo { instance, ..replica };

        metrics::counter!("volplane_replica_repairs_total").increment(1);

        let man = Arc::clone(self);
        let ctrl = Arc::clone(ctrl);
        let volume_name = volume_name.to_string();
        tokio::spawn(async move {
            man.adding_replicas_count(&volume_name, 1);
            if let Err(e) = ctrl.add_replica(&replica).await {
                error!(
                    volume = %volume_name, replica = %replica.instance.name, error = %e,
                    "failed to add replica to controller, removing the orphan"
                );
                if let Err(e) = man.orc.stop_instance(&replica.instance.id).await {
                    error!(
                        volume = %volume_name, replica = %replica.instance.name, error = %e,
                        "failed to stop orphan replica"
                    );
                }
                if let Err(e) = man.orc.remove_instance(&replica.instance.id).await {
                    error!(
                        volume = %volume_name, replica = %replica.instance.name, error = %e,
                        "failed to remove orphan replica"
                    );
                }
            }
            man.adding_replicas_count(&volume_name, -1);
        });
        Ok(())
    }

    fn adding_replicas_count(&self, name: &str, delta: i64) -> i64 {
        let mut state = self.state();
        let count = state.adding_replicas.entry(name.to_string()).or_insert(0);
        *count += delta;
        *count
    }

    /// Number of in-flight replica additions for a volume.
    pub fn adding_replicas(&self, name: &str) -> i64 {
        self.adding_replicas_count(name, 0)
    }

    // ========================
    // Cleanup
    // ========================

    /// Stop every bad replica and remove the ones older than the retention
    /// period. Failures are collected so one replica cannot block the
    /// others' cleanup. Cleanup of a missing volume succeeds with a warning.
    pub async fn cleanup(&self, volume: &VolumeInfo) -> Result<()> {
        let Some(volume) = self.get(&volume.name).await? else {
            warn!(volume = %volume.name, "cleanup of missing volume");
            return Ok(());
        };
        debug!(volume = %volume.name, "running bad replica cleanup");

        let now = Utc::now();
        let (tx, mut rx) = mpsc::unbounded_channel::<VolplaneError>();

        for (name, replica) in &volume.replicas {
            let Some(ts) = &replica.bad_timestamp else {
                continue;
            };

            let expired = match DateTime::parse_from_rfc3339(ts) {
                Ok(bad_time) => {
                    let age = now
                        .signed_duration_since(bad_time.with_timezone(&Utc))
                        .to_std()
                        .unwrap_or_default();
                    age > self.config.keep_bad_replicas_period
                }
                Err(e) => {
                    let _ = tx.send(VolplaneError::Parse {
                        reason: format!(
                            "bad timestamp '{}' on replica '{}' of volume '{}': {}",
                            ts, name, volume.name, e
                        ),
                    });
                    continue;
                }
            };
            if !replica.instance.running && !expired {
                continue;
            }

            // One task per bad replica: stop before remove, so the removal
            // never races its own shutdown.
            let orc = Arc::clone(&self.orc);
            let tx = tx.clone();
            let replica = replica.clone();
            let volume_name = volume.name.clone();
            tokio::spawn(async move {
                if replica.instance.running {
                    if let Err(e) = orc.stop_instance(&replica.instance.id).await {
                        let _ = tx.send(VolplaneError::orchestrator(
                            format!(
                                "error stopping bad replica '{}' of volume '{}'",
                                replica.instance.name, volume_name
                            ),
                            e,
                        ));
                    }
                }
                if expired {
                    if let Err(e) = orc.remove_instance(&replica.instance.id).await {
                        let _ = tx.send(VolplaneError::orchestrator(
                            format!(
                                "error removing old bad replica '{}' of volume '{}'",
                                replica.instance.name, volume_name
                            ),
                            e,
                        ));
                    }
                }
            });
        }
        drop(tx);

        let mut errs = AggregateError::new();
        while let Some(err) = rx.recv().await {
            error!(error = %err, "bad replica cleanup failed");
            errs.push(err);
        }
        errs.into_result()
    }

    /// Remove a single replica by name. The stop is best-effort; the removal
    /// is surfaced.
    pub async fn replica_remove(&self, volume_name: &str, replica_name: &str) -> Result<()> {
        let volume = self
            .get(volume_name)
            .await?
            .ok_or_else(|| VolplaneError::VolumeNotFound { volume: volume_name.to_string() })?;
        let replica = volume.replicas.get(replica_name).ok_or_else(|| {
            VolplaneError::ReplicaNotFound {
                volume: volume_name.to_string(),
                replica: replica_name.to_string(),
            }
        })?;

        if let Err(e) = self.orc.stop_instance(&replica.instance.id).await {
            warn!(
                volume = %volume_name, replica = %replica_name, error = %e,
                "best-effort stop before replica removal failed"
            );
        }

        self.orc.remove_instance(&replica.instance.id).await.map_err(|e| {
            VolplaneError::orchestrator(
                format!("failed to remove replica '{}' of volume '{}'", replica_name, volume_name),
                e,
            )
        })
    }

    // ========================
    // Recurring jobs
    // ========================

    /// Persist a new recurring-job list and forward it to the volume's
    /// monitor, if one is running here.
    pub async fn update_recurring(&self, name: &str, jobs: Vec<RecurringJob>) -> Result<()> {
        validate_recurring_jobs(&jobs).map_err(|reason| VolplaneError::Config { reason })?;

        let mut volume = self
            .get(name)
            .await?
            .ok_or_else(|| VolplaneError::VolumeNotFound { volume: name.to_string() })?;
        volume.recurring_jobs = jobs.clone();
        self.orc.update_volume(&volume).await.map_err(|e| {
            VolplaneError::orchestrator(
                format!("failed to update recurring jobs for volume '{}'", name),
                e,
            )
        })?;

        let cron_tx = self.state().monitors.get(name).map(|m| m.cron_ch());
        if let Some(tx) = cron_tx {
            if tx.send(jobs).await.is_err() {
                warn!(volume = %name, "monitor gone, recurring job update not forwarded");
            }
        }
        Ok(())
    }

    // ========================
    // Pass-throughs and sub-operations
    // ========================

    pub async fn list_hosts(&self) -> Result<HashMap<String, HostInfo>> {
        self.orc
            .list_hosts()
            .await
            .map_err(|e| VolplaneError::orchestrator("failed to list hosts", e))
    }

    pub async fn get_host(&self, id: &str) -> Result<Option<HostInfo>> {
        self.orc
            .get_host(id)
            .await
            .map_err(|e| VolplaneError::orchestrator(format!("failed to get host '{}'", id), e))
    }

    /// The controller handle for a volume, when one is running.
    pub async fn controller(&self, name: &str) -> Result<Option<Arc<Controller>>> {
        let volume = self.get(name).await?;
        Ok(self.registry.get(volume.as_ref()).await)
    }

    /// Snapshot operations for an attached volume.
    pub async fn volume_snapshots(&self, name: &str) -> Result<SnapshotOps> {
        let ctrl = self.controller(name).await?.ok_or_else(|| {
            VolplaneError::Internal(format!("volume '{}' has no running controller", name))
        })?;
        Ok(ctrl.snapshots())
    }

    /// Backup operations for an attached volume.
    pub async fn volume_backups(&self, name: &str) -> Result<BackupOps> {
        let ctrl = self.controller(name).await?.ok_or_else(|| {
            VolplaneError::Internal(format!("volume '{}' has no running controller", name))
        })?;
        Ok(ctrl.backups())
    }

    // ========================
    // Monitors
    // ========================

    fn start_monitoring(self: &Arc<Self>, name: &str) {
        let mut state = self.state();
        if !state.monitors.contains_key(name) {
            let monitor = VolumeMonitor::spawn(Arc::clone(self), name.to_string());
            state.monitors.insert(name.to_string(), monitor);
        }
    }

    fn stop_monitoring(&self, name: &str) {
        if let Some(monitor) = self.state().monitors.remove(name) {
            monitor.close();
        }
    }

    /// True while a monitor entry exists for the volume on this host.
    pub fn is_monitoring(&self, name: &str) -> bool {
        self.state().monitors.contains_key(name)
    }
}
