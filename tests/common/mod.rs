//! Shared test fixtures: an in-memory orchestrator and a scripted engine
//! binary standing in for real controller processes.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use volplane::controller::BackupCatalog;
use volplane::orchestrator::{HostInfo, JobScheduler, Orchestrator};
use volplane::settings::{Settings, SettingsInfo};
use volplane::types::{
    BackupInfo, ControllerInfo, InstanceInfo, RecurringJob, ReplicaInfo, VolumeInfo,
};
use volplane::{ManagerConfig, VolumeManager};

/// In-memory orchestrator double. Volume records and the "process table"
/// are tracked separately so tests can tell a record deletion apart from a
/// real instance removal.
pub struct MockOrchestrator {
    host_id: String,
    controller_address: Mutex<String>,
    volumes: Mutex<HashMap<String, VolumeInfo>>,
    instances: Mutex<HashMap<String, InstanceInfo>>,
    next_id: AtomicU64,
    pub fail_start: AtomicBool,
    pub fail_replica_stop: AtomicBool,
    pub scheduler: Arc<RecordingScheduler>,
}

impl MockOrchestrator {
    pub fn new(host_id: &str) -> Arc<Self> {
        Arc::new(Self {
            host_id: host_id.to_string(),
            controller_address: Mutex::new("tcp://controller-1:9501".to_string()),
            volumes: Mutex::new(HashMap::new()),
            instances: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            fail_start: AtomicBool::new(false),
            fail_replica_stop: AtomicBool::new(false),
            scheduler: Arc::new(RecordingScheduler::default()),
        })
    }

    fn fresh_id(&self) -> String {
        format!("i-{}", self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw stored record, without the manager's derived fields.
    pub fn record(&self, name: &str) -> Option<VolumeInfo> {
        self.volumes.lock().unwrap().get(name).cloned()
    }

    /// Instances still present in the process table for a volume.
    pub fn instances_for(&self, volume_name: &str) -> Vec<InstanceInfo> {
        self.instances
            .lock()
            .unwrap()
            .values()
            .filter(|i| i.name.starts_with(volume_name))
            .cloned()
            .collect()
    }

    pub fn set_bad_timestamp(&self, volume_name: &str, replica_name: &str, ts: Option<String>) {
        let mut volumes = self.volumes.lock().unwrap();
        let vol = volumes.get_mut(volume_name).expect("volume exists");
        let replica = vol.replicas.get_mut(replica_name).expect("replica exists");
        replica.bad_timestamp = ts;
    }

    /// Move the volume's controller record to another host.
    pub fn set_controller_host(&self, volume_name: &str, host_id: &str) {
        let mut volumes = self.volumes.lock().unwrap();
        let vol = volumes.get_mut(volume_name).expect("volume exists");
        let ctrl = vol.controller.as_mut().expect("controller exists");
        ctrl.instance.host_id = host_id.to_string();
        let mut instances = self.instances.lock().unwrap();
        if let Some(inst) = instances.get_mut(&ctrl.instance.id) {
            inst.host_id = host_id.to_string();
        }
    }

    /// Point the volume's controller record at a new address, simulating a
    /// controller recreated elsewhere.
    pub fn set_controller_address(&self, volume_name: &str, address: &str) {
        let mut volumes = self.volumes.lock().unwrap();
        let vol = volumes.get_mut(volume_name).expect("volume exists");
        let ctrl = vol.controller.as_mut().expect("controller exists");
        ctrl.instance.address = address.to_string();
        let mut instances = self.instances.lock().unwrap();
        if let Some(inst) = instances.get_mut(&ctrl.instance.id) {
            inst.address = address.to_string();
        }
    }

    /// Mirror an updated instance into every volume record that embeds it.
    fn sync_instance(volumes: &mut HashMap<String, VolumeInfo>, updated: &InstanceInfo) {
        for vol in volumes.values_mut() {
            if let Some(ctrl) = &mut vol.controller {
                if ctrl.instance.id == updated.id {
                    ctrl.instance = updated.clone();
                }
            }
            for replica in vol.replicas.values_mut() {
                if replica.instance.id == updated.id {
                    replica.instance = updated.clone();
                }
            }
        }
    }
}

#[async_trait]
impl Orchestrator for MockOrchestrator {
    async fn create_volume(&self, volume: &VolumeInfo) -> anyhow::Result<VolumeInfo> {
        let mut volumes = self.volumes.lock().unwrap();
        if volumes.contains_key(&volume.name) {
            anyhow::bail!("volume '{}' already exists", volume.name);
        }
        volumes.insert(volume.name.clone(), volume.clone());
        Ok(volume.clone())
    }

    async fn get_volume(&self, name: &str) -> anyhow::Result<Option<VolumeInfo>> {
        Ok(self.volumes.lock().unwrap().get(name).cloned())
    }

    async fn list_volumes(&self) -> anyhow::Result<Vec<VolumeInfo>> {
        Ok(self.volumes.lock().unwrap().values().cloned().collect())
    }

    async fn update_volume(&self, volume: &VolumeInfo) -> anyhow::Result<VolumeInfo> {
        let mut volumes = self.volumes.lock().unwrap();
        if !volumes.contains_key(&volume.name) {
            anyhow::bail!("volume '{}' does not exist", volume.name);
        }
        volumes.insert(volume.name.clone(), volume.clone());
        Ok(volume.clone())
    }

    async fn delete_volume(&self, name: &str) -> anyhow::Result<()> {
        self.volumes.lock().unwrap().remove(name);
        Ok(())
    }

    async fn create_replica(
        &self,
        volume_name: &str,
        replica_name: &str,
    ) -> anyhow::Result<ReplicaInfo> {
        let mut volumes = self.volumes.lock().unwrap();
        let vol = volumes
            .get_mut(volume_name)
            .ok_or_else(|| anyhow::anyhow!("volume '{}' does not exist", volume_name))?;
        let instance = InstanceInfo {
            id: self.fresh_id(),
            name: replica_name.to_string(),
            host_id: self.host_id.clone(),
            address: String::new(),
            running: false,
        };
        let replica =
            ReplicaInfo { instance: instance.clone(), mode: None, bad_timestamp: None };
        vol.replicas.insert(replica_name.to_string(), replica.clone());
        self.instances.lock().unwrap().insert(instance.id.clone(), instance);
        Ok(replica)
    }

    async fn create_controller(
        &self,
        volume_name: &str,
        controller_name: &str,
        _replicas: &[ReplicaInfo],
    ) -> anyhow::Result<ControllerInfo> {
        let mut volumes = self.volumes.lock().unwrap();
        let vol = volumes
            .get_mut(volume_name)
            .ok_or_else(|| anyhow::anyhow!("volume '{}' does not exist", volume_name))?;
        let instance = InstanceInfo {
            id: self.fresh_id(),
            name: controller_name.to_string(),
            host_id: self.host_id.clone(),
            address: self.controller_address.lock().unwrap().clone(),
            running: true,
        };
        let controller = ControllerInfo { instance: instance.clone() };
        vol.controller = Some(controller.clone());
        self.instances.lock().unwrap().insert(instance.id.clone(), instance);
        Ok(controller)
    }

    async fn start_instance(&self, instance_id: &str) -> anyhow::Result<InstanceInfo> {
        if self.fail_start.load(Ordering::Relaxed) {
            anyhow::bail!("injected start failure");
        }
        let mut volumes = self.volumes.lock().unwrap();
        let mut instances = self.instances.lock().unwrap();
        let inst = instances
            .get_mut(instance_id)
            .ok_or_else(|| anyhow::anyhow!("no such instance '{}'", instance_id))?;
        inst.running = true;
        if inst.address.is_empty() {
            inst.address = format!("tcp://{}:9502", inst.name);
        }
        let updated = inst.clone();
        Self::sync_instance(&mut volumes, &updated);
        Ok(updated)
    }

    async fn stop_instance(&self, instance_id: &str) -> anyhow::Result<InstanceInfo> {
        let mut volumes = self.volumes.lock().unwrap();
        let mut instances = self.instances.lock().unwrap();
        let inst = instances
            .get_mut(instance_id)
            .ok_or_else(|| anyhow::anyhow!("no such instance '{}'", instance_id))?;
        if self.fail_replica_stop.load(Ordering::Relaxed) && inst.name.contains("-replica-") {
            anyhow::bail!("injected stop failure for '{}'", inst.name);
        }
        inst.running = false;
        let updated = inst.clone();
        Self::sync_instance(&mut volumes, &updated);
        Ok(updated)
    }

    async fn remove_instance(&self, instance_id: &str) -> anyhow::Result<()> {
        let mut volumes = self.volumes.lock().unwrap();
        self.instances.lock().unwrap().remove(instance_id);
        for vol in volumes.values_mut() {
            if let Some(ctrl) = &vol.controller {
                if ctrl.instance.id == instance_id {
                    vol.controller = None;
                }
            }
            vol.replicas.retain(|_, r| r.instance.id != instance_id);
        }
        Ok(())
    }

    async fn mark_bad_replica(
        &self,
        volume_name: &str,
        replica: &ReplicaInfo,
    ) -> anyhow::Result<()> {
        let mut volumes = self.volumes.lock().unwrap();
        let vol = volumes
            .get_mut(volume_name)
            .ok_or_else(|| anyhow::anyhow!("volume '{}' does not exist", volume_name))?;
        let found = vol
            .replicas
            .values_mut()
            .find(|r| r.instance.address == replica.instance.address)
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "no replica with address '{}' in volume '{}'",
                    replica.instance.address,
                    volume_name
                )
            })?;
        found.bad_timestamp = Some(Utc::now().to_rfc3339());
        Ok(())
    }

    fn get_current_host_id(&self) -> String {
        self.host_id.clone()
    }

    async fn list_hosts(&self) -> anyhow::Result<HashMap<String, HostInfo>> {
        let mut hosts = HashMap::new();
        hosts.insert(
            self.host_id.clone(),
            HostInfo {
                uuid: self.host_id.clone(),
                name: self.host_id.clone(),
                address: "127.0.0.1".to_string(),
            },
        );
        Ok(hosts)
    }

    async fn get_host(&self, id: &str) -> anyhow::Result<Option<HostInfo>> {
        Ok(self.list_hosts().await?.remove(id))
    }

    fn scheduler(&self) -> Arc<dyn JobScheduler> {
        Arc::clone(&self.scheduler) as Arc<dyn JobScheduler>
    }
}

/// Scheduler double that records every call.
#[derive(Default)]
pub struct RecordingScheduler {
    calls: Mutex<Vec<(String, Vec<RecurringJob>)>>,
}

impl RecordingScheduler {
    pub fn calls(&self) -> Vec<(String, Vec<RecurringJob>)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl JobScheduler for RecordingScheduler {
    async fn schedule(&self, volume_name: &str, jobs: &[RecurringJob]) -> anyhow::Result<()> {
        self.calls.lock().unwrap().push((volume_name.to_string(), jobs.to_vec()));
        Ok(())
    }

    async fn unschedule(&self, volume_name: &str) -> anyhow::Result<()> {
        self.calls.lock().unwrap().push((volume_name.to_string(), Vec::new()));
        Ok(())
    }
}

pub struct MockSettings {
    pub info: SettingsInfo,
}

#[async_trait]
impl Settings for MockSettings {
    async fn get_settings(&self) -> anyhow::Result<SettingsInfo> {
        Ok(self.info.clone())
    }
}

#[derive(Default)]
pub struct MockBackupCatalog {
    backups: Mutex<HashMap<String, BackupInfo>>,
}

impl MockBackupCatalog {
    pub fn insert(&self, backup: BackupInfo) {
        self.backups.lock().unwrap().insert(backup.url.clone(), backup);
    }
}

#[async_trait]
impl BackupCatalog for MockBackupCatalog {
    async fn get(&self, backup_url: &str) -> anyhow::Result<Option<BackupInfo>> {
        Ok(self.backups.lock().unwrap().get(backup_url).cloned())
    }
}

/// Install the scripted engine stand-in. State files (ls output, info JSON,
/// call logs, failure flags) live next to the script.
pub fn install_fake_engine(dir: &Path) -> PathBuf {
    let script = r#"#!/bin/sh
dir="$(dirname "$0")"
if [ "$1" = "--url" ]; then
    shift 2
fi
case "$1" in
    ls) cat "$dir/ls.out" ;;
    info) cat "$dir/info.json" ;;
    add)
        if [ -e "$dir/fail_add" ]; then echo "add refused" >&2; exit 1; fi
        echo "$2" >> "$dir/added.log"
        ;;
    rm) echo "$2" >> "$dir/removed.log" ;;
    snapshot)
        case "$2" in
            create) echo "$3" ;;
            ls) cat "$dir/snapshot_ls.out" ;;
            rm|revert) : ;;
            *) exit 2 ;;
        esac
        ;;
    backup)
        case "$2" in
            create) echo "vbs://store/backup-000" ;;
            restore)
                if [ -e "$dir/fail_restore" ]; then echo "restore refused" >&2; exit 1; fi
                echo "$3" >> "$dir/restored.log"
                ;;
            inspect) cat "$dir/backup.json" ;;
            *) exit 2 ;;
        esac
        ;;
    *) echo "unknown command: $1" >&2; exit 2 ;;
esac
"#;
    let path = dir.join("fake-engine");
    std::fs::write(&path, script).expect("write fake engine");
    let mut perms = std::fs::metadata(&path).expect("stat fake engine").permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).expect("chmod fake engine");
    path
}

/// A manager wired to the mock orchestrator and the scripted engine.
pub struct Harness {
    pub orc: Arc<MockOrchestrator>,
    pub catalog: Arc<MockBackupCatalog>,
    pub man: Arc<VolumeManager>,
    pub config: ManagerConfig,
    pub settings: SettingsInfo,
    pub engine: TempDir,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_settings(SettingsInfo {
            engine_image: "volplane-engine:test".to_string(),
            backup_target: "vbs://store".to_string(),
            syslog_target: String::new(),
        })
    }

    pub fn with_settings(info: SettingsInfo) -> Self {
        let engine = TempDir::new().expect("engine tempdir");
        let binary = install_fake_engine(engine.path());

        let orc = MockOrchestrator::new("host-1");
        let catalog = Arc::new(MockBackupCatalog::default());
        let config = ManagerConfig {
            engine_binary: binary,
            engine_timeout: Duration::from_secs(5),
            ..Default::default()
        };
        let man = VolumeManager::new(
            Arc::clone(&orc) as Arc<dyn Orchestrator>,
            Arc::new(MockSettings { info: info.clone() }),
            Arc::clone(&catalog) as Arc<dyn BackupCatalog>,
            config.clone(),
        );

        let harness = Self { orc, catalog, man, config, settings: info, engine };
        harness.write_ls(&[]);
        harness.write_info("/dev/volplane/v1");
        harness
    }

    /// A second manager over the same orchestrator, as after a restart.
    pub fn new_manager(&self) -> Arc<VolumeManager> {
        VolumeManager::new(
            Arc::clone(&self.orc) as Arc<dyn Orchestrator>,
            Arc::new(MockSettings { info: self.settings.clone() }),
            Arc::clone(&self.catalog) as Arc<dyn BackupCatalog>,
            self.config.clone(),
        )
    }

    pub fn engine_path(&self, file: &str) -> PathBuf {
        self.engine.path().join(file)
    }

    /// Write the `ls` output the engine will report: header plus lines.
    pub fn write_ls(&self, lines: &[&str]) {
        let mut out = String::from("ADDRESS MODE CHAIN\n");
        for line in lines {
            out.push_str(line);
            out.push('\n');
        }
        std::fs::write(self.engine_path("ls.out"), out).expect("write ls.out");
    }

    pub fn write_info(&self, endpoint: &str) {
        let info = format!(
            r#"{{"name":"v1","replicaCount":2,"endpoint":"{}"}}"#,
            endpoint
        );
        std::fs::write(self.engine_path("info.json"), info).expect("write info.json");
    }

    pub fn read_log(&self, name: &str) -> Vec<String> {
        match std::fs::read_to_string(self.engine_path(name)) {
            Ok(content) => content.lines().map(str::to_string).collect(),
            Err(_) => Vec::new(),
        }
    }

    pub fn set_flag(&self, name: &str, on: bool) {
        let path = self.engine_path(name);
        if on {
            std::fs::write(path, "").expect("set flag");
        } else {
            let _ = std::fs::remove_file(path);
        }
    }
}

/// New volume request with sensible test defaults.
pub fn volume_spec(name: &str, replicas: usize) -> VolumeInfo {
    VolumeInfo {
        name: name.to_string(),
        size: 1 << 30,
        number_of_replicas: replicas,
        stale_replica_timeout: 20,
        ..Default::default()
    }
}

/// Poll a condition until it holds or a deadline passes.
pub async fn wait_for(what: &str, mut cond: impl FnMut() -> bool) {
    for _ in 0..200 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("timed out waiting for {}", what);
}
