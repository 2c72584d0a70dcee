//! Single-owner registry for controller handles.
//!
//! One task owns the name-to-handle map and services a request channel, so
//! lookups, handle creation and invalidation are totally ordered without
//! per-entry locks. Two callers can never race to install a stale handle
//! after a controller address change.

use crate::config::ManagerConfig;
use crate::controller::Controller;
use crate::types::VolumeInfo;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

enum Request {
    Get { name: String, url: String, reply: oneshot::Sender<Arc<Controller>> },
    Remove { name: String },
}

/// Hands out at most one [`Controller`] handle per live volume.
#[derive(Clone)]
pub struct ControllerRegistry {
    tx: mpsc::Sender<Request>,
}

impl ControllerRegistry {
    /// Spawn the owner task. It performs no blocking work, only handle
    /// allocation, and exits once every registry clone is dropped.
    pub fn new(config: ManagerConfig) -> Self {
        let (tx, mut rx) = mpsc::channel::<Request>(16);

        tokio::spawn(async move {
            let mut handles: HashMap<String, Arc<Controller>> = HashMap::new();

            while let Some(req) = rx.recv().await {
                match req {
                    Request::Get { name, url, reply } => {
                        let handle = match handles.get(&name) {
                            Some(h) if h.url() == url => Arc::clone(h),
                            _ => {
                                // Address change means a new controller
                                // process, which gets a fresh handle.
                                let h = Arc::new(Controller::new(name.clone(), url, &config));
                                handles.insert(name, Arc::clone(&h));
                                h
                            }
                        };
                        let _ = reply.send(handle);
                    }
                    Request::Remove { name } => {
                        handles.remove(&name);
                    }
                }
            }
        });

        Self { tx }
    }

    /// The handle for a volume's running controller.
    ///
    /// Returns `None` when there is no volume, no controller record, or the
    /// controller is not running.
    pub async fn get(&self, volume: Option<&VolumeInfo>) -> Option<Arc<Controller>> {
        let volume = volume?;
        let controller = volume.controller.as_ref()?;
        if !controller.instance.running {
            return None;
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Request::Get {
                name: volume.name.clone(),
                url: controller.instance.address.clone(),
                reply: reply_tx,
            })
            .await
            .ok()?;
        reply_rx.await.ok()
    }

    /// Drop the registry entry for a fully detached volume.
    pub async fn remove(&self, name: &str) {
        let _ = self.tx.send(Request::Remove { name: name.to_string() }).await;
    }
}
