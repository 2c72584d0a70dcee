//! Per-volume monitor loop.
//!
//! One monitor runs for every attached volume whose controller lives on this
//! host. It periodically drives `check_controller` and `cleanup`, consumes
//! recurring-job updates, and tolerates a bounded number of consecutive
//! controller wire failures before forcing a detach. A monitor never
//! outlives a detach: `do_detach` closes it first.

use super::VolumeManager;
use crate::error::Result;
use crate::types::RecurringJob;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

enum Tick {
    Continue,
    Stop,
}

/// Handle to a running per-volume monitor task.
pub(crate) struct VolumeMonitor {
    cron_tx: mpsc::Sender<Vec<RecurringJob>>,
    cancel: CancellationToken,
}

impl VolumeMonitor {
    pub(crate) fn spawn(man: Arc<VolumeManager>, volume_name: String) -> Self {
        let cancel = CancellationToken::new();
        let (cron_tx, cron_rx) = mpsc::channel(4);
        tokio::spawn(run(man, volume_name, cron_rx, cancel.clone()));
        Self { cron_tx, cancel }
    }

    /// Channel for recurring-job updates.
    pub(crate) fn cron_ch(&self) -> mpsc::Sender<Vec<RecurringJob>> {
        self.cron_tx.clone()
    }

    /// Stop the loop. Idempotent, and unblocks the task even when it is
    /// waiting mid-operation.
    pub(crate) fn close(&self) {
        self.cancel.cancel();
    }
}

impl Drop for VolumeMonitor {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run(
    man: Arc<VolumeManager>,
    name: String,
    mut cron_rx: mpsc::Receiver<Vec<RecurringJob>>,
    cancel: CancellationToken,
) {
    let config = man.config().clone();
    let mut check_timer =
        interval_at(Instant::now() + config.check_interval, config.check_interval);
    check_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut cleanup_timer =
        interval_at(Instant::now() + config.cleanup_interval, config.cleanup_interval);
    cleanup_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut controller_errors = 0u32;
    info!(volume = %name, "volume monitor started");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            _ = check_timer.tick() => {
                match check_once(&man, &name).await {
                    Ok(Tick::Stop) => break,
                    Ok(Tick::Continue) => {
                        controller_errors = 0;
                    }
                    Err(e) if e.is_controller() => {
                        controller_errors += 1;
                        metrics::counter!("volplane_controller_errors_total").increment(1);
                        warn!(
                            volume = %name, error = %e, consecutive = controller_errors,
                            "controller unreachable"
                        );
                        if controller_errors >= config.controller_error_limit {
                            error!(volume = %name, "controller error limit reached, forcing detach");
                            if let Err(e) = man.detach(&name).await {
                                error!(volume = %name, error = %e, "forced detach failed");
                            }
                            break;
                        }
                    }
                    Err(e) => {
                        error!(volume = %name, error = %e, "controller check failed");
                    }
                }
            }

            _ = cleanup_timer.tick() => {
                match man.get(&name).await {
                    Ok(Some(volume)) => {
                        if let Err(e) = man.cleanup(&volume).await {
                            error!(volume = %name, error = %e, "bad replica cleanup failed");
                        }
                    }
                    Ok(None) => break,
                    Err(e) => error!(volume = %name, error = %e, "failed to load volume for cleanup"),
                }
            }

            Some(jobs) = cron_rx.recv() => {
                debug!(volume = %name, jobs = jobs.len(), "reprogramming recurring jobs");
                let scheduler = man.orc.scheduler();
                if let Err(e) = scheduler.schedule(&name, &jobs).await {
                    error!(volume = %name, error = %e, "failed to program recurring jobs");
                }
            }
        }
    }

    info!(volume = %name, "volume monitor stopped");
}

async fn check_once(man: &Arc<VolumeManager>, name: &str) -> Result<Tick> {
    let Some(volume) = man.get(name).await? else {
        debug!(volume = %name, "volume gone, monitor exiting");
        return Ok(Tick::Stop);
    };
    let Some(ctrl) = man.registry.get(Some(&volume)).await else {
        debug!(volume = %name, "controller no longer running, monitor exiting");
        return Ok(Tick::Stop);
    };
    man.check_controller(&ctrl, &volume).await?;
    Ok(Tick::Continue)
}
