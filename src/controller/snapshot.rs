//! Snapshot wire dispatch.
//!
//! The core does not manage snapshot contents; it only forwards snapshot
//! commands to the controller that owns them.

use crate::controller::Controller;
use crate::error::Result;
use std::sync::Arc;

/// Snapshot operations bound to one controller.
pub struct SnapshotOps {
    ctrl: Arc<Controller>,
}

impl SnapshotOps {
    pub(crate) fn new(ctrl: Arc<Controller>) -> Self {
        Self { ctrl }
    }

    /// Create a snapshot and return its name as reported by the engine.
    pub async fn create(&self, name: &str) -> Result<String> {
        let out = self.ctrl.engine(&["snapshot", "create", name]).await?;
        Ok(out.trim().to_string())
    }

    /// Snapshot names known to the controller. The first line of `snapshot
    /// ls` output is a header and skipped.
    pub async fn list(&self) -> Result<Vec<String>> {
        let out = self.ctrl.engine(&["snapshot", "ls"]).await?;
        Ok(out
            .lines()
            .skip(1)
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    pub async fn delete(&self, name: &str) -> Result<()> {
        self.ctrl.engine(&["snapshot", "rm", name]).await?;
        Ok(())
    }

    pub async fn revert(&self, name: &str) -> Result<()> {
        self.ctrl.engine(&["snapshot", "revert", name]).await?;
        Ok(())
    }
}
