//! Manager-level settings.
//!
//! Settings storage lives outside the core; the manager only reads the
//! current values through the [`Settings`] collaborator.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Current manager settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingsInfo {
    /// Default engine image for volumes that do not name one
    pub engine_image: String,

    /// Backup store URL used to resolve `from_backup` volumes
    pub backup_target: String,

    /// Syslog endpoint for event forwarding
    pub syslog_target: String,
}

/// Read access to the externally stored settings.
#[async_trait]
pub trait Settings: Send + Sync {
    async fn get_settings(&self) -> anyhow::Result<SettingsInfo>;
}
