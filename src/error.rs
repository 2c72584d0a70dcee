//! Error types for volplane.
//!
//! All errors use `thiserror` for ergonomic error handling and proper error
//! chains. Collaborator failures (orchestrator, settings, backup catalog)
//! arrive as opaque `anyhow::Error` values and are wrapped with volume and
//! replica context at the call site.

use thiserror::Error;

/// Result type alias for volplane operations.
pub type Result<T> = std::result::Result<T, VolplaneError>;

/// Main error type for volplane.
#[derive(Error, Debug)]
pub enum VolplaneError {
    /// An orchestrator call failed. The inner error is opaque to the core.
    #[error("{context}")]
    Orchestrator {
        context: String,
        #[source]
        source: anyhow::Error,
    },

    /// An engine wire command against a controller process failed.
    ///
    /// The monitor loop recognizes this kind and tolerates a bounded number
    /// of consecutive occurrences before forcing a detach.
    #[error("engine command failed for volume '{volume}': {reason}")]
    Controller { volume: String, reason: String },

    #[error("parse error: {reason}")]
    Parse { reason: String },

    #[error("volume '{volume}' not found")]
    VolumeNotFound { volume: String },

    #[error("replica '{replica}' not found for volume '{volume}'")]
    ReplicaNotFound { volume: String, replica: String },

    #[error("volume '{volume}' already exists")]
    AlreadyExists { volume: String },

    #[error("invalid configuration: {reason}")]
    Config { reason: String },

    #[error(transparent)]
    Aggregate(#[from] AggregateError),

    #[error("{0}")]
    Internal(String),
}

impl VolplaneError {
    /// Wrap an opaque collaborator error with human-readable context.
    pub fn orchestrator(context: impl Into<String>, source: anyhow::Error) -> Self {
        Self::Orchestrator { context: context.into(), source }
    }

    /// True when this error came from the controller wire.
    pub fn is_controller(&self) -> bool {
        matches!(self, Self::Controller { .. })
    }
}

/// Collects errors from a fan-out over replicas so that a single failure
/// does not mask the others.
///
/// An empty aggregate converts back into success via [`AggregateError::into_result`].
#[derive(Debug, Default)]
pub struct AggregateError {
    errors: Vec<VolplaneError>,
}

impl AggregateError {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, err: VolplaneError) {
        self.errors.push(err);
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn errors(&self) -> &[VolplaneError] {
        &self.errors
    }

    /// `Ok(())` when no error was collected, the aggregate otherwise.
    pub fn into_result(self) -> Result<()> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(VolplaneError::Aggregate(self))
        }
    }
}

impl std::fmt::Display for AggregateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} error(s): ", self.errors.len())?;
        for (i, err) in self.errors.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{}", err)?;
        }
        Ok(())
    }
}

impl std::error::Error for AggregateError {}
