//! Error types for hamip-sync.

use std::fmt;

use thiserror::Error;

use crate::sync::Phase;

/// Errors that can abort a sync run.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Registry transport failure or malformed registry payload.
    #[error("Registry fetch error: {0}")]
    RegistryFetch(String),

    /// Zone transport failure, malformed zone payload or missing serial fields.
    #[error("Zone fetch error for {zone}: {reason}")]
    ZoneFetch {
        /// Zone being read.
        zone: String,
        /// What went wrong.
        reason: String,
    },

    /// A patch batch was rejected; no further batches were attempted.
    #[error("{0}")]
    Patch(Box<PatchFailure>),

    /// API key missing, unreadable or empty.
    #[error("Credential error: {0}")]
    Credential(String),

    /// Invalid configuration or static override file.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// IO error (file, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP client construction error.
    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),
}

/// Failure of a zone-update transport call before any status was received.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct TransportError(pub String);

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        Self(e.to_string())
    }
}

/// Diagnostic details for a rejected patch batch.
#[derive(Debug)]
pub struct PatchFailure {
    /// Zone being patched.
    pub zone: String,
    /// Phase the failing batch belonged to.
    pub phase: Phase,
    /// Zero-based index of the failing batch within its phase.
    pub batch: usize,
    /// HTTP status, or `None` if the request never got a response.
    pub status: Option<u16>,
    /// Response body or transport error text.
    pub body: String,
    /// The JSON payload of the failing batch.
    pub payload: serde_json::Value,
    /// Number of operations in the failing batch.
    pub operations: usize,
    /// Batches (removal and replacement) applied before the failure.
    pub applied_batches: usize,
}

impl fmt::Display for PatchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = self
            .status
            .map(|s| s.to_string())
            .unwrap_or_else(|| "no response".to_string());
        write!(
            f,
            "Patch error on {} during {}: batch {} ({} operations) returned {}: {} ({} batches applied before failure)",
            self.zone,
            self.phase,
            self.batch,
            self.operations,
            status,
            self.body,
            self.applied_batches
        )
    }
}

impl From<PatchFailure> for SyncError {
    fn from(failure: PatchFailure) -> Self {
        SyncError::Patch(Box::new(failure))
    }
}
