//! Error types for the Piraeus Operator
//!
//! Provides structured error types for reconciliation, the LINSTOR client,
//! patch application and node property resolution. Admission-style
//! validation defects are not errors: see [`crate::validation::ErrorList`].

use std::time::Duration;
use thiserror::Error;

/// Unified error type for the operator
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    // =========================================================================
    // Kubernetes Errors
    // =========================================================================
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("Resource not found: {kind}/{name}")]
    ResourceNotFound { kind: String, name: String },

    #[error("Invalid resource {kind}/{name}: {reason}")]
    InvalidResource {
        kind: String,
        name: String,
        reason: String,
    },

    // =========================================================================
    // LINSTOR Errors
    // =========================================================================
    #[error("LINSTOR connection error: {0}")]
    LinstorConnection(#[from] reqwest::Error),

    #[error("LINSTOR API error ({status}) during {operation}: {message}")]
    LinstorApi {
        operation: String,
        status: u16,
        message: String,
    },

    #[error("LINSTOR response parse error: {0}")]
    LinstorResponseParse(String),

    // =========================================================================
    // Patch Errors
    // =========================================================================
    #[error("Invalid patch: {0}")]
    PatchParse(String),

    #[error("Invalid patch target selector: {0}")]
    PatchTarget(String),

    #[error("Failed to apply patch to {target}: {reason}")]
    PatchApply { target: String, reason: String },

    // =========================================================================
    // Property / Storage Pool Errors
    // =========================================================================
    #[error("Invalid field path '{path}': {reason}")]
    FieldPath { path: String, reason: String },

    #[error("Failed to resolve property {name}: {reason}")]
    PropertyResolution { name: String, reason: String },

    #[error("Storage pool {pool} must specify exactly 1 type of storage pool, got {count}")]
    PoolBackend { pool: String, count: usize },

    // =========================================================================
    // Manifest Errors
    // =========================================================================
    #[error("Manifest generation failed: {0}")]
    Manifest(String),

    #[error("No image configured for component {0}")]
    MissingImage(String),

    // =========================================================================
    // Parse Errors
    // =========================================================================
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    // =========================================================================
    // IO Errors
    // =========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Action to take on error during reconciliation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    /// Requeue with exponential backoff
    RequeueWithBackoff,
    /// Requeue after specific duration
    RequeueAfter(Duration),
    /// Don't requeue, wait for changes
    NoRequeue,
}

impl Error {
    /// Determine what action to take for this error
    pub fn action(&self) -> ErrorAction {
        match self {
            // Transient errors - retry with backoff
            Error::LinstorConnection(_) | Error::Kube(_) | Error::LinstorApi { .. } => {
                ErrorAction::RequeueWithBackoff
            }

            // Spec defects persisted before validation existed: wait for the user
            // to edit the resource, but check back occasionally.
            Error::PatchParse(_)
            | Error::PatchTarget(_)
            | Error::PatchApply { .. }
            | Error::FieldPath { .. }
            | Error::PropertyResolution { .. }
            | Error::PoolBackend { .. }
            | Error::InvalidResource { .. } => {
                ErrorAction::RequeueAfter(Duration::from_secs(300))
            }

            Error::Configuration(_) | Error::MissingImage(_) => ErrorAction::NoRequeue,

            // All other errors - retry with backoff
            _ => ErrorAction::RequeueWithBackoff,
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        !matches!(self.action(), ErrorAction::NoRequeue)
    }

    /// Check if this error is transient
    pub fn is_transient(&self) -> bool {
        match self {
            Error::LinstorConnection(_) | Error::Kube(_) => true,
            Error::LinstorApi { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    /// Check if this error is a "not found" answer from the LINSTOR API
    pub fn is_linstor_not_found(&self) -> bool {
        matches!(self, Error::LinstorApi { status: 404, .. })
    }
}

/// Result type alias for the operator
pub type Result<T> = std::result::Result<T, Error>;
