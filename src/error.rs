//! Crate-wide error type.
//!
//! Every error surfaced by the pipeline core maps to one of a small set of
//! typed kinds: preconditions, provider failures, contract violations,
//! optional (non-fatal) failures, timeouts, cancellation, preset version
//! conflicts, and request validation.

use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Whether a provider failure class should be retried with backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    /// 5xx, rate-limited, or network-level failure. Retried with backoff.
    Transient,
    /// Auth failure. Never retried.
    Auth,
    /// Content-policy rejection. Never retried.
    ContentPolicy,
}

impl ProviderErrorKind {
    pub fn is_retryable(self) -> bool {
        matches!(self, ProviderErrorKind::Transient)
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("stage '{stage}' precondition not met: {detail}")]
    Precondition { stage: String, detail: String },

    #[error("provider call failed in stage '{stage}' ({kind:?}): {message}")]
    Provider {
        stage: String,
        kind: ProviderErrorKind,
        message: String,
    },

    #[error("stage '{stage}' violated its output contract: {detail}")]
    ContractViolation { stage: String, detail: String },

    #[error("optional step '{step}' failed: {message}")]
    Optional { step: String, message: String },

    #[error("stage '{stage}' exceeded its {limit:?} timeout")]
    StageTimeout { stage: String, limit: Duration },

    #[error("stage '{stage}' was cancelled")]
    Cancelled { stage: String },

    #[error("preset '{preset_id}' update rejected: expected version {expected}, got {actual}")]
    PresetVersionConflict {
        preset_id: String,
        expected: i64,
        actual: i64,
    },

    #[error("request validation failed: {0}")]
    Validation(String),

    #[error("preset '{0}' not found")]
    PresetNotFound(String),

    #[error("preset '{preset_id}' does not belong to user '{user_id}'")]
    PresetForbidden { preset_id: String, user_id: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl Error {
    pub fn precondition(stage: impl Into<String>, detail: impl Into<String>) -> Self {
        Error::Precondition {
            stage: stage.into(),
            detail: detail.into(),
        }
    }

    pub fn contract_violation(stage: impl Into<String>, detail: impl Into<String>) -> Self {
        Error::ContractViolation {
            stage: stage.into(),
            detail: detail.into(),
        }
    }

    /// The transport-agnostic error kind string persisted into
    /// `pipeline_metadata.json` diagnostics and emitted on `run_failed`/`stage_failed`.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Error::Precondition { .. } => "precondition_error",
            Error::Provider { .. } => "provider_error",
            Error::ContractViolation { .. } => "contract_violation",
            Error::Optional { .. } => "optional_failure",
            Error::StageTimeout { .. } => "stage_timeout",
            Error::Cancelled { .. } => "cancelled",
            Error::PresetVersionConflict { .. } => "preset_version_conflict",
            Error::Validation(_) => "validation_error",
            Error::PresetNotFound(_) => "not_found",
            Error::PresetForbidden { .. } => "forbidden",
            Error::Io(_) => "io_error",
            Error::Serde(_) => "serde_error",
        }
    }
}
