//! Outcome model: the classified result of one upload attempt.
//!
//! Workers only ever report one of these. Classification is all the retry
//! policy looks at, so every backend failure must be mapped onto an
//! `UploadErrorKind` before it leaves the backend adapter.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Whether a failure may succeed if the same request is sent again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    Retryable,
    Terminal,
}

/// Classified upload failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadErrorKind {
    /// The device has no route to the backend.
    NoConnectivity,
    /// The attempt exceeded its time budget.
    Timeout,
    /// 5xx / backend temporarily unavailable.
    ServerUnavailable,
    /// Backend asked us to slow down.
    RateLimited,
    /// Authentication or authorization rejected.
    Unauthorized,
    /// Backend rejected the payload as invalid.
    InvalidPayload,
    /// The owning event no longer accepts captures.
    CaptureClosed,
    /// Storage quota or per-event limit exceeded.
    QuotaExceeded,
    /// The identity provider could not attribute the capture.
    AttributionUnavailable,
    /// The local payload could not be read back.
    PayloadMissing,
}

impl UploadErrorKind {
    pub fn class(self) -> ErrorClass {
        match self {
            UploadErrorKind::NoConnectivity
            | UploadErrorKind::Timeout
            | UploadErrorKind::ServerUnavailable
            | UploadErrorKind::RateLimited => ErrorClass::Retryable,
            UploadErrorKind::Unauthorized
            | UploadErrorKind::InvalidPayload
            | UploadErrorKind::CaptureClosed
            | UploadErrorKind::QuotaExceeded
            | UploadErrorKind::AttributionUnavailable
            | UploadErrorKind::PayloadMissing => ErrorClass::Terminal,
        }
    }

    pub fn is_retryable(self) -> bool {
        self.class() == ErrorClass::Retryable
    }

    /// Failures raised before any request left the device.
    ///
    /// These never count as an attempt.
    pub fn is_pre_dispatch(self) -> bool {
        matches!(
            self,
            UploadErrorKind::AttributionUnavailable | UploadErrorKind::PayloadMissing
        )
    }
}

impl fmt::Display for UploadErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UploadErrorKind::NoConnectivity => "no connectivity",
            UploadErrorKind::Timeout => "timeout",
            UploadErrorKind::ServerUnavailable => "server unavailable",
            UploadErrorKind::RateLimited => "rate limited",
            UploadErrorKind::Unauthorized => "unauthorized",
            UploadErrorKind::InvalidPayload => "invalid payload",
            UploadErrorKind::CaptureClosed => "event no longer accepts captures",
            UploadErrorKind::QuotaExceeded => "quota exceeded",
            UploadErrorKind::AttributionUnavailable => "attribution unavailable",
            UploadErrorKind::PayloadMissing => "payload missing",
        };
        f.write_str(s)
    }
}

/// A classified error plus a human-readable detail, kept as `lastError`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct UploadError {
    pub kind: UploadErrorKind,
    pub message: String,
}

impl UploadError {
    pub fn new(kind: UploadErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn class(&self) -> ErrorClass {
        self.kind.class()
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

/// Result of one upload attempt as reported by a worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum UploadOutcome {
    Success,
    Failed { error: UploadError },
}

impl UploadOutcome {
    pub fn failed(kind: UploadErrorKind, message: impl Into<String>) -> Self {
        UploadOutcome::Failed {
            error: UploadError::new(kind, message),
        }
    }

    /// Whether the upload request actually went out for this attempt.
    pub fn was_dispatched(&self) -> bool {
        match self {
            UploadOutcome::Success => true,
            UploadOutcome::Failed { error } => !error.kind.is_pre_dispatch(),
        }
    }
}

impl From<Result<(), UploadError>> for UploadOutcome {
    fn from(result: Result<(), UploadError>) -> Self {
        match result {
            Ok(()) => UploadOutcome::Success,
            Err(error) => UploadOutcome::Failed { error },
        }
    }
}
