//! Failure taxonomy shared by every subsystem.
//!
//! Failures are values: subsystems return [`FailureKind`] and the HTTP
//! adapter translates them into problem-details responses. Retry decisions
//! key off the variant, never off message text.

use serde::Serialize;
use std::collections::BTreeMap;

/// Per-field validation messages, keyed by field name.
///
/// The map is ordered so serialized error envelopes are stable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct FieldErrors(BTreeMap<String, Vec<String>>);

impl FieldErrors {
    /// Creates an empty error map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a map holding a single message for a single field.
    pub fn single(field: impl Into<String>, message: impl Into<String>) -> Self {
        let mut errors = Self::new();
        errors.push(field, message);
        errors
    }

    /// Appends a message for a field.
    pub fn push(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.0.entry(field.into()).or_default().push(message.into());
    }

    /// Returns true if no field has any message.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates over `(field, messages)` pairs in field order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// Converts the collected messages into a pipeline result.
    pub fn into_result(self) -> Result<(), FailureKind> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(FailureKind::Validation(self))
        }
    }
}

/// Everything that can go wrong between the HTTP adapter and the stores.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FailureKind {
    /// The request payload or parameters failed validation.
    #[error("validation failed")]
    Validation(FieldErrors),
    /// The addressed resource does not exist.
    #[error("{0} not found")]
    NotFound(String),
    /// The caller presented no usable identity.
    #[error("unauthorized")]
    Unauthorized,
    /// The request conflicts with current resource state.
    #[error("conflict: {0}")]
    Conflict(String),
    /// A backend failed in a way that is expected to heal; retried by the
    /// resilient executor before being surfaced.
    #[error("transient backend failure: {0}")]
    Transient(String),
    /// A backend failed in a way retrying will not fix.
    #[error("backend failure: {0}")]
    PermanentBackend(String),
    /// The request exceeded its deadline.
    #[error("request timed out")]
    TimeoutExceeded,
    /// The admission controller refused the request.
    #[error("request rejected: {reason}")]
    Rejected {
        /// Human-readable rejection detail, e.g. `"Memory: 90% >= 85%"`.
        reason: String,
        /// Seconds the caller should wait before retrying.
        retry_after: u64,
    },
    /// The process is draining and accepts no new work.
    #[error("service is shutting down")]
    ShuttingDown,
}

impl FailureKind {
    /// Stable label for logs and metric tags.
    pub fn label(&self) -> &'static str {
        match self {
            FailureKind::Validation(_) => "validation",
            FailureKind::NotFound(_) => "not_found",
            FailureKind::Unauthorized => "unauthorized",
            FailureKind::Conflict(_) => "conflict",
            FailureKind::Transient(_) => "transient",
            FailureKind::PermanentBackend(_) => "permanent_backend",
            FailureKind::TimeoutExceeded => "timeout",
            FailureKind::Rejected { .. } => "rejected",
            FailureKind::ShuttingDown => "shutting_down",
        }
    }

    /// `Retry-After` seconds carried by the failure itself.
    ///
    /// Only admission rejections know their own back-off; backend
    /// unavailability gets a hint from server configuration instead.
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            FailureKind::Rejected { retry_after, .. } => Some(*retry_after),
            _ => None,
        }
    }

    /// Whether the resilient executor may re-run an operation that
    /// produced this failure.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FailureKind::Transient(_))
    }
}
