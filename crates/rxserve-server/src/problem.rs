//! Problem-details responses.
//!
//! The only place in the repository that knows which HTTP status a
//! failure maps to. The mapping is a pure function so tests can assert
//! it in both directions.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use rxserve_core::{FailureKind, FieldErrors};
use serde::Serialize;

/// `Retry-After` attached to backend-unavailability responses, which
/// carry no back-off of their own.
const BACKEND_RETRY_AFTER_SECONDS: u64 = 30;

/// The HTTP status for a failure.
pub fn status_for(failure: &FailureKind) -> StatusCode {
    match failure {
        FailureKind::Validation(_) => StatusCode::BAD_REQUEST,
        // 403 is reserved for a future authorization collaborator; the
        // core only learns "no usable identity".
        FailureKind::Unauthorized => StatusCode::UNAUTHORIZED,
        FailureKind::NotFound(_) => StatusCode::NOT_FOUND,
        FailureKind::Conflict(_) => StatusCode::CONFLICT,
        FailureKind::Rejected { .. } => StatusCode::TOO_MANY_REQUESTS,
        FailureKind::TimeoutExceeded => StatusCode::REQUEST_TIMEOUT,
        FailureKind::Transient(_) | FailureKind::PermanentBackend(_) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        FailureKind::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
    }
}

fn title_for(failure: &FailureKind) -> &'static str {
    match failure {
        FailureKind::Validation(_) => "One or more validation errors occurred.",
        FailureKind::Unauthorized => "Authentication required.",
        FailureKind::NotFound(_) => "Resource not found.",
        FailureKind::Conflict(_) => "Request conflicts with resource state.",
        FailureKind::Rejected { .. } => "Service is under pressure.",
        FailureKind::TimeoutExceeded => "Request timed out.",
        FailureKind::Transient(_) | FailureKind::PermanentBackend(_) => {
            "A backing service is unavailable."
        }
        FailureKind::ShuttingDown => "Service is shutting down.",
    }
}

/// The problem-details body.
#[derive(Debug, Serialize)]
pub struct Problem {
    #[serde(rename = "type")]
    pub kind: String,
    pub title: String,
    pub status: u16,
    pub detail: String,
    #[serde(rename = "traceId")]
    pub trace_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<FieldErrors>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// A failure plus the correlation it occurred under; renders as a
/// problem-details response.
#[derive(Debug)]
pub struct ApiError {
    pub failure: FailureKind,
    pub correlation_id: String,
}

impl ApiError {
    pub fn new(failure: FailureKind, correlation_id: impl Into<String>) -> Self {
        Self {
            failure,
            correlation_id: correlation_id.into(),
        }
    }

    fn retry_after(&self) -> Option<u64> {
        match &self.failure {
            FailureKind::Rejected { retry_after, .. } => Some(*retry_after),
            FailureKind::Transient(_)
            | FailureKind::PermanentBackend(_)
            | FailureKind::ShuttingDown => Some(BACKEND_RETRY_AFTER_SECONDS),
            _ => None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.failure);
        let retry_after = self.retry_after();

        let (errors, reason) = match &self.failure {
            FailureKind::Validation(errors) => (Some(errors.clone()), None),
            FailureKind::Rejected { reason, .. } => (None, Some(reason.clone())),
            _ => (None, None),
        };

        let problem = Problem {
            kind: format!("urn:rxserve:error:{}", self.failure.label()),
            title: title_for(&self.failure).to_string(),
            status: status.as_u16(),
            detail: self.failure.to_string(),
            trace_id: self.correlation_id,
            errors,
            reason,
        };

        let mut response = (status, Json(problem)).into_response();
        if let Some(seconds) = retry_after {
            if let Ok(value) = HeaderValue::from_str(&seconds.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_failure_kind_maps_to_its_status() {
        let table = [
            (
                FailureKind::Validation(FieldErrors::single("f", "m")),
                StatusCode::BAD_REQUEST,
            ),
            (FailureKind::Unauthorized, StatusCode::UNAUTHORIZED),
            (FailureKind::NotFound("order".into()), StatusCode::NOT_FOUND),
            (FailureKind::Conflict("stale".into()), StatusCode::CONFLICT),
            (
                FailureKind::Rejected {
                    reason: "Memory: 90% >= 85%".into(),
                    retry_after: 10,
                },
                StatusCode::TOO_MANY_REQUESTS,
            ),
            (FailureKind::TimeoutExceeded, StatusCode::REQUEST_TIMEOUT),
            (
                FailureKind::Transient("connection refused".into()),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                FailureKind::PermanentBackend("constraint".into()),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (FailureKind::ShuttingDown, StatusCode::SERVICE_UNAVAILABLE),
        ];

        for (failure, status) in table {
            assert_eq!(status_for(&failure), status, "mapping for {failure:?}");
        }
    }

    #[test]
    fn statuses_map_back_to_the_expected_kind_sets() {
        // The inverse direction: each interesting status is produced
        // only by the kinds the contract names.
        let kinds = [
            FailureKind::Validation(FieldErrors::single("f", "m")),
            FailureKind::Unauthorized,
            FailureKind::NotFound("order".into()),
            FailureKind::Conflict("stale".into()),
            FailureKind::Rejected {
                reason: "r".into(),
                retry_after: 1,
            },
            FailureKind::TimeoutExceeded,
            FailureKind::Transient("t".into()),
            FailureKind::PermanentBackend("p".into()),
            FailureKind::ShuttingDown,
        ];

        let of_status = |status: StatusCode| {
            kinds
                .iter()
                .filter(|kind| status_for(kind) == status)
                .count()
        };

        assert_eq!(of_status(StatusCode::BAD_REQUEST), 1);
        assert_eq!(of_status(StatusCode::UNAUTHORIZED), 1);
        assert_eq!(of_status(StatusCode::NOT_FOUND), 1);
        assert_eq!(of_status(StatusCode::CONFLICT), 1);
        assert_eq!(of_status(StatusCode::TOO_MANY_REQUESTS), 1);
        assert_eq!(of_status(StatusCode::REQUEST_TIMEOUT), 1);
        assert_eq!(of_status(StatusCode::SERVICE_UNAVAILABLE), 3);
    }

    #[test]
    fn rejected_carries_its_own_retry_after() {
        let error = ApiError::new(
            FailureKind::Rejected {
                reason: "Memory: 90% >= 85%".into(),
                retry_after: 10,
            },
            "cid",
        );
        assert_eq!(error.retry_after(), Some(10));

        let backend = ApiError::new(FailureKind::Transient("down".into()), "cid");
        assert_eq!(backend.retry_after(), Some(BACKEND_RETRY_AFTER_SECONDS));

        let not_found = ApiError::new(FailureKind::NotFound("order".into()), "cid");
        assert_eq!(not_found.retry_after(), None);
    }
}
