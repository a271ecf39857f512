//! HTTP middlewares: correlation, admission, authentication.

use crate::problem::ApiError;
use crate::state::AppState;
use axum::extract::{Request, State};
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use rxserve_core::{FailureKind, Identity, RequestContext};

pub const CORRELATION_HEADER: &str = "x-correlation-id";
pub const API_KEY_HEADER: &str = "x-api-key";

/// The request's correlation id, minted when the caller sent none.
#[derive(Debug, Clone)]
pub struct Correlation(pub String);

/// The authenticated caller, when the key check is enabled.
#[derive(Debug, Clone)]
pub struct AuthedIdentity(pub Option<Identity>);

/// Reads or mints the correlation id and echoes it on the response.
pub async fn correlation(mut request: Request, next: Next) -> Response {
    let id = request
        .headers()
        .get(CORRELATION_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned)
        .unwrap_or_else(RequestContext::mint_correlation_id);

    request.extensions_mut().insert(Correlation(id.clone()));
    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&id) {
        response.headers_mut().insert(CORRELATION_HEADER, value);
    }
    response
}

fn correlation_of(request: &Request) -> String {
    request
        .extensions()
        .get::<Correlation>()
        .map(|correlation| correlation.0.clone())
        .unwrap_or_default()
}

/// Rejects requests while the service is over pressure or draining.
pub async fn admit(State(state): State<AppState>, request: Request, next: Next) -> Response {
    match state.admission.decide().into_failure() {
        None => next.run(request).await,
        Some(failure) => ApiError::new(failure, correlation_of(&request)).into_response(),
    }
}

/// API-key check. An empty configured key set disables authentication;
/// otherwise a missing or unknown key is a 401.
pub async fn authenticate(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let keys = &state.config.auth.api_keys;
    let identity = if keys.is_empty() {
        None
    } else {
        let presented = request
            .headers()
            .get(API_KEY_HEADER)
            .and_then(|value| value.to_str().ok());
        let matched = presented.and_then(|candidate| {
            keys.iter().position(|key| constant_time_eq(key, candidate))
        });
        match matched {
            Some(index) => Some(Identity {
                key_id: format!("key-{index}"),
            }),
            None => {
                return ApiError::new(FailureKind::Unauthorized, correlation_of(&request))
                    .into_response()
            }
        }
    };

    request.extensions_mut().insert(AuthedIdentity(identity));
    next.run(request).await
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes()
        .zip(b.bytes())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_time_eq_matches_equal_strings_only() {
        assert!(constant_time_eq("secret-key", "secret-key"));
        assert!(!constant_time_eq("secret-key", "secret-kez"));
        assert!(!constant_time_eq("secret-key", "secret"));
    }
}
