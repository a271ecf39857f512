//! Route handlers.
//!
//! Each handler mints a request scope, assembles the operation
//! descriptor, and runs the pre-built pipeline under the route's
//! deadline. The envelope/next-link construction for list endpoints
//! happens here because only the HTTP layer knows the request URL.

use crate::middleware::{AuthedIdentity, Correlation};
use crate::ops::*;
use crate::problem::ApiError;
use crate::state::AppState;
use crate::store::OrderFilter;
use axum::extract::{OriginalUri, Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use rxserve_lifecycle::{run_with_deadline, RequestScope};
use rxserve_paging::{paged_envelope, parse_paged_request, PagedRequest, SortWhitelist};
use rxserve_pipeline::{BoxPipeline, Envelope, Operation};
use std::collections::HashMap;
use tower::ServiceExt;

fn order_sort_fields() -> SortWhitelist {
    SortWhitelist::new(["orderDate", "status", "quantity"])
}

fn patient_sort_fields() -> SortWhitelist {
    SortWhitelist::new(["name", "dateOfBirth"])
}

fn prescription_sort_fields() -> SortWhitelist {
    SortWhitelist::new(["medication"])
}

/// Runs one operation through its pipeline inside a fresh request scope.
async fn run<R, T>(
    state: &AppState,
    correlation: &str,
    identity: &AuthedIdentity,
    pipeline: BoxPipeline<R, T>,
    request: R,
) -> Result<T, ApiError>
where
    R: Operation,
    T: Send + 'static,
{
    let name = request.name();
    let scope: RequestScope = state.coordinator.begin_request();
    let ctx = scope.context(correlation, identity.0.clone());
    let budget = state.config.request_timeout.budget_for(name);

    let work = run_with_deadline(&scope, name, budget, pipeline.oneshot(Envelope::new(ctx, request)));
    state
        .coordinator
        .track(work)
        .await
        .map_err(|failure| ApiError::new(failure, correlation.to_string()))
}

fn parse_page(
    params: &HashMap<String, String>,
    state: &AppState,
    whitelist: &SortWhitelist,
    correlation: &str,
) -> Result<PagedRequest, ApiError> {
    parse_paged_request(params, &state.config.pagination, whitelist)
        .map_err(|failure| ApiError::new(failure, correlation.to_string()))
}

// ---------------------------------------------------------------------
// Orders
// ---------------------------------------------------------------------

pub async fn list_orders(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
    Query(params): Query<HashMap<String, String>>,
    Extension(correlation): Extension<Correlation>,
    Extension(identity): Extension<AuthedIdentity>,
) -> Result<Response, ApiError> {
    let page = parse_page(&params, &state, &order_sort_fields(), &correlation.0)?;
    let query = ListOrdersQuery {
        page: page.clone(),
        filter: OrderFilter::default(),
    };
    let result = run(
        &state,
        &correlation.0,
        &identity,
        state.pipelines.list_orders.clone(),
        query,
    )
    .await?;
    Ok(Json(paged_envelope(uri.path(), "orders", &page, result)).into_response())
}

pub async fn list_patient_orders(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
    Path(patient_id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    Extension(correlation): Extension<Correlation>,
    Extension(identity): Extension<AuthedIdentity>,
) -> Result<Response, ApiError> {
    let page = parse_page(&params, &state, &order_sort_fields(), &correlation.0)?;
    let query = ListOrdersQuery {
        page: page.clone(),
        filter: OrderFilter {
            patient_id: Some(patient_id),
        },
    };
    let result = run(
        &state,
        &correlation.0,
        &identity,
        state.pipelines.list_orders.clone(),
        query,
    )
    .await?;
    Ok(Json(paged_envelope(uri.path(), "orders", &page, result)).into_response())
}

pub async fn get_order(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Extension(correlation): Extension<Correlation>,
    Extension(identity): Extension<AuthedIdentity>,
) -> Result<Response, ApiError> {
    let order = run(
        &state,
        &correlation.0,
        &identity,
        state.pipelines.get_order.clone(),
        GetOrderQuery { id },
    )
    .await?;
    Ok(Json(order).into_response())
}

pub async fn create_order(
    State(state): State<AppState>,
    Extension(correlation): Extension<Correlation>,
    Extension(identity): Extension<AuthedIdentity>,
    Json(body): Json<CreateOrderBody>,
) -> Result<Response, ApiError> {
    let order = run(
        &state,
        &correlation.0,
        &identity,
        state.pipelines.create_order.clone(),
        CreateOrderCommand { body },
    )
    .await?;
    Ok((StatusCode::CREATED, Json(order)).into_response())
}

pub async fn update_order_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Extension(correlation): Extension<Correlation>,
    Extension(identity): Extension<AuthedIdentity>,
    Json(body): Json<UpdateOrderStatusBody>,
) -> Result<Response, ApiError> {
    let order = run(
        &state,
        &correlation.0,
        &identity,
        state.pipelines.update_order_status.clone(),
        UpdateOrderStatusCommand {
            id,
            status: body.status,
        },
    )
    .await?;
    Ok(Json(order).into_response())
}

pub async fn delete_order(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Extension(correlation): Extension<Correlation>,
    Extension(identity): Extension<AuthedIdentity>,
) -> Result<Response, ApiError> {
    run(
        &state,
        &correlation.0,
        &identity,
        state.pipelines.delete_order.clone(),
        DeleteOrderCommand { id },
    )
    .await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

// ---------------------------------------------------------------------
// Patients
// ---------------------------------------------------------------------

pub async fn list_patients(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
    Query(params): Query<HashMap<String, String>>,
    Extension(correlation): Extension<Correlation>,
    Extension(identity): Extension<AuthedIdentity>,
) -> Result<Response, ApiError> {
    let page = parse_page(&params, &state, &patient_sort_fields(), &correlation.0)?;
    let result = run(
        &state,
        &correlation.0,
        &identity,
        state.pipelines.list_patients.clone(),
        ListPatientsQuery { page: page.clone() },
    )
    .await?;
    Ok(Json(paged_envelope(uri.path(), "patients", &page, result)).into_response())
}

pub async fn get_patient(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Extension(correlation): Extension<Correlation>,
    Extension(identity): Extension<AuthedIdentity>,
) -> Result<Response, ApiError> {
    let patient = run(
        &state,
        &correlation.0,
        &identity,
        state.pipelines.get_patient.clone(),
        GetPatientQuery { id },
    )
    .await?;
    Ok(Json(patient).into_response())
}

pub async fn create_patient(
    State(state): State<AppState>,
    Extension(correlation): Extension<Correlation>,
    Extension(identity): Extension<AuthedIdentity>,
    Json(body): Json<CreatePatientBody>,
) -> Result<Response, ApiError> {
    let patient = run(
        &state,
        &correlation.0,
        &identity,
        state.pipelines.create_patient.clone(),
        CreatePatientCommand { body },
    )
    .await?;
    Ok((StatusCode::CREATED, Json(patient)).into_response())
}

// ---------------------------------------------------------------------
// Prescriptions
// ---------------------------------------------------------------------

pub async fn list_prescriptions(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
    Query(params): Query<HashMap<String, String>>,
    Extension(correlation): Extension<Correlation>,
    Extension(identity): Extension<AuthedIdentity>,
) -> Result<Response, ApiError> {
    let page = parse_page(&params, &state, &prescription_sort_fields(), &correlation.0)?;
    let result = run(
        &state,
        &correlation.0,
        &identity,
        state.pipelines.list_prescriptions.clone(),
        ListPrescriptionsQuery { page: page.clone() },
    )
    .await?;
    Ok(Json(paged_envelope(uri.path(), "prescriptions", &page, result)).into_response())
}

pub async fn get_prescription(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Extension(correlation): Extension<Correlation>,
    Extension(identity): Extension<AuthedIdentity>,
) -> Result<Response, ApiError> {
    let prescription = run(
        &state,
        &correlation.0,
        &identity,
        state.pipelines.get_prescription.clone(),
        GetPrescriptionQuery { id },
    )
    .await?;
    Ok(Json(prescription).into_response())
}

pub async fn create_prescription(
    State(state): State<AppState>,
    Extension(correlation): Extension<Correlation>,
    Extension(identity): Extension<AuthedIdentity>,
    Json(body): Json<CreatePrescriptionBody>,
) -> Result<Response, ApiError> {
    let prescription = run(
        &state,
        &correlation.0,
        &identity,
        state.pipelines.create_prescription.clone(),
        CreatePrescriptionCommand { body },
    )
    .await?;
    Ok((StatusCode::CREATED, Json(prescription)).into_response())
}

// ---------------------------------------------------------------------
// Reference data and health
// ---------------------------------------------------------------------

pub async fn order_statuses(
    State(state): State<AppState>,
    Extension(correlation): Extension<Correlation>,
    Extension(identity): Extension<AuthedIdentity>,
) -> Result<Response, ApiError> {
    let statuses = run(
        &state,
        &correlation.0,
        &identity,
        state.pipelines.order_statuses.clone(),
        OrderStatusesQuery,
    )
    .await?;
    Ok(Json(statuses).into_response())
}

pub async fn health_live() -> Response {
    Json(serde_json::json!({ "status": "alive" })).into_response()
}

pub async fn health_ready(State(state): State<AppState>) -> Response {
    let cache_ready = state.cache.ready().await;
    let draining = state.admission.is_shutting_down();
    let store_breaker = state
        .executor
        .breaker(rxserve_resilience::DependencyKind::PrimaryStore)
        .state();

    let ready = cache_ready && !draining;
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(serde_json::json!({
            "status": if ready { "ready" } else { "unavailable" },
            "cache": if cache_ready { "reachable" } else { "unreachable" },
            "draining": draining,
            "primaryStoreCircuit": store_breaker.as_str(),
        })),
    )
        .into_response()
}
