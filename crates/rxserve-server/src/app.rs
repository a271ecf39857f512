//! Application assembly.
//!
//! Builds the component graph (executor, cache with its startup
//! fail-fast, admission controller, shutdown coordinator, pipelines)
//! and wires the axum router with its middleware stack. Tests inject
//! their own remote store, domain store, and pressure cell.

use crate::config::AppConfig;
use crate::handlers::Backend;
use crate::middleware;
use crate::routes;
use crate::state::{AppState, Pipelines};
use crate::store::{MemoryStore, Store};
use axum::routing::get;
use axum::Router;
use rxserve_admission::{AdmissionController, PressureCell};
use rxserve_cache::{CacheService, InMemoryRemote, RemoteStore};
use rxserve_core::FailureKind;
use rxserve_lifecycle::ShutdownCoordinator;
use rxserve_resilience::ResilientExecutor;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// The assembled router plus the state handles the binary drives
/// shutdown through.
pub struct ServerParts {
    pub router: Router,
    pub state: AppState,
}

/// Builder wiring the service from configuration plus optional injected
/// adapters.
pub struct AppBuilder {
    config: AppConfig,
    remote: Option<Arc<dyn RemoteStore>>,
    store: Option<Arc<dyn Store>>,
    cell: Option<PressureCell>,
}

impl AppBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            remote: None,
            store: None,
            cell: None,
        }
    }

    /// Injects a remote-cache adapter (defaults to the in-memory one).
    pub fn remote_store(mut self, remote: Arc<dyn RemoteStore>) -> Self {
        self.remote = Some(remote);
        self
    }

    /// Injects a domain-store adapter (defaults to the in-memory one).
    pub fn store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = Some(store);
        self
    }

    /// Injects the pressure cell the admission controller reads.
    pub fn pressure_cell(mut self, cell: PressureCell) -> Self {
        self.cell = Some(cell);
        self
    }

    /// Assembles the service. Fails when the remote cache is enabled but
    /// unreachable: the process must not come up half-wired.
    pub async fn build(self) -> Result<ServerParts, FailureKind> {
        let config = Arc::new(self.config);

        let executor = Arc::new(
            ResilientExecutor::builder()
                .primary_store(config.resilience.primary_store_policy())
                .cache(config.resilience.cache_policy())
                .build(),
        );

        let remote = self
            .remote
            .unwrap_or_else(|| Arc::new(InMemoryRemote::new()));
        let cache = Arc::new(
            CacheService::builder()
                .config(config.cache.clone())
                .store(remote)
                .executor(Arc::clone(&executor))
                .build(),
        );
        cache.connect().await?;

        let store = self.store.unwrap_or_else(|| Arc::new(MemoryStore::new()));
        let coordinator = Arc::new(ShutdownCoordinator::new());
        let cell = self.cell.unwrap_or_default();
        let admission = Arc::new(
            AdmissionController::builder(cell)
                .config(config.rate_limiting.clone())
                .build(),
        );

        let backend = Backend::new(store, Arc::clone(&executor));
        let pipelines = Pipelines::build(backend, Arc::clone(&cache), coordinator.tracker());

        let state = AppState {
            config,
            admission,
            coordinator,
            cache,
            executor,
            pipelines,
        };
        let router = build_router(state.clone());

        Ok(ServerParts { router, state })
    }
}

fn build_router(state: AppState) -> Router {
    let api = Router::new()
        .route(
            "/api/v2/orders",
            get(routes::list_orders).post(routes::create_order),
        )
        .route(
            "/api/v2/orders/:id",
            get(routes::get_order)
                .put(routes::update_order_status)
                .delete(routes::delete_order),
        )
        .route(
            "/api/v2/patients",
            get(routes::list_patients).post(routes::create_patient),
        )
        .route("/api/v2/patients/:id", get(routes::get_patient))
        .route("/api/v2/patients/:id/orders", get(routes::list_patient_orders))
        .route(
            "/api/v2/prescriptions",
            get(routes::list_prescriptions).post(routes::create_prescription),
        )
        .route("/api/v2/prescriptions/:id", get(routes::get_prescription))
        .route(
            "/api/v2/reference/order-statuses",
            get(routes::order_statuses),
        )
        // Innermost first: authentication, then admission outside it so
        // shed requests never pay the key check.
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::authenticate,
        ))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::admit,
        ));

    let health = Router::new()
        .route("/health/live", get(routes::health_live))
        .route("/health/ready", get(routes::health_ready));

    Router::new()
        .merge(api)
        .merge(health)
        .layer(axum::middleware::from_fn(middleware::correlation))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
