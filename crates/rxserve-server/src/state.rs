//! Shared application state.

use crate::config::AppConfig;
use crate::domain::{Order, OrderStatus, Patient, Prescription};
use crate::handlers::{self, Backend};
use crate::ops::*;
use rxserve_admission::AdmissionController;
use rxserve_cache::CacheService;
use rxserve_lifecycle::ShutdownCoordinator;
use rxserve_paging::Page;
use rxserve_pipeline::{command_pipeline, query_pipeline, BoxPipeline};
use rxserve_resilience::ResilientExecutor;
use std::sync::Arc;
use tokio_util::task::TaskTracker;

/// Every pipeline, assembled once at startup.
#[derive(Clone)]
pub struct Pipelines {
    pub list_orders: BoxPipeline<ListOrdersQuery, Page<Order>>,
    pub get_order: BoxPipeline<GetOrderQuery, Order>,
    pub create_order: BoxPipeline<CreateOrderCommand, Order>,
    pub update_order_status: BoxPipeline<UpdateOrderStatusCommand, Order>,
    pub delete_order: BoxPipeline<DeleteOrderCommand, ()>,
    pub list_patients: BoxPipeline<ListPatientsQuery, Page<Patient>>,
    pub get_patient: BoxPipeline<GetPatientQuery, Patient>,
    pub create_patient: BoxPipeline<CreatePatientCommand, Patient>,
    pub list_prescriptions: BoxPipeline<ListPrescriptionsQuery, Page<Prescription>>,
    pub get_prescription: BoxPipeline<GetPrescriptionQuery, Prescription>,
    pub create_prescription: BoxPipeline<CreatePrescriptionCommand, Prescription>,
    pub order_statuses: BoxPipeline<OrderStatusesQuery, Vec<OrderStatus>>,
}

impl Pipelines {
    pub fn build(backend: Backend, cache: Arc<CacheService>, tracker: TaskTracker) -> Self {
        Self {
            list_orders: query_pipeline(
                Arc::clone(&cache),
                handlers::list_orders(backend.clone()),
            ),
            get_order: query_pipeline(Arc::clone(&cache), handlers::get_order(backend.clone())),
            create_order: command_pipeline(
                Arc::clone(&cache),
                tracker.clone(),
                handlers::create_order(backend.clone()),
            ),
            update_order_status: command_pipeline(
                Arc::clone(&cache),
                tracker.clone(),
                handlers::update_order_status(backend.clone()),
            ),
            delete_order: command_pipeline(
                Arc::clone(&cache),
                tracker.clone(),
                handlers::delete_order(backend.clone()),
            ),
            list_patients: query_pipeline(
                Arc::clone(&cache),
                handlers::list_patients(backend.clone()),
            ),
            get_patient: query_pipeline(Arc::clone(&cache), handlers::get_patient(backend.clone())),
            create_patient: command_pipeline(
                Arc::clone(&cache),
                tracker.clone(),
                handlers::create_patient(backend.clone()),
            ),
            list_prescriptions: query_pipeline(
                Arc::clone(&cache),
                handlers::list_prescriptions(backend.clone()),
            ),
            get_prescription: query_pipeline(
                Arc::clone(&cache),
                handlers::get_prescription(backend.clone()),
            ),
            create_prescription: command_pipeline(
                Arc::clone(&cache),
                tracker,
                handlers::create_prescription(backend),
            ),
            order_statuses: query_pipeline(cache, handlers::order_statuses()),
        }
    }
}

/// State shared by every route handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub admission: Arc<AdmissionController>,
    pub coordinator: Arc<ShutdownCoordinator>,
    pub cache: Arc<CacheService>,
    pub executor: Arc<ResilientExecutor>,
    pub pipelines: Pipelines,
}
