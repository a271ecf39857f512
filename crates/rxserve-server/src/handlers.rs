//! Terminal pipeline handlers.
//!
//! Every outbound store call goes through the resilient executor under
//! the primary-store policy. Reads are idempotent and retried; the
//! mutating steps of a command run single-attempt.

use crate::domain::{Order, OrderStatus, Patient, Prescription};
use crate::ops::*;
use crate::store::Store;
use chrono::Utc;
use rxserve_core::{FailureKind, FieldErrors, RequestContext};
use rxserve_paging::Page;
use rxserve_pipeline::{handler_fn, Envelope};
use rxserve_resilience::{DependencyKind, ResilientExecutor};
use std::sync::Arc;
use tower::Service;
use uuid::Uuid;

/// Shared dependencies captured by each handler closure.
#[derive(Clone)]
pub struct Backend {
    pub store: Arc<dyn Store>,
    pub executor: Arc<ResilientExecutor>,
}

impl Backend {
    pub fn new(store: Arc<dyn Store>, executor: Arc<ResilientExecutor>) -> Self {
        Self { store, executor }
    }
}

pub fn list_orders(
    backend: Backend,
) -> impl Service<Envelope<ListOrdersQuery>, Response = Page<Order>, Error = FailureKind, Future: Send> + Clone + Send + 'static
{
    handler_fn(move |ctx: RequestContext, query: ListOrdersQuery| {
        let backend = backend.clone();
        async move {
            backend
                .executor
                .execute(DependencyKind::PrimaryStore, &ctx.cancel, || {
                    let store = Arc::clone(&backend.store);
                    let query = query.clone();
                    async move { store.list_orders(&query.filter, &query.page).await }
                })
                .await
        }
    })
}

pub fn get_order(
    backend: Backend,
) -> impl Service<Envelope<GetOrderQuery>, Response = Order, Error = FailureKind, Future: Send> + Clone + Send + 'static
{
    handler_fn(move |ctx: RequestContext, query: GetOrderQuery| {
        let backend = backend.clone();
        async move {
            backend
                .executor
                .execute(DependencyKind::PrimaryStore, &ctx.cancel, || {
                    let store = Arc::clone(&backend.store);
                    let id = query.id.clone();
                    async move { store.get_order(&id).await }
                })
                .await?
                .ok_or_else(|| FailureKind::NotFound(format!("order {}", query.id)))
        }
    })
}

pub fn create_order(
    backend: Backend,
) -> impl Service<Envelope<CreateOrderCommand>, Response = Order, Error = FailureKind, Future: Send> + Clone + Send + 'static
{
    handler_fn(move |ctx: RequestContext, command: CreateOrderCommand| {
        let backend = backend.clone();
        async move {
            let body = command.body;

            let prescription = backend
                .executor
                .execute(DependencyKind::PrimaryStore, &ctx.cancel, || {
                    let store = Arc::clone(&backend.store);
                    let id = body.prescription_id.clone();
                    async move { store.get_prescription(&id).await }
                })
                .await?
                .ok_or_else(|| {
                    FailureKind::NotFound(format!("prescription {}", body.prescription_id))
                })?;

            if prescription.patient_id != body.patient_id {
                return Err(FailureKind::Validation(FieldErrors::single(
                    "patientId",
                    "prescription belongs to a different patient",
                )));
            }

            // Consuming the refill is the commit point; it is not
            // idempotent, so no retries past this line.
            let consumed = backend
                .executor
                .execute_once(DependencyKind::PrimaryStore, &ctx.cancel, || {
                    let store = Arc::clone(&backend.store);
                    let id = body.prescription_id.clone();
                    async move { store.consume_refill(&id).await }
                })
                .await?;

            match consumed {
                None => {
                    return Err(FailureKind::NotFound(format!(
                        "prescription {}",
                        body.prescription_id
                    )))
                }
                Some(false) => {
                    return Err(FailureKind::Validation(FieldErrors::single(
                        "prescriptionId",
                        "prescription has no refills remaining",
                    )))
                }
                Some(true) => {}
            }

            let order = Order {
                id: Uuid::new_v4().to_string(),
                prescription_id: body.prescription_id,
                patient_id: body.patient_id,
                quantity: body.quantity,
                order_date: Utc::now().to_rfc3339(),
                status: OrderStatus::Pending,
            };

            backend
                .executor
                .execute_once(DependencyKind::PrimaryStore, &ctx.cancel, || {
                    let store = Arc::clone(&backend.store);
                    let order = order.clone();
                    async move { store.insert_order(order).await }
                })
                .await?;

            Ok(order)
        }
    })
}

pub fn update_order_status(
    backend: Backend,
) -> impl Service<Envelope<UpdateOrderStatusCommand>, Response = Order, Error = FailureKind, Future: Send> + Clone + Send + 'static
{
    handler_fn(move |ctx: RequestContext, command: UpdateOrderStatusCommand| {
        let backend = backend.clone();
        async move {
            backend
                .executor
                .execute_once(DependencyKind::PrimaryStore, &ctx.cancel, || {
                    let store = Arc::clone(&backend.store);
                    let id = command.id.clone();
                    let status = command.status;
                    async move { store.update_order_status(&id, status).await }
                })
                .await?
                .ok_or_else(|| FailureKind::NotFound(format!("order {}", command.id)))
        }
    })
}

pub fn delete_order(
    backend: Backend,
) -> impl Service<Envelope<DeleteOrderCommand>, Response = (), Error = FailureKind, Future: Send> + Clone + Send + 'static
{
    handler_fn(move |ctx: RequestContext, command: DeleteOrderCommand| {
        let backend = backend.clone();
        async move {
            let removed = backend
                .executor
                .execute_once(DependencyKind::PrimaryStore, &ctx.cancel, || {
                    let store = Arc::clone(&backend.store);
                    let id = command.id.clone();
                    async move { store.delete_order(&id).await }
                })
                .await?;
            if removed {
                Ok(())
            } else {
                Err(FailureKind::NotFound(format!("order {}", command.id)))
            }
        }
    })
}

pub fn list_patients(
    backend: Backend,
) -> impl Service<Envelope<ListPatientsQuery>, Response = Page<Patient>, Error = FailureKind, Future: Send> + Clone + Send + 'static
{
    handler_fn(move |ctx: RequestContext, query: ListPatientsQuery| {
        let backend = backend.clone();
        async move {
            backend
                .executor
                .execute(DependencyKind::PrimaryStore, &ctx.cancel, || {
                    let store = Arc::clone(&backend.store);
                    let page = query.page.clone();
                    async move { store.list_patients(&page).await }
                })
                .await
        }
    })
}

pub fn get_patient(
    backend: Backend,
) -> impl Service<Envelope<GetPatientQuery>, Response = Patient, Error = FailureKind, Future: Send> + Clone + Send + 'static
{
    handler_fn(move |ctx: RequestContext, query: GetPatientQuery| {
        let backend = backend.clone();
        async move {
            backend
                .executor
                .execute(DependencyKind::PrimaryStore, &ctx.cancel, || {
                    let store = Arc::clone(&backend.store);
                    let id = query.id.clone();
                    async move { store.get_patient(&id).await }
                })
                .await?
                .ok_or_else(|| FailureKind::NotFound(format!("patient {}", query.id)))
        }
    })
}

pub fn create_patient(
    backend: Backend,
) -> impl Service<Envelope<CreatePatientCommand>, Response = Patient, Error = FailureKind, Future: Send> + Clone + Send + 'static
{
    handler_fn(move |ctx: RequestContext, command: CreatePatientCommand| {
        let backend = backend.clone();
        async move {
            let patient = Patient {
                id: format!("P{}", Uuid::new_v4().simple()),
                name: command.body.name,
                date_of_birth: command.body.date_of_birth,
            };
            backend
                .executor
                .execute_once(DependencyKind::PrimaryStore, &ctx.cancel, || {
                    let store = Arc::clone(&backend.store);
                    let patient = patient.clone();
                    async move { store.insert_patient(patient).await }
                })
                .await?;
            Ok(patient)
        }
    })
}

pub fn list_prescriptions(
    backend: Backend,
) -> impl Service<Envelope<ListPrescriptionsQuery>, Response = Page<Prescription>, Error = FailureKind, Future: Send>
       + Clone
       + Send
       + 'static {
    handler_fn(move |ctx: RequestContext, query: ListPrescriptionsQuery| {
        let backend = backend.clone();
        async move {
            backend
                .executor
                .execute(DependencyKind::PrimaryStore, &ctx.cancel, || {
                    let store = Arc::clone(&backend.store);
                    let page = query.page.clone();
                    async move { store.list_prescriptions(&page).await }
                })
                .await
        }
    })
}

pub fn get_prescription(
    backend: Backend,
) -> impl Service<Envelope<GetPrescriptionQuery>, Response = Prescription, Error = FailureKind, Future: Send> + Clone + Send + 'static
{
    handler_fn(move |ctx: RequestContext, query: GetPrescriptionQuery| {
        let backend = backend.clone();
        async move {
            backend
                .executor
                .execute(DependencyKind::PrimaryStore, &ctx.cancel, || {
                    let store = Arc::clone(&backend.store);
                    let id = query.id.clone();
                    async move { store.get_prescription(&id).await }
                })
                .await?
                .ok_or_else(|| FailureKind::NotFound(format!("prescription {}", query.id)))
        }
    })
}

pub fn create_prescription(
    backend: Backend,
) -> impl Service<Envelope<CreatePrescriptionCommand>, Response = Prescription, Error = FailureKind, Future: Send>
       + Clone
       + Send
       + 'static {
    handler_fn(move |ctx: RequestContext, command: CreatePrescriptionCommand| {
        let backend = backend.clone();
        async move {
            let prescription = Prescription {
                id: format!("rx-{}", Uuid::new_v4().simple()),
                patient_id: command.body.patient_id,
                medication: command.body.medication,
                refills_remaining: command.body.refills_remaining,
            };
            backend
                .executor
                .execute_once(DependencyKind::PrimaryStore, &ctx.cancel, || {
                    let store = Arc::clone(&backend.store);
                    let prescription = prescription.clone();
                    async move { store.insert_prescription(prescription).await }
                })
                .await?;
            Ok(prescription)
        }
    })
}

pub fn order_statuses(
) -> impl Service<Envelope<OrderStatusesQuery>, Response = Vec<OrderStatus>, Error = FailureKind, Future: Send> + Clone + Send + 'static
{
    handler_fn(move |_ctx: RequestContext, _query: OrderStatusesQuery| async move {
        Ok(OrderStatus::all().to_vec())
    })
}
