//! Authoritative store port and its in-memory adapter.
//!
//! The port is defined here and implemented by outer adapters; errors
//! carry the category names the resilient executor classifies. The
//! in-memory adapter is the default wiring and the test double, with a
//! fault hook for exercising retry and breaker behavior.

use crate::domain::{Order, OrderStatus, Patient, Prescription};
use async_trait::async_trait;
use rxserve_paging::{Page, PagedRequest};
use rxserve_resilience::BackendError;
use std::collections::BTreeMap;
use std::sync::Mutex;

/// Filter scope for order lists. The count is computed against the same
/// filter as the items.
#[derive(Debug, Clone, Default)]
pub struct OrderFilter {
    pub patient_id: Option<String>,
}

/// Storage port for the three record types.
#[async_trait]
pub trait Store: Send + Sync + 'static {
    async fn list_orders(
        &self,
        filter: &OrderFilter,
        page: &PagedRequest,
    ) -> Result<Page<Order>, BackendError>;
    async fn get_order(&self, id: &str) -> Result<Option<Order>, BackendError>;
    async fn insert_order(&self, order: Order) -> Result<(), BackendError>;
    async fn update_order_status(
        &self,
        id: &str,
        status: OrderStatus,
    ) -> Result<Option<Order>, BackendError>;
    async fn delete_order(&self, id: &str) -> Result<bool, BackendError>;

    async fn list_patients(&self, page: &PagedRequest) -> Result<Page<Patient>, BackendError>;
    async fn get_patient(&self, id: &str) -> Result<Option<Patient>, BackendError>;
    async fn insert_patient(&self, patient: Patient) -> Result<(), BackendError>;

    async fn list_prescriptions(
        &self,
        page: &PagedRequest,
    ) -> Result<Page<Prescription>, BackendError>;
    async fn get_prescription(&self, id: &str) -> Result<Option<Prescription>, BackendError>;
    async fn insert_prescription(&self, prescription: Prescription) -> Result<(), BackendError>;
    /// Consumes one refill; `None` when the prescription is unknown,
    /// `Some(false)` when no refills remain.
    async fn consume_refill(&self, id: &str) -> Result<Option<bool>, BackendError>;
}

#[derive(Default)]
struct Tables {
    orders: BTreeMap<String, Order>,
    patients: BTreeMap<String, Patient>,
    prescriptions: BTreeMap<String, Prescription>,
}

/// In-memory [`Store`] adapter.
pub struct MemoryStore {
    tables: Mutex<Tables>,
    fault: Mutex<Option<BackendError>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
            fault: Mutex::new(None),
        }
    }

    /// Makes every subsequent call fail with the given error until
    /// cleared. Test hook.
    pub fn set_fault(&self, fault: Option<BackendError>) {
        *self.fault.lock().expect("store fault lock poisoned") = fault;
    }

    fn check_fault(&self) -> Result<(), BackendError> {
        match &*self.fault.lock().expect("store fault lock poisoned") {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }

    fn page_of<T: Clone>(mut rows: Vec<T>, page: &PagedRequest) -> Page<T> {
        let total = rows.len() as u64;
        let fetch = page.fetch_hint() as usize;
        let start = (page.skip as usize).min(rows.len());
        let mut window: Vec<T> = rows.drain(start..).take(fetch).collect();
        let has_more = window.len() > page.top as usize;
        window.truncate(page.top as usize);
        Page {
            items: window,
            has_more,
            total_count: page.include_count.then_some(total),
        }
    }

    fn sort_orders(rows: &mut [Order], page: &PagedRequest) {
        // Only the first term is applied; the parser has already
        // whitelisted every field.
        if let Some(order_by) = page.primary_order() {
            match order_by.field.as_str() {
                "orderDate" => rows.sort_by(|a, b| a.order_date.cmp(&b.order_date)),
                "status" => rows.sort_by(|a, b| {
                    format!("{:?}", a.status).cmp(&format!("{:?}", b.status))
                }),
                "quantity" => rows.sort_by_key(|o| o.quantity),
                _ => {}
            }
            if order_by.descending {
                rows.reverse();
            }
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn list_orders(
        &self,
        filter: &OrderFilter,
        page: &PagedRequest,
    ) -> Result<Page<Order>, BackendError> {
        self.check_fault()?;
        let tables = self.tables.lock().expect("store lock poisoned");
        let mut rows: Vec<Order> = tables
            .orders
            .values()
            .filter(|order| {
                filter
                    .patient_id
                    .as_deref()
                    .is_none_or(|patient| order.patient_id == patient)
            })
            .cloned()
            .collect();
        Self::sort_orders(&mut rows, page);
        Ok(Self::page_of(rows, page))
    }

    async fn get_order(&self, id: &str) -> Result<Option<Order>, BackendError> {
        self.check_fault()?;
        let tables = self.tables.lock().expect("store lock poisoned");
        Ok(tables.orders.get(id).cloned())
    }

    async fn insert_order(&self, order: Order) -> Result<(), BackendError> {
        self.check_fault()?;
        let mut tables = self.tables.lock().expect("store lock poisoned");
        tables.orders.insert(order.id.clone(), order);
        Ok(())
    }

    async fn update_order_status(
        &self,
        id: &str,
        status: OrderStatus,
    ) -> Result<Option<Order>, BackendError> {
        self.check_fault()?;
        let mut tables = self.tables.lock().expect("store lock poisoned");
        Ok(tables.orders.get_mut(id).map(|order| {
            order.status = status;
            order.clone()
        }))
    }

    async fn delete_order(&self, id: &str) -> Result<bool, BackendError> {
        self.check_fault()?;
        let mut tables = self.tables.lock().expect("store lock poisoned");
        Ok(tables.orders.remove(id).is_some())
    }

    async fn list_patients(&self, page: &PagedRequest) -> Result<Page<Patient>, BackendError> {
        self.check_fault()?;
        let tables = self.tables.lock().expect("store lock poisoned");
        let rows: Vec<Patient> = tables.patients.values().cloned().collect();
        Ok(Self::page_of(rows, page))
    }

    async fn get_patient(&self, id: &str) -> Result<Option<Patient>, BackendError> {
        self.check_fault()?;
        let tables = self.tables.lock().expect("store lock poisoned");
        Ok(tables.patients.get(id).cloned())
    }

    async fn insert_patient(&self, patient: Patient) -> Result<(), BackendError> {
        self.check_fault()?;
        let mut tables = self.tables.lock().expect("store lock poisoned");
        tables.patients.insert(patient.id.clone(), patient);
        Ok(())
    }

    async fn list_prescriptions(
        &self,
        page: &PagedRequest,
    ) -> Result<Page<Prescription>, BackendError> {
        self.check_fault()?;
        let tables = self.tables.lock().expect("store lock poisoned");
        let rows: Vec<Prescription> = tables.prescriptions.values().cloned().collect();
        Ok(Self::page_of(rows, page))
    }

    async fn get_prescription(&self, id: &str) -> Result<Option<Prescription>, BackendError> {
        self.check_fault()?;
        let tables = self.tables.lock().expect("store lock poisoned");
        Ok(tables.prescriptions.get(id).cloned())
    }

    async fn insert_prescription(&self, prescription: Prescription) -> Result<(), BackendError> {
        self.check_fault()?;
        let mut tables = self.tables.lock().expect("store lock poisoned");
        tables
            .prescriptions
            .insert(prescription.id.clone(), prescription);
        Ok(())
    }

    async fn consume_refill(&self, id: &str) -> Result<Option<bool>, BackendError> {
        self.check_fault()?;
        let mut tables = self.tables.lock().expect("store lock poisoned");
        Ok(tables.prescriptions.get_mut(id).map(|prescription| {
            if prescription.refills_remaining == 0 {
                false
            } else {
                prescription.refills_remaining -= 1;
                true
            }
        }))
    }
}
