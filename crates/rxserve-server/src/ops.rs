//! Operation descriptors.
//!
//! Each request type tells the pipeline what it is called, how its
//! result is cached, and, for mutations, which keys it invalidates.

use crate::domain::{Order, OrderStatus, Patient, Prescription};
use crate::store::OrderFilter;
use rxserve_cache::{CacheKey, Consistency, KeyPattern};
use rxserve_core::FieldErrors;
use rxserve_paging::{Page, PagedRequest};
use rxserve_pipeline::{CacheSpec, Command, Operation, Query, Validate};
use serde::Deserialize;

/// Renders a page request into a key fragment from the cache alphabet.
fn page_fragment(page: &PagedRequest) -> String {
    let sort = if page.order_by.is_empty() {
        "none".to_string()
    } else {
        page.order_by
            .iter()
            .map(|term| {
                format!(
                    "{}-{}",
                    term.field,
                    if term.descending { "desc" } else { "asc" }
                )
            })
            .collect::<Vec<_>>()
            .join("_")
    };
    format!(
        "{}:{}:{}:{}",
        page.skip,
        page.top,
        if page.include_count { "c1" } else { "c0" },
        sort
    )
}

fn parse_patterns(raw: &[String]) -> Vec<KeyPattern> {
    raw.iter()
        .filter_map(|pattern| KeyPattern::parse(pattern).ok())
        .collect()
}

// ---------------------------------------------------------------------
// Orders
// ---------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ListOrdersQuery {
    pub page: PagedRequest,
    pub filter: OrderFilter,
}

impl Operation for ListOrdersQuery {
    type Output = Page<Order>;

    fn name(&self) -> &'static str {
        if self.filter.patient_id.is_some() {
            "orders:list-by-patient"
        } else {
            "orders:list"
        }
    }
}

impl Query for ListOrdersQuery {
    fn cache_spec(&self) -> Option<CacheSpec> {
        let raw = match &self.filter.patient_id {
            Some(patient) => format!("orders:patient:{}:{}", patient, page_fragment(&self.page)),
            None => format!("orders:paged:{}", page_fragment(&self.page)),
        };
        CacheKey::new(raw).ok().map(CacheSpec::new)
    }
}

impl Validate for ListOrdersQuery {}

#[derive(Debug, Clone)]
pub struct GetOrderQuery {
    pub id: String,
}

impl Operation for GetOrderQuery {
    type Output = Order;

    fn name(&self) -> &'static str {
        "orders:get"
    }
}

impl Query for GetOrderQuery {
    fn cache_spec(&self) -> Option<CacheSpec> {
        CacheKey::new(format!("orders:one:{}", self.id))
            .ok()
            .map(CacheSpec::new)
    }
}

impl Validate for GetOrderQuery {
    fn validate(&self) -> Result<(), FieldErrors> {
        if self.id.is_empty() {
            return Err(FieldErrors::single("id", "is required"));
        }
        Ok(())
    }
}

/// Create-order request body.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderBody {
    pub prescription_id: String,
    pub patient_id: String,
    pub quantity: u32,
}

#[derive(Debug, Clone)]
pub struct CreateOrderCommand {
    pub body: CreateOrderBody,
}

impl Operation for CreateOrderCommand {
    type Output = Order;

    fn name(&self) -> &'static str {
        "orders:create"
    }
}

impl Command for CreateOrderCommand {
    fn invalidates(&self) -> Vec<KeyPattern> {
        parse_patterns(&[
            "orders:paged:*".to_string(),
            format!("orders:patient:{}:*", self.body.patient_id),
        ])
    }

    fn mode(&self) -> Consistency {
        Consistency::Eventual
    }
}

impl Validate for CreateOrderCommand {
    fn validate(&self) -> Result<(), FieldErrors> {
        let mut errors = FieldErrors::new();
        if self.body.prescription_id.is_empty() {
            errors.push("prescriptionId", "is required");
        }
        if self.body.patient_id.is_empty() {
            errors.push("patientId", "is required");
        }
        if self.body.quantity == 0 {
            errors.push("quantity", "must be greater than zero");
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateOrderStatusBody {
    pub status: OrderStatus,
}

#[derive(Debug, Clone)]
pub struct UpdateOrderStatusCommand {
    pub id: String,
    pub status: OrderStatus,
}

impl Operation for UpdateOrderStatusCommand {
    type Output = Order;

    fn name(&self) -> &'static str {
        "orders:update-status"
    }
}

impl Command for UpdateOrderStatusCommand {
    fn invalidates(&self) -> Vec<KeyPattern> {
        parse_patterns(&[
            format!("orders:one:{}", self.id),
            "orders:paged:*".to_string(),
            "orders:patient:*".to_string(),
        ])
    }

    fn mode(&self) -> Consistency {
        Consistency::Eventual
    }
}

impl Validate for UpdateOrderStatusCommand {
    fn validate(&self) -> Result<(), FieldErrors> {
        if self.id.is_empty() {
            return Err(FieldErrors::single("id", "is required"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct DeleteOrderCommand {
    pub id: String,
}

impl Operation for DeleteOrderCommand {
    type Output = ();

    fn name(&self) -> &'static str {
        "orders:delete"
    }
}

impl Command for DeleteOrderCommand {
    fn invalidates(&self) -> Vec<KeyPattern> {
        parse_patterns(&[
            format!("orders:one:{}", self.id),
            "orders:paged:*".to_string(),
            "orders:patient:*".to_string(),
        ])
    }

    fn mode(&self) -> Consistency {
        Consistency::Eventual
    }
}

impl Validate for DeleteOrderCommand {
    fn validate(&self) -> Result<(), FieldErrors> {
        if self.id.is_empty() {
            return Err(FieldErrors::single("id", "is required"));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------
// Patients
// ---------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ListPatientsQuery {
    pub page: PagedRequest,
}

impl Operation for ListPatientsQuery {
    type Output = Page<Patient>;

    fn name(&self) -> &'static str {
        "patients:list"
    }
}

impl Query for ListPatientsQuery {
    fn cache_spec(&self) -> Option<CacheSpec> {
        CacheKey::new(format!("patients:paged:{}", page_fragment(&self.page)))
            .ok()
            .map(CacheSpec::new)
    }
}

impl Validate for ListPatientsQuery {}

#[derive(Debug, Clone)]
pub struct GetPatientQuery {
    pub id: String,
}

impl Operation for GetPatientQuery {
    type Output = Patient;

    fn name(&self) -> &'static str {
        "patients:get"
    }
}

impl Query for GetPatientQuery {
    fn cache_spec(&self) -> Option<CacheSpec> {
        // Patient demographics feed clinical flows; a reader racing a
        // writer waits for the fresh value instead of serving stale.
        CacheKey::new(format!("patients:one:{}", self.id))
            .ok()
            .map(|key| CacheSpec::new(key).mode(Consistency::Serializable))
    }
}

impl Validate for GetPatientQuery {
    fn validate(&self) -> Result<(), FieldErrors> {
        if self.id.is_empty() {
            return Err(FieldErrors::single("id", "is required"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePatientBody {
    pub name: String,
    pub date_of_birth: String,
}

#[derive(Debug, Clone)]
pub struct CreatePatientCommand {
    pub body: CreatePatientBody,
}

impl Operation for CreatePatientCommand {
    type Output = Patient;

    fn name(&self) -> &'static str {
        "patients:create"
    }
}

impl Command for CreatePatientCommand {
    fn invalidates(&self) -> Vec<KeyPattern> {
        parse_patterns(&["patients:paged:*".to_string()])
    }

    fn mode(&self) -> Consistency {
        Consistency::Strong
    }
}

impl Validate for CreatePatientCommand {
    fn validate(&self) -> Result<(), FieldErrors> {
        let mut errors = FieldErrors::new();
        if self.body.name.is_empty() {
            errors.push("name", "is required");
        }
        if self.body.date_of_birth.is_empty() {
            errors.push("dateOfBirth", "is required");
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

// ---------------------------------------------------------------------
// Prescriptions
// ---------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ListPrescriptionsQuery {
    pub page: PagedRequest,
}

impl Operation for ListPrescriptionsQuery {
    type Output = Page<Prescription>;

    fn name(&self) -> &'static str {
        "prescriptions:list"
    }
}

impl Query for ListPrescriptionsQuery {
    fn cache_spec(&self) -> Option<CacheSpec> {
        CacheKey::new(format!("prescriptions:paged:{}", page_fragment(&self.page)))
            .ok()
            .map(CacheSpec::new)
    }
}

impl Validate for ListPrescriptionsQuery {}

#[derive(Debug, Clone)]
pub struct GetPrescriptionQuery {
    pub id: String,
}

impl Operation for GetPrescriptionQuery {
    type Output = Prescription;

    fn name(&self) -> &'static str {
        "prescriptions:get"
    }
}

impl Query for GetPrescriptionQuery {
    fn cache_spec(&self) -> Option<CacheSpec> {
        CacheKey::new(format!("prescriptions:one:{}", self.id))
            .ok()
            .map(CacheSpec::new)
    }
}

impl Validate for GetPrescriptionQuery {
    fn validate(&self) -> Result<(), FieldErrors> {
        if self.id.is_empty() {
            return Err(FieldErrors::single("id", "is required"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePrescriptionBody {
    pub patient_id: String,
    pub medication: String,
    pub refills_remaining: u32,
}

#[derive(Debug, Clone)]
pub struct CreatePrescriptionCommand {
    pub body: CreatePrescriptionBody,
}

impl Operation for CreatePrescriptionCommand {
    type Output = Prescription;

    fn name(&self) -> &'static str {
        "prescriptions:create"
    }
}

impl Command for CreatePrescriptionCommand {
    fn invalidates(&self) -> Vec<KeyPattern> {
        parse_patterns(&["prescriptions:paged:*".to_string()])
    }

    fn mode(&self) -> Consistency {
        Consistency::Eventual
    }
}

impl Validate for CreatePrescriptionCommand {
    fn validate(&self) -> Result<(), FieldErrors> {
        let mut errors = FieldErrors::new();
        if self.body.patient_id.is_empty() {
            errors.push("patientId", "is required");
        }
        if self.body.medication.is_empty() {
            errors.push("medication", "is required");
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

// ---------------------------------------------------------------------
// Reference data
// ---------------------------------------------------------------------

/// Static reference data, cached through the local tier.
#[derive(Debug, Clone)]
pub struct OrderStatusesQuery;

impl Operation for OrderStatusesQuery {
    type Output = Vec<OrderStatus>;

    fn name(&self) -> &'static str {
        "reference:order-statuses"
    }
}

impl Query for OrderStatusesQuery {
    fn cache_spec(&self) -> Option<CacheSpec> {
        CacheKey::new("reference:order-statuses")
            .ok()
            .map(|key| CacheSpec::new(key).local())
    }
}

impl Validate for OrderStatusesQuery {}
