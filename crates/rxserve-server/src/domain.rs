//! Domain records.
//!
//! The runtime core treats these as opaque payloads; they exist so the
//! service runs end to end.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Patient {
    pub id: String,
    pub name: String,
    /// ISO-8601 date.
    pub date_of_birth: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Prescription {
    pub id: String,
    pub patient_id: String,
    pub medication: String,
    pub refills_remaining: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OrderStatus {
    Pending,
    Filled,
    Shipped,
    Cancelled,
}

impl OrderStatus {
    /// Every status, for the reference endpoint.
    pub fn all() -> &'static [OrderStatus] {
        &[
            OrderStatus::Pending,
            OrderStatus::Filled,
            OrderStatus::Shipped,
            OrderStatus::Cancelled,
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: String,
    pub prescription_id: String,
    pub patient_id: String,
    pub quantity: u32,
    /// ISO-8601 timestamp; the list sort key.
    pub order_date: String,
    pub status: OrderStatus,
}
