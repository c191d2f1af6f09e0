use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::driver::GeoPoint;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestStatus {
    Pending,
    Proposed,
    Accepted,
    InDelivery,
    Delivered,
    Cancelled,
}

/// Invariant: `assigned_driver` is present iff status is Accepted,
/// InDelivery or Delivered, and once set it never changes. Both sides are
/// enforced by the conditional transitions in the request store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryRequest {
    pub id: Uuid,
    pub restaurant_id: Uuid,
    pub origin: GeoPoint,
    pub origin_address: String,
    pub destination: GeoPoint,
    pub destination_address: String,
    pub fee: f64,
    pub notes: Option<String>,
    pub status: RequestStatus,
    pub assigned_driver: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub assigned_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
}
