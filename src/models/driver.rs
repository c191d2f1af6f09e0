use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

/// What the matching engine knows about a driver at the instant of lookup.
/// The driver-profile subsystem owns the underlying record; the engine never
/// writes to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverSnapshot {
    pub id: Uuid,
    pub name: String,
    pub location: GeoPoint,
    pub available: bool,
    pub verified: bool,
    pub updated_at: DateTime<Utc>,
}

impl DriverSnapshot {
    pub fn is_eligible(&self) -> bool {
        self.available && self.verified
    }
}
