use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OfferStatus {
    Sent,
    Accepted,
    Rejected,
    Expired,
}

/// A time-bounded proposal of one request to one driver. At most one offer
/// ever exists per (request, driver) pair; every status except Sent is
/// terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Offer {
    pub id: Uuid,
    pub request_id: Uuid,
    pub driver_id: Uuid,
    pub status: OfferStatus,
    pub sent_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub responded_at: Option<DateTime<Utc>>,
}

impl Offer {
    pub fn new(
        request_id: Uuid,
        driver_id: Uuid,
        sent_at: DateTime<Utc>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            request_id,
            driver_id,
            status: OfferStatus::Sent,
            sent_at,
            expires_at,
            responded_at: None,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}
