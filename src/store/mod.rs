pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::models::offer::{Offer, OfferStatus};
use crate::models::request::{DeliveryRequest, RequestStatus};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store fault: {0}")]
    Fault(String),
}

#[derive(Debug, Error)]
pub enum OfferCreateError {
    #[error("offer already exists for request {request_id} and driver {driver_id}")]
    Duplicate { request_id: Uuid, driver_id: Uuid },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A guarded request mutation. The store applies it only if the current
/// status is in `expected` and, when `require_unassigned` is set, no driver
/// is assigned yet. Check and mutation are a single atomic step; this is
/// the only synchronization point callers across processes share.
#[derive(Debug, Clone)]
pub struct RequestTransition {
    pub expected: Vec<RequestStatus>,
    pub require_unassigned: bool,
    pub to: RequestStatus,
    pub assign_driver: Option<Uuid>,
    pub at: DateTime<Utc>,
}

#[async_trait]
pub trait RequestStore: Send + Sync {
    async fn create(&self, request: DeliveryRequest) -> Result<(), StoreError>;

    async fn get(&self, id: Uuid) -> Result<Option<DeliveryRequest>, StoreError>;

    /// Returns true if the transition was applied, false if the guard did
    /// not hold (including an unknown id).
    async fn conditional_transition(
        &self,
        id: Uuid,
        transition: RequestTransition,
    ) -> Result<bool, StoreError>;
}

#[async_trait]
pub trait OfferStore: Send + Sync {
    /// Fails with `Duplicate` when an offer for the same (request, driver)
    /// pair already exists, whatever its status.
    async fn create(&self, offer: Offer) -> Result<(), OfferCreateError>;

    async fn get(&self, id: Uuid) -> Result<Option<Offer>, StoreError>;

    /// Returns true if the offer was still in `expected` and moved to `to`,
    /// recording `responded_at`; false otherwise.
    async fn conditional_transition(
        &self,
        id: Uuid,
        expected: OfferStatus,
        to: OfferStatus,
        responded_at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    async fn list_by_request(&self, request_id: Uuid) -> Result<Vec<Offer>, StoreError>;

    /// Sent offers whose `expires_at` is at or before `now`.
    async fn list_expirable(&self, now: DateTime<Utc>) -> Result<Vec<Offer>, StoreError>;
}
