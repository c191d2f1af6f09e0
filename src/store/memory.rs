use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use uuid::Uuid;

use crate::models::offer::{Offer, OfferStatus};
use crate::models::request::{DeliveryRequest, RequestStatus};
use crate::store::{OfferCreateError, OfferStore, RequestStore, RequestTransition, StoreError};

/// DashMap-backed stores. Conditional transitions run under the entry lock
/// of the record, which makes the guard check and the mutation one atomic
/// step with respect to every other caller.
pub struct InMemoryRequestStore {
    records: DashMap<Uuid, DeliveryRequest>,
}

impl InMemoryRequestStore {
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
        }
    }
}

impl Default for InMemoryRequestStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RequestStore for InMemoryRequestStore {
    async fn create(&self, request: DeliveryRequest) -> Result<(), StoreError> {
        self.records.insert(request.id, request);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<DeliveryRequest>, StoreError> {
        Ok(self.records.get(&id).map(|entry| entry.value().clone()))
    }

    async fn conditional_transition(
        &self,
        id: Uuid,
        transition: RequestTransition,
    ) -> Result<bool, StoreError> {
        let Some(mut record) = self.records.get_mut(&id) else {
            return Ok(false);
        };

        if !transition.expected.contains(&record.status) {
            return Ok(false);
        }
        if transition.require_unassigned && record.assigned_driver.is_some() {
            return Ok(false);
        }

        record.status = transition.to;
        if let Some(driver_id) = transition.assign_driver {
            record.assigned_driver = Some(driver_id);
            record.assigned_at = Some(transition.at);
        }
        match transition.to {
            RequestStatus::Cancelled => record.cancelled_at = Some(transition.at),
            RequestStatus::Delivered => record.delivered_at = Some(transition.at),
            _ => {}
        }

        Ok(true)
    }
}

pub struct InMemoryOfferStore {
    records: DashMap<Uuid, Offer>,
    by_pair: DashMap<(Uuid, Uuid), Uuid>,
}

impl InMemoryOfferStore {
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
            by_pair: DashMap::new(),
        }
    }
}

impl Default for InMemoryOfferStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OfferStore for InMemoryOfferStore {
    async fn create(&self, offer: Offer) -> Result<(), OfferCreateError> {
        // The pair index entry doubles as the uniqueness constraint; it is
        // claimed under its entry lock before the record becomes visible.
        match self.by_pair.entry((offer.request_id, offer.driver_id)) {
            Entry::Occupied(_) => Err(OfferCreateError::Duplicate {
                request_id: offer.request_id,
                driver_id: offer.driver_id,
            }),
            Entry::Vacant(slot) => {
                slot.insert(offer.id);
                self.records.insert(offer.id, offer);
                Ok(())
            }
        }
    }

    async fn get(&self, id: Uuid) -> Result<Option<Offer>, StoreError> {
        Ok(self.records.get(&id).map(|entry| entry.value().clone()))
    }

    async fn conditional_transition(
        &self,
        id: Uuid,
        expected: OfferStatus,
        to: OfferStatus,
        responded_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let Some(mut record) = self.records.get_mut(&id) else {
            return Ok(false);
        };

        if record.status != expected {
            return Ok(false);
        }

        record.status = to;
        record.responded_at = Some(responded_at);
        Ok(true)
    }

    async fn list_by_request(&self, request_id: Uuid) -> Result<Vec<Offer>, StoreError> {
        Ok(self
            .records
            .iter()
            .filter(|entry| entry.value().request_id == request_id)
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn list_expirable(&self, now: DateTime<Utc>) -> Result<Vec<Offer>, StoreError> {
        Ok(self
            .records
            .iter()
            .filter(|entry| {
                entry.value().status == OfferStatus::Sent && entry.value().is_expired(now)
            })
            .map(|entry| entry.value().clone())
            .collect())
    }
}
