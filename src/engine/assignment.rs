use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::offer::{Offer, OfferStatus};
use crate::models::request::{DeliveryRequest, RequestStatus};
use crate::store::{OfferStore, RequestStore, RequestTransition, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeclineReason {
    UnknownOffer,
    DriverMismatch,
    OfferClosed,
    OfferExpired,
    RequestUnavailable,
}

#[derive(Debug)]
pub enum AcceptOutcome {
    Accepted { request: DeliveryRequest },
    Declined { reason: DeclineReason },
}

#[derive(Debug)]
pub enum RejectOutcome {
    Rejected { offer: Offer },
    Declined { reason: DeclineReason },
}

/// Resolves a driver's response to a single offer. The only arbiter of the
/// winner is the request store's conditional update; no in-process state
/// takes part in the decision, so concurrent callers on other machines see
/// the same outcome.
pub struct AssignmentProtocol {
    requests: Arc<dyn RequestStore>,
    offers: Arc<dyn OfferStore>,
}

impl AssignmentProtocol {
    pub fn new(requests: Arc<dyn RequestStore>, offers: Arc<dyn OfferStore>) -> Self {
        Self { requests, offers }
    }

    /// Declines are structured outcomes; an `Err` is a store fault and must
    /// never be read as losing the race.
    pub async fn accept_offer(
        &self,
        offer_id: Uuid,
        driver_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<AcceptOutcome, StoreError> {
        let Some(offer) = self.offers.get(offer_id).await? else {
            return Ok(AcceptOutcome::Declined {
                reason: DeclineReason::UnknownOffer,
            });
        };
        if offer.driver_id != driver_id {
            return Ok(AcceptOutcome::Declined {
                reason: DeclineReason::DriverMismatch,
            });
        }
        if offer.status != OfferStatus::Sent {
            return Ok(AcceptOutcome::Declined {
                reason: DeclineReason::OfferClosed,
            });
        }
        if offer.is_expired(now) {
            self.expire_offer(offer_id, now).await?;
            return Ok(AcceptOutcome::Declined {
                reason: DeclineReason::OfferExpired,
            });
        }

        let won = self
            .requests
            .conditional_transition(
                offer.request_id,
                RequestTransition {
                    expected: vec![RequestStatus::Pending, RequestStatus::Proposed],
                    require_unassigned: true,
                    to: RequestStatus::Accepted,
                    assign_driver: Some(driver_id),
                    at: now,
                },
            )
            .await?;

        if !won {
            // Another offer already took the request; close this one out so
            // it never sits in terminal ambiguity.
            self.expire_offer(offer_id, now).await?;
            return Ok(AcceptOutcome::Declined {
                reason: DeclineReason::RequestUnavailable,
            });
        }

        let marked = self
            .offers
            .conditional_transition(offer_id, OfferStatus::Sent, OfferStatus::Accepted, now)
            .await?;
        if !marked {
            // The sweeper can expire the winning offer between the request
            // update and this one; the assignment itself already settled.
            warn!(offer_id = %offer_id, "winning offer was closed before it could be marked accepted");
        }

        self.expire_siblings(offer.request_id, offer_id, now).await;

        let request = self
            .requests
            .get(offer.request_id)
            .await?
            .ok_or_else(|| StoreError::Fault(format!("request {} vanished after assignment", offer.request_id)))?;

        Ok(AcceptOutcome::Accepted { request })
    }

    /// Rejection removes this driver from consideration and nothing else;
    /// the request stays open to every other pending or future offer.
    pub async fn reject_offer(
        &self,
        offer_id: Uuid,
        driver_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<RejectOutcome, StoreError> {
        let Some(offer) = self.offers.get(offer_id).await? else {
            return Ok(RejectOutcome::Declined {
                reason: DeclineReason::UnknownOffer,
            });
        };
        if offer.driver_id != driver_id {
            return Ok(RejectOutcome::Declined {
                reason: DeclineReason::DriverMismatch,
            });
        }
        if offer.status != OfferStatus::Sent {
            return Ok(RejectOutcome::Declined {
                reason: DeclineReason::OfferClosed,
            });
        }
        if offer.is_expired(now) {
            self.expire_offer(offer_id, now).await?;
            return Ok(RejectOutcome::Declined {
                reason: DeclineReason::OfferExpired,
            });
        }

        let applied = self
            .offers
            .conditional_transition(offer_id, OfferStatus::Sent, OfferStatus::Rejected, now)
            .await?;
        if !applied {
            return Ok(RejectOutcome::Declined {
                reason: DeclineReason::OfferClosed,
            });
        }

        let offer = self
            .offers
            .get(offer_id)
            .await?
            .ok_or_else(|| StoreError::Fault(format!("offer {offer_id} vanished after rejection")))?;

        Ok(RejectOutcome::Rejected { offer })
    }

    async fn expire_offer(&self, offer_id: Uuid, now: DateTime<Utc>) -> Result<(), StoreError> {
        if !self
            .offers
            .conditional_transition(offer_id, OfferStatus::Sent, OfferStatus::Expired, now)
            .await?
        {
            debug!(offer_id = %offer_id, "offer already left Sent");
        }
        Ok(())
    }

    /// Best-effort cleanup after a win. Not atomicity-bearing: the winner is
    /// already settled, and re-running after a partial failure is safe.
    async fn expire_siblings(&self, request_id: Uuid, winner_id: Uuid, now: DateTime<Utc>) {
        let siblings = match self.offers.list_by_request(request_id).await {
            Ok(siblings) => siblings,
            Err(err) => {
                warn!(request_id = %request_id, error = %err, "failed to list sibling offers for cleanup");
                return;
            }
        };

        for sibling in siblings {
            if sibling.id == winner_id || sibling.status != OfferStatus::Sent {
                continue;
            }
            match self
                .offers
                .conditional_transition(sibling.id, OfferStatus::Sent, OfferStatus::Expired, now)
                .await
            {
                Ok(_) => {}
                Err(err) => {
                    warn!(offer_id = %sibling.id, error = %err, "failed to expire sibling offer");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{DateTime, Duration, TimeZone, Utc};
    use uuid::Uuid;

    use super::{AcceptOutcome, AssignmentProtocol, DeclineReason, RejectOutcome};
    use crate::models::driver::GeoPoint;
    use crate::models::offer::{Offer, OfferStatus};
    use crate::models::request::{DeliveryRequest, RequestStatus};
    use crate::store::memory::{InMemoryOfferStore, InMemoryRequestStore};
    use crate::store::{OfferStore, RequestStore};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn request(id_seed: u128, status: RequestStatus) -> DeliveryRequest {
        DeliveryRequest {
            id: Uuid::from_u128(id_seed),
            restaurant_id: Uuid::from_u128(1000),
            origin: GeoPoint {
                lat: 52.52,
                lng: 13.405,
            },
            origin_address: "Torstr. 1".to_string(),
            destination: GeoPoint {
                lat: 52.53,
                lng: 13.41,
            },
            destination_address: "Kastanienallee 5".to_string(),
            fee: 4.5,
            notes: None,
            status,
            assigned_driver: None,
            created_at: now(),
            assigned_at: None,
            cancelled_at: None,
            delivered_at: None,
        }
    }

    struct Harness {
        requests: Arc<InMemoryRequestStore>,
        offers: Arc<InMemoryOfferStore>,
        protocol: AssignmentProtocol,
    }

    fn harness() -> Harness {
        let requests = Arc::new(InMemoryRequestStore::new());
        let offers = Arc::new(InMemoryOfferStore::new());
        let protocol = AssignmentProtocol::new(requests.clone(), offers.clone());
        Harness {
            requests,
            offers,
            protocol,
        }
    }

    async fn seed_offer(h: &Harness, driver_seed: u128) -> Offer {
        let offer = Offer::new(
            Uuid::from_u128(1),
            Uuid::from_u128(driver_seed),
            now(),
            Some(now() + Duration::minutes(2)),
        );
        h.offers.create(offer.clone()).await.unwrap();
        offer
    }

    #[tokio::test]
    async fn accept_assigns_driver_and_expires_siblings() {
        let h = harness();
        h.requests
            .create(request(1, RequestStatus::Proposed))
            .await
            .unwrap();
        let winner = seed_offer(&h, 2).await;
        let loser_a = seed_offer(&h, 3).await;
        let loser_b = seed_offer(&h, 4).await;

        let outcome = h
            .protocol
            .accept_offer(winner.id, winner.driver_id, now())
            .await
            .unwrap();

        let AcceptOutcome::Accepted { request } = outcome else {
            panic!("expected acceptance");
        };
        assert_eq!(request.status, RequestStatus::Accepted);
        assert_eq!(request.assigned_driver, Some(winner.driver_id));
        assert_eq!(request.assigned_at, Some(now()));

        let winner_stored = h.offers.get(winner.id).await.unwrap().unwrap();
        assert_eq!(winner_stored.status, OfferStatus::Accepted);
        assert_eq!(winner_stored.responded_at, Some(now()));

        for loser in [loser_a, loser_b] {
            let stored = h.offers.get(loser.id).await.unwrap().unwrap();
            assert_eq!(stored.status, OfferStatus::Expired);
            assert_eq!(stored.responded_at, Some(now()));
        }
    }

    #[tokio::test]
    async fn accept_from_pending_request_wins() {
        let h = harness();
        h.requests
            .create(request(1, RequestStatus::Pending))
            .await
            .unwrap();
        let offer = seed_offer(&h, 2).await;

        let outcome = h
            .protocol
            .accept_offer(offer.id, offer.driver_id, now())
            .await
            .unwrap();

        assert!(matches!(outcome, AcceptOutcome::Accepted { .. }));
    }

    #[tokio::test]
    async fn accept_by_wrong_driver_is_declined() {
        let h = harness();
        h.requests
            .create(request(1, RequestStatus::Proposed))
            .await
            .unwrap();
        let offer = seed_offer(&h, 2).await;

        let outcome = h
            .protocol
            .accept_offer(offer.id, Uuid::from_u128(99), now())
            .await
            .unwrap();

        let AcceptOutcome::Declined { reason } = outcome else {
            panic!("expected decline");
        };
        assert_eq!(reason, DeclineReason::DriverMismatch);

        let stored = h.offers.get(offer.id).await.unwrap().unwrap();
        assert_eq!(stored.status, OfferStatus::Sent);
    }

    #[tokio::test]
    async fn accept_of_unknown_offer_is_declined() {
        let h = harness();
        let outcome = h
            .protocol
            .accept_offer(Uuid::from_u128(77), Uuid::from_u128(2), now())
            .await
            .unwrap();

        let AcceptOutcome::Declined { reason } = outcome else {
            panic!("expected decline");
        };
        assert_eq!(reason, DeclineReason::UnknownOffer);
    }

    #[tokio::test]
    async fn accept_of_expired_offer_expires_it_as_side_effect() {
        let h = harness();
        h.requests
            .create(request(1, RequestStatus::Proposed))
            .await
            .unwrap();
        let offer = Offer::new(
            Uuid::from_u128(1),
            Uuid::from_u128(2),
            now() - Duration::minutes(5),
            Some(now() - Duration::minutes(3)),
        );
        h.offers.create(offer.clone()).await.unwrap();

        let outcome = h
            .protocol
            .accept_offer(offer.id, offer.driver_id, now())
            .await
            .unwrap();

        let AcceptOutcome::Declined { reason } = outcome else {
            panic!("expected decline");
        };
        assert_eq!(reason, DeclineReason::OfferExpired);

        let stored = h.offers.get(offer.id).await.unwrap().unwrap();
        assert_eq!(stored.status, OfferStatus::Expired);
        assert_eq!(stored.responded_at, Some(now()));

        let request = h.requests.get(Uuid::from_u128(1)).await.unwrap().unwrap();
        assert_eq!(request.assigned_driver, None);
    }

    #[tokio::test]
    async fn losing_accept_is_declined_and_its_offer_expired() {
        let h = harness();
        h.requests
            .create(request(1, RequestStatus::Proposed))
            .await
            .unwrap();
        let winner = seed_offer(&h, 2).await;
        let loser = seed_offer(&h, 3).await;

        h.protocol
            .accept_offer(winner.id, winner.driver_id, now())
            .await
            .unwrap();

        let outcome = h
            .protocol
            .accept_offer(loser.id, loser.driver_id, now())
            .await
            .unwrap();

        let AcceptOutcome::Declined { reason } = outcome else {
            panic!("expected decline");
        };
        assert_eq!(reason, DeclineReason::RequestUnavailable);

        let request = h.requests.get(Uuid::from_u128(1)).await.unwrap().unwrap();
        assert_eq!(request.assigned_driver, Some(winner.driver_id));
    }

    #[tokio::test]
    async fn concurrent_accepts_produce_exactly_one_winner() {
        let h = harness();
        h.requests
            .create(request(1, RequestStatus::Proposed))
            .await
            .unwrap();

        let mut offers = Vec::new();
        for driver_seed in 2..10 {
            offers.push(seed_offer(&h, driver_seed).await);
        }

        let protocol = Arc::new(AssignmentProtocol::new(
            h.requests.clone(),
            h.offers.clone(),
        ));

        let mut handles = Vec::new();
        for offer in &offers {
            let protocol = protocol.clone();
            let offer_id = offer.id;
            let driver_id = offer.driver_id;
            handles.push(tokio::spawn(async move {
                protocol.accept_offer(offer_id, driver_id, Utc::now()).await
            }));
        }

        let mut accepted = Vec::new();
        let mut lost = 0;
        for handle in handles {
            match handle.await.unwrap().unwrap() {
                AcceptOutcome::Accepted { request } => accepted.push(request),
                // A loser either loses the request update or finds its own
                // offer already expired by the winner's sibling cleanup.
                AcceptOutcome::Declined {
                    reason: DeclineReason::RequestUnavailable | DeclineReason::OfferClosed,
                } => lost += 1,
                other => panic!("unexpected outcome: {other:?}"),
            }
        }

        assert_eq!(accepted.len(), 1);
        assert_eq!(lost, offers.len() - 1);

        let request = h.requests.get(Uuid::from_u128(1)).await.unwrap().unwrap();
        assert_eq!(request.assigned_driver, accepted[0].assigned_driver);

        let stored = h.offers.list_by_request(Uuid::from_u128(1)).await.unwrap();
        let accepted_offers = stored
            .iter()
            .filter(|o| o.status == OfferStatus::Accepted)
            .count();
        assert_eq!(accepted_offers, 1);
        assert!(
            stored
                .iter()
                .filter(|o| o.status != OfferStatus::Accepted)
                .all(|o| o.status == OfferStatus::Expired)
        );
    }

    #[tokio::test]
    async fn reject_never_changes_request_state() {
        let h = harness();
        h.requests
            .create(request(1, RequestStatus::Proposed))
            .await
            .unwrap();
        let offer = seed_offer(&h, 2).await;
        let other = seed_offer(&h, 3).await;

        let outcome = h
            .protocol
            .reject_offer(offer.id, offer.driver_id, now())
            .await
            .unwrap();

        let RejectOutcome::Rejected { offer: rejected } = outcome else {
            panic!("expected rejection");
        };
        assert_eq!(rejected.status, OfferStatus::Rejected);
        assert_eq!(rejected.responded_at, Some(now()));

        let request = h.requests.get(Uuid::from_u128(1)).await.unwrap().unwrap();
        assert_eq!(request.status, RequestStatus::Proposed);
        assert_eq!(request.assigned_driver, None);

        let other_stored = h.offers.get(other.id).await.unwrap().unwrap();
        assert_eq!(other_stored.status, OfferStatus::Sent);
    }

    #[tokio::test]
    async fn reject_of_already_responded_offer_is_declined() {
        let h = harness();
        h.requests
            .create(request(1, RequestStatus::Proposed))
            .await
            .unwrap();
        let offer = seed_offer(&h, 2).await;

        h.protocol
            .reject_offer(offer.id, offer.driver_id, now())
            .await
            .unwrap();

        let outcome = h
            .protocol
            .reject_offer(offer.id, offer.driver_id, now())
            .await
            .unwrap();

        let RejectOutcome::Declined { reason } = outcome else {
            panic!("expected decline");
        };
        assert_eq!(reason, DeclineReason::OfferClosed);
    }

    #[tokio::test]
    async fn reject_of_expired_offer_expires_it_instead() {
        let h = harness();
        h.requests
            .create(request(1, RequestStatus::Proposed))
            .await
            .unwrap();
        let offer = Offer::new(
            Uuid::from_u128(1),
            Uuid::from_u128(2),
            now() - Duration::minutes(5),
            Some(now() - Duration::minutes(3)),
        );
        h.offers.create(offer.clone()).await.unwrap();

        let outcome = h
            .protocol
            .reject_offer(offer.id, offer.driver_id, now())
            .await
            .unwrap();

        let RejectOutcome::Declined { reason } = outcome else {
            panic!("expected decline");
        };
        assert_eq!(reason, DeclineReason::OfferExpired);

        let stored = h.offers.get(offer.id).await.unwrap().unwrap();
        assert_eq!(stored.status, OfferStatus::Expired);
    }
}
