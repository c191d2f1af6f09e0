use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::engine::queue::enqueue_request;
use crate::geo::index::GeoIndex;
use crate::models::driver::DriverSnapshot;
use crate::models::event::DispatchEvent;
use crate::models::offer::Offer;
use crate::models::request::RequestStatus;
use crate::state::AppState;
use crate::store::{
    OfferCreateError, OfferStore, RequestStore, RequestTransition, StoreError,
};

const NO_SUPPLY_RETRY: tokio::time::Duration = tokio::time::Duration::from_millis(250);

#[derive(Debug, Clone)]
pub struct MatchPolicy {
    pub radii_m: Vec<f64>,
    pub max_candidates: usize,
    pub offer_ttl: Duration,
}

impl Default for MatchPolicy {
    fn default() -> Self {
        Self {
            radii_m: vec![2_000.0, 5_000.0, 10_000.0],
            max_candidates: 20,
            offer_ttl: Duration::minutes(2),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProposalOutcome {
    pub offers_created: usize,
    pub radius_m: f64,
}

#[derive(Debug, Error)]
pub enum MatchingError {
    #[error("request {0} not found")]
    RequestNotFound(Uuid),

    #[error("request {id} is {status:?}, expected Pending")]
    InvalidState { id: Uuid, status: RequestStatus },

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct MatchingEngine {
    geo: Arc<dyn GeoIndex>,
    requests: Arc<dyn RequestStore>,
    offers: Arc<dyn OfferStore>,
    policy: MatchPolicy,
}

impl MatchingEngine {
    pub fn new(
        geo: Arc<dyn GeoIndex>,
        requests: Arc<dyn RequestStore>,
        offers: Arc<dyn OfferStore>,
        policy: MatchPolicy,
    ) -> Self {
        Self {
            geo,
            requests,
            offers,
            policy,
        }
    }

    /// Widens the search radius in stages until at least one offer lands,
    /// then flips the request to Proposed and stops. Zero offers across all
    /// radii is a legitimate no-supply outcome, not an error; the request
    /// stays Pending for a later retry.
    pub async fn propose_to_drivers(
        &self,
        request_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<ProposalOutcome, MatchingError> {
        let request = self
            .requests
            .get(request_id)
            .await?
            .ok_or(MatchingError::RequestNotFound(request_id))?;

        if request.status != RequestStatus::Pending {
            return Err(MatchingError::InvalidState {
                id: request_id,
                status: request.status,
            });
        }

        let mut radius_tried = 0.0;
        for &radius_m in &self.policy.radii_m {
            radius_tried = radius_m;

            let candidates = self
                .geo
                .find_near(
                    &request.origin,
                    radius_m,
                    DriverSnapshot::is_eligible,
                    self.policy.max_candidates,
                )
                .await;

            if candidates.is_empty() {
                continue;
            }

            let mut created = 0;
            for candidate in &candidates {
                let offer = Offer::new(
                    request_id,
                    candidate.driver_id,
                    now,
                    Some(now + self.policy.offer_ttl),
                );

                match self.offers.create(offer).await {
                    Ok(()) => created += 1,
                    Err(OfferCreateError::Duplicate { driver_id, .. }) => {
                        debug!(request_id = %request_id, driver_id = %driver_id, "offer already exists, skipping driver");
                    }
                    Err(OfferCreateError::Store(err)) => {
                        warn!(
                            request_id = %request_id,
                            driver_id = %candidate.driver_id,
                            error = %err,
                            "offer creation failed, skipping driver"
                        );
                    }
                }
            }

            if created > 0 {
                let flipped = self
                    .requests
                    .conditional_transition(
                        request_id,
                        RequestTransition {
                            expected: vec![RequestStatus::Pending],
                            require_unassigned: true,
                            to: RequestStatus::Proposed,
                            assign_driver: None,
                            at: now,
                        },
                    )
                    .await?;

                if !flipped {
                    // A concurrent accept can move the request on before the
                    // flip lands; the offers just created drain through the
                    // normal decline and sweep paths.
                    warn!(request_id = %request_id, "request left Pending while offers were being created");
                }

                return Ok(ProposalOutcome {
                    offers_created: created,
                    radius_m,
                });
            }
        }

        Ok(ProposalOutcome {
            offers_created: 0,
            radius_m: radius_tried,
        })
    }
}

/// Runs the matching engine for one request and records metrics and events.
/// Shared by the background worker and the explicit re-propose endpoint.
pub async fn propose_and_publish(
    state: &AppState,
    request_id: Uuid,
) -> Result<ProposalOutcome, MatchingError> {
    let start = Instant::now();
    let result = state.matching.propose_to_drivers(request_id, Utc::now()).await;
    let elapsed = start.elapsed().as_secs_f64();

    let outcome_label = match &result {
        Ok(outcome) if outcome.offers_created > 0 => "proposed",
        Ok(_) => "no_supply",
        Err(MatchingError::InvalidState { .. }) => "skipped",
        Err(_) => "error",
    };
    state
        .metrics
        .matching_latency_seconds
        .with_label_values(&[outcome_label])
        .observe(elapsed);
    state
        .metrics
        .proposals_total
        .with_label_values(&[outcome_label])
        .inc();

    if let Ok(outcome) = &result {
        if outcome.offers_created > 0 {
            state
                .metrics
                .offers_total
                .with_label_values(&["sent"])
                .inc_by(outcome.offers_created as u64);
            let _ = state.dispatch_events_tx.send(DispatchEvent::OffersProposed {
                request_id,
                offers_created: outcome.offers_created,
                radius_m: outcome.radius_m,
            });
            info!(
                request_id = %request_id,
                offers = outcome.offers_created,
                radius_m = outcome.radius_m,
                "offers proposed"
            );
        }
    }

    result
}

pub async fn run_matching_engine(state: Arc<AppState>, mut request_rx: mpsc::Receiver<Uuid>) {
    info!("matching engine started");

    while let Some(request_id) = request_rx.recv().await {
        state.metrics.requests_in_queue.dec();

        match propose_and_publish(&state, request_id).await {
            Ok(outcome) if outcome.offers_created > 0 => {}
            Ok(_) => {
                warn!(request_id = %request_id, "no eligible drivers; re-queueing request");
                sleep(NO_SUPPLY_RETRY).await;
                if let Err(err) = enqueue_request(&state, request_id).await {
                    error!(request_id = %request_id, error = %err, "failed to re-queue request");
                }
            }
            Err(MatchingError::InvalidState { id, status }) => {
                debug!(request_id = %id, status = ?status, "request moved on while queued");
            }
            Err(err) => {
                error!(request_id = %request_id, error = %err, "failed to propose request");
            }
        }
    }

    warn!("matching engine stopped: queue channel closed");
}
