use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::models::offer::OfferStatus;
use crate::state::AppState;
use crate::store::{OfferStore, StoreError};

#[derive(Debug, Clone, Serialize)]
pub struct SweepOutcome {
    pub expired_count: usize,
}

/// Reconciles offers whose TTL elapsed without a response. Idempotent and
/// safe to run concurrently with accepts: each expiry is a conditional
/// transition, so whichever side lands first wins and the other is a no-op.
pub struct ExpirationSweeper {
    offers: Arc<dyn OfferStore>,
}

impl ExpirationSweeper {
    pub fn new(offers: Arc<dyn OfferStore>) -> Self {
        Self { offers }
    }

    /// Never touches request state: a request left without live offers
    /// stays Pending or Proposed, eligible for a fresh proposal.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepOutcome, StoreError> {
        let due = self.offers.list_expirable(now).await?;

        let mut expired_count = 0;
        for offer in due {
            match self
                .offers
                .conditional_transition(offer.id, OfferStatus::Sent, OfferStatus::Expired, now)
                .await
            {
                Ok(true) => expired_count += 1,
                Ok(false) => {}
                Err(err) => {
                    warn!(offer_id = %offer.id, error = %err, "failed to expire offer");
                }
            }
        }

        Ok(SweepOutcome { expired_count })
    }
}

pub async fn run_expiration_sweeper(state: Arc<AppState>, interval: tokio::time::Duration) {
    info!(interval_secs = interval.as_secs(), "expiration sweeper started");

    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;

        match state.sweeper.sweep(Utc::now()).await {
            Ok(outcome) if outcome.expired_count > 0 => {
                state
                    .metrics
                    .offers_total
                    .with_label_values(&["expired"])
                    .inc_by(outcome.expired_count as u64);
                info!(expired = outcome.expired_count, "expired stale offers");
            }
            Ok(_) => {}
            Err(err) => {
                error!(error = %err, "sweep failed");
            }
        }
    }
}
