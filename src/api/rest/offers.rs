use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use crate::engine::assignment::{AcceptOutcome, DeclineReason, RejectOutcome};
use crate::error::AppError;
use crate::models::event::DispatchEvent;
use crate::models::offer::Offer;
use crate::models::request::DeliveryRequest;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/offers/:id", get(get_offer))
        .route("/offers/:id/accept", post(accept_offer))
        .route("/offers/:id/reject", post(reject_offer))
}

#[derive(Deserialize)]
pub struct OfferActionRequest {
    pub driver_id: Uuid,
}

async fn get_offer(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Offer>, AppError> {
    let offer = state
        .offers
        .get(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("offer {id} not found")))?;

    Ok(Json(offer))
}

async fn accept_offer(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<OfferActionRequest>,
) -> Result<Json<DeliveryRequest>, AppError> {
    let outcome = state
        .assignment
        .accept_offer(id, payload.driver_id, Utc::now())
        .await?;

    match outcome {
        AcceptOutcome::Accepted { request } => {
            state
                .metrics
                .offers_total
                .with_label_values(&["accepted"])
                .inc();
            let _ = state.dispatch_events_tx.send(DispatchEvent::OfferAccepted {
                request_id: request.id,
                offer_id: id,
                driver_id: payload.driver_id,
            });
            tracing::info!(
                request_id = %request.id,
                offer_id = %id,
                driver_id = %payload.driver_id,
                "offer accepted"
            );
            Ok(Json(request))
        }
        AcceptOutcome::Declined { reason } => Err(decline_to_error(id, reason)),
    }
}

async fn reject_offer(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<OfferActionRequest>,
) -> Result<Json<Offer>, AppError> {
    let outcome = state
        .assignment
        .reject_offer(id, payload.driver_id, Utc::now())
        .await?;

    match outcome {
        RejectOutcome::Rejected { offer } => {
            state
                .metrics
                .offers_total
                .with_label_values(&["rejected"])
                .inc();
            let _ = state.dispatch_events_tx.send(DispatchEvent::OfferRejected {
                request_id: offer.request_id,
                offer_id: offer.id,
                driver_id: payload.driver_id,
            });
            Ok(Json(offer))
        }
        RejectOutcome::Declined { reason } => Err(decline_to_error(id, reason)),
    }
}

/// Distinct statuses per decline reason so clients can tell "already taken"
/// from "expired" from "not yours".
fn decline_to_error(offer_id: Uuid, reason: DeclineReason) -> AppError {
    match reason {
        DeclineReason::UnknownOffer => AppError::NotFound(format!("offer {offer_id} not found")),
        DeclineReason::DriverMismatch => {
            AppError::Forbidden(format!("offer {offer_id} belongs to another driver"))
        }
        DeclineReason::OfferClosed => {
            AppError::Conflict(format!("offer {offer_id} was already responded to"))
        }
        DeclineReason::OfferExpired => AppError::Gone(format!("offer {offer_id} expired")),
        DeclineReason::RequestUnavailable => {
            AppError::Conflict("this delivery was already taken".to_string())
        }
    }
}
