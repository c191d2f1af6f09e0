use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use crate::engine::matching::{propose_and_publish, ProposalOutcome};
use crate::engine::queue::enqueue_request;
use crate::error::AppError;
use crate::models::driver::GeoPoint;
use crate::models::offer::Offer;
use crate::models::request::{DeliveryRequest, RequestStatus};
use crate::state::AppState;
use crate::store::RequestTransition;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/requests", post(create_request))
        .route("/requests/:id", get(get_request))
        .route("/requests/:id/offers", get(list_request_offers))
        .route("/requests/:id/propose", post(propose_request))
        .route("/requests/:id/cancel", post(cancel_request))
        .route("/requests/:id/pickup", post(pickup_request))
        .route("/requests/:id/delivered", post(deliver_request))
}

#[derive(Deserialize)]
pub struct CreateRequestRequest {
    pub restaurant_id: Uuid,
    pub origin: GeoPoint,
    pub origin_address: String,
    pub destination: GeoPoint,
    pub destination_address: String,
    pub fee: f64,
    pub notes: Option<String>,
}

#[derive(Deserialize)]
pub struct DriverActionRequest {
    pub driver_id: Uuid,
}

async fn create_request(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateRequestRequest>,
) -> Result<Json<DeliveryRequest>, AppError> {
    if payload.origin_address.trim().is_empty() || payload.destination_address.trim().is_empty() {
        return Err(AppError::BadRequest(
            "origin and destination addresses cannot be empty".to_string(),
        ));
    }
    if !payload.fee.is_finite() || payload.fee < 0.0 {
        return Err(AppError::BadRequest("fee must be non-negative".to_string()));
    }

    let request = DeliveryRequest {
        id: Uuid::new_v4(),
        restaurant_id: payload.restaurant_id,
        origin: payload.origin,
        origin_address: payload.origin_address,
        destination: payload.destination,
        destination_address: payload.destination_address,
        fee: payload.fee,
        notes: payload.notes,
        status: RequestStatus::Pending,
        assigned_driver: None,
        created_at: Utc::now(),
        assigned_at: None,
        cancelled_at: None,
        delivered_at: None,
    };

    state.requests.create(request.clone()).await?;
    enqueue_request(&state, request.id).await?;

    Ok(Json(request))
}

async fn get_request(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<DeliveryRequest>, AppError> {
    let request = state
        .requests
        .get(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("request {id} not found")))?;

    Ok(Json(request))
}

async fn list_request_offers(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<Offer>>, AppError> {
    state
        .requests
        .get(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("request {id} not found")))?;

    let offers = state.offers.list_by_request(id).await?;
    Ok(Json(offers))
}

/// Hook for an external scheduler to run or re-run matching for a request
/// that is still Pending. A zero-offer outcome is a 200: no supply is not a
/// failure.
async fn propose_request(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<ProposalOutcome>, AppError> {
    let outcome = propose_and_publish(&state, id).await?;
    Ok(Json(outcome))
}

async fn cancel_request(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<DeliveryRequest>, AppError> {
    state
        .requests
        .get(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("request {id} not found")))?;

    let cancelled = state
        .requests
        .conditional_transition(
            id,
            RequestTransition {
                expected: vec![RequestStatus::Pending, RequestStatus::Proposed],
                require_unassigned: true,
                to: RequestStatus::Cancelled,
                assign_driver: None,
                at: Utc::now(),
            },
        )
        .await?;

    if !cancelled {
        return Err(AppError::Conflict(format!(
            "request {id} is already assigned or closed"
        )));
    }

    let request = state
        .requests
        .get(id)
        .await?
        .ok_or_else(|| AppError::Internal(format!("request {id} vanished after cancel")))?;
    Ok(Json(request))
}

async fn pickup_request(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<DriverActionRequest>,
) -> Result<Json<DeliveryRequest>, AppError> {
    transition_by_assigned_driver(
        &state,
        id,
        payload.driver_id,
        RequestStatus::Accepted,
        RequestStatus::InDelivery,
    )
    .await
}

async fn deliver_request(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<DriverActionRequest>,
) -> Result<Json<DeliveryRequest>, AppError> {
    transition_by_assigned_driver(
        &state,
        id,
        payload.driver_id,
        RequestStatus::InDelivery,
        RequestStatus::Delivered,
    )
    .await
}

async fn transition_by_assigned_driver(
    state: &AppState,
    id: Uuid,
    driver_id: Uuid,
    from: RequestStatus,
    to: RequestStatus,
) -> Result<Json<DeliveryRequest>, AppError> {
    let request = state
        .requests
        .get(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("request {id} not found")))?;

    if request.assigned_driver != Some(driver_id) {
        return Err(AppError::Forbidden(format!(
            "driver {driver_id} is not assigned to request {id}"
        )));
    }

    let applied = state
        .requests
        .conditional_transition(
            id,
            RequestTransition {
                expected: vec![from],
                require_unassigned: false,
                to,
                assign_driver: None,
                at: Utc::now(),
            },
        )
        .await?;

    if !applied {
        return Err(AppError::Conflict(format!(
            "request {id} is not in {from:?}"
        )));
    }

    let request = state
        .requests
        .get(id)
        .await?
        .ok_or_else(|| AppError::Internal(format!("request {id} vanished after transition")))?;
    Ok(Json(request))
}
