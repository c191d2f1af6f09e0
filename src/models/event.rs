use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DispatchEvent {
    OffersProposed {
        request_id: Uuid,
        offers_created: usize,
        radius_m: f64,
    },
    OfferAccepted {
        request_id: Uuid,
        offer_id: Uuid,
        driver_id: Uuid,
    },
    OfferRejected {
        request_id: Uuid,
        offer_id: Uuid,
        driver_id: Uuid,
    },
}
