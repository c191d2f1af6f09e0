use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;

use crate::engine::assignment::AssignmentProtocol;
use crate::engine::matching::{MatchPolicy, MatchingEngine};
use crate::engine::sweeper::ExpirationSweeper;
use crate::geo::index::DriverDirectory;
use crate::models::event::DispatchEvent;
use crate::observability::metrics::Metrics;
use crate::store::memory::{InMemoryOfferStore, InMemoryRequestStore};
use crate::store::{OfferStore, RequestStore};

pub struct AppState {
    pub drivers: Arc<DriverDirectory>,
    pub requests: Arc<dyn RequestStore>,
    pub offers: Arc<dyn OfferStore>,
    pub matching: MatchingEngine,
    pub assignment: AssignmentProtocol,
    pub sweeper: ExpirationSweeper,
    pub request_tx: mpsc::Sender<Uuid>,
    pub dispatch_events_tx: broadcast::Sender<DispatchEvent>,
    pub metrics: Metrics,
}

impl AppState {
    pub fn new(
        policy: MatchPolicy,
        request_queue_size: usize,
        event_buffer_size: usize,
    ) -> (Self, mpsc::Receiver<Uuid>) {
        let drivers = Arc::new(DriverDirectory::new());
        let requests: Arc<dyn RequestStore> = Arc::new(InMemoryRequestStore::new());
        let offers: Arc<dyn OfferStore> = Arc::new(InMemoryOfferStore::new());

        let matching = MatchingEngine::new(
            drivers.clone(),
            requests.clone(),
            offers.clone(),
            policy,
        );
        let assignment = AssignmentProtocol::new(requests.clone(), offers.clone());
        let sweeper = ExpirationSweeper::new(offers.clone());

        let (request_tx, request_rx) = mpsc::channel(request_queue_size);
        let (dispatch_events_tx, _unused_rx) = broadcast::channel(event_buffer_size);

        (
            Self {
                drivers,
                requests,
                offers,
                matching,
                assignment,
                sweeper,
                request_tx,
                dispatch_events_tx,
                metrics: Metrics::new(),
            },
            request_rx,
        )
    }
}
