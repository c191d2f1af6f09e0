use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use crate::geo::haversine_m;
use crate::models::driver::{DriverSnapshot, GeoPoint};

#[derive(Debug, Clone)]
pub struct DriverCandidate {
    pub driver_id: Uuid,
    pub distance_m: f64,
}

/// Nearest-neighbor lookup over driver snapshots. Results are
/// distance-ascending, filtered by `filter`, capped at `limit`; ties carry
/// no ordering guarantee.
#[async_trait]
pub trait GeoIndex: Send + Sync {
    async fn find_near(
        &self,
        origin: &GeoPoint,
        radius_m: f64,
        filter: for<'a> fn(&'a DriverSnapshot) -> bool,
        limit: usize,
    ) -> Vec<DriverCandidate>;
}

/// In-process directory of driver snapshots, scanned with haversine on
/// every query. Stands in for an external spatial index.
pub struct DriverDirectory {
    drivers: DashMap<Uuid, DriverSnapshot>,
}

impl DriverDirectory {
    pub fn new() -> Self {
        Self {
            drivers: DashMap::new(),
        }
    }

    pub fn insert(&self, snapshot: DriverSnapshot) {
        self.drivers.insert(snapshot.id, snapshot);
    }

    pub fn get(&self, id: Uuid) -> Option<DriverSnapshot> {
        self.drivers.get(&id).map(|entry| entry.value().clone())
    }

    pub fn list(&self) -> Vec<DriverSnapshot> {
        self.drivers
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.drivers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.drivers.is_empty()
    }

    pub fn update_location(
        &self,
        id: Uuid,
        location: GeoPoint,
        at: DateTime<Utc>,
    ) -> Option<DriverSnapshot> {
        let mut driver = self.drivers.get_mut(&id)?;
        driver.location = location;
        driver.updated_at = at;
        Some(driver.clone())
    }

    pub fn set_available(
        &self,
        id: Uuid,
        available: bool,
        at: DateTime<Utc>,
    ) -> Option<DriverSnapshot> {
        let mut driver = self.drivers.get_mut(&id)?;
        driver.available = available;
        driver.updated_at = at;
        Some(driver.clone())
    }
}

impl Default for DriverDirectory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GeoIndex for DriverDirectory {
    async fn find_near(
        &self,
        origin: &GeoPoint,
        radius_m: f64,
        filter: for<'a> fn(&'a DriverSnapshot) -> bool,
        limit: usize,
    ) -> Vec<DriverCandidate> {
        let mut hits: Vec<DriverCandidate> = self
            .drivers
            .iter()
            .filter(|entry| filter(entry.value()))
            .filter_map(|entry| {
                let distance_m = haversine_m(origin, &entry.value().location);
                (distance_m <= radius_m).then(|| DriverCandidate {
                    driver_id: entry.value().id,
                    distance_m,
                })
            })
            .collect();

        hits.sort_by(|a, b| a.distance_m.total_cmp(&b.distance_m));
        hits.truncate(limit);
        hits
    }
}
