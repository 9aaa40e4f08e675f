//! Driver manifests and their status state machine.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{PlannerError, PlannerResult, TransitionError};
use crate::model::{DriverId, Location, OrderId, ScheduledStop, TimeWindow, VehicleId};
use crate::store::ManifestStore;

/// Forward-only lifecycle: `DRAFT -> ASSIGNED -> IN_PROGRESS -> COMPLETED`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ManifestStatus {
    Draft,
    Assigned,
    InProgress,
    Completed,
}

impl ManifestStatus {
    /// The only status reachable from this one.
    pub fn successor(self) -> Option<ManifestStatus> {
        match self {
            ManifestStatus::Draft => Some(ManifestStatus::Assigned),
            ManifestStatus::Assigned => Some(ManifestStatus::InProgress),
            ManifestStatus::InProgress => Some(ManifestStatus::Completed),
            ManifestStatus::Completed => None,
        }
    }

    pub fn transition_to(self, next: ManifestStatus) -> Result<ManifestStatus, TransitionError> {
        if self.successor() == Some(next) {
            Ok(next)
        } else {
            Err(TransitionError {
                from: self,
                to: next,
            })
        }
    }
}

impl fmt::Display for ManifestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ManifestStatus::Draft => "DRAFT",
            ManifestStatus::Assigned => "ASSIGNED",
            ManifestStatus::InProgress => "IN_PROGRESS",
            ManifestStatus::Completed => "COMPLETED",
        };
        f.write_str(name)
    }
}

/// One sequenced entry of a manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestStop {
    pub order_id: OrderId,
    /// 1-based position on the route.
    pub sequence: u32,
    pub location: Location,
    pub time_window: Option<TimeWindow>,
    pub estimated_arrival: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub id: Uuid,
    pub driver_id: Option<DriverId>,
    pub vehicle_id: VehicleId,
    pub date: NaiveDate,
    pub status: ManifestStatus,
    pub stops: Vec<ManifestStop>,
    pub total_distance_m: f64,
    pub estimated_duration_secs: i64,
    pub external_reference: String,
    pub created_at: DateTime<Utc>,
}

/// `MAN-YYYYMMDD-XXXX`, where `XXXX` is the head of the vehicle id.
pub fn external_reference(date: NaiveDate, vehicle_id: &str) -> String {
    let head: String = vehicle_id.chars().take(4).collect::<String>().to_uppercase();
    format!("MAN-{}-{head}", date.format("%Y%m%d"))
}

pub struct ManifestService {
    store: Arc<dyn ManifestStore>,
}

impl ManifestService {
    pub fn new(store: Arc<dyn ManifestStore>) -> Self {
        Self { store }
    }

    /// New `DRAFT` manifest from a scheduled stop sequence.
    pub fn create(
        &self,
        vehicle_id: &VehicleId,
        date: NaiveDate,
        stops: &[ScheduledStop],
        total_distance_m: f64,
        estimated_duration_secs: i64,
    ) -> PlannerResult<Manifest> {
        let manifest = Manifest {
            id: Uuid::new_v4(),
            driver_id: None,
            vehicle_id: vehicle_id.clone(),
            date,
            status: ManifestStatus::Draft,
            stops: stops
                .iter()
                .enumerate()
                .map(|(i, s)| ManifestStop {
                    order_id: s.stop.order_id.clone(),
                    sequence: i as u32 + 1,
                    location: s.stop.location,
                    time_window: s.stop.time_window,
                    estimated_arrival: s.arrival,
                })
                .collect(),
            total_distance_m,
            estimated_duration_secs,
            external_reference: external_reference(date, vehicle_id),
            created_at: Utc::now(),
        };

        let saved = self.store.insert_manifest(manifest)?;
        info!(
            manifest_id = %saved.id,
            vehicle_id = %saved.vehicle_id,
            stops = saved.stops.len(),
            reference = %saved.external_reference,
            "Created manifest"
        );
        Ok(saved)
    }

    /// Sets the driver and moves `DRAFT -> ASSIGNED`.
    pub fn assign_driver(&self, manifest_id: Uuid, driver_id: &DriverId) -> PlannerResult<Manifest> {
        let mut manifest = self.store.manifest(manifest_id)?;
        manifest.status = manifest.status.transition_to(ManifestStatus::Assigned)?;
        manifest.driver_id = Some(driver_id.clone());
        info!(%manifest_id, driver_id = %driver_id, "Assigned driver to manifest");
        Ok(self.store.update_manifest(manifest)?)
    }

    pub fn update_status(&self, manifest_id: Uuid, status: ManifestStatus) -> PlannerResult<Manifest> {
        let mut manifest = self.store.manifest(manifest_id)?;
        if status == ManifestStatus::Assigned && manifest.driver_id.is_none() {
            return Err(PlannerError::InvalidState(format!(
                "manifest {manifest_id} has no driver to assign"
            )));
        }
        let from = manifest.status;
        manifest.status = from.transition_to(status)?;
        info!(%manifest_id, %from, to = %status, "Manifest status changed");
        Ok(self.store.update_manifest(manifest)?)
    }

    pub fn manifest(&self, manifest_id: Uuid) -> PlannerResult<Manifest> {
        Ok(self.store.manifest(manifest_id)?)
    }

    pub fn for_driver(&self, driver_id: &str, date: NaiveDate) -> Vec<Manifest> {
        debug!(driver_id, %date, "Fetching manifests for driver");
        self.filter(|m| m.driver_id.as_deref() == Some(driver_id) && m.date == date)
    }

    pub fn by_date(&self, date: NaiveDate) -> Vec<Manifest> {
        self.filter(|m| m.date == date)
    }

    pub fn by_status(&self, status: ManifestStatus) -> Vec<Manifest> {
        self.filter(|m| m.status == status)
    }

    /// Inclusive on both ends.
    pub fn by_date_range(&self, start: NaiveDate, end: NaiveDate) -> Vec<Manifest> {
        self.filter(|m| m.date >= start && m.date <= end)
    }

    fn filter(&self, predicate: impl Fn(&Manifest) -> bool) -> Vec<Manifest> {
        self.store.manifests().into_iter().filter(|m| predicate(m)).collect()
    }
}
