//! Persistence seams and the in-memory store.
//!
//! Solutions and planned routes are versioned records: every write
//! compare-and-swaps on `revision`, and new plans are appended as new
//! solution versions instead of being edited in place.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StoreError;
use crate::gatekeeper::SafetyReport;
use crate::manifest::Manifest;
use crate::model::{DriverId, FixedRoute, Location, ScheduledStop, Solution, SolutionStats, VehicleId};
use crate::publication::{CommunicationRecord, DriverTask};
use crate::token::DriverAccessToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SolutionStatus {
    Draft,
    Published,
}

/// One stored plan version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolutionRecord {
    pub id: Uuid,
    /// Assigned by the store; strictly increasing across all versions.
    pub version: u64,
    /// Version this one was derived from, for manual edits.
    pub parent: Option<Uuid>,
    pub status: SolutionStatus,
    /// Full solution as JSON.
    pub payload: String,
    pub stats: SolutionStats,
    pub safety_report: Option<SafetyReport>,
    pub revision: u64,
    pub created_at: DateTime<Utc>,
}

impl SolutionRecord {
    pub fn draft(solution: &Solution, parent: Option<Uuid>) -> Result<Self, StoreError> {
        Ok(Self {
            id: Uuid::new_v4(),
            version: 0,
            parent,
            status: SolutionStatus::Draft,
            payload: serde_json::to_string(solution)?,
            stats: solution.stats(),
            safety_report: None,
            revision: 0,
            created_at: Utc::now(),
        })
    }

    pub fn with_safety_report(mut self, report: SafetyReport) -> Self {
        self.safety_report = Some(report);
        self
    }

    pub fn solution(&self) -> Result<Solution, StoreError> {
        Ok(serde_json::from_str(&self.payload)?)
    }
}

/// A persisted route as the dispatcher sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedRoute {
    pub id: Uuid,
    pub vehicle_id: VehicleId,
    pub driver_id: Option<DriverId>,
    pub date: NaiveDate,
    /// Anchor for local resequencing.
    pub start: Location,
    pub stops: Vec<ScheduledStop>,
    pub locked: bool,
    pub solution_id: Option<Uuid>,
    pub template_id: Option<String>,
    /// Route that replaced this one on a later publication. Retired routes
    /// are kept for history but never constrain a solve.
    #[serde(default)]
    pub superseded_by: Option<Uuid>,
    pub revision: u64,
    pub created_at: DateTime<Utc>,
}

impl PlannedRoute {
    pub fn new(vehicle_id: impl Into<VehicleId>, date: NaiveDate, start: Location) -> Self {
        Self {
            id: Uuid::new_v4(),
            vehicle_id: vehicle_id.into(),
            driver_id: None,
            date,
            start,
            stops: Vec::new(),
            locked: false,
            solution_id: None,
            template_id: None,
            superseded_by: None,
            revision: 0,
            created_at: Utc::now(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.superseded_by.is_none()
    }

    /// Solver input for a locked route.
    pub fn as_fixed_route(&self) -> FixedRoute {
        FixedRoute {
            route_id: self.id,
            vehicle_id: self.vehicle_id.clone(),
            stops: self.stops.iter().map(|s| s.stop.clone()).collect(),
        }
    }
}

pub trait SolutionStore: Send + Sync {
    /// Appends a new version and returns it as stored.
    fn insert_solution(&self, record: SolutionRecord) -> Result<SolutionRecord, StoreError>;

    fn solution(&self, id: Uuid) -> Result<SolutionRecord, StoreError>;

    /// Replaces a record if its revision still matches.
    fn update_solution(&self, record: SolutionRecord) -> Result<SolutionRecord, StoreError>;

    fn latest_published(&self) -> Option<SolutionRecord>;

    /// All versions, oldest first.
    fn solution_versions(&self) -> Vec<SolutionRecord>;
}

pub trait RouteStore: Send + Sync {
    fn insert_route(&self, route: PlannedRoute) -> Result<PlannedRoute, StoreError>;

    fn route(&self, id: Uuid) -> Result<PlannedRoute, StoreError>;

    /// Replaces a route if its revision still matches.
    fn update_route(&self, route: PlannedRoute) -> Result<PlannedRoute, StoreError>;

    /// Active locked routes, newest first.
    fn locked_routes(&self) -> Vec<PlannedRoute>;

    /// Every route of the day, retired ones included.
    fn routes_for_date(&self, date: NaiveDate) -> Vec<PlannedRoute>;

    fn routes_for_solution(&self, solution_id: Uuid) -> Vec<PlannedRoute>;
}

pub trait ManifestStore: Send + Sync {
    fn insert_manifest(&self, manifest: Manifest) -> Result<Manifest, StoreError>;

    fn manifest(&self, id: Uuid) -> Result<Manifest, StoreError>;

    fn update_manifest(&self, manifest: Manifest) -> Result<Manifest, StoreError>;

    fn manifests(&self) -> Vec<Manifest>;
}

pub trait TaskStore: Send + Sync {
    fn insert_tasks(&self, tasks: Vec<DriverTask>) -> Result<(), StoreError>;

    fn tasks_for_manifest(&self, manifest_id: Uuid) -> Vec<DriverTask>;
}

pub trait CommunicationLog: Send + Sync {
    fn record(&self, record: CommunicationRecord) -> Result<(), StoreError>;

    fn records_for_driver(&self, driver_id: &str) -> Vec<CommunicationRecord>;
}

pub trait TokenStore: Send + Sync {
    fn insert_token(&self, token: DriverAccessToken) -> Result<(), StoreError>;

    fn token(&self, token: &str) -> Option<DriverAccessToken>;

    fn mark_used(&self, token: &str, at: DateTime<Utc>) -> Result<(), StoreError>;
}

/// Every store seam over process memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    solutions: RwLock<Vec<SolutionRecord>>,
    routes: RwLock<HashMap<Uuid, PlannedRoute>>,
    manifests: RwLock<Vec<Manifest>>,
    tasks: RwLock<Vec<DriverTask>>,
    communications: RwLock<Vec<CommunicationRecord>>,
    tokens: RwLock<HashMap<String, DriverAccessToken>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn check_revision(entity: &'static str, id: Uuid, expected: u64, actual: u64) -> Result<(), StoreError> {
    if expected != actual {
        return Err(StoreError::VersionConflict {
            entity,
            id: id.to_string(),
            expected,
            actual,
        });
    }
    Ok(())
}

fn not_found(entity: &'static str, id: impl ToString) -> StoreError {
    StoreError::NotFound {
        entity,
        id: id.to_string(),
    }
}

impl SolutionStore for MemoryStore {
    fn insert_solution(&self, mut record: SolutionRecord) -> Result<SolutionRecord, StoreError> {
        let mut solutions = self.solutions.write();
        record.version = solutions.last().map_or(1, |r| r.version + 1);
        record.revision = 1;
        solutions.push(record.clone());
        Ok(record)
    }

    fn solution(&self, id: Uuid) -> Result<SolutionRecord, StoreError> {
        self.solutions
            .read()
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .ok_or_else(|| not_found("solution", id))
    }

    fn update_solution(&self, mut record: SolutionRecord) -> Result<SolutionRecord, StoreError> {
        let mut solutions = self.solutions.write();
        let stored = solutions
            .iter_mut()
            .find(|r| r.id == record.id)
            .ok_or_else(|| not_found("solution", record.id))?;
        check_revision("solution", record.id, record.revision, stored.revision)?;
        record.revision += 1;
        *stored = record.clone();
        Ok(record)
    }

    fn latest_published(&self) -> Option<SolutionRecord> {
        self.solutions
            .read()
            .iter()
            .rev()
            .find(|r| r.status == SolutionStatus::Published)
            .cloned()
    }

    fn solution_versions(&self) -> Vec<SolutionRecord> {
        self.solutions.read().clone()
    }
}

impl RouteStore for MemoryStore {
    fn insert_route(&self, mut route: PlannedRoute) -> Result<PlannedRoute, StoreError> {
        route.revision = 1;
        self.routes.write().insert(route.id, route.clone());
        Ok(route)
    }

    fn route(&self, id: Uuid) -> Result<PlannedRoute, StoreError> {
        self.routes
            .read()
            .get(&id)
            .cloned()
            .ok_or_else(|| not_found("planned route", id))
    }

    fn update_route(&self, mut route: PlannedRoute) -> Result<PlannedRoute, StoreError> {
        let mut routes = self.routes.write();
        let stored = routes
            .get_mut(&route.id)
            .ok_or_else(|| not_found("planned route", route.id))?;
        check_revision("planned route", route.id, route.revision, stored.revision)?;
        route.revision += 1;
        *stored = route.clone();
        Ok(route)
    }

    fn locked_routes(&self) -> Vec<PlannedRoute> {
        let mut locked: Vec<PlannedRoute> = self
            .routes
            .read()
            .values()
            .filter(|r| r.locked && r.is_active())
            .cloned()
            .collect();
        locked.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        locked
    }

    fn routes_for_date(&self, date: NaiveDate) -> Vec<PlannedRoute> {
        self.routes.read().values().filter(|r| r.date == date).cloned().collect()
    }

    fn routes_for_solution(&self, solution_id: Uuid) -> Vec<PlannedRoute> {
        self.routes
            .read()
            .values()
            .filter(|r| r.solution_id == Some(solution_id))
            .cloned()
            .collect()
    }
}

impl ManifestStore for MemoryStore {
    fn insert_manifest(&self, manifest: Manifest) -> Result<Manifest, StoreError> {
        self.manifests.write().push(manifest.clone());
        Ok(manifest)
    }

    fn manifest(&self, id: Uuid) -> Result<Manifest, StoreError> {
        self.manifests
            .read()
            .iter()
            .find(|m| m.id == id)
            .cloned()
            .ok_or_else(|| not_found("manifest", id))
    }

    fn update_manifest(&self, manifest: Manifest) -> Result<Manifest, StoreError> {
        let mut manifests = self.manifests.write();
        let stored = manifests
            .iter_mut()
            .find(|m| m.id == manifest.id)
            .ok_or_else(|| not_found("manifest", manifest.id))?;
        *stored = manifest.clone();
        Ok(manifest)
    }

    fn manifests(&self) -> Vec<Manifest> {
        self.manifests.read().clone()
    }
}

impl TaskStore for MemoryStore {
    fn insert_tasks(&self, tasks: Vec<DriverTask>) -> Result<(), StoreError> {
        self.tasks.write().extend(tasks);
        Ok(())
    }

    fn tasks_for_manifest(&self, manifest_id: Uuid) -> Vec<DriverTask> {
        self.tasks
            .read()
            .iter()
            .filter(|t| t.manifest_id == manifest_id)
            .cloned()
            .collect()
    }
}

impl CommunicationLog for MemoryStore {
    fn record(&self, record: CommunicationRecord) -> Result<(), StoreError> {
        self.communications.write().push(record);
        Ok(())
    }

    fn records_for_driver(&self, driver_id: &str) -> Vec<CommunicationRecord> {
        self.communications
            .read()
            .iter()
            .filter(|r| r.driver_id == driver_id)
            .cloned()
            .collect()
    }
}

impl TokenStore for MemoryStore {
    fn insert_token(&self, token: DriverAccessToken) -> Result<(), StoreError> {
        self.tokens.write().insert(token.token.clone(), token);
        Ok(())
    }

    fn token(&self, token: &str) -> Option<DriverAccessToken> {
        self.tokens.read().get(token).cloned()
    }

    fn mark_used(&self, token: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut tokens = self.tokens.write();
        let stored = tokens.get_mut(token).ok_or_else(|| not_found("token", token))?;
        stored.used = true;
        stored.used_at = Some(at);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Score;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, 6).unwrap()
    }

    #[test]
    fn solution_versions_increase_and_latest_published_wins() {
        let store = MemoryStore::new();
        let solution = Solution {
            score: Score::new(0, -10),
            ..Solution::default()
        };

        let first = store.insert_solution(SolutionRecord::draft(&solution, None).unwrap()).unwrap();
        let second = store
            .insert_solution(SolutionRecord::draft(&solution, Some(first.id)).unwrap())
            .unwrap();
        assert_eq!((first.version, second.version), (1, 2));
        assert!(store.latest_published().is_none());

        let mut published = first.clone();
        published.status = SolutionStatus::Published;
        store.update_solution(published).unwrap();
        assert_eq!(store.latest_published().unwrap().id, first.id);
    }

    #[test]
    fn stale_route_write_is_a_version_conflict() {
        let store = MemoryStore::new();
        let route = store
            .insert_route(PlannedRoute::new("v1", date(), Location::new(52.0, 21.0)))
            .unwrap();

        let mut a = route.clone();
        a.locked = true;
        store.update_route(a).unwrap();

        let err = store.update_route(route).unwrap_err();
        assert!(matches!(
            err,
            StoreError::VersionConflict {
                expected: 1,
                actual: 2,
                ..
            }
        ));
    }

    #[test]
    fn retired_routes_are_not_locked_constraints() {
        let store = MemoryStore::new();
        let mut old = PlannedRoute::new("v1", date(), Location::new(52.0, 21.0));
        old.locked = true;
        let old = store.insert_route(old).unwrap();
        let mut new = PlannedRoute::new("v1", date(), Location::new(52.0, 21.0));
        new.locked = true;
        new.created_at = old.created_at + chrono::Duration::seconds(1);
        let new = store.insert_route(new).unwrap();

        let ids: Vec<Uuid> = store.locked_routes().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![new.id, old.id]);

        let mut retired = old.clone();
        retired.superseded_by = Some(new.id);
        store.update_route(retired).unwrap();

        let ids: Vec<Uuid> = store.locked_routes().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![new.id]);
        assert_eq!(store.routes_for_date(date()).len(), 2);
    }

    #[test]
    fn corrupt_payload_surfaces_serialization_error() {
        let mut record = SolutionRecord::draft(&Solution::default(), None).unwrap();
        record.payload = "{broken".to_string();
        assert!(matches!(record.solution(), Err(StoreError::Serialization(_))));
    }

    #[test]
    fn unknown_route_is_not_found() {
        let err = MemoryStore::new().route(Uuid::new_v4()).unwrap_err();
        assert!(matches!(err, StoreError::NotFound { entity: "planned route", .. }));
    }
}
