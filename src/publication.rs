//! Turns a stored plan into driver-facing manifests, tasks and access links.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::TokenConfig;
use crate::error::{NotifyError, PlannerResult, StoreError};
use crate::manifest::ManifestService;
use crate::model::{DriverId, OrderId, Route, VehicleId};
use crate::store::{CommunicationLog, PlannedRoute, RouteStore, SolutionStatus, SolutionStore, TaskStore};
use crate::token::TokenService;
use crate::traits::{DriverNotifier, OrderSystem};

/// Attempts to retire a route before a concurrent edit is surfaced.
const MAX_RETIRE_ATTEMPTS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    Completed,
    Failed,
}

/// Per-stop work item for a driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverTask {
    pub id: Uuid,
    pub manifest_id: Uuid,
    pub route_id: Uuid,
    pub driver_id: DriverId,
    pub order_id: OrderId,
    pub sequence: u32,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
}

/// Audit entry for a message sent to a driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommunicationRecord {
    pub id: Uuid,
    pub driver_id: DriverId,
    pub route_id: Uuid,
    pub channel: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PublishedRoute {
    pub route_id: Uuid,
    pub manifest_id: Uuid,
    pub vehicle_id: VehicleId,
    pub driver_id: DriverId,
    pub token: String,
    pub link: String,
    pub tasks: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PublicationReport {
    pub published: Vec<PublishedRoute>,
    /// Routes left out for lack of a driver.
    pub skipped_vehicles: Vec<VehicleId>,
    pub propagation_failures: usize,
    pub notification_failures: usize,
}

pub struct PublicationService {
    solutions: Arc<dyn SolutionStore>,
    routes: Arc<dyn RouteStore>,
    tasks: Arc<dyn TaskStore>,
    communications: Arc<dyn CommunicationLog>,
    manifests: ManifestService,
    tokens: Arc<TokenService>,
    notifier: Option<Arc<dyn DriverNotifier>>,
    order_system: Option<Arc<dyn OrderSystem>>,
}

impl PublicationService {
    pub fn new(
        solutions: Arc<dyn SolutionStore>,
        routes: Arc<dyn RouteStore>,
        tasks: Arc<dyn TaskStore>,
        communications: Arc<dyn CommunicationLog>,
        manifests: ManifestService,
        tokens: Arc<TokenService>,
    ) -> Self {
        Self {
            solutions,
            routes,
            tasks,
            communications,
            manifests,
            tokens,
            notifier: None,
            order_system: None,
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn DriverNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn with_order_system(mut self, order_system: Arc<dyn OrderSystem>) -> Self {
        self.order_system = Some(order_system);
        self
    }

    /// Publishes every route of a stored plan that has a driver.
    ///
    /// `drivers` maps vehicle id to driver and overrides the driver carried
    /// by the route. Republishing creates fresh manifests and tasks.
    pub fn publish(
        &self,
        solution_id: Uuid,
        drivers: &HashMap<VehicleId, DriverId>,
        date: NaiveDate,
    ) -> PlannerResult<PublicationReport> {
        let record = self.solutions.solution(solution_id)?;
        let solution = record.solution()?;

        if record.status == SolutionStatus::Published {
            info!(%solution_id, "Solution already published, creating new manifest versions");
        }

        let mut report = PublicationReport::default();
        for route in solution.routes.iter().filter(|r| !r.stops.is_empty()) {
            let driver = drivers
                .get(&route.vehicle_id)
                .or(route.driver_id.as_ref())
                .cloned();

            match driver {
                Some(driver_id) => {
                    let published = self.publish_route(solution_id, route, &driver_id, date, &mut report)?;
                    report.published.push(published);
                }
                None => {
                    warn!(%solution_id, vehicle_id = %route.vehicle_id, "Route has no driver, skipping");
                    report.skipped_vehicles.push(route.vehicle_id.clone());
                }
            }
        }

        let mut record = record;
        record.status = SolutionStatus::Published;
        self.solutions.update_solution(record)?;

        if report.published.is_empty() {
            warn!(%solution_id, "Solution marked published but no route had a driver");
        }
        info!(
            %solution_id,
            published = report.published.len(),
            skipped = report.skipped_vehicles.len(),
            propagation_failures = report.propagation_failures,
            notification_failures = report.notification_failures,
            "Publication finished"
        );

        Ok(report)
    }

    /// Marks the vehicle's earlier active routes of the day as superseded by
    /// `current`, so at most one route per vehicle and day stays active.
    fn retire_previous(&self, current: &PlannedRoute) -> PlannerResult<()> {
        let stale: Vec<Uuid> = self
            .routes
            .routes_for_date(current.date)
            .into_iter()
            .filter(|r| r.id != current.id && r.vehicle_id == current.vehicle_id && r.is_active())
            .map(|r| r.id)
            .collect();

        for route_id in stale {
            let mut attempt = 1;
            loop {
                let mut route = self.routes.route(route_id)?;
                if !route.is_active() {
                    break;
                }
                route.superseded_by = Some(current.id);
                match self.routes.update_route(route) {
                    Ok(_) => {
                        debug!(%route_id, superseded_by = %current.id, "Retired previous route");
                        break;
                    }
                    Err(StoreError::VersionConflict { .. }) if attempt < MAX_RETIRE_ATTEMPTS => attempt += 1,
                    Err(err) => return Err(err.into()),
                }
            }
        }
        Ok(())
    }

    fn publish_route(
        &self,
        solution_id: Uuid,
        route: &Route,
        driver_id: &DriverId,
        date: NaiveDate,
        report: &mut PublicationReport,
    ) -> PlannerResult<PublishedRoute> {
        let mut planned = PlannedRoute::new(route.vehicle_id.clone(), date, route.start);
        planned.driver_id = Some(driver_id.clone());
        planned.stops = route.stops.clone();
        planned.solution_id = Some(solution_id);
        planned.locked = route.locked;
        let planned = self.routes.insert_route(planned)?;
        self.retire_previous(&planned)?;

        let manifest = self.manifests.create(
            &route.vehicle_id,
            date,
            &route.stops,
            route.total_distance_m,
            route.total_duration_secs,
        )?;
        let manifest = self.manifests.assign_driver(manifest.id, driver_id)?;

        let now = Utc::now();
        let tasks: Vec<DriverTask> = manifest
            .stops
            .iter()
            .map(|stop| DriverTask {
                id: Uuid::new_v4(),
                manifest_id: manifest.id,
                route_id: planned.id,
                driver_id: driver_id.clone(),
                order_id: stop.order_id.clone(),
                sequence: stop.sequence,
                status: TaskStatus::Pending,
                created_at: now,
            })
            .collect();
        let task_count = tasks.len();
        self.tasks.insert_tasks(tasks)?;

        if let Some(order_system) = &self.order_system {
            for stop in &route.stops {
                if let Err(err) = order_system.assign_driver(&stop.stop.order_id, driver_id) {
                    warn!(order_id = %stop.stop.order_id, error = %err, "Failed to propagate driver to order system");
                    report.propagation_failures += 1;
                }
            }
        }

        let token = self.tokens.issue(driver_id, planned.id)?;
        let link = self.tokens.claim_link(&token);

        self.communications.record(CommunicationRecord {
            id: Uuid::new_v4(),
            driver_id: driver_id.clone(),
            route_id: planned.id,
            channel: "magic_link".to_string(),
            message: format!("Route for {date}: {link}"),
            created_at: now,
        })?;

        if let Some(notifier) = &self.notifier {
            if let Err(err) = notifier.notify_driver(driver_id, &link) {
                warn!(driver_id = %driver_id, error = %err, "Failed to deliver driver link");
                report.notification_failures += 1;
            }
        }

        info!(
            route_id = %planned.id,
            manifest_id = %manifest.id,
            driver_id = %driver_id,
            tasks = task_count,
            "Published route"
        );

        Ok(PublishedRoute {
            route_id: planned.id,
            manifest_id: manifest.id,
            vehicle_id: route.vehicle_id.clone(),
            driver_id: driver_id.clone(),
            token: token.token,
            link,
            tasks: task_count,
        })
    }
}

#[derive(Debug, Serialize)]
struct DriverLinkMessage<'a> {
    driver_id: &'a str,
    link: &'a str,
}

/// Hands claim links to an HTTP relay that emails or pushes them.
#[derive(Debug, Clone)]
pub struct WebhookDriverNotifier {
    url: String,
    client: reqwest::blocking::Client,
}

impl WebhookDriverNotifier {
    pub fn new(url: impl Into<String>, timeout_secs: u64) -> Result<Self, NotifyError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;

        Ok(Self {
            url: url.into(),
            client,
        })
    }

    pub fn from_config(config: &TokenConfig) -> Result<Option<Self>, NotifyError> {
        config
            .notify_webhook_url
            .as_ref()
            .map(|url| Self::new(url.clone(), config.notify_timeout_secs))
            .transpose()
    }
}

impl DriverNotifier for WebhookDriverNotifier {
    fn notify_driver(&self, driver_id: &DriverId, link: &str) -> Result<(), NotifyError> {
        self.client
            .post(&self.url)
            .json(&DriverLinkMessage { driver_id, link })
            .send()
            .and_then(|resp| resp.error_for_status())?;
        Ok(())
    }
}
