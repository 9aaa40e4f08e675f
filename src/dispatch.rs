//! Dispatcher edits applied to persisted plans without a full re-solve.

use std::sync::Arc;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::SolverConfig;
use crate::error::{PlannerError, PlannerResult, StoreError};
use crate::model::{DriverId, Location, Order, ScheduledStop, Solution, Stop, VehicleId};
use crate::search::{estimate_schedule, resequence};
use crate::store::{PlannedRoute, RouteStore, SolutionRecord, SolutionStore};
use crate::traits::OrderSource;

/// Attempts for a read-modify-write before a version conflict is surfaced.
const MAX_WRITE_ATTEMPTS: usize = 3;

/// A recurring route that is instantiated per day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteTemplate {
    pub id: String,
    pub name: String,
    pub vehicle_id: VehicleId,
    pub driver_id: Option<DriverId>,
    pub start: Location,
    pub active: bool,
}

pub struct DispatchService {
    routes: Arc<dyn RouteStore>,
    solutions: Arc<dyn SolutionStore>,
    orders: Arc<dyn OrderSource>,
    config: SolverConfig,
}

impl DispatchService {
    pub fn new(
        routes: Arc<dyn RouteStore>,
        solutions: Arc<dyn SolutionStore>,
        orders: Arc<dyn OrderSource>,
        config: SolverConfig,
    ) -> Self {
        Self {
            routes,
            solutions,
            orders,
            config,
        }
    }

    /// Adds an ad-hoc stop, resequences only this route from `start` (the
    /// route's own anchor when `None`) and locks it.
    pub fn inject_order(
        &self,
        route_id: Uuid,
        order: &Order,
        start: Option<Location>,
    ) -> PlannerResult<PlannedRoute> {
        let mut stop = Stop::from_order(order).ok_or_else(|| {
            PlannerError::InvalidState(format!("order {} has no delivery coordinates", order.id))
        })?;
        stop.manual = true;

        let route = self.modify_route(route_id, |route| {
            if route.stops.iter().any(|s| s.stop.order_id == stop.order_id) {
                return Err(PlannerError::InvalidState(format!(
                    "order {} is already on route {route_id}",
                    stop.order_id
                )));
            }

            let anchor = start.unwrap_or(route.start);
            let mut stops: Vec<Stop> = route.stops.iter().map(|s| s.stop.clone()).collect();
            stops.push(stop.clone());
            route.stops = self.schedule(resequence(stops, anchor), anchor);
            route.locked = true;
            Ok(())
        })?;

        info!(%route_id, order_id = %order.id, stops = route.stops.len(), "Injected order and locked route");
        Ok(route)
    }

    /// Appends an order to the matching route of the latest published plan
    /// and stores the result as a new draft version. The published version is
    /// left untouched and the plan is not re-scored.
    pub fn append_order(&self, route_id: Uuid, order_id: &str) -> PlannerResult<SolutionRecord> {
        let route = self.routes.route(route_id)?;
        let order = self
            .orders
            .orders_by_ids(&[order_id.to_string()])
            .into_iter()
            .next()
            .ok_or_else(|| PlannerError::not_found("order", order_id))?;
        let mut stop = Stop::from_order(&order).ok_or_else(|| {
            PlannerError::InvalidState(format!("order {order_id} has no delivery coordinates"))
        })?;
        stop.manual = true;

        let published = self
            .solutions
            .latest_published()
            .ok_or_else(|| PlannerError::not_found("published solution", "latest"))?;
        let mut solution = published.solution()?;

        let target = solution
            .routes
            .iter_mut()
            .find(|r| r.vehicle_id == route.vehicle_id)
            .ok_or_else(|| PlannerError::not_found("solution route for vehicle", &route.vehicle_id))?;

        let mut stops: Vec<Stop> = target.stops.iter().map(|s| s.stop.clone()).collect();
        stops.push(stop);
        target.stops = self.schedule(stops, target.start);
        solution.unassigned.retain(|s| s.order_id != order_id);

        let record = self
            .solutions
            .insert_solution(SolutionRecord::draft(&solution, Some(published.id))?)?;
        info!(
            %route_id,
            order_id,
            parent = %published.id,
            version = record.version,
            "Appended order as new draft version"
        );
        Ok(record)
    }

    pub fn lock_route(&self, route_id: Uuid) -> PlannerResult<PlannedRoute> {
        let route = self.modify_route(route_id, |route| {
            route.locked = true;
            Ok(())
        })?;
        info!(%route_id, "Route locked");
        Ok(route)
    }

    pub fn unlock_route(&self, route_id: Uuid) -> PlannerResult<PlannedRoute> {
        let route = self.modify_route(route_id, |route| {
            route.locked = false;
            Ok(())
        })?;
        info!(%route_id, "Route unlocked");
        Ok(route)
    }

    pub fn assign_driver(&self, route_id: Uuid, driver_id: &DriverId) -> PlannerResult<PlannedRoute> {
        let route = self.modify_route(route_id, |route| {
            route.driver_id = Some(driver_id.clone());
            Ok(())
        })?;
        info!(%route_id, driver_id = %driver_id, "Driver assigned to route");
        Ok(route)
    }

    /// Stores an empty draft version; earlier versions stay retrievable.
    pub fn reset_plan(&self) -> PlannerResult<SolutionRecord> {
        let parent = self.solutions.latest_published().map(|r| r.id);
        let record = self
            .solutions
            .insert_solution(SolutionRecord::draft(&Solution::default(), parent)?)?;
        info!(version = record.version, "Plan reset to an empty draft");
        Ok(record)
    }

    /// Creates one unlocked, empty route per active template.
    pub fn instantiate_standard_routes(
        &self,
        date: NaiveDate,
        templates: &[RouteTemplate],
    ) -> PlannerResult<Vec<PlannedRoute>> {
        let mut created = Vec::new();
        for template in templates {
            if !template.active {
                info!(template_id = %template.id, "Skipping inactive route template");
                continue;
            }
            let mut route = PlannedRoute::new(template.vehicle_id.clone(), date, template.start);
            route.driver_id = template.driver_id.clone();
            route.template_id = Some(template.id.clone());
            created.push(self.routes.insert_route(route)?);
        }
        info!(%date, routes = created.len(), "Instantiated standard routes");
        Ok(created)
    }

    fn schedule(&self, stops: Vec<Stop>, start: Location) -> Vec<ScheduledStop> {
        estimate_schedule(
            stops,
            start,
            self.config.shift_start_secs,
            self.config.service_minutes * 60,
            self.config.speed_kmh,
        )
    }

    /// Re-reads, edits and compare-and-swaps a route, retrying on conflict.
    fn modify_route(
        &self,
        route_id: Uuid,
        mut edit: impl FnMut(&mut PlannedRoute) -> PlannerResult<()>,
    ) -> PlannerResult<PlannedRoute> {
        let mut attempt = 1;
        loop {
            let mut route = self.routes.route(route_id)?;
            if let Some(successor) = route.superseded_by {
                return Err(PlannerError::InvalidState(format!(
                    "route {route_id} was superseded by route {successor}"
                )));
            }
            edit(&mut route)?;
            match self.routes.update_route(route) {
                Ok(saved) => return Ok(saved),
                Err(StoreError::VersionConflict { .. }) if attempt < MAX_WRITE_ATTEMPTS => {
                    warn!(%route_id, attempt, "Concurrent route update, retrying");
                    attempt += 1;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }
}
