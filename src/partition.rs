//! Hub-based regional partitioning and parallel regional solving.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{HubConfig, SolverConfig};
use crate::engine::{SolvingEngine, solve_blocking};
use crate::error::EngineError;
use crate::model::{FixedRoute, HubId, Location, Order, OrderId, Route, Score, Solution, Stop, Vehicle};
use crate::problem::{ProblemBuilder, split_fixed_routes};

/// Region used when no hub is active.
pub const DEFAULT_REGION: &str = "DEFAULT";

/// Label under which orders without coordinates are reported.
pub const UNASSIGNED_BUCKET: &str = "UNASSIGNED";

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HubStatistics {
    pub total_hubs: usize,
    pub active_hubs: usize,
    pub total_vehicle_capacity: u32,
}

/// Configured hubs, in configuration order.
#[derive(Debug, Clone, Default)]
pub struct HubRegistry {
    hubs: Vec<HubConfig>,
}

impl HubRegistry {
    pub fn new(hubs: Vec<HubConfig>) -> Self {
        Self { hubs }
    }

    /// Hubs that take part in partitioning: active with a positive radius.
    pub fn active_hubs(&self) -> impl Iterator<Item = &HubConfig> {
        self.hubs
            .iter()
            .filter(|h| h.active && h.catchment_radius_km > 0.0)
    }

    pub fn hub_by_id(&self, id: &str) -> Option<&HubConfig> {
        self.hubs.iter().find(|h| h.id == id)
    }

    pub fn nearest_hub(&self, location: Location) -> Option<&HubConfig> {
        self.active_hubs().min_by(|a, b| {
            location
                .distance_km(&a.location)
                .total_cmp(&location.distance_km(&b.location))
        })
    }

    /// First hub whose catchment contains `location`, else the nearest one.
    pub fn hub_for_location(&self, location: Location) -> Option<&HubConfig> {
        self.active_hubs()
            .find(|h| location.distance_km(&h.location) <= h.catchment_radius_km)
            .or_else(|| self.nearest_hub(location))
    }

    pub fn statistics(&self) -> HubStatistics {
        HubStatistics {
            total_hubs: self.hubs.len(),
            active_hubs: self.active_hubs().count(),
            total_vehicle_capacity: self.active_hubs().map(|h| h.max_vehicles).sum(),
        }
    }

    /// Splits orders and vehicles by hub.
    ///
    /// Orders resolve by catchment then nearest hub. Vehicles follow their
    /// home hub; without one (or with an inactive one) they are dealt
    /// round-robin over the active hubs.
    pub fn partition(&self, orders: &[Order], vehicles: &[Vehicle]) -> RegionalAssignment {
        let active: Vec<&HubConfig> = self.active_hubs().collect();
        let mut assignment = RegionalAssignment::default();

        if active.is_empty() {
            warn!("No active hubs configured; solving everything as one region");
            let region = assignment
                .regions
                .entry(DEFAULT_REGION.to_string())
                .or_default();
            for order in orders {
                if order.delivery.is_some() {
                    region.orders.push(order.clone());
                } else {
                    assignment.unassignable.push(order.id.clone());
                }
            }
            region.vehicles = vehicles.to_vec();
            log_assignment(&assignment);
            return assignment;
        }

        for hub in &active {
            assignment.regions.insert(hub.id.clone(), Region::default());
        }

        for order in orders {
            let hub = order.delivery.and_then(|loc| self.hub_for_location(loc));
            match hub {
                Some(hub) => {
                    if let Some(region) = assignment.regions.get_mut(&hub.id) {
                        region.orders.push(order.clone());
                    }
                }
                None => {
                    debug!(order_id = %order.id, "Order has no coordinates, not partitioned");
                    assignment.unassignable.push(order.id.clone());
                }
            }
        }

        let mut next = 0;
        for vehicle in vehicles {
            let home = vehicle
                .home_hub
                .as_ref()
                .filter(|id| assignment.regions.contains_key(id.as_str()));

            let hub_id = match home {
                Some(id) => id.clone(),
                None => {
                    if let Some(id) = &vehicle.home_hub {
                        warn!(vehicle_id = %vehicle.id, hub_id = %id, "Home hub inactive, falling back to round-robin");
                    }
                    let id = active[next % active.len()].id.clone();
                    next += 1;
                    id
                }
            };

            assignment
                .regions
                .entry(hub_id)
                .or_default()
                .vehicles
                .push(vehicle.clone());
        }

        log_assignment(&assignment);
        assignment
    }
}

fn log_assignment(assignment: &RegionalAssignment) {
    for (hub_id, region) in &assignment.regions {
        debug!(
            hub_id = %hub_id,
            orders = region.orders.len(),
            vehicles = region.vehicles.len(),
            "Region"
        );
    }
    info!(
        regions = assignment.regions.len(),
        bucket = UNASSIGNED_BUCKET,
        unassignable = assignment.unassignable.len(),
        "Partitioned orders by hub"
    );
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Region {
    pub orders: Vec<Order>,
    pub vehicles: Vec<Vehicle>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegionalAssignment {
    pub regions: BTreeMap<HubId, Region>,
    /// Orders without coordinates.
    pub unassignable: Vec<OrderId>,
}

impl RegionalAssignment {
    pub fn region(&self, hub_id: &str) -> Option<&Region> {
        self.regions.get(hub_id)
    }

    pub fn order_count(&self) -> usize {
        self.regions.values().map(|r| r.orders.len()).sum()
    }
}

/// Outcome of one hub's solve.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionalSolution {
    pub hub_id: HubId,
    pub routes: Vec<Route>,
    pub unassigned: Vec<Stop>,
    pub score: Option<Score>,
    pub revenue: i64,
    pub cost: i64,
    pub orders_assigned: usize,
    pub duration: Duration,
    pub success: bool,
    pub error_message: Option<String>,
}

impl RegionalSolution {
    fn solved(hub_id: &str, solution: Solution, duration: Duration) -> Self {
        Self {
            hub_id: hub_id.to_string(),
            orders_assigned: solution.assigned_stops_count(),
            score: Some(solution.score),
            revenue: solution.revenue,
            cost: solution.cost,
            routes: solution.routes,
            unassigned: solution.unassigned,
            duration,
            success: true,
            error_message: None,
        }
    }

    fn failed(hub_id: &str, orders: &[Order], message: String, duration: Duration) -> Self {
        Self {
            hub_id: hub_id.to_string(),
            routes: Vec::new(),
            unassigned: orders.iter().filter_map(Stop::from_order).collect(),
            score: None,
            revenue: 0,
            cost: 0,
            orders_assigned: 0,
            duration,
            success: false,
            error_message: Some(message),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RegionalOptimizationResult {
    pub regions: Vec<RegionalSolution>,
    pub total_routes_created: usize,
    pub total_orders_assigned: usize,
    pub duration: Duration,
    /// Orders excluded for missing coordinates.
    pub excluded_orders: Vec<OrderId>,
    unassigned_penalty: i64,
}

impl RegionalOptimizationResult {
    pub fn region(&self, hub_id: &str) -> Option<&RegionalSolution> {
        self.regions.iter().find(|r| r.hub_id == hub_id)
    }

    pub fn failed_regions(&self) -> impl Iterator<Item = &RegionalSolution> {
        self.regions.iter().filter(|r| !r.success)
    }

    /// Merges all regional plans into one solution.
    ///
    /// Stops of failed regions are reported unassigned and penalized.
    pub fn merged_solution(&self) -> Solution {
        let mut merged = Solution::default();
        let mut hard = 0;
        let mut soft = 0;

        for region in &self.regions {
            merged.routes.extend(region.routes.iter().cloned());
            merged.unassigned.extend(region.unassigned.iter().cloned());
            merged.revenue += region.revenue;
            merged.cost += region.cost;
            match region.score {
                Some(score) => {
                    hard += score.hard;
                    soft += score.soft;
                }
                None => soft -= region.unassigned.len() as i64 * self.unassigned_penalty,
            }
        }

        merged.score = Score::new(hard, soft);
        merged
    }
}

/// Solves each hub's sub-problem on a bounded worker pool.
pub struct RegionalOptimizer {
    registry: HubRegistry,
    engine: Arc<dyn SolvingEngine>,
    pool: rayon::ThreadPool,
    unassigned_penalty: i64,
    active: Mutex<HashSet<Uuid>>,
}

impl RegionalOptimizer {
    pub fn new(
        registry: HubRegistry,
        engine: Arc<dyn SolvingEngine>,
        config: &SolverConfig,
    ) -> Result<Self, EngineError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.regional_threads.max(1))
            .thread_name(|i| format!("region-{i}"))
            .build()
            .map_err(|e| EngineError::Worker(e.to_string()))?;

        Ok(Self {
            registry,
            engine,
            pool,
            unassigned_penalty: config.unassigned_penalty,
            active: Mutex::new(HashSet::new()),
        })
    }

    pub fn registry(&self) -> &HubRegistry {
        &self.registry
    }

    /// Asks every running regional solve to stop; returns how many were asked.
    pub fn terminate_all(&self) -> usize {
        let ids: Vec<Uuid> = self.active.lock().iter().copied().collect();
        ids.into_iter().filter(|id| self.engine.terminate(*id)).count()
    }

    /// Partitions, solves every region with orders, and waits for all of them.
    ///
    /// Locked routes stay in the region of their vehicle; their orders are
    /// never partitioned as free orders. Locked routes the fleet cannot
    /// honour release their stops into the partition.
    pub fn optimize(
        &self,
        orders: &[Order],
        vehicles: &[Vehicle],
        fixed_routes: &[FixedRoute],
    ) -> RegionalOptimizationResult {
        let started = Instant::now();

        let split = split_fixed_routes(fixed_routes, vehicles);
        let fixed_routes = split.kept.as_slice();
        let locked = split.kept_orders();
        let mut free: Vec<Order> = orders
            .iter()
            .filter(|o| !locked.contains(o.id.as_str()))
            .cloned()
            .collect();
        let mut known: HashSet<&str> = orders.iter().map(|o| o.id.as_str()).collect();
        for stop in &split.released {
            if known.insert(stop.order_id.as_str()) {
                free.push(stop.to_order());
            }
        }

        let assignment = self.registry.partition(&free, vehicles);

        let jobs: Vec<(HubId, Region)> = assignment
            .regions
            .into_iter()
            .filter(|(hub_id, region)| {
                let has_locked = region
                    .vehicles
                    .iter()
                    .any(|v| fixed_routes.iter().any(|r| r.vehicle_id == v.id));
                if region.orders.is_empty() && !has_locked {
                    debug!(hub_id = %hub_id, "No orders for hub, skipping");
                    return false;
                }
                true
            })
            .collect();

        let regions: Vec<RegionalSolution> = self.pool.install(|| {
            jobs.par_iter()
                .map(|(hub_id, region)| self.solve_region(hub_id, region, fixed_routes))
                .collect()
        });

        let result = RegionalOptimizationResult {
            total_routes_created: regions
                .iter()
                .map(|r| r.routes.iter().filter(|route| !route.stops.is_empty()).count())
                .sum(),
            total_orders_assigned: regions.iter().map(|r| r.orders_assigned).sum(),
            duration: started.elapsed(),
            excluded_orders: assignment.unassignable,
            regions,
            unassigned_penalty: self.unassigned_penalty,
        };

        info!(
            regions = result.regions.len(),
            failed = result.failed_regions().count(),
            routes = result.total_routes_created,
            orders = result.total_orders_assigned,
            excluded = result.excluded_orders.len(),
            elapsed_ms = result.duration.as_millis() as u64,
            "Regional optimization finished"
        );

        result
    }

    fn solve_region(&self, hub_id: &str, region: &Region, fixed_routes: &[FixedRoute]) -> RegionalSolution {
        let started = Instant::now();

        if region.vehicles.is_empty() {
            error!(hub_id = %hub_id, orders = region.orders.len(), "Hub has orders but no vehicles; excluded from solving");
            return RegionalSolution::failed(
                hub_id,
                &region.orders,
                format!("no vehicles available for hub {hub_id}"),
                started.elapsed(),
            );
        }

        let depot = self
            .registry
            .hub_by_id(hub_id)
            .map(|h| h.location)
            .unwrap_or(region.vehicles[0].home);

        let local_fixed: Vec<FixedRoute> = fixed_routes
            .iter()
            .filter(|r| region.vehicles.iter().any(|v| v.id == r.vehicle_id))
            .cloned()
            .collect();

        let built = ProblemBuilder::new(depot)
            .with_fixed_routes(local_fixed)
            .build(&region.orders, &region.vehicles);

        let problem_id = Uuid::new_v4();
        self.active.lock().insert(problem_id);
        let outcome = solve_blocking(self.engine.as_ref(), problem_id, built.problem);
        self.active.lock().remove(&problem_id);

        match outcome {
            Ok(solution) => {
                info!(
                    hub_id = %hub_id,
                    score = %solution.score,
                    routes = solution.vehicle_count(),
                    unassigned = solution.unassigned_stops_count(),
                    "Region solved"
                );
                RegionalSolution::solved(hub_id, solution, started.elapsed())
            }
            Err(err) => {
                error!(hub_id = %hub_id, error = %err, "Region solve failed");
                RegionalSolution::failed(hub_id, &region.orders, err.to_string(), started.elapsed())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn hub(id: &str, lat: f64, lon: f64, radius: f64) -> HubConfig {
        HubConfig::new(id, Location::new(lat, lon), radius)
    }

    fn registry() -> HubRegistry {
        HubRegistry::new(vec![
            hub("WAW", 52.23, 21.01, 30.0),
            hub("KRK", 50.06, 19.94, 30.0),
        ])
    }

    #[rstest]
    #[case(Location::new(52.25, 21.05), "WAW")]
    #[case(Location::new(50.05, 19.90), "KRK")]
    // Outside every catchment: nearest wins.
    #[case(Location::new(51.0, 20.5), "KRK")]
    #[case(Location::new(53.5, 21.0), "WAW")]
    fn resolves_hub_by_catchment_then_nearest(#[case] location: Location, #[case] expected: &str) {
        assert_eq!(registry().hub_for_location(location).unwrap().id, expected);
    }

    #[test]
    fn first_matching_catchment_in_config_order_wins() {
        let registry = HubRegistry::new(vec![
            hub("BIG", 52.0, 21.0, 100.0),
            hub("NEAR", 52.23, 21.01, 10.0),
        ]);
        assert_eq!(registry.hub_for_location(Location::new(52.23, 21.01)).unwrap().id, "BIG");
    }

    #[test]
    fn inactive_and_zero_radius_hubs_are_ignored() {
        let mut off = hub("OFF", 52.23, 21.01, 30.0);
        off.active = false;
        let registry = HubRegistry::new(vec![off, hub("ZERO", 52.23, 21.01, 0.0), hub("ON", 50.0, 20.0, 5.0)]);

        assert_eq!(registry.hub_for_location(Location::new(52.23, 21.01)).unwrap().id, "ON");
        let stats = registry.statistics();
        assert_eq!(stats.total_hubs, 3);
        assert_eq!(stats.active_hubs, 1);
        assert_eq!(stats.total_vehicle_capacity, 16);
    }

    #[test]
    fn vehicles_follow_home_hub_else_round_robin() {
        let vehicles = vec![
            Vehicle::new("v1", Location::new(50.0, 20.0)).with_home_hub("KRK"),
            Vehicle::new("v2", Location::new(52.0, 21.0)),
            Vehicle::new("v3", Location::new(52.0, 21.0)),
            Vehicle::new("v4", Location::new(52.0, 21.0)).with_home_hub("GONE"),
        ];
        let assignment = registry().partition(&[], &vehicles);

        let ids = |hub: &str| -> Vec<String> {
            assignment.region(hub).unwrap().vehicles.iter().map(|v| v.id.clone()).collect()
        };
        assert_eq!(ids("KRK"), vec!["v1", "v3"]);
        assert_eq!(ids("WAW"), vec!["v2", "v4"]);
    }

    #[test]
    fn no_active_hubs_uses_default_region() {
        let orders = vec![
            Order::new("o1", Some(Location::new(52.2, 21.0))),
            Order::new("o2", None),
        ];
        let assignment = HubRegistry::default().partition(&orders, &[Vehicle::new("v1", Location::new(52.0, 21.0))]);

        let region = assignment.region(DEFAULT_REGION).unwrap();
        assert_eq!(region.orders.len(), 1);
        assert_eq!(region.vehicles.len(), 1);
        assert_eq!(assignment.unassignable, vec!["o2".to_string()]);
    }
}
