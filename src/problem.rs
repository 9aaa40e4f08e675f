//! Problem assembly from fleet and order state.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::model::{Demand, FixedRoute, Location, Order, OrderId, Problem, Stop, Vehicle};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ComplianceStatus {
    Compliant,
    Pending,
    Suspended,
}

/// Subcontracted carrier owning some of the fleet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Carrier {
    pub id: String,
    pub status: ComplianceStatus,
    pub insured: bool,
}

/// Optimization profile a vehicle can be linked to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleProfile {
    pub id: String,
    pub capacity_override: Option<Demand>,
}

/// Compliance and profile pre-filter applied before the builder sees vehicles.
#[derive(Debug, Clone, Default)]
pub struct FleetFilter {
    carriers: HashMap<String, Carrier>,
    profiles: HashMap<String, VehicleProfile>,
}

impl FleetFilter {
    pub fn new(carriers: Vec<Carrier>, profiles: Vec<VehicleProfile>) -> Self {
        Self {
            carriers: carriers.into_iter().map(|c| (c.id.clone(), c)).collect(),
            profiles: profiles.into_iter().map(|p| (p.id.clone(), p)).collect(),
        }
    }

    /// Drops unavailable or non-compliant vehicles and applies capacity
    /// overrides inherited from linked profiles.
    pub fn apply(&self, vehicles: Vec<Vehicle>) -> Vec<Vehicle> {
        vehicles
            .into_iter()
            .filter_map(|vehicle| self.admit(vehicle))
            .collect()
    }

    fn admit(&self, mut vehicle: Vehicle) -> Option<Vehicle> {
        if !vehicle.available {
            debug!(vehicle_id = %vehicle.id, "Skipping unavailable vehicle");
            return None;
        }

        if let Some(carrier_id) = &vehicle.carrier_id {
            match self.carriers.get(carrier_id) {
                Some(c) if c.status == ComplianceStatus::Compliant && c.insured => {}
                Some(c) => {
                    warn!(
                        vehicle_id = %vehicle.id,
                        carrier_id = %carrier_id,
                        status = ?c.status,
                        insured = c.insured,
                        "Skipping vehicle of non-compliant carrier"
                    );
                    return None;
                }
                None => {
                    warn!(vehicle_id = %vehicle.id, carrier_id = %carrier_id, "Skipping vehicle of unknown carrier");
                    return None;
                }
            }
        }

        if let Some(capacity) = vehicle
            .profile_id
            .as_ref()
            .and_then(|id| self.profiles.get(id))
            .and_then(|p| p.capacity_override)
        {
            vehicle.capacity = capacity;
        }

        Some(vehicle)
    }
}

/// Result of building a problem: the instance plus orders left out of it.
#[derive(Debug, Clone, PartialEq)]
pub struct BuiltProblem {
    pub problem: Problem,
    /// Orders without coordinates; reported, never silently dropped.
    pub excluded_orders: Vec<OrderId>,
}

/// Locked routes a fleet can honour, and the stops of those it cannot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FixedRouteSplit {
    pub kept: Vec<FixedRoute>,
    /// Stops of dropped routes; they go back into the free pool.
    pub released: Vec<Stop>,
}

impl FixedRouteSplit {
    pub fn kept_orders(&self) -> HashSet<&str> {
        self.kept
            .iter()
            .flat_map(|r| r.stops.iter().map(|s| s.order_id.as_str()))
            .collect()
    }
}

/// Keeps at most one locked route per available vehicle, the first one given.
///
/// Routes whose vehicle is missing or unavailable, and later routes for a
/// vehicle that already has one, are dropped and their stops released.
pub fn split_fixed_routes(routes: &[FixedRoute], vehicles: &[Vehicle]) -> FixedRouteSplit {
    let vehicle_ids: HashSet<&str> = vehicles
        .iter()
        .filter(|v| v.available)
        .map(|v| v.id.as_str())
        .collect();

    let mut split = FixedRouteSplit::default();
    let mut claimed: HashSet<&str> = HashSet::new();
    let mut dropped = Vec::new();
    for route in routes {
        if !vehicle_ids.contains(route.vehicle_id.as_str()) {
            warn!(
                route_id = %route.route_id,
                vehicle_id = %route.vehicle_id,
                "Locked route vehicle not in fleet; releasing its stops"
            );
            dropped.push(route);
        } else if !claimed.insert(route.vehicle_id.as_str()) {
            warn!(
                route_id = %route.route_id,
                vehicle_id = %route.vehicle_id,
                "Vehicle already has a locked route; releasing stops of the older one"
            );
            dropped.push(route);
        } else {
            split.kept.push(route.clone());
        }
    }

    let kept_orders: HashSet<OrderId> = split
        .kept
        .iter()
        .flat_map(|r| r.stops.iter().map(|s| s.order_id.clone()))
        .collect();
    let mut released: HashSet<OrderId> = HashSet::new();
    for stop in dropped.into_iter().flat_map(|r| r.stops.iter()) {
        if !kept_orders.contains(&stop.order_id) && released.insert(stop.order_id.clone()) {
            split.released.push(stop.clone());
        }
    }
    split
}

/// Assembles a routing problem (depot, vehicles, stops) from current state.
#[derive(Debug, Clone)]
pub struct ProblemBuilder {
    depot: Location,
    fixed_routes: Vec<FixedRoute>,
}

impl ProblemBuilder {
    pub fn new(depot: Location) -> Self {
        Self {
            depot,
            fixed_routes: Vec::new(),
        }
    }

    /// Locked routes to carry into the problem unchanged, preferred first.
    pub fn with_fixed_routes(mut self, routes: Vec<FixedRoute>) -> Self {
        self.fixed_routes = routes;
        self
    }

    pub fn build(&self, orders: &[Order], vehicles: &[Vehicle]) -> BuiltProblem {
        let vehicles: Vec<Vehicle> = vehicles.iter().filter(|v| v.available).cloned().collect();
        let split = split_fixed_routes(&self.fixed_routes, &vehicles);
        let fixed_orders = split.kept_orders();

        let mut seen: HashSet<&str> = HashSet::new();
        let mut stops = Vec::with_capacity(orders.len() + split.released.len());
        let mut excluded_orders = Vec::new();
        for order in orders {
            if fixed_orders.contains(order.id.as_str()) {
                debug!(order_id = %order.id, "Order already on a locked route");
                continue;
            }
            if !seen.insert(order.id.as_str()) {
                warn!(order_id = %order.id, "Duplicate order ignored");
                continue;
            }
            match Stop::from_order(order) {
                Some(stop) => stops.push(stop),
                None => {
                    warn!(order_id = %order.id, "Order missing coordinates, excluded from problem");
                    excluded_orders.push(order.id.clone());
                }
            }
        }
        for stop in &split.released {
            if seen.insert(stop.order_id.as_str()) {
                debug!(order_id = %stop.order_id, "Released locked stop back into the pool");
                stops.push(stop.clone());
            }
        }

        info!(
            vehicles = vehicles.len(),
            stops = stops.len(),
            locked_routes = split.kept.len(),
            released = split.released.len(),
            excluded = excluded_orders.len(),
            "Built routing problem"
        );

        BuiltProblem {
            problem: Problem {
                depot: self.depot,
                vehicles,
                stops,
                fixed_routes: split.kept,
            },
            excluded_orders,
        }
    }
}
