//! Core routing data model: orders, vehicles, stops, problems and solutions.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::haversine::haversine_km;

pub type OrderId = String;
pub type VehicleId = String;
pub type DriverId = String;
pub type HubId = String;

/// A WGS84 coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub lat: f64,
    pub lon: f64,
}

impl Location {
    pub const fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// Great-circle distance in kilometers.
    pub fn distance_km(&self, other: &Location) -> f64 {
        haversine_km((self.lat, self.lon), (other.lat, other.lon))
    }
}

/// Load carried for an order or offered by a vehicle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Demand {
    pub weight: f64,
    pub volume: f64,
}

impl Demand {
    pub const fn new(weight: f64, volume: f64) -> Self {
        Self { weight, volume }
    }

    pub fn fits_within(&self, capacity: &Demand) -> bool {
        self.weight <= capacity.weight && self.volume <= capacity.volume
    }
}

impl std::ops::Add for Demand {
    type Output = Demand;

    fn add(self, rhs: Demand) -> Demand {
        Demand::new(self.weight + rhs.weight, self.volume + rhs.volume)
    }
}

/// Delivery window in seconds from midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: i32,
    pub end: i32,
}

impl TimeWindow {
    pub const fn new(start: i32, end: i32) -> Self {
        Self { start, end }
    }
}

/// A delivery order as delivered by the order source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    /// `None` when the address could not be geocoded.
    pub delivery: Option<Location>,
    pub demand: Demand,
    pub time_window: Option<TimeWindow>,
    /// Order value in minor currency units.
    pub value: i64,
}

impl Order {
    pub fn new(id: impl Into<OrderId>, delivery: Option<Location>) -> Self {
        Self {
            id: id.into(),
            delivery,
            demand: Demand::default(),
            time_window: None,
            value: 0,
        }
    }

    pub fn with_demand(mut self, weight: f64, volume: f64) -> Self {
        self.demand = Demand::new(weight, volume);
        self
    }

    pub fn with_time_window(mut self, start: i32, end: i32) -> Self {
        self.time_window = Some(TimeWindow::new(start, end));
        self
    }

    pub fn with_value(mut self, value: i64) -> Self {
        self.value = value;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vehicle {
    pub id: VehicleId,
    pub capacity: Demand,
    pub home: Location,
    pub available: bool,
    /// Hub the vehicle is stationed at, when the fleet store knows it.
    pub home_hub: Option<HubId>,
    pub driver_id: Option<DriverId>,
    pub carrier_id: Option<String>,
    pub profile_id: Option<String>,
}

impl Vehicle {
    pub fn new(id: impl Into<VehicleId>, home: Location) -> Self {
        Self {
            id: id.into(),
            capacity: Demand::new(1000.0, 15.0),
            home,
            available: true,
            home_hub: None,
            driver_id: None,
            carrier_id: None,
            profile_id: None,
        }
    }

    pub fn with_capacity(mut self, weight: f64, volume: f64) -> Self {
        self.capacity = Demand::new(weight, volume);
        self
    }

    pub fn with_driver(mut self, driver_id: impl Into<DriverId>) -> Self {
        self.driver_id = Some(driver_id.into());
        self
    }

    pub fn with_home_hub(mut self, hub_id: impl Into<HubId>) -> Self {
        self.home_hub = Some(hub_id.into());
        self
    }

    pub fn unavailable(mut self) -> Self {
        self.available = false;
        self
    }
}

/// A demand point derived from exactly one order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stop {
    pub order_id: OrderId,
    pub location: Location,
    pub demand: Demand,
    pub time_window: Option<TimeWindow>,
    pub value: i64,
    /// Set when a dispatcher added the stop outside of a solve.
    #[serde(default)]
    pub manual: bool,
}

impl Stop {
    /// Returns `None` for orders without delivery coordinates.
    pub fn from_order(order: &Order) -> Option<Self> {
        let location = order.delivery?;
        Some(Self {
            order_id: order.id.clone(),
            location,
            demand: order.demand,
            time_window: order.time_window,
            value: order.value,
            manual: false,
        })
    }

    /// The order this stop stands for, e.g. to re-partition a stop released
    /// from a locked route.
    pub fn to_order(&self) -> Order {
        Order {
            id: self.order_id.clone(),
            delivery: Some(self.location),
            demand: self.demand,
            time_window: self.time_window,
            value: self.value,
        }
    }
}

/// A route whose stop sequence is input to the solver rather than output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixedRoute {
    pub route_id: Uuid,
    pub vehicle_id: VehicleId,
    pub stops: Vec<Stop>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Problem {
    pub depot: Location,
    pub vehicles: Vec<Vehicle>,
    pub stops: Vec<Stop>,
    #[serde(default)]
    pub fixed_routes: Vec<FixedRoute>,
}

impl Problem {
    pub fn fixed_route_for(&self, vehicle_id: &str) -> Option<&FixedRoute> {
        self.fixed_routes.iter().find(|r| r.vehicle_id == vehicle_id)
    }
}

/// Lexicographic solution quality: hard violations dominate the soft value.
///
/// `Ord` ranks the better score as greater, so `max()` picks the best one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Score {
    pub hard: u32,
    pub soft: i64,
}

impl Score {
    pub const fn new(hard: u32, soft: i64) -> Self {
        Self { hard, soft }
    }

    pub const fn is_feasible(&self) -> bool {
        self.hard == 0
    }
}

impl Ord for Score {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .hard
            .cmp(&self.hard)
            .then_with(|| self.soft.cmp(&other.soft))
    }
}

impl PartialOrd for Score {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Score {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "-{}hard/{}soft", self.hard, self.soft)
    }
}

/// A stop placed on a route with its schedule estimate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledStop {
    pub stop: Stop,
    /// Arrival estimate in seconds from midnight.
    pub arrival: i32,
    pub departure: i32,
    pub distance_from_previous_m: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    pub vehicle_id: VehicleId,
    pub driver_id: Option<DriverId>,
    /// Where the vehicle starts and returns.
    pub start: Location,
    pub stops: Vec<ScheduledStop>,
    pub total_distance_m: f64,
    pub total_duration_secs: i64,
    #[serde(default)]
    pub locked: bool,
}

impl Route {
    pub fn order_ids(&self) -> Vec<&str> {
        self.stops.iter().map(|s| s.stop.order_id.as_str()).collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Solution {
    pub routes: Vec<Route>,
    pub unassigned: Vec<Stop>,
    pub score: Score,
    /// Soft-score revenue share, kept apart for reporting.
    #[serde(default)]
    pub revenue: i64,
    #[serde(default)]
    pub cost: i64,
}

impl Solution {
    pub fn unassigned_stops_count(&self) -> usize {
        self.unassigned.len()
    }

    pub fn assigned_stops_count(&self) -> usize {
        self.routes.iter().map(|r| r.stops.len()).sum()
    }

    /// Vehicles that actually carry stops.
    pub fn vehicle_count(&self) -> usize {
        self.routes.iter().filter(|r| !r.stops.is_empty()).count()
    }

    pub fn total_profit(&self) -> i64 {
        self.revenue - self.cost
    }

    pub fn route_for(&self, vehicle_id: &str) -> Option<&Route> {
        self.routes.iter().find(|r| r.vehicle_id == vehicle_id)
    }

    pub fn stats(&self) -> SolutionStats {
        SolutionStats {
            total_routes: self.vehicle_count(),
            total_stops: self.assigned_stops_count(),
            unassigned_count: self.unassigned_stops_count(),
            total_distance_m: self.routes.iter().map(|r| r.total_distance_m).sum(),
            total_duration_secs: self.routes.iter().map(|r| r.total_duration_secs).sum(),
        }
    }
}

/// Summary figures persisted next to a solution payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SolutionStats {
    pub total_routes: usize,
    pub total_stops: usize,
    pub unassigned_count: usize,
    pub total_distance_m: f64,
    pub total_duration_secs: i64,
}
