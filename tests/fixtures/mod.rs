//! Test fixtures for fleet-planner.
//!
//! Provides realistic test data including:
//! - Real Warsaw / Krakow locations (from OpenStreetMap)
//! - In-memory order and fleet sources
//! - Recording collaborators for notifications and order propagation
#![allow(dead_code)]

pub mod warsaw_locations;

pub use warsaw_locations::*;

use chrono::NaiveDate;
use parking_lot::Mutex;

use fleet_planner::config::{HubConfig, PlannerConfig};
use fleet_planner::error::NotifyError;
use fleet_planner::gatekeeper::ReviewRequest;
use fleet_planner::model::{DriverId, Order, OrderId, Vehicle};
use fleet_planner::problem::{Carrier, VehicleProfile};
use fleet_planner::traits::{DriverNotifier, FleetSource, OrderSource, OrderSystem, ReviewChannel};

// ============================================================================
// Builders
// ============================================================================

pub fn order_at(id: &str, place: &Place) -> Order {
    Order::new(id, Some(place.location()))
        .with_demand(10.0, 0.1)
        .with_value(5_000)
}

pub fn vehicle_at(id: &str, place: &Place) -> Vehicle {
    Vehicle::new(id, place.location())
}

pub fn date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 6, 3).unwrap()
}

/// Two hubs (Warsaw first), short solver budget.
pub fn two_hub_config() -> PlannerConfig {
    let mut config = PlannerConfig::default();
    config.regional_partitioning = true;
    config.hubs = vec![
        HubConfig::new("HUB_A", WARSAW_HUB.location(), 30.0),
        HubConfig::new("HUB_B", KRAKOW_HUB.location(), 30.0),
    ];
    config.solver.time_budget_ms = 2_000;
    config.solver.regional_threads = 2;
    config
}

// ============================================================================
// Sources
// ============================================================================

#[derive(Default)]
pub struct StaticFleet {
    pub vehicles: Vec<Vehicle>,
    pub carriers: Vec<Carrier>,
    pub profiles: Vec<VehicleProfile>,
}

impl StaticFleet {
    pub fn new(vehicles: Vec<Vehicle>) -> Self {
        Self {
            vehicles,
            ..Self::default()
        }
    }
}

impl FleetSource for StaticFleet {
    fn vehicles(&self) -> Vec<Vehicle> {
        self.vehicles.clone()
    }

    fn carriers(&self) -> Vec<Carrier> {
        self.carriers.clone()
    }

    fn profiles(&self) -> Vec<VehicleProfile> {
        self.profiles.clone()
    }
}

#[derive(Default)]
pub struct StaticOrders {
    orders: Mutex<Vec<Order>>,
}

impl StaticOrders {
    pub fn new(orders: Vec<Order>) -> Self {
        Self {
            orders: Mutex::new(orders),
        }
    }

    pub fn push(&self, order: Order) {
        self.orders.lock().push(order);
    }
}

impl OrderSource for StaticOrders {
    fn orders_by_ids(&self, ids: &[OrderId]) -> Vec<Order> {
        self.orders
            .lock()
            .iter()
            .filter(|o| ids.contains(&o.id))
            .cloned()
            .collect()
    }

    fn pending_orders(&self) -> Vec<Order> {
        self.orders.lock().clone()
    }
}

// ============================================================================
// Recording collaborators
// ============================================================================

#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<(DriverId, String)>>,
    pub fail: bool,
}

impl DriverNotifier for RecordingNotifier {
    fn notify_driver(&self, driver_id: &DriverId, link: &str) -> Result<(), NotifyError> {
        if self.fail {
            return Err(NotifyError::Rejected("mailbox unavailable".to_string()));
        }
        self.sent.lock().push((driver_id.clone(), link.to_string()));
        Ok(())
    }
}

/// Order system that rejects the listed orders.
#[derive(Default)]
pub struct RecordingOrderSystem {
    pub assigned: Mutex<Vec<(OrderId, DriverId)>>,
    pub reject: Vec<OrderId>,
}

impl OrderSystem for RecordingOrderSystem {
    fn assign_driver(&self, order_id: &OrderId, driver_id: &DriverId) -> Result<(), NotifyError> {
        if self.reject.contains(order_id) {
            return Err(NotifyError::Rejected(format!("order {order_id} locked")));
        }
        self.assigned.lock().push((order_id.clone(), driver_id.clone()));
        Ok(())
    }
}

/// Cloning shares the recorded requests.
#[derive(Default, Clone)]
pub struct RecordingReview {
    pub requests: std::sync::Arc<Mutex<Vec<ReviewRequest>>>,
}

impl ReviewChannel for RecordingReview {
    fn request_review(&self, request: &ReviewRequest) -> Result<(), NotifyError> {
        self.requests.lock().push(request.clone());
        Ok(())
    }
}
