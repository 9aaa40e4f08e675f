//! Collaborator seams for the planning pipeline.
//!
//! These are intentionally minimal. Concrete deployments implement them over
//! their own order, fleet, notification and routing backends.

use crate::error::NotifyError;
use crate::gatekeeper::ReviewRequest;
use crate::model::{DriverId, Location, Order, OrderId, Vehicle};
use crate::problem::{Carrier, VehicleProfile};

/// Distance (meters) and travel time (seconds) between locations.
///
/// Both matrices are indexed by the order of the requested locations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TravelMatrix {
    pub distances_m: Vec<Vec<f64>>,
    pub durations_s: Vec<Vec<i32>>,
}

/// Provides a travel matrix for a set of locations.
pub trait DistanceMatrixProvider: Send + Sync {
    fn matrix_for(&self, locations: &[Location]) -> TravelMatrix;
}

/// Batch access to delivery orders.
pub trait OrderSource: Send + Sync {
    /// Orders with the given ids; unknown ids are silently absent.
    fn orders_by_ids(&self, ids: &[OrderId]) -> Vec<Order>;

    /// Orders still waiting for a route.
    fn pending_orders(&self) -> Vec<Order>;
}

/// Vehicle list plus the compliance data used to pre-filter it.
pub trait FleetSource: Send + Sync {
    fn vehicles(&self) -> Vec<Vehicle>;

    fn carriers(&self) -> Vec<Carrier> {
        Vec::new()
    }

    fn profiles(&self) -> Vec<VehicleProfile> {
        Vec::new()
    }
}

/// Outbound human-review channel. Fire-and-forget: no decision comes back.
pub trait ReviewChannel: Send + Sync {
    fn request_review(&self, request: &ReviewRequest) -> Result<(), NotifyError>;
}

/// Delivers a driver access link by email, push or equivalent.
pub trait DriverNotifier: Send + Sync {
    fn notify_driver(&self, driver_id: &DriverId, link: &str) -> Result<(), NotifyError>;
}

/// Receives per-stop driver assignments after publication.
pub trait OrderSystem: Send + Sync {
    fn assign_driver(&self, order_id: &OrderId, driver_id: &DriverId) -> Result<(), NotifyError>;
}
