//! fleet-planner
//!
//! Continuous route planning for a delivery fleet: problem assembly,
//! regional parallel solving, a publication safety gate, dispatcher edits
//! and driver manifests.

pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod gatekeeper;
pub mod haversine;
pub mod logging;
pub mod manifest;
pub mod model;
pub mod partition;
pub mod planner;
pub mod problem;
pub mod publication;
pub mod scheduler;
pub mod search;
pub mod store;
pub mod token;
pub mod traits;

pub use config::PlannerConfig;
pub use error::{PlannerError, PlannerResult};
pub use planner::{Collaborators, Planner};
