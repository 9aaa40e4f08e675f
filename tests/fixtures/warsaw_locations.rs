//! Real Warsaw / Krakow locations for realistic test fixtures.
//!
//! Coordinates sourced from OpenStreetMap.

/// A named location with coordinates.
#[derive(Debug, Clone)]
pub struct Place {
    pub name: &'static str,
    pub lat: f64,
    pub lon: f64,
}

impl Place {
    pub const fn new(name: &'static str, lat: f64, lon: f64) -> Self {
        Self { name, lat, lon }
    }

    pub fn location(&self) -> fleet_planner::model::Location {
        fleet_planner::model::Location::new(self.lat, self.lon)
    }
}

// ============================================================================
// Hubs
// ============================================================================

pub const WARSAW_HUB: Place = Place::new("Warsaw Central Hub", 52.2297, 21.0122);
pub const KRAKOW_HUB: Place = Place::new("Krakow Hub", 50.0647, 19.9450);

// ============================================================================
// Warsaw delivery points
// ============================================================================

pub const WARSAW_STOPS: &[Place] = &[
    Place::new("Palace of Culture and Science", 52.2319, 21.0067),
    Place::new("Old Town Market Square", 52.2497, 21.0122),
    Place::new("Lazienki Park", 52.2152, 21.0353),
    Place::new("Warsaw Uprising Museum", 52.2324, 20.9810),
    Place::new("Copernicus Science Centre", 52.2419, 21.0287),
    Place::new("National Stadium", 52.2394, 21.0458),
    Place::new("Wilanow Palace", 52.1651, 21.0904),
    Place::new("Praga Koneser", 52.2547, 21.0446),
];

// ============================================================================
// Krakow delivery points
// ============================================================================

pub const KRAKOW_STOPS: &[Place] = &[
    Place::new("Main Market Square", 50.0617, 19.9373),
    Place::new("Wawel Castle", 50.0540, 19.9354),
    Place::new("Kazimierz", 50.0515, 19.9449),
    Place::new("Nowa Huta Central Square", 50.0718, 20.0379),
];
