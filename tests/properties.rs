//! Property-based tests for partitioning, scoring and search.
//!
//! # Invariants tested
//!
//! - **Partition completeness:** every order lands in exactly one region or
//!   in the unassignable list, and every vehicle in exactly one region.
//! - **Score dominance:** fewer hard violations always rank better.
//! - **Stop conservation:** search output holds each input stop exactly once.

mod fixtures;

use std::collections::HashMap;

use proptest::prelude::*;

use fleet_planner::config::{HubConfig, SolverConfig};
use fleet_planner::haversine::HaversineMatrix;
use fleet_planner::model::{Location, Order, Problem, Score, Stop, Vehicle};
use fleet_planner::partition::HubRegistry;
use fleet_planner::search::{CostModel, LocalSearch};

use fixtures::*;

fn location_strategy() -> impl Strategy<Value = Location> {
    (49.9..52.4_f64, 19.8..21.2_f64).prop_map(|(lat, lon)| Location::new(lat, lon))
}

fn orders_strategy(max: usize) -> impl Strategy<Value = Vec<Order>> {
    prop::collection::vec(prop::option::weighted(0.9, location_strategy()), 0..max).prop_map(|locations| {
        locations
            .into_iter()
            .enumerate()
            .map(|(i, loc)| Order::new(format!("o{i}"), loc).with_demand(5.0, 0.05))
            .collect()
    })
}

fn vehicles_strategy(max: usize) -> impl Strategy<Value = Vec<Vehicle>> {
    prop::collection::vec(prop::option::of(prop::sample::select(vec!["HUB_A", "HUB_B", "GONE"])), 0..max)
        .prop_map(|homes| {
            homes
                .into_iter()
                .enumerate()
                .map(|(i, home)| {
                    let vehicle = Vehicle::new(format!("v{i}"), WARSAW_HUB.location());
                    match home {
                        Some(hub) => vehicle.with_home_hub(hub),
                        None => vehicle,
                    }
                })
                .collect()
        })
}

fn registry(with_hubs: bool) -> HubRegistry {
    if !with_hubs {
        return HubRegistry::new(Vec::new());
    }
    let mut inactive = HubConfig::new("GONE", Location::new(51.1, 17.0), 30.0);
    inactive.active = false;
    HubRegistry::new(vec![
        HubConfig::new("HUB_A", WARSAW_HUB.location(), 30.0),
        HubConfig::new("HUB_B", KRAKOW_HUB.location(), 30.0),
        inactive,
    ])
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn partition_places_every_order_and_vehicle_once(
        orders in orders_strategy(40),
        vehicles in vehicles_strategy(8),
        with_hubs in any::<bool>(),
    ) {
        let assignment = registry(with_hubs).partition(&orders, &vehicles);

        let mut seen: HashMap<&str, usize> = HashMap::new();
        for region in assignment.regions.values() {
            for order in &region.orders {
                *seen.entry(order.id.as_str()).or_default() += 1;
            }
        }
        for id in &assignment.unassignable {
            *seen.entry(id.as_str()).or_default() += 1;
        }
        prop_assert_eq!(seen.len(), orders.len());
        prop_assert!(seen.values().all(|&n| n == 1));

        for order in &orders {
            let unassignable = assignment.unassignable.contains(&order.id);
            prop_assert_eq!(unassignable, order.delivery.is_none());
        }

        let vehicle_slots: usize = assignment.regions.values().map(|r| r.vehicles.len()).sum();
        prop_assert_eq!(vehicle_slots, vehicles.len());
        prop_assert!(!assignment.regions.contains_key("GONE"));
    }

    #[test]
    fn fewer_hard_violations_always_rank_better(
        hard in 0u32..50,
        extra in 1u32..50,
        soft_a in any::<i64>(),
        soft_b in any::<i64>(),
    ) {
        let better = Score::new(hard, soft_a);
        let worse = Score::new(hard + extra, soft_b);
        prop_assert!(better > worse);
        prop_assert_eq!(better.max(worse), better);
    }

    #[test]
    fn search_keeps_every_stop_exactly_once(
        locations in prop::collection::vec(location_strategy(), 1..12),
        vehicle_count in 1usize..4,
        capacity in 10.0..200.0_f64,
    ) {
        let stops: Vec<Stop> = locations
            .iter()
            .enumerate()
            .filter_map(|(i, loc)| Stop::from_order(&Order::new(format!("s{i}"), Some(*loc)).with_demand(20.0, 0.1)))
            .collect();
        let problem = Problem {
            depot: WARSAW_HUB.location(),
            vehicles: (0..vehicle_count)
                .map(|i| Vehicle::new(format!("v{i}"), WARSAW_HUB.location()).with_capacity(capacity, 10.0))
                .collect(),
            stops,
            fixed_routes: Vec::new(),
        };
        let config = SolverConfig::default();
        let matrix = HaversineMatrix::new(config.speed_kmh);
        let search = LocalSearch::new(&problem, &matrix, CostModel::from(&config), 200);

        let solution = search.run(&|| false, &mut |_| {});

        let mut ids: Vec<&str> = solution
            .routes
            .iter()
            .flat_map(|r| r.stops.iter().map(|s| s.stop.order_id.as_str()))
            .chain(solution.unassigned.iter().map(|s| s.order_id.as_str()))
            .collect();
        ids.sort_unstable();
        let mut expected: Vec<&str> = problem.stops.iter().map(|s| s.order_id.as_str()).collect();
        expected.sort_unstable();
        prop_assert_eq!(ids, expected);

        // Construction never inserts into overload, so the result stays feasible.
        prop_assert!(solution.score.is_feasible());
    }
}
