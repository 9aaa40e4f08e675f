//! Construction and local search behind the default solving engine.
//!
//! Cheapest feasible insertion builds a first plan, then 2-opt and relocate
//! moves improve it until no move helps, the stop predicate fires, or the
//! iteration cap is hit. Fixed (locked) routes are never touched.

use std::collections::HashMap;

use crate::config::SolverConfig;
use crate::model::{Demand, Location, Problem, Route, ScheduledStop, Score, Solution, Stop, Vehicle};
use crate::traits::{DistanceMatrixProvider, TravelMatrix};

/// Monetary weights and schedule constants used to score routes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CostModel {
    pub fuel_cost_per_km: i64,
    pub driver_cost_per_hour: i64,
    pub unassigned_penalty: i64,
    pub shift_start_secs: i32,
    pub service_secs: i32,
}

impl From<&SolverConfig> for CostModel {
    fn from(config: &SolverConfig) -> Self {
        Self {
            fuel_cost_per_km: config.fuel_cost_per_km,
            driver_cost_per_hour: config.driver_cost_per_hour,
            unassigned_penalty: config.unassigned_penalty,
            shift_start_secs: config.shift_start_secs,
            service_secs: config.service_minutes * 60,
        }
    }
}

impl CostModel {
    fn route_cost(&self, distance_m: f64, duration_secs: i64) -> i64 {
        let fuel = (distance_m / 1000.0 * self.fuel_cost_per_km as f64).round() as i64;
        let driver = duration_secs * self.driver_cost_per_hour / 3600;
        fuel + driver
    }
}

#[derive(Debug, Clone, Default)]
struct RouteEval {
    /// (arrival, departure, distance from previous) per stop.
    schedule: Vec<(i32, i32, f64)>,
    distance_m: f64,
    duration_secs: i64,
    hard: u32,
    cost: i64,
    revenue: i64,
}

impl RouteEval {
    fn objective(&self) -> (u32, i64) {
        (self.hard, self.cost)
    }
}

#[derive(Debug, Clone)]
struct RouteState<'a> {
    vehicle: &'a Vehicle,
    stops: Vec<&'a Stop>,
    fixed: bool,
    eval: RouteEval,
}

/// Single-run search over one problem.
pub struct LocalSearch<'a> {
    problem: &'a Problem,
    matrix: TravelMatrix,
    index: HashMap<String, usize>,
    costs: CostModel,
    iterations: usize,
}

impl<'a> LocalSearch<'a> {
    pub fn new(
        problem: &'a Problem,
        matrix_provider: &dyn DistanceMatrixProvider,
        costs: CostModel,
        iterations: usize,
    ) -> Self {
        let locations = collect_locations(problem);
        let index = location_index(&locations);
        let matrix = matrix_provider.matrix_for(&locations);
        Self {
            problem,
            matrix,
            index,
            costs,
            iterations,
        }
    }

    /// Runs construction then local search, reporting each improvement.
    ///
    /// Always returns the best plan found, feasible or not.
    pub fn run(&self, should_stop: &dyn Fn() -> bool, on_improved: &mut dyn FnMut(&Solution)) -> Solution {
        let mut routes = self.initial_routes();
        let mut unassigned: Vec<&'a Stop> = Vec::new();

        for stop in &self.problem.stops {
            match self.best_insertion(&routes, stop) {
                Some((route_ix, position, eval)) => {
                    let route = &mut routes[route_ix];
                    route.stops.insert(position, stop);
                    route.eval = eval;
                }
                None => unassigned.push(stop),
            }
        }

        let mut best = self.to_solution(&routes, &unassigned);
        on_improved(&best);

        for _ in 0..self.iterations {
            if should_stop() {
                break;
            }

            let mut improved = false;
            for route in routes.iter_mut().filter(|r| !r.fixed) {
                if self.two_opt_improve(route) {
                    improved = true;
                }
            }
            if self.relocate_improve(&mut routes, should_stop) {
                improved = true;
            }
            if self.insert_unassigned(&mut routes, &mut unassigned) {
                improved = true;
            }

            if !improved {
                break;
            }

            let candidate = self.to_solution(&routes, &unassigned);
            if candidate.score > best.score {
                best = candidate;
                on_improved(&best);
            }
        }

        best
    }

    fn initial_routes(&self) -> Vec<RouteState<'a>> {
        self.problem
            .vehicles
            .iter()
            .map(|vehicle| {
                let (stops, fixed) = match self.problem.fixed_route_for(&vehicle.id) {
                    Some(route) => (route.stops.iter().collect::<Vec<_>>(), true),
                    None => (Vec::new(), false),
                };
                let eval = self.evaluate(vehicle, &stops);
                RouteState {
                    vehicle,
                    stops,
                    fixed,
                    eval,
                }
            })
            .collect()
    }

    /// Cheapest insertion that adds no hard violation.
    fn best_insertion(&self, routes: &[RouteState<'a>], stop: &'a Stop) -> Option<(usize, usize, RouteEval)> {
        let mut best: Option<(usize, usize, RouteEval)> = None;
        let mut best_delta = i64::MAX;

        for (route_ix, route) in routes.iter().enumerate() {
            if route.fixed || !route.vehicle.available {
                continue;
            }
            for position in 0..=route.stops.len() {
                let mut candidate = route.stops.clone();
                candidate.insert(position, stop);
                let eval = self.evaluate(route.vehicle, &candidate);
                if eval.hard > route.eval.hard {
                    continue;
                }
                let delta = eval.cost - route.eval.cost;
                if delta < best_delta {
                    best_delta = delta;
                    best = Some((route_ix, position, eval));
                }
            }
        }

        best
    }

    fn evaluate(&self, vehicle: &Vehicle, stops: &[&Stop]) -> RouteEval {
        let mut eval = RouteEval::default();
        if stops.is_empty() {
            return eval;
        }

        let home = self.index[&location_key(vehicle.home)];
        let mut time = self.costs.shift_start_secs;
        let mut prev = home;
        let mut load = Demand::default();

        for stop in stops {
            let here = self.index[&location_key(stop.location)];
            let distance = self.matrix.distances_m[prev][here];
            let mut arrival = time + self.matrix.durations_s[prev][here];

            if let Some(window) = stop.time_window {
                if arrival < window.start {
                    arrival = window.start;
                }
                if arrival > window.end {
                    eval.hard += 1;
                }
            }

            let departure = arrival + self.costs.service_secs;
            eval.schedule.push((arrival, departure, distance));
            eval.distance_m += distance;
            eval.revenue += stop.value;
            load = load + stop.demand;
            time = departure;
            prev = here;
        }

        eval.distance_m += self.matrix.distances_m[prev][home];
        time += self.matrix.durations_s[prev][home];
        eval.duration_secs = i64::from(time - self.costs.shift_start_secs);

        if !load.fits_within(&vehicle.capacity) {
            eval.hard += 1;
        }
        if !vehicle.available {
            eval.hard += 1;
        }
        eval.cost = self.costs.route_cost(eval.distance_m, eval.duration_secs);
        eval
    }

    /// 2-opt: reverse a segment within a route.
    fn two_opt_improve(&self, route: &mut RouteState<'a>) -> bool {
        let n = route.stops.len();
        if n < 3 {
            return false;
        }

        for i in 0..n - 1 {
            for j in i + 2..n {
                let mut candidate = route.stops.clone();
                candidate[i + 1..=j].reverse();
                let eval = self.evaluate(route.vehicle, &candidate);
                if eval.objective() < route.eval.objective() {
                    route.stops = candidate;
                    route.eval = eval;
                    return true;
                }
            }
        }

        false
    }

    /// Relocate: move one stop to another position or another route.
    fn relocate_improve(&self, routes: &mut [RouteState<'a>], should_stop: &dyn Fn() -> bool) -> bool {
        for from in 0..routes.len() {
            if routes[from].fixed || should_stop() {
                continue;
            }

            for pos in 0..routes[from].stops.len() {
                let stop = routes[from].stops[pos];
                let mut from_candidate = routes[from].stops.clone();
                from_candidate.remove(pos);
                let from_eval = self.evaluate(routes[from].vehicle, &from_candidate);

                for to in 0..routes.len() {
                    if routes[to].fixed || !routes[to].vehicle.available {
                        continue;
                    }

                    if from == to {
                        for insert in 0..=from_candidate.len() {
                            if insert == pos {
                                continue;
                            }
                            let mut candidate = from_candidate.clone();
                            candidate.insert(insert, stop);
                            let eval = self.evaluate(routes[from].vehicle, &candidate);
                            if eval.objective() < routes[from].eval.objective() {
                                routes[from].stops = candidate;
                                routes[from].eval = eval;
                                return true;
                            }
                        }
                        continue;
                    }

                    let (before_hard, before_cost) = add(routes[from].eval.objective(), routes[to].eval.objective());
                    for insert in 0..=routes[to].stops.len() {
                        let mut to_candidate = routes[to].stops.clone();
                        to_candidate.insert(insert, stop);
                        let to_eval = self.evaluate(routes[to].vehicle, &to_candidate);
                        let (after_hard, after_cost) = add(from_eval.objective(), to_eval.objective());

                        if (after_hard, after_cost) < (before_hard, before_cost) {
                            routes[from].stops = from_candidate;
                            routes[from].eval = from_eval;
                            routes[to].stops = to_candidate;
                            routes[to].eval = to_eval;
                            return true;
                        }
                    }
                }
            }
        }

        false
    }

    /// Retry stops that had no feasible slot; earlier moves may have freed one.
    fn insert_unassigned(&self, routes: &mut [RouteState<'a>], unassigned: &mut Vec<&'a Stop>) -> bool {
        let mut improved = false;
        let mut remaining = Vec::with_capacity(unassigned.len());

        for stop in unassigned.drain(..) {
            match self.best_insertion(routes, stop) {
                Some((route_ix, position, eval)) => {
                    let route = &mut routes[route_ix];
                    route.stops.insert(position, stop);
                    route.eval = eval;
                    improved = true;
                }
                None => remaining.push(stop),
            }
        }

        *unassigned = remaining;
        improved
    }

    fn to_solution(&self, routes: &[RouteState<'a>], unassigned: &[&'a Stop]) -> Solution {
        let mut hard = 0;
        let mut revenue = 0;
        let mut cost = 0;

        let routes = routes
            .iter()
            .map(|route| {
                hard += route.eval.hard;
                revenue += route.eval.revenue;
                cost += route.eval.cost;
                Route {
                    vehicle_id: route.vehicle.id.clone(),
                    driver_id: route.vehicle.driver_id.clone(),
                    start: route.vehicle.home,
                    stops: route
                        .stops
                        .iter()
                        .zip(&route.eval.schedule)
                        .map(|(stop, &(arrival, departure, distance))| ScheduledStop {
                            stop: (*stop).clone(),
                            arrival,
                            departure,
                            distance_from_previous_m: distance,
                        })
                        .collect(),
                    total_distance_m: route.eval.distance_m,
                    total_duration_secs: route.eval.duration_secs,
                    locked: route.fixed,
                }
            })
            .collect();

        let penalty = unassigned.len() as i64 * self.costs.unassigned_penalty;
        Solution {
            routes,
            unassigned: unassigned.iter().map(|s| (*s).clone()).collect(),
            score: Score::new(hard, revenue - cost - penalty),
            revenue,
            cost,
        }
    }
}

fn add(a: (u32, i64), b: (u32, i64)) -> (u32, i64) {
    (a.0 + b.0, a.1 + b.1)
}

/// Nearest-neighbour resequencing of a single route from `start`.
///
/// A cheap local pass used for dispatcher edits; it never looks at other
/// routes.
pub fn resequence(stops: Vec<Stop>, start: Location) -> Vec<Stop> {
    let mut remaining = stops;
    let mut ordered = Vec::with_capacity(remaining.len());
    let mut current = start;

    while !remaining.is_empty() {
        let mut nearest = 0;
        let mut min_dist = f64::MAX;
        for (i, candidate) in remaining.iter().enumerate() {
            let dist = current.distance_km(&candidate.location);
            if dist < min_dist {
                min_dist = dist;
                nearest = i;
            }
        }
        let next = remaining.remove(nearest);
        current = next.location;
        ordered.push(next);
    }

    ordered
}

/// Straight-line schedule estimate for a fixed stop order.
pub fn estimate_schedule(
    stops: Vec<Stop>,
    start: Location,
    shift_start_secs: i32,
    service_secs: i32,
    speed_kmh: f64,
) -> Vec<ScheduledStop> {
    let mut time = shift_start_secs;
    let mut current = start;

    stops
        .into_iter()
        .map(|stop| {
            let km = current.distance_km(&stop.location);
            let mut arrival = time + (km / speed_kmh * 3600.0).round() as i32;
            if let Some(window) = stop.time_window {
                arrival = arrival.max(window.start);
            }
            let departure = arrival + service_secs;
            time = departure;
            current = stop.location;
            ScheduledStop {
                stop,
                arrival,
                departure,
                distance_from_previous_m: km * 1000.0,
            }
        })
        .collect()
}

fn collect_locations(problem: &Problem) -> Vec<Location> {
    let mut locations = vec![problem.depot];
    locations.extend(problem.vehicles.iter().map(|v| v.home));
    locations.extend(problem.stops.iter().map(|s| s.location));
    for route in &problem.fixed_routes {
        locations.extend(route.stops.iter().map(|s| s.location));
    }

    dedupe_locations(locations)
}

fn dedupe_locations(locations: Vec<Location>) -> Vec<Location> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    let mut unique = Vec::new();
    for location in locations {
        let key = location_key(location);
        if seen.contains_key(&key) {
            continue;
        }
        seen.insert(key, unique.len());
        unique.push(location);
    }
    unique
}

fn location_key(location: Location) -> String {
    format!("{:.6},{:.6}", location.lat, location.lon)
}

fn location_index(locations: &[Location]) -> HashMap<String, usize> {
    let mut index = HashMap::new();
    for (i, location) in locations.iter().enumerate() {
        index.insert(location_key(*location), i);
    }
    index
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::haversine::HaversineMatrix;
    use crate::model::{FixedRoute, Order};
    use uuid::Uuid;

    fn costs() -> CostModel {
        CostModel::from(&SolverConfig::default())
    }

    fn stop(id: &str, lat: f64, lon: f64) -> Stop {
        Stop::from_order(&Order::new(id, Some(Location::new(lat, lon))).with_value(1_000)).unwrap()
    }

    fn problem(stops: Vec<Stop>, vehicles: Vec<Vehicle>) -> Problem {
        Problem {
            depot: Location::new(52.0, 21.0),
            vehicles,
            stops,
            fixed_routes: Vec::new(),
        }
    }

    fn run(problem: &Problem) -> Solution {
        LocalSearch::new(problem, &HaversineMatrix::default(), costs(), 50).run(&|| false, &mut |_| {})
    }

    #[test]
    fn assigns_every_stop_when_capacity_allows() {
        let p = problem(
            vec![stop("a", 52.01, 21.0), stop("b", 52.02, 21.0), stop("c", 52.03, 21.0)],
            vec![Vehicle::new("v1", Location::new(52.0, 21.0))],
        );
        let solution = run(&p);
        assert_eq!(solution.assigned_stops_count(), 3);
        assert_eq!(solution.unassigned_stops_count(), 0);
        assert!(solution.score.is_feasible());
    }

    #[test]
    fn each_stop_appears_at_most_once() {
        let p = problem(
            (0..8).map(|i| stop(&format!("s{i}"), 52.0 + i as f64 * 0.01, 21.0 + (i % 3) as f64 * 0.01)).collect(),
            vec![
                Vehicle::new("v1", Location::new(52.0, 21.0)),
                Vehicle::new("v2", Location::new(52.05, 21.05)),
            ],
        );
        let solution = run(&p);
        let mut ids: Vec<&str> = solution.routes.iter().flat_map(|r| r.order_ids()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 8);
    }

    #[test]
    fn over_capacity_stops_stay_unassigned() {
        let heavy = Stop::from_order(
            &Order::new("heavy", Some(Location::new(52.01, 21.0))).with_demand(5_000.0, 1.0),
        )
        .unwrap();
        let p = problem(vec![heavy], vec![Vehicle::new("v1", Location::new(52.0, 21.0))]);
        let solution = run(&p);
        assert_eq!(solution.unassigned_stops_count(), 1);
        assert!(solution.score.soft < 0);
    }

    #[test]
    fn overloaded_locked_route_is_returned_infeasible() {
        let mut heavy = stop("heavy", 52.01, 21.0);
        heavy.demand = Demand::new(5_000.0, 1.0);
        let mut p = problem(Vec::new(), vec![Vehicle::new("v1", Location::new(52.0, 21.0))]);
        p.fixed_routes.push(FixedRoute {
            route_id: Uuid::new_v4(),
            vehicle_id: "v1".to_string(),
            stops: vec![heavy],
        });
        let solution = run(&p);
        assert_eq!(solution.score.hard, 1);
        assert!(solution.routes[0].locked);
    }

    #[test]
    fn stop_predicate_still_yields_constructed_plan() {
        let p = problem(vec![stop("a", 52.01, 21.0)], vec![Vehicle::new("v1", Location::new(52.0, 21.0))]);
        let mut emitted = 0;
        let solution = LocalSearch::new(&p, &HaversineMatrix::default(), costs(), 50).run(&|| true, &mut |_| emitted += 1);
        assert_eq!(emitted, 1);
        assert_eq!(solution.assigned_stops_count(), 1);
    }

    #[test]
    fn late_arrival_counts_as_hard_violation_in_evaluation() {
        let mut late = stop("late", 52.5, 21.0);
        late.time_window = Some(crate::model::TimeWindow::new(0, 60));
        let p = problem(vec![late], vec![Vehicle::new("v1", Location::new(52.0, 21.0))]);
        let solution = run(&p);
        // No feasible slot exists, so the stop is reported instead of violating.
        assert_eq!(solution.unassigned_stops_count(), 1);
        assert!(solution.score.is_feasible());
    }

    #[test]
    fn estimate_schedule_waits_for_window_start() {
        let mut early = stop("early", 52.0, 21.0);
        early.time_window = Some(crate::model::TimeWindow::new(9 * 3600, 10 * 3600));
        let scheduled = estimate_schedule(vec![early], Location::new(52.0, 21.0), 8 * 3600, 300, 40.0);
        assert_eq!(scheduled[0].arrival, 9 * 3600);
        assert_eq!(scheduled[0].departure, 9 * 3600 + 300);
    }

    #[test]
    fn resequence_visits_nearest_first() {
        let stops = vec![stop("far", 52.3, 21.0), stop("near", 52.01, 21.0), stop("mid", 52.1, 21.0)];
        let ordered = resequence(stops, Location::new(52.0, 21.0));
        let ids: Vec<&str> = ordered.iter().map(|s| s.order_id.as_str()).collect();
        assert_eq!(ids, vec!["near", "mid", "far"]);
    }
}
