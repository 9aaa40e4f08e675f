//! Standing-problem solve lifecycle: trigger, progress, persistence, publish.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use chrono::Utc;
use parking_lot::Mutex;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::engine::{SolveListener, SolvingEngine};
use crate::error::{EngineError, PlannerError, PlannerResult};
use crate::gatekeeper::{Gatekeeper, SafetyReport};
use crate::model::{FixedRoute, Location, Order, OrderId, Solution, Vehicle};
use crate::partition::RegionalOptimizer;
use crate::problem::{FleetFilter, ProblemBuilder, split_fixed_routes};
use crate::publication::PublicationService;
use crate::store::{RouteStore, SolutionRecord, SolutionStore};
use crate::traits::{FleetSource, OrderSource};

/// Immediate acknowledgement of a trigger; results arrive later.
#[derive(Debug, Clone, PartialEq)]
pub struct SolveAccepted {
    pub problem_id: Uuid,
    pub orders: usize,
    pub vehicles: usize,
    pub locked_routes: usize,
    pub excluded_orders: Vec<OrderId>,
}

/// What happened to the last finished solve.
#[derive(Debug, Clone, PartialEq)]
pub struct SolveOutcome {
    pub solution_id: Uuid,
    pub report: SafetyReport,
    pub feasible: bool,
    pub published: bool,
}

struct SchedulerState {
    problem_id: Uuid,
    busy: AtomicBool,
    depot: Location,
    engine: Arc<dyn SolvingEngine>,
    regional: Option<Arc<RegionalOptimizer>>,
    fleet: Arc<dyn FleetSource>,
    orders: Arc<dyn OrderSource>,
    routes: Arc<dyn RouteStore>,
    solutions: Arc<dyn SolutionStore>,
    gatekeeper: Gatekeeper,
    publication: Arc<PublicationService>,
    last_outcome: Mutex<Option<SolveOutcome>>,
}

pub struct AutoSchedulerBuilder {
    depot: Location,
    engine: Arc<dyn SolvingEngine>,
    regional: Option<Arc<RegionalOptimizer>>,
    fleet: Arc<dyn FleetSource>,
    orders: Arc<dyn OrderSource>,
    routes: Arc<dyn RouteStore>,
    solutions: Arc<dyn SolutionStore>,
    gatekeeper: Gatekeeper,
    publication: Arc<PublicationService>,
}

impl AutoSchedulerBuilder {
    /// Solve by hub instead of as one problem.
    pub fn regional(mut self, optimizer: Arc<RegionalOptimizer>) -> Self {
        self.regional = Some(optimizer);
        self
    }

    pub fn build(self) -> AutoScheduler {
        AutoScheduler {
            state: Arc::new(SchedulerState {
                problem_id: Uuid::new_v4(),
                busy: AtomicBool::new(false),
                depot: self.depot,
                engine: self.engine,
                regional: self.regional,
                fleet: self.fleet,
                orders: self.orders,
                routes: self.routes,
                solutions: self.solutions,
                gatekeeper: self.gatekeeper,
                publication: self.publication,
                last_outcome: Mutex::new(None),
            }),
        }
    }
}

/// Owns the single standing problem for the live planning horizon.
pub struct AutoScheduler {
    state: Arc<SchedulerState>,
}

impl AutoScheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn builder(
        depot: Location,
        engine: Arc<dyn SolvingEngine>,
        fleet: Arc<dyn FleetSource>,
        orders: Arc<dyn OrderSource>,
        routes: Arc<dyn RouteStore>,
        solutions: Arc<dyn SolutionStore>,
        gatekeeper: Gatekeeper,
        publication: Arc<PublicationService>,
    ) -> AutoSchedulerBuilder {
        AutoSchedulerBuilder {
            depot,
            engine,
            regional: None,
            fleet,
            orders,
            routes,
            solutions,
            gatekeeper,
            publication,
        }
    }

    pub fn problem_id(&self) -> Uuid {
        self.state.problem_id
    }

    pub fn is_busy(&self) -> bool {
        self.state.busy.load(Ordering::Acquire)
    }

    pub fn last_outcome(&self) -> Option<SolveOutcome> {
        self.state.last_outcome.lock().clone()
    }

    /// Polls until the running solve has been fully handled.
    pub fn wait_until_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.is_busy() {
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        true
    }

    /// Rebuilds the standing problem and starts solving it in the background.
    ///
    /// `order_ids` selects orders explicitly; `None` takes every pending
    /// order. Rejected while a previous solve is still being handled.
    pub fn trigger_optimization(&self, order_ids: Option<&[OrderId]>) -> PlannerResult<SolveAccepted> {
        let state = &self.state;
        if state
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!(problem_id = %state.problem_id, "Solve already running, trigger rejected");
            return Err(PlannerError::SolveInProgress);
        }

        let result = self.start(order_ids);
        if result.is_err() {
            state.busy.store(false, Ordering::Release);
        }
        result
    }

    fn start(&self, order_ids: Option<&[OrderId]>) -> PlannerResult<SolveAccepted> {
        let state = &self.state;
        let orders = match order_ids {
            Some(ids) => state.orders.orders_by_ids(ids),
            None => state.orders.pending_orders(),
        };
        let vehicles = FleetFilter::new(state.fleet.carriers(), state.fleet.profiles()).apply(state.fleet.vehicles());
        let fixed: Vec<FixedRoute> = state.routes.locked_routes().iter().map(|r| r.as_fixed_route()).collect();

        info!(
            problem_id = %state.problem_id,
            orders = orders.len(),
            vehicles = vehicles.len(),
            locked_routes = fixed.len(),
            "Optimization triggered"
        );

        if let Some(regional) = &state.regional {
            return self.start_regional(Arc::clone(regional), orders, vehicles, fixed);
        }

        let built = ProblemBuilder::new(state.depot)
            .with_fixed_routes(fixed)
            .build(&orders, &vehicles);

        let accepted = SolveAccepted {
            problem_id: state.problem_id,
            orders: built.problem.stops.len(),
            vehicles: built.problem.vehicles.len(),
            locked_routes: built.problem.fixed_routes.len(),
            excluded_orders: built.excluded_orders,
        };

        let listener = Arc::new(SchedulerListener {
            state: Arc::clone(&self.state),
        });
        state.engine.solve(state.problem_id, built.problem, listener)?;
        Ok(accepted)
    }

    fn start_regional(
        &self,
        optimizer: Arc<RegionalOptimizer>,
        orders: Vec<Order>,
        vehicles: Vec<Vehicle>,
        fixed: Vec<FixedRoute>,
    ) -> PlannerResult<SolveAccepted> {
        // Count the way the problem builder would for a single region.
        let split = split_fixed_routes(&fixed, &vehicles);
        let locked = split.kept_orders();
        let mut seen: HashSet<&str> = HashSet::new();
        let mut free_orders = 0;
        let mut excluded_orders = Vec::new();
        for order in orders.iter().filter(|o| !locked.contains(o.id.as_str())) {
            if !seen.insert(order.id.as_str()) {
                continue;
            }
            match order.delivery {
                Some(_) => free_orders += 1,
                None => excluded_orders.push(order.id.clone()),
            }
        }
        free_orders += split
            .released
            .iter()
            .filter(|s| seen.insert(s.order_id.as_str()))
            .count();

        let accepted = SolveAccepted {
            problem_id: self.state.problem_id,
            orders: free_orders,
            vehicles: vehicles.len(),
            locked_routes: split.kept.len(),
            excluded_orders,
        };

        let listener = SchedulerListener {
            state: Arc::clone(&self.state),
        };
        std::thread::Builder::new()
            .name("regional-solve".to_string())
            .spawn(move || {
                let result = optimizer.optimize(&orders, &vehicles, &fixed);
                for failed in result.failed_regions() {
                    warn!(
                        hub_id = %failed.hub_id,
                        error = failed.error_message.as_deref().unwrap_or("unknown"),
                        "Region produced no routes"
                    );
                }
                listener.on_finished(result.merged_solution());
            })
            .map_err(|e| EngineError::Worker(e.to_string()))?;

        Ok(accepted)
    }

    /// Requests early termination; the best plan found so far is still handled.
    pub fn stop_solver(&self) -> bool {
        let state = &self.state;
        let stopped = match &state.regional {
            Some(regional) => regional.terminate_all() > 0,
            None => state.engine.terminate(state.problem_id),
        };
        if !stopped {
            info!(problem_id = %state.problem_id, "Stop requested but nothing is solving");
        }
        stopped
    }
}

struct SchedulerListener {
    state: Arc<SchedulerState>,
}

impl SchedulerListener {
    fn finish(&self, solution: Solution) -> PlannerResult<SolveOutcome> {
        let state = &self.state;
        let previous = state.solutions.latest_published();
        let previous_solution = match &previous {
            Some(record) => match record.solution() {
                Ok(solution) => Some(solution),
                Err(err) => {
                    warn!(solution_id = %record.id, error = %err, "Published plan unreadable, comparing against nothing");
                    None
                }
            },
            None => None,
        };

        let record = SolutionRecord::draft(&solution, previous.as_ref().map(|r| r.id))?;
        let report = state
            .gatekeeper
            .check(record.id, &solution, previous_solution.as_ref());
        let record = state
            .solutions
            .insert_solution(record.with_safety_report(report.clone()))?;

        let feasible = solution.score.is_feasible();
        let mut outcome = SolveOutcome {
            solution_id: record.id,
            report,
            feasible,
            published: false,
        };

        if outcome.report.requires_approval {
            info!(solution_id = %record.id, "Plan held for approval");
        } else if !feasible {
            warn!(solution_id = %record.id, score = %solution.score, "Plan infeasible, not auto-publishing");
        } else {
            state
                .publication
                .publish(record.id, &HashMap::new(), Utc::now().date_naive())?;
            outcome.published = true;
        }

        Ok(outcome)
    }
}

impl SolveListener for SchedulerListener {
    fn on_improved(&self, solution: &Solution) {
        info!(
            problem_id = %self.state.problem_id,
            score = %solution.score,
            feasible = solution.score.is_feasible(),
            routes = solution.vehicle_count(),
            unassigned = solution.unassigned_stops_count(),
            "New best solution"
        );
    }

    fn on_finished(&self, solution: Solution) {
        match self.finish(solution) {
            Ok(outcome) => {
                info!(
                    solution_id = %outcome.solution_id,
                    published = outcome.published,
                    "Solve handled"
                );
                *self.state.last_outcome.lock() = Some(outcome);
            }
            Err(err) => error!(error = %err, "Failed to persist or publish solved plan"),
        }
        self.state.busy.store(false, Ordering::Release);
    }

    fn on_error(&self, error: EngineError) {
        error!(problem_id = %self.state.problem_id, error = %error, "Solver failed, nothing persisted");
        self.state.busy.store(false, Ordering::Release);
    }
}
