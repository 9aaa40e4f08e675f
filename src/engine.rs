//! Anytime solving engine contract and the default local-search engine.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, mpsc};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::SolverConfig;
use crate::error::EngineError;
use crate::model::{Problem, Solution};
use crate::search::{CostModel, LocalSearch};
use crate::traits::DistanceMatrixProvider;

/// Receives the progress of one solve.
///
/// `on_improved` fires for each better plan in time order. Exactly one of
/// `on_finished` (best plan, feasible or not) or `on_error` ends the run.
pub trait SolveListener: Send + Sync {
    fn on_improved(&self, solution: &Solution);
    fn on_finished(&self, solution: Solution);
    fn on_error(&self, error: EngineError);
}

/// Black-box anytime solver keyed by problem identity.
pub trait SolvingEngine: Send + Sync {
    /// Starts solving in the background and returns immediately.
    fn solve(
        &self,
        problem_id: Uuid,
        problem: Problem,
        listener: Arc<dyn SolveListener>,
    ) -> Result<(), EngineError>;

    /// Requests early termination; the best plan so far is still delivered.
    /// Returns false when nothing is running under that id.
    fn terminate(&self, problem_id: Uuid) -> bool;

    fn is_solving(&self, problem_id: Uuid) -> bool;
}

/// Runs [`LocalSearch`] on a dedicated thread per problem.
pub struct LocalSearchEngine {
    matrix: Arc<dyn DistanceMatrixProvider>,
    costs: CostModel,
    iterations: usize,
    time_budget: Duration,
    jobs: Arc<Mutex<HashMap<Uuid, Arc<AtomicBool>>>>,
}

impl LocalSearchEngine {
    pub fn new(matrix: Arc<dyn DistanceMatrixProvider>, config: &SolverConfig) -> Self {
        Self {
            matrix,
            costs: CostModel::from(config),
            iterations: config.local_search_iterations,
            time_budget: config.time_budget(),
            jobs: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn with_time_budget(mut self, budget: Duration) -> Self {
        self.time_budget = budget;
        self
    }
}

impl SolvingEngine for LocalSearchEngine {
    fn solve(
        &self,
        problem_id: Uuid,
        problem: Problem,
        listener: Arc<dyn SolveListener>,
    ) -> Result<(), EngineError> {
        let stop = Arc::new(AtomicBool::new(false));
        {
            let mut jobs = self.jobs.lock();
            if jobs.contains_key(&problem_id) {
                return Err(EngineError::AlreadySolving(problem_id.to_string()));
            }
            jobs.insert(problem_id, Arc::clone(&stop));
        }

        let matrix = Arc::clone(&self.matrix);
        let jobs = Arc::clone(&self.jobs);
        let costs = self.costs;
        let iterations = self.iterations;
        let deadline = Instant::now() + self.time_budget;

        debug!(
            %problem_id,
            vehicles = problem.vehicles.len(),
            stops = problem.stops.len(),
            budget_ms = self.time_budget.as_millis() as u64,
            "Starting solve"
        );

        let spawned = std::thread::Builder::new()
            .name(format!("solver-{problem_id}"))
            .spawn(move || {
                let started = Instant::now();
                let outcome = catch_unwind(AssertUnwindSafe(|| {
                    let search = LocalSearch::new(&problem, matrix.as_ref(), costs, iterations);
                    let should_stop = || stop.load(Ordering::Relaxed) || Instant::now() >= deadline;
                    search.run(&should_stop, &mut |solution| listener.on_improved(solution))
                }));

                jobs.lock().remove(&problem_id);

                match outcome {
                    Ok(best) => {
                        info!(
                            %problem_id,
                            score = %best.score,
                            elapsed_ms = started.elapsed().as_millis() as u64,
                            "Solve finished"
                        );
                        listener.on_finished(best);
                    }
                    Err(_) => {
                        warn!(%problem_id, "Solver worker panicked");
                        listener.on_error(EngineError::Worker("search aborted".to_string()));
                    }
                }
            });

        if let Err(err) = spawned {
            self.jobs.lock().remove(&problem_id);
            return Err(EngineError::Worker(err.to_string()));
        }

        Ok(())
    }

    fn terminate(&self, problem_id: Uuid) -> bool {
        match self.jobs.lock().get(&problem_id) {
            Some(flag) => {
                flag.store(true, Ordering::Relaxed);
                info!(%problem_id, "Termination requested");
                true
            }
            None => false,
        }
    }

    fn is_solving(&self, problem_id: Uuid) -> bool {
        self.jobs.lock().contains_key(&problem_id)
    }
}

struct ChannelListener {
    tx: mpsc::Sender<Result<Solution, EngineError>>,
}

impl SolveListener for ChannelListener {
    fn on_improved(&self, _solution: &Solution) {}

    fn on_finished(&self, solution: Solution) {
        let _ = self.tx.send(Ok(solution));
    }

    fn on_error(&self, error: EngineError) {
        let _ = self.tx.send(Err(error));
    }
}

/// Solves and waits for the final plan.
pub fn solve_blocking(
    engine: &dyn SolvingEngine,
    problem_id: Uuid,
    problem: Problem,
) -> Result<Solution, EngineError> {
    let (tx, rx) = mpsc::channel();
    engine.solve(problem_id, problem, Arc::new(ChannelListener { tx }))?;
    rx.recv()
        .map_err(|_| EngineError::Worker("solver ended without a result".to_string()))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::haversine::HaversineMatrix;
    use crate::model::{Location, Order, Stop, Vehicle};

    fn engine() -> LocalSearchEngine {
        LocalSearchEngine::new(Arc::new(HaversineMatrix::default()), &SolverConfig::default())
            .with_time_budget(Duration::from_secs(5))
    }

    fn problem() -> Problem {
        Problem {
            depot: Location::new(52.0, 21.0),
            vehicles: vec![Vehicle::new("v1", Location::new(52.0, 21.0))],
            stops: vec![
                Stop::from_order(&Order::new("a", Some(Location::new(52.01, 21.0)))).unwrap(),
                Stop::from_order(&Order::new("b", Some(Location::new(52.02, 21.01)))).unwrap(),
            ],
            fixed_routes: Vec::new(),
        }
    }

    #[test]
    fn blocking_solve_returns_best_plan() {
        let solution = solve_blocking(&engine(), Uuid::new_v4(), problem()).unwrap();
        assert_eq!(solution.assigned_stops_count(), 2);
        assert!(solution.score.is_feasible());
    }

    #[test]
    fn empty_fleet_yields_infeasible_best_effort_not_error() {
        let mut p = problem();
        p.vehicles.clear();
        let solution = solve_blocking(&engine(), Uuid::new_v4(), p).unwrap();
        assert_eq!(solution.unassigned_stops_count(), 2);
    }

    #[test]
    fn terminate_unknown_problem_is_noop() {
        assert!(!engine().terminate(Uuid::new_v4()));
    }

    #[test]
    fn job_is_released_after_finish() {
        let engine = engine();
        let id = Uuid::new_v4();
        solve_blocking(&engine, id, problem()).unwrap();
        assert!(!engine.is_solving(id));
        // Same id can be solved again once the first run ended.
        assert!(solve_blocking(&engine, id, problem()).is_ok());
    }
}
