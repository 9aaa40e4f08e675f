//! Entry points exposed to transport adapters.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::NaiveDate;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::PlannerConfig;
use crate::dispatch::DispatchService;
use crate::engine::{LocalSearchEngine, SolvingEngine};
use crate::error::PlannerResult;
use crate::gatekeeper::{Gatekeeper, WebhookReviewChannel};
use crate::haversine::HaversineMatrix;
use crate::manifest::ManifestService;
use crate::model::{DriverId, Location, Order, OrderId, VehicleId};
use crate::partition::{HubRegistry, RegionalOptimizer};
use crate::publication::{PublicationReport, PublicationService, WebhookDriverNotifier};
use crate::scheduler::{AutoScheduler, SolveAccepted};
use crate::store::{MemoryStore, PlannedRoute, SolutionRecord};
use crate::token::{TokenGrant, TokenService};
use crate::traits::{DistanceMatrixProvider, DriverNotifier, FleetSource, OrderSource, OrderSystem, ReviewChannel};

/// External collaborators. Only the order and fleet sources are required.
pub struct Collaborators {
    pub fleet: Arc<dyn FleetSource>,
    pub orders: Arc<dyn OrderSource>,
    pub matrix: Option<Arc<dyn DistanceMatrixProvider>>,
    pub review: Option<Box<dyn ReviewChannel>>,
    pub notifier: Option<Arc<dyn DriverNotifier>>,
    pub order_system: Option<Arc<dyn OrderSystem>>,
}

impl Collaborators {
    pub fn new(fleet: Arc<dyn FleetSource>, orders: Arc<dyn OrderSource>) -> Self {
        Self {
            fleet,
            orders,
            matrix: None,
            review: None,
            notifier: None,
            order_system: None,
        }
    }
}

pub struct Planner {
    store: Arc<MemoryStore>,
    scheduler: AutoScheduler,
    publication: Arc<PublicationService>,
    dispatch: DispatchService,
    manifests: ManifestService,
    tokens: Arc<TokenService>,
    approvals: Gatekeeper,
}

impl Planner {
    pub fn new(config: PlannerConfig, collaborators: Collaborators) -> PlannerResult<Self> {
        let store = Arc::new(MemoryStore::new());

        let matrix = collaborators
            .matrix
            .unwrap_or_else(|| Arc::new(HaversineMatrix::new(config.solver.speed_kmh)));
        let engine: Arc<dyn SolvingEngine> = Arc::new(LocalSearchEngine::new(matrix, &config.solver));

        let review = match collaborators.review {
            Some(channel) => Some(channel),
            None => match WebhookReviewChannel::from_config(&config.gatekeeper) {
                Ok(channel) => channel.map(|c| Box::new(c) as Box<dyn ReviewChannel>),
                Err(err) => {
                    warn!(error = %err, "Review webhook unavailable, approvals will only be logged");
                    None
                }
            },
        };
        let mut gatekeeper = Gatekeeper::new(config.gatekeeper.clone());
        if let Some(channel) = review {
            gatekeeper = gatekeeper.with_channel(channel);
        }

        let notifier = match collaborators.notifier {
            Some(notifier) => Some(notifier),
            None => match WebhookDriverNotifier::from_config(&config.tokens) {
                Ok(notifier) => notifier.map(|n| Arc::new(n) as Arc<dyn DriverNotifier>),
                Err(err) => {
                    warn!(error = %err, "Driver notifier unavailable, links will only be logged");
                    None
                }
            },
        };

        let tokens = Arc::new(TokenService::new(store.clone(), config.tokens.clone()));
        let mut publication = PublicationService::new(
            store.clone(),
            store.clone(),
            store.clone(),
            store.clone(),
            ManifestService::new(store.clone()),
            Arc::clone(&tokens),
        );
        if let Some(notifier) = notifier {
            publication = publication.with_notifier(notifier);
        }
        if let Some(order_system) = collaborators.order_system {
            publication = publication.with_order_system(order_system);
        }
        let publication = Arc::new(publication);

        let mut scheduler = AutoScheduler::builder(
            config.depot,
            Arc::clone(&engine),
            collaborators.fleet,
            Arc::clone(&collaborators.orders),
            store.clone(),
            store.clone(),
            gatekeeper,
            Arc::clone(&publication),
        );
        if config.regional_partitioning {
            let registry = HubRegistry::new(config.hubs.clone());
            let stats = registry.statistics();
            info!(
                hubs = stats.total_hubs,
                active = stats.active_hubs,
                capacity = stats.total_vehicle_capacity,
                "Regional partitioning enabled"
            );
            let optimizer = RegionalOptimizer::new(registry, engine, &config.solver)?;
            scheduler = scheduler.regional(Arc::new(optimizer));
        }

        Ok(Self {
            dispatch: DispatchService::new(
                store.clone(),
                store.clone(),
                collaborators.orders,
                config.solver.clone(),
            ),
            manifests: ManifestService::new(store.clone()),
            approvals: Gatekeeper::new(config.gatekeeper),
            scheduler: scheduler.build(),
            publication,
            tokens,
            store,
        })
    }

    /// Starts a background solve; `None` selects every pending order.
    pub fn optimize_now(&self, order_ids: Option<&[OrderId]>) -> PlannerResult<SolveAccepted> {
        self.scheduler.trigger_optimization(order_ids)
    }

    pub fn stop_solver(&self) -> bool {
        self.scheduler.stop_solver()
    }

    pub fn publish(
        &self,
        solution_id: Uuid,
        drivers: &HashMap<VehicleId, DriverId>,
        date: NaiveDate,
    ) -> PlannerResult<PublicationReport> {
        self.publication.publish(solution_id, drivers, date)
    }

    pub fn inject_order(&self, route_id: Uuid, order: &Order, start: Option<Location>) -> PlannerResult<PlannedRoute> {
        self.dispatch.inject_order(route_id, order, start)
    }

    pub fn append_order(&self, route_id: Uuid, order_id: &str) -> PlannerResult<SolutionRecord> {
        self.dispatch.append_order(route_id, order_id)
    }

    pub fn validate_token(&self, token: &str) -> PlannerResult<TokenGrant> {
        Ok(self.tokens.validate(token)?)
    }

    pub fn process_approval(&self, approval_id: &str, approved: bool) -> String {
        self.approvals.process_approval(approval_id, approved)
    }

    pub fn scheduler(&self) -> &AutoScheduler {
        &self.scheduler
    }

    pub fn dispatch(&self) -> &DispatchService {
        &self.dispatch
    }

    pub fn manifests(&self) -> &ManifestService {
        &self.manifests
    }

    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }
}
