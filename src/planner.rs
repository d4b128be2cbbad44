//! Pipeline orchestration.
//!
//! Wires the stages end to end: depot set, matrix build (with provider
//! fallback), traffic adjustment, warehouse allocation, CVRP solve, TSP
//! post-optimization. The planner owns the matrix for the run; every stage
//! borrows it read-only except the traffic adjuster.

use std::sync::atomic::AtomicBool;
use std::time::Duration;

use tracing::{info, warn};

use crate::allocator::{allocate, WarehouseEntry};
use crate::cache::MatrixCache;
use crate::config::{PlannerConfig, RoutingEngine};
use crate::error::PlannerError;
use crate::gateway::{GatewayError, RouteSummary, RoutingGateway};
use crate::geo::Coordinate;
use crate::haversine::HaversineGateway;
use crate::matrix::{Matrix, MatrixBuilder};
use crate::model::{Customer, DepotSet, Route, Solution};
use crate::osrm::{OsrmConfig, OsrmGateway};
use crate::progress::{ProgressReporter, SilentProgress};
use crate::solver::cost::CostModel;
use crate::solver::{ProblemInstance, SolverSettings};
use crate::traffic::TrafficZone;
use crate::tsp::post_optimize;
use crate::valhalla::{ValhallaConfig, ValhallaGateway};

/// Result of one planning run.
#[derive(Debug)]
pub struct PlanOutcome {
    pub solution: Solution,
    /// Customers the allocator or the pipeline kept off the road.
    pub warehouse: Vec<WarehouseEntry>,
    /// Admitted demand over fleet capacity.
    pub utilization: f64,
    /// Cells the matrix builder had to estimate.
    pub degraded_cells: usize,
}

pub struct Planner {
    config: PlannerConfig,
}

impl Planner {
    pub fn new(config: PlannerConfig) -> Result<Self, PlannerError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    /// Plan with the default silent progress reporter.
    pub fn plan(&self, customers: &[Customer]) -> Result<PlanOutcome, PlannerError> {
        self.plan_with(customers, &SilentProgress, None)
    }

    /// Full-control entry point: pluggable progress, optional cancellation.
    pub fn plan_with(
        &self,
        customers: &[Customer],
        progress: &dyn ProgressReporter,
        cancel: Option<&AtomicBool>,
    ) -> Result<PlanOutcome, PlannerError> {
        if customers.is_empty() {
            return Err(PlannerError::InvalidInput("no valid customers".into()));
        }

        let depots = DepotSet::from_fleet(&self.config.vehicles);
        let central_depot = depots
            .coordinates()
            .first()
            .copied()
            .unwrap_or(self.config.vehicles[0].start_depot);

        let allocation = allocate(
            customers,
            &self.config.vehicles,
            self.config.warehouse.policy_volume_cap,
            central_depot,
        );
        if depots.is_empty() || allocation.serviceable.is_empty() {
            // Infeasible problem is not an error: empty solution, everything
            // in the warehouse.
            info!("nothing serviceable; empty solution");
            return Ok(PlanOutcome {
                solution: Solution::default(),
                warehouse: allocation.warehouse,
                utilization: allocation.utilization,
                degraded_cells: 0,
            });
        }

        let mut locations: Vec<Coordinate> = depots.coordinates().to_vec();
        locations.extend(allocation.serviceable.iter().map(|c| c.coordinate));

        let mut matrix = self.build_matrix(&locations, progress, cancel)?;

        if self.config.locations.enable_city_traffic_adjustment {
            TrafficZone {
                center: self.config.locations.city_center_coords,
                radius_km: self.config.locations.city_traffic_radius_km,
                duration_multiplier: self.config.locations.city_traffic_duration_multiplier,
            }
            .apply(&mut matrix);
        }

        let instance = ProblemInstance::build(
            &matrix,
            &depots,
            &self.config.vehicles,
            &allocation.serviceable,
        )?;
        let costs = if self.config.locations.enable_center_zone_restrictions {
            CostModel::new(&matrix, &self.config.locations, depots.len())
        } else {
            CostModel::plain(&matrix)
        };
        let settings = SolverSettings::from_config(&self.config);

        let mut solution = crate::solver::solve(&instance, &costs, &settings);

        post_optimize(
            &mut solution,
            &matrix,
            &depots,
            &self.config.vehicles,
            &allocation.serviceable,
            self.config.cvrp.enable_final_depot_reconfiguration,
        );

        if matrix.degraded_cells > 0 {
            solution.degraded = true;
        }

        Ok(PlanOutcome {
            solution,
            warehouse: allocation.warehouse,
            utilization: allocation.utilization,
            degraded_cells: matrix.degraded_cells,
        })
    }

    /// Build the matrix through the provider preference chain: configured
    /// engine, then the alternate engine, then great-circle estimates.
    fn build_matrix(
        &self,
        locations: &[Coordinate],
        progress: &dyn ProgressReporter,
        cancel: Option<&AtomicBool>,
    ) -> Result<Matrix, PlannerError> {
        let cache = MatrixCache::new(
            &self.config.cache.directory,
            Duration::from_secs(self.config.cache.ttl_seconds),
        );

        let mut engines = vec![self.config.routing.engine];
        engines.push(match self.config.routing.engine {
            RoutingEngine::Static => RoutingEngine::TimeDependent,
            RoutingEngine::TimeDependent => RoutingEngine::Static,
        });

        let mut last_error: Option<GatewayError> = None;
        for engine in engines {
            let gateway = match self.make_gateway(engine) {
                Ok(gateway) => gateway,
                Err(err) => {
                    last_error = Some(err);
                    continue;
                }
            };
            match self.run_builder(&*gateway, engine, locations, &cache, progress, cancel) {
                Ok(matrix) => return Ok(matrix),
                Err(err) => {
                    warn!(provider = gateway.provider_id(), error = %err, "provider failed; trying next");
                    last_error = Some(err);
                }
            }
        }

        // Last tier: the fallback gateway cannot fail unless cancelled.
        let fallback = HaversineGateway::default();
        self.run_builder(
            &fallback,
            self.config.routing.engine,
            locations,
            &cache,
            progress,
            cancel,
        )
        .map_err(|err| {
            PlannerError::ProviderUnavailable(last_error.unwrap_or(err))
        })
    }

    fn run_builder(
        &self,
        gateway: &dyn RoutingGateway,
        engine: RoutingEngine,
        locations: &[Coordinate],
        cache: &MatrixCache,
        progress: &dyn ProgressReporter,
        cancel: Option<&AtomicBool>,
    ) -> Result<Matrix, GatewayError> {
        let departure = self.departure_for(engine);
        let mut builder = MatrixBuilder::new(gateway)
            .with_departure(departure)
            .with_costing_profile(self.config.routing.costing_profile.as_str())
            .with_progress(progress);
        if self.config.cache.enabled {
            builder = builder.with_cache(cache);
        }
        if let Some(flag) = cancel {
            builder = builder.with_cancel_flag(flag);
        }
        builder.build(locations)
    }

    fn departure_for(&self, engine: RoutingEngine) -> Option<String> {
        if engine == RoutingEngine::TimeDependent && self.config.routing.enable_time_dependent {
            self.config.routing.departure_time.clone()
        } else {
            None
        }
    }

    fn make_gateway(&self, engine: RoutingEngine) -> Result<Box<dyn RoutingGateway>, GatewayError> {
        match engine {
            RoutingEngine::Static => Ok(Box::new(OsrmGateway::new(OsrmConfig {
                base_url: self.config.routing.static_url.clone(),
                profile: self.config.routing.costing_profile.clone(),
                timeout_secs: self.config.routing.request_timeout_secs,
            })?)),
            RoutingEngine::TimeDependent => Ok(Box::new(ValhallaGateway::new(ValhallaConfig {
                base_url: self.config.routing.time_dependent_url.clone(),
                costing: "auto".to_string(),
                timeout_secs: self.config.routing.request_timeout_secs,
            })?)),
        }
    }

    /// Fetch the road geometry of a finished route through the preferred
    /// provider. Never called on the solve path.
    pub fn route_geometry(
        &self,
        route: &Route,
        customers: &[Customer],
    ) -> Result<RouteSummary, GatewayError> {
        let spec = self.config.vehicles.get(route.vehicle_spec).ok_or_else(|| {
            GatewayError::Malformed(format!("unknown vehicle spec {}", route.vehicle_spec))
        })?;

        let mut waypoints = vec![spec.start_depot];
        for id in &route.customers {
            let customer = customers
                .iter()
                .find(|c| &c.id == id)
                .ok_or_else(|| GatewayError::Malformed(format!("unknown customer {}", id)))?;
            waypoints.push(customer.coordinate);
        }
        waypoints.push(spec.start_depot);

        let gateway = self.make_gateway(self.config.routing.engine)?;
        gateway.route(&waypoints)
    }
}

