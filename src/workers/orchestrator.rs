use crate::{
    commands::{CommandError, SettlementCommand},
    config::SimulationConfig,
    events::{EventQueue, SettlementEvent},
    grid::{Position, Region, TileWorld},
    materials::{DropId, DropRegistry, ResourceCategory, ResourceType},
    structures::{
        Blueprint, BlueprintRegistry, CancelledSite, ConstructionError, ConstructionManager,
        ConstructionSite, PlacementError, SiteId, StockpileError, StockpileId, StockpileManager,
    },
    workers::{
        agent::{WorkerAgent, WorkerContext, WorkerId},
        pathfinding::{GridPathfinder, PathfindingService},
        tasks::{
            FailureReason, HaulDestination, HaulSource, HaulingManager, MiningEvent, MiningManager,
            TaskId, TaskKind, TaskPayload, TaskRegistry, TaskScheduler, TaskStatus,
        },
    },
};
use bevy::prelude::*;
use std::collections::BTreeMap;

/// The shared world state every manager works against.
#[derive(Debug)]
pub struct Settlement {
    pub world: TileWorld,
    pub registry: TaskRegistry,
    pub stockpiles: StockpileManager,
    pub drops: DropRegistry,
    pub mining: MiningManager,
    pub construction: ConstructionManager,
    pub events: EventQueue,
}

impl Settlement {
    pub fn new(world: TileWorld, config: &SimulationConfig) -> Self {
        Self {
            world,
            registry: TaskRegistry::default(),
            stockpiles: StockpileManager::new(config.slot_stack_limit),
            drops: DropRegistry::default(),
            mining: MiningManager::from_config(config),
            construction: ConstructionManager::from_config(config),
            events: EventQueue::default(),
        }
    }

    pub fn start_construction(
        &mut self,
        blueprint: &Blueprint,
        position: Position,
        now: u64,
    ) -> Result<SiteId, PlacementError> {
        self.construction
            .start_construction(&mut self.world, &mut self.registry, blueprint, position, now)
    }

    /// Puts loose material on a tile and announces it.
    pub fn spawn_drop(&mut self, position: Position, resource: ResourceType, amount: u32) -> DropId {
        let drop = self.drops.spawn(position, resource, amount);
        self.events.push(SettlementEvent::ResourceDropped {
            drop,
            position,
            resource,
            amount,
        });
        drop
    }

    /// Moves manager-local events into the shared queue.
    fn collect_events(&mut self) {
        let Self {
            registry,
            stockpiles,
            construction,
            events,
            ..
        } = self;
        for event in registry
            .drain_events()
            .chain(stockpiles.drain_events())
            .chain(construction.drain_events())
        {
            events.push(event);
        }
    }
}

/// Owns every manager and the worker roster. One `tick` is one simulation
/// step; commands apply between ticks.
#[derive(Resource)]
pub struct Orchestrator {
    pub(crate) settlement: Settlement,
    pub(crate) workers: BTreeMap<WorkerId, WorkerAgent>,
    pub(crate) next_worker: u32,
    pub(crate) scheduler: TaskScheduler,
    pub(crate) hauling: HaulingManager,
    pathfinder: Box<dyn PathfindingService>,
    pub(crate) config: SimulationConfig,
    blueprints: BlueprintRegistry,
    pub(crate) tick: u64,
}

impl Orchestrator {
    pub fn new(world: TileWorld, config: SimulationConfig, blueprints: BlueprintRegistry) -> Self {
        Self {
            settlement: Settlement::new(world, &config),
            workers: BTreeMap::new(),
            next_worker: 0,
            scheduler: TaskScheduler::from_config(&config),
            hauling: HaulingManager::from_config(&config),
            pathfinder: Box::new(GridPathfinder),
            config,
            blueprints,
            tick: 0,
        }
    }

    pub fn with_pathfinder(mut self, pathfinder: impl PathfindingService + 'static) -> Self {
        self.pathfinder = Box::new(pathfinder);
        self
    }

    pub fn tick_count(&self) -> u64 {
        self.tick
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn blueprints(&self) -> &BlueprintRegistry {
        &self.blueprints
    }

    pub fn settlement(&self) -> &Settlement {
        &self.settlement
    }

    /// Direct access for seeding and external world edits.
    pub fn settlement_mut(&mut self) -> &mut Settlement {
        &mut self.settlement
    }

    pub fn world(&self) -> &TileWorld {
        &self.settlement.world
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.settlement.registry
    }

    pub fn stockpiles(&self) -> &StockpileManager {
        &self.settlement.stockpiles
    }

    pub fn drops(&self) -> &DropRegistry {
        &self.settlement.drops
    }

    pub fn mining(&self) -> &MiningManager {
        &self.settlement.mining
    }

    pub fn construction(&self) -> &ConstructionManager {
        &self.settlement.construction
    }

    pub fn worker(&self, id: WorkerId) -> Option<&WorkerAgent> {
        self.workers.get(&id)
    }

    pub fn workers(&self) -> impl Iterator<Item = &WorkerAgent> {
        self.workers.values()
    }

    pub fn apply(&mut self, command: SettlementCommand) -> Result<(), CommandError> {
        let result = match command {
            SettlementCommand::DesignateMining { region } => {
                self.designate_mining(region);
                Ok(())
            }
            SettlementCommand::CancelMining { region } => {
                self.cancel_mining(region);
                Ok(())
            }
            SettlementCommand::CreateStockpile { bounds, allowed } => self
                .create_stockpile(bounds, allowed)
                .map(|_| ())
                .map_err(CommandError::from),
            SettlementCommand::RemoveStockpile { stockpile } => self
                .remove_stockpile(stockpile)
                .map_err(CommandError::from),
            SettlementCommand::StartConstruction {
                blueprint,
                position,
            } => self
                .start_construction(&blueprint, position)
                .map(|_| ())
                .map_err(CommandError::from),
            SettlementCommand::CancelConstruction { site } => self
                .cancel_construction(site)
                .map(|_| ())
                .map_err(CommandError::from),
            SettlementCommand::PauseConstruction { site } => self
                .pause_construction(site)
                .map_err(CommandError::from),
            SettlementCommand::ResumeConstruction { site } => self
                .resume_construction(site)
                .map_err(CommandError::from),
            SettlementCommand::RemoveSite { site } => {
                self.remove_site(site).map(|_| ()).map_err(CommandError::from)
            }
            SettlementCommand::RegisterWorker {
                position,
                capabilities,
            } => self
                .register_worker_with(position, capabilities)
                .map(|_| ()),
            SettlementCommand::UnregisterWorker { worker } => {
                self.unregister_worker(worker).map(|_| ())
            }
        };
        if let Err(error) = &result {
            warn!("Command rejected: {error}");
            self.settlement.events.push(SettlementEvent::CommandRejected {
                reason: error.to_string(),
            });
        }
        result
    }

    pub fn designate_mining(&mut self, region: Region) -> Vec<TaskId> {
        let settlement = &mut self.settlement;
        settlement.mining.designate_mining(
            &settlement.world,
            &mut settlement.registry,
            region,
            self.tick,
        )
    }

    pub fn cancel_mining(&mut self, region: Region) -> Vec<TaskId> {
        let settlement = &mut self.settlement;
        settlement
            .mining
            .cancel_designation(&mut settlement.registry, region, self.tick)
    }

    pub fn create_stockpile(
        &mut self,
        bounds: Region,
        allowed: impl IntoIterator<Item = ResourceCategory>,
    ) -> Result<StockpileId, StockpileError> {
        let settlement = &mut self.settlement;
        settlement
            .stockpiles
            .create_stockpile(&mut settlement.world, bounds, allowed)
    }

    /// Ends every task touching the stockpile, then spills its contents as
    /// drops so nothing is lost.
    pub fn remove_stockpile(&mut self, stockpile: StockpileId) -> Result<(), StockpileError> {
        if self.settlement.stockpiles.get(stockpile).is_none() {
            return Err(StockpileError::NotFound(stockpile));
        }
        let now = self.tick;
        let touching: Vec<(TaskId, TaskStatus, bool)> = self
            .settlement
            .registry
            .iter()
            .filter(|task| !task.status.is_terminal())
            .filter_map(|task| {
                let (source, destination) = match &task.payload {
                    TaskPayload::Haul {
                        source, destination, ..
                    } => (
                        matches!(source, HaulSource::Stockpile(slot) if slot.stockpile == stockpile),
                        matches!(destination, HaulDestination::Stockpile(slot) if slot.stockpile == stockpile),
                    ),
                    TaskPayload::Deliver {
                        source: Some(slot), ..
                    } => (slot.stockpile == stockpile, false),
                    _ => (false, false),
                };
                let loaded = task.haul_stage.is_some_and(|stage| stage.is_loaded());
                let affected = (source && !loaded) || destination;
                affected.then_some((task.id, task.status, loaded))
            })
            .collect();

        for (task, status, loaded) in touching {
            if status == TaskStatus::InProgress {
                let reason = if loaded {
                    FailureReason::DestinationUnavailable
                } else {
                    FailureReason::PickupVanished
                };
                self.hauling.fail(&mut self.settlement, task, reason, now);
            } else {
                if let Err(error) = self.settlement.registry.cancel(task, now) {
                    warn!("Could not cancel {task}: {error}");
                }
                self.hauling.release_holds(&mut self.settlement, task);
            }
        }

        let settlement = &mut self.settlement;
        let record = settlement
            .stockpiles
            .remove_stockpile(&mut settlement.world, stockpile)?;
        for slot in record.slots {
            if let (Some(resource), amount @ 1..) = (slot.resource, slot.amount) {
                settlement.spawn_drop(slot.position, resource, amount);
            }
        }
        info!("Removed {stockpile}");
        Ok(())
    }

    pub fn start_construction(
        &mut self,
        blueprint: &str,
        position: Position,
    ) -> Result<SiteId, PlacementError> {
        let blueprint = self
            .blueprints
            .get(blueprint)
            .cloned()
            .ok_or_else(|| PlacementError::UnknownBlueprint(blueprint.to_string()))?;
        self.start_construction_with(&blueprint, position)
    }

    pub fn start_construction_with(
        &mut self,
        blueprint: &Blueprint,
        position: Position,
    ) -> Result<SiteId, PlacementError> {
        self.settlement
            .start_construction(blueprint, position, self.tick)
    }

    /// Cancels the site's tasks, frees their reservations and drops the
    /// refund at the site origin.
    pub fn cancel_construction(&mut self, site: SiteId) -> Result<CancelledSite, ConstructionError> {
        let now = self.tick;
        let settlement = &mut self.settlement;
        let cancelled = settlement.construction.cancel_construction(
            &mut settlement.world,
            &mut settlement.registry,
            site,
            now,
        )?;
        for task in &cancelled.cancelled_tasks {
            self.hauling.release_holds(&mut self.settlement, *task);
        }
        for (resource, amount) in &cancelled.refund {
            self.settlement
                .spawn_drop(cancelled.position, *resource, *amount);
        }
        Ok(cancelled)
    }

    pub fn pause_construction(&mut self, site: SiteId) -> Result<(), ConstructionError> {
        self.settlement.construction.pause_construction(site)
    }

    pub fn resume_construction(&mut self, site: SiteId) -> Result<(), ConstructionError> {
        self.settlement.construction.resume_construction(site)
    }

    /// Forgets a site. Open sites are cancelled first.
    pub fn remove_site(&mut self, site: SiteId) -> Result<ConstructionSite, ConstructionError> {
        let closed = self
            .settlement
            .construction
            .get(site)
            .ok_or(ConstructionError::SiteNotFound(site))?
            .status
            .is_closed();
        if !closed {
            self.cancel_construction(site)?;
        }
        let settlement = &mut self.settlement;
        settlement
            .construction
            .remove_site(&mut settlement.world, site)
    }

    pub fn register_worker(&mut self, position: Position) -> Result<WorkerId, CommandError> {
        self.register_worker_with(position, TaskKind::ALL)
    }

    pub fn register_worker_with(
        &mut self,
        position: Position,
        capabilities: impl IntoIterator<Item = TaskKind>,
    ) -> Result<WorkerId, CommandError> {
        if !self.settlement.world.is_walkable(position) {
            return Err(CommandError::Unwalkable(position));
        }
        self.next_worker += 1;
        let id = WorkerId(self.next_worker);
        let agent = WorkerAgent::new(id, position, &self.config).with_capabilities(capabilities);
        info!("Registered {id} at {position}");
        self.workers.insert(id, agent);
        Ok(id)
    }

    /// Removes a worker. A claimed task goes back to the pool, one in
    /// progress fails, and carried cargo is dropped in place.
    pub fn unregister_worker(&mut self, worker: WorkerId) -> Result<WorkerAgent, CommandError> {
        let mut agent = self
            .workers
            .remove(&worker)
            .ok_or(CommandError::UnknownWorker(worker))?;
        let now = self.tick;
        if let Some(task) = agent.current_task {
            let held = self
                .settlement
                .registry
                .get(task)
                .filter(|record| record.assigned_worker == Some(worker))
                .map(|record| (record.status, record.payload.clone()));
            match held {
                Some((TaskStatus::Claimed, _)) => {
                    if let Err(error) = self.scheduler.release_claim(&mut self.settlement.registry, task, now) {
                        warn!("Could not release {task}: {error}");
                    }
                }
                Some((TaskStatus::InProgress, payload)) => {
                    self.hauling
                        .fail(&mut self.settlement, task, FailureReason::WorkerLost, now);
                    if let TaskPayload::Mine { tile, .. } = payload {
                        self.designate_mining(Region::single(tile));
                    }
                }
                _ => {}
            }
        }
        agent.drop_cargo(&mut self.settlement);
        agent.reset();
        info!("Unregistered {worker}");
        Ok(agent)
    }

    /// Advances the simulation by one step.
    pub fn tick(&mut self) {
        self.tick += 1;
        let now = self.tick;

        self.settlement
            .construction
            .reconcile(&mut self.settlement.registry, now);
        self.hauling.source_deliveries(&mut self.settlement, now);
        self.hauling.haul_loose_drops(&mut self.settlement, now);
        self.settle_reservations();

        let snapshot = {
            let construction = &self.settlement.construction;
            self.scheduler
                .snapshot(&self.settlement.registry, now, |task| {
                    construction.is_claimable(task)
                        && !matches!(task.payload, TaskPayload::Deliver { source: None, .. })
                })
        };
        let mut ctx = WorkerContext {
            settlement: &mut self.settlement,
            hauling: &self.hauling,
            scheduler: &self.scheduler,
            snapshot: &snapshot,
            pathfinder: self.pathfinder.as_ref(),
            config: &self.config,
            now,
        };
        for worker in self.workers.values_mut() {
            worker.tick(&mut ctx);
        }

        for event in self.settlement.mining.drain_events() {
            if let MiningEvent::TileMined { tile, drops, .. } = &event {
                for (drop, resource, amount) in drops {
                    self.settlement.events.push(SettlementEvent::ResourceDropped {
                        drop: *drop,
                        position: *tile,
                        resource: *resource,
                        amount: *amount,
                    });
                }
            }
            self.hauling
                .on_mining_event(&mut self.settlement, &event, now);
        }

        for task in self
            .settlement
            .registry
            .stale_claims(now, self.config.claim_timeout_ticks)
        {
            if let Err(error) = self
                .scheduler
                .release_claim(&mut self.settlement.registry, task, now)
            {
                warn!("Could not release stale {task}: {error}");
            }
        }
        self.settlement
            .registry
            .prune(now, self.config.retention_ticks);
        self.settlement.collect_events();
    }

    /// Drops slot reservations whose task no longer runs.
    pub(crate) fn settle_reservations(&mut self) {
        let registry = &self.settlement.registry;
        let released = self.settlement.stockpiles.retain_reservations(|task| {
            registry
                .status(task)
                .is_some_and(|status| !status.is_terminal())
        });
        if released > 0 {
            warn!("Released {released} orphaned slot reservations");
        }
    }

    pub fn drain_events(&mut self) -> Vec<SettlementEvent> {
        self.settlement.collect_events();
        self.settlement.events.drain().collect()
    }
}
