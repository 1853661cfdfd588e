use crate::{
    config::SimulationConfig,
    grid::Position,
    materials::{DropId, Inventory},
    structures::BuildProgress,
    workers::{
        pathfinding::{Path, PathfindingService},
        tasks::{
            FailureReason, HaulStage, HaulingManager, MiningProgress, PendingSnapshot, TaskId,
            TaskKind, TaskPayload, TaskScheduler,
        },
        Settlement,
    },
};
use bevy::log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, VecDeque};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkerId(pub u32);

impl std::fmt::Display for WorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "worker#{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorkerState {
    #[default]
    Idle,
    SeekingTask,
    TravelingToTask,
    Mining,
    HaulingPickup,
    /// Carrying a load, walking to the drop-off or unloading there.
    HaulingDelivery,
    Building,
}

/// Everything a worker may touch during its tick.
pub struct WorkerContext<'a> {
    pub settlement: &'a mut Settlement,
    pub hauling: &'a HaulingManager,
    pub scheduler: &'a TaskScheduler,
    pub snapshot: &'a PendingSnapshot,
    pub pathfinder: &'a dyn PathfindingService,
    pub config: &'a SimulationConfig,
    pub now: u64,
}

enum Step {
    Moving,
    Blocked,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerAgent {
    pub id: WorkerId,
    pub position: Position,
    pub state: WorkerState,
    pub current_task: Option<TaskId>,
    pub inventory: Inventory,
    pub capabilities: BTreeSet<TaskKind>,
    pub work_rate: u32,
    /// Tiles moved per tick.
    pub speed: u32,
    #[serde(skip)]
    route: VecDeque<Position>,
    #[serde(skip)]
    timer: u32,
}

impl WorkerAgent {
    pub fn new(id: WorkerId, position: Position, config: &SimulationConfig) -> Self {
        Self {
            id,
            position,
            state: WorkerState::Idle,
            current_task: None,
            inventory: Inventory::new(config.worker.capacity),
            capabilities: TaskKind::ALL.into_iter().collect(),
            work_rate: config.worker.work_rate,
            speed: config.worker.speed.max(1),
            route: VecDeque::new(),
            timer: 0,
        }
    }

    pub fn with_capabilities(mut self, capabilities: impl IntoIterator<Item = TaskKind>) -> Self {
        self.capabilities = capabilities.into_iter().collect();
        self
    }

    pub fn is_idle(&self) -> bool {
        self.current_task.is_none() && matches!(self.state, WorkerState::Idle | WorkerState::SeekingTask)
    }

    pub fn remaining_route(&self) -> usize {
        self.route.len()
    }

    /// Forgets the current task and route. Used after a restore, where the
    /// worker comes back idle with whatever it carried.
    pub(crate) fn reset(&mut self) {
        self.current_task = None;
        self.route.clear();
        self.timer = 0;
        self.state = WorkerState::Idle;
    }

    pub fn tick(&mut self, ctx: &mut WorkerContext<'_>) {
        if !self.holds_current_task(ctx.settlement) {
            debug!("{} lost {:?}; rolling back", self.id, self.current_task);
            self.reset();
        }

        match self.state {
            WorkerState::Idle | WorkerState::SeekingTask => {
                if self.inventory.is_empty() {
                    self.seek(ctx);
                } else {
                    self.stash_cargo(ctx);
                }
            }
            WorkerState::TravelingToTask => self.travel(ctx),
            WorkerState::Mining => self.mine(ctx),
            WorkerState::HaulingPickup => self.pick_up(ctx),
            WorkerState::HaulingDelivery => self.deliver(ctx),
            WorkerState::Building => self.build(ctx),
        }
    }

    /// A held task must still exist, be assigned to this worker and be
    /// either claimed or in progress.
    fn holds_current_task(&self, settlement: &Settlement) -> bool {
        let Some(id) = self.current_task else {
            return true;
        };
        settlement.registry.get(id).is_some_and(|task| {
            task.assigned_worker == Some(self.id) && task.status.is_held()
        })
    }

    fn seek(&mut self, ctx: &mut WorkerContext<'_>) {
        self.state = WorkerState::SeekingTask;
        let candidates = ctx
            .scheduler
            .rank(ctx.snapshot, self.position, &self.capabilities);
        for task in candidates.into_iter().take(1 + ctx.config.max_claim_retries) {
            if ctx
                .scheduler
                .claim(&mut ctx.settlement.registry, task, self.id, ctx.now)
                .is_err()
            {
                continue;
            }
            let Some(target) = ctx.settlement.registry.get(task).map(|record| record.position)
            else {
                continue;
            };
            match self.route_to(ctx, target) {
                Some(route) => {
                    self.current_task = Some(task);
                    self.route = route.into();
                    self.state = WorkerState::TravelingToTask;
                    return;
                }
                None => {
                    if let Err(error) = ctx.scheduler.requeue_unreachable(
                        &mut ctx.settlement.registry,
                        task,
                        ctx.now,
                        ctx.config.unreachable_backoff_ticks,
                    ) {
                        warn!("{} could not requeue {task}: {error}", self.id);
                    }
                }
            }
        }
        self.state = WorkerState::Idle;
    }

    /// Walkable targets are stood on; anything else is worked from a
    /// neighbouring tile.
    fn route_to(&self, ctx: &WorkerContext<'_>, target: Position) -> Option<Path> {
        let world = &ctx.settlement.world;
        if world.is_walkable(target) {
            ctx.pathfinder.find_path(world, self.position, target)
        } else {
            ctx.pathfinder.find_path_to_adjacent(world, self.position, target)
        }
    }

    fn delivery_target(ctx: &WorkerContext<'_>, id: TaskId) -> Option<Position> {
        let settlement: &Settlement = ctx.settlement;
        settlement
            .registry
            .get(id)
            .and_then(|task| ctx.hauling.delivery_position(settlement, task))
    }

    fn step(&mut self, ctx: &WorkerContext<'_>) -> Step {
        for _ in 0..self.speed {
            let Some(next) = self.route.front().copied() else {
                break;
            };
            if !ctx.settlement.world.is_walkable(next) {
                return Step::Blocked;
            }
            self.route.pop_front();
            self.position = next;
        }
        Step::Moving
    }

    fn travel(&mut self, ctx: &mut WorkerContext<'_>) {
        let Some(id) = self.current_task else {
            self.reset();
            return;
        };
        if self.route.is_empty() {
            self.arrive(ctx, id);
            return;
        }
        if let Step::Blocked = self.step(ctx) {
            let target = ctx.settlement.registry.get(id).map(|task| task.position);
            match target.and_then(|target| self.route_to(ctx, target)) {
                Some(route) => self.route = route.into(),
                None => {
                    if let Err(error) = ctx.scheduler.requeue_unreachable(
                        &mut ctx.settlement.registry,
                        id,
                        ctx.now,
                        ctx.config.unreachable_backoff_ticks,
                    ) {
                        warn!("{} could not requeue {id}: {error}", self.id);
                    }
                    self.reset();
                    return;
                }
            }
        }
        ctx.settlement.registry.touch(id, ctx.now);
    }

    /// Arrival only switches state; work starts on the next tick.
    fn arrive(&mut self, ctx: &mut WorkerContext<'_>, id: TaskId) {
        let Some(kind) = ctx.settlement.registry.get(id).map(|task| task.kind) else {
            self.reset();
            return;
        };
        if let Err(error) = ctx.settlement.registry.start(id, ctx.now) {
            warn!("{} could not start {id}: {error}", self.id);
            self.reset();
            return;
        }
        self.timer = 0;
        self.state = match kind {
            TaskKind::Mine => WorkerState::Mining,
            TaskKind::Build => WorkerState::Building,
            TaskKind::Haul | TaskKind::Deliver => {
                ctx.settlement
                    .registry
                    .set_haul_stage(id, HaulStage::PickingUp, ctx.now);
                WorkerState::HaulingPickup
            }
        };
        debug!("{} started {id} at {}", self.id, self.position);
    }

    fn mine(&mut self, ctx: &mut WorkerContext<'_>) {
        let Some(task) = self
            .current_task
            .and_then(|id| ctx.settlement.registry.get(id))
            .cloned()
        else {
            self.reset();
            return;
        };
        let settlement = &mut *ctx.settlement;
        let outcome = settlement.mining.apply_work(
            &mut settlement.world,
            &mut settlement.drops,
            &task,
            self.work_rate,
        );
        match outcome {
            Ok(MiningProgress::Working { .. }) => settlement.registry.touch(task.id, ctx.now),
            Ok(MiningProgress::Completed) => {
                if let Err(error) = settlement.registry.complete(task.id, ctx.now) {
                    warn!("{} could not complete {}: {error}", self.id, task.id);
                }
                self.reset();
            }
            Err(reason) => {
                if let Err(error) = settlement.registry.fail(task.id, reason, ctx.now) {
                    warn!("{} could not fail {}: {error}", self.id, task.id);
                }
                self.reset();
            }
        }
    }

    fn pick_up(&mut self, ctx: &mut WorkerContext<'_>) {
        let Some(id) = self.current_task else {
            self.reset();
            return;
        };
        self.timer += 1;
        ctx.settlement.registry.touch(id, ctx.now);
        if self.timer < ctx.config.pickup_ticks {
            return;
        }
        self.timer = 0;

        let Ok((resource, amount)) = ctx.hauling.pickup(ctx.settlement, id, ctx.now) else {
            self.reset();
            return;
        };
        if let Err(error) = self.inventory.add(resource, amount) {
            warn!("{} cannot carry {amount} {resource}: {error}", self.id);
            ctx.settlement.spawn_drop(self.position, resource, amount);
            ctx.hauling
                .fail(ctx.settlement, id, FailureReason::DestinationUnavailable, ctx.now);
            self.reset();
            return;
        }

        match Self::delivery_target(ctx, id).and_then(|target| self.route_to(ctx, target)) {
            Some(route) => {
                self.route = route.into();
                self.state = WorkerState::HaulingDelivery;
            }
            None => {
                ctx.hauling
                    .fail(ctx.settlement, id, FailureReason::DestinationUnavailable, ctx.now);
                self.reset();
            }
        }
    }

    fn deliver(&mut self, ctx: &mut WorkerContext<'_>) {
        let Some(id) = self.current_task else {
            self.reset();
            return;
        };
        if !self.route.is_empty() {
            if let Step::Blocked = self.step(ctx) {
                match Self::delivery_target(ctx, id).and_then(|target| self.route_to(ctx, target)) {
                    Some(route) => self.route = route.into(),
                    None => {
                        ctx.hauling.fail(
                            ctx.settlement,
                            id,
                            FailureReason::DestinationUnavailable,
                            ctx.now,
                        );
                        self.reset();
                        return;
                    }
                }
            }
            ctx.settlement.registry.touch(id, ctx.now);
            return;
        }

        self.timer += 1;
        ctx.settlement.registry.touch(id, ctx.now);
        if self.timer < ctx.config.deliver_ticks {
            return;
        }
        self.timer = 0;

        let cargo = ctx
            .settlement
            .registry
            .get(id)
            .and_then(|task| task.payload.cargo());
        let carried = cargo.is_some_and(|(resource, amount)| self.inventory.amount_of(resource) >= amount);
        if !carried {
            warn!("{} reached the drop-off of {id} without its load", self.id);
            ctx.hauling
                .fail(ctx.settlement, id, FailureReason::Interrupted, ctx.now);
            self.reset();
            return;
        }
        if let Ok((resource, amount)) = ctx.hauling.deliver(ctx.settlement, id, ctx.now) {
            if let Err(error) = self.inventory.remove(resource, amount) {
                warn!("{} delivered {id} but could not unload: {error}", self.id);
            }
        }
        self.reset();
    }

    fn build(&mut self, ctx: &mut WorkerContext<'_>) {
        let Some(id) = self.current_task else {
            self.reset();
            return;
        };
        let Some(TaskPayload::Build { site, offset, .. }) = ctx
            .settlement
            .registry
            .get(id)
            .map(|task| task.payload.clone())
        else {
            self.reset();
            return;
        };
        let settlement = &mut *ctx.settlement;
        match settlement.construction.apply_build_work(
            &mut settlement.registry,
            site,
            offset,
            self.work_rate,
            ctx.now,
        ) {
            Ok(BuildProgress::Working) => settlement.registry.touch(id, ctx.now),
            Ok(BuildProgress::TileCompleted | BuildProgress::SiteCompleted) => {
                if let Err(error) = settlement.registry.complete(id, ctx.now) {
                    warn!("{} could not complete {id}: {error}", self.id);
                }
                self.reset();
            }
            Err(error) => {
                warn!("{} stopped building {id}: {error}", self.id);
                if let Err(error) = settlement.registry.fail(id, FailureReason::TargetGone, ctx.now) {
                    warn!("{} could not fail {id}: {error}", self.id);
                }
                self.reset();
            }
        }
    }

    /// Idle with cargo: send it to the nearest stockpile, or put it down
    /// where the worker stands when nothing can take it.
    fn stash_cargo(&mut self, ctx: &mut WorkerContext<'_>) {
        let Some((resource, amount)) = self.inventory.carried() else {
            return;
        };
        if let Some(task) = ctx.hauling.create_redirect_haul(
            ctx.settlement,
            self.id,
            self.position,
            resource,
            amount,
            ctx.now,
        ) {
            if let Some(route) =
                Self::delivery_target(ctx, task).and_then(|target| self.route_to(ctx, target))
            {
                self.current_task = Some(task);
                self.route = route.into();
                self.timer = 0;
                self.state = WorkerState::HaulingDelivery;
                return;
            }
            ctx.hauling
                .fail(ctx.settlement, task, FailureReason::DestinationUnavailable, ctx.now);
        }
        if let Some((resource, amount)) = self.inventory.take_all() {
            debug!("{} drops {amount} {resource} at {}", self.id, self.position);
            ctx.settlement.spawn_drop(self.position, resource, amount);
        }
        self.state = WorkerState::Idle;
    }

    /// Puts everything carried on the ground. Used when the worker leaves.
    pub(crate) fn drop_cargo(&mut self, settlement: &mut Settlement) -> Option<DropId> {
        let (resource, amount) = self.inventory.take_all()?;
        Some(settlement.spawn_drop(self.position, resource, amount))
    }
}
