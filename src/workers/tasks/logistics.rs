use super::{
    components::{
        FailureReason, HaulDestination, HaulSource, HaulStage, Priority, Task, TaskId, TaskPayload,
        TaskStatus,
    },
    mining::MiningEvent,
};
use crate::{
    config::SimulationConfig,
    grid::Position,
    materials::{DropError, DropId, ResourceType},
    structures::{ReservationIntent, SiteId, StockpileError},
    workers::{Settlement, WorkerId},
};
use bevy::log::{debug, warn};
use std::collections::VecDeque;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HaulError {
    ZeroAmount,
    /// Carried cargo is moved with a redirect haul instead.
    CarriedSource,
    SourceMismatch {
        expected: ResourceType,
        found: ResourceType,
    },
    Drop(DropError),
    Stockpile(StockpileError),
    SiteUnavailable(SiteId),
}

impl std::fmt::Display for HaulError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HaulError::ZeroAmount => write!(f, "cannot haul zero units"),
            HaulError::CarriedSource => write!(f, "carried cargo must use a redirect haul"),
            HaulError::SourceMismatch { expected, found } => {
                write!(f, "source holds {found}, not {expected}")
            }
            HaulError::Drop(error) => write!(f, "pickup rejected: {error}"),
            HaulError::Stockpile(error) => write!(f, "stockpile rejected haul: {error}"),
            HaulError::SiteUnavailable(site) => write!(f, "{site} does not take this delivery"),
        }
    }
}

impl std::error::Error for HaulError {}

impl From<DropError> for HaulError {
    fn from(error: DropError) -> Self {
        HaulError::Drop(error)
    }
}

impl From<StockpileError> for HaulError {
    fn from(error: StockpileError) -> Self {
        HaulError::Stockpile(error)
    }
}

/// Moves material between drops, stockpiles, workers and sites. Every haul
/// has its pickup and drop-off reserved before it becomes claimable.
#[derive(Debug, Clone, Copy)]
pub struct HaulingManager {
    haul_priority: Priority,
    redirect_priority: Priority,
    carry_limit: u32,
}

impl Default for HaulingManager {
    fn default() -> Self {
        Self::from_config(&SimulationConfig::default())
    }
}

impl HaulingManager {
    pub fn new(haul_priority: Priority, redirect_priority: Priority, carry_limit: u32) -> Self {
        Self {
            haul_priority,
            redirect_priority,
            carry_limit: carry_limit.max(1),
        }
    }

    /// Loads are capped at what one worker can carry.
    pub fn from_config(config: &SimulationConfig) -> Self {
        Self::new(
            Priority::new(config.priorities.haul),
            Priority::new(config.priorities.redirect),
            config.worker.capacity,
        )
    }

    pub fn create_haul_task(
        &self,
        settlement: &mut Settlement,
        source: HaulSource,
        destination: HaulDestination,
        resource: ResourceType,
        amount: u32,
        now: u64,
    ) -> Result<TaskId, HaulError> {
        if amount == 0 {
            return Err(HaulError::ZeroAmount);
        }
        let pickup = match source {
            HaulSource::Drop(drop) => {
                let record = settlement
                    .drops
                    .get(drop)
                    .ok_or(DropError::NotFound(drop))?;
                if record.resource != resource {
                    return Err(HaulError::SourceMismatch {
                        expected: resource,
                        found: record.resource,
                    });
                }
                record.position
            }
            HaulSource::Stockpile(slot) => settlement
                .stockpiles
                .slot_position(slot)
                .ok_or(StockpileError::NotFound(slot.stockpile))?,
            HaulSource::Carried(_) => return Err(HaulError::CarriedSource),
        };
        if let HaulDestination::Site(site) = destination {
            if !settlement.construction.accepts_delivery(site, resource) {
                return Err(HaulError::SiteUnavailable(site));
            }
        }

        let id = settlement.registry.allocate_id();
        match source {
            HaulSource::Drop(drop) => settlement.drops.reserve(drop, amount)?,
            HaulSource::Stockpile(slot) => settlement.stockpiles.reserve_slot(
                slot,
                id,
                ReservationIntent::Withdraw,
                resource,
                amount,
            )?,
            HaulSource::Carried(_) => {}
        }
        if let HaulDestination::Stockpile(slot) = destination {
            let reserved = settlement.stockpiles.reserve_slot(
                slot,
                id,
                ReservationIntent::Deposit,
                resource,
                amount,
            );
            if let Err(error) = reserved {
                match source {
                    HaulSource::Drop(drop) => settlement.drops.release(drop, amount),
                    HaulSource::Stockpile(from) => {
                        settlement.stockpiles.release_reservation(from, id);
                    }
                    HaulSource::Carried(_) => {}
                }
                return Err(error.into());
            }
        }

        settlement.registry.insert(Task::new(
            id,
            TaskPayload::Haul {
                source,
                destination,
                resource,
                amount,
            },
            pickup,
            self.haul_priority,
            now,
        ));
        Ok(id)
    }

    /// Hauls the unreserved part of one drop to the nearest stockpiles,
    /// splitting by carry limit and slot capacity.
    pub fn haul_drop(&self, settlement: &mut Settlement, drop: DropId, now: u64) -> Vec<TaskId> {
        let mut created = Vec::new();
        while let Some(record) = settlement.drops.get(drop) {
            let (position, resource, unreserved) =
                (record.position, record.resource, record.unreserved());
            if unreserved == 0 {
                break;
            }
            let Some(slot) = settlement
                .stockpiles
                .find_nearest_deposit(position, resource)
            else {
                break;
            };
            let amount = unreserved
                .min(self.carry_limit)
                .min(settlement.stockpiles.free_capacity(slot));
            match self.create_haul_task(
                settlement,
                HaulSource::Drop(drop),
                HaulDestination::Stockpile(slot),
                resource,
                amount,
                now,
            ) {
                Ok(task) => created.push(task),
                Err(error) => {
                    debug!("Could not haul {drop}: {error}");
                    break;
                }
            }
        }
        created
    }

    /// Creates hauls for every drop with unclaimed material.
    pub fn haul_loose_drops(&self, settlement: &mut Settlement, now: u64) -> Vec<TaskId> {
        let loose: Vec<DropId> = settlement.drops.unclaimed().map(|drop| drop.id).collect();
        loose
            .into_iter()
            .flat_map(|drop| self.haul_drop(settlement, drop, now))
            .collect()
    }

    pub fn on_mining_event(
        &self,
        settlement: &mut Settlement,
        event: &MiningEvent,
        now: u64,
    ) -> Vec<TaskId> {
        match event {
            MiningEvent::TileMined { drops, .. } => drops
                .iter()
                .flat_map(|(drop, _, _)| self.haul_drop(settlement, *drop, now))
                .collect(),
        }
    }

    /// Binds unsourced `Deliver` tasks to stockpile slots. When the nearest
    /// slot cannot cover a delivery, the task is shrunk to what it holds and
    /// the rest is split into a new delivery sourced the same way.
    pub fn source_deliveries(&self, settlement: &mut Settlement, now: u64) -> usize {
        let mut queue: VecDeque<TaskId> = settlement
            .registry
            .iter()
            .filter(|task| {
                task.status == TaskStatus::Pending
                    && matches!(task.payload, TaskPayload::Deliver { source: None, .. })
                    && settlement.construction.is_claimable(task)
            })
            .map(|task| task.id)
            .collect();

        let mut sourced = 0;
        while let Some(id) = queue.pop_front() {
            let Some(task) = settlement.registry.get(id) else {
                continue;
            };
            let priority = task.priority;
            let TaskPayload::Deliver {
                site,
                resource,
                amount,
                source: None,
            } = task.payload
            else {
                continue;
            };
            let Some(site_position) = settlement.construction.get(site).map(|record| record.position)
            else {
                continue;
            };
            let Some((slot, available)) = settlement
                .stockpiles
                .find_nearest_withdraw(site_position, resource)
            else {
                continue;
            };

            let take = amount.min(available).min(self.carry_limit);
            if let Err(error) = settlement.stockpiles.reserve_slot(
                slot,
                id,
                ReservationIntent::Withdraw,
                resource,
                take,
            ) {
                debug!("Could not source {id}: {error}");
                continue;
            }
            let pickup = settlement
                .stockpiles
                .slot_position(slot)
                .unwrap_or(site_position);
            if !settlement.registry.source_delivery(id, slot, take, pickup) {
                settlement.stockpiles.release_reservation(slot, id);
                continue;
            }
            sourced += 1;

            if take < amount {
                let rest = settlement.registry.create(
                    TaskPayload::Deliver {
                        site,
                        resource,
                        amount: amount - take,
                        source: None,
                    },
                    site_position,
                    priority,
                    now,
                );
                debug!("Split {id}: {take} from {slot}, {} left in {rest}", amount - take);
                queue.push_back(rest);
            }
        }
        sourced
    }

    /// Sends cargo a worker already holds to the nearest stockpile. The task
    /// is claimed by the worker and already under way when returned; `None`
    /// means no stockpile can take any of it.
    pub fn create_redirect_haul(
        &self,
        settlement: &mut Settlement,
        worker: WorkerId,
        position: Position,
        resource: ResourceType,
        amount: u32,
        now: u64,
    ) -> Option<TaskId> {
        let slot = settlement
            .stockpiles
            .find_nearest_deposit(position, resource)?;
        let amount = amount.min(settlement.stockpiles.free_capacity(slot));
        if amount == 0 {
            return None;
        }
        let id = settlement.registry.allocate_id();
        settlement
            .stockpiles
            .reserve_slot(slot, id, ReservationIntent::Deposit, resource, amount)
            .ok()?;
        settlement.registry.insert(Task::new(
            id,
            TaskPayload::Haul {
                source: HaulSource::Carried(worker),
                destination: HaulDestination::Stockpile(slot),
                resource,
                amount,
            },
            position,
            self.redirect_priority,
            now,
        ));
        let started = settlement
            .registry
            .try_claim(id, worker, now)
            .map_err(|error| error.to_string())
            .and_then(|()| settlement.registry.start(id, now).map_err(|error| error.to_string()));
        if let Err(error) = started {
            warn!("Redirect {id} for {worker} could not start: {error}");
            settlement.stockpiles.release_reservation(slot, id);
            if let Err(error) = settlement.registry.cancel(id, now) {
                warn!("Could not cancel redirect {id}: {error}");
            }
            return None;
        }
        settlement
            .registry
            .set_haul_stage(id, HaulStage::TravelingToDelivery, now);
        debug!("{worker} redirecting {amount} {resource} to {slot}");
        Some(id)
    }

    /// Where a transport task drops its load.
    pub fn delivery_position(&self, settlement: &Settlement, task: &Task) -> Option<Position> {
        match &task.payload {
            TaskPayload::Haul {
                destination: HaulDestination::Stockpile(slot),
                ..
            } => settlement.stockpiles.slot_position(*slot),
            TaskPayload::Haul {
                destination: HaulDestination::Site(site),
                ..
            }
            | TaskPayload::Deliver { site, .. } => {
                settlement.construction.get(*site).map(|record| record.position)
            }
            TaskPayload::Mine { .. } | TaskPayload::Build { .. } => None,
        }
    }

    /// Takes the reserved load off its source. A vanished source fails the
    /// task and releases its remaining reservations.
    pub fn pickup(
        &self,
        settlement: &mut Settlement,
        task: TaskId,
        now: u64,
    ) -> Result<(ResourceType, u32), FailureReason> {
        let Some(payload) = settlement.registry.get(task).map(|record| record.payload.clone())
        else {
            return Err(FailureReason::PickupVanished);
        };
        let taken = match payload {
            TaskPayload::Haul {
                source: HaulSource::Drop(drop),
                resource,
                amount,
                ..
            } => settlement
                .drops
                .take_reserved(drop, amount)
                .map(|()| (resource, amount))
                .map_err(|error| error.to_string()),
            TaskPayload::Haul {
                source: HaulSource::Stockpile(slot),
                amount,
                ..
            }
            | TaskPayload::Deliver {
                source: Some(slot),
                amount,
                ..
            } => settlement
                .stockpiles
                .withdraw(slot, task, amount)
                .map_err(|error| error.to_string()),
            TaskPayload::Haul {
                source: HaulSource::Carried(_),
                resource,
                amount,
                ..
            } => Ok((resource, amount)),
            TaskPayload::Deliver { source: None, .. }
            | TaskPayload::Mine { .. }
            | TaskPayload::Build { .. } => Err(format!("{task} has nothing to pick up")),
        };

        match taken {
            Ok(cargo) => {
                settlement
                    .registry
                    .set_haul_stage(task, HaulStage::TravelingToDelivery, now);
                Ok(cargo)
            }
            Err(error) => {
                warn!("Pickup for {task} vanished: {error}");
                self.fail(settlement, task, FailureReason::PickupVanished, now);
                Err(FailureReason::PickupVanished)
            }
        }
    }

    /// Hands the load to its destination and completes the task. On failure
    /// the task is failed and the caller keeps the cargo.
    pub fn deliver(
        &self,
        settlement: &mut Settlement,
        task: TaskId,
        now: u64,
    ) -> Result<(ResourceType, u32), FailureReason> {
        let Some(payload) = settlement.registry.get(task).map(|record| record.payload.clone())
        else {
            return Err(FailureReason::DestinationUnavailable);
        };
        settlement
            .registry
            .set_haul_stage(task, HaulStage::Delivering, now);
        let delivered = match payload {
            TaskPayload::Haul {
                destination: HaulDestination::Stockpile(slot),
                resource,
                amount,
                ..
            } => settlement
                .stockpiles
                .deposit(slot, task, resource, amount)
                .map(|()| (resource, amount))
                .map_err(|error| error.to_string()),
            TaskPayload::Haul {
                destination: HaulDestination::Site(site),
                resource,
                amount,
                ..
            }
            | TaskPayload::Deliver {
                site,
                resource,
                amount,
                ..
            } => settlement
                .construction
                .record_delivery(&mut settlement.registry, site, resource, amount, now)
                .map(|()| (resource, amount))
                .map_err(|error| error.to_string()),
            TaskPayload::Mine { .. } | TaskPayload::Build { .. } => {
                Err(format!("{task} carries nothing"))
            }
        };

        match delivered {
            Ok(cargo) => {
                if let Err(error) = settlement.registry.complete(task, now) {
                    warn!("Delivered {task} but could not complete it: {error}");
                }
                Ok(cargo)
            }
            Err(error) => {
                warn!("Delivery for {task} refused: {error}");
                self.fail(settlement, task, FailureReason::DestinationUnavailable, now);
                Err(FailureReason::DestinationUnavailable)
            }
        }
    }

    pub fn fail(&self, settlement: &mut Settlement, task: TaskId, reason: FailureReason, now: u64) {
        if let Err(error) = settlement.registry.fail(task, reason, now) {
            warn!("Could not fail {task}: {error}");
        }
        self.release_holds(settlement, task);
    }

    /// Releases every reservation a task still holds. Drop reservations are
    /// only returned while the load has not been picked up.
    pub fn release_holds(&self, settlement: &mut Settlement, task: TaskId) {
        let Some(record) = settlement.registry.get(task) else {
            return;
        };
        let loaded = record.haul_stage.is_some_and(HaulStage::is_loaded);
        if let TaskPayload::Haul {
            source: HaulSource::Drop(drop),
            amount,
            ..
        } = record.payload
        {
            if !loaded {
                settlement.drops.release(drop, amount);
            }
        }
        settlement.stockpiles.release_all_for(task);
    }
}
