use crate::{
    config::SimulationConfig,
    events::{EventQueue, SettlementEvent},
    grid::{Position, Region, TileWorld},
    materials::{ResourceCategory, ResourceType},
    workers::TaskId,
};
use bevy::log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StockpileId(pub u32);

impl std::fmt::Display for StockpileId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "stockpile#{}", self.0)
    }
}

pub type SlotIndex = usize;

/// Address of one slot inside one stockpile.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SlotRef {
    pub stockpile: StockpileId,
    pub slot: SlotIndex,
}

impl SlotRef {
    pub fn new(stockpile: StockpileId, slot: SlotIndex) -> Self {
        Self { stockpile, slot }
    }
}

impl std::fmt::Display for SlotRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}[{}]", self.stockpile, self.slot)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReservationIntent {
    Withdraw,
    Deposit,
}

/// Hold on part of a slot's contents or part of its free capacity, owned
/// by one task. A deposit hold is exclusive; withdraw holds may share a slot
/// while their total stays within its contents.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotReservation {
    pub task: TaskId,
    pub intent: ReservationIntent,
    pub resource: ResourceType,
    pub amount: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockpileSlot {
    pub position: Position,
    pub resource: Option<ResourceType>,
    pub amount: u32,
    pub reservations: Vec<SlotReservation>,
}

impl StockpileSlot {
    fn empty(position: Position) -> Self {
        Self {
            position,
            resource: None,
            amount: 0,
            reservations: Vec::new(),
        }
    }

    pub fn reserved(&self) -> bool {
        !self.reservations.is_empty()
    }

    pub fn is_held_by(&self, task: TaskId) -> bool {
        self.held_by(task).is_some()
    }

    pub fn holders(&self) -> impl Iterator<Item = TaskId> + '_ {
        self.reservations.iter().map(|reservation| reservation.task)
    }

    fn held_by(&self, task: TaskId) -> Option<SlotReservation> {
        self.reservations
            .iter()
            .copied()
            .find(|reservation| reservation.task == task)
    }

    pub fn deposit_hold(&self) -> Option<SlotReservation> {
        self.reservations
            .iter()
            .copied()
            .find(|reservation| reservation.intent == ReservationIntent::Deposit)
    }

    /// Contents promised to withdrawing tasks.
    pub fn withdraw_reserved(&self) -> u32 {
        self.reservations
            .iter()
            .filter(|reservation| reservation.intent == ReservationIntent::Withdraw)
            .map(|reservation| reservation.amount)
            .sum()
    }

    /// Contents not promised to a withdrawing task.
    pub fn unreserved_amount(&self) -> u32 {
        self.amount.saturating_sub(self.withdraw_reserved())
    }

    fn holds_compatible(&self, resource: ResourceType) -> bool {
        self.resource.is_none_or(|held| held == resource)
    }

    fn free_capacity(&self, stack_limit: u32) -> u32 {
        let pending = self.deposit_hold().map_or(0, |reservation| reservation.amount);
        stack_limit.saturating_sub(self.amount + pending)
    }

    fn release(&mut self, task: TaskId) -> bool {
        let before = self.reservations.len();
        self.reservations.retain(|reservation| reservation.task != task);
        self.reservations.len() != before
    }

    /// Trims withdraw holds, newest first, until they fit the contents.
    fn shrink_withdraw_holds(&mut self) {
        let mut excess = self.withdraw_reserved().saturating_sub(self.amount);
        for reservation in self.reservations.iter_mut().rev() {
            if excess == 0 {
                break;
            }
            if reservation.intent != ReservationIntent::Withdraw {
                continue;
            }
            let cut = excess.min(reservation.amount);
            reservation.amount -= cut;
            excess -= cut;
        }
        self.reservations.retain(|reservation| reservation.amount > 0);
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stockpile {
    pub id: StockpileId,
    pub bounds: Region,
    pub allowed: BTreeSet<ResourceCategory>,
    pub slots: Vec<StockpileSlot>,
}

impl Stockpile {
    pub fn accepts(&self, resource: ResourceType) -> bool {
        self.allowed.contains(&resource.category())
    }

    pub fn slot(&self, index: SlotIndex) -> Option<&StockpileSlot> {
        self.slots.get(index)
    }

    pub fn total_of(&self, resource: ResourceType) -> u32 {
        self.slots
            .iter()
            .filter(|slot| slot.resource == Some(resource))
            .map(|slot| slot.amount)
            .sum()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StockpileError {
    NotFound(StockpileId),
    SlotOutOfRange(SlotRef),
    OutOfBounds(Position),
    Overlap(Position),
    Unwalkable(Position),
    NoAllowedCategories,
    ResourceNotAllowed {
        stockpile: StockpileId,
        resource: ResourceType,
    },
    IncompatibleSlot {
        slot: SlotRef,
        held: Option<ResourceType>,
        requested: ResourceType,
    },
    ReservedByOther {
        slot: SlotRef,
        holder: TaskId,
    },
    NotReservedBy {
        slot: SlotRef,
        task: TaskId,
    },
    Insufficient {
        slot: SlotRef,
        requested: u32,
        available: u32,
    },
    ZeroAmount,
}

impl std::fmt::Display for StockpileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StockpileError::NotFound(id) => write!(f, "{id} does not exist"),
            StockpileError::SlotOutOfRange(slot) => write!(f, "{slot} is not a valid slot"),
            StockpileError::OutOfBounds(position) => {
                write!(f, "stockpile tile {position} is outside the world")
            }
            StockpileError::Overlap(position) => {
                write!(f, "tile {position} is already used by another structure")
            }
            StockpileError::Unwalkable(position) => {
                write!(f, "tile {position} is not open ground")
            }
            StockpileError::NoAllowedCategories => {
                write!(f, "a stockpile must accept at least one resource category")
            }
            StockpileError::ResourceNotAllowed {
                stockpile,
                resource,
            } => write!(f, "{stockpile} does not accept {resource}"),
            StockpileError::IncompatibleSlot {
                slot,
                held,
                requested,
            } => match held {
                Some(held) => write!(f, "{slot} holds {held}, not {requested}"),
                None => write!(f, "{slot} holds nothing to withdraw as {requested}"),
            },
            StockpileError::ReservedByOther { slot, holder } => {
                write!(f, "{slot} is reserved by {holder}")
            }
            StockpileError::NotReservedBy { slot, task } => {
                write!(f, "{slot} has no reservation held by {task}")
            }
            StockpileError::Insufficient {
                slot,
                requested,
                available,
            } => write!(f, "{slot} can cover {available} of the requested {requested}"),
            StockpileError::ZeroAmount => write!(f, "amount must be greater than zero"),
        }
    }
}

impl std::error::Error for StockpileError {}

/// Owner of every stockpile and the only place slot contents change.
#[derive(Debug)]
pub struct StockpileManager {
    next_id: u32,
    stack_limit: u32,
    stockpiles: BTreeMap<StockpileId, Stockpile>,
    events: EventQueue,
}

impl Default for StockpileManager {
    fn default() -> Self {
        Self::new(SimulationConfig::default().slot_stack_limit)
    }
}

impl StockpileManager {
    pub fn new(stack_limit: u32) -> Self {
        Self {
            next_id: 0,
            stack_limit: stack_limit.max(1),
            stockpiles: BTreeMap::new(),
            events: EventQueue::default(),
        }
    }

    pub fn stack_limit(&self) -> u32 {
        self.stack_limit
    }

    pub fn create_stockpile(
        &mut self,
        world: &mut TileWorld,
        bounds: Region,
        allowed: impl IntoIterator<Item = ResourceCategory>,
    ) -> Result<StockpileId, StockpileError> {
        let allowed: BTreeSet<_> = allowed.into_iter().collect();
        if allowed.is_empty() {
            return Err(StockpileError::NoAllowedCategories);
        }
        for position in bounds.positions() {
            if !world.in_bounds(position) {
                return Err(StockpileError::OutOfBounds(position));
            }
            if world.is_occupied(position) {
                return Err(StockpileError::Overlap(position));
            }
            if !world.is_walkable(position) {
                return Err(StockpileError::Unwalkable(position));
            }
        }

        self.next_id += 1;
        let id = StockpileId(self.next_id);
        let slots = bounds
            .positions()
            .map(|position| {
                world.occupy(position);
                StockpileSlot::empty(position)
            })
            .collect::<Vec<_>>();
        info!(
            "Created {id} with {} slots at {}..{}",
            slots.len(),
            bounds.min,
            bounds.max
        );
        self.stockpiles.insert(
            id,
            Stockpile {
                id,
                bounds,
                allowed,
                slots,
            },
        );
        self.events
            .push(SettlementEvent::StockpileChanged { stockpile: id });
        Ok(id)
    }

    /// Removes a stockpile and frees its tiles. The returned record still
    /// holds the contents and reservations so the caller can settle them.
    pub fn remove_stockpile(
        &mut self,
        world: &mut TileWorld,
        id: StockpileId,
    ) -> Result<Stockpile, StockpileError> {
        let stockpile = self
            .stockpiles
            .remove(&id)
            .ok_or(StockpileError::NotFound(id))?;
        for slot in &stockpile.slots {
            world.vacate(slot.position);
        }
        info!("Removed {id}");
        self.events
            .push(SettlementEvent::StockpileChanged { stockpile: id });
        Ok(stockpile)
    }

    pub fn get(&self, id: StockpileId) -> Option<&Stockpile> {
        self.stockpiles.get(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Stockpile> {
        self.stockpiles.values()
    }

    pub fn len(&self) -> usize {
        self.stockpiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stockpiles.is_empty()
    }

    pub fn slot(&self, slot: SlotRef) -> Option<&StockpileSlot> {
        self.stockpiles
            .get(&slot.stockpile)
            .and_then(|stockpile| stockpile.slots.get(slot.slot))
    }

    pub fn slot_position(&self, slot: SlotRef) -> Option<Position> {
        self.slot(slot).map(|slot| slot.position)
    }

    fn slot_mut(&mut self, slot: SlotRef) -> Result<&mut StockpileSlot, StockpileError> {
        self.stockpiles
            .get_mut(&slot.stockpile)
            .ok_or(StockpileError::NotFound(slot.stockpile))?
            .slots
            .get_mut(slot.slot)
            .ok_or(StockpileError::SlotOutOfRange(slot))
    }

    /// Room left in a slot after pending deposits.
    pub fn free_capacity(&self, slot: SlotRef) -> u32 {
        self.slot(slot)
            .map_or(0, |slot| slot.free_capacity(self.stack_limit))
    }

    pub fn total_of(&self, resource: ResourceType) -> u32 {
        self.stockpiles
            .values()
            .map(|stockpile| stockpile.total_of(resource))
            .sum()
    }

    /// Every active reservation, in stockpile then slot order.
    pub fn reservations(&self) -> impl Iterator<Item = (SlotRef, SlotReservation)> + '_ {
        self.stockpiles.values().flat_map(|stockpile| {
            stockpile
                .slots
                .iter()
                .enumerate()
                .flat_map(move |(index, slot)| {
                    slot.reservations
                        .iter()
                        .map(move |reservation| (SlotRef::new(stockpile.id, index), *reservation))
                })
        })
    }

    /// Nearest unreserved slot that can take at least one unit of `resource`.
    pub fn find_nearest_deposit(&self, from: Position, resource: ResourceType) -> Option<SlotRef> {
        self.nearest_slot(from, |stockpile, slot| {
            stockpile.accepts(resource)
                && !slot.reserved()
                && slot.holds_compatible(resource)
                && slot.free_capacity(self.stack_limit) > 0
        })
        .map(|(slot, _)| slot)
    }

    /// Nearest slot with unreserved `resource`, with the amount still free
    /// to withdraw.
    pub fn find_nearest_withdraw(
        &self,
        from: Position,
        resource: ResourceType,
    ) -> Option<(SlotRef, u32)> {
        self.nearest_slot(from, |stockpile, slot| {
            stockpile.accepts(resource)
                && slot.deposit_hold().is_none()
                && slot.resource == Some(resource)
                && slot.unreserved_amount() > 0
        })
    }

    fn nearest_slot(
        &self,
        from: Position,
        filter: impl Fn(&Stockpile, &StockpileSlot) -> bool,
    ) -> Option<(SlotRef, u32)> {
        self.stockpiles
            .values()
            .flat_map(|stockpile| {
                let filter = &filter;
                stockpile
                    .slots
                    .iter()
                    .enumerate()
                    .filter(move |(_, slot)| filter(stockpile, slot))
                    .map(move |(index, slot)| {
                        (
                            from.manhattan_distance(slot.position),
                            SlotRef::new(stockpile.id, index),
                            slot.unreserved_amount(),
                        )
                    })
            })
            .min_by_key(|(distance, slot, _)| (*distance, *slot))
            .map(|(_, slot, amount)| (slot, amount))
    }

    /// Idempotent for the holder. A deposit needs the slot to itself; a
    /// withdraw only conflicts with another task's deposit.
    pub fn reserve_slot(
        &mut self,
        slot_ref: SlotRef,
        task: TaskId,
        intent: ReservationIntent,
        resource: ResourceType,
        amount: u32,
    ) -> Result<(), StockpileError> {
        if amount == 0 {
            return Err(StockpileError::ZeroAmount);
        }
        let stack_limit = self.stack_limit;
        let stockpile = self
            .stockpiles
            .get_mut(&slot_ref.stockpile)
            .ok_or(StockpileError::NotFound(slot_ref.stockpile))?;
        if !stockpile.accepts(resource) {
            return Err(StockpileError::ResourceNotAllowed {
                stockpile: stockpile.id,
                resource,
            });
        }
        let slot = stockpile
            .slots
            .get_mut(slot_ref.slot)
            .ok_or(StockpileError::SlotOutOfRange(slot_ref))?;

        if slot.is_held_by(task) {
            return Ok(());
        }
        let conflict = match intent {
            ReservationIntent::Deposit => slot.holders().next(),
            ReservationIntent::Withdraw => slot.deposit_hold().map(|reservation| reservation.task),
        };
        if let Some(holder) = conflict {
            return Err(StockpileError::ReservedByOther {
                slot: slot_ref,
                holder,
            });
        }

        let available = match intent {
            ReservationIntent::Withdraw => {
                if slot.resource != Some(resource) {
                    return Err(StockpileError::IncompatibleSlot {
                        slot: slot_ref,
                        held: slot.resource,
                        requested: resource,
                    });
                }
                slot.unreserved_amount()
            }
            ReservationIntent::Deposit => {
                if !slot.holds_compatible(resource) {
                    return Err(StockpileError::IncompatibleSlot {
                        slot: slot_ref,
                        held: slot.resource,
                        requested: resource,
                    });
                }
                slot.free_capacity(stack_limit)
            }
        };
        if amount > available {
            return Err(StockpileError::Insufficient {
                slot: slot_ref,
                requested: amount,
                available,
            });
        }

        slot.reservations.push(SlotReservation {
            task,
            intent,
            resource,
            amount,
        });
        debug!("{task} reserved {amount} {resource} at {slot_ref} ({intent:?})");
        Ok(())
    }

    /// Releasing an unreserved slot, a missing slot or another task's
    /// reservation is a no-op. Returns whether anything was released.
    pub fn release_reservation(&mut self, slot_ref: SlotRef, task: TaskId) -> bool {
        let Ok(slot) = self.slot_mut(slot_ref) else {
            return false;
        };
        let released = slot.release(task);
        if released {
            debug!("{task} released {slot_ref}");
        }
        released
    }

    /// Releases every reservation held by `task`.
    pub fn release_all_for(&mut self, task: TaskId) -> usize {
        let held: Vec<_> = self
            .reservations()
            .filter(|(_, reservation)| reservation.task == task)
            .map(|(slot, _)| slot)
            .collect();
        for slot in &held {
            self.release_reservation(*slot, task);
        }
        held.len()
    }

    /// Drops reservations whose task fails `keep`.
    pub(crate) fn retain_reservations(&mut self, keep: impl Fn(TaskId) -> bool) -> usize {
        let mut released = 0;
        for slot in self
            .stockpiles
            .values_mut()
            .flat_map(|stockpile| stockpile.slots.iter_mut())
        {
            let before = slot.reservations.len();
            slot.reservations.retain(|reservation| keep(reservation.task));
            released += before - slot.reservations.len();
        }
        released
    }

    /// Adds material under the caller's deposit reservation, then releases it.
    pub fn deposit(
        &mut self,
        slot_ref: SlotRef,
        task: TaskId,
        resource: ResourceType,
        amount: u32,
    ) -> Result<(), StockpileError> {
        let slot = self.slot_mut(slot_ref)?;
        let reservation = match slot.held_by(task) {
            Some(
                reservation @ SlotReservation {
                    intent: ReservationIntent::Deposit,
                    ..
                },
            ) => reservation,
            _ => return Err(StockpileError::NotReservedBy { slot: slot_ref, task }),
        };
        if reservation.resource != resource || !slot.holds_compatible(resource) {
            return Err(StockpileError::IncompatibleSlot {
                slot: slot_ref,
                held: slot.resource,
                requested: resource,
            });
        }
        if amount > reservation.amount {
            return Err(StockpileError::Insufficient {
                slot: slot_ref,
                requested: amount,
                available: reservation.amount,
            });
        }

        slot.amount += amount;
        slot.resource = Some(resource);
        slot.release(task);
        debug!("{task} deposited {amount} {resource} into {slot_ref}");
        self.events.push(SettlementEvent::StockpileChanged {
            stockpile: slot_ref.stockpile,
        });
        Ok(())
    }

    /// Removes material under the caller's withdraw reservation, then
    /// releases it. Fails if the contents shrank below the request.
    pub fn withdraw(
        &mut self,
        slot_ref: SlotRef,
        task: TaskId,
        amount: u32,
    ) -> Result<(ResourceType, u32), StockpileError> {
        let slot = self.slot_mut(slot_ref)?;
        let reservation = match slot.held_by(task) {
            Some(
                reservation @ SlotReservation {
                    intent: ReservationIntent::Withdraw,
                    ..
                },
            ) => reservation,
            _ => return Err(StockpileError::NotReservedBy { slot: slot_ref, task }),
        };
        if slot.resource != Some(reservation.resource) {
            return Err(StockpileError::IncompatibleSlot {
                slot: slot_ref,
                held: slot.resource,
                requested: reservation.resource,
            });
        }
        let available = slot.amount.min(reservation.amount);
        if amount > available {
            return Err(StockpileError::Insufficient {
                slot: slot_ref,
                requested: amount,
                available,
            });
        }

        slot.amount -= amount;
        if slot.amount == 0 {
            slot.resource = None;
        }
        slot.release(task);
        debug!("{task} withdrew {amount} {} from {slot_ref}", reservation.resource);
        self.events.push(SettlementEvent::StockpileChanged {
            stockpile: slot_ref.stockpile,
        });
        Ok((reservation.resource, amount))
    }

    /// Places material without a reservation. Used for seeding and by
    /// external producers; respects capacity held for pending deposits.
    pub fn store_directly(
        &mut self,
        slot_ref: SlotRef,
        resource: ResourceType,
        amount: u32,
    ) -> Result<(), StockpileError> {
        if amount == 0 {
            return Err(StockpileError::ZeroAmount);
        }
        let stack_limit = self.stack_limit;
        let stockpile = self
            .stockpiles
            .get_mut(&slot_ref.stockpile)
            .ok_or(StockpileError::NotFound(slot_ref.stockpile))?;
        if !stockpile.accepts(resource) {
            return Err(StockpileError::ResourceNotAllowed {
                stockpile: stockpile.id,
                resource,
            });
        }
        let slot = stockpile
            .slots
            .get_mut(slot_ref.slot)
            .ok_or(StockpileError::SlotOutOfRange(slot_ref))?;
        let deposit_pending = slot.deposit_hold();
        if !slot.holds_compatible(resource)
            || deposit_pending.is_some_and(|reservation| reservation.resource != resource)
        {
            return Err(StockpileError::IncompatibleSlot {
                slot: slot_ref,
                held: slot.resource,
                requested: resource,
            });
        }
        let capacity = slot.free_capacity(stack_limit);
        if amount > capacity {
            return Err(StockpileError::Insufficient {
                slot: slot_ref,
                requested: amount,
                available: capacity,
            });
        }

        slot.amount += amount;
        slot.resource = Some(resource);
        self.events.push(SettlementEvent::StockpileChanged {
            stockpile: slot_ref.stockpile,
        });
        Ok(())
    }

    /// External removal (theft, decay). Withdraw holds are cut back to what
    /// is left; a holder that lost its share fails when it tries to withdraw.
    pub fn remove_contents(&mut self, slot_ref: SlotRef, amount: u32) -> Result<u32, StockpileError> {
        let slot = self.slot_mut(slot_ref)?;
        let removed = amount.min(slot.amount);
        slot.amount -= removed;
        if slot.amount == 0 {
            slot.resource = None;
        }
        slot.shrink_withdraw_holds();
        if removed > 0 {
            self.events.push(SettlementEvent::StockpileChanged {
                stockpile: slot_ref.stockpile,
            });
        }
        Ok(removed)
    }

    pub fn drain_events(&mut self) -> impl Iterator<Item = SettlementEvent> + '_ {
        self.events.drain()
    }

    pub(crate) fn next_id(&self) -> u32 {
        self.next_id
    }

    /// Replaces every stockpile and re-occupies their tiles.
    pub(crate) fn restore(&mut self, world: &mut TileWorld, next_id: u32, stockpiles: Vec<Stockpile>) {
        for stockpile in self.stockpiles.values() {
            for slot in &stockpile.slots {
                world.vacate(slot.position);
            }
        }
        self.stockpiles = stockpiles
            .into_iter()
            .map(|stockpile| {
                for slot in &stockpile.slots {
                    world.occupy(slot.position);
                }
                (stockpile.id, stockpile)
            })
            .collect();
        self.next_id = self
            .stockpiles
            .keys()
            .map(|id| id.0)
            .max()
            .unwrap_or(0)
            .max(next_id);
        self.events.clear();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::grid::{Tile, TileKind};

    fn manager_with_pile(
        origin: Position,
        width: u32,
        allowed: &[ResourceCategory],
    ) -> (StockpileManager, TileWorld, StockpileId) {
        let mut world = TileWorld::new(20, 20);
        let mut manager = StockpileManager::new(100);
        let id = manager
            .create_stockpile(
                &mut world,
                Region::from_size(origin, width, 1),
                allowed.iter().copied(),
            )
            .unwrap();
        (manager, world, id)
    }

    #[test]
    fn create_rejects_out_of_bounds_and_overlap() {
        let (mut manager, mut world, _) =
            manager_with_pile(Position::new(0, 0), 2, &[ResourceCategory::Stone]);

        let outside = manager.create_stockpile(
            &mut world,
            Region::from_size(Position::new(19, 0), 2, 1),
            [ResourceCategory::Stone],
        );
        let overlapping = manager.create_stockpile(
            &mut world,
            Region::from_size(Position::new(1, 0), 2, 1),
            [ResourceCategory::Stone],
        );

        assert_eq!(outside, Err(StockpileError::OutOfBounds(Position::new(20, 0))));
        assert_eq!(overlapping, Err(StockpileError::Overlap(Position::new(1, 0))));
    }

    #[test]
    fn create_rejects_rock_tiles() {
        let mut world = TileWorld::new(5, 5);
        world.set_tile(Position::new(2, 2), Tile::new(TileKind::Rock));
        let mut manager = StockpileManager::default();

        let result = manager.create_stockpile(
            &mut world,
            Region::single(Position::new(2, 2)),
            [ResourceCategory::Stone],
        );

        assert_eq!(result, Err(StockpileError::Unwalkable(Position::new(2, 2))));
    }

    #[test]
    fn deposit_search_filters_by_category() {
        let (manager, _, _) = manager_with_pile(Position::new(0, 0), 2, &[ResourceCategory::Wood]);

        assert!(manager
            .find_nearest_deposit(Position::new(5, 5), ResourceType::Stone)
            .is_none());
        assert!(manager
            .find_nearest_deposit(Position::new(5, 5), ResourceType::Wood)
            .is_some());
    }

    #[test]
    fn nearest_deposit_ties_break_on_lowest_id() {
        let mut world = TileWorld::new(20, 20);
        let mut manager = StockpileManager::default();
        let first = manager
            .create_stockpile(&mut world, Region::single(Position::new(4, 5)), [ResourceCategory::Stone])
            .unwrap();
        manager
            .create_stockpile(&mut world, Region::single(Position::new(6, 5)), [ResourceCategory::Stone])
            .unwrap();

        let found = manager
            .find_nearest_deposit(Position::new(5, 5), ResourceType::Stone)
            .unwrap();

        assert_eq!(found, SlotRef::new(first, 0));
    }

    #[test]
    fn reserve_is_idempotent_for_holder_and_exclusive_for_others() {
        let (mut manager, _, id) = manager_with_pile(Position::new(0, 0), 1, &[ResourceCategory::Stone]);
        let slot = SlotRef::new(id, 0);

        manager
            .reserve_slot(slot, TaskId(1), ReservationIntent::Deposit, ResourceType::Stone, 10)
            .unwrap();
        manager
            .reserve_slot(slot, TaskId(1), ReservationIntent::Deposit, ResourceType::Stone, 10)
            .unwrap();
        let conflict =
            manager.reserve_slot(slot, TaskId(2), ReservationIntent::Deposit, ResourceType::Stone, 5);

        assert_eq!(
            conflict,
            Err(StockpileError::ReservedByOther {
                slot,
                holder: TaskId(1)
            })
        );
    }

    #[test]
    fn release_twice_is_a_no_op() {
        let (mut manager, _, id) = manager_with_pile(Position::new(0, 0), 1, &[ResourceCategory::Stone]);
        let slot = SlotRef::new(id, 0);
        manager
            .reserve_slot(slot, TaskId(1), ReservationIntent::Deposit, ResourceType::Stone, 10)
            .unwrap();

        assert!(manager.release_reservation(slot, TaskId(1)));
        assert!(!manager.release_reservation(slot, TaskId(1)));
        assert!(!manager.slot(slot).unwrap().reserved());
    }

    #[test]
    fn release_by_other_task_leaves_reservation() {
        let (mut manager, _, id) = manager_with_pile(Position::new(0, 0), 1, &[ResourceCategory::Stone]);
        let slot = SlotRef::new(id, 0);
        manager
            .reserve_slot(slot, TaskId(1), ReservationIntent::Deposit, ResourceType::Stone, 10)
            .unwrap();

        assert!(!manager.release_reservation(slot, TaskId(7)));
        assert!(manager.slot(slot).unwrap().is_held_by(TaskId(1)));
    }

    #[test]
    fn deposit_requires_matching_reservation() {
        let (mut manager, _, id) = manager_with_pile(Position::new(0, 0), 1, &[ResourceCategory::Stone]);
        let slot = SlotRef::new(id, 0);

        let unreserved = manager.deposit(slot, TaskId(1), ResourceType::Stone, 3);
        assert_eq!(
            unreserved,
            Err(StockpileError::NotReservedBy {
                slot,
                task: TaskId(1)
            })
        );

        manager
            .reserve_slot(slot, TaskId(1), ReservationIntent::Deposit, ResourceType::Stone, 3)
            .unwrap();
        manager.deposit(slot, TaskId(1), ResourceType::Stone, 3).unwrap();

        let stored = manager.slot(slot).unwrap();
        assert_eq!(stored.amount, 3);
        assert_eq!(stored.resource, Some(ResourceType::Stone));
        assert!(!stored.reserved());
    }

    #[test]
    fn withdraw_reservation_cannot_exceed_contents() {
        let (mut manager, _, id) = manager_with_pile(Position::new(0, 0), 1, &[ResourceCategory::Wood]);
        let slot = SlotRef::new(id, 0);
        manager.store_directly(slot, ResourceType::Wood, 20).unwrap();

        let too_much =
            manager.reserve_slot(slot, TaskId(1), ReservationIntent::Withdraw, ResourceType::Wood, 21);
        assert!(matches!(too_much, Err(StockpileError::Insufficient { .. })));

        manager
            .reserve_slot(slot, TaskId(1), ReservationIntent::Withdraw, ResourceType::Wood, 15)
            .unwrap();
        assert_eq!(manager.slot(slot).unwrap().unreserved_amount(), 5);

        let taken = manager.withdraw(slot, TaskId(1), 15).unwrap();
        assert_eq!(taken, (ResourceType::Wood, 15));
        assert_eq!(manager.total_of(ResourceType::Wood), 5);
    }

    #[test]
    fn withdraw_holds_share_a_slot_up_to_its_contents() {
        let (mut manager, _, id) = manager_with_pile(Position::new(0, 0), 1, &[ResourceCategory::Wood]);
        let slot = SlotRef::new(id, 0);
        manager.store_directly(slot, ResourceType::Wood, 40).unwrap();
        manager
            .reserve_slot(slot, TaskId(1), ReservationIntent::Withdraw, ResourceType::Wood, 30)
            .unwrap();

        assert_eq!(
            manager.find_nearest_withdraw(Position::new(3, 0), ResourceType::Wood),
            Some((slot, 10))
        );
        let greedy =
            manager.reserve_slot(slot, TaskId(2), ReservationIntent::Withdraw, ResourceType::Wood, 11);
        assert!(matches!(greedy, Err(StockpileError::Insufficient { available: 10, .. })));
        manager
            .reserve_slot(slot, TaskId(2), ReservationIntent::Withdraw, ResourceType::Wood, 10)
            .unwrap();
        let deposit =
            manager.reserve_slot(slot, TaskId(3), ReservationIntent::Deposit, ResourceType::Wood, 5);
        assert!(matches!(deposit, Err(StockpileError::ReservedByOther { .. })));
        assert!(manager
            .find_nearest_withdraw(Position::new(3, 0), ResourceType::Wood)
            .is_none());

        assert_eq!(manager.withdraw(slot, TaskId(2), 10).unwrap(), (ResourceType::Wood, 10));
        let left = manager.slot(slot).unwrap();
        assert_eq!(left.amount, 30);
        assert!(left.is_held_by(TaskId(1)));
        assert!(!left.is_held_by(TaskId(2)));
    }

    #[test]
    fn removal_cuts_withdraw_holds_back_to_contents() {
        let (mut manager, _, id) = manager_with_pile(Position::new(0, 0), 1, &[ResourceCategory::Wood]);
        let slot = SlotRef::new(id, 0);
        manager.store_directly(slot, ResourceType::Wood, 20).unwrap();
        manager
            .reserve_slot(slot, TaskId(1), ReservationIntent::Withdraw, ResourceType::Wood, 12)
            .unwrap();
        manager
            .reserve_slot(slot, TaskId(2), ReservationIntent::Withdraw, ResourceType::Wood, 8)
            .unwrap();

        manager.remove_contents(slot, 10).unwrap();

        let held = manager.slot(slot).unwrap();
        assert_eq!(held.amount, 10);
        assert_eq!(held.withdraw_reserved(), 10);
        assert!(!held.is_held_by(TaskId(2)));
        assert!(manager.withdraw(slot, TaskId(1), 12).is_err());
        assert_eq!(manager.withdraw(slot, TaskId(1), 10).unwrap(), (ResourceType::Wood, 10));
    }

    #[test]
    fn withdraw_after_external_removal_fails() {
        let (mut manager, _, id) = manager_with_pile(Position::new(0, 0), 1, &[ResourceCategory::Wood]);
        let slot = SlotRef::new(id, 0);
        manager.store_directly(slot, ResourceType::Wood, 10).unwrap();
        manager
            .reserve_slot(slot, TaskId(1), ReservationIntent::Withdraw, ResourceType::Wood, 10)
            .unwrap();

        manager.remove_contents(slot, 10).unwrap();

        assert!(manager.withdraw(slot, TaskId(1), 10).is_err());
    }

    #[test]
    fn deposit_capacity_accounts_for_pending_deposits() {
        let mut manager = StockpileManager::new(10);
        let mut world = TileWorld::new(4, 4);
        let id = manager
            .create_stockpile(&mut world, Region::single(Position::new(0, 0)), [ResourceCategory::Stone])
            .unwrap();
        let slot = SlotRef::new(id, 0);
        manager
            .reserve_slot(slot, TaskId(1), ReservationIntent::Deposit, ResourceType::Stone, 8)
            .unwrap();

        let overflow = manager.store_directly(slot, ResourceType::Stone, 3);

        assert!(matches!(overflow, Err(StockpileError::Insufficient { available: 2, .. })));
    }

    #[test]
    fn remove_stockpile_frees_tiles() {
        let (mut manager, mut world, id) =
            manager_with_pile(Position::new(0, 0), 2, &[ResourceCategory::Stone]);

        let removed = manager.remove_stockpile(&mut world, id).unwrap();

        assert_eq!(removed.slots.len(), 2);
        assert!(!world.is_occupied(Position::new(0, 0)));
        assert!(manager.get(id).is_none());
    }
}
