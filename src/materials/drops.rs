use crate::{
    grid::{Position, TileKind},
    materials::ResourceType,
};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DropId(pub u32);

impl std::fmt::Display for DropId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "drop#{}", self.0)
    }
}

/// Loose resources lying on a tile, waiting to be hauled.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceDrop {
    pub id: DropId,
    pub position: Position,
    pub resource: ResourceType,
    pub amount: u32,
    /// Portion of `amount` already promised to haul tasks.
    pub reserved: u32,
}

impl ResourceDrop {
    pub fn unreserved(&self) -> u32 {
        self.amount.saturating_sub(self.reserved)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DropEntry {
    pub resource: ResourceType,
    pub min: u32,
    pub max: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DropTable {
    pub entries: Vec<DropEntry>,
}

impl DropTable {
    pub fn for_tile(kind: TileKind) -> Self {
        let entries = match kind {
            TileKind::Rock => vec![DropEntry {
                resource: ResourceType::Stone,
                min: 2,
                max: 4,
            }],
            TileKind::Ore(resource) => vec![
                DropEntry {
                    resource,
                    min: 1,
                    max: 3,
                },
                DropEntry {
                    resource: ResourceType::Stone,
                    min: 0,
                    max: 1,
                },
            ],
            TileKind::Ground | TileKind::Water => Vec::new(),
        };
        Self { entries }
    }

    pub fn fixed(resource: ResourceType, amount: u32) -> Self {
        Self {
            entries: vec![DropEntry {
                resource,
                min: amount,
                max: amount,
            }],
        }
    }

    /// Rolls every entry once; zero results are omitted.
    pub fn roll(&self, rng: &mut impl Rng) -> Vec<(ResourceType, u32)> {
        self.entries
            .iter()
            .filter_map(|entry| {
                let (low, high) = (entry.min.min(entry.max), entry.min.max(entry.max));
                let amount = if low == high {
                    low
                } else {
                    rng.gen_range(low..=high)
                };
                (amount > 0).then_some((entry.resource, amount))
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropError {
    NotFound(DropId),
    Insufficient { requested: u32, available: u32 },
}

impl std::fmt::Display for DropError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DropError::NotFound(id) => write!(f, "{id} no longer exists"),
            DropError::Insufficient {
                requested,
                available,
            } => write!(f, "requested {requested} but only {available} unreserved"),
        }
    }
}

impl std::error::Error for DropError {}

/// Arena of loose drops with a (position, resource) index so repeated drops
/// on the same tile stack instead of multiplying.
#[derive(Clone, Debug, Default)]
pub struct DropRegistry {
    next_id: u32,
    drops: BTreeMap<DropId, ResourceDrop>,
    by_tile: BTreeMap<(Position, ResourceType), DropId>,
}

impl DropRegistry {
    pub fn spawn(&mut self, position: Position, resource: ResourceType, amount: u32) -> DropId {
        if let Some(id) = self.by_tile.get(&(position, resource)).copied() {
            if let Some(drop) = self.drops.get_mut(&id) {
                drop.amount += amount;
                return id;
            }
        }
        self.next_id += 1;
        let id = DropId(self.next_id);
        self.drops.insert(
            id,
            ResourceDrop {
                id,
                position,
                resource,
                amount,
                reserved: 0,
            },
        );
        self.by_tile.insert((position, resource), id);
        id
    }

    pub fn get(&self, id: DropId) -> Option<&ResourceDrop> {
        self.drops.get(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ResourceDrop> {
        self.drops.values()
    }

    pub fn len(&self) -> usize {
        self.drops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.drops.is_empty()
    }

    pub fn total_of(&self, resource: ResourceType) -> u32 {
        self.drops
            .values()
            .filter(|drop| drop.resource == resource)
            .map(|drop| drop.amount)
            .sum()
    }

    /// Drops that still have material nobody has promised to haul.
    pub fn unclaimed(&self) -> impl Iterator<Item = &ResourceDrop> {
        self.drops.values().filter(|drop| drop.unreserved() > 0)
    }

    pub fn reserve(&mut self, id: DropId, amount: u32) -> Result<(), DropError> {
        let drop = self.drops.get_mut(&id).ok_or(DropError::NotFound(id))?;
        if drop.unreserved() < amount {
            return Err(DropError::Insufficient {
                requested: amount,
                available: drop.unreserved(),
            });
        }
        drop.reserved += amount;
        Ok(())
    }

    pub fn release(&mut self, id: DropId, amount: u32) {
        if let Some(drop) = self.drops.get_mut(&id) {
            drop.reserved = drop.reserved.saturating_sub(amount);
        }
    }

    /// Takes a reserved amount off the drop. Fails if the drop vanished or
    /// shrank below the reservation.
    pub fn take_reserved(&mut self, id: DropId, amount: u32) -> Result<(), DropError> {
        let drop = self.drops.get_mut(&id).ok_or(DropError::NotFound(id))?;
        if drop.amount < amount {
            return Err(DropError::Insufficient {
                requested: amount,
                available: drop.amount,
            });
        }
        drop.amount -= amount;
        drop.reserved = drop.reserved.saturating_sub(amount);
        if drop.amount == 0 {
            self.remove(id);
        }
        Ok(())
    }

    /// External removal (decay, theft, player action).
    pub fn remove(&mut self, id: DropId) -> Option<ResourceDrop> {
        let drop = self.drops.remove(&id)?;
        self.by_tile.remove(&(drop.position, drop.resource));
        Some(drop)
    }

    pub(crate) fn restore(&mut self, drops: Vec<ResourceDrop>) {
        self.drops.clear();
        self.by_tile.clear();
        self.next_id = 0;
        for drop in drops {
            self.next_id = self.next_id.max(drop.id.0);
            self.by_tile.insert((drop.position, drop.resource), drop.id);
            self.drops.insert(drop.id, drop);
        }
    }

    pub(crate) fn clear_reservations(&mut self) {
        for drop in self.drops.values_mut() {
            drop.reserved = 0;
        }
    }
}
