use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ResourceType {
    Stone,
    Wood,
    IronOre,
    CopperOre,
    Coal,
}

/// Coarse grouping used by stockpile filters.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ResourceCategory {
    Stone,
    Wood,
    Ore,
    Fuel,
}

impl ResourceType {
    pub const ALL: [ResourceType; 5] = [
        ResourceType::Stone,
        ResourceType::Wood,
        ResourceType::IronOre,
        ResourceType::CopperOre,
        ResourceType::Coal,
    ];

    pub fn category(self) -> ResourceCategory {
        match self {
            ResourceType::Stone => ResourceCategory::Stone,
            ResourceType::Wood => ResourceCategory::Wood,
            ResourceType::IronOre | ResourceType::CopperOre => ResourceCategory::Ore,
            ResourceType::Coal => ResourceCategory::Fuel,
        }
    }
}

impl std::fmt::Display for ResourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ResourceType::Stone => "stone",
            ResourceType::Wood => "wood",
            ResourceType::IronOre => "iron ore",
            ResourceType::CopperOre => "copper ore",
            ResourceType::Coal => "coal",
        };
        f.write_str(name)
    }
}

/// A worker's hands: a single stack of one resource, bounded by capacity.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inventory {
    capacity: u32,
    carried: Option<(ResourceType, u32)>,
}

impl Inventory {
    pub fn new(capacity: u32) -> Self {
        Self {
            capacity,
            carried: None,
        }
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn carried(&self) -> Option<(ResourceType, u32)> {
        self.carried
    }

    pub fn is_empty(&self) -> bool {
        self.carried.is_none()
    }

    pub fn amount_of(&self, resource: ResourceType) -> u32 {
        match self.carried {
            Some((carried, amount)) if carried == resource => amount,
            _ => 0,
        }
    }

    pub fn space_for(&self, resource: ResourceType) -> u32 {
        match self.carried {
            None => self.capacity,
            Some((carried, amount)) if carried == resource => self.capacity.saturating_sub(amount),
            Some(_) => 0,
        }
    }

    /// Adds the whole amount or nothing.
    pub fn add(&mut self, resource: ResourceType, amount: u32) -> Result<(), TransferError> {
        if amount == 0 {
            return Ok(());
        }
        if let Some((carried, _)) = self.carried {
            if carried != resource {
                return Err(TransferError::MixedResource);
            }
        }
        if self.space_for(resource) < amount {
            return Err(TransferError::InventoryFull);
        }
        let current = self.amount_of(resource);
        self.carried = Some((resource, current + amount));
        Ok(())
    }

    /// Removes exactly `amount` of `resource`.
    pub fn remove(&mut self, resource: ResourceType, amount: u32) -> Result<(), TransferError> {
        let current = self.amount_of(resource);
        if current == 0 {
            return Err(TransferError::ItemNotFound);
        }
        if current < amount {
            return Err(TransferError::NotEnoughItems);
        }
        self.carried = if current == amount {
            None
        } else {
            Some((resource, current - amount))
        };
        Ok(())
    }

    pub fn take_all(&mut self) -> Option<(ResourceType, u32)> {
        self.carried.take()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferError {
    ItemNotFound,
    NotEnoughItems,
    InventoryFull,
    MixedResource,
}

impl std::fmt::Display for TransferError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransferError::ItemNotFound => write!(f, "Item not found!"),
            TransferError::NotEnoughItems => write!(f, "Not enough items to transfer!"),
            TransferError::InventoryFull => write!(f, "Inventory full!"),
            TransferError::MixedResource => write!(f, "Already carrying a different resource!"),
        }
    }
}

impl std::error::Error for TransferError {}
