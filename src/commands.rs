use crate::{
    grid::{Position, Region},
    materials::ResourceCategory,
    structures::{ConstructionError, PlacementError, SiteId, StockpileError, StockpileId},
    workers::{TaskKind, WorkerId},
};
use bevy::prelude::*;

/// Player or script input. Applied at the start of the next tick.
#[derive(Message, Clone, Debug, PartialEq)]
pub enum SettlementCommand {
    DesignateMining {
        region: Region,
    },
    CancelMining {
        region: Region,
    },
    CreateStockpile {
        bounds: Region,
        allowed: Vec<ResourceCategory>,
    },
    RemoveStockpile {
        stockpile: StockpileId,
    },
    StartConstruction {
        blueprint: String,
        position: Position,
    },
    CancelConstruction {
        site: SiteId,
    },
    PauseConstruction {
        site: SiteId,
    },
    ResumeConstruction {
        site: SiteId,
    },
    /// Cancels the site first when it is still open.
    RemoveSite {
        site: SiteId,
    },
    RegisterWorker {
        position: Position,
        capabilities: Vec<TaskKind>,
    },
    UnregisterWorker {
        worker: WorkerId,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    Placement(PlacementError),
    Stockpile(StockpileError),
    Construction(ConstructionError),
    UnknownWorker(WorkerId),
    Unwalkable(Position),
}

impl std::fmt::Display for CommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommandError::Placement(error) => write!(f, "cannot place construction: {error}"),
            CommandError::Stockpile(error) => write!(f, "{error}"),
            CommandError::Construction(error) => write!(f, "{error}"),
            CommandError::UnknownWorker(worker) => write!(f, "{worker} is not registered"),
            CommandError::Unwalkable(position) => write!(f, "no worker can stand at {position}"),
        }
    }
}

impl std::error::Error for CommandError {}

impl From<PlacementError> for CommandError {
    fn from(error: PlacementError) -> Self {
        CommandError::Placement(error)
    }
}

impl From<StockpileError> for CommandError {
    fn from(error: StockpileError) -> Self {
        CommandError::Stockpile(error)
    }
}

impl From<ConstructionError> for CommandError {
    fn from(error: ConstructionError) -> Self {
        CommandError::Construction(error)
    }
}
