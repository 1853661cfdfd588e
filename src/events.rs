use crate::{
    grid::{Offset, Position},
    materials::{DropId, ResourceType},
    structures::{SiteId, StockpileId, TileState},
    workers::{FailureReason, TaskId, TaskKind, WorkerId},
};
use bevy::prelude::*;

/// Notifications for UI, rendering and audio subscribers.
#[derive(Message, Clone, Debug, PartialEq)]
pub enum SettlementEvent {
    TaskCreated {
        task: TaskId,
        kind: TaskKind,
        position: Position,
    },
    TaskClaimed {
        task: TaskId,
        worker: WorkerId,
    },
    TaskReleased {
        task: TaskId,
        skip_count: u32,
    },
    TaskCompleted {
        task: TaskId,
        kind: TaskKind,
    },
    TaskFailed {
        task: TaskId,
        kind: TaskKind,
        reason: FailureReason,
    },
    TaskCancelled {
        task: TaskId,
        kind: TaskKind,
    },
    StockpileChanged {
        stockpile: StockpileId,
    },
    ResourceDropped {
        drop: DropId,
        position: Position,
        resource: ResourceType,
        amount: u32,
    },
    ConstructionProgressed {
        site: SiteId,
        offset: Offset,
        state: TileState,
    },
    ConstructionCompleted {
        site: SiteId,
        blueprint: String,
        position: Position,
    },
    /// A command could not be applied; `reason` is display-ready.
    CommandRejected {
        reason: String,
    },
}

/// Per-manager outbox drained by the orchestrator once per tick.
#[derive(Clone, Debug, Default)]
pub struct EventQueue {
    events: Vec<SettlementEvent>,
}

impl EventQueue {
    pub fn push(&mut self, event: SettlementEvent) {
        self.events.push(event);
    }

    pub fn drain(&mut self) -> impl Iterator<Item = SettlementEvent> + '_ {
        self.events.drain(..)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }
}
