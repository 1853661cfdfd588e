use bevy::prelude::*;

use settlement_core::{
    commands::SettlementCommand,
    grid::{Position, Region, Tile, TileKind},
    materials::{DropId, ResourceCategory, ResourceType},
    structures::{SlotRef, StockpileId},
    workers::{Orchestrator, TaskKind, WorkerId},
};

pub fn orchestrator(app: &App) -> &Orchestrator {
    app.world().resource::<Orchestrator>()
}

pub fn orchestrator_mut(app: &mut App) -> Mut<'_, Orchestrator> {
    app.world_mut().resource_mut::<Orchestrator>()
}

pub fn send_command(app: &mut App, command: SettlementCommand) {
    app.world_mut().write_message(command);
}

pub fn place_rock(app: &mut App, region: Region, hardness: u32) {
    orchestrator_mut(app)
        .settlement_mut()
        .world
        .fill(region, Tile::with_hardness(TileKind::Rock, hardness));
}

pub fn add_stockpile(
    app: &mut App,
    bounds: Region,
    allowed: impl IntoIterator<Item = ResourceCategory>,
) -> StockpileId {
    orchestrator_mut(app)
        .create_stockpile(bounds, allowed)
        .unwrap_or_else(|error| panic!("failed to create stockpile over {bounds:?}: {error}"))
}

pub fn stock_slot(app: &mut App, slot: SlotRef, resource: ResourceType, qty: u32) {
    orchestrator_mut(app)
        .settlement_mut()
        .stockpiles
        .store_directly(slot, resource, qty)
        .unwrap_or_else(|error| panic!("failed to stock {slot} with {qty} {resource}: {error}"));
}

pub fn spawn_drop(app: &mut App, x: i32, y: i32, resource: ResourceType, qty: u32) -> DropId {
    orchestrator_mut(app)
        .settlement_mut()
        .spawn_drop(Position::new(x, y), resource, qty)
}

pub fn spawn_worker(app: &mut App, x: i32, y: i32) -> WorkerId {
    orchestrator_mut(app)
        .register_worker(Position::new(x, y))
        .unwrap_or_else(|error| panic!("failed to register worker at ({x}, {y}): {error}"))
}

/// Queues a registration through the command path; the worker exists after
/// the next tick.
pub fn hire_worker(app: &mut App, x: i32, y: i32, capabilities: impl IntoIterator<Item = TaskKind>) {
    send_command(
        app,
        SettlementCommand::RegisterWorker {
            position: Position::new(x, y),
            capabilities: capabilities.into_iter().collect(),
        },
    );
}
