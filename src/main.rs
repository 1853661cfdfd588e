use bevy::app::ScheduleRunnerPlugin;
use bevy::log::LogPlugin;
use bevy::prelude::*;
use std::time::Duration;

use settlement_core::{
    commands::SettlementCommand,
    config::SimulationConfig,
    events::SettlementEvent,
    grid::{Position, Region, Tile, TileKind, TileWorld},
    materials::{ResourceCategory, ResourceType},
    structures::BlueprintRegistry,
    workers::{Orchestrator, TaskKind},
    SettlementPlugin, SettlementSet,
};

const DEMO_TICKS: u64 = 600;

/// Rock quarry in the east, stockpile in the west and an empty lot between.
fn demo_orchestrator() -> Orchestrator {
    let config = SimulationConfig::load_from_assets().unwrap_or_else(|error| {
        warn!("Falling back to default simulation config: {error}");
        SimulationConfig::default()
    });
    let blueprints = BlueprintRegistry::load_from_assets().unwrap_or_else(|error| {
        error!("Failed to load blueprints: {error}");
        BlueprintRegistry::default()
    });
    let mut world = TileWorld::new(32, 16);
    world.fill(
        Region::new(Position::new(24, 2), Position::new(26, 6)),
        Tile::new(TileKind::Rock),
    );
    Orchestrator::new(world, config, blueprints)
}

fn queue_demo_orders(mut commands: MessageWriter<SettlementCommand>) {
    commands.write(SettlementCommand::CreateStockpile {
        bounds: Region::new(Position::new(2, 10), Position::new(5, 11)),
        allowed: vec![ResourceCategory::Stone, ResourceCategory::Wood],
    });
    for x in 1..=2 {
        commands.write(SettlementCommand::RegisterWorker {
            position: Position::new(x, 1),
            capabilities: TaskKind::ALL.to_vec(),
        });
    }
    commands.write(SettlementCommand::RegisterWorker {
        position: Position::new(3, 1),
        capabilities: vec![TaskKind::Haul, TaskKind::Deliver],
    });
    commands.write(SettlementCommand::DesignateMining {
        region: Region::new(Position::new(24, 2), Position::new(26, 6)),
    });
    commands.write(SettlementCommand::StartConstruction {
        blueprint: "wall_segment".to_string(),
        position: Position::new(12, 8),
    });
}

fn log_settlement_events(mut events: MessageReader<SettlementEvent>) {
    for event in events.read() {
        match event {
            SettlementEvent::ConstructionCompleted {
                blueprint,
                position,
                ..
            } => info!("Finished {blueprint} at {position}"),
            SettlementEvent::TaskFailed { task, reason, .. } => {
                warn!("{task} failed: {reason}");
            }
            SettlementEvent::CommandRejected { reason } => warn!("Command rejected: {reason}"),
            other => debug!("{other:?}"),
        }
    }
}

fn stop_after_demo(orchestrator: Res<Orchestrator>, mut exit: MessageWriter<AppExit>) {
    if orchestrator.tick_count() >= DEMO_TICKS {
        info!(
            "Demo finished after {} ticks: {} stone stored, {} loose",
            orchestrator.tick_count(),
            orchestrator.stockpiles().total_of(ResourceType::Stone),
            orchestrator.drops().total_of(ResourceType::Stone)
        );
        exit.write(AppExit::Success);
    }
}

fn main() {
    App::new()
        .add_plugins(
            MinimalPlugins.set(ScheduleRunnerPlugin::run_loop(Duration::from_millis(10))),
        )
        .add_plugins(LogPlugin::default())
        .insert_resource(demo_orchestrator())
        .add_plugins(SettlementPlugin::default())
        .add_systems(Startup, queue_demo_orders)
        .add_systems(
            Update,
            (log_settlement_events, stop_after_demo).after(SettlementSet::Publish),
        )
        .run();
}
