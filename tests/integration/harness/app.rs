use bevy::prelude::*;

use settlement_core::{
    config::SimulationConfig, events::SettlementEvent, grid::TileWorld,
    invariants::InvariantPlugin, structures::BlueprintRegistry, workers::Orchestrator,
    SettlementPlugin, SettlementSet,
};

/// Every event published since the app was built, oldest first.
#[derive(Resource, Default)]
pub struct EventLog(pub Vec<SettlementEvent>);

fn record_events(mut events: MessageReader<SettlementEvent>, mut log: ResMut<EventLog>) {
    log.0.extend(events.read().cloned());
}

pub fn test_orchestrator(width: u32, height: u32) -> Orchestrator {
    Orchestrator::new(
        TileWorld::new(width, height),
        SimulationConfig::default(),
        BlueprintRegistry::load_from_assets().unwrap(),
    )
}

pub fn headless_app() -> App {
    headless_app_with(test_orchestrator(24, 16))
}

/// One `app.update()` is one settlement tick.
pub fn headless_app_with(orchestrator: Orchestrator) -> App {
    let mut app = App::new();

    app.add_plugins(MinimalPlugins);
    app.insert_resource(orchestrator);
    app.add_plugins(SettlementPlugin::default());

    app.init_resource::<EventLog>();
    app.add_systems(Update, record_events.after(SettlementSet::Publish));

    app.add_plugins(InvariantPlugin);

    app
}
