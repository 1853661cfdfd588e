// Library target hosts the engine; the binary is only a headless demo.
#![allow(
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::implicit_hasher
)]

pub mod commands;
pub mod config;
pub mod constants;
pub mod events;
pub mod grid;
pub mod materials;
pub mod persistence;
pub mod structures;
pub mod workers;

#[cfg(debug_assertions)]
pub mod invariants;

use bevy::prelude::*;
use commands::SettlementCommand;
use config::SimulationConfig;
use events::SettlementEvent;
use grid::TileWorld;
use structures::BlueprintRegistry;
use workers::Orchestrator;

#[derive(SystemSet, Debug, Hash, PartialEq, Eq, Clone)]
pub enum SettlementSet {
    Commands,
    Simulation,
    Publish,
}

pub fn configure_system_sets(app: &mut App) {
    app.configure_sets(
        Update,
        (
            SettlementSet::Commands,
            SettlementSet::Simulation,
            SettlementSet::Publish,
        )
            .chain(),
    );
}

/// Hosts the engine in a Bevy app. Every `app.update()` applies queued
/// commands, advances one tick and publishes the resulting events.
///
/// An `Orchestrator` inserted before the plugin is kept; otherwise one is
/// built over an empty world of the given size from the bundled assets.
pub struct SettlementPlugin {
    pub width: u32,
    pub height: u32,
}

impl Default for SettlementPlugin {
    fn default() -> Self {
        Self {
            width: 64,
            height: 64,
        }
    }
}

impl Plugin for SettlementPlugin {
    fn build(&self, app: &mut App) {
        configure_system_sets(app);
        app.add_message::<SettlementCommand>()
            .add_message::<SettlementEvent>();

        if !app.world().contains_resource::<Orchestrator>() {
            let config = SimulationConfig::load_from_assets().unwrap_or_else(|error| {
                warn!("Falling back to default simulation config: {error}");
                SimulationConfig::default()
            });
            let blueprints = BlueprintRegistry::load_from_assets().unwrap_or_else(|error| {
                error!("Failed to load blueprints: {error}");
                BlueprintRegistry::default()
            });
            app.insert_resource(config.clone());
            app.insert_resource(Orchestrator::new(
                TileWorld::new(self.width, self.height),
                config,
                blueprints,
            ));
        }

        app.add_systems(
            Update,
            (
                apply_settlement_commands.in_set(SettlementSet::Commands),
                advance_simulation.in_set(SettlementSet::Simulation),
                publish_settlement_events.in_set(SettlementSet::Publish),
            ),
        );
    }
}

pub fn apply_settlement_commands(
    mut queued: MessageReader<SettlementCommand>,
    mut orchestrator: ResMut<Orchestrator>,
) {
    for command in queued.read() {
        // Rejections are already published as `CommandRejected`.
        if let Err(error) = orchestrator.apply(command.clone()) {
            debug!("Skipped {command:?}: {error}");
        }
    }
}

pub fn advance_simulation(mut orchestrator: ResMut<Orchestrator>) {
    orchestrator.tick();
}

pub fn publish_settlement_events(
    mut orchestrator: ResMut<Orchestrator>,
    mut events: MessageWriter<SettlementEvent>,
) {
    for event in orchestrator.drain_events() {
        events.write(event);
    }
}
