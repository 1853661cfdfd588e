use settlement_core::{
    config::SimulationConfig,
    grid::{Position, Region},
    materials::{ResourceCategory, ResourceType},
    persistence::SettlementSnapshot,
    structures::BlueprintRegistry,
    workers::Orchestrator,
};

use crate::harness::*;

fn quarry() -> Region {
    Region::new(Position::new(12, 3), Position::new(14, 3))
}

fn busy_app() -> bevy::prelude::App {
    let mut app = headless_app();
    place_rock(&mut app, quarry(), 6);
    add_stockpile(
        &mut app,
        Region::new(Position::new(1, 10), Position::new(3, 10)),
        [ResourceCategory::Stone],
    );
    spawn_worker(&mut app, 10, 1);
    spawn_worker(&mut app, 10, 5);
    orchestrator_mut(&mut app).designate_mining(quarry());
    app
}

/// A fresh app over the same terrain with `text` restored into it.
fn reload(source: &Orchestrator, text: &str) -> bevy::prelude::App {
    let target = Orchestrator::new(
        source.world().clone(),
        SimulationConfig::default(),
        BlueprintRegistry::load_from_assets().unwrap(),
    );
    let mut app = headless_app_with(target);
    let snapshot = SettlementSnapshot::from_ron(text).unwrap();
    orchestrator_mut(&mut app).restore(snapshot).unwrap();
    app
}

#[test]
fn reloaded_settlement_finishes_the_quarry() {
    let mut source = busy_app();
    tick_n(&mut source, 12);
    let stone_before = material_total(source.world(), ResourceType::Stone);
    let text = orchestrator(&source).snapshot().to_ron().unwrap();

    let mut app = reload(orchestrator(&source), &text);

    assert_eq!(orchestrator(&app).tick_count(), orchestrator(&source).tick_count());
    assert!(orchestrator(&app).workers().all(|agent| agent.is_idle()));
    assert_material_conserved(app.world(), ResourceType::Stone, stone_before);
    assert_no_violations(app.world());

    tick_until(
        &mut app,
        400,
        |world| {
            let orchestrator = world.resource::<Orchestrator>();
            quarry()
                .positions()
                .all(|tile| orchestrator.world().is_walkable(tile))
                && orchestrator.drops().is_empty()
                && is_settled(world)
        },
        "restored workers should finish the quarry",
    );
    let stored = orchestrator(&app).stockpiles().total_of(ResourceType::Stone);
    assert!(stored >= stone_before, "stored {stored}, had {stone_before}");
    assert_no_violations(app.world());
}

#[test]
fn restore_replaces_existing_state() {
    let mut source = busy_app();
    tick_n(&mut source, 5);
    let text = orchestrator(&source).snapshot().to_ron().unwrap();
    let mut app = busy_app();
    spawn_worker(&mut app, 0, 0);
    add_stockpile(&mut app, Region::single(Position::new(20, 12)), [ResourceCategory::Wood]);

    let snapshot = SettlementSnapshot::from_ron(&text).unwrap();
    orchestrator_mut(&mut app).restore(snapshot).unwrap();

    let restored = orchestrator(&app);
    let original = orchestrator(&source);
    assert_eq!(restored.workers().count(), original.workers().count());
    assert_eq!(restored.stockpiles().len(), original.stockpiles().len());
    assert_eq!(restored.registry().len(), original.registry().len());
    assert!(!restored.world().is_occupied(Position::new(20, 12)));
    assert!(restored.world().is_occupied(Position::new(1, 10)));
}

#[test]
fn snapshot_text_is_stable_across_reload() {
    let mut source = busy_app();
    tick_n(&mut source, 8);
    let text = orchestrator(&source).snapshot().to_ron().unwrap();

    let first = reload(orchestrator(&source), &text);
    let second = reload(orchestrator(&source), &text);

    assert_eq!(
        orchestrator(&first).snapshot().to_ron().unwrap(),
        orchestrator(&second).snapshot().to_ron().unwrap()
    );
}
