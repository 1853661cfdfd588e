use std::collections::BTreeMap;

use settlement_core::{
    commands::SettlementCommand,
    events::SettlementEvent,
    grid::{Position, Region},
    materials::{ResourceCategory, ResourceType},
    structures::{SiteId, SiteStatus, SlotRef, TileState},
    workers::Orchestrator,
};

use crate::harness::*;

fn site_status(world: &bevy::prelude::World, site: SiteId) -> Option<SiteStatus> {
    world
        .resource::<Orchestrator>()
        .construction()
        .get(site)
        .map(|record| record.status)
}

#[test]
fn layers_complete_bottom_up() {
    let mut app = headless_app();
    let pile = add_stockpile(
        &mut app,
        Region::new(Position::new(1, 12), Position::new(4, 12)),
        [ResourceCategory::Stone, ResourceCategory::Wood, ResourceCategory::Ore],
    );
    stock_slot(&mut app, SlotRef::new(pile, 0), ResourceType::Stone, 20);
    stock_slot(&mut app, SlotRef::new(pile, 1), ResourceType::Wood, 12);
    stock_slot(&mut app, SlotRef::new(pile, 2), ResourceType::IronOre, 1);
    for x in 0..3 {
        spawn_worker(&mut app, x, 0);
    }
    let site = orchestrator_mut(&mut app)
        .start_construction("stone_hut", Position::new(10, 4))
        .unwrap();

    tick_until(
        &mut app,
        600,
        |world| site_status(world, site) == Some(SiteStatus::Completed),
        "stone hut should be finished",
    );

    let layers: BTreeMap<_, _> = orchestrator(&app)
        .construction()
        .get(site)
        .unwrap()
        .tiles
        .iter()
        .map(|(offset, tile)| (*offset, tile.layer))
        .collect();
    let log = app.world().resource::<EventLog>();
    let completion_order: Vec<_> = log
        .0
        .iter()
        .filter_map(|event| match event {
            SettlementEvent::ConstructionProgressed {
                site: progressed,
                offset,
                state: TileState::Completed,
            } if *progressed == site => layers.get(offset).copied(),
            _ => None,
        })
        .collect();
    assert_eq!(completion_order.len(), layers.len());
    assert!(
        completion_order.windows(2).all(|pair| pair[0] <= pair[1]),
        "tiles completed out of layer order: {completion_order:?}"
    );
    assert_event_seen(
        app.world(),
        |event| matches!(event, SettlementEvent::ConstructionCompleted { site: done, .. } if *done == site),
        "construction completion",
    );
    assert_stockpiled(app.world(), ResourceType::Stone, 0);
    assert_no_violations(app.world());
}

#[test]
fn cancelling_returns_unbuilt_material() {
    let mut app = headless_app();
    let pile = add_stockpile(&mut app, Region::single(Position::new(2, 12)), [ResourceCategory::Stone]);
    stock_slot(&mut app, SlotRef::new(pile, 0), ResourceType::Stone, 9);
    spawn_worker(&mut app, 3, 12);
    let site = orchestrator_mut(&mut app)
        .start_construction("wall_segment", Position::new(12, 8))
        .unwrap();

    tick_until(
        &mut app,
        100,
        |world| {
            world
                .resource::<Orchestrator>()
                .construction()
                .get(site)
                .is_some_and(|record| record.delivered_of(ResourceType::Stone) > 0)
        },
        "stone should reach the wall site",
    );
    send_command(&mut app, SettlementCommand::CancelConstruction { site });
    tick_until(
        &mut app,
        200,
        |world| world.resource::<Orchestrator>().drops().is_empty() && is_settled(world),
        "refund should be hauled back",
    );

    let orchestrator = orchestrator(&app);
    let record = orchestrator.construction().get(site).unwrap();
    assert_eq!(record.status, SiteStatus::Cancelled);
    let built_in = record.consumed().get(&ResourceType::Stone).copied().unwrap_or(0);
    assert_eq!(record.delivered_of(ResourceType::Stone), built_in);
    assert_eq!(
        orchestrator.stockpiles().total_of(ResourceType::Stone) + built_in,
        9,
        "stone must be stored or built in"
    );
    assert!(orchestrator
        .registry()
        .iter()
        .filter(|task| task.payload.site() == Some(site))
        .all(|task| task.status.is_terminal()));
    assert_no_violations(app.world());
}

#[test]
fn paused_site_waits_for_resume() {
    let mut app = headless_app();
    let pile = add_stockpile(&mut app, Region::single(Position::new(2, 12)), [ResourceCategory::Stone]);
    stock_slot(&mut app, SlotRef::new(pile, 0), ResourceType::Stone, 9);
    let worker = spawn_worker(&mut app, 3, 12);
    let site = orchestrator_mut(&mut app)
        .start_construction("wall_segment", Position::new(12, 8))
        .unwrap();
    send_command(&mut app, SettlementCommand::PauseConstruction { site });

    tick_n(&mut app, 30);

    assert_eq!(site_status(app.world(), site), Some(SiteStatus::Paused));
    let record = orchestrator(&app).construction().get(site).cloned().unwrap();
    assert_eq!(record.delivered_of(ResourceType::Stone), 0);
    assert!(record
        .tiles
        .values()
        .all(|tile| tile.state == TileState::Pending));
    assert_worker_at(app.world(), worker, 3, 12);
    assert_stockpiled(app.world(), ResourceType::Stone, 9);

    send_command(&mut app, SettlementCommand::ResumeConstruction { site });
    tick_until(
        &mut app,
        200,
        |world| site_status(world, site) == Some(SiteStatus::Completed),
        "wall should be built after resuming",
    );
    assert_stockpiled(app.world(), ResourceType::Stone, 0);
    assert_no_violations(app.world());
}

#[test]
fn overlapping_site_is_rejected() {
    let mut app = headless_app();
    orchestrator_mut(&mut app)
        .start_construction("wall_segment", Position::new(5, 5))
        .unwrap();

    send_command(
        &mut app,
        SettlementCommand::StartConstruction {
            blueprint: "wall_segment".to_string(),
            position: Position::new(6, 5),
        },
    );
    tick(&mut app);

    assert_eq!(orchestrator(&app).construction().len(), 1);
    assert_event_seen(
        app.world(),
        |event| matches!(event, SettlementEvent::CommandRejected { .. }),
        "overlap rejection",
    );
}
