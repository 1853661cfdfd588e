use settlement_core::{
    commands::SettlementCommand,
    events::SettlementEvent,
    grid::{Offset, Position, Region},
    materials::{ResourceCategory, ResourceType},
    structures::{Blueprint, BuildLayer, ReservationIntent, SiteId, SiteStatus, SlotRef},
    workers::{FailureReason, Orchestrator},
};

use crate::harness::*;

fn timber_frame() -> Blueprint {
    Blueprint::new("timber_frame").with_tile(
        Offset::new(0, 0),
        BuildLayer::Floor,
        [(ResourceType::Wood, 50)],
        2,
    )
}

/// Site at (10, 10) needing 50 wood, a near pile with 20 and a far one with 40.
fn split_supply_app() -> (bevy::prelude::App, SiteId, SlotRef, SlotRef) {
    let mut app = headless_app();
    let near = add_stockpile(&mut app, Region::single(Position::new(12, 10)), [ResourceCategory::Wood]);
    let far = add_stockpile(&mut app, Region::single(Position::new(20, 10)), [ResourceCategory::Wood]);
    let (near, far) = (SlotRef::new(near, 0), SlotRef::new(far, 0));
    stock_slot(&mut app, near, ResourceType::Wood, 20);
    stock_slot(&mut app, far, ResourceType::Wood, 40);
    let site = orchestrator_mut(&mut app)
        .start_construction_with(&timber_frame(), Position::new(10, 10))
        .unwrap();
    (app, site, near, far)
}

#[test]
fn delivery_is_split_across_two_stockpiles() {
    let (mut app, _site, near, far) = split_supply_app();

    tick(&mut app);

    let orchestrator = orchestrator(&app);
    let withdraws: Vec<_> = orchestrator
        .stockpiles()
        .reservations()
        .filter(|(_, reservation)| reservation.intent == ReservationIntent::Withdraw)
        .collect();
    assert_eq!(withdraws.len(), 2, "expected two withdraws, found {withdraws:?}");
    assert_eq!(
        withdraws.iter().map(|(_, reservation)| reservation.amount).sum::<u32>(),
        50
    );
    let stockpiles = orchestrator.stockpiles();
    assert_eq!(stockpiles.slot(near).map(|slot| slot.unreserved_amount()), Some(0));
    assert_eq!(stockpiles.slot(far).map(|slot| slot.unreserved_amount()), Some(10));
    assert_eq!(
        stockpiles.find_nearest_withdraw(Position::new(10, 10), ResourceType::Wood),
        Some((far, 10)),
        "the wood nobody asked for stays available"
    );
}

#[test]
fn split_delivery_completes_the_site() {
    let (mut app, site, near, far) = split_supply_app();
    spawn_worker(&mut app, 14, 12);
    spawn_worker(&mut app, 16, 12);

    tick_until(
        &mut app,
        300,
        |world| {
            world
                .resource::<Orchestrator>()
                .construction()
                .get(site)
                .is_some_and(|record| record.status == SiteStatus::Completed)
        },
        "timber frame should be built from both piles",
    );

    let stockpiles = orchestrator(&app).stockpiles();
    assert_eq!(stockpiles.slot(near).map(|slot| slot.amount), Some(0));
    assert_eq!(stockpiles.slot(far).map(|slot| slot.amount), Some(10));
    assert_material_conserved(app.world(), ResourceType::Wood, 60);
    assert_no_violations(app.world());
}

#[test]
fn loose_drops_are_stored_without_loss() {
    let mut app = headless_app();
    add_stockpile(
        &mut app,
        Region::new(Position::new(10, 6), Position::new(11, 6)),
        [ResourceCategory::Stone],
    );
    spawn_drop(&mut app, 3, 3, ResourceType::Stone, 3);
    spawn_drop(&mut app, 8, 12, ResourceType::Stone, 7);
    spawn_drop(&mut app, 18, 4, ResourceType::Stone, 11);
    spawn_worker(&mut app, 0, 0);
    spawn_worker(&mut app, 20, 14);

    tick_until(
        &mut app,
        200,
        |world| world.resource::<Orchestrator>().drops().is_empty() && is_settled(world),
        "every drop should reach the stockpile",
    );

    assert_stockpiled(app.world(), ResourceType::Stone, 21);
    assert_material_conserved(app.world(), ResourceType::Stone, 21);
    assert_no_violations(app.world());
}

#[test]
fn removing_destination_mid_haul_puts_load_down() {
    let mut app = headless_app();
    let pile = add_stockpile(&mut app, Region::single(Position::new(2, 2)), [ResourceCategory::Stone]);
    spawn_drop(&mut app, 15, 2, ResourceType::Stone, 10);
    let worker = spawn_worker(&mut app, 14, 2);

    tick_until(
        &mut app,
        20,
        |world| {
            world
                .resource::<Orchestrator>()
                .worker(worker)
                .is_some_and(|agent| !agent.inventory.is_empty())
        },
        "worker should pick the stone up",
    );
    send_command(&mut app, SettlementCommand::RemoveStockpile { stockpile: pile });
    tick_until(&mut app, 10, is_settled, "worker should put the load down");

    let orchestrator = orchestrator(&app);
    assert!(orchestrator.stockpiles().is_empty());
    assert_eq!(orchestrator.drops().total_of(ResourceType::Stone), 10);
    assert_material_conserved(app.world(), ResourceType::Stone, 10);
    assert_event_seen(
        app.world(),
        |event| {
            matches!(
                event,
                SettlementEvent::TaskFailed {
                    reason: FailureReason::DestinationUnavailable,
                    ..
                }
            )
        },
        "haul failure after its stockpile vanished",
    );
    assert_no_violations(app.world());
}
