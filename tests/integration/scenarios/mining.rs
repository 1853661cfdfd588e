use settlement_core::{
    commands::SettlementCommand,
    events::SettlementEvent,
    grid::{Position, Region, TileKind},
    materials::{ResourceCategory, ResourceType},
    workers::{HaulDestination, HaulSource, Orchestrator, TaskKind, TaskPayload, TaskStatus},
};

use crate::harness::*;

#[test]
fn hardness_ten_tile_takes_five_work_ticks() {
    let mut app = headless_app();
    let rock = Position::new(5, 5);
    place_rock(&mut app, Region::single(rock), 10);
    let pile = add_stockpile(&mut app, Region::single(Position::new(0, 10)), [ResourceCategory::Stone]);
    spawn_worker(&mut app, 4, 5);
    let task = orchestrator_mut(&mut app).designate_mining(Region::single(rock))[0];

    tick_until(
        &mut app,
        10,
        |world| world.resource::<Orchestrator>().registry().status(task) == Some(TaskStatus::InProgress),
        "mine task should start once the worker is next to the rock",
    );

    tick_n(&mut app, 4);
    assert_task_status(app.world(), task, TaskStatus::InProgress);
    assert_eq!(orchestrator(&app).mining().progress_at(rock), 8);
    assert!(orchestrator(&app).drops().is_empty());

    tick(&mut app);
    assert_task_status(app.world(), task, TaskStatus::Completed);
    let orchestrator = orchestrator(&app);
    assert_eq!(
        orchestrator.world().get_tile(rock).map(|tile| tile.kind),
        Some(TileKind::Ground)
    );
    let drop = orchestrator
        .drops()
        .iter()
        .find(|drop| drop.position == rock)
        .expect("mined rock should leave a drop");
    assert_eq!(drop.resource, ResourceType::Stone);
    let haul = orchestrator
        .registry()
        .iter()
        .find(|task| task.kind == TaskKind::Haul)
        .expect("a haul task should be created for the drop");
    assert!(matches!(
        haul.payload,
        TaskPayload::Haul {
            source: HaulSource::Drop(source),
            destination: HaulDestination::Stockpile(slot),
            ..
        } if source == drop.id && slot.stockpile == pile
    ));
}

#[test]
fn quarry_is_emptied_into_stockpile() {
    let mut app = headless_app();
    let quarry = Region::new(Position::new(15, 2), Position::new(17, 2));
    place_rock(&mut app, quarry, 4);
    add_stockpile(
        &mut app,
        Region::new(Position::new(1, 12), Position::new(3, 12)),
        [ResourceCategory::Stone],
    );
    spawn_worker(&mut app, 1, 1);
    spawn_worker(&mut app, 2, 1);
    send_command(&mut app, SettlementCommand::DesignateMining { region: quarry });

    tick_until(
        &mut app,
        400,
        |world| {
            let orchestrator = world.resource::<Orchestrator>();
            quarry
                .positions()
                .all(|tile| orchestrator.world().is_walkable(tile))
                && orchestrator.drops().is_empty()
                && is_settled(world)
        },
        "quarry should be dug out and every drop stored",
    );

    let stored = orchestrator(&app).stockpiles().total_of(ResourceType::Stone);
    assert!(
        (6..=12).contains(&stored),
        "three rock tiles yield 2-4 stone each, stored {stored}"
    );
    assert_no_violations(app.world());
    assert_event_seen(
        app.world(),
        |event| matches!(event, SettlementEvent::TaskCompleted { kind: TaskKind::Mine, .. }),
        "mine completion",
    );
}

#[test]
fn cancelled_designation_leaves_rock_standing() {
    let mut app = headless_app();
    let rock = Position::new(20, 10);
    place_rock(&mut app, Region::single(rock), 10);
    spawn_worker(&mut app, 0, 0);
    send_command(&mut app, SettlementCommand::DesignateMining { region: Region::single(rock) });
    tick_n(&mut app, 3);
    let task = orchestrator(&app)
        .registry()
        .iter()
        .find(|task| task.kind == TaskKind::Mine)
        .map(|task| task.id)
        .expect("designation should create a mine task");

    send_command(&mut app, SettlementCommand::CancelMining { region: Region::single(rock) });
    tick_n(&mut app, 5);

    assert_task_status(app.world(), task, TaskStatus::Cancelled);
    assert!(!orchestrator(&app).mining().is_designated(rock));
    assert_eq!(
        orchestrator(&app).world().get_tile(rock).map(|tile| tile.kind),
        Some(TileKind::Rock)
    );
    assert!(is_settled(app.world()));
}

#[test]
fn unreachable_rock_is_backed_off_not_mined() {
    let mut app = headless_app();
    // Rock sealed in by a ring of other undesignated rock.
    place_rock(&mut app, Region::new(Position::new(9, 9), Position::new(11, 11)), 50);
    let target = Position::new(10, 10);
    spawn_worker(&mut app, 0, 0);
    let task = orchestrator_mut(&mut app).designate_mining(Region::single(target))[0];

    tick(&mut app);

    let record = orchestrator(&app).registry().get(task).cloned().expect("task exists");
    assert_eq!(record.status, TaskStatus::Pending);
    assert_eq!(record.skip_count, 1);
    assert!(record.retry_after.is_some());
    assert!(is_settled(app.world()));
}

#[test]
fn haul_only_worker_leaves_rock_alone() {
    let mut app = headless_app();
    let rock = Position::new(6, 3);
    place_rock(&mut app, Region::single(rock), 4);
    add_stockpile(&mut app, Region::single(Position::new(2, 8)), [ResourceCategory::Stone]);
    spawn_drop(&mut app, 5, 4, ResourceType::Stone, 5);
    hire_worker(&mut app, 5, 3, [TaskKind::Haul]);
    send_command(&mut app, SettlementCommand::DesignateMining { region: Region::single(rock) });

    tick_until(
        &mut app,
        60,
        |world| world.resource::<Orchestrator>().drops().is_empty() && is_settled(world),
        "the hauler should still store loose stone",
    );
    tick_n(&mut app, 20);

    let orchestrator = orchestrator(&app);
    let worker = orchestrator.workers().next().expect("worker registered by command");
    assert_eq!(worker.capabilities.iter().copied().collect::<Vec<_>>(), vec![TaskKind::Haul]);
    let mine = orchestrator
        .registry()
        .iter()
        .find(|task| task.kind == TaskKind::Mine)
        .expect("designation should create a mine task");
    assert_eq!(mine.status, TaskStatus::Pending);
    assert_eq!(mine.assigned_worker, None);
    assert_eq!(
        orchestrator.world().get_tile(rock).map(|tile| tile.kind),
        Some(TileKind::Rock)
    );
    assert_stockpiled(app.world(), ResourceType::Stone, 5);
}
