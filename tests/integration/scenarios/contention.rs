use std::collections::{BTreeMap, BTreeSet};

use settlement_core::{
    grid::{Position, Region},
    materials::DropTable,
    workers::{
        ClaimError, Priority, TaskId, TaskKind, TaskPayload, TaskRegistry, TaskScheduler,
        TaskStatus, WorkerId,
    },
};

use crate::harness::*;

fn all_kinds() -> BTreeSet<TaskKind> {
    TaskKind::ALL.into_iter().collect()
}

fn mine_at(registry: &mut TaskRegistry, x: i32, y: i32, priority: u8) -> TaskId {
    let tile = Position::new(x, y);
    registry.create(
        TaskPayload::Mine {
            tile,
            hardness: 10,
            drop_table: DropTable::default(),
        },
        tile,
        Priority::new(priority),
        0,
    )
}

#[test]
fn same_snapshot_yields_one_claim() {
    let mut registry = TaskRegistry::default();
    let scheduler = TaskScheduler::default();
    let only = mine_at(&mut registry, 5, 5, 3);
    let snapshot = scheduler.snapshot(&registry, 1, |_| true);
    let (first, second) = (WorkerId(1), WorkerId(2));

    let first_pick = scheduler.find_best_task(&snapshot, Position::new(0, 0), &all_kinds());
    let second_pick = scheduler.find_best_task(&snapshot, Position::new(9, 9), &all_kinds());
    assert_eq!(first_pick, Some(only));
    assert_eq!(second_pick, Some(only));

    assert_eq!(scheduler.claim(&mut registry, only, first, 1), Ok(()));
    assert!(matches!(
        scheduler.claim(&mut registry, only, second, 1),
        Err(ClaimError::NotPending { .. })
    ));
    assert_eq!(registry.get(only).and_then(|task| task.assigned_worker), Some(first));
}

#[test]
fn loser_falls_back_to_next_best() {
    let mut registry = TaskRegistry::default();
    let scheduler = TaskScheduler::default();
    let best = mine_at(&mut registry, 5, 5, 4);
    let runner_up = mine_at(&mut registry, 6, 5, 2);
    let snapshot = scheduler.snapshot(&registry, 1, |_| true);
    let from = Position::new(0, 0);
    scheduler.claim(&mut registry, best, WorkerId(1), 1).unwrap();

    let claimed = scheduler
        .rank(&snapshot, from, &all_kinds())
        .into_iter()
        .find(|task| scheduler.claim(&mut registry, *task, WorkerId(2), 1).is_ok());

    assert_eq!(claimed, Some(runner_up));
}

#[test]
fn two_workers_one_rock() {
    let mut app = headless_app();
    let rock = Position::new(6, 3);
    place_rock(&mut app, Region::single(rock), 10);
    let left = spawn_worker(&mut app, 4, 3);
    let right = spawn_worker(&mut app, 8, 3);
    let task = orchestrator_mut(&mut app).designate_mining(Region::single(rock))[0];

    tick(&mut app);

    let orchestrator = orchestrator(&app);
    let holders: Vec<_> = [left, right]
        .into_iter()
        .filter(|id| orchestrator.worker(*id).and_then(|agent| agent.current_task) == Some(task))
        .collect();
    assert_eq!(holders.len(), 1, "exactly one worker may hold {task}");
    assert_eq!(orchestrator.registry().status(task), Some(TaskStatus::Claimed));
    assert_eq!(
        orchestrator.registry().get(task).and_then(|record| record.assigned_worker),
        holders.first().copied()
    );
    assert_no_violations(app.world());
}

#[test]
fn crowd_spreads_over_distinct_tasks() {
    let mut app = headless_app();
    let rocks = Region::new(Position::new(10, 2), Position::new(10, 5));
    place_rock(&mut app, rocks, 20);
    for y in 2..6 {
        spawn_worker(&mut app, 8, y);
    }
    spawn_worker(&mut app, 8, 8);
    orchestrator_mut(&mut app).designate_mining(rocks);

    tick(&mut app);

    let orchestrator = orchestrator(&app);
    let mut held = BTreeMap::new();
    for agent in orchestrator.workers() {
        if let Some(task) = agent.current_task {
            assert!(
                held.insert(task, agent.id).is_none(),
                "{task} handed to two workers"
            );
        }
    }
    assert_eq!(held.len(), 4, "four rocks, four claims");
    assert_eq!(
        orchestrator.workers().filter(|agent| agent.current_task.is_none()).count(),
        1
    );
    assert_no_violations(app.world());
}
