use bevy::prelude::*;

use settlement_core::{
    events::SettlementEvent,
    invariants::violations,
    materials::ResourceType,
    workers::{Orchestrator, TaskId, TaskStatus, WorkerId},
};

use super::app::EventLog;

/// Material held anywhere outside the terrain: stockpiles, loose drops,
/// worker inventories and what sites have received.
pub fn material_total(world: &World, resource: ResourceType) -> u32 {
    let orchestrator = world.resource::<Orchestrator>();
    let carried: u32 = orchestrator
        .workers()
        .map(|worker| worker.inventory.amount_of(resource))
        .sum();
    let at_sites: u32 = orchestrator
        .construction()
        .iter()
        .map(|site| site.delivered_of(resource))
        .sum();
    orchestrator.stockpiles().total_of(resource)
        + orchestrator.drops().total_of(resource)
        + carried
        + at_sites
}

/// Nothing is claimed, in progress or carried.
pub fn is_settled(world: &World) -> bool {
    let orchestrator = world.resource::<Orchestrator>();
    orchestrator
        .workers()
        .all(|worker| worker.is_idle() && worker.inventory.is_empty())
        && orchestrator
            .registry()
            .iter()
            .all(|task| !task.status.is_held())
}

pub fn assert_stockpiled(world: &World, resource: ResourceType, expected_qty: u32) {
    let actual = world
        .resource::<Orchestrator>()
        .stockpiles()
        .total_of(resource);
    assert_eq!(
        actual, expected_qty,
        "stockpiles: expected {expected_qty}x {resource}, found {actual}"
    );
}

pub fn assert_material_conserved(world: &World, resource: ResourceType, expected_qty: u32) {
    let actual = material_total(world, resource);
    assert_eq!(
        actual, expected_qty,
        "{resource} created or lost: expected {expected_qty} in the settlement, found {actual}"
    );
}

pub fn assert_task_status(world: &World, task: TaskId, expected: TaskStatus) {
    let actual = world.resource::<Orchestrator>().registry().status(task);
    assert_eq!(
        actual,
        Some(expected),
        "{task}: expected {expected}, found {actual:?}"
    );
}

pub fn assert_worker_at(world: &World, worker: WorkerId, x: i32, y: i32) {
    let agent = world
        .resource::<Orchestrator>()
        .worker(worker)
        .unwrap_or_else(|| panic!("{worker} is not registered"));
    assert_eq!(
        (agent.position.x, agent.position.y),
        (x, y),
        "{worker}: expected position ({x}, {y}), found {}",
        agent.position
    );
}

pub fn assert_no_violations(world: &World) {
    let found = violations(world.resource::<Orchestrator>());
    assert!(found.is_empty(), "invariant violations: {found:#?}");
}

pub fn assert_event_seen(world: &World, matches: impl Fn(&SettlementEvent) -> bool, msg: &str) {
    let log = world.resource::<EventLog>();
    assert!(
        log.0.iter().any(matches),
        "expected event not published: {msg}"
    );
}
