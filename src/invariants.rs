use bevy::prelude::*;
use std::collections::BTreeMap;

use crate::{
    structures::{SlotRef, TileState},
    workers::{Orchestrator, TaskPayload, TaskStatus},
};

pub struct InvariantPlugin;

impl Plugin for InvariantPlugin {
    fn build(&self, app: &mut App) {
        app.add_systems(PostUpdate, check_settlement_invariants);
    }
}

fn report_violation(message: &str) {
    let msg = format!("INVARIANT VIOLATION: {message}");
    if cfg!(test) {
        #[allow(clippy::panic)]
        {
            panic!("{msg}");
        }
    } else {
        error!("{msg}");
    }
}

fn check_settlement_invariants(orchestrator: Option<Res<Orchestrator>>) {
    let Some(orchestrator) = orchestrator else {
        return;
    };
    for violation in violations(&orchestrator) {
        report_violation(&violation);
    }
}

/// Every broken invariant, described for a log line.
pub fn violations(orchestrator: &Orchestrator) -> Vec<String> {
    let mut found = Vec::new();
    check_claims(orchestrator, &mut found);
    check_reservations(orchestrator, &mut found);
    check_build_order(orchestrator, &mut found);
    check_workers(orchestrator, &mut found);
    found
}

fn check_claims(orchestrator: &Orchestrator, found: &mut Vec<String>) {
    let registry = orchestrator.registry();
    for task in registry.iter() {
        match task.status {
            TaskStatus::Pending if task.assigned_worker.is_some() => {
                found.push(format!("{} is Pending but assigned", task.id));
            }
            TaskStatus::Claimed | TaskStatus::InProgress if task.assigned_worker.is_none() => {
                found.push(format!("{} is {} without a worker", task.id, task.status));
            }
            _ => {}
        }
        if !task.is_kind_consistent() {
            found.push(format!("{} kind does not match its payload", task.id));
        }
    }

    let mut holders = BTreeMap::new();
    for worker in orchestrator.workers() {
        let Some(task) = worker.current_task else {
            continue;
        };
        if let Some(other) = holders.insert(task, worker.id) {
            found.push(format!("{task} held by both {other} and {}", worker.id));
        }
    }
}

fn check_reservations(orchestrator: &Orchestrator, found: &mut Vec<String>) {
    let registry = orchestrator.registry();
    let stockpiles = orchestrator.stockpiles();
    for (slot, reservation) in stockpiles.reservations() {
        if registry
            .status(reservation.task)
            .is_none_or(TaskStatus::is_terminal)
        {
            found.push(format!("{slot} reserved by finished {}", reservation.task));
        }
    }
    for stockpile in stockpiles.iter() {
        for (index, held) in stockpile.slots.iter().enumerate() {
            let slot = SlotRef::new(stockpile.id, index);
            if held.withdraw_reserved() > held.amount {
                found.push(format!(
                    "{slot} promises {} but holds {}",
                    held.withdraw_reserved(),
                    held.amount
                ));
            }
            if let Some(deposit) = held.deposit_hold() {
                if held.reservations.len() > 1 {
                    found.push(format!("{slot} shares its deposit hold with other tasks"));
                }
                if held.amount + deposit.amount > stockpiles.stack_limit() {
                    found.push(format!("{slot} deposit reservation exceeds the stack limit"));
                }
            }
        }
    }
    for drop in orchestrator.drops().iter() {
        if drop.reserved > drop.amount {
            found.push(format!(
                "{} reserves {} of {}",
                drop.id, drop.reserved, drop.amount
            ));
        }
    }
}

fn check_build_order(orchestrator: &Orchestrator, found: &mut Vec<String>) {
    let construction = orchestrator.construction();
    for site in construction.iter() {
        for (offset, tile) in &site.tiles {
            let started = matches!(tile.state, TileState::InProgress | TileState::Completed);
            if started && !site.predecessors_complete(tile.layer) {
                found.push(format!(
                    "{} tile {offset:?} ({:?}) started before the layer below finished",
                    site.id, tile.layer
                ));
            }
        }
    }
    for task in orchestrator.registry().iter() {
        let TaskPayload::Build { site, layer, .. } = task.payload else {
            continue;
        };
        if task.status.is_terminal() {
            continue;
        }
        if construction
            .get(site)
            .is_some_and(|record| !record.predecessors_complete(layer))
        {
            found.push(format!("{} builds {layer:?} before the layer below", task.id));
        }
    }
}

fn check_workers(orchestrator: &Orchestrator, found: &mut Vec<String>) {
    for worker in orchestrator.workers() {
        if let Some((resource, amount)) = worker.inventory.carried() {
            if amount > worker.inventory.capacity() {
                found.push(format!(
                    "{} carries {amount} {resource} over capacity {}",
                    worker.id,
                    worker.inventory.capacity()
                ));
            }
        }
    }
}
