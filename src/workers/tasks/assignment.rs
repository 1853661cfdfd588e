use super::{
    components::{Task, TaskId, TaskKind, TaskStatus},
    registry::{ClaimError, TaskRegistry, TransitionError},
};
use crate::{
    config::SimulationConfig, constants::scoring::PRIORITY_WEIGHT, grid::Position,
    workers::WorkerId,
};
use bevy::log::debug;
use std::{cmp::Reverse, collections::BTreeSet};

/// Scoring inputs of one claimable task, copied out of the registry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingEntry {
    pub id: TaskId,
    pub kind: TaskKind,
    pub position: Position,
    pub priority: u8,
    pub created_at: u64,
    pub skip_count: u32,
}

/// Immutable per-tick view of claimable work. Every worker ranks against
/// the same snapshot; only the claim itself touches the registry.
#[derive(Clone, Debug, Default)]
pub struct PendingSnapshot {
    pub tick: u64,
    entries: Vec<PendingEntry>,
}

impl PendingSnapshot {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PendingEntry> {
        self.entries.iter()
    }
}

#[derive(Clone, Copy, Debug)]
pub struct TaskScheduler {
    skip_penalty: i64,
}

impl Default for TaskScheduler {
    fn default() -> Self {
        Self::from_config(&SimulationConfig::default())
    }
}

impl TaskScheduler {
    pub fn new(skip_penalty: i64) -> Self {
        Self { skip_penalty }
    }

    pub fn from_config(config: &SimulationConfig) -> Self {
        Self::new(config.skip_penalty)
    }

    /// Captures `Pending`, unassigned tasks that are past their backoff and
    /// accepted by `claimable`.
    pub fn snapshot(
        &self,
        registry: &TaskRegistry,
        now: u64,
        claimable: impl Fn(&Task) -> bool,
    ) -> PendingSnapshot {
        let entries = registry
            .iter()
            .filter(|task| {
                task.status == TaskStatus::Pending
                    && task.assigned_worker.is_none()
                    && task.retry_after.is_none_or(|tick| tick <= now)
                    && claimable(task)
            })
            .map(|task| PendingEntry {
                id: task.id,
                kind: task.kind,
                position: task.position,
                priority: task.priority.get(),
                created_at: task.created_at,
                skip_count: task.skip_count,
            })
            .collect();
        PendingSnapshot { tick: now, entries }
    }

    pub fn score(&self, entry: &PendingEntry, from: Position) -> i64 {
        i64::from(entry.priority) * PRIORITY_WEIGHT
            - i64::from(from.manhattan_distance(entry.position))
            - i64::from(entry.skip_count) * self.skip_penalty
    }

    /// Candidates for a worker, best first. Ties go to the oldest task, then
    /// the lowest id.
    pub fn rank(
        &self,
        snapshot: &PendingSnapshot,
        from: Position,
        capabilities: &BTreeSet<TaskKind>,
    ) -> Vec<TaskId> {
        let mut candidates: Vec<_> = snapshot
            .iter()
            .filter(|entry| capabilities.contains(&entry.kind))
            .map(|entry| (Reverse(self.score(entry, from)), entry.created_at, entry.id))
            .collect();
        candidates.sort_unstable();
        candidates.into_iter().map(|(_, _, id)| id).collect()
    }

    pub fn find_best_task(
        &self,
        snapshot: &PendingSnapshot,
        from: Position,
        capabilities: &BTreeSet<TaskKind>,
    ) -> Option<TaskId> {
        self.rank(snapshot, from, capabilities).into_iter().next()
    }

    /// The exclusivity boundary. On rejection the caller re-queries.
    pub fn claim(
        &self,
        registry: &mut TaskRegistry,
        task: TaskId,
        worker: WorkerId,
        now: u64,
    ) -> Result<(), ClaimError> {
        let result = registry.try_claim(task, worker, now);
        match &result {
            Ok(()) => debug!("{worker} claimed {task}"),
            Err(error) => debug!("{worker} lost claim: {error}"),
        }
        result
    }

    pub fn release_claim(
        &self,
        registry: &mut TaskRegistry,
        task: TaskId,
        now: u64,
    ) -> Result<(), TransitionError> {
        debug!("Releasing stale claim on {task}");
        registry.release_claim(task, now, None)
    }

    /// Releases a claim whose target could not be reached and holds the task
    /// back for `backoff` ticks.
    pub fn requeue_unreachable(
        &self,
        registry: &mut TaskRegistry,
        task: TaskId,
        now: u64,
        backoff: u64,
    ) -> Result<(), TransitionError> {
        debug!("{task} unreachable; retrying after {backoff} ticks");
        registry.release_claim(task, now, Some(now + backoff))
    }
}
