use super::components::{
    FailureReason, HaulStage, Priority, Task, TaskId, TaskPayload, TaskStatus,
};
use crate::{
    events::{EventQueue, SettlementEvent},
    grid::Position,
    structures::{SiteId, SlotRef},
    workers::WorkerId,
};
use bevy::log::{debug, warn};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionError {
    NotFound(TaskId),
    Invalid {
        task: TaskId,
        from: TaskStatus,
        to: TaskStatus,
    },
}

impl std::fmt::Display for TransitionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransitionError::NotFound(task) => write!(f, "{task} does not exist"),
            TransitionError::Invalid { task, from, to } => {
                write!(f, "{task} cannot move from {from} to {to}")
            }
        }
    }
}

impl std::error::Error for TransitionError {}

/// Why a claim attempt was rejected. The caller should re-query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimError {
    NotFound(TaskId),
    NotPending { task: TaskId, status: TaskStatus },
    AlreadyAssigned { task: TaskId, worker: WorkerId },
}

impl std::fmt::Display for ClaimError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClaimError::NotFound(task) => write!(f, "{task} does not exist"),
            ClaimError::NotPending { task, status } => {
                write!(f, "{task} is {status}, not Pending")
            }
            ClaimError::AlreadyAssigned { task, worker } => {
                write!(f, "{task} is already assigned to {worker}")
            }
        }
    }
}

impl std::error::Error for ClaimError {}

/// Owner of every task record.
///
/// All mutation goes through this type; other managers hold `TaskId`s and
/// must tolerate `get` returning `None` for pruned ids.
#[derive(Debug, Default)]
pub struct TaskRegistry {
    next_id: u64,
    tasks: BTreeMap<TaskId, Task>,
    events: EventQueue,
}

impl TaskRegistry {
    /// Reserves an id without publishing a task, so resources can be
    /// reserved on the task's behalf before it becomes claimable.
    pub fn allocate_id(&mut self) -> TaskId {
        self.next_id += 1;
        TaskId(self.next_id)
    }

    pub fn insert(&mut self, task: Task) -> TaskId {
        let id = task.id;
        self.next_id = self.next_id.max(id.0);
        debug!("Task {id} created ({:?} at {})", task.kind, task.position);
        self.events.push(SettlementEvent::TaskCreated {
            task: id,
            kind: task.kind,
            position: task.position,
        });
        self.tasks.insert(id, task);
        id
    }

    pub fn create(
        &mut self,
        payload: TaskPayload,
        position: Position,
        priority: Priority,
        now: u64,
    ) -> TaskId {
        let id = self.allocate_id();
        self.insert(Task::new(id, payload, position, priority, now))
    }

    pub fn get(&self, id: TaskId) -> Option<&Task> {
        self.tasks.get(&id)
    }

    pub(crate) fn get_mut(&mut self, id: TaskId) -> Option<&mut Task> {
        self.tasks.get_mut(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Task> {
        self.tasks.values()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn status(&self, id: TaskId) -> Option<TaskStatus> {
        self.get(id).map(|task| task.status)
    }

    /// Non-terminal tasks working for a construction site.
    pub fn outstanding_for_site(&self, site: SiteId) -> Vec<TaskId> {
        self.tasks
            .values()
            .filter(|task| !task.status.is_terminal() && task.payload.site() == Some(site))
            .map(|task| task.id)
            .collect()
    }

    /// The only exclusivity boundary for task ownership: checks and flips the
    /// task in one step.
    pub fn try_claim(&mut self, id: TaskId, worker: WorkerId, now: u64) -> Result<(), ClaimError> {
        let task = self.tasks.get_mut(&id).ok_or(ClaimError::NotFound(id))?;
        if task.status != TaskStatus::Pending {
            return Err(ClaimError::NotPending {
                task: id,
                status: task.status,
            });
        }
        if let Some(holder) = task.assigned_worker {
            return Err(ClaimError::AlreadyAssigned { task: id, worker: holder });
        }
        task.status = TaskStatus::Claimed;
        task.assigned_worker = Some(worker);
        task.claimed_at = Some(now);
        task.last_progress_at = now;
        self.events.push(SettlementEvent::TaskClaimed { task: id, worker });
        Ok(())
    }

    /// `Claimed → Pending`, counting the release against the task's score.
    pub fn release_claim(
        &mut self,
        id: TaskId,
        now: u64,
        retry_after: Option<u64>,
    ) -> Result<(), TransitionError> {
        let task = self.tasks.get_mut(&id).ok_or(TransitionError::NotFound(id))?;
        if task.status != TaskStatus::Claimed {
            return Err(TransitionError::Invalid {
                task: id,
                from: task.status,
                to: TaskStatus::Pending,
            });
        }
        task.status = TaskStatus::Pending;
        task.assigned_worker = None;
        task.claimed_at = None;
        task.last_progress_at = now;
        task.skip_count += 1;
        task.retry_after = retry_after;
        self.events.push(SettlementEvent::TaskReleased {
            task: id,
            skip_count: task.skip_count,
        });
        Ok(())
    }

    /// Generic status change. Claiming goes through `try_claim` only; a
    /// request for `Claimed` here is rejected.
    pub fn set_status(
        &mut self,
        id: TaskId,
        status: TaskStatus,
        now: u64,
    ) -> Result<(), TransitionError> {
        match status {
            TaskStatus::Failed => self.fail(id, FailureReason::Interrupted, now),
            TaskStatus::Pending => self.release_claim(id, now, None),
            _ => self.transition(id, status, now),
        }
    }

    pub fn start(&mut self, id: TaskId, now: u64) -> Result<(), TransitionError> {
        self.transition(id, TaskStatus::InProgress, now)
    }

    pub fn complete(&mut self, id: TaskId, now: u64) -> Result<(), TransitionError> {
        self.transition(id, TaskStatus::Completed, now)
    }

    pub fn cancel(&mut self, id: TaskId, now: u64) -> Result<(), TransitionError> {
        self.transition(id, TaskStatus::Cancelled, now)
    }

    pub fn fail(
        &mut self,
        id: TaskId,
        reason: FailureReason,
        now: u64,
    ) -> Result<(), TransitionError> {
        let kind = self.get(id).map(|task| task.kind);
        self.apply_transition(id, TaskStatus::Failed, now)?;
        if let Some(kind) = kind {
            warn!("Task {id} failed: {reason}");
            self.events.push(SettlementEvent::TaskFailed {
                task: id,
                kind,
                reason,
            });
        }
        Ok(())
    }

    fn transition(&mut self, id: TaskId, status: TaskStatus, now: u64) -> Result<(), TransitionError> {
        self.apply_transition(id, status, now)?;
        let Some(kind) = self.get(id).map(|task| task.kind) else {
            return Ok(());
        };
        match status {
            TaskStatus::Completed => self
                .events
                .push(SettlementEvent::TaskCompleted { task: id, kind }),
            TaskStatus::Cancelled => self
                .events
                .push(SettlementEvent::TaskCancelled { task: id, kind }),
            _ => {}
        }
        Ok(())
    }

    fn apply_transition(
        &mut self,
        id: TaskId,
        status: TaskStatus,
        now: u64,
    ) -> Result<(), TransitionError> {
        let task = self.tasks.get_mut(&id).ok_or(TransitionError::NotFound(id))?;
        let unheld = match status {
            TaskStatus::Claimed => true,
            TaskStatus::InProgress => task.assigned_worker.is_none(),
            _ => false,
        };
        if unheld || !task.status.can_transition_to(status) {
            return Err(TransitionError::Invalid {
                task: id,
                from: task.status,
                to: status,
            });
        }
        task.status = status;
        task.last_progress_at = now;
        if status.is_terminal() {
            task.finished_at = Some(now);
            if status == TaskStatus::Completed {
                task.haul_stage = task.haul_stage.map(|_| HaulStage::Completed);
            }
        }
        Ok(())
    }

    /// Records that the holder made progress this tick.
    pub fn touch(&mut self, id: TaskId, now: u64) {
        if let Some(task) = self.tasks.get_mut(&id) {
            task.last_progress_at = now;
        }
    }

    pub fn set_haul_stage(&mut self, id: TaskId, stage: HaulStage, now: u64) {
        if let Some(task) = self.tasks.get_mut(&id) {
            if task.kind.is_transport() {
                task.haul_stage = Some(stage);
                task.last_progress_at = now;
            }
        }
    }

    /// Binds a pending delivery to the stockpile slot it will be withdrawn
    /// from, shrinking it to what that slot covers. The task is moved to the
    /// pickup so workers are scored against where they walk first.
    pub(crate) fn source_delivery(
        &mut self,
        id: TaskId,
        slot: SlotRef,
        amount: u32,
        pickup: Position,
    ) -> bool {
        let Some(task) = self.tasks.get_mut(&id) else {
            return false;
        };
        let TaskPayload::Deliver {
            amount: requested,
            source,
            ..
        } = &mut task.payload
        else {
            return false;
        };
        if task.status != TaskStatus::Pending || source.is_some() || amount > *requested {
            return false;
        }
        *requested = amount;
        *source = Some(slot);
        task.position = pickup;
        true
    }

    /// Claimed tasks whose holder has shown no progress for `timeout` ticks.
    pub fn stale_claims(&self, now: u64, timeout: u64) -> Vec<TaskId> {
        self.tasks
            .values()
            .filter(|task| {
                task.status == TaskStatus::Claimed
                    && now.saturating_sub(task.last_progress_at) >= timeout
            })
            .map(|task| task.id)
            .collect()
    }

    /// Drops terminal tasks older than the retention window.
    pub fn prune(&mut self, now: u64, retention: u64) -> usize {
        let before = self.tasks.len();
        self.tasks.retain(|_, task| match task.finished_at {
            Some(finished) if task.status.is_terminal() => now.saturating_sub(finished) < retention,
            _ => true,
        });
        let removed = before - self.tasks.len();
        if removed > 0 {
            debug!("Pruned {removed} finished tasks");
        }
        removed
    }

    pub fn drain_events(&mut self) -> impl Iterator<Item = SettlementEvent> + '_ {
        self.events.drain()
    }

    pub(crate) fn next_id(&self) -> u64 {
        self.next_id
    }

    pub(crate) fn restore(&mut self, next_id: u64, tasks: Vec<Task>) {
        self.tasks = tasks.into_iter().map(|task| (task.id, task)).collect();
        self.next_id = self
            .tasks
            .keys()
            .map(|id| id.0)
            .max()
            .unwrap_or(0)
            .max(next_id);
        self.events.clear();
    }
}
