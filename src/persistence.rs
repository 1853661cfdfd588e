use crate::{
    constants::snapshot::VERSION,
    materials::ResourceDrop,
    structures::{ConstructionSite, Stockpile},
    workers::{
        HaulSource, HaulStage, MiningRecord, Orchestrator, Task, TaskPayload, TaskStatus,
        WorkerAgent, WorkerId,
    },
};
use bevy::log::{info, warn};
use ron::ser::PrettyConfig;
use serde::{Deserialize, Serialize};

/// Everything needed to resume a settlement. Terrain is not included; it
/// belongs to the host world.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SettlementSnapshot {
    pub version: u32,
    pub tick: u64,
    pub next_task_id: u64,
    pub next_stockpile_id: u32,
    pub next_site_id: u32,
    pub next_worker_id: u32,
    pub tasks: Vec<Task>,
    pub stockpiles: Vec<Stockpile>,
    pub sites: Vec<ConstructionSite>,
    pub drops: Vec<ResourceDrop>,
    pub mining: Vec<MiningRecord>,
    pub workers: Vec<WorkerAgent>,
}

#[derive(Debug)]
pub enum SnapshotError {
    Encode(ron::Error),
    Decode(ron::error::SpannedError),
    UnsupportedVersion { found: u32, expected: u32 },
}

impl std::fmt::Display for SnapshotError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SnapshotError::Encode(error) => write!(f, "failed to encode snapshot: {error}"),
            SnapshotError::Decode(error) => write!(f, "failed to decode snapshot: {error}"),
            SnapshotError::UnsupportedVersion { found, expected } => {
                write!(f, "snapshot version {found} is not supported (expected {expected})")
            }
        }
    }
}

impl std::error::Error for SnapshotError {}

impl SettlementSnapshot {
    pub fn to_ron(&self) -> Result<String, SnapshotError> {
        ron::ser::to_string_pretty(self, PrettyConfig::default()).map_err(SnapshotError::Encode)
    }

    pub fn from_ron(ron_content: &str) -> Result<Self, SnapshotError> {
        let snapshot: Self = ron::from_str(ron_content).map_err(SnapshotError::Decode)?;
        if snapshot.version != VERSION {
            return Err(SnapshotError::UnsupportedVersion {
                found: snapshot.version,
                expected: VERSION,
            });
        }
        Ok(snapshot)
    }
}

/// Brings a saved task back to a state no worker is mid-way through, since
/// workers come back idle. This is the only place a task moves from
/// `InProgress` back to `Pending`: the holder no longer exists, and mining
/// and build progress live on the tile rather than the task, so nothing is
/// lost by handing the work out again. A load that already left its source
/// cannot be resumed and fails.
fn settle_restored_task(mut task: Task, tick: u64) -> Task {
    let loaded = task.haul_stage.is_some_and(HaulStage::is_loaded)
        || matches!(
            task.payload,
            TaskPayload::Haul {
                source: HaulSource::Carried(_),
                ..
            }
        );
    match task.status {
        TaskStatus::InProgress if task.kind.is_transport() && loaded => {
            task.status = TaskStatus::Failed;
            task.finished_at = Some(tick);
        }
        TaskStatus::Claimed | TaskStatus::InProgress => {
            task.status = TaskStatus::Pending;
            task.assigned_worker = None;
            task.claimed_at = None;
            task.last_progress_at = tick;
            if task.kind.is_transport() {
                task.haul_stage = Some(HaulStage::TravelingToPickup);
            }
        }
        TaskStatus::Pending | TaskStatus::Completed | TaskStatus::Cancelled | TaskStatus::Failed => {}
    }
    task
}

impl Orchestrator {
    pub fn snapshot(&self) -> SettlementSnapshot {
        let settlement = &self.settlement;
        SettlementSnapshot {
            version: VERSION,
            tick: self.tick,
            next_task_id: settlement.registry.next_id(),
            next_stockpile_id: settlement.stockpiles.next_id(),
            next_site_id: settlement.construction.next_id(),
            next_worker_id: self.next_worker,
            tasks: settlement.registry.iter().cloned().collect(),
            stockpiles: settlement.stockpiles.iter().cloned().collect(),
            sites: settlement.construction.iter().cloned().collect(),
            drops: settlement.drops.iter().cloned().collect(),
            mining: settlement.mining.records(),
            workers: self.workers.values().cloned().collect(),
        }
    }

    /// Replaces the whole settlement with `snapshot`. Restoring the same
    /// snapshot twice yields the same state.
    pub fn restore(&mut self, snapshot: SettlementSnapshot) -> Result<(), SnapshotError> {
        if snapshot.version != VERSION {
            return Err(SnapshotError::UnsupportedVersion {
                found: snapshot.version,
                expected: VERSION,
            });
        }
        let tick = snapshot.tick;
        let tasks: Vec<Task> = snapshot
            .tasks
            .into_iter()
            .filter(|task| {
                let consistent = task.is_kind_consistent();
                if !consistent {
                    warn!(
                        "Dropping {} from snapshot: declared {:?} but carries {:?}",
                        task.id,
                        task.kind,
                        task.payload.kind()
                    );
                }
                consistent
            })
            .map(|task| settle_restored_task(task, tick))
            .collect();

        let settlement = &mut self.settlement;
        settlement.registry.restore(snapshot.next_task_id, tasks);
        settlement.world.clear_occupancy();
        settlement.stockpiles.restore(
            &mut settlement.world,
            snapshot.next_stockpile_id,
            snapshot.stockpiles,
        );
        settlement.construction.restore(
            &mut settlement.world,
            snapshot.next_site_id,
            snapshot.sites,
        );

        settlement.drops.restore(snapshot.drops);
        settlement.drops.clear_reservations();
        let drop_holds: Vec<_> = settlement
            .registry
            .iter()
            .filter(|task| !task.status.is_terminal())
            .filter_map(|task| match task.payload {
                TaskPayload::Haul {
                    source: HaulSource::Drop(drop),
                    amount,
                    ..
                } => Some((task.id, drop, amount)),
                _ => None,
            })
            .collect();
        for (task, drop, amount) in drop_holds {
            if let Err(error) = settlement.drops.reserve(drop, amount) {
                warn!("Restored {task} could not re-reserve {drop}: {error}");
            }
        }

        settlement.mining.restore(snapshot.mining, tick);

        self.workers = snapshot
            .workers
            .into_iter()
            .map(|mut worker| {
                worker.reset();
                (worker.id, worker)
            })
            .collect();
        self.next_worker = self
            .workers
            .keys()
            .map(|WorkerId(id)| *id)
            .max()
            .unwrap_or(0)
            .max(snapshot.next_worker_id);
        self.tick = tick;

        self.settle_reservations();
        self.settlement.events.clear();
        self.settlement.registry.drain_events().for_each(drop);
        self.settlement.stockpiles.drain_events().for_each(drop);
        self.settlement.construction.drain_events().for_each(drop);
        info!(
            "Restored snapshot at tick {tick}: {} tasks, {} workers",
            self.settlement.registry.len(),
            self.workers.len()
        );
        Ok(())
    }
}
