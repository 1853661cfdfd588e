use super::{
    components::{FailureReason, Priority, Task, TaskId, TaskPayload},
    registry::TaskRegistry,
};
use crate::{
    config::SimulationConfig,
    grid::{Position, Region, Tile, TileWorld},
    materials::{DropId, DropRegistry, DropTable, ResourceType},
};
use bevy::log::{debug, info, warn};
use rand::{rngs::StdRng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Raised when a tile has been dug out. The orchestrator forwards it to
/// hauling so mining never calls into logistics directly.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MiningEvent {
    TileMined {
        tile: Position,
        task: TaskId,
        drops: Vec<(DropId, ResourceType, u32)>,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MiningProgress {
    Working { progress: u32, required: u32 },
    Completed,
}

/// Persisted per-tile mining state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MiningRecord {
    pub tile: Position,
    pub task: Option<TaskId>,
    pub progress: u32,
}

#[derive(Debug)]
pub struct MiningManager {
    base_time_per_hardness: u32,
    priority: Priority,
    seed: u64,
    rng: StdRng,
    designations: BTreeMap<Position, TaskId>,
    /// Accumulated work per tile; outlives the task that produced it.
    progress: BTreeMap<Position, u32>,
    events: Vec<MiningEvent>,
}

impl Default for MiningManager {
    fn default() -> Self {
        Self::from_config(&SimulationConfig::default())
    }
}

impl MiningManager {
    pub fn new(base_time_per_hardness: u32, priority: Priority, seed: u64) -> Self {
        Self {
            base_time_per_hardness: base_time_per_hardness.max(1),
            priority,
            seed,
            rng: StdRng::seed_from_u64(seed),
            designations: BTreeMap::new(),
            progress: BTreeMap::new(),
            events: Vec::new(),
        }
    }

    pub fn from_config(config: &SimulationConfig) -> Self {
        Self::new(
            config.base_time_per_hardness,
            Priority::new(config.priorities.mine),
            config.rng_seed,
        )
    }

    /// Creates one `Mine` task per mineable tile in `region` that has no live
    /// designation yet.
    pub fn designate_mining(
        &mut self,
        world: &TileWorld,
        registry: &mut TaskRegistry,
        region: Region,
        now: u64,
    ) -> Vec<TaskId> {
        let mut created = Vec::new();
        for position in region.positions() {
            let Some(tile) = world.get_tile(position).copied() else {
                continue;
            };
            if !tile.is_mineable() {
                continue;
            }
            let live = self
                .designations
                .get(&position)
                .and_then(|task| registry.status(*task))
                .is_some_and(|status| !status.is_terminal());
            if live {
                continue;
            }
            let task = registry.create(
                TaskPayload::Mine {
                    tile: position,
                    hardness: tile.hardness,
                    drop_table: DropTable::for_tile(tile.kind),
                },
                position,
                self.priority,
                now,
            );
            self.designations.insert(position, task);
            created.push(task);
        }
        if !created.is_empty() {
            info!("Designated {} tiles for mining", created.len());
        }
        created
    }

    /// Cancels live designations inside `region`. Accumulated progress stays
    /// on the tiles.
    pub fn cancel_designation(
        &mut self,
        registry: &mut TaskRegistry,
        region: Region,
        now: u64,
    ) -> Vec<TaskId> {
        let tiles: Vec<Position> = self
            .designations
            .keys()
            .filter(|tile| region.contains(**tile))
            .copied()
            .collect();
        let mut cancelled = Vec::new();
        for tile in tiles {
            let Some(task) = self.designations.remove(&tile) else {
                continue;
            };
            if registry.status(task).is_some_and(|status| !status.is_terminal()) {
                match registry.cancel(task, now) {
                    Ok(()) => cancelled.push(task),
                    Err(error) => warn!("Could not cancel mining at {tile}: {error}"),
                }
            }
        }
        cancelled
    }

    pub fn is_designated(&self, tile: Position) -> bool {
        self.designations.contains_key(&tile)
    }

    pub fn progress_at(&self, tile: Position) -> u32 {
        self.progress.get(&tile).copied().unwrap_or(0)
    }

    pub fn required_work(&self, hardness: u32) -> u32 {
        hardness.saturating_mul(self.base_time_per_hardness)
    }

    /// Adds one tick of work to the tile a `Mine` task targets. On completion
    /// the tile becomes ground, drops are rolled and `TileMined` is queued.
    pub fn apply_work(
        &mut self,
        world: &mut TileWorld,
        drops: &mut DropRegistry,
        task: &Task,
        work: u32,
    ) -> Result<MiningProgress, FailureReason> {
        let TaskPayload::Mine {
            tile,
            hardness,
            drop_table,
        } = &task.payload
        else {
            return Err(FailureReason::TargetGone);
        };
        if !world.get_tile(*tile).is_some_and(Tile::is_mineable) {
            self.progress.remove(tile);
            return Err(FailureReason::TargetGone);
        }

        let required = self.required_work(*hardness);
        let progress = self.progress.entry(*tile).or_insert(0);
        *progress = progress.saturating_add(work);
        if *progress < required {
            return Ok(MiningProgress::Working {
                progress: *progress,
                required,
            });
        }

        self.progress.remove(tile);
        self.designations.remove(tile);
        world.set_tile(*tile, Tile::ground());
        let spawned = drop_table
            .roll(&mut self.rng)
            .into_iter()
            .map(|(resource, amount)| (drops.spawn(*tile, resource, amount), resource, amount))
            .collect::<Vec<_>>();
        debug!("Mined {tile}, dropped {spawned:?}");
        self.events.push(MiningEvent::TileMined {
            tile: *tile,
            task: task.id,
            drops: spawned,
        });
        Ok(MiningProgress::Completed)
    }

    pub fn drain_events(&mut self) -> Vec<MiningEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn records(&self) -> Vec<MiningRecord> {
        let mut tiles: Vec<Position> = self
            .designations
            .keys()
            .chain(self.progress.keys())
            .copied()
            .collect();
        tiles.sort();
        tiles.dedup();
        tiles
            .into_iter()
            .map(|tile| MiningRecord {
                tile,
                task: self.designations.get(&tile).copied(),
                progress: self.progress_at(tile),
            })
            .collect()
    }

    /// Replaces designations and progress. The drop RNG is reseeded from the
    /// configured seed and the restore tick so replays stay deterministic.
    pub(crate) fn restore(&mut self, records: Vec<MiningRecord>, tick: u64) {
        self.designations.clear();
        self.progress.clear();
        for record in records {
            if let Some(task) = record.task {
                self.designations.insert(record.tile, task);
            }
            if record.progress > 0 {
                self.progress.insert(record.tile, record.progress);
            }
        }
        self.rng = StdRng::seed_from_u64(self.seed.wrapping_add(tick));
        self.events.clear();
    }
}
