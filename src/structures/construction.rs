use crate::{
    config::SimulationConfig,
    events::{EventQueue, SettlementEvent},
    grid::{Offset, Position, TileWorld},
    materials::ResourceType,
    structures::{validate_placement, Blueprint, BuildLayer, PlacementError},
    workers::{HaulDestination, Priority, Task, TaskId, TaskPayload, TaskRegistry, TaskStatus},
};
use bevy::log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SiteId(pub u32);

impl std::fmt::Display for SiteId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "site#{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SiteStatus {
    Planned,
    InProgress,
    Paused,
    Completed,
    Cancelled,
}

impl SiteStatus {
    /// Tasks for the site may be claimed.
    pub fn is_active(self) -> bool {
        matches!(self, SiteStatus::Planned | SiteStatus::InProgress)
    }

    pub fn is_closed(self) -> bool {
        matches!(self, SiteStatus::Completed | SiteStatus::Cancelled)
    }
}

impl std::fmt::Display for SiteStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TileState {
    Pending,
    MaterialsDelivered,
    InProgress,
    Completed,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteTile {
    pub layer: BuildLayer,
    pub state: TileState,
    pub required: BTreeMap<ResourceType, u32>,
    /// Share of the site's delivered materials set aside for this tile.
    pub allocated: BTreeMap<ResourceType, u32>,
    pub work_required: u32,
    pub progress: u32,
    pub build_task: Option<TaskId>,
}

impl SiteTile {
    fn is_supplied(&self) -> bool {
        self.required
            .iter()
            .all(|(resource, amount)| self.allocated.get(resource).copied().unwrap_or(0) >= *amount)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstructionSite {
    pub id: SiteId,
    pub blueprint: String,
    pub position: Position,
    pub status: SiteStatus,
    /// Status to return to when a paused site resumes.
    #[serde(default)]
    pub resume_status: Option<SiteStatus>,
    pub requirements: BTreeMap<ResourceType, u32>,
    pub delivered: BTreeMap<ResourceType, u32>,
    pub tiles: BTreeMap<Offset, SiteTile>,
}

impl ConstructionSite {
    pub fn tile_position(&self, offset: Offset) -> Position {
        self.position.offset(offset)
    }

    pub fn footprint(&self) -> impl Iterator<Item = Position> + '_ {
        self.tiles.keys().map(|offset| self.position.offset(*offset))
    }

    pub fn delivered_of(&self, resource: ResourceType) -> u32 {
        self.delivered.get(&resource).copied().unwrap_or(0)
    }

    /// Material still to arrive, ignoring what is already on its way.
    pub fn remaining_need(&self, resource: ResourceType) -> u32 {
        self.requirements
            .get(&resource)
            .copied()
            .unwrap_or(0)
            .saturating_sub(self.delivered_of(resource))
    }

    pub fn is_complete(&self) -> bool {
        self.tiles
            .values()
            .all(|tile| tile.state == TileState::Completed)
    }

    /// Whether every tile of the nearest lower layer present is completed.
    pub fn predecessors_complete(&self, layer: BuildLayer) -> bool {
        let Some(previous) = self
            .tiles
            .values()
            .map(|tile| tile.layer)
            .filter(|candidate| *candidate < layer)
            .max()
        else {
            return true;
        };
        self.tiles
            .values()
            .filter(|tile| tile.layer == previous)
            .all(|tile| tile.state == TileState::Completed)
    }

    /// Materials built into completed tiles.
    pub fn consumed(&self) -> BTreeMap<ResourceType, u32> {
        let mut consumed = BTreeMap::new();
        for tile in self
            .tiles
            .values()
            .filter(|tile| tile.state == TileState::Completed)
        {
            for (resource, amount) in &tile.allocated {
                *consumed.entry(*resource).or_insert(0) += amount;
            }
        }
        consumed
    }

    fn build_order(&self) -> Vec<Offset> {
        let mut order: Vec<_> = self
            .tiles
            .iter()
            .map(|(offset, tile)| (tile.layer, *offset))
            .collect();
        order.sort();
        order.into_iter().map(|(_, offset)| offset).collect()
    }

    /// Hands unallocated deliveries to pending tiles in build order. Returns
    /// the tiles that became fully supplied.
    fn allocate(&mut self) -> Vec<Offset> {
        let mut pool = self.delivered.clone();
        for tile in self.tiles.values() {
            for (resource, amount) in &tile.allocated {
                if let Some(available) = pool.get_mut(resource) {
                    *available = available.saturating_sub(*amount);
                }
            }
        }

        let mut supplied = Vec::new();
        for offset in self.build_order() {
            let Some(tile) = self.tiles.get_mut(&offset) else {
                continue;
            };
            if tile.state != TileState::Pending {
                continue;
            }
            for (resource, required) in &tile.required {
                let held = tile.allocated.entry(*resource).or_insert(0);
                let available = pool.entry(*resource).or_insert(0);
                let granted = required.saturating_sub(*held).min(*available);
                *held += granted;
                *available -= granted;
            }
            if tile.is_supplied() {
                tile.state = TileState::MaterialsDelivered;
                supplied.push(offset);
            }
        }
        supplied
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConstructionError {
    SiteNotFound(SiteId),
    SiteClosed { site: SiteId, status: SiteStatus },
    TileNotFound { site: SiteId, offset: Offset },
    InvalidStatus { site: SiteId, status: SiteStatus },
}

impl std::fmt::Display for ConstructionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConstructionError::SiteNotFound(site) => write!(f, "{site} does not exist"),
            ConstructionError::SiteClosed { site, status } => {
                write!(f, "{site} is already {status}")
            }
            ConstructionError::TileNotFound { site, offset } => {
                write!(f, "{site} has no tile at ({}, {})", offset.dx, offset.dy)
            }
            ConstructionError::InvalidStatus { site, status } => {
                write!(f, "{site} cannot do that while {status}")
            }
        }
    }
}

impl std::error::Error for ConstructionError {}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BuildProgress {
    Working,
    TileCompleted,
    SiteCompleted,
}

/// What a cancelled site leaves behind for the caller to settle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CancelledSite {
    pub site: SiteId,
    pub position: Position,
    pub cancelled_tasks: Vec<TaskId>,
    pub refund: Vec<(ResourceType, u32)>,
}

/// Material per resource already promised to a site by live transport tasks.
pub fn in_flight_for_site(registry: &TaskRegistry, site: SiteId) -> BTreeMap<ResourceType, u32> {
    let mut totals = BTreeMap::new();
    for task in registry.iter().filter(|task| !task.status.is_terminal()) {
        match &task.payload {
            TaskPayload::Deliver {
                site: target,
                resource,
                amount,
                ..
            }
            | TaskPayload::Haul {
                destination: HaulDestination::Site(target),
                resource,
                amount,
                ..
            } if *target == site => {
                *totals.entry(*resource).or_insert(0) += amount;
            }
            _ => {}
        }
    }
    totals
}

/// Owner of every construction site.
#[derive(Debug)]
pub struct ConstructionManager {
    next_id: u32,
    chunk_size: u32,
    deliver_priority: Priority,
    build_priority: Priority,
    sites: BTreeMap<SiteId, ConstructionSite>,
    events: EventQueue,
}

impl Default for ConstructionManager {
    fn default() -> Self {
        Self::from_config(&SimulationConfig::default())
    }
}

impl ConstructionManager {
    pub fn new(chunk_size: u32, deliver_priority: Priority, build_priority: Priority) -> Self {
        Self {
            next_id: 0,
            chunk_size: chunk_size.max(1),
            deliver_priority,
            build_priority,
            sites: BTreeMap::new(),
            events: EventQueue::default(),
        }
    }

    pub fn from_config(config: &SimulationConfig) -> Self {
        Self::new(
            config.deliver_chunk_size,
            Priority::new(config.priorities.deliver),
            Priority::new(config.priorities.build),
        )
    }

    pub fn get(&self, site: SiteId) -> Option<&ConstructionSite> {
        self.sites.get(&site)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConstructionSite> {
        self.sites.values()
    }

    pub fn len(&self) -> usize {
        self.sites.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }

    fn site_mut(&mut self, site: SiteId) -> Result<&mut ConstructionSite, ConstructionError> {
        self.sites
            .get_mut(&site)
            .ok_or(ConstructionError::SiteNotFound(site))
    }

    fn open_site_mut(&mut self, site: SiteId) -> Result<&mut ConstructionSite, ConstructionError> {
        let record = self.site_mut(site)?;
        if record.status.is_closed() {
            return Err(ConstructionError::SiteClosed {
                site,
                status: record.status,
            });
        }
        Ok(record)
    }

    /// Whether tasks tied to a site may currently be claimed. Tasks without a
    /// site are always claimable.
    pub fn is_claimable(&self, task: &Task) -> bool {
        task.payload
            .site()
            .is_none_or(|site| self.get(site).is_some_and(|record| record.status.is_active()))
    }

    /// Whether a site still takes deliveries of `resource`.
    pub fn accepts_delivery(&self, site: SiteId, resource: ResourceType) -> bool {
        self.get(site).is_some_and(|record| {
            !record.status.is_closed() && record.requirements.contains_key(&resource)
        })
    }

    pub fn start_construction(
        &mut self,
        world: &mut TileWorld,
        registry: &mut TaskRegistry,
        blueprint: &Blueprint,
        position: Position,
        now: u64,
    ) -> Result<SiteId, PlacementError> {
        validate_placement(world, blueprint, position)?;
        for tile in blueprint.footprint(position) {
            world.occupy(tile);
        }

        self.next_id += 1;
        let id = SiteId(self.next_id);
        let tiles = blueprint
            .tiles
            .iter()
            .map(|tile| {
                (
                    tile.offset,
                    SiteTile {
                        layer: tile.layer,
                        state: TileState::Pending,
                        required: tile.materials.clone(),
                        allocated: BTreeMap::new(),
                        work_required: tile.work,
                        progress: 0,
                        build_task: None,
                    },
                )
            })
            .collect();
        self.sites.insert(
            id,
            ConstructionSite {
                id,
                blueprint: blueprint.name.clone(),
                position,
                status: SiteStatus::Planned,
                resume_status: None,
                requirements: blueprint.requirements(),
                delivered: BTreeMap::new(),
                tiles,
            },
        );
        info!("Started {} as {id} at {position}", blueprint.name);

        self.allocate(id);
        self.request_deliveries(registry, id, now);
        self.spawn_build_tasks(registry, id, now);
        Ok(id)
    }

    /// Creates `Deliver` tasks for whatever is neither delivered nor on its way.
    fn request_deliveries(&mut self, registry: &mut TaskRegistry, site: SiteId, now: u64) {
        let Some(record) = self.sites.get(&site) else {
            return;
        };
        let in_flight = in_flight_for_site(registry, site);
        let mut requests = Vec::new();
        for resource in record.requirements.keys() {
            let mut shortfall = record
                .remaining_need(*resource)
                .saturating_sub(in_flight.get(resource).copied().unwrap_or(0));
            while shortfall > 0 {
                let chunk = shortfall.min(self.chunk_size);
                requests.push((*resource, chunk));
                shortfall -= chunk;
            }
        }
        let position = record.position;
        for (resource, amount) in requests {
            debug!("{site} requests {amount} {resource}");
            registry.create(
                TaskPayload::Deliver {
                    site,
                    resource,
                    amount,
                    source: None,
                },
                position,
                self.deliver_priority,
                now,
            );
        }
    }

    fn allocate(&mut self, site: SiteId) {
        let Some(record) = self.sites.get_mut(&site) else {
            return;
        };
        for offset in record.allocate() {
            self.events.push(SettlementEvent::ConstructionProgressed {
                site,
                offset,
                state: TileState::MaterialsDelivered,
            });
        }
    }

    /// Creates `Build` tasks for supplied tiles whose lower layer is done.
    fn spawn_build_tasks(&mut self, registry: &mut TaskRegistry, site: SiteId, now: u64) {
        let Some(record) = self.sites.get_mut(&site) else {
            return;
        };
        if record.status.is_closed() {
            return;
        }
        for offset in record.build_order() {
            let Some(tile) = record.tiles.get(&offset) else {
                continue;
            };
            let ready = matches!(tile.state, TileState::MaterialsDelivered | TileState::InProgress)
                && tile.build_task.is_none()
                && record.predecessors_complete(tile.layer);
            if !ready {
                continue;
            }
            let layer = tile.layer;
            let task = registry.create(
                TaskPayload::Build {
                    site,
                    offset,
                    layer,
                },
                record.tile_position(offset),
                self.build_priority,
                now,
            );
            if let Some(tile) = record.tiles.get_mut(&offset) {
                tile.build_task = Some(task);
            }
        }
    }

    /// Accepts material carried to the site.
    pub fn record_delivery(
        &mut self,
        registry: &mut TaskRegistry,
        site: SiteId,
        resource: ResourceType,
        amount: u32,
        now: u64,
    ) -> Result<(), ConstructionError> {
        let record = self.open_site_mut(site)?;
        *record.delivered.entry(resource).or_insert(0) += amount;
        if record.status == SiteStatus::Planned {
            record.status = SiteStatus::InProgress;
        }
        debug!("{site} received {amount} {resource}");
        self.allocate(site);
        self.spawn_build_tasks(registry, site, now);
        Ok(())
    }

    /// Adds build work to a tile and advances the site when it finishes.
    pub fn apply_build_work(
        &mut self,
        registry: &mut TaskRegistry,
        site: SiteId,
        offset: Offset,
        work: u32,
        now: u64,
    ) -> Result<BuildProgress, ConstructionError> {
        let Self { sites, events, .. } = self;
        let record = sites
            .get_mut(&site)
            .ok_or(ConstructionError::SiteNotFound(site))?;
        let status = record.status;
        if status.is_closed() {
            return Err(ConstructionError::SiteClosed { site, status });
        }
        let tile = record
            .tiles
            .get_mut(&offset)
            .ok_or(ConstructionError::TileNotFound { site, offset })?;
        match tile.state {
            TileState::Pending => {
                return Err(ConstructionError::InvalidStatus { site, status });
            }
            TileState::Completed => return Ok(BuildProgress::TileCompleted),
            TileState::MaterialsDelivered => {
                tile.state = TileState::InProgress;
                events.push(SettlementEvent::ConstructionProgressed {
                    site,
                    offset,
                    state: TileState::InProgress,
                });
            }
            TileState::InProgress => {}
        }

        tile.progress = tile.progress.saturating_add(work).min(tile.work_required);
        if tile.progress < tile.work_required {
            return Ok(BuildProgress::Working);
        }
        tile.state = TileState::Completed;
        if record.status == SiteStatus::Planned {
            record.status = SiteStatus::InProgress;
        }
        events.push(SettlementEvent::ConstructionProgressed {
            site,
            offset,
            state: TileState::Completed,
        });

        if record.is_complete() {
            record.status = SiteStatus::Completed;
            info!("{} {site} completed at {}", record.blueprint, record.position);
            events.push(SettlementEvent::ConstructionCompleted {
                site,
                blueprint: record.blueprint.clone(),
                position: record.position,
            });
            return Ok(BuildProgress::SiteCompleted);
        }
        self.spawn_build_tasks(registry, site, now);
        Ok(BuildProgress::TileCompleted)
    }

    /// Cancels every outstanding task of the site and frees its footprint.
    /// Materials not yet built in are returned as a refund.
    pub fn cancel_construction(
        &mut self,
        world: &mut TileWorld,
        registry: &mut TaskRegistry,
        site: SiteId,
        now: u64,
    ) -> Result<CancelledSite, ConstructionError> {
        self.open_site_mut(site)?;
        let cancelled_tasks = registry.outstanding_for_site(site);
        for task in &cancelled_tasks {
            if let Err(error) = registry.cancel(*task, now) {
                warn!("Could not cancel {task} for {site}: {error}");
            }
        }

        let record = self.site_mut(site)?;
        let consumed = record.consumed();
        let refund = record
            .delivered
            .iter()
            .filter_map(|(resource, amount)| {
                let left = amount.saturating_sub(consumed.get(resource).copied().unwrap_or(0));
                (left > 0).then_some((*resource, left))
            })
            .collect::<Vec<_>>();
        record.delivered = consumed;
        for tile in record.tiles.values_mut() {
            if tile.state != TileState::Completed {
                tile.allocated.clear();
                tile.build_task = None;
            }
        }
        record.status = SiteStatus::Cancelled;
        record.resume_status = None;
        for position in record.footprint() {
            world.vacate(position);
        }
        info!("Cancelled {site}; refunding {refund:?}");

        Ok(CancelledSite {
            site,
            position: record.position,
            cancelled_tasks,
            refund,
        })
    }

    pub fn pause_construction(&mut self, site: SiteId) -> Result<(), ConstructionError> {
        let record = self.site_mut(site)?;
        if !record.status.is_active() {
            return Err(ConstructionError::InvalidStatus {
                site,
                status: record.status,
            });
        }
        record.resume_status = Some(record.status);
        record.status = SiteStatus::Paused;
        info!("Paused {site}");
        Ok(())
    }

    pub fn resume_construction(&mut self, site: SiteId) -> Result<(), ConstructionError> {
        let record = self.site_mut(site)?;
        if record.status != SiteStatus::Paused {
            return Err(ConstructionError::InvalidStatus {
                site,
                status: record.status,
            });
        }
        record.status = record.resume_status.take().unwrap_or(SiteStatus::Planned);
        info!("Resumed {site}");
        Ok(())
    }

    /// Forgets a completed or cancelled site and frees its footprint.
    pub fn remove_site(
        &mut self,
        world: &mut TileWorld,
        site: SiteId,
    ) -> Result<ConstructionSite, ConstructionError> {
        let status = self
            .get(site)
            .ok_or(ConstructionError::SiteNotFound(site))?
            .status;
        if !status.is_closed() {
            return Err(ConstructionError::InvalidStatus { site, status });
        }
        let record = self
            .sites
            .remove(&site)
            .ok_or(ConstructionError::SiteNotFound(site))?;
        for position in record.footprint() {
            world.vacate(position);
        }
        Ok(record)
    }

    /// Repairs per-tick drift: forgets build tasks that ended without
    /// finishing their tile and re-requests deliveries that failed.
    pub fn reconcile(&mut self, registry: &mut TaskRegistry, now: u64) {
        let open: Vec<SiteId> = self
            .sites
            .values()
            .filter(|record| !record.status.is_closed())
            .map(|record| record.id)
            .collect();
        for site in open {
            if let Some(record) = self.sites.get_mut(&site) {
                for tile in record.tiles.values_mut() {
                    let stale = tile.build_task.is_some_and(|task| {
                        registry
                            .status(task)
                            .is_none_or(|status| matches!(status, TaskStatus::Cancelled | TaskStatus::Failed))
                    });
                    if stale && tile.state != TileState::Completed {
                        tile.build_task = None;
                    }
                }
                if record.status == SiteStatus::Paused {
                    continue;
                }
            }
            self.allocate(site);
            self.request_deliveries(registry, site, now);
            self.spawn_build_tasks(registry, site, now);
        }
    }

    pub fn drain_events(&mut self) -> impl Iterator<Item = SettlementEvent> + '_ {
        self.events.drain()
    }

    pub(crate) fn next_id(&self) -> u32 {
        self.next_id
    }

    /// Replaces every site; footprints of sites that still stand are
    /// re-occupied.
    pub(crate) fn restore(&mut self, world: &mut TileWorld, next_id: u32, sites: Vec<ConstructionSite>) {
        for record in self.sites.values() {
            for position in record.footprint() {
                world.vacate(position);
            }
        }
        self.sites = sites
            .into_iter()
            .map(|record| {
                if record.status != SiteStatus::Cancelled {
                    for position in record.footprint() {
                        world.occupy(position);
                    }
                }
                (record.id, record)
            })
            .collect();
        self.next_id = self
            .sites
            .keys()
            .map(|id| id.0)
            .max()
            .unwrap_or(0)
            .max(next_id);
        self.events.clear();
    }
}
