use crate::{
    constants::scoring::{MAX_PRIORITY, MIN_PRIORITY},
    grid::{Offset, Position},
    materials::{DropId, DropTable, ResourceType},
    structures::{BuildLayer, SiteId, SlotRef},
    workers::WorkerId,
};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(pub u64);

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "task#{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TaskKind {
    Mine,
    Haul,
    Build,
    Deliver,
}

impl TaskKind {
    pub const ALL: [TaskKind; 4] = [
        TaskKind::Mine,
        TaskKind::Haul,
        TaskKind::Build,
        TaskKind::Deliver,
    ];

    /// Haul and Deliver tasks both move material from a pickup to a drop-off.
    pub fn is_transport(self) -> bool {
        matches!(self, TaskKind::Haul | TaskKind::Deliver)
    }
}

/// Task priority in `1..=5`; out-of-range values are clamped.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub struct Priority(u8);

impl Priority {
    pub fn new(value: u8) -> Self {
        Self(value.clamp(MIN_PRIORITY, MAX_PRIORITY))
    }

    pub fn get(self) -> u8 {
        self.0
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self(3)
    }
}

impl From<u8> for Priority {
    fn from(value: u8) -> Self {
        Self::new(value)
    }
}

impl From<Priority> for u8 {
    fn from(priority: Priority) -> Self {
        priority.0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
    Pending,
    Claimed,
    InProgress,
    Completed,
    Cancelled,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Cancelled | TaskStatus::Failed
        )
    }

    /// Claimed or being worked on.
    pub fn is_held(self) -> bool {
        matches!(self, TaskStatus::Claimed | TaskStatus::InProgress)
    }

    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::{Cancelled, Claimed, Completed, Failed, InProgress, Pending};
        matches!(
            (self, next),
            (Pending, Claimed)
                | (Claimed, InProgress)
                | (Claimed, Pending)
                | (InProgress, Completed)
                | (Claimed | InProgress, Failed)
                | (Pending | Claimed | InProgress, Cancelled)
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Progress of a Haul or Deliver task.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum HaulStage {
    TravelingToPickup,
    PickingUp,
    TravelingToDelivery,
    Delivering,
    Completed,
}

impl HaulStage {
    /// Whether the load has left its source.
    pub fn is_loaded(self) -> bool {
        self >= HaulStage::TravelingToDelivery
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HaulSource {
    Drop(DropId),
    Stockpile(SlotRef),
    /// Material already in a worker's hands.
    Carried(WorkerId),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HaulDestination {
    Stockpile(SlotRef),
    Site(SiteId),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskPayload {
    Mine {
        tile: Position,
        hardness: u32,
        drop_table: DropTable,
    },
    Haul {
        source: HaulSource,
        destination: HaulDestination,
        resource: ResourceType,
        amount: u32,
    },
    Build {
        site: SiteId,
        offset: Offset,
        layer: BuildLayer,
    },
    Deliver {
        site: SiteId,
        resource: ResourceType,
        amount: u32,
        /// Stockpile slot the material is withdrawn from, once one is reserved.
        source: Option<SlotRef>,
    },
}

impl TaskPayload {
    pub fn kind(&self) -> TaskKind {
        match self {
            TaskPayload::Mine { .. } => TaskKind::Mine,
            TaskPayload::Haul { .. } => TaskKind::Haul,
            TaskPayload::Build { .. } => TaskKind::Build,
            TaskPayload::Deliver { .. } => TaskKind::Deliver,
        }
    }

    /// Construction site this task works for, if any.
    pub fn site(&self) -> Option<SiteId> {
        match self {
            TaskPayload::Build { site, .. } | TaskPayload::Deliver { site, .. } => Some(*site),
            TaskPayload::Haul {
                destination: HaulDestination::Site(site),
                ..
            } => Some(*site),
            TaskPayload::Mine { .. } | TaskPayload::Haul { .. } => None,
        }
    }

    /// Resource and amount moved by a transport task.
    pub fn cargo(&self) -> Option<(ResourceType, u32)> {
        match self {
            TaskPayload::Haul {
                resource, amount, ..
            }
            | TaskPayload::Deliver {
                resource, amount, ..
            } => Some((*resource, *amount)),
            TaskPayload::Mine { .. } | TaskPayload::Build { .. } => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureReason {
    /// The pickup material disappeared despite its reservation.
    PickupVanished,
    /// The drop-off stockpile or site no longer accepts the load.
    DestinationUnavailable,
    /// The owning worker was removed.
    WorkerLost,
    /// The mining target is no longer mineable.
    TargetGone,
    /// The task was in flight when a snapshot was restored.
    Interrupted,
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureReason::PickupVanished => write!(f, "pickup resource vanished"),
            FailureReason::DestinationUnavailable => write!(f, "destination unavailable"),
            FailureReason::WorkerLost => write!(f, "assigned worker was removed"),
            FailureReason::TargetGone => write!(f, "target tile is no longer mineable"),
            FailureReason::Interrupted => write!(f, "interrupted by snapshot restore"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub kind: TaskKind,
    pub position: Position,
    pub priority: Priority,
    pub status: TaskStatus,
    pub assigned_worker: Option<WorkerId>,
    pub created_at: u64,
    pub payload: TaskPayload,
    /// Times this task was released or found unreachable.
    pub skip_count: u32,
    pub claimed_at: Option<u64>,
    pub last_progress_at: u64,
    pub finished_at: Option<u64>,
    /// Not offered to workers before this tick.
    pub retry_after: Option<u64>,
    pub haul_stage: Option<HaulStage>,
}

impl Task {
    pub fn new(
        id: TaskId,
        payload: TaskPayload,
        position: Position,
        priority: Priority,
        now: u64,
    ) -> Self {
        let kind = payload.kind();
        Self {
            id,
            kind,
            position,
            priority,
            status: TaskStatus::Pending,
            assigned_worker: None,
            created_at: now,
            payload,
            skip_count: 0,
            claimed_at: None,
            last_progress_at: now,
            finished_at: None,
            retry_after: None,
            haul_stage: kind.is_transport().then_some(HaulStage::TravelingToPickup),
        }
    }

    pub fn is_kind_consistent(&self) -> bool {
        self.kind == self.payload.kind()
    }
}
