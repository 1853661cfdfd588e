use bevy::prelude::*;
use serde::{Deserialize, Serialize};

/// Tunable parameters for the whole simulation.
///
/// Every field has a default, so a RON file only needs to list the values it
/// overrides.
#[derive(Resource, Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct SimulationConfig {
    /// Ticks a `Claimed` task may go without progress before its claim is released.
    pub claim_timeout_ticks: u64,
    /// Score subtracted per recorded skip of a task.
    pub skip_penalty: i64,
    /// Ticks a terminal task stays in the registry before pruning.
    pub retention_ticks: u64,
    /// Ticks a task is held back after a worker found no path to it.
    pub unreachable_backoff_ticks: u64,
    /// Additional candidates a seeking worker tries after a rejected claim.
    pub max_claim_retries: usize,
    /// Maximum amount carried by a single `Deliver` task.
    pub deliver_chunk_size: u32,
    /// Maximum amount a single stockpile slot can hold.
    pub slot_stack_limit: u32,
    /// Mining work required per point of tile hardness.
    pub base_time_per_hardness: u32,
    /// Ticks spent picking up a load once at the pickup position.
    pub pickup_ticks: u32,
    /// Ticks spent unloading once at the delivery position.
    pub deliver_ticks: u32,
    pub worker: WorkerDefaults,
    pub priorities: PriorityDefaults,
    /// Seed for drop-table rolls.
    pub rng_seed: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct WorkerDefaults {
    pub capacity: u32,
    pub work_rate: u32,
    /// Tiles moved per tick.
    pub speed: u32,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct PriorityDefaults {
    pub mine: u8,
    pub haul: u8,
    pub deliver: u8,
    pub build: u8,
    /// Hauls that return a worker's interrupted cargo.
    pub redirect: u8,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            claim_timeout_ticks: 30,
            skip_penalty: 25,
            retention_ticks: 20,
            unreachable_backoff_ticks: 10,
            max_claim_retries: 3,
            deliver_chunk_size: 50,
            slot_stack_limit: 100,
            base_time_per_hardness: 1,
            pickup_ticks: 1,
            deliver_ticks: 1,
            worker: WorkerDefaults::default(),
            priorities: PriorityDefaults::default(),
            rng_seed: 0x5EED,
        }
    }
}

impl Default for WorkerDefaults {
    fn default() -> Self {
        Self {
            capacity: 50,
            work_rate: 2,
            speed: 1,
        }
    }
}

impl Default for PriorityDefaults {
    fn default() -> Self {
        Self {
            mine: 3,
            haul: 2,
            deliver: 3,
            build: 4,
            redirect: 5,
        }
    }
}

impl SimulationConfig {
    pub fn from_ron(ron_content: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let config: Self = ron::from_str(ron_content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_from_assets() -> Result<Self, Box<dyn std::error::Error>> {
        let ron_content = include_str!("../assets/simulation.ron");
        Self::from_ron(ron_content)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.deliver_chunk_size == 0 {
            return Err(ConfigError::ZeroField("deliver_chunk_size"));
        }
        if self.slot_stack_limit == 0 {
            return Err(ConfigError::ZeroField("slot_stack_limit"));
        }
        if self.worker.capacity == 0 {
            return Err(ConfigError::ZeroField("worker.capacity"));
        }
        if self.worker.speed == 0 {
            return Err(ConfigError::ZeroField("worker.speed"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    ZeroField(&'static str),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::ZeroField(field) => write!(f, "config field `{field}` must be non-zero"),
        }
    }
}

impl std::error::Error for ConfigError {}
