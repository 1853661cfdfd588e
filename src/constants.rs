pub mod scoring {
    /// Weight applied to a task's priority before distance is subtracted.
    pub const PRIORITY_WEIGHT: i64 = 100;
    pub const MIN_PRIORITY: u8 = 1;
    pub const MAX_PRIORITY: u8 = 5;
}

pub mod snapshot {
    // v1: tasks, stockpiles, sites, drops, mining state, workers
    pub const VERSION: u32 = 1;
}

pub mod hardness {
    pub const ROCK: u32 = 10;
    pub const ORE: u32 = 15;
}
