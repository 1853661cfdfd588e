pub mod agent;
pub mod orchestrator;
pub mod pathfinding;
pub mod tasks;

pub use agent::*;
pub use orchestrator::*;
pub use pathfinding::*;
pub use tasks::*;
