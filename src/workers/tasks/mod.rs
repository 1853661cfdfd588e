pub mod assignment;
pub mod components;
pub mod logistics;
pub mod mining;
pub mod registry;

pub use assignment::*;
pub use components::*;
pub use logistics::*;
pub use mining::*;
pub use registry::*;
