pub mod app;
pub mod assertions;
pub mod builders;
pub mod time;

pub use app::{headless_app, headless_app_with, test_orchestrator, EventLog};
pub use assertions::*;
pub use builders::*;
pub use time::*;
