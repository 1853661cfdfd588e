pub mod drops;
pub mod items;

pub use drops::{DropEntry, DropError, DropId, DropRegistry, DropTable, ResourceDrop};
pub use items::{Inventory, ResourceCategory, ResourceType, TransferError};
