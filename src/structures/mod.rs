pub mod blueprint;
pub mod construction;
pub mod placement;
pub mod stockpile;

pub use blueprint::*;
pub use construction::*;
pub use placement::*;
pub use stockpile::*;
