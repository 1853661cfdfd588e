use crate::{
    grid::{Position, TileWorld},
    structures::Blueprint,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlacementError {
    OutOfBounds(Position),
    Collision(Position),
    TerrainUnsuitable(Position),
    EmptyBlueprint,
    UnknownBlueprint(String),
}

impl std::fmt::Display for PlacementError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlacementError::OutOfBounds(position) => {
                write!(f, "tile {position} is outside the map")
            }
            PlacementError::Collision(position) => {
                write!(f, "tile {position} is already occupied")
            }
            PlacementError::TerrainUnsuitable(position) => {
                write!(f, "tile {position} is not buildable ground")
            }
            PlacementError::EmptyBlueprint => write!(f, "blueprint has no tiles"),
            PlacementError::UnknownBlueprint(name) => write!(f, "no blueprint named `{name}`"),
        }
    }
}

impl std::error::Error for PlacementError {}

/// Checks every footprint tile, reporting the first problem found.
pub fn validate_placement(
    world: &TileWorld,
    blueprint: &Blueprint,
    origin: Position,
) -> Result<(), PlacementError> {
    if blueprint.tiles.is_empty() {
        return Err(PlacementError::EmptyBlueprint);
    }
    for position in blueprint.footprint(origin) {
        if !world.in_bounds(position) {
            return Err(PlacementError::OutOfBounds(position));
        }
        if world.is_occupied(position) {
            return Err(PlacementError::Collision(position));
        }
        if !world.is_walkable(position) {
            return Err(PlacementError::TerrainUnsuitable(position));
        }
    }
    Ok(())
}
