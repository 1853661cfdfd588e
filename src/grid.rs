use crate::{
    constants::hardness,
    materials::ResourceType,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct Position {
    pub x: i32,
    pub y: i32,
}

impl Position {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    pub fn manhattan_distance(self, other: Position) -> i32 {
        (self.x - other.x).abs() + (self.y - other.y).abs()
    }

    pub fn offset(self, offset: Offset) -> Position {
        Position::new(self.x + offset.dx, self.y + offset.dy)
    }

    pub fn neighbors(self) -> [Position; 4] {
        [
            Position::new(self.x, self.y + 1),
            Position::new(self.x, self.y - 1),
            Position::new(self.x + 1, self.y),
            Position::new(self.x - 1, self.y),
        ]
    }

    pub fn is_adjacent_to(self, other: Position) -> bool {
        self.manhattan_distance(other) == 1
    }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// Displacement of a blueprint tile from the site origin.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct Offset {
    pub dx: i32,
    pub dy: i32,
}

impl Offset {
    pub const fn new(dx: i32, dy: i32) -> Self {
        Self { dx, dy }
    }
}

/// Inclusive rectangle of tiles.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Region {
    pub min: Position,
    pub max: Position,
}

impl Region {
    /// Builds a region from any two opposite corners.
    pub fn new(a: Position, b: Position) -> Self {
        Self {
            min: Position::new(a.x.min(b.x), a.y.min(b.y)),
            max: Position::new(a.x.max(b.x), a.y.max(b.y)),
        }
    }

    pub fn single(position: Position) -> Self {
        Self {
            min: position,
            max: position,
        }
    }

    pub fn from_size(origin: Position, width: u32, height: u32) -> Self {
        let width = i32::try_from(width.max(1)).unwrap_or(i32::MAX);
        let height = i32::try_from(height.max(1)).unwrap_or(i32::MAX);
        Self::new(
            origin,
            Position::new(
                origin.x.saturating_add(width - 1),
                origin.y.saturating_add(height - 1),
            ),
        )
    }

    pub fn width(&self) -> u32 {
        self.max.x.abs_diff(self.min.x) + 1
    }

    pub fn height(&self) -> u32 {
        self.max.y.abs_diff(self.min.y) + 1
    }

    pub fn area(&self) -> u32 {
        self.width() * self.height()
    }

    pub fn contains(&self, position: Position) -> bool {
        (self.min.x..=self.max.x).contains(&position.x)
            && (self.min.y..=self.max.y).contains(&position.y)
    }

    /// Row-major iteration, bottom row first.
    pub fn positions(&self) -> impl Iterator<Item = Position> + '_ {
        (self.min.y..=self.max.y)
            .flat_map(move |y| (self.min.x..=self.max.x).map(move |x| Position::new(x, y)))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TileKind {
    Ground,
    Rock,
    Ore(ResourceType),
    Water,
}

impl TileKind {
    pub fn default_hardness(self) -> u32 {
        match self {
            TileKind::Ground | TileKind::Water => 0,
            TileKind::Rock => hardness::ROCK,
            TileKind::Ore(_) => hardness::ORE,
        }
    }

    pub fn is_passable(self) -> bool {
        matches!(self, TileKind::Ground)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tile {
    pub kind: TileKind,
    pub hardness: u32,
}

impl Tile {
    pub fn new(kind: TileKind) -> Self {
        Self {
            kind,
            hardness: kind.default_hardness(),
        }
    }

    pub fn with_hardness(kind: TileKind, hardness: u32) -> Self {
        Self { kind, hardness }
    }

    pub fn ground() -> Self {
        Self::new(TileKind::Ground)
    }

    pub fn is_walkable(&self) -> bool {
        self.kind.is_passable() && self.hardness == 0
    }

    pub fn is_mineable(&self) -> bool {
        self.hardness > 0
    }
}

/// Tile grid the engine reads and writes.
///
/// Coordinates run from `(0, 0)` to `(width - 1, height - 1)`. Besides terrain
/// the world tracks which tiles are claimed by stockpiles or construction
/// sites so placement can detect collisions.
#[derive(Clone, Debug)]
pub struct TileWorld {
    width: i32,
    height: i32,
    tiles: Vec<Tile>,
    occupied: BTreeSet<Position>,
}

impl TileWorld {
    pub fn new(width: u32, height: u32) -> Self {
        let width = i32::try_from(width).unwrap_or(i32::MAX);
        let height = i32::try_from(height).unwrap_or(i32::MAX);
        let len = usize::try_from(width.max(0)).unwrap_or(0)
            * usize::try_from(height.max(0)).unwrap_or(0);
        Self {
            width,
            height,
            tiles: vec![Tile::ground(); len],
            occupied: BTreeSet::new(),
        }
    }

    pub fn width(&self) -> i32 {
        self.width
    }

    pub fn height(&self) -> i32 {
        self.height
    }

    pub fn bounds(&self) -> Region {
        Region::new(
            Position::new(0, 0),
            Position::new(self.width - 1, self.height - 1),
        )
    }

    pub fn in_bounds(&self, position: Position) -> bool {
        position.x >= 0 && position.y >= 0 && position.x < self.width && position.y < self.height
    }

    fn index(&self, position: Position) -> Option<usize> {
        if !self.in_bounds(position) {
            return None;
        }
        usize::try_from(position.y * self.width + position.x).ok()
    }

    pub fn get_tile(&self, position: Position) -> Option<&Tile> {
        self.index(position).and_then(|index| self.tiles.get(index))
    }

    /// Returns `false` when the position lies outside the world.
    pub fn set_tile(&mut self, position: Position, tile: Tile) -> bool {
        match self.index(position).and_then(|index| self.tiles.get_mut(index)) {
            Some(slot) => {
                *slot = tile;
                true
            }
            None => false,
        }
    }

    pub fn fill(&mut self, region: Region, tile: Tile) {
        for position in region.positions() {
            self.set_tile(position, tile);
        }
    }

    pub fn is_walkable(&self, position: Position) -> bool {
        self.get_tile(position).is_some_and(Tile::is_walkable)
    }

    pub fn walkable_neighbors(&self, position: Position) -> impl Iterator<Item = Position> + '_ {
        position
            .neighbors()
            .into_iter()
            .filter(|neighbor| self.is_walkable(*neighbor))
    }

    pub fn is_occupied(&self, position: Position) -> bool {
        self.occupied.contains(&position)
    }

    pub fn occupy(&mut self, position: Position) -> bool {
        self.in_bounds(position) && self.occupied.insert(position)
    }

    pub fn vacate(&mut self, position: Position) {
        self.occupied.remove(&position);
    }

    pub fn clear_occupancy(&mut self) {
        self.occupied.clear();
    }
}
