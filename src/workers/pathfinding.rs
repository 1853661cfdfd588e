use crate::grid::{Position, TileWorld};
use std::collections::{HashMap, HashSet, VecDeque};

/// Steps to walk, excluding the start tile. An empty path means the walker
/// is already there.
pub type Path = Vec<Position>;

/// Route planner consumed by workers.
pub trait PathfindingService: Send + Sync {
    fn find_path(&self, world: &TileWorld, start: Position, goal: Position) -> Option<Path>;

    /// Path to any walkable tile next to `target`, for work done on tiles a
    /// worker cannot stand on. The shortest candidate wins.
    fn find_path_to_adjacent(
        &self,
        world: &TileWorld,
        start: Position,
        target: Position,
    ) -> Option<Path> {
        if start == target || start.is_adjacent_to(target) {
            return Some(Vec::new());
        }
        target
            .neighbors()
            .into_iter()
            .filter(|neighbor| world.is_walkable(*neighbor))
            .filter_map(|neighbor| self.find_path(world, start, neighbor))
            .min_by_key(Vec::len)
    }
}

/// Breadth-first search over walkable tiles, four-connected.
#[derive(Debug, Clone, Copy, Default)]
pub struct GridPathfinder;

impl PathfindingService for GridPathfinder {
    fn find_path(&self, world: &TileWorld, start: Position, goal: Position) -> Option<Path> {
        if start == goal {
            return Some(Vec::new());
        }
        if !world.is_walkable(goal) {
            return None;
        }

        let mut queue = VecDeque::new();
        let mut visited = HashSet::new();
        let mut parent = HashMap::new();

        queue.push_back(start);
        visited.insert(start);

        while let Some(current) = queue.pop_front() {
            if current == goal {
                let mut path = Vec::new();
                let mut step = goal;
                while step != start {
                    path.push(step);
                    step = *parent.get(&step)?;
                }
                path.reverse();
                return Some(path);
            }

            for next in world.walkable_neighbors(current) {
                if visited.insert(next) {
                    parent.insert(next, current);
                    queue.push_back(next);
                }
            }
        }
        None
    }
}
