use crate::{
    grid::{Offset, Position},
    materials::ResourceType,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Fixed build order; a layer's tiles wait for the layer below to finish.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BuildLayer {
    Floor,
    Walls,
    Objects,
    Roof,
}

impl BuildLayer {
    pub const ORDER: [BuildLayer; 4] = [
        BuildLayer::Floor,
        BuildLayer::Walls,
        BuildLayer::Objects,
        BuildLayer::Roof,
    ];
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct BlueprintTile {
    pub offset: Offset,
    pub layer: BuildLayer,
    #[serde(default)]
    pub materials: BTreeMap<ResourceType, u32>,
    /// Build work needed once materials are in place.
    #[serde(default = "default_work")]
    pub work: u32,
}

fn default_work() -> u32 {
    4
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Blueprint {
    pub name: String,
    pub tiles: Vec<BlueprintTile>,
}

impl Blueprint {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tiles: Vec::new(),
        }
    }

    pub fn with_tile(
        mut self,
        offset: Offset,
        layer: BuildLayer,
        materials: impl IntoIterator<Item = (ResourceType, u32)>,
        work: u32,
    ) -> Self {
        self.tiles.push(BlueprintTile {
            offset,
            layer,
            materials: materials.into_iter().collect(),
            work,
        });
        self
    }

    /// Total materials per resource across every tile.
    pub fn requirements(&self) -> BTreeMap<ResourceType, u32> {
        let mut totals = BTreeMap::new();
        for tile in &self.tiles {
            for (resource, amount) in &tile.materials {
                *totals.entry(*resource).or_insert(0) += amount;
            }
        }
        totals
    }

    pub fn layers(&self) -> BTreeSet<BuildLayer> {
        self.tiles.iter().map(|tile| tile.layer).collect()
    }

    pub fn footprint(&self, origin: Position) -> impl Iterator<Item = Position> + '_ {
        self.tiles.iter().map(move |tile| origin.offset(tile.offset))
    }
}

/// Named blueprints available to `StartConstruction` commands.
#[derive(Debug, Clone, Default)]
pub struct BlueprintRegistry {
    blueprints: BTreeMap<String, Blueprint>,
}

impl BlueprintRegistry {
    pub fn from_ron(ron_content: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let blueprints: Vec<Blueprint> = ron::from_str(ron_content)?;
        let mut registry = Self::default();
        for blueprint in blueprints {
            registry.insert(blueprint);
        }
        Ok(registry)
    }

    pub fn load_from_assets() -> Result<Self, Box<dyn std::error::Error>> {
        let ron_content = include_str!("../../assets/blueprints.ron");
        Self::from_ron(ron_content)
    }

    pub fn insert(&mut self, blueprint: Blueprint) {
        self.blueprints.insert(blueprint.name.clone(), blueprint);
    }

    pub fn get(&self, name: &str) -> Option<&Blueprint> {
        self.blueprints.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.blueprints.keys().map(String::as_str)
    }
}
