//! This module defines the `GridNode` struct, one vertex of the navigation grid.
use bevy::math::{Vec2, Vec3};
use smallvec::SmallVec;
use std::hash::{Hash, Hasher};

use crate::{dir::Dir, settings::GridSettings, terrain::TerrainSample, NodeId};

/// Lattice coordinates of a node: its world x/z divided by the grid resolution.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GridKey {
    pub x: i32,
    pub z: i32,
}

impl GridKey {
    pub fn new(x: i32, z: i32) -> Self {
        GridKey { x, z }
    }

    /// Snaps a world position to the nearest lattice point.
    pub fn from_world(x: f32, z: f32, resolution: f32) -> Self {
        GridKey {
            x: (x / resolution).round() as i32,
            z: (z / resolution).round() as i32,
        }
    }

    /// World x/z of this lattice point.
    pub fn to_world(self, resolution: f32) -> Vec2 {
        Vec2::new(self.x as f32 * resolution, self.z as f32 * resolution)
    }

    pub fn step(self, dir: Dir) -> Self {
        let (dx, dz) = dir.vector();
        GridKey::new(self.x + dx, self.z + dz)
    }

    /// Direction from `self` to an adjacent key.
    pub fn dir_to(self, other: GridKey) -> Option<Dir> {
        Dir::all().find(|dir| self.step(*dir) == other)
    }
}

/// A `GridNode` is one cell of the navigation grid.
///
/// Nodes only carry durable terrain data and adjacency. Search bookkeeping lives in the
/// search itself, see [`crate::astar`].
#[derive(Debug, Clone)]
pub struct GridNode {
    pub(crate) key: GridKey,
    /// World position, `y` is the terrain height.
    pub(crate) position: Vec3,
    /// Terrain slope in degrees.
    pub(crate) slope: f32,
    pub(crate) biome: String,
    pub(crate) walkable: bool,
    /// Movement cost multiplier from biome and slope.
    pub(crate) cost: f32,
    /// Planar distance to the nearest unwalkable or missing lattice point.
    pub(crate) clearance: f32,
    pub(crate) neighbors: SmallVec<[NodeId; 8]>,
}

impl GridNode {
    pub(crate) fn new(key: GridKey, sample: TerrainSample, settings: &GridSettings) -> Self {
        let planar = key.to_world(settings.resolution);
        let mut node = GridNode {
            key,
            position: Vec3::new(planar.x, sample.height, planar.y),
            slope: sample.slope,
            biome: sample.biome,
            walkable: sample.walkable,
            cost: 1.0,
            clearance: 0.0,
            neighbors: SmallVec::new(),
        };
        node.refresh_cost(settings);
        node
    }

    /// Recomputes the movement cost multiplier from biome and slope.
    pub(crate) fn refresh_cost(&mut self, settings: &GridSettings) {
        self.cost = movement_cost(&self.biome, self.slope, settings);
    }

    pub fn key(&self) -> GridKey {
        self.key
    }

    pub fn position(&self) -> Vec3 {
        self.position
    }

    pub fn slope(&self) -> f32 {
        self.slope
    }

    pub fn biome(&self) -> &str {
        &self.biome
    }

    pub fn is_walkable(&self) -> bool {
        self.walkable
    }

    pub fn cost(&self) -> f32 {
        self.cost
    }

    pub fn clearance(&self) -> f32 {
        self.clearance
    }

    pub fn neighbors(&self) -> &[NodeId] {
        &self.neighbors
    }

    pub(crate) fn remove_neighbor(&mut self, id: NodeId) {
        self.neighbors.retain(|neighbor| *neighbor != id);
    }

    pub(crate) fn add_neighbor(&mut self, id: NodeId) {
        if !self.neighbors.contains(&id) {
            self.neighbors.push(id);
        }
    }
}

/// `biome_cost × (1 + gradient × height_cost_multiplier)` where the gradient is the rise over
/// run of the slope.
pub(crate) fn movement_cost(biome: &str, slope: f32, settings: &GridSettings) -> f32 {
    let gradient = slope.clamp(0.0, 89.0).to_radians().tan();
    settings.biome_costs.cost(biome) * (1.0 + gradient * settings.height_cost_multiplier)
}

impl PartialEq for GridNode {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for GridNode {}

impl Hash for GridNode {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(height: f32, slope: f32, biome: &str) -> TerrainSample {
        TerrainSample {
            height,
            slope,
            walkable: true,
            biome: biome.to_string(),
        }
    }

    #[test]
    fn test_key_snapping() {
        assert_eq!(GridKey::from_world(3.1, -2.9, 2.0), GridKey::new(2, -1));
        assert_eq!(GridKey::from_world(0.9, 0.9, 2.0), GridKey::new(0, 0));
        assert_eq!(GridKey::new(3, -2).to_world(2.0), Vec2::new(6.0, -4.0));
    }

    #[test]
    fn test_key_directions() {
        let key = GridKey::new(0, 0);
        assert_eq!(key.dir_to(GridKey::new(1, 1)), Some(Dir::NORTHEAST));
        assert_eq!(key.dir_to(GridKey::new(0, -1)), Some(Dir::SOUTH));
        assert_eq!(key.dir_to(GridKey::new(2, 0)), None);
    }

    #[test]
    fn test_node_cost() {
        let settings = GridSettings::default();

        let flat = GridNode::new(GridKey::new(1, 2), sample(5.0, 0.0, "forest"), &settings);
        assert_eq!(flat.position(), Vec3::new(2.0, 5.0, 4.0));
        assert!((flat.cost() - 1.5).abs() < 1e-5);

        // 45 degrees is a gradient of one, doubled by the default height multiplier.
        let steep = GridNode::new(GridKey::new(0, 0), sample(0.0, 45.0, "grassland"), &settings);
        assert!((steep.cost() - 3.0).abs() < 1e-4);
    }

    #[test]
    fn test_node_eq() {
        let settings = GridSettings::default();
        let node1 = GridNode::new(GridKey::new(1, 2), sample(0.0, 0.0, "forest"), &settings);
        let node2 = GridNode::new(GridKey::new(1, 2), sample(9.0, 20.0, "snow"), &settings);

        assert_eq!(node1, node2);
    }

    #[test]
    fn test_neighbors_are_unique() {
        let settings = GridSettings::default();
        let mut node = GridNode::new(GridKey::new(0, 0), sample(0.0, 0.0, "plains"), &settings);

        node.add_neighbor(4);
        node.add_neighbor(4);
        node.add_neighbor(7);
        assert_eq!(node.neighbors(), &[4, 7]);

        node.remove_neighbor(4);
        assert_eq!(node.neighbors(), &[7]);
    }
}
