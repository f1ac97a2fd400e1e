//! This module contains the `NavigationGrid` resource, the searchable graph sampled from terrain.
#[cfg(feature = "parallel")]
use rayon::prelude::*;
use std::time::{Duration, Instant};

use bevy::{
    log::{info, warn},
    math::{Vec2, Vec3},
    prelude::Resource,
};
use rustc_hash::{FxHashMap, FxHashSet};
use slab::Slab;

use crate::{
    dir::Dir,
    node::{GridKey, GridNode},
    settings::GridSettings,
    terrain::{Bounds, Terrain, TerrainSample},
    NodeId,
};

/// How many lattice rings around a node are searched when computing its clearance.
pub const CLEARANCE_RINGS: i32 = 3;

/// Revised terrain data for one node, published by an external validation pass.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NodePatch {
    pub walkable: Option<bool>,
    pub slope: Option<f32>,
    pub biome: Option<String>,
}

/// Summary of a full or regional grid generation.
#[derive(Clone, Debug, PartialEq)]
pub struct GenerationReport {
    pub node_count: usize,
    pub walkable_count: usize,
    pub duration: Duration,
    pub bounds: Bounds,
}

/// Summary of [`NavigationGrid::apply_partial_update`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PartialUpdateReport {
    /// Nodes whose data was revised.
    pub updated: usize,
    /// Patch entries for keys the grid has no node for.
    pub ignored: usize,
    /// Nodes whose walkability flipped and had their edges rebuilt.
    pub relinked: usize,
}

/// `NavigationGrid` owns every [`GridNode`] and their adjacency.
///
/// Nodes live in an arena and are looked up by their [`GridKey`]. The grid is only mutated by
/// generation, partial updates and region invalidation; searches borrow it immutably.
///
/// # Example
/// ```
/// use bevy::math::{Vec2, Vec3};
/// use bevy_terrain_nav::prelude::*;
///
/// let terrain = Terrain::new(HeightfieldTerrain::flat(Vec2::ZERO, 11, 11, 1.0, 0.0));
/// let mut grid = NavigationGrid::new(GridSettings::default());
///
/// let report = grid.generate(&terrain, Bounds::new(Vec2::ZERO, Vec2::new(10.0, 10.0)));
/// assert_eq!(report.node_count, 36);
/// assert!(grid.snap(Vec3::new(3.9, 0.0, 4.2)).is_some());
/// ```
#[derive(Resource, Debug, Clone)]
pub struct NavigationGrid {
    settings: GridSettings,
    nodes: Slab<GridNode>,
    node_ids: FxHashMap<GridKey, NodeId>,
    bounds: Option<Bounds>,
}

impl Default for NavigationGrid {
    fn default() -> Self {
        NavigationGrid::new(GridSettings::default())
    }
}

impl NavigationGrid {
    pub fn new(settings: GridSettings) -> Self {
        NavigationGrid {
            settings,
            nodes: Slab::new(),
            node_ids: FxHashMap::default(),
            bounds: None,
        }
    }

    pub fn settings(&self) -> &GridSettings {
        &self.settings
    }

    pub fn resolution(&self) -> f32 {
        self.settings.resolution
    }

    /// The area covered by generation so far.
    pub fn bounds(&self) -> Option<Bounds> {
        self.bounds
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn walkable_count(&self) -> usize {
        self.nodes.iter().filter(|(_, node)| node.walkable).count()
    }

    pub fn node(&self, id: NodeId) -> Option<&GridNode> {
        self.nodes.get(id)
    }

    pub fn id_at(&self, key: GridKey) -> Option<NodeId> {
        self.node_ids.get(&key).copied()
    }

    pub fn node_at(&self, key: GridKey) -> Option<&GridNode> {
        self.id_at(key).and_then(|id| self.nodes.get(id))
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &GridNode)> {
        self.nodes.iter()
    }

    /// Snaps a world position to the node at the nearest lattice point, if there is one.
    pub fn snap(&self, position: Vec3) -> Option<NodeId> {
        self.id_at(GridKey::from_world(
            position.x,
            position.z,
            self.settings.resolution,
        ))
    }

    pub fn edge_exists(&self, a: NodeId, b: NodeId) -> bool {
        self.nodes
            .get(a)
            .is_some_and(|node| node.neighbors.contains(&b))
    }

    /// Drops every node.
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.node_ids.clear();
        self.bounds = None;
    }

    /// Rebuilds the whole grid from the terrain within `bounds`.
    ///
    /// Lattice points the terrain has no height for are skipped.
    pub fn generate(&mut self, terrain: &Terrain, bounds: Bounds) -> GenerationReport {
        let start = Instant::now();
        self.clear();

        let keys = self.lattice(bounds);
        let samples = timed!("Sampled terrain", { self.sample_keys(terrain, &keys) });
        let ids = self.insert_samples(samples);

        timed!("Connected nodes", {
            self.connect(terrain);
        });
        timed!("Computed clearance", {
            self.refresh_clearance(&ids);
        });

        self.bounds = Some(bounds);

        let report = GenerationReport {
            node_count: self.len(),
            walkable_count: self.walkable_count(),
            duration: start.elapsed(),
            bounds,
        };

        if report.node_count == 0 {
            warn!(
                "Navigation grid generation over {:?} found no terrain data",
                bounds
            );
        } else {
            info!(
                "Generated navigation grid: {} nodes ({} walkable) in {:?}",
                report.node_count, report.walkable_count, report.duration
            );
        }

        report
    }

    /// Links every node to each of its 8 neighbors that it can traverse to.
    ///
    /// An edge needs both endpoints walkable, a slope no steeper than the max walkable slope,
    /// and no terrain at the edge midpoint rising above the line between the endpoints by more
    /// than the obstruction tolerance.
    pub fn connect(&mut self, terrain: &Terrain) {
        for (_, node) in self.nodes.iter_mut() {
            node.neighbors.clear();
        }

        let ids: Vec<NodeId> = self.nodes.iter().map(|(id, _)| id).collect();
        let pairs = self.link_pairs(terrain, &ids);
        self.apply_links(pairs);
    }

    /// Revises walkability, slope and biome for the patched nodes and recomputes their cost.
    ///
    /// Adjacency is only touched around nodes whose walkability changed: newly unwalkable nodes
    /// lose their edges and newly walkable ones are linked to their neighbors.
    pub fn apply_partial_update(
        &mut self,
        terrain: &Terrain,
        patch: &FxHashMap<GridKey, NodePatch>,
    ) -> PartialUpdateReport {
        let mut report = PartialUpdateReport::default();
        let mut flipped = Vec::new();

        for (key, revision) in patch {
            let Some(id) = self.id_at(*key) else {
                report.ignored += 1;
                continue;
            };

            let node = &mut self.nodes[id];
            let was_walkable = node.walkable;

            if let Some(walkable) = revision.walkable {
                node.walkable = walkable;
            }
            if let Some(slope) = revision.slope {
                node.slope = slope;
            }
            if let Some(biome) = &revision.biome {
                node.biome.clone_from(biome);
            }
            node.refresh_cost(&self.settings);

            if node.walkable != was_walkable {
                flipped.push(id);
            }
            report.updated += 1;
        }

        for &id in &flipped {
            self.unlink(id);
        }

        let pairs = self.link_pairs(terrain, &flipped);
        self.apply_links(pairs);

        let touched = self.ids_near(flipped.iter().map(|&id| self.nodes[id].key));
        self.refresh_clearance(&touched);

        report.relinked = flipped.len();
        report
    }

    /// Removes every node inside `bounds` and all edges into them. Returns how many nodes were
    /// removed.
    pub fn invalidate_region(&mut self, bounds: Bounds) -> usize {
        let resolution = self.settings.resolution;
        let doomed: Vec<NodeId> = self
            .nodes
            .iter()
            .filter(|(_, node)| {
                let planar = node.key.to_world(resolution);
                bounds.contains(planar.x, planar.y)
            })
            .map(|(id, _)| id)
            .collect();

        let mut border = Vec::new();
        for &id in &doomed {
            let node = self.nodes.remove(id);
            self.node_ids.remove(&node.key);

            for neighbor in node.neighbors {
                if let Some(neighbor_node) = self.nodes.get_mut(neighbor) {
                    neighbor_node.remove_neighbor(id);
                    border.push(neighbor_node.key);
                }
            }
        }

        let touched = self.ids_near(border.into_iter());
        self.refresh_clearance(&touched);

        if !doomed.is_empty() {
            info!("Invalidated {} navigation nodes in {:?}", doomed.len(), bounds);
        }

        doomed.len()
    }

    /// Resamples just the cells inside `bounds` and stitches them back into the grid.
    pub fn regenerate_region(&mut self, terrain: &Terrain, bounds: Bounds) -> GenerationReport {
        let start = Instant::now();
        self.invalidate_region(bounds);

        let keys = self.lattice(bounds);
        let samples = self.sample_keys(terrain, &keys);
        let ids = self.insert_samples(samples);

        let pairs = self.link_pairs(terrain, &ids);
        self.apply_links(pairs);

        let touched = self.ids_near(ids.iter().map(|&id| self.nodes[id].key));
        self.refresh_clearance(&touched);

        self.bounds = Some(match self.bounds {
            Some(existing) => Bounds::new(existing.min.min(bounds.min), existing.max.max(bounds.max)),
            None => bounds,
        });

        let walkable_count = ids.iter().filter(|&&id| self.nodes[id].walkable).count();
        let report = GenerationReport {
            node_count: ids.len(),
            walkable_count,
            duration: start.elapsed(),
            bounds,
        };

        info!(
            "Regenerated {} navigation nodes in {:?} in {:?}",
            report.node_count, bounds, report.duration
        );

        report
    }

    /// Every lattice key inside `bounds`.
    fn lattice(&self, bounds: Bounds) -> Vec<GridKey> {
        const EPSILON: f32 = 1e-4;
        let resolution = self.settings.resolution;

        let min_x = (bounds.min.x / resolution - EPSILON).ceil() as i32;
        let max_x = (bounds.max.x / resolution + EPSILON).floor() as i32;
        let min_z = (bounds.min.y / resolution - EPSILON).ceil() as i32;
        let max_z = (bounds.max.y / resolution + EPSILON).floor() as i32;

        (min_x..=max_x)
            .flat_map(|x| (min_z..=max_z).map(move |z| GridKey::new(x, z)))
            .collect()
    }

    fn sample_keys(&self, terrain: &Terrain, keys: &[GridKey]) -> Vec<(GridKey, TerrainSample)> {
        let resolution = self.settings.resolution;
        let sample = |key: &GridKey| {
            let planar = key.to_world(resolution);
            terrain.sample(planar.x, planar.y).map(|sample| (*key, sample))
        };

        #[cfg(feature = "parallel")]
        let samples = keys.par_iter().filter_map(sample).collect();

        #[cfg(not(feature = "parallel"))]
        let samples = keys.iter().filter_map(sample).collect();

        samples
    }

    fn insert_samples(&mut self, samples: Vec<(GridKey, TerrainSample)>) -> Vec<NodeId> {
        samples
            .into_iter()
            .map(|(key, sample)| {
                let node = GridNode::new(key, sample, &self.settings);
                let id = self.nodes.insert(node);
                self.node_ids.insert(key, id);
                id
            })
            .collect()
    }

    fn max_gradient(&self) -> f32 {
        self.settings.max_walkable_slope.to_radians().tan()
    }

    fn can_link(&self, terrain: &Terrain, a: &GridNode, b: &GridNode) -> bool {
        if !a.walkable || !b.walkable {
            return false;
        }

        let planar = Vec2::new(a.position.x, a.position.z).distance(Vec2::new(b.position.x, b.position.z));
        let rise = (b.position.y - a.position.y).abs();
        if rise / planar > self.max_gradient() {
            return false;
        }

        // Coarse stand-in for a collision sweep: the terrain halfway along must not bulge
        // above the straight segment.
        let midpoint = (a.position + b.position) * 0.5;
        terrain
            .height(midpoint.x, midpoint.z)
            .is_some_and(|height| height <= midpoint.y + self.settings.obstruction_tolerance)
    }

    /// Edges from each of `ids` to any traversable neighbor.
    fn link_pairs(&self, terrain: &Terrain, ids: &[NodeId]) -> Vec<(NodeId, NodeId)> {
        ids.iter()
            .flat_map(move |&id| {
                let node = &self.nodes[id];
                Dir::all().filter_map(move |dir| {
                    let neighbor = self.id_at(node.key.step(dir))?;
                    self.can_link(terrain, node, &self.nodes[neighbor])
                        .then_some((id, neighbor))
                })
            })
            .collect()
    }

    fn apply_links(&mut self, pairs: Vec<(NodeId, NodeId)>) {
        for (a, b) in pairs {
            self.nodes[a].add_neighbor(b);
            self.nodes[b].add_neighbor(a);
        }
    }

    fn unlink(&mut self, id: NodeId) {
        let neighbors = std::mem::take(&mut self.nodes[id].neighbors);
        for neighbor in neighbors {
            if let Some(node) = self.nodes.get_mut(neighbor) {
                node.remove_neighbor(id);
            }
        }
    }

    /// Ids of nodes within clearance range of any of `keys`.
    fn ids_near(&self, keys: impl Iterator<Item = GridKey>) -> Vec<NodeId> {
        let mut near = FxHashSet::default();
        for key in keys {
            for dx in -CLEARANCE_RINGS..=CLEARANCE_RINGS {
                for dz in -CLEARANCE_RINGS..=CLEARANCE_RINGS {
                    if let Some(id) = self.id_at(GridKey::new(key.x + dx, key.z + dz)) {
                        near.insert(id);
                    }
                }
            }
        }

        near.into_iter().collect()
    }

    fn refresh_clearance(&mut self, ids: &[NodeId]) {
        let updates: Vec<(NodeId, f32)> = ids
            .iter()
            .filter(|id| self.nodes.contains(**id))
            .map(|&id| (id, self.clearance_of(&self.nodes[id])))
            .collect();

        for (id, clearance) in updates {
            self.nodes[id].clearance = clearance;
        }
    }

    /// Free radius around a node: distance to the nearest unwalkable node, less half a cell.
    ///
    /// Lattice points with no node (past the grid edge or not yet generated) are not
    /// obstacles. A node with nothing blocked within [`CLEARANCE_RINGS`] has unbounded
    /// clearance.
    fn clearance_of(&self, node: &GridNode) -> f32 {
        if !node.walkable {
            return 0.0;
        }

        let mut nearest: Option<f32> = None;
        for dx in -CLEARANCE_RINGS..=CLEARANCE_RINGS {
            for dz in -CLEARANCE_RINGS..=CLEARANCE_RINGS {
                if dx == 0 && dz == 0 {
                    continue;
                }

                let key = GridKey::new(node.key.x + dx, node.key.z + dz);
                if self.node_at(key).is_some_and(|other| !other.walkable) {
                    let distance = ((dx * dx + dz * dz) as f32).sqrt();
                    nearest = Some(nearest.map_or(distance, |n| n.min(distance)));
                }
            }
        }

        nearest.map_or(f32::INFINITY, |n| (n - 0.5) * self.settings.resolution)
    }
}
