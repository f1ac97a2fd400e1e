//! A* search over the navigation grid.
use indexmap::map::Entry::{Occupied, Vacant};
use rustc_hash::FxHashSet;
use std::{collections::BinaryHeap, time::Instant};

use crate::{
    dir::Dir,
    grid::NavigationGrid,
    node::GridNode,
    path::PathError,
    settings::{Heuristic, SearchSettings},
    FxIndexMap, NodeId, SmallestCostHolder,
};

/// Per-request limits on which nodes a search may step onto.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Constraints<'a> {
    /// Steepest node slope in degrees.
    pub(crate) max_slope: f32,
    pub(crate) allowed_biomes: Option<&'a FxHashSet<String>>,
    pub(crate) agent_radius: f32,
}

impl Constraints<'_> {
    /// Whether a search may step onto `node`. Clearance is skipped for endpoints, like the start,
    /// which is never filtered.
    fn admits(&self, node: &GridNode, endpoint: bool) -> bool {
        node.walkable
            && node.slope <= self.max_slope
            && (endpoint || node.clearance >= self.agent_radius)
            && self
                .allowed_biomes
                .map_or(true, |biomes| biomes.contains(&node.biome))
    }
}

/// What a single search produced.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SearchOutcome {
    /// Node ids from start to goal.
    pub(crate) path: Result<Vec<NodeId>, PathError>,
    pub(crate) nodes_expanded: usize,
}

/// Estimates the remaining cost between two nodes.
pub(crate) fn heuristic(
    grid: &NavigationGrid,
    settings: &SearchSettings,
    from: &GridNode,
    to: &GridNode,
) -> f32 {
    let dx = (from.position.x - to.position.x).abs();
    let dz = (from.position.z - to.position.z).abs();
    let dy = (from.position.y - to.position.y).abs();

    match settings.heuristic {
        Heuristic::Manhattan => dx + dz + dy * grid.settings().height_cost_multiplier,
        Heuristic::Admissible => {
            let cheapest = grid.settings().biome_costs.min_cost()
                * settings.diagonal_cost_multiplier.min(1.0);
            ((dx * dx + dz * dz).sqrt() + dy) * cheapest
        }
    }
}

/// Cost of stepping from `from` onto `to`, weighted by the destination's cost multiplier.
pub(crate) fn edge_cost(settings: &SearchSettings, from: &GridNode, to: &GridNode) -> f32 {
    let dx = from.position.x - to.position.x;
    let dz = from.position.z - to.position.z;
    let planar = (dx * dx + dz * dz).sqrt();
    let vertical = (from.position.y - to.position.y).abs();

    let multiplier = if from.key.dir_to(to.key).is_some_and(Dir::is_diagonal) {
        settings.diagonal_cost_multiplier
    } else {
        1.0
    };

    (planar + vertical) * to.cost * multiplier
}

/// A* search from `start` to `goal`.
///
/// Stops with [`PathError::Timeout`] once the search has run for the configured timeout, with
/// [`PathError::SearchTooLarge`] once it has expanded more than the configured number of
/// nodes, and with [`PathError::NoPath`] when the open set runs dry.
pub(crate) fn astar_grid(
    grid: &NavigationGrid,
    settings: &SearchSettings,
    constraints: Constraints,
    start: NodeId,
    goal: NodeId,
) -> SearchOutcome {
    let started = Instant::now();

    let (Some(start_node), Some(goal_node)) = (grid.node(start), grid.node(goal)) else {
        return SearchOutcome {
            path: Err(PathError::NoGridCoverage),
            nodes_expanded: 0,
        };
    };

    let mut to_visit = BinaryHeap::with_capacity(64);
    to_visit.push(SmallestCostHolder {
        estimated_cost: heuristic(grid, settings, start_node, goal_node),
        cost: 0.0,
        index: 0,
    });

    // Search bookkeeping: node -> (index of parent, best known cost). Scoped to this search.
    let mut visited: FxIndexMap<NodeId, (usize, f32)> = FxIndexMap::default();
    visited.insert(start, (usize::MAX, 0.0));
    let mut closed: FxHashSet<NodeId> = FxHashSet::default();
    let mut nodes_expanded = 0;

    while let Some(SmallestCostHolder { cost, index, .. }) = to_visit.pop() {
        let Some((&current, &(_, current_cost))) = visited.get_index(index) else {
            continue;
        };

        if cost > current_cost || !closed.insert(current) {
            continue;
        }

        if current == goal {
            return SearchOutcome {
                path: Ok(reconstruct(&visited, index)),
                nodes_expanded,
            };
        }

        if started.elapsed() >= settings.timeout {
            return SearchOutcome {
                path: Err(PathError::Timeout),
                nodes_expanded,
            };
        }

        nodes_expanded += 1;
        if nodes_expanded > settings.max_nodes_expanded {
            return SearchOutcome {
                path: Err(PathError::SearchTooLarge),
                nodes_expanded,
            };
        }

        let Some(current_node) = grid.node(current) else {
            continue;
        };

        for &neighbor in current_node.neighbors() {
            if closed.contains(&neighbor) {
                continue;
            }

            let Some(neighbor_node) = grid.node(neighbor) else {
                continue;
            };

            if !constraints.admits(neighbor_node, neighbor == goal) {
                continue;
            }

            let new_cost = current_cost + edge_cost(settings, current_node, neighbor_node);
            let n = match visited.entry(neighbor) {
                Vacant(e) => {
                    let n = e.index();
                    e.insert((index, new_cost));
                    n
                }
                Occupied(mut e) => {
                    if e.get().1 > new_cost {
                        e.insert((index, new_cost));
                        e.index()
                    } else {
                        continue;
                    }
                }
            };

            to_visit.push(SmallestCostHolder {
                estimated_cost: new_cost + heuristic(grid, settings, neighbor_node, goal_node),
                cost: new_cost,
                index: n,
            });
        }
    }

    SearchOutcome {
        path: Err(PathError::NoPath),
        nodes_expanded,
    }
}

fn reconstruct(visited: &FxIndexMap<NodeId, (usize, f32)>, goal_index: usize) -> Vec<NodeId> {
    let mut current = goal_index;
    let mut steps = vec![];

    while let Some((&id, &(parent, _))) = visited.get_index(current) {
        steps.push(id);
        current = parent;
    }

    steps.reverse();
    steps
}
