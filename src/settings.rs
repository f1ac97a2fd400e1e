//! Configuration for the navigation grid, path finder, request queue and agent tracker.
use std::time::Duration;

use bevy::prelude::Resource;
use rustc_hash::FxHashMap;

/// Biome used when the terrain oracle can't resolve one.
pub const UNKNOWN_BIOME: &str = "unknown";

/// Per-biome movement cost multipliers.
///
/// Biomes missing from the table cost `1.0`.
#[derive(Clone, Debug)]
pub struct BiomeCostTable {
    costs: FxHashMap<String, f32>,
}

impl BiomeCostTable {
    /// An empty table where every biome costs `1.0`.
    pub fn empty() -> Self {
        BiomeCostTable {
            costs: FxHashMap::default(),
        }
    }

    pub fn set(&mut self, biome: impl Into<String>, cost: f32) {
        self.costs.insert(biome.into(), cost);
    }

    pub fn cost(&self, biome: &str) -> f32 {
        self.costs.get(biome).copied().unwrap_or(1.0)
    }

    /// The cheapest multiplier any node can end up with.
    pub fn min_cost(&self) -> f32 {
        self.costs.values().copied().fold(1.0, f32::min)
    }
}

impl Default for BiomeCostTable {
    fn default() -> Self {
        let mut table = BiomeCostTable::empty();
        table.set("grassland", 1.0);
        table.set("plains", 1.0);
        table.set("forest", 1.5);
        table.set("desert", 1.3);
        table.set("tundra", 1.6);
        table.set("snow", 2.0);
        table.set("swamp", 2.5);
        table.set("mountain", 3.0);
        table.set("water", 8.0);
        table
    }
}

/// Heuristic used by the A* search.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Heuristic {
    /// Planar Manhattan distance plus the vertical delta weighted by the height cost multiplier.
    /// Fast, but can overestimate on diagonal moves and steep terrain so paths are not
    /// guaranteed to be optimal.
    #[default]
    Manhattan,
    /// Planar Euclidean distance plus the vertical delta, scaled by the cheapest cost
    /// multiplier in the biome table. Never overestimates, so returned paths are optimal.
    Admissible,
}

/// Settings for how the terrain is sampled into a grid and connected.
#[derive(Clone, Debug)]
pub struct GridSettings {
    /// Spacing between lattice points in world units.
    pub resolution: f32,
    /// Steepest slope in degrees an edge or node may have.
    pub max_walkable_slope: f32,
    /// How far the terrain at an edge midpoint may rise above the straight line between its
    /// endpoints before the edge is considered obstructed.
    pub obstruction_tolerance: f32,
    pub height_cost_multiplier: f32,
    pub biome_costs: BiomeCostTable,
}

impl Default for GridSettings {
    fn default() -> Self {
        GridSettings {
            resolution: 2.0,
            max_walkable_slope: 35.0,
            obstruction_tolerance: 0.5,
            height_cost_multiplier: 2.0,
            biome_costs: BiomeCostTable::default(),
        }
    }
}

/// Limits and weights for a single search.
#[derive(Clone, Copy, Debug)]
pub struct SearchSettings {
    pub timeout: Duration,
    pub max_nodes_expanded: usize,
    pub diagonal_cost_multiplier: f32,
    pub heuristic: Heuristic,
    /// Speed used to turn a path length into an estimated traversal time.
    pub average_agent_speed: f32,
}

impl Default for SearchSettings {
    fn default() -> Self {
        SearchSettings {
            timeout: Duration::from_secs(5),
            max_nodes_expanded: 10_000,
            diagonal_cost_multiplier: 1.0,
            heuristic: Heuristic::Manhattan,
            average_agent_speed: 5.0,
        }
    }
}

/// Settings for the path request queue driver.
#[derive(Clone, Copy, Debug)]
pub struct QueueSettings {
    /// Wall-clock budget a single drain pass may spend.
    pub tick_budget: Duration,
    /// `None` leaves the queue unbounded. When set, requests arriving at a full queue
    /// are rejected.
    pub max_queued_requests: Option<usize>,
}

impl Default for QueueSettings {
    fn default() -> Self {
        QueueSettings {
            tick_budget: Duration::from_millis(50),
            max_queued_requests: None,
        }
    }
}

/// Defaults and thresholds for tracked agents.
#[derive(Clone, Copy, Debug)]
pub struct AgentSettings {
    pub default_speed: f32,
    pub default_radius: f32,
    /// Moving less than this between updates counts towards being stuck.
    pub stuck_distance: f32,
    /// How long an agent may fail to progress before it's flagged stuck.
    pub stuck_duration: Duration,
    /// Planar distance at which a waypoint counts as reached.
    pub waypoint_tolerance: f32,
}

impl Default for AgentSettings {
    fn default() -> Self {
        AgentSettings {
            default_speed: 5.0,
            default_radius: 0.5,
            stuck_distance: 0.1,
            stuck_duration: Duration::from_secs(2),
            waypoint_tolerance: 0.5,
        }
    }
}

/// All navigation settings, inserted as a resource by [`crate::plugin::NavigationPlugin`].
#[derive(Resource, Clone, Debug, Default)]
pub struct NavigationSettings {
    pub grid: GridSettings,
    pub search: SearchSettings,
    pub queue: QueueSettings,
    pub agents: AgentSettings,
}

impl NavigationSettings {
    /// The default max slope given to agents that don't specify one.
    pub fn default_max_slope(&self) -> f32 {
        self.grid.max_walkable_slope
    }
}

/// Builder for the commonly tuned [`NavigationSettings`]. Everything else is a public field.
///
/// Example usage:
/// ```
/// use std::time::Duration;
/// use bevy_terrain_nav::prelude::*;
///
/// let settings = NavigationSettingsBuilder::new()
///     .resolution(1.0)
///     .max_walkable_slope(40.0)
///     .search_timeout(Duration::from_secs(2))
///     .biome_cost("lava", 50.0)
///     .max_queued_requests(256)
///     .build();
///
/// assert_eq!(settings.grid.resolution, 1.0);
/// ```
#[derive(Clone, Debug, Default)]
pub struct NavigationSettingsBuilder {
    settings: NavigationSettings,
}

impl NavigationSettingsBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spacing between lattice points. Must be positive.
    pub fn resolution(mut self, resolution: f32) -> Self {
        if resolution <= 0.0 || !resolution.is_finite() {
            panic!("Resolution must be a positive number");
        }

        self.settings.grid.resolution = resolution;
        self
    }

    /// Steepest walkable slope in degrees, between 0 and 90.
    pub fn max_walkable_slope(mut self, degrees: f32) -> Self {
        if !(0.0..90.0).contains(&degrees) {
            panic!("Max walkable slope must be in [0, 90) degrees");
        }

        self.settings.grid.max_walkable_slope = degrees;
        self
    }

    /// Sets or overrides the cost of a single biome.
    pub fn biome_cost(mut self, biome: impl Into<String>, cost: f32) -> Self {
        self.settings.grid.biome_costs.set(biome, cost);
        self
    }

    pub fn search_timeout(mut self, timeout: Duration) -> Self {
        self.settings.search.timeout = timeout;
        self
    }

    pub fn max_nodes_expanded(mut self, max: usize) -> Self {
        self.settings.search.max_nodes_expanded = max;
        self
    }

    /// Bounds the request queue. Requests submitted while it is full are rejected.
    pub fn max_queued_requests(mut self, max: usize) -> Self {
        self.settings.queue.max_queued_requests = Some(max);
        self
    }

    pub fn default_agent_radius(mut self, radius: f32) -> Self {
        self.settings.agents.default_radius = radius;
        self
    }

    pub fn build(self) -> NavigationSettings {
        self.settings
    }
}
