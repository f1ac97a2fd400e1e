//! Terrain-aware navigation for Bevy: grid generation over a terrain oracle, prioritised A* path requests and agent stuck detection.
use std::cmp::Ordering;
use std::hash::BuildHasherDefault;

use indexmap::IndexMap;
use rustc_hash::FxHasher;

#[macro_use]
mod macros;

pub mod agent;
mod astar;
pub mod dir;
pub mod grid;
pub mod node;
pub mod path;
pub mod pathfind;
pub mod plugin;
pub mod queue;
pub mod settings;
pub mod terrain;

pub mod prelude {
    pub use crate::agent::{
        AgentId, AgentNavigationState, AgentOptions, AgentStatus, AgentTracker, UnstuckSignal,
    };
    pub use crate::dir::Dir;
    pub use crate::grid::{GenerationReport, NavigationGrid, NodePatch, PartialUpdateReport};
    pub use crate::node::{GridKey, GridNode};
    pub use crate::path::{PathError, PathResult};
    pub use crate::pathfind::{find_path, PathQuery};
    pub use crate::plugin::{
        AgentPositionChanged, AgentRegistered, AgentUnregistered, AgentUnstuck, GridReady,
        NavigationGridStats, NavigationPlugin, NavigationRequested, NavigationSet, Navigator,
        TerrainSectionUnloaded, TerrainTileGenerated, TerrainValidationComplete,
    };
    pub use crate::queue::{
        DrainReport, PathOptions, PathRequest, PathRequestQueue, PathTicket, Priority, RequestId,
    };
    pub use crate::settings::{
        AgentSettings, BiomeCostTable, GridSettings, Heuristic, NavigationSettings,
        NavigationSettingsBuilder, QueueSettings, SearchSettings,
    };
    pub use crate::terrain::{Bounds, HeightfieldTerrain, Terrain, TerrainOracle};
}

pub type NodeId = usize;

type FxIndexMap<K, V> = IndexMap<K, V, BuildHasherDefault<FxHasher>>;

/// Open set entry. Orders as a min-heap on estimated cost, preferring the deeper node on ties.
pub(crate) struct SmallestCostHolder {
    estimated_cost: f32,
    cost: f32,
    index: usize,
}

impl PartialEq for SmallestCostHolder {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for SmallestCostHolder {}

impl PartialOrd for SmallestCostHolder {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SmallestCostHolder {
    fn cmp(&self, other: &Self) -> Ordering {
        match other.estimated_cost.total_cmp(&self.estimated_cost) {
            Ordering::Equal => self.cost.total_cmp(&other.cost),
            s => s,
        }
    }
}
