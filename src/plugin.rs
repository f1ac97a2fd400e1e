//! Bevy wiring: resources, events and the systems that drive navigation each frame.
use std::time::Duration;

use bevy::{ecs::system::SystemParam, log, prelude::*};
use rustc_hash::FxHashMap;

use crate::{
    agent::{AgentId, AgentNavigationState, AgentOptions, AgentTracker},
    grid::{NavigationGrid, NodePatch},
    node::GridKey,
    queue::{PathOptions, PathRequest, PathRequestQueue, PathTicket},
    settings::NavigationSettings,
    terrain::{Bounds, Terrain, TerrainOracle},
};

/// Adds terrain navigation to an app.
///
/// The grid is generated at startup from the oracle's reported bounds. Path requests are
/// drained every `Update` within the configured tick budget. Agent stuck detection reads
/// the frame delta from [`Time`], so the app needs a `TimePlugin` or a `Time` resource.
#[derive(Default)]
pub struct NavigationPlugin {
    settings: NavigationSettings,
    terrain: Terrain,
}

impl NavigationPlugin {
    pub fn new(settings: NavigationSettings) -> Self {
        NavigationPlugin {
            settings,
            terrain: Terrain::unavailable(),
        }
    }

    pub fn with_terrain(mut self, oracle: impl TerrainOracle) -> Self {
        self.terrain = Terrain::new(oracle);
        self
    }
}

impl Plugin for NavigationPlugin {
    fn build(&self, app: &mut App) {
        app.insert_resource(self.settings.clone())
            .insert_resource(self.terrain.clone())
            .insert_resource(NavigationGrid::new(self.settings.grid.clone()))
            .insert_resource(PathRequestQueue::new())
            .insert_resource(AgentTracker::new(self.settings.agents))
            .add_event::<TerrainTileGenerated>()
            .add_event::<TerrainValidationComplete>()
            .add_event::<TerrainSectionUnloaded>()
            .add_event::<AgentRegistered>()
            .add_event::<AgentUnregistered>()
            .add_event::<AgentPositionChanged>()
            .add_event::<NavigationRequested>()
            .add_event::<GridReady>()
            .add_event::<AgentUnstuck>()
            .add_systems(Startup, generate_initial_grid)
            .add_systems(
                Update,
                (
                    update_grid,
                    update_agent_registry,
                    track_agent_positions,
                    submit_path_requests,
                    drain_path_requests,
                )
                    .chain()
                    .in_set(NavigationSet),
            );
    }
}

#[derive(SystemSet, Debug, Clone, PartialEq, Eq, Hash)]
pub struct NavigationSet;

/// New terrain was generated inside `bounds`; the grid there is rebuilt.
#[derive(Event, Debug, Clone, Copy)]
pub struct TerrainTileGenerated {
    pub bounds: Bounds,
}

/// A validation pass republished walkability for some nodes.
#[derive(Event, Debug, Clone, Default)]
pub struct TerrainValidationComplete {
    pub patch: FxHashMap<GridKey, NodePatch>,
}

/// Terrain inside `bounds` was unloaded; its nodes are dropped.
#[derive(Event, Debug, Clone, Copy)]
pub struct TerrainSectionUnloaded {
    pub bounds: Bounds,
}

#[derive(Event, Debug, Clone, Copy)]
pub struct AgentRegistered {
    pub agent: AgentId,
    pub position: Vec3,
    pub options: AgentOptions,
}

#[derive(Event, Debug, Clone, Copy)]
pub struct AgentUnregistered {
    pub agent: AgentId,
}

/// The motion controller moved an agent. Send at most one per agent per frame.
#[derive(Event, Debug, Clone, Copy)]
pub struct AgentPositionChanged {
    pub agent: AgentId,
    pub position: Vec3,
}

/// Submits a path request. The result goes to the request's [`PathTicket`].
#[derive(Event, Debug)]
pub struct NavigationRequested(pub PathRequest);

/// The grid was generated or a region of it rebuilt.
#[derive(Event, Debug, Clone, Copy, PartialEq)]
pub struct GridReady {
    pub node_count: usize,
    pub generation_time: Duration,
    pub bounds: Bounds,
}

/// An agent stopped making progress. Move it back to `fallback` or re-route it.
#[derive(Event, Debug, Clone, Copy, PartialEq)]
pub struct AgentUnstuck {
    pub agent: AgentId,
    pub position: Vec3,
    pub fallback: Vec3,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct NavigationGridStats {
    pub total_nodes: usize,
    pub walkable_nodes: usize,
    pub active_agents: usize,
    pub queued_requests: usize,
    pub resolution: f32,
}

/// System parameter for requesting paths and inspecting navigation state.
#[derive(SystemParam)]
pub struct Navigator<'w> {
    settings: Res<'w, NavigationSettings>,
    grid: Res<'w, NavigationGrid>,
    queue: ResMut<'w, PathRequestQueue>,
    tracker: ResMut<'w, AgentTracker>,
}

impl Navigator<'_> {
    /// Queues a path request. Requests that can't succeed resolve before this returns.
    ///
    /// Radius and max slope left unset fall back to what the agent registered with.
    pub fn request_navigation(
        &mut self,
        agent: AgentId,
        start: Vec3,
        goal: Vec3,
        mut options: PathOptions,
    ) -> PathTicket {
        if let Some(state) = self.tracker.state(agent) {
            options.agent_radius.get_or_insert(state.radius);
            options.max_slope = options.max_slope.or(state.max_slope);
        }

        self.queue
            .request(&self.grid, &self.settings, agent, start, goal, options)
    }

    /// Hands the agent a path to follow, typically the waypoints of a resolved ticket.
    pub fn assign_path(&mut self, agent: AgentId, waypoints: Vec<Vec3>) -> bool {
        self.tracker.assign_path(agent, waypoints)
    }

    pub fn agent_navigation_state(&self, agent: AgentId) -> Option<AgentNavigationState> {
        self.tracker.state(agent).cloned()
    }

    pub fn grid_stats(&self) -> NavigationGridStats {
        NavigationGridStats {
            total_nodes: self.grid.len(),
            walkable_nodes: self.grid.walkable_count(),
            active_agents: self.tracker.len(),
            queued_requests: self.queue.len(),
            resolution: self.grid.resolution(),
        }
    }
}

fn generate_initial_grid(
    terrain: Res<Terrain>,
    mut grid: ResMut<NavigationGrid>,
    mut ready: EventWriter<GridReady>,
) {
    let Some(bounds) = terrain.bounds() else {
        log::warn!("Terrain reported no bounds, navigation grid left empty");
        return;
    };

    let report = grid.generate(&terrain, bounds);
    ready.write(GridReady {
        node_count: report.node_count,
        generation_time: report.duration,
        bounds: report.bounds,
    });
}

fn update_grid(
    terrain: Res<Terrain>,
    mut grid: ResMut<NavigationGrid>,
    mut generated: EventReader<TerrainTileGenerated>,
    mut validated: EventReader<TerrainValidationComplete>,
    mut unloaded: EventReader<TerrainSectionUnloaded>,
    mut ready: EventWriter<GridReady>,
) {
    for event in unloaded.read() {
        grid.invalidate_region(event.bounds);
    }

    for event in generated.read() {
        let report = grid.regenerate_region(&terrain, event.bounds);
        ready.write(GridReady {
            node_count: report.node_count,
            generation_time: report.duration,
            bounds: report.bounds,
        });
    }

    for event in validated.read() {
        let report = grid.apply_partial_update(&terrain, &event.patch);
        log::debug!(
            "Applied walkability patch: {} updated, {} ignored, {} relinked",
            report.updated,
            report.ignored,
            report.relinked
        );
    }
}

fn update_agent_registry(
    mut tracker: ResMut<AgentTracker>,
    mut registered: EventReader<AgentRegistered>,
    mut unregistered: EventReader<AgentUnregistered>,
) {
    for event in registered.read() {
        tracker.register(event.agent, event.position, event.options);
    }

    for event in unregistered.read() {
        tracker.unregister(event.agent);
    }
}

fn track_agent_positions(
    time: Res<Time>,
    mut tracker: ResMut<AgentTracker>,
    mut moved: EventReader<AgentPositionChanged>,
    mut unstuck: EventWriter<AgentUnstuck>,
) {
    for event in moved.read() {
        if let Some(signal) = tracker.on_position_update(event.agent, event.position, time.delta()) {
            unstuck.write(AgentUnstuck {
                agent: signal.agent,
                position: signal.position,
                fallback: signal.fallback,
            });
        }
    }
}

fn submit_path_requests(
    grid: Res<NavigationGrid>,
    settings: Res<NavigationSettings>,
    mut queue: ResMut<PathRequestQueue>,
    mut requests: ResMut<Events<NavigationRequested>>,
) {
    for NavigationRequested(request) in requests.drain() {
        queue.submit(&grid, &settings, request);
    }
}

fn drain_path_requests(
    grid: Res<NavigationGrid>,
    settings: Res<NavigationSettings>,
    mut queue: ResMut<PathRequestQueue>,
) {
    if queue.is_empty() {
        return;
    }

    let report = queue.drain(&grid, &settings);
    log::debug!(
        "Resolved {} path requests in {:?}, {} queued",
        report.resolved.len(),
        report.elapsed,
        report.remaining
    );
}
