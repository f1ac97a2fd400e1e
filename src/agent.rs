//! Per-agent navigation bookkeeping and stuck detection.
//!
//! The tracker never moves agents. It watches the positions reported for them, advances
//! their waypoint cursor and flags agents that stop making progress.
use std::time::Duration;

use bevy::{ecs::entity::Entity, log, math::Vec3, prelude::Resource};
use rustc_hash::FxHashMap;

use crate::settings::AgentSettings;

/// Identifies a navigating agent.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AgentId(pub u64);

impl From<Entity> for AgentId {
    fn from(entity: Entity) -> Self {
        AgentId(entity.to_bits())
    }
}

/// Per-agent overrides applied on registration.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct AgentOptions {
    pub speed: Option<f32>,
    pub radius: Option<f32>,
    pub max_slope: Option<f32>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum AgentStatus {
    Idle,
    Moving,
    Stuck,
}

/// Emitted once when an agent is flagged stuck.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct UnstuckSignal {
    pub agent: AgentId,
    /// Where the agent is now.
    pub position: Vec3,
    /// The last position the agent reached while still making progress.
    pub fallback: Vec3,
}

#[derive(Clone, Debug, PartialEq)]
pub struct AgentNavigationState {
    pub position: Vec3,
    /// Final waypoint of the assigned path.
    pub target: Option<Vec3>,
    pub waypoints: Vec<Vec3>,
    /// Index of the waypoint the agent is heading for.
    pub cursor: usize,
    pub speed: f32,
    pub radius: f32,
    pub max_slope: Option<f32>,
    pub is_moving: bool,
    pub is_stuck: bool,
    pub stuck_timer: Duration,
    /// Last position recorded while making progress. Displacement is measured from here.
    pub last_valid_position: Vec3,
}

impl AgentNavigationState {
    fn new(position: Vec3, options: AgentOptions, settings: &AgentSettings) -> Self {
        AgentNavigationState {
            position,
            target: None,
            waypoints: Vec::new(),
            cursor: 0,
            speed: options.speed.unwrap_or(settings.default_speed),
            radius: options.radius.unwrap_or(settings.default_radius),
            max_slope: options.max_slope,
            is_moving: false,
            is_stuck: false,
            stuck_timer: Duration::ZERO,
            last_valid_position: position,
        }
    }

    pub fn status(&self) -> AgentStatus {
        if self.is_stuck {
            AgentStatus::Stuck
        } else if self.is_moving {
            AgentStatus::Moving
        } else {
            AgentStatus::Idle
        }
    }

    /// The waypoint the agent is currently heading for.
    pub fn next_waypoint(&self) -> Option<Vec3> {
        self.waypoints.get(self.cursor).copied()
    }

    /// Waypoints not yet reached.
    pub fn remaining_waypoints(&self) -> &[Vec3] {
        self.waypoints.get(self.cursor..).unwrap_or(&[])
    }

    fn clear_path(&mut self) {
        self.waypoints.clear();
        self.cursor = 0;
        self.target = None;
        self.is_moving = false;
    }

    // Skips every waypoint within `tolerance` of `position` on the ground plane.
    fn advance(&mut self, tolerance: f32) {
        while let Some(waypoint) = self.next_waypoint() {
            let planar = (waypoint - self.position).with_y(0.0).length();
            if planar > tolerance {
                break;
            }
            self.cursor += 1;
        }

        if self.is_moving && self.next_waypoint().is_none() {
            self.clear_path();
        }
    }
}

/// Tracks [`AgentNavigationState`] for every registered agent.
#[derive(Resource, Debug, Default)]
pub struct AgentTracker {
    settings: AgentSettings,
    agents: FxHashMap<AgentId, AgentNavigationState>,
}

impl AgentTracker {
    pub fn new(settings: AgentSettings) -> Self {
        AgentTracker {
            settings,
            agents: FxHashMap::default(),
        }
    }

    pub fn settings(&self) -> &AgentSettings {
        &self.settings
    }

    /// Starts tracking `agent`. Registering an id twice replaces its state.
    pub fn register(&mut self, agent: AgentId, position: Vec3, options: AgentOptions) {
        let state = AgentNavigationState::new(position, options, &self.settings);
        if self.agents.insert(agent, state).is_some() {
            log::debug!("Agent {:?} registered again, state reset", agent);
        }
    }

    pub fn unregister(&mut self, agent: AgentId) -> Option<AgentNavigationState> {
        self.agents.remove(&agent)
    }

    /// Gives `agent` a path to follow. Returns `false` for unknown agents.
    pub fn assign_path(&mut self, agent: AgentId, waypoints: Vec<Vec3>) -> bool {
        let tolerance = self.settings.waypoint_tolerance;
        let Some(state) = self.agents.get_mut(&agent) else {
            return false;
        };

        state.target = waypoints.last().copied();
        state.waypoints = waypoints;
        state.cursor = 0;
        state.is_moving = state.target.is_some();
        state.is_stuck = false;
        state.stuck_timer = Duration::ZERO;
        state.advance(tolerance);

        true
    }

    /// Records a new position for `agent`, `elapsed` after the previous one.
    ///
    /// Returns a signal the first time a moving agent has made no progress for longer
    /// than the configured stuck duration. The agent's path is dropped at that point and
    /// no further signal is produced until it moves again.
    pub fn on_position_update(
        &mut self,
        agent: AgentId,
        position: Vec3,
        elapsed: Duration,
    ) -> Option<UnstuckSignal> {
        let settings = self.settings;
        let state = self.agents.get_mut(&agent)?;
        state.position = position;

        let displacement = position.distance(state.last_valid_position);

        if displacement >= settings.stuck_distance {
            state.stuck_timer = Duration::ZERO;
            state.is_stuck = false;
            state.last_valid_position = position;
            state.advance(settings.waypoint_tolerance);
            return None;
        }

        state.advance(settings.waypoint_tolerance);
        if !state.is_moving {
            return None;
        }

        state.stuck_timer += elapsed;
        if state.stuck_timer <= settings.stuck_duration || state.is_stuck {
            return None;
        }

        state.is_stuck = true;
        state.clear_path();
        log::info!(
            "Agent {:?} stuck at {} for {:?}, falling back to {}",
            agent,
            position,
            state.stuck_timer,
            state.last_valid_position
        );

        Some(UnstuckSignal {
            agent,
            position,
            fallback: state.last_valid_position,
        })
    }

    pub fn state(&self, agent: AgentId) -> Option<&AgentNavigationState> {
        self.agents.get(&agent)
    }

    pub fn status(&self, agent: AgentId) -> Option<AgentStatus> {
        self.state(agent).map(AgentNavigationState::status)
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}
