//! This module defines `PathResult`, the outcome of a path request, and its error type.
use bevy::math::Vec3;
use thiserror::Error;

use crate::{agent::AgentId, queue::RequestId};

/// Why a path request failed.
///
/// [`PathError::code`] gives a stable snake_case name for logs and telemetry.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash, strum::IntoStaticStr, strum::EnumIter)]
#[strum(serialize_all = "snake_case")]
pub enum PathError {
    #[error("start or goal is not covered by the navigation grid")]
    NoGridCoverage,
    #[error("start or goal is not walkable")]
    NotWalkable,
    #[error("search exceeded its time limit")]
    Timeout,
    #[error("search expanded more nodes than allowed")]
    SearchTooLarge,
    #[error("no path exists between start and goal")]
    NoPath,
    #[error("request queue is full")]
    QueueFull,
    #[error("request was cancelled")]
    Cancelled,
}

impl PathError {
    pub fn code(&self) -> &'static str {
        self.into()
    }

    /// Validation errors are resolved at submission and never reach the queue.
    pub fn is_validation(&self) -> bool {
        matches!(self, PathError::NoGridCoverage | PathError::NotWalkable)
    }
}

/// The outcome of a path request.
///
/// Successful results carry the waypoints from the node nearest the start to the goal node,
/// both included.
#[derive(Debug, Clone, PartialEq)]
pub struct PathResult {
    pub request: RequestId,
    pub agent: AgentId,
    pub waypoints: Vec<Vec3>,
    /// Sum of the 3D distances between consecutive waypoints.
    pub distance: f32,
    /// Seconds to walk `distance` at the configured average speed.
    pub estimated_time: f32,
    /// How many nodes the search expanded.
    pub nodes_expanded: usize,
    pub error: Option<PathError>,
}

impl PathResult {
    /// Builds a successful result, measuring the path as it goes.
    pub fn success(
        request: RequestId,
        agent: AgentId,
        waypoints: Vec<Vec3>,
        average_speed: f32,
        nodes_expanded: usize,
    ) -> Self {
        let distance = path_length(&waypoints);

        PathResult {
            request,
            agent,
            waypoints,
            distance,
            estimated_time: distance / average_speed,
            nodes_expanded,
            error: None,
        }
    }

    pub fn failure(request: RequestId, agent: AgentId, error: PathError) -> Self {
        PathResult {
            request,
            agent,
            waypoints: Vec::new(),
            distance: 0.0,
            estimated_time: 0.0,
            nodes_expanded: 0,
            error: Some(error),
        }
    }

    pub(crate) fn with_nodes_expanded(mut self, nodes_expanded: usize) -> Self {
        self.nodes_expanded = nodes_expanded;
        self
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    pub fn len(&self) -> usize {
        self.waypoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waypoints.is_empty()
    }

    pub fn first(&self) -> Option<Vec3> {
        self.waypoints.first().copied()
    }

    pub fn last(&self) -> Option<Vec3> {
        self.waypoints.last().copied()
    }
}

/// Sum of 3D distances between consecutive points.
pub fn path_length(points: &[Vec3]) -> f32 {
    points
        .windows(2)
        .map(|pair| pair[0].distance(pair[1]))
        .sum()
}
