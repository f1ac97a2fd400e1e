//! Path finding entry points that can be called directly, without the request queue.
use bevy::{log, math::Vec3};

use crate::{
    agent::AgentId,
    astar::{astar_grid, Constraints},
    grid::NavigationGrid,
    path::{PathError, PathResult},
    queue::{PathOptions, RequestId},
    settings::NavigationSettings,
    NodeId,
};

/// The data half of a path request.
#[derive(Debug, Clone, PartialEq)]
pub struct PathQuery {
    pub request: RequestId,
    pub agent: AgentId,
    pub start: Vec3,
    pub goal: Vec3,
    pub options: PathOptions,
}

/// Snaps both endpoints to grid nodes and checks they can be stood on.
pub fn validate_endpoints(
    grid: &NavigationGrid,
    start: Vec3,
    goal: Vec3,
) -> Result<(NodeId, NodeId), PathError> {
    let (Some(start_id), Some(goal_id)) = (grid.snap(start), grid.snap(goal)) else {
        return Err(PathError::NoGridCoverage);
    };

    let walkable = |id| grid.node(id).is_some_and(|node| node.is_walkable());
    if !walkable(start_id) || !walkable(goal_id) {
        return Err(PathError::NotWalkable);
    }

    Ok((start_id, goal_id))
}

/// Finds a path for `query` on `grid`, running the search to completion.
///
/// Always returns a result; failures are reported through [`PathResult::error`].
pub fn find_path(
    grid: &NavigationGrid,
    settings: &NavigationSettings,
    query: &PathQuery,
) -> PathResult {
    let (start, goal) = match validate_endpoints(grid, query.start, query.goal) {
        Ok(endpoints) => endpoints,
        Err(error) => {
            log::debug!("Rejected path request {:?}: {}", query.request, error);
            return PathResult::failure(query.request, query.agent, error);
        }
    };

    let waypoint = |id: NodeId| grid.node(id).map(|node| node.position());
    let average_speed = settings.search.average_agent_speed;

    if start == goal {
        return PathResult::success(
            query.request,
            query.agent,
            waypoint(goal).into_iter().collect(),
            average_speed,
            0,
        );
    }

    let options = &query.options;
    let constraints = Constraints {
        max_slope: options
            .max_slope
            .unwrap_or_else(|| settings.default_max_slope()),
        allowed_biomes: options.allowed_biomes.as_ref(),
        agent_radius: options
            .agent_radius
            .unwrap_or(settings.agents.default_radius),
    };

    let outcome = astar_grid(grid, &settings.search, constraints, start, goal);

    match outcome.path {
        Ok(nodes) => PathResult::success(
            query.request,
            query.agent,
            nodes.into_iter().filter_map(waypoint).collect(),
            average_speed,
            outcome.nodes_expanded,
        ),
        Err(error) => {
            log::debug!(
                "Path request {:?} failed after {} nodes: {}",
                query.request,
                outcome.nodes_expanded,
                error
            );
            PathResult::failure(query.request, query.agent, error)
                .with_nodes_expanded(outcome.nodes_expanded)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        node::GridKey,
        path::path_length,
        settings::NavigationSettingsBuilder,
        terrain::{Bounds, HeightfieldTerrain, Terrain},
    };
    use bevy::math::Vec2;

    fn query(start: Vec3, goal: Vec3) -> PathQuery {
        PathQuery {
            request: RequestId(1),
            agent: AgentId(1),
            start,
            goal,
            options: PathOptions::default(),
        }
    }

    fn flat_grid(settings: &NavigationSettings) -> NavigationGrid {
        let terrain = Terrain::new(HeightfieldTerrain::flat(Vec2::ZERO, 21, 21, 1.0, 0.0));
        let mut grid = NavigationGrid::new(settings.grid.clone());
        grid.generate(&terrain, Bounds::new(Vec2::ZERO, Vec2::splat(20.0)));
        grid
    }

    fn assert_valid_path(grid: &NavigationGrid, result: &PathResult) {
        let ids: Vec<NodeId> = result
            .waypoints
            .iter()
            .map(|waypoint| grid.snap(*waypoint).unwrap())
            .collect();
        for pair in ids.windows(2) {
            assert!(grid.edge_exists(pair[0], pair[1]));
        }
        assert!((result.distance - path_length(&result.waypoints)).abs() < 1e-4);
    }

    #[test]
    fn test_corner_to_corner() {
        let settings = NavigationSettings::default();
        let grid = flat_grid(&settings);

        let result = find_path(
            &grid,
            &settings,
            &query(Vec3::ZERO, Vec3::new(20.0, 0.0, 20.0)),
        );

        assert!(result.is_success());
        assert_eq!(result.first(), Some(Vec3::ZERO));
        assert_eq!(result.last(), Some(Vec3::new(20.0, 0.0, 20.0)));

        let diagonal = Vec2::splat(20.0).length();
        let longest_step = settings.grid.resolution * std::f32::consts::SQRT_2;
        assert!(result.len() as f32 >= diagonal / longest_step);
        assert!((result.distance - diagonal).abs() <= settings.grid.resolution);
        assert!((result.estimated_time - result.distance / 5.0).abs() < 1e-4);
        assert_valid_path(&grid, &result);
    }

    #[test]
    fn test_start_snaps_to_nearest_node() {
        let settings = NavigationSettings::default();
        let grid = flat_grid(&settings);

        let result = find_path(
            &grid,
            &settings,
            &query(Vec3::new(0.7, 3.0, 1.2), Vec3::new(9.1, 0.0, 0.4)),
        );

        assert!(result.is_success());
        assert_eq!(result.first(), Some(Vec3::new(0.0, 0.0, 2.0)));
        assert_eq!(result.last(), Some(Vec3::new(10.0, 0.0, 0.0)));
        assert_valid_path(&grid, &result);
    }

    #[test]
    fn test_same_start_and_goal() {
        let settings = NavigationSettings::default();
        let grid = flat_grid(&settings);

        let result = find_path(
            &grid,
            &settings,
            &query(Vec3::new(4.0, 0.0, 4.0), Vec3::new(4.5, 0.0, 3.5)),
        );

        assert!(result.is_success());
        assert_eq!(result.waypoints, vec![Vec3::new(4.0, 0.0, 4.0)]);
        assert_eq!(result.distance, 0.0);
    }

    #[test]
    fn test_off_grid() {
        let settings = NavigationSettings::default();
        let grid = flat_grid(&settings);

        let result = find_path(
            &grid,
            &settings,
            &query(Vec3::ZERO, Vec3::new(50.0, 0.0, 50.0)),
        );

        assert_eq!(result.error, Some(PathError::NoGridCoverage));
        assert!(result.waypoints.is_empty());
    }

    #[test]
    fn test_unwalkable_goal_region() {
        let settings = NavigationSettings::default();
        let mut field = HeightfieldTerrain::flat(Vec2::ZERO, 21, 21, 1.0, 0.0);
        field.set_walkable_region(Bounds::new(Vec2::splat(14.0), Vec2::splat(20.0)), false);
        let terrain = Terrain::new(field);
        let mut grid = NavigationGrid::new(settings.grid.clone());
        grid.generate(&terrain, terrain.bounds().unwrap());

        let result = find_path(
            &grid,
            &settings,
            &query(Vec3::ZERO, Vec3::new(18.0, 0.0, 18.0)),
        );

        assert!(!result.is_success());
        assert_eq!(result.error, Some(PathError::NotWalkable));
        assert!(result.waypoints.is_empty());
    }

    #[test]
    fn test_agent_radius_avoids_narrow_gaps() {
        let settings = NavigationSettings::default();
        let mut field = HeightfieldTerrain::flat(Vec2::ZERO, 21, 21, 1.0, 0.0);
        // A wall at x = 10 with a single-cell gap at z = 10.
        field.set_walkable_region(Bounds::new(Vec2::new(10.0, 0.0), Vec2::new(10.0, 8.0)), false);
        field.set_walkable_region(Bounds::new(Vec2::new(10.0, 12.0), Vec2::new(10.0, 20.0)), false);
        let terrain = Terrain::new(field);
        let mut grid = NavigationGrid::new(settings.grid.clone());
        grid.generate(&terrain, terrain.bounds().unwrap());

        let mut narrow = query(Vec3::new(0.0, 0.0, 10.0), Vec3::new(20.0, 0.0, 10.0));
        let result = find_path(&grid, &settings, &narrow);
        assert!(result.is_success());
        assert!(result.waypoints.contains(&Vec3::new(10.0, 0.0, 10.0)));

        narrow.options.agent_radius = Some(2.0);
        let result = find_path(&grid, &settings, &narrow);
        assert_eq!(result.error, Some(PathError::NoPath));
    }

    #[test]
    fn test_fine_grid_paths_reach_the_border_both_ways() {
        let settings = NavigationSettingsBuilder::new().resolution(0.5).build();
        let terrain = Terrain::new(HeightfieldTerrain::flat(Vec2::ZERO, 11, 11, 1.0, 0.0));
        let mut grid = NavigationGrid::new(settings.grid.clone());
        grid.generate(&terrain, Bounds::new(Vec2::ZERO, Vec2::splat(10.0)));

        let center = Vec3::new(5.0, 0.0, 5.0);
        let corner = Vec3::ZERO;

        let outward = find_path(&grid, &settings, &query(center, corner));
        assert!(outward.is_success(), "{:?}", outward.error);
        assert_valid_path(&grid, &outward);

        let inward = find_path(&grid, &settings, &query(corner, center));
        assert!(inward.is_success(), "{:?}", inward.error);
        assert_valid_path(&grid, &inward);
    }

    #[test]
    fn test_wide_agent_crosses_open_field() {
        let settings = NavigationSettings::default();
        let terrain = Terrain::new(HeightfieldTerrain::flat(Vec2::ZERO, 101, 101, 1.0, 0.0));
        let mut grid = NavigationGrid::new(settings.grid.clone());
        grid.generate(&terrain, Bounds::new(Vec2::ZERO, Vec2::splat(100.0)));

        let mut wide = query(Vec3::ZERO, Vec3::new(100.0, 0.0, 100.0));
        wide.options.agent_radius = Some(7.5);
        let result = find_path(&grid, &settings, &wide);
        assert!(result.is_success(), "{:?}", result.error);
        assert_valid_path(&grid, &result);

        // Same radius coming from the settings default rather than the request.
        let settings = NavigationSettingsBuilder::new().default_agent_radius(7.5).build();
        let result = find_path(&grid, &settings, &query(Vec3::new(100.0, 0.0, 0.0), Vec3::ZERO));
        assert!(result.is_success(), "{:?}", result.error);
    }

    #[test]
    fn test_node_budget_and_timeout_surface() {
        let settings = NavigationSettingsBuilder::new().max_nodes_expanded(2).build();
        let grid = flat_grid(&settings);

        let result = find_path(
            &grid,
            &settings,
            &query(Vec3::ZERO, Vec3::new(20.0, 0.0, 20.0)),
        );
        assert_eq!(result.error, Some(PathError::SearchTooLarge));
        assert_eq!(result.nodes_expanded, 3);

        let settings = NavigationSettingsBuilder::new()
            .search_timeout(std::time::Duration::ZERO)
            .build();
        let result = find_path(
            &grid,
            &settings,
            &query(Vec3::ZERO, Vec3::new(20.0, 0.0, 20.0)),
        );
        assert_eq!(result.error, Some(PathError::Timeout));
    }

    #[test]
    fn test_biome_costs_shape_the_route() {
        let settings = NavigationSettings::default();
        let mut field = HeightfieldTerrain::flat(Vec2::ZERO, 21, 21, 1.0, 0.0);
        field.set_biome_region(Bounds::new(Vec2::ZERO, Vec2::splat(20.0)), "plains");
        // An expensive strip straight between start and goal.
        field.set_biome_region(Bounds::new(Vec2::new(6.0, 0.0), Vec2::new(14.0, 4.0)), "water");
        let terrain = Terrain::new(field);
        let mut grid = NavigationGrid::new(settings.grid.clone());
        grid.generate(&terrain, terrain.bounds().unwrap());

        let result = find_path(
            &grid,
            &settings,
            &query(Vec3::new(0.0, 0.0, 2.0), Vec3::new(20.0, 0.0, 2.0)),
        );

        assert!(result.is_success());
        let through_water = result
            .waypoints
            .iter()
            .filter(|p| grid.node_at(GridKey::from_world(p.x, p.z, 2.0)).unwrap().biome() == "water")
            .count();
        assert_eq!(through_water, 0);
    }
}
