//! The terrain oracle the navigation grid is sampled from.
//!
//! Terrain generation lives outside this crate. Anything that can answer height, slope,
//! walkability and biome queries for a world coordinate can back the grid by implementing
//! [`TerrainOracle`]. [`HeightfieldTerrain`] is a ready-made oracle over a regular heightmap.
use std::sync::Arc;

use bevy::{math::Vec2, prelude::Resource};
use ndarray::Array2;

use crate::settings::UNKNOWN_BIOME;

/// Axis aligned rectangle on the horizontal (x, z) plane.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Bounds {
    pub min: Vec2,
    pub max: Vec2,
}

impl Bounds {
    /// Creates bounds from two corners, in any order.
    pub fn new(a: Vec2, b: Vec2) -> Self {
        Bounds {
            min: a.min(b),
            max: a.max(b),
        }
    }

    pub fn contains(&self, x: f32, z: f32) -> bool {
        x >= self.min.x && x <= self.max.x && z >= self.min.y && z <= self.max.y
    }
}

/// Query interface to the world's terrain.
///
/// Slopes are in degrees. Implementations must be cheap to call; the grid samples every
/// lattice point and every edge midpoint.
pub trait TerrainOracle: Send + Sync + 'static {
    /// Terrain height at a world position, or `None` where there is no terrain.
    fn height(&self, x: f32, z: f32) -> Option<f32>;
    /// Terrain slope in degrees.
    fn slope(&self, x: f32, z: f32) -> f32;
    /// Whether an agent may stand here. `height` and `slope` are passed when the caller already
    /// sampled them.
    fn is_walkable(&self, x: f32, z: f32, height: Option<f32>, slope: Option<f32>) -> bool;
    fn biome(&self, x: f32, z: f32) -> String;

    /// Whether the oracle has data to answer with yet.
    fn is_ready(&self) -> bool {
        true
    }

    /// Extent of the terrain, used for the initial grid generation.
    fn bounds(&self) -> Option<Bounds> {
        None
    }
}

/// Everything the grid needs to know about one lattice point.
#[derive(Clone, Debug, PartialEq)]
pub struct TerrainSample {
    pub height: f32,
    pub slope: f32,
    pub walkable: bool,
    pub biome: String,
}

/// Shared handle to the terrain oracle.
///
/// While no oracle is attached, or the attached one isn't ready, every query answers with a
/// fixed sentinel: no height, zero slope, the unknown biome, and **not walkable**.
#[derive(Resource, Clone, Default)]
pub struct Terrain {
    oracle: Option<Arc<dyn TerrainOracle>>,
}

impl Terrain {
    pub fn new(oracle: impl TerrainOracle) -> Self {
        Terrain {
            oracle: Some(Arc::new(oracle)),
        }
    }

    /// A handle with no oracle attached.
    pub fn unavailable() -> Self {
        Terrain { oracle: None }
    }

    fn ready(&self) -> Option<&dyn TerrainOracle> {
        self.oracle
            .as_deref()
            .filter(|oracle| oracle.is_ready())
    }

    pub fn height(&self, x: f32, z: f32) -> Option<f32> {
        self.ready().and_then(|oracle| oracle.height(x, z))
    }

    pub fn slope(&self, x: f32, z: f32) -> f32 {
        self.ready().map_or(0.0, |oracle| oracle.slope(x, z))
    }

    pub fn is_walkable(&self, x: f32, z: f32, height: Option<f32>, slope: Option<f32>) -> bool {
        self.ready()
            .is_some_and(|oracle| oracle.is_walkable(x, z, height, slope))
    }

    pub fn biome(&self, x: f32, z: f32) -> String {
        self.ready()
            .map_or_else(|| UNKNOWN_BIOME.to_string(), |oracle| oracle.biome(x, z))
    }

    pub fn bounds(&self) -> Option<Bounds> {
        self.ready().and_then(|oracle| oracle.bounds())
    }

    /// Samples everything about a point, or `None` where there is no terrain.
    pub fn sample(&self, x: f32, z: f32) -> Option<TerrainSample> {
        let oracle = self.ready()?;
        let height = oracle.height(x, z)?;
        let slope = oracle.slope(x, z);
        let walkable = oracle.is_walkable(x, z, Some(height), Some(slope));

        Some(TerrainSample {
            height,
            slope,
            walkable,
            biome: oracle.biome(x, z),
        })
    }
}

/// A [`TerrainOracle`] over a regular heightmap with per-cell walkability and biome tags.
///
/// Heights are bilinearly interpolated between samples. Walkability and biome are taken from
/// the nearest sample.
#[derive(Clone, Debug)]
pub struct HeightfieldTerrain {
    origin: Vec2,
    cell_size: f32,
    heights: Array2<f32>,
    walkable: Array2<bool>,
    biomes: Array2<u16>,
    biome_names: Vec<String>,
}

impl HeightfieldTerrain {
    /// Builds a heightfield of `width × depth` samples spaced `cell_size` apart, with the
    /// first sample at `origin`. Every cell starts walkable and in the unknown biome.
    pub fn from_fn(
        origin: Vec2,
        width: usize,
        depth: usize,
        cell_size: f32,
        height: impl Fn(f32, f32) -> f32,
    ) -> Self {
        if width < 2 || depth < 2 {
            panic!("Heightfield needs at least 2x2 samples");
        }

        if cell_size <= 0.0 {
            panic!("Cell size must be positive");
        }

        let heights = Array2::from_shape_fn((width, depth), |(ix, iz)| {
            height(
                origin.x + ix as f32 * cell_size,
                origin.y + iz as f32 * cell_size,
            )
        });

        HeightfieldTerrain {
            origin,
            cell_size,
            heights,
            walkable: Array2::from_elem((width, depth), true),
            biomes: Array2::zeros((width, depth)),
            biome_names: vec![UNKNOWN_BIOME.to_string()],
        }
    }

    /// A flat heightfield at height `y`.
    pub fn flat(origin: Vec2, width: usize, depth: usize, cell_size: f32, y: f32) -> Self {
        Self::from_fn(origin, width, depth, cell_size, |_, _| y)
    }

    pub fn width(&self) -> usize {
        self.heights.shape()[0]
    }

    pub fn depth(&self) -> usize {
        self.heights.shape()[1]
    }

    /// Marks every sample inside `bounds` as walkable or not.
    pub fn set_walkable_region(&mut self, bounds: Bounds, walkable: bool) {
        fill_region(&mut self.walkable, self.origin, self.cell_size, bounds, walkable);
    }

    /// Tags every sample inside `bounds` with `biome`.
    pub fn set_biome_region(&mut self, bounds: Bounds, biome: &str) {
        let index = match self.biome_names.iter().position(|name| name == biome) {
            Some(index) => index,
            None => {
                self.biome_names.push(biome.to_string());
                self.biome_names.len() - 1
            }
        };
        fill_region(&mut self.biomes, self.origin, self.cell_size, bounds, index as u16);
    }

    /// Overrides the height of every sample inside `bounds`.
    pub fn set_height_region(&mut self, bounds: Bounds, height: f32) {
        fill_region(&mut self.heights, self.origin, self.cell_size, bounds, height);
    }

    /// Continuous sample coordinates, or `None` outside the heightfield.
    fn grid_coords(&self, x: f32, z: f32) -> Option<(f32, f32)> {
        const EPSILON: f32 = 1e-4;

        let gx = (x - self.origin.x) / self.cell_size;
        let gz = (z - self.origin.y) / self.cell_size;
        let max_x = (self.width() - 1) as f32;
        let max_z = (self.depth() - 1) as f32;

        if gx < -EPSILON || gz < -EPSILON || gx > max_x + EPSILON || gz > max_z + EPSILON {
            return None;
        }

        Some((gx.clamp(0.0, max_x), gz.clamp(0.0, max_z)))
    }

    fn nearest(&self, x: f32, z: f32) -> Option<(usize, usize)> {
        self.grid_coords(x, z)
            .map(|(gx, gz)| (gx.round() as usize, gz.round() as usize))
    }

    fn interpolate(&self, gx: f32, gz: f32) -> f32 {
        let x0 = (gx.floor() as usize).min(self.width() - 2);
        let z0 = (gz.floor() as usize).min(self.depth() - 2);
        let fx = gx - x0 as f32;
        let fz = gz - z0 as f32;

        let h00 = self.heights[[x0, z0]];
        let h10 = self.heights[[x0 + 1, z0]];
        let h01 = self.heights[[x0, z0 + 1]];
        let h11 = self.heights[[x0 + 1, z0 + 1]];

        let h0 = h00 * (1.0 - fx) + h10 * fx;
        let h1 = h01 * (1.0 - fx) + h11 * fx;
        h0 * (1.0 - fz) + h1 * fz
    }
}

fn fill_region<T: Copy>(
    cells: &mut Array2<T>,
    origin: Vec2,
    cell_size: f32,
    bounds: Bounds,
    value: T,
) {
    for ((ix, iz), cell) in cells.indexed_iter_mut() {
        let x = origin.x + ix as f32 * cell_size;
        let z = origin.y + iz as f32 * cell_size;
        if bounds.contains(x, z) {
            *cell = value;
        }
    }
}

impl TerrainOracle for HeightfieldTerrain {
    fn height(&self, x: f32, z: f32) -> Option<f32> {
        self.grid_coords(x, z)
            .map(|(gx, gz)| self.interpolate(gx, gz))
    }

    fn slope(&self, x: f32, z: f32) -> f32 {
        let Some((gx, gz)) = self.grid_coords(x, z) else {
            return 0.0;
        };

        // Central differences, falling back to one-sided ones at the border.
        let step = 0.5;
        let max_x = (self.width() - 1) as f32;
        let max_z = (self.depth() - 1) as f32;
        let (xa, xb) = ((gx - step).max(0.0), (gx + step).min(max_x));
        let (za, zb) = ((gz - step).max(0.0), (gz + step).min(max_z));

        let dx = (self.interpolate(xb, gz) - self.interpolate(xa, gz))
            / ((xb - xa) * self.cell_size);
        let dz = (self.interpolate(gx, zb) - self.interpolate(gx, za))
            / ((zb - za) * self.cell_size);

        (dx * dx + dz * dz).sqrt().atan().to_degrees()
    }

    fn is_walkable(&self, x: f32, z: f32, height: Option<f32>, _slope: Option<f32>) -> bool {
        let height = height.or_else(|| self.height(x, z));
        if height.is_none() {
            return false;
        }

        self.nearest(x, z)
            .is_some_and(|(ix, iz)| self.walkable[[ix, iz]])
    }

    fn biome(&self, x: f32, z: f32) -> String {
        self.nearest(x, z).map_or_else(
            || UNKNOWN_BIOME.to_string(),
            |(ix, iz)| self.biome_names[self.biomes[[ix, iz]] as usize].clone(),
        )
    }

    fn bounds(&self) -> Option<Bounds> {
        let extent = Vec2::new(
            (self.width() - 1) as f32 * self.cell_size,
            (self.depth() - 1) as f32 * self.cell_size,
        );
        Some(Bounds::new(self.origin, self.origin + extent))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NotReady;

    impl TerrainOracle for NotReady {
        fn height(&self, _x: f32, _z: f32) -> Option<f32> {
            Some(1.0)
        }

        fn slope(&self, _x: f32, _z: f32) -> f32 {
            10.0
        }

        fn is_walkable(&self, _x: f32, _z: f32, _h: Option<f32>, _s: Option<f32>) -> bool {
            true
        }

        fn biome(&self, _x: f32, _z: f32) -> String {
            "forest".to_string()
        }

        fn is_ready(&self) -> bool {
            false
        }
    }

    #[test]
    fn test_degraded_mode_sentinels() {
        for terrain in [Terrain::unavailable(), Terrain::new(NotReady)] {
            assert_eq!(terrain.height(0.0, 0.0), None);
            assert_eq!(terrain.slope(0.0, 0.0), 0.0);
            assert!(!terrain.is_walkable(0.0, 0.0, Some(1.0), Some(0.0)));
            assert_eq!(terrain.biome(0.0, 0.0), UNKNOWN_BIOME);
            assert!(terrain.sample(0.0, 0.0).is_none());
            assert!(terrain.bounds().is_none());
        }
    }

    #[test]
    fn test_heightfield_interpolates() {
        let field = HeightfieldTerrain::from_fn(Vec2::ZERO, 3, 3, 2.0, |x, _| x);

        assert_eq!(field.height(0.0, 0.0), Some(0.0));
        assert_eq!(field.height(4.0, 4.0), Some(4.0));
        assert!((field.height(1.0, 3.0).unwrap() - 1.0).abs() < 1e-5);
        assert_eq!(field.height(4.5, 0.0), None);
        assert_eq!(field.height(-0.5, 0.0), None);
    }

    #[test]
    fn test_heightfield_slope() {
        let flat = HeightfieldTerrain::flat(Vec2::ZERO, 4, 4, 1.0, 3.0);
        assert!(flat.slope(1.5, 1.5).abs() < 1e-4);

        // Rises one unit per unit along x: 45 degrees.
        let ramp = HeightfieldTerrain::from_fn(Vec2::ZERO, 4, 4, 1.0, |x, _| x);
        assert!((ramp.slope(1.5, 1.5) - 45.0).abs() < 1e-3);
        assert!((ramp.slope(0.0, 0.0) - 45.0).abs() < 1e-3);
    }

    #[test]
    fn test_heightfield_regions() {
        let mut field = HeightfieldTerrain::flat(Vec2::ZERO, 5, 5, 1.0, 0.0);
        field.set_walkable_region(Bounds::new(Vec2::new(2.0, 2.0), Vec2::new(4.0, 4.0)), false);
        field.set_biome_region(Bounds::new(Vec2::ZERO, Vec2::new(1.0, 1.0)), "swamp");

        assert!(field.is_walkable(0.0, 0.0, None, None));
        assert!(!field.is_walkable(3.0, 3.0, None, None));
        assert!(!field.is_walkable(10.0, 10.0, None, None));
        assert_eq!(field.biome(0.4, 0.4), "swamp");
        assert_eq!(field.biome(3.0, 3.0), UNKNOWN_BIOME);
        assert_eq!(
            field.bounds(),
            Some(Bounds::new(Vec2::ZERO, Vec2::new(4.0, 4.0)))
        );
    }
}
