//! Centroid and moment of inertia by grid sampling.
//!
//! The polygon is sampled on a regular grid at `spacing` intervals. Sample
//! points inside the paths (even-odd rule) stand in for equal point masses:
//! their mean is the centroid, and `mass / count * sum(|p - centroid|^2)` is
//! the moment of inertia. A finer spacing is more accurate and more costly.
//!
//! Results depend only on the shape and the spacing, so [`MassCache`] keys
//! them by both and reuses them when a scene is reassembled.

use std::collections::HashMap;

use glam::Vec2;
use rayon::prelude::*;

use super::path::contains_point;

/// Mass-independent result of the grid integration.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MassProperties {
    /// Centroid in the frame the paths were given in.
    pub centroid: Vec2,
    pub sample_count: u32,
    /// Sum of squared sample distances from the centroid.
    pub sum_r2: f64,
    /// Approximate area, `sample_count * spacing^2`.
    pub area: f32,
}

impl MassProperties {
    pub fn inertia(&self, mass: f32) -> f32 {
        if self.sample_count == 0 {
            return 0.0;
        }
        (mass as f64 / self.sample_count as f64 * self.sum_r2) as f32
    }
}

/// Finest sampling spacing. `SimConfig::validate` clamps to this.
pub const MIN_MASS_GRID_SPACING: f32 = 0.01;

/// Sample the shape and integrate. Rows are processed in parallel.
///
/// Returns `None` if no sample point falls inside the shape.
pub fn integrate(paths: &[Vec<Vec2>], spacing: f32) -> Option<MassProperties> {
    let spacing = spacing.max(MIN_MASS_GRID_SPACING);
    let mut min = Vec2::splat(f32::MAX);
    let mut max = Vec2::splat(f32::MIN);
    for v in paths.iter().flatten() {
        min = min.min(*v);
        max = max.max(*v);
    }
    if min.x > max.x {
        return None;
    }

    let slices: Vec<&[Vec2]> = paths.iter().map(Vec::as_slice).collect();
    let cols = ((max.x - min.x) / spacing).ceil().max(1.0) as u32;
    let rows = ((max.y - min.y) / spacing).ceil().max(1.0) as u32;
    let sample = |col: u32, row: u32| min + (Vec2::new(col as f32, row as f32) + 0.5) * spacing;

    let points: Vec<Vec2> = (0..rows)
        .into_par_iter()
        .flat_map_iter(|row| {
            let slices = &slices;
            (0..cols)
                .map(move |col| sample(col, row))
                .filter(move |p| contains_point(slices, *p))
        })
        .collect();

    if points.is_empty() {
        return None;
    }

    let count = points.len();
    let sum = points.par_iter().fold(|| Vec2::ZERO, |a, p| a + *p).reduce(|| Vec2::ZERO, |a, b| a + b);
    let centroid = sum / count as f32;
    let sum_r2: f64 = points
        .par_iter()
        .map(|p| p.distance_squared(centroid) as f64)
        .sum();

    Some(MassProperties {
        centroid,
        sample_count: count as u32,
        sum_r2,
        area: count as f32 * spacing * spacing,
    })
}

/// Exact identity of a shape and sampling spacing.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ShapeKey {
    spacing: u32,
    paths: Vec<Vec<[u32; 2]>>,
}

impl ShapeKey {
    pub fn new(paths: &[Vec<Vec2>], spacing: f32) -> Self {
        Self {
            spacing: spacing.to_bits(),
            paths: paths
                .iter()
                .map(|path| path.iter().map(|v| [v.x.to_bits(), v.y.to_bits()]).collect())
                .collect(),
        }
    }
}

#[derive(Debug)]
struct CacheEntry {
    props: Option<MassProperties>,
    generation: u64,
}

/// Memoized grid integrations keyed by [`ShapeKey`].
///
/// Each assembly is one generation. [`MassCache::prune`] drops the shapes the
/// latest generation did not ask for.
#[derive(Debug, Default)]
pub struct MassCache {
    entries: HashMap<ShapeKey, CacheEntry>,
    generation: u64,
    hits: usize,
    misses: usize,
}

impl MassCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_integrate(&mut self, paths: &[Vec<Vec2>], spacing: f32) -> Option<MassProperties> {
        let key = ShapeKey::new(paths, spacing);
        let generation = self.generation;
        if let Some(entry) = self.entries.get_mut(&key) {
            self.hits += 1;
            entry.generation = generation;
            return entry.props;
        }
        self.misses += 1;
        let props = integrate(paths, spacing);
        self.entries.insert(key, CacheEntry { props, generation });
        props
    }

    /// Start a new generation of lookups.
    pub fn begin_generation(&mut self) {
        self.generation += 1;
    }

    /// Drop entries not looked up since [`MassCache::begin_generation`].
    pub fn prune(&mut self) {
        let generation = self.generation;
        let before = self.entries.len();
        self.entries.retain(|_, e| e.generation == generation);
        if self.entries.len() < before {
            log::debug!("Mass cache pruned {} stale shapes", before - self.entries.len());
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn hits(&self) -> usize {
        self.hits
    }

    pub fn misses(&self) -> usize {
        self.misses
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rect(w: f32, h: f32) -> Vec<Vec2> {
        vec![Vec2::ZERO, Vec2::new(w, 0.0), Vec2::new(w, h), Vec2::new(0.0, h)]
    }

    #[test]
    fn test_rectangle_centroid_and_inertia() {
        let props = integrate(&[rect(4.0, 2.0)], 0.05).unwrap();
        assert!(props.centroid.distance(Vec2::new(2.0, 1.0)) < 1e-3);
        assert!((props.area - 8.0).abs() < 0.05);

        // Solid rectangle: I = m (w^2 + h^2) / 12.
        let expected = 3.0 * (16.0 + 4.0) / 12.0;
        assert!((props.inertia(3.0) - expected).abs() / expected < 0.01);
    }

    #[test]
    fn test_hole_shifts_nothing_when_centered() {
        let outer = rect(4.0, 4.0);
        let hole: Vec<Vec2> = rect(2.0, 2.0).into_iter().map(|v| v + Vec2::ONE).collect();
        let props = integrate(&[outer, hole], 0.1).unwrap();
        assert!(props.centroid.distance(Vec2::splat(2.0)) < 1e-3);
        assert!((props.area - 12.0).abs() < 0.2);
    }

    #[test]
    fn test_degenerate_shape() {
        assert!(integrate(&[], 0.5).is_none());
        let line = vec![Vec2::ZERO, Vec2::X, Vec2::new(2.0, 0.0)];
        assert!(integrate(&[line], 0.5).is_none());
    }

    #[test]
    fn test_cache_hits_on_same_shape() {
        let mut cache = MassCache::new();
        let shape = vec![rect(1.0, 1.0)];
        let a = cache.get_or_integrate(&shape, 0.1);
        let b = cache.get_or_integrate(&shape, 0.1);
        assert_eq!(a, b);
        assert_eq!(cache.hits(), 1);
        assert_eq!(cache.misses(), 1);
        cache.get_or_integrate(&shape, 0.2);
        assert_eq!(cache.misses(), 2);
    }

    #[test]
    fn test_cache_distinguishes_close_shapes() {
        let mut cache = MassCache::new();
        let a = vec![rect(1.0, 1.0)];
        let b = vec![rect(1.0, 1.0 + f32::EPSILON)];
        assert_ne!(ShapeKey::new(&a, 0.1), ShapeKey::new(&b, 0.1));
        cache.get_or_integrate(&a, 0.1);
        cache.get_or_integrate(&b, 0.1);
        assert_eq!(cache.misses(), 2);
        assert_eq!(cache.hits(), 0);
    }

    #[test]
    fn test_prune_drops_unused_shapes() {
        let mut cache = MassCache::new();
        let small = vec![rect(1.0, 1.0)];
        let large = vec![rect(3.0, 2.0)];
        cache.begin_generation();
        cache.get_or_integrate(&small, 0.1);
        cache.get_or_integrate(&large, 0.1);
        cache.prune();
        assert_eq!(cache.len(), 2);

        cache.begin_generation();
        cache.get_or_integrate(&large, 0.1);
        cache.prune();
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.hits(), 1);
    }

    #[test]
    fn test_spacing_is_floored() {
        let coarse = integrate(&[rect(0.5, 0.5)], MIN_MASS_GRID_SPACING).unwrap();
        let floored = integrate(&[rect(0.5, 0.5)], 1e-6).unwrap();
        assert_eq!(coarse.sample_count, floored.sample_count);
    }
}
