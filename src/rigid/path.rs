//! Polygon paths and their flat sentinel encoding.
//!
//! A body may have several closed paths (outlines with holes, or separate
//! parts). On the wire they are concatenated into one vertex range and the
//! first vertex of every path after the first has [`PATH_FLAG_OFFSET`] added
//! to its x coordinate. Readers detect the flag with a threshold comparison
//! and subtract the offset again.
//!
//! Coordinates are snapped to a `1/128` lattice before encoding. On that
//! lattice `x + PATH_FLAG_OFFSET` is exactly representable for every
//! `|x| < 2^15`, so decoding reproduces the stored coordinate bit for bit.

use glam::Vec2;
use serde::{Deserialize, Serialize};

pub const PATH_FLAG_OFFSET: f32 = 100_000.0;
pub const PATH_FLAG_THRESHOLD: f32 = 50_000.0;

/// Spacing of the vertex coordinate lattice.
pub const VERTEX_QUANTUM: f32 = 1.0 / 128.0;

/// Edge subdivision applied after duplicate removal.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub enum Subdivision {
    #[default]
    None,
    /// Insert one midpoint on every edge.
    Fixed,
    /// Split edges in half until none is longer than `min_edge_length`.
    /// Values below 0.5 are raised to 0.5.
    Recursive { min_edge_length: f32 },
}

#[inline]
pub fn snap(v: Vec2) -> Vec2 {
    (v / VERTEX_QUANTUM).round() * VERTEX_QUANTUM
}

#[inline]
pub fn flag_path_start(x: f32) -> f32 {
    x + PATH_FLAG_OFFSET
}

#[inline]
pub fn is_path_start(x: f32) -> bool {
    x > PATH_FLAG_THRESHOLD
}

/// Strip the path flag if present.
#[inline]
pub fn unflag(x: f32) -> f32 {
    if is_path_start(x) {
        x - PATH_FLAG_OFFSET
    } else {
        x
    }
}

/// Flatten paths into one vertex list, flagging every path start after the first.
pub fn encode_paths(paths: &[Vec<Vec2>]) -> Vec<Vec2> {
    let mut flat = Vec::with_capacity(paths.iter().map(Vec::len).sum());
    for (p, path) in paths.iter().enumerate() {
        for (i, v) in path.iter().enumerate() {
            let x = if p > 0 && i == 0 { flag_path_start(v.x) } else { v.x };
            flat.push(Vec2::new(x, v.y));
        }
    }
    flat
}

/// Inverse of [`encode_paths`].
pub fn decode_paths(flat: &[Vec2]) -> Vec<Vec<Vec2>> {
    let mut paths: Vec<Vec<Vec2>> = Vec::new();
    for v in flat {
        if paths.is_empty() || is_path_start(v.x) {
            paths.push(Vec::new());
        }
        if let Some(path) = paths.last_mut() {
            path.push(Vec2::new(unflag(v.x), v.y));
        }
    }
    paths
}

/// Remove consecutive repeated points, including a closing point equal to the first.
pub fn remove_adjacent_duplicates(path: &[Vec2]) -> Vec<Vec2> {
    let mut out: Vec<Vec2> = Vec::with_capacity(path.len());
    for v in path {
        if out.last() != Some(v) {
            out.push(*v);
        }
    }
    while out.len() > 1 && out.first() == out.last() {
        out.pop();
    }
    out
}

/// Subdivide the edges of one closed path.
pub fn subdivide(path: &[Vec2], mode: Subdivision) -> Vec<Vec2> {
    match mode {
        Subdivision::None => path.to_vec(),
        Subdivision::Fixed => {
            let mut out = Vec::with_capacity(path.len() * 2);
            for (i, v) in path.iter().enumerate() {
                let next = path[(i + 1) % path.len()];
                out.push(*v);
                out.push((*v + next) * 0.5);
            }
            out
        }
        Subdivision::Recursive { min_edge_length } => {
            let min_len = min_edge_length.max(0.5);
            let mut out = path.to_vec();
            loop {
                let mut next_round = Vec::with_capacity(out.len() * 2);
                let mut split = false;
                for (i, v) in out.iter().enumerate() {
                    let next = out[(i + 1) % out.len()];
                    next_round.push(*v);
                    if v.distance(next) > min_len {
                        next_round.push((*v + next) * 0.5);
                        split = true;
                    }
                }
                out = next_round;
                if !split {
                    break out;
                }
            }
        }
    }
}

/// Even-odd point-in-polygon test over several closed paths.
pub fn contains_point(paths: &[&[Vec2]], p: Vec2) -> bool {
    let mut inside = false;
    for path in paths {
        let n = path.len();
        for i in 0..n {
            let a = path[i];
            let b = path[(i + 1) % n];
            if (a.y > p.y) != (b.y > p.y) {
                let x = a.x + (p.y - a.y) / (b.y - a.y) * (b.x - a.x);
                if p.x < x {
                    inside = !inside;
                }
            }
        }
    }
    inside
}

/// Closest point on segment `a..b` to `p`.
#[inline]
pub fn closest_on_segment(a: Vec2, b: Vec2, p: Vec2) -> Vec2 {
    let ab = b - a;
    let len_sqr = ab.length_squared();
    if len_sqr <= f32::EPSILON {
        return a;
    }
    let t = ((p - a).dot(ab) / len_sqr).clamp(0.0, 1.0);
    a + ab * t
}

/// Closest point on any edge of the paths, with the squared distance.
pub fn closest_edge_point(paths: &[&[Vec2]], p: Vec2) -> Option<(Vec2, f32)> {
    let mut best: Option<(Vec2, f32)> = None;
    for path in paths {
        let n = path.len();
        for i in 0..n {
            let q = closest_on_segment(path[i], path[(i + 1) % n], p);
            let d = q.distance_squared(p);
            if best.map_or(true, |(_, bd)| d < bd) {
                best = Some((q, d));
            }
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    fn square(size: f32) -> Vec<Vec2> {
        vec![Vec2::ZERO, Vec2::new(size, 0.0), Vec2::new(size, size), Vec2::new(0.0, size)]
    }

    #[test]
    fn test_flag_round_trip_is_exact() {
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..10_000 {
            let v = snap(Vec2::new(rng.gen_range(-1000.0..1000.0), 0.0));
            let flagged = flag_path_start(v.x);
            assert!(is_path_start(flagged));
            assert_eq!(unflag(flagged), v.x);
            assert!(!is_path_start(v.x));
            assert_eq!(unflag(v.x), v.x);
        }
    }

    #[test]
    fn test_encode_decode_paths() {
        let outer = square(4.0);
        let hole: Vec<Vec2> = square(1.0).into_iter().map(|v| v + Vec2::splat(1.5)).collect();
        let paths = vec![outer, hole];
        let flat = encode_paths(&paths);
        assert_eq!(flat.len(), 8);
        assert!(!is_path_start(flat[0].x));
        assert!(is_path_start(flat[4].x));
        assert_eq!(decode_paths(&flat), paths);
    }

    #[test]
    fn test_remove_duplicates() {
        let path = vec![Vec2::ZERO, Vec2::ZERO, Vec2::X, Vec2::ONE, Vec2::ONE, Vec2::ZERO];
        assert_eq!(remove_adjacent_duplicates(&path), vec![Vec2::ZERO, Vec2::X, Vec2::ONE]);
    }

    #[test]
    fn test_fixed_subdivision_doubles() {
        let out = subdivide(&square(2.0), Subdivision::Fixed);
        assert_eq!(out.len(), 8);
        assert_eq!(out[1], Vec2::new(1.0, 0.0));
        assert_eq!(out[7], Vec2::new(0.0, 1.0));
    }

    #[test]
    fn test_recursive_subdivision_bounds_edges() {
        let out = subdivide(&square(4.0), Subdivision::Recursive { min_edge_length: 1.0 });
        assert_eq!(out.len(), 16);
        for i in 0..out.len() {
            assert!(out[i].distance(out[(i + 1) % out.len()]) <= 1.0 + 1e-6);
        }
        // Tiny limits are raised so subdivision terminates quickly.
        let fine = subdivide(&square(1.0), Subdivision::Recursive { min_edge_length: 0.0 });
        assert_eq!(fine.len(), 8);
    }

    #[test]
    fn test_contains_point_with_hole() {
        let outer = square(4.0);
        let hole: Vec<Vec2> = square(2.0).into_iter().map(|v| v + Vec2::ONE).collect();
        let paths = [outer.as_slice(), hole.as_slice()];
        assert!(contains_point(&paths, Vec2::new(0.5, 0.5)));
        assert!(!contains_point(&paths, Vec2::new(2.0, 2.0)));
        assert!(!contains_point(&paths, Vec2::new(5.0, 2.0)));
    }

    #[test]
    fn test_closest_edge_point() {
        let sq = square(4.0);
        let (q, d) = closest_edge_point(&[sq.as_slice()], Vec2::new(1.0, 2.0)).unwrap();
        assert_eq!(q, Vec2::new(0.0, 2.0));
        assert_eq!(d, 1.0);
    }
}
