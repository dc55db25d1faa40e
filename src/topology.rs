//! Connection sets between face mesh landmark indices.

use anyhow::{Context, Result};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use crate::types::FaceLandmarks;

pub type Edge = (usize, usize);

pub const LIPS: &[Edge] = &[
    (61, 146), (146, 91), (91, 181), (181, 84), (84, 17), (17, 314), (314, 405), (405, 321),
    (321, 375), (375, 291), (61, 185), (185, 40), (40, 39), (39, 37), (37, 0), (0, 267),
    (267, 269), (269, 270), (270, 409), (409, 291), (78, 95), (95, 88), (88, 178), (178, 87),
    (87, 14), (14, 317), (317, 402), (402, 318), (318, 324), (324, 308), (78, 191), (191, 80),
    (80, 81), (81, 82), (82, 13), (13, 312), (312, 311), (311, 310), (310, 415), (415, 308),
];

pub const LEFT_EYE: &[Edge] = &[
    (263, 249), (249, 390), (390, 373), (373, 374), (374, 380), (380, 381), (381, 382),
    (382, 362), (263, 466), (466, 388), (388, 387), (387, 386), (386, 385), (385, 384),
    (384, 398), (398, 362),
];

pub const LEFT_EYEBROW: &[Edge] = &[
    (276, 283), (283, 282), (282, 295), (295, 285), (300, 293), (293, 334), (334, 296),
    (296, 336),
];

pub const RIGHT_EYE: &[Edge] = &[
    (33, 7), (7, 163), (163, 144), (144, 145), (145, 153), (153, 154), (154, 155), (155, 133),
    (33, 246), (246, 161), (161, 160), (160, 159), (159, 158), (158, 157), (157, 173),
    (173, 133),
];

pub const RIGHT_EYEBROW: &[Edge] = &[
    (46, 53), (53, 52), (52, 65), (65, 55), (70, 63), (63, 105), (105, 66), (66, 107),
];

pub const FACE_OVAL: &[Edge] = &[
    (10, 338), (338, 297), (297, 332), (332, 284), (284, 251), (251, 389), (389, 356),
    (356, 454), (454, 323), (323, 361), (361, 288), (288, 397), (397, 365), (365, 379),
    (379, 378), (378, 400), (400, 377), (377, 152), (152, 148), (148, 176), (176, 149),
    (149, 150), (150, 136), (136, 172), (172, 58), (58, 132), (132, 93), (93, 234),
    (234, 127), (127, 162), (162, 21), (21, 54), (54, 103), (103, 67), (67, 109), (109, 10),
];

pub const LEFT_IRIS: &[Edge] = &[(474, 475), (475, 476), (476, 477), (477, 474)];
pub const RIGHT_IRIS: &[Edge] = &[(469, 470), (470, 471), (471, 472), (472, 469)];

/// Number of points a model must emit for the iris edges to exist.
pub const REFINED_POINT_COUNT: usize = 478;

pub fn contours() -> Vec<Edge> {
    [LIPS, LEFT_EYE, LEFT_EYEBROW, RIGHT_EYE, RIGHT_EYEBROW, FACE_OVAL]
        .concat()
}

pub fn irises() -> Vec<Edge> {
    [LEFT_IRIS, RIGHT_IRIS].concat()
}

/// Landmark indices outlining each eye, used to estimate an iris ring for
/// models without refined iris points.
pub fn eye_outlines() -> [Vec<usize>; 2] {
    let indices = |edges: &[Edge]| -> Vec<usize> {
        edges
            .iter()
            .flat_map(|&(a, b)| [a, b])
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    };
    [indices(LEFT_EYE), indices(RIGHT_EYE)]
}

/// The three edge sets the mesh overlay draws.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeshTopology {
    pub tessellation: Vec<Edge>,
    pub contours: Vec<Edge>,
    pub irises: Vec<Edge>,
}

impl MeshTopology {
    pub fn new(tessellation: Vec<Edge>) -> Self {
        Self {
            tessellation,
            contours: contours(),
            irises: irises(),
        }
    }

    /// Tessellation read from a JSON list of `[a, b]` index pairs.
    pub fn from_tessellation_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read tessellation from {}", path.display()))?;
        let edges: Vec<Edge> = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse tessellation in {}", path.display()))?;
        Ok(Self::new(edges))
    }

    /// Tessellation derived by triangulating one reference face. Done once,
    /// so every later frame uses the same index pairs.
    pub fn from_reference_face(face: &FaceLandmarks) -> Self {
        let points: Vec<(f64, f64)> = face
            .points
            .iter()
            .map(|p| (p.x as f64, p.y as f64))
            .collect();
        Self::new(delaunay_edges(&points))
    }

    pub fn has_tessellation(&self) -> bool {
        !self.tessellation.is_empty()
    }
}

/// Unique, sorted edges of the Delaunay triangulation (Bowyer-Watson).
pub fn delaunay_edges(points: &[(f64, f64)]) -> Vec<Edge> {
    if points.len() < 3 {
        return Vec::new();
    }

    let (mut min_x, mut min_y) = (f64::INFINITY, f64::INFINITY);
    let (mut max_x, mut max_y) = (f64::NEG_INFINITY, f64::NEG_INFINITY);
    for &(x, y) in points {
        min_x = min_x.min(x);
        min_y = min_y.min(y);
        max_x = max_x.max(x);
        max_y = max_y.max(y);
    }
    let span = (max_x - min_x).max(max_y - min_y).max(1e-9);
    let (mid_x, mid_y) = ((min_x + max_x) / 2.0, (min_y + max_y) / 2.0);

    let n = points.len();
    let mut vertices = points.to_vec();
    vertices.push((mid_x - 100.0 * span, mid_y - 100.0 * span));
    vertices.push((mid_x + 100.0 * span, mid_y - 100.0 * span));
    vertices.push((mid_x, mid_y + 100.0 * span));

    let mut triangles: Vec<[usize; 3]> = vec![ccw(&vertices, [n, n + 1, n + 2])];

    for i in 0..n {
        let p = vertices[i];
        let (bad, good): (Vec<[usize; 3]>, Vec<[usize; 3]>) = triangles
            .into_iter()
            .partition(|t| in_circumcircle(&vertices, *t, p));
        triangles = good;

        // Boundary of the cavity: edges used by exactly one bad triangle.
        let mut boundary: Vec<Edge> = Vec::new();
        for t in &bad {
            for e in [(t[0], t[1]), (t[1], t[2]), (t[2], t[0])] {
                let shared = bad
                    .iter()
                    .filter(|o| *o != t)
                    .any(|o| has_edge(o, e));
                if !shared {
                    boundary.push(e);
                }
            }
        }
        for (a, b) in boundary {
            triangles.push(ccw(&vertices, [a, b, i]));
        }
    }

    let mut edges = BTreeSet::new();
    for t in triangles.iter().filter(|t| t.iter().all(|&v| v < n)) {
        for (a, b) in [(t[0], t[1]), (t[1], t[2]), (t[2], t[0])] {
            edges.insert((a.min(b), a.max(b)));
        }
    }
    edges.into_iter().collect()
}

fn orient(v: &[(f64, f64)], a: usize, b: usize, c: usize) -> f64 {
    let (ax, ay) = v[a];
    let (bx, by) = v[b];
    let (cx, cy) = v[c];
    (bx - ax) * (cy - ay) - (by - ay) * (cx - ax)
}

fn ccw(v: &[(f64, f64)], t: [usize; 3]) -> [usize; 3] {
    if orient(v, t[0], t[1], t[2]) < 0.0 {
        [t[0], t[2], t[1]]
    } else {
        t
    }
}

fn has_edge(t: &[usize; 3], (a, b): Edge) -> bool {
    t.contains(&a) && t.contains(&b)
}

fn in_circumcircle(v: &[(f64, f64)], t: [usize; 3], p: (f64, f64)) -> bool {
    let (ax, ay) = (v[t[0]].0 - p.0, v[t[0]].1 - p.1);
    let (bx, by) = (v[t[1]].0 - p.0, v[t[1]].1 - p.1);
    let (cx, cy) = (v[t[2]].0 - p.0, v[t[2]].1 - p.1);
    let det = (ax * ax + ay * ay) * (bx * cy - cx * by)
        - (bx * bx + by * by) * (ax * cy - cx * ay)
        + (cx * cx + cy * cy) * (ax * by - bx * ay);
    det > 0.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Landmark;

    #[test]
    fn triangle_has_three_edges() {
        let edges = delaunay_edges(&[(0.0, 0.0), (1.0, 0.0), (0.0, 1.0)]);
        assert_eq!(edges, vec![(0, 1), (0, 2), (1, 2)]);
    }

    #[test]
    fn square_with_center_connects_center_to_every_corner() {
        let points = [(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0), (0.5, 0.5)];
        let edges = delaunay_edges(&points);
        assert_eq!(edges.len(), 8, "edges: {:?}", edges);
        for corner in 0..4 {
            assert!(edges.contains(&(corner, 4)), "missing spoke to corner {corner}");
        }
        assert!(!edges.contains(&(0, 2)) && !edges.contains(&(1, 3)));
    }

    #[test]
    fn degenerate_inputs_yield_no_edges() {
        assert!(delaunay_edges(&[]).is_empty());
        assert!(delaunay_edges(&[(0.0, 0.0), (1.0, 1.0)]).is_empty());
    }

    #[test]
    fn reference_face_topology_is_deterministic() {
        let face = FaceLandmarks::new(
            (0..60)
                .map(|i| {
                    let r = ((i as f32 + 0.5) / 60.0).sqrt() * 0.3;
                    let theta = i as f32 * 2.399_963;
                    Landmark::new(0.5 + r * theta.cos(), 0.5 + r * theta.sin(), 0.0)
                })
                .collect(),
        );
        let a = MeshTopology::from_reference_face(&face);
        let b = MeshTopology::from_reference_face(&face);
        assert!(a.has_tessellation());
        assert_eq!(a, b);
        // A planar triangulation of n points has at most 3n - 6 edges.
        assert!(a.tessellation.len() <= 3 * 60 - 6);
    }

    #[test]
    fn fixed_tables_reference_known_indices() {
        assert_eq!(irises().len(), 8);
        assert!(irises().iter().all(|&(a, b)| a < REFINED_POINT_COUNT && b < REFINED_POINT_COUNT));
        assert!(contours().iter().all(|&(a, b)| a < 468 && b < 468));
        let [left, right] = eye_outlines();
        assert_eq!(left.len(), 16);
        assert_eq!(right.len(), 16);
    }

    #[test]
    fn tessellation_file_round_trips_edges() {
        let path = std::env::temp_dir().join(format!("tessellation-{}.json", std::process::id()));
        fs::write(&path, "[[0, 1], [1, 2]]").unwrap();
        let topology = MeshTopology::from_tessellation_file(&path).unwrap();
        fs::remove_file(&path).ok();
        assert_eq!(topology.tessellation, vec![(0, 1), (1, 2)]);
        assert_eq!(topology.contours, contours());
    }
}
