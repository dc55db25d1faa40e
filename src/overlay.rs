use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_hollow_circle_mut, BresenhamLineIter};

use crate::topology::{eye_outlines, Edge, MeshTopology};
use crate::types::{ColorOrder, FaceLandmarks, Frame, SegmentationMask};

/// Mask values above this keep the captured pixel.
pub const FOREGROUND_THRESHOLD: f32 = 0.5;

/// Solid chroma color substituted for background pixels.
pub const BACKGROUND_COLOR: [u8; 3] = [63, 237, 0];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrawingSpec {
    pub color: [u8; 3],
    pub thickness: u32,
    /// Radius of the dot drawn on each landmark; `None` draws only lines.
    pub landmark_radius: Option<i32>,
}

pub const TESSELATION_STYLE: DrawingSpec = DrawingSpec {
    color: [102, 255, 102],
    thickness: 1,
    landmark_radius: None,
};

pub const CONTOUR_STYLE: DrawingSpec = DrawingSpec {
    color: [255, 255, 255],
    thickness: 2,
    landmark_radius: None,
};

pub const IRIS_STYLE: DrawingSpec = DrawingSpec {
    color: [255, 0, 0],
    thickness: 1,
    landmark_radius: Some(1),
};

// Estimated iris radius as a fraction of eye width, for 468-point models.
const IRIS_TO_EYE_WIDTH: f32 = 0.22;

/// Frame-in, frame-out overlay passes. Holds no per-frame state.
#[derive(Debug, Clone, Default)]
pub struct OverlayCompositor;

impl OverlayCompositor {
    pub fn new() -> Self {
        Self
    }

    /// Draws tessellation, then contours, then irises, so irises stay on top.
    pub fn apply_mesh(&self, frame: Frame, face: &FaceLandmarks, topology: &MeshTopology) -> Frame {
        let order = frame.order;
        let mut image = frame.image;

        draw_connections(&mut image, order, face, &topology.tessellation, &TESSELATION_STYLE);
        draw_connections(&mut image, order, face, &topology.contours, &CONTOUR_STYLE);
        if face.len() >= crate::topology::REFINED_POINT_COUNT {
            draw_connections(&mut image, order, face, &topology.irises, &IRIS_STYLE);
        } else {
            draw_estimated_irises(&mut image, order, face, &IRIS_STYLE);
        }

        Frame::new(image, order)
    }

    /// Keeps pixels whose mask value is above the threshold and paints every
    /// other pixel with the chroma color.
    pub fn apply_background_replacement(&self, frame: Frame, mask: &SegmentationMask) -> Frame {
        let order = frame.order;
        let mut image = frame.image;
        let background = Rgb(encode(BACKGROUND_COLOR, order));
        let (mask_w, mask_h) = mask.dimensions();

        for (x, y, pixel) in image.enumerate_pixels_mut() {
            let foreground = x < mask_w && y < mask_h && mask.get(x, y) > FOREGROUND_THRESHOLD;
            if !foreground {
                *pixel = background;
            }
        }

        Frame::new(image, order)
    }
}

/// RGB color expressed in the frame's channel order.
fn encode(color: [u8; 3], order: ColorOrder) -> [u8; 3] {
    match order {
        ColorOrder::Rgb => color,
        ColorOrder::Bgr => [color[2], color[1], color[0]],
    }
}

fn draw_connections(
    image: &mut RgbImage,
    order: ColorOrder,
    face: &FaceLandmarks,
    edges: &[Edge],
    spec: &DrawingSpec,
) {
    let (width, height) = image.dimensions();
    let color = Rgb(encode(spec.color, order));

    for &(a, b) in edges {
        let (Some(pa), Some(pb)) = (face.points.get(a), face.points.get(b)) else {
            continue;
        };
        let start = pa.to_pixel(width, height);
        let end = pb.to_pixel(width, height);
        draw_thick_segment(image, start, end, spec.thickness, color);
    }

    if let Some(radius) = spec.landmark_radius {
        let mut indices: Vec<usize> = edges.iter().flat_map(|&(a, b)| [a, b]).collect();
        indices.sort_unstable();
        indices.dedup();
        for p in indices.into_iter().filter_map(|i| face.points.get(i)) {
            let (x, y) = p.to_pixel(width, height);
            draw_filled_circle_mut(image, (x as i32, y as i32), radius, color);
        }
    }
}

/// Bresenham line stamped with a square brush of side `thickness`.
fn draw_thick_segment(
    image: &mut RgbImage,
    start: (f32, f32),
    end: (f32, f32),
    thickness: u32,
    color: Rgb<u8>,
) {
    let (width, height) = (image.width() as i32, image.height() as i32);
    let thickness = thickness.max(1) as i32;
    let lo = -(thickness - 1) / 2;
    let hi = lo + thickness;

    for (x, y) in BresenhamLineIter::new(start, end) {
        for dy in lo..hi {
            for dx in lo..hi {
                let (px, py) = (x + dx, y + dy);
                if px >= 0 && py >= 0 && px < width && py < height {
                    image.put_pixel(px as u32, py as u32, color);
                }
            }
        }
    }
}

/// Ring per eye centred on the eye outline, for models without iris points.
fn draw_estimated_irises(image: &mut RgbImage, order: ColorOrder, face: &FaceLandmarks, spec: &DrawingSpec) {
    let (width, height) = image.dimensions();
    let color = Rgb(encode(spec.color, order));

    for outline in eye_outlines() {
        let points: Vec<(f32, f32)> = outline
            .iter()
            .filter_map(|&i| face.points.get(i))
            .map(|p| p.to_pixel(width, height))
            .collect();
        if points.is_empty() {
            continue;
        }

        let n = points.len() as f32;
        let cx = points.iter().map(|p| p.0).sum::<f32>() / n;
        let cy = points.iter().map(|p| p.1).sum::<f32>() / n;
        let min_x = points.iter().map(|p| p.0).fold(f32::INFINITY, f32::min);
        let max_x = points.iter().map(|p| p.0).fold(f32::NEG_INFINITY, f32::max);
        let radius = (((max_x - min_x) * IRIS_TO_EYE_WIDTH).round() as i32).max(1);

        let center = (cx.round() as i32, cy.round() as i32);
        draw_hollow_circle_mut(image, center, radius, color);
        if let Some(dot) = spec.landmark_radius {
            draw_filled_circle_mut(image, center, dot, color);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Landmark;

    fn face_with(points: &[(usize, f32, f32)], len: usize) -> FaceLandmarks {
        let mut all = vec![Landmark::new(0.0, 0.0, 0.0); len];
        for &(i, x, y) in points {
            all[i] = Landmark::new(x, y, 0.0);
        }
        FaceLandmarks::new(all)
    }

    #[test]
    fn background_replacement_keeps_only_foreground_pixels() {
        let frame = Frame::filled(4, 1, [9, 8, 7], ColorOrder::Rgb);
        let values = [0.0, 0.5, 0.51, 1.0];
        let mask = SegmentationMask::from_fn(4, 1, |x, _| values[x as usize]);

        let out = OverlayCompositor::new().apply_background_replacement(frame, &mask);

        assert_eq!(out.image.get_pixel(0, 0).0, BACKGROUND_COLOR);
        assert_eq!(out.image.get_pixel(1, 0).0, BACKGROUND_COLOR, "0.5 is not foreground");
        assert_eq!(out.image.get_pixel(2, 0).0, [9, 8, 7]);
        assert_eq!(out.image.get_pixel(3, 0).0, [9, 8, 7]);
    }

    #[test]
    fn background_color_follows_frame_channel_order() {
        let frame = Frame::filled(1, 1, [1, 1, 1], ColorOrder::Bgr);
        let mask = SegmentationMask::from_fn(1, 1, |_, _| 0.0);
        let out = OverlayCompositor::new().apply_background_replacement(frame, &mask);
        assert_eq!(out.image.get_pixel(0, 0).0, [0, 237, 63]);
    }

    #[test]
    fn contour_edges_are_drawn_in_white() {
        // Lips edge (61, 146) across the middle row.
        let face = face_with(&[(61, 0.1, 0.5), (146, 0.9, 0.5)], 468);
        let topology = MeshTopology::new(Vec::new());
        let frame = Frame::filled(100, 100, [0, 0, 0], ColorOrder::Rgb);

        let out = OverlayCompositor::new().apply_mesh(frame, &face, &topology);

        assert_eq!(out.image.get_pixel(50, 50).0, CONTOUR_STYLE.color);
        assert_eq!(out.image.get_pixel(50, 10).0, [0, 0, 0]);
    }

    #[test]
    fn iris_pass_is_drawn_over_contours_and_tessellation() {
        // Left iris edge (474, 475) and a contour edge (61, 146) and a
        // tessellation edge (0, 1) all share the same row.
        let face = face_with(
            &[
                (474, 0.2, 0.5),
                (475, 0.8, 0.5),
                (61, 0.2, 0.5),
                (146, 0.8, 0.5),
                (0, 0.2, 0.5),
                (1, 0.8, 0.5),
            ],
            478,
        );
        let topology = MeshTopology::new(vec![(0, 1)]);
        let frame = Frame::filled(100, 100, [0, 0, 0], ColorOrder::Rgb);

        let out = OverlayCompositor::new().apply_mesh(frame, &face, &topology);

        for x in 20..=80 {
            assert_eq!(out.image.get_pixel(x, 50).0, IRIS_STYLE.color, "pixel ({x}, 50)");
        }
    }

    #[test]
    fn estimated_irises_are_drawn_for_unrefined_models() {
        let mut points = Vec::new();
        for (k, &i) in eye_outlines()[0].iter().enumerate() {
            let t = k as f32 / 16.0 * std::f32::consts::TAU;
            points.push((i, 0.3 + 0.1 * t.cos(), 0.4 + 0.05 * t.sin()));
        }
        let face = face_with(&points, 468);
        let frame = Frame::filled(200, 200, [0, 0, 0], ColorOrder::Rgb);

        let out = OverlayCompositor::new().apply_mesh(frame, &face, &MeshTopology::new(Vec::new()));

        assert!(out.image.pixels().any(|p| p.0 == IRIS_STYLE.color));
    }

    #[test]
    fn edges_referencing_missing_points_are_skipped() {
        let face = face_with(&[], 10);
        let frame = Frame::filled(20, 20, [5, 5, 5], ColorOrder::Rgb);
        let topology = MeshTopology::new(vec![(0, 500)]);
        let out = OverlayCompositor::new().apply_mesh(frame.clone(), &face, &topology);
        assert_eq!(out.image.get_pixel(10, 10).0, [5, 5, 5]);
    }
}
