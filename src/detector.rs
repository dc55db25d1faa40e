use anyhow::Result;
use image::{imageops::FilterType, RgbImage};
use ort::session::Session;
use ort::value::Tensor;

use crate::inference::load_session;
use crate::types::Rect;

const INPUT_WIDTH: u32 = 320;
const INPUT_HEIGHT: u32 = 240;
const NMS_IOU_THRESHOLD: f32 = 0.3;

/// UltraFace box detector. Only used to find regions of interest for the
/// mesh model, never exposed past the landmarker.
pub struct FaceDetector {
    session: Session,
    anchors: Vec<(f32, f32, f32, f32)>, // cx, cy, w, h
}

/// A detected face box in frame pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    pub score: f32,
    pub rect: Rect,
}

impl FaceDetector {
    pub fn new(model_path: &str, intra_threads: usize) -> Result<Self> {
        let session = load_session(model_path, intra_threads)?;
        let anchors = generate_anchors(INPUT_WIDTH as usize, INPUT_HEIGHT as usize);
        Ok(Self { session, anchors })
    }

    /// Up to `max_faces` boxes scoring at least `min_confidence`, best first.
    pub fn detect(
        &mut self,
        frame: &RgbImage,
        max_faces: usize,
        min_confidence: f32,
    ) -> Result<Vec<Detection>> {
        let resized = image::imageops::resize(frame, INPUT_WIDTH, INPUT_HEIGHT, FilterType::Triangle);

        // NCHW [1, 3, 240, 320], normalized (pixel - 127) / 128
        let plane = (INPUT_WIDTH * INPUT_HEIGHT) as usize;
        let mut input_data = vec![0.0f32; 3 * plane];
        for (i, pixel) in resized.pixels().enumerate() {
            for c in 0..3 {
                input_data[c * plane + i] = (pixel[c] as f32 - 127.0) / 128.0;
            }
        }

        let input_tensor = Tensor::from_array((
            vec![1, 3, INPUT_HEIGHT as usize, INPUT_WIDTH as usize],
            input_data,
        ))?;
        let outputs = self.session.run(ort::inputs![input_tensor])?;

        let (_scores_shape, scores_data) = outputs["scores"].try_extract_tensor::<f32>()?;
        let (_boxes_shape, boxes_data) = outputs["boxes"].try_extract_tensor::<f32>()?;

        let candidates = decode_boxes(&self.anchors, scores_data, boxes_data, min_confidence);
        let kept = non_max_suppression(candidates, NMS_IOU_THRESHOLD, max_faces);

        // Scale back to original frame
        let sx = frame.width() as f32 / INPUT_WIDTH as f32;
        let sy = frame.height() as f32 / INPUT_HEIGHT as f32;
        Ok(kept
            .into_iter()
            .map(|d| Detection {
                score: d.score,
                rect: Rect::new(d.rect.x * sx, d.rect.y * sy, d.rect.width * sx, d.rect.height * sy),
            })
            .collect())
    }
}

/// Decodes every anchor above `threshold` into a box in model input pixels.
fn decode_boxes(
    anchors: &[(f32, f32, f32, f32)],
    scores_raw: &[f32],
    boxes_raw: &[f32],
    threshold: f32,
) -> Vec<Detection> {
    // Variance for UltraFace
    let center_variance = 0.1;
    let size_variance = 0.2;

    let usable = anchors
        .len()
        .min(scores_raw.len() / 2)
        .min(boxes_raw.len() / 4);

    let mut detections = Vec::new();
    for (i, &(ax, ay, aw, ah)) in anchors.iter().enumerate().take(usable) {
        let score = scores_raw[i * 2 + 1];
        if score < threshold {
            continue;
        }

        let cx = boxes_raw[i * 4] * center_variance * aw + ax;
        let cy = boxes_raw[i * 4 + 1] * center_variance * ah + ay;
        let w = (boxes_raw[i * 4 + 2] * size_variance).exp() * aw;
        let h = (boxes_raw[i * 4 + 3] * size_variance).exp() * ah;

        detections.push(Detection {
            score,
            rect: Rect::new(
                (cx - w / 2.0) * INPUT_WIDTH as f32,
                (cy - h / 2.0) * INPUT_HEIGHT as f32,
                w * INPUT_WIDTH as f32,
                h * INPUT_HEIGHT as f32,
            ),
        });
    }
    detections
}

/// Greedy NMS, highest score first.
fn non_max_suppression(mut candidates: Vec<Detection>, iou_threshold: f32, limit: usize) -> Vec<Detection> {
    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
    let mut kept: Vec<Detection> = Vec::new();
    for candidate in candidates {
        if kept.len() >= limit {
            break;
        }
        if kept.iter().all(|k| k.rect.iou(&candidate.rect) <= iou_threshold) {
            kept.push(candidate);
        }
    }
    kept
}

fn generate_anchors(width: usize, height: usize) -> Vec<(f32, f32, f32, f32)> {
    // UltraFace configs
    let shrinkage_list = [8, 16, 32, 64];
    let min_boxes: [&[f32]; 4] = [
        &[10.0, 16.0, 24.0],
        &[32.0, 48.0],
        &[64.0, 96.0],
        &[128.0, 192.0, 256.0],
    ];
    let mut anchors = Vec::new();

    let w = width as f32;
    let h = height as f32;

    for (i, &shrinkage) in shrinkage_list.iter().enumerate() {
        let shrinkage = shrinkage as f32;
        let feature_h = (h / shrinkage).ceil() as usize;
        let feature_w = (w / shrinkage).ceil() as usize;

        for v in 0..feature_h {
            for u in 0..feature_w {
                let cx = (u as f32 * shrinkage + shrinkage / 2.0) / w;
                let cy = (v as f32 * shrinkage + shrinkage / 2.0) / h;

                for &min_box in min_boxes[i] {
                    anchors.push((cx, cy, min_box / w, min_box / h));
                }
            }
        }
    }
    anchors
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anchor_count_matches_ultraface_rfb_320() {
        assert_eq!(generate_anchors(320, 240).len(), 4420);
    }

    #[test]
    fn decode_respects_threshold() {
        let anchors = vec![(0.5, 0.5, 0.1, 0.1), (0.2, 0.2, 0.1, 0.1)];
        let scores = vec![0.1, 0.9, 0.6, 0.4];
        let boxes = vec![0.0; 8];
        let detections = decode_boxes(&anchors, &scores, &boxes, 0.5);
        assert_eq!(detections.len(), 1);
        let rect = detections[0].rect;
        assert!((rect.x + rect.width / 2.0 - 160.0).abs() < 1e-3, "center x {:?}", rect);
    }

    #[test]
    fn nms_drops_overlapping_boxes_and_respects_limit() {
        let a = Detection { score: 0.9, rect: Rect::new(0.0, 0.0, 10.0, 10.0) };
        let b = Detection { score: 0.8, rect: Rect::new(1.0, 1.0, 10.0, 10.0) };
        let c = Detection { score: 0.7, rect: Rect::new(50.0, 50.0, 10.0, 10.0) };

        let kept = non_max_suppression(vec![c, b, a], 0.3, 5);
        assert_eq!(kept, vec![a, c]);

        let kept = non_max_suppression(vec![c, b, a], 0.3, 1);
        assert_eq!(kept, vec![a]);
    }
}
