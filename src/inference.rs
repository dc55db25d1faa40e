use anyhow::{anyhow, bail, Context, Result};
use image::{imageops::FilterType, RgbImage};
use ort::session::{builder::GraphOptimizationLevel, Session};
use std::path::Path;
use tracing::{debug, info};

use crate::detector::FaceDetector;
use crate::error::PipelineError;
use crate::segmentation::ForegroundSegmenter;
use crate::types::{ColorOrder, FaceLandmarks, Frame, Landmark, Rect, SegmentationMask};

const MESH_INPUT_SIZE: u32 = 192;
const ROI_PADDING: f32 = 0.25;
const TRACK_MERGE_IOU: f32 = 0.3;

/// Opens an ONNX session with the execution providers used across the crate.
pub(crate) fn load_session(model_path: &str, intra_threads: usize) -> Result<Session> {
    if !Path::new(model_path).exists() {
        bail!("model file not found: {model_path}");
    }
    let session = Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .with_intra_threads(intra_threads)?
        .with_execution_providers([
            ort::execution_providers::CoreMLExecutionProvider::default().build(),
            ort::execution_providers::CPUExecutionProvider::default().build(),
        ])?
        .commit_from_file(model_path)
        .with_context(|| format!("Failed to load model {model_path}"))?;
    Ok(session)
}

/// A landmark model: one RGB image in, zero or more faces out.
pub trait FaceLandmarker {
    fn name(&self) -> String;

    /// Returns an empty list, not an error, when no face passes the
    /// confidence thresholds.
    fn detect_faces(&mut self, frame: &RgbImage) -> Result<Vec<FaceLandmarks>>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LandmarkerSettings {
    pub max_num_faces: usize,
    pub min_detection_confidence: f32,
    pub min_tracking_confidence: f32,
    pub intra_threads: usize,
}

impl Default for LandmarkerSettings {
    fn default() -> Self {
        Self {
            max_num_faces: 1,
            min_detection_confidence: 0.5,
            min_tracking_confidence: 0.5,
            intra_threads: 4,
        }
    }
}

/// Detector + 192x192 face mesh model.
///
/// Runs in tracking mode once a face has been found: the next frame's regions
/// of interest come from the previous landmarks. The detector is skipped only
/// while `max_num_faces` faces are tracked, and tracking needs a face-presence
/// output from the mesh model.
pub struct OnnxFaceMesh {
    mesh_session: Session,
    detector: FaceDetector,
    settings: LandmarkerSettings,
    tracked_rois: Vec<Rect>,
}

impl OnnxFaceMesh {
    pub fn new(model_path: &str, detector_path: &str, settings: LandmarkerSettings) -> Result<Self> {
        info!("Loading face detector from {detector_path}");
        let detector = FaceDetector::new(detector_path, settings.intra_threads)?;
        info!("Loading face mesh from {model_path}");
        let mesh_session = load_session(model_path, settings.intra_threads)?;
        Ok(Self {
            mesh_session,
            detector,
            settings,
            tracked_rois: Vec::new(),
        })
    }

    fn regions_of_interest(&mut self, frame: &RgbImage) -> Result<Vec<Rect>> {
        let tracked = std::mem::take(&mut self.tracked_rois);
        let max_faces = self.settings.max_num_faces;
        if !needs_detection(tracked.len(), max_faces) {
            return Ok(tracked);
        }
        let detections = self.detector.detect(
            frame,
            max_faces,
            self.settings.min_detection_confidence,
        )?;
        let detected = detections.into_iter().map(|d| d.rect).collect();
        Ok(merge_rois(tracked, detected, max_faces))
    }

    /// Runs the mesh model on one ROI, returning the face and its presence
    /// score if the model has one. `None` when the score falls below the
    /// tracking threshold.
    fn mesh_for_roi(&mut self, frame: &RgbImage, roi: Rect) -> Result<Option<(FaceLandmarks, Option<f32>)>> {
        let crop_rect = roi.padded(ROI_PADDING, frame.width(), frame.height());
        if crop_rect.width < 1.0 || crop_rect.height < 1.0 {
            return Ok(None);
        }
        let crop = image::imageops::crop_imm(
            frame,
            crop_rect.x as u32,
            crop_rect.y as u32,
            crop_rect.width as u32,
            crop_rect.height as u32,
        )
        .to_image();
        let resized = image::imageops::resize(&crop, MESH_INPUT_SIZE, MESH_INPUT_SIZE, FilterType::Triangle);

        // NHWC [1, 192, 192, 3] in [-1, 1]
        let mut input_data = Vec::with_capacity((MESH_INPUT_SIZE * MESH_INPUT_SIZE * 3) as usize);
        for pixel in resized.pixels() {
            for c in 0..3 {
                input_data.push(pixel[c] as f32 / 127.5 - 1.0);
            }
        }
        let shape = vec![1, MESH_INPUT_SIZE as usize, MESH_INPUT_SIZE as usize, 3];
        let input = ort::value::Tensor::from_array((shape, input_data))?;
        let outputs = self.mesh_session.run(ort::inputs![input])?;

        let (_shape, coords) = outputs[0].try_extract_tensor::<f32>()?;
        let presence = if outputs.len() > 1 {
            let (_shape, flag) = outputs[1].try_extract_tensor::<f32>()?;
            flag.first().map(|&logit| sigmoid(logit))
        } else {
            None
        };

        if let Some(score) = presence {
            if score < self.settings.min_tracking_confidence {
                debug!(score, "Face presence below tracking threshold");
                return Ok(None);
            }
        }

        let scale_x = crop_rect.width / MESH_INPUT_SIZE as f32;
        let scale_y = crop_rect.height / MESH_INPUT_SIZE as f32;
        let points = normalize_mesh_output(
            coords,
            (crop_rect.x, crop_rect.y),
            (scale_x, scale_y),
            frame.dimensions(),
        )?;
        Ok(Some((FaceLandmarks::new(points), presence)))
    }
}

impl FaceLandmarker for OnnxFaceMesh {
    fn name(&self) -> String {
        "Face Mesh (ONNX)".to_string()
    }

    fn detect_faces(&mut self, frame: &RgbImage) -> Result<Vec<FaceLandmarks>> {
        let rois = self.regions_of_interest(frame)?;
        let mut faces = Vec::with_capacity(rois.len());
        let mut next_rois = Vec::with_capacity(rois.len());

        for roi in rois.into_iter().take(self.settings.max_num_faces) {
            if let Some((face, presence)) = self.mesh_for_roi(frame, roi)? {
                let bounds = face.pixel_bounds(frame.width(), frame.height());
                if let Some(next) = carried_roi(presence, bounds) {
                    next_rois.push(next);
                }
                faces.push(face);
            }
        }

        self.tracked_rois = next_rois;
        Ok(faces)
    }
}

/// The detector runs whenever fewer than `max_faces` faces are tracked.
fn needs_detection(tracked: usize, max_faces: usize) -> bool {
    tracked < max_faces
}

/// Tracked ROIs first, then detected boxes that do not overlap any of them,
/// capped at `max_faces`.
fn merge_rois(tracked: Vec<Rect>, detected: Vec<Rect>, max_faces: usize) -> Vec<Rect> {
    let mut merged: Vec<Rect> = tracked.into_iter().take(max_faces).collect();
    for rect in detected {
        if merged.len() >= max_faces {
            break;
        }
        if merged.iter().all(|m| m.iou(&rect) <= TRACK_MERGE_IOU) {
            merged.push(rect);
        }
    }
    merged
}

/// ROI to track into the next frame. Without a presence score there is no
/// way to tell a lost face from a kept one, so nothing is carried and the
/// detector decides again.
fn carried_roi(presence: Option<f32>, bounds: Option<Rect>) -> Option<Rect> {
    presence.and(bounds)
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Maps raw mesh output (x, y, z triples in 192px crop space) to normalized
/// frame coordinates. Accepts 468-point and refined 478-point models.
fn normalize_mesh_output(
    raw: &[f32],
    offset: (f32, f32),
    scale: (f32, f32),
    frame_size: (u32, u32),
) -> Result<Vec<Landmark>> {
    let count = if raw.len() >= 478 * 3 {
        478
    } else if raw.len() >= 468 * 3 {
        468
    } else {
        return Err(anyhow!("mesh output has {} values, expected at least 1404", raw.len()));
    };

    let (width, height) = (frame_size.0 as f32, frame_size.1 as f32);
    let points = raw
        .chunks_exact(3)
        .take(count)
        .map(|p| {
            let x = (offset.0 + p[0] * scale.0) / width;
            let y = (offset.1 + p[1] * scale.1) / height;
            let z = p[2] * scale.0 / width;
            Landmark::new(x.clamp(0.0, 1.0), y.clamp(0.0, 1.0), z)
        })
        .collect();
    Ok(points)
}

/// The single owner of both model services. Built once at startup and
/// handed to the controller.
pub struct InferenceAdapter {
    landmarker: Box<dyn FaceLandmarker>,
    segmenter: Option<Box<dyn ForegroundSegmenter>>,
}

impl InferenceAdapter {
    pub fn new(
        landmarker: Box<dyn FaceLandmarker>,
        segmenter: Option<Box<dyn ForegroundSegmenter>>,
    ) -> Self {
        Self { landmarker, segmenter }
    }

    pub fn has_segmenter(&self) -> bool {
        self.segmenter.is_some()
    }

    pub fn describe(&self) -> String {
        match &self.segmenter {
            Some(s) => format!("{} + {}", self.landmarker.name(), s.name()),
            None => self.landmarker.name(),
        }
    }

    pub fn detect_faces(&mut self, frame: &Frame) -> Result<Vec<FaceLandmarks>, PipelineError> {
        ensure_rgb(frame)?;
        self.landmarker
            .detect_faces(&frame.image)
            .map_err(PipelineError::Inference)
    }

    /// Foreground mask with the same dimensions as `frame`.
    pub fn segment_foreground(&mut self, frame: &Frame) -> Result<SegmentationMask, PipelineError> {
        ensure_rgb(frame)?;
        let segmenter = self
            .segmenter
            .as_mut()
            .ok_or_else(|| PipelineError::Inference(anyhow!("no segmentation model loaded")))?;
        let mask = segmenter
            .segment_foreground(&frame.image)
            .map_err(PipelineError::Inference)?;
        Ok(mask.resized(frame.width(), frame.height()))
    }
}

fn ensure_rgb(frame: &Frame) -> Result<(), PipelineError> {
    if frame.order != ColorOrder::Rgb {
        return Err(PipelineError::Inference(anyhow!(
            "models expect RGB input, got {:?}",
            frame.order
        )));
    }
    Ok(())
}
