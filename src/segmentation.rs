use anyhow::{anyhow, Result};
use image::{imageops::FilterType, ImageBuffer, Luma, RgbImage};
use ort::session::Session;
use tracing::info;

use crate::inference::load_session;
use crate::types::SegmentationMask;

// Selfie segmentation, landscape variant.
const INPUT_WIDTH: u32 = 256;
const INPUT_HEIGHT: u32 = 144;

/// A person-segmentation model: one RGB image in, foreground probabilities out.
pub trait ForegroundSegmenter {
    fn name(&self) -> String;

    /// The mask may come back at model resolution; the inference adapter
    /// resizes it to the frame.
    fn segment_foreground(&mut self, frame: &RgbImage) -> Result<SegmentationMask>;
}

pub struct OnnxSelfieSegmenter {
    session: Session,
}

impl OnnxSelfieSegmenter {
    pub fn new(model_path: &str, intra_threads: usize) -> Result<Self> {
        info!("Loading selfie segmentation from {model_path}");
        let session = load_session(model_path, intra_threads)?;
        Ok(Self { session })
    }
}

impl ForegroundSegmenter for OnnxSelfieSegmenter {
    fn name(&self) -> String {
        "Selfie Segmentation (ONNX)".to_string()
    }

    fn segment_foreground(&mut self, frame: &RgbImage) -> Result<SegmentationMask> {
        let resized = image::imageops::resize(frame, INPUT_WIDTH, INPUT_HEIGHT, FilterType::Triangle);

        // NHWC [1, 144, 256, 3] in [0, 1]
        let mut input_data = Vec::with_capacity((INPUT_WIDTH * INPUT_HEIGHT * 3) as usize);
        for pixel in resized.pixels() {
            for c in 0..3 {
                input_data.push(pixel[c] as f32 / 255.0);
            }
        }
        let shape = vec![1, INPUT_HEIGHT as usize, INPUT_WIDTH as usize, 3];
        let input = ort::value::Tensor::from_array((shape, input_data))?;
        let outputs = self.session.run(ort::inputs![input])?;
        let (_shape, data) = outputs[0].try_extract_tensor::<f32>()?;

        let mask = mask_from_model_output(data, INPUT_WIDTH, INPUT_HEIGHT)?;
        Ok(mask.resized(frame.width(), frame.height()))
    }
}

/// Wraps a row-major probability grid, clamping values into `[0, 1]`.
fn mask_from_model_output(data: &[f32], width: u32, height: u32) -> Result<SegmentationMask> {
    let expected = (width * height) as usize;
    if data.len() < expected {
        return Err(anyhow!(
            "segmentation output has {} values, expected {expected}",
            data.len()
        ));
    }
    let values: Vec<f32> = data[..expected].iter().map(|v| v.clamp(0.0, 1.0)).collect();
    let buffer = ImageBuffer::<Luma<f32>, Vec<f32>>::from_raw(width, height, values)
        .ok_or_else(|| anyhow!("segmentation buffer size mismatch"))?;
    Ok(SegmentationMask::new(buffer))
}
