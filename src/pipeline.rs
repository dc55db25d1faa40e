use image::imageops::FilterType;
use tracing::{debug, info, warn};

use crate::camera::FrameSource;
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::inference::InferenceAdapter;
use crate::landmarks::LandmarkSnapshot;
use crate::output::DisplaySink;
use crate::overlay::OverlayCompositor;
use crate::topology::MeshTopology;
use crate::types::{ColorOrder, FaceLandmarks, Frame, Landmark};

const STATS_EVERY_FRAMES: u64 = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Running,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TickOutcome {
    Continue,
    Stop,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub frames_processed: u64,
    pub faces_seen: u64,
    pub capture_failures: u64,
}

/// Largest output side `resize` will produce.
pub const MAX_FRAME_SIDE: u32 = 16384;

/// Output size for scale factors `fx`, `fy`, clamped to 1..=`MAX_FRAME_SIDE`
/// per axis.
pub fn scaled_dimensions(width: u32, height: u32, fx: f64, fy: f64) -> (u32, u32) {
    let side = |len: u32, f: f64| (len as f64 * f).round().clamp(1.0, MAX_FRAME_SIDE as f64) as u32;
    (side(width, fx), side(height, fy))
}

/// Scales a frame by (`fx`, `fy`). Unchanged dimensions return the frame as is.
pub fn resize(frame: Frame, fx: f64, fy: f64) -> Frame {
    let (width, height) = frame.dimensions();
    let (new_w, new_h) = scaled_dimensions(width, height, fx, fy);
    if (new_w, new_h) == (width, height) {
        return frame;
    }
    // Bilinear. image has no pixel-area filter.
    let image = image::imageops::resize(&frame.image, new_w, new_h, FilterType::Triangle);
    Frame::new(image, frame.order)
}

/// Capture, infer, composite, display, repeat until the sink asks to quit.
///
/// `Idle -> Running` once the source opens, `Running -> Stopped` on the quit
/// signal or a fatal error. A stopped controller cannot be restarted.
pub struct PipelineController<S: FrameSource, D: DisplaySink> {
    config: PipelineConfig,
    source: S,
    inference: InferenceAdapter,
    compositor: OverlayCompositor,
    sink: D,
    topology: Option<MeshTopology>,
    state: PipelineState,
    snapshot: LandmarkSnapshot,
    stats: LoopStats,
}

impl<S: FrameSource, D: DisplaySink> PipelineController<S, D> {
    pub fn new(config: PipelineConfig, source: S, inference: InferenceAdapter, sink: D) -> Result<Self> {
        if config.segmentation_enabled() && !inference.has_segmenter() {
            return Err(PipelineError::InvalidConfig(
                "segmentation is enabled but no segmentation model was provided".to_string(),
            ));
        }
        Ok(Self {
            config,
            source,
            inference,
            compositor: OverlayCompositor::new(),
            sink,
            topology: None,
            state: PipelineState::Idle,
            snapshot: LandmarkSnapshot::new(),
            stats: LoopStats::default(),
        })
    }

    /// Use a fixed mesh topology instead of deriving one from the first face.
    pub fn with_topology(mut self, topology: MeshTopology) -> Self {
        self.topology = Some(topology);
        self
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn stats(&self) -> LoopStats {
        self.stats
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn sink(&self) -> &D {
        &self.sink
    }

    /// Handle to the live snapshot, readable from other threads.
    pub fn snapshot(&self) -> LandmarkSnapshot {
        self.snapshot.clone()
    }

    pub fn get_landmarks_list(&self) -> Vec<Landmark> {
        self.snapshot.get_landmarks_list()
    }

    /// Runs the loop to completion. The source is released exactly once
    /// whether the loop ends on the quit signal or on a fatal error.
    pub fn run(&mut self) -> Result<()> {
        if self.state == PipelineState::Stopped {
            return Err(PipelineError::AlreadyStopped);
        }

        self.source.open()?;
        self.state = PipelineState::Running;
        info!(
            models = %self.inference.describe(),
            fx = self.config.fx(),
            fy = self.config.fy(),
            meshing = self.config.meshing_enabled(),
            segmentation = self.config.segmentation_enabled(),
            "Pipeline running"
        );

        let result = loop {
            match self.tick() {
                Ok(TickOutcome::Continue) => continue,
                Ok(TickOutcome::Stop) => break Ok(()),
                Err(e) => break Err(e),
            }
        };

        self.source.close();
        self.state = PipelineState::Stopped;

        match &result {
            Ok(()) => info!(frames = self.stats.frames_processed, "Pipeline stopped"),
            Err(e) => warn!(frames = self.stats.frames_processed, "Pipeline stopped on error: {e}"),
        }
        result
    }

    /// One loop iteration. The quit signal is only checked here, between frames.
    fn tick(&mut self) -> Result<TickOutcome> {
        match self.source.read_frame() {
            Ok(frame) => {
                let (frame, faces) = self.process_frame(frame)?;
                let frame = frame.into_order(self.sink.color_order());
                self.sink.show(frame).map_err(PipelineError::Display)?;

                self.stats.frames_processed += 1;
                self.stats.faces_seen += faces.len() as u64;
                self.snapshot.store(faces);

                if self.stats.frames_processed % STATS_EVERY_FRAMES == 0 {
                    debug!(
                        frames = self.stats.frames_processed,
                        faces = self.stats.faces_seen,
                        capture_failures = self.stats.capture_failures,
                        "Pipeline throughput"
                    );
                }
            }
            Err(e) if e.is_recoverable() => {
                self.stats.capture_failures += 1;
                warn!(failures = self.stats.capture_failures, "Skipping frame: {e:#}");
            }
            Err(e) => return Err(e),
        }

        if self.sink.cancel_requested() {
            info!("Quit signal received");
            return Ok(TickOutcome::Stop);
        }
        Ok(TickOutcome::Continue)
    }

    /// Resize, convert to RGB, detect, then composite. The mask is taken
    /// from the frame before any mesh is drawn on it.
    fn process_frame(&mut self, frame: Frame) -> Result<(Frame, Vec<FaceLandmarks>)> {
        let frame = resize(frame, self.config.fx(), self.config.fy()).into_order(ColorOrder::Rgb);

        let faces = self.inference.detect_faces(&frame)?;
        if faces.is_empty() {
            return Ok((frame, faces));
        }

        let mask = if self.config.segmentation_enabled() {
            Some(self.inference.segment_foreground(&frame)?)
        } else {
            None
        };

        let mut frame = frame;
        if self.config.meshing_enabled() {
            if self.topology.is_none() {
                let topology = MeshTopology::from_reference_face(&faces[0]);
                info!(
                    edges = topology.tessellation.len(),
                    "Derived tessellation from first detected face"
                );
                self.topology = Some(topology);
            }
            if let Some(topology) = &self.topology {
                for face in &faces {
                    frame = self.compositor.apply_mesh(frame, face, topology);
                }
            }
        }

        if let Some(mask) = mask {
            frame = self.compositor.apply_background_replacement(frame, &mask);
        }

        Ok((frame, faces))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_scale_is_identity_on_dimensions() {
        let frame = Frame::filled(640, 480, [1, 2, 3], ColorOrder::Rgb);
        let out = resize(frame.clone(), 1.0, 1.0);
        assert_eq!(out, frame);
    }

    #[test]
    fn scale_factors_apply_per_axis() {
        assert_eq!(scaled_dimensions(640, 480, 1.2, 1.2), (768, 576));
        assert_eq!(scaled_dimensions(640, 480, 0.5, 2.0), (320, 960));
        assert_eq!(scaled_dimensions(3, 3, 0.01, 0.01), (1, 1));
        assert_eq!(scaled_dimensions(640, 480, 1e9, 1e9), (MAX_FRAME_SIDE, MAX_FRAME_SIDE));

        let out = resize(Frame::filled(10, 10, [0, 0, 0], ColorOrder::Bgr), 2.0, 0.5);
        assert_eq!(out.dimensions(), (20, 5));
        assert_eq!(out.order, ColorOrder::Bgr);
    }
}
