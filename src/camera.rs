use anyhow::{anyhow, Context};
use nokhwa::{
    pixel_format::RgbFormat,
    utils::{ApiBackend, CameraIndex, CameraInfo, RequestedFormat, RequestedFormatType},
    Camera,
};
use tracing::{debug, info, warn};

use crate::error::{PipelineError, Result};
use crate::types::{ColorOrder, Frame};

/// Something that produces frames. Owns the device for its whole
/// open/close lifecycle.
pub trait FrameSource {
    /// Acquires the device. Fails with `DeviceUnavailable` if nothing answers.
    fn open(&mut self) -> Result<()>;

    /// Reads one frame. Failures are reported as `PipelineError::Capture`.
    fn read_frame(&mut self) -> Result<Frame>;

    /// Releases the device. Calling it again, or before `open`, is a no-op.
    fn close(&mut self);
}

pub struct CameraSource {
    index: u32,
    camera: Option<Camera>,
}

impl CameraSource {
    pub fn new(index: u32) -> Self {
        Self {
            index,
            camera: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.camera.is_some()
    }

    pub fn name(&self) -> Option<String> {
        self.camera.as_ref().map(|c| c.info().human_name())
    }
}

impl FrameSource for CameraSource {
    fn open(&mut self) -> Result<()> {
        if self.camera.is_some() {
            return Ok(());
        }

        let index = self.index;
        let unavailable = |source: anyhow::Error| PipelineError::DeviceUnavailable { index, source };

        let requested =
            RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestFrameRate);
        let mut camera = Camera::new(CameraIndex::Index(index), requested)
            .map_err(|e| anyhow!(e))
            .context("Failed to create camera instance")
            .map_err(unavailable)?;

        camera
            .open_stream()
            .map_err(|e| anyhow!(e))
            .context("Failed to open camera stream")
            .map_err(unavailable)?;

        info!(
            camera = %camera.info().human_name(),
            format = %camera.camera_format(),
            "Opened camera"
        );

        self.camera = Some(camera);
        Ok(())
    }

    fn read_frame(&mut self) -> Result<Frame> {
        let camera = self
            .camera
            .as_mut()
            .ok_or_else(|| PipelineError::Capture(anyhow!("camera is not open")))?;

        let buffer = camera
            .frame()
            .map_err(|e| anyhow!(e))
            .context("Failed to get frame")
            .map_err(PipelineError::Capture)?;
        let decoded = buffer
            .decode_image::<RgbFormat>()
            .map_err(|e| anyhow!(e))
            .context("Failed to decode frame")
            .map_err(PipelineError::Capture)?;

        Ok(Frame::new(decoded, ColorOrder::Rgb))
    }

    fn close(&mut self) {
        if let Some(mut camera) = self.camera.take() {
            if let Err(e) = camera.stop_stream() {
                warn!("Failed to stop camera stream cleanly: {e}");
            }
            info!(index = self.index, "Released camera");
        } else {
            debug!(index = self.index, "Camera already released");
        }
    }
}

impl Drop for CameraSource {
    fn drop(&mut self) {
        self.close();
    }
}

/// Cameras visible to the native backend.
pub fn list_cameras() -> anyhow::Result<Vec<CameraInfo>> {
    nokhwa::query(ApiBackend::Auto).map_err(|e| anyhow!(e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unopened_camera_reports_capture_error() {
        let mut source = CameraSource::new(7);
        assert!(!source.is_open());
        match source.read_frame() {
            Err(PipelineError::Capture(_)) => {}
            other => panic!("expected capture error, got {:?}", other.map(|f| f.dimensions())),
        }
    }

    #[test]
    fn close_is_idempotent_without_device() {
        let mut source = CameraSource::new(0);
        source.close();
        source.close();
        assert!(source.name().is_none());
    }
}
