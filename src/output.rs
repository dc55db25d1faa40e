use anyhow::Result;
use image::RgbImage;
use minifb::{Key, Window, WindowOptions};
use tracing::info;

use crate::types::{ColorOrder, Frame};

/// Where composited frames go. Also the source of the quit signal.
pub trait DisplaySink {
    /// Channel order the sink wants frames in.
    fn color_order(&self) -> ColorOrder {
        ColorOrder::Rgb
    }

    fn show(&mut self, frame: Frame) -> Result<()>;

    /// Polled once per loop iteration, after the frame is shown.
    fn cancel_requested(&mut self) -> bool;
}

/// minifb window. Created on the first frame so its size matches the
/// scaled output.
pub struct WindowOutput {
    title: String,
    mirror: bool,
    window: Option<Window>,
    buffer: Vec<u32>,
    width: usize,
    height: usize,
}

impl WindowOutput {
    pub fn new(title: &str, mirror: bool) -> Self {
        Self {
            title: title.to_string(),
            mirror,
            window: None,
            buffer: Vec::new(),
            width: 0,
            height: 0,
        }
    }

    fn ensure_window(&mut self, width: usize, height: usize) -> Result<&mut Window> {
        if self.window.is_none() || self.width != width || self.height != height {
            let mut window = Window::new(
                &self.title,
                width,
                height,
                WindowOptions {
                    resize: true,
                    ..WindowOptions::default()
                },
            )
            .map_err(|e| anyhow::anyhow!("Failed to create window: {}", e))?;
            window.limit_update_rate(Some(std::time::Duration::from_micros(16600))); // ~60 FPS
            info!(width, height, "Window created");

            self.window = Some(window);
            self.width = width;
            self.height = height;
            self.buffer.resize(width * height, 0);
        }
        self.window
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("window missing after creation"))
    }
}

impl DisplaySink for WindowOutput {
    fn show(&mut self, frame: Frame) -> Result<()> {
        let image = prepare(frame, self.mirror);
        let (width, height) = (image.width() as usize, image.height() as usize);
        self.ensure_window(width, height)?;

        pack_rgb(image.as_raw(), &mut self.buffer);

        let (buffer, w, h) = (&self.buffer, self.width, self.height);
        let window = self
            .window
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("window not created"))?;
        window
            .update_with_buffer(buffer, w, h)
            .map_err(|e| anyhow::anyhow!("Window update failed: {}", e))
    }

    fn cancel_requested(&mut self) -> bool {
        match &self.window {
            Some(window) => !window.is_open() || window.is_key_down(Key::Escape),
            None => false,
        }
    }
}

/// RGB pixels as they should appear on screen, flipped left-right if mirrored.
fn prepare(frame: Frame, mirror: bool) -> RgbImage {
    let mut image = frame.into_order(ColorOrder::Rgb).image;
    if mirror {
        image::imageops::flip_horizontal_in_place(&mut image);
    }
    image
}

/// RGB8 bytes to minifb's 0RGB u32 pixels.
fn pack_rgb(rgb: &[u8], out: &mut Vec<u32>) {
    out.clear();
    out.extend(
        rgb.chunks_exact(3)
            .map(|c| ((c[0] as u32) << 16) | ((c[1] as u32) << 8) | c[2] as u32),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_rgb_produces_0rgb_words() {
        let mut out = vec![7; 10];
        pack_rgb(&[0x12, 0x34, 0x56, 0xff, 0x00, 0x01], &mut out);
        assert_eq!(out, vec![0x123456, 0xff0001]);
    }

    fn marked_frame(order: ColorOrder) -> Frame {
        let mut frame = Frame::filled(4, 3, [0, 0, 0], order);
        frame.image.put_pixel(0, 1, image::Rgb([10, 20, 30]));
        frame
    }

    #[test]
    fn mirrored_frames_flip_left_to_right() {
        let image = prepare(marked_frame(ColorOrder::Rgb), true);
        assert_eq!(image.get_pixel(3, 1).0, [10, 20, 30]);
        assert_eq!(image.get_pixel(0, 1).0, [0, 0, 0]);
    }

    #[test]
    fn unmirrored_frames_keep_their_layout() {
        let image = prepare(marked_frame(ColorOrder::Rgb), false);
        assert_eq!(image.get_pixel(0, 1).0, [10, 20, 30]);
        assert_eq!(image.get_pixel(3, 1).0, [0, 0, 0]);
    }

    #[test]
    fn bgr_frames_are_shown_as_rgb() {
        let image = prepare(marked_frame(ColorOrder::Bgr), true);
        assert_eq!(image.get_pixel(3, 1).0, [30, 20, 10]);
    }

    #[test]
    fn no_cancel_before_first_frame() {
        let mut sink = WindowOutput::new("test", true);
        assert!(!sink.cancel_requested());
    }
}
