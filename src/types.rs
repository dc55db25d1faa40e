use image::{ImageBuffer, Luma, Rgb, RgbImage};
use serde::{Deserialize, Serialize};

/// Channel order of the three bytes stored per pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorOrder {
    Rgb,
    Bgr,
}

/// An owned 8-bit, three channel frame.
///
/// The pixel buffer is always an `RgbImage`; `order` says how the three
/// bytes should be interpreted. Stages take a `Frame` by value and hand a
/// `Frame` back, so no two stages ever see the same buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub image: RgbImage,
    pub order: ColorOrder,
}

impl Frame {
    pub fn new(image: RgbImage, order: ColorOrder) -> Self {
        Self { image, order }
    }

    /// Solid frame, mostly useful for tests and placeholders.
    pub fn filled(width: u32, height: u32, pixel: [u8; 3], order: ColorOrder) -> Self {
        Self::new(ImageBuffer::from_pixel(width, height, Rgb(pixel)), order)
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    /// Converts the frame to `order`, swapping the first and third channel
    /// in place when the encodings differ.
    pub fn into_order(mut self, order: ColorOrder) -> Self {
        if self.order != order {
            for pixel in self.image.pixels_mut() {
                pixel.0.swap(0, 2);
            }
            self.order = order;
        }
        self
    }
}

/// One normalized facial landmark. `x` and `y` are fractions of the frame
/// width and height, `z` is relative depth on roughly the same scale as `x`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Landmark {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// Pixel position of the landmark on a `width` x `height` frame.
    pub fn to_pixel(&self, width: u32, height: u32) -> (f32, f32) {
        (self.x * width as f32, self.y * height as f32)
    }
}

/// Landmarks of a single face, in the model's fixed point order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FaceLandmarks {
    pub points: Vec<Landmark>,
}

impl FaceLandmarks {
    pub fn new(points: Vec<Landmark>) -> Self {
        Self { points }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Pixel-space bounding box of all points on a `width` x `height` frame.
    pub fn pixel_bounds(&self, width: u32, height: u32) -> Option<Rect> {
        let mut iter = self.points.iter().map(|p| p.to_pixel(width, height));
        let (x0, y0) = iter.next()?;
        let (mut min_x, mut min_y, mut max_x, mut max_y) = (x0, y0, x0, y0);
        for (x, y) in iter {
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);
        }
        Some(Rect::new(min_x, min_y, max_x - min_x, max_y - min_y))
    }
}

/// Per-pixel foreground probability in `[0, 1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentationMask {
    pub probabilities: ImageBuffer<Luma<f32>, Vec<f32>>,
}

impl SegmentationMask {
    pub fn new(probabilities: ImageBuffer<Luma<f32>, Vec<f32>>) -> Self {
        Self { probabilities }
    }

    pub fn from_fn(width: u32, height: u32, f: impl Fn(u32, u32) -> f32) -> Self {
        Self::new(ImageBuffer::from_fn(width, height, |x, y| Luma([f(x, y)])))
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.probabilities.dimensions()
    }

    pub fn get(&self, x: u32, y: u32) -> f32 {
        self.probabilities.get_pixel(x, y)[0]
    }

    /// Mask resampled to `width` x `height` with bilinear filtering.
    pub fn resized(&self, width: u32, height: u32) -> Self {
        if self.dimensions() == (width, height) {
            return self.clone();
        }
        let probabilities = image::imageops::resize(
            &self.probabilities,
            width,
            height,
            image::imageops::FilterType::Triangle,
        );
        Self { probabilities }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self { x, y, width, height }
    }

    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    pub fn iou(&self, other: &Rect) -> f32 {
        let left = self.x.max(other.x);
        let top = self.y.max(other.y);
        let right = (self.x + self.width).min(other.x + other.width);
        let bottom = (self.y + self.height).min(other.y + other.height);
        let inter = (right - left).max(0.0) * (bottom - top).max(0.0);
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }

    /// Rect grown by `fraction` of its size (split evenly on both sides) and
    /// clipped to a `width` x `height` frame.
    pub fn padded(&self, fraction: f32, width: u32, height: u32) -> Rect {
        let pad_w = self.width * fraction;
        let pad_h = self.height * fraction;
        let x = (self.x - pad_w / 2.0).max(0.0);
        let y = (self.y - pad_h / 2.0).max(0.0);
        let w = (self.width + pad_w).min(width as f32 - x);
        let h = (self.height + pad_h).min(height as f32 - y);
        Rect::new(x, y, w.max(0.0), h.max(0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn color_conversion_is_symmetric() {
        let mut image = RgbImage::new(2, 1);
        image.put_pixel(0, 0, Rgb([10, 20, 30]));
        image.put_pixel(1, 0, Rgb([200, 100, 0]));
        let original = Frame::new(image, ColorOrder::Bgr);

        let rgb = original.clone().into_order(ColorOrder::Rgb);
        assert_eq!(rgb.image.get_pixel(0, 0), &Rgb([30, 20, 10]));
        assert_eq!(rgb.order, ColorOrder::Rgb);

        let back = rgb.into_order(ColorOrder::Bgr);
        assert_eq!(back, original);
    }

    #[test]
    fn same_order_conversion_leaves_pixels_alone() {
        let frame = Frame::filled(3, 3, [1, 2, 3], ColorOrder::Rgb);
        let converted = frame.clone().into_order(ColorOrder::Rgb);
        assert_eq!(converted, frame);
    }

    #[test]
    fn iou_of_identical_and_disjoint_rects() {
        let a = Rect::new(0.0, 0.0, 10.0, 10.0);
        let b = Rect::new(20.0, 20.0, 5.0, 5.0);
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);
        assert_eq!(a.iou(&b), 0.0);
    }

    #[test]
    fn padded_rect_stays_inside_frame() {
        let r = Rect::new(0.0, 0.0, 100.0, 100.0).padded(0.25, 110, 110);
        assert_eq!(r.x, 0.0);
        assert_eq!(r.y, 0.0);
        assert!(r.width <= 110.0 && r.height <= 110.0);
    }

    #[test]
    fn mask_resize_matches_requested_dimensions() {
        let mask = SegmentationMask::from_fn(4, 2, |_, _| 1.0);
        let resized = mask.resized(8, 6);
        assert_eq!(resized.dimensions(), (8, 6));
        assert!((resized.get(3, 3) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn pixel_bounds_cover_all_points() {
        let face = FaceLandmarks::new(vec![
            Landmark::new(0.25, 0.5, 0.0),
            Landmark::new(0.75, 0.25, 0.0),
        ]);
        let bounds = face.pixel_bounds(100, 100).expect("non-empty face");
        assert_eq!(bounds, Rect::new(25.0, 25.0, 50.0, 25.0));
        assert!(FaceLandmarks::default().pixel_bounds(100, 100).is_none());
    }
}
