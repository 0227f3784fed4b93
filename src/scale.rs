//! Bounded resizing and the coordinate transforms it implies.
//!
//! Detection runs on a page resized so that both sides are multiples of
//! [`STRIDE`]. The resize is recorded as a [`ScaleTransform`] with one ratio
//! per axis, since the rounding step makes the two ratios differ.

use image::{
    imageops::{self, FilterType},
    DynamicImage, GrayImage, ImageBuffer, Luma, Pixel,
};
use nalgebra::{Matrix3, Point2, Vector2};
use tracing::instrument;

use crate::error::{OcrError, Result};

/// Both sides of a detector input must be a multiple of this.
pub const STRIDE: u32 = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScaleMode {
    /// The shorter side is set to the target dimension.
    ShortSide,
    /// The longer side is set to the target dimension.
    #[default]
    LongSide,
}

/// Maps original page coordinates into working coordinates: a per-axis
/// resize followed by a translation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScaleTransform {
    pub width_ratio: f32,
    pub height_ratio: f32,
    pub offset_x: i32,
    pub offset_y: i32,
}

impl ScaleTransform {
    pub fn new(width_ratio: f32, height_ratio: f32) -> Self {
        Self {
            width_ratio,
            height_ratio,
            offset_x: 0,
            offset_y: 0,
        }
    }

    pub fn identity() -> Self {
        Self::new(1.0, 1.0)
    }

    /// Adds a translation applied after the resize, e.g. the offset returned
    /// by [`center_on_square_canvas`].
    pub fn with_offset(self, offset_x: i32, offset_y: i32) -> Self {
        Self {
            offset_x: self.offset_x + offset_x,
            offset_y: self.offset_y + offset_y,
            ..self
        }
    }

    fn matrix(&self) -> Matrix3<f32> {
        Matrix3::new_translation(&Vector2::new(self.offset_x as f32, self.offset_y as f32))
            * Matrix3::new_nonuniform_scaling(&Vector2::new(self.width_ratio, self.height_ratio))
    }

    /// Original space to working space.
    pub fn apply(&self, x: f32, y: f32) -> (f32, f32) {
        let point = self.matrix().transform_point(&Point2::new(x, y));
        (point.x, point.y)
    }

    /// Working space back to original space.
    pub fn invert(&self, x: f32, y: f32) -> (f32, f32) {
        let inverse = self.matrix().try_inverse().unwrap_or_else(|| {
            log::warn!("Scale transform {self:?} is not invertible, leaving points unchanged.");
            Matrix3::identity()
        });
        let point = inverse.transform_point(&Point2::new(x, y));
        (point.x, point.y)
    }
}

impl Default for ScaleTransform {
    fn default() -> Self {
        Self::identity()
    }
}

fn round_to_stride(dimension: f64) -> u32 {
    let steps = (dimension / STRIDE as f64).round() as u32;
    (steps * STRIDE).max(STRIDE)
}

/// Computes the output size of [`scale_to_bound`] without touching pixels.
pub fn bounded_dimensions(
    width: u32,
    height: u32,
    target_dimension: u32,
    mode: ScaleMode,
) -> Result<(u32, u32)> {
    if width == 0 || height == 0 {
        return Err(OcrError::InvalidImage { width, height });
    }
    let (width, height) = (width as f64, height as f64);
    let reference = match mode {
        ScaleMode::ShortSide => width.min(height),
        ScaleMode::LongSide => width.max(height),
    };
    let factor = target_dimension as f64 / reference;
    Ok((round_to_stride(width * factor), round_to_stride(height * factor)))
}

#[instrument(level = "debug", skip(image))]
pub fn scale_to_bound(
    image: &DynamicImage,
    target_dimension: u32,
    mode: ScaleMode,
) -> Result<(DynamicImage, ScaleTransform)> {
    let (width, height) = (image.width(), image.height());
    let (target_width, target_height) =
        bounded_dimensions(width, height, target_dimension, mode)?;
    let transform = ScaleTransform::new(
        target_width as f32 / width as f32,
        target_height as f32 / height as f32,
    );
    log::debug!(
        "Resizing page from (w: {width}, h: {height}) to (w: {target_width}, h: {target_height}) with ratios ({}, {}).",
        transform.width_ratio,
        transform.height_ratio
    );
    let scaled = image.resize_exact(target_width, target_height, FilterType::Triangle);
    Ok((scaled, transform))
}

/// Places `image` in the middle of a zero-filled square canvas large enough
/// to hold it under any rotation. Returns the canvas and the offset of the
/// image's origin inside it.
pub fn center_on_square_canvas<P: Pixel>(
    image: &ImageBuffer<P, Vec<P::Subpixel>>,
) -> (ImageBuffer<P, Vec<P::Subpixel>>, (u32, u32)) {
    let side = canvas_side(image.width(), image.height());
    let mut canvas = ImageBuffer::new(side, side);
    let offset = paste_centered(&mut canvas, image);
    (canvas, offset)
}

/// Same as [`center_on_square_canvas`] with an explicit background pixel.
pub fn center_on_square_canvas_with<P: Pixel>(
    image: &ImageBuffer<P, Vec<P::Subpixel>>,
    fill: P,
) -> (ImageBuffer<P, Vec<P::Subpixel>>, (u32, u32)) {
    let side = canvas_side(image.width(), image.height());
    let mut canvas = ImageBuffer::from_pixel(side, side, fill);
    let offset = paste_centered(&mut canvas, image);
    (canvas, offset)
}

fn canvas_side(width: u32, height: u32) -> u32 {
    let (width, height) = (width as f64, height as f64);
    (width * width + height * height).sqrt().ceil() as u32
}

fn paste_centered<P: Pixel>(
    canvas: &mut ImageBuffer<P, Vec<P::Subpixel>>,
    image: &ImageBuffer<P, Vec<P::Subpixel>>,
) -> (u32, u32) {
    let diff_x = (canvas.width() - image.width()) / 2;
    let diff_y = (canvas.height() - image.height()) / 2;
    imageops::replace(canvas, image, diff_x as i64, diff_y as i64);
    (diff_x, diff_y)
}

/// Most frequent pixel value, ties resolved towards the darker value.
pub fn modal_value(image: &GrayImage) -> u8 {
    let mut histogram = [0usize; 256];
    for pixel in image.pixels() {
        histogram[pixel.0[0] as usize] += 1;
    }
    histogram
        .iter()
        .enumerate()
        .rev()
        .max_by_key(|(_, count)| **count)
        .map(|(value, _)| value as u8)
        .unwrap_or_default()
}

/// Fits a line image into a fixed `width` x `height` canvas, preserving its
/// aspect ratio. The line is anchored top-left and the remainder is filled
/// with the line's modal value, so inverted scans keep their polarity.
#[instrument(level = "trace", skip(line))]
pub fn fit_to_canvas(line: &GrayImage, width: u32, height: u32) -> GrayImage {
    let background = Luma([modal_value(line)]);
    let mut canvas = GrayImage::from_pixel(width, height, background);
    let (line_width, line_height) = line.dimensions();
    if line_width == 0 || line_height == 0 || width == 0 || height == 0 {
        return canvas;
    }

    let factor = (line_width as f32 / width as f32).max(line_height as f32 / height as f32);
    let new_width = ((line_width as f32 / factor) as u32).clamp(1, width);
    let new_height = ((line_height as f32 / factor) as u32).clamp(1, height);
    let resized = imageops::resize(line, new_width, new_height, FilterType::Triangle);
    imageops::replace(&mut canvas, &resized, 0, 0);
    canvas
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dimensions_are_positive_multiples_of_stride() {
        let sizes = [(1, 1), (31, 7), (1000, 400), (2480, 3508), (17, 900), (640, 640)];
        for (width, height) in sizes {
            for target in [0, 1, 15, 100, 736, 1024, 2500] {
                for mode in [ScaleMode::ShortSide, ScaleMode::LongSide] {
                    let (w, h) = bounded_dimensions(width, height, target, mode).unwrap();
                    assert!(w >= STRIDE && w % STRIDE == 0, "{width}x{height} -> {w}");
                    assert!(h >= STRIDE && h % STRIDE == 0, "{width}x{height} -> {h}");
                }
            }
        }
    }

    #[test]
    fn short_and_long_side_modes() {
        assert_eq!(
            bounded_dimensions(1000, 400, 640, ScaleMode::ShortSide).unwrap(),
            (1600, 640)
        );
        assert_eq!(
            bounded_dimensions(1000, 400, 640, ScaleMode::LongSide).unwrap(),
            (640, 256)
        );
        assert_eq!(
            bounded_dimensions(400, 1000, 640, ScaleMode::LongSide).unwrap(),
            (256, 640)
        );
    }

    #[test]
    fn zero_target_clamps_to_stride() {
        assert_eq!(
            bounded_dimensions(100, 50, 0, ScaleMode::ShortSide).unwrap(),
            (32, 32)
        );
    }

    #[test]
    fn empty_image_is_rejected() {
        let err = bounded_dimensions(0, 10, 640, ScaleMode::ShortSide).unwrap_err();
        assert!(matches!(err, OcrError::InvalidImage { width: 0, height: 10 }));

        let image = DynamicImage::new_luma8(12, 0);
        assert!(matches!(
            scale_to_bound(&image, 640, ScaleMode::LongSide),
            Err(OcrError::InvalidImage { .. })
        ));
    }

    #[test]
    fn ratios_are_per_axis() {
        let image = DynamicImage::new_luma8(1000, 430);
        let (scaled, transform) = scale_to_bound(&image, 640, ScaleMode::ShortSide).unwrap();
        assert_eq!((scaled.width(), scaled.height()), (1504, 640));
        assert!((transform.width_ratio - 1.504).abs() < 1e-4);
        assert!((transform.height_ratio - 640.0 / 430.0).abs() < 1e-4);
        assert_ne!(transform.width_ratio, transform.height_ratio);
    }

    #[test]
    fn transform_round_trips_within_a_pixel() {
        let transform = ScaleTransform::new(1.504, 1.488_372).with_offset(12, -3);
        for (x, y) in [(0.0, 0.0), (999.0, 429.0), (517.0, 13.0), (3.0, 400.0)] {
            let (sx, sy) = transform.apply(x, y);
            let (ox, oy) = transform.invert(sx.round(), sy.round());
            assert!((ox - x).abs() <= 1.0 && (oy - y).abs() <= 1.0, "({x}, {y})");
        }
    }

    #[test]
    fn canvas_centers_the_image() {
        let mut image = GrayImage::from_pixel(30, 40, Luma([9]));
        image.put_pixel(0, 0, Luma([200]));
        let (canvas, (dx, dy)) = center_on_square_canvas(&image);
        assert_eq!(canvas.dimensions(), (50, 50));
        assert_eq!((dx, dy), (10, 5));
        assert_eq!(canvas.get_pixel(10, 5).0, [200]);
        assert_eq!(canvas.get_pixel(0, 0).0, [0]);

        let (filled, _) = center_on_square_canvas_with(&image, Luma([255]));
        assert_eq!(filled.get_pixel(0, 0).0, [255]);
        assert_eq!(filled.get_pixel(11, 6).0, [9]);
    }

    #[test]
    fn modal_value_prefers_darker_on_ties() {
        let mut image = GrayImage::from_pixel(2, 1, Luma([200]));
        image.put_pixel(1, 0, Luma([10]));
        assert_eq!(modal_value(&image), 10);
    }

    #[test]
    fn line_is_padded_with_its_background() {
        let mut line = GrayImage::from_pixel(100, 20, Luma([30]));
        for x in 10..20 {
            line.put_pixel(x, 10, Luma([250]));
        }
        let fitted = fit_to_canvas(&line, 640, 64);
        assert_eq!(fitted.dimensions(), (640, 64));
        assert_eq!(fitted.get_pixel(600, 10).0, [30]);
        assert_eq!(fitted.get_pixel(5, 5).0, [30]);
    }

    #[test]
    fn empty_canvas_is_returned_as_is() {
        let line = GrayImage::from_pixel(30, 10, Luma([200]));
        assert_eq!(fit_to_canvas(&line, 0, 64).dimensions(), (0, 64));
        assert_eq!(fit_to_canvas(&line, 640, 0).dimensions(), (640, 0));
    }
}
