//! Cropping, batching and decoding of text lines.

use geo::{Coord, MapCoords, Polygon};
use image::{imageops, GrayImage, Luma};
use imageproc::geometric_transformations::{warp_into, Interpolation, Projection};
use ndarray::Array4;
use rayon::prelude::*;
use tracing::instrument;

use crate::{
    codec::TextCodec,
    crnn_net::Transcriber,
    error::{OcrError, Result},
    scale::{center_on_square_canvas_with, fit_to_canvas, modal_value, ScaleTransform},
    util::rotated_rect,
    BoundingBox, LineRegion, Transcription, TranscriptionOptions,
};

pub struct TranscriptionCoordinator<T> {
    transcriber: T,
    codec: TextCodec,
    options: TranscriptionOptions,
}

impl<T: Transcriber> TranscriptionCoordinator<T> {
    pub fn new(transcriber: T, codec: TextCodec, options: TranscriptionOptions) -> Self {
        Self {
            transcriber,
            codec,
            options,
        }
    }

    pub fn codec(&self) -> &TextCodec {
        &self.codec
    }

    pub fn options(&self) -> &TranscriptionOptions {
        &self.options
    }

    /// Transcribes every region of `page`, in the order given.
    ///
    /// Lines that cannot be cropped are reported in place and do not affect
    /// the others. The outer error is reserved for failures of the model
    /// itself.
    #[instrument(level = "debug", skip_all, fields(lines = regions.len()))]
    pub fn transcribe(
        &self,
        page: &GrayImage,
        regions: &[LineRegion],
    ) -> Result<Vec<Result<Transcription>>> {
        if regions.is_empty() {
            return Ok(Vec::new());
        }
        let TranscriptionOptions {
            input_width,
            input_height,
            batch_size,
        } = self.options;

        let canvas = regions
            .iter()
            .any(|it| matches!(it, LineRegion::Polygon(_)))
            .then(|| PageCanvas::new(page));
        let lines = regions
            .par_iter()
            .map(|region| {
                let line = crop_line(page, canvas.as_ref(), region)?;
                Ok(fit_to_canvas(&line, input_width, input_height))
            })
            .collect::<Vec<Result<GrayImage>>>();

        #[cfg(feature = "debug")]
        for (i, line) in lines.iter().enumerate() {
            if let Ok(line) = line {
                if let Err(err) = line.save(format!("line_images/{i}.png")) {
                    log::warn!("Failed to save line image {i}: {err}");
                }
            }
        }

        let mut outcomes = Vec::with_capacity(lines.len());
        let mut ready = Vec::with_capacity(lines.len());
        for (index, line) in lines.into_iter().enumerate() {
            match line {
                Ok(line) => {
                    ready.push((index, line));
                    outcomes.push(None);
                }
                Err(err) => {
                    log::debug!("Line {index} could not be cropped: {err}");
                    outcomes.push(Some(Err(err)));
                }
            }
        }

        for chunk in ready.chunks(batch_size.max(1)) {
            let batch = to_batch_tensor(chunk, input_width, input_height);
            log::debug!("Transcribing batch of {} lines", chunk.len());
            let paths = self.transcriber.predict_batch(batch.view())?;
            if paths.len() != chunk.len() {
                return Err(OcrError::InvalidModelOutput(format!(
                    "expected {} transcriptions, got {}",
                    chunk.len(),
                    paths.len()
                )));
            }
            for ((index, _), path) in chunk.iter().zip(paths) {
                outcomes[*index] = Some(Ok(Transcription {
                    text: self.codec.decode(&path.indices),
                    probability: path.log_probability.exp(),
                }));
            }
        }

        Ok(outcomes
            .into_iter()
            .map(|it| {
                it.unwrap_or_else(|| {
                    Err(OcrError::InvalidModelOutput("line was not transcribed".into()))
                })
            })
            .collect())
    }
}

/// The page centered on a square canvas filled with its background, so any
/// rotation about a point of the page keeps all of its pixels.
pub(crate) struct PageCanvas {
    image: GrayImage,
    background: Luma<u8>,
    to_canvas: ScaleTransform,
}

impl PageCanvas {
    pub(crate) fn new(page: &GrayImage) -> Self {
        let background = Luma([modal_value(page)]);
        let (image, (diff_x, diff_y)) = center_on_square_canvas_with(page, background);
        Self {
            image,
            background,
            to_canvas: ScaleTransform::identity().with_offset(diff_x as i32, diff_y as i32),
        }
    }
}

fn crop_line(page: &GrayImage, canvas: Option<&PageCanvas>, region: &LineRegion) -> Result<GrayImage> {
    match (region, canvas) {
        (LineRegion::Box(bounds), _) => crop_box(page, bounds),
        (LineRegion::Polygon(polygon), Some(canvas)) => crop_polygon(canvas, polygon),
        (LineRegion::Polygon(polygon), None) => crop_polygon(&PageCanvas::new(page), polygon),
    }
}

/// Axis-aligned crop, clamped to the page.
#[instrument(level = "trace", skip(page))]
pub(crate) fn crop_box(page: &GrayImage, bounds: &BoundingBox) -> Result<GrayImage> {
    let (page_width, page_height) = page.dimensions();
    let x = bounds.x.min(page_width);
    let y = bounds.y.min(page_height);
    let width = bounds.width.min(page_width - x);
    let height = bounds.height.min(page_height - y);
    if width == 0 || height == 0 {
        return Err(OcrError::InvalidRegion(format!(
            "{bounds:?} does not overlap the {page_width}x{page_height} page"
        )));
    }
    log::trace!("Slicing subimage to ({x}, {y}, {width}, {height})");
    Ok(imageops::crop_imm(page, x, y, width, height).to_image())
}

/// Extracts the minimum-area rectangle around `polygon`, rotated upright.
/// Patches taller than wide are turned landscape.
#[instrument(level = "trace", skip(canvas, polygon))]
pub(crate) fn crop_polygon(canvas: &PageCanvas, polygon: &Polygon<f32>) -> Result<GrayImage> {
    let to_canvas = canvas.to_canvas;
    let translated = polygon.map_coords(|coord| {
        let (x, y) = to_canvas.apply(coord.x, coord.y);
        Coord { x, y }
    });
    let rect = rotated_rect(&translated)
        .ok_or_else(|| OcrError::InvalidRegion("polygon has no bounding rectangle".into()))?;
    let width = rect.width.round() as u32;
    let height = rect.height.round() as u32;
    if width == 0 || height == 0 {
        return Err(OcrError::InvalidRegion(format!(
            "polygon encloses an empty {width}x{height} rectangle"
        )));
    }

    let projection = Projection::translate(width as f32 / 2.0, height as f32 / 2.0)
        * Projection::rotate(-rect.angle)
        * Projection::translate(-rect.center.x, -rect.center.y);
    let mut patch = GrayImage::new(width, height);
    warp_into(
        &canvas.image,
        &projection,
        Interpolation::Bilinear,
        canvas.background,
        &mut patch,
    );

    if patch.height() > patch.width() {
        patch = imageops::rotate90(&patch);
    }
    Ok(patch)
}

/// Stacks fitted line images into a `(batch, width, height, 1)` tensor in
/// `[0, 1]`.
fn to_batch_tensor(lines: &[(usize, GrayImage)], width: u32, height: u32) -> Array4<f32> {
    let mut batch = Array4::<f32>::zeros((lines.len(), width as usize, height as usize, 1));
    for (mut slot, (_, line)) in batch.outer_iter_mut().zip(lines) {
        for (x, y, pixel) in line.enumerate_pixels() {
            slot[[x as usize, y as usize, 0]] = pixel.0[0] as f32 / 255.0;
        }
    }
    batch
}
