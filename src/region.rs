//! Post-processing of the detector's probability bitmap into text line
//! regions.

use std::cmp::Ordering;

use float_ord::FloatOrd;
use geo::{Coord, Simplify};
use image::DynamicImage;
use imageproc::contours::find_contours;
use imageproc::point::Point;
use ndarray::ArrayView2;
use tracing::instrument;

use crate::{
    dbnet::Detector,
    error::{OcrError, Result},
    remap::to_original_space,
    scale::{scale_to_bound, ScaleTransform},
    util::{
        binarize, box_score_fast, normalize_ring, perimeter, rotated_rect, to_geo_poly,
        unclip, vertex_count,
    },
    DetectionOptions, ScoredRegion,
};

/// Regions of a page in original page coordinates, in reading order.
#[derive(Debug, Clone)]
pub struct DetectedPage {
    pub regions: Vec<ScoredRegion>,
    pub transform: ScaleTransform,
}

pub struct RegionExtractor<D> {
    detector: D,
    options: DetectionOptions,
}

impl<D: Detector> RegionExtractor<D> {
    pub fn new(detector: D, options: DetectionOptions) -> Self {
        Self { detector, options }
    }

    pub fn options(&self) -> &DetectionOptions {
        &self.options
    }

    pub fn extract(
        &self,
        bitmap: ArrayView2<f32>,
        dest_width: u32,
        dest_height: u32,
    ) -> Result<Vec<ScoredRegion>> {
        extract(bitmap, dest_width, dest_height, &self.options)
    }

    #[instrument(skip(self, page), level = "debug")]
    pub fn detect(&self, page: &DynamicImage) -> Result<DetectedPage> {
        let (scaled, transform) =
            scale_to_bound(page, self.options.target_dimension, self.options.scale_mode)?;
        let bitmap = self.detector.predict(&scaled)?;
        let regions = self.extract(bitmap.view(), scaled.width(), scaled.height())?;
        log::debug!("Detected {} regions", regions.len());
        Ok(DetectedPage {
            regions: to_original_space(&regions, &transform),
            transform,
        })
    }
}

/// Fixed-capacity store for accepted candidates.
pub(crate) struct RegionBuffer {
    regions: Vec<ScoredRegion>,
    capacity: usize,
}

impl RegionBuffer {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            regions: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Returns `false` and drops the region once the buffer is full.
    pub(crate) fn push(&mut self, region: ScoredRegion) -> bool {
        if self.regions.len() >= self.capacity {
            return false;
        }
        self.regions.push(region);
        true
    }

    pub(crate) fn into_reading_order(mut self, row_tolerance: f32) -> Vec<ScoredRegion> {
        sort_reading_order(&mut self.regions, row_tolerance);
        self.regions
    }
}

fn validate_bitmap(bitmap: &ArrayView2<f32>, dest_width: u32, dest_height: u32) -> Result<()> {
    let (height, width) = bitmap.dim();
    if height == 0 || width == 0 {
        return Err(OcrError::InvalidBitmap(format!(
            "bitmap has no pixels ({width}x{height})"
        )));
    }
    if dest_width == 0 || dest_height == 0 {
        return Err(OcrError::InvalidBitmap(format!(
            "destination size {dest_width}x{dest_height} is empty"
        )));
    }
    if let Some(value) = bitmap.iter().find(|it| !(0.0..=1.0).contains(*it)) {
        return Err(OcrError::InvalidBitmap(format!(
            "probability {value} is outside [0, 1]"
        )));
    }
    Ok(())
}

/// Turns a probability bitmap into scored line regions, scaled to
/// `dest_width` x `dest_height` and sorted in reading order.
#[instrument(skip(bitmap, options), level = "debug")]
pub fn extract(
    bitmap: ArrayView2<f32>,
    dest_width: u32,
    dest_height: u32,
    options: &DetectionOptions,
) -> Result<Vec<ScoredRegion>> {
    validate_bitmap(&bitmap, dest_width, dest_height)?;
    let (height, width) = bitmap.dim();
    let factor_x = dest_width as f32 / width as f32;
    let factor_y = dest_height as f32 / height as f32;

    let mask = binarize(bitmap, options.binarization_threshold);
    // Blobs whose first pixel lies on row or column 0 are traced as holes
    // with no parent, so top-level contours are selected by parent instead.
    let contours = find_contours::<i32>(&mask)
        .into_iter()
        .filter(|it| it.parent.is_none())
        .take(options.max_candidates)
        .collect::<Vec<_>>();
    log::debug!(
        "Bitmap {width}x{height} produced {} candidate contours",
        contours.len()
    );

    let mut buffer = RegionBuffer::with_capacity(options.max_candidates);
    for contour in &contours {
        let Some(region) = candidate_region(&contour.points, bitmap, options) else {
            continue;
        };
        let scaled = region.polygon.exterior().coords().map(|coord| Coord {
            x: (coord.x * factor_x).round().clamp(0.0, dest_width as f32),
            y: (coord.y * factor_y).round().clamp(0.0, dest_height as f32),
        });
        let Some(polygon) = normalize_ring(scaled) else {
            log::trace!("Dropping region that collapsed after rescaling");
            continue;
        };
        if !buffer.push(ScoredRegion {
            polygon,
            score: region.score,
        }) {
            log::debug!("Region buffer full, ignoring remaining contours");
            break;
        }
    }

    Ok(buffer.into_reading_order(options.row_tolerance))
}

/// Scores and expands a single contour, in bitmap coordinates.
fn candidate_region(
    points: &[Point<i32>],
    bitmap: ArrayView2<f32>,
    options: &DetectionOptions,
) -> Option<ScoredRegion> {
    if points.len() < 4 {
        return None;
    }
    let contour = to_geo_poly(points);
    let epsilon = 0.001 * perimeter(&contour);
    let approx = contour.simplify(&epsilon);
    if vertex_count(&approx) < 4 {
        log::trace!("Rejecting contour with fewer than 4 vertices");
        return None;
    }

    let score = box_score_fast(&approx, bitmap);
    if score < options.score_threshold {
        log::trace!("Rejecting contour with score {score}");
        return None;
    }

    let Some(expanded) = unclip(&approx, options.unclip_ratio) else {
        log::trace!("Rejecting contour with ambiguous unclip result");
        return None;
    };
    let short_side = rotated_rect(&expanded).map_or(0.0, |rect| rect.width.min(rect.height));
    if short_side < options.min_side {
        log::trace!("Rejecting sliver with short side {short_side}");
        return None;
    }

    Some(ScoredRegion {
        polygon: expanded,
        score,
    })
}

fn first_point(region: &ScoredRegion) -> Coord<f32> {
    region
        .polygon
        .exterior()
        .0
        .first()
        .copied()
        .unwrap_or(Coord { x: 0.0, y: 0.0 })
}

/// Row-banded comparison: regions whose first points are within
/// `row_tolerance` vertically are ordered left to right, otherwise top to
/// bottom.
pub fn reading_order(a: &ScoredRegion, b: &ScoredRegion, row_tolerance: f32) -> Ordering {
    let (a, b) = (first_point(a), first_point(b));
    if (a.y - b.y).abs() <= row_tolerance {
        FloatOrd(a.x).cmp(&FloatOrd(b.x))
    } else {
        FloatOrd(a.y).cmp(&FloatOrd(b.y))
    }
}

/// Stable insertion sort with [`reading_order`]. The comparison is not
/// transitive, so a deterministic pairwise pass is used instead of `sort_by`.
pub fn sort_reading_order(regions: &mut [ScoredRegion], row_tolerance: f32) {
    for i in 1..regions.len() {
        let mut j = i;
        while j > 0 && reading_order(&regions[j - 1], &regions[j], row_tolerance) == Ordering::Greater
        {
            regions.swap(j - 1, j);
            j -= 1;
        }
    }
}
