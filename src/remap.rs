//! Projection of detected geometry back into original page coordinates.

use geo::{BoundingRect, Coord, LineString, MinimumRotatedRect, Polygon};

use crate::{scale::ScaleTransform, BoundingBox, ScoredRegion};

pub fn polygon_to_original_space(polygon: &Polygon<f32>, transform: &ScaleTransform) -> Polygon<f32> {
    let coords = polygon
        .exterior()
        .coords()
        .map(|coord| {
            let (x, y) = transform.invert(coord.x, coord.y);
            Coord { x, y }
        })
        .collect::<Vec<_>>();
    Polygon::new(LineString::new(coords), vec![])
}

/// Inverts `transform` on every point of every region. Scores and order are
/// kept as they are.
pub fn to_original_space(regions: &[ScoredRegion], transform: &ScaleTransform) -> Vec<ScoredRegion> {
    regions
        .iter()
        .map(|region| ScoredRegion {
            polygon: polygon_to_original_space(&region.polygon, transform),
            score: region.score,
        })
        .collect()
}

impl BoundingBox {
    /// Axis-aligned bounds of the polygon's minimum-area rectangle, clamped
    /// to non-negative pixel coordinates.
    pub fn from_polygon(polygon: &Polygon<f32>) -> Self {
        let bounds = polygon
            .minimum_rotated_rect()
            .and_then(|rect| rect.bounding_rect())
            .or_else(|| polygon.bounding_rect());
        let Some(bounds) = bounds else {
            return Self::default();
        };
        let x_min = bounds.min().x.floor().max(0.0);
        let y_min = bounds.min().y.floor().max(0.0);
        let x_max = bounds.max().x.ceil().max(x_min);
        let y_max = bounds.max().y.ceil().max(y_min);
        Self::new(
            x_min as u32,
            y_min as u32,
            (x_max - x_min) as u32,
            (y_max - y_min) as u32,
        )
    }
}

pub fn bounding_boxes(regions: &[ScoredRegion]) -> Vec<BoundingBox> {
    regions
        .iter()
        .map(|region| BoundingBox::from_polygon(&region.polygon))
        .collect()
}
