use std::f32::consts::FRAC_PI_2;
use std::f32::consts::FRAC_PI_4;

use float_ord::FloatOrd;
use geo::{
    point, Area, BoundingRect, Coord, EuclideanLength, Intersects, LineString,
    MinimumRotatedRect, Polygon,
};
use geo_clipper::{Clipper, EndType, JoinType};
use image::{DynamicImage, GrayImage, Luma, Pixel, Rgb};
use imageproc::point::Point;
use ndarray::{s, Array3, ArrayView2};
use tracing::instrument;

#[instrument(level = "debug", skip(image))]
pub(crate) fn subtract_mean_normalize(
    image: &DynamicImage,
    mean_vals: &[f32; 3],
    norm_vals: &[f32; 3],
) -> Array3<f32> {
    let mut image = image.to_rgb32f();
    let norm = Rgb::<f32>(*norm_vals);
    let mean_vals = Rgb::<f32>(*mean_vals).map2(&norm, |c1, c2| c1 * c2);
    for pixel in image.pixels_mut() {
        *pixel = pixel
            .map2(&norm, |c1, c2| c1 * c2)
            .map2(&mean_vals, |c1, c2| c1 - c2);
    }
    Array3::<f32>::from_shape_fn(
        (3, image.height() as usize, image.width() as usize),
        |(ch, y, x)| image.get_pixel(x as u32, y as u32).channels()[ch],
    )
}

/// Foreground (255) wherever the probability is above `threshold`.
pub(crate) fn binarize(data: ArrayView2<f32>, threshold: f32) -> GrayImage {
    let (height, width) = data.dim();
    GrayImage::from_fn(width as u32, height as u32, |x, y| {
        if data[[y as usize, x as usize]] > threshold {
            Luma([255])
        } else {
            Luma([0])
        }
    })
}

pub(crate) fn to_geo_poly(points: &[Point<i32>]) -> Polygon<f32> {
    let points = points
        .iter()
        .map(|point| Coord {
            x: point.x as f32,
            y: point.y as f32,
        })
        .collect();
    Polygon::new(LineString::new(points), vec![])
}

pub(crate) fn perimeter(polygon: &Polygon<f32>) -> f32 {
    polygon.exterior().euclidean_length()
}

/// Number of distinct vertices of a closed ring.
pub(crate) fn vertex_count(polygon: &Polygon<f32>) -> usize {
    let coords = &polygon.exterior().0;
    match (coords.first(), coords.last()) {
        (Some(first), Some(last)) if coords.len() > 1 && first == last => coords.len() - 1,
        _ => coords.len(),
    }
}

/// Mean of `pred_data` over the pixels inside or on the boundary of `polygon`.
pub(crate) fn box_score_fast(polygon: &Polygon<f32>, pred_data: ArrayView2<f32>) -> f32 {
    let (height, width) = pred_data.dim();
    let Some(bounds) = polygon.bounding_rect() else {
        return 0.0;
    };
    if height == 0 || width == 0 {
        return 0.0;
    }

    let clamp = |value: f32, len: usize| (value.max(0.0) as usize).min(len - 1);
    let x_min = clamp(bounds.min().x.floor(), width);
    let x_max = clamp(bounds.max().x.ceil(), width);
    let y_min = clamp(bounds.min().y.floor(), height);
    let y_max = clamp(bounds.max().y.ceil(), height);

    let window = pred_data.slice(s![y_min..=y_max, x_min..=x_max]);
    let (sum, count) = window
        .indexed_iter()
        .filter(|((y, x), _)| {
            polygon.intersects(&point![x: (x + x_min) as f32, y: (y + y_min) as f32])
        })
        .fold((0.0f32, 0usize), |(sum, count), (_, value)| {
            (sum + *value, count + 1)
        });

    if count == 0 {
        0.0
    } else {
        sum / count as f32
    }
}

/// Expands `polygon` outwards by `area * unclip_ratio / perimeter` with round
/// joins. Returns `None` unless the offset yields exactly one simple ring.
pub(crate) fn unclip(polygon: &Polygon<f32>, unclip_ratio: f32) -> Option<Polygon<f32>> {
    let length = perimeter(polygon);
    if length <= f32::EPSILON {
        return None;
    }
    let distance = polygon.unsigned_area() * unclip_ratio / length;

    let expanded = polygon.offset(distance, JoinType::Round(0.25), EndType::ClosedPolygon, 1.0);
    let mut rings = expanded.0.into_iter();
    match (rings.next(), rings.next()) {
        (Some(ring), None) if ring.interiors().is_empty() => Some(ring),
        _ => None,
    }
}

/// Minimum-area rectangle described by its center, extents and rotation.
///
/// `angle` is in radians, folded into `(-PI/4, PI/4]` so the rectangle is
/// described as close to upright as possible.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct RotatedRect {
    pub center: Coord<f32>,
    pub width: f32,
    pub height: f32,
    pub angle: f32,
}

pub(crate) fn rotated_rect(polygon: &Polygon<f32>) -> Option<RotatedRect> {
    let rect = polygon.minimum_rotated_rect()?;
    let corners = &rect.exterior().0;
    if corners.len() < 4 {
        return None;
    }
    let (a, b, c) = (corners[0], corners[1], corners[2]);
    let mut width = (b - a).x.hypot((b - a).y);
    let mut height = (c - b).x.hypot((c - b).y);
    let mut angle = (b.y - a.y).atan2(b.x - a.x);
    while angle > FRAC_PI_4 {
        angle -= FRAC_PI_2;
        std::mem::swap(&mut width, &mut height);
    }
    while angle <= -FRAC_PI_4 {
        angle += FRAC_PI_2;
        std::mem::swap(&mut width, &mut height);
    }
    Some(RotatedRect {
        center: Coord {
            x: (a.x + c.x) / 2.0,
            y: (a.y + c.y) / 2.0,
        },
        width,
        height,
        angle,
    })
}

/// Builds a polygon with a consistent winding (positive signed area) whose
/// ring starts at the top-left-most vertex. Degenerate rings yield `None`.
pub(crate) fn normalize_ring(points: impl IntoIterator<Item = Coord<f32>>) -> Option<Polygon<f32>> {
    let mut coords: Vec<Coord<f32>> = Vec::new();
    for coord in points {
        if coords.last() != Some(&coord) {
            coords.push(coord);
        }
    }
    if coords.len() > 1 && coords.first() == coords.last() {
        coords.pop();
    }
    if coords.len() < 3 {
        return None;
    }

    let area = Polygon::new(LineString::new(coords.clone()), vec![]).signed_area();
    if area.abs() <= f32::EPSILON {
        return None;
    }
    if area < 0.0 {
        coords.reverse();
    }
    let start = coords
        .iter()
        .enumerate()
        .min_by_key(|(_, c)| FloatOrd(c.x + c.y))
        .map_or(0, |(i, _)| i);
    coords.rotate_left(start);
    Some(Polygon::new(LineString::new(coords), vec![]))
}

#[cfg(test)]
mod tests {
    use geo::polygon;
    use ndarray::Array2;

    use super::*;

    fn square(min: f32, max: f32) -> Polygon<f32> {
        polygon![
            (x: min, y: min),
            (x: max, y: min),
            (x: max, y: max),
            (x: min, y: max),
        ]
    }

    #[test]
    fn score_is_masked_mean() {
        let mut pred = Array2::<f32>::zeros((20, 20));
        pred.slice_mut(s![5..=10, 5..=10]).fill(1.0);
        // triangle covering the lower-left half of the filled block
        let triangle = polygon![(x: 5.0, y: 5.0), (x: 5.0, y: 10.0), (x: 10.0, y: 10.0)];
        assert!((box_score_fast(&triangle, pred.view()) - 1.0).abs() < 1e-6);
        let wide = square(0.0, 19.0);
        let score = box_score_fast(&wide, pred.view());
        assert!((score - 36.0 / 400.0).abs() < 1e-6);
    }

    #[test]
    fn score_window_is_clamped() {
        let pred = Array2::<f32>::from_elem((4, 4), 0.5);
        let outside = square(-10.0, 10.0);
        assert!((box_score_fast(&outside, pred.view()) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn unclip_grows_by_expected_distance() {
        let original = square(0.0, 10.0);
        // area 100, perimeter 40, ratio 2.0 -> distance 5
        let expanded = unclip(&original, 2.0).unwrap();
        let bounds = expanded.bounding_rect().unwrap();
        assert!((bounds.min().x + 5.0).abs() <= 1.0);
        assert!((bounds.max().x - 15.0).abs() <= 1.0);
        assert!((bounds.min().y + 5.0).abs() <= 1.0);
        assert!((bounds.max().y - 15.0).abs() <= 1.0);
    }

    #[test]
    fn rotated_rect_of_axis_aligned_box() {
        let rect = rotated_rect(&polygon![
            (x: 0.0, y: 0.0),
            (x: 40.0, y: 0.0),
            (x: 40.0, y: 10.0),
            (x: 0.0, y: 10.0),
        ])
        .unwrap();
        assert!(rect.angle.abs() < 1e-4);
        assert!((rect.width - 40.0).abs() < 1e-3);
        assert!((rect.height - 10.0).abs() < 1e-3);
        assert!((rect.center.x - 20.0).abs() < 1e-3 && (rect.center.y - 5.0).abs() < 1e-3);
    }

    #[test]
    fn rings_are_normalized() {
        let clockwise = vec![
            Coord { x: 10.0, y: 10.0 },
            Coord { x: 10.0, y: 0.0 },
            Coord { x: 0.0, y: 0.0 },
            Coord { x: 0.0, y: 10.0 },
            Coord { x: 10.0, y: 10.0 },
        ];
        let normalized = normalize_ring(clockwise).unwrap();
        assert!(normalized.signed_area() > 0.0);
        assert_eq!(normalized.exterior().0[0], Coord { x: 0.0, y: 0.0 });
        assert_eq!(vertex_count(&normalized), 4);

        let line = vec![
            Coord { x: 0.0, y: 0.0 },
            Coord { x: 5.0, y: 5.0 },
            Coord { x: 10.0, y: 10.0 },
        ];
        assert!(normalize_ring(line).is_none());
        assert!(normalize_ring(vec![Coord { x: 1.0, y: 1.0 }; 4]).is_none());
    }

    #[test]
    fn binarize_uses_strict_threshold() {
        let pred = Array2::from_shape_vec((1, 3), vec![0.2, 0.3, 0.9]).unwrap();
        let mask = binarize(pred.view(), 0.3);
        assert_eq!(mask.as_raw(), &vec![0, 0, 255]);
    }
}
