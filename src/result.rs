use geo::Polygon;

use crate::error::Result;

#[derive(Debug, Clone)]
pub struct ScoredRegion {
    pub polygon: Polygon<f32>,
    pub score: f32,
}

/// Axis-aligned box in integer pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transcription {
    pub text: String,
    pub probability: f32,
}

/// A line to transcribe, either an axis-aligned box or an oriented polygon.
#[derive(Debug, Clone)]
pub enum LineRegion {
    Box(BoundingBox),
    Polygon(Polygon<f32>),
}

impl From<BoundingBox> for LineRegion {
    fn from(value: BoundingBox) -> Self {
        Self::Box(value)
    }
}

impl From<Polygon<f32>> for LineRegion {
    fn from(value: Polygon<f32>) -> Self {
        Self::Polygon(value)
    }
}

/// Best decoding path for one line as returned by a transcription model.
#[derive(Debug, Clone, PartialEq)]
pub struct BestPath {
    pub indices: Vec<i64>,
    pub log_probability: f32,
}

#[derive(Debug, Clone)]
pub struct PageLine {
    pub id: usize,
    pub region: ScoredRegion,
    pub bounds: BoundingBox,
}

#[derive(Debug)]
pub struct PageText {
    pub line: PageLine,
    pub text: Result<Transcription>,
}
