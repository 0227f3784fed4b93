use thiserror::Error;

pub type Result<T> = std::result::Result<T, OcrError>;

#[derive(Debug, Error)]
pub enum OcrError {
    #[error("invalid image: {width}x{height}")]
    InvalidImage { width: u32, height: u32 },

    #[error("invalid probability bitmap: {0}")]
    InvalidBitmap(String),

    #[error("text of length {length} exceeds the maximum of {max}")]
    TextTooLong { length: usize, max: usize },

    /// A single line region could not be cropped from its page.
    #[error("invalid region: {0}")]
    InvalidRegion(String),

    #[error("model returned unexpected output: {0}")]
    InvalidModelOutput(String),

    #[error(transparent)]
    Runtime(#[from] ort::Error),

    #[error(transparent)]
    Image(#[from] image::ImageError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Shape(#[from] ndarray::ShapeError),
}
