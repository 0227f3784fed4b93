use std::path::Path;

use image::DynamicImage;
use ndarray::{Array2, Axis};
use ort::{inputs, Session};
use tracing::instrument;

use crate::{
    error::{OcrError, Result},
    session::build_session,
    util::subtract_mean_normalize,
    ExecutionProvider,
};

// Per-channel means on the 0-255 scale; the network expects mean-subtracted
// values without further normalization.
const MEAN_VALUES: [f32; 3] = [123.68 / 255.0, 116.779 / 255.0, 103.939 / 255.0];
const NORM_VALUES: [f32; 3] = [255.0, 255.0, 255.0];

/// A text detection model.
pub trait Detector {
    /// Returns a `(height, width)` map of text probabilities for `image`,
    /// whose sides are multiples of [`crate::scale::STRIDE`].
    fn predict(&self, image: &DynamicImage) -> Result<Array2<f32>>;
}

impl<D: Detector + ?Sized> Detector for &D {
    fn predict(&self, image: &DynamicImage) -> Result<Array2<f32>> {
        (**self).predict(image)
    }
}

impl<D: Detector + ?Sized> Detector for Box<D> {
    fn predict(&self, image: &DynamicImage) -> Result<Array2<f32>> {
        (**self).predict(image)
    }
}

/// Differentiable binarization network running on ONNX Runtime.
pub struct DbNet {
    session: Session,
}

impl DbNet {
    #[instrument(level = "debug", skip(path))]
    pub fn init(
        path: impl AsRef<Path>,
        num_threads: usize,
        execution_providers: &[ExecutionProvider],
    ) -> Result<Self> {
        let session = build_session(path.as_ref(), num_threads, execution_providers)?;
        Ok(Self { session })
    }
}

impl Detector for DbNet {
    #[instrument(skip(self, image), level = "debug")]
    fn predict(&self, image: &DynamicImage) -> Result<Array2<f32>> {
        let input_values =
            subtract_mean_normalize(image, &MEAN_VALUES, &NORM_VALUES).insert_axis(Axis(0));
        let outputs = self.session.run(inputs!["x" => input_values]?)?;
        let pred_mat = outputs
            .first_key_value()
            .ok_or_else(|| OcrError::InvalidModelOutput("detector returned no outputs".into()))?
            .1
            .try_extract_tensor::<f32>()?;

        if pred_mat.ndim() != 4 {
            return Err(OcrError::InvalidModelOutput(format!(
                "expected a 4-d probability map, got shape {:?}",
                pred_mat.shape()
            )));
        }
        let width = pred_mat.len_of(Axis(3));
        let height = pred_mat.len_of(Axis(2));
        log::trace!("Probability map size: {width}x{height}");

        Ok(pred_mat.to_shape((height, width))?.into_owned())
    }
}
