use std::path::Path;

use float_ord::FloatOrd;
use ndarray::{ArrayView2, ArrayView4, Axis, Ix3};
use ort::{inputs, Session};
use tracing::instrument;

use crate::{
    error::{OcrError, Result},
    session::build_session,
    BestPath, ExecutionProvider,
};

/// A line transcription model.
pub trait Transcriber {
    /// Transcribes a `(batch, width, height, 1)` tensor of line images with
    /// values in `[0, 1]`, returning one best path per line.
    fn predict_batch(&self, batch: ArrayView4<f32>) -> Result<Vec<BestPath>>;
}

impl<T: Transcriber + ?Sized> Transcriber for &T {
    fn predict_batch(&self, batch: ArrayView4<f32>) -> Result<Vec<BestPath>> {
        (**self).predict_batch(batch)
    }
}

impl<T: Transcriber + ?Sized> Transcriber for Box<T> {
    fn predict_batch(&self, batch: ArrayView4<f32>) -> Result<Vec<BestPath>> {
        (**self).predict_batch(batch)
    }
}

/// Convolutional recurrent recognizer with a CTC head, running on ONNX
/// Runtime. The last output class is the CTC blank.
pub struct CrnnNet {
    session: Session,
}

impl CrnnNet {
    #[instrument(level = "debug", skip(model_path))]
    pub fn init(
        model_path: impl AsRef<Path>,
        num_threads: usize,
        execution_providers: &[ExecutionProvider],
    ) -> Result<Self> {
        let session = build_session(model_path.as_ref(), num_threads, execution_providers)?;
        Ok(Self { session })
    }
}

impl Transcriber for CrnnNet {
    #[instrument(level = "debug", skip(self, batch))]
    fn predict_batch(&self, batch: ArrayView4<f32>) -> Result<Vec<BestPath>> {
        let outputs = self.session.run(inputs!["x" => batch.to_owned()]?)?;
        let output_tensor = outputs
            .first_key_value()
            .ok_or_else(|| OcrError::InvalidModelOutput("recognizer returned no outputs".into()))?
            .1
            .try_extract_tensor::<f32>()?;

        log::trace!("Output tensor size: {:?}", output_tensor.dim());
        let output_tensor = output_tensor.into_dimensionality::<Ix3>()?;

        Ok(output_tensor.outer_iter().map(best_path).collect())
    }
}

/// Greedy CTC decoding of a `(time, classes)` score matrix: the arg max of
/// each step, repeats collapsed, blanks removed.
pub(crate) fn best_path(scores: ArrayView2<f32>) -> BestPath {
    let blank = scores.len_of(Axis(1)).saturating_sub(1);
    let mut indices = Vec::new();
    let mut log_probability = 0.0;
    let mut previous = None;

    for step in scores.outer_iter() {
        let Some((index, score)) = step
            .indexed_iter()
            .max_by_key(|(_, value)| FloatOrd(**value))
        else {
            continue;
        };
        log_probability += score.max(f32::MIN_POSITIVE).ln();
        if previous != Some(index) && index != blank {
            indices.push(index as i64);
        }
        previous = Some(index);
    }

    BestPath {
        indices,
        log_probability,
    }
}

#[cfg(test)]
mod tests {
    use ndarray::Array2;

    use super::*;

    fn one_hot(steps: &[usize], classes: usize, confidence: f32) -> Array2<f32> {
        let rest = (1.0 - confidence) / (classes - 1) as f32;
        Array2::from_shape_fn((steps.len(), classes), |(t, c)| {
            if steps[t] == c {
                confidence
            } else {
                rest
            }
        })
    }

    #[test]
    fn best_path_collapses_repeats_and_blanks() {
        // class 5 is the blank
        let scores = one_hot(&[2, 2, 5, 2, 3, 3, 5, 5, 1], 6, 0.9);
        let path = best_path(scores.view());
        assert_eq!(path.indices, vec![2, 2, 3, 1]);
        assert!((path.log_probability - 9.0 * 0.9f32.ln()).abs() < 1e-4);
    }

    #[test]
    fn empty_output_is_an_empty_path() {
        let scores = Array2::<f32>::zeros((0, 6));
        let path = best_path(scores.view());
        assert!(path.indices.is_empty());
        assert_eq!(path.log_probability, 0.0);
    }
}
