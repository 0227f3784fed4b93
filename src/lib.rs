use std::path::PathBuf;

use crnn_net::{CrnnNet, Transcriber};
use dbnet::{DbNet, Detector};

pub mod codec;
pub mod crnn_net;
pub mod dataset;
pub mod dbnet;
pub mod error;
pub mod language;
pub mod region;
pub mod remap;
mod result;
pub mod scale;
mod session;
pub mod transcribe;
mod util;

use image::DynamicImage;
use tracing::instrument;

pub use codec::{Alphabet, TextCodec};
pub use error::{OcrError, Result};
pub use language::{Cleaner, Language};
pub use region::RegionExtractor;
pub use result::*;
pub use scale::{ScaleMode, ScaleTransform};
pub use transcribe::TranscriptionCoordinator;

pub use ort as runtime;

enum AlphabetSource {
    Language(&'static Language),
    File(PathBuf),
    Custom(Alphabet),
}

pub struct PageReaderBuilder {
    threads: usize,
    det_path: Option<PathBuf>,
    rec_path: Option<PathBuf>,
    alphabet: AlphabetSource,
    max_text_length: usize,
    detection_options: DetectionOptions,
    transcription_options: TranscriptionOptions,
    execution_providers: Vec<ExecutionProvider>,
}

impl PageReaderBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    pub fn det_model(mut self, path: impl Into<PathBuf>) -> Self {
        self.det_path = Some(path.into());
        self
    }

    pub fn rec_model(mut self, path: impl Into<PathBuf>) -> Self {
        self.rec_path = Some(path.into());
        self
    }

    /// Uses the alphabet of a preset language.
    pub fn language(mut self, language: &'static Language) -> Self {
        self.alphabet = AlphabetSource::Language(language);
        self
    }

    /// Reads the alphabet from a file at build time.
    pub fn alphabet_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.alphabet = AlphabetSource::File(path.into());
        self
    }

    pub fn alphabet(mut self, alphabet: Alphabet) -> Self {
        self.alphabet = AlphabetSource::Custom(alphabet);
        self
    }

    pub fn max_text_length(mut self, max_text_length: usize) -> Self {
        self.max_text_length = max_text_length;
        self
    }

    pub fn detection_options(mut self, options: DetectionOptions) -> Self {
        self.detection_options = options;
        self
    }

    pub fn transcription_options(mut self, options: TranscriptionOptions) -> Self {
        self.transcription_options = options;
        self
    }

    pub fn with_execution_providers(
        mut self,
        providers: impl IntoIterator<Item = ExecutionProvider>,
    ) -> Self {
        self.execution_providers = providers.into_iter().collect();
        self
    }

    #[instrument(skip(self), level = "debug")]
    fn init_models(&mut self) -> Result<(DbNet, CrnnNet)> {
        let det_path = self
            .det_path
            .take()
            .unwrap_or_else(|| "models/det.onnx".into());
        let rec_path = self
            .rec_path
            .take()
            .unwrap_or_else(|| "models/rec.onnx".into());
        Ok((
            DbNet::init(det_path, self.threads, &self.execution_providers)?,
            CrnnNet::init(rec_path, self.threads, &self.execution_providers)?,
        ))
    }

    #[instrument(skip(self))]
    pub fn build(mut self) -> Result<PageReader<DbNet, CrnnNet>> {
        let (det_model, rec_model) = self.init_models()?;
        let alphabet = match self.alphabet {
            AlphabetSource::Language(language) => language.to_alphabet(),
            AlphabetSource::File(path) => Alphabet::from_file(path)?,
            AlphabetSource::Custom(alphabet) => alphabet,
        };
        log::debug!("Alphabet has {} classes", alphabet.vocab_size());
        let codec = TextCodec::new(alphabet, self.max_text_length);
        Ok(PageReader::new(
            RegionExtractor::new(det_model, self.detection_options),
            TranscriptionCoordinator::new(rec_model, codec, self.transcription_options),
        ))
    }
}

impl Default for PageReaderBuilder {
    fn default() -> Self {
        Self {
            threads: 4,
            det_path: None,
            rec_path: None,
            alphabet: AlphabetSource::Language(&Language::LATIN),
            max_text_length: 180,
            detection_options: DetectionOptions::default(),
            transcription_options: TranscriptionOptions::default(),
            execution_providers: DEFAULT_PROVIDERS.to_vec(),
        }
    }
}

/// Detection followed by transcription of a whole page.
pub struct PageReader<D, T> {
    extractor: RegionExtractor<D>,
    coordinator: TranscriptionCoordinator<T>,
}

impl<D: Detector, T: Transcriber> PageReader<D, T> {
    pub fn new(extractor: RegionExtractor<D>, coordinator: TranscriptionCoordinator<T>) -> Self {
        Self {
            extractor,
            coordinator,
        }
    }

    pub fn extractor(&self) -> &RegionExtractor<D> {
        &self.extractor
    }

    pub fn coordinator(&self) -> &TranscriptionCoordinator<T> {
        &self.coordinator
    }

    /// Text lines of `page` in reading order, in page coordinates.
    #[instrument(skip(self, page))]
    pub fn detect(&self, page: &DynamicImage) -> Result<Vec<PageLine>> {
        let detected = self.extractor.detect(page)?;
        Ok(detected
            .regions
            .into_iter()
            .enumerate()
            .map(|(id, region)| PageLine {
                id,
                bounds: BoundingBox::from_polygon(&region.polygon),
                region,
            })
            .collect())
    }

    /// Detects the lines of `page` and transcribes each of them.
    #[instrument(skip(self, page))]
    pub fn read(&self, page: &DynamicImage) -> Result<Vec<PageText>> {
        let lines = self.detect(page)?;
        let regions = lines
            .iter()
            .map(|line| LineRegion::Polygon(line.region.polygon.clone()))
            .collect::<Vec<_>>();
        let texts = self.coordinator.transcribe(&page.to_luma8(), &regions)?;

        Ok(lines
            .into_iter()
            .zip(texts)
            .map(|(line, text)| PageText { line, text })
            .collect())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DetectionOptions {
    /// Bound on the scaled page, see [`ScaleMode`].
    pub target_dimension: u32,
    pub scale_mode: ScaleMode,
    pub binarization_threshold: f32,
    pub score_threshold: f32,
    pub max_candidates: usize,
    pub unclip_ratio: f32,
    pub min_side: f32,
    /// Vertical distance under which two lines share a row.
    pub row_tolerance: f32,
}

impl Default for DetectionOptions {
    fn default() -> Self {
        Self {
            target_dimension: 2500,
            scale_mode: ScaleMode::LongSide,
            binarization_threshold: 0.3,
            score_threshold: 0.7,
            max_candidates: 500,
            unclip_ratio: 2.0,
            min_side: 5.0,
            row_tolerance: 15.0,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TranscriptionOptions {
    pub input_width: u32,
    pub input_height: u32,
    pub batch_size: usize,
}

impl Default for TranscriptionOptions {
    fn default() -> Self {
        Self {
            input_width: 640,
            input_height: 64,
            batch_size: 64,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionProvider {
    Default,
    #[cfg(feature = "coreml")]
    CoreML,
    #[cfg(feature = "cuda")]
    Cuda,
    #[cfg(feature = "directml")]
    DirectML,
}

const DEFAULT_PROVIDERS: &[ExecutionProvider] = &[
    #[cfg(feature = "coreml")]
    ExecutionProvider::CoreML,
    #[cfg(feature = "directml")]
    ExecutionProvider::DirectML,
    #[cfg(feature = "cuda")]
    ExecutionProvider::Cuda,
    ExecutionProvider::Default,
];
