//! Offline preparation of labelled line images for training the recognizer.

use std::{
    fs,
    path::{Path, PathBuf},
};

use image::GrayImage;
use rayon::prelude::*;
use tracing::instrument;

use crate::{
    codec::{EncodedText, TextCodec},
    error::Result,
    language::Cleaner,
    scale::fit_to_canvas,
};

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

/// A line image with its raw transcription.
#[derive(Debug, Clone)]
pub struct LineSample {
    pub image: GrayImage,
    pub text: String,
}

impl LineSample {
    /// Loads a line image and the first line of its transcription file.
    pub fn load(image_path: impl AsRef<Path>, transcription_path: impl AsRef<Path>) -> Result<Self> {
        let image = image::open(image_path)?.to_luma8();
        let contents = fs::read_to_string(transcription_path)?;
        let text = contents.lines().next().unwrap_or_default().trim().to_owned();
        Ok(Self { image, text })
    }
}

/// Loads every image in `dir` that has a `.txt` transcription with the same
/// stem, sorted by file name.
#[instrument(level = "debug", skip(dir), fields(dir = %dir.as_ref().display()))]
pub fn load_directory(dir: impl AsRef<Path>) -> Result<Vec<LineSample>> {
    let mut image_paths = fs::read_dir(dir)?
        .map(|entry| entry.map(|it| it.path()))
        .collect::<std::io::Result<Vec<PathBuf>>>()?;
    image_paths.retain(|path| {
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
    });
    image_paths.sort();

    let mut samples = Vec::with_capacity(image_paths.len());
    for image_path in image_paths {
        let transcription_path = image_path.with_extension("txt");
        if !transcription_path.is_file() {
            log::debug!("No transcription for {}", image_path.display());
            continue;
        }
        samples.push(LineSample::load(&image_path, &transcription_path)?);
    }
    log::debug!("Loaded {} samples", samples.len());
    Ok(samples)
}

/// A cleaned sample ready for training: the fitted image and the padded
/// label. `index` is the sample's position in the input.
#[derive(Debug, Clone)]
pub struct PreparedLine {
    pub index: usize,
    pub image: GrayImage,
    pub label: EncodedText,
}

/// Cleans, filters, fits and encodes `samples` on the rayon pool. Rejected
/// samples are skipped; the rest keep their input order.
#[instrument(level = "debug", skip_all, fields(samples = samples.len()))]
pub fn prepare_lines(
    samples: &[LineSample],
    codec: &TextCodec,
    cleaner: Cleaner,
    width: u32,
    height: u32,
) -> Vec<PreparedLine> {
    let mut prepared = samples
        .iter()
        .enumerate()
        .par_bridge()
        .filter_map(|(index, sample)| prepare_line(index, sample, codec, cleaner, width, height))
        .collect::<Vec<_>>();
    prepared.sort_unstable_by_key(|it| it.index);
    log::debug!("Prepared {} of {} samples", prepared.len(), samples.len());
    prepared
}

fn prepare_line(
    index: usize,
    sample: &LineSample,
    codec: &TextCodec,
    cleaner: Cleaner,
    width: u32,
    height: u32,
) -> Option<PreparedLine> {
    if sample.image.width() == 0 || sample.image.height() == 0 {
        log::debug!("Sample {index} has an empty image");
        return None;
    }
    let text = cleaner.clean(&sample.text);
    if !cleaner.is_acceptable(&text, codec) {
        log::debug!("Sample {index} rejected: {text:?}");
        return None;
    }
    let label = match codec
        .encode(&text)
        .and_then(|encoded| codec.pad(&encoded, codec.max_text_length()))
    {
        Ok(label) => label,
        Err(err) => {
            log::debug!("Sample {index} could not be encoded: {err}");
            return None;
        }
    };

    Some(PreparedLine {
        index,
        image: fit_to_canvas(&sample.image, width, height),
        label,
    })
}

#[cfg(test)]
mod tests {
    use image::Luma;

    use super::*;
    use crate::{
        codec::PAD_INDEX,
        language::Language,
    };

    fn sample(text: &str) -> LineSample {
        LineSample {
            image: GrayImage::from_pixel(120, 30, Luma([255])),
            text: text.to_owned(),
        }
    }

    #[test]
    fn rejected_samples_are_skipped_in_order() {
        let codec = TextCodec::new(Language::ITALIAN.to_alphabet(), 20);
        let samples = ["città", "...", "Dixit", "", "una riga decisamente troppo lunga", "ok"]
            .map(sample);
        let prepared = prepare_lines(&samples, &codec, Cleaner::Italian, 64, 16);

        let indices = prepared.iter().map(|it| it.index).collect::<Vec<_>>();
        assert_eq!(indices, vec![0, 2, 5]);
        for line in &prepared {
            assert_eq!(line.image.dimensions(), (64, 16));
            assert_eq!(line.label.len(), 20);
        }
        assert_eq!(codec.decode(&prepared[0].label), "citta'");
        assert_eq!(*prepared[1].label.last().unwrap(), PAD_INDEX);
    }

    #[test]
    fn empty_images_are_skipped() {
        let codec = TextCodec::new(Language::ITALIAN.to_alphabet(), 20);
        let samples = [LineSample {
            image: GrayImage::new(0, 0),
            text: "Dixit".into(),
        }];
        assert!(prepare_lines(&samples, &codec, Cleaner::Italian, 64, 16).is_empty());
    }

    #[test]
    fn directory_pairs_images_with_transcriptions() {
        let dir = std::env::temp_dir().join(format!("pagescan-dataset-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        GrayImage::from_pixel(40, 10, Luma([0]))
            .save(dir.join("b.png"))
            .unwrap();
        fs::write(dir.join("b.txt"), "  secunda linea \nignored").unwrap();
        GrayImage::from_pixel(40, 10, Luma([0]))
            .save(dir.join("a.png"))
            .unwrap();
        fs::write(dir.join("a.txt"), "prima").unwrap();
        GrayImage::from_pixel(40, 10, Luma([0]))
            .save(dir.join("orphan.png"))
            .unwrap();

        let samples = load_directory(&dir).unwrap();
        fs::remove_dir_all(&dir).unwrap();

        let texts = samples.iter().map(|it| it.text.as_str()).collect::<Vec<_>>();
        assert_eq!(texts, vec!["prima", "secunda linea"]);
        assert_eq!(samples[0].image.dimensions(), (40, 10));
    }
}
