//! Character set handling for the transcription model.
//!
//! The model is trained with a CTC loss, which merges repeated symbols unless
//! a different symbol separates them. [`TextCodec::encode`] therefore places
//! the UNK sentinel inside runs of identical characters, and
//! [`TextCodec::decode`] drops it again.

use std::{collections::HashMap, ops::Deref, path::Path};

use tracing::instrument;
use unicode_normalization::UnicodeNormalization;

use crate::error::{OcrError, Result};

pub const PAD_CHAR: char = '¶';
pub const UNK_CHAR: char = '¤';
pub const PAD_INDEX: i64 = 0;
pub const UNK_INDEX: i64 = 1;

#[derive(Debug, Clone)]
pub struct Alphabet {
    chars: Vec<char>,
    indices: HashMap<char, i64>,
}

impl Alphabet {
    /// Builds an alphabet from an ordered character string. Duplicates keep
    /// their first position and the sentinel characters are always reserved.
    pub fn new(chars: &str) -> Self {
        let mut alphabet = Self {
            chars: Vec::with_capacity(chars.len() + 2),
            indices: HashMap::with_capacity(chars.len() + 2),
        };
        for c in [PAD_CHAR, UNK_CHAR].into_iter().chain(chars.chars()) {
            if !alphabet.indices.contains_key(&c) {
                alphabet.indices.insert(c, alphabet.chars.len() as i64);
                alphabet.chars.push(c);
            }
        }
        alphabet
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Ok(Self::new(contents.trim_end_matches(['\r', '\n'])))
    }

    /// Number of model classes, sentinels included.
    pub fn vocab_size(&self) -> usize {
        self.chars.len()
    }

    pub fn index_of(&self, c: char) -> Option<i64> {
        self.indices.get(&c).copied()
    }

    pub fn char_at(&self, index: i64) -> Option<char> {
        usize::try_from(index)
            .ok()
            .and_then(|index| self.chars.get(index))
            .copied()
    }

    /// The characters after the two sentinels.
    pub fn characters(&self) -> &[char] {
        &self.chars[2..]
    }

    pub fn contains(&self, c: char) -> bool {
        self.indices.contains_key(&c)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EncodedText(Vec<i64>);

impl EncodedText {
    pub fn into_inner(self) -> Vec<i64> {
        self.0
    }
}

impl Deref for EncodedText {
    type Target = [i64];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<Vec<i64>> for EncodedText {
    fn from(value: Vec<i64>) -> Self {
        Self(value)
    }
}

/// Decomposes `text`, drops everything outside ASCII and collapses whitespace.
pub fn normalize(text: &str) -> String {
    let ascii = text.nfkd().filter(char::is_ascii).collect::<String>();
    ascii.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[derive(Debug, Clone)]
pub struct TextCodec {
    alphabet: Alphabet,
    max_text_length: usize,
}

impl TextCodec {
    pub fn new(alphabet: Alphabet, max_text_length: usize) -> Self {
        Self {
            alphabet,
            max_text_length,
        }
    }

    pub fn alphabet(&self) -> &Alphabet {
        &self.alphabet
    }

    pub fn max_text_length(&self) -> usize {
        self.max_text_length
    }

    #[instrument(level = "trace", skip(self))]
    pub fn encode(&self, text: &str) -> Result<EncodedText> {
        let text = normalize(text);
        let mut encoded = Vec::with_capacity(text.len() * 2);
        let mut previous = None;
        for c in text.chars() {
            if previous == Some(c) {
                encoded.push(UNK_INDEX);
            }
            encoded.push(self.alphabet.index_of(c).unwrap_or(UNK_INDEX));
            previous = Some(c);
        }

        if encoded.len() > self.max_text_length {
            return Err(OcrError::TextTooLong {
                length: encoded.len(),
                max: self.max_text_length,
            });
        }
        Ok(EncodedText(encoded))
    }

    pub fn decode(&self, indices: &[i64]) -> String {
        indices
            .iter()
            .filter_map(|index| self.alphabet.char_at(*index))
            .filter(|c| *c != PAD_CHAR && *c != UNK_CHAR)
            .collect()
    }

    pub fn pad(&self, encoded: &EncodedText, target_length: usize) -> Result<EncodedText> {
        if encoded.len() > target_length {
            return Err(OcrError::TextTooLong {
                length: encoded.len(),
                max: target_length,
            });
        }
        let mut padded = encoded.0.clone();
        padded.resize(target_length, PAD_INDEX);
        Ok(EncodedText(padded))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PRINTABLE: &str = "0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ!\"#$%&'()*+,-./:;<=>?@[\\]^_`{|}~ ";

    fn codec() -> TextCodec {
        TextCodec::new(Alphabet::new(PRINTABLE), 128)
    }

    #[test]
    fn sentinels_have_fixed_indices() {
        let alphabet = Alphabet::new("abca¶");
        assert_eq!(alphabet.index_of(PAD_CHAR), Some(PAD_INDEX));
        assert_eq!(alphabet.index_of(UNK_CHAR), Some(UNK_INDEX));
        assert_eq!(alphabet.index_of('a'), Some(2));
        assert_eq!(alphabet.index_of('c'), Some(4));
        assert_eq!(alphabet.vocab_size(), 5);
        assert_eq!(alphabet.characters(), &['a', 'b', 'c']);
    }

    #[test]
    fn normalization_is_lossy_ascii() {
        assert_eq!(normalize("  Città\t di   Roma \n"), "Citta di Roma");
        assert_eq!(normalize("naïve → café"), "naive cafe");
    }

    #[test]
    fn duplicates_are_separated_by_unk() {
        let codec = TextCodec::new(Alphabet::new("ab"), 16);
        assert_eq!(&*codec.encode("aa").unwrap(), &[2, UNK_INDEX, 2]);
        assert_eq!(
            &*codec.encode("aaab").unwrap(),
            &[2, UNK_INDEX, 2, UNK_INDEX, 2, 3]
        );
        assert_eq!(&*codec.encode("abz").unwrap(), &[2, 3, UNK_INDEX]);
    }

    #[test]
    fn decode_restores_normalized_text() {
        let codec = codec();
        for text in [
            "Hello world",
            "Anno Domini 1216, littera",
            "ss bb  cc",
            "Perché no?",
            "a",
            "",
        ] {
            let encoded = codec.encode(text).unwrap();
            assert_eq!(codec.decode(&encoded), normalize(text));
        }
    }

    #[test]
    fn sentinels_decode_to_nothing() {
        let codec = codec();
        assert_eq!(codec.decode(&[PAD_INDEX, UNK_INDEX, UNK_INDEX, PAD_INDEX]), "");
        assert_eq!(codec.decode(&[]), "");
    }

    #[test]
    fn invalid_indices_are_skipped() {
        let codec = TextCodec::new(Alphabet::new("ab"), 16);
        assert_eq!(codec.decode(&[-1, 2, 99, 3, -7]), "ab");
    }

    #[test]
    fn padding() {
        let codec = codec();
        let encoded = codec.encode("abc").unwrap();
        let padded = codec.pad(&encoded, 6).unwrap();
        assert_eq!(padded.len(), 6);
        assert_eq!(&padded[3..], &[PAD_INDEX; 3]);
        assert_eq!(codec.decode(&padded), "abc");
        assert!(matches!(
            codec.pad(&encoded, 2),
            Err(OcrError::TextTooLong { length: 3, max: 2 })
        ));
    }

    #[test]
    fn encode_rejects_long_text() {
        let codec = TextCodec::new(Alphabet::new("ab"), 4);
        assert!(codec.encode("abab").is_ok());
        assert_eq!(codec.encode("aab").unwrap().len(), 4);
        assert!(matches!(
            codec.encode("aaab"),
            Err(OcrError::TextTooLong { length: 6, max: 4 })
        ));
        assert!(matches!(
            codec.encode("ababa"),
            Err(OcrError::TextTooLong { length: 5, max: 4 })
        ));
    }

    #[test]
    fn membership_ignores_unknown_characters() {
        let alphabet = Alphabet::new("abc");
        assert!(alphabet.contains('b'));
        assert!(alphabet.contains(PAD_CHAR));
        assert!(!alphabet.contains('z'));
    }

    #[test]
    fn encoded_text_exposes_its_indices() {
        let codec = TextCodec::new(Alphabet::new("abc"), 8);
        let encoded = codec.encode("cab").unwrap();
        assert_eq!(encoded.into_inner(), vec![4, 2, 3]);
    }
}
