//! Transcription languages and the cleaners applied to ground-truth text.

use crate::codec::{Alphabet, TextCodec};

pub const LATIN_ALPHABET: &str = "abcdefghijklmnopqrstuvxyzABCDEFHIJKLMNOPQRSTUVWXYZ.,' ";
pub const ITALIAN_ALPHABET: &str = concat!(
    "0123456789",
    "abcdefghijklmnopqrstuvwxyz",
    "ABCDEFGHIJKLMNOPQRSTUVWXYZ",
    "!\"#$%&'()*+,-./:;<=>?@[\\]^_`{|}~",
    " ",
);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Language {
    pub name: &'static str,
    pub code: &'static str,
    pub alphabet: &'static str,
    pub description: &'static str,
}

impl Language {
    pub const LATIN: Language = Language {
        name: "Latin",
        code: "LAT",
        alphabet: LATIN_ALPHABET,
        description: "Medieval Latin used in Honorii III and Innocent III documents.",
    };

    pub const ITALIAN: Language = Language {
        name: "Italian",
        code: "ITA",
        alphabet: ITALIAN_ALPHABET,
        description: "Italian Language.",
    };

    /// Looks a language up by name, ignoring case. Unknown names resolve to
    /// Italian.
    pub fn from_name(name: &str) -> &'static Language {
        match name.to_lowercase().as_str() {
            "latin" => &Self::LATIN,
            "italian" => &Self::ITALIAN,
            other => {
                log::debug!("Unknown language {other:?}, falling back to Italian");
                &Self::ITALIAN
            }
        }
    }

    pub fn to_alphabet(&self) -> Alphabet {
        Alphabet::new(self.alphabet)
    }
}

/// Rewrites raw transcriptions into text the recognizer can learn from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cleaner {
    Latin,
    Italian,
}

impl Cleaner {
    pub fn for_language(language: &Language) -> Self {
        if language.name == Language::LATIN.name {
            Self::Latin
        } else {
            Self::Italian
        }
    }

    pub fn alphabet(&self) -> &'static str {
        match self {
            Self::Latin => LATIN_ALPHABET,
            Self::Italian => ITALIAN_ALPHABET,
        }
    }

    pub fn clean(&self, transcription: &str) -> String {
        let alphabet = self.alphabet();
        match self {
            Self::Latin => {
                let transcription = remove_spans(transcription, '{', '}');
                let transcription = remove_spans(&transcription, '[', ']');
                transcription
                    .chars()
                    .filter(|c| alphabet.contains(*c))
                    .collect()
            }
            Self::Italian => {
                let mut output = String::with_capacity(transcription.len());
                for c in transcription.chars() {
                    match transliterate(c) {
                        Some(replacement) => output.push_str(replacement),
                        None => output.push(c),
                    }
                }
                output.retain(|c| alphabet.contains(c));
                output
            }
        }
    }

    /// Whether `text` is worth keeping as a training label: it must survive
    /// sanitizing with more than one non-punctuation character, stay under
    /// the codec's maximum length and encode to something.
    pub fn is_acceptable(&self, text: &str, codec: &TextCodec) -> bool {
        let sanitized = sanitize(text);
        let length = sanitized.chars().count();
        if length == 0 || length >= codec.max_text_length() {
            return false;
        }

        let strip_punc = sanitized
            .trim_matches(|c: char| c.is_ascii_punctuation())
            .trim();
        let no_punc = sanitized
            .chars()
            .filter(|c| !c.is_ascii_punctuation())
            .collect::<String>();
        if strip_punc.chars().count() <= 1 && no_punc.trim().chars().count() <= 1 {
            return false;
        }

        codec
            .encode(text)
            .map(|encoded| !encoded.is_empty())
            .unwrap_or(false)
    }
}

fn transliterate(c: char) -> Option<&'static str> {
    let replacement = match c {
        '°' => "'",
        'à' | 'á' | 'â' => "a'",
        'è' | 'é' | 'ê' | 'ë' => "e'",
        'ì' => "i",
        'î' | 'ï' => "i'",
        'ò' | 'ó' | 'ô' => "o'",
        'ù' | 'ú' | 'û' => "u'",
        'À' | 'Á' | 'Â' => "A'",
        'È' | 'É' | 'Ê' | 'Ë' => "E'",
        'Ì' | 'Í' | 'Î' | 'Ï' => "I'",
        'Ò' | 'Ó' | 'Ô' => "O'",
        'Ù' | 'Ú' | 'Û' => "U'",
        'ç' => "c",
        'Ç' => "C",
        '£' => "L",
        '€' => "E",
        '¥' => "Y",
        '¢' => "c",
        '฿' => "B",
        _ => return None,
    };
    Some(replacement)
}

/// Removes every `open ... close` span, shortest match first. An unclosed
/// `open` is kept.
fn remove_spans(text: &str, open: char, close: char) -> String {
    let mut output = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find(open) {
        let after_open = &rest[start + open.len_utf8()..];
        let Some(end) = after_open.find(|c: char| c == close || c == '\n') else {
            break;
        };
        if after_open[end..].starts_with('\n') {
            output.push_str(&rest[..start + open.len_utf8() + end]);
            rest = &after_open[end..];
            continue;
        }
        output.push_str(&rest[..start]);
        rest = &after_open[end + close.len_utf8()..];
    }
    output.push_str(rest);
    output
}

const LEFT_PUNCTUATION: &str = "!%&),.:;<=>?@\\]^_`|}~";
const RIGHT_PUNCTUATION: &str = "\"(/<=>@[\\^_`{|~";

fn canonical_char(c: char) -> Option<char> {
    let canonical = match c {
        '¶' | '¤' | '«' | '»' => return None,
        '-' | '˗' | '֊' | '‐' | '‑' | '‒' | '–' | '—' | '⁻' | '₋' | '−' | '﹣' | '－' => '-',
        'ʼ' | '՚' | '＇' | '‘' | '’' | '‛' | '❛' | '❜' | 'ߴ' | 'ߵ' | '`' | '‵' | '´' | 'ˊ' | 'ˋ'
        | '\u{300}' | '\u{301}' | '\u{340}' | '\u{341}' | '\u{953}' | '\u{141f}' | '\u{1420}'
        | '\u{ff40}' | '\u{2032}' => '\'',
        '(' | '[' | '{' | '⁽' | '₍' | '❨' | '❪' | '﹙' | '（' => '(',
        ')' | ']' | '}' | '⁾' | '₎' | '❩' | '❫' | '﹚' | '）' => ')',
        c if c.is_alphanumeric() || c.is_whitespace() || c.is_ascii_punctuation() => c,
        _ => return None,
    };
    Some(canonical)
}

/// Canonicalizes dashes, quotes and brackets, drops anything that is not a
/// word character, whitespace or ASCII punctuation, and separates
/// punctuation from words.
fn sanitize(text: &str) -> String {
    let text = text
        .replace("&#39;", "'")
        .replace("&quot;", "\"")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
        .replace("\\n", "")
        .replace("\\t", "");
    let text = text.chars().filter_map(canonical_char).collect::<String>();
    let text = text
        .trim_start_matches(|c: char| LEFT_PUNCTUATION.contains(c))
        .trim_end_matches(|c: char| RIGHT_PUNCTUATION.contains(c));

    let mut spaced = String::with_capacity(text.len() * 2);
    for c in text.chars() {
        if c.is_ascii_punctuation() {
            spaced.push(' ');
            spaced.push(c);
            spaced.push(' ');
        } else {
            spaced.push(c);
        }
    }

    let mut output = String::with_capacity(spaced.len());
    let mut in_space = false;
    for c in spaced.trim().chars() {
        if c.is_whitespace() && c != '\n' {
            if !in_space {
                output.push(' ');
            }
            in_space = true;
        } else {
            output.push(c);
            in_space = false;
        }
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn language_lookup_ignores_case() {
        assert_eq!(Language::from_name("LATIN"), &Language::LATIN);
        assert_eq!(Language::from_name("Italian").code, "ITA");
        assert_eq!(Language::from_name("klingon"), &Language::ITALIAN);
    }

    #[test]
    fn italian_alphabet_is_printable_ascii() {
        assert_eq!(ITALIAN_ALPHABET.chars().count(), 95);
        assert!(ITALIAN_ALPHABET.chars().all(|c| c == ' ' || c.is_ascii_graphic()));
    }

    #[test]
    fn latin_cleaner_drops_editorial_spans() {
        let cleaner = Cleaner::for_language(&Language::LATIN);
        assert_eq!(
            cleaner.clean("Honorius {marg.} episcopus [sic] servus 123"),
            "Honorius  episcopus  servus "
        );
    }

    #[test]
    fn unclosed_span_is_kept() {
        assert_eq!(remove_spans("a {b} c {d", '{', '}'), "a  c {d");
    }

    #[test]
    fn italian_cleaner_transliterates() {
        let cleaner = Cleaner::for_language(&Language::ITALIAN);
        assert_eq!(cleaner.clean("città è più"), "citta' e' piu'");
        assert_eq!(cleaner.clean("Prezzo: 5€"), "Prezzo: 5E");
        assert_eq!(cleaner.clean("Straße"), "Strae");
    }

    #[test]
    fn acceptability() {
        let codec = TextCodec::new(Language::ITALIAN.to_alphabet(), 20);
        let cleaner = Cleaner::Italian;
        assert!(cleaner.is_acceptable("ab", &codec));
        assert!(cleaner.is_acceptable("Dixit dominus", &codec));
        assert!(!cleaner.is_acceptable("", &codec));
        assert!(!cleaner.is_acceptable("a.", &codec));
        assert!(!cleaner.is_acceptable("...", &codec));
        assert!(!cleaner.is_acceptable("¤¤", &codec));
        assert!(!cleaner.is_acceptable("a line much longer than twenty", &codec));
    }
}
