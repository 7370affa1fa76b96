//! Phoneme symbol normalisation and feature definitions.
//!
//! Symbols are compared after length marks are removed, so a long vowel
//! counts as an occurrence of its short base vowel.

use serde::{Deserialize, Serialize};
use unicode_segmentation::UnicodeSegmentation;

use crate::error::{AnalysisError, Result};

/// Length marks that collapse onto the base symbol
const LENGTH_MARKS: [char; 3] = ['ː', 'ˑ', ':'];

/// Base letters of the IPA vowel chart (plus rhotacised schwas)
const VOWEL_LETTERS: &[char] = &[
    'i', 'y', 'ɨ', 'ʉ', 'ɯ', 'u', 'ɪ', 'ʏ', 'ʊ', 'e', 'ø', 'ɘ', 'ɵ', 'ɤ', 'o', 'ə', 'ɛ', 'œ', 'ɜ',
    'ɞ', 'ʌ', 'ɔ', 'æ', 'ɐ', 'a', 'ɶ', 'ɑ', 'ɒ', 'ɚ', 'ɝ',
];

/// Strip length marks and surrounding whitespace from a phoneme symbol
pub fn normalize_symbol(symbol: &str) -> String {
    symbol
        .trim()
        .chars()
        .filter(|c| !LENGTH_MARKS.contains(c))
        .collect()
}

/// True if every segment of the (normalised) symbol is built on a vowel letter.
///
/// Diphthongs such as `ai` therefore count as vowels; anything containing a
/// consonant letter does not.
pub fn is_vowel(symbol: &str) -> bool {
    let normalized = normalize_symbol(symbol);
    let mut segments = normalized.graphemes(true).peekable();
    if segments.peek().is_none() {
        return false;
    }
    segments.all(|segment| {
        segment
            .chars()
            .next()
            .map(|base| VOWEL_LETTERS.contains(&base))
            .unwrap_or(false)
    })
}

/// Which segments are eligible as automatically discovered features
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentFilter {
    #[default]
    Vowels,
    All,
}

impl SegmentFilter {
    pub fn accepts(&self, symbol: &str) -> bool {
        match self {
            SegmentFilter::Vowels => is_vowel(symbol),
            SegmentFilter::All => !symbol.is_empty(),
        }
    }
}

/// A feature under test: a single phoneme or a class of phonemes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSpec {
    pub id: String,
    /// Normalised symbols; a language has the feature if it has any of them
    pub symbols: Vec<String>,
}

impl FeatureSpec {
    pub fn single(symbol: &str) -> Self {
        let normalized = normalize_symbol(symbol);
        Self {
            id: normalized.clone(),
            symbols: vec![normalized],
        }
    }

    pub fn class(id: impl Into<String>, symbols: &[String]) -> Result<Self> {
        let id = id.into();
        let mut normalized: Vec<String> = symbols
            .iter()
            .map(|s| normalize_symbol(s))
            .filter(|s| !s.is_empty())
            .collect();
        normalized.sort();
        normalized.dedup();

        if normalized.is_empty() {
            return Err(AnalysisError::config_field(
                format!("feature class '{id}' has no symbols"),
                "classes",
            ));
        }

        Ok(Self {
            id,
            symbols: normalized,
        })
    }
}
