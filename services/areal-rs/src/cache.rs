//! On-disk results and null distributions.
//!
//! Layout under the cache root:
//!
//! ```text
//! summary.json                      every result row
//! nulls/<variant>/<feature>.json    one NullRecord per finished test
//! ```
//!
//! A record is written as soon as its test finishes, so an interrupted batch
//! resumes at feature granularity.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{AnalysisError, Result};
use crate::types::{EnrichmentResult, NeighbourMode};

const SUMMARY_FILE: &str = "summary.json";
const NULLS_DIR: &str = "nulls";

/// Everything a stored test depends on; a record is reused only on an
/// exact match
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordKey {
    pub iterations: usize,
    pub seed: u64,
    pub k: usize,
    pub neighbours: NeighbourMode,
    /// Sorted and deduplicated
    pub exclude_macro_areas: Vec<String>,
    /// Normalised feature symbols, sorted
    pub symbols: Vec<String>,
    /// [`crate::features::FeatureTable::fingerprint`] of the tested data
    pub sample_fingerprint: u64,
}

/// A result row together with the null samples it was computed from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NullRecord {
    pub key: RecordKey,
    pub result: EnrichmentResult,
    /// Empty for features that were not tested
    pub null_distribution: Vec<f64>,
}

impl NullRecord {
    pub fn matches(&self, key: &RecordKey) -> bool {
        self.key == *key
    }
}

/// Filesystem-safe encoding of a feature or variant id.
///
/// ASCII letters, digits, `-` and `_` pass through; every other character
/// becomes `~` followed by its hex code point.
pub fn file_key(id: &str) -> String {
    let mut key = String::with_capacity(id.len());
    for c in id.chars() {
        if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
            key.push(c);
        } else {
            key.push_str(&format!("~{:x}", c as u32));
        }
    }
    key
}

#[derive(Debug, Clone)]
pub struct ResultCache {
    root: PathBuf,
}

impl ResultCache {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(root.join(NULLS_DIR)).map_err(|e| {
            AnalysisError::io(format!("failed to create cache directory {root:?}"), e)
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn record_path(&self, variant: &str, feature: &str) -> PathBuf {
        self.root
            .join(NULLS_DIR)
            .join(file_key(variant))
            .join(format!("{}.json", file_key(feature)))
    }

    pub fn load(&self, variant: &str, feature: &str) -> Result<Option<NullRecord>> {
        let path = self.record_path(variant, feature);
        if !path.exists() {
            return Ok(None);
        }
        read_json(&path).map(Some)
    }

    /// Persist a finished test, replacing any earlier record atomically
    pub fn store(&self, record: &NullRecord) -> Result<()> {
        let path = self.record_path(&record.result.variant, &record.result.feature);
        write_json(&path, record)?;
        debug!(
            feature = %record.result.feature,
            variant = %record.result.variant,
            "checkpointed permutation result"
        );
        Ok(())
    }

    pub fn write_summary(&self, results: &[EnrichmentResult]) -> Result<PathBuf> {
        let path = self.root.join(SUMMARY_FILE);
        write_json(&path, &results)?;
        Ok(path)
    }

    pub fn read_summary(&self) -> Result<Vec<EnrichmentResult>> {
        read_json(&self.root.join(SUMMARY_FILE))
    }
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let content = fs::read_to_string(path)
        .map_err(|e| AnalysisError::io(format!("failed to read {path:?}"), e))?;
    serde_json::from_str(&content)
        .map_err(|e| AnalysisError::serialization(format!("failed to parse {path:?}"), e))
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| AnalysisError::io(format!("failed to create {parent:?}"), e))?;
    }
    let content = serde_json::to_string(value)
        .map_err(|e| AnalysisError::serialization(format!("failed to encode {path:?}"), e))?;

    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, content)
        .map_err(|e| AnalysisError::io(format!("failed to write {tmp:?}"), e))?;
    fs::rename(&tmp, path).map_err(|e| AnalysisError::io(format!("failed to move {tmp:?}"), e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TestStatus;

    fn key() -> RecordKey {
        RecordKey {
            iterations: 3,
            seed: 42,
            k: 10,
            neighbours: NeighbourMode::CrossFamily,
            exclude_macro_areas: vec!["Africa".to_string()],
            symbols: vec!["y".to_string()],
            sample_fingerprint: 0x5EED,
        }
    }

    fn record(feature: &str) -> NullRecord {
        NullRecord {
            key: key(),
            result: EnrichmentResult {
                feature: feature.to_string(),
                variant: "cross_family".to_string(),
                status: TestStatus::Tested,
                languages_present: 61,
                languages_total: 2000,
                families_present: 17,
                observed_statistic: Some(0.123_456_789_012_345_67),
                empirical_quantile: Some(0.9871),
                logit_quantile: Some(4.3322),
                iterations: 3,
                seed: 42,
                k: 10,
                neighbours: NeighbourMode::CrossFamily,
            },
            null_distribution: vec![0.1, 1.0 / 3.0, std::f64::consts::PI / 10.0],
        }
    }

    #[test]
    fn test_file_key() {
        assert_eq!(file_key("full"), "full");
        assert_eq!(file_key("front_rounded"), "front_rounded");
        assert_eq!(file_key("ø"), "~f8");
        assert_eq!(file_key("a/b"), "a~2fb");
    }

    #[test]
    fn test_record_roundtrip_is_exact() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ResultCache::open(dir.path()).unwrap();
        let original = record("ø");

        cache.store(&original).unwrap();
        let loaded = cache.load("cross_family", "ø").unwrap().unwrap();

        assert_eq!(loaded, original);
        for (a, b) in loaded.null_distribution.iter().zip(&original.null_distribution) {
            assert_eq!(a.to_bits(), b.to_bits());
        }
        assert!(cache.load("cross_family", "y").unwrap().is_none());
    }

    #[test]
    fn test_summary_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ResultCache::open(dir.path()).unwrap();
        let rows = vec![record("y").result, record("ø").result];

        cache.write_summary(&rows).unwrap();
        assert_eq!(cache.read_summary().unwrap(), rows);
    }

    #[test]
    fn test_matches_requires_every_key_field() {
        let rec = record("y");
        assert!(rec.matches(&key()));

        let changed = [
            RecordKey { seed: 43, ..key() },
            RecordKey { k: 8, ..key() },
            RecordKey {
                neighbours: NeighbourMode::Unrestricted,
                ..key()
            },
            RecordKey {
                exclude_macro_areas: Vec::new(),
                ..key()
            },
            RecordKey {
                symbols: vec!["y".to_string(), "ʏ".to_string()],
                ..key()
            },
            RecordKey {
                sample_fingerprint: 0xBEEF,
                ..key()
            },
        ];
        for other in &changed {
            assert!(!rec.matches(other));
        }
    }
}
