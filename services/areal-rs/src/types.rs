//! Shared data structures for the areal clustering engine.

use ahash::AHashSet;
use serde::{Deserialize, Serialize};

/// One row of the language inventory table: a single phoneme of one sample
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryRow {
    pub sample_id: String,
    pub language_code: String,
    #[serde(default)]
    pub family_id: Option<String>,
    pub language_name: String,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(alias = "phoneme_symbol")]
    pub phoneme: String,
    /// "language" or "dialect"; carried through but not interpreted
    #[serde(default)]
    pub level: Option<String>,
}

/// Decimal-degree coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

/// One sampled language with its normalised phoneme inventory
#[derive(Debug, Clone)]
pub struct LanguageRecord {
    pub sample_id: String,
    pub language_code: String,
    pub name: String,
    /// Grouping label: the family id, or the language name for isolates
    pub family: String,
    pub family_id: Option<String>,
    pub level: Option<String>,
    pub location: GeoPoint,
    pub macro_area: Option<String>,
    pub inventory: AHashSet<String>,
}

impl LanguageRecord {
    pub fn has_any(&self, symbols: &[String]) -> bool {
        symbols.iter().any(|s| self.inventory.contains(s))
    }
}

/// How neighbours are chosen for each language
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NeighbourMode {
    /// The k nearest languages of any family
    Unrestricted,
    /// The k nearest languages outside the query language's family
    CrossFamily,
}

impl std::fmt::Display for NeighbourMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NeighbourMode::Unrestricted => write!(f, "unrestricted"),
            NeighbourMode::CrossFamily => write!(f, "cross_family"),
        }
    }
}

/// Outcome of attempting a permutation test on one feature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestStatus {
    Tested,
    /// Fewer languages carry the feature than the configured minimum
    BelowThreshold,
    /// No language, or every language, carries the feature
    Degenerate,
}

/// One row of the summary table, keyed by (feature, variant)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentResult {
    pub feature: String,
    pub variant: String,
    pub status: TestStatus,
    pub languages_present: usize,
    pub languages_total: usize,
    pub families_present: usize,
    pub observed_statistic: Option<f64>,
    pub empirical_quantile: Option<f64>,
    pub logit_quantile: Option<f64>,
    pub iterations: usize,
    pub seed: u64,
    /// Neighbours per language
    pub k: usize,
    pub neighbours: NeighbourMode,
}

impl EnrichmentResult {
    pub fn is_tested(&self) -> bool {
        self.status == TestStatus::Tested
    }
}

/// Sort tested rows by logit quantile, most clustered first; untested rows last
pub fn rank_by_logit(results: &mut [EnrichmentResult]) {
    results.sort_by(|a, b| {
        let key_a = a.logit_quantile.filter(|_| a.is_tested());
        let key_b = b.logit_quantile.filter(|_| b.is_tested());
        match (key_a, key_b) {
            (Some(x), Some(y)) => y.total_cmp(&x),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => std::cmp::Ordering::Equal,
        }
        .then_with(|| a.variant.cmp(&b.variant))
        .then_with(|| a.feature.cmp(&b.feature))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(feature: &str, status: TestStatus, logit: Option<f64>) -> EnrichmentResult {
        EnrichmentResult {
            feature: feature.to_string(),
            variant: "full".to_string(),
            status,
            languages_present: 0,
            languages_total: 0,
            families_present: 0,
            observed_statistic: None,
            empirical_quantile: None,
            logit_quantile: logit,
            iterations: 0,
            seed: 0,
            k: 10,
            neighbours: NeighbourMode::Unrestricted,
        }
    }

    #[test]
    fn test_rank_by_logit() {
        let mut rows = vec![
            row("a", TestStatus::Tested, Some(0.5)),
            row("b", TestStatus::Degenerate, None),
            row("c", TestStatus::Tested, Some(3.0)),
            row("d", TestStatus::Tested, Some(-1.0)),
        ];
        rank_by_logit(&mut rows);
        let order: Vec<&str> = rows.iter().map(|r| r.feature.as_str()).collect();
        assert_eq!(order, vec!["c", "a", "d", "b"]);
    }

    #[test]
    fn test_geo_point_validity() {
        assert!(GeoPoint::new(47.5, 8.5).is_valid());
        assert!(!GeoPoint::new(f64::NAN, 8.5).is_valid());
        assert!(!GeoPoint::new(91.0, 0.0).is_valid());
    }
}
