//! Analysis configuration, loadable from a TOML file.

use std::path::Path;

use ahash::AHashSet;
use serde::{Deserialize, Serialize};

use crate::error::{AnalysisError, Result};
use crate::permutation::{PermutationConfig, DEFAULT_ITERATIONS};
use crate::phoneme::{FeatureSpec, SegmentFilter};
use crate::types::NeighbourMode;

pub const DEFAULT_K: usize = 10;
pub const DEFAULT_MIN_LANGUAGES: usize = 50;
pub const DEFAULT_SEED: u64 = 1234;

/// One dataset variant: which languages are kept and how neighbours are chosen
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantSpec {
    pub name: String,
    #[serde(default = "default_neighbour_mode")]
    pub neighbours: NeighbourMode,
    #[serde(default)]
    pub exclude_macro_areas: Vec<String>,
}

fn default_neighbour_mode() -> NeighbourMode {
    NeighbourMode::Unrestricted
}

impl VariantSpec {
    pub fn new(name: impl Into<String>, neighbours: NeighbourMode) -> Self {
        Self {
            name: name.into(),
            neighbours,
            exclude_macro_areas: Vec::new(),
        }
    }

    pub fn excluding(mut self, macro_areas: &[&str]) -> Self {
        self.exclude_macro_areas = macro_areas.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Canonical key for the language subset this variant uses
    pub fn sample_key(&self) -> Vec<String> {
        let mut key = self.exclude_macro_areas.clone();
        key.sort();
        key.dedup();
        key
    }
}

/// The full sample (unrestricted and cross-family) and the sample without Africa
pub fn default_variants() -> Vec<VariantSpec> {
    vec![
        VariantSpec::new("full", NeighbourMode::Unrestricted),
        VariantSpec::new("cross_family", NeighbourMode::CrossFamily),
        VariantSpec::new("no_africa", NeighbourMode::Unrestricted).excluding(&["Africa"]),
    ]
}

/// A named group of phonemes tested as a single feature
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassSpec {
    pub id: String,
    pub symbols: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Neighbours per language
    pub k: usize,
    /// Permutations per test
    pub iterations: usize,
    /// Minimum number of languages carrying a feature for it to be tested
    pub min_languages: usize,
    pub seed: u64,
    /// Segments considered when features are discovered automatically
    pub segments: SegmentFilter,
    /// Explicit feature list; empty means discover from the sample
    pub features: Vec<String>,
    pub classes: Vec<ClassSpec>,
    pub variants: Vec<VariantSpec>,
    /// Re-run each test and fail if the null distribution differs
    pub verify_reproducibility: bool,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            k: DEFAULT_K,
            iterations: DEFAULT_ITERATIONS,
            min_languages: DEFAULT_MIN_LANGUAGES,
            seed: DEFAULT_SEED,
            segments: SegmentFilter::default(),
            features: Vec::new(),
            classes: Vec::new(),
            variants: default_variants(),
            verify_reproducibility: false,
        }
    }
}

impl AnalysisConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AnalysisError::io(format!("failed to read config file {path:?}"), e))?;
        let config: Self = toml::from_str(&content).map_err(|e| {
            AnalysisError::config(format!("failed to parse config file {path:?}: {e}"))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.k == 0 {
            return Err(AnalysisError::config_field("k must be at least 1", "k"));
        }
        if self.iterations == 0 {
            return Err(AnalysisError::config_field(
                "iterations must be at least 1",
                "iterations",
            ));
        }
        if self.variants.is_empty() {
            return Err(AnalysisError::config_field(
                "at least one variant is required",
                "variants",
            ));
        }

        let mut names = AHashSet::new();
        for variant in &self.variants {
            if variant.name.trim().is_empty() || !names.insert(variant.name.as_str()) {
                return Err(AnalysisError::config_field(
                    format!("variant name '{}' is empty or repeated", variant.name),
                    "variants",
                ));
            }
        }

        self.feature_specs().map(|_| ())
    }

    pub fn permutation(&self) -> PermutationConfig {
        PermutationConfig {
            iterations: self.iterations,
            seed: self.seed,
        }
    }

    /// Explicit features followed by classes; empty if features are discovered
    pub fn feature_specs(&self) -> Result<Vec<FeatureSpec>> {
        let mut specs: Vec<FeatureSpec> = self
            .features
            .iter()
            .map(|symbol| FeatureSpec::single(symbol))
            .filter(|spec| !spec.id.is_empty())
            .collect();
        for class in &self.classes {
            specs.push(FeatureSpec::class(class.id.clone(), &class.symbols)?);
        }

        let mut ids = AHashSet::new();
        for spec in &specs {
            if !ids.insert(spec.id.as_str()) {
                return Err(AnalysisError::config_field(
                    format!("feature '{}' is listed twice", spec.id),
                    "features",
                ));
            }
        }
        Ok(specs)
    }

    pub fn variant(&self, name: &str) -> Option<&VariantSpec> {
        self.variants.iter().find(|v| v.name == name)
    }
}
