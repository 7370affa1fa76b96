//! Presence/absence tables for a single feature.

use std::hash::{BuildHasher, Hash, Hasher};

use ahash::{AHashMap, AHashSet, RandomState};
use serde::{Deserialize, Serialize};

use crate::error::{AnalysisError, Result};
use crate::neighbours::family_blocks;
use crate::phoneme::{FeatureSpec, SegmentFilter};
use crate::sample::Sample;
use crate::types::GeoPoint;

const FINGERPRINT_SEEDS: [u64; 4] = [
    0x243F_6A88_85A3_08D3,
    0x1319_8A2E_0370_7344,
    0xA409_3822_299F_31D0,
    0x082E_FA98_EC4E_6C89,
];

/// Presence of one feature in one language, with denormalised metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureObservation {
    pub sample_id: String,
    pub feature_id: String,
    pub present: bool,
    pub family: String,
    pub location: GeoPoint,
}

/// One observation per language of the working sample, in sample order
#[derive(Debug, Clone)]
pub struct FeatureTable {
    feature: String,
    observations: Vec<FeatureObservation>,
    presence: Vec<bool>,
    blocks: Vec<usize>,
    block_count: usize,
}

impl FeatureTable {
    pub fn from_sample(sample: &Sample, spec: &FeatureSpec) -> Self {
        let observations = sample
            .records()
            .iter()
            .map(|record| FeatureObservation {
                sample_id: record.sample_id.clone(),
                feature_id: spec.id.clone(),
                present: record.has_any(&spec.symbols),
                family: record.family.clone(),
                location: record.location,
            })
            .collect();
        Self::assemble(spec.id.clone(), observations)
    }

    pub fn new(feature: impl Into<String>, observations: Vec<FeatureObservation>) -> Result<Self> {
        let feature = feature.into();
        let mut seen: AHashSet<&str> = AHashSet::with_capacity(observations.len());
        let mut problems = Vec::new();
        for obs in &observations {
            if obs.feature_id != feature {
                problems.push(format!("{} ({})", obs.sample_id, obs.feature_id));
            }
            if !seen.insert(obs.sample_id.as_str()) {
                problems.push(obs.sample_id.clone());
            }
        }
        if !problems.is_empty() {
            return Err(AnalysisError::structural(
                format!("feature table for '{feature}' needs one observation per language"),
                problems,
            ));
        }
        Ok(Self::assemble(feature, observations))
    }

    fn assemble(feature: String, observations: Vec<FeatureObservation>) -> Self {
        let presence = observations.iter().map(|o| o.present).collect();
        let families: Vec<String> = observations.iter().map(|o| o.family.clone()).collect();
        let (blocks, block_count) = family_blocks(&families);
        Self {
            feature,
            observations,
            presence,
            blocks,
            block_count,
        }
    }

    pub fn feature(&self) -> &str {
        &self.feature
    }

    pub fn observations(&self) -> &[FeatureObservation] {
        &self.observations
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    pub fn presence(&self) -> &[bool] {
        &self.presence
    }

    /// Dense family block id per language
    pub fn blocks(&self) -> &[usize] {
        &self.blocks
    }

    pub fn block_count(&self) -> usize {
        self.block_count
    }

    pub fn present_count(&self) -> usize {
        self.presence.iter().filter(|&&p| p).count()
    }

    /// Number of families with at least one language carrying the feature
    pub fn families_present(&self) -> usize {
        let mut seen = vec![false; self.block_count];
        for (&block, &present) in self.blocks.iter().zip(&self.presence) {
            if present {
                seen[block] = true;
            }
        }
        seen.into_iter().filter(|&s| s).count()
    }

    /// No language, or every language, carries the feature
    pub fn is_degenerate(&self) -> bool {
        let present = self.present_count();
        present == 0 || present == self.len()
    }

    /// Hash of language order, families, coordinates and presence flags.
    ///
    /// Fixed seeds keep it stable between runs of the same build, so a
    /// checkpoint can be matched against the data it was computed from.
    pub fn fingerprint(&self) -> u64 {
        let [a, b, c, d] = FINGERPRINT_SEEDS;
        let mut hasher = RandomState::with_seeds(a, b, c, d).build_hasher();
        for obs in &self.observations {
            obs.sample_id.hash(&mut hasher);
            obs.family.hash(&mut hasher);
            obs.location.latitude.to_bits().hash(&mut hasher);
            obs.location.longitude.to_bits().hash(&mut hasher);
            obs.present.hash(&mut hasher);
        }
        hasher.finish()
    }

    /// Fail unless the table rows line up with `ids` position by position
    pub fn check_alignment(&self, ids: &[String]) -> Result<()> {
        if ids.len() != self.len() {
            return Err(AnalysisError::structural(
                format!(
                    "feature table for '{}' has {} rows but the neighbour index has {}",
                    self.feature,
                    self.len(),
                    ids.len()
                ),
                Vec::<String>::new(),
            ));
        }
        let mismatched: Vec<String> = self
            .observations
            .iter()
            .zip(ids)
            .filter(|(obs, id)| &obs.sample_id != *id)
            .take(10)
            .map(|(obs, id)| format!("{} != {}", obs.sample_id, id))
            .collect();
        if mismatched.is_empty() {
            Ok(())
        } else {
            Err(AnalysisError::structural(
                "feature table and neighbour index disagree on language order",
                mismatched,
            ))
        }
    }
}

/// Every segment accepted by `filter` that occurs in at least `min_languages`
/// languages, most frequent first
pub fn candidate_features(
    sample: &Sample,
    filter: SegmentFilter,
    min_languages: usize,
) -> Vec<(FeatureSpec, usize)> {
    let mut counts: AHashMap<&str, usize> = AHashMap::new();
    for record in sample.records() {
        for symbol in &record.inventory {
            *counts.entry(symbol.as_str()).or_insert(0) += 1;
        }
    }

    let mut candidates: Vec<(FeatureSpec, usize)> = counts
        .into_iter()
        .filter(|&(symbol, count)| count >= min_languages && filter.accepts(symbol))
        .map(|(symbol, count)| (FeatureSpec::single(symbol), count))
        .collect();
    candidates.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.id.cmp(&b.0.id)));
    candidates
}
