//! Batch runner over features and dataset variants.
//!
//! Distance matrices are computed once per distinct language subset and
//! neighbour indices once per variant; both are shared read-only by every
//! feature test of that variant. Features within a variant run in parallel.

use std::sync::Arc;

use ahash::AHashMap;
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::cache::{NullRecord, RecordKey, ResultCache};
use crate::config::{AnalysisConfig, VariantSpec};
use crate::enrichment::EnrichmentKernel;
use crate::error::{AnalysisError, Result};
use crate::features::{candidate_features, FeatureTable};
use crate::geo::DistanceMatrix;
use crate::neighbours::NeighbourIndex;
use crate::permutation::{
    null_distribution, run_permutation_test, NullDistribution, PermutationConfig,
};
use crate::phoneme::FeatureSpec;
use crate::sample::Sample;
use crate::types::{rank_by_logit, EnrichmentResult, TestStatus};

/// Everything a variant's feature tests share
#[derive(Debug, Clone)]
pub struct PreparedVariant {
    pub spec: VariantSpec,
    pub sample: Arc<Sample>,
    pub matrix: Arc<DistanceMatrix>,
    pub index: NeighbourIndex,
    pub kernel: EnrichmentKernel,
}

impl PreparedVariant {
    pub fn prepare(
        spec: &VariantSpec,
        sample: Arc<Sample>,
        matrix: Arc<DistanceMatrix>,
        k: usize,
    ) -> Result<Self> {
        let families = sample.families();
        let index = NeighbourIndex::build(&matrix, k, spec.neighbours, &families)?;
        let kernel = EnrichmentKernel::new(&index, &families)?;
        Ok(Self {
            spec: spec.clone(),
            sample,
            matrix,
            index,
            kernel,
        })
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    /// Checkpoint key for testing `feature` on this variant
    pub fn record_key(
        &self,
        feature: &FeatureSpec,
        table: &FeatureTable,
        permutation: &PermutationConfig,
    ) -> RecordKey {
        let mut symbols = feature.symbols.clone();
        symbols.sort();
        RecordKey {
            iterations: permutation.iterations,
            seed: permutation.seed,
            k: self.index.k(),
            neighbours: self.spec.neighbours,
            exclude_macro_areas: self.spec.sample_key(),
            symbols,
            sample_fingerprint: table.fingerprint(),
        }
    }
}

/// Build every configured variant, sharing distance matrices between
/// variants that keep the same languages
pub fn prepare_variants(
    sample: &Sample,
    variants: &[VariantSpec],
    k: usize,
) -> Result<Vec<PreparedVariant>> {
    let known_areas = sample.macro_areas();
    let mut subsets: AHashMap<Vec<String>, (Arc<Sample>, Arc<DistanceMatrix>)> = AHashMap::new();
    let mut prepared = Vec::with_capacity(variants.len());

    for spec in variants {
        let unknown: Vec<&String> = spec
            .exclude_macro_areas
            .iter()
            .filter(|area| !known_areas.contains(*area))
            .collect();
        if !unknown.is_empty() {
            warn!(variant = %spec.name, areas = ?unknown, "excluded macro-areas not present in sample");
        }

        let key = spec.sample_key();
        let (subset, matrix) = match subsets.get(&key) {
            Some((subset, matrix)) => (Arc::clone(subset), Arc::clone(matrix)),
            None => {
                let subset = Arc::new(sample.excluding_macro_areas(&key));
                if subset.is_empty() {
                    return Err(AnalysisError::structural(
                        format!("variant '{}' excludes every language", spec.name),
                        key.clone(),
                    ));
                }
                let matrix = Arc::new(DistanceMatrix::from_records(subset.records())?);
                subsets.insert(key, (Arc::clone(&subset), Arc::clone(&matrix)));
                (subset, matrix)
            }
        };

        info!(
            variant = %spec.name,
            languages = subset.len(),
            neighbours = %spec.neighbours,
            "prepared variant"
        );
        prepared.push(PreparedVariant::prepare(spec, subset, matrix, k)?);
    }

    Ok(prepared)
}

/// Test one feature on one prepared variant.
///
/// Degenerate and rare features produce a result row without running any
/// permutations; the null distribution is returned only for tested rows.
pub fn test_feature(
    variant: &PreparedVariant,
    feature: &FeatureSpec,
    permutation: &PermutationConfig,
    min_languages: usize,
) -> Result<(EnrichmentResult, Option<Vec<f64>>)> {
    let table = FeatureTable::from_sample(&variant.sample, feature);
    table.check_alignment(variant.kernel.ids())?;

    let mut result = EnrichmentResult {
        feature: feature.id.clone(),
        variant: variant.spec.name.clone(),
        status: TestStatus::Tested,
        languages_present: table.present_count(),
        languages_total: table.len(),
        families_present: table.families_present(),
        observed_statistic: None,
        empirical_quantile: None,
        logit_quantile: None,
        iterations: permutation.iterations,
        seed: permutation.seed,
        k: variant.index.k(),
        neighbours: variant.spec.neighbours,
    };

    if table.is_degenerate() {
        warn!(
            feature = %feature.id,
            variant = %variant.spec.name,
            present = result.languages_present,
            total = result.languages_total,
            "feature present in no language or in every language; not tested"
        );
        result.status = TestStatus::Degenerate;
        return Ok((result, None));
    }
    if result.languages_present < min_languages {
        result.status = TestStatus::BelowThreshold;
        return Ok((result, None));
    }

    match run_permutation_test(&variant.kernel, table.presence(), permutation)? {
        Some(outcome) => {
            result.observed_statistic = Some(outcome.observed);
            result.empirical_quantile = Some(outcome.empirical_quantile);
            result.logit_quantile = Some(outcome.logit_quantile);
            Ok((result, Some(outcome.null.into_samples())))
        }
        None => {
            result.status = TestStatus::Degenerate;
            Ok((result, None))
        }
    }
}

/// Summary rows plus the null distributions of the tested rows
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub results: Vec<EnrichmentResult>,
    pub nulls: Vec<NullRecord>,
}

impl BatchReport {
    pub fn tested(&self) -> impl Iterator<Item = &EnrichmentResult> {
        self.results.iter().filter(|r| r.is_tested())
    }

    pub fn get(&self, variant: &str, feature: &str) -> Option<&EnrichmentResult> {
        self.results
            .iter()
            .find(|r| r.variant == variant && r.feature == feature)
    }
}

pub struct BatchRunner {
    config: AnalysisConfig,
    cache: Option<ResultCache>,
}

impl BatchRunner {
    pub fn new(config: AnalysisConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            cache: None,
        })
    }

    /// Checkpoint finished tests to `cache` and skip tests already there
    pub fn with_cache(mut self, cache: ResultCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Features to test: the configured list, or every segment of the full
    /// sample that reaches the threshold, plus configured classes
    pub fn features(&self, sample: &Sample) -> Result<Vec<FeatureSpec>> {
        let mut specs = self.config.feature_specs()?;
        if self.config.features.is_empty() {
            let discovered = candidate_features(
                sample,
                self.config.segments,
                self.config.min_languages,
            );
            specs.splice(0..0, discovered.into_iter().map(|(spec, _)| spec));
        }
        Ok(specs)
    }

    pub fn run(&self, sample: &Sample) -> Result<BatchReport> {
        let features = self.features(sample)?;
        let variants = prepare_variants(sample, &self.config.variants, self.config.k)?;
        let permutation = self.config.permutation();
        info!(
            features = features.len(),
            variants = variants.len(),
            iterations = permutation.iterations,
            "starting batch"
        );

        let mut report = BatchReport::default();
        for variant in &variants {
            let records: Vec<NullRecord> = features
                .par_iter()
                .map(|feature| self.run_one(variant, feature, &permutation))
                .collect::<Result<_>>()?;

            let tested = records.iter().filter(|r| r.result.is_tested()).count();
            info!(variant = %variant.name(), tested, total = records.len(), "variant finished");

            for record in records {
                report.results.push(record.result.clone());
                if record.result.is_tested() {
                    report.nulls.push(record);
                }
            }
        }

        rank_by_logit(&mut report.results);
        if let Some(cache) = &self.cache {
            let path = cache.write_summary(&report.results)?;
            info!(path = %path.display(), "wrote summary");
        }
        Ok(report)
    }

    fn run_one(
        &self,
        variant: &PreparedVariant,
        feature: &FeatureSpec,
        permutation: &PermutationConfig,
    ) -> Result<NullRecord> {
        let table = FeatureTable::from_sample(&variant.sample, feature);
        let key = variant.record_key(feature, &table, permutation);
        if let Some(cache) = &self.cache {
            if let Some(record) = cache.load(variant.name(), &feature.id)? {
                // Untested rows are cheap and depend on min_languages
                if record.matches(&key) && record.result.is_tested() {
                    return Ok(record);
                }
                debug!(
                    feature = %feature.id,
                    variant = %variant.name(),
                    "checkpoint computed under other settings; recomputing"
                );
            }
        }

        let (result, null) =
            test_feature(variant, feature, permutation, self.config.min_languages)?;

        if self.config.verify_reproducibility {
            if let Some(samples) = &null {
                let rerun = null_distribution(&variant.kernel, table.presence(), permutation);
                if !rerun.bit_identical(&NullDistribution::new(samples.clone())) {
                    return Err(AnalysisError::NonReproducible {
                        feature: feature.id.clone(),
                        variant: variant.name().to_string(),
                    });
                }
            }
        }

        let record = NullRecord {
            key,
            result,
            null_distribution: null.unwrap_or_default(),
        };
        if let Some(cache) = &self.cache {
            cache.store(&record)?;
        }
        Ok(record)
    }
}
