//! Family-stratified Monte Carlo permutation test.
//!
//! Each iteration shuffles the presence vector within every family block,
//! which keeps the number of feature-carrying languages per family fixed,
//! and re-evaluates the enrichment statistic. Iteration `i` draws from its
//! own generator seeded from `(seed, i)` and writes only its own slot, so
//! the null distribution is identical however rayon schedules the work.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::enrichment::EnrichmentKernel;
use crate::error::{AnalysisError, Result};

pub const DEFAULT_ITERATIONS: usize = 10_000;

/// Iteration count and seed of a permutation run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermutationConfig {
    pub iterations: usize,
    pub seed: u64,
}

impl Default for PermutationConfig {
    fn default() -> Self {
        Self {
            iterations: DEFAULT_ITERATIONS,
            seed: 1234,
        }
    }
}

fn splitmix64(mut z: u64) -> u64 {
    z = z.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Generator for one iteration of a seeded run
pub fn iteration_rng(seed: u64, iteration: usize) -> StdRng {
    StdRng::seed_from_u64(splitmix64(seed ^ splitmix64(iteration as u64)))
}

/// Shuffles presence values within family blocks.
///
/// Blocks whose members all agree are left out, since shuffling them can
/// not change anything.
#[derive(Debug, Clone)]
pub struct StratifiedPermuter {
    active_blocks: Vec<Vec<usize>>,
}

impl StratifiedPermuter {
    pub fn new(blocks: &[usize], block_count: usize, presence: &[bool]) -> Self {
        let mut members: Vec<Vec<usize>> = vec![Vec::new(); block_count];
        for (i, &block) in blocks.iter().enumerate() {
            members[block].push(i);
        }

        let active_blocks = members
            .into_iter()
            .filter(|m| {
                let present = m.iter().filter(|&&i| presence[i]).count();
                present > 0 && present < m.len()
            })
            .collect();

        Self { active_blocks }
    }

    /// Number of families whose assignment can change
    pub fn active_blocks(&self) -> usize {
        self.active_blocks.len()
    }

    /// Write a block-wise permutation of `original` into `out`.
    ///
    /// `out` must start as a copy of `original`; only members of active
    /// blocks are rewritten, each from the original values, so successive
    /// calls do not depend on one another. `values` is scratch space.
    pub fn permute_into<R: Rng + ?Sized>(
        &self,
        original: &[bool],
        out: &mut [bool],
        values: &mut Vec<bool>,
        rng: &mut R,
    ) {
        for members in &self.active_blocks {
            values.clear();
            values.extend(members.iter().map(|&i| original[i]));
            values.shuffle(rng);
            for (&i, &value) in members.iter().zip(values.iter()) {
                out[i] = value;
            }
        }
    }

    /// Convenience wrapper returning a fresh permuted vector
    pub fn permute<R: Rng + ?Sized>(&self, original: &[bool], rng: &mut R) -> Vec<bool> {
        let mut out = original.to_vec();
        let mut values = Vec::new();
        self.permute_into(original, &mut out, &mut values, rng);
        out
    }
}

/// Statistics of the permuted data, in iteration order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NullDistribution {
    samples: Vec<f64>,
}

impl NullDistribution {
    pub fn new(samples: Vec<f64>) -> Self {
        Self { samples }
    }

    pub fn samples(&self) -> &[f64] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn into_samples(self) -> Vec<f64> {
        self.samples
    }

    /// Fraction of null samples at or below `observed`
    pub fn quantile_of(&self, observed: f64) -> Option<f64> {
        empirical_quantile(observed, &self.samples)
    }

    /// Bit-for-bit equality, treating NaN payloads as values
    pub fn bit_identical(&self, other: &NullDistribution) -> bool {
        self.samples.len() == other.samples.len()
            && self
                .samples
                .iter()
                .zip(&other.samples)
                .all(|(a, b)| a.to_bits() == b.to_bits())
    }
}

/// Fraction of `null` values less than or equal to `observed`
pub fn empirical_quantile(observed: f64, null: &[f64]) -> Option<f64> {
    if null.is_empty() {
        return None;
    }
    let at_or_below = null.iter().filter(|&&x| x <= observed).count();
    Some(at_or_below as f64 / null.len() as f64)
}

/// Log-odds of a quantile estimated from `iterations` samples.
///
/// The quantile is clamped to `[1/(2N), 1 - 1/(2N)]` first so that the
/// extremes map to finite values.
pub fn logit_quantile(quantile: f64, iterations: usize) -> f64 {
    let floor = 1.0 / (2.0 * iterations.max(1) as f64);
    let q = quantile.clamp(floor, 1.0 - floor);
    (q / (1.0 - q)).ln()
}

/// Observed statistic and its position in the permutation null
#[derive(Debug, Clone)]
pub struct PermutationOutcome {
    pub observed: f64,
    pub null: NullDistribution,
    pub empirical_quantile: f64,
    pub logit_quantile: f64,
}

/// Run the stratified permutation test for one presence vector.
///
/// Returns `Ok(None)` when the observed statistic is undefined.
pub fn run_permutation_test(
    kernel: &EnrichmentKernel,
    presence: &[bool],
    config: &PermutationConfig,
) -> Result<Option<PermutationOutcome>> {
    if presence.len() != kernel.len() {
        return Err(AnalysisError::structural(
            format!(
                "presence vector has {} entries but the kernel covers {} languages",
                presence.len(),
                kernel.len()
            ),
            Vec::<String>::new(),
        ));
    }
    if config.iterations == 0 {
        return Err(AnalysisError::config_field(
            "iterations must be at least 1",
            "iterations",
        ));
    }

    let observed = match kernel.statistic(presence) {
        Some(value) => value,
        None => return Ok(None),
    };

    let null = null_distribution(kernel, presence, config);
    let empirical_quantile = null.quantile_of(observed).unwrap_or(0.0);
    let logit_quantile = logit_quantile(empirical_quantile, config.iterations);

    Ok(Some(PermutationOutcome {
        observed,
        null,
        empirical_quantile,
        logit_quantile,
    }))
}

/// Enrichment statistic of `config.iterations` block-wise permutations
pub fn null_distribution(
    kernel: &EnrichmentKernel,
    presence: &[bool],
    config: &PermutationConfig,
) -> NullDistribution {
    let permuter = StratifiedPermuter::new(kernel.blocks(), kernel.block_count(), presence);
    debug!(
        iterations = config.iterations,
        active_families = permuter.active_blocks(),
        "running stratified permutations"
    );

    let samples: Vec<f64> = (0..config.iterations)
        .into_par_iter()
        .map_init(
            || (presence.to_vec(), Vec::new(), kernel.accumulator()),
            |(buffer, values, accumulator), iteration| {
                let mut rng = iteration_rng(config.seed, iteration);
                permuter.permute_into(presence, buffer, values, &mut rng);
                // Per-family counts are preserved, so a defined observed
                // statistic stays defined under permutation.
                kernel
                    .statistic_with(buffer, accumulator)
                    .unwrap_or(f64::NAN)
            },
        )
        .collect();

    NullDistribution::new(samples)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::DistanceMatrix;
    use crate::neighbours::NeighbourIndex;
    use crate::types::NeighbourMode;
    use ndarray::Array2;

    fn line_kernel(families: &[String], k: usize) -> EnrichmentKernel {
        let n = families.len();
        let ids = (0..n).map(|i| format!("l{i}")).collect();
        let distances = Array2::from_shape_fn((n, n), |(i, j)| (i as f64 - j as f64).abs());
        let matrix = DistanceMatrix::from_array(ids, distances).unwrap();
        let index = NeighbourIndex::build(&matrix, k, NeighbourMode::Unrestricted, families).unwrap();
        EnrichmentKernel::new(&index, families).unwrap()
    }

    fn families(n: usize, blocks: usize) -> Vec<String> {
        (0..n).map(|i| format!("f{}", i % blocks)).collect()
    }

    #[test]
    fn test_permutation_preserves_block_counts() {
        let families = families(40, 4);
        let kernel = line_kernel(&families, 3);
        let presence: Vec<bool> = (0..40).map(|i| i % 3 == 0).collect();
        let permuter = StratifiedPermuter::new(kernel.blocks(), kernel.block_count(), &presence);

        let count_per_block = |values: &[bool]| {
            let mut counts = vec![0; kernel.block_count()];
            for (i, &v) in values.iter().enumerate() {
                if v {
                    counts[kernel.blocks()[i]] += 1;
                }
            }
            counts
        };

        let expected = count_per_block(&presence);
        for iteration in 0..200 {
            let mut rng = iteration_rng(7, iteration);
            let permuted = permuter.permute(&presence, &mut rng);
            assert_eq!(count_per_block(&permuted), expected);
        }
    }

    #[test]
    fn test_permutation_moves_values() {
        let presence: Vec<bool> = (0..20).map(|i| i < 10).collect();
        let blocks = vec![0; 20];
        let permuter = StratifiedPermuter::new(&blocks, 1, &presence);
        let mut rng = iteration_rng(1, 0);
        let changed = (0..20).any(|_| permuter.permute(&presence, &mut rng) != presence);
        assert!(changed);
    }

    #[test]
    fn test_uniform_blocks_inactive() {
        let blocks = vec![0, 0, 1, 1, 2, 2];
        let presence = vec![true, true, false, false, true, false];
        let permuter = StratifiedPermuter::new(&blocks, 3, &presence);
        assert_eq!(permuter.active_blocks(), 1);
    }

    #[test]
    fn test_reproducible_with_same_seed() {
        let families = families(60, 5);
        let kernel = line_kernel(&families, 4);
        let presence: Vec<bool> = (0..60).map(|i| (i * 7) % 5 < 2).collect();
        let config = PermutationConfig {
            iterations: 500,
            seed: 99,
        };

        let first = null_distribution(&kernel, &presence, &config);
        let second = null_distribution(&kernel, &presence, &config);
        assert!(first.bit_identical(&second));

        let other = null_distribution(
            &kernel,
            &presence,
            &PermutationConfig {
                iterations: 500,
                seed: 100,
            },
        );
        assert!(!first.bit_identical(&other));
    }

    #[test]
    fn test_quantile_monotone_in_observed() {
        let null: Vec<f64> = (0..100).map(|i| (i as f64) / 100.0).collect();
        let mut previous = 0.0;
        for step in 0..=120 {
            let observed = step as f64 / 100.0 - 0.1;
            let q = empirical_quantile(observed, &null).unwrap();
            assert!(q >= previous);
            assert!((0.0..=1.0).contains(&q));
            previous = q;
        }
        assert_eq!(empirical_quantile(0.5, &[]), None);
    }

    #[test]
    fn test_logit_is_finite_at_extremes() {
        assert!(logit_quantile(1.0, 10_000).is_finite());
        assert!(logit_quantile(0.0, 10_000).is_finite());
        assert!(logit_quantile(1.0, 10_000) > 9.0);
        assert_eq!(logit_quantile(0.5, 10_000), 0.0);
    }

    #[test]
    fn test_undefined_statistic_skips_test() {
        let families = families(10, 2);
        let kernel = line_kernel(&families, 2);
        let outcome = run_permutation_test(&kernel, &[false; 10], &PermutationConfig::default())
            .unwrap();
        assert!(outcome.is_none());
    }
}
