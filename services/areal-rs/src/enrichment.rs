//! Local neighbourhood enrichment statistic.
//!
//! For every language carrying the feature, the local proportion is the
//! share of its neighbours that also carry it. Local proportions are
//! averaged within each family, then the family means are averaged with
//! equal weight, so large feature-rich families count once.

use crate::error::{AnalysisError, Result};
use crate::features::FeatureTable;
use crate::neighbours::{family_blocks, NeighbourIndex};

/// Neighbour lists and family blocks flattened for repeated evaluation
#[derive(Debug, Clone)]
pub struct EnrichmentKernel {
    ids: Vec<String>,
    offsets: Vec<usize>,
    neighbours: Vec<u32>,
    blocks: Vec<usize>,
    block_count: usize,
}

/// Per-family running sums, reused across evaluations
#[derive(Debug, Clone)]
pub struct FamilyAccumulator {
    sums: Vec<f64>,
    counts: Vec<u32>,
}

impl FamilyAccumulator {
    fn reset(&mut self) {
        self.sums.iter_mut().for_each(|s| *s = 0.0);
        self.counts.iter_mut().for_each(|c| *c = 0);
    }
}

impl EnrichmentKernel {
    /// `families` is parallel to the index rows
    pub fn new(index: &NeighbourIndex, families: &[String]) -> Result<Self> {
        if families.len() != index.len() {
            return Err(AnalysisError::structural(
                format!(
                    "{} family labels for a {}-language neighbour index",
                    families.len(),
                    index.len()
                ),
                Vec::<String>::new(),
            ));
        }

        let mut offsets = Vec::with_capacity(index.len() + 1);
        let mut neighbours = Vec::with_capacity(index.len() * index.k());
        offsets.push(0);
        for i in 0..index.len() {
            neighbours.extend(index.neighbours(i).iter().map(|&j| j as u32));
            offsets.push(neighbours.len());
        }

        let (blocks, block_count) = family_blocks(families);
        Ok(Self {
            ids: index.ids().to_vec(),
            offsets,
            neighbours,
            blocks,
            block_count,
        })
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn blocks(&self) -> &[usize] {
        &self.blocks
    }

    pub fn block_count(&self) -> usize {
        self.block_count
    }

    pub fn accumulator(&self) -> FamilyAccumulator {
        FamilyAccumulator {
            sums: vec![0.0; self.block_count],
            counts: vec![0; self.block_count],
        }
    }

    fn neighbours_of(&self, i: usize) -> &[u32] {
        &self.neighbours[self.offsets[i]..self.offsets[i + 1]]
    }

    /// Share of language `i`'s neighbours where `presence` is true
    ///
    /// # Panics
    ///
    /// Panics if `i` or a neighbour position is out of bounds for `presence`.
    pub fn local_proportion(&self, i: usize, presence: &[bool]) -> Option<f64> {
        let neighbours = self.neighbours_of(i);
        if neighbours.is_empty() {
            return None;
        }
        let hits = neighbours
            .iter()
            .filter(|&&j| presence[j as usize])
            .count();
        Some(hits as f64 / neighbours.len() as f64)
    }

    /// Family-stratified mean local proportion, or `None` when no language
    /// with the feature has any neighbours (including when none has it).
    ///
    /// # Panics
    ///
    /// Panics if `presence` is shorter than the kernel. [`Self::evaluate`]
    /// and [`crate::permutation::run_permutation_test`] check the length and
    /// return a structural error instead.
    pub fn statistic(&self, presence: &[bool]) -> Option<f64> {
        let mut accumulator = self.accumulator();
        self.statistic_with(presence, &mut accumulator)
    }

    /// Allocation-free variant of [`Self::statistic`] for hot loops.
    ///
    /// # Panics
    ///
    /// Panics if `presence` does not cover every language of the kernel.
    pub fn statistic_with(
        &self,
        presence: &[bool],
        accumulator: &mut FamilyAccumulator,
    ) -> Option<f64> {
        assert_eq!(
            presence.len(),
            self.len(),
            "presence vector does not match the kernel"
        );
        accumulator.reset();

        for (i, _) in presence.iter().enumerate().filter(|(_, &p)| p) {
            if let Some(local) = self.local_proportion(i, presence) {
                let block = self.blocks[i];
                accumulator.sums[block] += local;
                accumulator.counts[block] += 1;
            }
        }

        let mut total = 0.0;
        let mut families = 0usize;
        for (&sum, &count) in accumulator.sums.iter().zip(&accumulator.counts) {
            if count > 0 {
                total += sum / count as f64;
                families += 1;
            }
        }

        if families == 0 {
            None
        } else {
            Some(total / families as f64)
        }
    }

    /// Statistic for a feature table, after checking it lines up with the index
    pub fn evaluate(&self, table: &FeatureTable) -> Result<Option<f64>> {
        table.check_alignment(&self.ids)?;
        Ok(self.statistic(table.presence()))
    }
}

/// One-shot statistic for a feature table and neighbour index
pub fn local_enrichment(table: &FeatureTable, index: &NeighbourIndex) -> Result<Option<f64>> {
    let families: Vec<String> = table
        .observations()
        .iter()
        .map(|o| o.family.clone())
        .collect();
    EnrichmentKernel::new(index, &families)?.evaluate(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::FeatureObservation;
    use crate::geo::DistanceMatrix;
    use crate::types::{GeoPoint, NeighbourMode};
    use approx::assert_abs_diff_eq;
    use ndarray::Array2;

    fn kernel(n: usize, k: usize, families: &[&str]) -> EnrichmentKernel {
        let ids = (0..n).map(|i| format!("l{i}")).collect();
        let distances = Array2::from_shape_fn((n, n), |(i, j)| (i as f64 - j as f64).abs());
        let matrix = DistanceMatrix::from_array(ids, distances).unwrap();
        let families: Vec<String> = families.iter().map(|f| f.to_string()).collect();
        let index =
            NeighbourIndex::build(&matrix, k, NeighbourMode::Unrestricted, &families).unwrap();
        EnrichmentKernel::new(&index, &families).unwrap()
    }

    #[test]
    fn test_undefined_without_presence() {
        let kernel = kernel(4, 2, &["a", "a", "b", "b"]);
        assert_eq!(kernel.statistic(&[false; 4]), None);
    }

    #[test]
    fn test_families_weighted_equally() {
        // line 0..6; neighbours with k = 1 are the adjacent language (left wins ties)
        let kernel = kernel(6, 1, &["a", "a", "a", "a", "b", "b"]);
        // family a: l0 -> l1 (present), l1 -> l0 (present): mean 1.0
        // family b: l5 -> l4 (absent): mean 0.0
        let presence = [true, true, false, false, false, true];
        let statistic = kernel.statistic(&presence).unwrap();
        assert_abs_diff_eq!(statistic, 0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_local_proportion_counts_absent_neighbours() {
        let kernel = kernel(5, 2, &["a"; 5]);
        let presence = [false, false, true, true, false];
        // l2's neighbours are l1 and l3
        assert_abs_diff_eq!(kernel.local_proportion(2, &presence).unwrap(), 0.5);
    }

    #[test]
    fn test_local_enrichment_from_table() {
        let n = 6;
        let ids: Vec<String> = (0..n).map(|i| format!("l{i}")).collect();
        let families = ["a", "a", "a", "a", "b", "b"];
        let presence = [true, true, false, false, false, true];
        let observations: Vec<FeatureObservation> = (0..n)
            .map(|i| FeatureObservation {
                sample_id: ids[i].clone(),
                feature_id: "y".to_string(),
                present: presence[i],
                family: families[i].to_string(),
                location: GeoPoint::new(0.0, i as f64),
            })
            .collect();
        let table = FeatureTable::new("y", observations).unwrap();

        let distances = Array2::from_shape_fn((n, n), |(i, j)| (i as f64 - j as f64).abs());
        let matrix = DistanceMatrix::from_array(ids, distances).unwrap();
        let labels: Vec<String> = families.iter().map(|f| f.to_string()).collect();
        let index =
            NeighbourIndex::build(&matrix, 1, NeighbourMode::Unrestricted, &labels).unwrap();

        let statistic = local_enrichment(&table, &index).unwrap().unwrap();
        assert_abs_diff_eq!(statistic, 0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_evaluate_rejects_misaligned_table() {
        let kernel = kernel(4, 2, &["a", "a", "b", "b"]);
        let observations = (0..3)
            .map(|i| FeatureObservation {
                sample_id: format!("l{i}"),
                feature_id: "y".to_string(),
                present: i == 0,
                family: "a".to_string(),
                location: GeoPoint::new(0.0, 0.0),
            })
            .collect();
        let short = FeatureTable::new("y", observations).unwrap();
        assert!(matches!(
            kernel.evaluate(&short),
            Err(AnalysisError::Structural { .. })
        ));
    }

    #[test]
    #[should_panic(expected = "presence vector does not match the kernel")]
    fn test_short_presence_panics() {
        let kernel = kernel(4, 2, &["a", "a", "b", "b"]);
        let _ = kernel.statistic(&[true, false]);
    }

    #[test]
    fn test_statistic_bounded() {
        let kernel = kernel(8, 3, &["a", "b", "a", "b", "c", "c", "a", "b"]);
        for mask in 1u32..256 {
            let presence: Vec<bool> = (0..8).map(|bit| mask & (1 << bit) != 0).collect();
            let statistic = kernel.statistic(&presence).unwrap();
            assert!((0.0..=1.0).contains(&statistic));
        }
    }
}
