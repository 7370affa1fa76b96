//! k-nearest-neighbour index over a distance matrix.
//!
//! The cross-family variant ranks candidates with an explicit exclusion mask
//! rather than an inflated distance: out-of-family languages always rank
//! ahead of same-family ones, and within each group candidates are ordered by
//! distance. Same-family languages therefore only appear when the sample has
//! fewer than k languages outside the query's family, and such rows are
//! flagged as insufficient.

use ahash::AHashMap;
use ordered_float::OrderedFloat;
use rayon::prelude::*;
use tracing::{debug, warn};

use crate::error::{AnalysisError, Result};
use crate::geo::DistanceMatrix;
use crate::types::NeighbourMode;

/// Map family labels to dense block ids in order of first appearance
pub fn family_blocks(families: &[String]) -> (Vec<usize>, usize) {
    let mut ids: AHashMap<&str, usize> = AHashMap::new();
    let blocks = families
        .iter()
        .map(|family| {
            let next = ids.len();
            *ids.entry(family.as_str()).or_insert(next)
        })
        .collect();
    (blocks, ids.len())
}

/// Ordered nearest neighbours for every language in a sample
#[derive(Debug, Clone)]
pub struct NeighbourIndex {
    k: usize,
    mode: NeighbourMode,
    ids: Vec<String>,
    index: AHashMap<String, usize>,
    neighbours: Vec<Vec<usize>>,
    insufficient: Vec<bool>,
}

impl NeighbourIndex {
    /// Rank every other language by distance and keep the first `k`.
    ///
    /// `families` is parallel to the matrix rows. Ties keep matrix order.
    pub fn build(
        matrix: &DistanceMatrix,
        k: usize,
        mode: NeighbourMode,
        families: &[String],
    ) -> Result<Self> {
        if k == 0 {
            return Err(AnalysisError::config_field("k must be at least 1", "k"));
        }
        if families.len() != matrix.len() {
            return Err(AnalysisError::structural(
                format!(
                    "{} family labels for a {}-language distance matrix",
                    families.len(),
                    matrix.len()
                ),
                Vec::<String>::new(),
            ));
        }

        let n = matrix.len();
        let (blocks, _) = family_blocks(families);
        let effective_k = k.min(n.saturating_sub(1));

        let rows: Vec<(Vec<usize>, bool)> = (0..n)
            .into_par_iter()
            .map(|i| {
                let row = matrix.row(i);
                let mut candidates: Vec<usize> = (0..n).filter(|&j| j != i).collect();

                match mode {
                    NeighbourMode::Unrestricted => {
                        candidates.sort_by_key(|&j| OrderedFloat(row[j]));
                        candidates.truncate(k);
                        (candidates, false)
                    }
                    NeighbourMode::CrossFamily => {
                        let same_family = |j: usize| blocks[j] == blocks[i];
                        let outside = candidates.iter().filter(|&&j| !same_family(j)).count();
                        candidates.sort_by_key(|&j| (same_family(j), OrderedFloat(row[j])));
                        candidates.truncate(k);
                        (candidates, outside < effective_k)
                    }
                }
            })
            .collect();

        let (neighbours, insufficient): (Vec<_>, Vec<_>) = rows.into_iter().unzip();

        let padded = insufficient.iter().filter(|&&flag| flag).count();
        if padded > 0 {
            warn!(
                languages = padded,
                k,
                "fewer than k cross-family candidates; padded with same-family neighbours"
            );
        }
        debug!(languages = n, k, %mode, "built neighbour index");

        Ok(Self {
            k,
            mode,
            ids: matrix.ids().to_vec(),
            index: matrix.id_index().clone(),
            neighbours,
            insufficient,
        })
    }

    pub fn k(&self) -> usize {
        self.k
    }

    pub fn mode(&self) -> NeighbourMode {
        self.mode
    }

    pub fn len(&self) -> usize {
        self.neighbours.len()
    }

    pub fn is_empty(&self) -> bool {
        self.neighbours.is_empty()
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    /// Neighbour positions of language `i`, nearest first
    pub fn neighbours(&self, i: usize) -> &[usize] {
        &self.neighbours[i]
    }

    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    /// Neighbour identifiers of a language, nearest first
    pub fn neighbours_of(&self, id: &str) -> Option<Vec<&str>> {
        let i = self.index_of(id)?;
        Some(
            self.neighbours[i]
                .iter()
                .map(|&j| self.ids[j].as_str())
                .collect(),
        )
    }

    pub fn is_insufficient(&self, i: usize) -> bool {
        self.insufficient[i]
    }

    /// Languages whose neighbourhood had to include same-family languages
    pub fn insufficient_neighbours(&self) -> Vec<&str> {
        self.ids
            .iter()
            .zip(&self.insufficient)
            .filter(|(_, &flag)| flag)
            .map(|(id, _)| id.as_str())
            .collect()
    }
}
