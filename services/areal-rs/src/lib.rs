//! Areal clustering of phonological features.
//!
//! Tests whether languages carrying a phoneme (or phoneme class) have
//! neighbours that carry it more often than expected once family membership
//! is controlled for:
//! - Geodesic distance matrix over the language sample
//! - k-nearest-neighbour index, optionally restricted to other families
//! - Family-stratified local enrichment statistic
//! - Family-stratified permutation null and empirical quantiles
//! - Batch runner over features and dataset variants, with checkpointing

pub mod batch;
pub mod cache;
pub mod config;
pub mod enrichment;
pub mod error;
pub mod features;
pub mod geo;
pub mod neighbours;
pub mod permutation;
pub mod phoneme;
pub mod sample;
pub mod types;

#[cfg(feature = "python")]
mod python;

pub use batch::{prepare_variants, test_feature, BatchReport, BatchRunner, PreparedVariant};
pub use cache::{NullRecord, RecordKey, ResultCache};
pub use config::{AnalysisConfig, ClassSpec, VariantSpec};
pub use enrichment::{local_enrichment, EnrichmentKernel};
pub use error::{AnalysisError, Result};
pub use features::{candidate_features, FeatureObservation, FeatureTable};
pub use geo::{geodesic_distance, DistanceMatrix};
pub use neighbours::NeighbourIndex;
pub use permutation::{
    empirical_quantile, logit_quantile, run_permutation_test, NullDistribution,
    PermutationConfig, PermutationOutcome, StratifiedPermuter,
};
pub use phoneme::{normalize_symbol, FeatureSpec, SegmentFilter};
pub use sample::{load_inventory, GeographyTable, Sample};
pub use types::{
    rank_by_logit, EnrichmentResult, GeoPoint, InventoryRow, LanguageRecord, NeighbourMode,
    TestStatus,
};
