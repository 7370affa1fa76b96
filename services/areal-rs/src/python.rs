//! Python bindings via PyO3, enabled with the `python` feature.
//!
//! Languages are passed positionally: coordinates as `(latitude, longitude)`
//! pairs and family labels/presence flags in the same order.

use numpy::{IntoPyArray, PyArray1, PyArray2};
use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;

use crate::enrichment::{local_enrichment, EnrichmentKernel};
use crate::error::AnalysisError;
use crate::features::{FeatureObservation, FeatureTable};
use crate::geo::DistanceMatrix;
use crate::neighbours::NeighbourIndex;
use crate::permutation::{run_permutation_test, PermutationConfig, PermutationOutcome};
use crate::phoneme::normalize_symbol;
use crate::types::{GeoPoint, NeighbourMode};

fn to_py_err(err: AnalysisError) -> PyErr {
    PyValueError::new_err(err.to_string())
}

fn mode(cross_family: bool) -> NeighbourMode {
    if cross_family {
        NeighbourMode::CrossFamily
    } else {
        NeighbourMode::Unrestricted
    }
}

fn matrix_from_coordinates(coordinates: &[(f64, f64)]) -> PyResult<DistanceMatrix> {
    let points: Vec<GeoPoint> = coordinates
        .iter()
        .map(|&(lat, lon)| GeoPoint::new(lat, lon))
        .collect();
    if let Some(bad) = points.iter().position(|p| !p.is_valid()) {
        return Err(to_py_err(AnalysisError::data_integrity(
            "coordinates out of range or not finite",
            [bad.to_string()],
        )));
    }
    let ids = (0..points.len()).map(|i| i.to_string()).collect();
    DistanceMatrix::build(ids, &points).map_err(to_py_err)
}

// ============================================================================
// GEOMETRY FUNCTIONS
// ============================================================================

#[pyfunction]
fn py_distance_matrix(py: Python<'_>, coordinates: Vec<(f64, f64)>) -> PyResult<&PyArray2<f64>> {
    let matrix = matrix_from_coordinates(&coordinates)?;
    Ok(matrix.as_array().clone().into_pyarray(py))
}

#[pyfunction]
fn py_neighbour_index(
    coordinates: Vec<(f64, f64)>,
    families: Vec<String>,
    k: usize,
    cross_family: bool,
) -> PyResult<(Vec<Vec<usize>>, Vec<bool>)> {
    let matrix = matrix_from_coordinates(&coordinates)?;
    let index =
        NeighbourIndex::build(&matrix, k, mode(cross_family), &families).map_err(to_py_err)?;
    let neighbours = (0..index.len()).map(|i| index.neighbours(i).to_vec()).collect();
    let insufficient = (0..index.len()).map(|i| index.is_insufficient(i)).collect();
    Ok((neighbours, insufficient))
}

// ============================================================================
// ENRICHMENT FUNCTIONS
// ============================================================================

#[pyfunction]
fn py_normalize_symbol(symbol: &str) -> PyResult<String> {
    Ok(normalize_symbol(symbol))
}

#[pyfunction]
fn py_enrichment_statistic(
    coordinates: Vec<(f64, f64)>,
    families: Vec<String>,
    presence: Vec<bool>,
    k: usize,
    cross_family: bool,
) -> PyResult<Option<f64>> {
    let matrix = matrix_from_coordinates(&coordinates)?;
    let index =
        NeighbourIndex::build(&matrix, k, mode(cross_family), &families).map_err(to_py_err)?;
    if presence.len() != index.len() {
        return Err(PyValueError::new_err(format!(
            "{} presence flags for {} languages",
            presence.len(),
            index.len()
        )));
    }

    let observations = matrix
        .ids()
        .iter()
        .zip(&coordinates)
        .zip(families.iter().zip(&presence))
        .map(|((id, &(lat, lon)), (family, &present))| FeatureObservation {
            sample_id: id.clone(),
            feature_id: "feature".to_string(),
            present,
            family: family.clone(),
            location: GeoPoint::new(lat, lon),
        })
        .collect();
    let table = FeatureTable::new("feature", observations).map_err(to_py_err)?;
    local_enrichment(&table, &index).map_err(to_py_err)
}

#[pyfunction]
#[pyo3(signature = (coordinates, families, presence, k = 10, iterations = 10_000, seed = 1234, cross_family = false))]
fn py_enrichment_test(
    coordinates: Vec<(f64, f64)>,
    families: Vec<String>,
    presence: Vec<bool>,
    k: usize,
    iterations: usize,
    seed: u64,
    cross_family: bool,
) -> PyResult<Option<PyEnrichmentTest>> {
    let matrix = matrix_from_coordinates(&coordinates)?;
    let index =
        NeighbourIndex::build(&matrix, k, mode(cross_family), &families).map_err(to_py_err)?;
    let kernel = EnrichmentKernel::new(&index, &families).map_err(to_py_err)?;
    let config = PermutationConfig { iterations, seed };

    let outcome = run_permutation_test(&kernel, &presence, &config).map_err(to_py_err)?;
    Ok(outcome.map(PyEnrichmentTest::from))
}

// ============================================================================
// PYTHON WRAPPER TYPES
// ============================================================================

#[pyclass]
struct PyEnrichmentTest {
    #[pyo3(get)]
    observed: f64,
    #[pyo3(get)]
    empirical_quantile: f64,
    #[pyo3(get)]
    logit_quantile: f64,
    null: Vec<f64>,
}

impl From<PermutationOutcome> for PyEnrichmentTest {
    fn from(outcome: PermutationOutcome) -> Self {
        Self {
            observed: outcome.observed,
            empirical_quantile: outcome.empirical_quantile,
            logit_quantile: outcome.logit_quantile,
            null: outcome.null.into_samples(),
        }
    }
}

#[pymethods]
impl PyEnrichmentTest {
    fn null_distribution<'py>(&self, py: Python<'py>) -> &'py PyArray1<f64> {
        self.null.clone().into_pyarray(py)
    }

    fn __len__(&self) -> usize {
        self.null.len()
    }
}

// ============================================================================
// MODULE DEFINITION
// ============================================================================

#[pymodule]
fn areal_core(_py: Python, m: &PyModule) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(py_distance_matrix, m)?)?;
    m.add_function(wrap_pyfunction!(py_neighbour_index, m)?)?;

    m.add_function(wrap_pyfunction!(py_normalize_symbol, m)?)?;
    m.add_function(wrap_pyfunction!(py_enrichment_statistic, m)?)?;
    m.add_function(wrap_pyfunction!(py_enrichment_test, m)?)?;

    m.add_class::<PyEnrichmentTest>()?;

    Ok(())
}
