//! Pairwise geodesic distances between sampled languages.
//!
//! Distances are ellipsoidal (WGS-84) and measured in metres. Only the upper
//! triangle is computed; the lower triangle is mirrored from it so the matrix
//! is exactly symmetric.

use ahash::AHashMap;
use ndarray::{Array2, ArrayView1};
use rayon::prelude::*;
use tracing::debug;

use crate::error::{AnalysisError, Result};
use crate::types::{GeoPoint, LanguageRecord};

const WGS84_A: f64 = 6_378_137.0;
const WGS84_F: f64 = 1.0 / 298.257_223_563;
const WGS84_B: f64 = WGS84_A * (1.0 - WGS84_F);
const MEAN_EARTH_RADIUS: f64 = 6_371_008.8;

const VINCENTY_MAX_ITERATIONS: usize = 200;
const VINCENTY_TOLERANCE: f64 = 1e-12;

/// Geodesic distance in metres between two points on the WGS-84 ellipsoid.
///
/// Uses Vincenty's inverse formula. Nearly antipodal pairs, where the
/// iteration does not converge, fall back to the spherical great-circle
/// distance.
pub fn geodesic_distance(a: GeoPoint, b: GeoPoint) -> f64 {
    vincenty_inverse(a, b).unwrap_or_else(|| great_circle_distance(a, b))
}

/// Haversine distance in metres on a sphere of mean Earth radius
pub fn great_circle_distance(a: GeoPoint, b: GeoPoint) -> f64 {
    let phi_1 = a.latitude.to_radians();
    let phi_2 = b.latitude.to_radians();
    let d_phi = phi_2 - phi_1;
    let d_lambda = (b.longitude - a.longitude).to_radians();

    let h = (d_phi / 2.0).sin().powi(2) + phi_1.cos() * phi_2.cos() * (d_lambda / 2.0).sin().powi(2);
    2.0 * MEAN_EARTH_RADIUS * h.sqrt().min(1.0).asin()
}

fn vincenty_inverse(a: GeoPoint, b: GeoPoint) -> Option<f64> {
    let l = (b.longitude - a.longitude).to_radians();
    let u1 = ((1.0 - WGS84_F) * a.latitude.to_radians().tan()).atan();
    let u2 = ((1.0 - WGS84_F) * b.latitude.to_radians().tan()).atan();
    let (sin_u1, cos_u1) = u1.sin_cos();
    let (sin_u2, cos_u2) = u2.sin_cos();

    let mut lambda = l;
    for _ in 0..VINCENTY_MAX_ITERATIONS {
        let (sin_lambda, cos_lambda) = lambda.sin_cos();
        let sin_sigma = ((cos_u2 * sin_lambda).powi(2)
            + (cos_u1 * sin_u2 - sin_u1 * cos_u2 * cos_lambda).powi(2))
        .sqrt();

        if sin_sigma == 0.0 {
            return Some(0.0); // coincident points
        }

        let cos_sigma = sin_u1 * sin_u2 + cos_u1 * cos_u2 * cos_lambda;
        let sigma = sin_sigma.atan2(cos_sigma);
        let sin_alpha = cos_u1 * cos_u2 * sin_lambda / sin_sigma;
        let cos_sq_alpha = 1.0 - sin_alpha * sin_alpha;
        let cos_2sigma_m = if cos_sq_alpha != 0.0 {
            cos_sigma - 2.0 * sin_u1 * sin_u2 / cos_sq_alpha
        } else {
            0.0 // equatorial line
        };

        let c = WGS84_F / 16.0 * cos_sq_alpha * (4.0 + WGS84_F * (4.0 - 3.0 * cos_sq_alpha));
        let lambda_prev = lambda;
        lambda = l
            + (1.0 - c)
                * WGS84_F
                * sin_alpha
                * (sigma
                    + c * sin_sigma
                        * (cos_2sigma_m + c * cos_sigma * (-1.0 + 2.0 * cos_2sigma_m.powi(2))));

        if (lambda - lambda_prev).abs() < VINCENTY_TOLERANCE {
            let u_sq = cos_sq_alpha * (WGS84_A.powi(2) - WGS84_B.powi(2)) / WGS84_B.powi(2);
            let big_a =
                1.0 + u_sq / 16384.0 * (4096.0 + u_sq * (-768.0 + u_sq * (320.0 - 175.0 * u_sq)));
            let big_b = u_sq / 1024.0 * (256.0 + u_sq * (-128.0 + u_sq * (74.0 - 47.0 * u_sq)));
            let delta_sigma = big_b
                * sin_sigma
                * (cos_2sigma_m
                    + big_b / 4.0
                        * (cos_sigma * (-1.0 + 2.0 * cos_2sigma_m.powi(2))
                            - big_b / 6.0
                                * cos_2sigma_m
                                * (-3.0 + 4.0 * sin_sigma.powi(2))
                                * (-3.0 + 4.0 * cos_2sigma_m.powi(2))));
            return Some(WGS84_B * big_a * (sigma - delta_sigma));
        }
    }

    None
}

/// Symmetric matrix of pairwise distances, indexed by sample position
#[derive(Debug, Clone)]
pub struct DistanceMatrix {
    ids: Vec<String>,
    index: AHashMap<String, usize>,
    distances: Array2<f64>,
}

impl DistanceMatrix {
    /// Compute geodesic distances for every pair of points.
    ///
    /// `ids` and `points` are parallel; ids must be unique. Coordinates are
    /// assumed to have been validated at ingestion.
    pub fn build(ids: Vec<String>, points: &[GeoPoint]) -> Result<Self> {
        if ids.len() != points.len() {
            return Err(AnalysisError::structural(
                format!(
                    "{} identifiers but {} coordinate pairs",
                    ids.len(),
                    points.len()
                ),
                Vec::<String>::new(),
            ));
        }

        let n = points.len();
        let upper: Vec<Vec<f64>> = (0..n)
            .into_par_iter()
            .map(|i| {
                ((i + 1)..n)
                    .map(|j| geodesic_distance(points[i], points[j]))
                    .collect()
            })
            .collect();

        let mut distances = Array2::<f64>::zeros((n, n));
        for (i, row) in upper.into_iter().enumerate() {
            for (offset, d) in row.into_iter().enumerate() {
                let j = i + 1 + offset;
                distances[[i, j]] = d;
                distances[[j, i]] = d;
            }
        }

        debug!(languages = n, "built geodesic distance matrix");
        Self::with_index(ids, distances)
    }

    pub fn from_records(records: &[LanguageRecord]) -> Result<Self> {
        let ids = records.iter().map(|r| r.sample_id.clone()).collect();
        let points: Vec<GeoPoint> = records.iter().map(|r| r.location).collect();
        Self::build(ids, &points)
    }

    /// Wrap a precomputed matrix after checking it is a valid distance matrix
    pub fn from_array(ids: Vec<String>, distances: Array2<f64>) -> Result<Self> {
        let (rows, cols) = distances.dim();
        if rows != cols || rows != ids.len() {
            return Err(AnalysisError::structural(
                format!(
                    "distance matrix is {rows}x{cols} but {} identifiers were given",
                    ids.len()
                ),
                Vec::<String>::new(),
            ));
        }

        for i in 0..rows {
            if distances[[i, i]] != 0.0 {
                return Err(AnalysisError::structural(
                    "non-zero self distance",
                    [ids[i].clone()],
                ));
            }
            for j in (i + 1)..cols {
                let d = distances[[i, j]];
                if d.is_nan() || d < 0.0 || d != distances[[j, i]] {
                    return Err(AnalysisError::structural(
                        "distance matrix entry is negative, NaN or asymmetric",
                        [ids[i].clone(), ids[j].clone()],
                    ));
                }
            }
        }

        Self::with_index(ids, distances)
    }

    fn with_index(ids: Vec<String>, distances: Array2<f64>) -> Result<Self> {
        let mut index = AHashMap::with_capacity(ids.len());
        for (i, id) in ids.iter().enumerate() {
            if index.insert(id.clone(), i).is_some() {
                return Err(AnalysisError::structural(
                    "duplicate identifier in distance matrix",
                    [id.clone()],
                ));
            }
        }

        Ok(Self {
            ids,
            index,
            distances,
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

    pub(crate) fn id_index(&self) -> &AHashMap<String, usize> {
        &self.index
    }

    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.distances[[i, j]]
    }

    pub fn row(&self, i: usize) -> ArrayView1<'_, f64> {
        self.distances.row(i)
    }

    pub fn as_array(&self) -> &Array2<f64> {
        &self.distances
    }
}
