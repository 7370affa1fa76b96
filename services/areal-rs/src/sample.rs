//! Working sample of languages built from inventory rows.

use std::collections::BTreeMap;
use std::path::Path;

use ahash::{AHashMap, AHashSet};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{AnalysisError, Result};
use crate::phoneme::normalize_symbol;
use crate::types::{GeoPoint, InventoryRow, LanguageRecord};

/// Auxiliary lookups joined onto the sample
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GeographyTable {
    /// Language code to macro-area label
    pub macro_areas: AHashMap<String, String>,
    /// Family id to human-readable family name
    pub family_names: AHashMap<String, String>,
}

impl GeographyTable {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            AnalysisError::io(format!("failed to read geography table {path:?}"), e)
        })?;
        serde_json::from_str(&content).map_err(|e| {
            AnalysisError::serialization(format!("failed to parse geography table {path:?}"), e)
        })
    }

    pub fn family_name<'a>(&'a self, family: &'a str) -> &'a str {
        self.family_names
            .get(family)
            .map(String::as_str)
            .unwrap_or(family)
    }
}

/// Read the inventory table: a JSON array of rows
pub fn load_inventory(path: &Path) -> Result<Vec<InventoryRow>> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| AnalysisError::io(format!("failed to read inventory {path:?}"), e))?;
    serde_json::from_str(&content)
        .map_err(|e| AnalysisError::serialization(format!("failed to parse inventory {path:?}"), e))
}

/// One record per language code, ordered by sample id
#[derive(Debug, Clone)]
pub struct Sample {
    records: Vec<LanguageRecord>,
}

impl Sample {
    /// Group inventory rows into language records.
    ///
    /// Samples without coordinates are dropped. Out-of-range coordinates,
    /// rows of one sample that disagree about its metadata, and language
    /// codes claimed by more than one sample are integrity errors.
    pub fn from_rows(rows: Vec<InventoryRow>, geography: &GeographyTable) -> Result<Self> {
        let mut grouped: BTreeMap<String, LanguageRecord> = BTreeMap::new();
        let mut missing_coordinates: AHashSet<String> = AHashSet::new();
        let mut invalid = Vec::new();
        let mut inconsistent = Vec::new();

        for row in rows {
            let (latitude, longitude) = match (row.latitude, row.longitude) {
                (Some(lat), Some(lon)) => (lat, lon),
                _ => {
                    missing_coordinates.insert(row.sample_id);
                    continue;
                }
            };
            let location = GeoPoint::new(latitude, longitude);
            if !location.is_valid() {
                invalid.push(row.sample_id);
                continue;
            }

            let family_id = row.family_id.filter(|f| !f.trim().is_empty());
            let phoneme = normalize_symbol(&row.phoneme);

            let record = grouped
                .entry(row.sample_id.clone())
                .or_insert_with(|| LanguageRecord {
                    sample_id: row.sample_id.clone(),
                    language_code: row.language_code.clone(),
                    name: row.language_name.clone(),
                    family: family_id
                        .clone()
                        .unwrap_or_else(|| row.language_name.clone()),
                    family_id: family_id.clone(),
                    level: row.level.clone(),
                    location,
                    macro_area: geography.macro_areas.get(&row.language_code).cloned(),
                    inventory: AHashSet::new(),
                });

            if record.language_code != row.language_code
                || record.location != location
                || record.family_id != family_id
            {
                inconsistent.push(row.sample_id);
                continue;
            }
            if !phoneme.is_empty() {
                record.inventory.insert(phoneme);
            }
        }

        if !invalid.is_empty() {
            invalid.sort();
            invalid.dedup();
            return Err(AnalysisError::data_integrity(
                "coordinates out of range or not finite",
                invalid,
            ));
        }
        if !inconsistent.is_empty() {
            inconsistent.sort();
            inconsistent.dedup();
            return Err(AnalysisError::data_integrity(
                "rows of one sample disagree on code, coordinates or family",
                inconsistent,
            ));
        }

        // A sample with coordinates on some rows only is still dropped
        for id in &missing_coordinates {
            grouped.remove(id);
        }
        if !missing_coordinates.is_empty() {
            warn!(
                samples = missing_coordinates.len(),
                "dropped samples without coordinates"
            );
        }

        Self::from_records(grouped.into_values().collect())
    }

    /// Wrap records, enforcing unique sample ids and language codes
    pub fn from_records(records: Vec<LanguageRecord>) -> Result<Self> {
        let mut ids: AHashSet<&str> = AHashSet::with_capacity(records.len());
        let mut codes: AHashMap<&str, &str> = AHashMap::with_capacity(records.len());
        let mut duplicates = Vec::new();

        for record in &records {
            if record.sample_id.is_empty() || !ids.insert(record.sample_id.as_str()) {
                duplicates.push(record.sample_id.clone());
            }
            if let Some(other) = codes.insert(record.language_code.as_str(), &record.sample_id) {
                duplicates.push(format!(
                    "{} ({} and {})",
                    record.language_code, other, record.sample_id
                ));
            }
        }

        if !duplicates.is_empty() {
            return Err(AnalysisError::data_integrity(
                "sample ids and language codes must be unique",
                duplicates,
            ));
        }

        info!(languages = records.len(), "assembled language sample");
        Ok(Self { records })
    }

    /// A new sample without languages in any of the given macro-areas.
    ///
    /// Languages with no macro-area are kept.
    pub fn excluding_macro_areas(&self, excluded: &[String]) -> Self {
        let records = self
            .records
            .iter()
            .filter(|r| {
                r.macro_area
                    .as_ref()
                    .map(|area| !excluded.contains(area))
                    .unwrap_or(true)
            })
            .cloned()
            .collect();
        Self { records }
    }

    pub fn records(&self) -> &[LanguageRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn ids(&self) -> Vec<String> {
        self.records.iter().map(|r| r.sample_id.clone()).collect()
    }

    pub fn families(&self) -> Vec<String> {
        self.records.iter().map(|r| r.family.clone()).collect()
    }

    pub fn points(&self) -> Vec<GeoPoint> {
        self.records.iter().map(|r| r.location).collect()
    }

    /// Distinct macro-area labels present in the sample
    pub fn macro_areas(&self) -> Vec<String> {
        let mut areas: Vec<String> = self
            .records
            .iter()
            .filter_map(|r| r.macro_area.clone())
            .collect();
        areas.sort();
        areas.dedup();
        areas
    }
}
