//! Error types for the areal clustering engine.
//!
//! Only fatal conditions live here. Per-feature degeneracy and padded
//! neighbourhoods are reported as values on the results instead, so a
//! single untestable feature never aborts a batch.

use std::io;

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, AnalysisError>;

#[derive(Error, Debug)]
pub enum AnalysisError {
    /// Input records that cannot be placed on the map or joined
    #[error("Data integrity error: {message} (identifiers: {})", identifiers.join(", "))]
    DataIntegrity {
        message: String,
        identifiers: Vec<String>,
    },

    /// Tables that disagree about which languages exist
    #[error("Structural error: {message} (identifiers: {})", identifiers.join(", "))]
    Structural {
        message: String,
        identifiers: Vec<String>,
    },

    #[error("Configuration error: {message}")]
    Config {
        message: String,
        field: Option<String>,
    },

    #[error("I/O error: {message}")]
    Io {
        message: String,
        #[source]
        source: io::Error,
    },

    #[error("Serialization error: {message}")]
    Serialization {
        message: String,
        #[source]
        source: serde_json::Error,
    },

    /// Two runs with the same seed disagreed
    #[error("Permutation run for feature '{feature}' in variant '{variant}' is not reproducible")]
    NonReproducible { feature: String, variant: String },
}

impl AnalysisError {
    pub fn data_integrity<I, S>(message: impl Into<String>, identifiers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::DataIntegrity {
            message: message.into(),
            identifiers: identifiers.into_iter().map(Into::into).collect(),
        }
    }

    pub fn structural<I, S>(message: impl Into<String>, identifiers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Structural {
            message: message.into(),
            identifiers: identifiers.into_iter().map(Into::into).collect(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            field: None,
        }
    }

    pub fn config_field(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    pub fn io(message: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            message: message.into(),
            source,
        }
    }

    pub fn serialization(message: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Serialization {
            message: message.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structural_message_names_identifiers() {
        let err = AnalysisError::structural("length mismatch", ["lang_a", "lang_b"]);
        let message = err.to_string();
        assert!(message.contains("length mismatch"));
        assert!(message.contains("lang_a, lang_b"));
    }

    #[test]
    fn test_config_field() {
        match AnalysisError::config_field("k must be positive", "k") {
            AnalysisError::Config { field, .. } => assert_eq!(field.as_deref(), Some("k")),
            other => panic!("unexpected variant: {other:?}"),
        }
    }
}
