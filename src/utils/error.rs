//! Error Handling Module
//!
//! Defines the error taxonomy for the diagnosis pipeline.
//! Uses thiserror for ergonomic error definitions.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for plant_doctor operations
#[derive(Error, Debug)]
pub enum PlantDoctorError {
    /// The model artifact is missing or could not be loaded
    #[error("Failed to load model at '{0}': {1}")]
    ModelLoad(PathBuf, String),

    /// The label mapping or advice table is missing or malformed
    #[error("Failed to load catalog at '{0}': {1}")]
    CatalogLoad(PathBuf, String),

    /// A prediction was requested while no model is loaded
    #[error("model not loaded")]
    ModelNotReady,

    /// The request bytes are not a decodable image
    #[error("failed to decode image: {0}")]
    Decode(String),

    /// A class index outside the catalog range
    #[error("Unknown class index {index} (catalog has {len} labels)")]
    UnknownIndex { index: usize, len: usize },

    /// Engine output width and catalog size disagree
    #[error("Model produces {engine} classes but the label catalog has {catalog}")]
    CatalogMismatch { engine: usize, catalog: usize },

    /// The engine failed while running a loaded model
    #[error("Inference error: {0}")]
    Inference(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for PlantDoctorError {
    fn from(err: serde_json::Error) -> Self {
        PlantDoctorError::Serialization(err.to_string())
    }
}

/// Closed set of per-request failure categories reported in a prediction result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictionErrorKind {
    ModelNotReady,
    Decode,
    Inference,
    UnknownIndex,
}

impl PlantDoctorError {
    /// Category of this error when it surfaces inside a prediction request
    pub fn kind(&self) -> PredictionErrorKind {
        match self {
            PlantDoctorError::ModelNotReady => PredictionErrorKind::ModelNotReady,
            PlantDoctorError::Decode(_) | PlantDoctorError::Io(_) => PredictionErrorKind::Decode,
            PlantDoctorError::UnknownIndex { .. } | PlantDoctorError::CatalogMismatch { .. } => {
                PredictionErrorKind::UnknownIndex
            }
            _ => PredictionErrorKind::Inference,
        }
    }

    /// Whether this error only ever happens while building the service
    pub fn is_startup_error(&self) -> bool {
        matches!(
            self,
            PlantDoctorError::ModelLoad(..)
                | PlantDoctorError::CatalogLoad(..)
                | PlantDoctorError::CatalogMismatch { .. }
                | PlantDoctorError::Config(_)
        )
    }
}

/// Convenience Result type for plant_doctor operations
pub type Result<T> = std::result::Result<T, PlantDoctorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(PlantDoctorError::ModelNotReady.to_string(), "model not loaded");

        let err = PlantDoctorError::Decode("unsupported format".to_string());
        assert!(err.to_string().contains("decode"));
    }

    #[test]
    fn test_model_load_error() {
        let path = PathBuf::from("/models/plant_doctor.mpk");
        let err = PlantDoctorError::ModelLoad(path, "file not found".to_string());
        assert!(err.to_string().contains("plant_doctor.mpk"));
        assert!(err.is_startup_error());
    }

    #[test]
    fn test_error_kind() {
        assert_eq!(
            PlantDoctorError::ModelNotReady.kind(),
            PredictionErrorKind::ModelNotReady
        );
        assert_eq!(
            PlantDoctorError::Decode(String::new()).kind(),
            PredictionErrorKind::Decode
        );
        assert_eq!(
            PlantDoctorError::UnknownIndex { index: 7, len: 4 }.kind(),
            PredictionErrorKind::UnknownIndex
        );
        assert_eq!(
            PlantDoctorError::Inference("shape".to_string()).kind(),
            PredictionErrorKind::Inference
        );
    }

    #[test]
    fn test_error_kind_serializes_snake_case() {
        let json = serde_json::to_string(&PredictionErrorKind::ModelNotReady).unwrap();
        assert_eq!(json, "\"model_not_ready\"");
    }
}
