//! Configuration structures for the diagnosis service.
//!
//! Read from a TOML file; every field has a default so an empty file (or no
//! file) yields a usable configuration.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::inference::engine::{BackendKind, EngineSpec, TensorLayout};
use crate::inference::normalizer::{ImageNormalizer, ResizeFilter, DEFAULT_IMAGE_SIZE};
use crate::model::MIN_INPUT_SIZE;
use crate::utils::error::{PlantDoctorError, Result};

/// Main configuration for the diagnosis service
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Model artifact and backend
    pub model: ModelConfig,
    /// Label and advice catalogs
    pub catalog: CatalogConfig,
    /// Image preprocessing
    pub preprocess: PreprocessConfig,
    /// Request handling
    pub service: ServiceOptions,
}

/// Model configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Which engine loads the artifact
    pub backend: BackendKind,
    /// Path to the artifact (`.mpk`, `.tflite` or `.onnx`)
    pub artifact_path: PathBuf,
    /// Input layout for compiled graphs
    pub layout: TensorLayout,
    /// Width of the Burn architecture the record was trained with
    pub base_filters: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Burn,
            artifact_path: PathBuf::from("models/plant_doctor.mpk"),
            layout: TensorLayout::Nhwc,
            base_filters: 32,
        }
    }
}

/// Catalog locations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// Label mapping (`{"label": index}` or `["label", ...]`)
    pub labels_path: PathBuf,
    /// Optional advice table override; the built-in table is used otherwise
    pub advice_path: Option<PathBuf>,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            labels_path: PathBuf::from("data/class_names.json"),
            advice_path: None,
        }
    }
}

/// Preprocessing configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessConfig {
    /// Square model input size
    pub image_size: u32,
    /// Resampling filter
    pub filter: ResizeFilter,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            image_size: DEFAULT_IMAGE_SIZE,
            filter: ResizeFilter::Triangle,
        }
    }
}

/// Request handling options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceOptions {
    /// Number of ranked predictions reported alongside the top class
    pub top_k: usize,
    /// Start without a model instead of failing when the artifact won't load
    pub allow_degraded: bool,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            top_k: 3,
            allow_degraded: true,
        }
    }
}

impl ServiceConfig {
    /// Parse a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| PlantDoctorError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            PlantDoctorError::Config(format!("Failed to read config {}: {e}", path.display()))
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| {
            PlantDoctorError::Config(format!("Failed to parse config {}: {e}", path.display()))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values no pipeline can run with
    pub fn validate(&self) -> Result<()> {
        if (self.preprocess.image_size as usize) < MIN_INPUT_SIZE {
            return Err(PlantDoctorError::Config(format!(
                "preprocess.image_size must be at least {} (got {})",
                MIN_INPUT_SIZE, self.preprocess.image_size
            )));
        }
        if self.service.top_k == 0 {
            return Err(PlantDoctorError::Config(
                "service.top_k must be at least 1".to_string(),
            ));
        }
        if self.model.base_filters == 0 {
            return Err(PlantDoctorError::Config(
                "model.base_filters must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Engine load parameters for the configured artifact
    pub fn engine_spec(&self) -> EngineSpec {
        EngineSpec {
            backend: self.model.backend,
            artifact_path: self.model.artifact_path.clone(),
            image_size: self.preprocess.image_size as usize,
            layout: self.model.layout,
            base_filters: self.model.base_filters,
        }
    }

    /// Normalizer matching the configured input size
    pub fn normalizer(&self) -> ImageNormalizer {
        ImageNormalizer::new()
            .with_image_size(self.preprocess.image_size)
            .with_filter(self.preprocess.filter)
    }

    /// Point at a different artifact, inferring the backend from its
    /// extension when possible
    pub fn with_artifact(mut self, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        if let Some(backend) = BackendKind::from_path(&path) {
            self.model.backend = backend;
        }
        self.model.artifact_path = path;
        self
    }
}
