//! # plant_doctor
//!
//! Plant leaf disease diagnosis with localized treatment advice.
//!
//! A farmer's leaf photo goes through one pipeline: normalize the image,
//! classify it with a loaded model, map the winning class to a disease label
//! and attach treatment advice (English and Amharic).
//!
//! ## Features
//!
//! - **Two interchangeable backends**: a Burn `PlantClassifier` record, or a
//!   compiled TFLite / ONNX graph (quantized models included) run by tract
//! - **Degraded start**: the service comes up without a model and reports
//!   `model not loaded` per request instead of refusing to start
//! - **Failures as data**: every request yields a `PredictionResult`
//! - **Advisory helpers**: market prices and weather-based watering advice
//!
//! ## Modules
//!
//! - `catalog`: label mapping and advice repository
//! - `inference`: normalizer, engines and the prediction service
//! - `model`: CNN architecture built with Burn
//! - `advisory`: market board and weather advisory
//! - `config`: TOML service configuration
//! - `utils`: errors, logging and formatting helpers
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use plant_doctor::{DiseasePredictionService, ServiceConfig};
//!
//! let config = ServiceConfig::from_toml_file("config/plant_doctor.toml".as_ref())?;
//! let service = DiseasePredictionService::from_config(&config)?;
//!
//! let bytes = std::fs::read("leaf.jpg")?;
//! let result = service.predict(&bytes);
//! println!("{}", result.display());
//! ```

pub mod advisory;
pub mod backend;
pub mod catalog;
pub mod config;
pub mod inference;
pub mod model;
pub mod utils;

// Re-export commonly used types
pub use catalog::{AdviceEntry, AdviceRepository, LabelMap};
pub use config::ServiceConfig;
pub use inference::{
    DiseasePredictionService, EngineHandle, ImageNormalizer, InferenceEngine, PredictionResult,
};
pub use model::{PlantClassifier, PlantClassifierConfig};
pub use utils::error::{PlantDoctorError, PredictionErrorKind, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
