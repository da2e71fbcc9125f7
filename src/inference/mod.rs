//! Inference module: from uploaded bytes to a diagnosis
//!
//! This module provides:
//! - `normalizer`: decode and scale images into a `[1, H, W, 3]` tensor
//! - `engine`: the `InferenceEngine` capability and its loadable handle
//! - `burn_engine` / `tract_engine`: the full-network and compiled backends
//! - `predictor`: the orchestrating `DiseasePredictionService`

pub mod burn_engine;
pub mod engine;
pub mod normalizer;
pub mod predictor;
pub mod tract_engine;

// Re-export main types for convenience
pub use burn_engine::BurnEngine;
pub use engine::{argmax, BackendKind, EngineHandle, EngineSpec, InferenceEngine, TensorLayout};
pub use normalizer::{ImageNormalizer, ImageTensor, ResizeFilter};
pub use predictor::{
    BatchPredictionStats, ClassPrediction, DiseasePredictionService, PredictionResult,
    ServiceStatus,
};
pub use tract_engine::TractEngine;
