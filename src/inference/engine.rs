//! Inference Engine
//!
//! A loaded classifier behind one capability trait. Two backends exist:
//! - [`BurnEngine`](super::burn_engine::BurnEngine): the full network, a Burn
//!   `PlantClassifier` restored from a `CompactRecorder` record
//! - [`TractEngine`](super::tract_engine::TractEngine): a compiled network,
//!   TFLite (float or quantized) or ONNX, run by tract
//!
//! Callers hold an [`EngineHandle`], which may be "not loaded"; classifying
//! through it then fails with `ModelNotReady` instead of bringing the
//! process down.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::burn_engine::BurnEngine;
use super::normalizer::ImageTensor;
use super::tract_engine::TractEngine;
use crate::utils::error::{PlantDoctorError, Result};

/// Which engine implementation serves an artifact
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Burn record of the full network (`.mpk`)
    #[default]
    Burn,
    /// Compiled TFLite flatbuffer, possibly quantized (`.tflite`)
    Tflite,
    /// ONNX graph (`.onnx`)
    Onnx,
}

impl BackendKind {
    /// Guess the backend from an artifact's file extension
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_lowercase();
        match ext.as_str() {
            "mpk" => Some(BackendKind::Burn),
            "tflite" => Some(BackendKind::Tflite),
            "onnx" => Some(BackendKind::Onnx),
            _ => None,
        }
    }

    /// Whether this backend runs a compiled graph
    pub fn is_compiled(&self) -> bool {
        !matches!(self, BackendKind::Burn)
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Burn => write!(f, "burn"),
            BackendKind::Tflite => write!(f, "tflite"),
            BackendKind::Onnx => write!(f, "onnx"),
        }
    }
}

impl std::str::FromStr for BackendKind {
    type Err = PlantDoctorError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "burn" | "mpk" => Ok(BackendKind::Burn),
            "tflite" => Ok(BackendKind::Tflite),
            "onnx" => Ok(BackendKind::Onnx),
            other => Err(PlantDoctorError::Config(format!(
                "unknown model backend '{}' (expected burn, tflite or onnx)",
                other
            ))),
        }
    }
}

/// Memory layout a compiled graph expects its image input in
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TensorLayout {
    /// `[1, H, W, 3]`, Keras / TFLite convention
    #[default]
    Nhwc,
    /// `[1, 3, H, W]`, PyTorch / Burn convention
    Nchw,
}

/// Everything needed to load an artifact
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSpec {
    pub backend: BackendKind,
    pub artifact_path: PathBuf,
    /// Square input resolution the artifact was trained at
    pub image_size: usize,
    /// Input layout for compiled graphs
    pub layout: TensorLayout,
    /// Base filter width of the Burn architecture
    pub base_filters: usize,
}

impl EngineSpec {
    pub fn new(backend: BackendKind, artifact_path: impl Into<PathBuf>) -> Self {
        Self {
            backend,
            artifact_path: artifact_path.into(),
            image_size: super::normalizer::DEFAULT_IMAGE_SIZE as usize,
            layout: TensorLayout::default(),
            base_filters: 32,
        }
    }
}

/// A loaded classifier producing one probability vector per image
///
/// Implementations must be deterministic and safe to call concurrently;
/// `classify` never mutates the input tensor or the artifact.
pub trait InferenceEngine: Send + Sync {
    /// Which backend this is
    fn backend(&self) -> BackendKind;

    /// Length of the probability vector this artifact produces
    fn num_classes(&self) -> usize;

    /// Spatial input size `(H, W)` the artifact is fixed to, if any
    fn input_size(&self) -> Option<(usize, usize)> {
        None
    }

    /// Run the classifier on a `[1, H, W, 3]` tensor
    fn classify(&self, tensor: &ImageTensor) -> Result<Vec<f32>>;
}

/// Load an engine for the given artifact
pub fn load_engine(spec: &EngineSpec) -> Result<Box<dyn InferenceEngine>> {
    let path = &spec.artifact_path;
    if !path.exists() {
        return Err(PlantDoctorError::ModelLoad(
            path.clone(),
            "artifact does not exist".to_string(),
        ));
    }

    let engine: Box<dyn InferenceEngine> = match spec.backend {
        BackendKind::Burn => Box::new(BurnEngine::load(spec)?),
        BackendKind::Tflite | BackendKind::Onnx => Box::new(TractEngine::load(spec)?),
    };

    info!(
        "Loaded {} model from {:?} ({} classes)",
        engine.backend(),
        path,
        engine.num_classes()
    );
    Ok(engine)
}

/// Shared handle to an engine that may not be loaded
pub struct EngineHandle {
    engine: Option<Box<dyn InferenceEngine>>,
    artifact_path: Option<PathBuf>,
    load_error: Option<String>,
}

impl EngineHandle {
    /// Load an engine, failing with `ModelLoad` if the artifact is unusable
    pub fn load(spec: &EngineSpec) -> Result<Self> {
        let engine = load_engine(spec)?;
        Ok(Self {
            engine: Some(engine),
            artifact_path: Some(spec.artifact_path.clone()),
            load_error: None,
        })
    }

    /// Load an engine, or fall back to the not-loaded state on failure
    pub fn load_or_degraded(spec: &EngineSpec) -> Self {
        match Self::load(spec) {
            Ok(handle) => handle,
            Err(e) => {
                warn!("Model unavailable, serving in degraded mode: {}", e);
                Self {
                    engine: None,
                    artifact_path: Some(spec.artifact_path.clone()),
                    load_error: Some(e.to_string()),
                }
            }
        }
    }

    /// Wrap an already constructed engine
    pub fn from_engine(engine: Box<dyn InferenceEngine>) -> Self {
        Self {
            engine: Some(engine),
            artifact_path: None,
            load_error: None,
        }
    }

    /// A handle with no model; every `classify` fails with `ModelNotReady`
    pub fn not_loaded() -> Self {
        Self {
            engine: None,
            artifact_path: None,
            load_error: None,
        }
    }

    /// Whether a model is loaded and can serve requests
    pub fn ready(&self) -> bool {
        self.engine.is_some()
    }

    pub fn backend(&self) -> Option<BackendKind> {
        self.engine.as_ref().map(|e| e.backend())
    }

    pub fn num_classes(&self) -> Option<usize> {
        self.engine.as_ref().map(|e| e.num_classes())
    }

    /// Input size the loaded artifact requires, if it fixes one
    pub fn input_size(&self) -> Option<(usize, usize)> {
        self.engine.as_ref().and_then(|e| e.input_size())
    }

    pub fn artifact_path(&self) -> Option<&Path> {
        self.artifact_path.as_deref()
    }

    /// Why loading failed, when the handle was built in degraded mode
    pub fn load_error(&self) -> Option<&str> {
        self.load_error.as_deref()
    }

    /// Classify through the loaded engine
    ///
    /// Also checks the output length against the engine's declared class
    /// count so a misbehaving artifact cannot index past the catalog.
    pub fn classify(&self, tensor: &ImageTensor) -> Result<Vec<f32>> {
        let engine = self.engine.as_ref().ok_or(PlantDoctorError::ModelNotReady)?;
        let probs = engine.classify(tensor)?;

        if probs.len() != engine.num_classes() {
            return Err(PlantDoctorError::Inference(format!(
                "model returned {} scores, expected {}",
                probs.len(),
                engine.num_classes()
            )));
        }

        Ok(probs)
    }
}

impl fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineHandle")
            .field("ready", &self.ready())
            .field("backend", &self.backend())
            .field("num_classes", &self.num_classes())
            .field("artifact_path", &self.artifact_path)
            .field("load_error", &self.load_error)
            .finish()
    }
}

/// Index and value of the largest score
///
/// NaN scores never win. Returns `None` for an empty vector.
pub fn argmax(scores: &[f32]) -> Option<(usize, f32)> {
    scores
        .iter()
        .copied()
        .enumerate()
        .filter(|(_, p)| !p.is_nan())
        .fold(None, |best, (i, p)| match best {
            Some((_, bp)) if bp >= p => best,
            _ => Some((i, p)),
        })
}
