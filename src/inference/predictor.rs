//! Disease Prediction Service
//!
//! Orchestrates one diagnosis: normalize the upload, classify it, take the
//! argmax, name it through the label catalog and attach advice. Every
//! request ends in a [`PredictionResult`]; per-request failures are
//! reported inside it and never escape `predict`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::engine::{argmax, EngineHandle};
use super::normalizer::ImageNormalizer;
use crate::catalog::{AdviceEntry, AdviceRepository, LabelMap};
use crate::config::ServiceConfig;
use crate::utils::error::{PlantDoctorError, PredictionErrorKind, Result};

/// Default number of ranked predictions in a result
pub const DEFAULT_TOP_K: usize = 3;

/// One ranked class of a prediction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassPrediction {
    pub class_index: usize,
    pub label: String,
    pub probability: f32,
}

/// Outcome of a single diagnosis request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    pub success: bool,

    /// Predicted disease label
    pub disease_label: Option<String>,

    /// Probability of the predicted class
    pub confidence: Option<f32>,

    /// Treatment advice for the predicted label
    pub advice: Option<AdviceEntry>,

    /// When the result was produced
    pub timestamp: DateTime<Utc>,

    /// Human-readable failure description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Failure category
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<PredictionErrorKind>,

    /// Predicted class index
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class_index: Option<usize>,

    /// Highest-probability classes, best first
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub top_predictions: Vec<ClassPrediction>,

    /// Time spent normalizing and classifying
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inference_time_ms: Option<f64>,

    /// Source file, for predictions made from disk
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_path: Option<PathBuf>,
}

impl PredictionResult {
    /// A successful diagnosis
    pub fn success(
        class_index: usize,
        disease_label: String,
        confidence: f32,
        advice: AdviceEntry,
        top_predictions: Vec<ClassPrediction>,
        inference_time_ms: f64,
    ) -> Self {
        Self {
            success: true,
            disease_label: Some(disease_label),
            confidence: Some(confidence),
            advice: Some(advice),
            timestamp: Utc::now(),
            error: None,
            error_kind: None,
            class_index: Some(class_index),
            top_predictions,
            inference_time_ms: Some(inference_time_ms),
            image_path: None,
        }
    }

    /// A failed request; carries no label, confidence or advice
    pub fn failure(err: &PlantDoctorError) -> Self {
        Self {
            success: false,
            disease_label: None,
            confidence: None,
            advice: None,
            timestamp: Utc::now(),
            error: Some(err.to_string()),
            error_kind: Some(err.kind()),
            class_index: None,
            top_predictions: Vec::new(),
            inference_time_ms: None,
            image_path: None,
        }
    }

    fn with_image_path(mut self, path: &Path) -> Self {
        self.image_path = Some(path.to_path_buf());
        self
    }

    /// Whether the prediction clears a confidence threshold
    pub fn is_high_confidence(&self, threshold: f32) -> bool {
        self.confidence.is_some_and(|c| c >= threshold)
    }

    /// Pretty print the prediction result
    pub fn display(&self) -> String {
        let mut output = String::new();

        if let Some(path) = &self.image_path {
            output.push_str(&format!("Image: {:?}\n", path));
        }

        if !self.success {
            output.push_str(&format!(
                "Prediction failed: {}\n",
                self.error.as_deref().unwrap_or("unknown error")
            ));
            return output;
        }

        output.push_str(&format!(
            "Prediction: {} (class {})\n",
            self.disease_label.as_deref().unwrap_or("-"),
            self.class_index.map_or_else(|| "-".to_string(), |i| i.to_string())
        ));
        if let Some(confidence) = self.confidence {
            output.push_str(&format!("Confidence: {:.2}%\n", confidence * 100.0));
        }
        if let Some(ms) = self.inference_time_ms {
            output.push_str(&format!("Inference time: {:.2} ms\n", ms));
        }

        if !self.top_predictions.is_empty() {
            output.push_str(&format!("\nTop-{} predictions:\n", self.top_predictions.len()));
            for (i, p) in self.top_predictions.iter().enumerate() {
                output.push_str(&format!(
                    "  {}. {} (class {}) - {:.2}%\n",
                    i + 1,
                    p.label,
                    p.class_index,
                    p.probability * 100.0
                ));
            }
        }

        if let Some(advice) = &self.advice {
            output.push_str(&format!("\nTreatment: {}\n", advice.treatment));
            output.push_str(&format!("ሕክምና: {}\n", advice.localized_treatment));
            if !advice.prevention_tips.is_empty() {
                output.push_str("Prevention:\n");
                for tip in &advice.prevention_tips {
                    output.push_str(&format!("  - {}\n", tip));
                }
            }
            output.push_str(&format!("Organic options: {}\n", advice.organic_options));
        }

        output
    }
}

/// Match the normalizer to an artifact compiled for a fixed input size
///
/// A square size overrides the configured one; a non-square size cannot be
/// produced by the normalizer and fails with `Config`.
fn fit_normalizer(engine: &EngineHandle, normalizer: ImageNormalizer) -> Result<ImageNormalizer> {
    let Some((h, w)) = engine.input_size() else {
        return Ok(normalizer);
    };

    if h != w {
        return Err(PlantDoctorError::Config(format!(
            "model expects a {}x{} input; only square inputs are supported",
            h, w
        )));
    }
    if h as u32 != normalizer.image_size {
        warn!(
            "Model expects {}x{} input; overriding preprocess.image_size = {}",
            h, w, normalizer.image_size
        );
        return Ok(normalizer.with_image_size(h as u32));
    }
    Ok(normalizer)
}

/// Readiness snapshot of a service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub ready: bool,
    pub backend: Option<String>,
    pub artifact: Option<PathBuf>,
    pub diseases_detectable: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub load_error: Option<String>,
}

/// The diagnosis pipeline, immutable after construction
#[derive(Debug)]
pub struct DiseasePredictionService {
    engine: EngineHandle,
    labels: LabelMap,
    advice: AdviceRepository,
    normalizer: ImageNormalizer,
    top_k: usize,
}

impl DiseasePredictionService {
    /// Assemble a service from loaded parts
    ///
    /// Fails with `CatalogMismatch` when a loaded engine's class count and
    /// the label catalog disagree.
    pub fn new(engine: EngineHandle, labels: LabelMap, advice: AdviceRepository) -> Result<Self> {
        if let Some(engine_classes) = engine.num_classes() {
            if engine_classes != labels.len() {
                return Err(PlantDoctorError::CatalogMismatch {
                    engine: engine_classes,
                    catalog: labels.len(),
                });
            }
        }

        Ok(Self {
            engine,
            labels,
            advice,
            normalizer: ImageNormalizer::default(),
            top_k: DEFAULT_TOP_K,
        })
    }

    /// Build the whole pipeline from configuration
    pub fn from_config(config: &ServiceConfig) -> Result<Self> {
        config.validate()?;

        let labels = LabelMap::load(&config.catalog.labels_path)?;
        let advice = match &config.catalog.advice_path {
            Some(path) => AdviceRepository::load(path)?,
            None => AdviceRepository::builtin(),
        };

        let spec = config.engine_spec();
        let engine = if config.service.allow_degraded {
            EngineHandle::load_or_degraded(&spec)
        } else {
            EngineHandle::load(&spec)?
        };

        let normalizer = fit_normalizer(&engine, config.normalizer())?;
        let service = Self::new(engine, labels, advice)?
            .with_normalizer(normalizer)
            .with_top_k(config.service.top_k);

        info!(
            "Service ready={} backend={} artifact={:?} labels={} advice entries={}",
            service.ready(),
            config.model.backend,
            config.model.artifact_path,
            service.labels.len(),
            service.advice.len()
        );
        Ok(service)
    }

    /// Configure preprocessing
    pub fn with_normalizer(mut self, normalizer: ImageNormalizer) -> Self {
        self.normalizer = normalizer;
        self
    }

    /// Configure how many ranked classes each result carries
    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k.max(1);
        self
    }

    /// Whether a model is loaded
    pub fn ready(&self) -> bool {
        self.engine.ready()
    }

    pub fn labels(&self) -> &LabelMap {
        &self.labels
    }

    pub fn advice(&self) -> &AdviceRepository {
        &self.advice
    }

    /// Diagnose one uploaded image
    pub fn predict(&self, raw_image: &[u8]) -> PredictionResult {
        match self.diagnose(raw_image) {
            Ok(result) => result,
            Err(e) => {
                match e.kind() {
                    PredictionErrorKind::Decode => debug!("Rejected upload: {}", e),
                    _ => warn!("Prediction failed: {}", e),
                }
                PredictionResult::failure(&e)
            }
        }
    }

    /// Diagnose an image file; unreadable files are reported as decode
    /// failures
    pub fn predict_file(&self, path: &Path) -> PredictionResult {
        let result = match fs::read(path) {
            Ok(bytes) => self.predict(&bytes),
            Err(e) => {
                let err =
                    PlantDoctorError::Decode(format!("cannot read {}: {}", path.display(), e));
                debug!("{}", err);
                PredictionResult::failure(&err)
            }
        };
        result.with_image_path(path)
    }

    fn diagnose(&self, raw_image: &[u8]) -> Result<PredictionResult> {
        if !self.engine.ready() {
            return Err(PlantDoctorError::ModelNotReady);
        }

        let start = Instant::now();
        let tensor = self.normalizer.normalize(raw_image)?;
        let probs = self.engine.classify(&tensor)?;
        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;

        let (class_index, confidence) = argmax(&probs)
            .ok_or_else(|| PlantDoctorError::Inference("model returned no scores".to_string()))?;
        let label = self.labels.label_for(class_index)?;
        let advice = self.advice.advice_for(label).clone();

        debug!(
            "Predicted {} (class {}) at {:.3} in {:.1} ms",
            label, class_index, confidence, elapsed_ms
        );

        Ok(PredictionResult::success(
            class_index,
            label.to_string(),
            confidence,
            advice,
            self.rank(&probs),
            elapsed_ms,
        ))
    }

    /// The `top_k` most probable classes, best first
    fn rank(&self, probs: &[f32]) -> Vec<ClassPrediction> {
        let mut indexed: Vec<(usize, f32)> = probs
            .iter()
            .copied()
            .enumerate()
            .filter(|(_, p)| !p.is_nan())
            .collect();
        indexed.sort_by(|a, b| b.1.total_cmp(&a.1));

        indexed
            .into_iter()
            .take(self.top_k)
            .filter_map(|(idx, probability)| {
                let label = self.labels.label_for(idx).ok()?;
                Some(ClassPrediction {
                    class_index: idx,
                    label: label.to_string(),
                    probability,
                })
            })
            .collect()
    }

    /// Readiness and catalog size
    pub fn status(&self) -> ServiceStatus {
        ServiceStatus {
            ready: self.engine.ready(),
            backend: self.engine.backend().map(|b| b.to_string()),
            artifact: self.engine.artifact_path().map(Path::to_path_buf),
            diseases_detectable: self.labels.len(),
            load_error: self.engine.load_error().map(str::to_string),
        }
    }

    /// Detectable disease labels in class-index order
    pub fn capabilities(&self) -> Vec<String> {
        self.labels.labels().to_vec()
    }
}

/// Batch prediction statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchPredictionStats {
    /// Total number of images processed
    pub total_images: usize,

    /// Successful diagnoses
    pub succeeded: usize,

    /// Requests that ended in a failure result
    pub failed: usize,

    /// Total inference time over successful predictions
    pub total_time_ms: f64,

    /// Average inference time per successful prediction
    pub avg_time_per_image_ms: f64,

    /// Minimum inference time
    pub min_time_ms: f64,

    /// Maximum inference time
    pub max_time_ms: f64,

    /// Number of predictions at or above the confidence threshold
    pub high_confidence_count: usize,

    /// Confidence threshold used
    pub confidence_threshold: f32,
}

impl BatchPredictionStats {
    /// Calculate statistics from a batch of predictions
    pub fn from_predictions(predictions: &[PredictionResult], confidence_threshold: f32) -> Self {
        if predictions.is_empty() {
            return Self {
                confidence_threshold,
                ..Self::default()
            };
        }

        let times: Vec<f64> = predictions
            .iter()
            .filter_map(|p| p.inference_time_ms)
            .collect();
        let succeeded = predictions.iter().filter(|p| p.success).count();
        let total_time_ms: f64 = times.iter().sum();

        let high_confidence_count = predictions
            .iter()
            .filter(|p| p.is_high_confidence(confidence_threshold))
            .count();

        let (min_time_ms, max_time_ms, avg_time_per_image_ms) = if times.is_empty() {
            (0.0, 0.0, 0.0)
        } else {
            (
                times.iter().cloned().fold(f64::INFINITY, f64::min),
                times.iter().cloned().fold(0.0, f64::max),
                total_time_ms / times.len() as f64,
            )
        };

        Self {
            total_images: predictions.len(),
            succeeded,
            failed: predictions.len() - succeeded,
            total_time_ms,
            avg_time_per_image_ms,
            min_time_ms,
            max_time_ms,
            high_confidence_count,
            confidence_threshold,
        }
    }
}
