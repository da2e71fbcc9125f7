//! End-to-end checks of the diagnosis pipeline: catalog files on disk, a
//! saved Burn record, and stub engines with known outputs.

use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

use burn::module::Module;
use burn::record::CompactRecorder;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use tempfile::TempDir;

use plant_doctor::backend::{default_device, InferenceBackend};
use plant_doctor::inference::{BackendKind, ImageTensor};
use plant_doctor::model::cnn::ConvBlock;
use plant_doctor::{
    AdviceEntry, AdviceRepository, DiseasePredictionService, EngineHandle, ImageNormalizer,
    InferenceEngine, LabelMap, PlantClassifier, PlantClassifierConfig, PlantDoctorError,
    PredictionErrorKind, Result, ServiceConfig,
};

const LABELS: [&str; 4] = [
    "Potato___Early_blight",
    "Potato___healthy",
    "Tomato_Early_blight",
    "Tomato_healthy",
];

/// Engine returning the same scores for every image
struct FixedScores(Vec<f32>);

impl InferenceEngine for FixedScores {
    fn backend(&self) -> BackendKind {
        BackendKind::Onnx
    }

    fn num_classes(&self) -> usize {
        self.0.len()
    }

    fn classify(&self, _tensor: &ImageTensor) -> Result<Vec<f32>> {
        Ok(self.0.clone())
    }
}

fn leaf_jpeg() -> Vec<u8> {
    let img = RgbImage::from_fn(48, 40, |x, y| {
        Rgb([(40 + x * 2) as u8, (120 + y) as u8, 30])
    });
    let mut buf = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(img)
        .write_to(&mut buf, ImageFormat::Jpeg)
        .unwrap();
    buf.into_inner()
}

fn labels() -> LabelMap {
    LabelMap::from_labels(LABELS).unwrap()
}

fn stub_service(scores: Vec<f32>) -> DiseasePredictionService {
    let engine = EngineHandle::from_engine(Box::new(FixedScores(scores)));
    DiseasePredictionService::new(engine, labels(), AdviceRepository::builtin())
        .unwrap()
        .with_normalizer(ImageNormalizer::new().with_image_size(32))
}

/// Write a label file and a randomly initialised 4-class record
fn write_fixtures(dir: &Path) -> (PathBuf, PathBuf) {
    let labels_path = dir.join("class_names.json");
    let mapping: serde_json::Map<String, serde_json::Value> = LABELS
        .iter()
        .enumerate()
        .map(|(i, label)| (label.to_string(), serde_json::Value::from(i)))
        .collect();
    fs::write(&labels_path, serde_json::to_string(&mapping).unwrap()).unwrap();

    let device = default_device();
    let config = PlantClassifierConfig::new()
        .with_num_classes(LABELS.len())
        .with_base_filters(4);
    let model = PlantClassifier::<InferenceBackend>::new(&config, &device);
    let model_path = dir.join("plant_doctor.mpk");
    model.save_file(&model_path, &CompactRecorder::new()).unwrap();

    (labels_path, model_path)
}

fn service_config(labels_path: &Path, model_path: &Path) -> ServiceConfig {
    let mut config = ServiceConfig::default().with_artifact(model_path);
    config.catalog.labels_path = labels_path.to_path_buf();
    config.model.base_filters = 4;
    config.preprocess.image_size = 32;
    config
}

#[test]
fn test_prediction_without_model_reports_not_loaded() {
    let service = DiseasePredictionService::new(
        EngineHandle::not_loaded(),
        labels(),
        AdviceRepository::builtin(),
    )
    .unwrap();

    assert!(!service.ready());
    let result = service.predict(&leaf_jpeg());

    assert!(!result.success);
    assert_eq!(result.error.as_deref(), Some("model not loaded"));
    assert_eq!(result.error_kind, Some(PredictionErrorKind::ModelNotReady));
    assert!(result.disease_label.is_none());
}

#[test]
fn test_empty_upload_is_a_decode_failure() {
    let result = stub_service(vec![0.25; 4]).predict(&[]);

    assert!(!result.success);
    assert_eq!(result.error_kind, Some(PredictionErrorKind::Decode));
    assert!(result
        .error
        .as_deref()
        .unwrap()
        .starts_with("failed to decode image"));
}

#[test]
fn test_known_scores_produce_label_confidence_and_advice() {
    let result = stub_service(vec![0.01, 0.02, 0.95, 0.02]).predict(&leaf_jpeg());

    assert!(result.success);
    assert_eq!(result.class_index, Some(2));
    assert_eq!(result.disease_label.as_deref(), Some("Tomato_Early_blight"));
    assert_eq!(result.confidence, Some(0.95));
    assert_eq!(
        result.advice.as_ref(),
        Some(AdviceRepository::builtin().advice_for("Tomato_Early_blight"))
    );
    assert_ne!(result.advice.unwrap(), AdviceEntry::default_entry());
}

#[test]
fn test_argmax_maps_back_to_every_label() {
    for (index, expected) in LABELS.iter().enumerate() {
        let mut scores = vec![0.0; LABELS.len()];
        scores[index] = 1.0;

        let result = stub_service(scores).predict(&leaf_jpeg());
        assert_eq!(result.class_index, Some(index));
        assert_eq!(result.disease_label.as_deref(), Some(*expected));
    }
}

#[test]
fn test_unlisted_label_gets_default_advice() {
    let labels = LabelMap::from_labels(["Cassava_mosaic", "Tomato_healthy"]).unwrap();
    let engine = EngineHandle::from_engine(Box::new(FixedScores(vec![0.9, 0.1])));
    let service = DiseasePredictionService::new(engine, labels, AdviceRepository::builtin())
        .unwrap()
        .with_normalizer(ImageNormalizer::new().with_image_size(32));

    let result = service.predict(&leaf_jpeg());
    assert_eq!(result.advice, Some(AdviceEntry::default_entry()));
}

#[test]
fn test_service_from_config_with_burn_record() {
    let dir = TempDir::new().unwrap();
    let (labels_path, model_path) = write_fixtures(dir.path());

    let service = DiseasePredictionService::from_config(&service_config(&labels_path, &model_path))
        .unwrap();
    assert!(service.ready());

    let status = service.status();
    assert_eq!(status.backend.as_deref(), Some("burn"));
    assert_eq!(status.diseases_detectable, 4);
    assert_eq!(service.capabilities(), LABELS.to_vec());

    let bytes = leaf_jpeg();
    let first = service.predict(&bytes);
    let second = service.predict(&bytes);

    assert!(first.success);
    assert!(LABELS.contains(&first.disease_label.as_deref().unwrap()));
    let confidence = first.confidence.unwrap();
    assert!((0.0..=1.0).contains(&confidence));
    assert_eq!(first.disease_label, second.disease_label);
    assert_eq!(first.confidence, second.confidence);
    assert_eq!(first.top_predictions.len(), 3);
}

#[test]
fn test_concurrent_predictions_share_one_service() {
    let dir = TempDir::new().unwrap();
    let (labels_path, model_path) = write_fixtures(dir.path());
    let service = Arc::new(
        DiseasePredictionService::from_config(&service_config(&labels_path, &model_path))
            .unwrap(),
    );

    let bytes = Arc::new(leaf_jpeg());
    let expected = service.predict(&bytes);

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let service = Arc::clone(&service);
            let bytes = Arc::clone(&bytes);
            thread::spawn(move || service.predict(&bytes))
        })
        .collect();

    for handle in handles {
        let result = handle.join().unwrap();
        assert!(result.success);
        assert_eq!(result.disease_label, expected.disease_label);
        assert_eq!(result.confidence, expected.confidence);
    }
}

#[test]
fn test_missing_model_starts_degraded_or_fails() {
    let dir = TempDir::new().unwrap();
    let (labels_path, _) = write_fixtures(dir.path());
    let missing = dir.path().join("absent.mpk");

    let config = service_config(&labels_path, &missing);
    let service = DiseasePredictionService::from_config(&config).unwrap();
    assert!(!service.ready());
    assert!(service.status().load_error.is_some());
    assert_eq!(
        service.predict(&leaf_jpeg()).error_kind,
        Some(PredictionErrorKind::ModelNotReady)
    );

    let mut strict = config;
    strict.service.allow_degraded = false;
    let err = DiseasePredictionService::from_config(&strict).unwrap_err();
    assert!(matches!(err, PlantDoctorError::ModelLoad(..)));
}

#[test]
fn test_record_with_wrong_inner_width_never_serves() {
    let dir = TempDir::new().unwrap();
    let (labels_path, model_path) = write_fixtures(dir.path());

    // Overwrite the record with one whose second block is 16 wide
    let device = default_device();
    let config = PlantClassifierConfig::new()
        .with_num_classes(LABELS.len())
        .with_base_filters(4);
    let mut model = PlantClassifier::<InferenceBackend>::new(&config, &device);
    model.conv2 = ConvBlock::new(4, 16, 3, true, &device);
    model.save_file(&model_path, &CompactRecorder::new()).unwrap();

    let config = service_config(&labels_path, &model_path);
    let service = DiseasePredictionService::from_config(&config).unwrap();
    assert!(!service.ready());
    assert!(service.status().load_error.unwrap().contains("conv2"));

    let result = service.predict(&leaf_jpeg());
    assert!(!result.success);
    assert_eq!(result.error_kind, Some(PredictionErrorKind::ModelNotReady));

    let mut strict = config;
    strict.service.allow_degraded = false;
    let err = DiseasePredictionService::from_config(&strict).unwrap_err();
    assert!(matches!(err, PlantDoctorError::ModelLoad(..)));
}

#[test]
fn test_tiny_image_size_is_rejected_before_loading() {
    let dir = TempDir::new().unwrap();
    let (labels_path, model_path) = write_fixtures(dir.path());

    let mut config = service_config(&labels_path, &model_path);
    config.preprocess.image_size = 4;
    let err = DiseasePredictionService::from_config(&config).unwrap_err();
    assert!(matches!(err, PlantDoctorError::Config(_)));
}

#[test]
fn test_catalog_errors_are_fatal() {
    let dir = TempDir::new().unwrap();
    let (_, model_path) = write_fixtures(dir.path());

    let config = service_config(&dir.path().join("missing.json"), &model_path);
    let err = DiseasePredictionService::from_config(&config).unwrap_err();
    assert!(matches!(err, PlantDoctorError::CatalogLoad(..)));

    // Five labels against a four-class record
    let wide = dir.path().join("wide.json");
    fs::write(&wide, r#"["a", "b", "c", "d", "e"]"#).unwrap();
    let err = DiseasePredictionService::from_config(&service_config(&wide, &model_path))
        .unwrap_err();
    assert!(matches!(
        err,
        PlantDoctorError::CatalogMismatch {
            engine: 4,
            catalog: 5
        }
    ));
}

#[test]
fn test_predict_file_directory_layout() {
    let dir = TempDir::new().unwrap();
    let image_path = dir.path().join("leaf.jpg");
    fs::write(&image_path, leaf_jpeg()).unwrap();

    let result = stub_service(vec![0.1, 0.6, 0.2, 0.1]).predict_file(&image_path);
    assert!(result.success);
    assert_eq!(result.disease_label.as_deref(), Some("Potato___healthy"));
    assert_eq!(result.image_path.as_deref(), Some(image_path.as_path()));
}
