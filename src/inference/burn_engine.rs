//! Full-network backend
//!
//! Restores a [`PlantClassifier`] from a `CompactRecorder` record and runs
//! it on the crate's inference backend.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use burn::{
    module::Module,
    record::CompactRecorder,
    tensor::{backend::Backend, Tensor, TensorData},
};
use tracing::debug;

use super::engine::{BackendKind, EngineSpec, InferenceEngine};
use super::normalizer::{ImageTensor, CHANNELS};
use crate::backend::{default_device, InferenceBackend};
use crate::model::cnn::ConvBlock;
use crate::model::{PlantClassifier, PlantClassifierConfig, MIN_INPUT_SIZE};
use crate::utils::error::{PlantDoctorError, Result};

/// A Burn classifier behind a lock
///
/// Burn modules are `Send` but not `Sync`. Each request clones the module
/// under the lock (parameters are reference counted) and runs the forward
/// pass outside it.
pub struct BurnEngine<B: Backend = InferenceBackend> {
    model: Mutex<PlantClassifier<B>>,
    device: B::Device,
    num_classes: usize,
    artifact_path: PathBuf,
}

impl BurnEngine<InferenceBackend> {
    /// Load a record on the default device
    pub fn load(spec: &EngineSpec) -> Result<Self> {
        Self::load_on(spec, default_device())
    }
}

impl<B: Backend> BurnEngine<B> {
    /// Load a record onto a specific device
    pub fn load_on(spec: &EngineSpec, device: B::Device) -> Result<Self> {
        let path = spec.artifact_path.as_path();
        if !path.exists() {
            return Err(PlantDoctorError::ModelLoad(
                path.to_path_buf(),
                "artifact does not exist".to_string(),
            ));
        }

        let config = PlantClassifierConfig::new().with_base_filters(spec.base_filters);
        let recorder = CompactRecorder::new();
        let model = PlantClassifier::<B>::new(&config, &device)
            .load_file(path, &recorder, &device)
            .map_err(|e| PlantDoctorError::ModelLoad(path.to_path_buf(), format!("{:?}", e)))?;

        check_architecture(&model, spec.base_filters, path)?;

        let num_classes = model.num_classes();
        debug!("Restored PlantClassifier with {} classes from {:?}", num_classes, path);

        let engine = Self::from_model(model, device, path);
        engine.warm_up(spec.image_size)?;
        Ok(engine)
    }

    /// Wrap an in-memory model
    pub fn from_model(model: PlantClassifier<B>, device: B::Device, artifact_path: &Path) -> Self {
        let num_classes = model.num_classes();
        Self {
            model: Mutex::new(model),
            device,
            num_classes,
            artifact_path: artifact_path.to_path_buf(),
        }
    }

    pub fn artifact_path(&self) -> &Path {
        &self.artifact_path
    }

    fn snapshot(&self) -> Result<PlantClassifier<B>> {
        self.model
            .lock()
            .map(|model| model.clone())
            .map_err(|_| PlantDoctorError::Inference("model lock poisoned".to_string()))
    }

    /// Softmax over one NCHW image; a panic inside Burn comes back as an
    /// `Inference` error
    fn forward(&self, data: TensorData) -> Result<Vec<f32>> {
        let model = self.snapshot()?;
        let device = &self.device;

        catch_unwind(AssertUnwindSafe(|| {
            let input = Tensor::<B, 4>::from_data(data, device);
            model.forward_softmax(input).into_data().to_vec::<f32>()
        }))
        .map_err(|payload| {
            PlantDoctorError::Inference(format!("forward pass panicked: {}", panic_message(&*payload)))
        })?
        .map_err(|e| PlantDoctorError::Inference(format!("{:?}", e)))
    }

    /// Run one blank image through the restored network so a record that
    /// only fails mid-forward is rejected at load time
    fn warm_up(&self, image_size: usize) -> Result<()> {
        let size = image_size.max(MIN_INPUT_SIZE);
        let data = TensorData::new(vec![0.0f32; CHANNELS * size * size], [1, CHANNELS, size, size]);

        let probs = self
            .forward(data)
            .map_err(|e| PlantDoctorError::ModelLoad(self.artifact_path.clone(), e.to_string()))?;
        if probs.len() != self.num_classes {
            return Err(PlantDoctorError::ModelLoad(
                self.artifact_path.clone(),
                format!(
                    "forward pass produced {} scores for a {}-class head",
                    probs.len(),
                    self.num_classes
                ),
            ));
        }
        Ok(())
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// Records store no architecture, so a record from a different network
/// loads cleanly and then fails mid-forward. Compare every restored
/// parameter shape against the configured width first.
fn check_architecture<B: Backend>(
    model: &PlantClassifier<B>,
    base_filters: usize,
    path: &Path,
) -> Result<()> {
    let mismatch = |what: &str, expected: &[usize], found: &[usize]| {
        PlantDoctorError::ModelLoad(
            path.to_path_buf(),
            format!(
                "record does not match a PlantClassifier with base_filters={}: \
                 {} is {:?}, expected {:?}",
                base_filters, what, found, expected
            ),
        )
    };

    let blocks: [(&str, &ConvBlock<B>, usize, usize); 4] = [
        ("conv1", &model.conv1, CHANNELS, base_filters),
        ("conv2", &model.conv2, base_filters, base_filters * 2),
        ("conv3", &model.conv3, base_filters * 2, base_filters * 4),
        ("conv4", &model.conv4, base_filters * 4, base_filters * 8),
    ];

    for (name, block, channels_in, channels_out) in blocks {
        let weight = block.conv.weight.val().dims();
        if weight[..2] != [channels_out, channels_in] {
            return Err(mismatch(
                &format!("{name}.conv.weight"),
                &[channels_out, channels_in, weight[2], weight[3]],
                &weight,
            ));
        }
        if let Some(bias) = &block.conv.bias {
            let dims = bias.val().dims();
            if dims != [channels_out] {
                return Err(mismatch(&format!("{name}.conv.bias"), &[channels_out], &dims));
            }
        }

        let norm = [
            ("gamma", block.bn.gamma.val().dims()),
            ("beta", block.bn.beta.val().dims()),
            ("running_mean", block.bn.running_mean.value().dims()),
            ("running_var", block.bn.running_var.value().dims()),
        ];
        for (param, dims) in norm {
            if dims != [channels_out] {
                return Err(mismatch(&format!("{name}.bn.{param}"), &[channels_out], &dims));
            }
        }
    }

    let fc1 = model.fc1.weight.val().dims();
    if fc1[0] != base_filters * 8 {
        return Err(mismatch("fc1.weight", &[base_filters * 8, fc1[1]], &fc1));
    }
    let fc2 = model.fc2.weight.val().dims();
    if fc2[0] != fc1[1] {
        return Err(mismatch("fc2.weight", &[fc1[1], fc2[1]], &fc2));
    }

    if model.num_classes() == 0 {
        return Err(PlantDoctorError::ModelLoad(
            path.to_path_buf(),
            "classifier head has no outputs".to_string(),
        ));
    }

    Ok(())
}

impl<B: Backend> InferenceEngine for BurnEngine<B>
where
    B::Device: Send + Sync,
{
    fn backend(&self) -> BackendKind {
        BackendKind::Burn
    }

    fn num_classes(&self) -> usize {
        self.num_classes
    }

    fn classify(&self, tensor: &ImageTensor) -> Result<Vec<f32>> {
        let [_, h, w, c] = tensor.shape();
        if h < MIN_INPUT_SIZE || w < MIN_INPUT_SIZE {
            return Err(PlantDoctorError::Inference(format!(
                "input {}x{} is smaller than the {}x{} minimum",
                h, w, MIN_INPUT_SIZE, MIN_INPUT_SIZE
            )));
        }

        self.forward(TensorData::new(tensor.to_nchw(), [1, c, h, w]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn save_model(dir: &Path, num_classes: usize, base_filters: usize) -> PathBuf {
        let device = default_device();
        let config = PlantClassifierConfig::new()
            .with_num_classes(num_classes)
            .with_base_filters(base_filters);
        let model = PlantClassifier::<InferenceBackend>::new(&config, &device);

        let path = dir.join("plant_classifier.mpk");
        model.save_file(&path, &CompactRecorder::new()).unwrap();
        path
    }

    fn spec(path: &Path, base_filters: usize) -> EngineSpec {
        let mut spec = EngineSpec::new(BackendKind::Burn, path);
        spec.base_filters = base_filters;
        spec.image_size = 32;
        spec
    }

    fn leaf(size: usize) -> ImageTensor {
        let data = (0..size * size * CHANNELS)
            .map(|i| (i % 255) as f32 / 255.0)
            .collect();
        ImageTensor::from_nhwc(data, size, size).unwrap()
    }

    #[test]
    fn test_load_and_classify() {
        let dir = tempdir().unwrap();
        let path = save_model(dir.path(), 4, 4);

        let engine = BurnEngine::load(&spec(&path, 4)).unwrap();
        assert_eq!(engine.num_classes(), 4);
        assert_eq!(engine.backend(), BackendKind::Burn);

        let probs = engine.classify(&leaf(32)).unwrap();
        assert_eq!(probs.len(), 4);
        assert!(probs.iter().all(|p| (0.0..=1.0).contains(p)));
        let total: f32 = probs.iter().sum();
        assert!((total - 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_classify_is_deterministic() {
        let dir = tempdir().unwrap();
        let path = save_model(dir.path(), 3, 4);
        let engine = BurnEngine::load(&spec(&path, 4)).unwrap();

        let image = leaf(32);
        let a = engine.classify(&image).unwrap();
        let b = engine.classify(&image).unwrap();
        assert_eq!(a, b);
    }

    /// A 4-filter record whose second block was widened to 16 channels
    fn tampered_model() -> PlantClassifier<InferenceBackend> {
        let device = default_device();
        let config = PlantClassifierConfig::new()
            .with_num_classes(4)
            .with_base_filters(4);
        let mut model = PlantClassifier::<InferenceBackend>::new(&config, &device);
        model.conv2 = ConvBlock::new(4, 16, 3, true, &device);
        model
    }

    #[test]
    fn test_widened_middle_layer_is_rejected_at_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("plant_classifier.mpk");
        tampered_model()
            .save_file(&path, &CompactRecorder::new())
            .unwrap();

        let err = BurnEngine::load(&spec(&path, 4)).err().unwrap();
        assert!(matches!(err, PlantDoctorError::ModelLoad(..)));
        assert!(err.to_string().contains("conv2.conv.weight"));
    }

    #[test]
    fn test_forward_panic_becomes_inference_error() {
        let engine = BurnEngine::from_model(
            tampered_model(),
            default_device(),
            Path::new("tampered.mpk"),
        );

        let err = engine.classify(&leaf(32)).unwrap_err();
        assert!(matches!(err, PlantDoctorError::Inference(_)));
        assert!(err.to_string().contains("panicked"));

        // The lock is not poisoned by the failed request
        assert!(engine.snapshot().is_ok());
    }

    #[test]
    fn test_input_below_minimum_size() {
        let dir = tempdir().unwrap();
        let path = save_model(dir.path(), 4, 4);
        let engine = BurnEngine::load(&spec(&path, 4)).unwrap();

        let err = engine.classify(&leaf(MIN_INPUT_SIZE - 1)).unwrap_err();
        assert!(matches!(err, PlantDoctorError::Inference(_)));
        assert_eq!(engine.classify(&leaf(MIN_INPUT_SIZE)).unwrap().len(), 4);
    }

    #[test]
    fn test_malformed_record() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("plant_classifier.mpk");
        fs::write(&path, b"not a msgpack record").unwrap();

        let err = BurnEngine::load(&spec(&path, 4)).err().unwrap();
        assert!(matches!(err, PlantDoctorError::ModelLoad(..)));
    }

    #[test]
    fn test_missing_record() {
        let err = BurnEngine::load(&spec(Path::new("/nope/model.mpk"), 4))
            .err()
            .unwrap();
        assert!(err.to_string().contains("/nope/model.mpk"));
    }
}
