//! Compiled-network backend
//!
//! Runs TFLite flatbuffers (float or quantized) and ONNX graphs through
//! tract. The plan is optimized once at load time; `SimplePlan::run` takes
//! `&self`, so one plan serves concurrent requests.

use std::path::{Path, PathBuf};

use tract_onnx::prelude::*;
use tracing::debug;

use super::engine::{BackendKind, EngineSpec, InferenceEngine, TensorLayout};
use super::normalizer::{ImageTensor, CHANNELS};
use crate::utils::error::{PlantDoctorError, Result};

type Plan = SimplePlan<TypedFact, Box<dyn TypedOp>, TypedModel>;

/// Input encoding the compiled graph expects
#[derive(Debug, Clone, Copy, PartialEq)]
enum InputEncoding {
    Float,
    /// 8-bit input; pixels are quantized with the graph's zero point and scale
    Quantized {
        dt: DatumType,
        zero_point: i32,
        scale: f32,
    },
}

/// A TFLite or ONNX classifier
pub struct TractEngine {
    plan: Plan,
    backend: BackendKind,
    layout: TensorLayout,
    encoding: InputEncoding,
    /// Spatial size the plan was compiled for
    input_hw: (usize, usize),
    num_classes: usize,
    artifact_path: PathBuf,
}

impl TractEngine {
    /// Load and optimize a compiled artifact
    pub fn load(spec: &EngineSpec) -> Result<Self> {
        let path = spec.artifact_path.as_path();
        let size = spec.image_size;

        let (plan, layout, encoding, input_hw) = match spec.backend {
            BackendKind::Tflite => load_tflite(path, spec.layout, size)?,
            BackendKind::Onnx => load_onnx(path, spec.layout, size)?,
            BackendKind::Burn => {
                return Err(PlantDoctorError::ModelLoad(
                    path.to_path_buf(),
                    "burn records are not compiled graphs".to_string(),
                ))
            }
        };

        let mut engine = Self {
            plan,
            backend: spec.backend,
            layout,
            encoding,
            input_hw,
            num_classes: 0,
            artifact_path: path.to_path_buf(),
        };
        engine.num_classes = engine.detect_num_classes()?;

        debug!(
            "Compiled {} graph: input {:?} {:?} {:?}, {} classes",
            engine.backend, engine.input_hw, engine.layout, engine.encoding, engine.num_classes
        );
        Ok(engine)
    }

    pub fn artifact_path(&self) -> &Path {
        &self.artifact_path
    }

    /// Output width from the graph's output fact, or from a blank run when
    /// the fact is symbolic
    fn detect_num_classes(&self) -> Result<usize> {
        let fact = self
            .plan
            .model()
            .output_fact(0)
            .map_err(|e| PlantDoctorError::ModelLoad(self.artifact_path.clone(), e.to_string()))?;
        if let Some(dims) = fact.shape.as_concrete() {
            let count: usize = dims.iter().product();
            if count > 0 {
                return Ok(count);
            }
        }

        let (h, w) = self.input_hw;
        let blank = ImageTensor::from_nhwc(vec![0.0; h * w * CHANNELS], h, w)?;
        let scores = self.run(&blank).map_err(|e| {
            PlantDoctorError::ModelLoad(self.artifact_path.clone(), e.to_string())
        })?;
        if scores.is_empty() {
            return Err(PlantDoctorError::ModelLoad(
                self.artifact_path.clone(),
                "graph produces an empty output".to_string(),
            ));
        }
        Ok(scores.len())
    }

    fn input_tensor(&self, tensor: &ImageTensor) -> Result<Tensor> {
        let (h, w) = (tensor.height(), tensor.width());
        let values = match self.layout {
            TensorLayout::Nhwc => tensor.as_slice().to_vec(),
            TensorLayout::Nchw => tensor.to_nchw(),
        };
        let shape: [usize; 4] = match self.layout {
            TensorLayout::Nhwc => [1, h, w, CHANNELS],
            TensorLayout::Nchw => [1, CHANNELS, h, w],
        };

        let inference_err = |e: TractError| PlantDoctorError::Inference(e.to_string());

        match self.encoding {
            InputEncoding::Float => Tensor::from_shape(&shape, values.as_slice()).map_err(inference_err),
            InputEncoding::Quantized {
                dt,
                zero_point,
                scale,
            } => quantize_input(&values, &shape, dt, zero_point, scale).map_err(inference_err),
        }
    }

    fn run(&self, tensor: &ImageTensor) -> Result<Vec<f32>> {
        let (h, w) = self.input_hw;
        if (tensor.height(), tensor.width()) != (h, w) {
            return Err(PlantDoctorError::Inference(format!(
                "graph expects {}x{} input, got {}x{}",
                h,
                w,
                tensor.height(),
                tensor.width()
            )));
        }

        let input = self.input_tensor(tensor)?;
        let inference_err = |e: TractError| PlantDoctorError::Inference(e.to_string());

        let outputs = self.plan.run(tvec!(input.into())).map_err(inference_err)?;
        let output = outputs
            .first()
            .ok_or_else(|| PlantDoctorError::Inference("graph produced no outputs".to_string()))?;

        dequantize(output).map_err(inference_err)
    }
}

impl InferenceEngine for TractEngine {
    fn backend(&self) -> BackendKind {
        self.backend
    }

    fn num_classes(&self) -> usize {
        self.num_classes
    }

    fn input_size(&self) -> Option<(usize, usize)> {
        Some(self.input_hw)
    }

    fn classify(&self, tensor: &ImageTensor) -> Result<Vec<f32>> {
        self.run(tensor)
    }
}

/// Quantize [0, 1] pixels into an 8-bit tensor of type `dt`
///
/// `q = round(v / scale) + zero_point`, saturated to the storage range.
fn quantize_input(
    values: &[f32],
    shape: &[usize],
    dt: DatumType,
    zero_point: i32,
    scale: f32,
) -> TractResult<Tensor> {
    let quantize = |v: f32| (v / scale).round() + zero_point as f32;
    let raw = if dt.unquantized() == DatumType::I8 {
        let q: Vec<i8> = values
            .iter()
            .map(|&v| quantize(v).clamp(i8::MIN as f32, i8::MAX as f32) as i8)
            .collect();
        Tensor::from_shape(shape, q.as_slice())?
    } else {
        let q: Vec<u8> = values
            .iter()
            .map(|&v| quantize(v).clamp(0.0, u8::MAX as f32) as u8)
            .collect();
        Tensor::from_shape(shape, q.as_slice())?
    };

    // Plain u8/i8 to the quantized type of the same width copies the raw
    // values and attaches the graph's quantization params
    Ok(raw.cast_to_dt(dt)?.into_owned())
}

/// Flatten an output tensor to f32, applying zero point and scale when the
/// graph's output is quantized
fn dequantize(output: &Tensor) -> TractResult<Vec<f32>> {
    let dt = output.datum_type();
    match dt.qparams() {
        Some(qp) => {
            let (zero_point, scale) = qp.zp_scale();
            let values = if dt.unquantized() == DatumType::I8 {
                output
                    .as_slice::<i8>()?
                    .iter()
                    .map(|&q| (q as i32 - zero_point) as f32 * scale)
                    .collect()
            } else {
                output
                    .as_slice::<u8>()?
                    .iter()
                    .map(|&q| (q as i32 - zero_point) as f32 * scale)
                    .collect()
            };
            Ok(values)
        }
        None => Ok(output.cast_to::<f32>()?.as_slice::<f32>()?.to_vec()),
    }
}

fn input_shape(layout: TensorLayout, size: usize) -> TVec<usize> {
    match layout {
        TensorLayout::Nhwc => tvec!(1, size, size, CHANNELS),
        TensorLayout::Nchw => tvec!(1, CHANNELS, size, size),
    }
}

/// Read layout and spatial size from a concrete `[1, H, W, 3]` or
/// `[1, 3, H, W]` shape
fn layout_from_shape(dims: &[usize]) -> Option<(TensorLayout, (usize, usize))> {
    match dims {
        [1, h, w, c] if *c == CHANNELS => Some((TensorLayout::Nhwc, (*h, *w))),
        [1, c, h, w] if *c == CHANNELS => Some((TensorLayout::Nchw, (*h, *w))),
        _ => None,
    }
}

fn load_tflite(
    path: &Path,
    layout: TensorLayout,
    size: usize,
) -> Result<(Plan, TensorLayout, InputEncoding, (usize, usize))> {
    let load_err = |e: TractError| PlantDoctorError::ModelLoad(path.to_path_buf(), e.to_string());

    let model = tract_tflite::tflite().model_for_path(path).map_err(load_err)?;

    let inlet = model.input_outlets().map_err(load_err)?[0];
    let fact = model.outlet_fact(inlet).map_err(load_err)?.clone();

    // Trust the flatbuffer's own input shape when it is fixed
    let (layout, input_hw) = fact
        .shape
        .as_concrete()
        .and_then(layout_from_shape)
        .unwrap_or((layout, (size, size)));

    let dt = fact.datum_type;
    let encoding = match dt.unquantized() {
        DatumType::F32 => InputEncoding::Float,
        DatumType::U8 | DatumType::I8 => {
            let (zero_point, scale) = match dt.qparams() {
                Some(qp) => qp.zp_scale(),
                // Plain 8-bit input carries raw pixel values
                None => (0, 1.0 / 255.0),
            };
            InputEncoding::Quantized {
                dt,
                zero_point,
                scale,
            }
        }
        other => {
            return Err(PlantDoctorError::ModelLoad(
                path.to_path_buf(),
                format!("unsupported input type {:?}", other),
            ))
        }
    };

    let shape = match layout {
        TensorLayout::Nhwc => tvec!(1, input_hw.0, input_hw.1, CHANNELS),
        TensorLayout::Nchw => tvec!(1, CHANNELS, input_hw.0, input_hw.1),
    };

    let plan = model
        .with_input_fact(0, TypedFact::dt_shape(dt, shape))
        .and_then(|m| m.into_optimized())
        .and_then(|m| m.into_runnable())
        .map_err(load_err)?;

    Ok((plan, layout, encoding, input_hw))
}

fn load_onnx(
    path: &Path,
    layout: TensorLayout,
    size: usize,
) -> Result<(Plan, TensorLayout, InputEncoding, (usize, usize))> {
    let load_err = |e: TractError| PlantDoctorError::ModelLoad(path.to_path_buf(), e.to_string());

    let plan = tract_onnx::onnx()
        .model_for_path(path)
        .and_then(|m| {
            m.with_input_fact(
                0,
                InferenceFact::dt_shape(f32::datum_type(), input_shape(layout, size)),
            )
        })
        .and_then(|m| m.into_optimized())
        .and_then(|m| m.into_runnable())
        .map_err(load_err)?;

    Ok((plan, layout, InputEncoding::Float, (size, size)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_layout_from_shape() {
        assert_eq!(
            layout_from_shape(&[1, 224, 224, 3]),
            Some((TensorLayout::Nhwc, (224, 224)))
        );
        assert_eq!(
            layout_from_shape(&[1, 3, 128, 96]),
            Some((TensorLayout::Nchw, (128, 96)))
        );
        assert_eq!(layout_from_shape(&[1, 224, 224]), None);
        assert_eq!(layout_from_shape(&[2, 224, 224, 3]), None);
    }

    #[test]
    fn test_input_shape() {
        assert_eq!(input_shape(TensorLayout::Nhwc, 224).as_slice(), &[1, 224, 224, 3]);
        assert_eq!(input_shape(TensorLayout::Nchw, 64).as_slice(), &[1, 3, 64, 64]);
    }

    #[test]
    fn test_garbage_tflite_fails_to_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("plant_doctor.tflite");
        fs::write(&path, b"this is not a flatbuffer").unwrap();

        let spec = EngineSpec::new(BackendKind::Tflite, &path);
        let err = TractEngine::load(&spec).err().unwrap();
        assert!(matches!(err, PlantDoctorError::ModelLoad(..)));
    }

    #[test]
    fn test_garbage_onnx_fails_to_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("plant_doctor.onnx");
        fs::write(&path, [0xffu8; 64]).unwrap();

        let spec = EngineSpec::new(BackendKind::Onnx, &path);
        let err = TractEngine::load(&spec).err().unwrap();
        assert!(matches!(err, PlantDoctorError::ModelLoad(..)));
    }

    #[test]
    fn test_quantized_u8_input() {
        let dt = DatumType::U8.with_zp_scale(0, 1.0 / 255.0);
        let tensor = quantize_input(&[0.0, 0.4, 1.0, 1.5], &[1, 4], dt, 0, 1.0 / 255.0).unwrap();

        assert_eq!(tensor.datum_type(), dt);
        assert_eq!(tensor.shape(), &[1, 4]);
        assert_eq!(tensor.as_slice::<u8>().unwrap(), &[0, 102, 255, 255]);
    }

    #[test]
    fn test_quantized_i8_input() {
        let dt = DatumType::I8.with_zp_scale(-128, 1.0 / 255.0);
        let tensor =
            quantize_input(&[0.0, 0.2, 1.0, -0.5], &[2, 2], dt, -128, 1.0 / 255.0).unwrap();

        assert_eq!(tensor.datum_type(), dt);
        assert_eq!(tensor.as_slice::<i8>().unwrap(), &[-128, -77, 127, -128]);
    }

    #[test]
    fn test_quantized_u8_output_is_dequantized() {
        let dt = DatumType::U8.with_zp_scale(128, 0.5);
        let output = Tensor::from_shape(&[1, 3], &[128u8, 130, 0])
            .unwrap()
            .cast_to_dt(dt)
            .unwrap()
            .into_owned();

        assert_eq!(output.datum_type(), dt);
        assert_eq!(dequantize(&output).unwrap(), vec![0.0, 1.0, -64.0]);
    }

    #[test]
    fn test_quantized_i8_output_is_dequantized() {
        let dt = DatumType::I8.with_zp_scale(-128, 1.0 / 256.0);
        let output = Tensor::from_shape(&[1, 4], &[-128i8, 0, 64, 127])
            .unwrap()
            .cast_to_dt(dt)
            .unwrap()
            .into_owned();

        let probs = dequantize(&output).unwrap();
        assert_eq!(probs, vec![0.0, 0.5, 0.75, 255.0 / 256.0]);
    }

    #[test]
    fn test_quantize_then_dequantize_stays_within_one_step() {
        let scale = 1.0 / 255.0;
        let dt = DatumType::U8.with_zp_scale(0, scale);
        let pixels: Vec<f32> = (0..=20).map(|i| i as f32 / 20.0).collect();

        let tensor = quantize_input(&pixels, &[pixels.len()], dt, 0, scale).unwrap();
        let restored = dequantize(&tensor).unwrap();
        for (p, r) in pixels.iter().zip(restored) {
            assert!((p - r).abs() <= scale / 2.0 + 1e-6);
        }
    }

    #[test]
    fn test_float_output_passes_through() {
        let output = Tensor::from_shape(&[1, 3], &[0.2f32, 0.5, 0.3]).unwrap();
        assert_eq!(dequantize(&output).unwrap(), vec![0.2, 0.5, 0.3]);
    }
}
