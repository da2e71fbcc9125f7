//! Image Normalizer
//!
//! Turns uploaded image bytes into the `[1, H, W, 3]` float tensor the
//! classifiers expect: decode, drop alpha / expand grayscale to RGB, resize
//! without keeping the aspect ratio, scale every channel into [0, 1].

use image::imageops::FilterType;
use image::DynamicImage;
use serde::{Deserialize, Serialize};

use crate::utils::error::{PlantDoctorError, Result};

/// Default square input resolution of the served models
pub const DEFAULT_IMAGE_SIZE: u32 = 224;

/// RGB
pub const CHANNELS: usize = 3;

/// Resampling filter used when resizing to the model resolution
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResizeFilter {
    Nearest,
    /// Bilinear
    #[default]
    Triangle,
    CatmullRom,
    Gaussian,
    Lanczos3,
}

impl From<ResizeFilter> for FilterType {
    fn from(filter: ResizeFilter) -> Self {
        match filter {
            ResizeFilter::Nearest => FilterType::Nearest,
            ResizeFilter::Triangle => FilterType::Triangle,
            ResizeFilter::CatmullRom => FilterType::CatmullRom,
            ResizeFilter::Gaussian => FilterType::Gaussian,
            ResizeFilter::Lanczos3 => FilterType::Lanczos3,
        }
    }
}

/// A batch of one RGB image, NHWC layout, values in [0, 1]
#[derive(Debug, Clone, PartialEq)]
pub struct ImageTensor {
    data: Vec<f32>,
    height: usize,
    width: usize,
}

impl ImageTensor {
    /// Wrap NHWC data for a single image
    pub fn from_nhwc(data: Vec<f32>, height: usize, width: usize) -> Result<Self> {
        let expected = height * width * CHANNELS;
        if data.len() != expected || expected == 0 {
            return Err(PlantDoctorError::Inference(format!(
                "tensor data has {} values, expected {} for [1, {}, {}, {}]",
                data.len(),
                expected,
                height,
                width,
                CHANNELS
            )));
        }
        Ok(Self {
            data,
            height,
            width,
        })
    }

    /// `[batch, height, width, channels]`
    pub fn shape(&self) -> [usize; 4] {
        [1, self.height, self.width, CHANNELS]
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// Raw NHWC values
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// Copy of the values in NCHW order: all R, then all G, then all B
    pub fn to_nchw(&self) -> Vec<f32> {
        let num_pixels = self.height * self.width;
        let mut out = vec![0.0f32; self.data.len()];

        for (i, pixel) in self.data.chunks_exact(CHANNELS).enumerate() {
            for (c, &value) in pixel.iter().enumerate() {
                out[c * num_pixels + i] = value;
            }
        }

        out
    }
}

/// Decodes and normalizes images for inference
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageNormalizer {
    /// Target square size
    pub image_size: u32,
    /// Resampling filter
    pub filter: ResizeFilter,
}

impl Default for ImageNormalizer {
    fn default() -> Self {
        Self {
            image_size: DEFAULT_IMAGE_SIZE,
            filter: ResizeFilter::default(),
        }
    }
}

impl ImageNormalizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configure target size
    pub fn with_image_size(mut self, size: u32) -> Self {
        self.image_size = size;
        self
    }

    /// Configure resampling filter
    pub fn with_filter(mut self, filter: ResizeFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Decode raw image bytes (any supported format) and normalize them
    pub fn normalize(&self, raw: &[u8]) -> Result<ImageTensor> {
        let image =
            image::load_from_memory(raw).map_err(|e| PlantDoctorError::Decode(e.to_string()))?;

        if image.width() == 0 || image.height() == 0 {
            return Err(PlantDoctorError::Decode(format!(
                "image has no pixels ({}x{})",
                image.width(),
                image.height()
            )));
        }

        Ok(self.normalize_image(&image))
    }

    /// Normalize an already decoded image
    pub fn normalize_image(&self, image: &DynamicImage) -> ImageTensor {
        let size = self.image_size;
        let rgb = image.to_rgb8();
        let resized = image::imageops::resize(&rgb, size, size, self.filter.into());

        // ImageBuffer stores rows of interleaved RGB, which is already HWC
        let data = resized
            .as_raw()
            .iter()
            .map(|&v| v as f32 / 255.0)
            .collect();

        ImageTensor {
            data,
            height: size as usize,
            width: size as usize,
        }
    }
}
