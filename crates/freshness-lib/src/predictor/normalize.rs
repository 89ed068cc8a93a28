//! Image normalization for model input
//!
//! Decodes an image from a path or an in-memory upload, resizes it to the
//! model resolution and scales pixels to [0, 1] in NHWC layout with a batch
//! axis of one.

use crate::error::{NormalizeError, NormalizeResult};
use crate::models::ImageTensor;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, ImageReader};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Default square input resolution
pub const DEFAULT_IMAGE_SIZE: u32 = 128;

/// Default channel count (RGB)
pub const DEFAULT_CHANNELS: usize = 3;

/// Largest image accepted for decoding (20 MiB)
pub const MAX_IMAGE_BYTES: usize = 20 * 1024 * 1024;

/// Where an image comes from
#[derive(Debug, Clone)]
pub enum ImageSource {
    /// Image file on disk
    Path(PathBuf),
    /// In-memory upload; the extension is only a hint, content sniffing wins
    Bytes {
        data: Vec<u8>,
        extension: Option<String>,
    },
}

impl ImageSource {
    pub fn path(path: impl Into<PathBuf>) -> Self {
        ImageSource::Path(path.into())
    }

    pub fn bytes(data: impl Into<Vec<u8>>, extension: Option<String>) -> Self {
        ImageSource::Bytes {
            data: data.into(),
            extension,
        }
    }

    /// Short description for logs
    pub fn describe(&self) -> String {
        match self {
            ImageSource::Path(path) => path.display().to_string(),
            ImageSource::Bytes { data, extension } => format!(
                "upload ({} bytes, .{})",
                data.len(),
                extension.as_deref().unwrap_or("?")
            ),
        }
    }
}

/// Target tensor geometry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NormalizerConfig {
    pub height: u32,
    pub width: u32,
    /// 1 (grayscale), 3 (RGB) or 4 (RGBA)
    pub channels: usize,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            height: DEFAULT_IMAGE_SIZE,
            width: DEFAULT_IMAGE_SIZE,
            channels: DEFAULT_CHANNELS,
        }
    }
}

impl NormalizerConfig {
    /// NHWC shape of the tensors this config produces
    pub fn input_shape(&self) -> [usize; 4] {
        [1, self.height as usize, self.width as usize, self.channels]
    }
}

/// Turns image sources into [`ImageTensor`]s
#[derive(Debug, Clone, Default)]
pub struct ImageNormalizer {
    config: NormalizerConfig,
}

impl ImageNormalizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: NormalizerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &NormalizerConfig {
        &self.config
    }

    /// Decode, resize and scale an image
    pub fn normalize(&self, source: &ImageSource) -> NormalizeResult<ImageTensor> {
        let image = match source {
            ImageSource::Path(path) => self.decode_path(path)?,
            ImageSource::Bytes { data, extension } => {
                self.decode_bytes(data, extension.as_deref())?
            }
        };

        debug!(
            source = %source.describe(),
            original_width = image.width(),
            original_height = image.height(),
            "Decoded image"
        );

        self.to_tensor(&image)
    }

    fn decode_path(&self, path: &Path) -> NormalizeResult<DynamicImage> {
        let metadata = match std::fs::metadata(path) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(NormalizeError::FileNotFound(path.to_path_buf()));
            }
            Err(e) => {
                return Err(NormalizeError::Io {
                    path: path.to_path_buf(),
                    source: e,
                })
            }
        };

        if !metadata.is_file() {
            return Err(NormalizeError::FileNotFound(path.to_path_buf()));
        }
        if metadata.len() > MAX_IMAGE_BYTES as u64 {
            return Err(NormalizeError::TooLarge {
                size: metadata.len() as usize,
                max: MAX_IMAGE_BYTES,
            });
        }

        let data = std::fs::read(path).map_err(|e| NormalizeError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let extension = path.extension().and_then(|ext| ext.to_str());
        self.decode_bytes(&data, extension)
    }

    fn decode_bytes(&self, data: &[u8], extension: Option<&str>) -> NormalizeResult<DynamicImage> {
        if data.is_empty() {
            return Err(NormalizeError::ImageDecode("empty image buffer".to_string()));
        }
        if data.len() > MAX_IMAGE_BYTES {
            return Err(NormalizeError::TooLarge {
                size: data.len(),
                max: MAX_IMAGE_BYTES,
            });
        }

        let mut reader = ImageReader::new(Cursor::new(data));
        if let Some(format) = extension.and_then(ImageFormat::from_extension) {
            reader.set_format(format);
        }

        reader
            .with_guessed_format()
            .map_err(|e| NormalizeError::ImageDecode(e.to_string()))?
            .decode()
            .map_err(|e| NormalizeError::ImageDecode(e.to_string()))
    }

    /// Nearest-neighbour resize, matching the preprocessing the model was trained with
    fn to_tensor(&self, image: &DynamicImage) -> NormalizeResult<ImageTensor> {
        let resized = image.resize_exact(self.config.width, self.config.height, FilterType::Nearest);

        let raw: Vec<u8> = match self.config.channels {
            1 => resized.to_luma8().into_raw(),
            3 => resized.to_rgb8().into_raw(),
            4 => resized.to_rgba8().into_raw(),
            other => {
                return Err(NormalizeError::ImageDecode(format!(
                    "unsupported channel count {}",
                    other
                )))
            }
        };

        let data = raw.into_iter().map(|v| f32::from(v) / 255.0).collect();
        ImageTensor::from_raw(self.config.input_shape(), data)
            .map_err(|e| NormalizeError::ImageDecode(e.to_string()))
    }
}
