// src/services/image_processor.rs
use crate::errors::StudioError;
use base64::{Engine as _, engine::general_purpose};
use image::codecs::jpeg::JpegEncoder;
use image::{ColorType, GenericImageView};

const MAX_DIMENSION: u32 = 4096;
const ANALYSIS_MAX_WIDTH: u32 = 1024;
const ANALYSIS_JPEG_QUALITY: u8 = 30;
// Roughly 1.5MB once wrapped in the JSON request.
const MAX_ANALYSIS_BASE64: usize = 1_000_000;

/// Base64 image payload ready for the analysis endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisPayload {
    pub base64: String,
    pub mime_type: String,
}

#[derive(Default)]
pub struct ImageProcessor;

impl ImageProcessor {
    pub fn new() -> Self {
        Self
    }

    pub fn validate_image(&self, data: &[u8]) -> Result<(u32, u32), StudioError> {
        let img = image::load_from_memory(data)
            .map_err(|e| StudioError::ImageProcessing(format!("Invalid image format: {}", e)))?;

        let (width, height) = img.dimensions();

        if width > MAX_DIMENSION || height > MAX_DIMENSION {
            return Err(StudioError::ImageProcessing(format!(
                "Image dimensions exceed {}x{}",
                MAX_DIMENSION, MAX_DIMENSION
            )));
        }

        Ok((width, height))
    }

    /// Downscales to the analysis width and re-encodes as a small JPEG.
    pub fn prepare_for_analysis(&self, data: &[u8]) -> Result<AnalysisPayload, StudioError> {
        let img = image::load_from_memory(data)
            .map_err(|e| StudioError::ImageProcessing(format!("Failed to load image: {}", e)))?;

        let (width, height) = img.dimensions();
        let img = if width > ANALYSIS_MAX_WIDTH {
            let new_height = ((height as f64) * (ANALYSIS_MAX_WIDTH as f64 / width as f64))
                .round()
                .max(1.0) as u32;
            img.resize_exact(
                ANALYSIS_MAX_WIDTH,
                new_height,
                image::imageops::FilterType::Lanczos3,
            )
        } else {
            img
        };

        let rgb = img.to_rgb8();
        let mut output = Vec::new();
        let mut encoder = JpegEncoder::new_with_quality(&mut output, ANALYSIS_JPEG_QUALITY);
        encoder
            .encode(rgb.as_raw(), rgb.width(), rgb.height(), ColorType::Rgb8)
            .map_err(|e| {
                StudioError::ImageProcessing(format!("Failed to encode analysis image: {}", e))
            })?;

        let base64 = general_purpose::STANDARD.encode(&output);
        if base64.len() > MAX_ANALYSIS_BASE64 {
            log::warn!("Analysis payload still large: {} chars", base64.len());
        }

        Ok(AnalysisPayload {
            base64,
            mime_type: "image/jpeg".to_string(),
        })
    }
}

/// File extension and MIME type derived from a file name; unknown names are JPEG.
pub fn content_type_for(filename: &str) -> (String, String) {
    let extension = filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .unwrap_or_else(|| "jpg".to_string());
    let mime = match extension.as_str() {
        "jpg" => "image/jpeg".to_string(),
        other => format!("image/{}", other),
    };
    (extension, mime)
}

#[cfg(test)]
pub(crate) fn sample_png(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbImage::from_pixel(width, height, image::Rgb([200, 40, 40]));
    let mut output = Vec::new();
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut std::io::Cursor::new(&mut output), image::ImageFormat::Png)
        .unwrap();
    output
}
