//! Pixel-dimension compliance for inline images.

use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine};
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageFormat};
use std::io::Cursor;

use super::InlineImage;
use crate::error::{BridgeError, Result};

/// Rescales images whose width or height exceeds a fixed cap.
#[derive(Debug, Clone, Copy)]
pub struct ImageComplianceProcessor {
    max_dimension: u32,
}

impl ImageComplianceProcessor {
    pub fn new(max_dimension: u32) -> Self {
        Self { max_dimension }
    }

    pub fn max_dimension(&self) -> u32 {
        self.max_dimension
    }

    /// Bring a base64 payload (optionally wrapped in a `data:` envelope) within
    /// the cap. Anything that cannot be decoded is returned unchanged.
    pub fn process(&self, payload: &str) -> String {
        let (prefix, data) = split_envelope(payload);
        match self.rescale(data) {
            Ok(Some(resized)) => format!("{prefix}{resized}"),
            Ok(None) => payload.to_string(),
            Err(e) => {
                tracing::warn!(error = %e, "Image left unchanged");
                payload.to_string()
            }
        }
    }

    pub fn process_inline(&self, image: &InlineImage) -> InlineImage {
        InlineImage {
            media_type: image.media_type.clone(),
            data: self.process(&image.data),
        }
    }

    /// `Ok(None)` when the image already fits.
    fn rescale(&self, data: &str) -> Result<Option<String>> {
        let bytes = BASE64_STANDARD
            .decode(data.trim().as_bytes())
            .map_err(|e| BridgeError::image(format!("invalid base64: {e}")))?;

        let format = image::guess_format(&bytes)
            .map_err(|e| BridgeError::image(format!("unrecognized image format: {e}")))?;

        let (width, height) = image::io::Reader::with_format(Cursor::new(&bytes), format)
            .into_dimensions()
            .map_err(|e| BridgeError::image(format!("failed to read dimensions: {e}")))?;

        let Some((new_width, new_height)) = scaled_dimensions(width, height, self.max_dimension)
        else {
            return Ok(None);
        };

        let img = image::load_from_memory_with_format(&bytes, format)
            .map_err(|e| BridgeError::image(format!("failed to decode image: {e}")))?;
        let resized = img.resize_exact(new_width, new_height, FilterType::Lanczos3);

        tracing::debug!(
            from = %format!("{width}x{height}"),
            to = %format!("{}x{}", resized.width(), resized.height()),
            "Rescaled oversized image"
        );

        let encoded = encode(&resized, format)?;
        Ok(Some(BASE64_STANDARD.encode(encoded)))
    }
}

/// Target size for an image of `width`×`height` under `cap`, or `None` when it
/// already fits. Both sides are scaled by the same factor, `min(cap/w, cap/h)`.
pub fn scaled_dimensions(width: u32, height: u32, cap: u32) -> Option<(u32, u32)> {
    if width <= cap && height <= cap {
        return None;
    }
    let longest = u64::from(width.max(height));
    let cap = u64::from(cap);
    let scale = |side: u32| -> u32 {
        let scaled = (u64::from(side) * cap + longest / 2) / longest;
        u32::try_from(scaled.max(1)).unwrap_or(u32::MAX)
    };
    Some((scale(width), scale(height)))
}

pub(crate) fn encode(img: &DynamicImage, format: ImageFormat) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    let result = if format == ImageFormat::Jpeg {
        // JPEG has no alpha channel
        DynamicImage::ImageRgb8(img.to_rgb8()).write_to(&mut Cursor::new(&mut buf), format)
    } else {
        img.write_to(&mut Cursor::new(&mut buf), format)
    };
    result.map_err(|e| BridgeError::image(format!("failed to encode {format:?}: {e}")))?;
    Ok(buf)
}

fn split_envelope(payload: &str) -> (&str, &str) {
    if payload.starts_with("data:") {
        if let Some(pos) = payload.find(";base64,") {
            let split = pos + ";base64,".len();
            return (&payload[..split], &payload[split..]);
        }
    }
    ("", payload)
}
