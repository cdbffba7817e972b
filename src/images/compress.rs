//! Best-effort byte-budget compression for inline images.

use image::imageops::FilterType;
use image::{GenericImageView, ImageFormat};

use super::compliance::encode;
use super::InlineImage;

/// Shrinks an inline image until its decoded size fits a byte budget.
/// Implementations never fail: on any problem they return the input as-is.
pub trait ImageCompressor: Send + Sync {
    fn compress(&self, image: &InlineImage, byte_budget: usize) -> InlineImage;
}

/// Re-encodes as JPEG at descending quality, then downscales, until the
/// payload fits.
#[derive(Debug, Clone)]
pub struct JpegBudgetCompressor {
    qualities: Vec<u8>,
    max_downscale_steps: usize,
}

impl Default for JpegBudgetCompressor {
    fn default() -> Self {
        Self {
            qualities: vec![85, 70, 55, 40],
            max_downscale_steps: 6,
        }
    }
}

impl ImageCompressor for JpegBudgetCompressor {
    fn compress(&self, image: &InlineImage, byte_budget: usize) -> InlineImage {
        if image.decoded_len() <= byte_budget {
            return image.clone();
        }

        match self.shrink(image, byte_budget) {
            Some(smaller) => smaller,
            None => {
                tracing::warn!(
                    size = image.decoded_len(),
                    budget = byte_budget,
                    "Could not compress image within budget, sending as-is"
                );
                image.clone()
            }
        }
    }
}

impl JpegBudgetCompressor {
    fn shrink(&self, image: &InlineImage, byte_budget: usize) -> Option<InlineImage> {
        let bytes = image.decode().ok()?;
        let mut img = image::load_from_memory(&bytes).ok()?;

        for step in 0..=self.max_downscale_steps {
            if step > 0 {
                let (w, h) = img.dimensions();
                if w <= 1 || h <= 1 {
                    return None;
                }
                img = img.resize((w * 3 / 4).max(1), (h * 3 / 4).max(1), FilterType::Triangle);
            }
            for &quality in &self.qualities {
                let encoded = encode_jpeg(&img, quality)?;
                if encoded.len() <= byte_budget {
                    tracing::debug!(
                        from = bytes.len(),
                        to = encoded.len(),
                        quality,
                        step,
                        "Compressed image within budget"
                    );
                    return Some(InlineImage::from_bytes("image/jpeg", &encoded));
                }
            }
        }
        None
    }
}

fn encode_jpeg(img: &image::DynamicImage, quality: u8) -> Option<Vec<u8>> {
    if quality >= 100 {
        return encode(img, ImageFormat::Jpeg).ok();
    }
    let rgb = img.to_rgb8();
    let mut buf = Vec::new();
    {
        let mut encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buf, quality);
        encoder
            .encode(rgb.as_raw(), rgb.width(), rgb.height(), image::ColorType::Rgb8)
            .ok()?;
    }
    Some(buf)
}
