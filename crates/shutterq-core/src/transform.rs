//! Transform stage: raw capture -> canonical JPEG payload.
//!
//! Runs before anything is persisted. A capture that cannot be decoded or
//! re-encoded is rejected here and never becomes a task.
//!
//! # Flow
//! 1. decode (any format the `image` crate is built with)
//! 2. downscale so the long edge is at most `max_long_edge`, aspect preserved
//! 3. optional tone map, integer arithmetic only
//! 4. re-encode as JPEG at `quality`
//!
//! Every step is deterministic, so transforming the same input twice yields
//! byte-identical payloads.

use std::fmt;
use std::str::FromStr;

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageError, RgbImage};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::PayloadMeta;

pub const JPEG_CONTENT_TYPE: &str = "image/jpeg";

#[derive(Debug, Error)]
pub enum TransformError {
    #[error("capture is empty")]
    EmptyInput,

    #[error("failed to decode capture: {0}")]
    Decode(#[source] ImageError),

    #[error("failed to encode payload: {0}")]
    Encode(#[source] ImageError),

    #[error("transform aborted: {0}")]
    Aborted(String),
}

/// Deterministic color treatment applied after resizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToneMap {
    Warm,
    Mono,
    Faded,
}

impl ToneMap {
    fn map_pixel(self, [r, g, b]: [u8; 3]) -> [u8; 3] {
        let (r, g, b) = (u32::from(r), u32::from(g), u32::from(b));
        let clamp = |v: u32| v.min(255) as u8;
        match self {
            ToneMap::Warm => [clamp(r * 112 / 100), clamp(g * 103 / 100), clamp(b * 88 / 100)],
            ToneMap::Mono => {
                let luma = clamp((r * 299 + g * 587 + b * 114) / 1000);
                [luma, luma, luma]
            }
            // lifted blacks, compressed highlights
            ToneMap::Faded => [
                clamp(24 + r * 208 / 255),
                clamp(24 + g * 208 / 255),
                clamp(32 + b * 200 / 255),
            ],
        }
    }

    pub fn apply(self, image: &mut RgbImage) {
        for pixel in image.pixels_mut() {
            pixel.0 = self.map_pixel(pixel.0);
        }
    }
}

impl fmt::Display for ToneMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ToneMap::Warm => "warm",
            ToneMap::Mono => "mono",
            ToneMap::Faded => "faded",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown tone map `{0}` (expected warm, mono, faded or none)")]
pub struct ParseToneMapError(String);

impl FromStr for ToneMap {
    type Err = ParseToneMapError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "warm" => Ok(ToneMap::Warm),
            "mono" => Ok(ToneMap::Mono),
            "faded" => Ok(ToneMap::Faded),
            _ => Err(ParseToneMapError(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformConfig {
    pub max_long_edge: u32,

    /// JPEG quality, 1..=100.
    pub quality: u8,

    pub tone: Option<ToneMap>,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            max_long_edge: 2048,
            quality: 82,
            tone: None,
        }
    }
}

/// Canonical payload ready to be written to the payload store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformedPayload {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl TransformedPayload {
    pub fn byte_size(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub fn meta(&self) -> PayloadMeta {
        PayloadMeta {
            content_type: JPEG_CONTENT_TYPE.to_string(),
            byte_size: self.byte_size(),
            width: self.width,
            height: self.height,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TransformStage {
    config: TransformConfig,
}

impl TransformStage {
    pub fn new(config: TransformConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TransformConfig {
        &self.config
    }

    /// CPU-bound; call from a blocking context or use [`TransformStage::run`].
    pub fn apply(&self, raw: &[u8]) -> Result<TransformedPayload, TransformError> {
        if raw.is_empty() {
            return Err(TransformError::EmptyInput);
        }

        let decoded = image::load_from_memory(raw).map_err(TransformError::Decode)?;
        let resized = self.fit_long_edge(decoded);

        let mut rgb = resized.to_rgb8();
        if let Some(tone) = self.config.tone {
            tone.apply(&mut rgb);
        }

        let mut bytes = Vec::new();
        JpegEncoder::new_with_quality(&mut bytes, self.config.quality)
            .encode_image(&rgb)
            .map_err(TransformError::Encode)?;

        Ok(TransformedPayload {
            bytes,
            width: rgb.width(),
            height: rgb.height(),
        })
    }

    /// Run [`TransformStage::apply`] on the blocking pool.
    pub async fn run(&self, raw: Vec<u8>) -> Result<TransformedPayload, TransformError> {
        let stage = self.clone();
        tokio::task::spawn_blocking(move || stage.apply(&raw))
            .await
            .map_err(|e| TransformError::Aborted(e.to_string()))?
    }

    fn fit_long_edge(&self, image: DynamicImage) -> DynamicImage {
        let max = self.config.max_long_edge;
        let (w, h) = image.dimensions();
        if w.max(h) <= max {
            return image;
        }
        image.resize(max, max, FilterType::Lanczos3)
    }
}
