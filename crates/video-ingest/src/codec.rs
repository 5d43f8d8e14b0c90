use std::io::Cursor;

use base64::{Engine as _, engine::general_purpose::STANDARD};
use image::{ImageFormat, RgbImage, codecs::jpeg::JpegEncoder};

use crate::types::IngestError;

/// Decode any supported encoded image (JPEG, PNG) into RGB8.
pub fn decode_image(bytes: &[u8]) -> Result<RgbImage, IngestError> {
    if bytes.is_empty() {
        return Err(IngestError::Empty);
    }
    let decoded = image::load_from_memory(bytes)?;
    Ok(decoded.into_rgb8())
}

/// Decode base64 transport text. A `data:<mime>;base64,` prefix is accepted.
pub fn decode_transport(text: &str) -> Result<Vec<u8>, IngestError> {
    let payload = match text.split_once("base64,") {
        Some((prefix, rest)) if prefix.starts_with("data:") => rest,
        _ => text,
    };
    let payload = payload.trim();
    if payload.is_empty() {
        return Err(IngestError::Empty);
    }
    Ok(STANDARD.decode(payload)?)
}

pub fn encode_transport(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Encode an RGB frame as JPEG. `quality` is clamped to `1..=100`.
pub fn encode_jpeg(frame: &RgbImage, quality: u8) -> Result<Vec<u8>, IngestError> {
    let mut out = Cursor::new(Vec::with_capacity(frame.as_raw().len() / 8));
    let encoder = JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100));
    frame.write_with_encoder(encoder)?;
    Ok(out.into_inner())
}

/// Encode an RGB frame as PNG. Lossless, used where exact pixels matter.
pub fn encode_png(frame: &RgbImage) -> Result<Vec<u8>, IngestError> {
    let mut out = Cursor::new(Vec::new());
    frame.write_to(&mut out, ImageFormat::Png)?;
    Ok(out.into_inner())
}
