use image::RgbImage;
use serde::Deserialize;
use thiserror::Error;

/// Decoded frame handed to the fusion worker for one processing cycle.
pub struct FrameSample {
    pub image: RgbImage,
    /// Seconds since the Unix epoch as reported by the producer, or the
    /// server's arrival time for binary units.
    pub timestamp: f64,
    /// Ascending per-server submission index.
    pub sequence: u64,
}

impl FrameSample {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// JSON text unit sent by structured producers.
#[derive(Debug, Clone, Deserialize)]
pub struct StructuredFrame {
    #[serde(default)]
    pub frame: Option<String>,
    /// Missing or `null` is treated as zero.
    #[serde(default)]
    pub timestamp: Option<f64>,
}

/// One unit received on the producer socket, not yet decoded.
#[derive(Debug, Clone)]
pub enum ProducerUnit {
    /// Raw encoded image bytes. No acknowledgement is expected.
    Binary(Vec<u8>),
    /// Base64 image wrapped in JSON. The producer waits for an acknowledgement.
    Structured(StructuredFrame),
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("malformed producer message: {0}")]
    Json(#[from] serde_json::Error),
    #[error("producer message has no \"frame\" field")]
    MissingFrame,
    #[error("frame is not valid base64: {0}")]
    Transport(#[from] base64::DecodeError),
    #[error("frame could not be decoded as an image: {0}")]
    Image(#[from] image::ImageError),
    #[error("empty frame payload")]
    Empty,
}
