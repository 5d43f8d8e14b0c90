//! Producer-side frame handling.
//!
//! Producers push either raw encoded images (binary WebSocket frames) or JSON
//! text units carrying a base64 image. This crate turns both into a
//! [`FrameSample`] and provides the encoders the display feed needs.

mod codec;
mod types;

use chrono::Utc;
use tracing::trace;

pub use codec::{decode_image, decode_transport, encode_jpeg, encode_png, encode_transport};
pub use types::{FrameSample, IngestError, ProducerUnit, StructuredFrame};

impl ProducerUnit {
    /// Parse a structured text unit. The image itself is decoded later, on the
    /// fusion worker.
    pub fn from_text(text: &str) -> Result<Self, IngestError> {
        let unit: StructuredFrame = serde_json::from_str(text)?;
        Ok(ProducerUnit::Structured(unit))
    }

    pub fn expects_ack(&self) -> bool {
        matches!(self, ProducerUnit::Structured(_))
    }

    /// Decode the unit into a frame sample.
    pub fn into_sample(self, sequence: u64) -> Result<FrameSample, IngestError> {
        let (bytes, timestamp) = match self {
            ProducerUnit::Binary(bytes) => (bytes, epoch_seconds()),
            ProducerUnit::Structured(unit) => {
                let text = unit.frame.ok_or(IngestError::MissingFrame)?;
                (decode_transport(&text)?, unit.timestamp.unwrap_or(0.0))
            }
        };
        let image = decode_image(&bytes)?;
        trace!(
            sequence,
            width = image.width(),
            height = image.height(),
            "decoded producer frame"
        );
        Ok(FrameSample {
            image,
            timestamp,
            sequence,
        })
    }
}

fn epoch_seconds() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

#[cfg(test)]
mod tests {
    use image::{Rgb, RgbImage};

    use super::*;

    fn sample_png() -> Vec<u8> {
        let mut image = RgbImage::new(8, 6);
        image.put_pixel(3, 2, Rgb([200, 10, 10]));
        encode_png(&image).unwrap()
    }

    #[test]
    fn structured_unit_decodes_with_timestamp() {
        let text = format!(
            r#"{{"frame": "{}", "timestamp": 1700000000.25}}"#,
            encode_transport(&sample_png())
        );
        let unit = ProducerUnit::from_text(&text).unwrap();
        assert!(unit.expects_ack());

        let sample = unit.into_sample(7).unwrap();
        assert_eq!((sample.width(), sample.height()), (8, 6));
        assert_eq!(sample.timestamp, 1700000000.25);
        assert_eq!(sample.sequence, 7);
        assert_eq!(sample.image.get_pixel(3, 2), &Rgb([200, 10, 10]));
    }

    #[test]
    fn timestamp_defaults_to_zero_and_data_urls_are_accepted() {
        let text = format!(
            r#"{{"frame": "data:image/png;base64,{}"}}"#,
            encode_transport(&sample_png())
        );
        let sample = ProducerUnit::from_text(&text)
            .unwrap()
            .into_sample(0)
            .unwrap();
        assert_eq!(sample.timestamp, 0.0);
    }

    #[test]
    fn null_timestamp_is_treated_as_zero() {
        let text = format!(
            r#"{{"frame": "{}", "timestamp": null}}"#,
            encode_transport(&sample_png())
        );
        let sample = ProducerUnit::from_text(&text)
            .unwrap()
            .into_sample(4)
            .unwrap();
        assert_eq!(sample.timestamp, 0.0);
        assert_eq!(sample.sequence, 4);
    }

    #[test]
    fn binary_unit_uses_arrival_time() {
        let unit = ProducerUnit::Binary(sample_png());
        assert!(!unit.expects_ack());
        let sample = unit.into_sample(1).unwrap();
        assert!(sample.timestamp > 1_600_000_000.0);
    }

    #[test]
    fn rejects_malformed_units() {
        assert!(matches!(
            ProducerUnit::from_text("not json"),
            Err(IngestError::Json(_))
        ));
        assert!(matches!(
            ProducerUnit::from_text(r#"{"timestamp": 1.0}"#)
                .unwrap()
                .into_sample(0),
            Err(IngestError::MissingFrame)
        ));
        assert!(matches!(
            ProducerUnit::from_text(r#"{"frame": "@@@"}"#)
                .unwrap()
                .into_sample(0),
            Err(IngestError::Transport(_))
        ));
        assert!(matches!(
            ProducerUnit::Binary(b"definitely not an image".to_vec()).into_sample(0),
            Err(IngestError::Image(_))
        ));
        assert!(matches!(
            ProducerUnit::Binary(Vec::new()).into_sample(0),
            Err(IngestError::Empty)
        ));
    }

    #[test]
    fn jpeg_round_trip_keeps_dimensions() {
        let image = RgbImage::from_pixel(32, 16, Rgb([40, 120, 200]));
        let jpeg = encode_jpeg(&image, 85).unwrap();
        let back = decode_image(&jpeg).unwrap();
        assert_eq!(back.dimensions(), (32, 16));
    }
}
