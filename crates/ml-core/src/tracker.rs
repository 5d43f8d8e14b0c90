//! Short-term tracker capability and one-time backend selection.
//!
//! The fusion engine creates a fresh tracker every time the detector anchors a
//! target, so backends are handed out through a [`TrackerFactory`]. Which
//! backend the factory builds is decided once at startup by
//! [`TrackerBackend::probe`].

use std::{fmt, str::FromStr};

use image::RgbImage;
use thiserror::Error;
use tracing::{debug, info};

use crate::{
    correlation::{CorrelationConfig, CorrelationTracker},
    geometry::BoundingBox,
};

/// Per-frame single-object tracker.
pub trait Tracker: Send {
    /// Anchor the tracker on `bbox` in `frame`.
    fn init(&mut self, frame: &RgbImage, bbox: BoundingBox) -> Result<(), TrackerError>;

    /// Follow the target into `frame`. `None` means the target was lost.
    fn update(&mut self, frame: &RgbImage) -> Option<BoundingBox>;
}

/// Source of fresh tracker instances.
pub trait TrackerFactory: Send {
    fn kind(&self) -> TrackerKind;

    fn create(&self) -> Result<Box<dyn Tracker>, TrackerError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TrackerKind {
    /// OpenCV discriminative correlation filter with channel reliability.
    Csrt,
    /// OpenCV kernelized correlation filter.
    Kcf,
    /// Built-in normalized cross-correlation template tracker.
    Correlation,
}

impl TrackerKind {
    /// Probe order used when no tracker is forced.
    pub const PREFERENCE: [TrackerKind; 3] =
        [TrackerKind::Csrt, TrackerKind::Kcf, TrackerKind::Correlation];

    pub fn label(self) -> &'static str {
        match self {
            TrackerKind::Csrt => "csrt",
            TrackerKind::Kcf => "kcf",
            TrackerKind::Correlation => "correlation",
        }
    }
}

impl fmt::Display for TrackerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for TrackerKind {
    type Err = TrackerError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "csrt" => Ok(TrackerKind::Csrt),
            "kcf" => Ok(TrackerKind::Kcf),
            "correlation" | "ncc" => Ok(TrackerKind::Correlation),
            other => Err(TrackerError::UnknownKind(other.to_string())),
        }
    }
}

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("{kind} tracker unavailable: {reason}")]
    Unavailable { kind: TrackerKind, reason: String },
    #[error("unknown tracker kind {0:?} (expected csrt, kcf or correlation)")]
    UnknownKind(String),
    #[error("tracker box {bbox:?} does not fit a {width}x{height} frame")]
    InvalidBox {
        bbox: BoundingBox,
        width: u32,
        height: u32,
    },
    #[error("tracker backend failed: {0}")]
    Backend(String),
    #[error("no tracker backend could be constructed (tried: {tried})")]
    NoBackend { tried: String },
}

/// Tracker factory bound to the backend picked at startup.
#[derive(Clone, Debug)]
pub struct TrackerBackend {
    kind: TrackerKind,
    correlation: CorrelationConfig,
}

impl TrackerBackend {
    /// Try each kind in order and keep the first one that constructs.
    pub fn probe(preference: &[TrackerKind]) -> Result<Self, TrackerError> {
        Self::probe_with(preference, CorrelationConfig::default())
    }

    pub fn probe_with(
        preference: &[TrackerKind],
        correlation: CorrelationConfig,
    ) -> Result<Self, TrackerError> {
        for &kind in preference {
            match construct(kind, &correlation) {
                Ok(_) => {
                    info!("Selected {kind} tracker backend");
                    return Ok(Self { kind, correlation });
                }
                Err(err) => debug!("Skipping {kind} tracker: {err}"),
            }
        }
        let tried = preference
            .iter()
            .map(|kind| kind.label())
            .collect::<Vec<_>>()
            .join(", ");
        Err(TrackerError::NoBackend { tried })
    }

    /// Whether `kind` can be constructed in this build.
    pub fn availability(kind: TrackerKind) -> Result<(), TrackerError> {
        construct(kind, &CorrelationConfig::default()).map(|_| ())
    }
}

impl TrackerFactory for TrackerBackend {
    fn kind(&self) -> TrackerKind {
        self.kind
    }

    fn create(&self) -> Result<Box<dyn Tracker>, TrackerError> {
        construct(self.kind, &self.correlation)
    }
}

fn construct(
    kind: TrackerKind,
    correlation: &CorrelationConfig,
) -> Result<Box<dyn Tracker>, TrackerError> {
    match kind {
        TrackerKind::Correlation => Ok(Box::new(CorrelationTracker::new(correlation.clone()))),
        #[cfg(feature = "with-opencv")]
        TrackerKind::Csrt => crate::opencv_backend::csrt(),
        #[cfg(feature = "with-opencv")]
        TrackerKind::Kcf => crate::opencv_backend::kcf(),
        #[cfg(not(feature = "with-opencv"))]
        TrackerKind::Csrt | TrackerKind::Kcf => Err(TrackerError::Unavailable {
            kind,
            reason: "built without the `with-opencv` feature".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_kind_names() {
        assert_eq!("CSRT".parse::<TrackerKind>().unwrap(), TrackerKind::Csrt);
        assert_eq!("ncc".parse::<TrackerKind>().unwrap(), TrackerKind::Correlation);
        assert!("mosse".parse::<TrackerKind>().is_err());
    }

    #[cfg(not(feature = "with-opencv"))]
    #[test]
    fn probe_falls_back_to_correlation() {
        let backend = TrackerBackend::probe(&TrackerKind::PREFERENCE).unwrap();
        assert_eq!(backend.kind(), TrackerKind::Correlation);
        assert!(backend.create().is_ok());
    }

    #[cfg(not(feature = "with-opencv"))]
    #[test]
    fn probe_fails_when_nothing_constructs() {
        let err = TrackerBackend::probe(&[TrackerKind::Csrt, TrackerKind::Kcf]).unwrap_err();
        match err {
            TrackerError::NoBackend { tried } => assert_eq!(tried, "csrt, kcf"),
            other => panic!("unexpected error: {other}"),
        }
    }
}
