//! Detector and tracker backend selection for the server.

use anyhow::{Context, Result};
use ml_core::{Detector, TrackerBackend, TrackerKind};
use tracing::info;

use crate::config::DetectorSettings;

/// Build the detector described by `settings`.
#[cfg(feature = "with-tch")]
pub fn build_detector(settings: &DetectorSettings) -> Result<Box<dyn Detector>> {
    use ml_core::{tch::Device, torch::TorchDetector};

    let Some(path) = settings.model_path.as_ref() else {
        anyhow::bail!("--model is required to run the detector");
    };
    let device = if settings.use_cpu {
        Device::Cpu
    } else {
        Device::cuda_if_available()
    };
    let detector = TorchDetector::load(
        path,
        device,
        settings.input_size,
        settings.class_names.clone(),
    )
    .with_context(|| format!("Failed to load detector model {}", path.display()))?
    .with_iou_threshold(settings.iou_threshold);
    info!(
        "Loaded {} (input {}x{}, {:?})",
        detector.name(),
        settings.input_size.0,
        settings.input_size.1,
        device
    );
    Ok(Box::new(detector))
}

#[cfg(not(feature = "with-tch"))]
pub fn build_detector(settings: &DetectorSettings) -> Result<Box<dyn Detector>> {
    let _ = settings;
    anyhow::bail!("pantilt was built without the `with-tch` feature; rebuild with it to run the detector")
}

/// Pick the first tracker backend from `preference` that this build supports.
pub fn probe_trackers(preference: &[TrackerKind]) -> Result<TrackerBackend> {
    let backend = TrackerBackend::probe(preference).context("Failed to select a tracker backend")?;
    info!("Tracker preference {preference:?}");
    Ok(backend)
}

/// Print one line per tracker kind saying whether it can be constructed.
pub fn print_tracker_report() {
    for kind in TrackerKind::PREFERENCE {
        match TrackerBackend::availability(kind) {
            Ok(()) => println!("{:<12} available", kind.label()),
            Err(err) => println!("{:<12} unavailable ({err})", kind.label()),
        }
    }
}
