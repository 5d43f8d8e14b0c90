//! Server bootstrap: backends, the fusion worker thread and the HTTP runtime.

pub mod protocol;
pub mod registry;
pub mod slot;
pub mod worker;

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use anyhow::{Context, Result, anyhow};
use ml_core::TrackerFactory;
use tracing::{error, info};
use vision::{AimCalculator, FusionEngine};

use crate::{
    backends,
    config::ServerConfig,
    server::{self, AppState},
    telemetry,
};

use self::{registry::Consumers, worker::FusionWorker};

/// Run the server until the HTTP runtime exits.
pub fn run(config: ServerConfig) -> Result<()> {
    let _telemetry_guard = telemetry::init_tracing(&config.telemetry)?;
    telemetry::init_metrics_recorder()?;
    let _server_span = tracing::info_span!(
        "pantilt.server",
        host = %config.host,
        port = config.port
    )
    .entered();

    let detector = backends::build_detector(&config.detector)?;
    let trackers = backends::probe_trackers(&config.tracker_preference)?;
    let tracker_kind = trackers.kind();
    let detector_name = detector.name().to_string();
    info!(
        labels = ?config.fusion.target_labels,
        "Using {detector_name} detector with {tracker_kind} tracker"
    );

    let engine = FusionEngine::new(config.fusion.clone(), detector, Box::new(trackers));
    let aim = AimCalculator::new(config.aim);
    let consumers = Arc::new(Consumers::new());
    let running = Arc::new(AtomicBool::new(true));
    let (slot, jobs) = slot::channel(Arc::clone(&running));

    let worker = FusionWorker::new(engine, aim, Arc::clone(&consumers), config.jpeg_quality);
    let worker_running = Arc::clone(&running);
    let worker_handle = telemetry::spawn_thread("fusion-worker", move || {
        worker.run(jobs, worker_running)
    })
    .context("Failed to spawn fusion worker thread")?;

    let state = AppState::new(
        consumers,
        slot,
        detector_name,
        tracker_kind,
        config.outbound_queue,
        config.max_frame_bytes,
    );
    let served = actix_web::rt::System::new()
        .block_on(server::serve(state, config.host.clone(), config.port));

    running.store(false, Ordering::SeqCst);
    if worker_handle.join().is_err() {
        error!("Fusion worker panicked");
        return Err(anyhow!("fusion worker panicked"));
    }
    served
}
