//! The fusion worker: the only thread that touches the engine.
//!
//! Each job is decoded, fused, annotated and encoded here, then fanned out to
//! the display and servo registries in submission order.

use std::{
    panic::{self, AssertUnwindSafe},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use anyhow::{Context, Result};
use crossbeam_channel::RecvTimeoutError;
use ml_core::Candidate;
use tracing::{debug, error, info, warn};
use video_ingest::{encode_jpeg, encode_transport};
use vision::{AimCalculator, FrameGeometry, FusionEngine, FusionReport, ServoAngles, annotate};

use super::{
    protocol::{DisplayMessage, ProducerAck, detections},
    registry::Consumers,
    slot::{FrameJob, FrameJobs},
};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

pub struct FusionWorker {
    engine: FusionEngine,
    aim: AimCalculator,
    consumers: Arc<Consumers>,
    jpeg_quality: u8,
}

impl FusionWorker {
    pub fn new(
        engine: FusionEngine,
        aim: AimCalculator,
        consumers: Arc<Consumers>,
        jpeg_quality: u8,
    ) -> Self {
        Self {
            engine,
            aim,
            consumers,
            jpeg_quality,
        }
    }

    /// Process jobs until `running` is cleared or every producer handle is gone.
    ///
    /// A panic while handling a job drops that job, resets the engine and
    /// moves on. On exit `running` is cleared and the slot closes.
    pub fn run(mut self, jobs: FrameJobs, running: Arc<AtomicBool>) {
        info!("Fusion worker started ({})", self.engine.detector_name());
        while running.load(Ordering::SeqCst) {
            match jobs.recv_timeout(POLL_INTERVAL) {
                Ok(job) => {
                    let sequence = job.sequence;
                    if panic::catch_unwind(AssertUnwindSafe(|| self.handle(job))).is_err() {
                        error!(sequence, "Fusion worker panicked on frame; resetting engine");
                        metrics::counter!("pantilt_worker_panics_total").increment(1);
                        self.engine.reset();
                    }
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        running.store(false, Ordering::SeqCst);
        drop(jobs);
        info!(
            frames = self.engine.frame_index(),
            "Fusion worker stopped"
        );
    }

    /// Run one job end to end.
    pub fn handle(&mut self, job: FrameJob) {
        let FrameJob {
            unit,
            sequence,
            received_at,
            ack,
        } = job;

        let sample = match unit.into_sample(sequence) {
            Ok(sample) => sample,
            Err(err) => {
                warn!(sequence, "Skipping undecodable frame: {err}");
                metrics::counter!("pantilt_frames_dropped_total", "reason" => "undecodable")
                    .increment(1);
                return;
            }
        };

        let mut frame = sample.image;
        let geometry = FrameGeometry::new(frame.width(), frame.height());
        let report = self.engine.process(&frame, received_at);
        let angles = self.aim_for(&report, geometry);

        if !self.consumers.display.is_empty() {
            match self.display_message(&mut frame, &report, sample.timestamp) {
                Ok(message) => {
                    self.consumers.display.broadcast(Arc::from(message));
                }
                Err(err) => warn!(sequence, "Failed to build display frame: {err:#}"),
            }
        }
        if !self.consumers.servo.is_empty() {
            self.consumers.servo.broadcast(Arc::from(angles.to_string()));
        }

        if let Some(ack) = ack
            && ack.send(ProducerAck::processed(&report)).is_err()
        {
            debug!(sequence, "Producer left before its acknowledgement");
        }

        record_metrics(&report, received_at.elapsed());
    }

    fn aim_for(&mut self, report: &FusionReport, geometry: FrameGeometry) -> ServoAngles {
        let candidates: Vec<Candidate> = report
            .target
            .iter()
            .map(|target| Candidate::new(target.class.clone(), target.confidence, target.bbox))
            .collect();
        self.aim.command(&candidates, geometry)
    }

    fn display_message(
        &self,
        frame: &mut image::RgbImage,
        report: &FusionReport,
        timestamp: f64,
    ) -> Result<String> {
        annotate(frame, report);
        let jpeg = encode_jpeg(frame, self.jpeg_quality).context("JPEG encoding failed")?;
        let detections = detections(report);
        let message = DisplayMessage {
            frame: encode_transport(&jpeg),
            weapon_detected: !detections.is_empty(),
            detections,
            timestamp,
            tracking_active: report.tracking_active(),
        };
        serde_json::to_string(&message).context("Failed to serialise display message")
    }
}

fn record_metrics(report: &FusionReport, latency: Duration) {
    metrics::counter!("pantilt_frames_processed_total").increment(1);
    metrics::histogram!("pantilt_fusion_latency_seconds").record(latency.as_secs_f64());
    metrics::gauge!("pantilt_estimated_fps").set(report.fps);
    metrics::gauge!("pantilt_tracking_active").set(if report.tracking_active() { 1.0 } else { 0.0 });
    if report.detector_ran {
        metrics::counter!("pantilt_detector_runs_total").increment(1);
    }
    if report.detector_failed {
        metrics::counter!("pantilt_detector_errors_total").increment(1);
    }
    if let Some(reason) = report.reset {
        metrics::counter!("pantilt_fusion_resets_total", "reason" => reason.label()).increment(1);
    }
}
