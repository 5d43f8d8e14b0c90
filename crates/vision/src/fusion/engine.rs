use std::time::Instant;

use image::RgbImage;
use ml_core::{Candidate, Detector, DetectorError, Tracker, TrackerError, TrackerFactory};
use tracing::{debug, info, warn};

use super::state::{
    FusionReport, Presentation, ResetReason, Source, TargetState, Track, TrackedTarget,
};
use crate::{clock::FpsEstimator, config::FusionConfig};

/// Slack for comparing virtual timestamps derived from frame counts.
const TIME_EPSILON: f64 = 1e-9;

enum Phase {
    Idle,
    Tracking {
        track: Track,
        tracker: Box<dyn Tracker>,
    },
}

/// Detection-tracking state machine. One instance per server, owned by the
/// fusion worker.
pub struct FusionEngine {
    config: FusionConfig,
    detector: Box<dyn Detector>,
    trackers: Box<dyn TrackerFactory>,
    clock: FpsEstimator,
    frame_index: u64,
    phase: Phase,
}

impl FusionEngine {
    /// `config` is expected to be validated already.
    pub fn new(
        config: FusionConfig,
        detector: Box<dyn Detector>,
        trackers: Box<dyn TrackerFactory>,
    ) -> Self {
        let clock = FpsEstimator::new(config.default_fps);
        Self {
            config,
            detector,
            trackers,
            clock,
            frame_index: 0,
            phase: Phase::Idle,
        }
    }

    pub fn detector_name(&self) -> &str {
        self.detector.name()
    }

    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    pub fn estimated_fps(&self) -> f64 {
        self.clock.estimated_fps()
    }

    pub fn state(&self) -> TargetState<'_> {
        match &self.phase {
            Phase::Idle => TargetState::Idle,
            Phase::Tracking { track, .. } => TargetState::Tracking(track),
        }
    }

    /// Confidence a candidate must reach in the current state.
    pub fn active_threshold(&self) -> f32 {
        match self.phase {
            Phase::Idle => self.config.initial_threshold,
            Phase::Tracking { .. } => self.config.redetect_threshold,
        }
    }

    /// Drop any active track and restart the frame count. No-op when idle.
    pub fn reset(&mut self) {
        if matches!(self.phase, Phase::Idle) {
            return;
        }
        info!("fusion engine reset");
        self.phase = Phase::Idle;
        self.frame_index = 0;
        self.clock.restart();
    }

    /// Run one fusion cycle on `frame`, which arrived at `now`.
    pub fn process(&mut self, frame: &RgbImage, now: Instant) -> FusionReport {
        self.frame_index += 1;
        let frame_index = self.frame_index;
        let _frame_span = tracing::info_span!("fusion.frame", frame = frame_index).entered();

        self.clock.record(now);
        let virtual_time = self.clock.virtual_time(frame_index);
        let mut reset = None;
        let mut reconfirmed = false;
        let mut detector_failed = false;

        let detector_ran = frame_index % self.config.detect_every == 0;
        if detector_ran {
            let _detect_span = tracing::info_span!("fusion.detect").entered();
            match self.detect(frame) {
                Ok(Some(best)) => match self.anchor(frame, best, virtual_time) {
                    Ok(()) => reconfirmed = true,
                    Err(err) => {
                        warn!("Tracker initialisation failed, dropping target: {err}");
                        reset = self.drop_track(ResetReason::TrackerInit);
                    }
                },
                Ok(None) => debug!("no target accepted"),
                Err(err) => {
                    warn!("Detector failed, treating frame as empty: {err}");
                    detector_failed = true;
                }
            }
        }

        let since_detection = match &self.phase {
            Phase::Tracking { track, .. } => Some(virtual_time - track.last_detection_virtual_time),
            Phase::Idle => None,
        };
        if let Some(elapsed) = since_detection
            && elapsed + TIME_EPSILON >= self.config.timeout_seconds
        {
            info!(elapsed, "No detection within timeout, dropping target");
            reset = self.drop_track(ResetReason::Timeout);
        }

        let target = self.follow(frame, virtual_time, reconfirmed);
        if target.is_none() && matches!(self.phase, Phase::Tracking { .. }) {
            info!("Tracker lost the target");
            reset = self.drop_track(ResetReason::TrackerLost);
        }

        FusionReport {
            frame_index,
            fps: self.clock.estimated_fps(),
            virtual_time,
            timeout_seconds: self.config.timeout_seconds,
            target,
            detector_ran,
            detector_failed,
            reconfirmed,
            reset,
        }
    }

    /// Invoke the detector at the active threshold and pick the strongest
    /// matching candidate. Ties keep the first candidate.
    fn detect(&mut self, frame: &RgbImage) -> Result<Option<Candidate>, DetectorError> {
        let threshold = self.active_threshold();
        let candidates = self.detector.infer(frame, threshold)?;

        let mut best: Option<Candidate> = None;
        for candidate in candidates {
            if candidate.confidence < threshold || !self.config.is_target(&candidate.label) {
                continue;
            }
            if best
                .as_ref()
                .is_none_or(|current| candidate.confidence > current.confidence)
            {
                best = Some(candidate);
            }
        }
        Ok(best)
    }

    /// Start or re-anchor the track on an accepted detection. A fresh tracker
    /// replaces any existing one.
    fn anchor(
        &mut self,
        frame: &RgbImage,
        candidate: Candidate,
        virtual_time: f64,
    ) -> Result<(), TrackerError> {
        let mut tracker = self.trackers.create()?;
        tracker.init(frame, candidate.bbox)?;
        info!(
            class = %candidate.label,
            confidence = f64::from(candidate.confidence),
            "Target anchored by detector"
        );
        self.phase = Phase::Tracking {
            track: Track {
                bbox: candidate.bbox,
                class: candidate.label,
                confidence: candidate.confidence,
                source: Source::Detector,
                last_detection_virtual_time: virtual_time,
            },
            tracker,
        };
        Ok(())
    }

    /// Advance the tracker. `None` while idle or when the target is lost.
    fn follow(
        &mut self,
        frame: &RgbImage,
        virtual_time: f64,
        reconfirmed: bool,
    ) -> Option<TrackedTarget> {
        let Phase::Tracking { track, tracker } = &mut self.phase else {
            return None;
        };
        let bbox = tracing::info_span!("fusion.track").in_scope(|| tracker.update(frame))?;

        let elapsed = (virtual_time - track.last_detection_virtual_time).max(0.0);
        let presentation = if reconfirmed {
            Presentation::Reconfirmed
        } else if elapsed <= self.config.warm_window + TIME_EPSILON {
            Presentation::Warm
        } else {
            Presentation::Cooling {
                remaining: (self.config.timeout_seconds - elapsed).max(0.0),
            }
        };

        track.bbox = bbox;
        track.source = if reconfirmed {
            Source::Detector
        } else {
            Source::Tracker
        };

        Some(TrackedTarget {
            bbox,
            center: bbox.center(),
            class: track.class.clone(),
            confidence: track.confidence,
            source: track.source,
            time_since_detection: elapsed,
            presentation,
        })
    }

    fn drop_track(&mut self, reason: ResetReason) -> Option<ResetReason> {
        self.phase = Phase::Idle;
        Some(reason)
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::HashMap,
        sync::{
            Arc, Mutex,
            atomic::{AtomicBool, AtomicUsize, Ordering},
        },
        time::Duration,
    };

    use ml_core::{BoundingBox, DetectorError, TrackerKind};

    use super::*;

    /// Detector answering from a script keyed by 1-based invocation number.
    struct ScriptedDetector {
        responses: HashMap<usize, Result<Vec<Candidate>, String>>,
        calls: usize,
        thresholds: Arc<Mutex<Vec<f32>>>,
    }

    impl Detector for ScriptedDetector {
        fn infer(
            &mut self,
            _frame: &RgbImage,
            threshold: f32,
        ) -> Result<Vec<Candidate>, DetectorError> {
            self.calls += 1;
            self.thresholds.lock().unwrap().push(threshold);
            match self.responses.get(&self.calls) {
                Some(Ok(candidates)) => Ok(candidates.clone()),
                Some(Err(message)) => Err(DetectorError::Inference(message.clone())),
                None => Ok(Vec::new()),
            }
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    /// Tracker that drifts one pixel right per update until told to lose.
    struct DriftingTracker {
        bbox: Option<BoundingBox>,
        lose: Arc<AtomicBool>,
    }

    impl Tracker for DriftingTracker {
        fn init(&mut self, _frame: &RgbImage, bbox: BoundingBox) -> Result<(), TrackerError> {
            self.bbox = Some(bbox);
            Ok(())
        }

        fn update(&mut self, _frame: &RgbImage) -> Option<BoundingBox> {
            if self.lose.load(Ordering::SeqCst) {
                return None;
            }
            let moved = self.bbox?.translate(1, 0);
            self.bbox = Some(moved);
            Some(moved)
        }
    }

    #[derive(Clone, Default)]
    struct FakeFactory {
        created: Arc<AtomicUsize>,
        lose: Arc<AtomicBool>,
        refuse: Arc<AtomicBool>,
    }

    impl TrackerFactory for FakeFactory {
        fn kind(&self) -> TrackerKind {
            TrackerKind::Correlation
        }

        fn create(&self) -> Result<Box<dyn Tracker>, TrackerError> {
            if self.refuse.load(Ordering::SeqCst) {
                return Err(TrackerError::Backend("refused".to_string()));
            }
            self.created.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(DriftingTracker {
                bbox: None,
                lose: self.lose.clone(),
            }))
        }
    }

    /// 32 fps with 31.25 ms frame spacing keeps every virtual timestamp exact.
    const STEP: Duration = Duration::from_micros(31_250);

    struct Harness {
        engine: FusionEngine,
        factory: FakeFactory,
        thresholds: Arc<Mutex<Vec<f32>>>,
        start: Instant,
        frame: RgbImage,
    }

    impl Harness {
        fn new(responses: Vec<(usize, Result<Vec<Candidate>, String>)>) -> Self {
            let thresholds = Arc::new(Mutex::new(Vec::new()));
            let detector = ScriptedDetector {
                responses: responses.into_iter().collect(),
                calls: 0,
                thresholds: thresholds.clone(),
            };
            let factory = FakeFactory::default();
            let config = FusionConfig {
                default_fps: 32.0,
                ..FusionConfig::default()
            };
            Self {
                engine: FusionEngine::new(config, Box::new(detector), Box::new(factory.clone())),
                factory,
                thresholds,
                start: Instant::now(),
                frame: RgbImage::new(64, 48),
            }
        }

        fn step(&mut self) -> FusionReport {
            let at = self.start + STEP * (self.engine.frame_index() as u32 + 1);
            self.engine.process(&self.frame, at)
        }

        /// Advance until `frame_index` reaches `target`, returning the last report.
        fn run_to(&mut self, target: u64) -> FusionReport {
            let mut report = self.step();
            while report.frame_index < target {
                report = self.step();
            }
            report
        }
    }

    fn gun(confidence: f32, x: i32) -> Candidate {
        Candidate::new("Gun", confidence, BoundingBox::from_xywh(x, 10, 20, 20).unwrap())
    }

    #[test]
    fn detector_runs_on_cadence_only() {
        let mut harness = Harness::new(vec![]);
        for _ in 0..9 {
            assert!(!harness.step().detector_ran);
        }
        assert!(harness.step().detector_ran);
        assert_eq!(harness.thresholds.lock().unwrap().len(), 1);
    }

    #[test]
    fn idle_uses_initial_and_tracking_uses_redetect_threshold() {
        let mut harness = Harness::new(vec![
            (1, Ok(vec![gun(0.7, 5)])),
            (2, Ok(vec![gun(0.85, 5)])),
            (3, Ok(vec![gun(0.65, 30)])),
        ]);

        let first = harness.run_to(10);
        assert!(first.target.is_none());
        assert!(!harness.engine.state().is_tracking());

        let second = harness.run_to(20);
        assert!(second.reconfirmed);
        assert!(harness.engine.state().is_tracking());

        // 0.65 would not start a track but is enough to re-anchor one.
        let third = harness.run_to(30);
        assert!(third.reconfirmed);
        assert_eq!(third.target.unwrap().bbox.x1, 31);

        assert_eq!(*harness.thresholds.lock().unwrap(), vec![0.8, 0.8, 0.6]);
        assert_eq!(harness.factory.created.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn ignores_non_target_labels_case_insensitively() {
        let knife = Candidate::new("Knife", 0.99, BoundingBox::from_xywh(0, 0, 10, 10).unwrap());
        let lowercase = Candidate::new("gun", 0.9, BoundingBox::from_xywh(2, 2, 10, 10).unwrap());
        let mut harness = Harness::new(vec![(1, Ok(vec![knife, lowercase]))]);

        let report = harness.run_to(10);
        let target = report.target.unwrap();
        assert_eq!(target.class, "gun");
    }

    #[test]
    fn strongest_candidate_wins_and_ties_keep_the_first() {
        let mut harness = Harness::new(vec![
            (1, Ok(vec![gun(0.9, 5), gun(0.95, 20), gun(0.95, 40)])),
        ]);
        let target = harness.run_to(10).target.unwrap();
        // Tracker drifted one pixel from the anchored box.
        assert_eq!(target.bbox.x1, 21);
        assert_eq!(target.confidence, 0.95);
    }

    #[test]
    fn times_out_exactly_when_virtual_elapsed_reaches_timeout() {
        let mut harness = Harness::new(vec![(1, Ok(vec![gun(0.9, 5)]))]);
        harness.run_to(10);

        let before = harness.run_to(169);
        assert!(before.target.is_some());
        assert_eq!(before.reset, None);
        assert!(matches!(
            before.target.unwrap().presentation,
            Presentation::Cooling { remaining } if (remaining - 1.0 / 32.0).abs() < 1e-9
        ));

        let expired = harness.step();
        assert_eq!(expired.frame_index, 170);
        assert_eq!(expired.reset, Some(ResetReason::Timeout));
        assert!(expired.target.is_none());
        assert!(!harness.engine.state().is_tracking());
    }

    #[test]
    fn detection_on_the_expiring_frame_prevents_the_reset() {
        let mut harness = Harness::new(vec![
            (1, Ok(vec![gun(0.9, 5)])),
            (17, Ok(vec![gun(0.7, 12)])),
        ]);
        harness.run_to(10);

        let report = harness.run_to(170);
        assert_eq!(report.reset, None);
        assert!(report.reconfirmed);
        let target = report.target.unwrap();
        assert_eq!(target.bbox.x1, 13);
        assert_eq!(target.source, Source::Detector);
        assert_eq!(target.presentation, Presentation::Reconfirmed);
    }

    #[test]
    fn tracker_loss_returns_to_idle() {
        let mut harness = Harness::new(vec![(1, Ok(vec![gun(0.9, 5)]))]);
        harness.run_to(12);
        harness.factory.lose.store(true, Ordering::SeqCst);

        let report = harness.step();
        assert_eq!(report.reset, Some(ResetReason::TrackerLost));
        assert!(report.target.is_none());
        assert_eq!(harness.engine.active_threshold(), 0.8);
    }

    #[test]
    fn tracker_init_failure_returns_to_idle() {
        let mut harness = Harness::new(vec![(1, Ok(vec![gun(0.9, 5)]))]);
        harness.factory.refuse.store(true, Ordering::SeqCst);

        let report = harness.run_to(10);
        assert_eq!(report.reset, Some(ResetReason::TrackerInit));
        assert!(!report.reconfirmed);
        assert!(!harness.engine.state().is_tracking());
    }

    #[test]
    fn detector_errors_count_as_empty_frames() {
        let mut harness = Harness::new(vec![
            (1, Err("cuda out of memory".to_string())),
            (2, Ok(vec![gun(0.9, 5)])),
        ]);
        let failed = harness.run_to(10);
        assert!(failed.detector_failed);
        assert!(failed.target.is_none());

        let anchored = harness.run_to(20);
        assert!(!anchored.detector_failed);
        assert!(anchored.target.is_some());
    }

    #[test]
    fn presentation_moves_from_reconfirmed_to_warm_to_cooling() {
        let mut harness = Harness::new(vec![(1, Ok(vec![gun(0.9, 5)]))]);
        let anchored = harness.run_to(10).target.unwrap();
        assert_eq!(anchored.presentation, Presentation::Reconfirmed);
        assert_eq!(anchored.time_since_detection, 0.0);

        let warm = harness.step().target.unwrap();
        assert_eq!(warm.presentation, Presentation::Warm);
        assert_eq!(warm.source, Source::Tracker);

        // 16 frames after the detection is exactly half a second.
        let edge = harness.run_to(26).target.unwrap();
        assert_eq!(edge.presentation, Presentation::Warm);

        let cooling = harness.step().target.unwrap();
        assert_eq!(
            cooling.presentation,
            Presentation::Cooling {
                remaining: 5.0 - 17.0 / 32.0
            }
        );
    }

    #[test]
    fn reset_is_idempotent() {
        let mut harness = Harness::new(vec![(1, Ok(vec![gun(0.9, 5)]))]);
        harness.run_to(5);
        harness.engine.reset();
        assert_eq!(harness.engine.frame_index(), 5);
        assert!(!harness.engine.state().is_tracking());

        harness.run_to(11);
        assert!(harness.engine.state().is_tracking());
        harness.engine.reset();
        assert_eq!(harness.engine.frame_index(), 0);
        assert!(!harness.engine.state().is_tracking());
        harness.engine.reset();
        assert_eq!(harness.engine.frame_index(), 0);
    }
}
