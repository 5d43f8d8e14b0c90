use ml_core::BoundingBox;

/// Which stage produced the current box.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Source {
    Detector,
    Tracker,
}

impl Source {
    pub fn label(self) -> &'static str {
        match self {
            Source::Detector => "detector",
            Source::Tracker => "tracker",
        }
    }
}

/// Belief about the target while tracking.
#[derive(Clone, Debug, PartialEq)]
pub struct Track {
    pub bbox: BoundingBox,
    pub class: String,
    /// Confidence of the detection that last anchored the track.
    pub confidence: f32,
    pub source: Source,
    pub last_detection_virtual_time: f64,
}

/// Read-only view of the engine's target state.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum TargetState<'a> {
    Idle,
    Tracking(&'a Track),
}

impl TargetState<'_> {
    pub fn is_tracking(&self) -> bool {
        matches!(self, TargetState::Tracking(_))
    }
}

/// How a tracked box should be presented to viewers.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Presentation {
    /// The detector accepted the target on this frame.
    Reconfirmed,
    /// Tracker-only, shortly after the last detection.
    Warm,
    /// Tracker-only, counting down to the timeout.
    Cooling { remaining: f64 },
}

/// Target position emitted for one frame.
#[derive(Clone, Debug, PartialEq)]
pub struct TrackedTarget {
    pub bbox: BoundingBox,
    pub center: (i32, i32),
    pub class: String,
    pub confidence: f32,
    pub source: Source,
    /// Virtual seconds since the detector last accepted the target.
    pub time_since_detection: f64,
    pub presentation: Presentation,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResetReason {
    /// No accepted detection within the timeout.
    Timeout,
    /// The tracker reported the target lost.
    TrackerLost,
    /// A tracker could not be created or anchored on a detection.
    TrackerInit,
}

impl ResetReason {
    pub fn label(self) -> &'static str {
        match self {
            ResetReason::Timeout => "timeout",
            ResetReason::TrackerLost => "tracker_lost",
            ResetReason::TrackerInit => "tracker_init",
        }
    }
}

/// Outcome of one fusion cycle.
#[derive(Clone, Debug, PartialEq)]
pub struct FusionReport {
    pub frame_index: u64,
    pub fps: f64,
    pub virtual_time: f64,
    pub timeout_seconds: f64,
    pub target: Option<TrackedTarget>,
    pub detector_ran: bool,
    /// The detector ran and returned an error.
    pub detector_failed: bool,
    /// The detector accepted a candidate on this frame.
    pub reconfirmed: bool,
    pub reset: Option<ResetReason>,
}

impl FusionReport {
    pub fn tracking_active(&self) -> bool {
        self.target.is_some()
    }
}
