//! Online frame-rate estimate used as the fusion engine's virtual clock.

use std::{collections::VecDeque, time::Instant};

use tracing::info;

/// Number of inter-frame deltas kept for the rolling mean.
pub const FPS_WINDOW: usize = 30;
/// Recompute cadence, in recorded calls.
pub const RECOMPUTE_EVERY: u64 = 10;
/// Minimum number of buffered deltas before the estimate may change.
pub const MIN_DELTAS: usize = 10;
/// Smallest change in fps that is adopted.
pub const HYSTERESIS_FPS: f64 = 2.0;

/// Rolling estimate of the effective processing frame rate.
#[derive(Debug, Clone)]
pub struct FpsEstimator {
    fps: f64,
    deltas: VecDeque<f64>,
    last: Option<Instant>,
    calls: u64,
}

impl FpsEstimator {
    pub fn new(initial_fps: f64) -> Self {
        Self {
            fps: initial_fps,
            deltas: VecDeque::with_capacity(FPS_WINDOW),
            last: None,
            calls: 0,
        }
    }

    /// Feed the arrival time of the next frame. Returns the new estimate when
    /// this call changed it.
    pub fn record(&mut self, now: Instant) -> Option<f64> {
        self.calls += 1;
        if let Some(previous) = self.last.replace(now) {
            let delta = now.saturating_duration_since(previous).as_secs_f64();
            if self.deltas.len() == FPS_WINDOW {
                self.deltas.pop_front();
            }
            self.deltas.push_back(delta);
        }

        if self.calls % RECOMPUTE_EVERY != 0 || self.deltas.len() < MIN_DELTAS {
            return None;
        }
        let mean = self.deltas.iter().sum::<f64>() / self.deltas.len() as f64;
        if mean <= 0.0 {
            return None;
        }
        let measured = 1.0 / mean;
        if (measured - self.fps).abs() > HYSTERESIS_FPS {
            info!(from = self.fps, to = measured, "fps estimate adjusted");
            self.fps = measured;
            return Some(measured);
        }
        None
    }

    pub fn estimated_fps(&self) -> f64 {
        self.fps
    }

    /// Seconds of virtual time elapsed at `frame_index`.
    pub fn virtual_time(&self, frame_index: u64) -> f64 {
        frame_index as f64 / self.fps
    }

    /// Forget timing history; the current estimate is kept.
    pub fn restart(&mut self) {
        self.deltas.clear();
        self.last = None;
        self.calls = 0;
    }
}
