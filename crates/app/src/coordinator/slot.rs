//! Depth-1 hand-off between producer connections and the fusion worker.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

use crossbeam_channel::{
    Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError, bounded,
};
use tokio::sync::oneshot;
use tracing::trace;
use video_ingest::ProducerUnit;

use super::protocol::ProducerAck;

/// One producer unit waiting for the fusion worker.
pub struct FrameJob {
    pub unit: ProducerUnit,
    pub sequence: u64,
    pub received_at: Instant,
    /// Present for units whose producer waits for an acknowledgement.
    pub ack: Option<oneshot::Sender<ProducerAck>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submit {
    Queued,
    /// A pending job was discarded to make room.
    Replaced,
    /// The worker is gone or shutting down.
    Closed,
}

/// Sending side of the slot. Cloned into every producer connection.
#[derive(Clone)]
pub struct FrameSlot {
    tx: Sender<FrameJob>,
    drain: Receiver<FrameJob>,
    running: Arc<AtomicBool>,
    worker_alive: Arc<AtomicBool>,
}

/// Receiving side of the slot, owned by the fusion worker.
///
/// Dropping it marks the slot closed and discards any pending job.
pub struct FrameJobs {
    rx: Receiver<FrameJob>,
    worker_alive: Arc<AtomicBool>,
}

/// Create the slot and the receiver owned by the fusion worker.
pub fn channel(running: Arc<AtomicBool>) -> (FrameSlot, FrameJobs) {
    let (tx, rx) = bounded(1);
    let worker_alive = Arc::new(AtomicBool::new(true));
    (
        FrameSlot {
            tx,
            drain: rx.clone(),
            running,
            worker_alive: Arc::clone(&worker_alive),
        },
        FrameJobs { rx, worker_alive },
    )
}

impl FrameSlot {
    /// True while the server is running and the worker still holds its receiver.
    pub fn is_open(&self) -> bool {
        self.running.load(Ordering::SeqCst) && self.worker_alive.load(Ordering::SeqCst)
    }

    /// Offer `job` to the worker, replacing any job still pending.
    pub fn submit(&self, mut job: FrameJob) -> Submit {
        if !self.is_open() {
            self.discard_pending();
            return Submit::Closed;
        }
        let mut replaced = false;
        loop {
            match self.tx.try_send(job) {
                Ok(()) => break,
                Err(TrySendError::Full(returned)) => {
                    job = returned;
                    if let Ok(stale) = self.drain.try_recv() {
                        trace!(
                            sequence = stale.sequence,
                            "replacing pending frame with {}", job.sequence
                        );
                        metrics::counter!("pantilt_frames_dropped_total", "reason" => "replaced")
                            .increment(1);
                        replaced = true;
                    }
                }
                Err(TrySendError::Disconnected(_)) => return Submit::Closed,
            }
        }
        // The worker may have exited between the check and the send.
        if !self.worker_alive.load(Ordering::SeqCst) {
            self.discard_pending();
            return Submit::Closed;
        }
        if replaced {
            Submit::Replaced
        } else {
            Submit::Queued
        }
    }

    fn discard_pending(&self) {
        while self.drain.try_recv().is_ok() {}
    }
}

impl FrameJobs {
    pub fn recv_timeout(&self, timeout: Duration) -> Result<FrameJob, RecvTimeoutError> {
        self.rx.recv_timeout(timeout)
    }

    pub fn try_recv(&self) -> Result<FrameJob, TryRecvError> {
        self.rx.try_recv()
    }
}

impl Drop for FrameJobs {
    fn drop(&mut self) {
        self.worker_alive.store(false, Ordering::SeqCst);
        while self.rx.try_recv().is_ok() {}
    }
}
