//! Display and servo consumer registries.
//!
//! Every consumer owns a bounded outbound queue drained by its connection
//! task. Broadcasting never awaits: a full queue skips the message for that
//! consumer only, and a closed queue removes the consumer.

use std::sync::{
    Arc, Mutex, MutexGuard, PoisonError,
    atomic::{AtomicU64, Ordering},
};

use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    Display,
    Servo,
}

impl Role {
    pub fn label(self) -> &'static str {
        match self {
            Role::Display => "display",
            Role::Servo => "servo",
        }
    }
}

/// Handle returned to a connection task when it joins a registry.
pub struct Registration {
    pub id: u64,
    pub outbound: mpsc::Receiver<Arc<str>>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BroadcastSummary {
    pub delivered: usize,
    /// Consumers whose queue was full.
    pub skipped: usize,
    /// Consumers dropped because their queue was closed.
    pub removed: usize,
}

pub struct ConsumerRegistry {
    role: Role,
    next_id: AtomicU64,
    members: Mutex<Vec<(u64, mpsc::Sender<Arc<str>>)>>,
}

impl ConsumerRegistry {
    pub fn new(role: Role) -> Self {
        Self {
            role,
            next_id: AtomicU64::new(1),
            members: Mutex::new(Vec::new()),
        }
    }

    /// Add a consumer with an outbound queue of `capacity` messages.
    pub fn register(&self, capacity: usize) -> Registration {
        let (tx, outbound) = mpsc::channel(capacity.max(1));
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let count = {
            let mut members = self.lock();
            members.push((id, tx));
            members.len()
        };
        info!(consumer = id, "{} consumer connected ({count} total)", self.role.label());
        self.publish_count(count);
        Registration { id, outbound }
    }

    /// Drop a consumer. Unknown ids are ignored.
    pub fn remove(&self, id: u64) {
        let (removed, count) = {
            let mut members = self.lock();
            let before = members.len();
            members.retain(|(member, _)| *member != id);
            (before != members.len(), members.len())
        };
        if removed {
            info!(consumer = id, "{} consumer disconnected ({count} left)", self.role.label());
            self.publish_count(count);
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Offer `message` to every consumer registered at the time of the call.
    pub fn broadcast(&self, message: Arc<str>) -> BroadcastSummary {
        let snapshot: Vec<(u64, mpsc::Sender<Arc<str>>)> = self.lock().clone();
        let mut summary = BroadcastSummary::default();
        let mut closed = Vec::new();

        for (id, tx) in &snapshot {
            match tx.try_send(Arc::clone(&message)) {
                Ok(()) => summary.delivered += 1,
                Err(TrySendError::Full(_)) => {
                    summary.skipped += 1;
                    debug!(consumer = id, "{} queue full; skipping message", self.role.label());
                }
                Err(TrySendError::Closed(_)) => closed.push(*id),
            }
        }

        if summary.skipped > 0 {
            metrics::counter!("pantilt_consumer_skipped_total", "role" => self.role.label())
                .increment(summary.skipped as u64);
        }
        for id in closed {
            self.remove(id);
            summary.removed += 1;
        }
        summary
    }

    fn lock(&self) -> MutexGuard<'_, Vec<(u64, mpsc::Sender<Arc<str>>)>> {
        self.members.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish_count(&self, count: usize) {
        metrics::gauge!("pantilt_consumers", "role" => self.role.label()).set(count as f64);
    }
}

/// The two independent consumer registries.
pub struct Consumers {
    pub display: ConsumerRegistry,
    pub servo: ConsumerRegistry,
}

impl Consumers {
    pub fn new() -> Self {
        Self {
            display: ConsumerRegistry::new(Role::Display),
            servo: ConsumerRegistry::new(Role::Servo),
        }
    }

    pub fn registry(&self, role: Role) -> &ConsumerRegistry {
        match role {
            Role::Display => &self.display,
            Role::Servo => &self.servo,
        }
    }
}

impl Default for Consumers {
    fn default() -> Self {
        Self::new()
    }
}
