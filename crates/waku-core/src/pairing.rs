//! Pairing relay: hands pairing codes from the protocol connection to pollers.
//!
//! Each session owns a small ring buffer of codes. When it is full the oldest
//! code is evicted to admit the newest: codes expire quickly, so freshness wins
//! over completeness. Pollers take exactly one code each and never block the
//! producer.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{watch, Notify};
use tokio::time::Instant;
use tracing::debug;

use crate::session::{SessionState, SessionStatus};

/// Default number of codes buffered per session.
pub const DEFAULT_CAPACITY: usize = 5;

/// How long a poller waits for a code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PairingTimeouts {
    /// First wait, applied to every poll.
    pub initial: Duration,
    /// Additional wait when the device has no stored credentials yet.
    pub extended: Duration,
}

impl Default for PairingTimeouts {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(5),
            extended: Duration::from_secs(10),
        }
    }
}

/// Outcome of a bounded wait on the relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayWait {
    Code(String),
    Connected,
    Elapsed,
}

/// Bounded FIFO of pairing codes with overwrite-oldest-on-full semantics.
pub struct PairingRelay {
    capacity: usize,
    queue: Mutex<VecDeque<String>>,
    notify: Notify,
}

impl PairingRelay {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            notify: Notify::new(),
        }
    }

    fn queue(&self) -> MutexGuard<'_, VecDeque<String>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Offer a batch of codes in order. Returns how many queued codes were evicted.
    pub fn push_codes<I>(&self, codes: I) -> usize
    where
        I: IntoIterator<Item = String>,
    {
        let mut evicted = 0;
        let mut pushed = 0;
        {
            let mut queue = self.queue();
            for code in codes {
                if queue.len() == self.capacity {
                    queue.pop_front();
                    evicted += 1;
                }
                queue.push_back(code);
                pushed += 1;
            }
        }
        for _ in 0..pushed {
            self.notify.notify_one();
        }
        if evicted > 0 {
            debug!(evicted, "Pairing queue full, dropped oldest codes");
        }
        evicted
    }

    /// Take the oldest pending code without waiting.
    pub fn try_take(&self) -> Option<String> {
        self.queue().pop_front()
    }

    /// Snapshot of the pending codes, oldest first.
    pub fn pending(&self) -> Vec<String> {
        self.queue().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.queue().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue().is_empty()
    }

    pub fn clear(&self) {
        self.queue().clear();
    }

    /// Wait until a code arrives, the session reports `Connected`, or `until`
    /// passes, whichever comes first.
    pub async fn wait(
        &self,
        until: Instant,
        status: &mut watch::Receiver<SessionStatus>,
    ) -> RelayWait {
        let mut status_open = true;
        loop {
            if status.borrow_and_update().state == SessionState::Connected {
                return RelayWait::Connected;
            }
            if let Some(code) = self.try_take() {
                return RelayWait::Code(code);
            }

            tokio::select! {
                _ = self.notify.notified() => {}
                changed = status.changed(), if status_open => {
                    if changed.is_err() {
                        status_open = false;
                    }
                }
                _ = tokio::time::sleep_until(until) => return RelayWait::Elapsed,
            }
        }
    }
}

impl Default for PairingRelay {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
