//! Idle auto-lock countdown.
//!
//! The locker only tracks a deadline; the vault polls it on every
//! key-requiring operation and hosts poll it from their event loop.

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Source of monotonic time.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Clone)]
pub struct ManualClock {
    origin: Instant,
    offset: Arc<Mutex<Duration>>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self {
            origin: Instant::now(),
            offset: Arc::new(Mutex::new(Duration::ZERO)),
        }
    }
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        let mut offset = self.offset.lock().unwrap_or_else(|e| e.into_inner());
        *offset += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        let offset = *self.offset.lock().unwrap_or_else(|e| e.into_inner());
        self.origin + offset
    }
}

pub struct IdleAutoLocker {
    timeout: Option<Duration>,
    deadline: Option<Instant>,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for IdleAutoLocker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdleAutoLocker")
            .field("timeout", &self.timeout)
            .field("armed", &self.deadline.is_some())
            .finish()
    }
}

impl IdleAutoLocker {
    pub fn new(timeout: Option<Duration>, clock: Arc<dyn Clock>) -> Self {
        Self {
            timeout,
            deadline: None,
            clock,
        }
    }

    /// Starts a fresh countdown.
    pub fn arm(&mut self) {
        self.deadline = self.timeout.map(|t| self.clock.now() + t);
    }

    /// Pushes the deadline out if a countdown is running.
    pub fn touch(&mut self) {
        if self.deadline.is_some() {
            self.arm();
        }
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn is_expired(&self) -> bool {
        self.deadline
            .is_some_and(|deadline| self.clock.now() >= deadline)
    }

    /// Time left before expiry, if armed.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(self.clock.now()))
    }
}
