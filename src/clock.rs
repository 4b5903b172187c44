// ABOUTME: Injectable wall-clock abstraction so version math is deterministic in tests
// ABOUTME: SystemClock is used in production; FixedClock pins "now" for unit tests
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

//! All version math in [`crate::keeper::safer`] is a pure function of `(created_at,
//! rotation, now)`. `now` is supplied through this trait rather than read directly from
//! the OS clock so that the rotation-window properties (§8 of the specification) can be
//! tested without sleeping.

use chrono::{DateTime, Utc};

/// Source of the current wall-clock time.
pub trait Clock: Send + Sync {
    /// The current time.
    fn now(&self) -> DateTime<Utc>;
}

/// Production clock backed by the operating system.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Test clock that always returns the same instant until advanced.
#[derive(Debug, Clone)]
pub struct FixedClock {
    now: std::sync::Arc<std::sync::Mutex<DateTime<Utc>>>,
}

impl FixedClock {
    /// Build a clock pinned at `now`.
    #[must_use]
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: std::sync::Arc::new(std::sync::Mutex::new(now)),
        }
    }

    /// Move the pinned time forward (or backward) by `delta`.
    #[allow(clippy::unwrap_used)] // test-only lock, poisoning is a test bug
    pub fn advance(&self, delta: chrono::Duration) {
        let mut guard = self.now.lock().unwrap();
        *guard += delta;
    }
}

impl Clock for FixedClock {
    #[allow(clippy::unwrap_used)] // test-only lock, poisoning is a test bug
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}
