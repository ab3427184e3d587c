//! Shared health state for the /health endpoint.
//! Updated by RefreshService, read by the API.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Mutex;

#[derive(Default)]
pub struct HealthState {
    /// Refresh tasks spawned but not yet delivered.
    pub refreshes_in_flight: AtomicU64,
    pub refreshes_completed: AtomicU64,
    /// Epoch seconds of the last successful analysis (0 = none).
    pub last_success_at: AtomicI64,
    /// Epoch seconds of the last failed refresh (0 = none).
    pub last_failure_at: AtomicI64,
    last_error: Mutex<Option<String>>,
}

impl HealthState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn refresh_started(&self) {
        self.refreshes_in_flight.fetch_add(1, Ordering::Relaxed);
    }

    pub fn refresh_succeeded(&self, at: i64) {
        self.finish();
        self.last_success_at.store(at, Ordering::Relaxed);
        if let Ok(mut e) = self.last_error.lock() {
            *e = None;
        }
    }

    pub fn refresh_failed(&self, at: i64, error: String) {
        self.finish();
        self.last_failure_at.store(at, Ordering::Relaxed);
        if let Ok(mut e) = self.last_error.lock() {
            *e = Some(error);
        }
    }

    fn finish(&self) {
        self.refreshes_in_flight.fetch_sub(1, Ordering::Relaxed);
        self.refreshes_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn refreshes_in_flight(&self) -> u64 {
        self.refreshes_in_flight.load(Ordering::Relaxed)
    }

    pub fn refreshes_completed(&self) -> u64 {
        self.refreshes_completed.load(Ordering::Relaxed)
    }

    pub fn last_success_at(&self) -> i64 {
        self.last_success_at.load(Ordering::Relaxed)
    }

    pub fn last_failure_at(&self) -> i64 {
        self.last_failure_at.load(Ordering::Relaxed)
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().ok().and_then(|e| e.clone())
    }
}
