use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::storage::Clock;

/// In-memory duplicate-submission lock keyed by idempotency key.
///
/// Lives as long as the page; it is not shared across tabs.
#[derive(Clone)]
pub struct SubmissionLock {
    attempts: Arc<Mutex<HashMap<String, i64>>>,
    clock: Arc<dyn Clock>,
    window: Duration,
}

impl SubmissionLock {
    pub fn new(clock: Arc<dyn Clock>, window: Duration) -> Self {
        Self {
            attempts: Arc::new(Mutex::new(HashMap::new())),
            clock,
            window,
        }
    }

    /// Record an attempt for `key`. Returns `false` when the same key was
    /// attempted within the window.
    pub fn try_acquire(&self, key: &str) -> bool {
        let now = self.clock.now_millis();
        let window = i64::try_from(self.window.as_millis()).unwrap_or(i64::MAX);
        let Ok(mut attempts) = self.attempts.lock() else {
            // A poisoned lock must not block the visitor's action.
            return true;
        };
        attempts.retain(|_, at| now.saturating_sub(*at) < window);
        if attempts.contains_key(key) {
            return false;
        }
        attempts.insert(key.to_string(), now);
        true
    }
}
