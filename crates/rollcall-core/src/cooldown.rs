//! Per-identity debounce for attendance records.
//!
//! State is in memory only. Restarting the process forgets every last-seen
//! time, so the first sighting after a restart is always logged.

use chrono::{NaiveDateTime, TimeDelta};
use std::collections::HashMap;

/// Largest window `TimeDelta` can hold, in whole seconds.
pub const MAX_COOLDOWN_SECS: u64 = (i64::MAX / 1000) as u64;

/// Tracks when each identity was last written to the ledger.
#[derive(Debug, Clone)]
pub struct CooldownTracker {
    window: TimeDelta,
    last_logged: HashMap<String, NaiveDateTime>,
}

impl CooldownTracker {
    pub fn new(window: TimeDelta) -> Self {
        Self {
            window,
            last_logged: HashMap::new(),
        }
    }

    /// Windows beyond [`MAX_COOLDOWN_SECS`] saturate to the largest representable delta.
    pub fn from_secs(secs: u64) -> Self {
        let window = i64::try_from(secs)
            .ok()
            .and_then(TimeDelta::try_seconds)
            .unwrap_or(TimeDelta::MAX);
        Self::new(window)
    }

    pub fn window(&self) -> TimeDelta {
        self.window
    }

    /// True iff `name` was never recorded, or strictly more than the window
    /// has elapsed since it was. Exactly `window` later is still suppressed.
    pub fn should_log(&self, name: &str, now: NaiveDateTime) -> bool {
        match self.last_logged.get(name) {
            None => true,
            Some(&last) => now - last > self.window,
        }
    }

    /// Overwrite the last-logged time for `name`.
    pub fn record(&mut self, name: &str, now: NaiveDateTime) {
        self.last_logged.insert(name.to_string(), now);
    }

    pub fn last_logged(&self, name: &str) -> Option<NaiveDateTime> {
        self.last_logged.get(name).copied()
    }

    pub fn tracked(&self) -> usize {
        self.last_logged.len()
    }
}
