//! Wall-clock helpers and bounded deadlines.

use std::time::{Duration, Instant, SystemTime};

/// A point in time after which a blocking wait gives up.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    started: Instant,
    budget: Duration,
}

impl Deadline {
    pub fn after(budget: Duration) -> Self {
        Self {
            started: Instant::now(),
            budget,
        }
    }

    pub fn expired(&self) -> bool {
        self.started.elapsed() >= self.budget
    }

    pub fn remaining(&self) -> Duration {
        self.budget.saturating_sub(self.started.elapsed())
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn budget(&self) -> Duration {
        self.budget
    }

    /// Sleep for `interval`, never past the deadline.
    pub fn sleep(&self, interval: Duration) {
        let nap = interval.min(self.remaining());
        if !nap.is_zero() {
            std::thread::sleep(nap);
        }
    }

    /// Poll `check` every `interval` until it returns true or the deadline expires.
    pub fn poll_until(&self, interval: Duration, mut check: impl FnMut() -> bool) -> bool {
        loop {
            if check() {
                return true;
            }
            if self.expired() {
                return false;
            }
            self.sleep(interval);
        }
    }
}

pub fn wall_time_iso_utc() -> String {
    // Metadata only (report timestamps, output folder names); never drives a wait.
    let now = SystemTime::now();
    let dt: time::OffsetDateTime = now.into();
    dt.format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

/// RFC 3339 timestamp with characters Windows rejects in file names replaced.
pub fn filesystem_timestamp() -> String {
    wall_time_iso_utc().replace(':', "-")
}

pub(crate) fn system_time_secs(t: SystemTime) -> u64 {
    t.duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
