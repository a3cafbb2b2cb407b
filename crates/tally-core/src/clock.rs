use chrono::{SecondsFormat, Utc};

/// Source of `created_at` timestamps. Nothing else in the workspace reads the system clock.
pub trait Clock: Send + Sync {
    /// ISO-8601 / RFC-3339 timestamp, e.g. `2026-10-19T08:30:00.123Z`.
    fn now_rfc3339(&self) -> String;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_rfc3339(&self) -> String {
        Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
    }
}

/// Always returns the same timestamp.
#[derive(Debug, Clone)]
pub struct FixedClock(pub String);

impl Clock for FixedClock {
    fn now_rfc3339(&self) -> String {
        self.0.clone()
    }
}
