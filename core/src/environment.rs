//! Environment dependencies injected into the engine components.

use chrono::{DateTime, Utc};

/// Clock trait - abstracts time operations for testability
///
/// Hold creation, expiry and the sweeper all read time through this trait so tests
/// can drive expiry deterministically.
pub trait Clock: Send + Sync {
    /// Get the current time
    fn now(&self) -> DateTime<Utc>;
}

/// Production clock backed by the system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
