//! Time source abstraction.
//!
//! The session facade reads time through [`Clock`] so that episode
//! boundaries and timestamp monotonicity are testable without sleeping.

use chrono::{DateTime, Utc};

/// Supplies the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
