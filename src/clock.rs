//! Injected wall-clock time.
//!
//! The engine never reads a process-global "now"; every timestamp flows
//! through a `Clock` so tests can pin and advance time deterministically.

use chrono::{DateTime, Local, NaiveDate, TimeZone};

/// Wall-clock source for all time arithmetic in the engine.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Local>;
}

/// The real wall clock.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }
}

/// A local wall-clock instant on `date` at `hour:minute`.
///
/// Picks the earlier instant when a DST fold makes the time ambiguous and
/// returns `None` when a DST gap removes it.
pub fn local_datetime(date: NaiveDate, hour: u32, minute: u32) -> Option<DateTime<Local>> {
    let naive = date.and_hms_opt(hour, minute, 0)?;
    Local.from_local_datetime(&naive).earliest()
}
