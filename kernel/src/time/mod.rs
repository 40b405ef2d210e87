// SPDX-License-Identifier: MPL-2.0

//! Wall-clock time used for the `otime` and `ctime` stamps of semaphore sets.

use core::time::Duration;

/// A coarse-grained real-time clock.
///
/// Semaphore sets only record whole seconds, so the clock makes no attempt to be precise.
#[derive(Debug)]
pub struct RealTimeCoarseClock {
    _private: (),
}

static CLOCK_INSTANCE: RealTimeCoarseClock = RealTimeCoarseClock { _private: () };

impl RealTimeCoarseClock {
    /// Gets the singleton of this clock.
    pub fn get() -> &'static RealTimeCoarseClock {
        &CLOCK_INSTANCE
    }

    /// Reads the time elapsed since the UNIX epoch.
    ///
    /// A host clock set before the epoch reads as zero.
    pub fn read_time(&self) -> Duration {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
    }
}
