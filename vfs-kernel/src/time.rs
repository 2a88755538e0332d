//! Wall-clock time source (ambient stack)
//!
//! The core only ever asks a [`vfs_core::Clock`] for the current second
//! count; it has no notion of how that number is produced. `HostClock`
//! is the concrete clock a kernel binds at boot: something upstream
//! (RTC read, NTP, a boot-time command-line argument) calls
//! [`HostClock::set_unix_time`] once wall-clock time becomes known, and
//! every later tick is derived from the monotonic counter kept alongside
//! it, mirroring the uptime-counter pattern the kernel's own time
//! subsystem uses for scheduling.

use core::sync::atomic::{AtomicU64, Ordering};
use vfs_core::Clock;

/// A clock seeded once at boot and advanced by timer ticks thereafter.
pub struct HostClock {
    epoch_seconds_at_boot: AtomicU64,
    uptime_seconds: AtomicU64,
}

impl HostClock {
    pub const fn new() -> Self {
        HostClock {
            epoch_seconds_at_boot: AtomicU64::new(0),
            uptime_seconds: AtomicU64::new(0),
        }
    }

    /// Records the wall-clock second count at the moment of the call,
    /// i.e. "now". Until this is called, `now_unix` returns raw uptime.
    pub fn set_unix_time(&self, seconds_since_epoch: u64) {
        let uptime = self.uptime_seconds.load(Ordering::Relaxed);
        self.epoch_seconds_at_boot
            .store(seconds_since_epoch.saturating_sub(uptime), Ordering::Relaxed);
    }

    /// Advances the uptime counter; called from a timer tick.
    pub fn tick(&self, elapsed_seconds: u64) {
        self.uptime_seconds.fetch_add(elapsed_seconds, Ordering::Relaxed);
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.uptime_seconds.load(Ordering::Relaxed)
    }
}

impl Default for HostClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for HostClock {
    fn now_unix(&self) -> u64 {
        self.epoch_seconds_at_boot.load(Ordering::Relaxed) + self.uptime_seconds.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_raw_uptime_before_wall_clock_is_known() {
        let clock = HostClock::new();
        clock.tick(5);
        assert_eq!(clock.now_unix(), 5);
    }

    #[test]
    fn advances_from_the_seeded_wall_clock_value() {
        let clock = HostClock::new();
        clock.tick(3);
        clock.set_unix_time(1_000_000);
        assert_eq!(clock.now_unix(), 1_000_000);
        clock.tick(10);
        assert_eq!(clock.now_unix(), 1_000_010);
    }
}
