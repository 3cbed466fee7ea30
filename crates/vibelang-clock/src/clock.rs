//! Logical time source.
//!
//! The clock keeps three notions of time in step:
//!
//! - **elapsed time** - seconds since the clock was created, read from the
//!   monotonic clock. Everything the scheduler does is expressed in it.
//! - **network time** - 64-bit NTP-style fixed point (high 32 bits are
//!   seconds since 1900-01-01, low 32 bits the fraction) as used in OSC
//!   bundle timetags.
//! - **time of day** - the system wall clock, only sampled when the offset
//!   between the other two is (re)computed.
//!
//! `network_time = floor(elapsed * 2^32) + offset`. The offset lives in an
//! atomic so a resync running on another thread is observed either entirely
//! or not at all.

use crate::error::{Error, Result};
use rosc::OscTime;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Network time units per second (`2^32`).
pub const SECONDS_TO_OSC: f64 = 4_294_967_296.0;
/// Seconds per network time unit (`2^-32`).
pub const OSC_TO_SECONDS: f64 = 1.0 / SECONDS_TO_OSC;
/// Seconds between the NTP epoch (1900) and the Unix epoch (1970). 17 leap years.
pub const SECONDS_FROM_1900_TO_1970: u64 = 2_208_988_800;
/// Default number of samples taken per resync; the tightest one wins.
pub const DEFAULT_RESYNC_ATTEMPTS: usize = 8;

/// Converts a duration into network time units without going through floats.
fn duration_to_osc(duration: Duration) -> u64 {
    let fractional = ((duration.subsec_nanos() as u64) << 32) / 1_000_000_000;
    (duration.as_secs() << 32).wrapping_add(fractional)
}

/// Convert a wall-clock time into a 64-bit network timestamp.
///
/// Fails for times before 1970; the result wraps every 136 years like NTP era 0 does.
pub fn system_time_to_ntp(time: SystemTime) -> Result<u64> {
    let since_unix = time
        .duration_since(UNIX_EPOCH)
        .map_err(|e| Error::Clock(format!("system time before Unix epoch: {}", e)))?;
    let seconds = since_unix.as_secs() + SECONDS_FROM_1900_TO_1970;
    Ok(duration_to_osc(Duration::new(seconds, since_unix.subsec_nanos())))
}

/// Split a 64-bit network timestamp into an OSC timetag.
pub fn ntp_to_osc_time(ntp: u64) -> OscTime {
    OscTime::from(((ntp >> 32) as u32, ntp as u32))
}

/// Pack an OSC timetag into a 64-bit network timestamp.
pub fn osc_time_to_ntp(time: OscTime) -> u64 {
    ((time.seconds as u64) << 32) | time.fractional as u64
}

/// Clock converting between elapsed, network and wall time.
#[derive(Debug)]
pub struct LogicalClock {
    /// Monotonic instant that elapsed time is measured from.
    anchor: Instant,
    /// Network time of elapsed time zero.
    elapsed_osc_offset: AtomicU64,
    /// How many (monotonic, time of day) sample pairs a resync takes.
    resync_attempts: usize,
}

impl Default for LogicalClock {
    fn default() -> Self {
        Self::new()
    }
}

impl LogicalClock {
    /// Create a clock anchored now and synchronized with the time of day.
    pub fn new() -> Self {
        Self::with_resync_attempts(DEFAULT_RESYNC_ATTEMPTS)
    }

    /// Create a clock that takes `attempts` samples per resync.
    pub fn with_resync_attempts(attempts: usize) -> Self {
        let clock = Self {
            anchor: Instant::now(),
            elapsed_osc_offset: AtomicU64::new(0),
            resync_attempts: attempts.max(1),
        };
        if let Err(e) = clock.resync() {
            log::warn!("[CLOCK] Initial time of day sync failed: {}", e);
        }
        clock
    }

    /// The monotonic instant corresponding to elapsed time zero.
    pub fn anchor(&self) -> Instant {
        self.anchor
    }

    /// Seconds elapsed since the clock was created.
    pub fn elapsed_time(&self) -> f64 {
        self.anchor.elapsed().as_secs_f64()
    }

    /// The monotonic instant at which `elapsed` seconds will have passed.
    ///
    /// Times at or before zero map to the anchor. Returns `None` when the
    /// instant is not representable (infinite or absurdly far away).
    pub fn instant_at(&self, elapsed: f64) -> Option<Instant> {
        if elapsed.is_nan() || elapsed <= 0.0 {
            return Some(self.anchor);
        }
        let offset = Duration::try_from_secs_f64(elapsed).ok()?;
        self.anchor.checked_add(offset)
    }

    /// Current network time of elapsed time zero.
    pub fn network_offset(&self) -> u64 {
        self.elapsed_osc_offset.load(Ordering::Acquire)
    }

    /// Convert elapsed seconds to a network timestamp.
    pub fn to_network_time(&self, elapsed: f64) -> u64 {
        let units = (elapsed * SECONDS_TO_OSC).floor() as i64;
        (units as u64).wrapping_add(self.network_offset())
    }

    /// Convert a network timestamp back to elapsed seconds.
    pub fn from_network_time(&self, ntp: u64) -> f64 {
        let units = ntp.wrapping_sub(self.network_offset()) as i64;
        units as f64 * OSC_TO_SECONDS
    }

    /// Convert an OSC timetag to elapsed seconds.
    pub fn from_osc_time(&self, time: OscTime) -> f64 {
        self.from_network_time(osc_time_to_ntp(time))
    }

    /// Convert elapsed seconds to an OSC timetag.
    pub fn to_osc_time(&self, elapsed: f64) -> OscTime {
        ntp_to_osc_time(self.to_network_time(elapsed))
    }

    /// The current time as a network timestamp.
    pub fn osc_time(&self) -> u64 {
        self.to_network_time(self.elapsed_time())
    }

    /// Recompute the offset between elapsed time and the time of day.
    ///
    /// Takes several (monotonic, time of day) sample pairs and keeps the one
    /// whose monotonic reads were closest together. Returns the new offset.
    pub fn resync(&self) -> Result<u64> {
        let mut best: Option<(Duration, u64)> = None;

        for _ in 0..self.resync_attempts {
            let before = self.anchor.elapsed();
            let time_of_day = SystemTime::now();
            let after = self.anchor.elapsed();

            let latency = after.saturating_sub(before);
            if best.is_some_and(|(min_latency, _)| latency >= min_latency) {
                continue;
            }

            let between = before + latency / 2;
            let offset = system_time_to_ntp(time_of_day)?.wrapping_sub(duration_to_osc(between));
            best = Some((latency, offset));
        }

        let (latency, offset) =
            best.ok_or_else(|| Error::Clock("no time of day sample taken".to_string()))?;
        let previous = self.elapsed_osc_offset.swap(offset, Ordering::AcqRel);

        let drift = offset.wrapping_sub(previous) as i64 as f64 * OSC_TO_SECONDS;
        log::debug!(
            "[CLOCK] Resynced network offset (sample latency {:?}, drift {:+.6}s)",
            latency,
            drift
        );
        Ok(offset)
    }
}
