//! Periodic resynchronization of the network time offset.
//!
//! The monotonic clock and the time of day drift apart over a long session
//! (NTP slews the latter). A background thread recomputes the offset every
//! interval so outgoing timetags stay in step with the rest of the world.

use crate::clock::LogicalClock;
use crate::error::{Error, Result};
use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Default period between two resyncs.
pub const DEFAULT_RESYNC_INTERVAL: Duration = Duration::from_secs(20);

/// Handle to the background resync thread.
///
/// Dropping the handle stops the thread.
pub struct Resynchronizer {
    /// Dropping or sending on this wakes the thread and makes it exit.
    stop_tx: Option<Sender<()>>,
    thread_handle: Option<JoinHandle<()>>,
    resyncs: Arc<AtomicU64>,
    interval: Duration,
}

impl Resynchronizer {
    /// Spawn the resync thread for `clock`.
    pub fn start(clock: Arc<LogicalClock>, interval: Duration) -> Result<Self> {
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let resyncs = Arc::new(AtomicU64::new(0));
        let thread_resyncs = resyncs.clone();

        let thread_handle = thread::Builder::new()
            .name("vibelang-resync".to_string())
            .spawn(move || {
                log::debug!("[RESYNC] Thread started (interval {:?})", interval);
                loop {
                    match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => match clock.resync() {
                            Ok(_) => {
                                thread_resyncs.fetch_add(1, Ordering::Relaxed);
                            }
                            // Retried on the next tick.
                            Err(e) => log::warn!("[RESYNC] Resync failed: {}", e),
                        },
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                log::debug!("[RESYNC] Thread stopped");
            })
            .map_err(|e| Error::Spawn("resync", e.to_string()))?;

        Ok(Self {
            stop_tx: Some(stop_tx),
            thread_handle: Some(thread_handle),
            resyncs,
            interval,
        })
    }

    /// The configured resync period.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Number of successful periodic resyncs so far.
    pub fn resync_count(&self) -> u64 {
        self.resyncs.load(Ordering::Relaxed)
    }

    /// Check whether the thread is still running.
    pub fn is_running(&self) -> bool {
        self.thread_handle.is_some()
    }

    /// Stop the thread and wait for it to exit. Idempotent.
    pub fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.try_send(());
        }
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Resynchronizer {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for Resynchronizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resynchronizer")
            .field("interval", &self.interval)
            .field("running", &self.is_running())
            .field("resyncs", &self.resync_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_resync_runs_periodically() {
        let clock = Arc::new(LogicalClock::new());
        let mut resync = Resynchronizer::start(clock, Duration::from_millis(10)).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while resync.resync_count() < 3 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(resync.resync_count() >= 3);
        resync.stop();
        assert!(!resync.is_running());
    }

    #[test]
    fn test_stop_interrupts_wait() {
        let clock = Arc::new(LogicalClock::new());
        let mut resync = Resynchronizer::start(clock, DEFAULT_RESYNC_INTERVAL).unwrap();
        let started = Instant::now();
        resync.stop();
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(resync.resync_count(), 0);

        // Second stop is a no-op.
        resync.stop();
    }
}
