//! Error types for the vibelang-clock crate.

use thiserror::Error;

/// Errors produced by the clock, scheduler and responder layers.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// `schedule_absolute` was asked to schedule at an infinite time.
    #[error("Cannot schedule a task at absolute time {0}")]
    InvalidScheduleTime(f64),

    /// An operation was attempted on a responder that has been freed.
    #[error("Responder {0} has been freed")]
    UseAfterFree(String),

    /// A scheduled task failed while being resumed.
    #[error("Task scheduled at {time:.6}s failed: {message}")]
    TaskExecution { time: f64, message: String },

    /// A second scheduler was constructed for the same runtime context.
    #[error("{0} is already initialized")]
    AlreadyInitialized(&'static str),

    /// Work was submitted to a scheduler that has been stopped.
    #[error("Scheduler has been stopped")]
    SchedulerStopped,

    /// A background thread could not be spawned.
    #[error("Failed to spawn {0} thread: {1}")]
    Spawn(&'static str, String),

    /// Sampling the time of day failed.
    #[error("Clock error: {0}")]
    Clock(String),

    /// An inbound OSC datagram could not be decoded.
    #[error("OSC decode error: {0}")]
    Decode(String),
}

/// Result type alias using the crate error.
pub type Result<T> = std::result::Result<T, Error>;
