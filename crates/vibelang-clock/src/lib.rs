//! VibeLang Clock - Logical time scheduling and OSC responder dispatch.
//!
//! This crate provides the timing and message routing layer under VibeLang:
//!
//! - **Clock** - Elapsed time, NTP-style network timestamps, drift resync
//! - **Scheduler** - Time-ordered task queue driven by a background thread
//! - **Tasks** - Resumable routines and one-shot callables
//! - **Matcher** - OSC address pattern matching
//! - **Dispatch** - Exact and pattern registries for inbound OSC
//! - **Responders** - `OscFunc` handles with enable/disable/free lifecycle
//! - **Runtime** - One clock, one scheduler, one reset signal
//!
//! # Architecture
//!
//! A [`Runtime`] owns a [`LogicalClock`], a [`Scheduler`] running on its own
//! thread, a [`Resynchronizer`] keeping the clock aligned with the time of
//! day, and an [`OscRouter`] that transports feed inbound datagrams into.
//! The router fans messages out to [`Dispatcher`]s, which hand them to the
//! [`OscFunc`] responders registered for their address.
//!
//! Firing the [`CmdPeriod`] reset signal frees every non-permanent responder.

pub mod clock;
pub mod cmd_period;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod filter;
pub mod matcher;
pub mod responder;
pub mod resync;
pub mod runtime;
pub mod scheduler;
pub mod source;
pub mod task;

pub use clock::{
    ntp_to_osc_time, osc_time_to_ntp, system_time_to_ntp, LogicalClock, OSC_TO_SECONDS,
    SECONDS_FROM_1900_TO_1970, SECONDS_TO_OSC,
};
pub use cmd_period::{CmdPeriod, SubscriptionId};
pub use config::RuntimeConfig;
pub use dispatch::{DispatchStrategy, Dispatcher, ResponderId};
pub use error::{Error, Result};
pub use filter::{ArgMatcher, MessageFilter, ResponderFn, SourceId, WrappedFunc};
pub use matcher::{matches, AddressPattern};
pub use responder::{OscFunc, OscFuncBuilder, ResponderRegistry, ResponderState};
pub use resync::{Resynchronizer, DEFAULT_RESYNC_INTERVAL};
pub use runtime::{global, init_global, Runtime};
pub use scheduler::{next_time_on_grid, ErrorHandler, Scheduler};
pub use source::{InboundMessage, MessageSource, OscRouter, RecvFunc};
pub use task::{Resume, Routine, Task, TaskContext};
