//! The runtime context tying clock, scheduler and responders together.
//!
//! A [`Runtime`] owns exactly one scheduler. Components that need it get it
//! from the runtime instead of reaching for ambient state. For code that
//! really does want a process-wide instance there is [`init_global`], which
//! refuses to build a second one.

use crate::clock::LogicalClock;
use crate::cmd_period::CmdPeriod;
use crate::config::RuntimeConfig;
use crate::error::{Error, Result};
use crate::resync::Resynchronizer;
use crate::responder::ResponderRegistry;
use crate::scheduler::Scheduler;
use crate::source::OscRouter;
use std::sync::{Arc, Mutex, OnceLock};

static GLOBAL: OnceLock<Runtime> = OnceLock::new();
static GLOBAL_INIT: Mutex<()> = Mutex::new(());

/// Clock, scheduler, reset signal, OSC router and responder registry.
pub struct Runtime {
    config: RuntimeConfig,
    clock: Arc<LogicalClock>,
    resync: Mutex<Option<Resynchronizer>>,
    scheduler: Scheduler,
    cmd_period: Arc<CmdPeriod>,
    router: Arc<OscRouter>,
    responders: ResponderRegistry,
}

impl Runtime {
    /// Build the runtime and start its background threads.
    pub fn start(config: RuntimeConfig) -> Result<Self> {
        let clock = Arc::new(LogicalClock::with_resync_attempts(config.resync_attempts));
        let scheduler = Scheduler::start_named(clock.clone(), &config.scheduler_thread_name)?;

        let resync = if config.resync_enabled {
            match Resynchronizer::start(clock.clone(), config.resync_interval) {
                Ok(resync) => Some(resync),
                Err(e) => {
                    scheduler.stop();
                    return Err(e);
                }
            }
        } else {
            None
        };

        let cmd_period = Arc::new(CmdPeriod::new());
        let router = Arc::new(OscRouter::new(clock.clone()));
        let responders = ResponderRegistry::new(router.clone(), cmd_period.clone());

        let trace_router = Arc::downgrade(&router);
        cmd_period.subscribe(move || {
            if let Some(router) = trace_router.upgrade() {
                router.trace(false, false);
            }
        });
        if config.clear_scheduler_on_reset {
            let reset_scheduler = scheduler.clone();
            cmd_period.subscribe(move || reset_scheduler.clear());
        }

        log::info!(
            "[RUNTIME] Started (resync {})",
            if config.resync_enabled {
                format!("every {:?}", config.resync_interval)
            } else {
                "off".to_string()
            }
        );

        Ok(Self {
            config,
            clock,
            resync: Mutex::new(resync),
            scheduler,
            cmd_period,
            router,
            responders,
        })
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn clock(&self) -> &Arc<LogicalClock> {
        &self.clock
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn cmd_period(&self) -> &Arc<CmdPeriod> {
        &self.cmd_period
    }

    /// Where transports deliver inbound OSC.
    pub fn router(&self) -> &Arc<OscRouter> {
        &self.router
    }

    pub fn responders(&self) -> &ResponderRegistry {
        &self.responders
    }

    /// Seconds since the runtime started.
    pub fn elapsed_time(&self) -> f64 {
        self.clock.elapsed_time()
    }

    /// Fire the reset signal.
    pub fn reset(&self) {
        self.cmd_period.fire();
    }

    /// Check whether the resync thread is running.
    pub fn is_resyncing(&self) -> bool {
        self.resync
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|r| r.is_running())
    }

    /// Stop background threads and free every responder. Idempotent.
    pub fn shutdown(&self) {
        if let Some(mut resync) = self.resync.lock().unwrap().take() {
            resync.stop();
        }
        let was_running = self.scheduler.is_running();
        self.scheduler.stop();
        // Attached dispatchers and the router reference each other until
        // their responders are freed.
        self.responders.free_all();
        if was_running {
            log::info!("[RUNTIME] Shut down");
        }
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("config", &self.config)
            .field("elapsed", &self.elapsed_time())
            .field("responders", &self.responders)
            .finish_non_exhaustive()
    }
}

/// Create the process-wide runtime.
///
/// Fails with [`Error::AlreadyInitialized`] if it already exists.
pub fn init_global(config: RuntimeConfig) -> Result<&'static Runtime> {
    let _guard = GLOBAL_INIT.lock().unwrap();
    if GLOBAL.get().is_some() {
        return Err(Error::AlreadyInitialized("global runtime"));
    }
    let runtime = Runtime::start(config)?;
    Ok(GLOBAL.get_or_init(|| runtime))
}

/// The process-wide runtime, if [`init_global`] has been called.
pub fn global() -> Option<&'static Runtime> {
    GLOBAL.get()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Task;
    use crossbeam_channel::unbounded;
    use rosc::{OscMessage, OscType};
    use std::time::Duration;

    fn config() -> RuntimeConfig {
        RuntimeConfig::default().with_resync_enabled(false)
    }

    #[test]
    fn test_start_and_shutdown() {
        let runtime = Runtime::start(config().with_resync_enabled(true)).unwrap();
        assert!(runtime.is_resyncing());
        assert!(runtime.scheduler().is_running());

        runtime.shutdown();
        assert!(!runtime.is_resyncing());
        assert!(!runtime.scheduler().is_running());
        runtime.shutdown();
    }

    #[test]
    fn test_scheduled_task_runs() {
        let runtime = Runtime::start(config()).unwrap();
        let (tx, rx) = unbounded();
        runtime
            .scheduler()
            .schedule_relative(
                0.01,
                Task::call(move |ctx| {
                    tx.send(ctx.seconds())?;
                    Ok(())
                }),
            )
            .unwrap();
        let seconds = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(seconds > 0.0);
    }

    #[test]
    fn test_reset_clears_queue_and_frees_responders() {
        let runtime = Runtime::start(config()).unwrap();
        let responder = runtime
            .responders()
            .osc_func("/n_end", |_: &crate::InboundMessage| {})
            .unwrap();
        let permanent = runtime
            .responders()
            .builder("/status.reply", |_: &crate::InboundMessage| {})
            .permanent(true)
            .build()
            .unwrap();
        runtime
            .scheduler()
            .schedule_relative(60.0, Task::call(|_| Ok(())))
            .unwrap();
        runtime.router().trace(true, true);

        runtime.reset();
        assert!(responder.is_freed());
        assert!(permanent.is_enabled());
        assert_eq!(runtime.scheduler().pending(), 0);
        assert!(!runtime.router().is_tracing());
    }

    #[test]
    fn test_shutdown_frees_responders_after_scheduler_stopped() {
        let runtime = Runtime::start(config()).unwrap();
        let responder = runtime
            .responders()
            .builder("/n_go", |_: &crate::InboundMessage| {})
            .permanent(true)
            .build()
            .unwrap();
        assert_eq!(runtime.router().attached_count(), 1);

        let (tx, rx) = unbounded();
        runtime
            .scheduler()
            .play(Task::call(move |ctx| {
                ctx.scheduler().stop();
                tx.send(())?;
                Ok(())
            }))
            .unwrap();
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(!runtime.scheduler().is_running());

        runtime.shutdown();
        assert!(responder.is_freed());
        assert_eq!(runtime.responders().live_count(), 0);
        assert_eq!(runtime.router().attached_count(), 0);
        runtime.shutdown();
    }

    #[test]
    fn test_reset_can_keep_queue() {
        let runtime = Runtime::start(config().with_clear_scheduler_on_reset(false)).unwrap();
        runtime
            .scheduler()
            .schedule_relative(60.0, Task::call(|_| Ok(())))
            .unwrap();
        runtime.reset();
        assert_eq!(runtime.scheduler().pending(), 1);
    }

    #[test]
    fn test_datagram_reaches_responder() {
        let runtime = Runtime::start(config()).unwrap();
        let (tx, rx) = unbounded();
        runtime
            .responders()
            .osc_func("/n_go", move |msg: &crate::InboundMessage| {
                let _ = tx.send(msg.args().to_vec());
            })
            .unwrap();

        let packet = rosc::OscPacket::Message(OscMessage {
            addr: "/n_go".to_string(),
            args: vec![OscType::Int(1001)],
        });
        let bytes = rosc::encoder::encode(&packet).unwrap();
        runtime
            .router()
            .receive_datagram(&bytes, "127.0.0.1:57110".parse().unwrap(), 57120)
            .unwrap();
        assert_eq!(rx.try_recv().unwrap(), vec![OscType::Int(1001)]);
    }
}
