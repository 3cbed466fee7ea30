//! Logical-time task scheduler.
//!
//! A single background thread owns a time-ordered queue of tasks. Times are
//! elapsed seconds on the [`LogicalClock`]; the thread sleeps until the head
//! of the queue is due, runs every due task, and re-inserts routines that
//! ask to continue.
//!
//! Insertion may happen from any thread, including from a running task. The
//! loop is woken only when an insertion changes the head of the queue (or on
//! stop), so a task scheduled earlier than everything else shortens the
//! current wait.

use crate::clock::LogicalClock;
use crate::error::{Error, Result};
use crate::task::{Outcome, Task, TaskContext};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, Weak};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Instant;

/// Callback receiving every task failure.
pub type ErrorHandler = Arc<dyn Fn(&Error) + Send + Sync>;

/// A task waiting in the queue.
struct ScheduledEntry {
    time: f64,
    /// Insertion sequence number, breaks ties between equal times (FIFO).
    seq: u64,
    task: Task,
}

impl PartialEq for ScheduledEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ScheduledEntry {}

impl PartialOrd for ScheduledEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Min-heap: earliest time first, then lowest sequence number
        other
            .time
            .total_cmp(&self.time)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct TaskQueue {
    heap: BinaryHeap<ScheduledEntry>,
    next_seq: u64,
    running: bool,
}

struct Shared {
    clock: Arc<LogicalClock>,
    queue: Mutex<TaskQueue>,
    /// Capacity one: a pending token means "re-check the head".
    wake_tx: Sender<()>,
    thread_handle: Mutex<Option<JoinHandle<()>>>,
    thread_id: OnceLock<ThreadId>,
    error_handler: Mutex<Option<ErrorHandler>>,
}

/// Handle to the scheduler thread.
///
/// Cloning is cheap; all clones drive the same queue. The thread keeps
/// running until [`Scheduler::stop`] is called or the last handle is
/// dropped, whichever comes first. Dropping the last handle discards
/// the pending tasks.
#[derive(Clone)]
pub struct Scheduler {
    shared: Arc<Shared>,
}

impl Scheduler {
    /// Start a scheduler thread on `clock`.
    pub fn start(clock: Arc<LogicalClock>) -> Result<Self> {
        Self::start_named(clock, "vibelang-scheduler")
    }

    /// Start a scheduler thread with a custom thread name.
    pub fn start_named(clock: Arc<LogicalClock>, name: &str) -> Result<Self> {
        let (wake_tx, wake_rx) = bounded(1);
        let scheduler = Self {
            shared: Arc::new(Shared {
                clock,
                queue: Mutex::new(TaskQueue {
                    heap: BinaryHeap::new(),
                    next_seq: 0,
                    running: true,
                }),
                wake_tx,
                thread_handle: Mutex::new(None),
                thread_id: OnceLock::new(),
                error_handler: Mutex::new(None),
            }),
        };

        // The thread only holds a weak reference, so dropping every handle
        // disconnects the wake channel and ends the loop.
        let weak = Arc::downgrade(&scheduler.shared);
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || Self::run(weak, wake_rx))
            .map_err(|e| Error::Spawn("scheduler", e.to_string()))?;

        let _ = scheduler.shared.thread_id.set(handle.thread().id());
        *scheduler.shared.thread_handle.lock().unwrap() = Some(handle);

        log::debug!("[SCHED] Scheduler thread '{}' started", name);
        Ok(scheduler)
    }

    /// The clock this scheduler measures time with.
    pub fn clock(&self) -> &Arc<LogicalClock> {
        &self.shared.clock
    }

    /// Current elapsed time on the scheduler's clock.
    pub fn elapsed_time(&self) -> f64 {
        self.shared.clock.elapsed_time()
    }

    /// Schedule `task` `delta` seconds from now.
    ///
    /// A time of positive infinity means "never": the task is dropped and
    /// `Ok` is returned.
    pub fn schedule_relative(&self, delta: f64, task: Task) -> Result<()> {
        let time = self.elapsed_time() + delta;
        if time == f64::INFINITY {
            log::trace!("[SCHED] Dropping {} scheduled at infinity", task.kind());
            return Ok(());
        }
        if time.is_nan() {
            return Err(Error::InvalidScheduleTime(time));
        }
        self.insert(time, task)
    }

    /// Schedule `task` at elapsed time `time`.
    pub fn schedule_absolute(&self, time: f64, task: Task) -> Result<()> {
        if time == f64::INFINITY || time.is_nan() {
            return Err(Error::InvalidScheduleTime(time));
        }
        self.insert(time, task)
    }

    /// Run `task` as soon as possible.
    pub fn play(&self, task: Task) -> Result<()> {
        self.schedule_relative(0.0, task)
    }

    /// Next elapsed time on a grid of `quant` seconds shifted by `phase`.
    ///
    /// A `quant` of zero returns `now + phase`. Negative phases wrap
    /// around the grid.
    pub fn next_time_on_grid(&self, quant: f64, phase: f64) -> f64 {
        next_time_on_grid(self.elapsed_time(), quant, phase)
    }

    /// Remove every pending task.
    pub fn clear(&self) {
        let drained = {
            let mut queue = self.lock_queue();
            std::mem::take(&mut queue.heap)
        };
        let count = drained.len();
        // Tasks are dropped outside the lock.
        drop(drained);
        let _ = self.shared.wake_tx.try_send(());
        log::debug!("[SCHED] Cleared {} pending tasks", count);
    }

    /// Stop the thread, drop pending tasks and wait for the thread to exit.
    ///
    /// Idempotent. When called from a task running on the scheduler thread
    /// the loop exits after that task returns, without joining.
    pub fn stop(&self) {
        let drained = {
            let mut queue = self.lock_queue();
            if !queue.running {
                return;
            }
            queue.running = false;
            std::mem::take(&mut queue.heap)
        };
        drop(drained);
        let _ = self.shared.wake_tx.try_send(());

        if self.shared.thread_id.get() == Some(&thread::current().id()) {
            return;
        }
        let handle = self.shared.thread_handle.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.join();
            log::debug!("[SCHED] Scheduler thread stopped");
        }
    }

    /// Check whether the scheduler accepts work.
    pub fn is_running(&self) -> bool {
        self.lock_queue().running
    }

    /// Number of tasks waiting in the queue.
    pub fn pending(&self) -> usize {
        self.lock_queue().heap.len()
    }

    /// Install a callback that receives every task failure in addition to
    /// the error log.
    pub fn set_error_handler<F>(&self, handler: F)
    where
        F: Fn(&Error) + Send + Sync + 'static,
    {
        *self.shared.error_handler.lock().unwrap() = Some(Arc::new(handler));
    }

    fn lock_queue(&self) -> MutexGuard<'_, TaskQueue> {
        self.shared.queue.lock().unwrap()
    }

    fn insert(&self, time: f64, task: Task) -> Result<()> {
        let head_changed = {
            let mut queue = self.lock_queue();
            if !queue.running {
                return Err(Error::SchedulerStopped);
            }
            let seq = queue.next_seq;
            queue.next_seq += 1;
            queue.heap.push(ScheduledEntry { time, seq, task });
            queue.heap.peek().is_some_and(|head| head.seq == seq)
        };
        if head_changed {
            let _ = self.shared.wake_tx.try_send(());
        }
        Ok(())
    }

    fn is_due(&self, time: f64, now: Instant) -> bool {
        self.shared
            .clock
            .instant_at(time)
            .is_some_and(|deadline| now >= deadline)
    }

    /// Body of the scheduler thread.
    fn run(weak: Weak<Shared>, wake_rx: Receiver<()>) {
        loop {
            // A strong handle is only held while inspecting or running the
            // queue, never while blocked on the wake channel.
            let Some(shared) = weak.upgrade() else {
                break;
            };
            let scheduler = Self { shared };
            let woken = match scheduler.next_wait() {
                Wait::Stopped => break,
                Wait::Due(now) => {
                    scheduler.run_due(now);
                    continue;
                }
                Wait::Until(deadline) => {
                    drop(scheduler);
                    let timeout = deadline.saturating_duration_since(Instant::now());
                    match wake_rx.recv_timeout(timeout) {
                        Err(RecvTimeoutError::Disconnected) => false,
                        Ok(()) | Err(RecvTimeoutError::Timeout) => true,
                    }
                }
                Wait::Idle => {
                    drop(scheduler);
                    wake_rx.recv().is_ok()
                }
            };
            if !woken {
                break;
            }
        }
        log::debug!("[SCHED] Scheduler loop exited");
    }

    /// Decide what the loop does next from the head of the queue.
    fn next_wait(&self) -> Wait {
        let head = {
            let queue = self.lock_queue();
            if !queue.running {
                return Wait::Stopped;
            }
            queue.heap.peek().map(|entry| entry.time)
        };

        let Some(time) = head else {
            return Wait::Idle;
        };
        let now = Instant::now();
        match self.shared.clock.instant_at(time) {
            Some(deadline) if now >= deadline => Wait::Due(now),
            Some(deadline) => Wait::Until(deadline),
            None => Wait::Idle,
        }
    }

    /// Run every task due at `now`. One clock sample for the whole pass.
    fn run_due(&self, now: Instant) {
        loop {
            let entry = {
                let mut queue = self.lock_queue();
                if !queue.running {
                    return;
                }
                match queue.heap.peek() {
                    Some(head) if self.is_due(head.time, now) => queue.heap.pop(),
                    _ => None,
                }
            };
            match entry {
                Some(entry) => self.execute(entry),
                None => return,
            }
        }
    }

    fn execute(&self, entry: ScheduledEntry) {
        let ScheduledEntry { time, task, .. } = entry;
        let kind = task.kind();
        let mut ctx = TaskContext::new(time, self);

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| task.run(&mut ctx)));
        match outcome {
            Ok(Ok(Outcome::Reschedule(delta, task))) => {
                let next = time + delta;
                if next == f64::INFINITY {
                    log::trace!("[SCHED] Routine asked to wait forever, dropping it");
                } else if next.is_nan() {
                    log::warn!("[SCHED] Routine at {:.6}s yielded an invalid delay", time);
                } else if let Err(e) = self.insert(next, task) {
                    log::debug!("[SCHED] Not rescheduling routine: {}", e);
                }
            }
            Ok(Ok(Outcome::Finished(result))) => {
                log::trace!("[SCHED] {} at {:.6}s finished ({:?})", kind, time, result);
            }
            Ok(Err(e)) => self.report(Error::TaskExecution {
                time,
                message: format!("{:#}", e),
            }),
            Err(payload) => self.report(Error::TaskExecution {
                time,
                message: panic_message(payload.as_ref()),
            }),
        }
    }

    fn report(&self, error: Error) {
        log::error!("[SCHED] {}", error);
        let handler = self.shared.error_handler.lock().unwrap().clone();
        let Some(handler) = handler else {
            return;
        };
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| handler(&error))) {
            log::error!(
                "[SCHED] Error handler {}",
                panic_message(payload.as_ref())
            );
        }
    }
}

/// What the scheduler loop does next.
enum Wait {
    Stopped,
    /// Queue empty, or its head has no representable deadline.
    Idle,
    Until(Instant),
    Due(Instant),
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("running", &self.is_running())
            .field("pending", &self.pending())
            .finish_non_exhaustive()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("panicked: {}", message)
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("panicked: {}", message)
    } else {
        "panicked".to_string()
    }
}

/// Round `now` up onto a grid of `quant` seconds offset by `phase`.
pub fn next_time_on_grid(now: f64, quant: f64, phase: f64) -> f64 {
    if quant == 0.0 {
        return now + phase;
    }
    let quant = quant.abs();
    let phase = phase.rem_euclid(quant);
    ((now - phase) / quant).ceil() * quant + phase
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Resume;
    use crossbeam_channel::unbounded;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
    use std::time::Duration;

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn start() -> Scheduler {
        Scheduler::start(Arc::new(LogicalClock::new())).unwrap()
    }

    #[test]
    fn test_tasks_run_in_time_order() {
        let scheduler = start();
        let (tx, rx) = unbounded();
        let base = scheduler.elapsed_time() + 0.05;

        for (label, offset) in [(3, 0.03), (1, 0.01), (2, 0.02), (0, 0.0)] {
            let tx = tx.clone();
            scheduler
                .schedule_absolute(
                    base + offset,
                    Task::call(move |_| {
                        tx.send(label)?;
                        Ok(())
                    }),
                )
                .unwrap();
        }

        let order: Vec<i32> = (0..4).map(|_| rx.recv_timeout(TIMEOUT).unwrap()).collect();
        assert_eq!(order, vec![0, 1, 2, 3]);
        scheduler.stop();
    }

    #[test]
    fn test_equal_times_run_in_insertion_order() {
        let scheduler = start();
        let (tx, rx) = unbounded();
        let time = scheduler.elapsed_time() + 0.05;

        for label in 0..16 {
            let tx = tx.clone();
            scheduler
                .schedule_absolute(
                    time,
                    Task::call(move |_| {
                        tx.send(label)?;
                        Ok(())
                    }),
                )
                .unwrap();
        }

        let order: Vec<i32> = (0..16).map(|_| rx.recv_timeout(TIMEOUT).unwrap()).collect();
        assert_eq!(order, (0..16).collect::<Vec<_>>());
        scheduler.stop();
    }

    #[test]
    fn test_infinite_times() {
        let scheduler = start();
        assert!(scheduler
            .schedule_relative(f64::INFINITY, Task::call(|_| Ok(())))
            .is_ok());
        assert_eq!(scheduler.pending(), 0);

        let err = scheduler
            .schedule_absolute(f64::INFINITY, Task::call(|_| Ok(())))
            .unwrap_err();
        assert_eq!(err, Error::InvalidScheduleTime(f64::INFINITY));
        scheduler.stop();
    }

    #[test]
    fn test_routine_reschedules_from_logical_time() {
        let scheduler = start();
        let (tx, rx) = unbounded();
        let mut step = 0;

        scheduler
            .schedule_relative(
                0.02,
                Task::from_fn(move |ctx| {
                    tx.send((ctx.seconds(), ctx.scheduler().elapsed_time()))?;
                    step += 1;
                    // Simulate a slow step; the next resume must not shift.
                    std::thread::sleep(Duration::from_millis(10));
                    Ok(if step < 2 {
                        Resume::Continue(0.05)
                    } else {
                        Resume::Done(None)
                    })
                }),
            )
            .unwrap();

        let (first_logical, _) = rx.recv_timeout(TIMEOUT).unwrap();
        let (second_logical, second_wall) = rx.recv_timeout(TIMEOUT).unwrap();
        assert_eq!(second_logical, first_logical + 0.05);
        assert!(second_wall >= second_logical);
        assert!(second_wall - second_logical < 0.05, "late by {}", second_wall - second_logical);
        scheduler.stop();
    }

    #[test]
    fn test_clear_removes_pending_tasks() {
        let scheduler = start();
        let ran = Arc::new(AtomicUsize::new(0));
        for _ in 0..5 {
            let ran = ran.clone();
            scheduler
                .schedule_relative(
                    0.1,
                    Task::call(move |_| {
                        ran.fetch_add(1, AtomicOrdering::SeqCst);
                        Ok(())
                    }),
                )
                .unwrap();
        }
        assert_eq!(scheduler.pending(), 5);
        scheduler.clear();
        assert_eq!(scheduler.pending(), 0);

        std::thread::sleep(Duration::from_millis(200));
        assert_eq!(ran.load(AtomicOrdering::SeqCst), 0);
        scheduler.stop();
    }

    #[test]
    fn test_clear_during_due_pass_drops_remaining_tasks() {
        let scheduler = start();
        let ran = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = unbounded();
        let time = scheduler.elapsed_time() + 0.05;

        scheduler
            .schedule_absolute(
                time,
                Task::call(move |ctx| {
                    ctx.scheduler().clear();
                    tx.send(())?;
                    Ok(())
                }),
            )
            .unwrap();
        for _ in 0..4 {
            let ran = ran.clone();
            scheduler
                .schedule_absolute(
                    time,
                    Task::call(move |_| {
                        ran.fetch_add(1, AtomicOrdering::SeqCst);
                        Ok(())
                    }),
                )
                .unwrap();
        }

        rx.recv_timeout(TIMEOUT).unwrap();
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(ran.load(AtomicOrdering::SeqCst), 0);
        assert_eq!(scheduler.pending(), 0);
        assert!(scheduler.is_running());
        scheduler.stop();
    }

    #[test]
    fn test_relative_and_absolute_share_one_order() {
        let scheduler = start();
        let (tx, rx) = unbounded();
        let base = scheduler.elapsed_time();

        let send = |label: &'static str| {
            let tx = tx.clone();
            Task::call(move |_| {
                tx.send(label)?;
                Ok(())
            })
        };
        scheduler.schedule_absolute(base + 0.09, send("d")).unwrap();
        scheduler.schedule_relative(0.03, send("b")).unwrap();
        scheduler.schedule_absolute(base + 0.01, send("a")).unwrap();
        scheduler.schedule_relative(0.06, send("c")).unwrap();

        let order: Vec<&str> = (0..4).map(|_| rx.recv_timeout(TIMEOUT).unwrap()).collect();
        assert_eq!(order, vec!["a", "b", "c", "d"]);
        scheduler.stop();
    }

    #[test]
    fn test_dropping_last_handle_releases_thread_and_queue() {
        let scheduler = start();
        let (tx, rx) = unbounded::<()>();
        scheduler
            .schedule_relative(
                60.0,
                Task::call(move |_| {
                    tx.send(())?;
                    Ok(())
                }),
            )
            .unwrap();

        let handle = scheduler.shared.thread_handle.lock().unwrap().take().unwrap();
        let weak = Arc::downgrade(&scheduler.shared);
        drop(scheduler);

        // The queued task, and with it the sender, is gone.
        assert_eq!(
            rx.recv_timeout(TIMEOUT),
            Err(crossbeam_channel::RecvTimeoutError::Disconnected)
        );
        let deadline = Instant::now() + TIMEOUT;
        while !handle.is_finished() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(handle.is_finished());
        assert_eq!(weak.strong_count(), 0);
        handle.join().unwrap();
    }

    #[test]
    fn test_failing_tasks_do_not_stop_the_loop() {
        let scheduler = start();
        let (err_tx, err_rx) = unbounded();
        scheduler.set_error_handler(move |e| {
            let _ = err_tx.send(e.clone());
        });
        let (tx, rx) = unbounded();

        scheduler
            .play(Task::call(|_| Err(anyhow::anyhow!("broken task"))))
            .unwrap();
        scheduler
            .play(Task::call(|_| panic!("panicking task")))
            .unwrap();
        scheduler
            .play(Task::call(move |_| {
                tx.send("alive")?;
                Ok(())
            }))
            .unwrap();

        assert_eq!(rx.recv_timeout(TIMEOUT).unwrap(), "alive");
        let first = err_rx.recv_timeout(TIMEOUT).unwrap();
        let second = err_rx.recv_timeout(TIMEOUT).unwrap();
        assert!(matches!(first, Error::TaskExecution { ref message, .. } if message.contains("broken task")));
        assert!(matches!(second, Error::TaskExecution { ref message, .. } if message.contains("panicking task")));
        assert!(err_rx.recv_timeout(Duration::from_millis(50)).is_err());
        scheduler.stop();
    }

    #[test]
    fn test_panicking_error_handler_keeps_loop_alive() {
        let scheduler = start();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        scheduler.set_error_handler(move |_| {
            counter.fetch_add(1, AtomicOrdering::SeqCst);
            panic!("handler failure");
        });
        let (tx, rx) = unbounded();

        scheduler
            .play(Task::call(|_| Err(anyhow::anyhow!("broken task"))))
            .unwrap();
        scheduler
            .play(Task::call(|_| Err(anyhow::anyhow!("second broken task"))))
            .unwrap();
        scheduler
            .play(Task::call(move |_| {
                tx.send("alive")?;
                Ok(())
            }))
            .unwrap();

        assert_eq!(rx.recv_timeout(TIMEOUT).unwrap(), "alive");
        assert_eq!(calls.load(AtomicOrdering::SeqCst), 2);
        assert!(scheduler.is_running());
        scheduler.stop();
    }

    #[test]
    fn test_error_handler_may_replace_itself() {
        let scheduler = start();
        let (tx, rx) = unbounded();
        let handle = scheduler.clone();
        scheduler.set_error_handler(move |_| {
            let tx = tx.clone();
            handle.set_error_handler(move |e| {
                let _ = tx.send(e.clone());
            });
        });

        scheduler
            .play(Task::call(|_| Err(anyhow::anyhow!("first"))))
            .unwrap();
        scheduler
            .play(Task::call(|_| Err(anyhow::anyhow!("second"))))
            .unwrap();

        let err = rx.recv_timeout(TIMEOUT).unwrap();
        assert!(matches!(err, Error::TaskExecution { ref message, .. } if message.contains("second")));
        scheduler.stop();
    }

    #[test]
    fn test_routine_done_on_first_resume_is_not_an_error() {
        let scheduler = start();
        let (err_tx, err_rx) = unbounded();
        scheduler.set_error_handler(move |e| {
            let _ = err_tx.send(e.clone());
        });
        let (tx, rx) = unbounded();

        scheduler
            .play(Task::from_fn(move |_| {
                tx.send(())?;
                Ok(Resume::Done(None))
            }))
            .unwrap();

        rx.recv_timeout(TIMEOUT).unwrap();
        assert!(err_rx.recv_timeout(Duration::from_millis(50)).is_err());
        assert_eq!(scheduler.pending(), 0);
        scheduler.stop();
    }

    #[test]
    fn test_earlier_insertion_shortens_wait() {
        let scheduler = start();
        let (tx, rx) = unbounded();
        scheduler
            .schedule_relative(60.0, Task::call(|_| Ok(())))
            .unwrap();
        // Give the loop time to start its long wait.
        std::thread::sleep(Duration::from_millis(20));

        let started = Instant::now();
        scheduler
            .schedule_relative(
                0.01,
                Task::call(move |_| {
                    tx.send(())?;
                    Ok(())
                }),
            )
            .unwrap();
        rx.recv_timeout(TIMEOUT).unwrap();
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(scheduler.pending(), 1);
        scheduler.stop();
    }

    #[test]
    fn test_task_schedules_follow_up() {
        let scheduler = start();
        let (tx, rx) = unbounded();
        let start_time = scheduler.elapsed_time() + 0.01;

        scheduler
            .schedule_absolute(
                start_time,
                Task::call(move |ctx| {
                    let tx2 = tx.clone();
                    ctx.sched(
                        0.02,
                        Task::call(move |ctx| {
                            tx2.send(ctx.seconds())?;
                            Ok(())
                        }),
                    )?;
                    Ok(())
                }),
            )
            .unwrap();

        let follow_up = rx.recv_timeout(TIMEOUT).unwrap();
        assert_eq!(follow_up, start_time + 0.02);
        scheduler.stop();
    }

    #[test]
    fn test_stop_is_prompt_and_idempotent() {
        let scheduler = start();
        scheduler
            .schedule_relative(30.0, Task::call(|_| Ok(())))
            .unwrap();
        std::thread::sleep(Duration::from_millis(10));

        let started = Instant::now();
        scheduler.stop();
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(!scheduler.is_running());
        assert_eq!(scheduler.pending(), 0);

        scheduler.stop();
        let err = scheduler.play(Task::call(|_| Ok(()))).unwrap_err();
        assert_eq!(err, Error::SchedulerStopped);
    }

    #[test]
    fn test_stop_from_inside_a_task() {
        let scheduler = start();
        let (tx, rx) = unbounded();
        scheduler
            .play(Task::call(move |ctx| {
                ctx.scheduler().stop();
                tx.send(())?;
                Ok(())
            }))
            .unwrap();
        rx.recv_timeout(TIMEOUT).unwrap();
        assert!(!scheduler.is_running());
        scheduler.stop();
    }

    #[test]
    fn test_next_time_on_grid() {
        assert_eq!(next_time_on_grid(5.3, 0.0, 0.25), 5.55);
        assert_eq!(next_time_on_grid(5.3, 1.0, 0.0), 6.0);
        assert_eq!(next_time_on_grid(5.3, 4.0, 0.0), 8.0);
        assert_eq!(next_time_on_grid(5.3, 4.0, 1.0), 9.0);
        assert_eq!(next_time_on_grid(5.3, 4.0, -1.0), 7.0);
        assert_eq!(next_time_on_grid(8.0, 4.0, 0.0), 8.0);
    }
}
