//! Schedulable tasks.
//!
//! A [`Task`] is either a resumable [`Routine`] - an explicit state machine
//! that is resumed each time it comes due and answers with a further delay
//! or with completion - or a plain callable that runs once.

use crate::scheduler::Scheduler;
use rosc::OscType;

/// What a routine answers when resumed.
#[derive(Clone, Debug, PartialEq)]
pub enum Resume {
    /// Resume again this many seconds after the current scheduled time.
    Continue(f64),
    /// The routine has finished, optionally with a result value.
    Done(Option<OscType>),
}

/// Context handed to a task while it runs on the scheduler thread.
pub struct TaskContext<'a> {
    seconds: f64,
    scheduler: &'a Scheduler,
}

impl<'a> TaskContext<'a> {
    pub(crate) fn new(seconds: f64, scheduler: &'a Scheduler) -> Self {
        Self { seconds, scheduler }
    }

    /// Logical time of this resumption: the time the task was scheduled
    /// for, not the (slightly later) wall time it actually started.
    pub fn seconds(&self) -> f64 {
        self.seconds
    }

    /// The scheduler running this task.
    pub fn scheduler(&self) -> &'a Scheduler {
        self.scheduler
    }

    /// Schedule `task` `delta` seconds after this task's logical time.
    ///
    /// Unlike [`Scheduler::schedule_relative`] this does not read the wall
    /// clock, so chains of tasks scheduled this way never drift.
    pub fn sched(&self, delta: f64, task: Task) -> crate::Result<()> {
        let time = self.seconds + delta;
        if time == f64::INFINITY {
            return Ok(());
        }
        self.scheduler.schedule_absolute(time, task)
    }
}

/// A resumable computation driven by the scheduler.
pub trait Routine: Send {
    /// Advance the routine by one step.
    fn resume(&mut self, ctx: &mut TaskContext<'_>) -> anyhow::Result<Resume>;
}

impl<F> Routine for F
where
    F: FnMut(&mut TaskContext<'_>) -> anyhow::Result<Resume> + Send,
{
    fn resume(&mut self, ctx: &mut TaskContext<'_>) -> anyhow::Result<Resume> {
        self(ctx)
    }
}

type Callable = Box<dyn FnOnce(&mut TaskContext<'_>) -> anyhow::Result<()> + Send>;

/// A unit of work held by the scheduler.
pub enum Task {
    /// Resumed every time it comes due until it answers [`Resume::Done`].
    Routine {
        body: Box<dyn Routine>,
        resumptions: u64,
    },
    /// Invoked once. It may schedule further work through its context.
    Call(Callable),
}

/// Result of running a task once.
pub(crate) enum Outcome {
    /// Put the task back at `scheduled time + delta`.
    Reschedule(f64, Task),
    /// The task is done and leaves the scheduler.
    Finished(Option<OscType>),
}

impl Task {
    /// Wrap a routine.
    pub fn routine<R: Routine + 'static>(routine: R) -> Self {
        Task::Routine {
            body: Box::new(routine),
            resumptions: 0,
        }
    }

    /// Wrap a closure as a routine.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: FnMut(&mut TaskContext<'_>) -> anyhow::Result<Resume> + Send + 'static,
    {
        Task::routine(f)
    }

    /// Wrap a one-shot callable.
    pub fn call<F>(f: F) -> Self
    where
        F: FnOnce(&mut TaskContext<'_>) -> anyhow::Result<()> + Send + 'static,
    {
        Task::Call(Box::new(f))
    }

    /// Short description for log messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Task::Routine { .. } => "routine",
            Task::Call(_) => "callable",
        }
    }

    /// Run the task once.
    pub(crate) fn run(self, ctx: &mut TaskContext<'_>) -> anyhow::Result<Outcome> {
        match self {
            Task::Call(f) => {
                f(ctx)?;
                Ok(Outcome::Finished(None))
            }
            Task::Routine {
                mut body,
                resumptions,
            } => match body.resume(ctx)? {
                Resume::Continue(delta) => Ok(Outcome::Reschedule(
                    delta,
                    Task::Routine {
                        body,
                        resumptions: resumptions + 1,
                    },
                )),
                Resume::Done(result) => {
                    if resumptions == 0 {
                        log::trace!("[SCHED] Routine finished on its first resume");
                    }
                    Ok(Outcome::Finished(result))
                }
            },
        }
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Task::Routine { resumptions, .. } => f
                .debug_struct("Routine")
                .field("resumptions", resumptions)
                .finish_non_exhaustive(),
            Task::Call(_) => f.write_str("Call(..)"),
        }
    }
}
