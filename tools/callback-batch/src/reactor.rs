//! Next-turn scheduling for batch replay.
//!
//! The batch engine never calls back into its own drain loop directly. Every
//! step boundary is handed to a [`Scheduler`], which runs it on a later turn.
//! [`TickLoop`] is the single-threaded reactor used by the CLI and the tests:
//! a FIFO of tasks where each turn runs exactly one task. [`LocalScheduler`]
//! binds a batch to a tokio `LocalSet` instead, one spawned task per turn.

use crate::errors::BatchError;
use crate::logging::log_event;
use serde_json::json;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

pub type Task = Box<dyn FnOnce() -> Result<(), BatchError>>;

pub trait Scheduler {
    /// Run `task` on a future turn, after the current one returns.
    fn schedule_tick(&self, task: Task);

    /// Run a step invocation. Runs in place unless the reactor defers calls.
    fn schedule_call(&self, task: Task) -> Result<(), BatchError> {
        task()
    }
}

#[derive(Default)]
struct LoopState {
    pending: RefCell<VecDeque<Task>>,
    defer_calls: bool,
}

#[derive(Clone, Default)]
pub struct TickLoop {
    state: Rc<LoopState>,
}

impl TickLoop {
    pub fn new() -> Self {
        Self::default()
    }

    /// A loop that also defers each step invocation to its own turn.
    pub fn deferred_calls() -> Self {
        Self {
            state: Rc::new(LoopState {
                defer_calls: true,
                ..LoopState::default()
            }),
        }
    }

    pub fn pending(&self) -> usize {
        self.state.pending.borrow().len()
    }

    pub fn is_idle(&self) -> bool {
        self.pending() == 0
    }

    /// Runs the oldest pending task. Returns `Ok(false)` when idle.
    pub fn turn(&self) -> Result<bool, BatchError> {
        let next = self.state.pending.borrow_mut().pop_front();
        let Some(task) = next else {
            return Ok(false);
        };
        task()?;
        Ok(true)
    }

    /// Runs turns until idle and returns how many ran.
    pub fn run(&self) -> Result<u64, BatchError> {
        let mut ran = 0u64;
        while self.turn()? {
            ran = ran.saturating_add(1);
        }
        Ok(ran)
    }

    pub fn run_for(&self, max_turns: u64) -> Result<u64, BatchError> {
        let mut ran = 0u64;
        while ran < max_turns {
            if !self.turn()? {
                return Ok(ran);
            }
            ran += 1;
        }
        if self.is_idle() {
            Ok(ran)
        } else {
            Err(BatchError::TurnLimit(max_turns))
        }
    }
}

impl Scheduler for TickLoop {
    fn schedule_tick(&self, task: Task) {
        self.state.pending.borrow_mut().push_back(task);
    }

    fn schedule_call(&self, task: Task) -> Result<(), BatchError> {
        if self.state.defer_calls {
            self.schedule_tick(task);
            return Ok(());
        }
        task()
    }
}

/// Runs every turn as a `tokio::task::spawn_local` task.
///
/// Must be used from inside a `tokio::task::LocalSet`. A task that fails has
/// no turn to return its error to; the error is logged and kept for
/// [`LocalScheduler::take_failures`].
#[derive(Clone, Default)]
pub struct LocalScheduler {
    failures: Rc<RefCell<Vec<BatchError>>>,
}

impl LocalScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take_failures(&self) -> Vec<BatchError> {
        std::mem::take(&mut *self.failures.borrow_mut())
    }
}

impl Scheduler for LocalScheduler {
    fn schedule_tick(&self, task: Task) {
        let failures = Rc::clone(&self.failures);
        tokio::task::spawn_local(async move {
            if let Err(error) = task() {
                log_event(
                    "error",
                    "scheduler.task_failed",
                    json!({"error": error.to_string()}),
                );
                failures.borrow_mut().push(error);
            }
        });
    }
}
