//! Record/replay engine.
//!
//! A [`Batch`] owns a FIFO of [`CallRecord`]s. `execute` drains it one record
//! at a time: each step receives a [`StepDone`] and the batch only moves on
//! once that handle is completed. Completion never re-enters the drain
//! directly; it goes through [`Scheduler::schedule_tick`], so the stack depth
//! of a run does not depend on the queue length.

use crate::errors::BatchError;
use crate::invocable::{ObjectRef, EXEC_OPERATION};
use crate::lifecycle::{DrainLifecycle, DrainState};
use crate::logging::log_event;
use crate::proxy::CallProxy;
use crate::reactor::Scheduler;
use crate::types::{render_results, Results};
use serde_json::json;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;
use tokio::sync::oneshot;

pub type Continuation = Box<dyn FnOnce(Results, StepDone) -> Result<(), BatchError>>;

type CompletionHandler = Box<dyn FnOnce(Results)>;

pub enum CallRecord {
    Method {
        target: ObjectRef,
        operation: String,
        args: Results,
    },
    Continuation(Continuation),
}

impl CallRecord {
    pub fn describe(&self) -> String {
        match self {
            Self::Method {
                target, operation, ..
            } => format!("{}.{operation}", target.label()),
            Self::Continuation(_) => "continuation".to_string(),
        }
    }

    fn dispatch(self, results: Results, done: StepDone) -> Result<(), BatchError> {
        match self {
            Self::Method {
                target,
                operation,
                args,
            } => {
                if operation == EXEC_OPERATION {
                    target.exec(args, done)
                } else {
                    target.invoke(&operation, args, done)
                }
            }
            Self::Continuation(continuation) => continuation(results, done),
        }
    }
}

impl fmt::Debug for CallRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Method {
                target,
                operation,
                args,
            } => f
                .debug_struct("Method")
                .field("target", &target.label())
                .field("operation", operation)
                .field("args", args)
                .finish(),
            Self::Continuation(_) => f.write_str("Continuation"),
        }
    }
}

#[derive(Default)]
struct BatchInner {
    queue: VecDeque<CallRecord>,
    last_result: Results,
    lifecycle: DrainLifecycle,
    on_complete: Option<CompletionHandler>,
}

enum Next {
    Step {
        record: CallRecord,
        results: Results,
        remaining: usize,
    },
    Drained {
        handler: Option<CompletionHandler>,
        results: Results,
        run: u64,
    },
}

/// Handle to a batch. Clones share the same queue.
#[derive(Clone)]
pub struct Batch {
    inner: Rc<RefCell<BatchInner>>,
    scheduler: Rc<dyn Scheduler>,
}

impl Batch {
    pub fn new(scheduler: impl Scheduler + 'static) -> Self {
        Self {
            inner: Rc::new(RefCell::new(BatchInner::default())),
            scheduler: Rc::new(scheduler),
        }
    }

    /// Queues `operation` on `target`. Whether the target supports it is
    /// only checked when the step runs.
    pub fn put(&self, target: ObjectRef, operation: impl Into<String>, args: Results) {
        self.push(CallRecord::Method {
            target,
            operation: operation.into(),
            args,
        });
    }

    /// Queues a raw continuation. It receives the previous step's result and
    /// must complete the [`StepDone`] itself.
    pub fn put_fn<F>(&self, continuation: F)
    where
        F: FnOnce(Results, StepDone) -> Result<(), BatchError> + 'static,
    {
        self.push(CallRecord::Continuation(Box::new(continuation)));
    }

    /// Queues a synchronous continuation whose return value becomes the
    /// step's result.
    pub fn then<F>(&self, f: F)
    where
        F: FnOnce(Results) -> Results + 'static,
    {
        self.put_fn(move |results, done| {
            done.complete(f(results));
            Ok(())
        });
    }

    pub fn take(&self, target: ObjectRef) -> CallProxy {
        CallProxy::new(target, self.clone())
    }

    pub fn len(&self) -> usize {
        self.inner.borrow().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn state(&self) -> DrainState {
        self.inner.borrow().lifecycle.state
    }

    pub fn last_result(&self) -> Results {
        self.inner.borrow().last_result.clone()
    }

    pub fn lifecycle(&self) -> DrainLifecycle {
        self.inner.borrow().lifecycle.clone()
    }

    /// Starts draining the queue. `on_complete` receives the last step's
    /// result once the queue is empty.
    ///
    /// The first step is dispatched before this returns, so its synchronous
    /// failure is returned here. Later failures surface from the scheduler
    /// turn that ran the failing step, and `on_complete` is not called.
    /// An empty queue completes on the next scheduler turn.
    pub fn execute<F>(&self, on_complete: F) -> Result<(), BatchError>
    where
        F: FnOnce(Results) + 'static,
    {
        let (run, queued) = {
            let mut inner = self.inner.borrow_mut();
            let run = inner.lifecycle.begin_run()?;
            inner.on_complete = Some(Box::new(on_complete));
            (run, inner.queue.len())
        };
        log_event("info", "batch.execute", json!({"run": run, "queued": queued}));
        if queued == 0 {
            let batch = self.clone();
            self.scheduler.schedule_tick(Box::new(move || batch.drain()));
            return Ok(());
        }
        self.drain()
    }

    /// Like [`Batch::execute`], delivering the final result over a channel.
    pub fn execute_oneshot(&self) -> Result<oneshot::Receiver<Results>, BatchError> {
        let (tx, rx) = oneshot::channel();
        self.execute(move |results| {
            let _ = tx.send(results);
        })?;
        Ok(rx)
    }

    fn push(&self, record: CallRecord) {
        self.inner.borrow_mut().queue.push_back(record);
    }

    fn drain(&self) -> Result<(), BatchError> {
        let next = {
            let mut inner = self.inner.borrow_mut();
            match inner.queue.pop_front() {
                Some(record) => {
                    inner.lifecycle.on_step_dispatched();
                    let results = match &record {
                        CallRecord::Continuation(_) => inner.last_result.clone(),
                        CallRecord::Method { .. } => Vec::new(),
                    };
                    Next::Step {
                        record,
                        results,
                        remaining: inner.queue.len(),
                    }
                }
                None => {
                    inner.lifecycle.finish_run()?;
                    Next::Drained {
                        handler: inner.on_complete.take(),
                        results: inner.last_result.clone(),
                        run: inner.lifecycle.runs_started,
                    }
                }
            }
        };

        match next {
            Next::Step {
                record,
                results,
                remaining,
            } => {
                log_event(
                    "debug",
                    "batch.step",
                    json!({"call": record.describe(), "remaining": remaining}),
                );
                let done = StepDone::new(self.clone());
                self.scheduler
                    .schedule_call(Box::new(move || record.dispatch(results, done)))
            }
            Next::Drained {
                handler,
                results,
                run,
            } => {
                log_event(
                    "info",
                    "batch.drained",
                    json!({"run": run, "result": render_results(&results)}),
                );
                if let Some(handler) = handler {
                    handler(results);
                }
                Ok(())
            }
        }
    }

    fn resume(&self, results: Results) {
        let batch = self.clone();
        self.scheduler.schedule_tick(Box::new(move || {
            batch.inner.borrow_mut().last_result = results;
            batch.drain()
        }));
    }
}

/// Completion handle given to every running step.
///
/// Consumed by [`StepDone::complete`], so a step can resume its batch at most
/// once. Dropping it without completing leaves the batch stalled.
#[must_use = "the batch stalls until this step is completed"]
pub struct StepDone {
    batch: Option<Batch>,
}

impl StepDone {
    fn new(batch: Batch) -> Self {
        Self { batch: Some(batch) }
    }

    /// Hands `results` to the next turn of the drain loop.
    pub fn complete(mut self, results: Results) {
        if let Some(batch) = self.batch.take() {
            batch.resume(results);
        }
    }

    /// Completes with no result values.
    pub fn finish(self) {
        self.complete(Vec::new());
    }
}

impl Drop for StepDone {
    fn drop(&mut self) {
        let Some(batch) = self.batch.as_ref() else {
            return;
        };
        if let Ok(inner) = batch.inner.try_borrow() {
            log_event(
                "warn",
                "step.abandoned",
                json!({"run": inner.lifecycle.runs_started, "queued": inner.queue.len()}),
            );
        }
    }
}

impl fmt::Debug for StepDone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepDone")
            .field("pending", &self.batch.is_some())
            .finish()
    }
}
