use crate::batch::StepDone;
use crate::errors::BatchError;
use crate::invocable::{Invocable, ObjectRef, EXEC_OPERATION};
use crate::reactor::{Scheduler, TickLoop};
use crate::runtime::Terminal;
use crate::types::{render_results, Results, TargetKind};
use serde_json::{json, Value};
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::Arc;

/// Completes `done` with `results` once `ticks` further reactor turns have run.
pub fn complete_after(reactor: TickLoop, ticks: u64, done: StepDone, results: Results) {
    if ticks == 0 {
        done.complete(results);
        return;
    }
    let next = reactor.clone();
    reactor.schedule_tick(Box::new(move || {
        complete_after(next, ticks - 1, done, results);
        Ok(())
    }));
}

pub fn builtin_target(
    kind: TargetKind,
    name: &str,
    terminal: Arc<dyn Terminal>,
    reactor: &TickLoop,
) -> ObjectRef {
    match kind {
        TargetKind::Echo => Rc::new(EchoTarget::new(name, terminal)),
        TargetKind::Counter => Rc::new(CounterTarget::new(name)),
        TargetKind::Delay => Rc::new(DelayTarget::new(name, reactor.clone())),
    }
}

fn plain(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

pub struct EchoTarget {
    name: String,
    terminal: Arc<dyn Terminal>,
}

impl EchoTarget {
    pub fn new(name: &str, terminal: Arc<dyn Terminal>) -> Self {
        Self {
            name: name.to_string(),
            terminal,
        }
    }
}

impl Invocable for EchoTarget {
    fn invoke(&self, operation: &str, args: Results, done: StepDone) -> Result<(), BatchError> {
        if operation != "say" {
            return Err(BatchError::unsupported(&self.name, operation));
        }
        let text = args.iter().map(plain).collect::<Vec<_>>().join(" ");
        self.terminal.write_line(&format!("{}: {text}", self.name))?;
        done.complete(args);
        Ok(())
    }

    fn exec(&self, args: Results, done: StepDone) -> Result<(), BatchError> {
        let mut results = vec![json!(EXEC_OPERATION)];
        results.extend(args);
        done.complete(results);
        Ok(())
    }

    fn label(&self) -> &str {
        &self.name
    }
}

pub struct CounterTarget {
    name: String,
    total: Cell<i64>,
}

impl CounterTarget {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            total: Cell::new(0),
        }
    }

    pub fn total(&self) -> i64 {
        self.total.get()
    }
}

impl Invocable for CounterTarget {
    fn invoke(&self, operation: &str, args: Results, done: StepDone) -> Result<(), BatchError> {
        match operation {
            "add" => {
                let mut total = self.total.get();
                for arg in &args {
                    let n = arg.as_i64().ok_or_else(|| {
                        BatchError::InvalidArgument(format!(
                            "{}.add expects integers, got {arg}",
                            self.name
                        ))
                    })?;
                    total = total.saturating_add(n);
                }
                self.total.set(total);
            }
            "get" => {}
            "reset" => self.total.set(0),
            other => return Err(BatchError::unsupported(&self.name, other)),
        }
        done.complete(vec![json!(self.total.get())]);
        Ok(())
    }

    fn exec(&self, _args: Results, done: StepDone) -> Result<(), BatchError> {
        done.complete(vec![json!(self.total.get())]);
        Ok(())
    }

    fn label(&self) -> &str {
        &self.name
    }
}

/// Completes `wait(ticks, values…)` with `values` after `ticks` reactor turns.
pub struct DelayTarget {
    name: String,
    reactor: TickLoop,
}

impl DelayTarget {
    pub fn new(name: &str, reactor: TickLoop) -> Self {
        Self {
            name: name.to_string(),
            reactor,
        }
    }

    fn wait(&self, mut args: Results, done: StepDone) -> Result<(), BatchError> {
        let ticks = args.first().and_then(Value::as_u64).ok_or_else(|| {
            BatchError::InvalidArgument(format!(
                "{}.wait expects a tick count as its first argument",
                self.name
            ))
        })?;
        args.remove(0);
        complete_after(self.reactor.clone(), ticks, done, args);
        Ok(())
    }
}

impl Invocable for DelayTarget {
    fn invoke(&self, operation: &str, args: Results, done: StepDone) -> Result<(), BatchError> {
        if operation != "wait" {
            return Err(BatchError::unsupported(&self.name, operation));
        }
        self.wait(args, done)
    }

    fn exec(&self, args: Results, done: StepDone) -> Result<(), BatchError> {
        self.wait(args, done)
    }

    fn label(&self) -> &str {
        &self.name
    }
}

/// Shared, ordered log of calls seen by [`FakeTarget`]s.
#[derive(Clone, Default)]
pub struct Journal(Rc<RefCell<Vec<String>>>);

impl Journal {
    pub fn push(&self, entry: String) {
        self.0.borrow_mut().push(entry);
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.borrow().clone()
    }
}

/// Test double that journals `label.operation(args)` for `invoke` and
/// `label!exec(args)` for the generic entry point, then completes with its
/// arguments.
pub struct FakeTarget {
    label: String,
    journal: Journal,
    lag: Option<(TickLoop, u64)>,
    rejected: RefCell<Vec<String>>,
    quiet: bool,
    depth: Cell<usize>,
    max_depth: Cell<usize>,
    invocations: Cell<usize>,
}

impl FakeTarget {
    pub fn new(label: &str, journal: &Journal) -> Self {
        Self {
            label: label.to_string(),
            journal: journal.clone(),
            lag: None,
            rejected: RefCell::new(Vec::new()),
            quiet: false,
            depth: Cell::new(0),
            max_depth: Cell::new(0),
            invocations: Cell::new(0),
        }
    }

    /// Complete every call `ticks` reactor turns after it starts.
    pub fn with_lag(mut self, reactor: &TickLoop, ticks: u64) -> Self {
        self.lag = Some((reactor.clone(), ticks));
        self
    }

    /// Count calls without journaling them.
    pub fn quiet(mut self) -> Self {
        self.quiet = true;
        self
    }

    pub fn reject(&self, operation: &str) {
        self.rejected.borrow_mut().push(operation.to_string());
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth.get()
    }

    pub fn invocations(&self) -> usize {
        self.invocations.get()
    }

    fn enter(&self, entry: impl FnOnce() -> String) -> usize {
        let depth = self.depth.get() + 1;
        self.depth.set(depth);
        self.max_depth.set(self.max_depth.get().max(depth));
        self.invocations.set(self.invocations.get() + 1);
        if !self.quiet {
            self.journal.push(entry());
        }
        depth
    }

    fn respond(&self, done: StepDone, results: Results) {
        match &self.lag {
            Some((reactor, ticks)) => complete_after(reactor.clone(), *ticks, done, results),
            None => done.complete(results),
        }
    }
}

impl Invocable for FakeTarget {
    fn invoke(&self, operation: &str, args: Results, done: StepDone) -> Result<(), BatchError> {
        let depth = self.enter(|| format!("{}.{operation}({})", self.label, render_results(&args)));
        let outcome = if self.rejected.borrow().iter().any(|op| op == operation) {
            Err(BatchError::unsupported(&self.label, operation))
        } else {
            self.respond(done, args);
            Ok(())
        };
        self.depth.set(depth - 1);
        outcome
    }

    fn exec(&self, args: Results, done: StepDone) -> Result<(), BatchError> {
        let depth = self.enter(|| format!("{}!exec({})", self.label, render_results(&args)));
        self.respond(done, args);
        self.depth.set(depth - 1);
        Ok(())
    }

    fn label(&self) -> &str {
        &self.label
    }
}
