use callback_batch::batch::{Batch, StepDone};
use callback_batch::errors::BatchError;
use callback_batch::invocable::{Invocable, ObjectRef};
use callback_batch::lifecycle::DrainState;
use callback_batch::reactor::{Scheduler, Task, TickLoop};
use callback_batch::sequencer::Sequencer;
use callback_batch::targets::{CounterTarget, FakeTarget, Journal};
use callback_batch::types::Results;
use serde_json::json;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

/// Target that handles a literal `exec` operation through `invoke` and keeps
/// the default generic entry point.
struct LiteralExec {
    journal: Journal,
}

impl Invocable for LiteralExec {
    fn invoke(&self, operation: &str, args: Results, done: StepDone) -> Result<(), BatchError> {
        self.journal.push(format!("invoke:{operation}"));
        done.complete(args);
        Ok(())
    }

    fn label(&self) -> &str {
        "literal"
    }
}

/// Scheduler that only queues work; the test decides when to pump it.
#[derive(Clone, Default)]
struct ManualScheduler {
    queue: Rc<RefCell<VecDeque<Task>>>,
}

impl ManualScheduler {
    fn pump(&self) -> Result<usize, BatchError> {
        let mut ran = 0;
        loop {
            let next = self.queue.borrow_mut().pop_front();
            let Some(task) = next else {
                return Ok(ran);
            };
            task()?;
            ran += 1;
        }
    }
}

impl Scheduler for ManualScheduler {
    fn schedule_tick(&self, task: Task) {
        self.queue.borrow_mut().push_back(task);
    }
}

fn capture() -> (Rc<RefCell<Option<Results>>>, impl FnOnce(Results) + 'static) {
    let slot = Rc::new(RefCell::new(None));
    let sink = Rc::clone(&slot);
    (slot, move |results| *sink.borrow_mut() = Some(results))
}

#[test]
fn custom_scheduler_drives_the_batch_one_boundary_per_task() {
    let scheduler = ManualScheduler::default();
    let journal = Journal::default();
    let target: ObjectRef = Rc::new(FakeTarget::new("t", &journal));
    let batch = Batch::new(scheduler.clone());
    for idx in 0..3 {
        batch.put(target.clone(), "step", vec![json!(idx)]);
    }

    let (slot, on_complete) = capture();
    batch.execute(on_complete).expect("execute");
    assert_eq!(journal.entries(), vec!["t.step([0])"]);

    assert_eq!(scheduler.pump().expect("pump"), 3);
    assert_eq!(*slot.borrow(), Some(vec![json!(2)]));
    assert_eq!(batch.state(), DrainState::Done);
}

#[test]
fn literal_exec_is_not_routed_through_invoke() {
    let reactor = TickLoop::new();
    let journal = Journal::default();
    let target: ObjectRef = Rc::new(LiteralExec {
        journal: journal.clone(),
    });
    let batch = Batch::new(reactor.clone());
    batch.put(target.clone(), "execute", vec![]);
    batch.put(target, "exec", vec![]);

    batch.execute(|_| {}).expect("first step");
    let err = reactor.run().expect_err("exec has no generic entry point");

    assert_eq!(journal.entries(), vec!["invoke:execute"]);
    assert!(matches!(
        err,
        BatchError::UnsupportedOperation { ref target, ref operation }
            if target == "literal" && operation == "exec"
    ));
}

#[test]
fn sequencer_and_proxy_share_the_same_ordering_guarantees() {
    let reactor = TickLoop::new();
    let journal = Journal::default();
    let slow: ObjectRef = Rc::new(FakeTarget::new("slow", &journal).with_lag(&reactor, 3));

    let sequencer = Sequencer::new(slow.clone(), reactor.clone());
    sequencer
        .call("a", vec![])
        .call("b", vec![])
        .call("c", vec![json!("last")]);
    let (slot, on_complete) = capture();
    sequencer.execute(on_complete).expect("execute");
    reactor.run().expect("run");

    let batch = Batch::new(reactor.clone());
    batch
        .take(slow)
        .call("a", vec![])
        .call("b", vec![])
        .call("c", vec![json!("last")]);
    batch.execute(|_| {}).expect("execute");
    reactor.run().expect("run");

    let entries = journal.entries();
    assert_eq!(entries[..3], entries[3..]);
    assert_eq!(*slot.borrow(), Some(vec![json!("last")]));
}

#[test]
fn continuations_fold_over_counter_results() {
    let reactor = TickLoop::new();
    let counter = Rc::new(CounterTarget::new("tally"));
    let batch = Batch::new(reactor.clone());
    let tally = batch.take(counter.clone());
    tally.call("add", vec![json!(4)]);
    batch.then(|results| {
        let doubled = results.iter().filter_map(|v| v.as_i64()).map(|n| n * 2);
        doubled.map(|n| json!(n)).collect()
    });
    tally.call("reset", vec![]);

    let (slot, on_complete) = capture();
    batch.execute(on_complete).expect("execute");
    reactor.run().expect("run");

    assert_eq!(*slot.borrow(), Some(vec![json!(0)]));
    assert_eq!(counter.total(), 0);
}

#[test]
fn completion_fires_exactly_once_per_run() {
    let reactor = TickLoop::new();
    let journal = Journal::default();
    let target: ObjectRef = Rc::new(FakeTarget::new("t", &journal));
    let batch = Batch::new(reactor.clone());
    let fired = Rc::new(RefCell::new(0));

    for run in 0..3 {
        batch.put(target.clone(), "step", vec![json!(run)]);
        let counter = Rc::clone(&fired);
        batch
            .execute(move |_| *counter.borrow_mut() += 1)
            .expect("execute");
        reactor.run().expect("run");
    }

    assert_eq!(*fired.borrow(), 3);
    assert_eq!(batch.lifecycle().runs_started, 3);
    assert_eq!(batch.lifecycle().steps_dispatched, 3);
    assert_eq!(batch.last_result(), vec![json!(2)]);
}
