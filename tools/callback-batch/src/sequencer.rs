use crate::batch::Batch;
use crate::errors::BatchError;
use crate::invocable::ObjectRef;
use crate::reactor::Scheduler;
use crate::types::Results;
use tokio::sync::oneshot;

/// Fluent recorder for a single fixed target. Owns its batch outright.
pub struct Sequencer {
    target: ObjectRef,
    batch: Batch,
}

impl Sequencer {
    pub fn new(target: ObjectRef, scheduler: impl Scheduler + 'static) -> Self {
        Self {
            target,
            batch: Batch::new(scheduler),
        }
    }

    pub fn call(&self, operation: &str, args: Results) -> &Self {
        self.batch.put(self.target.clone(), operation, args);
        self
    }

    pub fn execute<F>(&self, on_complete: F) -> Result<(), BatchError>
    where
        F: FnOnce(Results) + 'static,
    {
        self.batch.execute(on_complete)
    }

    pub fn execute_oneshot(&self) -> Result<oneshot::Receiver<Results>, BatchError> {
        self.batch.execute_oneshot()
    }

    pub fn len(&self) -> usize {
        self.batch.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batch.is_empty()
    }
}
