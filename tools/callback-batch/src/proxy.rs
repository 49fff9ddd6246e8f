use crate::batch::Batch;
use crate::invocable::ObjectRef;
use crate::types::Results;

/// Records calls against one target into a batch it shares with other
/// proxies. Holds no queue of its own.
#[derive(Clone)]
pub struct CallProxy {
    target: ObjectRef,
    batch: Batch,
}

impl CallProxy {
    pub fn new(target: ObjectRef, batch: Batch) -> Self {
        Self { target, batch }
    }

    pub fn call(&self, operation: &str, args: Results) -> &Self {
        self.batch.put(self.target.clone(), operation, args);
        self
    }
}
