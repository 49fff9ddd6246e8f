use crate::batch::StepDone;
use crate::errors::BatchError;
use crate::types::Results;
use std::rc::Rc;

/// Operation name routed to [`Invocable::exec`] instead of `invoke`.
pub const EXEC_OPERATION: &str = "exec";

/// A target a batch can replay recorded calls against.
///
/// Every operation must eventually call [`StepDone::complete`]; an operation
/// that never does stalls the batch that dispatched it.
pub trait Invocable {
    fn invoke(&self, operation: &str, args: Results, done: StepDone) -> Result<(), BatchError>;

    /// Generic entry point for records whose operation is [`EXEC_OPERATION`].
    fn exec(&self, args: Results, done: StepDone) -> Result<(), BatchError> {
        let _ = (args, done);
        Err(BatchError::unsupported(self.label(), EXEC_OPERATION))
    }

    fn label(&self) -> &str {
        "target"
    }
}

pub type ObjectRef = Rc<dyn Invocable>;
