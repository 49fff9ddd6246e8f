use crate::errors::BatchError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DrainState {
    #[default]
    Idle,
    Draining,
    Done,
}

impl DrainState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Draining => "draining",
            Self::Done => "done",
        }
    }
}

/// Drain bookkeeping for one batch: current state plus counters that survive
/// re-arming.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainLifecycle {
    pub state: DrainState,
    pub runs_started: u64,
    pub steps_dispatched: u64,
}

impl DrainLifecycle {
    pub fn transition(&mut self, next: DrainState) -> Result<(), BatchError> {
        validate_transition(self.state, next)?;
        self.state = next;
        Ok(())
    }

    pub fn begin_run(&mut self) -> Result<u64, BatchError> {
        self.transition(DrainState::Draining)?;
        self.runs_started = self.runs_started.saturating_add(1);
        Ok(self.runs_started)
    }

    pub fn on_step_dispatched(&mut self) {
        self.steps_dispatched = self.steps_dispatched.saturating_add(1);
    }

    pub fn finish_run(&mut self) -> Result<(), BatchError> {
        self.transition(DrainState::Done)
    }
}

pub fn validate_transition(from: DrainState, to: DrainState) -> Result<(), BatchError> {
    use DrainState as S;

    if from == S::Draining && to == S::Draining {
        return Err(BatchError::AlreadyDraining);
    }

    let allowed = match from {
        S::Idle | S::Done => matches!(to, S::Draining),
        S::Draining => matches!(to, S::Done),
    };

    if !allowed {
        return Err(BatchError::IllegalTransition(format!(
            "{} -> {}",
            from.as_str(),
            to.as_str()
        )));
    }
    Ok(())
}
