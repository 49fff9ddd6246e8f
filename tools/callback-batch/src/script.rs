//! Batch scripts: a TOML description of targets and the steps to replay
//! against them.
//!
//! ```toml
//! [[targets]]
//! name = "console"
//! kind = "echo"
//!
//! [[steps]]
//! target = "console"
//! operation = "say"
//! args = ["hello"]
//!
//! [[steps]]          # no target: forward the previous result, args appended
//! args = ["tail"]
//! ```

use crate::batch::Batch;
use crate::config::AppConfig;
use crate::errors::BatchError;
use crate::invocable::ObjectRef;
use crate::reactor::TickLoop;
use crate::runtime::{FileSystem, Terminal};
use crate::targets::builtin_target;
use crate::types::{Results, TargetKind};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::rc::Rc;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchScript {
    #[serde(default)]
    pub targets: Vec<TargetSpec>,
    #[serde(default)]
    pub steps: Vec<StepSpec>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetSpec {
    pub name: String,
    pub kind: TargetKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepSpec {
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub operation: Option<String>,
    #[serde(default)]
    pub args: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScriptOutcome {
    pub steps: usize,
    pub turns: u64,
    pub result: Results,
}

pub fn parse_script(text: &str) -> Result<BatchScript, BatchError> {
    let script: BatchScript =
        toml::from_str(text).map_err(|e| BatchError::Script(e.to_string()))?;
    validate_script(&script)?;
    Ok(script)
}

pub fn load_script(fs: &dyn FileSystem, path: &Path) -> Result<BatchScript, BatchError> {
    let text = fs.read_to_string(path)?;
    parse_script(&text)
}

fn validate_script(script: &BatchScript) -> Result<(), BatchError> {
    if script.steps.is_empty() {
        return Err(BatchError::Script("script has no steps".to_string()));
    }

    let mut names = BTreeSet::new();
    for target in &script.targets {
        if target.name.trim().is_empty() {
            return Err(BatchError::Script("target name must not be empty".to_string()));
        }
        if !names.insert(target.name.as_str()) {
            return Err(BatchError::Script(format!(
                "target `{}` is declared twice",
                target.name
            )));
        }
    }

    for (idx, step) in script.steps.iter().enumerate() {
        let number = idx + 1;
        match (&step.target, &step.operation) {
            (Some(target), Some(_)) => {
                if !names.contains(target.as_str()) {
                    return Err(BatchError::Script(format!(
                        "step {number}: unknown target `{target}`"
                    )));
                }
            }
            (Some(target), None) => {
                return Err(BatchError::Script(format!(
                    "step {number}: target `{target}` needs an operation"
                )));
            }
            (None, Some(operation)) => {
                return Err(BatchError::Script(format!(
                    "step {number}: operation `{operation}` needs a target"
                )));
            }
            (None, None) => {}
        }
    }
    Ok(())
}

/// Creates the script's targets and records every step on a new batch.
pub fn build_batch(
    script: &BatchScript,
    reactor: &TickLoop,
    terminal: Arc<dyn Terminal>,
) -> Result<Batch, BatchError> {
    let targets = script
        .targets
        .iter()
        .map(|spec| {
            let target = builtin_target(spec.kind, &spec.name, Arc::clone(&terminal), reactor);
            (spec.name.clone(), target)
        })
        .collect::<BTreeMap<String, ObjectRef>>();

    let batch = Batch::new(reactor.clone());
    for step in &script.steps {
        match (&step.target, &step.operation) {
            (Some(name), Some(operation)) => {
                let target = targets
                    .get(name)
                    .cloned()
                    .ok_or_else(|| BatchError::Script(format!("unknown target `{name}`")))?;
                batch.take(target).call(operation, step.args.clone());
            }
            (None, None) => {
                let extra = step.args.clone();
                batch.then(move |mut results| {
                    results.extend(extra);
                    results
                });
            }
            _ => {
                return Err(BatchError::Script(
                    "every step needs both a target and an operation, or neither".to_string(),
                ))
            }
        }
    }
    Ok(batch)
}

/// Executes `batch` and turns `reactor` until it completes.
///
/// Returns the final result and the number of turns taken. A reactor that
/// goes idle first means a step never completed.
pub fn drive_batch(
    batch: &Batch,
    reactor: &TickLoop,
    max_turns: u64,
) -> Result<(Results, u64), BatchError> {
    let outcome = Rc::new(RefCell::new(None));
    let sink = Rc::clone(&outcome);
    batch.execute(move |results| *sink.borrow_mut() = Some(results))?;
    let turns = reactor.run_for(max_turns)?;

    let result = outcome.borrow_mut().take();
    match result {
        Some(result) => Ok((result, turns)),
        None => Err(BatchError::Stalled {
            remaining: batch.len(),
        }),
    }
}

pub fn run_script(
    script: &BatchScript,
    cfg: &AppConfig,
    terminal: Arc<dyn Terminal>,
) -> Result<ScriptOutcome, BatchError> {
    let reactor = if cfg.scheduler.defer_calls {
        TickLoop::deferred_calls()
    } else {
        TickLoop::new()
    };
    let batch = build_batch(script, &reactor, terminal)?;
    let steps = batch.len();
    let (result, turns) = drive_batch(&batch, &reactor, cfg.scheduler.max_turns)?;
    Ok(ScriptOutcome {
        steps,
        turns,
        result,
    })
}
