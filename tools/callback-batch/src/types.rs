use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Ordered argument or result values carried between steps.
pub type Results = Vec<Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    Echo,
    Counter,
    Delay,
}

/// Renders a result sequence as compact JSON for terminal output.
pub fn render_results(results: &[Value]) -> String {
    serde_json::to_string(results).unwrap_or_else(|_| "[]".to_string())
}
