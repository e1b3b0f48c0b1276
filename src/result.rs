//! Verdict types passed between agents and pipes.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Structured verdict of one agent attempt.
///
/// Every field is always serialized (absent values as `null`) so the JSON
/// shape stays stable for logs and persisted memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoalResult {
    pub name: String,
    pub agent_id: String,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub result: Value,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub is_goal_satisfied: Option<bool>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
}

impl GoalResult {
    pub fn new(name: impl Into<String>, agent_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            agent_id: agent_id.into(),
            reason: None,
            result: Value::Null,
            is_goal_satisfied: None,
            error: None,
            content: None,
        }
    }

    pub fn satisfied(&self) -> bool {
        self.is_goal_satisfied == Some(true)
    }

    /// True only for an explicit `false` verdict; unparseable judgements stay unset.
    pub fn explicitly_unsatisfied(&self) -> bool {
        self.is_goal_satisfied == Some(false)
    }

    /// Human-readable framing threaded into later pipe steps.
    pub fn summary(&self) -> String {
        let result = match &self.result {
            Value::String(text) => text.clone(),
            other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
        };
        let satisfied = match self.is_goal_satisfied {
            Some(flag) => flag.to_string(),
            None => "unknown".to_string(),
        };
        format!(
            "Reason: {}\nResult: \n{}\nIs Goal Satisfied: {}\n\n",
            self.reason.as_deref().unwrap_or(""),
            result,
            satisfied
        )
    }
}

fn lenient_bool<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    Ok(raw.as_ref().and_then(parse_flag))
}

/// Accepts `true`/`false` as well as the `"True"`/`"False"` strings models tend to emit.
pub(crate) fn parse_flag(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(flag) => Some(*flag),
        Value::String(text) => match text.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" => Some(true),
            "false" | "no" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// Result of one `Agent::execute` call.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// The judge confirmed the goal.
    Satisfied(GoalResult),
    /// Retries ran out (or the verdict was unsatisfied) without a stop request.
    Continue(GoalResult),
    /// Strict policy tripped on an explicit unsatisfied verdict.
    Stopped(GoalResult),
}

impl Outcome {
    pub fn goal_result(&self) -> &GoalResult {
        match self {
            Outcome::Satisfied(result) | Outcome::Continue(result) | Outcome::Stopped(result) => {
                result
            }
        }
    }

    pub fn into_goal_result(self) -> GoalResult {
        match self {
            Outcome::Satisfied(result) | Outcome::Continue(result) | Outcome::Stopped(result) => {
                result
            }
        }
    }

    pub fn is_stopped(&self) -> bool {
        matches!(self, Outcome::Stopped(_))
    }
}

/// What one pipe step produced: a lone agent's verdict or a parallel group's.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StepOutcome {
    Single(GoalResult),
    Parallel(Vec<GoalResult>),
}

impl StepOutcome {
    pub fn goal_results(&self) -> &[GoalResult] {
        match self {
            StepOutcome::Single(result) => std::slice::from_ref(result),
            StepOutcome::Parallel(results) => results,
        }
    }
}
