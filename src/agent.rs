//! Goal-directed agents: run an engine sequence, ask the model whether the
//! goal is met, and retry up to `max_retry` times.

use std::fmt;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;

use crate::engine::Engine;
use crate::error::{FlowError, Result};
use crate::llm::ModelPort;
use crate::prompt::{GOAL_PROMPT_TEMPLATE, PromptTemplate};
use crate::result::{GoalResult, Outcome, parse_flag};
use crate::step::{ExecuteType, Step, join_group, push_members};

pub const DEFAULT_MAX_RETRY: usize = 5;
pub const NO_RESULTS_FOUND: &str = "No results found!";

pub struct Agent {
    name: String,
    agent_id: String,
    goal: String,
    role: String,
    description: Option<String>,
    output_format: Option<String>,
    max_retry: usize,
    model: Arc<dyn ModelPort>,
    prompt_template: Arc<dyn PromptTemplate>,
    engines: Vec<Step<Engine>>,
}

pub struct AgentBuilder {
    goal: String,
    role: String,
    model: Arc<dyn ModelPort>,
    prompt_template: Arc<dyn PromptTemplate>,
    name: Option<String>,
    agent_id: Option<String>,
    description: Option<String>,
    output_format: Option<String>,
    max_retry: usize,
    engines: Vec<Step<Engine>>,
}

impl AgentBuilder {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn agent_id(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn output_format(mut self, output_format: impl Into<String>) -> Self {
        self.output_format = Some(output_format.into());
        self
    }

    /// Values below one are raised to one.
    pub fn max_retry(mut self, max_retry: usize) -> Self {
        self.max_retry = max_retry;
        self
    }

    /// Append one engine as its own sequential step.
    pub fn engine(mut self, engine: Engine) -> Self {
        self.engines.push(Step::Single(engine));
        self
    }

    /// Append a group of engines that run concurrently as one step.
    pub fn parallel(mut self, engines: Vec<Engine>) -> Self {
        push_members(&mut self.engines, engines, ExecuteType::Parallel);
        self
    }

    pub fn build(self) -> Agent {
        let agent_id = self
            .agent_id
            .unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string());
        let name = self.name.unwrap_or_else(|| format!("Agent-{agent_id}"));
        Agent {
            name,
            agent_id,
            goal: self.goal,
            role: self.role,
            description: self.description,
            output_format: self.output_format,
            max_retry: self.max_retry.max(1),
            model: self.model,
            prompt_template: self.prompt_template,
            engines: self.engines,
        }
    }
}

/// Shape the judge is asked to answer with.
#[derive(Debug, Deserialize)]
struct Verdict {
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    result: Value,
    #[serde(default)]
    is_goal_satisfied: Value,
}

impl Agent {
    pub fn builder(
        goal: impl Into<String>,
        role: impl Into<String>,
        model: Arc<dyn ModelPort>,
        prompt_template: Arc<dyn PromptTemplate>,
    ) -> AgentBuilder {
        AgentBuilder {
            goal: goal.into(),
            role: role.into(),
            model,
            prompt_template,
            name: None,
            agent_id: None,
            description: None,
            output_format: None,
            max_retry: DEFAULT_MAX_RETRY,
            engines: Vec::new(),
        }
    }

    pub fn add(&mut self, engines: Vec<Engine>, execute_type: ExecuteType) {
        push_members(&mut self.engines, engines, execute_type);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn goal(&self) -> &str {
        &self.goal
    }

    pub fn role(&self) -> &str {
        &self.role
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn max_retry(&self) -> usize {
        self.max_retry
    }

    pub fn engines(&self) -> &[Step<Engine>] {
        &self.engines
    }

    /// Run attempts until the judge is satisfied, a strict stop trips, or
    /// retries run out. Handler, model and tool-resolution failures abort
    /// the call without further attempts.
    pub async fn execute(
        &self,
        query_instruction: &str,
        pre_result: Option<&str>,
        prior_context: Option<&str>,
        stop_if_goal_not_satisfied: bool,
    ) -> Result<Outcome> {
        let instruction = match prior_context.filter(|ctx| !ctx.is_empty()) {
            Some(context) => format!("Context:\n{context}\nQuestion: {query_instruction}"),
            None => query_instruction.to_string(),
        };

        let mut feedback = String::new();
        let mut last = None;
        for attempt in 1..=self.max_retry {
            tracing::info!(
                agent = self.name.as_str(),
                role = self.role.as_str(),
                attempt,
                max_retry = self.max_retry,
                "agent attempt"
            );

            let results = self.run_engines(&instruction, pre_result).await?;
            let goal_result = self
                .verify_goal(query_instruction, &results, &feedback)
                .await?;

            if goal_result.satisfied() {
                return Ok(Outcome::Satisfied(goal_result));
            }
            if goal_result.explicitly_unsatisfied() && stop_if_goal_not_satisfied {
                tracing::warn!(
                    agent = self.name.as_str(),
                    attempt,
                    reason = goal_result.reason.as_deref().unwrap_or(""),
                    "goal not satisfied; stopping"
                );
                return Ok(Outcome::Stopped(goal_result));
            }

            feedback = goal_result
                .reason
                .clone()
                .or_else(|| goal_result.error.clone())
                .unwrap_or_default();
            last = Some(goal_result);
        }

        tracing::warn!(
            agent = self.name.as_str(),
            max_retry = self.max_retry,
            "agent exhausted retries without satisfying its goal"
        );
        // max_retry >= 1, so at least one attempt produced a verdict.
        Ok(Outcome::Continue(last.unwrap_or_else(|| {
            GoalResult::new(self.name.clone(), self.agent_id.clone())
        })))
    }

    /// Every element contributes one array: its own results, or for a group
    /// an array of each member's results in declared order.
    async fn run_engines(&self, instruction: &str, pre_result: Option<&str>) -> Result<Vec<Value>> {
        let mut results = Vec::with_capacity(self.engines.len());
        for step in &self.engines {
            let contribution = match step {
                Step::Single(engine) => Value::Array(engine.start(instruction, pre_result).await?),
                Step::Parallel(engines) => {
                    let grouped = join_group(
                        engines
                            .iter()
                            .map(|engine| engine.start(instruction, pre_result)),
                    )
                    .await?;
                    Value::Array(grouped.into_iter().map(Value::Array).collect())
                }
            };
            results.push(contribution);
        }
        let rendered = serde_json::to_string(&results).unwrap_or_default();
        tracing::debug!(
            agent = self.name.as_str(),
            results = rendered.as_str(),
            "engine results"
        );
        Ok(results)
    }

    async fn verify_goal(
        &self,
        query_instruction: &str,
        results: &[Value],
        feedback: &str,
    ) -> Result<GoalResult> {
        let output_context = serde_json::to_string(results).unwrap_or_default();
        let messages = self.prompt_template.render(
            GOAL_PROMPT_TEMPLATE,
            &[
                ("goal", self.goal.as_str()),
                ("query_instruction", query_instruction),
                ("output_context", output_context.as_str()),
                ("feedback", feedback),
                ("output_format", self.output_format.as_deref().unwrap_or("")),
            ],
        );

        let choices = self
            .model
            .chat_completion(&messages)
            .await
            .map_err(FlowError::Model)?;
        let mut goal_result = GoalResult::new(self.name.clone(), self.agent_id.clone());

        let Some(raw) = choices.into_iter().next() else {
            goal_result.error = Some(NO_RESULTS_FOUND.to_string());
            goal_result.is_goal_satisfied = Some(false);
            return Ok(goal_result);
        };
        tracing::debug!(agent = self.name.as_str(), judge = raw.as_str(), "goal judgement");

        let cleaned = strip_code_fences(&raw);
        match serde_json::from_str::<Verdict>(&cleaned) {
            Ok(verdict) => {
                goal_result.reason = verdict.reason;
                goal_result.result = verdict.result;
                goal_result.is_goal_satisfied = parse_flag(&verdict.is_goal_satisfied);
            }
            Err(err) => {
                let message = format!("Cannot verify goal!\n{err}");
                tracing::warn!(agent = self.name.as_str(), error = %err, "cannot verify goal");
                goal_result.error = Some(message);
                goal_result.content = Some(cleaned);
            }
        }
        Ok(goal_result)
    }
}

impl fmt::Debug for Agent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Agent")
            .field("name", &self.name)
            .field("agent_id", &self.agent_id)
            .field("goal", &self.goal)
            .field("max_retry", &self.max_retry)
            .field("engines", &self.engines)
            .finish_non_exhaustive()
    }
}

fn strip_code_fences(raw: &str) -> String {
    raw.replace("```json", "").replace("```", "").trim().to_string()
}
