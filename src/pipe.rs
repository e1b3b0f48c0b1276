//! Multi-agent pipes: ordered agents and parallel agent groups, with prior
//! verdicts threaded forward and optional cross-turn memory.

use std::fmt;
use std::sync::Arc;

use crate::agent::Agent;
use crate::error::{FlowError, Result};
use crate::memory::{MemoryPort, MemoryRecord, Role};
use crate::result::{GoalResult, Outcome, StepOutcome};
use crate::step::{ExecuteType, Step, join_group, push_members};

pub const DEFAULT_MEMORY_LIMIT: usize = 5;

struct MemoryBinding {
    port: Arc<dyn MemoryPort>,
    limit: usize,
}

pub struct Pipe {
    name: String,
    pipe_id: String,
    description: Option<String>,
    stop_if_goal_not_satisfied: bool,
    memory: Option<MemoryBinding>,
    memory_id: String,
    chat_id: String,
    agents: Vec<Step<Arc<Agent>>>,
}

#[derive(Default)]
pub struct PipeBuilder {
    name: Option<String>,
    pipe_id: Option<String>,
    description: Option<String>,
    stop_if_goal_not_satisfied: bool,
    memory: Option<MemoryBinding>,
    agents: Vec<Step<Arc<Agent>>>,
}

impl PipeBuilder {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn pipe_id(mut self, pipe_id: impl Into<String>) -> Self {
        self.pipe_id = Some(pipe_id.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn stop_if_goal_not_satisfied(mut self, stop: bool) -> Self {
        self.stop_if_goal_not_satisfied = stop;
        self
    }

    /// Enable memory. `limit` caps how many records are recalled per step.
    pub fn memory(mut self, port: Arc<dyn MemoryPort>, limit: usize) -> Self {
        self.memory = Some(MemoryBinding {
            port,
            limit: limit.max(1),
        });
        self
    }

    pub fn agent(mut self, agent: Arc<Agent>) -> Self {
        self.agents.push(Step::Single(agent));
        self
    }

    pub fn parallel(mut self, agents: Vec<Arc<Agent>>) -> Self {
        push_members(&mut self.agents, agents, ExecuteType::Parallel);
        self
    }

    pub fn build(self) -> Pipe {
        let pipe_id = self
            .pipe_id
            .unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string());
        Pipe {
            name: self.name.unwrap_or_else(|| format!("Pipe-{pipe_id}")),
            pipe_id,
            description: self.description,
            stop_if_goal_not_satisfied: self.stop_if_goal_not_satisfied,
            memory: self.memory,
            memory_id: uuid::Uuid::new_v4().simple().to_string(),
            chat_id: uuid::Uuid::new_v4().simple().to_string(),
            agents: self.agents,
        }
    }
}

impl Pipe {
    pub fn builder() -> PipeBuilder {
        PipeBuilder::default()
    }

    pub fn add(&mut self, agents: Vec<Arc<Agent>>, execute_type: ExecuteType) {
        push_members(&mut self.agents, agents, execute_type);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pipe_id(&self) -> &str {
        &self.pipe_id
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn agents(&self) -> &[Step<Arc<Agent>>] {
        &self.agents
    }

    pub fn memory_enabled(&self) -> bool {
        self.memory.is_some()
    }

    /// Identifiers under which this pipe reads and writes memory. Stable for
    /// the pipe's lifetime.
    pub fn memory_ids(&self) -> (&str, &str) {
        (&self.memory_id, &self.chat_id)
    }

    /// Run every step in order and return one outcome per attempted step.
    ///
    /// When an agent stops early under the strict policy, its verdict is the
    /// last outcome and later steps are skipped.
    pub async fn flow(&self, query_instruction: &str) -> Result<Vec<StepOutcome>> {
        tracing::info!(pipe = self.name.as_str(), steps = self.agents.len(), "pipe starting");

        let mut outcomes: Vec<StepOutcome> = Vec::with_capacity(self.agents.len());
        for (index, step) in self.agents.iter().enumerate() {
            let pre_result = outcomes
                .iter()
                .flat_map(StepOutcome::goal_results)
                .map(GoalResult::summary)
                .collect::<String>();
            let pre_result = (!pre_result.is_empty()).then_some(pre_result);
            let prior_context = self.recall(query_instruction).await?;

            let (concluded, stopped_at) = self
                .run_step(
                    step,
                    query_instruction,
                    pre_result.as_deref(),
                    prior_context.as_deref(),
                )
                .await?;

            // Every concluded member is remembered, including siblings of a stopped one.
            self.remember(&concluded).await?;
            outcomes.push(collapse(step, concluded, stopped_at));

            if stopped_at.is_some() {
                tracing::warn!(
                    pipe = self.name.as_str(),
                    step = index,
                    "pipe stopped because a goal was not satisfied"
                );
                break;
            }
        }

        tracing::info!(pipe = self.name.as_str(), outcomes = outcomes.len(), "pipe finished");
        Ok(outcomes)
    }

    /// Returns each member's verdict in declared order and the index of the
    /// first member that tripped the strict stop.
    async fn run_step(
        &self,
        step: &Step<Arc<Agent>>,
        query_instruction: &str,
        pre_result: Option<&str>,
        prior_context: Option<&str>,
    ) -> Result<(Vec<GoalResult>, Option<usize>)> {
        let stop = self.stop_if_goal_not_satisfied;
        let outcomes = match step {
            Step::Single(agent) => vec![
                agent
                    .execute(query_instruction, pre_result, prior_context, stop)
                    .await?,
            ],
            Step::Parallel(agents) => {
                join_group(
                    agents
                        .iter()
                        .map(|agent| agent.execute(query_instruction, pre_result, prior_context, stop)),
                )
                .await?
            }
        };

        let stopped_at = outcomes.iter().position(Outcome::is_stopped);
        let concluded = outcomes.into_iter().map(Outcome::into_goal_result).collect();
        Ok((concluded, stopped_at))
    }

    async fn recall(&self, query_instruction: &str) -> Result<Option<String>> {
        let Some(memory) = &self.memory else {
            return Ok(None);
        };
        let records = memory
            .port
            .search(query_instruction, &self.memory_id, &self.chat_id, memory.limit)
            .await
            .map_err(FlowError::Memory)?;
        tracing::debug!(pipe = self.name.as_str(), recalled = records.len(), "memory recall");

        let context = records
            .iter()
            .map(|record| record.data.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        Ok((!context.is_empty()).then_some(context))
    }

    async fn remember(&self, concluded: &[GoalResult]) -> Result<()> {
        let Some(memory) = &self.memory else {
            return Ok(());
        };
        for goal_result in concluded {
            let data = serde_json::to_string(&goal_result.result)
                .map_err(|err| FlowError::Memory(err.into()))?;
            let record = MemoryRecord::new(
                self.memory_id.clone(),
                self.chat_id.clone(),
                uuid::Uuid::new_v4().simple().to_string(),
                Role::Assistant,
                data,
                goal_result.reason.clone(),
            );
            memory.port.add(record).await.map_err(FlowError::Memory)?;
        }
        Ok(())
    }
}

/// The first stopped member in declared order stands for its whole group.
fn collapse(
    step: &Step<Arc<Agent>>,
    mut concluded: Vec<GoalResult>,
    stopped_at: Option<usize>,
) -> StepOutcome {
    match (step, stopped_at) {
        (Step::Parallel(_), None) => StepOutcome::Parallel(concluded),
        (_, Some(index)) => StepOutcome::Single(concluded.swap_remove(index)),
        (Step::Single(_), None) => match concluded.pop() {
            Some(goal_result) => StepOutcome::Single(goal_result),
            None => StepOutcome::Parallel(concluded),
        },
    }
}

impl fmt::Debug for Pipe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipe")
            .field("name", &self.name)
            .field("pipe_id", &self.pipe_id)
            .field("stop_if_goal_not_satisfied", &self.stop_if_goal_not_satisfied)
            .field("memory", &self.memory.is_some())
            .field("agents", &self.agents)
            .finish_non_exhaustive()
    }
}
