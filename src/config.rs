use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::agent::Agent;
use crate::engine::Engine;
use crate::handler::Handler;
use crate::llm::ModelPort;
use crate::memory::InMemoryStore;
use crate::pipe::{DEFAULT_MEMORY_LIMIT, Pipe};
use crate::prompt::{DefaultPromptTemplate, PromptTemplate};
use crate::step::ExecuteType;

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineFile {
    #[serde(default)]
    pub pipe: PipeConfig,
    #[serde(default)]
    pub agents: BTreeMap<String, AgentConfig>,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipeConfig {
    pub name: Option<String>,
    pub description: Option<String>,
    #[serde(default)]
    pub stop_if_goal_not_satisfied: bool,
    #[serde(default)]
    pub memory: bool,
    pub memory_path: Option<String>,
    pub memory_search_limit: Option<usize>,
    /// Each inner list is one step; more than one agent name forms a parallel group.
    #[serde(default)]
    pub steps: Vec<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AgentConfig {
    pub goal: String,
    pub role: String,
    pub description: Option<String>,
    pub output_format: Option<String>,
    pub max_retry: Option<usize>,
    pub system_prompt: Option<String>,
    /// Each inner list is one step; more than one engine forms a parallel group.
    #[serde(default)]
    pub steps: Vec<Vec<EngineConfig>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    pub handler: String,
    #[serde(default)]
    pub tools: Vec<String>,
}

pub fn load_pipeline(path: &Path) -> Result<PipelineFile> {
    if !path.exists() {
        anyhow::bail!(
            "pipeline config not found at '{}'. Pass --config or set GOALFLOW_CONFIG.",
            path.display()
        );
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read pipeline config file at '{}'", path.display()))?;
    parse_pipeline(&content).with_context(|| {
        format!(
            "invalid pipeline configuration in '{}'. Check [pipe]/[agents] field names.",
            path.display()
        )
    })
}

pub fn parse_pipeline(content: &str) -> Result<PipelineFile> {
    Ok(toml::from_str::<PipelineFile>(content)?)
}

/// Check every cross-reference in the file against the available handlers.
pub fn validate_pipeline(
    file: &PipelineFile,
    handlers: &BTreeMap<String, Arc<dyn Handler>>,
) -> Result<()> {
    if file.pipe.steps.is_empty() {
        anyhow::bail!("pipeline has no steps; add `steps = [[\"agent\"]]` under [pipe]");
    }

    for (index, group) in file.pipe.steps.iter().enumerate() {
        if group.is_empty() {
            anyhow::bail!("pipeline step {index} is an empty agent group");
        }
        if let Some(unknown) = group.iter().find(|name| !file.agents.contains_key(*name)) {
            anyhow::bail!("pipeline step {index} references unknown agent '{unknown}'");
        }
    }

    for (name, agent) in &file.agents {
        if agent.goal.trim().is_empty() {
            anyhow::bail!("agent '{name}' in pipeline config has an empty goal");
        }
        if agent.steps.is_empty() {
            anyhow::bail!("agent '{name}' in pipeline config has no engine steps");
        }
        for (index, group) in agent.steps.iter().enumerate() {
            if group.is_empty() {
                anyhow::bail!("agent '{name}' step {index} is an empty engine group");
            }
            for engine in group {
                let handler = handlers.get(&engine.handler).with_context(|| {
                    format!(
                        "agent '{name}' references unknown handler '{}'. Available: {}",
                        engine.handler,
                        handlers.keys().cloned().collect::<Vec<_>>().join(", ")
                    )
                })?;
                let known = handler.operations().names().into_iter().collect::<BTreeSet<_>>();
                for tool in &engine.tools {
                    let short = tool.rsplit('.').next().unwrap_or(tool.as_str());
                    if !known.contains(short) {
                        anyhow::bail!(
                            "agent '{name}' in pipeline config lists tool '{tool}' which handler '{}' does not provide",
                            engine.handler
                        );
                    }
                }
            }
        }
    }

    let referenced = file.pipe.steps.iter().flatten().collect::<BTreeSet<_>>();
    for name in file.agents.keys().filter(|name| !referenced.contains(name)) {
        tracing::warn!(agent = name.as_str(), "agent is defined but never used by the pipe");
    }
    Ok(())
}

/// Validate and assemble a runnable pipe. Agents referenced from several
/// steps are built once and shared.
pub fn build_pipe(
    file: &PipelineFile,
    handlers: &BTreeMap<String, Arc<dyn Handler>>,
    model: Arc<dyn ModelPort>,
) -> Result<Pipe> {
    validate_pipeline(file, handlers)?;

    let mut agents = BTreeMap::new();
    for (name, config) in &file.agents {
        agents.insert(name.as_str(), Arc::new(build_agent(name, config, handlers, &model)?));
    }

    let mut builder = Pipe::builder()
        .stop_if_goal_not_satisfied(file.pipe.stop_if_goal_not_satisfied);
    if let Some(name) = &file.pipe.name {
        builder = builder.name(name);
    }
    if let Some(description) = &file.pipe.description {
        builder = builder.description(description);
    }
    if file.pipe.memory {
        let store = match &file.pipe.memory_path {
            Some(path) => InMemoryStore::open(Path::new(path))?,
            None => InMemoryStore::new(),
        };
        let limit = file.pipe.memory_search_limit.unwrap_or(DEFAULT_MEMORY_LIMIT);
        builder = builder.memory(Arc::new(store), limit);
    }

    let mut pipe = builder.build();
    for group in &file.pipe.steps {
        let members = group
            .iter()
            .filter_map(|name| agents.get(name.as_str()).cloned())
            .collect::<Vec<_>>();
        pipe.add(members, execute_type_for(group.len()));
    }
    Ok(pipe)
}

fn build_agent(
    name: &str,
    config: &AgentConfig,
    handlers: &BTreeMap<String, Arc<dyn Handler>>,
    model: &Arc<dyn ModelPort>,
) -> Result<Agent> {
    let template: Arc<dyn PromptTemplate> = match &config.system_prompt {
        Some(system) => Arc::new(DefaultPromptTemplate::with_system(system.clone())),
        None => Arc::new(DefaultPromptTemplate::new()),
    };

    let mut builder = Agent::builder(&config.goal, &config.role, Arc::clone(model), Arc::clone(&template))
        .name(name);
    if let Some(description) = &config.description {
        builder = builder.description(description);
    }
    if let Some(output_format) = &config.output_format {
        builder = builder.output_format(output_format);
    }
    if let Some(max_retry) = config.max_retry {
        builder = builder.max_retry(max_retry);
    }

    let mut agent = builder.build();
    for group in &config.steps {
        let engines = group
            .iter()
            .map(|engine| -> Result<Engine> {
                let handler = handlers
                    .get(&engine.handler)
                    .with_context(|| format!("unknown handler '{}'", engine.handler))?;
                Ok(Engine::new(Arc::clone(handler), Arc::clone(model), Arc::clone(&template))
                    .with_tools(engine.tools.iter().cloned()))
            })
            .collect::<Result<Vec<_>>>()?;
        agent.add(engines, execute_type_for(group.len()));
    }
    Ok(agent)
}

fn execute_type_for(members: usize) -> ExecuteType {
    if members > 1 {
        ExecuteType::Parallel
    } else {
        ExecuteType::Sequence
    }
}
