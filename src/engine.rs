//! Engine: turns an instruction into model-chosen tool invocations on one handler.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::error::{FlowError, Result};
use crate::handler::{Handler, Operation};
use crate::llm::{AssistantMessage, ModelPort, ToolSchema};
use crate::prompt::PromptTemplate;

/// Post-processes each truthy operation return before it is collected.
pub trait OutputParser: Send + Sync {
    fn parse(&self, value: Value) -> anyhow::Result<Value>;
}

impl<F> OutputParser for F
where
    F: Fn(Value) -> anyhow::Result<Value> + Send + Sync,
{
    fn parse(&self, value: Value) -> anyhow::Result<Value> {
        self(value)
    }
}

#[derive(Clone)]
pub struct Engine {
    handler: Arc<dyn Handler>,
    model: Arc<dyn ModelPort>,
    prompt_template: Arc<dyn PromptTemplate>,
    tools: Option<Vec<String>>,
    output_parser: Option<Arc<dyn OutputParser>>,
}

impl Engine {
    pub fn new(
        handler: Arc<dyn Handler>,
        model: Arc<dyn ModelPort>,
        prompt_template: Arc<dyn PromptTemplate>,
    ) -> Self {
        Self {
            handler,
            model,
            prompt_template,
            tools: None,
            output_parser: None,
        }
    }

    /// Restrict advertised operations to these names. Dotted names
    /// (`handler.operation`) match on their last segment.
    pub fn with_tools<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let tools = tools.into_iter().map(Into::into).collect::<Vec<String>>();
        self.tools = (!tools.is_empty()).then_some(tools);
        self
    }

    pub fn with_output_parser(mut self, parser: Arc<dyn OutputParser>) -> Self {
        self.output_parser = Some(parser);
        self
    }

    pub fn handler_name(&self) -> &str {
        self.handler.name()
    }

    /// Operations this engine will advertise, in registry or allow-list order.
    pub fn resolve_operations(&self) -> Result<Vec<&Operation>> {
        let registry = self.handler.operations();
        let resolved = match &self.tools {
            Some(names) => names
                .iter()
                .filter_map(|name| {
                    let short = name.rsplit('.').next().unwrap_or(name.as_str());
                    let found = registry.get(short);
                    if found.is_none() {
                        tracing::warn!(
                            handler = self.handler.name(),
                            tool = name.as_str(),
                            "allow-listed tool is not an operation of this handler"
                        );
                    }
                    found
                })
                .collect::<Vec<&Operation>>(),
            None => registry.iter().collect(),
        };

        if resolved.is_empty() {
            return Err(FlowError::InvalidHandler(self.handler.name().to_string()));
        }
        Ok(resolved)
    }

    fn construct_tools(&self) -> Result<Vec<ToolSchema>> {
        Ok(self
            .resolve_operations()?
            .into_iter()
            .map(|op| self.model.describe_tool(op))
            .collect())
    }

    /// Run one instruction against the handler and collect what came back.
    pub async fn start(&self, input_prompt: &str, pre_result: Option<&str>) -> Result<Vec<Value>> {
        let tools = self.construct_tools()?;
        tracing::debug!(
            handler = self.handler.name(),
            tools = ?tools.iter().map(|t| t.name.as_str()).collect::<Vec<_>>(),
            "engine tools resolved"
        );

        let prompt = match pre_result.filter(|pre| !pre.is_empty()) {
            Some(pre) => format!("{input_prompt}\n\n{pre}"),
            None => input_prompt.to_string(),
        };
        let messages = self
            .prompt_template
            .render("{input_prompt}", &[("input_prompt", prompt.as_str())]);

        let replies = self
            .model
            .tool_completion(&messages, &tools)
            .await
            .map_err(FlowError::Model)?;
        if replies.is_empty() {
            return Err(FlowError::ToolError(
                "no tool resolved for the given instruction".to_string(),
            ));
        }

        let mut results = Vec::new();
        for reply in replies {
            match reply {
                AssistantMessage::ToolCalls { tool_calls } => {
                    for call in tool_calls {
                        let Some(operation) = self.handler.operations().get(&call.name) else {
                            tracing::warn!(
                                handler = self.handler.name(),
                                tool = call.name.as_str(),
                                "model requested an unknown operation; skipping"
                            );
                            continue;
                        };

                        let arguments = serde_json::to_string(&call.arguments).unwrap_or_default();
                        tracing::debug!(
                            handler = self.handler.name(),
                            tool = call.name.as_str(),
                            arguments = arguments.as_str(),
                            "invoking operation"
                        );
                        let value = operation.call(call.arguments).await.map_err(|error| {
                            FlowError::Handler {
                                operation: call.name.clone(),
                                error,
                            }
                        })?;
                        if !is_truthy(&value) {
                            continue;
                        }

                        let value = match &self.output_parser {
                            Some(parser) => parser.parse(value).map_err(|error| FlowError::Handler {
                                operation: call.name.clone(),
                                error,
                            })?,
                            None => value,
                        };
                        results.push(value);
                    }
                }
                AssistantMessage::Text { text } => results.push(Value::String(text)),
            }
        }

        tracing::debug!(
            handler = self.handler.name(),
            results = results.len(),
            "engine finished"
        );
        Ok(results)
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("handler", &self.handler.name())
            .field("tools", &self.tools)
            .field("output_parser", &self.output_parser.is_some())
            .finish()
    }
}

/// `null`, `false`, zero, and empty strings/arrays/objects contribute nothing.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0),
        Value::String(text) => !text.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}
