//! Model port: the contract engines and agents use to reach a language model.
//!
//! Transport, prompt formatting and provider selection live behind this trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::handler::{Arguments, Operation};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// A single role-tagged message in the conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// A model-selected invocation of one operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    #[serde(default)]
    pub arguments: Arguments,
}

/// One assistant message from a tool-augmented completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AssistantMessage {
    ToolCalls { tool_calls: Vec<ToolCall> },
    Text { text: String },
}

/// Tool advertisement sent alongside a tool-augmented request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[async_trait]
pub trait ModelPort: Send + Sync {
    /// Plain chat completion. Returns the text of every choice; an empty
    /// vector means the model produced no response.
    async fn chat_completion(&self, messages: &[ChatMessage]) -> anyhow::Result<Vec<String>>;

    /// Completion that may request tool calls.
    async fn tool_completion(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSchema],
    ) -> anyhow::Result<Vec<AssistantMessage>>;

    fn describe_tool(&self, operation: &Operation) -> ToolSchema {
        ToolSchema {
            name: operation.name().to_string(),
            description: operation.description().to_string(),
            parameters: operation.parameters().clone(),
        }
    }
}
