//! Scripted model port for dry runs and tests.
//!
//! A script holds two FIFO queues: tool-augmented completions (each a list of
//! assistant messages) and judge texts. Every request pops the next entry;
//! an exhausted queue answers with nothing.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::llm::{AssistantMessage, ChatMessage, ModelPort, ToolCall, ToolSchema};

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReplayScript {
    #[serde(default)]
    pub tool_completions: Vec<Vec<AssistantMessage>>,
    #[serde(default)]
    pub judgements: Vec<Value>,
}

#[derive(Debug, Default)]
pub struct ReplayModel {
    tool_queue: Mutex<VecDeque<Vec<AssistantMessage>>>,
    judge_queue: Mutex<VecDeque<String>>,
    chat_calls: AtomicUsize,
    tool_calls: AtomicUsize,
}

impl ReplayModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_script(script: ReplayScript) -> Self {
        let model = Self::new();
        {
            let mut tools = model.tool_queue.lock().unwrap_or_else(|e| e.into_inner());
            tools.extend(script.tool_completions);
            let mut judge = model.judge_queue.lock().unwrap_or_else(|e| e.into_inner());
            // Judgements may be written as raw text or as inline JSON objects.
            judge.extend(script.judgements.into_iter().map(|entry| match entry {
                Value::String(text) => text,
                other => other.to_string(),
            }));
        }
        model
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read replay script '{}'", path.display()))?;
        let script = serde_json::from_str::<ReplayScript>(&content).with_context(|| {
            format!(
                "invalid replay script '{}'. Expected {{\"tool_completions\": [...], \"judgements\": [...]}}.",
                path.display()
            )
        })?;
        Ok(Self::from_script(script))
    }

    /// Queue one tool-augmented completion.
    pub fn push_completion(&self, messages: Vec<AssistantMessage>) -> &Self {
        self.tool_queue
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(messages);
        self
    }

    /// Queue a completion made of plain text payloads.
    pub fn push_texts<I, S>(&self, texts: I) -> &Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.push_completion(
            texts
                .into_iter()
                .map(|text| AssistantMessage::Text { text: text.into() })
                .collect(),
        )
    }

    /// Queue a completion that requests a single tool call.
    pub fn push_tool_call(&self, call: ToolCall) -> &Self {
        self.push_completion(vec![AssistantMessage::ToolCalls {
            tool_calls: vec![call],
        }])
    }

    pub fn push_judgement(&self, text: impl Into<String>) -> &Self {
        self.judge_queue
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(text.into());
        self
    }

    pub fn chat_calls(&self) -> usize {
        self.chat_calls.load(Ordering::SeqCst)
    }

    pub fn tool_calls(&self) -> usize {
        self.tool_calls.load(Ordering::SeqCst)
    }

    pub fn pending(&self) -> (usize, usize) {
        let tools = self.tool_queue.lock().unwrap_or_else(|e| e.into_inner()).len();
        let judge = self.judge_queue.lock().unwrap_or_else(|e| e.into_inner()).len();
        (tools, judge)
    }
}

#[async_trait]
impl ModelPort for ReplayModel {
    async fn chat_completion(&self, messages: &[ChatMessage]) -> Result<Vec<String>> {
        self.chat_calls.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(messages = messages.len(), "replay chat completion");
        let next = self
            .judge_queue
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();
        Ok(next.into_iter().collect())
    }

    async fn tool_completion(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSchema],
    ) -> Result<Vec<AssistantMessage>> {
        self.tool_calls.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(
            messages = messages.len(),
            tools = tools.len(),
            "replay tool completion"
        );
        let next = self
            .tool_queue
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();
        Ok(next.unwrap_or_default())
    }
}
