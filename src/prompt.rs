//! Prompt assembly.

use crate::llm::ChatMessage;

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant.";

/// Judge prompt used for goal verification.
pub const GOAL_PROMPT_TEMPLATE: &str = "Review the given output context and make sure \
the following goal is achieved.

Goal: {goal}

Query_Instruction: {query_instruction}

Output_Context: {output_context}

Feedback: {feedback}

Output_Format: {output_format}

Follow the instructions step-by-step carefully and act upon.

Review the Output_Context based on the given Goal with Query_Instruction and set the result \
in the below mentioned result.

Answer should be based on the given output context. Do not try to answer on your own.

Make sure to generate the result based on the given output format if provided.

{
    \"reason\": Set the reason for the result,
    \"result\": Set this based on the output format if one is given. Otherwise set the result as it is,
    \"is_goal_satisfied\": true if the result satisfies the goal, otherwise false. Only a JSON boolean.
}

Always generate the JSON output.";

pub trait PromptTemplate: Send + Sync {
    /// Turn a base prompt plus named variables into role-tagged messages.
    fn render(&self, base: &str, variables: &[(&str, &str)]) -> Vec<ChatMessage>;
}

/// Optional system message followed by the substituted user message.
#[derive(Debug, Clone)]
pub struct DefaultPromptTemplate {
    system: Option<String>,
}

impl DefaultPromptTemplate {
    pub fn new() -> Self {
        Self {
            system: Some(DEFAULT_SYSTEM_PROMPT.to_string()),
        }
    }

    pub fn with_system(system: impl Into<String>) -> Self {
        Self {
            system: Some(system.into()),
        }
    }

    pub fn without_system() -> Self {
        Self { system: None }
    }
}

impl Default for DefaultPromptTemplate {
    fn default() -> Self {
        Self::new()
    }
}

impl PromptTemplate for DefaultPromptTemplate {
    fn render(&self, base: &str, variables: &[(&str, &str)]) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = self.system.as_deref() {
            messages.push(ChatMessage::system(system));
        }
        messages.push(ChatMessage::user(substitute(base, variables)));
        messages
    }
}

/// Replace `{name}` placeholders for the given variables in a single pass.
/// Unknown placeholders and stray braces are copied through untouched, and
/// substituted values are never rescanned.
pub fn substitute(base: &str, variables: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(base.len());
    let mut rest = base;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let replaced = after.find('}').and_then(|close| {
            let key = &after[..close];
            variables
                .iter()
                .find(|(name, _)| *name == key)
                .map(|(_, value)| (close, *value))
        });
        match replaced {
            Some((close, value)) => {
                out.push_str(value);
                rest = &after[close + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }

    out.push_str(rest);
    out
}
