use thiserror::Error;

/// Failures surfaced by engines, agents and pipes.
///
/// Unsatisfied goal judgements and early stops are not errors; they travel
/// as [`crate::result::Outcome`] values.
#[derive(Debug, Error)]
pub enum FlowError {
    #[error("invalid handler '{0}': no callable operations resolved")]
    InvalidHandler(String),

    #[error("tool error: {0}")]
    ToolError(String),

    #[error("operation '{operation}' failed: {error:#}")]
    Handler {
        operation: String,
        error: anyhow::Error,
    },

    #[error("model port failed: {0:#}")]
    Model(anyhow::Error),

    #[error("memory port failed: {0:#}")]
    Memory(anyhow::Error),
}

pub type Result<T, E = FlowError> = std::result::Result<T, E>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Config,
    Model,
    Tooling,
    Input,
    Internal,
}

impl ErrorCategory {
    pub fn code(self) -> &'static str {
        match self {
            ErrorCategory::Config => "CONFIG",
            ErrorCategory::Model => "MODEL",
            ErrorCategory::Tooling => "TOOLING",
            ErrorCategory::Input => "INPUT",
            ErrorCategory::Internal => "INTERNAL",
        }
    }

    pub fn hint(self) -> &'static str {
        match self {
            ErrorCategory::Config => {
                "Check --config and the [pipe]/[agents] tables; run goalflow validate for details."
            }
            ErrorCategory::Model => {
                "Check the replay script passed with --script; every step needs a scripted response."
            }
            ErrorCategory::Tooling => {
                "Run goalflow handlers to list operations and retry with RUST_LOG=debug for tool logs."
            }
            ErrorCategory::Input => "Run goalflow --help and correct command arguments.",
            ErrorCategory::Internal => {
                "Retry with --verbose. If it persists, capture logs and open an issue."
            }
        }
    }
}

pub fn categorize_error(err: &anyhow::Error) -> ErrorCategory {
    if let Some(flow) = err.downcast_ref::<FlowError>() {
        return match flow {
            FlowError::InvalidHandler(_) | FlowError::ToolError(_) | FlowError::Handler { .. } => {
                ErrorCategory::Tooling
            }
            FlowError::Model(_) => ErrorCategory::Model,
            FlowError::Memory(_) => ErrorCategory::Internal,
        };
    }

    let msg = format!("{err:#}").to_ascii_lowercase();

    if msg.contains("pipeline")
        || msg.contains("config")
        || msg.contains("unknown agent")
        || msg.contains("unknown handler")
    {
        return ErrorCategory::Config;
    }

    if msg.contains("script") || msg.contains("model") {
        return ErrorCategory::Model;
    }

    if msg.contains("invalid value")
        || msg.contains("unknown argument")
        || msg.contains("query cannot be empty")
    {
        return ErrorCategory::Input;
    }

    if msg.contains("tool") || msg.contains("handler") || msg.contains("operation") {
        return ErrorCategory::Tooling;
    }

    ErrorCategory::Internal
}

pub fn format_cli_error(err: &anyhow::Error) -> String {
    let category = categorize_error(err);
    format!("[{}] {:#}\nHint: {}", category.code(), err, category.hint())
}
