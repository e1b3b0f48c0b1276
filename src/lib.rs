//! Goal-directed, multi-agent orchestration.
//!
//! Engines turn instructions into tool calls on a capability [`handler`];
//! agents run engine sequences and ask the model to judge the result against
//! a goal, retrying up to a bound; pipes chain agents, thread earlier verdicts
//! forward and optionally recall prior turns from a [`memory`] port.

pub mod agent;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod handler;
pub mod llm;
pub mod memory;
pub mod pipe;
pub mod prompt;
pub mod replay;
pub mod result;
pub mod step;
pub mod tools;

pub use agent::Agent;
pub use engine::Engine;
pub use error::{FlowError, Result};
pub use pipe::Pipe;
pub use result::{GoalResult, Outcome, StepOutcome};
pub use step::ExecuteType;

#[cfg(test)]
mod tests;
