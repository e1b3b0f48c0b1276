//! Built-in capability handlers available to configured pipelines.

pub mod clock;
pub mod todo;

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::handler::Handler;

pub use clock::ClockHandler;
pub use todo::{TodoAction, TodoHandler};

/// Handlers addressable by name from a pipeline file.
pub fn build_builtin_handlers() -> BTreeMap<String, Arc<dyn Handler>> {
    let handlers: Vec<Arc<dyn Handler>> = vec![
        Arc::new(ClockHandler::new()),
        Arc::new(TodoHandler::new()),
    ];
    handlers
        .into_iter()
        .map(|handler| (handler.name().to_string(), handler))
        .collect()
}
