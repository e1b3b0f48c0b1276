//! Capability handlers: named operation registries an engine can advertise and invoke.
//!
//! Each handler declares its operations up front (name, description, JSON
//! argument schema, callable). Synchronous and asynchronous callables are
//! stored behind the same boxed-future signature so engines await them
//! uniformly.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::{Map, Value, json};

pub type Arguments = Map<String, Value>;

type OperationFn = dyn Fn(Arguments) -> BoxFuture<'static, anyhow::Result<Value>> + Send + Sync;

/// One callable capability.
#[derive(Clone)]
pub struct Operation {
    name: String,
    description: String,
    parameters: Value,
    func: Arc<OperationFn>,
}

impl Operation {
    /// Wrap a blocking function. It runs inline on the calling task.
    pub fn sync<F>(name: impl Into<String>, description: impl Into<String>, func: F) -> Self
    where
        F: Fn(Arguments) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        let func = Arc::new(func);
        Self {
            name: name.into(),
            description: description.into(),
            parameters: empty_parameters(),
            func: Arc::new(move |args: Arguments| -> BoxFuture<'static, anyhow::Result<Value>> {
                let func = Arc::clone(&func);
                Box::pin(async move { func(args) })
            }),
        }
    }

    pub fn asynchronous<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        func: F,
    ) -> Self
    where
        F: Fn(Arguments) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: empty_parameters(),
            func: Arc::new(move |args: Arguments| -> BoxFuture<'static, anyhow::Result<Value>> {
                Box::pin(func(args))
            }),
        }
    }

    /// Replace the default no-argument schema.
    pub fn with_parameters(mut self, parameters: Value) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn parameters(&self) -> &Value {
        &self.parameters
    }

    pub async fn call(&self, args: Arguments) -> anyhow::Result<Value> {
        (self.func)(args).await
    }
}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operation")
            .field("name", &self.name)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

fn empty_parameters() -> Value {
    json!({ "type": "object", "properties": {} })
}

/// JSON schema for an argument struct, as advertised to the model.
pub fn parameters_for<T: schemars::JsonSchema>() -> Value {
    serde_json::to_value(schemars::schema_for!(T)).unwrap_or_else(|_| empty_parameters())
}

/// Operations in declaration order.
#[derive(Debug, Clone, Default)]
pub struct OperationRegistry {
    operations: Vec<Operation>,
}

impl OperationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an operation; a later registration with the same name replaces the earlier one.
    pub fn register(&mut self, operation: Operation) {
        if let Some(existing) = self
            .operations
            .iter_mut()
            .find(|existing| existing.name == operation.name)
        {
            *existing = operation;
        } else {
            self.operations.push(operation);
        }
    }

    pub fn get(&self, name: &str) -> Option<&Operation> {
        self.operations.iter().find(|op| op.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Operation> {
        self.operations.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.operations.iter().map(|op| op.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

/// A named external integration exposing a fixed set of operations.
pub trait Handler: Send + Sync {
    fn name(&self) -> &str;
    fn operations(&self) -> &OperationRegistry;
}

/// A handler assembled from loose operations.
#[derive(Debug, Clone)]
pub struct FunctionHandler {
    name: String,
    registry: OperationRegistry,
}

impl FunctionHandler {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            registry: OperationRegistry::new(),
        }
    }

    pub fn operation(mut self, operation: Operation) -> Self {
        self.registry.register(operation);
        self
    }
}

impl Handler for FunctionHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn operations(&self) -> &OperationRegistry {
        &self.registry
    }
}
