//! In-memory todo lists behind a single `handle` operation.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::handler::{Arguments, Handler, Operation, OperationRegistry, parameters_for};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Task {
    pub description: String,
    pub completed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TodoList {
    pub id: String,
    pub description: String,
    pub tasks: Vec<Task>,
}

impl TodoList {
    pub fn new(id: &str, description: &str, tasks: Vec<String>) -> Self {
        Self {
            id: id.to_string(),
            description: description.to_string(),
            tasks: tasks
                .into_iter()
                .map(|description| Task {
                    description,
                    completed: false,
                })
                .collect(),
        }
    }

    pub fn complete_task(&mut self, index: usize) -> bool {
        match self.tasks.get_mut(index) {
            Some(task) => {
                task.completed = true;
                true
            }
            None => false,
        }
    }

    pub fn completed_count(&self) -> usize {
        self.tasks.iter().filter(|t| t.completed).count()
    }
}

/// Closed set of actions the `handle` operation understands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TodoAction {
    Create,
    Complete,
    View,
    List,
    Delete,
    Unsupported(String),
}

impl From<&str> for TodoAction {
    fn from(action: &str) -> Self {
        match action.trim().to_ascii_lowercase().as_str() {
            "create" => TodoAction::Create,
            "complete" => TodoAction::Complete,
            "view" => TodoAction::View,
            "list" => TodoAction::List,
            "delete" => TodoAction::Delete,
            _ => TodoAction::Unsupported(action.to_string()),
        }
    }
}

#[derive(Debug, Default, Deserialize, JsonSchema)]
struct TodoArgs {
    /// One of create, complete, view, list, delete.
    action: String,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    tasks: Vec<String>,
    #[serde(default)]
    task_index: Option<usize>,
}

type Store = Arc<Mutex<BTreeMap<String, TodoList>>>;

pub struct TodoHandler {
    store: Store,
    registry: OperationRegistry,
}

impl TodoHandler {
    pub const NAME: &'static str = "todo";

    pub fn new() -> Self {
        let store: Store = Arc::default();
        let mut registry = OperationRegistry::new();
        let shared = Arc::clone(&store);
        registry.register(
            Operation::sync(
                "handle",
                "Manage todo lists. Actions: create (id, description, tasks), \
                 complete (id, task_index), view (id), list, delete (id).",
                move |args: Arguments| {
                    let args: TodoArgs = serde_json::from_value(Value::Object(args))?;
                    Ok(respond(&shared, args))
                },
            )
            .with_parameters(parameters_for::<TodoArgs>()),
        );
        Self { store, registry }
    }

    pub fn list(&self, id: &str) -> Option<TodoList> {
        self.store
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned()
    }
}

impl Default for TodoHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl Handler for TodoHandler {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn operations(&self) -> &OperationRegistry {
        &self.registry
    }
}

fn respond(store: &Store, args: TodoArgs) -> Value {
    let mut lists = store.lock().unwrap_or_else(|e| e.into_inner());
    let id = args.id.as_deref().unwrap_or("");

    match TodoAction::from(args.action.as_str()) {
        TodoAction::Create => {
            let id = if id.is_empty() { "untitled" } else { id };
            let todo = TodoList::new(id, args.description.as_deref().unwrap_or(""), args.tasks);
            let tasks = todo.tasks.len();
            lists.insert(id.to_string(), todo);
            json!({"status": "created", "id": id, "tasks": tasks})
        }
        TodoAction::Complete => {
            let Some(index) = args.task_index else {
                return json!({"error": "task_index is required to complete a task"});
            };
            match lists.get_mut(id).map(|todo| todo.complete_task(index)) {
                Some(true) => json!({"status": "completed", "id": id, "task_index": index}),
                Some(false) => json!({"error": format!("task index {index} out of range")}),
                None => json!({"error": format!("todo list '{id}' not found")}),
            }
        }
        TodoAction::View => match lists.get(id) {
            Some(todo) => json!({
                "id": todo.id,
                "description": todo.description,
                "tasks": todo.tasks,
                "completed": todo.completed_count(),
                "total": todo.tasks.len(),
            }),
            None => json!({"error": format!("todo list '{id}' not found")}),
        },
        TodoAction::List => json!({"todo_lists": lists.keys().collect::<Vec<_>>()}),
        TodoAction::Delete => match lists.remove(id) {
            Some(_) => json!({"status": "deleted", "id": id}),
            None => json!({"error": format!("todo list '{id}' not found")}),
        },
        TodoAction::Unsupported(action) => json!({
            "error": format!("unsupported action '{action}'. Use create|complete|view|list|delete")
        }),
    }
}
