use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value, json};

use crate::agent::Agent;
use crate::engine::Engine;
use crate::error::FlowError;
use crate::handler::{FunctionHandler, Handler, Operation};
use crate::llm::{AssistantMessage, ChatMessage, ModelPort, ToolCall, ToolSchema};
use crate::memory::{InMemoryStore, MemoryPort};
use crate::pipe::Pipe;
use crate::prompt::{DefaultPromptTemplate, PromptTemplate};
use crate::replay::ReplayModel;
use crate::result::{Outcome, StepOutcome};
use crate::step::ExecuteType;

/// Scripted model that also keeps the last user message of every request.
#[derive(Default)]
struct RecordingModel {
    replay: ReplayModel,
    judge_prompts: Mutex<Vec<String>>,
    tool_prompts: Mutex<Vec<String>>,
}

impl RecordingModel {
    fn judge_prompts(&self) -> Vec<String> {
        self.judge_prompts.lock().unwrap().clone()
    }

    fn tool_prompts(&self) -> Vec<String> {
        self.tool_prompts.lock().unwrap().clone()
    }
}

fn last_content(messages: &[ChatMessage]) -> String {
    messages.last().map(|m| m.content.clone()).unwrap_or_default()
}

#[async_trait]
impl ModelPort for RecordingModel {
    async fn chat_completion(&self, messages: &[ChatMessage]) -> anyhow::Result<Vec<String>> {
        self.judge_prompts.lock().unwrap().push(last_content(messages));
        self.replay.chat_completion(messages).await
    }

    async fn tool_completion(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSchema],
    ) -> anyhow::Result<Vec<AssistantMessage>> {
        self.tool_prompts.lock().unwrap().push(last_content(messages));
        self.replay.tool_completion(messages, tools).await
    }
}

fn call(name: &str, args: Value) -> ToolCall {
    ToolCall {
        name: name.to_string(),
        arguments: args.as_object().cloned().unwrap_or_else(Map::new),
    }
}

fn template() -> Arc<dyn PromptTemplate> {
    Arc::new(DefaultPromptTemplate::new())
}

/// Handler whose `emit` operation returns its `value` argument after an
/// optional delay and counts invocations.
fn emitter(name: &str, calls: Arc<AtomicUsize>) -> Arc<dyn Handler> {
    Arc::new(FunctionHandler::new(name).operation(Operation::asynchronous(
        "emit",
        "Return the given value",
        move |args| {
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                let delay = args.get("delay_ms").and_then(Value::as_u64).unwrap_or(0);
                if delay > 0 {
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                }
                Ok(args.get("value").cloned().unwrap_or(Value::Null))
            }
        },
    )))
}

fn emit(value: &str) -> ToolCall {
    call("emit", json!({ "value": value }))
}

fn judgement(reason: &str, result: Value, satisfied: bool) -> String {
    json!({ "reason": reason, "result": result, "is_goal_satisfied": satisfied }).to_string()
}

/// One agent with a single `emit` engine and its own scripted model.
fn solo_agent(name: &str, max_retry: usize) -> (Arc<RecordingModel>, Agent) {
    let model = Arc::new(RecordingModel::default());
    let engine = Engine::new(
        emitter("emitter", Arc::new(AtomicUsize::new(0))),
        model.clone(),
        template(),
    );
    let agent = Agent::builder(format!("goal of {name}"), "worker", model.clone(), template())
        .name(name)
        .max_retry(max_retry)
        .engine(engine)
        .build();
    (model, agent)
}

#[tokio::test]
async fn two_engine_agent_retries_until_judge_is_satisfied() {
    let model = Arc::new(RecordingModel::default());
    let calls = Arc::new(AtomicUsize::new(0));
    let e1 = Engine::new(emitter("first", calls.clone()), model.clone(), template());
    let e2 = Engine::new(emitter("second", calls.clone()), model.clone(), template());

    for _ in 0..2 {
        model.replay.push_tool_call(emit("A"));
        model.replay.push_tool_call(emit("B"));
    }
    model
        .replay
        .push_judgement(judgement("incomplete", Value::Null, false))
        .push_judgement(judgement("done", json!("A+B"), true));

    let mut agent = Agent::builder("combine letters", "writer", model.clone(), template())
        .max_retry(2)
        .build();
    agent.add(vec![e1, e2], ExecuteType::Sequence);

    let outcome = agent.execute("join A and B", None, None, false).await.unwrap();
    let result = match outcome {
        Outcome::Satisfied(result) => result,
        other => panic!("expected satisfied outcome, got {other:?}"),
    };
    assert_eq!(result.result, json!("A+B"));
    assert_eq!(result.reason.as_deref(), Some("done"));
    assert_eq!(model.replay.chat_calls(), 2);
    assert_eq!(model.replay.tool_calls(), 4);
    assert_eq!(calls.load(Ordering::SeqCst), 4);

    let prompts = model.judge_prompts();
    assert!(prompts[0].contains(r#"Output_Context: [["A"],["B"]]"#));
    assert!(prompts[0].contains("Feedback: \n"));
    assert!(prompts[1].contains("Feedback: incomplete"));
}

#[tokio::test]
async fn never_satisfied_agent_judges_exactly_max_retry_times() {
    let (model, agent) = solo_agent("stubborn", 3);
    for attempt in 1..=3 {
        model.replay.push_tool_call(emit("partial"));
        model
            .replay
            .push_judgement(judgement(&format!("try {attempt}"), Value::Null, false));
    }

    let outcome = agent.execute("q", None, None, false).await.unwrap();
    assert!(matches!(outcome, Outcome::Continue(_)));
    let result = outcome.into_goal_result();
    assert_eq!(result.reason.as_deref(), Some("try 3"));
    assert_eq!(result.is_goal_satisfied, Some(false));
    assert_eq!(model.replay.chat_calls(), 3);
}

#[tokio::test]
async fn satisfied_attempt_short_circuits_remaining_retries() {
    let (model, agent) = solo_agent("quick", 5);
    for _ in 0..5 {
        model.replay.push_tool_call(emit("value"));
    }
    model
        .replay
        .push_judgement(judgement("not yet", Value::Null, false))
        .push_judgement(judgement("got it", json!("value"), true));

    let outcome = agent.execute("q", None, None, false).await.unwrap();
    assert!(matches!(outcome, Outcome::Satisfied(_)));
    assert_eq!(model.replay.chat_calls(), 2);
    assert_eq!(model.replay.tool_calls(), 2);
    assert_eq!(model.replay.pending(), (3, 0));
}

#[tokio::test]
async fn malformed_judgement_is_recorded_and_retried() {
    let (model, agent) = solo_agent("confused", 2);
    model.replay.push_tool_call(emit("x")).push_tool_call(emit("x"));
    model
        .replay
        .push_judgement("The goal looks fine to me.")
        .push_judgement("```json\n{ \"reason\": \"half\", ```");

    let result = agent
        .execute("q", None, None, true)
        .await
        .unwrap()
        .into_goal_result();
    let error = result.error.as_deref().unwrap();
    assert!(error.starts_with("Cannot verify goal!\n"));
    assert_eq!(result.content.as_deref(), Some("{ \"reason\": \"half\","));
    assert_eq!(result.is_goal_satisfied, None);
    assert_eq!(model.replay.chat_calls(), 2);

    let prompts = model.judge_prompts();
    assert!(prompts[1].contains("Feedback: Cannot verify goal!"));
}

#[tokio::test]
async fn strict_agent_stops_on_explicit_unsatisfied_verdict() {
    let (model, agent) = solo_agent("strict", 4);
    model.replay.push_tool_call(emit("x"));
    model
        .replay
        .push_judgement(judgement("wrong answer", Value::Null, false));

    let outcome = agent.execute("q", None, None, true).await.unwrap();
    assert!(outcome.is_stopped());
    assert_eq!(outcome.goal_result().is_goal_satisfied, Some(false));
    assert_eq!(model.replay.chat_calls(), 1);
}

#[tokio::test]
async fn parallel_engines_keep_declared_order() {
    let model = Arc::new(RecordingModel::default());
    let calls = Arc::new(AtomicUsize::new(0));
    let slow = Engine::new(emitter("slow", calls.clone()), model.clone(), template());
    let fast = Engine::new(emitter("fast", calls.clone()), model.clone(), template());

    // Both requests are issued before either operation finishes, so queue
    // order follows declaration while completion order is reversed.
    model
        .replay
        .push_tool_call(call("emit", json!({"value": "slow", "delay_ms": 40})))
        .push_tool_call(call("emit", json!({"value": "fast", "delay_ms": 1})));
    model.replay.push_judgement(judgement("ok", Value::Null, true));

    let agent = Agent::builder("g", "r", model.clone(), template())
        .parallel(vec![slow, fast])
        .build();
    agent.execute("q", None, None, false).await.unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(model.judge_prompts()[0].contains(r#"Output_Context: [[["slow"],["fast"]]]"#));
}

#[tokio::test]
async fn parallel_agents_keep_declared_order_under_staggered_latency() {
    let mut models = Vec::new();
    let mut agents = Vec::new();
    for (name, delay) in [("alpha", 30u64), ("beta", 1), ("gamma", 15)] {
        let (model, agent) = solo_agent(name, 1);
        model
            .replay
            .push_tool_call(call("emit", json!({"value": name, "delay_ms": delay})));
        model.replay.push_judgement(judgement("ok", json!(name), true));
        models.push(model);
        agents.push(Arc::new(agent));
    }

    let pipe = Pipe::builder().parallel(agents).build();
    let outcomes = pipe.flow("who are you?").await.unwrap();

    assert_eq!(outcomes.len(), 1);
    let names = match &outcomes[0] {
        StepOutcome::Parallel(results) => results
            .iter()
            .map(|r| r.result.as_str().unwrap_or_default().to_string())
            .collect::<Vec<_>>(),
        other => panic!("expected a parallel outcome, got {other:?}"),
    };
    assert_eq!(names, vec!["alpha", "beta", "gamma"]);
    assert!(models.iter().all(|m| m.replay.chat_calls() == 1));
}

#[tokio::test]
async fn pipe_threads_prior_verdicts_into_later_steps() {
    let (first_model, first) = solo_agent("first", 1);
    first_model.replay.push_tool_call(emit("draft"));
    first_model
        .replay
        .push_judgement(judgement("first done", json!({"draft": 1}), true));

    let (second_model, second) = solo_agent("second", 1);
    second_model.replay.push_tool_call(emit("final"));
    second_model
        .replay
        .push_judgement(judgement("second done", json!("final"), true));

    let pipe = Pipe::builder()
        .agent(Arc::new(first))
        .agent(Arc::new(second))
        .build();
    let outcomes = pipe.flow("write it").await.unwrap();
    assert_eq!(outcomes.len(), 2);

    assert_eq!(first_model.tool_prompts(), vec!["write it".to_string()]);
    let second_prompt = &second_model.tool_prompts()[0];
    assert!(second_prompt.starts_with("write it\n\nReason: first done\nResult: \n"));
    assert!(second_prompt.contains("\"draft\": 1"));
    assert!(second_prompt.ends_with("Is Goal Satisfied: true\n\n"));
}

#[tokio::test]
async fn strict_pipe_returns_outcomes_through_the_stopping_step() {
    let (ok_model, ok) = solo_agent("ok", 3);
    ok_model.replay.push_tool_call(emit("fine"));
    ok_model.replay.push_judgement(judgement("fine", json!("fine"), true));

    let (bad_model, bad) = solo_agent("bad", 3);
    bad_model.replay.push_tool_call(emit("oops"));
    bad_model
        .replay
        .push_judgement(judgement("missing data", Value::Null, false));

    let (never_model, never) = solo_agent("never", 3);

    let mut pipe = Pipe::builder().stop_if_goal_not_satisfied(true).build();
    pipe.add(
        vec![Arc::new(ok), Arc::new(bad), Arc::new(never)],
        ExecuteType::Sequence,
    );

    let outcomes = pipe.flow("q").await.unwrap();
    assert_eq!(outcomes.len(), 2);
    let stopped = &outcomes[1].goal_results()[0];
    assert_eq!(stopped.name, "bad");
    assert_eq!(stopped.is_goal_satisfied, Some(false));
    assert_eq!(bad_model.replay.chat_calls(), 1);
    assert_eq!(never_model.replay.tool_calls(), 0);
}

#[tokio::test]
async fn stopped_parallel_member_stands_for_its_group() {
    let (ok_model, ok) = solo_agent("ok", 1);
    ok_model.replay.push_tool_call(emit("fine"));
    ok_model.replay.push_judgement(judgement("fine", json!("fine"), true));

    let (bad_model, bad) = solo_agent("bad", 1);
    bad_model.replay.push_tool_call(emit("oops"));
    bad_model.replay.push_judgement(judgement("nope", Value::Null, false));

    let (after_model, after) = solo_agent("after", 1);

    let pipe = Pipe::builder()
        .stop_if_goal_not_satisfied(true)
        .parallel(vec![Arc::new(ok), Arc::new(bad)])
        .agent(Arc::new(after))
        .build();
    let outcomes = pipe.flow("q").await.unwrap();

    assert_eq!(outcomes.len(), 1);
    match &outcomes[0] {
        StepOutcome::Single(result) => assert_eq!(result.name, "bad"),
        other => panic!("expected the stopped member alone, got {other:?}"),
    }
    assert_eq!(after_model.replay.tool_calls(), 0);
}

#[tokio::test]
async fn stopped_group_still_remembers_every_member() {
    let store = Arc::new(InMemoryStore::new());

    let (ok_model, ok) = solo_agent("ok", 1);
    ok_model.replay.push_tool_call(emit("fine"));
    ok_model
        .replay
        .push_judgement(judgement("done", json!("sibling-result"), true));

    let (bad_model, bad) = solo_agent("bad", 1);
    bad_model.replay.push_tool_call(emit("oops"));
    bad_model.replay.push_judgement(judgement("nope", Value::Null, false));

    let pipe = Pipe::builder()
        .stop_if_goal_not_satisfied(true)
        .memory(store.clone(), 5)
        .parallel(vec![Arc::new(ok), Arc::new(bad)])
        .build();
    let outcomes = pipe.flow("q").await.unwrap();

    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].goal_results()[0].name, "bad");

    let records = store.records();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].data, "\"sibling-result\"");
    assert_eq!(records[0].reason.as_deref(), Some("done"));
    assert_eq!(records[1].data, "null");
    assert_eq!(records[1].reason.as_deref(), Some("nope"));
}

#[tokio::test]
async fn lenient_pipe_keeps_going_after_unsatisfied_steps() {
    let (bad_model, bad) = solo_agent("bad", 1);
    bad_model.replay.push_tool_call(emit("oops"));
    bad_model.replay.push_judgement(judgement("nope", Value::Null, false));

    let (next_model, next) = solo_agent("next", 1);
    next_model.replay.push_tool_call(emit("ok"));
    next_model.replay.push_judgement(judgement("ok", json!("ok"), true));

    let pipe = Pipe::builder()
        .agent(Arc::new(bad))
        .agent(Arc::new(next))
        .build();
    let outcomes = pipe.flow("q").await.unwrap();
    assert_eq!(outcomes.len(), 2);
    assert!(outcomes[1].goal_results()[0].satisfied());
}

#[tokio::test]
async fn memory_round_trip_across_flows() {
    let store = Arc::new(InMemoryStore::new());
    let (model, agent) = solo_agent("weather", 1);
    for _ in 0..2 {
        model.replay.push_tool_call(emit("sunny"));
        model
            .replay
            .push_judgement(judgement("looked it up", json!({"city": "Nairobi", "sky": "sunny"}), true));
    }

    let pipe = Pipe::builder()
        .memory(store.clone(), 5)
        .agent(Arc::new(agent))
        .build();

    pipe.flow("weather in Nairobi").await.unwrap();
    assert_eq!(store.len(), 1);

    let (memory_id, chat_id) = pipe.memory_ids();
    let found = store
        .search("Nairobi weather", memory_id, chat_id, 5)
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(
        found[0].data,
        serde_json::to_string(&json!({"city": "Nairobi", "sky": "sunny"})).unwrap()
    );
    assert_eq!(found[0].reason.as_deref(), Some("looked it up"));

    pipe.flow("weather in Nairobi").await.unwrap();
    let prompts = model.tool_prompts();
    assert_eq!(prompts[0], "weather in Nairobi");
    assert!(prompts[1].starts_with("Context:\n{\"city\":\"Nairobi\""));
    assert!(prompts[1].ends_with("\nQuestion: weather in Nairobi"));
    assert_eq!(store.len(), 2);
}

#[tokio::test]
async fn memory_search_is_capped_by_the_pipe_limit() {
    let store = Arc::new(InMemoryStore::new());
    let (model, agent) = solo_agent("counter", 1);
    for turn in 0..4 {
        model.replay.push_tool_call(emit("tick"));
        model
            .replay
            .push_judgement(judgement("counted", json!(format!("turn {turn}")), true));
    }

    let pipe = Pipe::builder()
        .memory(store.clone(), 2)
        .agent(Arc::new(agent))
        .build();
    for _ in 0..4 {
        pipe.flow("count turns").await.unwrap();
    }

    let prompts = model.tool_prompts();
    let last = prompts.last().unwrap();
    assert_eq!(last.matches("turn ").count(), 2);
    assert!(last.contains("turn 2") && last.contains("turn 1"));
    assert_eq!(store.len(), 4);
}

#[tokio::test]
async fn handler_failures_abort_the_flow() {
    let model = Arc::new(RecordingModel::default());
    let handler: Arc<dyn Handler> = Arc::new(FunctionHandler::new("flaky").operation(
        Operation::sync("fetch", "Always fails", |_args| {
            Err(anyhow::anyhow!("connection refused"))
        }),
    ));
    model.replay.push_tool_call(call("fetch", json!({})));

    let agent = Agent::builder("g", "r", model.clone(), template())
        .max_retry(3)
        .engine(Engine::new(handler, model.clone(), template()))
        .build();
    let pipe = Pipe::builder().agent(Arc::new(agent)).build();

    let err = pipe.flow("q").await.unwrap_err();
    assert!(matches!(err, FlowError::Handler { ref operation, .. } if operation == "fetch"));
    assert_eq!(model.replay.chat_calls(), 0);
    assert_eq!(model.replay.tool_calls(), 1);
}

#[tokio::test]
async fn silent_model_is_a_tool_error_for_the_agent() {
    let (model, agent) = solo_agent("silent", 2);
    let err = agent.execute("q", None, None, false).await.unwrap_err();
    assert!(matches!(err, FlowError::ToolError(_)));
    assert_eq!(model.replay.chat_calls(), 0);
}

#[tokio::test]
async fn unresolvable_allow_list_fails_before_contacting_the_model() {
    let model = Arc::new(RecordingModel::default());
    let engine = Engine::new(
        emitter("emitter", Arc::new(AtomicUsize::new(0))),
        model.clone(),
        template(),
    )
    .with_tools(["emitter.missing"]);
    let agent = Agent::builder("g", "r", model.clone(), template())
        .engine(engine)
        .build();

    let err = agent.execute("q", None, None, false).await.unwrap_err();
    assert!(matches!(err, FlowError::InvalidHandler(ref name) if name == "emitter"));
    assert_eq!(model.replay.tool_calls(), 0);
}
