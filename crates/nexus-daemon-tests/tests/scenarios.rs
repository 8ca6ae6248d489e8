//! End-to-end scenarios for the thread execution engine, run against a
//! scripted `MockProvider` instead of a real transport. Each test mirrors
//! one seed scenario: a single real-world path through compaction, dispatch,
//! auto-continue, and persistence, exercised together rather than per-crate.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use nexus_core::{
    InMemoryMessageStore, Message, MessageStore, ModelCapabilities, ModelDescriptor, ModelFamily, Pricing,
    StaticModelRegistry, Thread, ToolCall, ToolDescriptor,
};
use nexus_daemon::{AgentEvent, FinishReason, LoggingBillingSink, OrchestratorConfig, RunState, StaticProviderRouter, ThreadOrchestrator};
use nexus_daemon_tests::{text, MockProvider, Script, ScriptedTurn};
use nexus_provider::{InferenceError, StopReason, StreamDelta, Usage};
use nexus_tools::{ToolExecutor, ToolRegistry};
use serde_json::{json, Value};
use tokio::sync::mpsc::Receiver;
use tokio_util::sync::CancellationToken;

const MODEL: &str = "test-model";

fn model(context_window: u32) -> ModelDescriptor {
    ModelDescriptor {
        id: MODEL.into(),
        family: ModelFamily::Other,
        context_window,
        capabilities: ModelCapabilities { vision: false, native_tool_calls: true, prompt_caching: true, reasoning: false },
        pricing: Pricing::default(),
        transport_id: MODEL.into(),
    }
}

fn usage_delta() -> StreamDelta {
    StreamDelta::Usage(Usage { input_tokens: 10, output_tokens: 5, cache_read_tokens: 0, cache_creation_tokens: 0 })
}

struct Listing;
#[async_trait]
impl ToolExecutor for Listing {
    async fn invoke(&self, _arguments: &Value, _cancel: CancellationToken) -> Result<String, String> {
        Ok(json!({"files": ["a", "b"]}).to_string())
    }
}

struct Delayed(Duration, &'static str);
#[async_trait]
impl ToolExecutor for Delayed {
    async fn invoke(&self, _arguments: &Value, _cancel: CancellationToken) -> Result<String, String> {
        if !self.0.is_zero() {
            tokio::time::sleep(self.0).await;
        }
        Ok(self.1.to_string())
    }
}

fn orchestrator(
    provider: MockProvider,
    window: u32,
    tools: ToolRegistry,
    config: OrchestratorConfig,
) -> (Arc<ThreadOrchestrator>, Arc<InMemoryMessageStore>, Arc<MockProvider>) {
    let store = Arc::new(InMemoryMessageStore::new());
    let provider = Arc::new(provider);
    let models: Arc<dyn nexus_core::ModelRegistry> = Arc::new(StaticModelRegistry::new().with_model(model(window)));
    let providers: Arc<dyn nexus_daemon::ProviderRouter> = Arc::new(
        StaticProviderRouter::new().with_provider(MODEL, provider.clone() as Arc<dyn nexus_provider::InferenceProvider>),
    );
    let orchestrator = Arc::new(ThreadOrchestrator::new(
        store.clone(),
        models,
        providers,
        Arc::new(tools),
        Arc::new(LoggingBillingSink),
        None,
        config,
    ));
    (orchestrator, store, provider)
}

async fn drain(mut rx: Receiver<AgentEvent>) -> Vec<AgentEvent> {
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    events
}

fn content_text(events: &[AgentEvent]) -> String {
    events
        .iter()
        .filter_map(|e| match e {
            AgentEvent::Content(text) => Some(text.as_str()),
            _ => None,
        })
        .collect()
}

fn final_status(events: &[AgentEvent]) -> Option<(RunState, Option<FinishReason>)> {
    events.iter().rev().find_map(|e| match e {
        AgentEvent::Status { state, finish_reason } => Some((*state, *finish_reason)),
        _ => None,
    })
}

/// S1. Plain chat, no tools.
#[tokio::test]
async fn s1_plain_chat_no_tools() {
    let provider = MockProvider::new(vec![Script::Turn(ScriptedTurn::new(vec![
        text("Hi!"),
        usage_delta(),
        StreamDelta::Finish(StopReason::EndTurn),
    ]))]);
    let (orchestrator, store, _provider) = orchestrator(provider, 200_000, ToolRegistry::new(), OrchestratorConfig::default());

    let thread = Thread::new("acct-1");
    let rx = orchestrator.clone().run_thread(
        thread.clone(),
        "You are helpful.".into(),
        MODEL.into(),
        Some(Message::user(thread.id, "Hello")),
        CancellationToken::new(),
    );
    let events = drain(rx).await;

    assert_eq!(content_text(&events), "Hi!");
    assert_eq!(final_status(&events), Some((RunState::Completed, Some(FinishReason::Stop))));

    let history = store.list(thread.id, false).await.unwrap();
    assert_eq!(history.len(), 2, "user message plus one assistant reply");
    assert!(history[1].tool_calls.is_none());

    let last_usage = store.get_last_usage_record(thread.id).await.unwrap();
    assert!(last_usage.is_some());
}

/// S2. Single tool call, then a follow-up call answers it.
#[tokio::test]
async fn s2_single_tool_call_auto_continues() {
    let provider = MockProvider::new(vec![
        Script::Turn(ScriptedTurn::new(vec![
            StreamDelta::ToolCallStart { index: 0, id: "c1".into(), name: "sb_files_tool".into() },
            StreamDelta::ToolCallArgumentDelta { index: 0, partial_json: r#"{"action":"list"}"#.into() },
            StreamDelta::ToolCallComplete { index: 0 },
            usage_delta(),
            StreamDelta::Finish(StopReason::ToolUse),
        ])),
        Script::Turn(ScriptedTurn::new(vec![text("Done"), usage_delta(), StreamDelta::Finish(StopReason::EndTurn)])),
    ]);
    let tools = ToolRegistry::new().register(ToolDescriptor::new("sb_files_tool", json!({"name": "sb_files_tool"})), Listing);
    let (orchestrator, store, _provider) = orchestrator(provider, 200_000, tools, OrchestratorConfig::default());

    let thread = Thread::new("acct-1");
    let rx = orchestrator.clone().run_thread(
        thread.clone(),
        "You are helpful.".into(),
        MODEL.into(),
        Some(Message::user(thread.id, "list files")),
        CancellationToken::new(),
    );
    let events = drain(rx).await;

    assert_eq!(final_status(&events), Some((RunState::Completed, Some(FinishReason::Stop))));
    let tool_event = events.iter().find(|e| matches!(e, AgentEvent::Tool { .. })).expect("tool event emitted");
    if let AgentEvent::Tool { tool_call_id, is_error, .. } = tool_event {
        assert_eq!(tool_call_id, "c1");
        assert!(!is_error);
    }

    let history = store.list(thread.id, false).await.unwrap();
    // user, assistant(tool_calls=[c1]), tool(c1), assistant(text)
    assert_eq!(history.len(), 4);
    assert_eq!(history[2].tool_call_id.as_deref(), Some("c1"));
}

/// S3. Parallel tool calls in one turn, results stay in declared order.
#[tokio::test]
async fn s3_parallel_tool_calls_preserve_declared_order() {
    let provider = MockProvider::new(vec![
        Script::Turn(ScriptedTurn::new(vec![
            StreamDelta::ToolCallStart { index: 0, id: "c1".into(), name: "a".into() },
            StreamDelta::ToolCallComplete { index: 0 },
            StreamDelta::ToolCallStart { index: 1, id: "c2".into(), name: "b".into() },
            StreamDelta::ToolCallComplete { index: 1 },
            usage_delta(),
            StreamDelta::Finish(StopReason::ToolUse),
        ])),
        Script::Turn(ScriptedTurn::new(vec![text("ok"), usage_delta(), StreamDelta::Finish(StopReason::EndTurn)])),
    ]);
    let tools = ToolRegistry::new()
        .register(ToolDescriptor::new("a", json!({})).parallel_safe(), Delayed(Duration::from_millis(30), "slow"))
        .register(ToolDescriptor::new("b", json!({})).parallel_safe(), Delayed(Duration::ZERO, "fast"));
    let (orchestrator, store, _provider) = orchestrator(provider, 200_000, tools, OrchestratorConfig::default());

    let thread = Thread::new("acct-1");
    let rx = orchestrator.clone().run_thread(
        thread.clone(),
        "sys".into(),
        MODEL.into(),
        Some(Message::user(thread.id, "go")),
        CancellationToken::new(),
    );
    drain(rx).await;

    let history = store.list(thread.id, false).await.unwrap();
    let tool_messages: Vec<&Message> = history.iter().filter(|m| m.tool_call_id.is_some()).collect();
    assert_eq!(tool_messages[0].tool_call_id.as_deref(), Some("c1"), "c2 finishes first but c1 stays first");
    assert_eq!(tool_messages[1].tool_call_id.as_deref(), Some("c2"));

    let validation = nexus_compaction::validate(&history);
    assert!(validation.is_clean());
}

/// S4. Oversized history is compressed before the prompt is assembled.
#[tokio::test]
async fn s4_compression_triggered_on_oversized_history() {
    let provider = MockProvider::new(vec![Script::Turn(ScriptedTurn::new(vec![
        text("ack"),
        usage_delta(),
        StreamDelta::Finish(StopReason::EndTurn),
    ]))]);
    let (orchestrator, store, provider_handle) = orchestrator(provider, 100_000, ToolRegistry::new(), OrchestratorConfig::default());

    let thread = Thread::new("acct-1");
    let big_result = std::iter::repeat("x ").take(5_000).collect::<String>();
    for i in 0..40 {
        let call = ToolCall { id: format!("c{i}"), name: "x".into(), arguments: "{}".into() };
        store.append(thread.id, Message::assistant_with_tool_calls(thread.id, "", vec![call])).await.unwrap();
        store.append(thread.id, Message::tool_result(thread.id, format!("c{i}"), big_result.clone())).await.unwrap();
    }

    let rx = orchestrator.clone().run_thread(
        thread.clone(),
        "sys".into(),
        MODEL.into(),
        Some(Message::user(thread.id, "continue")),
        CancellationToken::new(),
    );
    drain(rx).await;

    let reqs = provider_handle.requests_seen();
    let prompt = &reqs[0].messages;
    let omitted_count = prompt
        .iter()
        .filter(|m| m["content"].as_str().is_some_and(|c| c.contains("[tool result omitted")))
        .count();
    assert!(omitted_count > 0, "older tool results should have been compressed before assembly");

    let recent_count = prompt
        .iter()
        .filter(|m| m["content"].as_str().is_some_and(|c| c == big_result))
        .count();
    assert!(recent_count <= 5, "only the most recent tool results should survive uncompressed");
}

/// S5. Orphaned tool result is detected, repaired, and persisted as omitted.
#[tokio::test]
async fn s5_orphaned_tool_result_is_repaired_and_persisted() {
    let provider = MockProvider::new(vec![Script::Turn(ScriptedTurn::new(vec![
        text("ok"),
        usage_delta(),
        StreamDelta::Finish(StopReason::EndTurn),
    ]))]);
    let (orchestrator, store, _provider) = orchestrator(provider, 200_000, ToolRegistry::new(), OrchestratorConfig::default());

    let thread = Thread::new("acct-1");
    store.append(thread.id, Message::tool_result(thread.id, "x", "orphaned result")).await.unwrap();

    let rx = orchestrator.clone().run_thread(
        thread.clone(),
        "sys".into(),
        MODEL.into(),
        Some(Message::user(thread.id, "hello")),
        CancellationToken::new(),
    );
    let events = drain(rx).await;
    assert_eq!(final_status(&events), Some((RunState::Completed, Some(FinishReason::Stop))));

    let history = store.list(thread.id, false).await.unwrap();
    let orphan = history.iter().find(|m| m.tool_call_id.as_deref() == Some("x")).unwrap();
    assert!(orphan.omitted, "orphaned tool result must be marked omitted, not deleted");
}

/// S6. A tool-pairing rejection triggers the strip-and-retry fallback.
#[tokio::test]
async fn s6_tool_pairing_error_falls_back_then_completes() {
    let provider = MockProvider::new(vec![
        Script::Error(InferenceError::ToolPairing("tool_call_id mismatch".into())),
        Script::Turn(ScriptedTurn::new(vec![text("recovered"), usage_delta(), StreamDelta::Finish(StopReason::EndTurn)])),
    ]);
    let (orchestrator, store, _provider) = orchestrator(provider, 200_000, ToolRegistry::new(), OrchestratorConfig::default());

    let thread = Thread::new("acct-1");
    let call = ToolCall { id: "c1".into(), name: "x".into(), arguments: "{}".into() };
    store.append(thread.id, Message::assistant_with_tool_calls(thread.id, "", vec![call])).await.unwrap();
    store.append(thread.id, Message::tool_result(thread.id, "c1", "result")).await.unwrap();

    let rx = orchestrator.clone().run_thread(
        thread.clone(),
        "sys".into(),
        MODEL.into(),
        Some(Message::user(thread.id, "hello")),
        CancellationToken::new(),
    );
    let events = drain(rx).await;

    assert_eq!(final_status(&events), Some((RunState::Completed, Some(FinishReason::Stop))));
    assert_eq!(content_text(&events), "recovered");
}

/// S7. Cancellation mid-stream stops the run without auto-continuing.
#[tokio::test]
async fn s7_cancellation_mid_stream_stops_cleanly() {
    let provider = MockProvider::new(vec![Script::Turn(
        ScriptedTurn::new(vec![
            text("one "),
            text("two "),
            text("three "),
            text("four "),
            text("five "),
            usage_delta(),
            StreamDelta::Finish(StopReason::EndTurn),
        ])
        .with_delay(Duration::from_millis(25)),
    )]);
    let (orchestrator, store, _provider) = orchestrator(provider, 200_000, ToolRegistry::new(), OrchestratorConfig::default());

    let thread = Thread::new("acct-1");
    let cancel = CancellationToken::new();
    let rx = orchestrator.clone().run_thread(
        thread.clone(),
        "sys".into(),
        MODEL.into(),
        Some(Message::user(thread.id, "hello")),
        cancel.clone(),
    );

    let cancel_task = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(70)).await;
        cancel.cancel();
    });

    let events = drain(rx).await;
    cancel_task.await.unwrap();

    assert_eq!(final_status(&events), Some((RunState::Stopped, None)));
    let chunks = events.iter().filter(|e| matches!(e, AgentEvent::Content(_))).count();
    assert!(chunks < 5, "stream should have been cut short, got {chunks} chunks");

    let history = store.list(thread.id, false).await.unwrap();
    assert_eq!(history.len(), 1, "only the user message is persisted; the cancelled turn is not");

    let usage = store.get_last_usage_record(thread.id).await.unwrap();
    assert!(usage.is_some(), "a best-effort usage report is still recorded on cancellation");
}
