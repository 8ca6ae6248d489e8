//! Interactive REPL for the thread execution engine.
//!
//! Usage:
//!   ANTHROPIC_API_KEY=sk-... cargo run --bin nexus -- --model claude-sonnet-4-20250514
//!
//! This is a development convenience, not a wire surface (§6) — there is
//! no HTTP server here, just stdin/stdout piped through the same
//! `ThreadOrchestrator` a real frontend would drive over its own protocol.
//!
//! Ctrl-C or type "exit" / "quit" to leave.

use std::io::{self, BufRead, Write};
use std::sync::Arc;

use nexus_anthropic::AnthropicProvider;
use nexus_core::{InMemoryMessageStore, Message, StaticModelRegistry, Thread};
use nexus_daemon::{AgentEvent, LoggingBillingSink, OrchestratorConfig, RunState, StaticProviderRouter, ThreadOrchestrator};
use nexus_tools::ToolRegistry;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .with_target(false)
        .init();

    let model_id = std::env::var("NEXUS_MODEL").unwrap_or_else(|_| "claude-sonnet-4-20250514".to_string());
    let api_key = std::env::var("ANTHROPIC_API_KEY").unwrap_or_else(|_| {
        eprintln!("error: ANTHROPIC_API_KEY not set");
        std::process::exit(1);
    });

    let store = Arc::new(InMemoryMessageStore::new());
    let models: Arc<dyn nexus_core::ModelRegistry> = Arc::new(StaticModelRegistry::seeded());
    let provider: Arc<dyn nexus_provider::InferenceProvider> = Arc::new(AnthropicProvider::new(api_key));
    let providers: Arc<dyn nexus_daemon::ProviderRouter> =
        Arc::new(StaticProviderRouter::new().with_provider(model_id.clone(), provider));
    let tools = Arc::new(ToolRegistry::new());
    let billing = Arc::new(LoggingBillingSink);

    let orchestrator = Arc::new(ThreadOrchestrator::new(
        store.clone(),
        models,
        providers,
        tools,
        billing,
        None,
        OrchestratorConfig::default(),
    ));

    let thread = Thread::new("demo-account");
    let system_prompt = "You are a helpful assistant.".to_string();

    eprintln!("nexus-daemon demo");
    eprintln!("model: {model_id}");
    eprintln!("thread: {}", thread.id);
    eprintln!("---");

    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();

    loop {
        eprint!("\x1b[1;36myou>\x1b[0m ");
        io::stderr().flush().ok();

        let line = match lines.next() {
            Some(Ok(line)) => line,
            _ => break,
        };

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if matches!(trimmed, "exit" | "quit" | "/q") {
            break;
        }

        let user_message = Message::user(thread.id, trimmed);
        let cancel = CancellationToken::new();
        let mut events = orchestrator.clone().run_thread(
            thread.clone(),
            system_prompt.clone(),
            model_id.clone(),
            Some(user_message),
            cancel,
        );

        eprint!("\x1b[1;32magent>\x1b[0m ");
        while let Some(event) = events.recv().await {
            match event {
                AgentEvent::Content(text) => {
                    print!("{text}");
                    io::stdout().flush().ok();
                }
                AgentEvent::Tool { name, result, is_error, .. } => {
                    let tag = if is_error { "error" } else { "result" };
                    let truncated = if result.len() > 200 { format!("{}...", &result[..200]) } else { result };
                    eprintln!("\n\x1b[33m  [{tag}: {name}]\x1b[0m {truncated}");
                }
                AgentEvent::Status { state, finish_reason } => {
                    if state != RunState::Running {
                        eprintln!("\n\x1b[2m  [{state:?} {finish_reason:?}]\x1b[0m");
                    }
                }
                AgentEvent::Error { message } => {
                    eprintln!("\n\x1b[1;31merror:\x1b[0m {message}");
                }
            }
        }
        println!();
    }

    eprintln!("bye.");
    Ok(())
}
