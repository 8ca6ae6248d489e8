use std::sync::Arc;
use std::time::Duration;

use nexus_compaction::{assemble, compress, repair, strip_tool_content, validate, AssemblerConfig, CompressionConfig};
use nexus_core::{AgentRun, Message, MessageStore, ModelRegistry, RunStatus, Thread, UsageReport};
use nexus_provider::{InferenceProvider, InferenceRequest};
use nexus_tools::{DispatchConfig, ToolRegistry};
use nexus_pricing::{NoExactCounter, TokenAccountant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::billing::BillingSink;
use crate::continue_ctrl::{classify_for_retry, decide_after_finish, AutoContinueConfig, ErrorAction, ErrorRetryState};
use crate::error::OrchestratorError;
use crate::event::{AgentEvent, RunState};
use crate::memory::MemoryProvider;
use crate::stream::{process_stream, StreamConfig, StreamEnd};

/// Resolves a model id to the transport that serves it (§6 EXTERNAL
/// INTERFACES). Not named as its own component in spec.md, but required
/// plumbing the moment more than one provider (Anthropic, Bedrock) is
/// registered against one orchestrator, which model-fallback (§4.6) always
/// implies.
pub trait ProviderRouter: Send + Sync {
    fn resolve(&self, model_id: &str) -> Option<Arc<dyn InferenceProvider>>;
}

/// A fixed map from model id to provider, built once at startup.
#[derive(Default)]
pub struct StaticProviderRouter {
    providers: std::collections::HashMap<String, Arc<dyn InferenceProvider>>,
}

impl StaticProviderRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_provider(mut self, model_id: impl Into<String>, provider: Arc<dyn InferenceProvider>) -> Self {
        self.providers.insert(model_id.into(), provider);
        self
    }
}

impl ProviderRouter for StaticProviderRouter {
    fn resolve(&self, model_id: &str) -> Option<Arc<dyn InferenceProvider>> {
        self.providers.get(model_id).cloned()
    }
}

#[derive(Clone)]
pub struct OrchestratorConfig {
    pub auto_continue: AutoContinueConfig,
    pub stream: StreamConfig,
    pub dispatch: DispatchConfig,
    pub compression: CompressionConfig,
    pub assembler: AssemblerConfig,
    /// Model to switch to on repeated `Overload` errors (§4.6).
    pub fallback_model_id: Option<String>,
    /// Model to switch to when the thread has images but the current model
    /// lacks vision support (§4.7, re-evaluated every iteration).
    pub vision_fallback_model_id: Option<String>,
    pub history_fetch_timeout: Duration,
    pub last_usage_fetch_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            auto_continue: AutoContinueConfig::default(),
            stream: StreamConfig::default(),
            dispatch: DispatchConfig::default(),
            compression: CompressionConfig::default(),
            assembler: AssemblerConfig::default(),
            fallback_model_id: None,
            vision_fallback_model_id: None,
            history_fetch_timeout: Duration::from_secs(10),
            last_usage_fetch_timeout: Duration::from_secs(5),
        }
    }
}

/// Public entry point (§4.7). Owns nothing about any one run — all
/// per-run state lives on the stack of `run_inner`; the orchestrator
/// itself is safely shared across concurrently-running threads (§5).
pub struct ThreadOrchestrator {
    store: Arc<dyn MessageStore>,
    models: Arc<dyn ModelRegistry>,
    providers: Arc<dyn ProviderRouter>,
    tools: Arc<ToolRegistry>,
    billing: Arc<dyn BillingSink>,
    memory: Option<Arc<dyn MemoryProvider>>,
    counter: TokenAccountant<Arc<dyn ModelRegistry>, NoExactCounter>,
    config: OrchestratorConfig,
}

impl ThreadOrchestrator {
    pub fn new(
        store: Arc<dyn MessageStore>,
        models: Arc<dyn ModelRegistry>,
        providers: Arc<dyn ProviderRouter>,
        tools: Arc<ToolRegistry>,
        billing: Arc<dyn BillingSink>,
        memory: Option<Arc<dyn MemoryProvider>>,
        config: OrchestratorConfig,
    ) -> Self {
        let counter = TokenAccountant::new(models.clone());
        Self { store, models, providers, tools, billing, memory, counter, config }
    }

    /// `run_thread(thread, system_prompt, model, user_message?, cancel) ->
    /// event stream` (§4.7). Spawns the bounded auto-continue loop in the
    /// background and returns immediately with the receiving half of a
    /// bounded channel, so the caller gets backpressure for free (§5).
    pub fn run_thread(
        self: Arc<Self>,
        thread: Thread,
        system_prompt: String,
        model_id: String,
        user_message: Option<Message>,
        cancel: CancellationToken,
    ) -> mpsc::Receiver<AgentEvent> {
        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(async move {
            if let Err(err) = self.run_inner(thread, system_prompt, model_id, user_message, cancel, tx.clone()).await {
                let _ = tx.send(AgentEvent::Error { message: err.to_string() }).await;
                let _ = tx.send(AgentEvent::Status { state: RunState::Error, finish_reason: None }).await;
            }
        });
        rx
    }

    async fn run_inner(
        &self,
        thread: Thread,
        system_prompt: String,
        model_id: String,
        user_message: Option<Message>,
        cancel: CancellationToken,
        events: mpsc::Sender<AgentEvent>,
    ) -> Result<(), OrchestratorError> {
        // The run record (§3): carries the state that is specific to *this*
        // invocation (model in use, iteration count, terminal status) for
        // the lifetime of the call. Everything else the loop touches either
        // lives on the durable message store (`history`) or is per-call
        // scratch (`retry_state`) that doesn't outlive one transport error.
        let mut run = AgentRun::new(thread.id, model_id);

        if cancel.is_cancelled() {
            run.status = RunStatus::Stopped;
            let _ = events.send(AgentEvent::Status { state: RunState::Stopped, finish_reason: None }).await;
            return Ok(());
        }

        let new_user_tokens = user_message.as_ref().and_then(|m| m.content.as_text()).map(estimate_words).unwrap_or(0);
        if let Some(message) = user_message {
            self.store.append(thread.id, message).await?;
        }

        // Prefetch (§4.7): history and last-usage record, each individually
        // timeout-bounded so a slow store can't hang the whole run. The
        // last-usage record feeds the fast path below: it lets the first
        // iteration skip a full recount when the prior turn was already
        // comfortably under budget and this turn only grew by one short
        // user message.
        let (history_result, last_usage_result) = tokio::join!(
            tokio::time::timeout(self.config.history_fetch_timeout, self.store.list(thread.id, false)),
            tokio::time::timeout(self.config.last_usage_fetch_timeout, self.store.get_last_usage_record(thread.id)),
        );
        let mut history = history_result.map_err(|_| OrchestratorError::Store(nexus_core::StoreError::Timeout(self.config.history_fetch_timeout)))??;
        let last_usage = last_usage_result.ok().and_then(Result::ok).flatten();

        let mut retry_state = ErrorRetryState::new(self.config.auto_continue.max_error_retries);

        while run.iterations < self.config.auto_continue.max_iterations {
            let iteration = run.iterations;
            run.iterations += 1;

            if cancel.is_cancelled() {
                run.status = RunStatus::Stopped;
                let _ = events.send(AgentEvent::Status { state: RunState::Stopped, finish_reason: None }).await;
                return Ok(());
            }

            if !self.billing.has_sufficient_credits(&thread.account_id).await {
                run.status = RunStatus::Stopped;
                let _ = events.send(AgentEvent::Status { state: RunState::Stopped, finish_reason: None }).await;
                return Ok(());
            }

            // Vision-model switching is re-evaluated fresh every iteration
            // (§4.7 supplemented detail) since auto-continue can run many
            // turns after the image that triggered it was sent.
            if thread.metadata.has_images && !self.models.supports_vision(&run.model_id) {
                if let Some(vision_model) = &self.config.vision_fallback_model_id {
                    if vision_model != &run.model_id {
                        info!(model_id = %run.model_id, vision_model, "switching to vision-capable model for this run");
                        run.model_id = vision_model.clone();
                    }
                }
            }

            let model = self.models.get(&run.model_id).ok_or_else(|| OrchestratorError::UnknownModel(run.model_id.clone()))?;
            let provider =
                self.providers.resolve(&run.model_id).ok_or_else(|| OrchestratorError::NoProvider(run.model_id.clone()))?;

            let validation = validate(&history);
            if !validation.is_clean() {
                warn!(?validation, "pairing violation detected, repairing before prompt assembly");
                let repaired = repair(&history);
                if !repaired.omitted_tool_call_ids.is_empty() {
                    self.store.mark_tool_results_omitted(thread.id, &repaired.omitted_tool_call_ids).await?;
                }
                if !repaired.removed_call_ids.is_empty() {
                    self.store.remove_tool_calls_from_assistants(thread.id, &repaired.removed_call_ids).await?;
                }
                if !repaired.omitted_tool_call_ids.is_empty() || !repaired.removed_call_ids.is_empty() {
                    self.store.invalidate_cache(thread.id).await?;
                }
                history = repaired.messages;
            }

            // Fast path (§4.7): on the first iteration, the prior turn's
            // exact usage plus a rough estimate of what's new this turn
            // tells us whether we're comfortably under budget without
            // walking the whole history again. Only ever used to *skip*
            // work — if it's inconclusive or this isn't the first
            // iteration, fall through to the full count below.
            let fast_path_clear = iteration == 0
                && last_usage
                    .as_ref()
                    .is_some_and(|usage| is_comfortably_under_budget(usage, new_user_tokens, model.max_tokens()));

            if fast_path_clear {
                debug!(model_id = %run.model_id, "fast path: prior usage comfortably under budget, skipping compression check");
            } else {
                // Generic-tokenizer counting walks every message's text; for
                // large histories that's enough CPU work to stall the
                // cooperative scheduler, so it and the (potentially
                // iterative) compression pass both run on the blocking pool
                // rather than inline here.
                let counter = self.counter.clone();
                let wire = nexus_compaction::to_wire_messages(&history);
                let system_for_count = system_prompt.clone();
                let model_id_for_count = run.model_id.clone();
                let current_tokens = tokio::task::spawn_blocking(move || {
                    counter.count(&model_id_for_count, &wire, Some(&system_for_count))
                })
                .await
                .map_err(|e| OrchestratorError::Compute(e.to_string()))?;
                if current_tokens > model.max_tokens() {
                    let counter = self.counter.clone();
                    let model_for_compress = model.clone();
                    let system_for_compress = system_prompt.clone();
                    let config_for_compress = self.config.compression.clone();
                    history = tokio::task::spawn_blocking(move || {
                        compress(history, &model_for_compress, &counter, Some(&system_for_compress), &config_for_compress)
                    })
                    .await
                    .map_err(|e| OrchestratorError::Compute(e.to_string()))?;
                    self.store.set_cache_needs_rebuild(thread.id, true).await?;
                }
            }

            let memory_block = match &self.memory {
                Some(provider) => provider.fetch_block(thread.id).await,
                None => None,
            };

            // Late safety net (§4.7 step 7): the memory block is only known
            // after the check above, so it's possible adding it crosses the
            // limit even though history alone didn't. Count once more with
            // the memory block included and compress again if needed, before
            // committing to the final assembly below.
            let counter = self.counter.clone();
            let mut with_memory = memory_block.clone().into_iter().collect::<Vec<_>>();
            with_memory.extend(history.iter().cloned());
            let wire = nexus_compaction::to_wire_messages(&with_memory);
            let system_for_count = system_prompt.clone();
            let model_id_for_count = run.model_id.clone();
            let assembled_tokens = tokio::task::spawn_blocking(move || {
                counter.count(&model_id_for_count, &wire, Some(&system_for_count))
            })
            .await
            .map_err(|e| OrchestratorError::Compute(e.to_string()))?;
            if assembled_tokens > model.max_tokens() {
                let counter = self.counter.clone();
                let model_for_compress = model.clone();
                let system_for_compress = system_prompt.clone();
                let config_for_compress = self.config.compression.clone();
                history = tokio::task::spawn_blocking(move || {
                    compress(history, &model_for_compress, &counter, Some(&system_for_compress), &config_for_compress)
                })
                .await
                .map_err(|e| OrchestratorError::Compute(e.to_string()))?;
                self.store.set_cache_needs_rebuild(thread.id, true).await?;
            }

            let cache_needs_rebuild = self.store.get_cache_needs_rebuild(thread.id).await?;
            let supports_caching = model.capabilities.prompt_caching && !cache_needs_rebuild;
            let assembled = assemble(Some(&system_prompt), memory_block.as_ref(), &history, supports_caching, &self.config.assembler)?;
            if cache_needs_rebuild {
                self.store.set_cache_needs_rebuild(thread.id, false).await?;
            }

            let mut request = InferenceRequest::new(model.transport_id.clone(), assembled.messages);
            request.system = assembled.system;
            request.tools = self.tools.schemas();
            request.max_tokens = Some(model.context_window.saturating_sub(model.max_tokens()).max(4096));
            if config_wants_xml_stop(&self.config.stream) {
                request.stop_sequences.push(crate::stream::XML_STOP_SEQUENCE.to_string());
            }

            let stream_result = provider.stream(request).await;
            let stream = match stream_result {
                Ok(stream) => stream,
                Err(err) => {
                    match classify_for_retry(&err, &mut retry_state, self.config.fallback_model_id.as_deref()) {
                        ErrorAction::Terminate => {
                            run.status = RunStatus::Failed;
                            return Err(OrchestratorError::Transport(err));
                        }
                        ErrorAction::RetryWithToolFallback => {
                            history = strip_tool_content(&history);
                            continue;
                        }
                        ErrorAction::RetryWithModelSwap { fallback_model_id } => {
                            run.model_id = fallback_model_id;
                            continue;
                        }
                        ErrorAction::RetryTransient => continue,
                    }
                }
            };

            let processed = process_stream(thread.id, stream, &self.tools, &self.config.dispatch, &self.config.stream, &cancel, &events).await;
            let processed = match processed {
                Ok(p) => p,
                Err(err) => {
                    match classify_for_retry(&err, &mut retry_state, self.config.fallback_model_id.as_deref()) {
                        ErrorAction::Terminate => {
                            run.status = RunStatus::Failed;
                            return Err(OrchestratorError::Transport(err));
                        }
                        ErrorAction::RetryWithToolFallback => {
                            history = strip_tool_content(&history);
                            continue;
                        }
                        ErrorAction::RetryWithModelSwap { fallback_model_id } => {
                            run.model_id = fallback_model_id;
                            continue;
                        }
                        ErrorAction::RetryTransient => continue,
                    }
                }
            };

            let turn = match processed {
                StreamEnd::Cancelled { partial_text, usage_so_far } => {
                    debug!(partial_chars = partial_text.chars().count(), "stream cancelled mid-turn");
                    let report = self.usage_report(&usage_so_far, &run.model_id);
                    self.billing.record(&thread.account_id, thread.id, None, &report).await;
                    self.store.record_usage(thread.id, report).await?;
                    run.status = RunStatus::Stopped;
                    let _ = events.send(AgentEvent::Status { state: RunState::Stopped, finish_reason: None }).await;
                    return Ok(());
                }
                StreamEnd::Finished(turn) => turn,
            };

            let message_id = self.store.append(thread.id, turn.assistant.clone()).await?;
            history.push(turn.assistant);
            for result in &turn.tool_results {
                self.store.append(thread.id, result.clone()).await?;
            }
            history.extend(turn.tool_results);

            let report = self.usage_report(&turn.usage, &run.model_id);
            self.billing.record(&thread.account_id, thread.id, Some(message_id), &report).await;
            self.store.record_usage(thread.id, report).await?;

            let decision = decide_after_finish(turn.finish_reason);
            retry_state = ErrorRetryState::new(self.config.auto_continue.max_error_retries);

            if !decision.should_continue {
                run.status = RunStatus::Completed;
                let _ = events
                    .send(AgentEvent::Status { state: RunState::Completed, finish_reason: decision.terminal_finish_reason })
                    .await;
                return Ok(());
            }

            if iteration + 1 == self.config.auto_continue.max_iterations {
                let _ = events
                    .send(AgentEvent::Content(format!(
                        "\n[stopped: reached the {}-iteration auto-continue cap]",
                        self.config.auto_continue.max_iterations
                    )))
                    .await;
            }
        }

        run.status = RunStatus::Stopped;
        let _ = events.send(AgentEvent::Status { state: RunState::Stopped, finish_reason: None }).await;
        Ok(())
    }

    fn usage_report(&self, usage: &nexus_provider::Usage, model_id: &str) -> UsageReport {
        UsageReport {
            prompt_tokens: usage.input_tokens,
            completion_tokens: usage.output_tokens,
            cache_read_tokens: usage.cache_read_tokens,
            cache_creation_tokens: usage.cache_creation_tokens,
            model_id: model_id.to_string(),
            message_id: None,
            estimated: false,
            fallback: false,
        }
    }
}

fn config_wants_xml_stop(config: &StreamConfig) -> bool {
    config.xml_tool_calling
}

/// How much headroom to reserve, beyond the new user message itself, for
/// the memory block the fast path can't see yet (it runs before the
/// memory fetch). A coarse constant rather than a real estimate — if the
/// memory provider ever emits something larger than this, the late safety
/// net after assembly (§4.7 step 7) still catches it.
const FAST_PATH_MEMORY_HEADROOM: u32 = 2_000;

/// §4.7's fast path: `prior total_tokens + new_user_tokens + memory_tokens
/// comfortably under max_tokens`. "Comfortably" is read as leaving the
/// same 0.6 hysteresis margin compression itself targets, so a turn that
/// passes here wouldn't have triggered compression anyway.
fn is_comfortably_under_budget(last_usage: &UsageReport, new_user_tokens: u32, max_tokens: u32) -> bool {
    let projected = last_usage.total_tokens() + new_user_tokens + FAST_PATH_MEMORY_HEADROOM;
    let comfortable_ceiling = (max_tokens as f64 * 0.6) as u32;
    projected < comfortable_ceiling
}

/// A cheap word-count estimate (§4.1 tier 3) of one short piece of text —
/// used only to size the fast-path projection above, never for billing.
fn estimate_words(text: &str) -> u32 {
    (text.split_whitespace().count() as f64 * 1.3).ceil() as u32
}
