//! Shared scaffolding for the end-to-end scenarios in `tests/scenarios.rs`
//! (S1-S7). A `MockProvider` plays back a scripted queue of turns or
//! errors instead of calling a real transport, mirroring the teacher's
//! `VecDeque`-backed mock transports.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use nexus_provider::{DeltaStream, InferenceError, InferenceProvider, InferenceRequest, StreamDelta};

/// One scripted turn: a sequence of deltas, yielded one at a time with an
/// optional delay between them so tests can interleave cancellation.
#[derive(Clone)]
pub struct ScriptedTurn {
    pub deltas: Vec<StreamDelta>,
    pub delay_between: Duration,
}

impl ScriptedTurn {
    pub fn new(deltas: Vec<StreamDelta>) -> Self {
        Self { deltas, delay_between: Duration::from_millis(0) }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay_between = delay;
        self
    }
}

pub enum Script {
    Turn(ScriptedTurn),
    Error(InferenceError),
}

/// A transport that serves a pre-scripted queue of turns/errors in order,
/// one per call to `stream()`. Panics if the queue is exhausted, since an
/// unexpected extra call means the orchestrator's auto-continue logic
/// diverged from what the scenario expects.
#[derive(Default)]
pub struct MockProvider {
    scripts: Mutex<VecDeque<Script>>,
    requests_seen: Mutex<Vec<InferenceRequest>>,
}

impl MockProvider {
    pub fn new(scripts: Vec<Script>) -> Self {
        Self { scripts: Mutex::new(scripts.into()), requests_seen: Mutex::new(Vec::new()) }
    }

    pub fn requests_seen(&self) -> Vec<InferenceRequest> {
        self.requests_seen.lock().unwrap().clone()
    }

    pub fn calls_remaining(&self) -> usize {
        self.scripts.lock().unwrap().len()
    }
}

#[async_trait]
impl InferenceProvider for MockProvider {
    async fn stream(&self, request: InferenceRequest) -> Result<DeltaStream, InferenceError> {
        self.requests_seen.lock().unwrap().push(request);
        let script = self.scripts.lock().unwrap().pop_front().expect("mock provider script exhausted");
        match script {
            Script::Error(err) => Err(err),
            Script::Turn(turn) => {
                let delay = turn.delay_between;
                let s = stream::iter(turn.deltas.into_iter().map(Ok)).then(move |item| async move {
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    item
                });
                Ok(s.boxed())
            }
        }
    }
}

pub fn text(s: impl Into<String>) -> StreamDelta {
    StreamDelta::TextDelta(s.into())
}
