use nexus_provider::InferenceError;

use crate::event::FinishReason;

/// Bounded-loop tuning (§4.6). Defaults mirror `thread_manager.py`'s
/// constants: 25 native auto-continue iterations, 3 error retries.
#[derive(Debug, Clone)]
pub struct AutoContinueConfig {
    pub max_iterations: u32,
    pub max_error_retries: u32,
}

impl Default for AutoContinueConfig {
    fn default() -> Self {
        Self {
            max_iterations: 25,
            max_error_retries: 3,
        }
    }
}

/// Whether the Thread Orchestrator should make another LLM call after a
/// turn finished cleanly (§4.6's finish_reason table).
#[derive(Debug, Clone, Copy)]
pub struct ContinueDecision {
    pub should_continue: bool,
    pub terminal_finish_reason: Option<FinishReason>,
}

pub fn decide_after_finish(reason: FinishReason) -> ContinueDecision {
    match reason {
        FinishReason::Stop | FinishReason::AgentTerminated | FinishReason::XmlToolLimitReached => {
            ContinueDecision { should_continue: false, terminal_finish_reason: Some(reason) }
        }
        FinishReason::ToolCalls | FinishReason::Length => {
            ContinueDecision { should_continue: true, terminal_finish_reason: None }
        }
    }
}

/// Tracks error-retry budget across the bounded loop. One instance per run.
#[derive(Debug, Clone)]
pub struct ErrorRetryState {
    pub error_retries: u32,
    max_error_retries: u32,
}

impl ErrorRetryState {
    pub fn new(max_error_retries: u32) -> Self {
        Self { error_retries: 0, max_error_retries }
    }

    pub fn retries_exhausted(&self) -> bool {
        self.error_retries >= self.max_error_retries
    }
}

/// What the orchestrator should do next after a transport error (§4.6/§7).
#[derive(Debug, Clone)]
pub enum ErrorAction {
    Terminate,
    /// Strip tool content from the prompt (§4.3's emergency fallback) and
    /// retry once on the same model.
    RetryWithToolFallback,
    /// Retry once against a fallback model id (overload only).
    RetryWithModelSwap { fallback_model_id: String },
    /// Retry once on the same model and prompt, unchanged.
    RetryTransient,
}

/// Classifies one transport error into a retry action, charging the retry
/// budget as it goes (§4.6). `NonRetryable` never charges the budget since
/// it always terminates regardless of retries remaining.
pub fn classify_for_retry(
    error: &InferenceError,
    state: &mut ErrorRetryState,
    fallback_model_id: Option<&str>,
) -> ErrorAction {
    match error {
        InferenceError::NonRetryable(_) => ErrorAction::Terminate,
        InferenceError::ToolPairing(_) => {
            state.error_retries += 1;
            if state.retries_exhausted() {
                ErrorAction::Terminate
            } else {
                ErrorAction::RetryWithToolFallback
            }
        }
        InferenceError::Overload(_) => {
            state.error_retries += 1;
            match (state.retries_exhausted(), fallback_model_id) {
                (true, _) | (false, None) => ErrorAction::Terminate,
                (false, Some(id)) => ErrorAction::RetryWithModelSwap { fallback_model_id: id.to_string() },
            }
        }
        InferenceError::Transient(_)
        | InferenceError::Timeout
        | InferenceError::Request(_)
        | InferenceError::Parse(_)
        | InferenceError::ApiError { .. } => {
            state.error_retries += 1;
            if state.retries_exhausted() {
                ErrorAction::Terminate
            } else {
                ErrorAction::RetryTransient
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_calls_and_length_continue_the_loop() {
        assert!(decide_after_finish(FinishReason::ToolCalls).should_continue);
        assert!(decide_after_finish(FinishReason::Length).should_continue);
    }

    #[test]
    fn stop_and_terminal_reasons_end_the_loop() {
        assert!(!decide_after_finish(FinishReason::Stop).should_continue);
        assert!(!decide_after_finish(FinishReason::AgentTerminated).should_continue);
        assert!(!decide_after_finish(FinishReason::XmlToolLimitReached).should_continue);
    }

    #[test]
    fn non_retryable_never_retries_even_with_budget_left() {
        let mut state = ErrorRetryState::new(3);
        let action = classify_for_retry(&InferenceError::NonRetryable("bad request".into()), &mut state, None);
        assert!(matches!(action, ErrorAction::Terminate));
        assert_eq!(state.error_retries, 0);
    }

    #[test]
    fn tool_pairing_error_retries_until_budget_exhausted() {
        let mut state = ErrorRetryState::new(1);
        let action = classify_for_retry(&InferenceError::ToolPairing("bad shape".into()), &mut state, None);
        assert!(matches!(action, ErrorAction::RetryWithToolFallback));
        let action2 = classify_for_retry(&InferenceError::ToolPairing("bad shape".into()), &mut state, None);
        assert!(matches!(action2, ErrorAction::Terminate));
    }

    #[test]
    fn overload_swaps_to_fallback_model_when_configured() {
        let mut state = ErrorRetryState::new(2);
        let action = classify_for_retry(&InferenceError::Overload("529".into()), &mut state, Some("fallback-model"));
        match action {
            ErrorAction::RetryWithModelSwap { fallback_model_id } => assert_eq!(fallback_model_id, "fallback-model"),
            _ => panic!("expected model swap"),
        }
    }

    #[test]
    fn overload_terminates_with_no_fallback_configured() {
        let mut state = ErrorRetryState::new(2);
        let action = classify_for_retry(&InferenceError::Overload("529".into()), &mut state, None);
        assert!(matches!(action, ErrorAction::Terminate));
    }

    #[test]
    fn transient_errors_retry_then_terminate() {
        let mut state = ErrorRetryState::new(1);
        let action = classify_for_retry(&InferenceError::Transient("blip".into()), &mut state, None);
        assert!(matches!(action, ErrorAction::RetryTransient));
        let action2 = classify_for_retry(&InferenceError::Timeout, &mut state, None);
        assert!(matches!(action2, ErrorAction::Terminate));
    }
}
