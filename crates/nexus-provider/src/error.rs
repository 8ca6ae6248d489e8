use thiserror::Error;

/// Error taxonomy for the LLM transport (§7 ERROR HANDLING DESIGN). This is
/// the re-architected form of the original source's exception-driven
/// control flow (SPEC_FULL.md §9): a tagged enum classified once at the
/// transport boundary, not re-inspected by string match at every call site.
#[derive(Debug, Error)]
pub enum InferenceError {
    /// Network/transport-level failure before any response was received.
    #[error("request failed: {0}")]
    Request(String),
    /// Response body could not be parsed into the expected shape.
    #[error("failed to parse response: {0}")]
    Parse(String),
    /// Non-2xx response the classifier has not yet assigned a taxonomy
    /// bucket to; `classify` below is expected to turn these into one of
    /// the variants it knows about.
    #[error("provider returned status {status}: {body}")]
    ApiError { status: u16, body: String },

    /// Validation, 400, malformed request: never retry (§4.6).
    #[error("non-retryable transport error: {0}")]
    NonRetryable(String),
    /// Provider rejected our message structure (tool-call pairing): retry
    /// with the emergency fallback (§4.3), capped at `MAX_ERROR_RETRIES`.
    #[error("tool-call pairing rejected by provider: {0}")]
    ToolPairing(String),
    /// Provider overloaded (529-like): retry against a fallback transport.
    #[error("provider overloaded: {0}")]
    Overload(String),
    /// Anything else transient: retry once against the same transport.
    #[error("transient transport error: {0}")]
    Transient(String),
    /// The stream produced no terminal event before a deadline.
    #[error("stream timed out")]
    Timeout,
}

impl InferenceError {
    /// Whether the Auto-Continue Controller (§4.6) should treat this as
    /// retryable at all. `NonRetryable` is the only hard stop; every other
    /// variant has a defined retry strategy.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, InferenceError::NonRetryable(_))
    }
}

/// Classifies a raw HTTP status + body into the taxonomy above.
///
/// This is the one place substring matching on error text survives
/// (SPEC_FULL.md §9, Open Question 1): providers that signal tool-call
/// pairing rejection via a structured error code should construct
/// `InferenceError::ToolPairing` directly rather than routing through
/// here; this function exists for providers (or error bodies) with no
/// structured signal, exactly as the original source's string matching.
/// If a provider changes its rejection wording, this classifier silently
/// stops catching it — this is a known, documented fragility, not an
/// oversight.
pub fn classify(status: u16, body: &str) -> InferenceError {
    let lower = body.to_lowercase();

    if lower.contains("tool call result does not follow tool call") || lower.contains("tool_call_id") {
        return InferenceError::ToolPairing(body.to_string());
    }
    if lower.contains("overloaded") || status == 529 {
        return InferenceError::Overload(body.to_string());
    }
    if status == 400
        || lower.contains("is blank")
        || lower.contains("validation")
        || lower.contains("invalid")
    {
        return InferenceError::NonRetryable(body.to_string());
    }
    InferenceError::Transient(body.to_string())
}
