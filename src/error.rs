//! The error surface of an agent run, as a single `thiserror` enum so
//! callers can match on kind (transient vs. protocol vs. precondition vs.
//! timeout vs. integration vs. pr-engine vs. serialization vs. io) instead
//! of sniffing strings.

use thiserror::Error;

/// Raised by [`crate::timeout::TimeoutController`] when a deadline has
/// already passed at `checkpoint()` time, or when `with_timeout` loses its
/// race against an operation.
#[derive(Debug, Clone, Error)]
#[error("timed out after {elapsed_ms}ms (limit {limit_ms}ms) during {context}")]
pub struct TimeoutError {
    pub elapsed_ms: u64,
    pub limit_ms: u64,
    pub context: String,
}

#[derive(Debug, Error)]
pub enum AgentError {
    /// Transient provider failure, retried with backoff by the provider
    /// layer. Surfaces only when retries are exhausted.
    #[error("provider request failed after retries: {0}")]
    ProviderTransient(String),

    /// Unparseable response or missing required field. Run-fatal, never
    /// retried — distinguished from `ProviderTransient` by type.
    #[error("provider protocol error: {0}")]
    ProviderProtocol(String),

    /// Caller bug: resume on non-paused state, duplicate tool
    /// registration, invalid integration config.
    #[error("precondition violated: {0}")]
    Precondition(String),

    /// Hard timeout mid-iteration.
    #[error(transparent)]
    Timeout(#[from] TimeoutError),

    /// Integration router / config loading failure that is not a simple
    /// precondition (e.g. network failure reaching an OpenAPI spec URL).
    #[error("integration error: {0}")]
    Integration(String),

    /// PR composition engine failure that is not itself routed back to the
    /// LLM as a tool error (e.g. the caller invoked the engine directly).
    #[error("pr engine error: {0}")]
    PrEngine(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl AgentError {
    /// Timeouts, preconditions, protocol errors, and exhausted-retry
    /// transient errors are run-fatal; every other failure mode is
    /// recovered locally inside the loop and never becomes an
    /// `AgentError` at all.
    pub fn is_run_fatal(&self) -> bool {
        matches!(
            self,
            AgentError::ProviderTransient(_)
                | AgentError::ProviderProtocol(_)
                | AgentError::Precondition(_)
                | AgentError::Timeout(_)
        )
    }
}
