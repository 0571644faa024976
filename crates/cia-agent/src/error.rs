//! Error types for the intervention agent
//!
//! Provides error handling for:
//! - Agent lifecycle (unsupported host, rejected registration)
//! - Command channel failures (no controller, worker gone, timeouts)
//! - Worker-reported command errors
//! - Network outcomes seen by intercepted requests

/// Main agent error type
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    /// Host offers no background-worker capability
    #[error("background workers are not supported by this host")]
    Unsupported,

    /// Registration rejected by the host, or the worker never activated
    #[error("agent registration failed: {0}")]
    Registration(String),

    /// Command issued with no live controller attached
    #[error("agent is not active")]
    NotActive,

    /// Worker processed the command and answered with an error
    #[error("agent command failed: {0}")]
    Command(String),

    /// Worker went away before replying
    #[error("agent worker terminated before replying")]
    WorkerTerminated,

    /// Caller-configured deadline elapsed
    #[error("agent command timed out after {duration_ms}ms")]
    Timeout {
        /// Configured deadline
        duration_ms: u64,
    },

    /// Message could not be encoded or decoded
    #[error("protocol error: {0}")]
    Protocol(#[from] serde_json::Error),

    /// Invalid configuration
    #[error("configuration error: {0}")]
    Config(String),
}

impl AgentError {
    /// Check if the caller may reasonably retry
    ///
    /// The agent itself never retries.
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Registration(_) | Self::Timeout { .. } | Self::WorkerTerminated
        )
    }

    /// Check if the error is fatal for this host
    #[inline]
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Unsupported)
    }
}

/// Failure of an outbound request
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NetworkError {
    /// Real network failure
    #[error("network request failed: {0}")]
    Failed(String),

    /// Failure synthesized by chaos mode
    #[error("injected network failure: {0}")]
    Injected(String),
}

impl NetworkError {
    /// Whether this failure was injected by the agent
    #[inline]
    #[must_use]
    pub fn is_injected(&self) -> bool {
        matches!(self, Self::Injected(_))
    }
}

/// Errors reported by a worker host
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HostError {
    /// Scope path is not acceptable
    #[error("invalid worker scope '{0}'")]
    InvalidScope(String),

    /// Host refused the operation
    #[error("host rejected request: {0}")]
    Rejected(String),
}

/// Chaos configuration errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ChaosError {
    /// Intensity outside [0, 1]
    #[error("chaos intensity must be within [0, 1], got {0}")]
    InvalidIntensity(f64),
}
