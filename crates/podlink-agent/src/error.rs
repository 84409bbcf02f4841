//! Error types for agent client operations.

use thiserror::Error;

/// A result type using `AgentError`.
pub type Result<T> = std::result::Result<T, AgentError>;

/// Errors returned by the sidecar agent client.
#[derive(Debug, Error)]
pub enum AgentError {
    /// The HTTP request could not be sent or the response was cut short.
    #[error("agent request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The agent answered with a non-success status.
    #[error("agent returned {status}: {message}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Error message reported by the agent.
        message: String,
    },

    /// The agent's response body could not be decoded.
    #[error("failed to decode agent response: {0}")]
    Decode(String),

    /// The agent did not pass its health probe.
    #[error("agent is unhealthy: {0}")]
    Unhealthy(String),

    /// The client has been closed.
    #[error("agent client is closed")]
    Closed,
}

impl AgentError {
    /// Check if this error is retriable.
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::Request(_) | Self::Unhealthy(_) => true,
            Self::Status { status, .. } => *status >= 500,
            Self::Decode(_) | Self::Closed => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retriable_errors() {
        assert!(AgentError::Unhealthy("503".to_string()).is_retriable());
        assert!(AgentError::Status {
            status: 502,
            message: "bad gateway".to_string()
        }
        .is_retriable());
        assert!(!AgentError::Status {
            status: 404,
            message: "no such container".to_string()
        }
        .is_retriable());
        assert!(!AgentError::Closed.is_retriable());
    }

    #[test]
    fn status_display() {
        let err = AgentError::Status {
            status: 409,
            message: "container busy".to_string(),
        };
        assert_eq!(err.to_string(), "agent returned 409: container busy");
    }
}
