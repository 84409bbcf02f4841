//! Error types for the manager crate.

use std::net::SocketAddr;
use std::time::Duration;

use podlink_agent::AgentError;
use podlink_core::PodId;
use thiserror::Error;

/// Errors that can occur while connecting to, caching, or releasing agent
/// clients.
#[derive(Error, Debug)]
pub enum ManagerError {
    /// The pod could not be found or looked up.
    #[error("failed to resolve pod {pod_id}: {message}")]
    PodResolution {
        /// The pod being resolved.
        pod_id: PodId,
        /// What went wrong.
        message: String,
    },

    /// The agent container is not ready yet, or is crash-looping.
    #[error("agent container {container:?} in pod {pod_id} is not ready: {reason}")]
    AgentNotReady {
        /// The pod hosting the agent.
        pod_id: PodId,
        /// Name of the agent container.
        container: String,
        /// Why the container is not ready.
        reason: String,
    },

    /// The port-forward to the pod could not be set up.
    #[error("failed opening tunnel to pod {pod_id}: {message}")]
    Tunnel {
        /// The pod being tunneled to.
        pod_id: PodId,
        /// What went wrong.
        message: String,
    },

    /// The tunnel was open but the agent could not be dialed through it.
    #[error("failed connecting to agent for pod {pod_id} at {addr}")]
    Dial {
        /// The pod hosting the agent.
        pod_id: PodId,
        /// Local end of the tunnel.
        addr: SocketAddr,
        /// The dial failure.
        #[source]
        source: AgentError,
    },

    /// No attempt succeeded before the deadline.
    #[error("timed out creating agent client for pod {pod_id} after {elapsed:?} ({attempts} attempts)")]
    Timeout {
        /// The pod being connected to.
        pod_id: PodId,
        /// Time spent since the first attempt.
        elapsed: Duration,
        /// Number of attempts started.
        attempts: u32,
        /// The last attempt's failure, if any attempt finished.
        #[source]
        source: Option<Box<ManagerError>>,
    },

    /// The caller cancelled while a client was being created.
    #[error("agent client creation for pod {pod_id} was cancelled")]
    Cancelled {
        /// The pod being connected to.
        pod_id: PodId,
    },

    /// Closing an evicted client failed. The client is no longer cached.
    #[error("failed closing agent client for pod {pod_id}")]
    Close {
        /// The evicted pod.
        pod_id: PodId,
        /// The close failure.
        #[source]
        source: AgentError,
    },

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl ManagerError {
    /// Check if a creation attempt that failed with this error is worth
    /// repeating.
    ///
    /// Dial failures defer to the agent error behind them.
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::PodResolution { .. } | Self::AgentNotReady { .. } | Self::Tunnel { .. } => true,
            Self::Dial { source, .. } => source.is_retriable(),
            Self::Timeout { .. } | Self::Cancelled { .. } | Self::Close { .. } | Self::Config(_) => {
                false
            }
        }
    }
}

/// A specialized Result type for manager operations.
pub type Result<T> = std::result::Result<T, ManagerError>;
