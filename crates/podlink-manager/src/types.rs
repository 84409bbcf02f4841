//! Types for the manager crate.

use std::time::Duration;

use podlink_agent::DialerConfig;
use podlink_core::{Namespace, PodId};
use serde::{Deserialize, Serialize};

/// Phase of the pod lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PodPhase {
    /// Pod has been accepted but containers are not yet running.
    Pending,
    /// Pod is running with at least one container.
    Running,
    /// All containers terminated successfully.
    Succeeded,
    /// At least one container failed.
    Failed,
    /// Pod status cannot be determined.
    #[default]
    Unknown,
}

impl PodPhase {
    /// Parse a pod phase from a Kubernetes phase string.
    #[must_use]
    pub fn from_k8s_phase(phase: &str) -> Self {
        match phase {
            "Pending" => Self::Pending,
            "Running" => Self::Running,
            "Succeeded" => Self::Succeeded,
            "Failed" => Self::Failed,
            _ => Self::Unknown,
        }
    }

    /// Check if the pod is in a terminal state.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

/// A resolved pod, as seen when a client is about to be created for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodInfo {
    /// The pod's name.
    pub pod_id: PodId,
    /// Namespace the pod lives in.
    pub namespace: Namespace,
    /// Current lifecycle phase.
    pub phase: PodPhase,
    /// Node the pod is scheduled on.
    pub node_name: Option<String>,
    /// Pod's IP address.
    pub pod_ip: Option<String>,
}

impl PodInfo {
    /// Create a running pod description with no placement details.
    #[must_use]
    pub fn running(pod_id: PodId, namespace: Namespace) -> Self {
        Self {
            pod_id,
            namespace,
            phase: PodPhase::Running,
            node_name: None,
            pod_ip: None,
        }
    }
}

/// How long and how often to retry creating a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total time allowed across all attempts.
    pub timeout: Duration,
    /// Pause after the first failed attempt.
    pub initial_backoff: Duration,
    /// Upper bound for the pause between attempts.
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// The pause that follows `current`: doubled, capped at `max_backoff`.
    #[must_use]
    pub fn next_backoff(&self, current: Duration) -> Duration {
        current.saturating_mul(2).min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        ManagerConfig::default().retry_policy()
    }
}

/// Configuration for the agent client manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerConfig {
    /// Namespace the target pods live in.
    pub namespace: Namespace,
    /// Name of the agent container inside each pod.
    pub agent_container: String,
    /// Port the agent listens on inside the pod.
    pub agent_port: u16,
    /// Total time allowed to create a client for one pod.
    pub client_timeout: Duration,
    /// Pause after the first failed creation attempt.
    pub initial_backoff: Duration,
    /// Upper bound for the pause between creation attempts.
    pub max_backoff: Duration,
    /// How long a single attempt waits for the agent container to be ready.
    pub readiness_timeout: Duration,
    /// How often container readiness is polled.
    pub readiness_poll_interval: Duration,
    /// Connect timeout when dialing the agent through the tunnel.
    pub dial_timeout: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            namespace: Namespace::default(),
            agent_container: "synclet".to_string(),
            agent_port: 23551,
            client_timeout: Duration::from_secs(10),
            initial_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_millis(500),
            readiness_timeout: Duration::from_secs(5),
            readiness_poll_interval: Duration::from_millis(250),
            dial_timeout: Duration::from_secs(5),
        }
    }
}

impl ManagerConfig {
    /// Load configuration from environment variables.
    ///
    /// Supported environment variables:
    /// - `PODLINK_NAMESPACE`: Namespace of the target pods
    /// - `PODLINK_AGENT_CONTAINER`: Name of the agent container
    /// - `PODLINK_AGENT_PORT`: Port the agent listens on
    /// - `PODLINK_CLIENT_TIMEOUT_MS`: Total time allowed to create a client
    /// - `PODLINK_INITIAL_BACKOFF_MS`: First pause between attempts
    /// - `PODLINK_MAX_BACKOFF_MS`: Longest pause between attempts
    /// - `PODLINK_READINESS_TIMEOUT_MS`: Readiness wait per attempt
    /// - `PODLINK_READINESS_POLL_MS`: Readiness poll interval
    /// - `PODLINK_DIAL_TIMEOUT_MS`: Agent connect timeout
    ///
    /// Unparseable values are ignored and the default is kept.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(ns) = std::env::var("PODLINK_NAMESPACE")
            .ok()
            .and_then(|val| Namespace::parse(&val).ok())
        {
            config.namespace = ns;
        }
        if let Ok(val) = std::env::var("PODLINK_AGENT_CONTAINER") {
            config.agent_container = val;
        }
        if let Ok(val) = std::env::var("PODLINK_AGENT_PORT") {
            if let Ok(n) = val.parse() {
                config.agent_port = n;
            }
        }
        if let Some(d) = env_millis("PODLINK_CLIENT_TIMEOUT_MS") {
            config.client_timeout = d;
        }
        if let Some(d) = env_millis("PODLINK_INITIAL_BACKOFF_MS") {
            config.initial_backoff = d;
        }
        if let Some(d) = env_millis("PODLINK_MAX_BACKOFF_MS") {
            config.max_backoff = d;
        }
        if let Some(d) = env_millis("PODLINK_READINESS_TIMEOUT_MS") {
            config.readiness_timeout = d;
        }
        if let Some(d) = env_millis("PODLINK_READINESS_POLL_MS") {
            config.readiness_poll_interval = d;
        }
        if let Some(d) = env_millis("PODLINK_DIAL_TIMEOUT_MS") {
            config.dial_timeout = d;
        }

        config
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if a timeout, the initial backoff, or the agent port
    /// is zero, or if the backoff bounds are inverted.
    pub fn validate(&self) -> crate::Result<()> {
        if self.agent_container.is_empty() {
            return Err(crate::ManagerError::Config(
                "agent container name must not be empty".to_string(),
            ));
        }
        if self.agent_port == 0 {
            return Err(crate::ManagerError::Config(
                "agent port must not be zero".to_string(),
            ));
        }
        if self.client_timeout.is_zero() {
            return Err(crate::ManagerError::Config(
                "client timeout must not be zero".to_string(),
            ));
        }
        if self.initial_backoff.is_zero() {
            return Err(crate::ManagerError::Config(
                "initial backoff must not be zero".to_string(),
            ));
        }
        if self.readiness_poll_interval.is_zero() {
            return Err(crate::ManagerError::Config(
                "readiness poll interval must not be zero".to_string(),
            ));
        }
        if self.initial_backoff > self.max_backoff {
            return Err(crate::ManagerError::Config(format!(
                "initial backoff {:?} exceeds max backoff {:?}",
                self.initial_backoff, self.max_backoff
            )));
        }
        Ok(())
    }

    /// The retry policy for client creation.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            timeout: self.client_timeout,
            initial_backoff: self.initial_backoff,
            max_backoff: self.max_backoff,
        }
    }

    /// Timeouts for dialing the agent.
    #[must_use]
    pub fn dialer_config(&self) -> DialerConfig {
        DialerConfig {
            connect_timeout: self.dial_timeout,
            ..DialerConfig::default()
        }
    }
}

fn env_millis(name: &str) -> Option<Duration> {
    std::env::var(name)
        .ok()
        .and_then(|val| val.parse().ok())
        .map(Duration::from_millis)
}
