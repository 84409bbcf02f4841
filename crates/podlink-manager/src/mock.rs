//! In-memory collaborators for testing code that depends on the manager.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use podlink_agent::{AgentClient, AgentDialer, AgentError, MockAgentClient};
use podlink_core::{Namespace, PodId};
use tokio::time::Instant;

use crate::factory::ClientFactory;
use crate::manager::AgentClientManager;
use crate::provider::{PodResolver, ReadinessChecker, Tunnel, TunnelCloser, TunnelProvider};
use crate::types::{PodInfo, RetryPolicy};
use crate::{ManagerError, Result};

/// A factory that always hands out the same client.
pub struct StaticClientFactory {
    client: Arc<dyn AgentClient>,
}

impl StaticClientFactory {
    /// Create a factory returning `client` on every call.
    #[must_use]
    pub fn new(client: Arc<dyn AgentClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ClientFactory for StaticClientFactory {
    async fn new_client(&self, _pod_id: &PodId) -> Result<Arc<dyn AgentClient>> {
        Ok(Arc::clone(&self.client))
    }
}

impl AgentClientManager {
    /// Create a manager that serves `client` for every pod without touching
    /// the network.
    #[must_use]
    pub fn for_tests(client: Arc<dyn AgentClient>) -> Self {
        Self::with_factory(
            Arc::new(StaticClientFactory::new(client)),
            RetryPolicy::default(),
        )
    }
}

#[derive(Debug, Clone, Copy)]
enum Outcome {
    Succeed,
    Fail,
    FailUntil(Instant),
}

/// A factory that creates fresh [`MockAgentClient`]s and counts attempts.
pub struct MockClientFactory {
    outcome: Outcome,
    delay: Option<Duration>,
    failing_close: bool,
    calls: AtomicUsize,
    created: Mutex<Vec<Arc<MockAgentClient>>>,
}

impl MockClientFactory {
    fn with_outcome(outcome: Outcome) -> Self {
        Self {
            outcome,
            delay: None,
            failing_close: false,
            calls: AtomicUsize::new(0),
            created: Mutex::new(Vec::new()),
        }
    }

    /// Create a factory whose attempts always succeed.
    #[must_use]
    pub fn succeeding() -> Self {
        Self::with_outcome(Outcome::Succeed)
    }

    /// Create a factory whose attempts always fail with a retriable error.
    #[must_use]
    pub fn failing() -> Self {
        Self::with_outcome(Outcome::Fail)
    }

    /// Create a factory that fails until `duration` from now, then succeeds.
    #[must_use]
    pub fn failing_for(duration: Duration) -> Self {
        Self::with_outcome(Outcome::FailUntil(Instant::now() + duration))
    }

    /// Make every attempt take `delay` before producing its outcome.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Make created clients fail to close.
    #[must_use]
    pub fn with_failing_close(mut self) -> Self {
        self.failing_close = true;
        self
    }

    /// Number of attempts started.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Clients created so far, oldest first.
    #[must_use]
    pub fn created(&self) -> Vec<Arc<MockAgentClient>> {
        self.created.lock().clone()
    }
}

#[async_trait]
impl ClientFactory for MockClientFactory {
    async fn new_client(&self, pod_id: &PodId) -> Result<Arc<dyn AgentClient>> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let fail = match self.outcome {
            Outcome::Succeed => false,
            Outcome::Fail => true,
            Outcome::FailUntil(until) => Instant::now() < until,
        };
        if fail {
            return Err(ManagerError::AgentNotReady {
                pod_id: pod_id.clone(),
                container: "synclet".to_string(),
                reason: "ContainerCreating".to_string(),
            });
        }

        let client = Arc::new(if self.failing_close {
            MockAgentClient::failing_close()
        } else {
            MockAgentClient::new()
        });
        self.created.lock().push(Arc::clone(&client));
        Ok(client)
    }
}

#[derive(Debug)]
struct MockPod {
    ready: bool,
}

/// An in-memory cluster implementing every creation step.
///
/// Pods must be added before they resolve. Tunnels count their teardowns.
#[derive(Default)]
pub struct MockCluster {
    namespace: Namespace,
    pods: Mutex<HashMap<PodId, MockPod>>,
    fail_tunnels: AtomicBool,
    tunnels_opened: AtomicUsize,
    teardowns: Arc<AtomicUsize>,
    last_remote_port: Mutex<Option<u16>>,
}

impl MockCluster {
    /// Create an empty cluster.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a running pod whose agent is ready.
    pub fn add_pod(&self, pod_id: &PodId) {
        self.pods
            .lock()
            .insert(pod_id.clone(), MockPod { ready: true });
    }

    /// Remove a pod.
    pub fn remove_pod(&self, pod_id: &PodId) {
        self.pods.lock().remove(pod_id);
    }

    /// Set whether a pod's agent container reports ready.
    pub fn set_ready(&self, pod_id: &PodId, ready: bool) {
        if let Some(pod) = self.pods.lock().get_mut(pod_id) {
            pod.ready = ready;
        }
    }

    /// Make tunnel setup fail.
    pub fn fail_tunnels(&self, fail: bool) {
        self.fail_tunnels.store(fail, Ordering::SeqCst);
    }

    /// Number of tunnels opened.
    #[must_use]
    pub fn tunnels_opened(&self) -> usize {
        self.tunnels_opened.load(Ordering::SeqCst)
    }

    /// Number of tunnels torn down.
    #[must_use]
    pub fn teardowns(&self) -> usize {
        self.teardowns.load(Ordering::SeqCst)
    }

    /// Remote port of the most recent tunnel.
    #[must_use]
    pub fn last_remote_port(&self) -> Option<u16> {
        *self.last_remote_port.lock()
    }
}

#[async_trait]
impl PodResolver for MockCluster {
    async fn resolve_pod(&self, pod_id: &PodId) -> Result<PodInfo> {
        if !self.pods.lock().contains_key(pod_id) {
            return Err(ManagerError::PodResolution {
                pod_id: pod_id.clone(),
                message: "pod not found".to_string(),
            });
        }
        Ok(PodInfo::running(pod_id.clone(), self.namespace.clone()))
    }
}

#[async_trait]
impl ReadinessChecker for MockCluster {
    async fn wait_for_container_ready(&self, pod: &PodInfo, container: &str) -> Result<()> {
        let ready = self
            .pods
            .lock()
            .get(&pod.pod_id)
            .is_some_and(|p| p.ready);

        if ready {
            Ok(())
        } else {
            Err(ManagerError::AgentNotReady {
                pod_id: pod.pod_id.clone(),
                container: container.to_string(),
                reason: "ContainerCreating".to_string(),
            })
        }
    }
}

#[async_trait]
impl TunnelProvider for MockCluster {
    async fn open_tunnel(&self, pod_id: &PodId, remote_port: u16) -> Result<Tunnel> {
        if self.fail_tunnels.load(Ordering::SeqCst) {
            return Err(ManagerError::Tunnel {
                pod_id: pod_id.clone(),
                message: "port-forward refused".to_string(),
            });
        }

        let opened = self.tunnels_opened.fetch_add(1, Ordering::SeqCst);
        *self.last_remote_port.lock() = Some(remote_port);

        let teardowns = Arc::clone(&self.teardowns);
        let local_port = u16::try_from(40_000 + opened % 20_000).unwrap_or(40_000);
        Ok(Tunnel {
            local_port,
            closer: TunnelCloser::new(move || {
                teardowns.fetch_add(1, Ordering::SeqCst);
            }),
        })
    }
}

/// A dialer producing [`MockAgentClient`]s.
#[derive(Default)]
pub struct MockDialer {
    fail: bool,
    delay: Option<Duration>,
    dials: AtomicUsize,
}

impl MockDialer {
    /// Create a dialer whose dials succeed.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a dialer whose dials fail.
    #[must_use]
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// Make every dial take `delay`.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of dials started.
    #[must_use]
    pub fn dials(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AgentDialer for MockDialer {
    async fn dial(&self, addr: SocketAddr) -> podlink_agent::Result<Arc<dyn AgentClient>> {
        self.dials.fetch_add(1, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if self.fail {
            return Err(AgentError::Unhealthy(format!("no agent listening on {addr}")));
        }
        Ok(Arc::new(MockAgentClient::new()))
    }
}
