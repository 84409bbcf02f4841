//! The per-pod agent client cache.
//!
//! One lock guards both the lookup and the creation of clients, which keeps
//! "at most one client per pod" trivially true. The price is that a slow
//! creation for one pod holds up callers for every other pod.

use std::collections::HashMap;
use std::sync::Arc;

use podlink_agent::{AgentClient, AgentDialer};
use podlink_core::PodId;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::factory::{ClientFactory, TunnelingClientFactory};
use crate::poll::poll_for_client;
use crate::provider::{PodResolver, ReadinessChecker, TunnelProvider};
use crate::types::{ManagerConfig, RetryPolicy};
use crate::{ManagerError, Result};

/// Hands out one shared agent client per pod, creating it on first use.
///
/// Clients stay cached until [`forget_pod`](Self::forget_pod) evicts them;
/// the manager never drops an entry on its own.
///
/// Call [`shutdown`](Self::shutdown) before dropping the manager. Dropping it
/// with clients still cached skips their `close`; [`K8sCluster`] tunnels
/// still shut down once the last handle to each client is gone, but any
/// other [`TunnelProvider`] only tears down what its closer does on drop.
///
/// [`K8sCluster`]: crate::k8s::K8sCluster
pub struct AgentClientManager {
    clients: Mutex<HashMap<PodId, Arc<dyn AgentClient>>>,
    factory: Arc<dyn ClientFactory>,
    policy: RetryPolicy,
}

impl AgentClientManager {
    /// Create a manager that tunnels to each pod's agent.
    #[must_use]
    pub fn new(
        resolver: Arc<dyn PodResolver>,
        readiness: Arc<dyn ReadinessChecker>,
        tunnels: Arc<dyn TunnelProvider>,
        dialer: Arc<dyn AgentDialer>,
        config: &ManagerConfig,
    ) -> Self {
        let factory = TunnelingClientFactory::new(
            resolver,
            readiness,
            tunnels,
            dialer,
            config.agent_container.clone(),
            config.agent_port,
        );
        Self::with_factory(Arc::new(factory), config.retry_policy())
    }

    /// Create a manager around an arbitrary client factory.
    #[must_use]
    pub fn with_factory(factory: Arc<dyn ClientFactory>, policy: RetryPolicy) -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
            factory,
            policy,
        }
    }

    /// Get the client for a pod, connecting to its agent if none is cached.
    ///
    /// Cache hits return without any network activity, even for a caller
    /// that is already cancelled when the lock is free. On a miss, creation
    /// is retried until the policy's timeout; nothing is cached on failure.
    /// Waiting for a contended lock also observes `cancel`.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::Timeout`] if no attempt succeeded in time, or
    /// [`ManagerError::Cancelled`] if `cancel` fired first.
    pub async fn client_for_pod(
        &self,
        cancel: &CancellationToken,
        pod_id: &PodId,
    ) -> Result<Arc<dyn AgentClient>> {
        let mut clients = match self.clients.try_lock() {
            Ok(clients) => clients,
            Err(_) => tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    return Err(ManagerError::Cancelled { pod_id: pod_id.clone() });
                }
                clients = self.clients.lock() => clients,
            },
        };

        if let Some(client) = clients.get(pod_id) {
            debug!(pod = %pod_id, "Reusing cached agent client");
            return Ok(Arc::clone(client));
        }

        let client = poll_for_client(self.factory.as_ref(), cancel, pod_id, &self.policy).await?;
        clients.insert(pod_id.clone(), Arc::clone(&client));

        info!(pod = %pod_id, cached = clients.len(), "Cached new agent client");
        Ok(client)
    }

    /// Evict and close the client for a pod.
    ///
    /// Forgetting a pod with no cached client does nothing. The entry is
    /// removed before the client is closed and stays removed even if closing
    /// fails.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::Close`] if the evicted client failed to close.
    pub async fn forget_pod(&self, pod_id: &PodId) -> Result<()> {
        let mut clients = self.clients.lock().await;

        let Some(client) = clients.remove(pod_id) else {
            debug!(pod = %pod_id, "No cached agent client to forget");
            return Ok(());
        };

        match client.close().await {
            Ok(()) => {
                info!(pod = %pod_id, "Closed agent client");
                Ok(())
            }
            Err(source) => {
                warn!(pod = %pod_id, error = %source, "Failed to close evicted agent client");
                Err(ManagerError::Close {
                    pod_id: pod_id.clone(),
                    source,
                })
            }
        }
    }

    /// Forget every cached pod, closing each client.
    ///
    /// Returns the close failures; every entry is evicted either way.
    pub async fn shutdown(&self) -> Vec<ManagerError> {
        let drained: Vec<_> = self.clients.lock().await.drain().collect();
        let mut errors = Vec::new();

        for (pod_id, client) in drained {
            if let Err(source) = client.close().await {
                warn!(pod = %pod_id, error = %source, "Failed to close agent client on shutdown");
                errors.push(ManagerError::Close { pod_id, source });
            }
        }

        info!(failures = errors.len(), "Agent client manager shut down");
        errors
    }

    /// Pods that currently have a cached client.
    pub async fn cached_pods(&self) -> Vec<PodId> {
        self.clients.lock().await.keys().cloned().collect()
    }

    /// Number of cached clients.
    pub async fn len(&self) -> usize {
        self.clients.lock().await.len()
    }

    /// Check if no client is cached.
    pub async fn is_empty(&self) -> bool {
        self.clients.lock().await.is_empty()
    }
}
