//! Single-attempt client creation.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use async_trait::async_trait;
use podlink_agent::{AgentClient, AgentDialer};
use podlink_core::PodId;
use tracing::{debug, info, Instrument};

use crate::provider::{PodResolver, ReadinessChecker, Tunnel, TunnelGuard, TunnelProvider};
use crate::tunnel::TunneledClient;
use crate::{ManagerError, Result};

/// Creates a new agent client for a pod in one attempt.
///
/// The manager calls this only on a cache miss, through the retry loop in
/// [`crate::poll`].
#[async_trait]
pub trait ClientFactory: Send + Sync {
    /// Make one attempt at connecting to the pod's agent.
    ///
    /// # Errors
    ///
    /// Returns the error of whichever step failed.
    async fn new_client(&self, pod_id: &PodId) -> Result<Arc<dyn AgentClient>>;
}

/// Connects to the agent through a tunnel opened for each client.
///
/// Steps: resolve the pod, wait for the agent container, open a tunnel to
/// the agent port, dial through it, and wrap the result in a
/// [`TunneledClient`]. A tunnel opened by a failed or abandoned attempt is
/// always torn down.
pub struct TunnelingClientFactory {
    resolver: Arc<dyn PodResolver>,
    readiness: Arc<dyn ReadinessChecker>,
    tunnels: Arc<dyn TunnelProvider>,
    dialer: Arc<dyn AgentDialer>,
    agent_container: String,
    agent_port: u16,
}

impl TunnelingClientFactory {
    /// Create a factory from its collaborators.
    #[must_use]
    pub fn new(
        resolver: Arc<dyn PodResolver>,
        readiness: Arc<dyn ReadinessChecker>,
        tunnels: Arc<dyn TunnelProvider>,
        dialer: Arc<dyn AgentDialer>,
        agent_container: impl Into<String>,
        agent_port: u16,
    ) -> Self {
        Self {
            resolver,
            readiness,
            tunnels,
            dialer,
            agent_container: agent_container.into(),
            agent_port,
        }
    }
}

#[async_trait]
impl ClientFactory for TunnelingClientFactory {
    async fn new_client(&self, pod_id: &PodId) -> Result<Arc<dyn AgentClient>> {
        let span = tracing::debug_span!("new_agent_client", pod = %pod_id);

        async move {
            let pod = self.resolver.resolve_pod(pod_id).await?;

            self.readiness
                .wait_for_container_ready(&pod, &self.agent_container)
                .await?;

            let Tunnel { local_port, closer } =
                self.tunnels.open_tunnel(pod_id, self.agent_port).await?;
            let guard = TunnelGuard::new(closer);
            let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, local_port));

            debug!(
                pod = %pod_id,
                local_port,
                remote_port = self.agent_port,
                "Tunneling to agent"
            );

            match self.dialer.dial(addr).await {
                Ok(delegate) => {
                    info!(pod = %pod_id, %addr, "Connected to agent through tunnel");
                    let client: Arc<dyn AgentClient> =
                        Arc::new(TunneledClient::new(delegate, guard.disarm()));
                    Ok(client)
                }
                Err(source) => {
                    guard.close();
                    Err(ManagerError::Dial {
                        pod_id: pod_id.clone(),
                        addr,
                        source,
                    })
                }
            }
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::mock::{MockCluster, MockDialer};

    fn factory(cluster: &Arc<MockCluster>, dialer: &Arc<MockDialer>) -> TunnelingClientFactory {
        TunnelingClientFactory::new(
            cluster.clone(),
            cluster.clone(),
            cluster.clone(),
            dialer.clone(),
            "synclet",
            23551,
        )
    }

    fn pod() -> PodId {
        PodId::parse("web-0").unwrap()
    }

    #[tokio::test]
    async fn creates_tunneled_client() {
        let cluster = Arc::new(MockCluster::new());
        cluster.add_pod(&pod());
        let dialer = Arc::new(MockDialer::new());

        let client = factory(&cluster, &dialer).new_client(&pod()).await.unwrap();

        assert_eq!(dialer.dials(), 1);
        assert_eq!(cluster.tunnels_opened(), 1);
        assert_eq!(cluster.teardowns(), 0);
        assert_eq!(cluster.last_remote_port(), Some(23551));

        client.close().await.unwrap();
        assert_eq!(cluster.teardowns(), 1);
    }

    #[tokio::test]
    async fn missing_pod_fails_resolution() {
        let cluster = Arc::new(MockCluster::new());
        let dialer = Arc::new(MockDialer::new());

        let err = factory(&cluster, &dialer)
            .new_client(&pod())
            .await
            .err()
            .unwrap();

        assert!(matches!(err, ManagerError::PodResolution { .. }));
        assert_eq!(cluster.tunnels_opened(), 0);
        assert_eq!(dialer.dials(), 0);
    }

    #[tokio::test]
    async fn unready_agent_opens_no_tunnel() {
        let cluster = Arc::new(MockCluster::new());
        cluster.add_pod(&pod());
        cluster.set_ready(&pod(), false);
        let dialer = Arc::new(MockDialer::new());

        let err = factory(&cluster, &dialer)
            .new_client(&pod())
            .await
            .err()
            .unwrap();

        assert!(matches!(
            err,
            ManagerError::AgentNotReady { ref container, .. } if container == "synclet"
        ));
        assert_eq!(cluster.tunnels_opened(), 0);
    }

    #[tokio::test]
    async fn tunnel_failure_is_reported() {
        let cluster = Arc::new(MockCluster::new());
        cluster.add_pod(&pod());
        cluster.fail_tunnels(true);
        let dialer = Arc::new(MockDialer::new());

        let err = factory(&cluster, &dialer)
            .new_client(&pod())
            .await
            .err()
            .unwrap();

        assert!(matches!(err, ManagerError::Tunnel { .. }));
        assert_eq!(dialer.dials(), 0);
    }

    #[tokio::test]
    async fn dial_failure_tears_down_tunnel() {
        let cluster = Arc::new(MockCluster::new());
        cluster.add_pod(&pod());
        let dialer = Arc::new(MockDialer::failing());

        let err = factory(&cluster, &dialer)
            .new_client(&pod())
            .await
            .err()
            .unwrap();

        assert!(matches!(err, ManagerError::Dial { .. }));
        assert_eq!(cluster.tunnels_opened(), 1);
        assert_eq!(cluster.teardowns(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_attempt_tears_down_tunnel() {
        let cluster = Arc::new(MockCluster::new());
        cluster.add_pod(&pod());
        let dialer = Arc::new(MockDialer::new().with_delay(Duration::from_secs(60)));
        let factory = factory(&cluster, &dialer);

        let result =
            tokio::time::timeout(Duration::from_secs(1), factory.new_client(&pod())).await;

        assert!(result.is_err());
        assert_eq!(cluster.tunnels_opened(), 1);
        assert_eq!(cluster.teardowns(), 1);
    }
}
