//! Kubernetes implementation of the client creation steps.
//!
//! [`K8sCluster`] resolves pods and watches container readiness through the
//! API server, and opens tunnels with the pod port-forward subresource.

use std::future::Future;
use std::net::Ipv4Addr;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::api::Api;
use kube::Client;
use podlink_core::{Namespace, PodId};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};

use crate::provider::{PodResolver, ReadinessChecker, Tunnel, TunnelCloser, TunnelProvider};
use crate::types::{ManagerConfig, PodInfo, PodPhase};
use crate::{ManagerError, Result};

/// Waiting reasons that mean the container will not become ready on its own.
const FAILURE_REASONS: [&str; 7] = [
    "ImagePullBackOff",
    "ErrImagePull",
    "CrashLoopBackOff",
    "CreateContainerError",
    "CreateContainerConfigError",
    "InvalidImageName",
    "RunContainerError",
];

/// Readiness of one container, as read from a pod's status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerReadiness {
    /// The container reports ready.
    Ready,
    /// Not ready yet, may still become ready.
    Pending(String),
    /// Failed in a way that needs outside intervention.
    Failed(String),
}

/// Pods in one namespace of a Kubernetes cluster.
#[derive(Clone)]
pub struct K8sCluster {
    client: Client,
    namespace: Namespace,
    readiness_timeout: Duration,
    readiness_poll_interval: Duration,
}

impl K8sCluster {
    /// Connect to the cluster using in-cluster config or the local
    /// kubeconfig.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::Config`] if no Kubernetes client can be built.
    pub async fn new(config: &ManagerConfig) -> Result<Self> {
        let client = Client::try_default().await.map_err(|e| {
            ManagerError::Config(format!("Failed to create Kubernetes client: {e}"))
        })?;
        Ok(Self::with_client(client, config))
    }

    /// Create a cluster handle around an existing client.
    #[must_use]
    pub fn with_client(client: Client, config: &ManagerConfig) -> Self {
        Self {
            client,
            namespace: config.namespace.clone(),
            readiness_timeout: config.readiness_timeout,
            readiness_poll_interval: config.readiness_poll_interval,
        }
    }

    fn pods_api(&self) -> Api<Pod> {
        Api::namespaced(self.client.clone(), self.namespace.as_str())
    }
}

#[async_trait]
impl PodResolver for K8sCluster {
    async fn resolve_pod(&self, pod_id: &PodId) -> Result<PodInfo> {
        let pod = self
            .pods_api()
            .get_opt(pod_id.as_str())
            .await
            .map_err(|e| ManagerError::PodResolution {
                pod_id: pod_id.clone(),
                message: e.to_string(),
            })?
            .ok_or_else(|| ManagerError::PodResolution {
                pod_id: pod_id.clone(),
                message: format!("pod not found in namespace {}", self.namespace),
            })?;

        let info = pod_info(&pod, pod_id, &self.namespace);
        if info.phase.is_terminal() {
            return Err(ManagerError::PodResolution {
                pod_id: pod_id.clone(),
                message: format!("pod has terminated ({:?})", info.phase),
            });
        }

        debug!(pod = %pod_id, phase = ?info.phase, node = ?info.node_name, "Resolved pod");
        Ok(info)
    }
}

#[async_trait]
impl ReadinessChecker for K8sCluster {
    async fn wait_for_container_ready(&self, pod: &PodInfo, container: &str) -> Result<()> {
        let pods = &self.pods_api();
        let name = pod.pod_id.as_str();

        wait_until_ready(
            move || async move { pods.get_opt(name).await.map_err(|e| e.to_string()) },
            container,
            self.readiness_timeout,
            self.readiness_poll_interval,
        )
        .await
        .map_err(|reason| ManagerError::AgentNotReady {
            pod_id: pod.pod_id.clone(),
            container: container.to_string(),
            reason,
        })?;

        debug!(pod = %pod.pod_id, container, "Agent container is ready");
        Ok(())
    }
}

/// Poll `lookup` until `container` is ready, has failed, or `timeout` passes.
///
/// `lookup` yields the pod's current state, or `None` once the pod is gone.
/// Lookup errors count as "not ready yet". Returns the reason on failure.
async fn wait_until_ready<F, Fut>(
    mut lookup: F,
    container: &str,
    timeout: Duration,
    poll_interval: Duration,
) -> std::result::Result<(), String>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<Option<Pod>, String>>,
{
    let deadline = Instant::now() + timeout;

    loop {
        let readiness = match lookup().await {
            Ok(Some(current)) => container_readiness(&current, container),
            Ok(None) => return Err("pod no longer exists".to_string()),
            Err(e) => ContainerReadiness::Pending(format!("status lookup failed: {e}")),
        };

        let reason = match readiness {
            ContainerReadiness::Ready => return Ok(()),
            ContainerReadiness::Failed(reason) => return Err(reason),
            ContainerReadiness::Pending(reason) => reason,
        };

        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(format!("not ready after {timeout:?}: {reason}"));
        }

        debug!(container, %reason, "Waiting for agent container");
        sleep(poll_interval.min(remaining)).await;
    }
}

#[async_trait]
impl TunnelProvider for K8sCluster {
    async fn open_tunnel(&self, pod_id: &PodId, remote_port: u16) -> Result<Tunnel> {
        let tunnel_error = |message: String| ManagerError::Tunnel {
            pod_id: pod_id.clone(),
            message,
        };

        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
            .await
            .map_err(|e| tunnel_error(format!("failed to bind local port: {e}")))?;
        let local_port = listener
            .local_addr()
            .map_err(|e| tunnel_error(format!("failed to read local address: {e}")))?
            .port();

        let pods = self.pods_api();
        let target = pod_id.clone();
        let forward = move |conn: TcpStream, stop: CancellationToken| {
            let pods = pods.clone();
            let pod_id = target.clone();
            async move {
                if let Err(e) = forward_connection(&pods, &pod_id, remote_port, conn, &stop).await
                {
                    warn!(pod = %pod_id, error = %e, "Tunnel connection failed");
                }
            }
        };

        let shutdown = CancellationToken::new();
        let span = tracing::debug_span!("tunnel", pod = %pod_id, local_port, remote_port);
        tokio::spawn(accept_loop(listener, shutdown.clone(), forward).instrument(span));

        info!(pod = %pod_id, local_port, remote_port, "Opened tunnel");
        Ok(Tunnel {
            local_port,
            closer: shutdown_closer(shutdown),
        })
    }
}

/// A closer that fires `shutdown` when called, or when dropped uncalled.
fn shutdown_closer(shutdown: CancellationToken) -> TunnelCloser {
    let guard = shutdown.drop_guard();
    TunnelCloser::new(move || drop(guard))
}

/// Accept local connections until `shutdown` fires, handing each one to
/// `forward` along with a token that fires on shutdown.
///
/// The listener is closed when the loop ends.
async fn accept_loop<F, Fut>(listener: TcpListener, shutdown: CancellationToken, forward: F)
where
    F: Fn(TcpStream, CancellationToken) -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
{
    loop {
        let accepted = tokio::select! {
            () = shutdown.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        let (conn, peer) = match accepted {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!(error = %e, "Tunnel listener failed");
                break;
            }
        };

        debug!(%peer, "Forwarding tunnel connection");
        tokio::spawn(forward(conn, shutdown.child_token()).in_current_span());
    }

    debug!("Tunnel closed");
}

async fn forward_connection(
    pods: &Api<Pod>,
    pod_id: &PodId,
    remote_port: u16,
    mut conn: TcpStream,
    stop: &CancellationToken,
) -> Result<()> {
    let tunnel_error = |message: String| ManagerError::Tunnel {
        pod_id: pod_id.clone(),
        message,
    };

    let mut forwarder = pods
        .portforward(pod_id.as_str(), &[remote_port])
        .await
        .map_err(|e| tunnel_error(format!("port-forward failed: {e}")))?;
    let mut upstream = forwarder
        .take_stream(remote_port)
        .ok_or_else(|| tunnel_error(format!("port {remote_port} missing from port-forward")))?;

    let copied = tokio::select! {
        () = stop.cancelled() => None,
        copied = tokio::io::copy_bidirectional(&mut conn, &mut upstream) => Some(copied),
    };
    drop(upstream);

    let Some(copied) = copied else {
        forwarder.abort();
        return Ok(());
    };

    let (sent, received) =
        copied.map_err(|e| tunnel_error(format!("copy through tunnel failed: {e}")))?;
    forwarder
        .join()
        .await
        .map_err(|e| tunnel_error(format!("port-forward ended with error: {e}")))?;

    debug!(pod = %pod_id, sent, received, "Tunnel connection finished");
    Ok(())
}

/// Summarize a Kubernetes pod as a [`PodInfo`].
#[must_use]
pub fn pod_info(pod: &Pod, pod_id: &PodId, namespace: &Namespace) -> PodInfo {
    let status = pod.status.as_ref();

    PodInfo {
        pod_id: pod_id.clone(),
        namespace: namespace.clone(),
        phase: status
            .and_then(|s| s.phase.as_deref())
            .map(PodPhase::from_k8s_phase)
            .unwrap_or_default(),
        node_name: pod.spec.as_ref().and_then(|s| s.node_name.clone()),
        pod_ip: status.and_then(|s| s.pod_ip.clone()),
    }
}

/// Read the readiness of `container` from a pod's status.
#[must_use]
pub fn container_readiness(pod: &Pod, container: &str) -> ContainerReadiness {
    let Some(status) = pod
        .status
        .as_ref()
        .and_then(|s| s.container_statuses.as_ref())
        .and_then(|statuses| statuses.iter().find(|cs| cs.name == container))
    else {
        return ContainerReadiness::Pending(format!("container {container} has no status yet"));
    };

    if status.ready {
        return ContainerReadiness::Ready;
    }

    let state = status.state.as_ref();

    if let Some(waiting) = state.and_then(|s| s.waiting.as_ref()) {
        let reason = waiting.reason.clone().unwrap_or_default();
        if FAILURE_REASONS.contains(&reason.as_str()) {
            let message = waiting
                .message
                .as_ref()
                .map_or_else(|| reason.clone(), |m| format!("{reason}: {m}"));
            return ContainerReadiness::Failed(message);
        }
        if !reason.is_empty() {
            return ContainerReadiness::Pending(reason);
        }
    }

    if let Some(terminated) = state.and_then(|s| s.terminated.as_ref()) {
        if terminated.exit_code != 0 {
            let message = terminated
                .message
                .clone()
                .or_else(|| terminated.reason.clone())
                .unwrap_or_else(|| format!("Exit code: {}", terminated.exit_code));
            return ContainerReadiness::Failed(message);
        }
    }

    ContainerReadiness::Pending("container is not ready".to_string())
}

#[cfg(test)]
mod tests {
    use k8s_openapi::api::core::v1::{
        ContainerState, ContainerStateTerminated, ContainerStateWaiting, ContainerStatus, PodSpec,
        PodStatus,
    };

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use tokio::sync::mpsc;

    use super::*;

    fn pod_with(statuses: Vec<ContainerStatus>) -> Pod {
        Pod {
            spec: Some(PodSpec {
                node_name: Some("node-a".to_string()),
                ..Default::default()
            }),
            status: Some(PodStatus {
                phase: Some("Running".to_string()),
                pod_ip: Some("10.0.0.7".to_string()),
                container_statuses: Some(statuses),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn agent_status(ready: bool, state: Option<ContainerState>) -> ContainerStatus {
        ContainerStatus {
            name: "synclet".to_string(),
            ready,
            state,
            ..Default::default()
        }
    }

    fn waiting(reason: &str) -> Option<ContainerState> {
        Some(ContainerState {
            waiting: Some(ContainerStateWaiting {
                reason: Some(reason.to_string()),
                message: None,
            }),
            ..Default::default()
        })
    }

    #[test]
    fn ready_container() {
        let pod = pod_with(vec![agent_status(true, None)]);
        assert_eq!(container_readiness(&pod, "synclet"), ContainerReadiness::Ready);
    }

    #[test]
    fn missing_container_is_pending() {
        let pod = pod_with(vec![]);
        assert!(matches!(
            container_readiness(&pod, "synclet"),
            ContainerReadiness::Pending(_)
        ));
        assert!(matches!(
            container_readiness(&Pod::default(), "synclet"),
            ContainerReadiness::Pending(_)
        ));
    }

    #[test]
    fn other_containers_are_ignored() {
        let mut app = agent_status(true, None);
        app.name = "app".to_string();
        let pod = pod_with(vec![app, agent_status(false, waiting("ContainerCreating"))]);

        assert_eq!(
            container_readiness(&pod, "synclet"),
            ContainerReadiness::Pending("ContainerCreating".to_string())
        );
    }

    #[test]
    fn crash_loop_fails_fast() {
        let pod = pod_with(vec![agent_status(false, waiting("CrashLoopBackOff"))]);
        assert_eq!(
            container_readiness(&pod, "synclet"),
            ContainerReadiness::Failed("CrashLoopBackOff".to_string())
        );
    }

    #[test]
    fn image_pull_failure_includes_message() {
        let state = Some(ContainerState {
            waiting: Some(ContainerStateWaiting {
                reason: Some("ErrImagePull".to_string()),
                message: Some("manifest unknown".to_string()),
            }),
            ..Default::default()
        });
        let pod = pod_with(vec![agent_status(false, state)]);

        assert_eq!(
            container_readiness(&pod, "synclet"),
            ContainerReadiness::Failed("ErrImagePull: manifest unknown".to_string())
        );
    }

    #[test]
    fn nonzero_exit_fails() {
        let state = Some(ContainerState {
            terminated: Some(ContainerStateTerminated {
                exit_code: 137,
                ..Default::default()
            }),
            ..Default::default()
        });
        let pod = pod_with(vec![agent_status(false, state)]);

        assert_eq!(
            container_readiness(&pod, "synclet"),
            ContainerReadiness::Failed("Exit code: 137".to_string())
        );
    }

    #[test]
    fn pod_info_from_status() {
        let pod_id = PodId::parse("web-0").unwrap();
        let info = pod_info(&pod_with(vec![]), &pod_id, &Namespace::default());

        assert_eq!(info.phase, PodPhase::Running);
        assert_eq!(info.node_name.as_deref(), Some("node-a"));
        assert_eq!(info.pod_ip.as_deref(), Some("10.0.0.7"));
        assert_eq!(info.namespace.as_str(), "default");
    }

    #[test]
    fn pod_info_without_status_is_unknown() {
        let pod_id = PodId::parse("web-0").unwrap();
        let info = pod_info(&Pod::default(), &pod_id, &Namespace::default());
        assert_eq!(info.phase, PodPhase::Unknown);
        assert!(info.pod_ip.is_none());
    }

    fn pending_pod() -> Pod {
        pod_with(vec![agent_status(false, waiting("ContainerCreating"))])
    }

    #[tokio::test(start_paused = true)]
    async fn readiness_wait_gives_up_after_timeout() {
        let lookups = AtomicUsize::new(0);
        let start = Instant::now();

        let reason = wait_until_ready(
            || {
                lookups.fetch_add(1, Ordering::SeqCst);
                std::future::ready(Ok(Some(pending_pod())))
            },
            "synclet",
            Duration::from_secs(1),
            Duration::from_millis(250),
        )
        .await
        .unwrap_err();

        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(1));
        assert!(elapsed < Duration::from_millis(1010));
        assert_eq!(lookups.load(Ordering::SeqCst), 5);
        assert!(reason.starts_with("not ready after 1s"));
        assert!(reason.contains("ContainerCreating"));
    }

    #[tokio::test(start_paused = true)]
    async fn readiness_wait_fails_when_pod_disappears() {
        let lookups = AtomicUsize::new(0);
        let start = Instant::now();

        let reason = wait_until_ready(
            || {
                let n = lookups.fetch_add(1, Ordering::SeqCst);
                std::future::ready(Ok((n == 0).then(pending_pod)))
            },
            "synclet",
            Duration::from_secs(5),
            Duration::from_millis(250),
        )
        .await
        .unwrap_err();

        assert_eq!(reason, "pod no longer exists");
        assert_eq!(lookups.load(Ordering::SeqCst), 2);
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(250));
        assert!(elapsed < Duration::from_millis(260));
    }

    #[tokio::test(start_paused = true)]
    async fn readiness_wait_rides_out_lookup_errors() {
        let lookups = AtomicUsize::new(0);

        let result = wait_until_ready(
            || {
                let n = lookups.fetch_add(1, Ordering::SeqCst);
                std::future::ready(match n {
                    0 => Err("connection reset".to_string()),
                    1 => Ok(Some(pending_pod())),
                    _ => Ok(Some(pod_with(vec![agent_status(true, None)]))),
                })
            },
            "synclet",
            Duration::from_secs(5),
            Duration::from_millis(250),
        )
        .await;

        assert!(result.is_ok());
        assert_eq!(lookups.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn readiness_wait_stops_on_crash_loop() {
        let start = Instant::now();

        let reason = wait_until_ready(
            || {
                std::future::ready(Ok(Some(pod_with(vec![agent_status(
                    false,
                    waiting("CrashLoopBackOff"),
                )]))))
            },
            "synclet",
            Duration::from_secs(5),
            Duration::from_millis(250),
        )
        .await
        .unwrap_err();

        assert_eq!(reason, "CrashLoopBackOff");
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[test]
    fn closer_fires_shutdown_when_called_or_dropped() {
        let shutdown = CancellationToken::new();
        let mut closer = shutdown_closer(shutdown.clone());
        assert!(!shutdown.is_cancelled());
        closer.close();
        assert!(shutdown.is_cancelled());

        let shutdown = CancellationToken::new();
        drop(shutdown_closer(shutdown.clone()));
        assert!(shutdown.is_cancelled());
    }

    #[tokio::test]
    async fn closed_tunnel_stops_accepting() {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = CancellationToken::new();
        let (accepted_tx, mut accepted_rx) = mpsc::unbounded_channel();
        let (finished_tx, mut finished_rx) = mpsc::unbounded_channel();

        let forwarded = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&forwarded);
        let task = tokio::spawn(accept_loop(
            listener,
            shutdown.clone(),
            move |_conn: TcpStream, stop: CancellationToken| {
                counter.fetch_add(1, Ordering::SeqCst);
                let accepted = accepted_tx.clone();
                let finished = finished_tx.clone();
                async move {
                    let _ = accepted.send(());
                    stop.cancelled().await;
                    let _ = finished.send(());
                }
            },
        ));

        let _client = TcpStream::connect(addr).await.unwrap();
        accepted_rx.recv().await.unwrap();
        assert_eq!(forwarded.load(Ordering::SeqCst), 1);

        let mut closer = shutdown_closer(shutdown);
        closer.close();
        task.await.unwrap();

        finished_rx.recv().await.unwrap();
        assert!(TcpStream::connect(addr).await.is_err());
        assert_eq!(forwarded.load(Ordering::SeqCst), 1);
    }
}
