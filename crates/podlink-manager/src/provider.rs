//! Cluster-facing collaborators used to create a client.
//!
//! Each trait covers one step of client creation. [`crate::k8s::K8sCluster`]
//! implements all three against a real cluster; tests substitute doubles.

use std::fmt;

use async_trait::async_trait;
use podlink_core::PodId;

use crate::types::PodInfo;
use crate::Result;

/// Looks up a pod by name in the manager's namespace.
#[async_trait]
pub trait PodResolver: Send + Sync {
    /// Resolve the pod's current state.
    ///
    /// # Errors
    ///
    /// Returns [`crate::ManagerError::PodResolution`] if the pod does not
    /// exist, has terminated, or the lookup fails.
    async fn resolve_pod(&self, pod_id: &PodId) -> Result<PodInfo>;
}

/// Waits for a named container inside a pod to report ready.
#[async_trait]
pub trait ReadinessChecker: Send + Sync {
    /// Block until `container` in `pod` is ready.
    ///
    /// # Errors
    ///
    /// Returns [`crate::ManagerError::AgentNotReady`] if the container is
    /// crash-looping or does not become ready in time.
    async fn wait_for_container_ready(&self, pod: &PodInfo, container: &str) -> Result<()>;
}

/// Opens local forwards into pods.
#[async_trait]
pub trait TunnelProvider: Send + Sync {
    /// Forward a local ephemeral port on the loopback interface to
    /// `remote_port` inside the pod.
    ///
    /// # Errors
    ///
    /// Returns [`crate::ManagerError::Tunnel`] if the forward cannot be set up.
    async fn open_tunnel(&self, pod_id: &PodId, remote_port: u16) -> Result<Tunnel>;
}

/// An open forward into a pod.
#[derive(Debug)]
pub struct Tunnel {
    /// Loopback port that reaches the pod.
    pub local_port: u16,
    /// Tears the forward down.
    pub closer: TunnelCloser,
}

/// A one-shot teardown for a tunnel.
///
/// Calling [`TunnelCloser::close`] more than once runs the teardown once.
/// Dropping a closer without calling it drops the teardown unrun. Tunnels
/// from [`crate::k8s::K8sCluster`] still shut down then, since their teardown
/// releases the tunnel when dropped.
#[derive(Default)]
pub struct TunnelCloser(Option<Box<dyn FnOnce() + Send>>);

impl TunnelCloser {
    /// Wrap a teardown function.
    pub fn new(teardown: impl FnOnce() + Send + 'static) -> Self {
        Self(Some(Box::new(teardown)))
    }

    /// Run the teardown if it has not run yet.
    pub fn close(&mut self) {
        if let Some(teardown) = self.0.take() {
            teardown();
        }
    }

    /// Check whether the teardown is still pending.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.0.is_some()
    }
}

impl fmt::Debug for TunnelCloser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TunnelCloser")
            .field("pending", &self.is_pending())
            .finish()
    }
}

/// Closes a tunnel on drop unless it was handed off with [`TunnelGuard::disarm`].
///
/// Covers every exit from client creation between opening the tunnel and
/// wrapping the client, including the attempt future being dropped.
pub(crate) struct TunnelGuard {
    closer: TunnelCloser,
}

impl TunnelGuard {
    pub(crate) fn new(closer: TunnelCloser) -> Self {
        Self { closer }
    }

    /// Hand the teardown to a new owner without running it.
    pub(crate) fn disarm(mut self) -> TunnelCloser {
        std::mem::take(&mut self.closer)
    }

    /// Tear the tunnel down now.
    pub(crate) fn close(mut self) {
        self.closer.close();
    }
}

impl Drop for TunnelGuard {
    fn drop(&mut self) {
        self.closer.close();
    }
}
