//! Agent client that owns the tunnel it talks through.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use podlink_agent::{AgentClient, ContainerId, UpdateContainerRequest};
use podlink_core::PodId;

use crate::provider::TunnelCloser;

/// Wraps a dialed client together with the teardown of its tunnel.
///
/// Every operation except [`AgentClient::close`] goes straight to the
/// delegate. Closing closes the delegate first and tears the tunnel down only
/// if that succeeded; a failed close leaves the tunnel up and returns the
/// delegate's error.
pub struct TunneledClient {
    delegate: Arc<dyn AgentClient>,
    closer: Mutex<TunnelCloser>,
}

impl TunneledClient {
    /// Wrap `delegate`, taking ownership of the tunnel teardown.
    #[must_use]
    pub fn new(delegate: Arc<dyn AgentClient>, closer: TunnelCloser) -> Self {
        Self {
            delegate,
            closer: Mutex::new(closer),
        }
    }

    /// Check whether the tunnel is still up.
    #[must_use]
    pub fn tunnel_open(&self) -> bool {
        self.closer.lock().is_pending()
    }
}

#[async_trait]
impl AgentClient for TunneledClient {
    async fn update_container(&self, request: &UpdateContainerRequest) -> podlink_agent::Result<()> {
        self.delegate.update_container(request).await
    }

    async fn container_id_for_pod(
        &self,
        pod_id: &PodId,
        image_ref: &str,
    ) -> podlink_agent::Result<ContainerId> {
        self.delegate.container_id_for_pod(pod_id, image_ref).await
    }

    async fn close(&self) -> podlink_agent::Result<()> {
        self.delegate.close().await?;
        self.closer.lock().close();
        Ok(())
    }
}
