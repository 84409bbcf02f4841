//! In-memory agent client for tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use podlink_core::PodId;

use crate::client::AgentClient;
use crate::error::{AgentError, Result};
use crate::types::{ContainerId, UpdateContainerRequest};

/// An agent client that records calls instead of talking to an agent.
#[derive(Debug, Default)]
pub struct MockAgentClient {
    fail_close: AtomicBool,
    close_calls: AtomicUsize,
    closed: AtomicBool,
    updates: Mutex<Vec<UpdateContainerRequest>>,
}

impl MockAgentClient {
    /// Create a mock whose close succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a mock whose close always fails.
    #[must_use]
    pub fn failing_close() -> Self {
        let client = Self::default();
        client.fail_close.store(true, Ordering::SeqCst);
        client
    }

    /// Number of times `close` has been called.
    #[must_use]
    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    /// Check whether a close has succeeded.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Updates received so far.
    #[must_use]
    pub fn updates(&self) -> Vec<UpdateContainerRequest> {
        self.updates.lock().clone()
    }
}

#[async_trait]
impl AgentClient for MockAgentClient {
    async fn update_container(&self, request: &UpdateContainerRequest) -> Result<()> {
        if self.is_closed() {
            return Err(AgentError::Closed);
        }
        self.updates.lock().push(request.clone());
        Ok(())
    }

    async fn container_id_for_pod(&self, pod_id: &PodId, _image_ref: &str) -> Result<ContainerId> {
        if self.is_closed() {
            return Err(AgentError::Closed);
        }
        Ok(ContainerId::new(format!("mock-{pod_id}")))
    }

    async fn close(&self) -> Result<()> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_close.load(Ordering::SeqCst) {
            return Err(AgentError::Decode("mock close failure".to_string()));
        }
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_records_updates_and_closes() {
        let client = MockAgentClient::new();
        let request = UpdateContainerRequest::new(ContainerId::new("c1"), vec![7]);

        client.update_container(&request).await.unwrap();
        assert_eq!(client.updates(), vec![request.clone()]);

        client.close().await.unwrap();
        assert_eq!(client.close_calls(), 1);
        assert!(matches!(
            client.update_container(&request).await,
            Err(AgentError::Closed)
        ));
    }

    #[tokio::test]
    async fn mock_failing_close_stays_open() {
        let client = MockAgentClient::failing_close();
        assert!(client.close().await.is_err());
        assert_eq!(client.close_calls(), 1);
        assert!(!client.is_closed());
    }
}
