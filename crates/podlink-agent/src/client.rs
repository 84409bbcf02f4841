//! Agent client trait and its HTTP implementation.
//!
//! The agent serves a small JSON API. The client only ever talks to it
//! through a local endpoint, normally the near side of a port-forward.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use podlink_core::PodId;
use serde::{Deserialize, Serialize};

use crate::error::{AgentError, Result};
use crate::types::{Cmd, ContainerId, UpdateContainerRequest};

/// The operations a sidecar agent supports.
///
/// Handles are shared behind `Arc`, so every method takes `&self`.
#[async_trait]
pub trait AgentClient: Send + Sync {
    /// Sync files into a container and run follow-up commands.
    ///
    /// # Errors
    ///
    /// Returns an error if the agent rejects the update or cannot be reached.
    async fn update_container(&self, request: &UpdateContainerRequest) -> Result<()>;

    /// Look up the container running `image_ref` in the given pod.
    ///
    /// # Errors
    ///
    /// Returns an error if the agent has no such container or cannot be reached.
    async fn container_id_for_pod(&self, pod_id: &PodId, image_ref: &str) -> Result<ContainerId>;

    /// Release the client. Later calls fail with [`AgentError::Closed`].
    ///
    /// # Errors
    ///
    /// Returns an error if the client could not be shut down cleanly.
    async fn close(&self) -> Result<()>;
}

/// Connects to an agent listening at a local address.
#[async_trait]
pub trait AgentDialer: Send + Sync {
    /// Dial the agent at `addr` and return a connected client.
    ///
    /// # Errors
    ///
    /// Returns an error if the agent cannot be reached or is unhealthy.
    async fn dial(&self, addr: SocketAddr) -> Result<Arc<dyn AgentClient>>;
}

/// Timeouts applied to dialed HTTP clients.
#[derive(Debug, Clone, Copy)]
pub struct DialerConfig {
    /// TCP connect timeout.
    pub connect_timeout: Duration,
    /// Per-request timeout.
    pub request_timeout: Duration,
}

impl Default for DialerConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Dials [`HttpAgentClient`]s, checking `/health` before handing them out.
#[derive(Debug, Clone, Default)]
pub struct HttpAgentDialer {
    config: DialerConfig,
}

impl HttpAgentDialer {
    /// Create a dialer with the given timeouts.
    #[must_use]
    pub fn new(config: DialerConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl AgentDialer for HttpAgentDialer {
    async fn dial(&self, addr: SocketAddr) -> Result<Arc<dyn AgentClient>> {
        let client = reqwest::Client::builder()
            .connect_timeout(self.config.connect_timeout)
            .timeout(self.config.request_timeout)
            .build()?;

        let agent = HttpAgentClient::with_client(client, format!("http://{addr}"));
        agent.health().await?;

        tracing::debug!(addr = %addr, "Connected to agent");
        Ok(Arc::new(agent))
    }
}

/// HTTP client for the sidecar agent.
#[derive(Debug)]
pub struct HttpAgentClient {
    client: reqwest::Client,
    base_url: String,
    closed: AtomicBool,
}

/// Wire form of [`UpdateContainerRequest`].
#[derive(Debug, Serialize)]
struct UpdateContainerBody<'a> {
    archive: String,
    files_to_delete: &'a [String],
    commands: &'a [Cmd],
    hot_reload: bool,
}

#[derive(Debug, Deserialize)]
struct ContainerIdResponse {
    container_id: ContainerId,
}

/// Error response from the agent.
#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: String,
}

impl HttpAgentClient {
    /// Create a client for the agent at `base_url` using a preconfigured
    /// reqwest client.
    #[must_use]
    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            closed: AtomicBool::new(false),
        }
    }

    /// Check whether [`AgentClient::close`] has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Probe the agent's health endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::Unhealthy`] on a non-success status, or a
    /// request error if the agent cannot be reached.
    pub async fn health(&self) -> Result<()> {
        self.ensure_open()?;

        let url = format!("{}/health", self.base_url);
        let response = self.client.get(&url).send().await?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(AgentError::Unhealthy(format!(
                "health check returned {}",
                response.status()
            )))
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(AgentError::Closed)
        } else {
            Ok(())
        }
    }

    async fn error_from(response: reqwest::Response) -> AgentError {
        let status = response.status();
        let message = response
            .json::<ErrorResponse>()
            .await
            .map(|e| e.error)
            .unwrap_or_else(|_| format!("agent returned status {status}"));

        AgentError::Status {
            status: status.as_u16(),
            message,
        }
    }
}

#[async_trait]
impl AgentClient for HttpAgentClient {
    async fn update_container(&self, request: &UpdateContainerRequest) -> Result<()> {
        self.ensure_open()?;

        let url = format!(
            "{}/v1/containers/{}/update",
            self.base_url, request.container_id
        );
        let body = UpdateContainerBody {
            archive: base64::engine::general_purpose::STANDARD.encode(&request.archive),
            files_to_delete: &request.files_to_delete,
            commands: &request.commands,
            hot_reload: request.hot_reload,
        };

        let response = self.client.post(&url).json(&body).send().await?;

        if response.status().is_success() {
            tracing::debug!(
                container_id = %request.container_id,
                archive_bytes = request.archive.len(),
                deleted = request.files_to_delete.len(),
                commands = request.commands.len(),
                "Updated container via agent"
            );
            Ok(())
        } else {
            Err(Self::error_from(response).await)
        }
    }

    async fn container_id_for_pod(&self, pod_id: &PodId, image_ref: &str) -> Result<ContainerId> {
        self.ensure_open()?;

        let url = format!("{}/v1/pods/{}/container-id", self.base_url, pod_id);
        let response = self
            .client
            .get(&url)
            .query(&[("image", image_ref)])
            .send()
            .await?;

        if response.status().is_success() {
            let body: ContainerIdResponse = response
                .json()
                .await
                .map_err(|e| AgentError::Decode(e.to_string()))?;
            Ok(body.container_id)
        } else {
            Err(Self::error_from(response).await)
        }
    }

    async fn close(&self) -> Result<()> {
        // Pooled connections go away with the last handle.
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn healthy_server() -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        server
    }

    #[tokio::test]
    async fn dial_checks_health() {
        let server = healthy_server().await;

        let client = HttpAgentDialer::default()
            .dial(*server.address())
            .await
            .unwrap();

        let pod_id = PodId::parse("web-0").unwrap();
        Mock::given(method("GET"))
            .and(path("/v1/pods/web-0/container-id"))
            .and(query_param("image", "registry.local/web"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "container_id": "abc123" })),
            )
            .mount(&server)
            .await;

        let id = client
            .container_id_for_pod(&pod_id, "registry.local/web")
            .await
            .unwrap();
        assert_eq!(id, ContainerId::new("abc123"));
    }

    #[tokio::test]
    async fn dial_fails_when_unhealthy() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let result = HttpAgentDialer::default().dial(*server.address()).await;
        assert!(matches!(result, Err(AgentError::Unhealthy(_))));
    }

    #[tokio::test]
    async fn update_container_sends_base64_archive() {
        let server = healthy_server().await;
        Mock::given(method("POST"))
            .and(path("/v1/containers/c1/update"))
            .and(body_partial_json(serde_json::json!({
                "archive": "AQID",
                "files_to_delete": ["/app/old.txt"],
                "hot_reload": true
            })))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let client = HttpAgentClient::with_client(reqwest::Client::new(), server.uri());
        let mut request = UpdateContainerRequest::new(ContainerId::new("c1"), vec![1, 2, 3]);
        request.files_to_delete.push("/app/old.txt".to_string());
        request.hot_reload = true;

        client.update_container(&request).await.unwrap();
    }

    #[tokio::test]
    async fn agent_error_body_is_surfaced() {
        let server = healthy_server().await;
        Mock::given(method("GET"))
            .and(path("/v1/pods/web-0/container-id"))
            .respond_with(
                ResponseTemplate::new(404)
                    .set_body_json(serde_json::json!({ "error": "no container for image" })),
            )
            .mount(&server)
            .await;

        let client = HttpAgentClient::with_client(reqwest::Client::new(), server.uri());
        let pod_id = PodId::parse("web-0").unwrap();
        let err = client
            .container_id_for_pod(&pod_id, "missing")
            .await
            .unwrap_err();

        match err {
            AgentError::Status { status, message } => {
                assert_eq!(status, 404);
                assert_eq!(message, "no container for image");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn closed_client_rejects_calls() {
        let server = healthy_server().await;
        let client = HttpAgentClient::with_client(reqwest::Client::new(), server.uri());

        client.close().await.unwrap();
        assert!(client.is_closed());

        let pod_id = PodId::parse("web-0").unwrap();
        let result = client.container_id_for_pod(&pod_id, "img").await;
        assert!(matches!(result, Err(AgentError::Closed)));
        assert!(matches!(client.health().await, Err(AgentError::Closed)));
    }
}
