//! Per-pod agent client management for podlink.
//!
//! This crate provides the [`AgentClientManager`], which hands out one shared
//! client per pod for the sidecar agent running inside it. It handles:
//!
//! - Lazy client creation, with retries bounded by a timeout
//! - Tunneling to the agent port through the Kubernetes port-forward API
//! - Eviction that closes both the client and its tunnel
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                           Callers                                │
//! └─────────────────────────────────────────────────────────────────┘
//!                              │ client_for_pod / forget_pod
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    AgentClientManager                            │
//! │  ┌──────────────────────┐      ┌──────────────────────────┐     │
//! │  │  pod -> client map   │─────▶│  poll_for_client          │     │
//! │  │  (one lock)          │ miss │  (backoff, deadline)      │     │
//! │  └──────────────────────┘      └──────────────────────────┘     │
//! └─────────────────────────────────────────────────────────────────┘
//!                              │ new_client
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                  TunnelingClientFactory                          │
//! │   resolve pod ─▶ wait for agent ─▶ open tunnel ─▶ dial agent     │
//! └─────────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │          K8sCluster (API server + port-forward)                  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use podlink_agent::HttpAgentDialer;
//! use podlink_core::PodId;
//! use podlink_manager::{AgentClientManager, K8sCluster, ManagerConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ManagerConfig::from_env();
//! config.validate()?;
//!
//! let cluster = Arc::new(K8sCluster::new(&config).await?);
//! let dialer = Arc::new(HttpAgentDialer::new(config.dialer_config()));
//! let manager = AgentClientManager::new(
//!     cluster.clone(),
//!     cluster.clone(),
//!     cluster,
//!     dialer,
//!     &config,
//! );
//!
//! let pod_id = PodId::parse("web-0")?;
//! let client = manager.client_for_pod(&CancellationToken::new(), &pod_id).await?;
//! let container = client.container_id_for_pod(&pod_id, "registry.local/web").await?;
//! println!("container: {container}");
//!
//! manager.forget_pod(&pod_id).await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Testing
//!
//! Enable the `test-utils` feature to build a manager that never touches the
//! network:
//!
//! ```ignore
//! use std::sync::Arc;
//! use podlink_agent::MockAgentClient;
//! use podlink_manager::AgentClientManager;
//!
//! let manager = AgentClientManager::for_tests(Arc::new(MockAgentClient::new()));
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod factory;
pub mod k8s;
pub mod manager;
pub mod poll;
pub mod provider;
pub mod tunnel;
pub mod types;

#[cfg(any(test, feature = "test-utils"))]
pub mod mock;

pub use error::{ManagerError, Result};
pub use factory::{ClientFactory, TunnelingClientFactory};
pub use k8s::{ContainerReadiness, K8sCluster};
pub use manager::AgentClientManager;
pub use poll::poll_for_client;
pub use provider::{PodResolver, ReadinessChecker, Tunnel, TunnelCloser, TunnelProvider};
pub use tunnel::TunneledClient;
pub use types::{ManagerConfig, PodInfo, PodPhase, RetryPolicy};

#[cfg(any(test, feature = "test-utils"))]
pub use mock::{MockClientFactory, MockCluster, MockDialer, StaticClientFactory};
