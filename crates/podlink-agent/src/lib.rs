//! Client for the sidecar agent that runs inside each target pod.
//!
//! The agent accepts file syncs and command execution for the containers it
//! sits next to. This crate defines the [`AgentClient`] surface the rest of
//! podlink programs against, an HTTP implementation of it, and the
//! [`AgentDialer`] used to connect to an agent through a local tunnel.
//!
//! # Example
//!
//! ```no_run
//! use std::net::SocketAddr;
//! use podlink_agent::{AgentDialer, HttpAgentDialer};
//! use podlink_core::PodId;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let dialer = HttpAgentDialer::default();
//! let addr: SocketAddr = "127.0.0.1:40123".parse()?;
//! let client = dialer.dial(addr).await?;
//!
//! let pod_id = PodId::parse("web-0")?;
//! let container = client.container_id_for_pod(&pod_id, "registry.local/web").await?;
//! println!("container: {container}");
//!
//! client.close().await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod client;
pub mod error;
pub mod types;

#[cfg(any(test, feature = "test-utils"))]
pub mod mock;

pub use client::{AgentClient, AgentDialer, DialerConfig, HttpAgentClient, HttpAgentDialer};
pub use error::{AgentError, Result};
pub use types::{Cmd, ContainerId, UpdateContainerRequest};

#[cfg(any(test, feature = "test-utils"))]
pub use mock::MockAgentClient;
