//! podlink CLI - talk to the sidecar agent inside a pod.
//!
//! This is the entry point for the `podlink` binary.

use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use podlink_agent::HttpAgentDialer;
use podlink_core::{Namespace, PodId};
use podlink_manager::{AgentClientManager, K8sCluster, ManagerConfig};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// podlink - reach the agent running next to your containers.
#[derive(Parser, Debug)]
#[command(name = "podlink")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Namespace of the target pod.
    #[arg(long, short, env = "PODLINK_NAMESPACE")]
    namespace: Option<Namespace>,

    /// Name of the agent container.
    #[arg(long, env = "PODLINK_AGENT_CONTAINER")]
    container: Option<String>,

    /// Port the agent listens on inside the pod.
    #[arg(long, env = "PODLINK_AGENT_PORT")]
    port: Option<u16>,

    /// Time allowed to connect to the agent, in milliseconds.
    #[arg(long, env = "PODLINK_CLIENT_TIMEOUT_MS")]
    timeout_ms: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Connect to a pod's agent and report whether it answers.
    Check {
        /// The pod to connect to.
        pod: PodId,
    },
    /// Print the container the agent runs for an image.
    ContainerId {
        /// The pod to connect to.
        pod: PodId,
        /// Image reference to look up.
        #[arg(long)]
        image: String,
    },
}

impl Args {
    /// Environment config with command-line overrides applied.
    fn config(&self) -> ManagerConfig {
        let mut config = ManagerConfig::from_env();

        if let Some(namespace) = &self.namespace {
            config.namespace = namespace.clone();
        }
        if let Some(container) = &self.container {
            config.agent_container.clone_from(container);
        }
        if let Some(port) = self.port {
            config.agent_port = port;
        }
        if let Some(ms) = self.timeout_ms {
            config.client_timeout = Duration::from_millis(ms);
        }

        config
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,podlink=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = args.config();
    config.validate()?;

    tracing::debug!(
        namespace = %config.namespace,
        container = %config.agent_container,
        port = config.agent_port,
        timeout = ?config.client_timeout,
        "Loaded configuration"
    );

    let cluster = Arc::new(K8sCluster::new(&config).await?);
    let dialer = Arc::new(HttpAgentDialer::new(config.dialer_config()));
    let manager = AgentClientManager::new(
        cluster.clone(),
        cluster.clone(),
        cluster,
        dialer,
        &config,
    );

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling");
            interrupt.cancel();
        }
    });

    let result = run(&manager, &cancel, args.command).await;

    for e in manager.shutdown().await {
        tracing::warn!(error = %e, "Cleanup failed");
    }

    result
}

async fn run(
    manager: &AgentClientManager,
    cancel: &CancellationToken,
    command: Command,
) -> anyhow::Result<()> {
    match command {
        Command::Check { pod } => {
            let start = Instant::now();
            manager.client_for_pod(cancel, &pod).await?;
            println!("agent in pod {pod} is reachable ({:?})", start.elapsed());
            manager.forget_pod(&pod).await?;
        }
        Command::ContainerId { pod, image } => {
            let client = manager.client_for_pod(cancel, &pod).await?;
            let container = client.container_id_for_pod(&pod, &image).await?;
            println!("{container}");
        }
    }

    Ok(())
}
