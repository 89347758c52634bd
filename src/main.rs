use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info};
use tokio::runtime::Builder;
use tokio::sync::broadcast::error::RecvError;

use overlay_router::algorithms::AlgorithmKind;
use overlay_router::{Node, NodeConfig, shell};

#[derive(Parser)]
#[command(name = "overlay-router", about = "Overlay network node with pluggable routing")]
struct Cli {
    /// JSON configuration file, command-line flags take precedence
    #[arg(long)]
    config: Option<String>,

    #[arg(long)]
    name: Option<String>,

    #[arg(long)]
    port: Option<u16>,

    #[arg(long, value_enum)]
    algorithm: Option<AlgorithmKind>,

    /// Act as the coordinator of a centralized link-state overlay
    #[arg(long)]
    coordinator: bool,

    /// host:port of the coordinator to join
    #[arg(long)]
    coordinator_addr: Option<String>,

    /// Write the effective configuration to this file and continue
    #[arg(long)]
    save_config: Option<String>,
}

impl Cli {
    fn node_config(&self) -> Result<NodeConfig> {
        let mut config = match &self.config {
            Some(path) => NodeConfig::load(path).with_context(|| format!("loading {}", path))?,
            None => NodeConfig::default(),
        };

        if let Some(name) = &self.name {
            config.name = Some(name.clone());
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(algorithm) = self.algorithm {
            config.algorithm = algorithm;
        }
        if self.coordinator {
            config.coordinator = true;
        }
        if let Some(addr) = &self.coordinator_addr {
            config.coordinator_addr = Some(addr.clone());
        }
        Ok(config)
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let mut config = cli.node_config()?;
    config.resolve_name();
    if let Some(path) = &cli.save_config {
        config.save(path).with_context(|| format!("saving {}", path))?;
    }

    let rt = Builder::new_multi_thread().enable_all().build()?;

    rt.block_on(async {
        let handle = Node::spawn(config.clone()).await?;
        println!(
            "Node {} ({}) listening on port {}",
            handle.name(),
            handle.algorithm(),
            handle.local_addr().port()
        );

        if let Some(addr) = &config.coordinator_addr {
            match handle.attach_coordinator(addr).await {
                Ok(coordinator) => info!("Joined coordinator {}", coordinator),
                Err(e) => error!("Could not join coordinator at {}: {}", addr, e),
            }
        }

        let mut deliveries = handle.deliveries();
        tokio::spawn(async move {
            loop {
                match deliveries.recv().await {
                    Ok(delivery) => println!(
                        "\nReceived {} from {} via {}: {}",
                        delivery.packet.inner_type,
                        delivery.from,
                        delivery.path.join(" -> "),
                        delivery.packet.inner_payload
                    ),
                    Err(RecvError::Lagged(missed)) => error!("Missed {} deliveries", missed),
                    Err(RecvError::Closed) => break,
                }
            }
        });

        shell::run(handle).await
    })
}
