//! Canopy Node binary

use canopy_node::{CanopyNode, NodeConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "canopy_node=info,canopy_progression=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Canopy node");

    let config = NodeConfig::from_env();
    let node = CanopyNode::new(config).await?;
    node.run().await?;

    Ok(())
}
