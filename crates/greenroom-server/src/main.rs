use anyhow::Result;
use tracing::info;

use greenroom_server::{config::ServerConfig, server, telemetry};

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init()?;

    info!("Greenroom server starting");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = ServerConfig::from_env()?;
    server::start(config).await
}
