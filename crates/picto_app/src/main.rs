mod config;
mod logging;
mod relay;

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use picto_network::{LanTransport, RoomRegistry};

use crate::config::AppConfig;

#[tokio::main]
async fn main() -> Result<()> {
    let _guard = logging::init_logging(&AppConfig::logs_dir()?)?;
    let config = AppConfig::load()?;
    info!(
        "Pictochat v{} starting as {}",
        env!("CARGO_PKG_VERSION"),
        config.display_name
    );

    let transport = Arc::new(LanTransport::from_config(&config.network));
    let registry = Arc::new(
        RoomRegistry::new(&config.network, config.display_name.clone(), transport)
            .context("Failed to create rooms")?,
    );
    info!(
        "Rooms [{}] open as {}",
        registry.room_ids().join(", "),
        registry.local_identity()
    );

    for room in registry.rooms() {
        tokio::spawn(relay::watch_room(room));
    }
    let console = tokio::spawn(relay::relay_stdin(Arc::clone(&registry)));

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("Shutting down");

    console.abort();
    registry.shutdown().await;
    Ok(())
}
