//! pinbus-node: standalone endpoint daemon.
//!
//! Loads configuration, registers the built-in system node only, and runs
//! the endpoint until Ctrl-C. Useful as a relay peer or for probing a
//! deployment with `GET /system/routes` and `GET /system/stats`.

use tracing::{error, info};

use pinbus::{Config, Endpoint};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    pinbus::bootstrap::init_tracing();

    let config_path = pinbus::bootstrap::parse_config_path();
    let config = Config::load(config_path.as_deref()).map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(endpoint_id = %config.endpoint_id, "Starting pinbus node");
    let endpoint = Endpoint::new(config);
    endpoint.run().await?;

    tokio::signal::ctrl_c().await?;
    endpoint.stop().await;
    Ok(())
}
