//! Echo server: sends every received payload back.
//!
//! ```text
//! RUST_LOG=debug cargo run --example echo_server -- 9000
//! ```

use sockwire::server::{EchoHandler, SocketServer};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let port = std::env::args()
        .nth(1)
        .map(|p| p.parse::<u16>())
        .transpose()?
        .unwrap_or(9000);

    let server = SocketServer::bind(port, EchoHandler).await?;
    server.start(true);

    tokio::signal::ctrl_c().await?;
    tracing::info!(connections = server.connection_count(), "Shutting down");
    server.stop();
    Ok(())
}
