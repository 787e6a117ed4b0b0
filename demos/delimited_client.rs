//! Sends a delimited message to a server and reads it back frame by frame.
//!
//! Start `echo_server` first:
//!
//! ```text
//! cargo run --example echo_server -- 9000
//! cargo run --example delimited_client -- 127.0.0.1 9000
//! ```

use std::time::Duration;

use sockwire::{SocketClient, SocketError};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut args = std::env::args().skip(1);
    let host = args.next().unwrap_or_else(|| "127.0.0.1".to_string());
    let port = args.next().map(|p| p.parse::<u16>()).transpose()?.unwrap_or(9000);

    let client = SocketClient::builder(host, port)
        .connect_timeout(Duration::from_secs(2))
        .debug(true)
        .start()
        .await?;

    client.send_str("Hello Baby#With a Separator#");

    loop {
        match client.read_string_until("#", Duration::from_secs(1)).await {
            Ok(frame) => tracing::info!(%frame, "Frame"),
            Err(SocketError::Timeout(_)) => break,
            Err(e) => return Err(e.into()),
        }
    }

    let rest = client.read_string(true)?;
    if !rest.is_empty() {
        tracing::info!(%rest, "Unterminated tail");
    }
    client.stop();
    Ok(())
}
