//! Echo Server Example
//!
//! Echoes every byte it receives back to the client. Press Ctrl-C to shut
//! down gracefully.
//!
//! ```text
//! cargo run -p tcpserve --example echo
//! nc 127.0.0.1 1234
//! ```

use std::time::Duration;
use tcpserve::prelude::*;

async fn echo(mut conn: Connection, cancel: Signal) -> Result<()> {
    let mut buf = [0u8; 4096];
    while !cancel.is_fired() {
        let n = tokio::select! {
            n = conn.read(&mut buf) => n?,
            _ = cancel.fired() => break,
        };
        if n == 0 {
            break;
        }
        conn.write_all(&buf[..n]).await?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    let server = Server::builder()
        .bind("0.0.0.0:1234")
        .build_with_handler(from_fn(echo))?;

    let serving = {
        let server = server.clone();
        tokio::spawn(async move { server.listen_and_serve().await })
    };
    tracing::info!("echo server listening on 0.0.0.0:1234");

    tokio::select! {
        result = tokio::signal::ctrl_c() => result?,
        result = serving => return Ok(result??),
    }

    match server.shutdown(Duration::from_secs(5)).await {
        Ok(()) => tracing::info!("all connections finished"),
        Err(e) => tracing::warn!(error = %e, "forced shutdown"),
    }
    Ok(())
}
