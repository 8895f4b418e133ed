//! Cooperative handler example
//!
//! Streams a tick line to each client every second until the client hangs
//! up or the server starts shutting down. Ctrl-C gives clients three
//! seconds to receive their goodbye before they are dropped.
//!
//! Run with `--features logging` to see the server's own events.

use std::time::Duration;
use tcpserve_server::prelude::*;

async fn ticker(mut conn: Connection, cancel: Signal) -> Result<()> {
    let mut interval = tokio::time::interval(Duration::from_secs(1));
    let mut ticks = 0u64;

    loop {
        tokio::select! {
            _ = interval.tick() => {
                ticks += 1;
                conn.write_all(format!("tick {}\r\n", ticks).as_bytes()).await?;
            }
            _ = cancel.fired() => {
                conn.write_all(b"server shutting down, goodbye\r\n").await?;
                return Ok(());
            }
        }
    }
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tcpserve_server::logging::init_logging()?;

    let server = Server::builder()
        .bind("127.0.0.1:8080")
        .build_with_handler(from_fn(ticker))?;

    println!("tick server listening on 127.0.0.1:8080");

    let serving = {
        let server = server.clone();
        tokio::spawn(async move { server.listen_and_serve().await })
    };

    tokio::signal::ctrl_c().await?;
    println!("{} client(s) connected, shutting down", server.connection_count().await);
    server.shutdown(Duration::from_secs(3)).await?;
    serving.await??;
    Ok(())
}
