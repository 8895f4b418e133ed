//! Text Protocol Example
//!
//! A small command protocol on top of the line-session engine:
//!
//! - `PING` or any other line answers `PONG: <line>`
//! - `DATA <n>` reads the next `n` raw bytes and answers `GOT <n>`
//! - `COUNT` reports how many lines this session has sent
//! - `QUIT` ends the session
//!
//! Ctrl-C starts a graceful shutdown; sessions end after their next line
//! and anything still connected after ten seconds is dropped.

use async_trait::async_trait;
use std::time::Duration;
use tcpserve::prelude::*;

struct TextProtocol;

/// Per-session state
#[derive(Default)]
struct Stats {
    lines: usize,
}

#[async_trait]
impl LineHandler for TextProtocol {
    async fn on_accept(&self, session: &mut LineSession) {
        session.set_data(Stats::default());
        tracing::info!(peer = %session.remote_addr(), "session started");
        let _ = session.send_line("WELCOME").await;
    }

    async fn on_line(&self, session: &mut LineSession, line: &str) -> usize {
        if let Some(stats) = session.data_mut::<Stats>() {
            stats.lines += 1;
        }

        if line == "QUIT" {
            session.end();
            return 0;
        }
        if line == "COUNT" {
            let lines = session.data::<Stats>().map_or(0, |s| s.lines);
            let _ = session.send_line(&format!("COUNT: {}", lines)).await;
            return 0;
        }
        if let Some(n) = line.strip_prefix("DATA ").and_then(|n| n.parse().ok()) {
            return n;
        }

        let _ = session.send_line(&format!("PONG: {}", line)).await;
        0
    }

    async fn on_data(&self, session: &mut LineSession, data: Bytes) {
        let _ = session.send_line(&format!("GOT {}", data.len())).await;
    }

    async fn on_quit(&self, session: &mut LineSession) {
        let _ = session.send_line("QUIT").await;
        tracing::info!(peer = %session.remote_addr(), "session ended");
    }
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let server = Server::builder()
        .bind("0.0.0.0:1234")
        .error_sink(|e| tracing::warn!(error = %e, "connection failed"))
        .build_with_handler(LineProtocol::new(TextProtocol).max_line_size(4096))?;

    let serving = {
        let server = server.clone();
        tokio::spawn(async move { server.listen_and_serve().await })
    };

    tokio::select! {
        result = tokio::signal::ctrl_c() => result?,
        result = serving => return Ok(result??),
    }

    let stats = server.stats().await;
    tracing::info!(
        active = stats.active_connections,
        total = stats.total_connections,
        "shutting down"
    );
    if let Err(e) = server.shutdown(Duration::from_secs(10)).await {
        tracing::warn!(error = %e, "shutdown incomplete");
    }
    Ok(())
}
