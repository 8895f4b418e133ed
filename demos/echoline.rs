//! Line Echo Example
//!
//! Greets each client with `WELCOME`, echoes every line back, and ends the
//! session on `QUIT`.

use async_trait::async_trait;
use tcpserve::prelude::*;

struct EchoLine;

#[async_trait]
impl LineHandler for EchoLine {
    async fn on_accept(&self, session: &mut LineSession) {
        let _ = session.send_line("WELCOME").await;
    }

    async fn on_line(&self, session: &mut LineSession, line: &str) -> usize {
        println!("{}", line);
        if line == "QUIT" {
            session.end();
            return 0;
        }
        let _ = session.send_line(line).await;
        0
    }

    async fn on_quit(&self, session: &mut LineSession) {
        let _ = session.send_line("QUIT").await;
    }
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let server = Server::builder()
        .bind("0.0.0.0:1234")
        .build_with_handler(LineProtocol::new(EchoLine))?;

    server.listen_and_serve().await?;
    Ok(())
}
