//! HTTP IP Example
//!
//! Answers any HTTP request with the client's IP address once the request
//! headers end.
//!
//! ```text
//! cargo run -p tcpserve --example httpip
//! curl http://127.0.0.1:8000/
//! ```

use async_trait::async_trait;
use tcpserve::prelude::*;

struct HttpIp;

#[async_trait]
impl LineHandler for HttpIp {
    async fn on_line(&self, session: &mut LineSession, line: &str) -> usize {
        // blank line ends the request headers
        if line.is_empty() {
            let ip = session.remote_addr().ip().to_string();
            for reply in ["HTTP/1.1 200 OK", "", ip.as_str()] {
                if session.send_line(reply).await.is_err() {
                    break;
                }
            }
            session.end();
        }
        0
    }
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let server = Server::builder()
        .bind("0.0.0.0:8000")
        .build_with_handler(LineProtocol::new(HttpIp))?;

    server.listen_and_serve().await?;
    Ok(())
}
