//! TLS Text Protocol Example
//!
//! Same `PONG` protocol as the plain example, served over TLS.
//!
//! ```text
//! cargo run -p tcpserve --features transport-tls --example textprotocol_tls -- cert.pem key.pem
//! openssl s_client -connect 127.0.0.1:1443
//! ```

use async_trait::async_trait;
use tcpserve::prelude::*;

struct Pong;

#[async_trait]
impl LineHandler for Pong {
    async fn on_line(&self, session: &mut LineSession, line: &str) -> usize {
        if line == "QUIT" {
            session.end();
        } else {
            let _ = session.send_line(&format!("PONG: {}", line)).await;
        }
        0
    }
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let mut args = std::env::args().skip(1);
    let (Some(cert), Some(key)) = (args.next(), args.next()) else {
        eprintln!("usage: textprotocol_tls <cert.pem> <key.pem>");
        std::process::exit(2);
    };

    let server = Server::builder()
        .bind("0.0.0.0:1443")
        .tls(cert, key)
        .error_sink(|e| tracing::warn!(error = %e, "connection failed"))
        .build_with_handler(LineProtocol::new(Pong))?;

    server.listen_and_serve().await?;
    Ok(())
}
