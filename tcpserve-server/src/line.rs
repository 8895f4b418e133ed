//! Line-oriented sessions
//!
//! [`LineProtocol`] turns a [`LineHandler`] into a connection [`Handler`]
//! for text protocols: the client sends CRLF or LF terminated lines and the
//! handler may ask for a raw block of bytes after any line by returning its
//! length from [`LineHandler::on_line`].
//!
//! ```no_run
//! use async_trait::async_trait;
//! use tcpserve_server::line::{LineHandler, LineProtocol, LineSession};
//!
//! struct Pong;
//!
//! #[async_trait]
//! impl LineHandler for Pong {
//!     async fn on_line(&self, session: &mut LineSession, line: &str) -> usize {
//!         let _ = session.send_line(&format!("PONG: {}", line)).await;
//!         0
//!     }
//! }
//!
//! let protocol = LineProtocol::new(Pong).max_line_size(4096);
//! ```

use crate::connection::Connection;
use crate::handler::Handler;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use std::any::Any;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use tcpserve_core::{read_line_limited, trim_crlf, Error, Result, Signal};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufStream};
use tracing::debug;

/// Line length limit used when none is configured
pub const DEFAULT_MAX_LINE_SIZE: usize = 1024;

/// Callbacks driven by a line session
///
/// Every method has a no-op default, so implementors only override what
/// their protocol needs.
#[async_trait]
pub trait LineHandler: Send + Sync + 'static {
    /// Called once before the first line is read
    async fn on_accept(&self, _session: &mut LineSession) {}

    /// Called for each line with its terminator removed.
    ///
    /// Returning `n > 0` makes the session read exactly `n` raw bytes next
    /// and pass them to [`on_data`](LineHandler::on_data).
    async fn on_line(&self, _session: &mut LineSession, _line: &str) -> usize {
        0
    }

    /// Called with the raw block requested by `on_line`
    async fn on_data(&self, _session: &mut LineSession, _data: Bytes) {}

    /// Called once when the session ends, whatever the reason
    async fn on_quit(&self, _session: &mut LineSession) {}
}

/// State of one line-oriented connection
pub struct LineSession {
    stream: BufStream<Connection>,
    done: Signal,
    cancel: Signal,
    data: Option<Box<dyn Any + Send>>,
}

impl std::fmt::Debug for LineSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LineSession")
            .field("connection", self.stream.get_ref())
            .field("ending", &self.is_ending())
            .field("data", &self.data.is_some())
            .finish()
    }
}

impl LineSession {
    fn new(connection: Connection, cancel: Signal) -> Self {
        Self {
            stream: BufStream::new(connection),
            done: Signal::new(),
            cancel,
            data: None,
        }
    }

    /// Send `line` followed by CRLF and flush
    pub async fn send_line(&mut self, line: &str) -> Result<()> {
        let result = self.write_flushed(&[line.as_bytes(), b"\r\n"]).await;
        self.check_write(result)
    }

    /// Send raw bytes and flush
    pub async fn send_data(&mut self, data: &[u8]) -> Result<()> {
        let result = self.write_flushed(&[data]).await;
        self.check_write(result)
    }

    async fn write_flushed(&mut self, parts: &[&[u8]]) -> io::Result<()> {
        for part in parts {
            self.stream.write_all(part).await?;
        }
        self.stream.flush().await
    }

    fn check_write(&self, result: io::Result<()>) -> Result<()> {
        result.map_err(|e| {
            self.done.fire();
            if e.kind() == io::ErrorKind::WriteZero {
                Error::ShortWrite
            } else {
                Error::Io(e)
            }
        })
    }

    /// Ask the session to end.
    ///
    /// Takes effect before the next line is read; a read already in
    /// progress is not interrupted.
    pub fn end(&self) {
        self.done.fire();
    }

    /// Whether the session or the server has asked for the session to end
    pub fn is_ending(&self) -> bool {
        self.done.is_fired() || self.cancel.is_fired()
    }

    /// Whether the server is shutting down
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_fired()
    }

    /// The underlying connection
    pub fn connection(&self) -> &Connection {
        self.stream.get_ref()
    }

    /// Connection id
    pub fn id(&self) -> u64 {
        self.connection().id()
    }

    /// Client address
    pub fn remote_addr(&self) -> SocketAddr {
        self.connection().remote_addr()
    }

    /// Store per-session data, replacing any previous value
    pub fn set_data<T: Any + Send>(&mut self, value: T) {
        self.data = Some(Box::new(value));
    }

    /// Per-session data, if set and of type `T`
    pub fn data<T: Any + Send>(&self) -> Option<&T> {
        self.data.as_ref()?.downcast_ref::<T>()
    }

    /// Mutable per-session data, if set and of type `T`
    pub fn data_mut<T: Any + Send>(&mut self) -> Option<&mut T> {
        self.data.as_mut()?.downcast_mut::<T>()
    }
}

/// Adapts a [`LineHandler`] into a connection [`Handler`]
#[derive(Debug)]
pub struct LineProtocol<H> {
    handler: H,
    max_line_size: usize,
}

impl<H: LineHandler> LineProtocol<H> {
    /// Wrap a line handler using [`DEFAULT_MAX_LINE_SIZE`]
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            max_line_size: DEFAULT_MAX_LINE_SIZE,
        }
    }

    /// Longest accepted line in bytes, terminator included; `0` restores
    /// the default
    pub fn max_line_size(mut self, size: usize) -> Self {
        self.max_line_size = if size == 0 { DEFAULT_MAX_LINE_SIZE } else { size };
        self
    }

    /// The wrapped line handler
    pub fn handler(&self) -> &H {
        &self.handler
    }

    async fn run(&self, connection: Connection, cancel: Signal) -> Result<()> {
        let mut session = LineSession::new(connection, cancel);
        let mut failure = None;

        self.handler.on_accept(&mut session).await;

        while !session.is_ending() {
            let line =
                match read_line_limited(&mut session.stream, b'\n', self.max_line_size).await {
                    Ok(line) => line,
                    Err(e) => {
                        stop(&session, e, &mut failure);
                        continue;
                    }
                };

            let text = String::from_utf8_lossy(trim_crlf(&line));
            let n = self.handler.on_line(&mut session, &text).await;
            if n == 0 {
                continue;
            }

            let mut block = BytesMut::zeroed(n);
            match session.stream.read_exact(&mut block).await {
                Ok(_) => self.handler.on_data(&mut session, block.freeze()).await,
                Err(e) => stop(&session, Error::Io(e), &mut failure),
            }
        }

        if let Err(e) = session.stream.flush().await {
            debug!(id = session.id(), error = %e, "final flush failed");
        }
        self.handler.on_quit(&mut session).await;

        failure.map_or(Ok(()), Err)
    }
}

/// End the session after a failed read, keeping errors other than a
/// disconnect for the caller
fn stop(session: &LineSession, error: Error, failure: &mut Option<Error>) {
    session.done.fire();
    if is_disconnect(&error) {
        debug!(id = session.id(), "peer disconnected");
    } else {
        debug!(id = session.id(), error = %error, "ending session");
        failure.get_or_insert(error);
    }
}

fn is_disconnect(error: &Error) -> bool {
    match error {
        Error::Io(e) => matches!(
            e.kind(),
            io::ErrorKind::UnexpectedEof
                | io::ErrorKind::ConnectionReset
                | io::ErrorKind::ConnectionAborted
                | io::ErrorKind::BrokenPipe
        ),
        _ => false,
    }
}

impl<H: LineHandler> Handler for LineProtocol<H> {
    fn serve<'a>(
        &'a self,
        connection: Connection,
        cancel: Signal,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(self.run(connection, cancel))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::testing;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};

    #[derive(Default)]
    struct Recorder {
        lines: Mutex<Vec<String>>,
        blocks: Mutex<Vec<Bytes>>,
        accepts: AtomicUsize,
        quits: AtomicUsize,
    }

    #[async_trait]
    impl LineHandler for Arc<Recorder> {
        async fn on_accept(&self, _session: &mut LineSession) {
            self.accepts.fetch_add(1, Ordering::SeqCst);
        }

        async fn on_line(&self, session: &mut LineSession, line: &str) -> usize {
            self.lines.lock().unwrap().push(line.to_string());
            match line {
                "PING" => {
                    session.send_line(&format!("PONG: {}", line)).await.unwrap();
                    0
                }
                "QUIT" => {
                    session.end();
                    0
                }
                _ => line
                    .strip_prefix("DATA ")
                    .and_then(|n| n.parse().ok())
                    .unwrap_or(0),
            }
        }

        async fn on_data(&self, _session: &mut LineSession, data: Bytes) {
            self.blocks.lock().unwrap().push(data);
        }

        async fn on_quit(&self, _session: &mut LineSession) {
            self.quits.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn protocol() -> (Arc<Recorder>, LineProtocol<Arc<Recorder>>) {
        let recorder = Arc::new(Recorder::default());
        (recorder.clone(), LineProtocol::new(recorder))
    }

    #[tokio::test]
    async fn test_lines_are_trimmed() {
        let (recorder, protocol) = protocol();
        let (mut client, server) = tokio::io::duplex(256);

        client.write_all(b"hello\r\nworld\n\r\n").await.unwrap();
        drop(client);

        let result = protocol
            .serve(testing::connection(server), Signal::new())
            .await;
        assert!(result.is_ok());
        assert_eq!(*recorder.lines.lock().unwrap(), vec!["hello", "world", ""]);
        assert_eq!(recorder.accepts.load(Ordering::SeqCst), 1);
        assert_eq!(recorder.quits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_ping_pong() {
        let (_recorder, protocol) = protocol();
        let (client, server) = tokio::io::duplex(256);

        let session = tokio::spawn(async move {
            protocol
                .serve(testing::connection(server), Signal::new())
                .await
        });

        let mut client = BufReader::new(client);
        client.write_all(b"PING\r\n").await.unwrap();
        let mut reply = String::new();
        client.read_line(&mut reply).await.unwrap();
        assert_eq!(reply, "PONG: PING\r\n");

        client.write_all(b"QUIT\r\n").await.unwrap();
        assert!(session.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_raw_block_after_line() {
        let (recorder, protocol) = protocol();
        let (mut client, server) = tokio::io::duplex(256);

        client.write_all(b"DATA 5\r\nab\ncdnext\n").await.unwrap();
        drop(client);

        protocol
            .serve(testing::connection(server), Signal::new())
            .await
            .unwrap();
        assert_eq!(*recorder.blocks.lock().unwrap(), vec![Bytes::from_static(b"ab\ncd")]);
        assert_eq!(*recorder.lines.lock().unwrap(), vec!["DATA 5", "next"]);
    }

    #[tokio::test]
    async fn test_truncated_block_ends_session() {
        let (recorder, protocol) = protocol();
        let (mut client, server) = tokio::io::duplex(256);

        client.write_all(b"DATA 10\nabc").await.unwrap();
        drop(client);

        assert!(protocol
            .serve(testing::connection(server), Signal::new())
            .await
            .is_ok());
        assert!(recorder.blocks.lock().unwrap().is_empty());
        assert_eq!(recorder.quits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_long_line_ends_session() {
        let (recorder, protocol) = protocol();
        let protocol = protocol.max_line_size(8);
        let (mut client, server) = tokio::io::duplex(256);

        client.write_all(b"0123456789abcdef\nafter\n").await.unwrap();

        let result = protocol
            .serve(testing::connection(server), Signal::new())
            .await;
        assert!(matches!(result, Err(Error::LineTooLong { limit: 8 })));
        assert!(recorder.lines.lock().unwrap().is_empty());
        assert_eq!(recorder.quits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancelled_session_skips_reading() {
        let (recorder, protocol) = protocol();
        let (_client, server) = tokio::io::duplex(256);

        let cancel = Signal::new();
        cancel.fire();
        protocol
            .serve(testing::connection(server), cancel)
            .await
            .unwrap();
        assert_eq!(recorder.accepts.load(Ordering::SeqCst), 1);
        assert_eq!(recorder.quits.load(Ordering::SeqCst), 1);
        assert!(recorder.lines.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_send_after_disconnect_ends_session() {
        let (client, server) = tokio::io::duplex(256);
        drop(client);

        let mut session = LineSession::new(testing::connection(server), Signal::new());
        assert!(!session.is_ending());
        assert!(session.send_line("hello").await.is_err());
        assert!(session.is_ending());
        assert!(!session.is_cancelled());
    }

    #[tokio::test]
    async fn test_send_data_is_raw() {
        let (mut client, server) = tokio::io::duplex(256);
        let mut session = LineSession::new(testing::connection(server), Signal::new());

        session.send_data(b"\x00\x01raw").await.unwrap();
        let mut buf = [0u8; 5];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"\x00\x01raw");
    }

    #[test]
    fn test_session_data() {
        let (_client, server) = tokio::io::duplex(8);
        let mut session = LineSession::new(testing::connection(server), Signal::new());
        assert!(session.data::<u32>().is_none());

        session.set_data(1u32);
        *session.data_mut::<u32>().unwrap() += 1;
        assert_eq!(session.data::<u32>(), Some(&2));
        assert!(session.data::<String>().is_none());
        assert_eq!(session.id(), 1);
    }

    #[test]
    fn test_max_line_size_zero_means_default() {
        let (_recorder, protocol) = protocol();
        assert_eq!(protocol.max_line_size(0).max_line_size, DEFAULT_MAX_LINE_SIZE);
    }
}
