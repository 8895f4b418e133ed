//! Bounded line reading
//!
//! [`read_line_limited`] behaves like `read_until` but refuses to buffer
//! more than a fixed number of bytes, so a peer that never sends a
//! delimiter cannot grow a session's memory without bound.

use crate::error::{Error, Result};
use std::io;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

/// Read bytes up to and including the first `delim`.
///
/// Chunks are accumulated across buffer refills, so a reader with a small
/// internal buffer still returns long lines whole. Fails with
/// [`Error::LineTooLong`] once more than `limit` bytes (delimiter included)
/// have been collected, and with an I/O error if the source ends or fails
/// before a delimiter arrives. On success exactly the returned bytes are
/// consumed from `reader`.
pub async fn read_line_limited<R>(reader: &mut R, delim: u8, limit: usize) -> Result<Vec<u8>>
where
    R: AsyncBufRead + Unpin + ?Sized,
{
    let mut line = Vec::new();
    loop {
        let (found, used) = {
            let available = reader.fill_buf().await?;
            if available.is_empty() {
                return Err(Error::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "stream ended before delimiter",
                )));
            }
            match available.iter().position(|&b| b == delim) {
                Some(i) => {
                    line.extend_from_slice(&available[..=i]);
                    (true, i + 1)
                }
                None => {
                    line.extend_from_slice(available);
                    (false, available.len())
                }
            }
        };
        reader.consume(used);

        if line.len() > limit {
            return Err(Error::LineTooLong { limit });
        }
        if found {
            return Ok(line);
        }
    }
}

/// Strip one trailing `\n`, then one trailing `\r`.
pub fn trim_crlf(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}
