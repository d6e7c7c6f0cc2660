//! Line-protocol loop for one byte stream.
//!
//! Generic over the stream halves so the same loop runs over a QUIC stream
//! in production and an in-memory duplex in tests.

use cipherpost_proto::{MAX_LINE_BYTES, ProtocolError, Response, encode_line};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::{
    error::ServerError,
    relay::{RelayService, Reply},
};

/// How a stream ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEnd {
    /// Peer closed its side.
    Eof,
    /// Peer sent `disconnect`.
    Disconnected,
    /// Peer sent a line longer than [`MAX_LINE_BYTES`].
    Oversized,
}

/// Serve requests from `reader` until EOF, `disconnect` or an oversized line.
///
/// Returns how the stream ended and how many requests were answered. Bad
/// requests are answered with an error response and do not end the stream.
///
/// # Errors
///
/// Only I/O failures on the stream itself.
pub async fn serve_stream<R, W>(
    relay: &RelayService,
    mut reader: R,
    mut writer: W,
) -> Result<(StreamEnd, usize), ServerError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let limit = u64::try_from(MAX_LINE_BYTES).unwrap_or(u64::MAX).saturating_add(1);
    let mut buf = Vec::new();
    let mut answered = 0;

    loop {
        buf.clear();
        let read = (&mut reader).take(limit).read_until(b'\n', &mut buf).await?;
        if read == 0 {
            return Ok((StreamEnd::Eof, answered));
        }

        if buf.len() > MAX_LINE_BYTES && buf.last() != Some(&b'\n') {
            tracing::warn!(bytes = buf.len(), "oversized request line, closing stream");
            let err = ProtocolError::LineTooLong { len: buf.len(), max: MAX_LINE_BYTES };
            write_response(&mut writer, &Response::error(err.to_string())).await?;
            return Ok((StreamEnd::Oversized, answered + 1));
        }

        let reply = match std::str::from_utf8(&buf) {
            Ok(line) if line.trim().is_empty() => continue,
            Ok(line) => relay.handle_line(line.trim_end()),
            Err(e) => {
                let err = ProtocolError::InvalidJson(e.to_string());
                Reply { response: Response::error(err.to_string()), close: false }
            },
        };

        write_response(&mut writer, &reply.response).await?;
        answered += 1;

        if reply.close {
            return Ok((StreamEnd::Disconnected, answered));
        }
    }
}

async fn write_response<W>(writer: &mut W, response: &Response) -> Result<(), ServerError>
where
    W: AsyncWrite + Unpin,
{
    let line = encode_line(response).map_err(|e| ServerError::Protocol(e.to_string()))?;
    writer.write_all(&line).await?;
    writer.flush().await?;
    Ok(())
}
