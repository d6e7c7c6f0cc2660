//! Newline-delimited JSON framing.
//!
//! One request or response per line, UTF-8, terminated by `\n`. Blobs are
//! base64 so no payload ever contains a raw newline.

use std::io;

use serde::Serialize;

use crate::{ProtocolError, Response};

/// Largest line either side will read.
pub const MAX_LINE_BYTES: usize = 16 * 1024 * 1024;

/// Room a fetch response needs around its entries: the status field, the
/// array brackets and the newline.
const FETCH_FRAME_BYTES: usize = 64;

/// Budget for the entries of one fetch response, separators included.
///
/// A mailbox larger than this is drained over several fetches.
pub const MAX_BATCH_BYTES: usize = MAX_LINE_BYTES - FETCH_FRAME_BYTES;

/// Serialize `value` as one wire line, including the trailing newline.
///
/// # Errors
///
/// Returns `Encode` if serialization fails.
pub fn encode_line<T: Serialize>(value: &T) -> Result<Vec<u8>, ProtocolError> {
    let mut line = serde_json::to_vec(value).map_err(|e| ProtocolError::Encode(e.to_string()))?;
    line.push(b'\n');
    Ok(line)
}

/// Exact length of the JSON encoding of `value`, without building it.
///
/// # Errors
///
/// Returns `Encode` if serialization fails.
pub fn encoded_len<T: Serialize>(value: &T) -> Result<usize, ProtocolError> {
    let mut counter = ByteCounter(0);
    serde_json::to_writer(&mut counter, value).map_err(|e| ProtocolError::Encode(e.to_string()))?;
    Ok(counter.0)
}

struct ByteCounter(usize);

impl io::Write for ByteCounter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0 += buf.len();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Decode one response line. Trailing whitespace is ignored.
///
/// # Errors
///
/// Returns `LineTooLong` past [`MAX_LINE_BYTES`], `InvalidJson` otherwise.
pub fn decode_response(line: &str) -> Result<Response, ProtocolError> {
    if line.len() > MAX_LINE_BYTES {
        return Err(ProtocolError::LineTooLong { len: line.len(), max: MAX_LINE_BYTES });
    }
    serde_json::from_str(line.trim_end()).map_err(|e| ProtocolError::InvalidJson(e.to_string()))
}
