//! Exact-length frame reads from a byte stream.
//!
//! A single socket read may return fewer bytes than asked for. Every field of
//! a frame is therefore read with [`read_full`], which keeps reading until the
//! buffer is filled or the stream ends.

use std::io;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt};

use super::wire_format::{Header, HEADER_SIZE};
use super::Frame;
use crate::error::{Result, TagwireError};

/// Read until `buf` is full or the stream reaches EOF.
///
/// Returns the number of bytes read, which is less than `buf.len()` only when
/// the stream ended first. Interrupted reads are retried.
pub async fn read_full<R>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]).await {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Read one complete frame.
///
/// - `Ok(Some(frame))` - a whole frame was read
/// - `Ok(None)` - the stream ended cleanly on a frame boundary
/// - `Err(Framing)` - the stream ended inside a frame, or the announced
///   payload exceeds `max_payload_size`
/// - `Err(Io)` - the underlying read failed
pub async fn read_frame<R>(reader: &mut R, max_payload_size: u32) -> Result<Option<Frame>>
where
    R: AsyncRead + Unpin,
{
    let mut raw = [0u8; HEADER_SIZE];
    let n = read_full(reader, &mut raw).await?;
    if n == 0 {
        return Ok(None);
    }
    if n < HEADER_SIZE {
        return Err(TagwireError::Framing(format!(
            "stream ended after {} of {} header bytes",
            n, HEADER_SIZE
        )));
    }

    let header = Header::decode(&raw);
    header.validate(max_payload_size)?;

    let expected = header.length as usize;
    let mut payload = BytesMut::zeroed(expected);
    let n = read_full(reader, &mut payload).await?;
    if n < expected {
        return Err(TagwireError::Framing(format!(
            "stream ended after {} of {} payload bytes for tag {}",
            n, expected, header.tag
        )));
    }

    Ok(Some(Frame::new(header, payload.freeze())))
}
