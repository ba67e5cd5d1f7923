//! Header block framing.
//!
//! Reads a byte at a time so that nothing past the blank line is consumed;
//! the body, if any, stays in the reader for the parser. Wrap sockets in a
//! `BufReader` to keep this from turning into one syscall per byte.

use crate::config::RequestLimits;
use crate::error::{ProtocolError, RequestError, TransportError};
use bytes::{Bytes, BytesMut};
use std::io;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::trace;

const TERMINATOR: &[u8] = b"\r\n\r\n";

/// Finds where a request's header block ends.
#[derive(Debug, Clone, Copy)]
pub struct Framer {
    max_header_size: usize,
    read_timeout: Duration,
}

impl Framer {
    pub fn new(limits: RequestLimits) -> Self {
        Self {
            max_header_size: limits.max_header_size,
            read_timeout: limits.read_timeout,
        }
    }

    /// Read until `\r\n\r\n`, returning the block including the terminator.
    ///
    /// Every single read is bounded by the read timeout. The block may not
    /// reach `max_header_size` bytes.
    pub async fn read_header_block<R>(&self, reader: &mut R) -> Result<Bytes, RequestError>
    where
        R: AsyncRead + Unpin,
    {
        let mut block = BytesMut::with_capacity(self.max_header_size.min(1024));

        loop {
            let byte = match tokio::time::timeout(self.read_timeout, reader.read_u8()).await {
                Ok(Ok(byte)) => byte,
                Ok(Err(e)) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    return Err(TransportError::ConnectionClosed.into());
                }
                Ok(Err(e)) => return Err(TransportError::Io(e).into()),
                Err(_) => return Err(TransportError::Timeout.into()),
            };
            block.extend_from_slice(&[byte]);

            if block.ends_with(TERMINATOR) {
                trace!(len = block.len(), "Header block complete");
                return Ok(block.freeze());
            }
            if block.len() >= self.max_header_size {
                return Err(ProtocolError::PayloadTooLarge.into());
            }
        }
    }
}
