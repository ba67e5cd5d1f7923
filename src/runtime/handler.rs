//! Per-connection request handling.
//!
//! Serves exactly one request, then shuts the stream down. The stream is
//! owned by [`ConnectionHandler::handle`] and dropped when it returns, so it
//! is closed once on every path.

use super::connection::{ConnState, Connection};
use crate::config::RequestLimits;
use crate::dispatch::Dispatcher;
use crate::error::{RequestError, TransportError};
use crate::protocol::{Framer, Request, RequestParser, Response};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, trace};

/// Framer, parser and dispatcher wired together for one connection at a time.
#[derive(Clone)]
pub struct ConnectionHandler {
    framer: Framer,
    parser: RequestParser,
    dispatcher: Dispatcher,
    read_timeout: Duration,
}

impl ConnectionHandler {
    pub fn new(limits: RequestLimits, dispatcher: Dispatcher) -> Self {
        Self {
            framer: Framer::new(limits),
            parser: RequestParser::new(limits.max_header_size),
            dispatcher,
            read_timeout: limits.read_timeout,
        }
    }

    /// Serve a single request on `stream` and close it.
    ///
    /// Returns the status code written, if any.
    pub async fn handle<S>(&self, stream: S, id: usize, peer: SocketAddr) -> Option<u16>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut conn = Connection::new(id, peer);
        let (reader, mut writer) = tokio::io::split(stream);
        let mut reader = BufReader::new(reader);

        let response = match self.serve(&mut reader, &mut conn).await {
            Ok(response) => Some(response),
            Err(e) => {
                debug!(conn_id = id, peer = %peer, state = ?conn.state(), error = %e, "Request failed");
                e.status().map(Response::error)
            }
        };

        let mut written = None;
        if let Some(response) = response {
            let code = response.status.code();
            match writer.write_all(&response.to_bytes()).await {
                Ok(()) => written = Some(code),
                Err(e) => debug!(conn_id = id, error = %e, "Failed to write response"),
            }
        }

        if let Err(e) = writer.shutdown().await {
            trace!(conn_id = id, error = %e, "Shutdown after response failed");
        }
        conn.advance(ConnState::Closed);
        written
    }

    async fn serve<R>(
        &self,
        reader: &mut BufReader<R>,
        conn: &mut Connection,
    ) -> Result<Response, RequestError>
    where
        R: AsyncRead + Unpin,
    {
        self.await_data(reader).await?;

        conn.advance(ConnState::Framing);
        let block = self.framer.read_header_block(reader).await?;

        conn.advance(ConnState::Parsing);
        let request: Request = self.parser.parse(&block, reader).await?;
        debug!(
            conn_id = conn.id,
            peer = %conn.peer,
            method = request.method.as_str(),
            path = %request.path,
            headers = request.headers.len(),
            "Request"
        );

        conn.advance(ConnState::Dispatching);
        let response = self.dispatcher.dispatch(&request).await;
        debug!(conn_id = conn.id, status = response.status.code(), "Response");
        Ok(response)
    }

    /// Wait for the first request bytes without consuming them.
    async fn await_data<R>(&self, reader: &mut BufReader<R>) -> Result<(), RequestError>
    where
        R: AsyncRead + Unpin,
    {
        match tokio::time::timeout(self.read_timeout, reader.fill_buf()).await {
            Ok(Ok([])) => Err(TransportError::ConnectionClosed.into()),
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(TransportError::Io(e).into()),
            Err(_) => Err(TransportError::Timeout.into()),
        }
    }
}
