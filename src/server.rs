//! TCP acceptor.
//!
//! Owns the listening socket, applies per-host rate limiting and spawns a
//! handler task for every admitted connection.

use crate::error::{RequestError, TransportError};
use crate::protocol::{Response, Status};
use crate::rate_limit::RateLimiter;
use crate::runtime::{ConnectionHandler, ConnectionRegistry};
use std::io::{self, Write};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Semaphore};
use tracing::{debug, error, info, warn};

/// Listen backlog for the server socket.
const LISTEN_BACKLOG: i32 = 50;

/// Accept loop for one listening socket.
pub struct Acceptor {
    listener: TcpListener,
    limiter: Arc<RateLimiter>,
    registry: Arc<ConnectionRegistry>,
    handler: Arc<ConnectionHandler>,
    connection_limit: Arc<Semaphore>,
}

impl Acceptor {
    pub fn new(
        listener: TcpListener,
        limiter: Arc<RateLimiter>,
        registry: Arc<ConnectionRegistry>,
        handler: Arc<ConnectionHandler>,
        connection_limit: Arc<Semaphore>,
    ) -> Self {
        Self {
            listener,
            limiter,
            registry,
            handler,
            connection_limit,
        }
    }

    /// Accept connections until `shutdown` changes or its sender is dropped.
    ///
    /// The listener is closed on return. Handlers already spawned keep
    /// running to completion.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let address = self.listener.local_addr().ok();
        info!(address = ?address, "Accepting connections");

        loop {
            // Wait for a connection slot
            let permit = tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                permit = Arc::clone(&self.connection_limit).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let (stream, peer) = tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        error!(error = %e, "Failed to accept connection");
                        continue;
                    }
                },
            };
            debug!(peer = %peer, "New connection");

            if !self.limiter.admit(peer.ip()) {
                reject(stream, peer);
                continue;
            }

            let guard = self.registry.register(peer);
            let handler = Arc::clone(&self.handler);
            tokio::spawn(async move {
                handler.handle(stream, guard.id(), peer).await;
                drop(guard);
                drop(permit);
            });
        }

        info!(address = ?address, "Listener closed");
    }
}

/// Refuse a rate-limited connection without spawning a handler.
///
/// The status line is written with a single non-blocking send so a peer
/// that does not read cannot stall the accept loop.
fn reject(stream: TcpStream, peer: SocketAddr) {
    let status = RequestError::from(TransportError::RateLimited)
        .status()
        .unwrap_or(Status::TooManyRequests);
    warn!(peer = %peer, status = status.code(), "Rejecting connection");

    let sent = stream
        .into_std()
        .and_then(|mut stream| stream.write(&Response::error(status).to_bytes()));
    if let Err(e) = sent {
        debug!(peer = %peer, error = %e, "Could not send rejection");
    }
}

/// Create the listening socket.
///
/// `SO_REUSEADDR` lets a stopped server bind the same port again right away.
pub fn bind_listener(addr: SocketAddr) -> io::Result<TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;

    TcpListener::from_std(socket.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RateLimitConfig, RequestLimits};
    use crate::dispatch::Dispatcher;
    use crate::storage::test_support::scratch_dir;
    use crate::storage::DiskStore;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    struct Running {
        address: SocketAddr,
        registry: Arc<ConnectionRegistry>,
        shutdown: watch::Sender<bool>,
        task: tokio::task::JoinHandle<()>,
    }

    fn start(label: &str, requests_per_window: u32) -> Running {
        let listener = bind_listener("127.0.0.1:0".parse().unwrap()).unwrap();
        let address = listener.local_addr().unwrap();
        let registry = ConnectionRegistry::new();
        let handler = ConnectionHandler::new(
            RequestLimits::default(),
            Dispatcher::new(Arc::new(DiskStore::new(scratch_dir(label)))),
        );
        let acceptor = Acceptor::new(
            listener,
            Arc::new(RateLimiter::new(RateLimitConfig {
                requests_per_window,
                window: Duration::from_secs(60),
            })),
            Arc::clone(&registry),
            Arc::new(handler),
            Arc::new(Semaphore::new(16)),
        );
        let (shutdown, rx) = watch::channel(false);
        let task = tokio::spawn(acceptor.run(rx));
        Running {
            address,
            registry,
            shutdown,
            task,
        }
    }

    /// Read until EOF. A reset after the reply counts as the end too.
    async fn read_reply(stream: &mut TcpStream) -> String {
        let mut out = Vec::new();
        let mut buf = [0u8; 1024];
        loop {
            match stream.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => out.extend_from_slice(&buf[..n]),
            }
        }
        String::from_utf8(out).unwrap()
    }

    async fn request(address: SocketAddr, bytes: &[u8]) -> String {
        let mut stream = TcpStream::connect(address).await.unwrap();
        stream.write_all(bytes).await.unwrap();
        read_reply(&mut stream).await
    }

    #[tokio::test]
    async fn test_rate_limited_connection_gets_429() {
        let server = start("rate", 3);

        for _ in 0..3 {
            let reply = request(server.address, b"GET /missing HTTP/1.1\r\n\r\n").await;
            assert!(reply.starts_with("404 "), "unexpected reply: {reply}");
        }

        let mut stream = TcpStream::connect(server.address).await.unwrap();
        let reply = read_reply(&mut stream).await;
        assert_eq!(reply, "429 Too many requests HTTP/1.1\r\n\r\n");

        server.shutdown.send(true).unwrap();
        server.task.await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_closes_listener() {
        let server = start("shutdown", 10);

        server.shutdown.send(true).unwrap();
        server.task.await.unwrap();

        assert!(TcpStream::connect(server.address).await.is_err());
    }

    #[tokio::test]
    async fn test_in_flight_handler_survives_shutdown() {
        let server = start("in-flight", 10);

        let mut stream = TcpStream::connect(server.address).await.unwrap();
        stream.write_all(b"POST /late HTTP/1.1\r\n").await.unwrap();

        // Wait until the handler is registered, then stop accepting.
        for _ in 0..100 {
            if server.registry.len() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(server.registry.len(), 1);
        server.shutdown.send(true).unwrap();
        server.task.await.unwrap();

        stream
            .write_all(b"Content-Length: 2\r\n\r\nok")
            .await
            .unwrap();
        let reply = read_reply(&mut stream).await;
        assert!(reply.starts_with("201 Created HTTP/1.1\r\n"));

        for _ in 0..100 {
            if server.registry.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(server.registry.is_empty());
    }
}
