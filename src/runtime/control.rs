//! Control plane: the stopped/running state machine behind the console.
//!
//! | command         | allowed while | effect                                  |
//! |-----------------|---------------|-----------------------------------------|
//! | `start`         | stopped       | bind, spawn the acceptor, go running    |
//! | `stop`          | running       | close the listener, go stopped          |
//! | `sethostname`   | stopped       | change the bind host                    |
//! | `setportnumber` | stopped       | change the bind port                    |
//! | `status`        | any           | report state and connection counts      |
//! | `exit`          | any           | stop if running, then let the caller exit |
//!
//! A rejected command leaves every piece of state as it was.

use super::{ConnectionHandler, ConnectionRegistry};
use crate::config::{Config, ServerConfig};
use crate::dispatch::Dispatcher;
use crate::error::ControlError;
use crate::rate_limit::RateLimiter;
use crate::server::{bind_listener, Acceptor};
use crate::storage::FileStore;
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::{watch, Mutex, Semaphore};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Whether the listener is up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Stopped,
    Running,
}

impl ServerState {
    pub fn as_str(self) -> &'static str {
        match self {
            ServerState::Stopped => "stopped",
            ServerState::Running => "running",
        }
    }
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed console command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    Start,
    Stop,
    SetHost(String),
    SetPort(u16),
    Status,
    Exit,
}

impl ControlCommand {
    fn name(&self) -> &'static str {
        match self {
            ControlCommand::Start => "start",
            ControlCommand::Stop => "stop",
            ControlCommand::SetHost(_) => "sethostname",
            ControlCommand::SetPort(_) => "setportnumber",
            ControlCommand::Status => "status",
            ControlCommand::Exit => "exit",
        }
    }
}

impl FromStr for ControlCommand {
    type Err = ControlError;

    /// Parse one console line. Extra arguments are ignored.
    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut parts = line.split_whitespace();
        let name = parts.next().unwrap_or("");

        match name {
            "start" => Ok(ControlCommand::Start),
            "stop" => Ok(ControlCommand::Stop),
            "status" => Ok(ControlCommand::Status),
            "exit" => Ok(ControlCommand::Exit),
            "sethostname" => parts
                .next()
                .map(|host| ControlCommand::SetHost(host.to_string()))
                .ok_or(ControlError::MissingArgument {
                    command: "sethostname",
                    expected: "<name>",
                }),
            "setportnumber" => {
                let value = parts.next().ok_or(ControlError::MissingArgument {
                    command: "setportnumber",
                    expected: "<port>",
                })?;
                value
                    .parse()
                    .map(ControlCommand::SetPort)
                    .map_err(|_| ControlError::InvalidArgument {
                        command: "setportnumber",
                        value: value.to_string(),
                    })
            }
            other => Err(ControlError::UnknownCommand(other.to_string())),
        }
    }
}

/// Snapshot reported by `status`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    pub state: ServerState,
    pub configured: ServerConfig,
    pub bound: Option<SocketAddr>,
    pub active_connections: usize,
    pub tracked_hosts: usize,
}

/// Outcome of a successful command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlReply {
    Started(SocketAddr),
    Stopped,
    HostSet(String),
    PortSet(u16),
    Status(StatusReport),
    Exiting,
}

impl fmt::Display for ControlReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlReply::Started(addr) => write!(f, "Server running on {addr}"),
            ControlReply::Stopped => write!(f, "Server stopped"),
            ControlReply::HostSet(host) => write!(f, "Server host name set to {host}"),
            ControlReply::PortSet(port) => write!(f, "Server port set to {port}"),
            ControlReply::Status(report) => {
                write!(
                    f,
                    "state={} address={}",
                    report.state,
                    report.configured.address()
                )?;
                if let Some(bound) = report.bound {
                    write!(f, " bound={bound}")?;
                }
                write!(
                    f,
                    " connections={} rate_limited_hosts={}",
                    report.active_connections, report.tracked_hosts
                )
            }
            ControlReply::Exiting => write!(f, "Shutting down"),
        }
    }
}

/// A listener and the task accepting on it.
struct RunningAcceptor {
    address: SocketAddr,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

struct ControlInner {
    state: ServerState,
    config: ServerConfig,
    running: Option<RunningAcceptor>,
}

/// Owns the server state and carries out console commands.
pub struct ControlPlane {
    inner: Mutex<ControlInner>,
    limiter: Arc<RateLimiter>,
    registry: Arc<ConnectionRegistry>,
    handler: Arc<ConnectionHandler>,
    connection_limit: Arc<Semaphore>,
}

impl ControlPlane {
    pub fn new(config: &Config, store: Arc<dyn FileStore>) -> Self {
        let handler = ConnectionHandler::new(config.limits, Dispatcher::new(store));
        Self {
            inner: Mutex::new(ControlInner {
                state: ServerState::Stopped,
                config: config.server.clone(),
                running: None,
            }),
            limiter: Arc::new(RateLimiter::new(config.rate_limit)),
            registry: ConnectionRegistry::new(),
            handler: Arc::new(handler),
            connection_limit: Arc::new(Semaphore::new(config.max_connections)),
        }
    }

    #[cfg(test)]
    pub async fn state(&self) -> ServerState {
        self.inner.lock().await.state
    }

    /// Address of the live listener, if running.
    #[cfg(test)]
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.lock().await.running.as_ref().map(|r| r.address)
    }

    /// Carry out one command under the control lock.
    pub async fn execute(&self, command: ControlCommand) -> Result<ControlReply, ControlError> {
        let mut inner = self.inner.lock().await;

        match command {
            ControlCommand::Start => {
                require(&inner, &command, ServerState::Stopped)?;
                let address = self.start(&mut inner).await?;
                Ok(ControlReply::Started(address))
            }
            ControlCommand::Stop => {
                require(&inner, &command, ServerState::Running)?;
                self.stop(&mut inner).await;
                Ok(ControlReply::Stopped)
            }
            ControlCommand::SetHost(ref host) => {
                require(&inner, &command, ServerState::Stopped)?;
                inner.config.host = host.clone();
                info!(host = %host, "Host name updated");
                Ok(ControlReply::HostSet(host.clone()))
            }
            ControlCommand::SetPort(port) => {
                require(&inner, &command, ServerState::Stopped)?;
                inner.config.port = port;
                info!(port, "Port updated");
                Ok(ControlReply::PortSet(port))
            }
            ControlCommand::Status => Ok(ControlReply::Status(StatusReport {
                state: inner.state,
                configured: inner.config.clone(),
                bound: inner.running.as_ref().map(|r| r.address),
                active_connections: self.registry.len(),
                tracked_hosts: self.limiter.tracked_hosts(),
            })),
            ControlCommand::Exit => {
                if inner.state == ServerState::Running {
                    self.stop(&mut inner).await;
                }
                Ok(ControlReply::Exiting)
            }
        }
    }

    async fn start(&self, inner: &mut ControlInner) -> Result<SocketAddr, ControlError> {
        let address = inner.config.address();
        let bind_error = |source| ControlError::Bind {
            address: address.clone(),
            source,
        };

        let addr = tokio::net::lookup_host(address.as_str())
            .await
            .map_err(bind_error)?
            .next()
            .ok_or_else(|| {
                bind_error(std::io::Error::new(
                    std::io::ErrorKind::AddrNotAvailable,
                    "host name resolved to no addresses",
                ))
            })?;
        let listener = bind_listener(addr).map_err(bind_error)?;
        let local = listener.local_addr().map_err(bind_error)?;

        let acceptor = Acceptor::new(
            listener,
            Arc::clone(&self.limiter),
            Arc::clone(&self.registry),
            Arc::clone(&self.handler),
            Arc::clone(&self.connection_limit),
        );
        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(acceptor.run(shutdown_rx));

        inner.running = Some(RunningAcceptor {
            address: local,
            shutdown,
            task,
        });
        inner.state = ServerState::Running;
        info!(address = %local, "Server started");
        Ok(local)
    }

    async fn stop(&self, inner: &mut ControlInner) {
        if let Some(running) = inner.running.take() {
            let _ = running.shutdown.send(true);
            if let Err(e) = running.task.await {
                warn!(error = %e, "Acceptor task ended abnormally");
            }
            info!(
                address = %running.address,
                in_flight = self.registry.len(),
                "Server stopped"
            );
        }
        inner.state = ServerState::Stopped;
    }
}

fn require(
    inner: &ControlInner,
    command: &ControlCommand,
    wanted: ServerState,
) -> Result<(), ControlError> {
    if inner.state == wanted {
        Ok(())
    } else {
        Err(ControlError::InvalidStateTransition {
            command: command.name(),
            state: inner.state.as_str(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RateLimitConfig, RequestLimits};
    use crate::storage::test_support::scratch_dir;
    use crate::storage::DiskStore;
    use std::path::PathBuf;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    fn config(root: PathBuf) -> Config {
        Config {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 0,
            },
            limits: RequestLimits::default(),
            rate_limit: RateLimitConfig {
                requests_per_window: 100,
                window: Duration::from_secs(60),
            },
            root,
            max_connections: 64,
            autostart: false,
            log_level: "info".to_string(),
        }
    }

    fn control(label: &str) -> ControlPlane {
        let config = config(scratch_dir(label));
        let store = Arc::new(DiskStore::new(&config.root));
        ControlPlane::new(&config, store)
    }

    async fn send(addr: SocketAddr, request: &[u8]) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(request).await.unwrap();
        let mut out = Vec::new();
        stream.read_to_end(&mut out).await.unwrap();
        String::from_utf8(out).unwrap()
    }

    fn started(reply: ControlReply) -> SocketAddr {
        match reply {
            ControlReply::Started(addr) => addr,
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!("start".parse::<ControlCommand>().unwrap(), ControlCommand::Start);
        assert_eq!("  stop  ".parse::<ControlCommand>().unwrap(), ControlCommand::Stop);
        assert_eq!(
            "sethostname example.org".parse::<ControlCommand>().unwrap(),
            ControlCommand::SetHost("example.org".to_string())
        );
        assert_eq!(
            "setportnumber 8080".parse::<ControlCommand>().unwrap(),
            ControlCommand::SetPort(8080)
        );
        assert!(matches!(
            "setportnumber".parse::<ControlCommand>(),
            Err(ControlError::MissingArgument { .. })
        ));
        assert!(matches!(
            "setportnumber http".parse::<ControlCommand>(),
            Err(ControlError::InvalidArgument { .. })
        ));
        assert!(matches!(
            "sethostname".parse::<ControlCommand>(),
            Err(ControlError::MissingArgument { .. })
        ));
        assert!(matches!(
            "restart".parse::<ControlCommand>(),
            Err(ControlError::UnknownCommand(name)) if name == "restart"
        ));
    }

    #[tokio::test]
    async fn test_start_while_running_is_rejected() {
        let control = control("double-start");

        started(control.execute(ControlCommand::Start).await.unwrap());
        let err = control.execute(ControlCommand::Start).await.unwrap_err();
        assert!(matches!(err, ControlError::InvalidStateTransition { .. }));
        assert_eq!(control.state().await, ServerState::Running);

        control.execute(ControlCommand::Exit).await.unwrap();
        assert_eq!(control.state().await, ServerState::Stopped);
    }

    #[tokio::test]
    async fn test_configuration_only_while_stopped() {
        let control = control("config");

        control.execute(ControlCommand::Start).await.unwrap();
        let err = control
            .execute(ControlCommand::SetHost("0.0.0.0".to_string()))
            .await
            .unwrap_err();
        assert!(matches!(err, ControlError::InvalidStateTransition { .. }));
        assert!(control
            .execute(ControlCommand::SetPort(1))
            .await
            .is_err());

        control.execute(ControlCommand::Stop).await.unwrap();
        let reply = control
            .execute(ControlCommand::SetHost("localhost".to_string()))
            .await
            .unwrap();
        assert_eq!(reply, ControlReply::HostSet("localhost".to_string()));
    }

    #[tokio::test]
    async fn test_double_stop_is_a_diagnostic() {
        let control = control("double-stop");

        control.execute(ControlCommand::Start).await.unwrap();
        assert_eq!(
            control.execute(ControlCommand::Stop).await.unwrap(),
            ControlReply::Stopped
        );
        assert_eq!(control.state().await, ServerState::Stopped);

        let err = control.execute(ControlCommand::Stop).await.unwrap_err();
        assert_eq!(err.to_string(), "cannot stop while the server is stopped");
        assert_eq!(control.state().await, ServerState::Stopped);
    }

    #[tokio::test]
    async fn test_restart_rebinds_same_port() {
        let control = control("restart");

        let first = started(control.execute(ControlCommand::Start).await.unwrap());
        control.execute(ControlCommand::Stop).await.unwrap();
        assert!(TcpStream::connect(first).await.is_err());

        control
            .execute(ControlCommand::SetPort(first.port()))
            .await
            .unwrap();
        let second = started(control.execute(ControlCommand::Start).await.unwrap());
        assert_eq!(second, first);
        assert_eq!(control.local_addr().await, Some(second));

        let reply = send(second, b"GET /nothing HTTP/1.1\r\n\r\n").await;
        assert!(reply.starts_with("404 Resource not found HTTP/1.1"));

        control.execute(ControlCommand::Stop).await.unwrap();
    }

    #[tokio::test]
    async fn test_bind_failure_leaves_server_stopped() {
        let control = control("bind-fail");
        control
            .execute(ControlCommand::SetHost("192.0.2.1".to_string()))
            .await
            .unwrap();

        let err = control.execute(ControlCommand::Start).await.unwrap_err();
        assert!(matches!(err, ControlError::Bind { .. }));
        assert_eq!(control.state().await, ServerState::Stopped);
        assert_eq!(control.local_addr().await, None);
    }

    #[tokio::test]
    async fn test_serves_files_end_to_end() {
        let control = control("e2e");
        let addr = started(control.execute(ControlCommand::Start).await.unwrap());

        let reply = send(
            addr,
            b"POST /page.txt HTTP/1.1\r\nContent-Length: 11\r\n\r\nhello world",
        )
        .await;
        assert!(reply.starts_with("201 Created HTTP/1.1\r\nDate: "));

        let reply = send(addr, b"GET /page.txt HTTP/1.1\r\n\r\n").await;
        assert!(reply.starts_with("200 OK HTTP/1.1\r\n"));
        assert!(reply.ends_with("Content-Length: 11\r\n\r\nhello world"));

        let reply = send(addr, b"DELETE /page.txt HTTP/1.1\r\n\r\n").await;
        assert!(reply.starts_with("200 OK HTTP/1.1\r\n"));

        let reply = send(addr, b"GET /page.txt HTTP/1.1\r\n\r\n").await;
        assert_eq!(reply, "404 Resource not found HTTP/1.1\r\n\r\n");

        match control.execute(ControlCommand::Status).await.unwrap() {
            ControlReply::Status(report) => {
                assert_eq!(report.state, ServerState::Running);
                assert_eq!(report.bound, Some(addr));
                assert_eq!(report.tracked_hosts, 1);
            }
            other => panic!("unexpected: {:?}", other),
        }

        assert_eq!(
            control.execute(ControlCommand::Exit).await.unwrap(),
            ControlReply::Exiting
        );
        assert_eq!(control.state().await, ServerState::Stopped);
    }
}
