//! Error taxonomy for the data plane and the control plane.
//!
//! Protocol, resource and transport errors never leave the connection
//! handler; they become a best-effort status line and a closed connection.
//! Control errors are reported back to the console.

use crate::protocol::Status;
use std::io;
use thiserror::Error;

/// The request bytes are not a valid request.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("malformed request")]
    BadRequest,
    #[error("method not supported: {0}")]
    MethodNotSupported(String),
    #[error("POST without Content-Length")]
    LengthRequired,
    #[error("payload exceeds the configured limit")]
    PayloadTooLarge,
}

/// A file store operation failed.
#[derive(Debug, Error)]
pub enum ResourceError {
    #[error("resource not found")]
    NotFound,
    /// The path leaves the store root.
    #[error("path escapes the store root")]
    Forbidden,
    #[error("I/O failure: {0}")]
    Io(#[source] io::Error),
}

impl From<io::Error> for ResourceError {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::NotFound => ResourceError::NotFound,
            _ => ResourceError::Io(e),
        }
    }
}

/// The connection itself misbehaved.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("read timed out")]
    Timeout,
    #[error("connection closed by peer")]
    ConnectionClosed,
    #[error("rate limit exceeded")]
    RateLimited,
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Any failure while reading a request off a connection.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl RequestError {
    /// Status to send before closing, or `None` when the connection is
    /// no longer usable.
    pub fn status(&self) -> Option<Status> {
        match self {
            RequestError::Protocol(ProtocolError::BadRequest) => Some(Status::BadRequest),
            RequestError::Protocol(ProtocolError::MethodNotSupported(_)) => {
                Some(Status::MethodNotSupported)
            }
            RequestError::Protocol(ProtocolError::LengthRequired) => Some(Status::LengthRequired),
            RequestError::Protocol(ProtocolError::PayloadTooLarge) => {
                Some(Status::PayloadTooLarge)
            }
            RequestError::Transport(TransportError::Timeout) => Some(Status::RequestTimeout),
            RequestError::Transport(TransportError::RateLimited) => Some(Status::TooManyRequests),
            RequestError::Transport(TransportError::ConnectionClosed)
            | RequestError::Transport(TransportError::Io(_)) => None,
        }
    }
}

/// A console command could not be carried out. State is left unchanged.
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("cannot {command} while the server is {state}")]
    InvalidStateTransition {
        command: &'static str,
        state: &'static str,
    },
    #[error("{command} requires an argument: {expected}")]
    MissingArgument {
        command: &'static str,
        expected: &'static str,
    },
    #[error("invalid argument for {command}: {value}")]
    InvalidArgument { command: &'static str, value: String },
    #[error("unknown command: {0}")]
    UnknownCommand(String),
    #[error("could not open a listening socket on {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: io::Error,
    },
}
