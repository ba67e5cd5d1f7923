//! Server runtime.
//!
//! - `connection`: per-connection state machine and the live handler registry
//! - `handler`: frames, parses and dispatches one request per connection
//! - `control`: stopped/running state machine driven by console commands

mod connection;
mod control;
mod handler;

pub(crate) use connection::ConnectionRegistry;
pub(crate) use control::{ControlCommand, ControlPlane, ControlReply};
pub(crate) use handler::ConnectionHandler;
