//! Text request protocol.
//!
//! A request is a request line, header lines and a blank line, followed by
//! a body when `Content-Length` is declared. One request is served per
//! connection.
//!
//! ## Protocol Format
//!
//! ```text
//! Request:  POST /notes.txt HTTP/1.1\r\n
//!           Content-Length: 5\r\n
//!           \r\n
//!           hello
//! Response: 201 Created HTTP/1.1\r\n
//!           Date: Mon, 19 Oct 2026 10:00:00 GMT\r\n
//!           \r\n
//!
//! Request:  GET /notes.txt HTTP/1.1\r\n\r\n
//! Response: 200 OK HTTP/1.1\r\n
//!           Date: Mon, 19 Oct 2026 10:00:01 GMT\r\n
//!           Content-Length: 5\r\n
//!           \r\n
//!           hello
//! ```
//!
//! Note the status line puts the version last.

pub mod framer;
pub mod parser;
pub mod response;

pub use framer::Framer;
pub use parser::{Method, Request, RequestParser};
pub use response::{Response, Status};
