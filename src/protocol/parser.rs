//! Request parser.
//!
//! Turns a framed header block into a [`Request`], reading the body from
//! the connection when one is declared.

use crate::error::{ProtocolError, RequestError};
use bytes::Bytes;
use std::str::{self, FromStr};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::trace;

/// Request methods the server understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Delete,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Delete => "DELETE",
        }
    }
}

impl FromStr for Method {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "GET" => Ok(Method::Get),
            "POST" => Ok(Method::Post),
            "DELETE" => Ok(Method::Delete),
            other => Err(ProtocolError::MethodNotSupported(other.to_string())),
        }
    }
}

/// Header fields in arrival order.
///
/// A repeated name replaces the earlier value in place. Names match
/// exactly, so `content-length` and `Content-Length` are distinct.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    fields: Vec<(String, String)>,
}

impl Headers {
    pub fn insert(&mut self, name: &str, value: &str) {
        match self
            .fields
            .iter_mut()
            .find(|(n, _)| n == name)
        {
            Some((_, v)) => *v = value.to_string(),
            None => self.fields.push((name.to_string(), value.to_string())),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[cfg(test)]
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }
}

/// A fully read request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: Method,
    pub path: String,
    pub version: String,
    pub headers: Headers,
    pub body: Option<Bytes>,
}

/// Request line and headers, before any body is read.
#[derive(Debug, PartialEq, Eq)]
struct Head {
    method: Method,
    path: String,
    version: String,
    headers: Headers,
}

/// Parser for the text request protocol
#[derive(Debug, Clone, Copy)]
pub struct RequestParser {
    max_header_size: usize,
}

impl RequestParser {
    /// `max_header_size` doubles as the exclusive ceiling for POST bodies.
    pub fn new(max_header_size: usize) -> Self {
        Self { max_header_size }
    }

    /// Parse a framed header block, reading a POST body from `reader`.
    ///
    /// The body read is not time-bounded.
    pub async fn parse<R>(&self, block: &[u8], reader: &mut R) -> Result<Request, RequestError>
    where
        R: AsyncRead + Unpin,
    {
        let head = parse_head(block)?;

        let body = if head.method == Method::Post {
            let length = self.content_length(&head.headers)?;
            let mut body = vec![0u8; length];
            reader
                .read_exact(&mut body)
                .await
                .map_err(|_| ProtocolError::BadRequest)?;
            Some(Bytes::from(body))
        } else {
            None
        };

        trace!(method = head.method.as_str(), path = %head.path, "Parsed request");

        Ok(Request {
            method: head.method,
            path: head.path,
            version: head.version,
            headers: head.headers,
            body,
        })
    }

    fn content_length(&self, headers: &Headers) -> Result<usize, ProtocolError> {
        let value = headers
            .get("Content-Length")
            .ok_or(ProtocolError::LengthRequired)?;
        let length: usize = value
            .trim()
            .parse()
            .map_err(|_| ProtocolError::BadRequest)?;
        if length >= self.max_header_size {
            return Err(ProtocolError::PayloadTooLarge);
        }
        Ok(length)
    }
}

fn parse_head(block: &[u8]) -> Result<Head, ProtocolError> {
    let text = str::from_utf8(block).map_err(|_| ProtocolError::BadRequest)?;
    let (request_line, header_lines) = text.split_once("\r\n").unwrap_or((text, ""));

    let parts: Vec<&str> = request_line.split(' ').collect();
    let [method, path, version] = parts[..] else {
        return Err(ProtocolError::BadRequest);
    };
    let method: Method = method.parse()?;

    let mut headers = Headers::default();
    for line in header_lines.split("\r\n") {
        if let Some((name, value)) = line.split_once(": ") {
            headers.insert(name, value);
        }
    }

    Ok(Head {
        method,
        path: path.to_string(),
        version: version.to_string(),
        headers,
    })
}
