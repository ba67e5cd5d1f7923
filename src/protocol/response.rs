//! Status codes and response serialization.

use bytes::{Bytes, BytesMut};
use chrono::Utc;

/// Version token written at the end of every status line.
const VERSION: &str = "HTTP/1.1";

/// Status codes the server emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    Created,
    BadRequest,
    Forbidden,
    NotFound,
    MethodNotSupported,
    RequestTimeout,
    LengthRequired,
    PayloadTooLarge,
    TooManyRequests,
}

impl Status {
    pub fn code(self) -> u16 {
        match self {
            Status::Ok => 200,
            Status::Created => 201,
            Status::BadRequest => 400,
            Status::Forbidden => 403,
            Status::NotFound => 404,
            Status::MethodNotSupported => 405,
            Status::RequestTimeout => 408,
            Status::LengthRequired => 411,
            Status::PayloadTooLarge => 413,
            Status::TooManyRequests => 429,
        }
    }

    /// Reason phrase used when the caller has nothing more specific.
    pub fn reason(self) -> &'static str {
        match self {
            Status::Ok => "OK",
            Status::Created => "Created",
            Status::BadRequest => "Bad request",
            Status::Forbidden => "Could not access resource",
            Status::NotFound => "Resource not found",
            Status::MethodNotSupported => "Method not supported",
            Status::RequestTimeout => "Request timeout",
            Status::LengthRequired => "Length field required for POST",
            Status::PayloadTooLarge => "Payload too large",
            Status::TooManyRequests => "Too many requests",
        }
    }
}

/// A response ready to be written to the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: Status,
    pub reason: &'static str,
    pub headers: Vec<(&'static str, String)>,
    pub body: Option<Bytes>,
}

impl Response {
    /// Bare status line, no headers. Used for every failure.
    pub fn error(status: Status) -> Self {
        Self::with_reason(status, status.reason())
    }

    /// Bare status line with a caller-chosen reason phrase.
    pub fn with_reason(status: Status, reason: &'static str) -> Self {
        Self {
            status,
            reason,
            headers: Vec::new(),
            body: None,
        }
    }

    /// Successful response stamped with the current `Date`.
    pub fn dated(status: Status) -> Self {
        let mut response = Self::error(status);
        response.headers.push(("Date", http_date()));
        response
    }

    /// `200 OK` carrying a resource body and its length.
    pub fn content(body: Bytes) -> Self {
        let mut response = Self::dated(Status::Ok);
        response
            .headers
            .push(("Content-Length", body.len().to_string()));
        response.body = Some(body);
        response
    }

    #[cfg(test)]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Serialize as `CODE REASON VERSION\r\n(Name: Value\r\n)*\r\n[body]`.
    pub fn to_bytes(&self) -> BytesMut {
        let body_len = self.body.as_ref().map_or(0, |b| b.len());
        let mut out = BytesMut::with_capacity(64 + body_len);

        out.extend_from_slice(self.status.code().to_string().as_bytes());
        out.extend_from_slice(b" ");
        out.extend_from_slice(self.reason.as_bytes());
        out.extend_from_slice(b" ");
        out.extend_from_slice(VERSION.as_bytes());
        out.extend_from_slice(b"\r\n");

        for (name, value) in &self.headers {
            out.extend_from_slice(name.as_bytes());
            out.extend_from_slice(b": ");
            out.extend_from_slice(value.as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(b"\r\n");

        if let Some(body) = &self.body {
            out.extend_from_slice(body);
        }
        out
    }
}

/// Current time in RFC 1123 form, always GMT.
pub fn http_date() -> String {
    Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}
