//! Response types for a completed exchange.
//!
//! This module provides [`ResponseWrapper`], a read-only view over the status,
//! headers and buffered body the transport handed back.

use bytes::buf::Reader;
use bytes::{Buf, Bytes};
use http::{HeaderMap, StatusCode, header};

/// Read-only view over a completed exchange.
///
/// The body is fully buffered by the time a `ResponseWrapper` exists; reading
/// it never touches the network. The same type is captured inside an
/// [`ErrorEnvelope`](crate::ErrorEnvelope) for protocol errors.
///
/// # Example
///
/// ```
/// use bytes::Bytes;
/// use http::{HeaderMap, StatusCode};
/// use soapwire_core::ResponseWrapper;
/// use std::io::Read;
///
/// let response = ResponseWrapper::new(StatusCode::OK, HeaderMap::new(), Bytes::from("<resp/>"));
///
/// let mut text = String::new();
/// response.body_reader().read_to_string(&mut text).unwrap();
/// assert_eq!(text, "<resp/>");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseWrapper {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

impl ResponseWrapper {
    /// Create a new response from its parts.
    pub fn new(status: StatusCode, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    /// The HTTP status code.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Whether the status code is in the 2xx range.
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// All response headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Get a header value by name.
    ///
    /// Returns `None` if the header is not present or is not valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Get all values for a header (for headers that appear multiple times).
    pub fn header_all(&self, name: &str) -> impl Iterator<Item = &str> {
        self.headers
            .get_all(name)
            .iter()
            .filter_map(|v| v.to_str().ok())
    }

    /// The parsed `Content-Type` header, if present and well-formed.
    pub fn content_type(&self) -> Option<mime::Mime> {
        self.headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
    }

    /// The buffered response body.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// A reader positioned at the start of the body.
    ///
    /// Each call returns an independent reader; the body is shared, not copied.
    pub fn body_reader(&self) -> Reader<Bytes> {
        self.body.clone().reader()
    }

    /// Consume the wrapper and return the body.
    pub fn into_body(self) -> Bytes {
        self.body
    }

    /// Decompose into status, headers and body.
    pub fn into_parts(self) -> (StatusCode, HeaderMap, Bytes) {
        (self.status, self.headers, self.body)
    }
}

impl From<http::Response<Bytes>> for ResponseWrapper {
    fn from(response: http::Response<Bytes>) -> Self {
        let (parts, body) = response.into_parts();
        Self::new(parts.status, parts.headers, body)
    }
}
