//! Exchange failure types.
//!
//! This module provides the single failure type raised for a non-successful
//! exchange:
//! - [`ExchangeStatus`]: How an exchange ended
//! - [`ErrorEnvelope`]: The typed failure carrying status, response and cause

use std::error::Error as StdError;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::ResponseWrapper;

/// Boxed cause carried by an [`ErrorEnvelope`].
pub type Cause = Arc<dyn StdError + Send + Sync + 'static>;

/// How an exchange ended.
///
/// `Success` is the non-error path and is never carried by a raised
/// [`ErrorEnvelope`] built by the adapter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ExchangeStatus {
    /// The exchange completed with a success status code.
    Success,
    /// The exchange completed but the HTTP status denotes failure.
    ProtocolError,
    /// A transport-level fault that is neither a cancellation nor a protocol error.
    UnknownError,
    /// Cancellation was observed before the response was received.
    RequestCanceled,
}

impl ExchangeStatus {
    /// Get the string representation of this status.
    pub fn as_str(&self) -> &'static str {
        match self {
            ExchangeStatus::Success => "success",
            ExchangeStatus::ProtocolError => "protocol_error",
            ExchangeStatus::UnknownError => "unknown_error",
            ExchangeStatus::RequestCanceled => "request_canceled",
        }
    }
}

impl fmt::Display for ExchangeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an [`ExchangeStatus`] from a string fails.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("unknown exchange status: {0}")]
pub struct ParseStatusError(String);

impl FromStr for ExchangeStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(ExchangeStatus::Success),
            "protocol_error" => Ok(ExchangeStatus::ProtocolError),
            "unknown_error" => Ok(ExchangeStatus::UnknownError),
            "request_canceled" | "request_cancelled" => Ok(ExchangeStatus::RequestCanceled),
            other => Err(ParseStatusError(other.to_string())),
        }
    }
}

/// The single typed failure raised for every non-successful exchange.
///
/// An envelope carries:
/// - a [`status`](ErrorEnvelope::status) classifying the failure
/// - the captured [`response`](ErrorEnvelope::response) for protocol errors
/// - an optional human readable [`message`](ErrorEnvelope::message)
/// - the wrapped [`cause`](ErrorEnvelope::cause), returned as-is from
///   [`Error::source`](std::error::Error::source)
///
/// # Example
///
/// ```
/// use soapwire_core::{ErrorEnvelope, ExchangeStatus};
///
/// let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "connection reset");
/// let err = ErrorEnvelope::with_cause("connection reset", ExchangeStatus::UnknownError, io);
///
/// assert_eq!(err.status(), ExchangeStatus::UnknownError);
/// assert!(err.downcast_cause::<std::io::Error>().is_some());
/// ```
#[derive(Clone)]
pub struct ErrorEnvelope {
    status: ExchangeStatus,
    response: Option<ResponseWrapper>,
    message: Option<String>,
    cause: Option<Cause>,
}

impl ErrorEnvelope {
    /// Create an envelope around a captured response.
    pub fn from_response(response: ResponseWrapper, status: ExchangeStatus) -> Self {
        let message = response
            .status()
            .canonical_reason()
            .map(|reason| format!("{} {}", response.status().as_u16(), reason))
            .or_else(|| Some(response.status().as_u16().to_string()));
        Self {
            status,
            response: Some(response),
            message,
            cause: None,
        }
    }

    /// Create an envelope with a message and no cause.
    pub fn new<S: Into<String>>(message: S, status: ExchangeStatus) -> Self {
        Self {
            status,
            response: None,
            message: Some(message.into()),
            cause: None,
        }
    }

    /// Create an envelope wrapping an underlying cause.
    pub fn with_cause<S, E>(message: S, status: ExchangeStatus, cause: E) -> Self
    where
        S: Into<String>,
        E: StdError + Send + Sync + 'static,
    {
        Self::with_shared_cause(message, status, Arc::new(cause))
    }

    /// Create an envelope wrapping an already shared cause.
    pub fn with_shared_cause<S: Into<String>>(
        message: S,
        status: ExchangeStatus,
        cause: Cause,
    ) -> Self {
        Self {
            status,
            response: None,
            message: Some(message.into()),
            cause: Some(cause),
        }
    }

    // Convenience constructors

    /// Create a `RequestCanceled` envelope.
    pub fn canceled() -> Self {
        Self::new("the request was canceled", ExchangeStatus::RequestCanceled)
    }

    /// Create a `ProtocolError` envelope capturing the response.
    pub fn protocol(response: ResponseWrapper) -> Self {
        Self::from_response(response, ExchangeStatus::ProtocolError)
    }

    /// Create an `UnknownError` envelope whose message is the cause's message.
    pub fn unknown<E>(cause: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        let mut message = cause.to_string();
        if message.is_empty() {
            message = "unknown transport error".to_string();
        }
        Self::with_cause(message, ExchangeStatus::UnknownError, cause)
    }

    /// How the exchange ended.
    pub fn status(&self) -> ExchangeStatus {
        self.status
    }

    /// The captured response (present for protocol errors).
    pub fn response(&self) -> Option<&ResponseWrapper> {
        self.response.as_ref()
    }

    /// Take ownership of the captured response.
    pub fn into_response(self) -> Option<ResponseWrapper> {
        self.response
    }

    /// The human readable message.
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// The wrapped underlying cause.
    pub fn cause(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        self.cause.as_deref()
    }

    /// Downcast the wrapped cause to a concrete error type.
    pub fn downcast_cause<E: StdError + 'static>(&self) -> Option<&E> {
        self.cause.as_deref().and_then(|cause| cause.downcast_ref::<E>())
    }

    /// The innermost error of the cause chain.
    pub fn root_cause(&self) -> Option<&(dyn StdError + 'static)> {
        let mut current: &(dyn StdError + 'static) = self.cause.as_deref()?;
        while let Some(next) = current.source() {
            current = next;
        }
        Some(current)
    }

    pub fn is_canceled(&self) -> bool {
        self.status == ExchangeStatus::RequestCanceled
    }

    pub fn is_protocol_error(&self) -> bool {
        self.status == ExchangeStatus::ProtocolError
    }

    pub fn is_unknown(&self) -> bool {
        self.status == ExchangeStatus::UnknownError
    }
}

impl fmt::Debug for ErrorEnvelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorEnvelope")
            .field("status", &self.status)
            .field("response_status", &self.response.as_ref().map(|r| r.status()))
            .field("message", &self.message)
            .field("cause", &self.cause)
            .finish()
    }
}

/// Envelopes are equal when status, response and message match and both
/// carry the same shared cause (or neither carries one).
impl PartialEq for ErrorEnvelope {
    fn eq(&self, other: &Self) -> bool {
        let same_cause = match (&self.cause, &other.cause) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        };
        self.status == other.status
            && self.response == other.response
            && self.message == other.message
            && same_cause
    }
}

impl fmt::Display for ErrorEnvelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(message) => write!(f, "{}: {}", self.status, message),
            None => write!(f, "{}", self.status),
        }
    }
}

impl StdError for ErrorEnvelope {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.cause.as_deref().map(|cause| cause as &(dyn StdError + 'static))
    }
}
