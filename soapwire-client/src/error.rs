//! Transport-level fault types.
//!
//! This module provides [`TransportError`], the error a [`Transport`](crate::Transport)
//! raises when an exchange cannot be completed, and its classification into an
//! [`ErrorEnvelope`].

use std::time::Duration;

use soapwire_core::{ErrorEnvelope, ExchangeStatus};

/// Faults raised by a transport handler.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Connection or request failure reported by the HTTP engine.
    #[error("request failed: {0}")]
    Request(#[source] hyper_util::client::legacy::Error),

    /// The response body could not be read to the end.
    #[error("failed to read response body: {0}")]
    Body(#[source] hyper::Error),

    /// The outbound request could not be assembled.
    #[error("invalid request: {0}")]
    InvalidRequest(#[from] http::Error),

    /// A configured value is not a legal header value.
    #[error("invalid header value: {0}")]
    InvalidHeader(#[from] http::header::InvalidHeaderValue),

    /// The TLS client configuration could not be built.
    #[error("tls configuration failed: {0}")]
    Tls(#[source] rustls::Error),

    /// No rustls crypto provider is enabled or installed.
    #[error(
        "no TLS crypto provider available; enable `tls-ring` or `tls-aws-lc`, \
         or install one with `CryptoProvider::install_default()`"
    )]
    NoCryptoProvider,

    /// The exchange did not finish within the configured timeout.
    #[error("exchange timed out after {0:?}")]
    TimedOut(Duration),

    /// The redirect chain was longer than allowed.
    #[error("exceeded the maximum of {0} redirects")]
    TooManyRedirects(usize),

    /// The exchange observed its cancellation signal.
    #[error("the exchange was canceled")]
    Canceled,

    /// Any other fault, described by a message.
    #[error("{0}")]
    Other(String),
}

impl TransportError {
    /// Create a free-form fault.
    pub fn other<S: Into<String>>(message: S) -> Self {
        TransportError::Other(message.into())
    }

    pub fn is_canceled(&self) -> bool {
        matches!(self, TransportError::Canceled)
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, TransportError::TimedOut(_))
    }

    /// Classify this fault into the envelope raised to the caller.
    ///
    /// Cancellation becomes `RequestCanceled`; everything else is an
    /// `UnknownError` whose cause is this fault.
    pub fn into_envelope(self) -> ErrorEnvelope {
        if self.is_canceled() {
            ErrorEnvelope::with_cause(
                "the request was canceled",
                ExchangeStatus::RequestCanceled,
                self,
            )
        } else {
            ErrorEnvelope::unknown(self)
        }
    }
}

impl From<TransportError> for ErrorEnvelope {
    fn from(err: TransportError) -> Self {
        err.into_envelope()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canceled_classifies_as_request_canceled() {
        let envelope = TransportError::Canceled.into_envelope();
        assert_eq!(envelope.status(), ExchangeStatus::RequestCanceled);
        assert!(envelope.response().is_none());
    }

    #[test]
    fn test_other_classifies_as_unknown() {
        let envelope: ErrorEnvelope = TransportError::other("connection reset by peer").into();
        assert_eq!(envelope.status(), ExchangeStatus::UnknownError);
        assert_eq!(envelope.message(), Some("connection reset by peer"));

        let cause = envelope.downcast_cause::<TransportError>().unwrap();
        assert!(matches!(cause, TransportError::Other(msg) if msg == "connection reset by peer"));
    }

    #[test]
    fn test_timeout_classifies_as_unknown() {
        let envelope = TransportError::TimedOut(Duration::from_millis(250)).into_envelope();
        assert!(envelope.is_unknown());
        assert_eq!(envelope.message(), Some("exchange timed out after 250ms"));
        assert!(envelope.downcast_cause::<TransportError>().unwrap().is_timeout());
    }

    #[test]
    fn test_invalid_header_converts() {
        let err: TransportError = http::HeaderValue::from_str("bad\nvalue").unwrap_err().into();
        assert!(matches!(err, TransportError::InvalidHeader(_)));
        assert!(!err.is_canceled());
    }
}
