//! HTTP transport layer for the request adapter.
//!
//! This module provides the [`Transport`] seam the adapter delegates to, and
//! [`HyperTransport`], the bundled implementation using hyper_util's legacy
//! client. It supports:
//!
//! - HTTP/1.1 with connection pooling
//! - TLS with rustls (feature-gated), client certificates and a
//!   certificate-validation hook
//! - Redirect following, challenge-response authentication, cookies
//! - CONNECT tunneling through a proxy
//!
//! # Feature Flags
//!
//! TLS support requires enabling the appropriate features:
//!
//! - `tls` (default) - Enables `tls-ring` + `tls-native-roots` for convenience
//! - `tls-ring` / `tls-aws-lc` - Crypto providers
//! - `tls-native-roots` / `tls-webpki-roots` - Root certificates
//!
//! # Example
//!
//! ```ignore
//! use soapwire_client::transport::HyperTransport;
//! use std::time::Duration;
//!
//! let transport = HyperTransport::builder()
//!     .pool_idle_timeout(Duration::from_secs(60))
//!     .max_redirects(10)
//!     .build()?;
//! ```

use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use crate::config::HandlerConfig;
use crate::error::TransportError;

mod body;
mod connector;
mod hyper;
mod redirect;

pub use body::TransportBody;
pub use connector::{
    DangerousAcceptAnyCertVerifier, build_https_connector, build_root_store,
    build_tunneled_connector, crypto_provider_builder, danger_accept_invalid_certs_config,
    default_tls_config, has_tls_support,
};
pub use self::hyper::{DEFAULT_MAX_REDIRECTS, HyperTransport, HyperTransportBuilder};

// Re-export rustls types that users might need for TLS configuration
pub use rustls::ClientConfig as TlsClientConfig;

/// One exchange handed to a [`Transport`].
#[derive(Debug)]
pub struct Exchange {
    /// Method, target, headers and the frozen payload.
    pub request: http::Request<Bytes>,
    /// Settings snapshot taken when the exchange started.
    pub config: HandlerConfig,
    /// Signaled when the caller aborts.
    pub cancel: CancellationToken,
}

impl Exchange {
    pub fn new(request: http::Request<Bytes>, config: HandlerConfig, cancel: CancellationToken) -> Self {
        Self {
            request,
            config,
            cancel,
        }
    }
}

/// The HTTP engine an adapter delegates its exchange to.
///
/// Implementations apply the [`HandlerConfig`] they receive, observe the
/// cancellation token, and return the complete response with its body
/// buffered. A non-2xx status is not a fault at this layer; it is returned as
/// a normal response.
pub trait Transport: Send + Sync {
    /// Issue the exchange.
    fn execute(
        &self,
        exchange: Exchange,
    ) -> impl Future<Output = Result<http::Response<Bytes>, TransportError>> + Send;
}

impl<T: Transport> Transport for Arc<T> {
    fn execute(
        &self,
        exchange: Exchange,
    ) -> impl Future<Output = Result<http::Response<Bytes>, TransportError>> + Send {
        (**self).execute(exchange)
    }
}
