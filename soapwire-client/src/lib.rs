//! HTTP request adapter for SOAP/XML web-service clients.
//!
//! This crate decouples a protocol client from the HTTP engine it rides on.
//! A [`RequestAdapter`] owns one exchange: its configuration, a buffered
//! request body with an explicit lifecycle, and a cancellation signal. The
//! exchange itself is delegated to a [`Transport`]; [`HyperTransport`] is the
//! bundled implementation.
//!
//! ## Features
//!
//! - Property-style configuration snapshotted at send time
//! - Write-once request body: writable, then frozen, then released
//! - Abort before or during the exchange
//! - One error type, [`ErrorEnvelope`], for every failure
//! - Redirects, challenge authentication, cookies, proxies and client
//!   certificates in the hyper transport
//!
//! ## Example
//!
//! ```ignore
//! use std::io::Write;
//! use soapwire_client::{ExchangeStatus, RequestAdapter};
//!
//! let mut adapter = RequestAdapter::with_default_transport(
//!     "https://mail.example.com/ews/exchange.asmx".parse()?,
//! )?;
//! adapter.set_method(http::Method::POST);
//! adapter.set_content_type(Some("text/xml; charset=utf-8".parse()?));
//! adapter.writable_body()?.write_all(envelope.as_bytes())?;
//!
//! match adapter.send().await {
//!     Ok(response) => println!("{}", String::from_utf8_lossy(response.body())),
//!     Err(err) if err.status() == ExchangeStatus::ProtocolError => {
//!         let fault = err.response().map(|r| r.body().clone());
//!         println!("server fault: {fault:?}");
//!     }
//!     Err(err) => return Err(err.into()),
//! }
//! ```
//!
//! ## Sharing a transport
//!
//! [`RequestAdapter::with_default_transport`] builds a new connection pool
//! every time. To reuse connections across exchanges, build the transport
//! once and share it behind an `Arc`:
//!
//! ```ignore
//! use std::sync::Arc;
//! use soapwire_client::{HyperTransport, RequestAdapter};
//!
//! let transport = Arc::new(HyperTransport::new()?);
//!
//! for mailbox in mailboxes {
//!     let mut adapter = RequestAdapter::new(mailbox.ews_url(), Arc::clone(&transport));
//!     adapter.set_method(http::Method::POST);
//!     adapter.writable_body()?.write_all(mailbox.find_item().as_bytes())?;
//!     adapter.send().await?;
//! }
//! ```
//!
//! ## Aborting
//!
//! ```ignore
//! let handle = adapter.abort_handle();
//! tokio::spawn(async move {
//!     tokio::time::sleep(Duration::from_secs(5)).await;
//!     handle.abort();
//! });
//!
//! let err = adapter.send().await.unwrap_err();
//! assert!(err.is_canceled());
//! ```

mod adapter;
mod body;
pub mod config;
mod error;
pub mod transport;

pub use adapter::{AbortHandle, RequestAdapter};
pub use body::{BodySink, BodyWriter, PhaseError, SinkPhase};
pub use config::{
    CertificateValidation, ClientCertificates, CookieJar, Credentials, DEFAULT_TIMEOUT,
    HandlerConfig, Proxy,
};
pub use error::TransportError;
pub use transport::{Exchange, HyperTransport, HyperTransportBuilder, Transport};

// Re-export core types for convenience
pub use soapwire_core::{Cause, ErrorEnvelope, ExchangeStatus, ParseStatusError, ResponseWrapper};

// Re-export the TLS client config so callers can customize TLS
pub use transport::TlsClientConfig;
