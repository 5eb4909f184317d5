//! Transport handler configuration.
//!
//! [`HandlerConfig`] is the snapshot of per-exchange settings a
//! [`RequestAdapter`](crate::RequestAdapter) hands to its transport. The
//! pass-through values ([`Credentials`], [`Proxy`], [`CookieJar`],
//! [`ClientCertificates`], [`CertificateValidation`]) are never inspected by the
//! adapter; only the transport gives them meaning.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use cookie_store::{CookieStore, RawCookie};
use http::header::{HeaderMap, HeaderValue, InvalidHeaderValue, SET_COOKIE, WWW_AUTHENTICATE};
use http::Uri;
use rustls::client::danger::ServerCertVerifier;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use url::Url;

use crate::transport::DangerousAcceptAnyCertVerifier;

/// Default exchange timeout (100 seconds).
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(100);

/// Per-exchange settings forwarded to the transport handler.
///
/// Built by the adapter when `send()` starts; later changes to the adapter do
/// not reach an exchange already in flight.
#[derive(Clone, Debug)]
pub struct HandlerConfig {
    /// Wall-clock bound on the whole exchange.
    pub timeout: Duration,
    /// Keep the connection open after the exchange.
    pub keep_alive: bool,
    /// Connection group hint, not interpreted by the bundled transport.
    pub connection_group_name: Option<String>,
    /// Follow redirect responses.
    pub allow_auto_redirect: bool,
    /// Send credentials with the first request instead of waiting for a challenge.
    pub pre_authenticate: bool,
    /// Use the transport's default identity when no credentials are set.
    pub use_default_credentials: bool,
    pub credentials: Option<Credentials>,
    pub proxy: Option<Proxy>,
    pub cookie_container: Option<CookieJar>,
    pub client_certificates: Option<ClientCertificates>,
    /// Replaces server-certificate validation for the exchange.
    pub certificate_validation: Option<CertificateValidation>,
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            keep_alive: true,
            connection_group_name: None,
            allow_auto_redirect: true,
            pre_authenticate: false,
            use_default_credentials: false,
            credentials: None,
            proxy: None,
            cookie_container: None,
            client_certificates: None,
            certificate_validation: None,
        }
    }
}

impl HandlerConfig {
    /// Whether this exchange needs a TLS configuration of its own.
    pub fn needs_dedicated_tls(&self) -> bool {
        self.client_certificates.is_some() || self.certificate_validation.is_some()
    }
}

// ============================================================================
// Credentials
// ============================================================================

/// Credentials presented to the remote endpoint or a proxy.
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    /// HTTP Basic authentication.
    Basic { username: String, password: String },
    /// Bearer token (e.g. OAuth access token).
    Bearer(String),
}

impl Credentials {
    pub fn basic<U: Into<String>, P: Into<String>>(username: U, password: P) -> Self {
        Credentials::Basic {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn bearer<T: Into<String>>(token: T) -> Self {
        Credentials::Bearer(token.into())
    }

    /// The authentication scheme name.
    pub fn scheme(&self) -> &'static str {
        match self {
            Credentials::Basic { .. } => "Basic",
            Credentials::Bearer(_) => "Bearer",
        }
    }

    /// The `Authorization` (or `Proxy-Authorization`) header value.
    pub fn authorization(&self) -> Result<HeaderValue, InvalidHeaderValue> {
        let raw = match self {
            Credentials::Basic { username, password } => {
                format!("Basic {}", STANDARD.encode(format!("{username}:{password}")))
            }
            Credentials::Bearer(token) => format!("Bearer {token}"),
        };
        let mut value = HeaderValue::from_str(&raw)?;
        value.set_sensitive(true);
        Ok(value)
    }

    /// Whether a `WWW-Authenticate` challenge asks for this credential's scheme.
    pub fn answers_challenge(&self, headers: &HeaderMap) -> bool {
        let scheme = self.scheme();
        headers
            .get_all(WWW_AUTHENTICATE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(','))
            .filter_map(|challenge| challenge.split_whitespace().next())
            .any(|name| name.eq_ignore_ascii_case(scheme))
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::Basic { username, .. } => f
                .debug_struct("Credentials::Basic")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
            Credentials::Bearer(_) => f.write_str("Credentials::Bearer(<redacted>)"),
        }
    }
}

// ============================================================================
// Proxy
// ============================================================================

/// An HTTP proxy the exchange is tunneled through.
#[derive(Clone, Debug)]
pub struct Proxy {
    uri: Uri,
    credentials: Option<Credentials>,
}

impl Proxy {
    pub fn new(uri: Uri) -> Self {
        Self {
            uri,
            credentials: None,
        }
    }

    /// Credentials sent as `Proxy-Authorization`.
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }
}

// ============================================================================
// Cookies
// ============================================================================

/// A shareable cookie store.
///
/// Clones share the same store, so one jar can span many exchanges. Storage
/// and matching follow RFC 6265: `Domain`, `Path`, `Secure`, `Expires` and
/// `Max-Age` are honored.
#[derive(Clone, Default)]
pub struct CookieJar {
    inner: Arc<Mutex<CookieStore>>,
}

impl CookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store one `Set-Cookie` value as if it arrived in a response from `uri`.
    pub fn insert(&self, uri: &Uri, set_cookie: &str) {
        let Some(url) = to_url(uri) else {
            return;
        };
        let Ok(cookie) = RawCookie::parse(set_cookie.to_owned()) else {
            return;
        };
        self.lock().store_response_cookies(std::iter::once(cookie), &url);
    }

    /// The value of cookie `name` that a request to `uri` would carry.
    pub fn get(&self, uri: &Uri, name: &str) -> Option<String> {
        let url = to_url(uri)?;
        let store = self.lock();
        store
            .get_request_values(&url)
            .find(|(cookie, _)| *cookie == name)
            .map(|(_, value)| value.to_owned())
    }

    /// Number of unexpired cookies across all domains.
    pub fn len(&self) -> usize {
        self.lock().iter_unexpired().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    /// The `Cookie` header value for a request to `uri`, if any cookie applies.
    pub fn cookie_header(&self, uri: &Uri) -> Option<HeaderValue> {
        let url = to_url(uri)?;
        let store = self.lock();
        let joined = store
            .get_request_values(&url)
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join("; ");
        if joined.is_empty() {
            return None;
        }
        HeaderValue::from_str(&joined).ok()
    }

    /// Store the `Set-Cookie` headers of a response received from `uri`.
    pub fn store_response(&self, uri: &Uri, headers: &HeaderMap) {
        let Some(url) = to_url(uri) else {
            return;
        };
        let cookies = headers
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .filter_map(|value| RawCookie::parse(value.to_owned()).ok());
        self.lock().store_response_cookies(cookies, &url);
    }

    fn lock(&self) -> MutexGuard<'_, CookieStore> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn to_url(uri: &Uri) -> Option<Url> {
    Url::parse(&uri.to_string()).ok()
}

impl fmt::Debug for CookieJar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CookieJar").field("len", &self.len()).finish()
    }
}

// ============================================================================
// TLS pass-through values
// ============================================================================

/// A client certificate chain and private key for mutual TLS.
///
/// The chain should contain the client certificate first, followed by any
/// intermediate certificates.
pub struct ClientCertificates {
    chain: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
}

impl ClientCertificates {
    pub fn new(chain: Vec<CertificateDer<'static>>, key: PrivateKeyDer<'static>) -> Self {
        Self { chain, key }
    }

    pub fn chain(&self) -> &[CertificateDer<'static>] {
        &self.chain
    }

    pub fn key(&self) -> &PrivateKeyDer<'static> {
        &self.key
    }
}

impl Clone for ClientCertificates {
    fn clone(&self) -> Self {
        Self {
            chain: self.chain.clone(),
            key: self.key.clone_key(),
        }
    }
}

impl fmt::Debug for ClientCertificates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCertificates")
            .field("chain_len", &self.chain.len())
            .field("key", &"<redacted>")
            .finish()
    }
}

/// Server-certificate validation hook.
///
/// Wraps a rustls [`ServerCertVerifier`] that replaces the default
/// root-store validation for an exchange.
#[derive(Clone, Debug)]
pub struct CertificateValidation {
    verifier: Arc<dyn ServerCertVerifier>,
}

impl CertificateValidation {
    pub fn new(verifier: Arc<dyn ServerCertVerifier>) -> Self {
        Self { verifier }
    }

    /// Accept any server certificate.
    ///
    /// # Warning
    ///
    /// This disables server authentication and makes the exchange vulnerable
    /// to man-in-the-middle attacks. Use it for development only.
    pub fn danger_accept_any() -> Self {
        Self::new(Arc::new(DangerousAcceptAnyCertVerifier))
    }

    pub fn verifier(&self) -> Arc<dyn ServerCertVerifier> {
        Arc::clone(&self.verifier)
    }
}
