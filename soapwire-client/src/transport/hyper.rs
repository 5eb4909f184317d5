//! Hyper-based HTTP transport.
//!
//! This module provides [`HyperTransport`], the bundled [`Transport`]
//! implementation using hyper_util's legacy client.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use http::header::{AUTHORIZATION, CONNECTION, CONTENT_LENGTH, COOKIE, HeaderValue};
use http::{Request, Response, StatusCode};
use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::connect::proxy::Tunnel;
use hyper_util::client::legacy::{Builder, Client};
use hyper_util::rt::{TokioExecutor, TokioTimer};
use rustls::pki_types::CertificateDer;
use rustls::{ClientConfig, RootCertStore};
use tower_service::Service;

use super::body::TransportBody;
use super::connector::{
    DangerousAcceptAnyCertVerifier, build_https_connector, build_root_store,
    build_tunneled_connector, crypto_provider_builder, danger_accept_invalid_certs_config,
    default_tls_config,
};
use super::redirect::{Hop, next_hop, same_origin};
use super::{Exchange, Transport};
use crate::config::{Credentials, HandlerConfig};
use crate::error::TransportError;

/// Default maximum number of redirects followed per exchange.
pub const DEFAULT_MAX_REDIRECTS: usize = 50;

/// Hyper client with a direct HTTPS connector.
type DirectClient = Client<HttpsConnector<HttpConnector>, TransportBody>;

/// Hyper client whose connections are tunneled through a proxy.
type TunneledClient = Client<HttpsConnector<Tunnel<HttpConnector>>, TransportBody>;

/// The client serving one exchange.
enum Engine<'a> {
    Shared(&'a DirectClient),
    Direct(DirectClient),
    Tunneled(TunneledClient),
}

impl Engine<'_> {
    async fn request(
        &self,
        request: Request<TransportBody>,
    ) -> Result<Response<Incoming>, TransportError> {
        let result = match self {
            Engine::Shared(client) => client.request(request).await,
            Engine::Direct(client) => client.request(request).await,
            Engine::Tunneled(client) => client.request(request).await,
        };
        result.map_err(TransportError::Request)
    }
}

/// HTTP transport using hyper_util's legacy client.
///
/// Exchanges that need no TLS or proxy settings of their own share one pooled
/// client. An exchange carrying client certificates, a certificate-validation
/// hook or a proxy gets a dedicated client built for it.
///
/// # Example
///
/// ```ignore
/// use soapwire_client::{HyperTransport, RequestAdapter};
///
/// let transport = HyperTransport::builder()
///     .max_redirects(5)
///     .build()?;
///
/// let mut adapter = RequestAdapter::new("https://host/ews/exchange.asmx".parse()?, transport);
/// ```
#[derive(Clone)]
pub struct HyperTransport {
    client: DirectClient,
    roots: Arc<RootCertStore>,
    danger_accept_invalid_certs: bool,
    pool_idle_timeout: Option<Duration>,
    pool_max_idle_per_host: usize,
    max_redirects: usize,
    default_credentials: Option<Credentials>,
}

impl std::fmt::Debug for HyperTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HyperTransport")
            .field("roots", &self.roots.len())
            .field("danger_accept_invalid_certs", &self.danger_accept_invalid_certs)
            .field("max_redirects", &self.max_redirects)
            .field("default_credentials", &self.default_credentials.is_some())
            .finish_non_exhaustive()
    }
}

impl HyperTransport {
    /// Create a new transport builder.
    pub fn builder() -> HyperTransportBuilder {
        HyperTransportBuilder::new()
    }

    /// Create a new transport with default settings.
    pub fn new() -> Result<Self, TransportError> {
        Self::builder().build()
    }

    /// Maximum number of redirects followed per exchange.
    pub fn max_redirects(&self) -> usize {
        self.max_redirects
    }

    fn client_builder(&self) -> Builder {
        pooled_builder(self.pool_idle_timeout, self.pool_max_idle_per_host)
    }

    /// TLS configuration for an exchange that cannot use the shared client.
    fn dedicated_tls_config(&self, config: &HandlerConfig) -> Result<ClientConfig, TransportError> {
        let builder = crypto_provider_builder()?;
        let builder = match &config.certificate_validation {
            Some(hook) => builder
                .dangerous()
                .with_custom_certificate_verifier(hook.verifier()),
            None if self.danger_accept_invalid_certs => builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(DangerousAcceptAnyCertVerifier)),
            None => builder.with_root_certificates(Arc::clone(&self.roots)),
        };

        match &config.client_certificates {
            Some(certs) => builder
                .with_client_auth_cert(certs.chain().to_vec(), certs.key().clone_key())
                .map_err(TransportError::Tls),
            None => Ok(builder.with_no_client_auth()),
        }
    }

    fn engine_for(&self, config: &HandlerConfig) -> Result<Engine<'_>, TransportError> {
        if config.proxy.is_none() && !config.needs_dedicated_tls() {
            return Ok(Engine::Shared(&self.client));
        }

        let tls = if config.needs_dedicated_tls() {
            self.dedicated_tls_config(config)?
        } else if self.danger_accept_invalid_certs {
            danger_accept_invalid_certs_config()?
        } else {
            default_tls_config(Arc::clone(&self.roots))?
        };

        let builder = self.client_builder();
        match &config.proxy {
            Some(proxy) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(proxy = %proxy.uri(), "tunneling exchange through proxy");
                Ok(Engine::Tunneled(
                    builder.build(build_tunneled_connector(tls, proxy)?),
                ))
            }
            None => Ok(Engine::Direct(builder.build(build_https_connector(tls)))),
        }
    }

    /// Credentials to answer with, if any.
    fn credentials_for(&self, config: &HandlerConfig) -> Option<Credentials> {
        config.credentials.clone().or_else(|| {
            config
                .use_default_credentials
                .then(|| self.default_credentials.clone())
                .flatten()
        })
    }

    async fn run(&self, exchange: Exchange) -> Result<Response<Bytes>, TransportError> {
        let Exchange {
            request,
            config,
            cancel,
        } = exchange;

        #[cfg(feature = "tracing")]
        if let Some(group) = &config.connection_group_name {
            tracing::trace!(connection_group = %group, "connection group hint ignored");
        }

        let engine = self.engine_for(&config)?;
        let credentials = self.credentials_for(&config);
        let origin = request.uri().clone();

        let mut hop = Hop::from_request(request);
        let mut authorize = config.pre_authenticate && credentials.is_some();
        let mut redirects = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(TransportError::Canceled);
            }

            let send_credentials = if authorize && same_origin(&origin, &hop.uri) {
                credentials.as_ref()
            } else {
                None
            };
            let request = build_hop_request(&hop, &config, send_credentials)?;
            let (parts, incoming) = engine.request(request).await?.into_parts();
            let body = read_body(incoming).await?;

            if let Some(jar) = &config.cookie_container {
                jar.store_response(&hop.uri, &parts.headers);
            }

            if parts.status == StatusCode::UNAUTHORIZED && !authorize {
                if let Some(credentials) = &credentials {
                    if credentials.answers_challenge(&parts.headers)
                        && same_origin(&origin, &hop.uri)
                    {
                        #[cfg(feature = "tracing")]
                        tracing::debug!(
                            scheme = credentials.scheme(),
                            "answering authentication challenge"
                        );
                        authorize = true;
                        continue;
                    }
                }
            }

            if config.allow_auto_redirect {
                if let Some(next) = next_hop(&hop, parts.status, &parts.headers) {
                    redirects += 1;
                    if redirects > self.max_redirects {
                        return Err(TransportError::TooManyRedirects(self.max_redirects));
                    }
                    #[cfg(feature = "tracing")]
                    tracing::debug!(status = %parts.status, location = %next.uri, "following redirect");
                    hop = next;
                    continue;
                }
            }

            return Ok(Response::from_parts(parts, body));
        }
    }
}

fn pooled_builder(idle_timeout: Option<Duration>, max_idle_per_host: usize) -> Builder {
    let mut builder = Client::builder(TokioExecutor::new());
    builder.pool_timer(TokioTimer::new());
    if let Some(timeout) = idle_timeout {
        builder.pool_idle_timeout(timeout);
    }
    builder.pool_max_idle_per_host(max_idle_per_host);
    builder
}

/// Assemble the hyper request for one hop.
fn build_hop_request(
    hop: &Hop,
    config: &HandlerConfig,
    credentials: Option<&Credentials>,
) -> Result<Request<TransportBody>, TransportError> {
    let mut request = Request::new(TransportBody::full(hop.body.clone()));
    *request.method_mut() = hop.method.clone();
    *request.uri_mut() = hop.uri.clone();
    *request.headers_mut() = hop.headers.clone();

    let headers = request.headers_mut();
    headers.remove(CONTENT_LENGTH);
    if !config.keep_alive {
        headers.insert(CONNECTION, HeaderValue::from_static("close"));
    }
    if let Some(credentials) = credentials {
        headers.insert(AUTHORIZATION, credentials.authorization()?);
    }
    if let Some(stored) = config
        .cookie_container
        .as_ref()
        .and_then(|jar| jar.cookie_header(&hop.uri))
    {
        let merged = match headers.get(COOKIE) {
            Some(existing) => {
                let mut combined = existing.as_bytes().to_vec();
                combined.extend_from_slice(b"; ");
                combined.extend_from_slice(stored.as_bytes());
                HeaderValue::from_bytes(&combined)?
            }
            None => stored,
        };
        headers.insert(COOKIE, merged);
    }

    Ok(request)
}

async fn read_body(incoming: Incoming) -> Result<Bytes, TransportError> {
    Ok(incoming
        .collect()
        .await
        .map_err(TransportError::Body)?
        .to_bytes())
}

impl Transport for HyperTransport {
    fn execute(
        &self,
        exchange: Exchange,
    ) -> impl Future<Output = Result<Response<Bytes>, TransportError>> + Send {
        self.run(exchange)
    }
}

// Implement tower::Service for HyperTransport
impl Service<Exchange> for HyperTransport {
    type Response = Response<Bytes>;
    type Error = TransportError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        // hyper_util legacy::Client is always ready
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, exchange: Exchange) -> Self::Future {
        let transport = self.clone();
        Box::pin(async move { transport.run(exchange).await })
    }
}

/// Builder for [`HyperTransport`].
///
/// # Example
///
/// ```ignore
/// use soapwire_client::transport::HyperTransportBuilder;
/// use std::time::Duration;
///
/// let transport = HyperTransportBuilder::new()
///     .pool_idle_timeout(Duration::from_secs(90))
///     .default_credentials(Credentials::basic("svc-account", "secret"))
///     .build()?;
/// ```
pub struct HyperTransportBuilder {
    /// Custom TLS configuration for the shared client.
    tls_config: Option<ClientConfig>,
    /// Extra trust anchors added to the feature-selected roots.
    additional_roots: Vec<CertificateDer<'static>>,
    /// Whether to accept invalid certificates (dangerous!).
    danger_accept_invalid_certs: bool,
    /// Connection pool idle timeout.
    pool_idle_timeout: Option<Duration>,
    /// Maximum idle connections per host.
    pool_max_idle_per_host: usize,
    /// Redirect limit per exchange.
    max_redirects: usize,
    /// Identity used when an exchange asks for default credentials.
    default_credentials: Option<Credentials>,
}

impl Default for HyperTransportBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl HyperTransportBuilder {
    /// Create a new transport builder with default settings.
    pub fn new() -> Self {
        Self {
            tls_config: None,
            additional_roots: Vec::new(),
            danger_accept_invalid_certs: false,
            pool_idle_timeout: Some(Duration::from_secs(90)),
            pool_max_idle_per_host: 32,
            max_redirects: DEFAULT_MAX_REDIRECTS,
            default_credentials: None,
        }
    }

    /// Set a custom TLS configuration for the shared client.
    ///
    /// Exchanges that carry client certificates or a validation hook build
    /// their own configuration from the feature-selected roots instead.
    pub fn tls_config(mut self, config: ClientConfig) -> Self {
        self.tls_config = Some(config);
        self
    }

    /// Trust an additional root certificate (e.g. a private CA).
    pub fn add_root_certificate(mut self, cert: CertificateDer<'static>) -> Self {
        self.additional_roots.push(cert);
        self
    }

    /// Accept invalid TLS certificates.
    ///
    /// # Warning
    ///
    /// This is extremely dangerous and should only be used for development/testing!
    /// It makes the connection vulnerable to man-in-the-middle attacks.
    pub fn danger_accept_invalid_certs(mut self) -> Self {
        self.danger_accept_invalid_certs = true;
        self
    }

    /// Set the connection pool idle timeout.
    ///
    /// Default: 90 seconds.
    pub fn pool_idle_timeout(mut self, timeout: Duration) -> Self {
        self.pool_idle_timeout = Some(timeout);
        self
    }

    /// Disable connection pool idle timeout.
    pub fn pool_idle_timeout_none(mut self) -> Self {
        self.pool_idle_timeout = None;
        self
    }

    /// Set the maximum number of idle connections per host.
    ///
    /// Default: 32.
    pub fn pool_max_idle_per_host(mut self, max: usize) -> Self {
        self.pool_max_idle_per_host = max;
        self
    }

    /// Set the maximum number of redirects followed per exchange.
    ///
    /// Default: 50.
    pub fn max_redirects(mut self, max: usize) -> Self {
        self.max_redirects = max;
        self
    }

    /// Set the identity used when an exchange enables default credentials.
    pub fn default_credentials(mut self, credentials: Credentials) -> Self {
        self.default_credentials = Some(credentials);
        self
    }

    /// Build the transport.
    pub fn build(self) -> Result<HyperTransport, TransportError> {
        let mut roots = build_root_store();
        for cert in self.additional_roots {
            roots.add(cert).map_err(TransportError::Tls)?;
        }
        let roots = Arc::new(roots);

        let tls_config = match self.tls_config {
            Some(config) => config,
            None if self.danger_accept_invalid_certs => danger_accept_invalid_certs_config()?,
            None => default_tls_config(Arc::clone(&roots))?,
        };

        let client = pooled_builder(self.pool_idle_timeout, self.pool_max_idle_per_host)
            .build(build_https_connector(tls_config));

        Ok(HyperTransport {
            client,
            roots,
            danger_accept_invalid_certs: self.danger_accept_invalid_certs,
            pool_idle_timeout: self.pool_idle_timeout,
            pool_max_idle_per_host: self.pool_max_idle_per_host,
            max_redirects: self.max_redirects,
            default_credentials: self.default_credentials,
        })
    }
}

impl std::fmt::Debug for HyperTransportBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HyperTransportBuilder")
            .field("tls_config", &self.tls_config.is_some())
            .field("additional_roots", &self.additional_roots.len())
            .field("danger_accept_invalid_certs", &self.danger_accept_invalid_certs)
            .field("pool_idle_timeout", &self.pool_idle_timeout)
            .field("pool_max_idle_per_host", &self.pool_max_idle_per_host)
            .field("max_redirects", &self.max_redirects)
            .field("default_credentials", &self.default_credentials.is_some())
            .finish()
    }
}
