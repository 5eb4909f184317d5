//! The request adapter: one configured HTTP exchange.
//!
//! A [`RequestAdapter`] is bound to a target address at construction. The
//! caller sets properties, fills the body through
//! [`writable_body`](RequestAdapter::writable_body), then awaits
//! [`send`](RequestAdapter::send). Every non-success outcome comes back as a
//! single [`ErrorEnvelope`].
//!
//! # Example
//!
//! ```ignore
//! use std::io::Write;
//! use soapwire_client::RequestAdapter;
//!
//! let mut adapter = RequestAdapter::with_default_transport("https://host/ews/exchange.asmx".parse()?)?;
//! adapter.set_method(http::Method::POST);
//! adapter.set_content_type(Some("text/xml; charset=utf-8".parse()?));
//!
//! adapter.writable_body()?.write_all(b"<soap:Envelope>...</soap:Envelope>")?;
//!
//! let response = adapter.send().await?;
//! println!("{} ({} bytes)", response.status(), response.body().len());
//! ```

use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use http::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderValue, USER_AGENT};
use http::{Method, Uri};
use mime::Mime;
use soapwire_core::{ErrorEnvelope, ExchangeStatus, ResponseWrapper};
use tokio_util::sync::CancellationToken;

#[cfg(feature = "tracing")]
use tracing::{Instrument, info_span};

use crate::body::{BodySink, BodyWriter, PhaseError, SinkPhase};
use crate::config::{
    CertificateValidation, ClientCertificates, CookieJar, Credentials, HandlerConfig, Proxy,
};
use crate::error::TransportError;
use crate::transport::{Exchange, HyperTransport, Transport};

/// Cancels the exchange of a [`RequestAdapter`] from anywhere.
///
/// Obtained from [`RequestAdapter::abort_handle`]. Clones share one signal.
#[derive(Clone, Debug)]
pub struct AbortHandle {
    token: CancellationToken,
}

impl AbortHandle {
    /// Signal cancellation. Calling it again has no further effect.
    pub fn abort(&self) {
        self.token.cancel();
    }

    pub fn is_aborted(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// One logical HTTP exchange against a fixed target address.
///
/// The adapter owns its request body and its cancellation signal. It is not
/// reusable: once [`send`](Self::send) has run, the body is released and a
/// second send fails.
pub struct RequestAdapter<T = HyperTransport> {
    target: Uri,
    method: Method,
    accept: Option<String>,
    content_type: Option<Mime>,
    user_agent: Option<String>,
    headers: HeaderMap,
    config: HandlerConfig,
    body: BodySink,
    cancel: CancellationToken,
    scope: Option<CancellationToken>,
    transport: T,
}

impl RequestAdapter<HyperTransport> {
    /// Create an adapter over a freshly built [`HyperTransport`].
    ///
    /// Each call builds its own connection pool. Callers issuing many
    /// exchanges should build one transport and hand each adapter a clone of
    /// an `Arc<HyperTransport>` through [`RequestAdapter::new`].
    pub fn with_default_transport(target: Uri) -> Result<Self, TransportError> {
        Ok(Self::new(target, HyperTransport::new()?))
    }
}

impl<T> RequestAdapter<T> {
    /// Create an adapter for `target` that delegates to `transport`.
    pub fn new(target: Uri, transport: T) -> Self {
        Self {
            target,
            method: Method::GET,
            accept: None,
            content_type: None,
            user_agent: None,
            headers: HeaderMap::new(),
            config: HandlerConfig::default(),
            body: BodySink::new(),
            cancel: CancellationToken::new(),
            scope: None,
            transport,
        }
    }

    /// Tie the exchange to an outer cancellation scope.
    ///
    /// Cancelling `parent` aborts this adapter; aborting the adapter does not
    /// cancel `parent`. An earlier [`abort`](Self::abort) and handles from
    /// [`abort_handle`](Self::abort_handle) keep working.
    pub fn with_parent_cancellation(mut self, parent: &CancellationToken) -> Self {
        self.scope = Some(parent.clone());
        self
    }

    /// The remote endpoint. Fixed at construction.
    pub fn target_address(&self) -> &Uri {
        &self.target
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    // ========================================================================
    // Request line and headers
    // ========================================================================

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn set_method(&mut self, method: Method) {
        self.method = method;
    }

    /// Value sent as `Accept`, replacing any `Accept` in the header set.
    pub fn accept_header_value(&self) -> Option<&str> {
        self.accept.as_deref()
    }

    pub fn set_accept_header_value(&mut self, value: Option<String>) {
        self.accept = value;
    }

    /// Media type of the payload, sent as `Content-Type`.
    pub fn content_type(&self) -> Option<&Mime> {
        self.content_type.as_ref()
    }

    pub fn set_content_type(&mut self, value: Option<Mime>) {
        self.content_type = value;
    }

    /// Value sent as `User-Agent`, replacing any `User-Agent` in the header set.
    pub fn user_agent(&self) -> Option<&str> {
        self.user_agent.as_deref()
    }

    pub fn set_user_agent(&mut self, value: Option<String>) {
        self.user_agent = value;
    }

    /// The additional request headers. A name may carry several values.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    // ========================================================================
    // Transport handler settings
    // ========================================================================

    /// The settings handed to the transport when the exchange starts.
    pub fn handler_config(&self) -> &HandlerConfig {
        &self.config
    }

    /// Wall-clock bound on the whole exchange. Default: 100 seconds.
    pub fn timeout(&self) -> Duration {
        self.config.timeout
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.config.timeout = timeout;
    }

    pub fn set_timeout_ms(&mut self, millis: u64) {
        self.set_timeout(Duration::from_millis(millis));
    }

    pub fn keep_alive(&self) -> bool {
        self.config.keep_alive
    }

    pub fn set_keep_alive(&mut self, keep_alive: bool) {
        self.config.keep_alive = keep_alive;
    }

    pub fn connection_group_name(&self) -> Option<&str> {
        self.config.connection_group_name.as_deref()
    }

    pub fn set_connection_group_name(&mut self, name: Option<String>) {
        self.config.connection_group_name = name;
    }

    pub fn allow_auto_redirect(&self) -> bool {
        self.config.allow_auto_redirect
    }

    pub fn set_allow_auto_redirect(&mut self, allow: bool) {
        self.config.allow_auto_redirect = allow;
    }

    pub fn pre_authenticate(&self) -> bool {
        self.config.pre_authenticate
    }

    pub fn set_pre_authenticate(&mut self, pre_authenticate: bool) {
        self.config.pre_authenticate = pre_authenticate;
    }

    pub fn use_default_credentials(&self) -> bool {
        self.config.use_default_credentials
    }

    pub fn set_use_default_credentials(&mut self, use_default: bool) {
        self.config.use_default_credentials = use_default;
    }

    pub fn credentials(&self) -> Option<&Credentials> {
        self.config.credentials.as_ref()
    }

    pub fn set_credentials(&mut self, credentials: Option<Credentials>) {
        self.config.credentials = credentials;
    }

    pub fn proxy(&self) -> Option<&Proxy> {
        self.config.proxy.as_ref()
    }

    pub fn set_proxy(&mut self, proxy: Option<Proxy>) {
        self.config.proxy = proxy;
    }

    pub fn cookie_container(&self) -> Option<&CookieJar> {
        self.config.cookie_container.as_ref()
    }

    pub fn set_cookie_container(&mut self, jar: Option<CookieJar>) {
        self.config.cookie_container = jar;
    }

    pub fn client_certificates(&self) -> Option<&ClientCertificates> {
        self.config.client_certificates.as_ref()
    }

    pub fn set_client_certificates(&mut self, certificates: Option<ClientCertificates>) {
        self.config.client_certificates = certificates;
    }

    pub fn certificate_validation(&self) -> Option<&CertificateValidation> {
        self.config.certificate_validation.as_ref()
    }

    pub fn set_certificate_validation(&mut self, validation: Option<CertificateValidation>) {
        self.config.certificate_validation = validation;
    }

    // ========================================================================
    // Body and cancellation
    // ========================================================================

    /// Open the request body for writing.
    ///
    /// Every call during the writable phase appends to the same payload.
    /// Once the exchange has started this fails with a [`PhaseError`].
    pub fn writable_body(&mut self) -> Result<BodyWriter<'_>, PhaseError> {
        self.body.writer()
    }

    pub fn body_phase(&self) -> SinkPhase {
        self.body.phase()
    }

    /// Cancel the exchange.
    ///
    /// Before [`send`](Self::send) this makes the send fail immediately as
    /// `RequestCanceled` without any network I/O; during a send the in-flight
    /// exchange unwinds. Idempotent.
    pub fn abort(&self) {
        self.cancel.cancel();
    }

    /// Whether the adapter or its outer scope has been aborted.
    pub fn is_aborted(&self) -> bool {
        is_aborted(&self.cancel, self.scope.as_ref())
    }

    /// A handle that aborts this adapter from another task.
    pub fn abort_handle(&self) -> AbortHandle {
        AbortHandle {
            token: self.cancel.clone(),
        }
    }
}

impl<T: Transport> RequestAdapter<T> {
    /// Perform the exchange.
    ///
    /// Freezes the body, issues the request bounded by the timeout and the
    /// cancellation signal, and classifies the outcome:
    ///
    /// - cancellation: `RequestCanceled`
    /// - a non-2xx response: `ProtocolError` carrying the response
    /// - any other transport fault: `UnknownError` carrying the fault as cause
    ///
    /// The body is released exactly once on every path, including when this
    /// future is dropped mid-flight.
    pub async fn send(&mut self) -> Result<ResponseWrapper, ErrorEnvelope> {
        #[cfg(feature = "tracing")]
        let span = info_span!(
            "soap.exchange",
            http.method = %self.method,
            url.full = %self.target,
            otel.kind = "client",
        );

        let exchange = self.exchange();

        #[cfg(feature = "tracing")]
        let exchange = exchange.instrument(span);

        exchange.await
    }

    async fn exchange(&mut self) -> Result<ResponseWrapper, ErrorEnvelope> {
        let RequestAdapter {
            target,
            method,
            accept,
            content_type,
            user_agent,
            headers,
            config,
            body,
            cancel,
            scope,
            transport,
        } = self;

        let payload = body.freeze().map_err(|err| {
            ErrorEnvelope::with_cause(
                "the request has already been sent",
                ExchangeStatus::UnknownError,
                err,
            )
        })?;
        let _release = ReleaseOnDrop(body);

        if is_aborted(cancel, scope.as_ref()) {
            #[cfg(feature = "tracing")]
            tracing::debug!("exchange aborted before sending");
            return Err(TransportError::Canceled.into_envelope());
        }

        let request = build_request(
            method,
            target,
            headers,
            accept.as_deref(),
            user_agent.as_deref(),
            content_type.as_ref(),
            payload,
        )?;

        let timeout = config.timeout;
        let exchange = Exchange::new(request, config.clone(), cancel.child_token());

        let result = tokio::select! {
            biased;
            _ = aborted(cancel, scope.as_ref()) => Err(TransportError::Canceled),
            result = tokio::time::timeout(timeout, transport.execute(exchange)) => {
                result.unwrap_or(Err(TransportError::TimedOut(timeout)))
            }
        };

        classify(result)
    }
}

fn is_aborted(own: &CancellationToken, scope: Option<&CancellationToken>) -> bool {
    own.is_cancelled() || scope.is_some_and(CancellationToken::is_cancelled)
}

/// Resolves once the adapter or its outer scope is cancelled.
async fn aborted(own: &CancellationToken, scope: Option<&CancellationToken>) {
    match scope {
        Some(scope) => {
            tokio::select! {
                _ = own.cancelled() => {}
                _ = scope.cancelled() => {}
            }
        }
        None => own.cancelled().await,
    }
}

/// Turn a transport result into the adapter's outcome.
fn classify(
    result: Result<http::Response<Bytes>, TransportError>,
) -> Result<ResponseWrapper, ErrorEnvelope> {
    let response = match result {
        Ok(response) => ResponseWrapper::from(response),
        Err(fault) => {
            #[cfg(feature = "tracing")]
            if fault.is_canceled() {
                tracing::debug!("exchange aborted");
            } else {
                tracing::warn!(error = %fault, "exchange failed");
            }
            return Err(fault.into_envelope());
        }
    };

    if !response.is_success() {
        #[cfg(feature = "tracing")]
        tracing::debug!(http.status_code = response.status().as_u16(), "exchange returned failure status");
        return Err(ErrorEnvelope::protocol(response));
    }

    #[cfg(feature = "tracing")]
    tracing::debug!(
        http.status_code = response.status().as_u16(),
        body.len = response.body().len(),
        "exchange completed"
    );
    Ok(response)
}

/// Assemble the outbound message.
fn build_request(
    method: &Method,
    target: &Uri,
    headers: &HeaderMap,
    accept: Option<&str>,
    user_agent: Option<&str>,
    content_type: Option<&Mime>,
    payload: Bytes,
) -> Result<http::Request<Bytes>, TransportError> {
    let mut outbound = headers.clone();
    if let Some(accept) = accept {
        outbound.insert(ACCEPT, HeaderValue::from_str(accept)?);
    }
    if let Some(user_agent) = user_agent {
        outbound.insert(USER_AGENT, HeaderValue::from_str(user_agent)?);
    }
    if let Some(content_type) = content_type {
        outbound.insert(CONTENT_TYPE, HeaderValue::from_str(content_type.as_ref())?);
    }

    let mut request = http::Request::new(payload);
    *request.method_mut() = method.clone();
    *request.uri_mut() = target.clone();
    *request.headers_mut() = outbound;
    Ok(request)
}

/// Releases the frozen body when the exchange ends, however it ends.
struct ReleaseOnDrop<'a>(&'a mut BodySink);

impl Drop for ReleaseOnDrop<'_> {
    fn drop(&mut self) {
        if let Err(_err) = self.0.release() {
            #[cfg(feature = "tracing")]
            tracing::error!(error = %_err, "failed to release request body");
        }
    }
}

impl<T> fmt::Debug for RequestAdapter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestAdapter")
            .field("target", &self.target)
            .field("method", &self.method)
            .field("accept", &self.accept)
            .field("content_type", &self.content_type)
            .field("user_agent", &self.user_agent)
            .field("headers", &self.headers)
            .field("config", &self.config)
            .field("body", &self.body)
            .field("aborted", &self.is_aborted())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::StatusCode;
    use std::future::Future;
    use std::io::Write;
    use std::sync::{Arc, Mutex};

    #[derive(Clone)]
    enum Reply {
        Status(StatusCode, &'static str),
        Fault(&'static str),
    }

    struct Recorded {
        method: Method,
        uri: Uri,
        headers: HeaderMap,
        body: Bytes,
        config: HandlerConfig,
    }

    #[derive(Clone)]
    struct MockTransport {
        reply: Reply,
        delay: Option<Duration>,
        calls: Arc<Mutex<Vec<Recorded>>>,
    }

    impl MockTransport {
        fn replying(reply: Reply) -> Self {
            Self {
                reply,
                delay: None,
                calls: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn delayed(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }

        fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    impl Transport for MockTransport {
        fn execute(
            &self,
            exchange: Exchange,
        ) -> impl Future<Output = Result<http::Response<Bytes>, TransportError>> + Send {
            let calls = Arc::clone(&self.calls);
            let reply = self.reply.clone();
            let delay = self.delay;
            async move {
                let (parts, body) = exchange.request.into_parts();
                calls.lock().unwrap().push(Recorded {
                    method: parts.method,
                    uri: parts.uri,
                    headers: parts.headers,
                    body,
                    config: exchange.config,
                });

                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }

                match reply {
                    Reply::Status(status, body) => Ok(http::Response::builder()
                        .status(status)
                        .header(CONTENT_TYPE, "text/xml")
                        .body(Bytes::from_static(body.as_bytes()))
                        .unwrap()),
                    Reply::Fault(message) => Err(TransportError::other(message)),
                }
            }
        }
    }

    fn ews_adapter(transport: MockTransport) -> RequestAdapter<MockTransport> {
        let mut adapter = RequestAdapter::new("https://host/ews".parse().unwrap(), transport);
        adapter.set_method(Method::POST);
        adapter.writable_body().unwrap().write_all(b"<req/>").unwrap();
        adapter
    }

    #[test]
    fn test_defaults() {
        let adapter = RequestAdapter::new(
            "https://host/ews".parse().unwrap(),
            MockTransport::replying(Reply::Status(StatusCode::OK, "")),
        );
        assert_eq!(adapter.method(), Method::GET);
        assert_eq!(adapter.timeout(), Duration::from_secs(100));
        assert!(adapter.allow_auto_redirect());
        assert!(!adapter.pre_authenticate());
        assert!(!adapter.use_default_credentials());
        assert!(adapter.keep_alive());
        assert!(adapter.accept_header_value().is_none());
        assert!(adapter.headers().is_empty());
        assert_eq!(adapter.body_phase(), SinkPhase::Writable);
        assert_eq!(adapter.target_address(), "https://host/ews");
    }

    #[test]
    fn test_setters() {
        let mut adapter = RequestAdapter::new(
            "https://host/ews".parse().unwrap(),
            MockTransport::replying(Reply::Status(StatusCode::OK, "")),
        );
        adapter.set_timeout_ms(2_500);
        adapter.set_keep_alive(false);
        adapter.set_connection_group_name(Some("mailbox-a".into()));
        adapter.set_credentials(Some(Credentials::basic("user", "pass")));
        adapter.set_cookie_container(Some(CookieJar::new()));

        assert_eq!(adapter.timeout(), Duration::from_millis(2_500));
        assert!(!adapter.keep_alive());
        assert_eq!(adapter.connection_group_name(), Some("mailbox-a"));
        assert_eq!(adapter.credentials(), Some(&Credentials::basic("user", "pass")));
        assert!(adapter.cookie_container().is_some());
        assert!(adapter.proxy().is_none());
    }

    #[tokio::test]
    async fn test_send_success() {
        let transport = MockTransport::replying(Reply::Status(StatusCode::OK, "<resp/>"));
        let mut adapter = ews_adapter(transport.clone());

        let response = adapter.send().await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.body(), &Bytes::from("<resp/>"));
        assert_eq!(adapter.body_phase(), SinkPhase::Released);
        assert_eq!(adapter.body.releases(), 1);

        let calls = transport.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].method, Method::POST);
        assert_eq!(calls[0].uri, "https://host/ews");
        assert_eq!(calls[0].body, Bytes::from("<req/>"));
    }

    #[tokio::test]
    async fn test_send_protocol_error() {
        let transport =
            MockTransport::replying(Reply::Status(StatusCode::INTERNAL_SERVER_ERROR, "<fault/>"));
        let mut adapter = ews_adapter(transport);

        let err = adapter.send().await.unwrap_err();

        assert_eq!(err.status(), ExchangeStatus::ProtocolError);
        let response = err.response().unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response.header("content-type"), Some("text/xml"));
        assert_eq!(response.body(), &Bytes::from("<fault/>"));
        assert_eq!(adapter.body.releases(), 1);
    }

    #[tokio::test]
    async fn test_send_transport_fault() {
        let mut adapter = ews_adapter(MockTransport::replying(Reply::Fault(
            "connection reset by peer",
        )));

        let err = adapter.send().await.unwrap_err();

        assert!(err.is_unknown());
        assert!(err.response().is_none());
        assert_eq!(err.message(), Some("connection reset by peer"));
        assert!(matches!(
            err.downcast_cause::<TransportError>(),
            Some(TransportError::Other(_))
        ));
        assert_eq!(adapter.body.releases(), 1);
    }

    #[tokio::test]
    async fn test_abort_before_send_skips_io() {
        let transport = MockTransport::replying(Reply::Status(StatusCode::OK, "<resp/>"));
        let mut adapter = RequestAdapter::new("https://host/ews".parse().unwrap(), transport.clone());
        adapter.set_timeout(Duration::MAX);
        adapter.abort();
        adapter.abort();

        let err = adapter.send().await.unwrap_err();

        assert!(err.is_canceled());
        assert_eq!(transport.call_count(), 0);
        assert_eq!(adapter.body.releases(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abort_during_send() {
        let transport = MockTransport::replying(Reply::Status(StatusCode::OK, "<resp/>"))
            .delayed(Duration::from_secs(30));
        let mut adapter = ews_adapter(transport.clone());
        let handle = adapter.abort_handle();

        let abort = async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            handle.abort();
        };
        let (result, ()) = tokio::join!(adapter.send(), abort);

        let err = result.unwrap_err();
        assert_eq!(err.status(), ExchangeStatus::RequestCanceled);
        assert!(handle.is_aborted());
        assert_eq!(transport.call_count(), 1);
        assert_eq!(adapter.body.releases(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_unknown_error() {
        let transport = MockTransport::replying(Reply::Status(StatusCode::OK, "<resp/>"))
            .delayed(Duration::from_secs(30));
        let mut adapter = ews_adapter(transport);
        adapter.set_timeout(Duration::from_secs(1));

        let err = adapter.send().await.unwrap_err();

        assert!(err.is_unknown());
        assert!(matches!(
            err.downcast_cause::<TransportError>(),
            Some(TransportError::TimedOut(d)) if *d == Duration::from_secs(1)
        ));
        assert_eq!(adapter.body.releases(), 1);
    }

    #[tokio::test]
    async fn test_headers_sent_exactly() {
        let transport = MockTransport::replying(Reply::Status(StatusCode::OK, ""));
        let mut adapter = ews_adapter(transport.clone());
        adapter
            .headers_mut()
            .append("x-anchor-mailbox", HeaderValue::from_static("a@host"));
        adapter
            .headers_mut()
            .append("x-trace", HeaderValue::from_static("one"));
        adapter
            .headers_mut()
            .append("x-trace", HeaderValue::from_static("two"));
        adapter
            .headers_mut()
            .insert(ACCEPT, HeaderValue::from_static("*/*"));
        adapter.set_accept_header_value(Some("text/xml".into()));
        adapter.set_user_agent(Some("soapwire-test".into()));
        adapter.set_content_type(Some("text/xml; charset=utf-8".parse().unwrap()));

        adapter.send().await.unwrap();

        let calls = transport.calls.lock().unwrap();
        let headers = &calls[0].headers;
        assert_eq!(headers.len(), 6);
        assert_eq!(headers["x-anchor-mailbox"], "a@host");
        let traces: Vec<_> = headers.get_all("x-trace").iter().collect();
        assert_eq!(traces, ["one", "two"]);
        assert_eq!(headers.get_all(ACCEPT).iter().count(), 1);
        assert_eq!(headers[ACCEPT], "text/xml");
        assert_eq!(headers[USER_AGENT], "soapwire-test");
        assert_eq!(headers[CONTENT_TYPE], "text/xml; charset=utf-8");
    }

    #[tokio::test]
    async fn test_payload_written_in_sessions() {
        let transport = MockTransport::replying(Reply::Status(StatusCode::OK, ""));
        let mut adapter = RequestAdapter::new("https://host/ews".parse().unwrap(), transport.clone());

        adapter.writable_body().unwrap().write_all(b"<soap:Envelope>").unwrap();
        adapter.writable_body().unwrap().write_all(b"</soap:Envelope>").unwrap();
        adapter.send().await.unwrap();

        let calls = transport.calls.lock().unwrap();
        assert_eq!(calls[0].body, Bytes::from("<soap:Envelope></soap:Envelope>"));
    }

    #[tokio::test]
    async fn test_second_send_fails() {
        let transport = MockTransport::replying(Reply::Status(StatusCode::OK, "<resp/>"));
        let mut adapter = ews_adapter(transport.clone());
        adapter.send().await.unwrap();

        let err = adapter.send().await.unwrap_err();

        assert!(err.is_unknown());
        assert_eq!(
            err.downcast_cause::<PhaseError>(),
            Some(&PhaseError {
                expected: SinkPhase::Writable,
                actual: SinkPhase::Released,
            })
        );
        assert_eq!(transport.call_count(), 1);
        assert_eq!(adapter.body.releases(), 1);
    }

    #[tokio::test]
    async fn test_writable_body_after_send_fails() {
        let mut adapter = ews_adapter(MockTransport::replying(Reply::Status(StatusCode::OK, "")));
        adapter.send().await.unwrap();

        let err = adapter.writable_body().unwrap_err();
        assert_eq!(err.actual, SinkPhase::Released);
    }

    #[tokio::test]
    async fn test_config_snapshot_reaches_transport() {
        let transport = MockTransport::replying(Reply::Status(StatusCode::OK, ""));
        let mut adapter = ews_adapter(transport.clone());
        adapter.set_timeout(Duration::from_secs(5));
        adapter.set_allow_auto_redirect(false);
        adapter.set_pre_authenticate(true);
        adapter.set_credentials(Some(Credentials::bearer("token")));

        adapter.send().await.unwrap();
        adapter.set_timeout(Duration::from_secs(60));

        let calls = transport.calls.lock().unwrap();
        let config = &calls[0].config;
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert!(!config.allow_auto_redirect);
        assert!(config.pre_authenticate);
        assert_eq!(config.credentials, Some(Credentials::bearer("token")));
    }

    #[tokio::test]
    async fn test_dropped_send_releases_body() {
        let transport = MockTransport::replying(Reply::Status(StatusCode::OK, ""))
            .delayed(Duration::from_secs(30));
        let mut adapter = ews_adapter(transport);

        {
            let send = adapter.send();
            tokio::pin!(send);
            let polled = poll_once(send.as_mut()).await;
            assert!(polled.is_none());
        }

        assert_eq!(adapter.body_phase(), SinkPhase::Released);
        assert_eq!(adapter.body.releases(), 1);
    }

    #[tokio::test]
    async fn test_parent_cancellation() {
        let parent = CancellationToken::new();
        let transport = MockTransport::replying(Reply::Status(StatusCode::OK, ""));
        let mut adapter = ews_adapter(transport.clone()).with_parent_cancellation(&parent);

        parent.cancel();
        let err = adapter.send().await.unwrap_err();

        assert!(err.is_canceled());
        assert_eq!(transport.call_count(), 0);
    }

    #[tokio::test]
    async fn test_abort_survives_parent_scope() {
        let parent = CancellationToken::new();
        let transport = MockTransport::replying(Reply::Status(StatusCode::OK, ""));
        let adapter = ews_adapter(transport.clone());
        adapter.abort();

        let mut adapter = adapter.with_parent_cancellation(&parent);
        assert!(adapter.is_aborted());
        let err = adapter.send().await.unwrap_err();

        assert!(err.is_canceled());
        assert!(!parent.is_cancelled());
        assert_eq!(transport.call_count(), 0);
    }

    #[tokio::test]
    async fn test_handle_taken_before_parent_scope() {
        let parent = CancellationToken::new();
        let transport = MockTransport::replying(Reply::Status(StatusCode::OK, ""));
        let adapter = ews_adapter(transport.clone());
        let handle = adapter.abort_handle();

        let mut adapter = adapter.with_parent_cancellation(&parent);
        handle.abort();
        let err = adapter.send().await.unwrap_err();

        assert!(err.is_canceled());
        assert_eq!(transport.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_parent_cancelled_during_send() {
        let parent = CancellationToken::new();
        let transport = MockTransport::replying(Reply::Status(StatusCode::OK, ""))
            .delayed(Duration::from_secs(30));
        let mut adapter = ews_adapter(transport.clone()).with_parent_cancellation(&parent);

        let cancel = async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            parent.cancel();
        };
        let (result, ()) = tokio::join!(adapter.send(), cancel);

        assert!(result.unwrap_err().is_canceled());
        assert_eq!(transport.call_count(), 1);
        assert_eq!(adapter.body.releases(), 1);
    }

    #[tokio::test]
    async fn test_adapters_share_one_transport() {
        let shared = Arc::new(MockTransport::replying(Reply::Status(StatusCode::OK, "<resp/>")));

        for _ in 0..3 {
            let mut adapter =
                RequestAdapter::new("https://host/ews".parse().unwrap(), Arc::clone(&shared));
            adapter.send().await.unwrap();
        }

        assert_eq!(shared.call_count(), 3);
    }

    /// Poll a future once, returning its output if it completed.
    async fn poll_once<F: Future + Unpin>(mut fut: F) -> Option<F::Output> {
        std::future::poll_fn(|cx| {
            std::task::Poll::Ready(match std::pin::Pin::new(&mut fut).poll(cx) {
                std::task::Poll::Ready(output) => Some(output),
                std::task::Poll::Pending => None,
            })
        })
        .await
    }
}
