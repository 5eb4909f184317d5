//! Redirect handling for the hyper transport.

use bytes::Bytes;
use http::header::{AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE, COOKIE, LOCATION};
use http::{HeaderMap, Method, StatusCode, Uri};

/// The request issued for one hop of an exchange.
#[derive(Debug, Clone)]
pub(crate) struct Hop {
    pub(crate) method: Method,
    pub(crate) uri: Uri,
    pub(crate) headers: HeaderMap,
    pub(crate) body: Bytes,
}

impl Hop {
    pub(crate) fn from_request(request: http::Request<Bytes>) -> Self {
        let (parts, body) = request.into_parts();
        Self {
            method: parts.method,
            uri: parts.uri,
            headers: parts.headers,
            body,
        }
    }
}

/// Whether two URIs share scheme, host and port.
pub(crate) fn same_origin(a: &Uri, b: &Uri) -> bool {
    a.scheme() == b.scheme() && a.authority() == b.authority()
}

/// Resolve the redirect target of a response, relative to the hop's URI.
fn resolve_location(current: &Uri, headers: &HeaderMap) -> Option<Uri> {
    let location = headers.get(LOCATION)?.to_str().ok()?;
    let base = url::Url::parse(&current.to_string()).ok()?;
    let target = base.join(location).ok()?;
    target.as_str().parse().ok()
}

/// Compute the next hop for a redirect response.
///
/// Returns `None` when the response should be handed back as-is: the status
/// is not a followable redirect, the `Location` is missing or malformed, or
/// the redirect would downgrade from https to http.
pub(crate) fn next_hop(current: &Hop, status: StatusCode, headers: &HeaderMap) -> Option<Hop> {
    let keeps_method = match status {
        StatusCode::MOVED_PERMANENTLY | StatusCode::FOUND => current.method != Method::POST,
        StatusCode::SEE_OTHER => current.method == Method::HEAD,
        StatusCode::TEMPORARY_REDIRECT | StatusCode::PERMANENT_REDIRECT => true,
        _ => return None,
    };

    let uri = resolve_location(&current.uri, headers)?;
    if current.uri.scheme_str() == Some("https") && uri.scheme_str() != Some("https") {
        return None;
    }

    let mut next = Hop {
        method: current.method.clone(),
        uri,
        headers: current.headers.clone(),
        body: current.body.clone(),
    };

    if !keeps_method {
        next.method = Method::GET;
        next.body = Bytes::new();
        next.headers.remove(CONTENT_TYPE);
        next.headers.remove(CONTENT_LENGTH);
    }

    if !same_origin(&current.uri, &next.uri) {
        next.headers.remove(AUTHORIZATION);
        next.headers.remove(COOKIE);
    }

    Some(next)
}
