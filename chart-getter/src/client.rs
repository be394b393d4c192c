//! HTTP plumbing shared by the registry and repository getters.

use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use http::header::{HeaderMap, HeaderValue, AUTHORIZATION, LOCATION};
use http::StatusCode;
use http_body_util::BodyExt as _;
use hyperdriver::Body;
use tower::ServiceExt as _;

use crate::error::{GetterError, GetterErrorKind};

/// The HTTP client service used by the getters.
pub type HttpClient = hyperdriver::client::SharedClientService<Body, Body>;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
const MAX_REDIRECTS: usize = 10;

/// Longest response body quoted in an error message.
const MAX_ERROR_BODY: usize = 256;

/// Build the default TLS-capable client.
pub fn default_client() -> HttpClient {
    hyperdriver::Client::build_tcp_http()
        .with_default_tls()
        .with_timeout(DEFAULT_TIMEOUT)
        .build_service()
}

/// A fully collected HTTP response.
#[derive(Debug)]
pub(crate) struct Fetched {
    /// The URL which produced this response, after redirects.
    pub url: url::Url,
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Fetched {
    /// Return the body for a success status, or map the status onto an error.
    pub fn error_for_status(self, getter: &'static str) -> Result<Bytes, GetterError> {
        if self.status.is_success() {
            return Ok(self.body);
        }

        let kind = match self.status {
            StatusCode::NOT_FOUND => GetterErrorKind::NotFound,
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => GetterErrorKind::PermissionDenied,
            StatusCode::TOO_MANY_REQUESTS => GetterErrorKind::ServiceUnavailable,
            status if status.is_server_error() => GetterErrorKind::ServiceUnavailable,
            _ => GetterErrorKind::Other,
        };

        let uri = self.url.to_string();
        Err(GetterError::builder(getter, kind, HttpStatusError::new(self.status, &self.body))
            .uri(uri)
            .build())
    }
}

/// A server answered with a non-success status.
#[derive(Debug, Clone)]
pub struct HttpStatusError {
    /// The response status.
    pub status: StatusCode,

    /// The start of the response body.
    pub message: String,
}

impl HttpStatusError {
    fn new(status: StatusCode, body: &[u8]) -> Self {
        let text = String::from_utf8_lossy(body);
        let message = text.trim().chars().take(MAX_ERROR_BODY).collect();
        Self { status, message }
    }
}

impl fmt::Display for HttpStatusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "HTTP {}", self.status)
        } else {
            write!(f, "HTTP {}: {}", self.status, self.message)
        }
    }
}

impl std::error::Error for HttpStatusError {}

/// Parse a URL, reporting failures as invalid requests.
pub(crate) fn parse_url(getter: &'static str, url: &str) -> Result<url::Url, GetterError> {
    url::Url::parse(url).map_err(|error| {
        GetterError::builder(getter, GetterErrorKind::InvalidRequest, error)
            .uri(url)
            .build()
    })
}

/// Issue a GET request, following redirects.
///
/// The `Authorization` header is only sent to the host of the original
/// request; it is dropped once a redirect leaves that host.
#[tracing::instrument(level = "trace", skip(client, headers), fields(%url))]
pub(crate) async fn get(
    client: &HttpClient,
    getter: &'static str,
    url: url::Url,
    headers: &HeaderMap,
) -> Result<Fetched, GetterError> {
    let origin = url.host_str().map(str::to_owned);
    let mut url = url;

    for _ in 0..=MAX_REDIRECTS {
        let uri: http::Uri = url.as_str().parse().map_err(|error: http::uri::InvalidUri| {
            GetterError::builder(getter, GetterErrorKind::InvalidRequest, error)
                .uri(url.as_str())
                .build()
        })?;

        let mut builder = http::Request::builder()
            .method(http::Method::GET)
            .version(http::Version::HTTP_11)
            .uri(uri);

        let same_origin = url.host_str() == origin.as_deref();
        if let Some(request_headers) = builder.headers_mut() {
            for (name, value) in headers {
                if *name == AUTHORIZATION && !same_origin {
                    continue;
                }
                request_headers.append(name.clone(), value.clone());
            }
        }

        let request = builder.body(Body::empty()).map_err(|error| {
            GetterError::builder(getter, GetterErrorKind::InvalidRequest, error)
                .uri(url.as_str())
                .build()
        })?;

        tracing::trace!("GET {}", url);
        let response = client.clone().oneshot(request).await.map_err(|error| {
            GetterError::builder(getter, GetterErrorKind::Io, error)
                .uri(url.as_str())
                .build()
        })?;

        let (parts, body) = response.into_parts();

        if parts.status.is_redirection() {
            if let Some(location) = parts.headers.get(LOCATION) {
                url = redirect_target(getter, &url, location)?;
                tracing::trace!(target = %url, "Following redirect");
                continue;
            }
        }

        let body = body
            .collect()
            .await
            .map_err(|error| {
                GetterError::builder(getter, GetterErrorKind::Io, error)
                    .uri(url.as_str())
                    .context("reading response body")
                    .build()
            })?
            .to_bytes();

        return Ok(Fetched {
            url,
            status: parts.status,
            headers: parts.headers,
            body,
        });
    }

    Err(GetterError::builder(
        getter,
        GetterErrorKind::Other,
        format!("stopped after {MAX_REDIRECTS} redirects"),
    )
    .uri(url.as_str())
    .build())
}

fn redirect_target(
    getter: &'static str,
    current: &url::Url,
    location: &HeaderValue,
) -> Result<url::Url, GetterError> {
    let invalid = |message: String| {
        GetterError::builder(getter, GetterErrorKind::InvalidRequest, message)
            .uri(current.as_str())
            .build()
    };

    let location = location
        .to_str()
        .map_err(|_| invalid("redirect location is not valid ASCII".into()))?;

    current
        .join(location)
        .map_err(|error| invalid(format!("invalid redirect location {location:?}: {error}")))
}

/// Build a basic authorization header value.
pub(crate) fn basic_auth(username: &str, password: &str) -> HeaderValue {
    use base64::prelude::BASE64_STANDARD;
    use base64::Engine as _;

    let encoded = BASE64_STANDARD.encode(format!("{username}:{password}"));
    let mut header = HeaderValue::try_from(format!("Basic {encoded}"))
        .expect("base64 is always a valid header value");
    header.set_sensitive(true);
    header
}

/// Build a bearer authorization header value.
pub(crate) fn bearer_auth(
    getter: &'static str,
    token: &str,
) -> Result<HeaderValue, GetterError> {
    let mut header = HeaderValue::try_from(format!("Bearer {token}"))
        .map_err(GetterError::with(getter, GetterErrorKind::PermissionDenied))?;
    header.set_sensitive(true);
    Ok(header)
}
