//! A scripted HTTP service standing in for registries and chart repositories.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use http::header::{HeaderMap, HeaderValue, AUTHORIZATION, WWW_AUTHENTICATE};
use http::StatusCode;
use hyperdriver::service::SharedService;
use parking_lot::Mutex;

use crate::client::HttpClient;

/// A canned response.
#[derive(Debug, Clone)]
pub struct MockResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

impl MockResponse {
    /// Create a response.
    pub fn new(status: StatusCode, headers: HeaderMap, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers,
            body: body.into(),
        }
    }
}

#[derive(Debug, Clone)]
struct Route {
    response: MockResponse,
    guard: Option<(String, String)>,
}

/// A request received by the mock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    /// The full request URI.
    pub uri: String,

    /// The `Authorization` header, if one was sent.
    pub authorization: Option<String>,
}

#[derive(Debug, Default)]
struct State {
    routes: HashMap<String, Route>,
    requests: Vec<RecordedRequest>,
}

/// Answers requests by full URI. Unknown URIs get `404 Not Found`.
///
/// Clones share routes and the request log.
#[derive(Debug, Clone, Default)]
pub struct MockRegistry {
    state: Arc<Mutex<State>>,
}

impl MockRegistry {
    /// An empty mock.
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `uri` with `status` and `body`.
    pub fn add(&self, uri: &str, status: StatusCode, body: impl Into<Bytes>) {
        self.add_response(uri, MockResponse::new(status, HeaderMap::new(), body));
    }

    /// Answer `uri` with a complete response.
    pub fn add_response(&self, uri: &str, response: MockResponse) {
        self.state.lock().routes.insert(
            uri.to_owned(),
            Route {
                response,
                guard: None,
            },
        );
    }

    /// Require `authorization` for `uri`, answering other requests with
    /// `401` and the `challenge` as `WWW-Authenticate`.
    ///
    /// The route must already exist.
    pub fn require_authorization(&self, uri: &str, authorization: &str, challenge: &str) {
        if let Some(route) = self.state.lock().routes.get_mut(uri) {
            route.guard = Some((authorization.to_owned(), challenge.to_owned()));
        }
    }

    /// Every request received so far, in order.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.lock().requests.clone()
    }

    fn respond(&self, request: &http::Request<hyperdriver::Body>) -> MockResponse {
        let uri = request.uri().to_string();
        let authorization = request
            .headers()
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);

        let mut state = self.state.lock();
        state.requests.push(RecordedRequest {
            uri: uri.clone(),
            authorization: authorization.clone(),
        });

        let Some(route) = state.routes.get(&uri) else {
            return MockResponse::new(StatusCode::NOT_FOUND, HeaderMap::new(), "not found");
        };

        match &route.guard {
            Some((expected, challenge)) if authorization.as_deref() != Some(expected.as_str()) => {
                let mut headers = HeaderMap::new();
                if let Ok(value) = HeaderValue::from_str(challenge) {
                    headers.insert(WWW_AUTHENTICATE, value);
                }
                MockResponse::new(StatusCode::UNAUTHORIZED, headers, "unauthorized")
            }
            _ => route.response.clone(),
        }
    }
}

impl tower::Service<http::Request<hyperdriver::Body>> for MockRegistry {
    type Response = http::Response<hyperdriver::Body>;
    type Error = hyperdriver::client::Error;
    type Future = std::future::Ready<Result<Self::Response, Self::Error>>;

    fn poll_ready(
        &mut self,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: http::Request<hyperdriver::Body>) -> Self::Future {
        let canned = self.respond(&req);

        let mut response = http::Response::new(hyperdriver::Body::from(canned.body));
        *response.status_mut() = canned.status;
        *response.version_mut() = http::Version::HTTP_11;
        response.headers_mut().extend(canned.headers);

        std::future::ready(Ok(response))
    }
}

/// Wrap a mock into the client type the getters use.
pub fn client(mock: MockRegistry) -> HttpClient {
    SharedService::new(mock)
}

#[cfg(test)]
mod tests {
    use tower::ServiceExt as _;

    use super::*;

    #[tokio::test]
    async fn guarded_route() {
        let mock = MockRegistry::new();
        mock.add("https://r.example.com/v2/", StatusCode::OK, "{}");
        mock.require_authorization("https://r.example.com/v2/", "Bearer t", "Bearer realm=\"x\"");

        let request = http::Request::get("https://r.example.com/v2/")
            .body(hyperdriver::Body::empty())
            .unwrap();
        let response = mock.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(response.headers().contains_key(WWW_AUTHENTICATE));

        let request = http::Request::get("https://r.example.com/v2/")
            .header(AUTHORIZATION, "Bearer t")
            .body(hyperdriver::Body::empty())
            .unwrap();
        let response = mock.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(mock.requests().len(), 2);
    }
}
