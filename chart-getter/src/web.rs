use std::sync::Arc;

use bytes::Bytes;
use http::header::{HeaderMap, AUTHORIZATION};

use crate::client::{self, HttpClient};
use crate::credentials::Credentials;
use crate::error::GetterError;
use crate::getter::Getter;

const NAME: &str = "http";

/// Fetches files from chart repositories over HTTP(S).
#[derive(Debug, Clone)]
pub struct HttpGetter {
    client: HttpClient,
    credentials: Arc<Credentials>,
}

impl HttpGetter {
    /// A getter using a specific HTTP client.
    pub fn with_client(client: HttpClient, credentials: Arc<Credentials>) -> Self {
        Self {
            client,
            credentials,
        }
    }
}

#[async_trait::async_trait]
impl Getter for HttpGetter {
    fn name(&self) -> &'static str {
        NAME
    }

    fn schemes(&self) -> &[&'static str] {
        &["http", "https"]
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn get(&self, uri: &str) -> Result<Bytes, GetterError> {
        let url = client::parse_url(NAME, uri)?;

        let mut headers = HeaderMap::new();
        let host = match (url.host_str(), url.port()) {
            (Some(host), Some(port)) => Some(format!("{host}:{port}")),
            (Some(host), None) => Some(host.to_owned()),
            (None, _) => None,
        };
        let credentials = host
            .as_deref()
            .and_then(|host| self.credentials.for_host(host));
        if let Some(credentials) = credentials {
            headers.insert(
                AUTHORIZATION,
                client::basic_auth(&credentials.username, credentials.password.revealed()),
            );
        }

        let body = client::get(&self.client, NAME, url, &headers)
            .await?
            .error_for_status(NAME)?;

        tracing::debug!(bytes = body.len(), "Downloaded");
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use http::StatusCode;

    use super::*;
    use crate::credentials::BasicCredentials;
    use crate::error::GetterErrorKind;
    use crate::mock::{self, MockRegistry};

    #[tokio::test]
    async fn fetch_index() {
        let registry = MockRegistry::new();
        registry.add(
            "https://charts.example.com/index.yaml",
            StatusCode::OK,
            "apiVersion: v1\nentries: {}\n",
        );

        let getter = HttpGetter::with_client(mock::client(registry.clone()), Default::default());
        let body = getter.get("https://charts.example.com/index.yaml").await.unwrap();
        assert_eq!(body, Bytes::from_static(b"apiVersion: v1\nentries: {}\n"));
        assert!(registry.requests()[0].authorization.is_none());
    }

    #[tokio::test]
    async fn sends_basic_credentials() {
        let registry = MockRegistry::new();
        registry.add("https://charts.example.com/index.yaml", StatusCode::OK, "entries: {}");

        let mut credentials = Credentials::new();
        credentials.insert("charts.example.com", BasicCredentials::new("user", "pass"));

        let getter = HttpGetter::with_client(mock::client(registry.clone()), Arc::new(credentials));
        getter.get("https://charts.example.com/index.yaml").await.unwrap();

        assert_eq!(
            registry.requests()[0].authorization.as_deref(),
            Some("Basic dXNlcjpwYXNz")
        );
    }

    #[tokio::test]
    async fn missing_file_is_not_found() {
        let registry = MockRegistry::new();
        let getter = HttpGetter::with_client(mock::client(registry), Default::default());

        let err = getter.get("https://charts.example.com/missing.tgz").await.unwrap_err();
        assert_eq!(err.kind(), GetterErrorKind::NotFound);
        assert_eq!(err.uri(), Some("https://charts.example.com/missing.tgz"));
    }
}
