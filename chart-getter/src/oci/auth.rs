//! Registry authentication challenges.
//!
//! Registries answer anonymous requests with `401` and a
//! `WWW-Authenticate` challenge. A `Bearer` challenge names a token service
//! (`realm`) which issues a short-lived token, optionally in exchange for
//! basic credentials. A `Basic` challenge wants the credentials directly.

use std::collections::HashMap;

use http::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde::Deserialize;

use crate::client::{self, HttpClient};
use crate::credentials::BasicCredentials;
use crate::error::{GetterError, GetterErrorKind};

/// A parsed `WWW-Authenticate` challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Challenge {
    pub scheme: String,
    pub params: HashMap<String, String>,
}

impl Challenge {
    /// Parse a challenge like `Bearer realm="...",service="...",scope="..."`.
    pub fn parse(header: &str) -> Option<Self> {
        let header = header.trim();
        let (scheme, rest) = match header.split_once(char::is_whitespace) {
            Some((scheme, rest)) => (scheme, rest),
            None => (header, ""),
        };

        if scheme.is_empty() {
            return None;
        }

        let mut params = HashMap::new();
        let mut chars = rest.chars().peekable();

        loop {
            while matches!(chars.peek(), Some(c) if c.is_whitespace() || *c == ',') {
                chars.next();
            }

            let key: String = chars.by_ref().take_while(|c| *c != '=').collect();
            let key = key.trim().to_ascii_lowercase();
            if key.is_empty() {
                break;
            }

            let mut value = String::new();
            if chars.peek() == Some(&'"') {
                chars.next();
                let mut escaped = false;
                for c in chars.by_ref() {
                    match (escaped, c) {
                        (false, '\\') => escaped = true,
                        (false, '"') => break,
                        (_, c) => {
                            escaped = false;
                            value.push(c);
                        }
                    }
                }
            } else {
                while let Some(c) = chars.peek() {
                    if *c == ',' {
                        break;
                    }
                    value.push(*c);
                    chars.next();
                }
                value = value.trim().to_owned();
            }

            params.insert(key, value);
        }

        Some(Self {
            scheme: scheme.to_owned(),
            params,
        })
    }

    pub fn is_bearer(&self) -> bool {
        self.scheme.eq_ignore_ascii_case("bearer")
    }

    pub fn is_basic(&self) -> bool {
        self.scheme.eq_ignore_ascii_case("basic")
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    access_token: Option<String>,
}

/// Answer a challenge, producing the `Authorization` header for the retry.
#[tracing::instrument(level = "debug", skip(client, credentials))]
pub(crate) async fn authorize(
    client: &HttpClient,
    getter: &'static str,
    challenge: &Challenge,
    repository: &str,
    credentials: Option<&BasicCredentials>,
) -> Result<HeaderValue, GetterError> {
    if challenge.is_basic() {
        let credentials = credentials.ok_or_else(|| {
            GetterError::new(
                getter,
                GetterErrorKind::PermissionDenied,
                "registry requires basic authentication but no credentials are configured",
            )
        })?;
        return Ok(client::basic_auth(
            &credentials.username,
            credentials.password.revealed(),
        ));
    }

    if !challenge.is_bearer() {
        return Err(GetterError::new(
            getter,
            GetterErrorKind::PermissionDenied,
            format!("unsupported authentication scheme {:?}", challenge.scheme),
        ));
    }

    let realm = challenge.params.get("realm").ok_or_else(|| {
        GetterError::new(
            getter,
            GetterErrorKind::PermissionDenied,
            "bearer challenge without a realm",
        )
    })?;

    let default_scope = format!("repository:{repository}:pull");
    let scope = challenge
        .params
        .get("scope")
        .map(String::as_str)
        .unwrap_or(&default_scope);

    let mut query: Vec<(&str, &str)> = vec![("scope", scope)];
    if let Some(service) = challenge.params.get("service") {
        query.push(("service", service));
    }

    let mut url = client::parse_url(getter, realm)?;
    let encoded = serde_urlencoded::to_string(&query)
        .map_err(GetterError::with(getter, GetterErrorKind::InvalidRequest))?;
    url.set_query(Some(&encoded));

    let mut headers = HeaderMap::new();
    if let Some(credentials) = credentials {
        headers.insert(
            AUTHORIZATION,
            client::basic_auth(&credentials.username, credentials.password.revealed()),
        );
    }

    tracing::debug!(%realm, %scope, "Requesting registry token");
    let body = client::get(client, getter, url, &headers)
        .await?
        .error_for_status(getter)
        .map_err(|error| error.set_uri(realm.clone()))?;

    let response: TokenResponse = serde_json::from_slice(&body).map_err(|error| {
        GetterError::builder(getter, GetterErrorKind::PermissionDenied, error)
            .uri(realm.clone())
            .context("decoding token response")
            .build()
    })?;

    let token = response
        .token
        .or(response.access_token)
        .filter(|token| !token.is_empty())
        .ok_or_else(|| {
            GetterError::builder(
                getter,
                GetterErrorKind::PermissionDenied,
                "token response did not contain a token",
            )
            .uri(realm.clone())
            .build()
        })?;

    client::bearer_auth(getter, &token)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_bearer_challenge() {
        let challenge = Challenge::parse(
            r#"Bearer realm="https://auth.example.com/token",service="registry.example.com",scope="repository:charts/foo:pull,push""#,
        )
        .unwrap();

        assert!(challenge.is_bearer());
        assert_eq!(challenge.params["realm"], "https://auth.example.com/token");
        assert_eq!(challenge.params["service"], "registry.example.com");
        assert_eq!(challenge.params["scope"], "repository:charts/foo:pull,push");
    }

    #[test]
    fn parse_basic_challenge() {
        let challenge = Challenge::parse(r#"Basic realm="Registry Realm""#).unwrap();
        assert!(challenge.is_basic());
        assert_eq!(challenge.params["realm"], "Registry Realm");

        let challenge = Challenge::parse("Basic").unwrap();
        assert!(challenge.is_basic());
        assert!(challenge.params.is_empty());
    }

    #[test]
    fn parse_unquoted_params() {
        let challenge =
            Challenge::parse("Bearer realm=https://auth.example.com/token, service=reg").unwrap();
        assert_eq!(challenge.params["realm"], "https://auth.example.com/token");
        assert_eq!(challenge.params["service"], "reg");
    }

    #[test]
    fn reject_empty_challenge() {
        assert!(Challenge::parse("   ").is_none());
    }
}
