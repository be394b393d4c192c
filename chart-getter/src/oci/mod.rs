//! OCI registry getter.
//!
//! Pulls Helm charts stored as OCI artifacts using the registry HTTP API:
//! the manifest is fetched by tag or digest, the chart content layer is
//! located by media type, and the blob is downloaded and checked against
//! its digest.

use std::sync::Arc;

use bytes::Bytes;
use http::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, WWW_AUTHENTICATE};
use http::StatusCode;
use serde::Deserialize;
use sha2::{Digest as _, Sha256};

use crate::client::{self, Fetched, HttpClient};
use crate::credentials::Credentials;
use crate::error::{GetterError, GetterErrorKind};
use crate::getter::Getter;

mod auth;
mod provider;
mod reference;

pub use self::provider::{Fetch, OciProvider};
pub use self::reference::{Reference, ReferenceError};

/// URI scheme for registry references.
pub const OCI_SCHEME: &str = "oci";

/// Prefix of registry reference URIs.
pub const OCI_URI_PREFIX: &str = "oci://";

/// Media type of the layer holding the packaged chart.
pub const HELM_CHART_CONTENT_MEDIA_TYPE: &str =
    "application/vnd.cncf.helm.chart.content.v1.tar+gzip";

const MANIFEST_ACCEPT: &str =
    "application/vnd.oci.image.manifest.v1+json, application/vnd.docker.distribution.manifest.v2+json";

const NAME: &str = "oci";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Manifest {
    #[serde(default)]
    layers: Vec<Descriptor>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Descriptor {
    media_type: String,
    digest: String,
    #[serde(default)]
    size: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct TagList {
    #[serde(default)]
    tags: Option<Vec<String>>,
}

/// Fetches charts from OCI registries.
#[derive(Debug, Clone)]
pub struct OciGetter {
    client: HttpClient,
    credentials: Arc<Credentials>,
    plain_http: bool,
}

impl OciGetter {
    /// A getter using a specific HTTP client.
    pub fn with_client(client: HttpClient, credentials: Arc<Credentials>) -> Self {
        Self {
            client,
            credentials,
            plain_http: false,
        }
    }

    /// Talk to every registry over plain HTTP.
    ///
    /// Registries on `localhost` always use plain HTTP.
    pub fn plain_http(mut self, plain_http: bool) -> Self {
        self.plain_http = plain_http;
        self
    }

    fn session<'r>(&'r self, reference: &'r Reference) -> Session<'r> {
        let scheme = if self.plain_http || reference.is_local() {
            "http"
        } else {
            "https"
        };

        Session {
            getter: self,
            reference,
            base: format!("{scheme}://{}/v2/{}", reference.registry, reference.repository),
            authorization: None,
        }
    }
}

fn parse_reference(uri: &str) -> Result<Reference, GetterError> {
    uri.parse::<Reference>().map_err(|error| {
        GetterError::builder(NAME, GetterErrorKind::InvalidRequest, error)
            .uri(uri)
            .build()
    })
}

/// Requests against one repository, sharing an authorization once obtained.
struct Session<'r> {
    getter: &'r OciGetter,
    reference: &'r Reference,
    base: String,
    authorization: Option<HeaderValue>,
}

impl Session<'_> {
    async fn fetch(
        &mut self,
        path: &str,
        accept: Option<&'static str>,
    ) -> Result<Fetched, GetterError> {
        let url = client::parse_url(NAME, &format!("{}/{path}", self.base))?;

        let mut headers = HeaderMap::new();
        if let Some(accept) = accept {
            headers.insert(ACCEPT, HeaderValue::from_static(accept));
        }
        if let Some(authorization) = &self.authorization {
            headers.insert(AUTHORIZATION, authorization.clone());
        }

        let fetched = client::get(&self.getter.client, NAME, url.clone(), &headers).await?;
        if fetched.status != StatusCode::UNAUTHORIZED || self.authorization.is_some() {
            return Ok(fetched);
        }

        let Some(challenge) = fetched
            .headers
            .get(WWW_AUTHENTICATE)
            .and_then(|value| value.to_str().ok())
            .and_then(auth::Challenge::parse)
        else {
            return Ok(fetched);
        };

        tracing::debug!(
            registry = %self.reference.registry,
            scheme = %challenge.scheme,
            "Registry requested authentication"
        );
        let credentials = self.getter.credentials.for_host(&self.reference.registry);
        let authorization = auth::authorize(
            &self.getter.client,
            NAME,
            &challenge,
            &self.reference.repository,
            credentials,
        )
        .await?;

        headers.insert(AUTHORIZATION, authorization.clone());
        self.authorization = Some(authorization);
        client::get(&self.getter.client, NAME, url, &headers).await
    }

    async fn manifest(&mut self, target: &str) -> Result<Manifest, GetterError> {
        let body = self
            .fetch(&format!("manifests/{target}"), Some(MANIFEST_ACCEPT))
            .await?
            .error_for_status(NAME)?;

        serde_json::from_slice(&body).map_err(|error| {
            GetterError::builder(NAME, GetterErrorKind::Other, error)
                .context("decoding manifest")
                .build()
        })
    }

    async fn blob(&mut self, descriptor: &Descriptor) -> Result<Bytes, GetterError> {
        let body = self
            .fetch(&format!("blobs/{}", descriptor.digest), None)
            .await?
            .error_for_status(NAME)?;

        if let Some(size) = descriptor.size {
            if body.len() as u64 != size {
                return Err(GetterError::builder(
                    NAME,
                    GetterErrorKind::Integrity,
                    format!("expected {size} bytes, received {}", body.len()),
                )
                .context(descriptor.digest.clone())
                .build());
            }
        }

        verify_digest(&descriptor.digest, &body)?;
        Ok(body)
    }

    async fn tags(&mut self) -> Result<Vec<String>, GetterError> {
        let body = self.fetch("tags/list", None).await?.error_for_status(NAME)?;
        let list: TagList = serde_json::from_slice(&body).map_err(|error| {
            GetterError::builder(NAME, GetterErrorKind::Other, error)
                .context("decoding tag list")
                .build()
        })?;
        Ok(list.tags.unwrap_or_default())
    }
}

fn verify_digest(digest: &str, body: &[u8]) -> Result<(), GetterError> {
    let Some(expected) = digest.strip_prefix("sha256:") else {
        return Err(GetterError::new(
            NAME,
            GetterErrorKind::Integrity,
            format!("unsupported digest algorithm in {digest}"),
        ));
    };

    let actual = hex::encode(Sha256::digest(body));
    if !actual.eq_ignore_ascii_case(expected) {
        return Err(GetterError::builder(
            NAME,
            GetterErrorKind::Integrity,
            format!("digest mismatch: expected sha256:{expected}, computed sha256:{actual}"),
        )
        .build());
    }

    Ok(())
}

#[async_trait::async_trait]
impl Getter for OciGetter {
    fn name(&self) -> &'static str {
        NAME
    }

    fn schemes(&self) -> &[&'static str] {
        &[OCI_SCHEME]
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn get(&self, uri: &str) -> Result<Bytes, GetterError> {
        let reference = parse_reference(uri)?;
        let Some(target) = reference.target() else {
            return Err(GetterError::builder(
                NAME,
                GetterErrorKind::InvalidRequest,
                "reference has neither a tag nor a digest",
            )
            .uri(uri)
            .build());
        };

        let mut session = self.session(&reference);
        let manifest = session
            .manifest(target)
            .await
            .map_err(|error| error.set_uri(uri))?;

        let layer = manifest
            .layers
            .iter()
            .find(|layer| layer.media_type == HELM_CHART_CONTENT_MEDIA_TYPE)
            .ok_or_else(|| {
                GetterError::builder(
                    NAME,
                    GetterErrorKind::NotFound,
                    format!("manifest has no {HELM_CHART_CONTENT_MEDIA_TYPE} layer"),
                )
                .uri(uri)
                .build()
            })?;

        let body = session
            .blob(layer)
            .await
            .map_err(|error| error.set_uri(uri))?;

        tracing::debug!(bytes = body.len(), digest = %layer.digest, "Pulled chart");
        Ok(body)
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn tags(&self, uri: &str) -> Result<Vec<String>, GetterError> {
        let reference = parse_reference(uri)?;
        self.session(&reference)
            .tags()
            .await
            .map_err(|error| error.set_uri(uri))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_verification() {
        let body = b"chart bytes";
        let digest = format!("sha256:{}", hex::encode(Sha256::digest(body)));

        assert!(verify_digest(&digest, body).is_ok());

        let err = verify_digest(&digest, b"other bytes").unwrap_err();
        assert_eq!(err.kind(), GetterErrorKind::Integrity);

        let err = verify_digest("md5:abcd", body).unwrap_err();
        assert_eq!(err.kind(), GetterErrorKind::Integrity);
    }

    #[test]
    fn invalid_reference_is_invalid_request() {
        let err = parse_reference("oci://registry.example.com").unwrap_err();
        assert_eq!(err.kind(), GetterErrorKind::InvalidRequest);
        assert_eq!(err.uri(), Some("oci://registry.example.com"));
    }

    #[test]
    fn session_base_url() {
        let client = crate::mock::client(crate::mock::MockRegistry::new());
        let getter = OciGetter::with_client(client, Default::default());

        let reference: Reference = "registry.example.com/charts/foo:1.0".parse().unwrap();
        assert_eq!(getter.session(&reference).base, "https://registry.example.com/v2/charts/foo");

        let reference: Reference = "localhost:5000/foo:1.0".parse().unwrap();
        assert_eq!(getter.session(&reference).base, "http://localhost:5000/v2/foo");

        let getter = getter.plain_http(true);
        let reference: Reference = "registry.example.com/charts/foo:1.0".parse().unwrap();
        assert_eq!(getter.session(&reference).base, "http://registry.example.com/v2/charts/foo");
    }
}
