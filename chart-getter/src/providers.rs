use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use registry_config::{ConfigurationError, RegistryConfig};

use crate::client::HttpClient;
use crate::credentials::Credentials;
use crate::error::{GetterError, GetterErrorKind};
use crate::file::FileGetter;
use crate::getter::{scheme, Getter};
use crate::oci::{OciGetter, OciProvider, OCI_SCHEME};
use crate::web::HttpGetter;
use crate::ArcGetter;

const NAME: &str = "providers";

/// Getters keyed by the URI scheme they handle.
#[derive(Debug, Clone, Default)]
pub struct Providers {
    getters: HashMap<String, ArcGetter>,
}

impl Providers {
    /// No getters at all.
    pub fn new() -> Self {
        Self::default()
    }

    /// The standard set: `file`, `http`/`https`, and `oci` wrapped with the
    /// mirror rules from `config`.
    pub fn with_defaults(
        client: HttpClient,
        credentials: Arc<Credentials>,
        config: Option<RegistryConfig>,
        plain_http: bool,
    ) -> Result<Self, ConfigurationError> {
        let oci: ArcGetter = Arc::new(
            OciGetter::with_client(client.clone(), credentials.clone()).plain_http(plain_http),
        );

        let mut providers = Self::new();
        providers.add(Arc::new(FileGetter::new()));
        providers.add(Arc::new(HttpGetter::with_client(client, credentials)));
        providers.add(Arc::new(OciProvider::from_config(oci, config)?));
        Ok(providers)
    }

    /// Register a getter for each scheme it claims, replacing existing ones.
    pub fn add(&mut self, getter: ArcGetter) {
        for scheme in getter.schemes() {
            self.getters.insert((*scheme).to_owned(), getter.clone());
        }
    }

    /// The getter for a scheme.
    pub fn provider(&self, scheme: &str) -> Option<&ArcGetter> {
        self.getters.get(scheme)
    }

    /// Whether a getter handles `scheme`.
    pub fn has_getter(&self, scheme: &str) -> bool {
        self.getters.contains_key(scheme)
    }

    fn for_uri(&self, uri: &str) -> Result<&ArcGetter, GetterError> {
        let scheme = scheme(uri).ok_or_else(|| {
            GetterError::builder(NAME, GetterErrorKind::InvalidRequest, "URI has no scheme")
                .uri(uri)
                .build()
        })?;

        self.provider(scheme).ok_or_else(|| {
            GetterError::builder(
                NAME,
                GetterErrorKind::InvalidRequest,
                format!("no getter for scheme {scheme:?}"),
            )
            .uri(uri)
            .build()
        })
    }

    /// Fetch `uri` with the getter for its scheme.
    pub async fn get(&self, uri: &str) -> Result<Bytes, GetterError> {
        self.for_uri(uri)?.get(uri).await
    }

    /// List tags for a registry repository URI.
    pub async fn tags(&self, uri: &str) -> Result<Vec<String>, GetterError> {
        let getter = self.for_uri(uri)?;
        if scheme(uri) != Some(OCI_SCHEME) {
            return Err(GetterError::builder(
                NAME,
                GetterErrorKind::InvalidRequest,
                "tags can only be listed for OCI repositories",
            )
            .uri(uri)
            .build());
        }
        getter.tags(uri).await
    }
}
