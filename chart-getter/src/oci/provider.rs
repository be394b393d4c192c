use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use registry_config::{ConfigurationError, RegistryConfig, Resolver};

use super::{OCI_SCHEME, OCI_URI_PREFIX};
use crate::error::{Attempt, GetterError, GetterErrorKind, ResolutionExhaustedError};
use crate::getter::Getter;
use crate::ArcGetter;

const NAME: &str = "oci";

/// The successful result of a fetch through an [`OciProvider`].
#[derive(Debug)]
pub struct Fetch<T> {
    /// The fetched value.
    pub value: T,

    /// The candidate location which produced the value.
    pub location: String,

    /// Candidates tried and failed before `location` succeeded, in order.
    pub failed: Vec<Attempt>,
}

/// The provider installed for the `oci` scheme.
///
/// Either passes requests through to the underlying getter unchanged, or
/// rewrites each reference into its candidate mirror locations and tries
/// them in order until one succeeds.
#[derive(Debug, Clone)]
pub enum OciProvider {
    /// Requests go to the underlying getter as given.
    Delegate(ArcGetter),

    /// Requests are resolved against mirror rules first.
    Rewriting {
        /// The getter used for each candidate location.
        delegate: ArcGetter,

        /// Produces candidate locations for each reference.
        resolver: Arc<Resolver>,
    },
}

impl OciProvider {
    /// Build the provider for a registry configuration.
    ///
    /// Without a configuration, or with one that has no rules, requests pass
    /// straight through. A malformed configuration is rejected here, before
    /// any fetch is made.
    pub fn from_config(
        delegate: ArcGetter,
        config: Option<RegistryConfig>,
    ) -> Result<Self, ConfigurationError> {
        let Some(config) = config else {
            return Ok(OciProvider::Delegate(delegate));
        };

        let resolver = Resolver::new(config)?;
        if !resolver.is_mirroring() {
            return Ok(OciProvider::Delegate(delegate));
        }

        Ok(OciProvider::Rewriting {
            delegate,
            resolver: Arc::new(resolver),
        })
    }

    /// The underlying getter.
    pub fn delegate(&self) -> &ArcGetter {
        match self {
            OciProvider::Delegate(delegate) => delegate,
            OciProvider::Rewriting { delegate, .. } => delegate,
        }
    }

    /// Whether references are rewritten before fetching.
    pub fn is_rewriting(&self) -> bool {
        matches!(self, OciProvider::Rewriting { .. })
    }

    /// Fetch a reference, reporting which candidate succeeded and which
    /// failed before it.
    pub async fn fetch(&self, uri: &str) -> Result<Fetch<Bytes>, GetterError> {
        self.first_success(uri, |getter, location| async move {
            getter.get(&location).await
        })
        .await
    }

    /// List tags for a repository reference, trying each candidate in order.
    pub async fn fetch_tags(&self, uri: &str) -> Result<Fetch<Vec<String>>, GetterError> {
        self.first_success(uri, |getter, location| async move {
            getter.tags(&location).await
        })
        .await
    }

    async fn first_success<T, F, Fut>(
        &self,
        uri: &str,
        attempt: F,
    ) -> Result<Fetch<T>, GetterError>
    where
        F: Fn(ArcGetter, String) -> Fut,
        Fut: Future<Output = Result<T, GetterError>>,
    {
        let (delegate, resolver) = match self {
            OciProvider::Delegate(delegate) => {
                let value = attempt(delegate.clone(), uri.to_owned()).await?;
                return Ok(Fetch {
                    value,
                    location: uri.to_owned(),
                    failed: Vec::new(),
                });
            }
            OciProvider::Rewriting { delegate, resolver } => (delegate, resolver),
        };

        let reference = uri.strip_prefix(OCI_URI_PREFIX).unwrap_or(uri);
        if reference.is_empty() {
            return Err(GetterError::builder(
                NAME,
                GetterErrorKind::InvalidRequest,
                "empty OCI reference",
            )
            .uri(uri)
            .build());
        }

        let candidates = resolver.resolve(reference);
        tracing::debug!(%reference, candidates = candidates.len(), "Resolved OCI reference");

        let mut failed = Vec::new();
        for candidate in candidates {
            let location = format!("{OCI_URI_PREFIX}{candidate}");
            tracing::debug!(%location, "Trying candidate location");

            match attempt(delegate.clone(), location.clone()).await {
                Ok(value) => {
                    if !failed.is_empty() {
                        tracing::info!(
                            %reference,
                            %location,
                            failures = failed.len(),
                            "Fetched from fallback location"
                        );
                    }
                    return Ok(Fetch {
                        value,
                        location,
                        failed,
                    });
                }
                Err(error) => {
                    tracing::warn!(%location, %error, "Candidate location failed");
                    failed.push(Attempt { location, error });
                }
            }
        }

        Err(GetterError::builder(
            NAME,
            GetterErrorKind::ResolutionExhausted,
            ResolutionExhaustedError::new(reference, failed),
        )
        .uri(uri)
        .build())
    }
}

#[async_trait::async_trait]
impl Getter for OciProvider {
    fn name(&self) -> &'static str {
        self.delegate().name()
    }

    fn schemes(&self) -> &[&'static str] {
        &[OCI_SCHEME]
    }

    async fn get(&self, uri: &str) -> Result<Bytes, GetterError> {
        Ok(self.fetch(uri).await?.value)
    }

    async fn tags(&self, uri: &str) -> Result<Vec<String>, GetterError> {
        Ok(self.fetch_tags(uri).await?.value)
    }
}
