use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use bytes::Bytes;

use crate::error::{GetterError, GetterErrorKind};

/// Fetches content for URIs of one or more schemes.
#[async_trait::async_trait]
pub trait Getter: fmt::Debug {
    /// The name of the getter, used in errors and logs.
    fn name(&self) -> &'static str;

    /// The URI schemes this getter handles.
    fn schemes(&self) -> &[&'static str];

    /// Fetch the content at `uri`.
    async fn get(&self, uri: &str) -> Result<Bytes, GetterError>;

    /// List the tags published for a repository URI (without tag or digest).
    ///
    /// Only registries support tags; other getters report an invalid request.
    async fn tags(&self, uri: &str) -> Result<Vec<String>, GetterError> {
        Err(GetterError::builder(
            self.name(),
            GetterErrorKind::InvalidRequest,
            format!("{} getter cannot list tags", self.name()),
        )
        .uri(uri)
        .build())
    }
}

/// The scheme of a URI, when it has one in `scheme://` form.
pub fn scheme(uri: &str) -> Option<&str> {
    uri.split_once("://")
        .map(|(scheme, _)| scheme)
        .filter(|scheme| !scheme.is_empty())
}

#[async_trait::async_trait]
impl<G> Getter for Arc<G>
where
    G: ?Sized + Getter + Sync + Send + 'static,
{
    fn name(&self) -> &'static str {
        self.deref().name()
    }

    fn schemes(&self) -> &[&'static str] {
        self.deref().schemes()
    }

    async fn get(&self, uri: &str) -> Result<Bytes, GetterError> {
        self.deref().get(uri).await
    }

    async fn tags(&self, uri: &str) -> Result<Vec<String>, GetterError> {
        self.deref().tags(uri).await
    }
}
