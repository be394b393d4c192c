//! An in-memory getter, for tests and dry runs.

use std::collections::HashMap;

use bytes::Bytes;
use parking_lot::Mutex;

use crate::error::{GetterError, GetterErrorKind};
use crate::getter::Getter;

const NAME: &str = "memory";

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<String, Bytes>,
    tags: HashMap<String, Vec<String>>,
    failures: HashMap<String, GetterErrorKind>,
    calls: Vec<String>,
}

/// Serves fixed content by URI and records every request.
///
/// URIs without content fail with [`GetterErrorKind::NotFound`], unless a
/// different failure was registered with [`MemoryGetter::fail`].
#[derive(Debug)]
pub struct MemoryGetter {
    schemes: Vec<&'static str>,
    inner: Mutex<Inner>,
}

impl MemoryGetter {
    /// A getter claiming the given schemes.
    pub fn new(schemes: &[&'static str]) -> Self {
        Self {
            schemes: schemes.to_vec(),
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Serve `content` at `uri`.
    pub fn insert(&self, uri: impl Into<String>, content: impl Into<Bytes>) {
        self.inner.lock().entries.insert(uri.into(), content.into());
    }

    /// Serve a tag list for the repository at `uri`.
    pub fn insert_tags<I, T>(&self, uri: impl Into<String>, tags: I)
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.inner
            .lock()
            .tags
            .insert(uri.into(), tags.into_iter().map(Into::into).collect());
    }

    /// Fail every request for `uri` with `kind`.
    pub fn fail(&self, uri: impl Into<String>, kind: GetterErrorKind) {
        self.inner.lock().failures.insert(uri.into(), kind);
    }

    /// Every URI requested so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.inner.lock().calls.clone()
    }

    fn failure(inner: &Inner, uri: &str) -> GetterError {
        let kind = inner
            .failures
            .get(uri)
            .copied()
            .unwrap_or(GetterErrorKind::NotFound);

        let message = match kind {
            GetterErrorKind::Io => "connection refused",
            GetterErrorKind::NotFound => "no such entry",
            _ => "injected failure",
        };

        GetterError::builder(NAME, kind, message).uri(uri).build()
    }
}

#[async_trait::async_trait]
impl Getter for MemoryGetter {
    fn name(&self) -> &'static str {
        NAME
    }

    fn schemes(&self) -> &[&'static str] {
        &self.schemes
    }

    async fn get(&self, uri: &str) -> Result<Bytes, GetterError> {
        let mut inner = self.inner.lock();
        inner.calls.push(uri.to_owned());

        if inner.failures.contains_key(uri) {
            return Err(Self::failure(&inner, uri));
        }

        match inner.entries.get(uri) {
            Some(content) => Ok(content.clone()),
            None => Err(Self::failure(&inner, uri)),
        }
    }

    async fn tags(&self, uri: &str) -> Result<Vec<String>, GetterError> {
        let mut inner = self.inner.lock();
        inner.calls.push(uri.to_owned());

        if inner.failures.contains_key(uri) {
            return Err(Self::failure(&inner, uri));
        }

        match inner.tags.get(uri) {
            Some(tags) => Ok(tags.clone()),
            None => Err(Self::failure(&inner, uri)),
        }
    }
}
