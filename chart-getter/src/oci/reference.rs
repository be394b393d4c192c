use std::fmt;
use std::str::FromStr;

use super::OCI_URI_PREFIX;

/// A reference could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid OCI reference {reference:?}: {reason}")]
pub struct ReferenceError {
    reference: String,
    reason: &'static str,
}

/// An OCI artifact reference: `registry/repository[:tag][@digest]`.
///
/// The `oci://` prefix is accepted and dropped when parsing.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Reference {
    /// Registry host, with an optional port.
    pub registry: String,

    /// Repository path within the registry.
    pub repository: String,

    /// Tag, if any.
    pub tag: Option<String>,

    /// Digest (`algorithm:hex`), if any.
    pub digest: Option<String>,
}

impl Reference {
    /// The digest if set, otherwise the tag. This is what a manifest is
    /// requested by.
    pub fn target(&self) -> Option<&str> {
        self.digest.as_deref().or(self.tag.as_deref())
    }

    /// Whether the registry should be reached over plain HTTP.
    pub(crate) fn is_local(&self) -> bool {
        let host = self
            .registry
            .rsplit_once(':')
            .filter(|(_, port)| port.bytes().all(|b| b.is_ascii_digit()))
            .map(|(host, _)| host)
            .unwrap_or(&self.registry);

        matches!(host, "localhost" | "127.0.0.1" | "[::1]")
    }
}

impl FromStr for Reference {
    type Err = ReferenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let error = |reason| ReferenceError {
            reference: s.to_owned(),
            reason,
        };

        let reference = s.strip_prefix(OCI_URI_PREFIX).unwrap_or(s);

        let (registry, rest) = reference
            .split_once('/')
            .ok_or_else(|| error("missing repository"))?;

        if registry.is_empty() {
            return Err(error("missing registry"));
        }

        let (name, digest) = match rest.split_once('@') {
            Some((name, digest)) => {
                if !digest.contains(':') {
                    return Err(error("digest must be algorithm:hex"));
                }
                (name, Some(digest.to_owned()))
            }
            None => (rest, None),
        };

        let last_component = name.rfind('/').map(|i| i + 1).unwrap_or(0);
        let (repository, tag) = match name[last_component..].rfind(':') {
            Some(i) => {
                let split = last_component + i;
                (&name[..split], Some(name[split + 1..].to_owned()))
            }
            None => (name, None),
        };

        if repository.is_empty() || repository.split('/').any(str::is_empty) {
            return Err(error("invalid repository path"));
        }

        if tag.as_deref() == Some("") {
            return Err(error("empty tag"));
        }

        Ok(Reference {
            registry: registry.to_owned(),
            repository: repository.to_owned(),
            tag,
            digest,
        })
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.registry, self.repository)?;
        if let Some(tag) = &self.tag {
            write!(f, ":{tag}")?;
        }
        if let Some(digest) = &self.digest {
            write!(f, "@{digest}")?;
        }
        Ok(())
    }
}
