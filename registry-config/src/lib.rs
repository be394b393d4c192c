//! # Registry mirror configuration
//!
//! A registry configuration is an ordered list of rules, each mapping an OCI
//! reference prefix (a registry host, or a host and repository path) to one or
//! more alternate locations. The configuration is loaded once at startup and
//! is immutable afterwards.
//!
//! The [`Resolver`] turns a reference into the ordered list of candidate
//! locations which should be tried when fetching it.
//!
//! ## Example
//!
//! ```rust
//! use registry_config::{RegistryConfig, Resolver};
//!
//! let config = RegistryConfig::from_yaml(
//!     r#"
//! registries:
//!   - prefix: registry.example.com
//!     mirrors:
//!       - mirror1.example.com
//!       - mirror2.example.com
//! "#,
//! )
//! .unwrap();
//!
//! let resolver = Resolver::new(config).unwrap();
//! assert_eq!(
//!     resolver.resolve("registry.example.com/charts/foo:1.0"),
//!     vec![
//!         "mirror1.example.com/charts/foo:1.0".to_owned(),
//!         "mirror2.example.com/charts/foo:1.0".to_owned(),
//!     ]
//! );
//! ```

use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;

mod resolve;

pub use resolve::{resolve, Resolver};

/// The registry configuration is unusable.
///
/// These errors are raised when the configuration is loaded, never while
/// fetching.
#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
    /// The configuration file could not be read.
    #[error("reading registry configuration from {path}")]
    Read {
        /// Path to the configuration file
        path: Utf8PathBuf,
        /// Underlying IO error
        #[source]
        source: std::io::Error,
    },

    /// The configuration document is not valid YAML, or has the wrong shape.
    #[error("parsing registry configuration{}", .path.as_ref().map(|p| format!(" from {p}")).unwrap_or_default())]
    Parse {
        /// Path to the configuration file, when loaded from disk
        path: Option<Utf8PathBuf>,
        /// Underlying YAML error
        #[source]
        source: serde_yaml::Error,
    },

    /// A rule in the configuration is malformed.
    #[error("registry rule #{index} ({prefix:?}): {reason}")]
    InvalidRule {
        /// Position of the rule in the configuration, starting at 0
        index: usize,
        /// The prefix of the offending rule
        prefix: String,
        /// What is wrong with the rule
        reason: String,
    },
}

/// Registry mirror configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegistryConfig {
    /// Mirror rules, in the order they were declared.
    #[serde(default)]
    pub registries: Vec<MirrorRule>,
}

/// A single mirror rule.
///
/// References starting with `prefix` are rewritten to start with each entry of
/// `mirrors` instead. To keep the original registry as a fallback, list the
/// prefix itself as the last mirror.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MirrorRule {
    /// Registry host, optionally followed by a repository path.
    pub prefix: String,

    /// Replacement locations, most preferred first.
    #[serde(default)]
    pub mirrors: Vec<String>,
}

impl MirrorRule {
    /// Create a new rule.
    pub fn new<P, M, I>(prefix: P, mirrors: I) -> Self
    where
        P: Into<String>,
        M: Into<String>,
        I: IntoIterator<Item = M>,
    {
        Self {
            prefix: prefix.into(),
            mirrors: mirrors.into_iter().map(Into::into).collect(),
        }
    }

    fn validate(&self, index: usize) -> Result<(), ConfigurationError> {
        let invalid = |reason: String| ConfigurationError::InvalidRule {
            index,
            prefix: self.prefix.clone(),
            reason,
        };

        check_location(&self.prefix).map_err(|reason| invalid(format!("prefix {reason}")))?;

        if self.mirrors.is_empty() {
            return Err(invalid("no mirrors configured".into()));
        }

        for mirror in &self.mirrors {
            check_location(mirror)
                .map_err(|reason| invalid(format!("mirror {mirror:?} {reason}")))?;
        }

        Ok(())
    }
}

fn check_location(location: &str) -> Result<(), String> {
    if location.is_empty() {
        return Err("is empty".into());
    }

    if location.chars().any(char::is_whitespace) {
        return Err("contains whitespace".into());
    }

    if location.contains("://") {
        return Err("must not include a URI scheme".into());
    }

    if location.ends_with('/') {
        return Err("must not end with '/'".into());
    }

    Ok(())
}

impl RegistryConfig {
    /// Create a configuration from a list of rules.
    pub fn new(registries: Vec<MirrorRule>) -> Self {
        Self { registries }
    }

    /// Whether the configuration has no rules at all.
    pub fn is_empty(&self) -> bool {
        self.registries.is_empty()
    }

    /// Parse and validate a configuration document.
    ///
    /// An empty document is an empty configuration.
    pub fn from_yaml(document: &str) -> Result<Self, ConfigurationError> {
        let config = parse(document).map_err(|source| ConfigurationError::Parse {
            path: None,
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a configuration file.
    #[tracing::instrument(level = "debug")]
    pub fn load(path: &Utf8Path) -> Result<Self, ConfigurationError> {
        let document = std::fs::read_to_string(path).map_err(|source| ConfigurationError::Read {
            path: path.to_owned(),
            source,
        })?;

        let config = parse(&document).map_err(|source| ConfigurationError::Parse {
            path: Some(path.to_owned()),
            source,
        })?;
        config.validate()?;

        tracing::debug!(rules = config.registries.len(), "Loaded registry configuration");
        Ok(config)
    }

    /// Check every rule for well-formedness.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        self.registries
            .iter()
            .enumerate()
            .try_for_each(|(index, rule)| rule.validate(index))
    }
}

fn parse(document: &str) -> Result<RegistryConfig, serde_yaml::Error> {
    if document.trim().is_empty() {
        return Ok(RegistryConfig::default());
    }

    let config: Option<RegistryConfig> = serde_yaml::from_str(document)?;
    Ok(config.unwrap_or_default())
}
