//! # Chart getters
//!
//! Fetch chart archives, repository indexes and OCI artifacts by URI.
//!
//! A [`Getter`] handles one or more URI schemes. [`Providers`] keeps one
//! getter per scheme and dispatches requests to it. For the `oci` scheme the
//! getter is an [`OciProvider`], which either passes references through to
//! the registry unchanged or rewrites them with registry mirror rules, trying
//! each candidate location in order until one succeeds.
//!
//! ```rust
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! use std::sync::Arc;
//!
//! use chart_getter::{Getter, MemoryGetter, OciProvider};
//! use registry_config::RegistryConfig;
//!
//! let registry = Arc::new(MemoryGetter::new(&["oci"]));
//! registry.insert("oci://mirror.example.com/charts/foo:1.0", "chart");
//!
//! let config = RegistryConfig::from_yaml(
//!     "registries:\n  - prefix: registry.example.com\n    mirrors: [mirror.example.com]\n",
//! )?;
//! let provider = OciProvider::from_config(registry, Some(config))?;
//!
//! let chart = provider.get("oci://registry.example.com/charts/foo:1.0").await?;
//! assert_eq!(&chart[..], b"chart");
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

mod client;
mod credentials;
mod error;
mod file;
mod getter;
mod memory;
pub mod mock;
mod oci;
mod providers;
mod web;

pub use self::client::{default_client, HttpClient, HttpStatusError};
pub use self::credentials::{BasicCredentials, Credentials, CredentialsError, Password};
pub use self::error::{
    Attempt, GetterError, GetterErrorBuilder, GetterErrorKind, ResolutionExhaustedError,
};
pub use self::file::FileGetter;
pub use self::getter::{scheme, Getter};
pub use self::memory::MemoryGetter;
pub use self::oci::{
    Fetch, OciGetter, OciProvider, Reference, ReferenceError, HELM_CHART_CONTENT_MEDIA_TYPE,
    OCI_SCHEME, OCI_URI_PREFIX,
};
pub use self::providers::Providers;
pub use self::web::HttpGetter;

/// A shared, type-erased getter.
pub type ArcGetter = Arc<dyn Getter + Send + Sync>;
