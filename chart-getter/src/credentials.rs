//! Registry and repository credentials.
//!
//! Credentials are read from a docker-style `config.json` (the file Helm
//! keeps its registry logins in):
//!
//! ```json
//! { "auths": { "registry.example.com": { "auth": "dXNlcjpwYXNz" } } }
//! ```

use std::collections::HashMap;
use std::fmt;

use base64::prelude::BASE64_STANDARD;
use base64::Engine as _;
use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;
use zeroize::Zeroize;

/// A password, hidden from debug output and zeroed on drop.
#[derive(Clone, PartialEq, Eq)]
pub struct Password(String);

impl Password {
    /// Expose the underlying value.
    pub fn revealed(&self) -> &str {
        &self.0
    }
}

impl From<String> for Password {
    fn from(value: String) -> Self {
        Password(value)
    }
}

impl From<&str> for Password {
    fn from(value: &str) -> Self {
        Password(value.to_owned())
    }
}

impl Drop for Password {
    fn drop(&mut self) {
        self.0.zeroize()
    }
}

impl fmt::Debug for Password {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Password(****)")
    }
}

/// A username and password pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicCredentials {
    /// The username
    pub username: String,

    /// The password or token
    pub password: Password,
}

impl BasicCredentials {
    /// Create a new pair.
    pub fn new(username: impl Into<String>, password: impl Into<Password>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

/// The credentials file could not be used.
#[derive(Debug, thiserror::Error)]
pub enum CredentialsError {
    /// The file exists but could not be read.
    #[error("reading credentials from {path}")]
    Read {
        /// Path to the credentials file
        path: Utf8PathBuf,
        /// Underlying IO error
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid JSON.
    #[error("parsing credentials from {path}")]
    Parse {
        /// Path to the credentials file
        path: Utf8PathBuf,
        /// Underlying JSON error
        #[source]
        source: serde_json::Error,
    },

    /// An `auth` entry is not base64 encoded `username:password`.
    #[error("invalid auth entry for {host} in {path}")]
    InvalidAuth {
        /// Path to the credentials file
        path: Utf8PathBuf,
        /// The registry host of the entry
        host: String,
    },
}

#[derive(Debug, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    auths: HashMap<String, AuthEntry>,
}

#[derive(Debug, Deserialize)]
struct AuthEntry {
    #[serde(default)]
    auth: Option<String>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
}

/// Credentials keyed by registry host.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    hosts: HashMap<String, BasicCredentials>,
}

impl Credentials {
    /// No credentials at all.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add credentials for a host, replacing any existing entry.
    pub fn insert(&mut self, host: &str, credentials: BasicCredentials) {
        self.hosts.insert(normalize_host(host).to_owned(), credentials);
    }

    /// Credentials for a registry host (`host` or `host:port`).
    pub fn for_host(&self, host: &str) -> Option<&BasicCredentials> {
        self.hosts.get(normalize_host(host))
    }

    /// Whether no credentials are known.
    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    /// Load a docker-style credentials file.
    ///
    /// A missing file means no credentials.
    #[tracing::instrument(level = "debug")]
    pub fn load(path: &Utf8Path) -> Result<Self, CredentialsError> {
        let contents = match std::fs::read(path) {
            Ok(contents) => contents,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("No registry credentials file");
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(CredentialsError::Read {
                    path: path.to_owned(),
                    source,
                })
            }
        };

        let config: ConfigFile =
            serde_json::from_slice(&contents).map_err(|source| CredentialsError::Parse {
                path: path.to_owned(),
                source,
            })?;

        let mut credentials = Self::default();
        for (host, entry) in config.auths {
            let pair = match (entry.auth, entry.username, entry.password) {
                (Some(auth), _, _) => decode_auth(&auth).ok_or_else(|| {
                    CredentialsError::InvalidAuth {
                        path: path.to_owned(),
                        host: host.clone(),
                    }
                })?,
                (None, Some(username), Some(password)) => BasicCredentials::new(username, password),
                _ => continue,
            };
            credentials.insert(&host, pair);
        }

        tracing::debug!(hosts = credentials.hosts.len(), "Loaded registry credentials");
        Ok(credentials)
    }
}

fn decode_auth(auth: &str) -> Option<BasicCredentials> {
    let decoded = BASE64_STANDARD.decode(auth.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (username, password) = decoded.split_once(':')?;
    Some(BasicCredentials::new(username, password))
}

/// Reduce a credentials key (which may be a URL) to `host[:port]`.
fn normalize_host(host: &str) -> &str {
    let host = host
        .strip_prefix("https://")
        .or_else(|| host.strip_prefix("http://"))
        .unwrap_or(host);
    host.split('/').next().unwrap_or(host)
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use super::*;

    #[test]
    fn password_hidden_debug() {
        let credentials = BasicCredentials::new("robot", "secret garden");
        let debug = format!("{credentials:?}");
        assert!(!debug.contains("secret garden"));
        assert!(debug.contains("Password(****)"));
        assert_eq!(credentials.password.revealed(), "secret garden");
    }

    #[test]
    fn load_docker_config() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "auths": {{
                    "registry.example.com": {{ "auth": "dXNlcm5hbWU6cGFzc3dvcmQ=" }},
                    "https://ghcr.io/v2/": {{ "username": "octocat", "password": "token" }},
                    "empty.example.com": {{}}
                }}
            }}"#
        )
        .unwrap();

        let credentials = Credentials::load(Utf8Path::from_path(file.path()).unwrap()).unwrap();

        let pair = credentials.for_host("registry.example.com").unwrap();
        assert_eq!(pair.username, "username");
        assert_eq!(pair.password.revealed(), "password");

        let pair = credentials.for_host("ghcr.io").unwrap();
        assert_eq!(pair.username, "octocat");

        assert!(credentials.for_host("empty.example.com").is_none());
    }

    #[test]
    fn missing_file_is_empty() {
        let credentials = Credentials::load(Utf8Path::new("/nonexistent/config.json")).unwrap();
        assert!(credentials.is_empty());
    }

    #[test]
    fn invalid_auth_entry() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"auths": {{"r.example.com": {{"auth": "!!!"}}}}}}"#).unwrap();

        let err = Credentials::load(Utf8Path::from_path(file.path()).unwrap()).unwrap_err();
        assert!(matches!(
            err,
            CredentialsError::InvalidAuth { host, .. } if host == "r.example.com"
        ));
    }
}
