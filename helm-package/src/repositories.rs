//! Helm's chart repository list, `repositories.yaml`.

use camino::{Utf8Path, Utf8PathBuf};
use chart_getter::{BasicCredentials, Credentials};
use serde::Deserialize;

/// The repository list could not be read.
#[derive(Debug, thiserror::Error)]
pub enum RepositoriesError {
    /// The file exists but could not be read.
    #[error("reading {path}")]
    Read {
        /// Path to `repositories.yaml`
        path: Utf8PathBuf,
        /// Underlying IO error
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid YAML.
    #[error("parsing {path}")]
    Parse {
        /// Path to `repositories.yaml`
        path: Utf8PathBuf,
        /// Underlying YAML error
        #[source]
        source: serde_yaml::Error,
    },
}

/// A named chart repository.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Repository {
    /// Repository name, referenced as `@name` or `alias:name`.
    pub name: String,

    /// Base URL of the repository.
    pub url: String,

    /// Username for basic authentication.
    #[serde(default)]
    pub username: Option<String>,

    /// Password for basic authentication.
    #[serde(default)]
    pub password: Option<String>,
}

/// The repositories Helm knows about.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Repositories {
    #[serde(default)]
    repositories: Vec<Repository>,
}

impl Repositories {
    /// Load `repositories.yaml`. A missing file is an empty list.
    #[tracing::instrument(level = "debug")]
    pub fn load(path: &Utf8Path) -> Result<Self, RepositoriesError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("No repositories file");
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(RepositoriesError::Read {
                    path: path.to_owned(),
                    source,
                })
            }
        };

        if contents.trim().is_empty() {
            return Ok(Self::default());
        }

        let repositories: Option<Repositories> =
            serde_yaml::from_str(&contents).map_err(|source| RepositoriesError::Parse {
                path: path.to_owned(),
                source,
            })?;

        Ok(repositories.unwrap_or_default())
    }

    /// Look up a repository by name.
    pub fn get(&self, name: &str) -> Option<&Repository> {
        self.repositories.iter().find(|repository| repository.name == name)
    }

    /// Add the basic credentials of every repository which has them.
    pub fn add_credentials(&self, credentials: &mut Credentials) {
        for repository in &self.repositories {
            let (Some(username), Some(password)) = (&repository.username, &repository.password)
            else {
                continue;
            };

            let Ok(url) = url::Url::parse(&repository.url) else {
                tracing::warn!(
                    name = %repository.name,
                    url = %repository.url,
                    "Ignoring credentials for repository with an invalid URL"
                );
                continue;
            };

            let Some(host) = url.host_str() else {
                continue;
            };

            let host = match url.port() {
                Some(port) => format!("{host}:{port}"),
                None => host.to_owned(),
            };

            credentials.insert(&host, BasicCredentials::new(username.clone(), password.as_str()));
        }
    }
}
