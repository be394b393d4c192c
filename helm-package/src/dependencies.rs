//! Fetching chart dependencies into `charts/`.
//!
//! Dependencies are fetched through [`Providers`], so OCI dependencies go
//! through the registry mirror rules like every other OCI pull.

use std::collections::HashMap;

use bytes::Bytes;
use camino::{Utf8Path, Utf8PathBuf};
use chart_getter::{scheme, GetterError, Providers, OCI_URI_PREFIX};
use serde::Deserialize;

use crate::chart::Dependency;
use crate::constraint::{parse_version, Constraint};
use crate::helm::{self, HelmError};
use crate::repositories::Repositories;

/// Directory holding a chart's dependencies.
pub const CHARTS_DIR: &str = "charts";

/// A dependency could not be fetched.
#[derive(Debug, thiserror::Error)]
pub enum DependencyError {
    /// The version constraint could not be parsed.
    #[error("dependency {name}: invalid version constraint {constraint:?}")]
    InvalidConstraint {
        /// Dependency name
        name: String,
        /// The constraint as written
        constraint: String,
        /// Underlying parse error
        #[source]
        source: semver::Error,
    },

    /// A repository alias is not in `repositories.yaml`.
    #[error("dependency {name}: no repository definition for {repository}, add it with `helm repo add`")]
    UnknownRepository {
        /// Dependency name
        name: String,
        /// The repository reference
        repository: String,
    },

    /// The repository URL uses a scheme with no getter.
    #[error("dependency {name}: unsupported repository {repository}")]
    UnsupportedRepository {
        /// Dependency name
        name: String,
        /// The repository reference
        repository: String,
    },

    /// No published version satisfies the constraint.
    #[error("dependency {name}: no version matching {constraint:?} in {repository}")]
    NoMatchingVersion {
        /// Dependency name
        name: String,
        /// The constraint as written
        constraint: String,
        /// Where versions were looked up
        repository: String,
    },

    /// Fetching an index, tag list or archive failed.
    #[error("dependency {name}: fetching {uri}")]
    Fetch {
        /// Dependency name
        name: String,
        /// What was being fetched
        uri: String,
        /// Underlying getter error
        #[source]
        source: GetterError,
    },

    /// A repository `index.yaml` is malformed.
    #[error("dependency {name}: parsing repository index {uri}")]
    Index {
        /// Dependency name
        name: String,
        /// URI of the index
        uri: String,
        /// Underlying YAML error
        #[source]
        source: serde_yaml::Error,
    },

    /// An index entry has no download URL.
    #[error("dependency {name}: version {version} in {repository} has no download URL")]
    MissingUrl {
        /// Dependency name
        name: String,
        /// Selected version
        version: String,
        /// The repository URL
        repository: String,
    },

    /// Reading or writing files under the chart failed.
    #[error("{path}")]
    Io {
        /// The path involved
        path: Utf8PathBuf,
        /// Underlying IO error
        #[source]
        source: std::io::Error,
    },

    /// Provenance verification failed.
    #[error("dependency {name}: verifying {archive}")]
    Verify {
        /// Dependency name
        name: String,
        /// The archive checked
        archive: Utf8PathBuf,
        /// Underlying helm error
        #[source]
        source: HelmError,
    },
}

fn io_error(path: &Utf8Path) -> impl FnOnce(std::io::Error) -> DependencyError + '_ {
    move |source| DependencyError::Io {
        path: path.to_owned(),
        source,
    }
}

#[derive(Debug, Deserialize)]
struct IndexFile {
    #[serde(default)]
    entries: HashMap<String, Vec<IndexEntry>>,
}

#[derive(Debug, Deserialize)]
struct IndexEntry {
    version: String,
    #[serde(default)]
    urls: Vec<String>,
}

/// Provenance checks for downloaded archives.
#[derive(Debug, Clone)]
pub struct Verification {
    /// The `helm` executable.
    pub helm_bin: Utf8PathBuf,

    /// Public keyring to verify against.
    pub keyring: Utf8PathBuf,
}

/// Where a dependency comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Source {
    /// Already vendored under `charts/`.
    Vendored,
    /// A chart directory on disk.
    Local(Utf8PathBuf),
    /// An OCI repository reference, without the chart name.
    Oci(String),
    /// A classic chart repository base URL.
    Repository(String),
}

/// Fetches the dependencies of one chart.
#[derive(Debug)]
pub struct DependencyManager<'a> {
    chart_dir: &'a Utf8Path,
    providers: &'a Providers,
    repositories: &'a Repositories,
    verification: Option<Verification>,
}

impl<'a> DependencyManager<'a> {
    /// A manager for the chart at `chart_dir`.
    pub fn new(
        chart_dir: &'a Utf8Path,
        providers: &'a Providers,
        repositories: &'a Repositories,
    ) -> Self {
        Self {
            chart_dir,
            providers,
            repositories,
            verification: None,
        }
    }

    /// Verify provenance of downloaded archives.
    pub fn verify(mut self, verification: Verification) -> Self {
        self.verification = Some(verification);
        self
    }

    fn charts_dir(&self) -> Utf8PathBuf {
        self.chart_dir.join(CHARTS_DIR)
    }

    fn source(&self, dependency: &Dependency) -> Result<Source, DependencyError> {
        let repository = dependency.repository.trim();

        if repository.is_empty() {
            return Ok(Source::Vendored);
        }

        if let Some(path) = repository.strip_prefix("file://") {
            return Ok(Source::Local(self.chart_dir.join(path)));
        }

        if let Some(reference) = repository.strip_prefix(OCI_URI_PREFIX) {
            return Ok(Source::Oci(reference.trim_end_matches('/').to_owned()));
        }

        if let Some(alias) = repository
            .strip_prefix('@')
            .or_else(|| repository.strip_prefix("alias:"))
        {
            return self
                .repositories
                .get(alias)
                .map(|entry| Source::Repository(entry.url.clone()))
                .ok_or_else(|| DependencyError::UnknownRepository {
                    name: dependency.name.clone(),
                    repository: repository.to_owned(),
                });
        }

        match scheme(repository) {
            Some("http" | "https") => Ok(Source::Repository(repository.to_owned())),
            _ => Err(DependencyError::UnsupportedRepository {
                name: dependency.name.clone(),
                repository: repository.to_owned(),
            }),
        }
    }

    /// Fetch every dependency into `charts/`, returning the paths written.
    #[tracing::instrument(level = "debug", skip_all, fields(chart = %self.chart_dir))]
    pub async fn update(
        &self,
        dependencies: &[Dependency],
    ) -> Result<Vec<Utf8PathBuf>, DependencyError> {
        if dependencies.is_empty() {
            return Ok(Vec::new());
        }

        let sources = dependencies
            .iter()
            .map(|dependency| Ok((dependency, self.source(dependency)?)))
            .collect::<Result<Vec<_>, DependencyError>>()?;

        let charts = self.charts_dir();
        tokio::fs::create_dir_all(&charts).await.map_err(io_error(&charts))?;

        let managed: Vec<&str> = sources
            .iter()
            .filter(|(_, source)| !matches!(source, Source::Vendored))
            .map(|(dependency, _)| dependency.name.as_str())
            .collect();
        self.remove_stale(&managed).await?;

        let mut written = Vec::new();
        for (dependency, source) in sources {
            let path = match source {
                Source::Vendored => {
                    tracing::debug!(name = %dependency.name, "Dependency is vendored, skipping");
                    continue;
                }
                Source::Local(path) => self.copy_local(dependency, &path).await?,
                Source::Oci(reference) => self.fetch_oci(dependency, &reference).await?,
                Source::Repository(url) => self.fetch_from_repository(dependency, &url).await?,
            };
            tracing::info!(name = %dependency.name, %path, "Saved dependency");
            written.push(path);
        }

        Ok(written)
    }

    /// Remove archives left by earlier updates of managed dependencies.
    async fn remove_stale(&self, names: &[&str]) -> Result<(), DependencyError> {
        let charts = self.charts_dir();
        let mut entries = tokio::fs::read_dir(&charts).await.map_err(io_error(&charts))?;

        while let Some(entry) = entries.next_entry().await.map_err(io_error(&charts))? {
            let Ok(file_name) = entry.file_name().into_string() else {
                continue;
            };

            let stem = file_name
                .strip_suffix(".tgz")
                .or_else(|| file_name.strip_suffix(".tgz.prov"));
            let Some(stem) = stem else {
                continue;
            };

            let stale = names.iter().any(|name| {
                stem.strip_prefix(name)
                    .and_then(|rest| rest.strip_prefix('-'))
                    .is_some_and(|version| parse_version(version).is_some())
            });

            if stale {
                let path = charts.join(&file_name);
                tracing::debug!(%path, "Removing stale dependency archive");
                tokio::fs::remove_file(&path).await.map_err(io_error(&path))?;
            }
        }

        Ok(())
    }

    fn constraint(dependency: &Dependency) -> Result<Constraint, DependencyError> {
        Constraint::parse(&dependency.version).map_err(|source| DependencyError::InvalidConstraint {
            name: dependency.name.clone(),
            constraint: dependency.version.clone(),
            source,
        })
    }

    async fn fetch(&self, dependency: &Dependency, uri: &str) -> Result<Bytes, DependencyError> {
        self.providers
            .get(uri)
            .await
            .map_err(|source| DependencyError::Fetch {
                name: dependency.name.clone(),
                uri: uri.to_owned(),
                source,
            })
    }

    async fn write_archive(
        &self,
        dependency: &Dependency,
        version: &str,
        contents: &[u8],
    ) -> Result<Utf8PathBuf, DependencyError> {
        let path = self
            .charts_dir()
            .join(format!("{}-{}.tgz", dependency.name, version));
        tokio::fs::write(&path, contents).await.map_err(io_error(&path))?;
        Ok(path)
    }

    async fn copy_local(
        &self,
        dependency: &Dependency,
        source: &Utf8Path,
    ) -> Result<Utf8PathBuf, DependencyError> {
        let target = self.charts_dir().join(&dependency.name);

        if tokio::fs::try_exists(&target).await.map_err(io_error(&target))? {
            tokio::fs::remove_dir_all(&target).await.map_err(io_error(&target))?;
        }

        let mut pending = vec![(source.to_owned(), target.clone())];
        while let Some((from, to)) = pending.pop() {
            tokio::fs::create_dir_all(&to).await.map_err(io_error(&to))?;

            let mut entries = tokio::fs::read_dir(&from).await.map_err(io_error(&from))?;
            while let Some(entry) = entries.next_entry().await.map_err(io_error(&from))? {
                let Ok(name) = entry.file_name().into_string() else {
                    continue;
                };
                let file_type = entry.file_type().await.map_err(io_error(&from))?;

                if file_type.is_dir() {
                    pending.push((from.join(&name), to.join(&name)));
                } else {
                    let (src, dst) = (from.join(&name), to.join(&name));
                    tokio::fs::copy(&src, &dst).await.map_err(io_error(&src))?;
                }
            }
        }

        Ok(target)
    }

    async fn fetch_oci(
        &self,
        dependency: &Dependency,
        reference: &str,
    ) -> Result<Utf8PathBuf, DependencyError> {
        let repository = format!("{OCI_URI_PREFIX}{reference}/{}", dependency.name);
        let constraint = Self::constraint(dependency)?;

        let (tag, version) = match constraint.exact() {
            Some(version) => (version.to_string().replace('+', "_"), version.to_string()),
            None => {
                let tags = self
                    .providers
                    .tags(&repository)
                    .await
                    .map_err(|source| DependencyError::Fetch {
                        name: dependency.name.clone(),
                        uri: repository.clone(),
                        source,
                    })?;

                let (tag, version) = constraint
                    .best(tags.iter().map(String::as_str))
                    .ok_or_else(|| DependencyError::NoMatchingVersion {
                        name: dependency.name.clone(),
                        constraint: dependency.version.clone(),
                        repository: repository.clone(),
                    })?;
                (tag.to_owned(), version.to_string())
            }
        };

        if self.verification.is_some() {
            tracing::warn!(
                name = %dependency.name,
                "Provenance verification is not supported for OCI dependencies, skipping"
            );
        }

        let uri = format!("{repository}:{tag}");
        tracing::debug!(name = %dependency.name, %uri, "Pulling dependency");
        let contents = self.fetch(dependency, &uri).await?;
        self.write_archive(dependency, &version, &contents).await
    }

    async fn fetch_from_repository(
        &self,
        dependency: &Dependency,
        base: &str,
    ) -> Result<Utf8PathBuf, DependencyError> {
        let base = base.trim_end_matches('/');
        let index_uri = format!("{base}/index.yaml");
        let constraint = Self::constraint(dependency)?;

        let index = self.fetch(dependency, &index_uri).await?;
        let index: IndexFile =
            serde_yaml::from_slice(&index).map_err(|source| DependencyError::Index {
                name: dependency.name.clone(),
                uri: index_uri.clone(),
                source,
            })?;

        let entries = index.entries.get(&dependency.name).map(Vec::as_slice).unwrap_or_default();
        let (version, _) = constraint
            .best(entries.iter().map(|entry| entry.version.as_str()))
            .ok_or_else(|| DependencyError::NoMatchingVersion {
                name: dependency.name.clone(),
                constraint: dependency.version.clone(),
                repository: base.to_owned(),
            })?;

        let url = entries
            .iter()
            .find(|entry| entry.version == version)
            .and_then(|entry| entry.urls.first())
            .ok_or_else(|| DependencyError::MissingUrl {
                name: dependency.name.clone(),
                version: version.to_owned(),
                repository: base.to_owned(),
            })?;
        let url = absolute_url(base, url);

        tracing::debug!(name = %dependency.name, %version, %url, "Downloading dependency");
        let contents = self.fetch(dependency, &url).await?;
        let archive = self.write_archive(dependency, version, &contents).await?;

        if let Some(verification) = &self.verification {
            let provenance_uri = format!("{url}.prov");
            let provenance = self.fetch(dependency, &provenance_uri).await?;
            let provenance_path = Utf8PathBuf::from(format!("{archive}.prov"));
            tokio::fs::write(&provenance_path, &provenance)
                .await
                .map_err(io_error(&provenance_path))?;

            helm::run(
                &verification.helm_bin,
                "verify",
                ["--keyring", verification.keyring.as_str(), archive.as_str()],
            )
            .await
            .map_err(|source| DependencyError::Verify {
                name: dependency.name.clone(),
                archive: archive.clone(),
                source,
            })?;
        }

        Ok(archive)
    }
}

/// Resolve an index URL, which may be relative to the repository.
fn absolute_url(base: &str, url: &str) -> String {
    if scheme(url).is_some() {
        return url.to_owned();
    }

    match url::Url::parse(&format!("{base}/")).and_then(|base| base.join(url)) {
        Ok(url) => url.to_string(),
        Err(_) => format!("{base}/{}", url.trim_start_matches('/')),
    }
}
