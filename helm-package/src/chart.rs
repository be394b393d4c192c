//! Chart metadata from `Chart.yaml`.

use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;

/// Name of the chart metadata file.
pub const CHART_FILE: &str = "Chart.yaml";

/// The chart could not be loaded.
#[derive(Debug, thiserror::Error)]
pub enum ChartError {
    /// The chart path is not a directory containing `Chart.yaml`.
    #[error("reading {path}")]
    Read {
        /// Path to `Chart.yaml`
        path: Utf8PathBuf,
        /// Underlying IO error
        #[source]
        source: std::io::Error,
    },

    /// `Chart.yaml` is not valid YAML.
    #[error("parsing {path}")]
    Parse {
        /// Path to `Chart.yaml`
        path: Utf8PathBuf,
        /// Underlying YAML error
        #[source]
        source: serde_yaml::Error,
    },

    /// A required field is missing.
    #[error("{path}: chart.metadata.{field} is required")]
    Missing {
        /// Path to `Chart.yaml`
        path: Utf8PathBuf,
        /// The missing field
        field: &'static str,
    },

    /// The chart version is not a semantic version.
    #[error("{path}: version {version:?} is not a valid semantic version")]
    InvalidVersion {
        /// Path to `Chart.yaml`
        path: Utf8PathBuf,
        /// The offending version
        version: String,
    },
}

/// A chart dependency as declared in `Chart.yaml`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Dependency {
    /// Chart name.
    pub name: String,

    /// Version constraint.
    #[serde(default)]
    pub version: String,

    /// Repository URL, alias (`@name` or `alias:name`), or empty when the
    /// chart is already vendored under `charts/`.
    #[serde(default)]
    pub repository: String,

    /// Alternative name for the dependency inside the parent chart.
    #[serde(default)]
    pub alias: Option<String>,
}

/// The fields of `Chart.yaml` used for packaging.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartMetadata {
    /// Chart API version (`v1` or `v2`).
    #[serde(default)]
    pub api_version: String,

    /// Chart name.
    #[serde(default)]
    pub name: String,

    /// Chart version.
    #[serde(default)]
    pub version: String,

    /// Version of the packaged application.
    #[serde(default)]
    pub app_version: Option<String>,

    /// Declared dependencies.
    #[serde(default)]
    pub dependencies: Vec<Dependency>,
}

impl ChartMetadata {
    /// Load and check `<chart_dir>/Chart.yaml`.
    #[tracing::instrument(level = "debug")]
    pub fn load(chart_dir: &Utf8Path) -> Result<Self, ChartError> {
        let path = chart_dir.join(CHART_FILE);
        let contents = std::fs::read_to_string(&path).map_err(|source| ChartError::Read {
            path: path.clone(),
            source,
        })?;

        let chart: ChartMetadata =
            serde_yaml::from_str(&contents).map_err(|source| ChartError::Parse {
                path: path.clone(),
                source,
            })?;

        if chart.name.is_empty() {
            return Err(ChartError::Missing { path, field: "name" });
        }

        if chart.version.is_empty() {
            return Err(ChartError::Missing {
                path,
                field: "version",
            });
        }

        if semver::Version::parse(chart.version.trim_start_matches('v')).is_err() {
            return Err(ChartError::InvalidVersion {
                path,
                version: chart.version,
            });
        }

        tracing::debug!(
            name = %chart.name,
            version = %chart.version,
            dependencies = chart.dependencies.len(),
            "Loaded chart"
        );
        Ok(chart)
    }

    /// The chart's `appVersion`, when set and non-empty.
    pub fn app_version(&self) -> Option<&str> {
        self.app_version.as_deref().filter(|version| !version.is_empty())
    }
}
