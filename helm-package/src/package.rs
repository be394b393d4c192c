//! Building the chart archive with `helm package`.

use camino::{Utf8Path, Utf8PathBuf};

use crate::helm::{self, HelmError};
use crate::values::{ValuesError, ValuesOverride};

const SAVED_PREFIX: &str = "Successfully packaged chart and saved it to:";

/// Packaging failed.
#[derive(Debug, thiserror::Error)]
pub enum PackageError {
    /// Signing was requested without a key.
    #[error("sign-key is required for signing a package")]
    MissingSignKey,

    /// Signing was requested without a keyring.
    #[error("keyring is required for signing a package")]
    MissingKeyring,

    /// The chart directory is not accessible.
    #[error("chart: {path}")]
    Chart {
        /// The chart path
        path: Utf8PathBuf,
        /// Underlying IO error
        #[source]
        source: std::io::Error,
    },

    /// Embedding values failed.
    #[error(transparent)]
    Values(#[from] ValuesError),

    /// `helm package` failed.
    #[error(transparent)]
    Helm(#[from] HelmError),
}

/// Options for one `helm package` run.
#[derive(Debug, Clone, Default)]
pub struct PackageOptions {
    /// The `helm` executable.
    pub helm_bin: Utf8PathBuf,

    /// Chart directory.
    pub chart_path: Utf8PathBuf,

    /// Chart name, used to name the archive.
    pub chart_name: String,

    /// Directory the archive is written to.
    pub destination: Utf8PathBuf,

    /// Chart version to stamp.
    pub version: String,

    /// App version to stamp.
    pub app_version: String,

    /// Sign the package.
    pub sign: bool,

    /// Signing key name.
    pub key: Option<String>,

    /// Keyring holding the signing key.
    pub keyring: Option<Utf8PathBuf>,

    /// File with the signing key passphrase, `-` for stdin.
    pub passphrase_file: Option<String>,

    /// Values merged into `values.yaml` for the duration of packaging.
    pub embed_values: Option<String>,
}

impl PackageOptions {
    fn check_signing(&self) -> Result<(), PackageError> {
        if !self.sign {
            return Ok(());
        }

        if self.key.as_deref().unwrap_or_default().is_empty() {
            return Err(PackageError::MissingSignKey);
        }

        if self.keyring.as_deref().map(Utf8Path::as_str).unwrap_or_default().is_empty() {
            return Err(PackageError::MissingKeyring);
        }

        Ok(())
    }

    fn args(&self, chart: &Utf8Path) -> Vec<String> {
        let mut args = vec![
            chart.to_string(),
            "--destination".to_owned(),
            self.destination.to_string(),
            "--version".to_owned(),
            self.version.clone(),
            "--app-version".to_owned(),
            self.app_version.clone(),
        ];

        if self.sign {
            args.push("--sign".to_owned());
            if let Some(key) = &self.key {
                args.extend(["--key".to_owned(), key.clone()]);
            }
            if let Some(keyring) = &self.keyring {
                args.extend(["--keyring".to_owned(), keyring.to_string()]);
            }
            if let Some(passphrase_file) = &self.passphrase_file {
                args.extend(["--passphrase-file".to_owned(), passphrase_file.clone()]);
            }
        }

        args
    }

    /// Where the archive ends up.
    pub fn archive_path(&self) -> Utf8PathBuf {
        self.destination
            .join(format!("{}-{}.tgz", self.chart_name, self.version))
    }
}

/// Package the chart, returning the path of the archive.
///
/// With embedded values, `values.yaml` is rewritten for the duration of the
/// `helm package` run and restored on every exit path, failures included.
#[tracing::instrument(level = "debug", skip_all, fields(chart = %options.chart_path))]
pub async fn package_chart(options: &PackageOptions) -> Result<Utf8PathBuf, PackageError> {
    options.check_signing()?;

    let chart = options
        .chart_path
        .canonicalize_utf8()
        .map_err(|source| PackageError::Chart {
            path: options.chart_path.clone(),
            source,
        })?;

    let values = match options.embed_values.as_deref().filter(|values| !values.is_empty()) {
        Some(values) => Some(ValuesOverride::apply(&chart, values)?),
        None => None,
    };

    let result = helm::run(&options.helm_bin, "package", options.args(&chart)).await;

    let restored = match values {
        Some(values) => values.restore(),
        None => Ok(()),
    };

    let output = match (result, restored) {
        (Ok(output), Ok(())) => output,
        (Ok(_), Err(error)) => return Err(error.into()),
        (Err(error), Ok(())) => return Err(error.into()),
        (Err(error), Err(restore)) => {
            tracing::error!(
                error = %restore,
                "Failed to restore chart values after packaging failed"
            );
            return Err(error.into());
        }
    };

    let archive = output
        .stdout
        .lines()
        .find_map(|line| line.trim().strip_prefix(SAVED_PREFIX))
        .map(|path| Utf8PathBuf::from(path.trim()))
        .unwrap_or_else(|| options.archive_path());

    Ok(archive)
}
