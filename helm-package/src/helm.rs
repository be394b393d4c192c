//! Running the `helm` executable.

use std::ffi::OsStr;
use std::process::ExitStatus;

use camino::{Utf8Path, Utf8PathBuf};

/// A `helm` invocation failed.
#[derive(Debug, thiserror::Error)]
pub enum HelmError {
    /// The executable could not be started.
    #[error("running {bin}")]
    Spawn {
        /// The executable
        bin: Utf8PathBuf,
        /// Underlying IO error
        #[source]
        source: std::io::Error,
    },

    /// The command exited unsuccessfully.
    #[error("helm {command} exited with {status}: {stderr}")]
    Failed {
        /// The helm subcommand
        command: String,
        /// Exit status
        status: ExitStatus,
        /// Captured standard error
        stderr: String,
    },
}

/// Output of a successful invocation.
#[derive(Debug, Clone)]
pub struct HelmOutput {
    /// Captured standard output.
    pub stdout: String,
}

/// Run `helm <args>`, capturing its output.
#[tracing::instrument(level = "debug", skip(args))]
pub async fn run<I, S>(bin: &Utf8Path, command: &str, args: I) -> Result<HelmOutput, HelmError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let output = tokio::process::Command::new(bin)
        .arg(command)
        .args(args)
        .stdin(std::process::Stdio::null())
        .output()
        .await
        .map_err(|source| HelmError::Spawn {
            bin: bin.to_owned(),
            source,
        })?;

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_owned();

    for line in stderr.lines() {
        tracing::debug!(target: "helm", "{line}");
    }

    if !output.status.success() {
        return Err(HelmError::Failed {
            command: command.to_owned(),
            status: output.status,
            stderr,
        });
    }

    Ok(HelmOutput { stdout })
}
