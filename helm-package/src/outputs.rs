//! Action outputs.
//!
//! Each output is a file named after it in the directory given by
//! `CLOUDBEES_OUTPUTS`.

use camino::{Utf8Path, Utf8PathBuf};

/// File mode of output files.
#[cfg(unix)]
const OUTPUT_MODE: u32 = 0o640;

/// The outputs of a successful packaging run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionOutputs {
    /// Chart name.
    pub name: String,

    /// Packaged chart version.
    pub version: String,

    /// Directory the archive was written to.
    pub directory: Utf8PathBuf,
}

impl ActionOutputs {
    /// Path of the packaged archive.
    pub fn chart(&self) -> Utf8PathBuf {
        self.directory.join(format!("{}-{}.tgz", self.name, self.version))
    }

    /// Write every output into `output_dir`.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn write(&self, output_dir: &Utf8Path) -> std::io::Result<()> {
        let chart = self.chart();
        let outputs = [
            ("name", self.name.as_str()),
            ("version", self.version.as_str()),
            ("directory", self.directory.as_str()),
            ("chart", chart.as_str()),
        ];

        for (name, value) in outputs {
            write_output(&output_dir.join(name), value).await?;
        }

        Ok(())
    }
}

async fn write_output(path: &Utf8Path, value: &str) -> std::io::Result<()> {
    use tokio::io::AsyncWriteExt as _;

    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(OUTPUT_MODE);

    let mut file = options.open(path).await?;
    file.write_all(value.as_bytes()).await?;
    file.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let output_dir = Utf8Path::from_path(dir.path()).unwrap();

        let outputs = ActionOutputs {
            name: "web".into(),
            version: "1.2.3".into(),
            directory: "/tmp/chart-abc".into(),
        };
        outputs.write(output_dir).await.unwrap();

        let read = |name: &str| std::fs::read_to_string(output_dir.join(name)).unwrap();
        assert_eq!(read("name"), "web");
        assert_eq!(read("version"), "1.2.3");
        assert_eq!(read("directory"), "/tmp/chart-abc");
        assert_eq!(read("chart"), "/tmp/chart-abc/web-1.2.3.tgz");

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt as _;
            let mode = std::fs::metadata(output_dir.join("chart")).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, OUTPUT_MODE & !umask());
        }
    }

    #[cfg(unix)]
    fn umask() -> u32 {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("created");
        std::fs::OpenOptions::new().write(true).create(true).open(&path).unwrap();
        use std::os::unix::fs::PermissionsExt as _;
        0o666 & !std::fs::metadata(&path).unwrap().permissions().mode()
    }
}
