use bytes::Bytes;

use crate::error::GetterError;
use crate::getter::Getter;

const NAME: &str = "file";

/// Reads files from the local filesystem.
///
/// Accepts `file://` URIs as well as bare paths.
#[derive(Debug, Clone, Default)]
pub struct FileGetter;

impl FileGetter {
    /// Create a new file getter.
    pub fn new() -> Self {
        FileGetter
    }
}

#[async_trait::async_trait]
impl Getter for FileGetter {
    fn name(&self) -> &'static str {
        NAME
    }

    fn schemes(&self) -> &[&'static str] {
        &["file"]
    }

    #[tracing::instrument(level = "trace", skip(self))]
    async fn get(&self, uri: &str) -> Result<Bytes, GetterError> {
        let path = uri.strip_prefix("file://").unwrap_or(uri);
        let contents = tokio::fs::read(path)
            .await
            .map_err(|error| GetterError::io(NAME, error).set_uri(uri))?;
        Ok(Bytes::from(contents))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use super::*;
    use crate::error::GetterErrorKind;

    #[tokio::test]
    async fn read_file_uri() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"apiVersion: v2\n").unwrap();

        let uri = format!("file://{}", file.path().display());
        let body = FileGetter::new().get(&uri).await.unwrap();
        assert_eq!(body, Bytes::from_static(b"apiVersion: v2\n"));
    }

    #[tokio::test]
    async fn missing_file() {
        let err = FileGetter::new()
            .get("file:///nonexistent/chart.tgz")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), GetterErrorKind::NotFound);
        assert_eq!(err.uri(), Some("file:///nonexistent/chart.tgz"));
    }
}
