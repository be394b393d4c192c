//! Chart values merging.
//!
//! Values supplied with `--embed-values` are merged over the chart's own
//! `values.yaml` before packaging, so the packaged chart carries them as its
//! defaults. The file is rewritten only for the duration of packaging; see
//! [`ValuesOverride`].

use camino::{Utf8Path, Utf8PathBuf};
use serde_yaml::{Mapping, Value};

/// Name of the values file inside a chart directory.
pub const VALUES_FILE: &str = "values.yaml";

/// A values document could not be used.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    /// The document is not valid YAML.
    #[error("unmarshal values from {document}")]
    Yaml {
        /// Which document failed
        document: &'static str,
        /// Underlying YAML error
        #[source]
        source: serde_yaml::Error,
    },

    /// The document is not UTF-8 text.
    #[error("values from {document} are not valid UTF-8")]
    Encoding {
        /// Which document failed
        document: &'static str,
        /// Underlying decoding error
        #[source]
        source: std::str::Utf8Error,
    },

    /// The document is valid YAML but not a mapping.
    #[error("values from {document} must be a YAML object, found {found}")]
    NotAMapping {
        /// Which document failed
        document: &'static str,
        /// The kind of value found instead
        found: &'static str,
    },
}

/// The values file could not be overridden or restored.
#[derive(Debug, thiserror::Error)]
pub enum ValuesError {
    /// Reading the original values file failed.
    #[error("reading {path}")]
    Read {
        /// Path to the values file
        path: Utf8PathBuf,
        /// Underlying IO error
        #[source]
        source: std::io::Error,
    },

    /// Writing the merged (or restored) values file failed.
    #[error("writing {path}")]
    Write {
        /// Path to the values file
        path: Utf8PathBuf,
        /// Underlying IO error
        #[source]
        source: std::io::Error,
    },

    /// One of the documents is malformed.
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// The merged document could not be serialized.
    #[error("marshalling merged chart values")]
    Serialize(#[source] serde_yaml::Error),
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Sequence(_) => "a list",
        Value::Mapping(_) => "an object",
        Value::Tagged(_) => "a tagged value",
    }
}

/// Merge `overrides` into `base`.
///
/// Mappings are merged key by key, recursively. Any other value in
/// `overrides`, lists included, replaces the value in `base` wholesale.
pub fn merge(base: Value, overrides: Value) -> Value {
    match (base, overrides) {
        (Value::Mapping(base), Value::Mapping(overrides)) => {
            Value::Mapping(merge_maps(base, overrides))
        }
        (_, overrides) => overrides,
    }
}

fn merge_maps(mut base: Mapping, overrides: Mapping) -> Mapping {
    for (key, value) in overrides {
        match base.get_mut(&key) {
            Some(existing) => {
                let current = std::mem::take(existing);
                *existing = merge(current, value);
            }
            None => {
                base.insert(key, value);
            }
        }
    }
    base
}

fn parse_document(document: &'static str, text: &str) -> Result<Mapping, ParseError> {
    if text.trim().is_empty() {
        return Ok(Mapping::new());
    }

    let value: Value =
        serde_yaml::from_str(text).map_err(|source| ParseError::Yaml { document, source })?;

    match value {
        Value::Null => Ok(Mapping::new()),
        Value::Mapping(mapping) => Ok(mapping),
        other => Err(ParseError::NotAMapping {
            document,
            found: kind(&other),
        }),
    }
}

/// Parse two values documents and merge the second over the first.
///
/// An empty document counts as an empty mapping.
pub fn merge_documents(base: &str, overrides: &str) -> Result<Value, ParseError> {
    let base = parse_document(VALUES_FILE, base)?;
    let overrides = parse_document("action input", overrides)?;
    Ok(Value::Mapping(merge_maps(base, overrides)))
}

/// A chart's `values.yaml`, temporarily replaced by merged values.
///
/// The original bytes are written back by [`ValuesOverride::restore`], or
/// when the guard is dropped, whichever comes first.
#[derive(Debug)]
#[must_use = "the values file is restored as soon as the override is dropped"]
pub struct ValuesOverride {
    path: Utf8PathBuf,
    original: Vec<u8>,
    restored: bool,
}

impl ValuesOverride {
    /// Merge `overrides` over `<chart_dir>/values.yaml` and write the result in
    /// place.
    ///
    /// Nothing is written when reading or merging fails.
    #[tracing::instrument(level = "debug", skip(overrides))]
    pub fn apply(chart_dir: &Utf8Path, overrides: &str) -> Result<Self, ValuesError> {
        let path = chart_dir.join(VALUES_FILE);
        let original = std::fs::read(&path).map_err(|source| ValuesError::Read {
            path: path.clone(),
            source,
        })?;

        let base = std::str::from_utf8(&original).map_err(|source| ParseError::Encoding {
            document: VALUES_FILE,
            source,
        })?;
        let merged = merge_documents(base, overrides)?;
        let contents = serde_yaml::to_string(&merged).map_err(ValuesError::Serialize)?;

        write_values(&path, contents.as_bytes())?;
        tracing::debug!(%path, "Wrote merged chart values");

        Ok(Self {
            path,
            original,
            restored: false,
        })
    }

    /// Path of the overridden file.
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Put the original file contents back.
    pub fn restore(mut self) -> Result<(), ValuesError> {
        self.restored = true;
        write_values(&self.path, &self.original)?;
        tracing::debug!(path = %self.path, "Restored chart values");
        Ok(())
    }
}

impl Drop for ValuesOverride {
    fn drop(&mut self) {
        if self.restored {
            return;
        }

        match write_values(&self.path, &self.original) {
            Ok(()) => tracing::debug!(path = %self.path, "Restored chart values"),
            Err(error) => {
                tracing::error!(path = %self.path, %error, "Failed to restore chart values")
            }
        }
    }
}

fn write_values(path: &Utf8Path, contents: &[u8]) -> Result<(), ValuesError> {
    std::fs::write(path, contents).map_err(|source| ValuesError::Write {
        path: path.to_owned(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn yaml(text: &str) -> Value {
        serde_yaml::from_str(text).unwrap()
    }

    #[test]
    fn empty_override_is_identity() {
        let base = yaml("a:\n  x: 1\n  y: [1, 2]\nname: chart\n");
        assert_eq!(merge(base.clone(), yaml("{}")), base);
    }

    #[test]
    fn nested_maps_merge_and_lists_replace() {
        let merged = merge(yaml("{a: {x: 1, y: 2}, l: [1, 2]}"), yaml("{a: {y: 3}, l: [9]}"));
        assert_eq!(merged, yaml("{a: {x: 1, y: 3}, l: [9]}"));
    }

    #[test]
    fn scalars_and_type_changes_are_overridden() {
        let merged = merge(
            yaml("{image: {tag: old}, replicas: 1, debug: {level: 2}}"),
            yaml("{image: {tag: new}, replicas: 3, debug: false, extra: yes}"),
        );
        assert_eq!(
            merged,
            yaml("{image: {tag: new}, replicas: 3, debug: false, extra: yes}")
        );
    }

    #[test]
    fn documents_must_be_mappings() {
        let merged = merge_documents("", "replicas: 2").unwrap();
        assert_eq!(merged, yaml("replicas: 2"));

        let err = merge_documents("replicas: 1", "- a\n- b\n").unwrap_err();
        assert!(matches!(err, ParseError::NotAMapping { found: "a list", .. }));

        let err = merge_documents("replicas: 1", "replicas: [").unwrap_err();
        assert!(matches!(err, ParseError::Yaml { .. }));
    }

    fn chart_dir(values: &str) -> (tempfile::TempDir, Utf8PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::try_from(dir.path().to_owned()).unwrap();
        std::fs::write(path.join(VALUES_FILE), values).unwrap();
        (dir, path)
    }

    #[test]
    fn override_restores_on_drop() {
        let original = "# defaults\nreplicas: 1\n";
        let (_dir, path) = chart_dir(original);

        {
            let guard = ValuesOverride::apply(&path, "replicas: 3").unwrap();
            let merged = std::fs::read_to_string(guard.path()).unwrap();
            assert_eq!(yaml(&merged), yaml("replicas: 3"));
        }

        assert_eq!(std::fs::read_to_string(path.join(VALUES_FILE)).unwrap(), original);
    }

    #[test]
    fn override_restores_explicitly() {
        let original = "replicas: 1\n";
        let (_dir, path) = chart_dir(original);

        let guard = ValuesOverride::apply(&path, "image: {tag: v2}").unwrap();
        guard.restore().unwrap();

        assert_eq!(std::fs::read_to_string(path.join(VALUES_FILE)).unwrap(), original);
    }

    #[test]
    fn malformed_override_leaves_file_untouched() {
        let original = "replicas: 1\n";
        let (_dir, path) = chart_dir(original);

        let err = ValuesOverride::apply(&path, "{{nope").unwrap_err();
        assert!(matches!(err, ValuesError::Parse(_)));
        assert_eq!(std::fs::read_to_string(path.join(VALUES_FILE)).unwrap(), original);
    }

    #[test]
    fn non_utf8_values_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::try_from(dir.path().to_owned()).unwrap();
        let original = b"name: \"caf\xff\"\n".to_vec();
        std::fs::write(path.join(VALUES_FILE), &original).unwrap();

        let err = ValuesOverride::apply(&path, "replicas: 2").unwrap_err();
        assert!(matches!(
            err,
            ValuesError::Parse(ParseError::Encoding {
                document: VALUES_FILE,
                ..
            })
        ));
        assert_eq!(std::fs::read(path.join(VALUES_FILE)).unwrap(), original);
    }

    #[test]
    fn missing_values_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::try_from(dir.path().to_owned()).unwrap();
        let err = ValuesOverride::apply(&path, "a: 1").unwrap_err();
        assert!(matches!(err, ValuesError::Read { .. }));
    }
}
