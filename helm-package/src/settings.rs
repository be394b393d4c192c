//! Process environment and Helm's file locations.

use std::collections::BTreeMap;

use camino::{Utf8Path, Utf8PathBuf};

/// A snapshot of the environment variables the packager reads.
#[derive(Debug, Clone, Default)]
pub struct Environment {
    vars: BTreeMap<String, String>,
}

impl Environment {
    /// Capture the current process environment.
    ///
    /// Variables whose name or value is not UTF-8 are skipped.
    pub fn from_process() -> Self {
        std::env::vars_os()
            .filter_map(|(key, value)| Some((key.into_string().ok()?, value.into_string().ok()?)))
            .collect()
    }

    /// The value of a variable, when it is set and non-empty.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars
            .get(key)
            .map(String::as_str)
            .filter(|value| !value.is_empty())
    }

    /// Names of all variables starting with `prefix`.
    pub fn names_with_prefix<'e>(&'e self, prefix: &'e str) -> impl Iterator<Item = &'e str> + 'e {
        self.vars
            .keys()
            .map(String::as_str)
            .filter(move |name| name.starts_with(prefix))
    }
}

impl<K, V> FromIterator<(K, V)> for Environment
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self {
            vars: iter
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        }
    }
}

/// Where Helm keeps its configuration, and which binary to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// The `helm` executable.
    pub helm_bin: Utf8PathBuf,

    /// Helm's repository list (`repositories.yaml`).
    pub repository_config: Utf8PathBuf,

    /// Helm's registry login file (docker `config.json` format).
    pub registry_credentials: Utf8PathBuf,

    /// The keyring used when neither `--keyring` nor its variable is set.
    pub default_keyring: Utf8PathBuf,
}

fn path_from(path: std::path::PathBuf) -> Option<Utf8PathBuf> {
    Utf8PathBuf::from_path_buf(path).ok()
}

impl Settings {
    /// Resolve settings the way Helm does: explicit `HELM_*` variables first,
    /// then the XDG configuration directory.
    pub fn from_env(env: &Environment) -> Self {
        let config_home = env
            .get("HELM_CONFIG_HOME")
            .map(Utf8PathBuf::from)
            .or_else(|| env.get("XDG_CONFIG_HOME").map(|dir| Utf8Path::new(dir).join("helm")))
            .or_else(|| dirs::config_dir().and_then(path_from).map(|dir| dir.join("helm")))
            .unwrap_or_else(|| Utf8PathBuf::from(".config/helm"));

        let repository_config = env
            .get("HELM_REPOSITORY_CONFIG")
            .map(Utf8PathBuf::from)
            .unwrap_or_else(|| config_home.join("repositories.yaml"));

        let registry_credentials = env
            .get("HELM_REGISTRY_CONFIG")
            .map(Utf8PathBuf::from)
            .unwrap_or_else(|| config_home.join("registry").join("config.json"));

        Self {
            helm_bin: env.get("HELM_BIN").unwrap_or("helm").into(),
            repository_config,
            registry_credentials,
            default_keyring: default_keyring(env),
        }
    }
}

fn default_keyring(env: &Environment) -> Utf8PathBuf {
    if let Some(home) = env.get("GNUPGHOME") {
        return Utf8Path::new(home).join("pubring.gpg");
    }

    let home = env
        .get("HOME")
        .map(Utf8PathBuf::from)
        .or_else(|| dirs::home_dir().and_then(path_from))
        .unwrap_or_default();
    home.join(".gnupg").join("pubring.gpg")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_helm_locations() {
        let env: Environment = [
            ("HELM_CONFIG_HOME", "/etc/helm"),
            ("HELM_REGISTRY_CONFIG", "/run/secrets/registry.json"),
            ("HELM_BIN", "/opt/helm/bin/helm"),
            ("GNUPGHOME", "/keys"),
        ]
        .into_iter()
        .collect();

        let settings = Settings::from_env(&env);
        assert_eq!(settings.helm_bin, "/opt/helm/bin/helm");
        assert_eq!(settings.repository_config, "/etc/helm/repositories.yaml");
        assert_eq!(settings.registry_credentials, "/run/secrets/registry.json");
        assert_eq!(settings.default_keyring, "/keys/pubring.gpg");
    }

    #[test]
    fn xdg_fallbacks() {
        let env: Environment = [("XDG_CONFIG_HOME", "/home/ci/.config"), ("HOME", "/home/ci")]
            .into_iter()
            .collect();

        let settings = Settings::from_env(&env);
        assert_eq!(settings.helm_bin, "helm");
        assert_eq!(settings.repository_config, "/home/ci/.config/helm/repositories.yaml");
        assert_eq!(
            settings.registry_credentials,
            "/home/ci/.config/helm/registry/config.json"
        );
        assert_eq!(settings.default_keyring, "/home/ci/.gnupg/pubring.gpg");
    }

    #[test]
    fn empty_values_are_unset() {
        let env: Environment = [("HELM_BIN", ""), ("CBHELMPKG_DEBUG", "true")]
            .into_iter()
            .collect();

        assert_eq!(env.get("HELM_BIN"), None);
        assert_eq!(
            env.names_with_prefix("CBHELMPKG_").collect::<Vec<_>>(),
            vec!["CBHELMPKG_DEBUG"]
        );
    }
}
