//! Command line interface.
//!
//! Every flag can also be set with an environment variable named
//! `CBHELMPKG_<FLAG>`, the flag name upper-cased with dashes replaced by
//! underscores. Setting any other `CBHELMPKG_` variable is an error.

use camino::Utf8PathBuf;
use clap::builder::BoolishValueParser;
use clap::{CommandFactory, Parser};

use crate::settings::Environment;

/// Prefix of the environment variables bound to flags.
pub const ENV_PREFIX: &str = "CBHELMPKG_";

/// Package a given chart.
#[derive(Debug, Clone, Parser)]
#[command(name = "cbhelmpkg", about = "Package a given chart", disable_version_flag = true)]
pub struct Cli {
    /// Path to the chart directory.
    #[arg(value_name = "CHARTPATH")]
    pub chart_path: Utf8PathBuf,

    /// Enables debug logs.
    #[arg(long, env = "CBHELMPKG_DEBUG", value_parser = BoolishValueParser::new())]
    pub debug: bool,

    /// Verify the packages against signatures.
    #[arg(long, env = "CBHELMPKG_VERIFY", value_parser = BoolishValueParser::new())]
    pub verify: bool,

    /// Use a PGP private key to sign this package.
    #[arg(long, env = "CBHELMPKG_SIGN", value_parser = BoolishValueParser::new())]
    pub sign: bool,

    /// Name of the key to use when signing. Used if --sign is true.
    #[arg(long, env = "CBHELMPKG_KEY")]
    pub key: Option<String>,

    /// Location of a public keyring.
    #[arg(long, env = "CBHELMPKG_KEYRING")]
    pub keyring: Option<Utf8PathBuf>,

    /// Location of a file which contains the passphrase for the signing key.
    /// Use "-" in order to read from stdin.
    #[arg(long, env = "CBHELMPKG_PASSPHRASE_FILE")]
    pub passphrase_file: Option<String>,

    /// Set the version on the chart to this semver version.
    #[arg(long, env = "CBHELMPKG_VERSION")]
    pub version: Option<String>,

    /// Set the appVersion on the chart to this version.
    #[arg(long, env = "CBHELMPKG_APP_VERSION")]
    pub app_version: Option<String>,

    /// Location to write the chart.
    #[arg(long, env = "CBHELMPKG_DESTINATION")]
    pub destination: Option<Utf8PathBuf>,

    /// YAML object with custom chart values that should take precedence over
    /// the ones within the values.yaml.
    #[arg(long, env = "CBHELMPKG_EMBED_VALUES")]
    pub embed_values: Option<String>,

    /// Path to the CloudBees OCI registry configuration file.
    #[arg(long, env = "CBHELMPKG_REGISTRY_CONFIG")]
    pub registry_config: Option<Utf8PathBuf>,
}

/// A `CBHELMPKG_` variable does not correspond to any flag.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported environment variable provided: {0}")]
pub struct UnsupportedVariable(pub String);

/// The environment variable bound to a flag.
pub fn env_var_name(flag: &str) -> String {
    let mut name = String::with_capacity(ENV_PREFIX.len() + flag.len());
    name.push_str(ENV_PREFIX);

    let mut separated = false;
    for c in flag.chars() {
        if c.is_ascii_alphanumeric() {
            name.push(c.to_ascii_uppercase());
            separated = false;
        } else if !separated {
            name.push('_');
            separated = true;
        }
    }
    name
}

/// Reject `CBHELMPKG_` variables that no flag reads.
pub fn check_environment(env: &Environment) -> Result<(), UnsupportedVariable> {
    let command = Cli::command();
    let supported: Vec<String> = command
        .get_arguments()
        .filter_map(|arg| arg.get_env())
        .filter_map(|name| name.to_str())
        .map(str::to_owned)
        .collect();

    match env
        .names_with_prefix(ENV_PREFIX)
        .find(|name| !supported.iter().any(|supported| supported == name))
    {
        Some(name) => Err(UnsupportedVariable(name.to_owned())),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_command() {
        Cli::command().debug_assert();
    }

    #[test]
    fn env_names_follow_flags() {
        let command = Cli::command();
        let mut bound = 0;
        for arg in command.get_arguments() {
            let (Some(long), Some(env)) = (arg.get_long(), arg.get_env()) else {
                continue;
            };
            assert_eq!(env.to_str(), Some(env_var_name(long).as_str()), "flag --{long}");
            bound += 1;
        }
        assert_eq!(bound, 11);

        assert_eq!(env_var_name("passphrase-file"), "CBHELMPKG_PASSPHRASE_FILE");
    }

    #[test]
    fn parse_flags() {
        let cli = Cli::try_parse_from([
            "cbhelmpkg",
            "charts/web",
            "--version",
            "1.2.3",
            "--embed-values",
            "replicas: 2",
            "--sign",
            "--key",
            "ci",
        ])
        .unwrap();

        assert_eq!(cli.chart_path, "charts/web");
        assert_eq!(cli.version.as_deref(), Some("1.2.3"));
        assert_eq!(cli.embed_values.as_deref(), Some("replicas: 2"));
        assert!(cli.sign);
        assert!(!cli.verify);
        assert_eq!(cli.key.as_deref(), Some("ci"));
    }

    #[test]
    fn chart_path_is_required() {
        assert!(Cli::try_parse_from(["cbhelmpkg"]).is_err());
        assert!(Cli::try_parse_from(["cbhelmpkg", "a", "b"]).is_err());
    }

    #[test]
    fn unsupported_variables_are_rejected() {
        let env: Environment = [
            ("CBHELMPKG_VERSION", "1.0.0"),
            ("CBHELMPKG_EMBED_VALUES", "a: 1"),
            ("PATH", "/usr/bin"),
        ]
        .into_iter()
        .collect();
        assert!(check_environment(&env).is_ok());

        let env: Environment = [("CBHELMPKG_VERSION", "1.0.0"), ("CBHELMPKG_CHART", "x")]
            .into_iter()
            .collect();
        assert_eq!(
            check_environment(&env).unwrap_err().to_string(),
            "unsupported environment variable provided: CBHELMPKG_CHART"
        );
    }
}
