//! # Helm chart packaging for CloudBees actions
//!
//! Packages a chart directory with `helm package` after fetching its
//! dependencies. OCI dependencies are pulled through the registry mirror
//! configuration given with `--registry-config`, trying each mirror in turn.
//! Values given with `--embed-values` are merged into the packaged chart's
//! `values.yaml` while the chart directory itself is left unchanged.
//!
//! The run reports its results as action outputs: the chart name, version,
//! destination directory and archive path.

use std::io::Write;
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use chart_getter::{default_client, Credentials, Providers};
use eyre::{eyre, WrapErr as _};
use registry_config::RegistryConfig;

pub mod chart;
pub mod cli;
pub mod constraint;
pub mod dependencies;
pub mod helm;
pub mod outputs;
pub mod package;
pub mod repositories;
pub mod settings;
pub mod values;

use self::chart::ChartMetadata;
use self::cli::Cli;
use self::dependencies::{DependencyManager, Verification};
use self::outputs::ActionOutputs;
use self::package::PackageOptions;
use self::repositories::Repositories;
use self::settings::{Environment, Settings};

/// Directory for action outputs.
pub const OUTPUTS_VAR: &str = "CLOUDBEES_OUTPUTS";

/// Scratch directory provided by the runner.
pub const RUNNER_TEMP_VAR: &str = "RUNNER_TEMP";

/// Chart and app versions to stamp, from flags with chart defaults.
///
/// The app version falls back to `--version`, then the chart's `appVersion`,
/// then the chart's `version`.
pub fn resolve_versions(cli: &Cli, chart: &ChartMetadata) -> (String, String) {
    let flag = |value: &Option<String>| value.clone().filter(|value| !value.is_empty());

    let version = flag(&cli.version).unwrap_or_else(|| chart.version.clone());
    let app_version = flag(&cli.app_version)
        .or_else(|| flag(&cli.version))
        .or_else(|| chart.app_version().map(str::to_owned))
        .unwrap_or_else(|| chart.version.clone());

    (version, app_version)
}

fn providers(
    cli: &Cli,
    settings: &Settings,
    repositories: &Repositories,
) -> eyre::Result<Providers> {
    let config = cli
        .registry_config
        .as_deref()
        .filter(|path| !path.as_str().is_empty())
        .map(RegistryConfig::load)
        .transpose()
        .wrap_err("load registry config")?;

    let mut credentials =
        Credentials::load(&settings.registry_credentials).wrap_err("load registry credentials")?;
    repositories.add_credentials(&mut credentials);

    Providers::with_defaults(default_client(), Arc::new(credentials), config, false)
        .wrap_err("load registry config")
}

fn destination(cli: &Cli, runner_temp: &str) -> eyre::Result<Utf8PathBuf> {
    if let Some(destination) = cli.destination.as_ref().filter(|path| !path.as_str().is_empty()) {
        return Ok(destination.clone());
    }

    let dir = tempfile::Builder::new()
        .prefix("chart-")
        .tempdir_in(runner_temp)
        .wrap_err("create temp chart destination dir")?
        .keep();

    Utf8PathBuf::from_path_buf(dir)
        .map_err(|dir| eyre!("temp chart destination dir {} is not UTF-8", dir.display()))
}

/// Package the chart named on the command line.
///
/// Writes the success message to `out` and the action outputs to
/// `$CLOUDBEES_OUTPUTS`.
#[tracing::instrument(level = "debug", skip_all, fields(chart = %cli.chart_path))]
pub async fn run(cli: Cli, env: &Environment, out: &mut dyn Write) -> eyre::Result<()> {
    let settings = Settings::from_env(env);
    let repositories =
        Repositories::load(&settings.repository_config).wrap_err("load repositories")?;
    let providers = providers(&cli, &settings, &repositories)?;

    let (Some(outputs_dir), Some(runner_temp)) = (env.get(OUTPUTS_VAR), env.get(RUNNER_TEMP_VAR))
    else {
        return Err(eyre!(
            "env vars {OUTPUTS_VAR} and {RUNNER_TEMP_VAR} must be specified - this binary is built to run within a CloudBees Action"
        ));
    };

    let destination = destination(&cli, runner_temp)?;
    let chart_path = Utf8PathBuf::from(cli.chart_path.as_str().trim_end_matches('/'));
    let chart = ChartMetadata::load(&chart_path).wrap_err("load chart")?;
    let (version, app_version) = resolve_versions(&cli, &chart);

    let keyring = cli.keyring.clone().unwrap_or(settings.default_keyring.clone());

    let mut manager = DependencyManager::new(&chart_path, &providers, &repositories);
    if cli.verify {
        manager = manager.verify(Verification {
            helm_bin: settings.helm_bin.clone(),
            keyring: keyring.clone(),
        });
    }
    manager
        .update(&chart.dependencies)
        .await
        .wrap_err("build chart dependencies")?;

    let options = PackageOptions {
        helm_bin: settings.helm_bin.clone(),
        chart_path: chart_path.clone(),
        chart_name: chart.name.clone(),
        destination: destination.clone(),
        version: version.clone(),
        app_version,
        sign: cli.sign,
        key: cli.key.clone(),
        keyring: Some(keyring),
        passphrase_file: cli.passphrase_file.clone(),
        embed_values: cli.embed_values.clone(),
    };
    let archive = package::package_chart(&options).await.wrap_err("helm package")?;

    writeln!(out, "Successfully packaged chart and saved it to: {archive}")?;

    ActionOutputs {
        name: chart.name,
        version,
        directory: destination,
    }
    .write(Utf8Path::new(outputs_dir))
    .await
    .wrap_err("write action output")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::Parser as _;

    use super::*;

    fn chart(app_version: Option<&str>) -> ChartMetadata {
        ChartMetadata {
            api_version: "v2".into(),
            name: "web".into(),
            version: "0.1.0".into(),
            app_version: app_version.map(str::to_owned),
            dependencies: Vec::new(),
        }
    }

    fn cli(args: &[&str]) -> Cli {
        Cli::try_parse_from(["cbhelmpkg", "chart"].iter().chain(args)).unwrap()
    }

    #[test]
    fn version_defaults() {
        assert_eq!(
            resolve_versions(&cli(&[]), &chart(None)),
            ("0.1.0".to_owned(), "0.1.0".to_owned())
        );
        assert_eq!(
            resolve_versions(&cli(&[]), &chart(Some("2.0"))),
            ("0.1.0".to_owned(), "2.0".to_owned())
        );
        assert_eq!(
            resolve_versions(&cli(&["--version", "1.0.0"]), &chart(Some("2.0"))),
            ("1.0.0".to_owned(), "1.0.0".to_owned())
        );
        assert_eq!(
            resolve_versions(&cli(&["--version", "1.0.0", "--app-version", "3.1"]), &chart(None)),
            ("1.0.0".to_owned(), "3.1".to_owned())
        );
        assert_eq!(
            resolve_versions(&cli(&["--app-version", "3.1"]), &chart(Some("2.0"))),
            ("0.1.0".to_owned(), "3.1".to_owned())
        );
    }
}
