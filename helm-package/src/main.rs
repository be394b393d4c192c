use std::process::ExitCode;

use clap::Parser as _;
use helm_package::cli::{self, Cli};
use helm_package::settings::Environment;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;
use tracing_subscriber::EnvFilter;

fn init_tracing(debug: bool) {
    let level = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(tracing_error::ErrorLayer::default())
        .init();
}

fn main() -> ExitCode {
    let env = Environment::from_process();
    if let Err(error) = cli::check_environment(&env) {
        eprintln!("cbhelmpkg: {error}");
        return ExitCode::FAILURE;
    }

    let cli = Cli::parse();
    init_tracing(cli.debug);

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(error) => {
            eprintln!("cbhelmpkg: starting runtime: {error}");
            return ExitCode::FAILURE;
        }
    };

    let mut stdout = std::io::stdout();
    match runtime.block_on(helm_package::run(cli, &env, &mut stdout)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(report) => {
            eprintln!("cbhelmpkg: {report:#}");
            ExitCode::FAILURE
        }
    }
}
