use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use pixelshare::cli::Cli;

fn main() -> ExitCode {
    init_logging();
    let cli = Cli::parse();

    match pixelshare::run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:?}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("pixelshare=warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
