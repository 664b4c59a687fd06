//! `remote-cache` binary: upload, download or delete a build cache

use clap::Parser;
use remote_cache::cli::Cli;
use remote_cache::settings::Settings;
use remote_cache::{error_annotation, logging};
use std::process::ExitCode;
use tracing::error;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let settings = match Settings::resolve(&cli) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            println!("{}", error_annotation(&format!("{:#}", e)));
            return ExitCode::FAILURE;
        }
    };

    let _log_guard = match logging::init(&settings.logging) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            println!("{}", error_annotation(&format!("{:#}", e)));
            return ExitCode::FAILURE;
        }
    };

    match remote_cache::run(&settings).await {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            println!("{}", error_annotation(&format!("{:#}", e)));
            ExitCode::FAILURE
        }
    }
}
