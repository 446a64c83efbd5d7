use std::process::ExitCode;

use clap::Parser;

mod cli;
mod commands;
mod config;
mod error;

use cli::{Cli, Commands};
use config::{client_config, load_config, service_config};
use error::{CliResult, to_exit_code};

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize tracing based on verbosity
    let filter = if cli.verbose {
        "perimeter=debug,perimeter_cli=debug"
    } else {
        "perimeter=info,perimeter_cli=info"
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .init();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("error: failed to start async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    let result = runtime.block_on(async_main(cli));
    to_exit_code(result)
}

async fn async_main(cli: Cli) -> CliResult<()> {
    let file_config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Service(args) => {
            let config = service_config(&file_config, &args)?;
            commands::service::execute(args, config).await
        }
        Commands::Client(args) => {
            let config = client_config(&file_config, &args.common)?;
            commands::client::execute(args, config).await
        }
    }
}
