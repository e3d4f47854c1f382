#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::cast_possible_truncation)]

mod commands;
mod logging;

use clap::Parser;
use miette::Result;
use std::path::PathBuf;
use umi_core::{Config, Env};

#[derive(Parser, Debug)]
#[command(name = "umi")]
#[command(author, version, about = "umi server-side rendering build and dev server", long_about = None)]
struct Cli {
    /// Increase logging verbosity (-v for DEBUG, -vv for TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit JSON formatted output (stable, machine-readable)
    #[arg(long, global = true)]
    json: bool,

    /// Override the working directory
    #[arg(long, global = true, value_name = "PATH")]
    cwd: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Print version information
    Version,

    /// Start the dev server with server-side rendering
    Dev {
        /// Port to listen on
        #[arg(long, default_value_t = 8000)]
        port: u16,

        /// Host to bind to
        #[arg(long, default_value = "localhost")]
        host: String,
    },

    /// Build the server render module after a production client build
    Build {
        /// Shell command running the client build first; a failure skips the server build
        #[arg(long, value_name = "CMD")]
        client_cmd: Option<String>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Determine working directory
    let cwd = cli
        .cwd
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."));

    if matches!(cli.command, Commands::Version) {
        return commands::version::run(cli.json);
    }

    logging::init(cli.verbose, cli.json);

    match cli.command {
        Commands::Version => Ok(()),
        Commands::Dev { port, host } => {
            let config = Config::new(cwd)
                .with_verbosity(cli.verbose)
                .with_json_logs(cli.json)
                .with_env(Env::Development);
            let _span = tracing::info_span!("dev", port).entered();
            let action = commands::dev::DevAction { config, port, host };
            let rt = tokio::runtime::Runtime::new().map_err(|e| miette::miette!("{e}"))?;
            rt.block_on(commands::dev::run(action))
        }
        Commands::Build { client_cmd } => {
            let config = Config::new(cwd)
                .with_verbosity(cli.verbose)
                .with_json_logs(cli.json)
                .with_env(Env::Production);
            let _span = tracing::info_span!("build").entered();
            let action = commands::build::BuildAction { config, client_cmd };
            let rt = tokio::runtime::Runtime::new().map_err(|e| miette::miette!("{e}"))?;
            rt.block_on(commands::build::run(action))
        }
    }
}
