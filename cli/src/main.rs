mod cli;
mod commands;

use cli::{Cli, Commands};
use commands::{export_csv, import_csv, merge, preload};
use tracing_subscriber::EnvFilter;

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_writer(std::io::stderr)
        .init();
}

pub fn run() -> anyhow::Result<()> {
    use clap::Parser;

    let cli = Cli::parse();
    init_logging(cli.verbose);

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async {
        match &cli.command {
            Commands::Merge(args) => merge::run(&cli, args).await,
            Commands::ExportCsv(args) => export_csv::run(&cli, args).await,
            Commands::ImportCsv(args) => import_csv::run(&cli, args).await,
            Commands::Preload(args) => preload::run(&cli, args).await,
        }
    })
}

fn main() -> anyhow::Result<()> { run() }
