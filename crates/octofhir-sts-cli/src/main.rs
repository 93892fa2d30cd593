mod cli;
mod commands;
mod observability;
mod output;

use anyhow::Result;
use clap::Parser;

use cli::{Cli, Commands};
use output::print_error;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        print_error(&format!("{e:#}"));
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    observability::init_tracing_with_level(&cli.log_level);

    let config = commands::load_config(&cli.config)?;
    match &cli.command {
        Commands::Token(args) => commands::token(&config, args).await?,
        Commands::Launch(args) => commands::launch(&config, args).await?,
        Commands::CheckConfig => commands::check_config(&config)?,
    }

    Ok(())
}
