mod cli;
mod commands;

use clap::Parser;
use cli::{Cli, Commands};
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let global = cli.global;

    match cli.command {
        Commands::Init(args) => commands::init::run_init(&global, args)?,
        Commands::Whoami(args) => commands::whoami::run_whoami(&global, args)?,
        Commands::Lookup(args) => commands::lookup::run_lookup(&global, args)?,
        Commands::Seal(args) => commands::seal::run_seal(&global, args)?,
        Commands::Open(args) => commands::open::run_open(&global, args)?,
        Commands::Backup(args) => commands::backup::run_backup(&global, args)?,
        Commands::Restore(args) => commands::backup::run_restore(&global, args)?,
    }

    Ok(())
}
