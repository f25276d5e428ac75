mod cli;
mod commands;
mod config;
mod environment;
mod program;
mod progress;
mod provider;
mod runner;
mod ui;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Cli, Command};
use std::io;
use std::path::PathBuf;

/// Global context for the application
pub struct Context {
    pub verbose: u8,
    pub quiet: bool,
    /// Resolved path of nuage.toml
    pub config: PathBuf,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    let log_level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    env_logger::Builder::new()
        .filter_level(if cli.quiet {
            log::LevelFilter::Error
        } else {
            log_level
        })
        .format_timestamp(None)
        .init();

    let ctx = Context {
        verbose: cli.verbose,
        quiet: cli.quiet,
        config: config::config_path(cli.config.as_deref()),
    };
    log::debug!("Using config {}", ctx.config.display());

    match cli.command {
        Command::Up(args) => commands::stack::up(&ctx, &args),
        Command::Preview { diff } => commands::stack::preview(&ctx, diff),
        Command::Destroy(args) => commands::stack::destroy(&ctx, &args),
        Command::Outputs => commands::stack::outputs(&ctx),
        Command::Graph => commands::stack::graph(&ctx),
        Command::Install {
            manager,
            filesystem_id,
        } => commands::install::run(&ctx, manager, &filesystem_id),
        Command::Completions { shell } => {
            generate(shell, &mut Cli::command(), "nuage", &mut io::stdout());
            Ok(())
        }
    }
}
