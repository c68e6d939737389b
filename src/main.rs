mod cli;
mod commands;
mod engine;
mod lock;
mod paths;
mod progress;
mod resource;
mod runner;
mod schema;
mod signals;
mod state;
mod ui;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Cli, Command};
use declarative::Verdict;
use std::io;
use std::path::PathBuf;

/// Global context for the application
pub struct Context {
    pub verbose: u8,
    pub quiet: bool,
    pub config: Option<PathBuf>,
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
        config: cli.config,
    };

    match cli.command {
        Command::Apply(args) => {
            let verdict = commands::apply::run(&ctx, args)?;
            if signals::interrupted() {
                std::process::exit(130);
            }
            if verdict == Verdict::NeedsAttention {
                std::process::exit(1);
            }
            Ok(())
        }
        Command::Plan(args) => commands::plan::run(&ctx, args),
        Command::Validate => commands::validate::run(&ctx),
        Command::Secrets { show } => commands::secrets::run(&ctx, show),
        Command::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "vpsctl", &mut io::stdout());
            Ok(())
        }
    }
}
