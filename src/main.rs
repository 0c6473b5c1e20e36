mod cli;
mod commands;
mod config;
mod progress;
mod ui;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Cli, Command};
use std::io;

/// Global context for the application
pub struct Context {
    pub verbose: u8,
    pub quiet: bool,
    pub yes: bool,
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
        yes: cli.yes,
    };

    match cli.command {
        Command::Inventory { json } => commands::inventory::run(&ctx, &cli.target, json),
        Command::Fact { name, args, list } => match (list, name) {
            (true, _) | (false, None) => {
                commands::fact::list();
                Ok(())
            }
            (false, Some(name)) => commands::fact::run(&ctx, &cli.target, &name, &args),
        },
        Command::Exec {
            command,
            ignore_errors,
        } => commands::exec::run(&ctx, &cli.target, &command.join(" "), ignore_errors),
        Command::Put { src, dest } => commands::put::run(&ctx, &cli.target, &src, &dest),
        Command::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "rollout", &mut io::stdout());
            Ok(())
        }
    }
}
