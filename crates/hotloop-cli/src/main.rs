//! hotloop command-line driver
//!
//! Runs the sample bytecode programs under a chosen OSR configuration and
//! reports the result together with the OSR statistics of the run.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;
mod output;

#[derive(Parser)]
#[command(name = "hotloop")]
#[command(about = "On-stack replacement playground", long_about = None)]
#[command(version)]
struct Cli {
    /// When to use colors: auto, always, never
    #[arg(long, global = true)]
    color: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a sample program
    Run {
        /// Program name (triple, multiply)
        program: String,
        /// Integer arguments for the program
        #[arg(allow_negative_numbers = true)]
        args: Vec<String>,
        /// TOML file with an [osr] table
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Override an option, e.g. -O osr-compilation-threshold=1000
        #[arg(short = 'O', long = "option", value_name = "NAME=VALUE")]
        options: Vec<String>,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// List recognized options and their defaults
    Options {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let color = output::resolve_color_choice(cli.color.as_deref());

    match cli.command {
        Commands::Run {
            program,
            args,
            config,
            options,
            json,
        } => commands::run::execute(
            commands::run::RunArgs {
                program,
                args,
                config,
                options,
                json,
            },
            color,
        ),

        Commands::Options { json } => commands::options::execute(json, color),
    }
}
