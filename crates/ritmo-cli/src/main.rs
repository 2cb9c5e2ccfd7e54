//! Ritmo CLI - Command-line interface for the ritmo audio engine.

mod commands;
mod project;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ritmo")]
#[command(author, version, about = "Ritmo audio engine CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render a project to a WAV file
    Export(commands::export::ExportArgs),

    /// Play a project live
    Play(commands::play::PlayArgs),

    /// List and inspect audio devices
    Devices(commands::devices::DevicesArgs),

    /// Apply an offline audio function to a WAV file
    Function(commands::function::FunctionArgs),
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Export(args) => commands::export::run(args),
        Commands::Play(args) => commands::play::run(args),
        Commands::Devices(args) => commands::devices::run(args),
        Commands::Function(args) => commands::function::run(args),
    }
}
