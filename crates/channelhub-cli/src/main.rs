use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;
mod common;

#[derive(Parser)]
#[command(name = "channelhub-cli", version, about = "Channelhub CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connected channel management
    Integration {
        #[command(subcommand)]
        action: commands::integration::IntegrationAction,
    },
    /// Token refresh sweep
    Refresh {
        #[command(subcommand)]
        action: commands::refresh::RefreshAction,
    },
    /// Channel analytics
    Analytics {
        #[command(subcommand)]
        action: commands::analytics::AnalyticsAction,
    },
    /// Plug activation and execution
    Plug {
        #[command(subcommand)]
        action: commands::plug::PlugAction,
    },
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: commands::config::ConfigAction,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Integration { action } => commands::integration::run(action).await,
        Commands::Refresh { action } => commands::refresh::run(action).await,
        Commands::Analytics { action } => commands::analytics::run(action).await,
        Commands::Plug { action } => commands::plug::run(action).await,
        Commands::Config { action } => commands::config::run(action),
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
