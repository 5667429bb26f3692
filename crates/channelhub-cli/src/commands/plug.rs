//! Plug commands for CLI.

use clap::Subcommand;
use channelhub_core::plugs::PLUGS_CHANNEL;
use serde_json::json;
use tokio::sync::watch;

use crate::common::{open_engine, CliResult};

#[derive(Subcommand)]
pub enum PlugAction {
    /// List plugs configured on an integration
    List {
        #[arg(long)]
        org: String,
        /// Integration ID
        #[arg(long)]
        integration: String,
    },
    /// Activate a plug and schedule its first run
    Activate {
        #[arg(long)]
        org: String,
        /// Plug ID
        id: String,
    },
    /// Deactivate a plug and drop its pending run
    Deactivate {
        #[arg(long)]
        org: String,
        /// Plug ID
        id: String,
    },
    /// Run every due plug job once
    Tick,
    /// Run the plug worker until interrupted
    Work,
}

pub async fn run(action: PlugAction) -> CliResult {
    let engine = open_engine()?;

    match action {
        PlugAction::List { org, integration } => {
            let plugs = engine.plugs.list_plugs(&org, &integration).await?;
            println!("{}", serde_json::to_string_pretty(&plugs)?);
        }
        PlugAction::Activate { org, id } => {
            let plug = engine.plugs.change_activation(&org, &id, true).await?;
            println!("activated {} ({})", plug.id, plug.method_name);
        }
        PlugAction::Deactivate { org, id } => {
            let plug = engine.plugs.change_activation(&org, &id, false).await?;
            println!("deactivated {} ({})", plug.id, plug.method_name);
        }
        PlugAction::Tick => {
            let report = engine.worker.run_once().await?;
            let out = json!({
                "ran": report.ran,
                "failed": report.failed,
                "dropped": report.dropped,
                "busy": report.busy,
                "pending": engine.queue.pending(PLUGS_CHANNEL).await?,
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        PlugAction::Work => {
            let (tx, rx) = watch::channel(false);
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("interrupt received, stopping worker");
                    let _ = tx.send(true);
                }
            });
            engine.worker.run(rx).await?;
        }
    }
    Ok(())
}
