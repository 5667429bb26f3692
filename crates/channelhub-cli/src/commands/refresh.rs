use clap::Subcommand;
use channelhub_core::Config;
use serde_json::json;

use crate::common::{open_engine_with, CliResult};

#[derive(Subcommand)]
pub enum RefreshAction {
    /// Refresh every integration whose token expires within the lookahead
    Sweep {
        /// Keep going after a failed refresh
        #[arg(long)]
        continue_on_failure: bool,
    },
}

pub async fn run(action: RefreshAction) -> CliResult {
    match action {
        RefreshAction::Sweep {
            continue_on_failure,
        } => {
            let mut config = Config::load()?;
            config.refresh.continue_on_failure |= continue_on_failure;
            let engine = open_engine_with(config)?;

            let report = engine.refresher.refresh_all().await?;
            let out = json!({
                "refreshed": report.refreshed,
                "failed": report.failed,
                "untouched": report.untouched,
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
            if !report.failed.is_empty() {
                return Err(format!("{} integration(s) failed to refresh", report.failed.len()).into());
            }
        }
    }
    Ok(())
}
