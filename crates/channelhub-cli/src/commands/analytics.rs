use clap::Subcommand;

use crate::common::{open_engine, CliResult};

#[derive(Subcommand)]
pub enum AnalyticsAction {
    /// Fetch analytics of one integration, served from cache when fresh
    Get {
        #[arg(long)]
        org: String,
        /// Integration ID
        id: String,
        /// Lookback window in days
        #[arg(long, default_value = "7")]
        days: u32,
        /// Refresh the token before fetching
        #[arg(long)]
        force_refresh: bool,
    },
}

pub async fn run(action: AnalyticsAction) -> CliResult {
    let engine = open_engine()?;
    match action {
        AnalyticsAction::Get {
            org,
            id,
            days,
            force_refresh,
        } => {
            let data = engine
                .analytics
                .get_analytics(&org, &id, days, force_refresh)
                .await?;
            println!("{}", serde_json::to_string_pretty(&data)?);
        }
    }
    Ok(())
}
