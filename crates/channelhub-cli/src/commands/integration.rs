//! Integration management commands for CLI.

use clap::Subcommand;
use channelhub_core::PostingTime;

use crate::common::{integration_summary, open_engine, CliResult};

#[derive(Subcommand)]
pub enum IntegrationAction {
    /// List integrations of an organization
    List {
        /// Organization ID
        #[arg(long)]
        org: String,
        /// Print JSON instead of one line per integration
        #[arg(long)]
        json: bool,
    },
    /// Show one integration
    Get {
        #[arg(long)]
        org: String,
        /// Integration ID
        id: String,
    },
    /// Enable an integration if the organization has room for it
    Enable {
        #[arg(long)]
        org: String,
        /// Maximum number of enabled channels
        #[arg(long)]
        limit: usize,
        id: String,
    },
    /// Disable an integration
    Disable {
        #[arg(long)]
        org: String,
        id: String,
    },
    /// Soft-delete an integration
    Delete {
        #[arg(long)]
        org: String,
        id: String,
    },
    /// Clear credentials and ask the organization to reconnect
    Disconnect {
        #[arg(long)]
        org: String,
        id: String,
    },
    /// Flag an integration as needing a reconnect
    RefreshNeeded {
        #[arg(long)]
        org: String,
        id: String,
    },
    /// Rename an integration and optionally replace its picture
    Rename {
        #[arg(long)]
        org: String,
        id: String,
        name: String,
        #[arg(long)]
        picture: Option<String>,
    },
    /// Replace posting slots (minutes after midnight UTC, comma-separated)
    PostingTimes {
        #[arg(long)]
        org: String,
        id: String,
        #[arg(value_delimiter = ',')]
        times: Vec<u32>,
    },
    /// Disable the newest enabled integrations above a channel limit
    DisableOverQuota {
        #[arg(long)]
        org: String,
        #[arg(long)]
        limit: usize,
    },
}

pub async fn run(action: IntegrationAction) -> CliResult {
    let engine = open_engine()?;
    let integrations = &engine.integrations;

    match action {
        IntegrationAction::List { org, json } => {
            let list = integrations.list(&org).await?;
            if json {
                let out: Vec<_> = list.iter().map(integration_summary).collect();
                println!("{}", serde_json::to_string_pretty(&out)?);
            } else if list.is_empty() {
                println!("no integrations");
            } else {
                for i in &list {
                    let mut flags = Vec::new();
                    if i.disabled {
                        flags.push("disabled");
                    }
                    if i.refresh_needed {
                        flags.push("refresh-needed");
                    }
                    if i.in_between_steps {
                        flags.push("pending");
                    }
                    println!(
                        "{}  {:<12} {}  {}",
                        i.id,
                        i.provider_identifier,
                        i.name,
                        flags.join(",")
                    );
                }
            }
        }
        IntegrationAction::Get { org, id } => {
            let i = integrations.get(&org, &id).await?;
            println!("{}", serde_json::to_string_pretty(&integration_summary(&i))?);
        }
        IntegrationAction::Enable { org, limit, id } => {
            integrations.enable(&org, limit, &id).await?;
            println!("enabled {id}");
        }
        IntegrationAction::Disable { org, id } => {
            integrations.disable(&org, &id).await?;
            println!("disabled {id}");
        }
        IntegrationAction::Delete { org, id } => {
            integrations.delete(&org, &id).await?;
            println!("deleted {id}");
        }
        IntegrationAction::Disconnect { org, id } => {
            integrations.disconnect(&org, &id).await?;
            println!("disconnected {id}");
        }
        IntegrationAction::RefreshNeeded { org, id } => {
            integrations.mark_refresh_needed(&org, &id).await?;
            println!("flagged {id}");
        }
        IntegrationAction::Rename {
            org,
            id,
            name,
            picture,
        } => {
            integrations
                .update_name_and_picture(&org, &id, &name, picture.as_deref())
                .await?;
            println!("ok");
        }
        IntegrationAction::PostingTimes { org, id, times } => {
            let times: Vec<PostingTime> = times.into_iter().map(|time| PostingTime { time }).collect();
            integrations.set_posting_times(&org, &id, &times).await?;
            println!("ok");
        }
        IntegrationAction::DisableOverQuota { org, limit } => {
            let disabled = integrations.disable_over_quota(&org, limit).await?;
            println!("{}", serde_json::to_string_pretty(&disabled)?);
        }
    }
    Ok(())
}
