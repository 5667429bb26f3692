//! Plugs: recurring per-integration background tasks.
//!
//! A plug binds one integration to one provider method. Activation emits a
//! job keyed by [`job_key`] on the [`PLUGS_CHANNEL`] queue channel; the
//! [`worker::PlugWorker`] fires due jobs through
//! [`scheduler::PlugScheduler::run_plug`].

pub mod queue;
pub mod scheduler;
pub mod worker;

pub use queue::{DelayQueue, Job, JobOptions, JobQueue};
pub use scheduler::{PlugRunOutcome, PlugScheduler, SeenItems};
pub use worker::{PlugWorker, TickReport};

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Queue channel carrying plug jobs.
pub const PLUGS_CHANNEL: &str = "plugs";

/// Queue key of the recurring job for one (integration, method) pair.
pub fn job_key(integration_id: &str, method_name: &str) -> String {
    format!("{integration_id}-{method_name}")
}

/// One named parameter of a plug.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlugParam {
    pub name: String,
    pub value: String,
}

/// Ordered association list of plug parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlugParams(Vec<PlugParam>);

impl PlugParams {
    pub fn new(params: Vec<PlugParam>) -> Self {
        Self(params)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PlugParam> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Fold into a name -> value map. A later entry wins over an earlier one
    /// with the same name.
    pub fn to_map(&self) -> HashMap<String, String> {
        self.0.iter().fold(HashMap::new(), |mut all, current| {
            all.insert(current.name.clone(), current.value.clone());
            all
        })
    }
}

impl FromIterator<(String, String)> for PlugParams {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(name, value)| PlugParam { name, value })
                .collect(),
        )
    }
}

/// Stored plug record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plug {
    pub id: String,
    pub organization_id: String,
    pub integration_id: String,
    pub method_name: String,
    pub activated: bool,
    pub data: PlugParams,
}

/// User-submitted plug configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlugSettings {
    pub func: String,
    pub fields: PlugParams,
}

/// Static description of a plug method a provider offers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlugDescriptor {
    pub method_name: &'static str,
    pub title: &'static str,
    pub run_every_milliseconds: u64,
}

impl PlugDescriptor {
    pub fn run_every(&self) -> Duration {
        Duration::from_millis(self.run_every_milliseconds)
    }
}

/// Payload carried by a plug job on the queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlugJob {
    pub retry: u32,
    /// Interval between runs, in milliseconds.
    pub delay: u64,
    pub org_id: String,
    pub integration_id: String,
    pub func_name: String,
}

impl PlugJob {
    pub fn key(&self) -> String {
        job_key(&self.integration_id, &self.func_name)
    }
}
