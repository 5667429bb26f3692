//! Organization-facing notifications.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// An in-app notification addressed to an organization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub organization_id: String,
    pub title: String,
    pub body: String,
    pub important: bool,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: Notification) -> Result<()>;
}

/// Writes notifications to the log instead of delivering them.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn notify(&self, notification: Notification) -> Result<()> {
        if notification.important {
            tracing::warn!(
                org = %notification.organization_id,
                title = %notification.title,
                body = %notification.body,
                "notification"
            );
        } else {
            tracing::info!(
                org = %notification.organization_id,
                title = %notification.title,
                "notification"
            );
        }
        Ok(())
    }
}
