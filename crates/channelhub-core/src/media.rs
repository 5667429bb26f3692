//! Picture storage used when an integration is connected.

use async_trait::async_trait;

use crate::error::Result;

#[async_trait]
pub trait MediaStorage: Send + Sync {
    /// Store the picture at `source` and return the reference to persist.
    async fn upload_simple(&self, source: &str) -> Result<String>;
}

/// Keeps the source reference as is.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughStorage;

#[async_trait]
impl MediaStorage for PassthroughStorage {
    async fn upload_simple(&self, source: &str) -> Result<String> {
        Ok(source.to_string())
    }
}
