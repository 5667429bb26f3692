use std::collections::HashMap;
use std::sync::Arc;

use super::traits::SocialProvider;
use crate::plugs::PlugDescriptor;

/// Providers keyed by identifier, built once at startup.
#[derive(Default, Clone)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn SocialProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `provider`, replacing any provider with the same identifier.
    pub fn register(&mut self, provider: Arc<dyn SocialProvider>) {
        let identifier = provider.identifier().to_string();
        if self.providers.insert(identifier.clone(), provider).is_some() {
            tracing::warn!(provider = %identifier, "provider registered twice, keeping the last one");
        }
    }

    pub fn with(mut self, provider: Arc<dyn SocialProvider>) -> Self {
        self.register(provider);
        self
    }

    pub fn get(&self, identifier: &str) -> Option<Arc<dyn SocialProvider>> {
        self.providers.get(identifier).cloned()
    }

    /// Registered identifiers, sorted.
    pub fn identifiers(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.providers.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    /// The plug descriptor `method_name` of provider `identifier`.
    pub fn find_plug(&self, identifier: &str, method_name: &str) -> Option<PlugDescriptor> {
        self.providers
            .get(identifier)?
            .plugs()
            .iter()
            .find(|p| p.method_name == method_name)
            .copied()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.identifiers())
            .finish()
    }
}
