//! Provider lookup by name or URI scheme.

use super::{split_uri, DirRemote, RemoteServer};
use crate::error::{RemoteError, Result};
use crate::exec::ProcessRunner;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Default, Clone)]
pub struct ProviderRegistry {
    providers: BTreeMap<String, Arc<dyn RemoteServer>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in provider, all spawning through `runner`.
    pub fn with_defaults(runner: Arc<dyn ProcessRunner>) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(DirRemote::new(Arc::clone(&runner))));
        #[cfg(feature = "ssh")]
        registry.register(Arc::new(super::SshRemote::new(Arc::clone(&runner))));
        registry
    }

    /// Add a provider, replacing any registered under the same name.
    pub fn register(&mut self, server: Arc<dyn RemoteServer>) {
        self.providers.insert(server.provider().to_string(), server);
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn RemoteServer>> {
        self.providers
            .get(name)
            .cloned()
            .ok_or_else(|| RemoteError::UnknownProvider(name.to_string()))
    }

    /// Provider named by the scheme of `uri` (`ssh://host/path` -> `ssh`).
    pub fn for_uri(&self, uri: &str) -> Result<Arc<dyn RemoteServer>> {
        let (scheme, _) = split_uri(uri)
            .ok_or_else(|| RemoteError::invalid_config(format!("malformed remote uri '{}'", uri)))?;
        self.get(scheme)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.providers.keys().map(String::as_str)
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}
