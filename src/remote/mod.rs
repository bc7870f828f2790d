//! Remote providers.
//!
//! A provider is one way of storing commits somewhere else: over ssh with
//! rsync ([`ssh`]) or as tar archives in a directory tree ([`dir`]). Every
//! provider implements [`RemoteServer`]; the [`registry`] maps provider
//! names and URI schemes to instances.

pub mod dir;
pub mod registry;
#[cfg(feature = "ssh")]
pub mod ssh;

pub use dir::DirRemote;
pub use registry::ProviderRegistry;
#[cfg(feature = "ssh")]
pub use ssh::SshRemote;

use crate::commit::{Commit, TagFilter};
use crate::error::{RemoteError, Result};
use crate::operation::{OperationData, Properties, RemoteOperation, Volume};
use async_trait::async_trait;
use std::path::Path;

/// Provider contract used by the engine and the CLI.
///
/// Remote and parameter maps are validated by `validate_remote` and
/// `validate_parameters` before any other hook sees them.
#[async_trait]
pub trait RemoteServer: Send + Sync {
    /// Unique provider name, also the URI scheme (`ssh`, `dir`)
    fn provider(&self) -> &str;

    /// Check a remote configuration, returning it in normalized form.
    fn validate_remote(&self, remote: &Properties) -> Result<Properties>;

    /// Check per-operation parameters, returning them in normalized form.
    fn validate_parameters(&self, parameters: &Properties) -> Result<Properties>;

    /// Build remote properties from `<provider>://...`.
    fn parse_uri(&self, uri: &str) -> Result<Properties> {
        Err(RemoteError::invalid_config(format!(
            "provider '{}' cannot parse '{}'",
            self.provider(),
            uri
        )))
    }

    /// Commits on the remote matching `tags`, newest first.
    async fn list_commits(
        &self,
        remote: &Properties,
        parameters: &Properties,
        tags: &[TagFilter],
    ) -> Result<Vec<Commit>>;

    /// One commit, `None` when it does not exist.
    async fn get_commit(
        &self,
        remote: &Properties,
        parameters: &Properties,
        commit_id: &str,
    ) -> Result<Option<Commit>>;

    /// Called once before any volume is synced. The returned payload is
    /// attached to the operation for the remaining hooks.
    async fn start_operation(&self, _op: &RemoteOperation) -> Result<Option<OperationData>> {
        Ok(None)
    }

    async fn sync_volume(&self, op: &RemoteOperation, volume: &Volume, scratch: &Path)
        -> Result<()>;

    /// Called once after the volumes, whether or not they synced.
    async fn end_operation(&self, _op: &RemoteOperation, _success: bool) -> Result<()> {
        Ok(())
    }

    /// Store commit metadata. `is_update` replaces the metadata of a commit
    /// that already exists.
    async fn push_metadata(
        &self,
        op: &RemoteOperation,
        commit: &Properties,
        is_update: bool,
    ) -> Result<()>;
}

/// Parse a `metadata.json` document.
pub(crate) fn parse_metadata(commit_id: &str, text: &str) -> Result<Commit> {
    let properties: Properties =
        serde_json::from_str(text).map_err(|source| RemoteError::Metadata {
            commit: commit_id.to_string(),
            source,
        })?;
    Ok(Commit::new(commit_id, properties))
}

/// Serialize commit metadata the way it is stored on remotes.
pub(crate) fn render_metadata(commit: &Properties) -> Result<String> {
    let mut text = serde_json::to_string_pretty(commit)?;
    text.push('\n');
    Ok(text)
}

/// Split `scheme://rest`.
pub(crate) fn split_uri(uri: &str) -> Option<(&str, &str)> {
    let (scheme, rest) = uri.split_once("://")?;
    if scheme.is_empty()
        || !scheme
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '-' || c == '.')
    {
        return None;
    }
    Some((scheme, rest))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_metadata() {
        let commit = parse_metadata("c1", r#"{"timestamp": "2019-09-20T13:45:36Z"}"#).unwrap();
        assert_eq!(commit.id, "c1");
        assert!(commit.timestamp().is_some());

        let err = parse_metadata("c2", "not json").unwrap_err();
        assert!(matches!(err, RemoteError::Metadata { ref commit, .. } if commit == "c2"));

        // Metadata must be an object
        assert!(parse_metadata("c3", "[1, 2]").is_err());
    }

    #[test]
    fn test_render_metadata_roundtrip() {
        let mut props = Properties::new();
        props.insert("a".into(), serde_json::json!("b"));
        let text = render_metadata(&props).unwrap();
        assert!(text.ends_with('\n'));
        assert_eq!(parse_metadata("x", &text).unwrap().properties, props);
    }

    #[test]
    fn test_split_uri() {
        assert_eq!(split_uri("ssh://u@h/p"), Some(("ssh", "u@h/p")));
        assert_eq!(split_uri("dir:///var/lib"), Some(("dir", "/var/lib")));
        assert_eq!(split_uri("origin"), None);
        assert_eq!(split_uri("://x"), None);
        assert_eq!(split_uri("a b://x"), None);
    }
}
