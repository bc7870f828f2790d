//! Named remotes loaded from a TOML file.
//!
//! ```toml
//! [remotes.origin]
//! provider = "ssh"
//! username = "root"
//! address = "backup.example.com"
//! path = "/var/lib/volsync"
//!
//! [remotes.origin.parameters]
//! password = "secret"
//! ```
//!
//! Every key of a remote except `provider` and `parameters` is passed to the
//! provider as-is, so the file carries the same fields as `validate_remote`
//! expects.

use crate::error::{RemoteError, Result};
use crate::operation::Properties;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub remotes: BTreeMap<String, RemoteEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteEntry {
    pub provider: String,
    #[serde(default, skip_serializing_if = "Properties::is_empty")]
    pub parameters: Properties,
    #[serde(flatten)]
    pub properties: Properties,
}

impl Config {
    /// `$XDG_CONFIG_HOME/volsync/remotes.toml` or the platform equivalent
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("volsync").join("remotes.toml"))
    }

    /// Load from `path`. A missing file is an empty configuration.
    pub fn load(path: &Path) -> Result<Self> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file");
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(RemoteError::ConfigFile {
                    path: path.to_path_buf(),
                    message: e.to_string(),
                })
            }
        };
        Self::parse(&text, path)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        Self::parse(text, Path::new("<string>"))
    }

    fn parse(text: &str, path: &Path) -> Result<Self> {
        toml::from_str(text).map_err(|e| RemoteError::ConfigFile {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    pub fn remote(&self, name: &str) -> Result<&RemoteEntry> {
        self.remotes
            .get(name)
            .ok_or_else(|| RemoteError::invalid_config(format!("no remote named '{}'", name)))
    }
}
