//! Error types shared by transports, providers and the engine.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, RemoteError>;

#[derive(Debug, Error)]
pub enum RemoteError {
    /// Missing, unknown or malformed remote/parameter field.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// External transfer tool exited nonzero.
    #[error("command '{command}' failed with exit code {exit_code}: {output}")]
    Command {
        command: String,
        exit_code: i32,
        output: String,
    },

    #[error("failed to start '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("unknown provider '{0}'")]
    UnknownProvider(String),

    #[error("malformed metadata for commit '{commit}': {source}")]
    Metadata {
        commit: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to load config {}: {message}", path.display())]
    ConfigFile { path: PathBuf, message: String },

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl RemoteError {
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Exit code of a failed transfer command, if this is one.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::Command { exit_code, .. } => Some(*exit_code),
            _ => None,
        }
    }

    /// Captured diagnostic output of a failed transfer command.
    pub fn command_output(&self) -> Option<&str> {
        match self {
            Self::Command { output, .. } => Some(output),
            _ => None,
        }
    }

    pub fn is_config(&self) -> bool {
        matches!(self, Self::InvalidConfig(_) | Self::ConfigFile { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_error_accessors() {
        let err = RemoteError::Command {
            command: "tar czf a.tar.gz .".to_string(),
            exit_code: 2,
            output: "tar: .: Cannot stat".to_string(),
        };
        assert_eq!(err.exit_code(), Some(2));
        assert_eq!(err.command_output(), Some("tar: .: Cannot stat"));
        assert!(!err.is_config());
        assert_eq!(
            err.to_string(),
            "command 'tar czf a.tar.gz .' failed with exit code 2: tar: .: Cannot stat"
        );
    }

    #[test]
    fn test_config_error() {
        let err = RemoteError::invalid_config("missing required property 'path'");
        assert!(err.is_config());
        assert_eq!(err.exit_code(), None);
    }
}
