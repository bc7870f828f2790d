//! SSH connection options shared by rsync transfers and remote commands.
//!
//! Passwords and private keys arrive as strings in remote parameters. Both
//! `ssh -i` and `sshpass -f` want files, so the secrets are written to
//! private temp files that are removed when the `SshAuth` is dropped.

use crate::error::Result;
use crate::exec::{shell_quote, CommandSpec};
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

pub struct SshAuth {
    port: Option<u16>,
    password_file: Option<NamedTempFile>,
    key_file: Option<KeyFile>,
}

enum KeyFile {
    /// Key contents we materialized ourselves
    Owned(NamedTempFile),
    /// Key file already on disk, named by the remote config
    Path(String),
}

impl KeyFile {
    fn path(&self) -> &Path {
        match self {
            KeyFile::Owned(file) => file.path(),
            KeyFile::Path(path) => Path::new(path),
        }
    }
}

fn secret_file(contents: &str) -> Result<NamedTempFile> {
    // NamedTempFile is created with mode 0600
    let mut file = tempfile::Builder::new().prefix("volsync-").tempfile()?;
    file.write_all(contents.as_bytes())?;
    if !contents.ends_with('\n') {
        file.write_all(b"\n")?;
    }
    file.flush()?;
    Ok(file)
}

impl SshAuth {
    /// `key` holds private key contents; `key_path` names an existing key
    /// file and is used only when no key contents are given.
    pub fn new(
        port: Option<u16>,
        password: Option<&str>,
        key: Option<&str>,
        key_path: Option<&str>,
    ) -> Result<Self> {
        let password_file = password.map(secret_file).transpose()?;
        let key_file = match (key, key_path) {
            (Some(contents), _) => Some(KeyFile::Owned(secret_file(contents)?)),
            (None, Some(path)) => Some(KeyFile::Path(path.to_string())),
            (None, None) => None,
        };
        Ok(Self {
            port,
            password_file,
            key_file,
        })
    }

    /// Options placed between `ssh` and the destination
    pub fn ssh_options(&self) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            "StrictHostKeyChecking=no".to_string(),
            "-o".to_string(),
            "UserKnownHostsFile=/dev/null".to_string(),
        ];
        if let Some(port) = self.port {
            args.push("-p".to_string());
            args.push(port.to_string());
        }
        if let Some(ref key) = self.key_file {
            args.push("-i".to_string());
            args.push(key.path().to_string_lossy().into_owned());
        }
        args
    }

    /// Remote shell string for `rsync -e`
    pub fn rsync_shell(&self) -> String {
        let mut shell = String::from("ssh");
        for opt in self.ssh_options() {
            shell.push(' ');
            shell.push_str(&shell_quote(&opt));
        }
        shell
    }

    /// `ssh [options] <destination> <remote command>`
    pub fn ssh_command(&self, destination: &str, remote_command: &str) -> CommandSpec {
        let spec = CommandSpec::new("ssh")
            .args(self.ssh_options())
            .arg(destination)
            .arg(remote_command);
        self.wrap(spec)
    }

    /// Run the command under `sshpass` when password authentication is set.
    pub fn wrap(&self, spec: CommandSpec) -> CommandSpec {
        match self.password_file {
            Some(ref file) => spec.wrap(
                "sshpass",
                ["-f".to_string(), file.path().to_string_lossy().into_owned()],
            ),
            None => spec,
        }
    }
}

impl std::fmt::Debug for SshAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshAuth")
            .field("port", &self.port)
            .field("password", &self.password_file.is_some())
            .field("key", &self.key_file.is_some())
            .finish()
    }
}
