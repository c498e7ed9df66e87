//! SSH client settings and error types.

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::process::SpawnError;

/// SSH client settings loaded via `ortho-config`.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "NODEKEEPER_SSH",
    discovery(
        app_name = "nodekeeper",
        env_var = "NODEKEEPER_CONFIG_PATH",
        config_file_name = "nodekeeper.toml",
        dotfile_name = ".nodekeeper.toml",
        project_file_name = "nodekeeper.toml"
    )
)]
pub struct SshConfig {
    /// Path to the `ssh` executable.
    #[ortho_config(default = "ssh".to_owned())]
    pub ssh_bin: String,
    /// Path to the `scp` executable.
    #[ortho_config(default = "scp".to_owned())]
    pub scp_bin: String,
    /// SSH2 client used for nodes that only accept the SSH2 tooling.
    #[ortho_config(default = "sshg3".to_owned())]
    pub ssh2_bin: String,
    /// SSH2 copy client.
    #[ortho_config(default = "scpg3".to_owned())]
    pub scp2_bin: String,
    /// Path to `ssh-keygen`, used to derive public keys.
    #[ortho_config(default = "ssh-keygen".to_owned())]
    pub keygen_bin: String,
    /// Whether to force batch mode to avoid password prompts.
    #[ortho_config(default = true)]
    pub batch_mode: bool,
    /// Whether to enforce host key checking; fresh instances rarely have a
    /// known host key.
    #[ortho_config(default = false)]
    pub strict_host_key_checking: bool,
    /// Known hosts file override.
    #[ortho_config(default = "/dev/null".to_owned())]
    pub known_hosts_file: String,
    /// Connection timeout handed to the client, in seconds.
    #[ortho_config(default = 10)]
    pub connect_timeout_secs: u32,
    /// Remote directory used by copy-to-temp.
    #[ortho_config(default = "/tmp".to_owned())]
    pub remote_tmp_dir: String,
}

/// Errors raised when loading the SSH configuration from layered sources.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum SshConfigLoadError {
    /// Indicates that parsing or merging configuration layers failed.
    #[error("ssh configuration parsing failed: {0}")]
    Parse(String),
}

/// Errors surfaced by the SSH adapter.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum SshError {
    /// Raised when configuration is missing required values.
    #[error("missing {field}: set NODEKEEPER_SSH_{env_suffix} or add {field} to nodekeeper.toml", env_suffix = field.to_uppercase())]
    InvalidConfig {
        /// Configuration field that failed validation.
        field: String,
    },
    /// Raised when a client binary cannot be started.
    #[error(transparent)]
    Spawn(#[from] SpawnError),
    /// Raised when a local helper such as `ssh-keygen` fails.
    #[error("{program} exited with status {status_text}: {stderr}")]
    CommandFailure {
        /// Command name used for the attempted operation.
        program: String,
        /// Human readable representation of the exit status.
        status_text: String,
        /// Stderr captured from the process.
        stderr: String,
    },
}

impl SshConfig {
    /// Ensures binaries and paths are present after trimming whitespace.
    ///
    /// # Errors
    ///
    /// Returns [`SshError::InvalidConfig`] naming the first empty field.
    pub fn validate(&self) -> Result<(), SshError> {
        Self::require_value(&self.ssh_bin, "ssh_bin")?;
        Self::require_value(&self.scp_bin, "scp_bin")?;
        Self::require_value(&self.ssh2_bin, "ssh2_bin")?;
        Self::require_value(&self.scp2_bin, "scp2_bin")?;
        Self::require_value(&self.keygen_bin, "keygen_bin")?;
        Self::require_value(&self.remote_tmp_dir, "remote_tmp_dir")?;
        Ok(())
    }

    /// Loads configuration from defaults, configuration files, and
    /// environment variables without reading CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns [`SshConfigLoadError::Parse`] when merging sources fails.
    pub fn load_without_cli_args() -> Result<Self, SshConfigLoadError> {
        Self::load_from_iter([std::ffi::OsString::from("nodekeeper")])
            .map_err(|err| SshConfigLoadError::Parse(err.to_string()))
    }

    fn require_value(value: &str, field: &str) -> Result<(), SshError> {
        if value.trim().is_empty() {
            return Err(SshError::InvalidConfig {
                field: field.to_owned(),
            });
        }
        Ok(())
    }
}
