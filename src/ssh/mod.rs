//! Remote command and file transfer channels over the system SSH clients.
//!
//! [`RemoteShell`] is the seam the orchestrator talks to. [`SshClient`]
//! implements it by shelling out to `ssh`, `scp`, and `ssh-keygen` (or the
//! SSH2 equivalents) through a [`CommandRunner`], so tests can script every
//! invocation.

use std::ffi::OsString;

use camino::Utf8Path;

use crate::process::{CommandOutput, CommandRunner, ProcessCommandRunner, expand_tilde};

mod config;
mod endpoint;

pub use config::{SshConfig, SshConfigLoadError, SshError};
pub use endpoint::SshEndpoint;

/// Command used when probing an endpoint; it performs no work on the node.
pub const HANDSHAKE_COMMAND: &str = "true";

/// Output captured from a remote command.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RemoteCommandOutput {
    /// Exit code reported by the remote process, if available.
    pub exit_code: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl RemoteCommandOutput {
    /// Returns `true` when the remote exit code equals zero.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.exit_code, Some(0))
    }
}

impl From<CommandOutput> for RemoteCommandOutput {
    fn from(output: CommandOutput) -> Self {
        Self {
            exit_code: output.code,
            stdout: output.stdout,
            stderr: output.stderr,
        }
    }
}

/// Remote command and file transfer channel used by the orchestrator.
pub trait RemoteShell {
    /// Runs `command` on the endpoint and returns its exit status and output.
    ///
    /// # Errors
    ///
    /// Returns [`SshError`] when the client cannot be started.
    fn execute(&self, endpoint: &SshEndpoint, command: &str)
    -> Result<RemoteCommandOutput, SshError>;

    /// Copies `local` into the remote temporary directory. A non-zero exit
    /// code in the returned output signals a failed transfer.
    ///
    /// # Errors
    ///
    /// Returns [`SshError`] when the client cannot be started.
    fn copy_to_tmp(
        &self,
        endpoint: &SshEndpoint,
        local: &Utf8Path,
    ) -> Result<RemoteCommandOutput, SshError>;

    /// Derives the public key matching `private_key`.
    ///
    /// # Errors
    ///
    /// Returns [`SshError`] when the key cannot be read.
    fn public_key(&self, private_key: &Utf8Path) -> Result<String, SshError>;

    /// Remote directory that [`RemoteShell::copy_to_tmp`] writes into.
    fn remote_tmp_dir(&self) -> &str;

    /// Remote path that `local` lands on after [`RemoteShell::copy_to_tmp`].
    fn staged_path(&self, local: &Utf8Path) -> String {
        let name = local.file_name().unwrap_or(local.as_str());
        format!("{}/{name}", self.remote_tmp_dir().trim_end_matches('/'))
    }

    /// Attempts a single connection; `false` means refused or timed out.
    fn handshake(&self, endpoint: &SshEndpoint) -> bool {
        self.execute(endpoint, HANDSHAKE_COMMAND)
            .is_ok_and(|output| output.is_success())
    }
}

/// [`RemoteShell`] backed by the system SSH clients.
#[derive(Clone, Debug)]
pub struct SshClient<R: CommandRunner> {
    config: SshConfig,
    runner: R,
}

impl SshClient<ProcessCommandRunner> {
    /// Convenience constructor that wires the real process runner.
    ///
    /// # Errors
    ///
    /// Returns [`SshError::InvalidConfig`] when validation fails.
    pub fn with_process_runner(config: SshConfig) -> Result<Self, SshError> {
        Self::new(config, ProcessCommandRunner)
    }
}

impl<R: CommandRunner> SshClient<R> {
    /// Creates a client using the provided runner and configuration.
    ///
    /// # Errors
    ///
    /// Returns [`SshError::InvalidConfig`] when validation fails.
    pub fn new(config: SshConfig, runner: R) -> Result<Self, SshError> {
        config.validate()?;
        Ok(Self { config, runner })
    }

    /// Returns a reference to the underlying configuration.
    #[must_use]
    pub const fn config(&self) -> &SshConfig {
        &self.config
    }

    fn ssh_program(&self, endpoint: &SshEndpoint) -> &str {
        if endpoint.ssh2_enabled() {
            &self.config.ssh2_bin
        } else {
            &self.config.ssh_bin
        }
    }

    fn scp_program(&self, endpoint: &SshEndpoint) -> &str {
        if endpoint.ssh2_enabled() {
            &self.config.scp2_bin
        } else {
            &self.config.scp_bin
        }
    }

    fn build_ssh_args(&self, endpoint: &SshEndpoint, command: &str) -> Vec<OsString> {
        let mut args = vec![OsString::from("-p"), OsString::from(endpoint.port().to_string())];
        args.extend(self.common_options(endpoint));
        args.push(OsString::from(format!(
            "{}@{}",
            endpoint.user(),
            endpoint.host()
        )));
        args.push(OsString::from(command));
        args
    }

    fn build_scp_args(&self, endpoint: &SshEndpoint, local: &Utf8Path) -> Vec<OsString> {
        let mut args = vec![OsString::from("-P"), OsString::from(endpoint.port().to_string())];
        args.extend(self.common_options(endpoint));
        args.push(OsString::from(local.as_str()));
        args.push(OsString::from(format!(
            "{}@{}:{}",
            endpoint.user(),
            endpoint.host(),
            self.config.remote_tmp_dir
        )));
        args
    }

    fn common_options(&self, endpoint: &SshEndpoint) -> Vec<OsString> {
        let mut args = Vec::new();

        if let Some(key) = endpoint.private_key_file() {
            let flag = if endpoint.ssh2_enabled() { "-K" } else { "-i" };
            args.push(OsString::from(flag));
            args.push(OsString::from(expand_tilde(key.as_str())));
        }

        if endpoint.ssh2_enabled() {
            if self.config.batch_mode {
                args.push(OsString::from("-B"));
            }
            return args;
        }

        if self.config.batch_mode {
            args.push(OsString::from("-o"));
            args.push(OsString::from("BatchMode=yes"));
        }

        if !self.config.strict_host_key_checking {
            args.push(OsString::from("-o"));
            args.push(OsString::from("StrictHostKeyChecking=no"));
        }

        if !self.config.known_hosts_file.trim().is_empty() {
            args.push(OsString::from("-o"));
            args.push(OsString::from(format!(
                "UserKnownHostsFile={}",
                self.config.known_hosts_file
            )));
        }

        args.push(OsString::from("-o"));
        args.push(OsString::from(format!(
            "ConnectTimeout={}",
            self.config.connect_timeout_secs
        )));

        args
    }
}

impl<R: CommandRunner> RemoteShell for SshClient<R> {
    fn execute(
        &self,
        endpoint: &SshEndpoint,
        command: &str,
    ) -> Result<RemoteCommandOutput, SshError> {
        let args = self.build_ssh_args(endpoint, command);
        let output = self.runner.run(self.ssh_program(endpoint), &args)?;
        Ok(output.into())
    }

    fn copy_to_tmp(
        &self,
        endpoint: &SshEndpoint,
        local: &Utf8Path,
    ) -> Result<RemoteCommandOutput, SshError> {
        let args = self.build_scp_args(endpoint, local);
        let output = self.runner.run(self.scp_program(endpoint), &args)?;
        Ok(output.into())
    }

    fn remote_tmp_dir(&self) -> &str {
        &self.config.remote_tmp_dir
    }

    fn public_key(&self, private_key: &Utf8Path) -> Result<String, SshError> {
        let args = [
            OsString::from("-y"),
            OsString::from("-f"),
            OsString::from(expand_tilde(private_key.as_str())),
        ];
        let output = self.runner.run(&self.config.keygen_bin, &args)?;
        if !output.is_success() {
            return Err(SshError::CommandFailure {
                program: self.config.keygen_bin.clone(),
                status_text: output.status_text(),
                stderr: output.stderr,
            });
        }
        Ok(output.stdout.trim().to_owned())
    }
}

#[cfg(test)]
mod tests;
