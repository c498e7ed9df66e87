//! External task executor seam.
//!
//! The executor receives a playbook name plus the invocation's
//! [`ConnectionContext`] and applies OS-level configuration. What the
//! playbook does is opaque to the orchestrator.

use std::ffi::OsString;

use serde_json::{Map, Value};
use thiserror::Error;

use crate::context::ConnectionContext;
use crate::host::HostInfo;
use crate::process::{CommandRunner, ProcessCommandRunner, SpawnError};

/// Creates the instance.
pub const CREATE_INSTANCE: &str = "create-instance.yml";
/// Pre-provisioning checks and OS preparation.
pub const PREPROVISION: &str = "preprovision.yml";
/// Moves sshd to the custom port.
pub const USE_CUSTOM_SSH_PORT: &str = "use_custom_ssh_port.yml";
/// Primary provisioning playbook.
pub const SERVER_PROVISION: &str = "server-provision.yml";
/// Installs third-party packages.
pub const INSTALL_THIRD_PARTY: &str = "install-third-party.yml";
/// Edits `authorized_keys` on the node.
pub const EDIT_AUTHORIZED_KEYS: &str = "edit_authorized_keys.yml";
/// Tears the instance down.
pub const DESTROY_INSTANCE: &str = "destroy-instance.yml";
/// Applies cgroup limits sized to the instance type.
pub const SETUP_CGROUP: &str = "setup-cgroup.yml";
/// Grows file systems after a disk resize.
pub const EXPAND_FILE_SYSTEM: &str = "expand-file-system.yml";

/// Configuration playbook for a server type.
#[must_use]
pub fn configure_playbook(server_type: &str) -> String {
    format!("configure-{server_type}.yml")
}

/// Control playbook for a database process.
#[must_use]
pub fn control_playbook(process: &str) -> String {
    format!("control-{process}.yml")
}

/// Variables reported back by a playbook run.
pub type TaskOutput = Map<String, Value>;

/// Applies playbooks to nodes.
pub trait TaskExecutor {
    /// Executor specific error type.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Runs `playbook` with `vars`, targeting `host` or the local machine.
    ///
    /// # Errors
    ///
    /// Returns the executor's error when the run fails.
    fn run(
        &self,
        playbook: &str,
        vars: &ConnectionContext,
        host: Option<&HostInfo>,
    ) -> Result<TaskOutput, Self::Error>;
}

/// Errors raised by [`AnsibleExecutor`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum AnsibleError {
    /// Raised when `ansible-playbook` returns a non-zero exit status.
    #[error("{program} {playbook} exited with status {status_text}: {stderr}")]
    CommandFailure {
        /// Executor binary.
        program: String,
        /// Playbook being applied.
        playbook: String,
        /// Human readable representation of the exit status.
        status_text: String,
        /// Stderr captured from the run.
        stderr: String,
    },
    /// Raised when the executor cannot be started.
    #[error(transparent)]
    Spawn(#[from] SpawnError),
}

/// [`TaskExecutor`] that shells out to `ansible-playbook`.
#[derive(Clone, Debug)]
pub struct AnsibleExecutor<R: CommandRunner> {
    program: String,
    playbook_dir: String,
    runner: R,
}

impl AnsibleExecutor<ProcessCommandRunner> {
    /// Creates an executor wired to the real process runner.
    pub fn with_process_runner(
        program: impl Into<String>,
        playbook_dir: impl Into<String>,
    ) -> Self {
        Self::new(program, playbook_dir, ProcessCommandRunner)
    }
}

impl<R: CommandRunner> AnsibleExecutor<R> {
    /// Creates an executor running playbooks from `playbook_dir`.
    pub fn new(program: impl Into<String>, playbook_dir: impl Into<String>, runner: R) -> Self {
        Self {
            program: program.into(),
            playbook_dir: playbook_dir.into(),
            runner,
        }
    }

    fn build_args(
        &self,
        playbook: &str,
        vars: &ConnectionContext,
        host: Option<&HostInfo>,
    ) -> Vec<OsString> {
        let inventory = vars
            .ssh_host()
            .map(str::to_owned)
            .or_else(|| host.map(|info| info.private_ip.clone()))
            .unwrap_or_else(|| String::from("localhost"));
        let mut args = vec![
            OsString::from(format!(
                "{}/{playbook}",
                self.playbook_dir.trim_end_matches('/')
            )),
            OsString::from("-i"),
            OsString::from(format!("{inventory},")),
        ];
        if let Some(tags) = vars.get_str("tags") {
            args.push(OsString::from("--tags"));
            args.push(OsString::from(tags));
        }
        if let Some(skip_tags) = vars.get_str("skip_tags") {
            args.push(OsString::from("--skip-tags"));
            args.push(OsString::from(skip_tags));
        }
        args.push(OsString::from("--extra-vars"));
        args.push(OsString::from(vars.to_json().to_string()));
        args
    }
}

impl<R: CommandRunner> TaskExecutor for AnsibleExecutor<R> {
    type Error = AnsibleError;

    fn run(
        &self,
        playbook: &str,
        vars: &ConnectionContext,
        host: Option<&HostInfo>,
    ) -> Result<TaskOutput, Self::Error> {
        let args = self.build_args(playbook, vars, host);
        tracing::info!(playbook, node = ?vars.get_str("instance_name"), "running playbook");
        let output = self.runner.run(&self.program, &args)?;
        if !output.is_success() {
            return Err(AnsibleError::CommandFailure {
                program: self.program.clone(),
                playbook: playbook.to_owned(),
                status_text: output.status_text(),
                stderr: output.stderr,
            });
        }
        // A JSON stdout callback yields an object; the default callback does not.
        match serde_json::from_str::<Value>(output.stdout.trim()) {
            Ok(Value::Object(map)) => Ok(map),
            _ => Ok(TaskOutput::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{CommandInvocation, ScriptedRunner, sample_host};

    #[test]
    fn passes_context_as_extra_vars() {
        let runner = ScriptedRunner::new();
        runner.push_output(Some(0), "PLAY RECAP ok=3", "");
        let executor = AnsibleExecutor::new("ansible-playbook", "/opt/playbooks/", runner.clone());
        let mut vars = ConnectionContext::new();
        vars.set("ssh_host", "10.0.0.5");
        vars.set("tags", "download-software");

        let output = executor
            .run(SERVER_PROVISION, &vars, None)
            .unwrap_or_else(|err| panic!("run should succeed: {err}"));

        assert!(output.is_empty());
        let command = runner
            .invocations()
            .first()
            .map(CommandInvocation::command_string)
            .unwrap_or_default();
        assert_eq!(
            command,
            "ansible-playbook /opt/playbooks/server-provision.yml -i 10.0.0.5, \
             --tags download-software --extra-vars {\"ssh_host\":\"10.0.0.5\",\"tags\":\"download-software\"}"
        );
    }

    #[test]
    fn falls_back_to_host_address_for_inventory() {
        let runner = ScriptedRunner::new();
        runner.push_output(Some(0), "{\"instance_id\":\"i-0abc\"}", "");
        let executor = AnsibleExecutor::new("ansible-playbook", "/opt/playbooks", runner.clone());
        let host = sample_host("db-n1", true);

        let output = executor
            .run(CREATE_INSTANCE, &ConnectionContext::new(), Some(&host))
            .unwrap_or_else(|err| panic!("run should succeed: {err}"));

        assert_eq!(output.get("instance_id"), Some(&Value::from("i-0abc")));
        let command = runner
            .invocations()
            .first()
            .map(CommandInvocation::command_string)
            .unwrap_or_default();
        assert!(command.contains(&format!("-i {},", host.private_ip)), "command: {command}");
    }

    #[test]
    fn non_zero_exit_is_an_error() {
        let runner = ScriptedRunner::new();
        runner.push_output(Some(2), "", "unreachable");
        let executor = AnsibleExecutor::new("ansible-playbook", "/opt/playbooks", runner);

        let Err(err) = executor.run(DESTROY_INSTANCE, &ConnectionContext::new(), None) else {
            panic!("run should fail");
        };

        assert!(err.to_string().contains("destroy-instance.yml"), "error: {err}");
    }

    #[test]
    fn playbook_names_follow_role_and_process() {
        assert_eq!(configure_playbook("cluster-server"), "configure-cluster-server.yml");
        assert_eq!(control_playbook("tserver"), "control-tserver.yml");
    }
}
