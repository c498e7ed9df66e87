//! Control: start, stop, or restart database processes on a running node.

use std::fmt;
use std::str::FromStr;

use tracing::info;

use super::Orchestrator;
use crate::cloud::CloudApi;
use crate::context::NodeTarget;
use crate::error::OpsError;
use crate::executor::{TaskExecutor, control_playbook};
use crate::host::CLUSTER_SERVER_TYPE;
use crate::ssh::RemoteShell;

/// Process plus control command, for example `tserver` + `restart`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProcessControl {
    /// Database process: `master`, `tserver`, or `controller`.
    pub process: String,
    /// Command handed to the control playbook.
    pub command: String,
}

impl ProcessControl {
    const PROCESSES: [&'static str; 3] = ["master", "tserver", "controller"];

    /// Validates and builds a control request.
    ///
    /// # Errors
    ///
    /// Returns [`OpsError::InvalidRequest`] for an unknown process or a blank
    /// command.
    pub fn new(process: &str, command: &str) -> Result<Self, OpsError> {
        if !Self::PROCESSES.contains(&process) {
            return Err(OpsError::invalid(format!(
                "unknown process {process}, expected one of {}",
                Self::PROCESSES.join(", ")
            )));
        }
        if command.trim().is_empty() {
            return Err(OpsError::invalid("control command must not be empty"));
        }
        Ok(Self {
            process: process.to_owned(),
            command: command.to_owned(),
        })
    }
}

impl fmt::Display for ProcessControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.process, self.command)
    }
}

impl FromStr for ProcessControl {
    type Err = OpsError;

    /// Parses `<process>:<command>`.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let (process, command) = value
            .split_once(':')
            .ok_or_else(|| OpsError::invalid(format!("expected process:command, got {value}")))?;
        Self::new(process, command)
    }
}

/// What [`Orchestrator::control`] did.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ControlOutcome {
    /// The control playbook ran.
    Applied,
    /// The node is not running, so nothing ran.
    SkippedNotRunning,
}

impl<C, X, S> Orchestrator<C, X, S>
where
    C: CloudApi,
    X: TaskExecutor,
    S: RemoteShell,
{
    /// Runs a control command for a database process.
    ///
    /// A stopped node is skipped without error.
    ///
    /// # Errors
    ///
    /// Returns [`OpsError::HostNotFound`] or
    /// [`OpsError::ServerTypeMismatch`] when the host is missing or not a
    /// cluster server, or the executor's failure.
    pub async fn control(
        &self,
        target: &NodeTarget,
        control: &ProcessControl,
    ) -> Result<ControlOutcome, OpsError> {
        let host = self.require_host(&target.name).await?;
        if !host.is_cluster_server() {
            return Err(OpsError::ServerTypeMismatch {
                target: target.name.clone(),
                expected: CLUSTER_SERVER_TYPE.to_owned(),
                actual: host
                    .server_type
                    .as_ref()
                    .map_or_else(|| String::from("none"), ToString::to_string),
            });
        }
        if !host.is_running {
            info!(node = %target.name, %control, "skipping control command, node not running");
            return Ok(ControlOutcome::SkippedNotRunning);
        }

        info!(node = %target.name, %control, "running control command");
        let mut ctx = self.host_context(target, &host);
        ctx.apply_address(&host, target.custom_ssh_port);
        ctx.set("process", control.process.clone());
        ctx.set("command", control.command.clone());
        self.run_playbook(&control_playbook(&control.process), &ctx, Some(&host))?;
        Ok(ControlOutcome::Applied)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("tserver:restart", "tserver", "restart")]
    #[case("controller:start", "controller", "start")]
    fn parses_process_and_command(
        #[case] raw: &str,
        #[case] process: &str,
        #[case] command: &str,
    ) {
        let control = raw
            .parse::<ProcessControl>()
            .unwrap_or_else(|err| panic!("{raw} should parse: {err}"));
        assert_eq!(control.process, process);
        assert_eq!(control.command, command);
    }

    #[rstest]
    #[case("postgres:start")]
    #[case("master:")]
    #[case("master")]
    fn rejects_malformed_requests(#[case] raw: &str) {
        assert!(raw.parse::<ProcessControl>().is_err());
    }
}
