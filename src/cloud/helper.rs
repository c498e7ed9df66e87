//! [`CloudApi`] backed by a provider helper binary.
//!
//! The helper takes a subcommand plus flags and prints JSON on stdout. Host
//! lookups print a host object or `null`; listings print an array; the port
//! check prints a port number or `null`.

use std::ffi::OsString;

use serde::de::DeserializeOwned;
use thiserror::Error;

use super::{CloudApi, CloudFuture};
use crate::host::HostInfo;
use crate::process::{CommandOutput, CommandRunner, ProcessCommandRunner, SpawnError};

/// Errors raised by [`CliCloudApi`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum CliCloudError {
    /// Raised when the helper returns a non-zero exit status.
    #[error("{program} {command} exited with status {status_text}: {stderr}")]
    CommandFailure {
        /// Helper binary.
        program: String,
        /// Subcommand that failed.
        command: String,
        /// Human readable representation of the exit status.
        status_text: String,
        /// Stderr captured from the helper.
        stderr: String,
    },
    /// Raised when helper output cannot be parsed.
    #[error("failed to parse {command} output: {message}")]
    Parse {
        /// Subcommand whose output was rejected.
        command: String,
        /// Parser error message.
        message: String,
    },
    /// Raised when the helper cannot be started.
    #[error(transparent)]
    Spawn(#[from] SpawnError),
}

/// Drives a provider helper binary through a [`CommandRunner`].
#[derive(Clone, Debug)]
pub struct CliCloudApi<R: CommandRunner> {
    name: String,
    program: String,
    runner: R,
}

impl CliCloudApi<ProcessCommandRunner> {
    /// Creates an adapter wired to the real process runner.
    pub fn with_process_runner(name: impl Into<String>, program: impl Into<String>) -> Self {
        Self::new(name, program, ProcessCommandRunner)
    }
}

impl<R: CommandRunner> CliCloudApi<R> {
    /// Creates an adapter for `program`, reporting itself as `name`.
    pub fn new(name: impl Into<String>, program: impl Into<String>, runner: R) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            runner,
        }
    }

    fn run(&self, command: &str, flags: &[(&str, String)]) -> Result<CommandOutput, CliCloudError> {
        let mut args = vec![OsString::from(command)];
        for (flag, value) in flags {
            args.push(OsString::from(format!("--{flag}")));
            args.push(OsString::from(value));
        }
        let output = self.runner.run(&self.program, &args)?;
        if output.is_success() {
            return Ok(output);
        }
        Err(CliCloudError::CommandFailure {
            program: self.program.clone(),
            command: command.to_owned(),
            status_text: output.status_text(),
            stderr: output.stderr,
        })
    }

    fn run_json<T: DeserializeOwned>(
        &self,
        command: &str,
        flags: &[(&str, String)],
    ) -> Result<T, CliCloudError> {
        let output = self.run(command, flags)?;
        serde_json::from_str(output.stdout.trim()).map_err(|err| CliCloudError::Parse {
            command: command.to_owned(),
            message: err.to_string(),
        })
    }

    fn host_flags(host: &HostInfo) -> Vec<(&'static str, String)> {
        vec![("id", host.id.clone()), ("zone", host.zone.clone())]
    }

    fn ports_flag(ports: &[u16]) -> (&'static str, String) {
        let joined = ports
            .iter()
            .map(u16::to_string)
            .collect::<Vec<_>>()
            .join(",");
        ("ports", joined)
    }
}

impl<R> CloudApi for CliCloudApi<R>
where
    R: CommandRunner + Send + Sync,
{
    type Error = CliCloudError;

    fn name(&self) -> &str {
        &self.name
    }

    fn get_host_info<'a>(
        &'a self,
        target: &'a str,
    ) -> CloudFuture<'a, Option<HostInfo>, Self::Error> {
        Box::pin(async move { self.run_json("host-info", &[("name", target.to_owned())]) })
    }

    fn list_hosts<'a>(
        &'a self,
        pattern: Option<&'a str>,
    ) -> CloudFuture<'a, Vec<HostInfo>, Self::Error> {
        Box::pin(async move {
            let flags = pattern
                .map(|name| vec![("name", name.to_owned())])
                .unwrap_or_default();
            self.run_json("list", &flags)
        })
    }

    fn stop_instance<'a>(&'a self, host: &'a HostInfo) -> CloudFuture<'a, (), Self::Error> {
        Box::pin(async move { self.run("stop", &Self::host_flags(host)).map(drop) })
    }

    fn start_instance<'a>(
        &'a self,
        host: &'a HostInfo,
        ports: &'a [u16],
    ) -> CloudFuture<'a, (), Self::Error> {
        Box::pin(async move {
            let mut flags = Self::host_flags(host);
            flags.push(Self::ports_flag(ports));
            self.run("start", &flags).map(drop)
        })
    }

    fn reboot_instance<'a>(
        &'a self,
        host: &'a HostInfo,
        ports: &'a [u16],
    ) -> CloudFuture<'a, (), Self::Error> {
        Box::pin(async move {
            let mut flags = Self::host_flags(host);
            flags.push(Self::ports_flag(ports));
            self.run("reboot", &flags).map(drop)
        })
    }

    fn resize_instance<'a>(
        &'a self,
        host: &'a HostInfo,
        instance_type: &'a str,
    ) -> CloudFuture<'a, (), Self::Error> {
        Box::pin(async move {
            let mut flags = Self::host_flags(host);
            flags.push(("instance-type", instance_type.to_owned()));
            self.run("resize", &flags).map(drop)
        })
    }

    fn update_disk<'a>(
        &'a self,
        host: &'a HostInfo,
        size_gb: u32,
    ) -> CloudFuture<'a, (), Self::Error> {
        Box::pin(async move {
            let mut flags = Self::host_flags(host);
            flags.push(("size-gb", size_gb.to_string()));
            self.run("update-disk", &flags).map(drop)
        })
    }

    fn open_ssh_port<'a>(
        &'a self,
        host: &'a HostInfo,
        candidates: &'a [u16],
    ) -> CloudFuture<'a, Option<u16>, Self::Error> {
        Box::pin(async move {
            let flags = [
                ("host", host.private_ip.clone()),
                ("name", host.name.clone()),
                Self::ports_flag(candidates),
            ];
            self.run_json("open-port", &flags)
        })
    }

    fn configure_secondary_interface<'a>(
        &'a self,
        host: &'a HostInfo,
    ) -> CloudFuture<'a, (), Self::Error> {
        Box::pin(async move {
            let mut flags = Self::host_flags(host);
            if let Some(subnet) = &host.secondary_subnet {
                flags.push(("subnet", subnet.clone()));
            }
            self.run("configure-secondary-interface", &flags).map(drop)
        })
    }

    fn console_output<'a>(
        &'a self,
        target: &'a str,
    ) -> CloudFuture<'a, Option<String>, Self::Error> {
        Box::pin(async move {
            let output = self.run("console-output", &[("name", target.to_owned())])?;
            let text = output.stdout.trim();
            Ok((!text.is_empty()).then(|| text.to_owned()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{CommandInvocation, ScriptedRunner, sample_host};

    fn api(runner: &ScriptedRunner) -> CliCloudApi<ScriptedRunner> {
        CliCloudApi::new("aws", "nodekeeper-cloud", runner.clone())
    }

    #[tokio::test]
    async fn host_lookup_parses_null_as_absent() {
        let runner = ScriptedRunner::new();
        runner.push_output(Some(0), "null\n", "");

        let host = api(&runner)
            .get_host_info("db-n1")
            .await
            .unwrap_or_else(|err| panic!("lookup should succeed: {err}"));

        assert!(host.is_none());
        assert_eq!(
            runner
                .invocations()
                .first()
                .map(CommandInvocation::command_string),
            Some(String::from("nodekeeper-cloud host-info --name db-n1"))
        );
    }

    #[tokio::test]
    async fn host_lookup_parses_host_object() {
        let runner = ScriptedRunner::new();
        let payload = serde_json::to_string(&sample_host("db-n1", true))
            .unwrap_or_else(|err| panic!("host should serialise: {err}"));
        runner.push_output(Some(0), payload, "");

        let host = api(&runner)
            .get_host_info("db-n1")
            .await
            .unwrap_or_else(|err| panic!("lookup should succeed: {err}"));

        assert_eq!(host, Some(sample_host("db-n1", true)));
    }

    #[tokio::test]
    async fn open_port_passes_candidates_in_order() {
        let runner = ScriptedRunner::new();
        runner.push_output(Some(0), "2222", "");
        let host = sample_host("db-n1", true);

        let port = api(&runner)
            .open_ssh_port(&host, &[22, 2222])
            .await
            .unwrap_or_else(|err| panic!("port check should succeed: {err}"));

        assert_eq!(port, Some(2222));
        let invocations = runner.invocations();
        let command = invocations
            .first()
            .map(CommandInvocation::command_string)
            .unwrap_or_default();
        assert!(command.ends_with("--ports 22,2222"), "command: {command}");
    }

    #[tokio::test]
    async fn failures_carry_stderr() {
        let runner = ScriptedRunner::new();
        runner.push_output(Some(3), "", "quota exceeded");
        let host = sample_host("db-n1", true);

        let Err(err) = api(&runner).resize_instance(&host, "c5.xlarge").await else {
            panic!("resize should fail");
        };

        assert!(
            matches!(err, CliCloudError::CommandFailure { ref command, ref stderr, .. }
                if command == "resize" && stderr == "quota exceeded"),
            "unexpected error: {err}"
        );
    }

    #[tokio::test]
    async fn malformed_listing_is_a_parse_error() {
        let runner = ScriptedRunner::new();
        runner.push_output(Some(0), "{not json", "");

        let Err(err) = api(&runner).list_hosts(None).await else {
            panic!("listing should fail");
        };

        assert!(matches!(err, CliCloudError::Parse { ref command, .. } if command == "list"));
    }

    #[tokio::test]
    async fn empty_console_output_is_absent() {
        let runner = ScriptedRunner::new();
        runner.push_output(Some(0), "  \n", "");

        let output = api(&runner)
            .console_output("db-n1")
            .await
            .unwrap_or_else(|err| panic!("console fetch should succeed: {err}"));

        assert!(output.is_none());
    }
}
