//! Test support utilities shared across unit and integration tests.

use std::collections::VecDeque;
use std::ffi::OsString;
use std::sync::{Arc, Mutex, PoisonError};

use crate::config::OpsConfig;
use crate::host::{HostInfo, ServerType};
use crate::process::{CommandOutput, CommandRunner, SpawnError};

mod fleet;

pub use fleet::{
    PlaybookRun, SimCloud, SimExecutor, SimNode, SimShell, SimulatedError, SimulatedFleet,
};

/// Remote file the simulated nodes treat as the boot completion marker.
pub const BOOT_DONE_MARKER: &str = "/var/lib/cloud/instance/boot-finished";

/// Remote file the simulated nodes treat as the boot success marker.
pub const BOOT_SUCCESS_MARKER: &str = "/etc/nodekeeper/boot-script-complete";

/// Scripted command runner that returns pre-seeded outputs in FIFO order.
///
/// Used to drive deterministic command outcomes without spawning processes.
#[derive(Clone, Debug, Default)]
pub struct ScriptedRunner {
    responses: Arc<Mutex<VecDeque<CommandOutput>>>,
    invocations: Arc<Mutex<Vec<CommandInvocation>>>,
}

/// Records a single invocation made through [`ScriptedRunner`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandInvocation {
    /// Program name as passed to the runner.
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<OsString>,
}

impl CommandInvocation {
    /// Returns a shell-like command string for assertions.
    #[must_use]
    pub fn command_string(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(self.program.clone());
        parts.extend(
            self.args
                .iter()
                .map(|arg| arg.to_string_lossy().into_owned()),
        );
        parts.join(" ")
    }
}

impl ScriptedRunner {
    /// Creates a new runner with no queued responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of all invocations recorded so far.
    #[must_use]
    pub fn invocations(&self) -> Vec<CommandInvocation> {
        self.invocations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Pushes a successful exit status.
    pub fn push_success(&self) {
        self.push_output(Some(0), "", "");
    }

    /// Pushes a failing exit code with stderr text.
    pub fn push_failure(&self, code: i32) {
        self.push_output(Some(code), "", "simulated failure");
    }

    /// Pushes an explicit command output response.
    pub fn push_output(
        &self,
        code: Option<i32>,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) {
        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(CommandOutput {
                code,
                stdout: stdout.into(),
                stderr: stderr.into(),
            });
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, SpawnError> {
        self.invocations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(CommandInvocation {
                program: program.to_owned(),
                args: args.to_vec(),
            });
        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .ok_or_else(|| SpawnError {
                program: program.to_owned(),
                message: String::from("no scripted response available"),
            })
    }
}

/// Returns a cluster-server host snapshot with a deterministic address.
#[must_use]
pub fn sample_host(name: &str, is_running: bool) -> HostInfo {
    let octet = name.bytes().fold(0_u8, u8::wrapping_add) % 200 + 10;
    HostInfo {
        name: name.to_owned(),
        id: format!("i-{name}"),
        private_ip: format!("10.0.0.{octet}"),
        public_ip: None,
        region: String::from("us-west-2"),
        zone: String::from("us-west-2a"),
        instance_type: String::from("c5.large"),
        is_running,
        instance_state: None,
        server_type: Some(ServerType::cluster()),
        secondary_subnet: None,
    }
}

/// Configuration with production ceilings but no real sleeping.
#[must_use]
pub fn test_config() -> OpsConfig {
    OpsConfig {
        cloud_provider: String::from("aws"),
        default_ssh_user: String::from("centos"),
        default_ssh_port: 22,
        private_key_file: None,
        service_user: String::from("dbnode"),
        host_lookup_retries: 2,
        host_lookup_interval_ms: 0,
        probe_attempts: 3,
        key_probe_attempts: 3,
        probe_delay_ms: 0,
        boot_script_retries: 5,
        boot_script_base_delay_ms: 0,
        boot_script_done_marker: BOOT_DONE_MARKER.to_owned(),
        boot_script_success_marker: BOOT_SUCCESS_MARKER.to_owned(),
        console_log_dir: String::from("/tmp"),
        playbook_dir: String::from("/opt/nodekeeper/playbooks"),
        executor_bin: String::from("ansible-playbook"),
        cloud_helper_bin: String::from("nodekeeper-cloud"),
    }
}
