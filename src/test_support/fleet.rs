//! In-memory fleet shared by the simulated cloud, shell, and executor.
//!
//! All three doubles hold the same state, so a key added through the
//! executor's authorized-keys playbook is immediately visible to the shell's
//! handshake check, and a port moved by the custom-port playbook is what the
//! cloud's open-port check reports.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use camino::Utf8Path;
use serde_json::Value;
use thiserror::Error;

use super::{BOOT_DONE_MARKER, BOOT_SUCCESS_MARKER};
use crate::cloud::{CloudApi, CloudFuture};
use crate::config::OpsConfig;
use crate::context::ConnectionContext;
use crate::executor::{
    CREATE_INSTANCE, DESTROY_INSTANCE, EDIT_AUTHORIZED_KEYS, TaskExecutor, TaskOutput,
    USE_CUSTOM_SSH_PORT,
};
use crate::host::HostInfo;
use crate::lifecycle::Orchestrator;
use crate::ssh::{RemoteCommandOutput, RemoteShell, SshEndpoint, SshError};

/// Remote directory the simulated shell stages files into.
const SIM_TMP_DIR: &str = "/tmp";

/// Failure injected into a simulated collaborator.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("simulated {operation} failure")]
pub struct SimulatedError {
    /// Operation that was configured to fail.
    pub operation: String,
}

/// One simulated instance.
#[derive(Clone, Debug)]
pub struct SimNode {
    info: HostInfo,
    open_ports: BTreeSet<u16>,
    authorized_keys: BTreeSet<String>,
    accepts_default_key: bool,
    lookups_until_running: Option<u32>,
    boot_checks_until_done: Option<u32>,
    boot_succeeded: bool,
    reboot_stderr: String,
    console: Option<String>,
}

impl SimNode {
    /// Wraps a host snapshot; port 22 is open and the default key works.
    #[must_use]
    pub fn new(info: HostInfo) -> Self {
        Self {
            info,
            open_ports: BTreeSet::from([22]),
            authorized_keys: BTreeSet::new(),
            accepts_default_key: true,
            lookups_until_running: None,
            boot_checks_until_done: Some(0),
            boot_succeeded: true,
            reboot_stderr: String::new(),
            console: None,
        }
    }

    /// Replaces the set of ports sshd listens on.
    #[must_use]
    pub fn with_open_ports(mut self, ports: &[u16]) -> Self {
        self.open_ports = ports.iter().copied().collect();
        self
    }

    /// Authorizes a public key.
    #[must_use]
    pub fn with_authorized_key(mut self, public_key: &str) -> Self {
        self.authorized_keys.insert(public_key.to_owned());
        self
    }

    /// Controls whether connections without an explicit key succeed.
    #[must_use]
    pub const fn accepting_default_key(mut self, accepts: bool) -> Self {
        self.accepts_default_key = accepts;
        self
    }

    /// Reports the node as stopped until the `n`th lookup.
    #[must_use]
    pub fn running_after_lookups(mut self, n: u32) -> Self {
        self.info.is_running = false;
        self.lookups_until_running = Some(n);
        self
    }

    /// Keeps the node stopped for every lookup.
    #[must_use]
    pub fn stopped(mut self) -> Self {
        self.info.is_running = false;
        self.lookups_until_running = None;
        self
    }

    /// Boot script reports completion on check number `n + 1`, or never.
    #[must_use]
    pub const fn boot_done_after_checks(mut self, n: Option<u32>) -> Self {
        self.boot_checks_until_done = n;
        self
    }

    /// Whether the boot script writes its success marker.
    #[must_use]
    pub const fn boot_succeeds(mut self, succeeded: bool) -> Self {
        self.boot_succeeded = succeeded;
        self
    }

    /// Stderr produced by `sudo reboot`.
    #[must_use]
    pub fn with_reboot_stderr(mut self, stderr: &str) -> Self {
        self.reboot_stderr = stderr.to_owned();
        self
    }

    /// Serial console output returned for diagnostics.
    #[must_use]
    pub fn with_console(mut self, text: &str) -> Self {
        self.console = Some(text.to_owned());
        self
    }
}

/// Record of one executor invocation.
#[derive(Clone, Debug, PartialEq)]
pub struct PlaybookRun {
    /// Playbook name.
    pub playbook: String,
    /// Variables handed to the executor.
    pub vars: ConnectionContext,
}

#[derive(Debug, Default)]
struct FleetState {
    nodes: BTreeMap<String, SimNode>,
    pending_creates: BTreeMap<String, (SimNode, TaskOutput)>,
    keypairs: BTreeMap<String, String>,
    lookups: BTreeMap<String, u32>,
    handshakes: u32,
    playbook_runs: Vec<PlaybookRun>,
    cloud_calls: Vec<String>,
    remote_commands: Vec<String>,
    staged_files: Vec<String>,
    failing_playbooks: BTreeSet<String>,
    failing_cloud_ops: BTreeSet<String>,
    failing_commands: Vec<(String, String)>,
    transfers_fail: bool,
}

impl FleetState {
    fn node_by_ip(&self, ip: &str) -> Option<&SimNode> {
        self.nodes.values().find(|node| node.info.private_ip == ip)
    }

    fn node_by_ip_mut(&mut self, ip: &str) -> Option<&mut SimNode> {
        self.nodes.values_mut().find(|node| node.info.private_ip == ip)
    }

    fn accepts(&self, endpoint: &SshEndpoint) -> bool {
        let Some(node) = self.node_by_ip(endpoint.host()) else {
            return false;
        };
        if !node.info.is_running || !node.open_ports.contains(&endpoint.port()) {
            return false;
        }
        match endpoint.private_key_file() {
            None => node.accepts_default_key,
            Some(path) => self
                .keypairs
                .get(path.as_str())
                .is_some_and(|public| node.authorized_keys.contains(public)),
        }
    }

    fn cloud_op(&mut self, operation: &str, detail: String) -> Result<(), SimulatedError> {
        if self.failing_cloud_ops.contains(operation) {
            return Err(SimulatedError {
                operation: operation.to_owned(),
            });
        }
        self.cloud_calls.push(detail);
        Ok(())
    }
}

/// Shared handle to the simulated fleet.
#[derive(Clone, Debug, Default)]
pub struct SimulatedFleet {
    state: Arc<Mutex<FleetState>>,
}

impl SimulatedFleet {
    /// Creates an empty fleet.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, FleetState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds an existing node.
    pub fn add_node(&self, node: SimNode) {
        self.state().nodes.insert(node.info.name.clone(), node);
    }

    /// Registers the node the create playbook will bring up, plus the
    /// output the playbook reports.
    pub fn prepare_create(&self, node: SimNode, output: TaskOutput) {
        self.state()
            .pending_creates
            .insert(node.info.name.clone(), (node, output));
    }

    /// Maps a private key path to its public key.
    pub fn add_keypair(&self, private_key: &str, public_key: &str) {
        self.state()
            .keypairs
            .insert(private_key.to_owned(), public_key.to_owned());
    }

    /// Makes every run of `playbook` fail.
    pub fn fail_playbook(&self, playbook: &str) {
        self.state().failing_playbooks.insert(playbook.to_owned());
    }

    /// Makes every cloud call named `operation` fail.
    pub fn fail_cloud(&self, operation: &str) {
        self.state().failing_cloud_ops.insert(operation.to_owned());
    }

    /// Makes remote commands containing `fragment` exit 1 with `stderr`.
    pub fn fail_command(&self, fragment: &str, stderr: &str) {
        self.state()
            .failing_commands
            .push((fragment.to_owned(), stderr.to_owned()));
    }

    /// Makes every copy-to-temp fail.
    pub fn fail_transfers(&self) {
        self.state().transfers_fail = true;
    }

    /// Simulated cloud API.
    #[must_use]
    pub fn cloud(&self) -> SimCloud {
        SimCloud {
            fleet: self.clone(),
        }
    }

    /// Simulated remote shell.
    #[must_use]
    pub fn shell(&self) -> SimShell {
        SimShell {
            fleet: self.clone(),
        }
    }

    /// Simulated task executor.
    #[must_use]
    pub fn executor(&self) -> SimExecutor {
        SimExecutor {
            fleet: self.clone(),
        }
    }

    /// Orchestrator wired to this fleet.
    #[must_use]
    pub fn orchestrator(&self, config: OpsConfig) -> Orchestrator<SimCloud, SimExecutor, SimShell> {
        Orchestrator::new(self.cloud(), self.executor(), self.shell(), config)
    }

    /// Current snapshot of `name`, without counting a lookup.
    #[must_use]
    pub fn host(&self, name: &str) -> Option<HostInfo> {
        self.state().nodes.get(name).map(|node| node.info.clone())
    }

    /// Number of cloud lookups made for `name`.
    #[must_use]
    pub fn lookups(&self, name: &str) -> u32 {
        self.state().lookups.get(name).copied().unwrap_or(0)
    }

    /// Number of SSH handshakes attempted against any node.
    #[must_use]
    pub fn handshakes(&self) -> u32 {
        self.state().handshakes
    }

    /// Every executor run, in order.
    #[must_use]
    pub fn playbook_runs(&self) -> Vec<PlaybookRun> {
        self.state().playbook_runs.clone()
    }

    /// Names of the playbooks run, in order.
    #[must_use]
    pub fn playbooks(&self) -> Vec<String> {
        self.state()
            .playbook_runs
            .iter()
            .map(|run| run.playbook.clone())
            .collect()
    }

    /// Mutating cloud calls, in order.
    #[must_use]
    pub fn cloud_calls(&self) -> Vec<String> {
        self.state().cloud_calls.clone()
    }

    /// Remote commands executed, formatted as `<ip> <command>`.
    #[must_use]
    pub fn remote_commands(&self) -> Vec<String> {
        self.state().remote_commands.clone()
    }

    /// Files staged with copy-to-temp, formatted as `<ip>:<path>`.
    #[must_use]
    pub fn staged_files(&self) -> Vec<String> {
        self.state().staged_files.clone()
    }

    /// Playbook runs plus mutating cloud calls.
    #[must_use]
    pub fn mutating_calls(&self) -> usize {
        let state = self.state();
        state.playbook_runs.len() + state.cloud_calls.len()
    }

    /// Public keys authorized on `name`.
    #[must_use]
    pub fn authorized_keys(&self, name: &str) -> BTreeSet<String> {
        self.state()
            .nodes
            .get(name)
            .map(|node| node.authorized_keys.clone())
            .unwrap_or_default()
    }

    /// Ports sshd listens on for `name`.
    #[must_use]
    pub fn open_ports(&self, name: &str) -> BTreeSet<u16> {
        self.state()
            .nodes
            .get(name)
            .map(|node| node.open_ports.clone())
            .unwrap_or_default()
    }
}

/// Simulated [`CloudApi`].
#[derive(Clone, Debug)]
pub struct SimCloud {
    fleet: SimulatedFleet,
}

impl SimCloud {
    fn lookup(&self, name: &str) -> Result<Option<HostInfo>, SimulatedError> {
        let mut state = self.fleet.state();
        *state.lookups.entry(name.to_owned()).or_insert(0) += 1;
        if state.failing_cloud_ops.contains("host-info") {
            return Err(SimulatedError {
                operation: String::from("host-info"),
            });
        }
        let Some(node) = state.nodes.get_mut(name) else {
            return Ok(None);
        };
        if let Some(remaining) = node.lookups_until_running {
            if remaining <= 1 {
                node.lookups_until_running = None;
                node.info.is_running = true;
            } else {
                node.lookups_until_running = Some(remaining - 1);
            }
        }
        Ok(Some(node.info.clone()))
    }

    fn mutate(
        &self,
        operation: &str,
        host: &HostInfo,
        detail: String,
        apply: impl FnOnce(&mut SimNode),
    ) -> Result<(), SimulatedError> {
        let mut state = self.fleet.state();
        state.cloud_op(operation, detail)?;
        if let Some(node) = state.nodes.get_mut(&host.name) {
            apply(node);
        }
        Ok(())
    }
}

fn join_ports(ports: &[u16]) -> String {
    ports
        .iter()
        .map(u16::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

impl CloudApi for SimCloud {
    type Error = SimulatedError;

    fn name(&self) -> &'static str {
        "aws"
    }

    fn get_host_info<'a>(
        &'a self,
        target: &'a str,
    ) -> CloudFuture<'a, Option<HostInfo>, Self::Error> {
        Box::pin(async move { self.lookup(target) })
    }

    fn list_hosts<'a>(
        &'a self,
        pattern: Option<&'a str>,
    ) -> CloudFuture<'a, Vec<HostInfo>, Self::Error> {
        Box::pin(async move {
            Ok(self
                .fleet
                .state()
                .nodes
                .values()
                .filter(|node| pattern.is_none_or(|needle| node.info.name.contains(needle)))
                .map(|node| node.info.clone())
                .collect())
        })
    }

    fn stop_instance<'a>(&'a self, host: &'a HostInfo) -> CloudFuture<'a, (), Self::Error> {
        Box::pin(async move {
            self.mutate("stop", host, format!("stop {}", host.name), |node| {
                node.info.is_running = false;
            })
        })
    }

    fn start_instance<'a>(
        &'a self,
        host: &'a HostInfo,
        ports: &'a [u16],
    ) -> CloudFuture<'a, (), Self::Error> {
        Box::pin(async move {
            let detail = format!("start {} {}", host.name, join_ports(ports));
            self.mutate("start", host, detail, |node| node.info.is_running = true)
        })
    }

    fn reboot_instance<'a>(
        &'a self,
        host: &'a HostInfo,
        ports: &'a [u16],
    ) -> CloudFuture<'a, (), Self::Error> {
        Box::pin(async move {
            let detail = format!("reboot {} {}", host.name, join_ports(ports));
            self.mutate("reboot", host, detail, |_| {})
        })
    }

    fn resize_instance<'a>(
        &'a self,
        host: &'a HostInfo,
        instance_type: &'a str,
    ) -> CloudFuture<'a, (), Self::Error> {
        Box::pin(async move {
            let detail = format!("resize {} {instance_type}", host.name);
            self.mutate("resize", host, detail, |node| {
                node.info.instance_type = instance_type.to_owned();
            })
        })
    }

    fn update_disk<'a>(
        &'a self,
        host: &'a HostInfo,
        size_gb: u32,
    ) -> CloudFuture<'a, (), Self::Error> {
        Box::pin(async move {
            let detail = format!("update-disk {} {size_gb}", host.name);
            self.mutate("update-disk", host, detail, |_| {})
        })
    }

    fn open_ssh_port<'a>(
        &'a self,
        host: &'a HostInfo,
        candidates: &'a [u16],
    ) -> CloudFuture<'a, Option<u16>, Self::Error> {
        Box::pin(async move {
            let state = self.fleet.state();
            if state.failing_cloud_ops.contains("open-port") {
                return Err(SimulatedError {
                    operation: String::from("open-port"),
                });
            }
            Ok(state.nodes.get(&host.name).and_then(|node| {
                candidates
                    .iter()
                    .copied()
                    .find(|port| node.open_ports.contains(port))
            }))
        })
    }

    fn configure_secondary_interface<'a>(
        &'a self,
        host: &'a HostInfo,
    ) -> CloudFuture<'a, (), Self::Error> {
        Box::pin(async move {
            let detail = format!("configure-secondary-interface {}", host.name);
            self.mutate("configure-secondary-interface", host, detail, |_| {})
        })
    }

    fn console_output<'a>(
        &'a self,
        target: &'a str,
    ) -> CloudFuture<'a, Option<String>, Self::Error> {
        Box::pin(async move {
            let state = self.fleet.state();
            if state.failing_cloud_ops.contains("console-output") {
                return Err(SimulatedError {
                    operation: String::from("console-output"),
                });
            }
            Ok(state.nodes.get(target).and_then(|node| node.console.clone()))
        })
    }
}

/// Simulated [`RemoteShell`].
#[derive(Clone, Debug)]
pub struct SimShell {
    fleet: SimulatedFleet,
}

fn refused(endpoint: &SshEndpoint) -> RemoteCommandOutput {
    RemoteCommandOutput {
        exit_code: Some(255),
        stdout: String::new(),
        stderr: format!(
            "ssh: connect to host {} port {}: Connection refused",
            endpoint.host(),
            endpoint.port()
        ),
    }
}

fn exit_with(code: i32, stderr: &str) -> RemoteCommandOutput {
    RemoteCommandOutput {
        exit_code: Some(code),
        stdout: String::new(),
        stderr: stderr.to_owned(),
    }
}

impl RemoteShell for SimShell {
    fn execute(
        &self,
        endpoint: &SshEndpoint,
        command: &str,
    ) -> Result<RemoteCommandOutput, SshError> {
        let mut state = self.fleet.state();
        if !state.accepts(endpoint) {
            return Ok(refused(endpoint));
        }
        state
            .remote_commands
            .push(format!("{} {command}", endpoint.host()));
        if let Some((_, stderr)) = state
            .failing_commands
            .iter()
            .find(|(fragment, _)| command.contains(fragment.as_str()))
        {
            return Ok(exit_with(1, stderr));
        }
        let Some(node) = state.node_by_ip_mut(endpoint.host()) else {
            return Ok(refused(endpoint));
        };

        if command.contains(BOOT_DONE_MARKER) {
            let done = match node.boot_checks_until_done {
                Some(0) => true,
                Some(remaining) => {
                    node.boot_checks_until_done = Some(remaining - 1);
                    false
                }
                None => false,
            };
            return Ok(exit_with(i32::from(!done), ""));
        }
        if command.contains(BOOT_SUCCESS_MARKER) {
            return Ok(exit_with(i32::from(!node.boot_succeeded), ""));
        }
        if command.contains("reboot") {
            return Ok(exit_with(0, &node.reboot_stderr));
        }
        Ok(exit_with(0, ""))
    }

    fn copy_to_tmp(
        &self,
        endpoint: &SshEndpoint,
        local: &Utf8Path,
    ) -> Result<RemoteCommandOutput, SshError> {
        let mut state = self.fleet.state();
        if !state.accepts(endpoint) {
            return Ok(refused(endpoint));
        }
        if state.transfers_fail {
            return Ok(exit_with(1, "scp: write failed"));
        }
        state
            .staged_files
            .push(format!("{}:{local}", endpoint.host()));
        Ok(exit_with(0, ""))
    }

    fn remote_tmp_dir(&self) -> &str {
        SIM_TMP_DIR
    }

    fn public_key(&self, private_key: &Utf8Path) -> Result<String, SshError> {
        self.fleet
            .state()
            .keypairs
            .get(private_key.as_str())
            .cloned()
            .ok_or_else(|| SshError::CommandFailure {
                program: String::from("ssh-keygen"),
                status_text: String::from("1"),
                stderr: format!("{private_key}: No such file or directory"),
            })
    }

    fn handshake(&self, endpoint: &SshEndpoint) -> bool {
        let mut state = self.fleet.state();
        state.handshakes += 1;
        state.accepts(endpoint)
    }
}

/// Simulated [`TaskExecutor`].
#[derive(Clone, Debug)]
pub struct SimExecutor {
    fleet: SimulatedFleet,
}

impl TaskExecutor for SimExecutor {
    type Error = SimulatedError;

    fn run(
        &self,
        playbook: &str,
        vars: &ConnectionContext,
        _host: Option<&HostInfo>,
    ) -> Result<TaskOutput, Self::Error> {
        let mut state = self.fleet.state();
        state.playbook_runs.push(PlaybookRun {
            playbook: playbook.to_owned(),
            vars: vars.clone(),
        });
        if state.failing_playbooks.contains(playbook) {
            return Err(SimulatedError {
                operation: playbook.to_owned(),
            });
        }

        let name = vars.get_str("instance_name").unwrap_or_default().to_owned();
        match playbook {
            CREATE_INSTANCE => {
                if let Some((node, output)) = state.pending_creates.remove(&name) {
                    state.nodes.insert(name, node);
                    return Ok(output);
                }
            }
            DESTROY_INSTANCE => {
                state.nodes.remove(&name);
            }
            EDIT_AUTHORIZED_KEYS => {
                let key = vars
                    .get_str("public_key_content")
                    .unwrap_or_default()
                    .to_owned();
                let adding = vars.get_str("command") == Some("add-authorized-key");
                if let Some(node) = state.nodes.get_mut(&name) {
                    if adding {
                        node.authorized_keys.insert(key);
                    } else {
                        node.authorized_keys.remove(&key);
                    }
                }
            }
            USE_CUSTOM_SSH_PORT => {
                let port = vars
                    .get("custom_ssh_port")
                    .and_then(Value::as_u64)
                    .and_then(|port| u16::try_from(port).ok());
                if let (Some(node), Some(port)) = (state.nodes.get_mut(&name), port) {
                    node.open_ports = BTreeSet::from([port]);
                }
            }
            _ => {}
        }
        Ok(TaskOutput::new())
    }
}
