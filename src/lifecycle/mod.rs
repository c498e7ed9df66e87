//! Lifecycle orchestration for database nodes.
//!
//! The [`Orchestrator`] sequences Create, Provision, Configure, Control,
//! and Destroy plus the maintenance operations around them. Each call owns
//! its [`ConnectionContext`]; steps run strictly in order and delegate state
//! changes to the cloud API, the task executor, or the remote shell.

use camino::Utf8Path;
use shell_escape::unix::escape;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::cloud::CloudApi;
use crate::config::OpsConfig;
use crate::context::{ConnectionContext, NodeTarget};
use crate::error::OpsError;
use crate::executor::{TaskExecutor, TaskOutput};
use crate::failure::ConsoleLogCapture;
use crate::host::HostInfo;
use crate::reachability::HostWaiter;
use crate::ssh::{RemoteCommandOutput, RemoteShell, SshEndpoint};

mod configure;
mod control;
mod create;
mod destroy;
mod hooks;
mod inspect;
mod maintenance;
mod provision;

pub use configure::{ConfigureOutcome, ConfigureRequest, PackageSource, ProcessType};
pub use control::{ControlOutcome, ProcessControl};
pub use create::{CreateOutput, CreateRequest};
pub use hooks::{ExecutionLang, HookRequest, PRE_NODE_PROVISION};
pub use inspect::HostListing;
pub use maintenance::{ChangeInstanceTypeRequest, RebootRequest};
pub use provision::ProvisionRequest;

/// Drives lifecycle operations against one cloud, executor, and shell.
#[derive(Debug)]
pub struct Orchestrator<C, X, S> {
    cloud: C,
    executor: X,
    shell: S,
    config: OpsConfig,
    console: ConsoleLogCapture,
}

impl<C, X, S> Orchestrator<C, X, S>
where
    C: CloudApi,
    X: TaskExecutor,
    S: RemoteShell,
{
    /// Creates an orchestrator. Console logs go to `config.console_log_dir`.
    pub fn new(cloud: C, executor: X, shell: S, config: OpsConfig) -> Self {
        let console = ConsoleLogCapture::new(config.console_log_dir.clone());
        Self {
            cloud,
            executor,
            shell,
            config,
            console,
        }
    }

    /// Cloud API in use.
    pub const fn cloud(&self) -> &C {
        &self.cloud
    }

    /// Task executor in use.
    pub const fn executor(&self) -> &X {
        &self.executor
    }

    /// Remote shell in use.
    pub const fn shell(&self) -> &S {
        &self.shell
    }

    /// Orchestration settings.
    pub const fn config(&self) -> &OpsConfig {
        &self.config
    }

    pub(crate) const fn waiter(&self) -> HostWaiter<'_, C, S> {
        HostWaiter::new(
            &self.cloud,
            &self.shell,
            self.config.host_wait_policy(),
            self.config.probe_policy(),
            self.config.default_ssh_port,
        )
    }

    pub(crate) async fn lookup(&self, name: &str) -> Result<Option<HostInfo>, OpsError> {
        self.cloud
            .get_host_info(name)
            .await
            .map_err(|err| OpsError::cloud("host lookup", &err))
    }

    pub(crate) async fn require_host(&self, name: &str) -> Result<HostInfo, OpsError> {
        self.lookup(name)
            .await?
            .ok_or_else(|| OpsError::HostNotFound {
                target: name.to_owned(),
            })
    }

    /// Seeds a context for `target` and records the placement of `host`.
    pub(crate) fn host_context(&self, target: &NodeTarget, host: &HostInfo) -> ConnectionContext {
        let mut ctx = target.base_context();
        ctx.apply_host_info(host, self.cloud.name());
        ctx
    }

    pub(crate) fn run_playbook(
        &self,
        playbook: &str,
        ctx: &ConnectionContext,
        host: Option<&HostInfo>,
    ) -> Result<TaskOutput, OpsError> {
        let node = ctx.get_str("instance_name").unwrap_or("localhost");
        info!(playbook, node, "running playbook");
        self.executor
            .run(playbook, ctx, host)
            .map_err(|err| OpsError::executor(playbook, &err))
    }

    pub(crate) fn remote(
        &self,
        target: &str,
        endpoint: &SshEndpoint,
        command: &str,
    ) -> Result<RemoteCommandOutput, OpsError> {
        self.shell
            .execute(endpoint, command)
            .map_err(|err| OpsError::Remote {
                target: target.to_owned(),
                message: err.to_string(),
            })
    }

    /// Runs `command` and reports whether it exited zero.
    fn remote_check(&self, endpoint: &SshEndpoint, command: &str) -> bool {
        self.shell
            .execute(endpoint, command)
            .is_ok_and(|output| output.is_success())
    }

    /// Stages `local` in the remote temp directory.
    ///
    /// Returns the staged path.
    pub(crate) fn stage(
        &self,
        target: &str,
        endpoint: &SshEndpoint,
        local: &Utf8Path,
    ) -> Result<String, OpsError> {
        let transfer_failed = || OpsError::Transfer {
            target: target.to_owned(),
            path: local.to_string(),
        };
        let output = self
            .shell
            .copy_to_tmp(endpoint, local)
            .map_err(|_| transfer_failed())?;
        if !output.is_success() {
            return Err(transfer_failed());
        }
        Ok(self.shell.staged_path(local))
    }

    /// Polls the boot script completion marker, then checks the success
    /// marker unless `tolerate_failure` is set.
    pub(crate) async fn wait_for_boot_script(
        &self,
        target: &str,
        endpoint: &SshEndpoint,
        tolerate_failure: bool,
    ) -> Result<(), OpsError> {
        info!(node = %target, "waiting for the boot script to finish");
        let policy = self.config.boot_script_policy();
        let max_attempts = policy.max_attempts();
        let done = format!(
            "test -e {}",
            escape(self.config.boot_script_done_marker.as_str().into())
        );
        for attempt in 1..=max_attempts {
            if self.remote_check(endpoint, &done) {
                break;
            }
            if attempt < max_attempts {
                sleep(policy.delay_for(attempt)).await;
            }
        }

        if tolerate_failure {
            info!(node = %target, "boot script verification skipped for secondary subnet");
            return Ok(());
        }
        let succeeded = format!(
            "test -e {}",
            escape(self.config.boot_script_success_marker.as_str().into())
        );
        if !self.remote_check(endpoint, &succeeded) {
            return Err(OpsError::BootScript {
                target: target.to_owned(),
            });
        }
        info!(node = %target, "boot script finished");
        Ok(())
    }

    /// Passes `result` through, dumping the console of `target` first when it
    /// is an error.
    pub(crate) async fn with_diagnostics<T>(
        &self,
        target: &str,
        result: Result<T, OpsError>,
    ) -> Result<T, OpsError> {
        if let Err(err) = &result {
            warn!(node = %target, error = %err, kind = %err.kind(), "operation failed");
            self.console.capture(&self.cloud, target).await;
        }
        result
    }
}
