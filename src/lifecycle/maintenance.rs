//! Reboot, instance type changes, and disk growth.

use tracing::info;

use super::Orchestrator;
use crate::cloud::CloudApi;
use crate::context::NodeTarget;
use crate::error::OpsError;
use crate::executor::{EXPAND_FILE_SYSTEM, SETUP_CGROUP, TaskExecutor};
use crate::host::HostInfo;
use crate::reachability::reconcile_open_port;
use crate::ssh::RemoteShell;

/// Options for [`Orchestrator::reboot`].
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct RebootRequest {
    /// Reboot with `sudo reboot` over SSH instead of the cloud API.
    pub use_ssh: bool,
}

/// Options for [`Orchestrator::change_instance_type`].
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ChangeInstanceTypeRequest {
    /// Instance type to switch to; required.
    pub instance_type: Option<String>,
    /// Stop and resize even when the type is unchanged.
    pub force: bool,
    /// Memory ceiling for the Postgres process, in MiB.
    pub pg_max_mem_mb: u32,
    /// Install without internet access.
    pub air_gap: bool,
}

impl<C, X, S> Orchestrator<C, X, S>
where
    C: CloudApi,
    X: TaskExecutor,
    S: RemoteShell,
{
    /// Reboots a running node.
    ///
    /// # Errors
    ///
    /// Returns [`OpsError::HostNotFound`] or [`OpsError::NotRunning`] when the
    /// node cannot be rebooted, [`OpsError::Reboot`] when `sudo reboot`
    /// reports an error, or a recoverable timeout when the node does not
    /// come back.
    pub async fn reboot(
        &self,
        target: &NodeTarget,
        request: RebootRequest,
    ) -> Result<(), OpsError> {
        let host = self.require_host(&target.name).await?;
        if !host.is_running {
            return Err(OpsError::NotRunning {
                target: target.name.clone(),
                state: host.state_label(),
            });
        }
        info!(node = %target.name, use_ssh = request.use_ssh, "rebooting instance");

        let mut ctx = self.host_context(target, &host);
        if !request.use_ssh {
            let ports = [self.config.default_ssh_port, target.custom_ssh_port];
            return self
                .cloud
                .reboot_instance(&host, &ports)
                .await
                .map_err(|err| OpsError::cloud("reboot", &err));
        }

        ctx.apply_address(&host, self.config.default_ssh_port);
        reconcile_open_port(&self.cloud, &host, &target.name, target.custom_ssh_port, &mut ctx)
            .await?;
        let endpoint = ctx.endpoint()?;
        let output = self.remote(&target.name, &endpoint, "sudo reboot")?;
        let stderr = output.stderr.trim();
        if !stderr.is_empty() {
            return Err(OpsError::Reboot {
                target: target.name.clone(),
                message: stderr.to_owned(),
            });
        }
        self.waiter()
            .wait_for_host(target, &mut ctx, false)
            .await?;
        info!(node = %target.name, "instance rebooted");
        Ok(())
    }

    /// Switches the instance type, restarting the node.
    ///
    /// The instance is always started again, even when resizing failed.
    ///
    /// # Errors
    ///
    /// Returns [`OpsError::InvalidRequest`] without an instance type,
    /// [`OpsError::HostNotFound`] for a missing node, or a fatal
    /// [`OpsError::Cloud`] when stopping, resizing, or starting fails.
    pub async fn change_instance_type(
        &self,
        target: &NodeTarget,
        request: &ChangeInstanceTypeRequest,
    ) -> Result<(), OpsError> {
        let Some(instance_type) = request.instance_type.as_deref() else {
            return Err(OpsError::invalid(
                "instance type not defined, pass the intended type",
            ));
        };
        let host = self.require_host(&target.name).await?;
        let mut ctx = self.host_context(target, &host);
        ctx.apply_address(&host, target.custom_ssh_port);
        ctx.set("instance_type", instance_type);
        ctx.set("pg_max_mem_mb", request.pg_max_mem_mb);
        ctx.set("air_gap", request.air_gap);

        let resized = self.resize(target, &host, instance_type, request.force).await;
        let started = self
            .cloud
            .start_instance(&host, &[target.custom_ssh_port])
            .await
            .map_err(|err| OpsError::cloud("start", &err));
        resized?;
        started?;
        info!(node = %target.name, "instance started");

        self.run_playbook(SETUP_CGROUP, &ctx, Some(&host))?;
        Ok(())
    }

    async fn resize(
        &self,
        target: &NodeTarget,
        host: &HostInfo,
        instance_type: &str,
        force: bool,
    ) -> Result<(), OpsError> {
        if host.instance_type == instance_type && !force {
            info!(node = %target.name, instance_type, "instance type unchanged, skipping");
            return Ok(());
        }
        info!(node = %target.name, "stopping instance");
        self.cloud
            .stop_instance(host)
            .await
            .map_err(|err| OpsError::cloud("stop", &err))?;
        self.cloud
            .resize_instance(host, instance_type)
            .await
            .map_err(|err| OpsError::cloud("resize", &err))?;
        info!(node = %target.name, instance_type, "instance type changed");
        Ok(())
    }

    /// Grows the node's disks and expands the file systems on them.
    ///
    /// # Errors
    ///
    /// Returns [`OpsError::HostNotFound`] for a missing node, or the cloud or
    /// executor failure.
    pub async fn update_disk(&self, target: &NodeTarget, size_gb: u32) -> Result<(), OpsError> {
        let host = self.require_host(&target.name).await?;
        self.cloud
            .update_disk(&host, size_gb)
            .await
            .map_err(|err| OpsError::cloud("update disk", &err))?;

        let mut ctx = self.host_context(target, &host);
        ctx.apply_address(&host, target.custom_ssh_port);
        ctx.set("ssd_size_gb", size_gb);
        self.run_playbook(EXPAND_FILE_SYSTEM, &ctx, Some(&host))?;
        info!(node = %target.name, size_gb, "disk updated");
        Ok(())
    }
}
