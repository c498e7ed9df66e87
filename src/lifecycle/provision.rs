//! Provision: prepare an existing instance and run the primary provisioning
//! playbook against it.

use camino::Utf8PathBuf;
use tracing::info;

use super::Orchestrator;
use crate::cloud::CloudApi;
use crate::context::{ConnectionContext, NodeTarget};
use crate::error::OpsError;
use crate::executor::{PREPROVISION, SERVER_PROVISION, TaskExecutor, USE_CUSTOM_SSH_PORT};
use crate::host::HostInfo;
use crate::reachability::{probe, reconcile_open_port};
use crate::ssh::RemoteShell;

/// Options for [`Orchestrator::provision`].
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ProvisionRequest {
    /// Skip the preprovision sub-step.
    pub skip_preprovision: bool,
    /// Never move sshd to the custom port.
    pub disable_custom_ssh: bool,
    /// Boot script to re-run once the secondary interface is configured.
    pub boot_script: Option<Utf8PathBuf>,
    /// Local directory holding third-party tarballs.
    pub local_package_path: Option<String>,
    /// Install without internet access.
    pub air_gap: bool,
    /// Configure chrony for time synchronisation.
    pub use_chrony: bool,
    /// NTP servers handed to chrony.
    pub ntp_servers: Vec<String>,
}

impl<C, X, S> Orchestrator<C, X, S>
where
    C: CloudApi,
    X: TaskExecutor,
    S: RemoteShell,
{
    /// Provisions an existing instance.
    ///
    /// # Errors
    ///
    /// Returns [`OpsError::HostNotFound`] when the instance does not exist,
    /// [`OpsError::Unreachable`] when it cannot be reached at its custom
    /// port right before the provisioning playbook, or whatever the
    /// collaborators raise.
    pub async fn provision(
        &self,
        target: &NodeTarget,
        request: &ProvisionRequest,
    ) -> Result<(), OpsError> {
        let result = self.provision_host(target, request).await;
        self.with_diagnostics(&target.name, result).await
    }

    async fn provision_host(
        &self,
        target: &NodeTarget,
        request: &ProvisionRequest,
    ) -> Result<(), OpsError> {
        let host = self.require_host(&target.name).await?;
        let mut ctx = self.host_context(target, &host);
        let default_port = self.config.default_ssh_port;
        ctx.apply_address(&host, default_port);

        let reconciled =
            reconcile_open_port(&self.cloud, &host, &target.name, target.custom_ssh_port, &mut ctx)
                .await?;
        let default_preferred = reconciled.port == default_port;
        ctx.apply_address(
            &host,
            if default_preferred {
                default_port
            } else {
                target.custom_ssh_port
            },
        );

        if host.secondary_subnet.is_some() {
            self.configure_secondary_subnet(target, request, &host, &mut ctx, default_preferred)
                .await?;
        }

        if request.skip_preprovision {
            info!(node = %target.name, "skipping preprovision");
        } else {
            self.preprovision(target, request, &host, &mut ctx).await?;
        }

        ctx.apply_address(&host, target.custom_ssh_port);
        if let Some(path) = &request.local_package_path {
            ctx.set("local_package_path", path.clone());
        }
        if request.air_gap {
            ctx.set("air_gap", true);
        }
        if !request.ntp_servers.is_empty() {
            ctx.set("ntp_servers", request.ntp_servers.clone());
        }
        ctx.set("use_chrony", request.use_chrony);

        let endpoint = ctx.endpoint()?;
        if !probe(&self.shell, &endpoint, self.config.probe_policy()).await {
            return Err(OpsError::Unreachable {
                target: target.name.clone(),
                endpoint: endpoint.to_string(),
            });
        }
        self.run_playbook(SERVER_PROVISION, &ctx, Some(&host))?;
        info!(node = %target.name, "instance provisioned");
        Ok(())
    }

    async fn configure_secondary_subnet(
        &self,
        target: &NodeTarget,
        request: &ProvisionRequest,
        host: &HostInfo,
        ctx: &mut ConnectionContext,
        default_preferred: bool,
    ) -> Result<(), OpsError> {
        self.waiter()
            .wait_for_host(target, ctx, default_preferred)
            .await?;
        info!(node = %target.name, "configuring secondary network interface");
        self.cloud
            .configure_secondary_interface(host)
            .await
            .map_err(|err| OpsError::cloud("configure secondary interface", &err))?;

        // The first boot script run had no outbound access.
        if let Some(script) = &request.boot_script {
            let endpoint = ctx.endpoint()?;
            let staged = self.stage(&target.name, &endpoint, script)?;
            let output = self.remote(&target.name, &endpoint, &format!("sudo bash {staged}"))?;
            if !output.is_success() {
                return Err(OpsError::Remote {
                    target: target.name.clone(),
                    message: output.stderr.trim().to_owned(),
                });
            }
        }
        Ok(())
    }

    async fn preprovision(
        &self,
        target: &NodeTarget,
        request: &ProvisionRequest,
        host: &HostInfo,
        ctx: &mut ConnectionContext,
    ) -> Result<(), OpsError> {
        ctx.set("instance_type", host.instance_type.clone());
        let reconciled =
            reconcile_open_port(&self.cloud, host, &target.name, target.custom_ssh_port, ctx)
                .await?;
        let on_default_port = reconciled.port == self.config.default_ssh_port;
        let ready = self
            .waiter()
            .wait_for_host(target, ctx, on_default_port)
            .await?;
        self.run_playbook(PREPROVISION, ctx, Some(&ready))?;

        let ssh2_onprem = target.ssh2_enabled && self.config.is_onprem();
        if request.disable_custom_ssh || !on_default_port || ssh2_onprem {
            info!(node = %target.name, "leaving sshd on its current port");
            return Ok(());
        }
        self.run_playbook(USE_CUSTOM_SSH_PORT, ctx, Some(&ready))?;
        Ok(())
    }
}
