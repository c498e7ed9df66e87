//! Create: bring up a new instance and wait until it accepts SSH.

use camino::Utf8PathBuf;
use serde_json::{Map, Value};
use tracing::info;

use super::Orchestrator;
use crate::cloud::CloudApi;
use crate::context::NodeTarget;
use crate::error::OpsError;
use crate::executor::{CREATE_INSTANCE, TaskExecutor, TaskOutput};
use crate::host::HostInfo;
use crate::reachability::reconcile_open_port;
use crate::ssh::RemoteShell;

/// Options for [`Orchestrator::create`].
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CreateRequest {
    /// Boot script the instance runs on first start.
    pub boot_script: Option<Utf8PathBuf>,
    /// Subnet of the secondary network interface, if any.
    pub cloud_subnet_secondary: Option<String>,
}

/// Result of a successful Create.
#[derive(Clone, Debug, PartialEq)]
pub struct CreateOutput {
    /// Host snapshot taken once the instance was reachable.
    pub host: HostInfo,
    /// Variables reported by the create playbook.
    pub executor_output: TaskOutput,
}

impl CreateOutput {
    /// Host fields overlaid with the executor output.
    #[must_use]
    pub fn to_json(&self) -> Value {
        let mut merged = match serde_json::to_value(&self.host) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        };
        merged.extend(self.executor_output.clone());
        Value::Object(merged)
    }
}

impl<C, X, S> Orchestrator<C, X, S>
where
    C: CloudApi,
    X: TaskExecutor,
    S: RemoteShell,
{
    /// Creates `target` and waits for it to become reachable.
    ///
    /// Create is not idempotent: an existing host record is a fatal error and
    /// nothing is mutated. On failure the console output is captured before
    /// the error is returned.
    ///
    /// # Errors
    ///
    /// Returns [`OpsError::AlreadyExists`] for an existing host, a
    /// recoverable error while the new instance is not yet reachable or its
    /// boot script has not finished, or whatever the collaborators raise.
    pub async fn create(
        &self,
        target: &NodeTarget,
        request: &CreateRequest,
    ) -> Result<CreateOutput, OpsError> {
        if self.lookup(&target.name).await?.is_some() {
            return Err(OpsError::AlreadyExists {
                target: target.name.clone(),
            });
        }
        let result = self.create_new(target, request).await;
        self.with_diagnostics(&target.name, result).await
    }

    async fn create_new(
        &self,
        target: &NodeTarget,
        request: &CreateRequest,
    ) -> Result<CreateOutput, OpsError> {
        let mut ctx = target.base_context();
        if let Some(subnet) = &request.cloud_subnet_secondary {
            ctx.set("cloud_subnet_secondary", subnet.clone());
        }
        if let Some(script) = &request.boot_script {
            ctx.set("boot_script", script.as_str());
        }
        let executor_output = self.run_playbook(CREATE_INSTANCE, &ctx, None)?;

        let created = self.require_host(&target.name).await?;
        ctx.apply_host_info(&created, self.cloud.name());
        ctx.apply_address(&created, self.config.default_ssh_port);
        let reconciled = reconcile_open_port(
            &self.cloud,
            &created,
            &target.name,
            target.custom_ssh_port,
            &mut ctx,
        )
        .await?;

        let default_preferred = reconciled.port == self.config.default_ssh_port;
        let host = self
            .waiter()
            .wait_for_host(target, &mut ctx, default_preferred)
            .await?;

        if request.boot_script.is_some() {
            let endpoint = ctx.endpoint()?;
            self.wait_for_boot_script(
                &target.name,
                &endpoint,
                request.cloud_subnet_secondary.is_some(),
            )
            .await?;
        }

        info!(node = %target.name, ip = %host.private_ip, "instance created");
        Ok(CreateOutput {
            host,
            executor_output,
        })
    }
}
