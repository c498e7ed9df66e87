//! Destroy: hand teardown to the task executor.

use tracing::info;

use super::Orchestrator;
use crate::cloud::CloudApi;
use crate::context::NodeTarget;
use crate::error::OpsError;
use crate::executor::{DESTROY_INSTANCE, TaskExecutor};
use crate::ssh::RemoteShell;

impl<C, X, S> Orchestrator<C, X, S>
where
    C: CloudApi,
    X: TaskExecutor,
    S: RemoteShell,
{
    /// Destroys `target`. No host lookup is made.
    ///
    /// # Errors
    ///
    /// Returns [`OpsError::Executor`] when the destroy playbook fails.
    pub fn destroy(&self, target: &NodeTarget, node_ip: Option<&str>) -> Result<(), OpsError> {
        let mut ctx = target.base_context();
        if let Some(ip) = node_ip {
            ctx.set("node_ip", ip);
        }
        self.run_playbook(DESTROY_INSTANCE, &ctx, None)?;
        info!(node = %target.name, "instance destroyed");
        Ok(())
    }
}
