//! Host waiter: polls the cloud and the probe until a node is registered
//! and reachable.

use tokio::time::sleep;
use tracing::info;

use super::probe::probe;
use crate::cloud::CloudApi;
use crate::context::{ConnectionContext, NodeTarget};
use crate::error::OpsError;
use crate::host::HostInfo;
use crate::retry::RetryPolicy;
use crate::ssh::RemoteShell;

/// Bounded polling loop over host lookups and reachability probes.
///
/// The loop is sequential per target; callers that manage several nodes
/// run one waiter per node.
#[derive(Debug)]
pub struct HostWaiter<'a, C, S: ?Sized> {
    cloud: &'a C,
    shell: &'a S,
    lookup: RetryPolicy,
    probe: RetryPolicy,
    default_port: u16,
}

impl<'a, C, S> HostWaiter<'a, C, S>
where
    C: CloudApi,
    S: RemoteShell + ?Sized,
{
    /// Creates a waiter.
    ///
    /// `lookup` bounds the number of host lookups and the sleep between
    /// them; `probe` bounds the handshakes made on each iteration.
    #[must_use]
    pub const fn new(
        cloud: &'a C,
        shell: &'a S,
        lookup: RetryPolicy,
        probe: RetryPolicy,
        default_port: u16,
    ) -> Self {
        Self {
            cloud,
            shell,
            lookup,
            probe,
            default_port,
        }
    }

    /// Waits until `target` is registered and accepts SSH.
    ///
    /// The host is re-fetched on every iteration until a snapshot reports it
    /// running. When `default_port_preferred` is set the default SSH port is
    /// probed; otherwise the target's custom port is. The address and port
    /// that were probed are left in `ctx`.
    ///
    /// # Errors
    ///
    /// Returns [`OpsError::HostTimeout`] once the lookup ceiling is
    /// exhausted, or [`OpsError::Cloud`] when a lookup fails.
    pub async fn wait_for_host(
        &self,
        target: &NodeTarget,
        ctx: &mut ConnectionContext,
        default_port_preferred: bool,
    ) -> Result<HostInfo, OpsError> {
        info!(node = %target.name, "waiting for instance");
        let port = if default_port_preferred {
            self.default_port
        } else {
            target.custom_ssh_port
        };
        let max_attempts = self.lookup.max_attempts();
        let mut host: Option<HostInfo> = None;

        for attempt in 1..=max_attempts {
            if !host.as_ref().is_some_and(|info| info.is_running) {
                host = self
                    .cloud
                    .get_host_info(&target.name)
                    .await
                    .map_err(|err| OpsError::cloud("host lookup", &err))?;
            }

            if let Some(info) = &host {
                ctx.apply_address(info, port);
                let endpoint = ctx.endpoint()?;
                if probe(self.shell, &endpoint, self.probe).await {
                    info!(node = %target.name, %endpoint, attempt, "instance reachable");
                    return Ok(info.clone());
                }
            }

            if attempt < max_attempts {
                info!(node = %target.name, attempt, max_attempts, "instance not ready yet");
                sleep(self.lookup.delay_for(attempt)).await;
            }
        }

        Err(OpsError::HostTimeout {
            target: target.name.clone(),
            endpoint: ctx.endpoint_label(),
        })
    }
}
