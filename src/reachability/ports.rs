//! Open-port reconciliation.

use tracing::info;

use crate::cloud::CloudApi;
use crate::context::{ConnectionContext, SSH_PORT};
use crate::error::OpsError;
use crate::host::HostInfo;

/// Result of reconciling the cached SSH port with what the node accepts.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PortReconciliation {
    /// Port that currently accepts SSH.
    pub port: u16,
    /// Whether `port` differs from the previously cached port.
    pub port_was_updated: bool,
}

/// Orders the cached port first and appends `custom` when it differs.
#[must_use]
pub fn candidate_ports(cached: u16, custom: Option<u16>) -> Vec<u16> {
    let mut ports = vec![cached];
    if let Some(port) = custom
        && port != cached
    {
        ports.push(port);
    }
    ports
}

/// Asks the cloud which of `candidates` is open on `host`.
///
/// # Errors
///
/// Returns [`OpsError::PortClosed`] when no candidate is open, or
/// [`OpsError::Cloud`] when the provider check fails.
pub async fn find_open_port<C: CloudApi>(
    cloud: &C,
    host: &HostInfo,
    search_pattern: &str,
    candidates: &[u16],
) -> Result<u16, OpsError> {
    cloud
        .open_ssh_port(host, candidates)
        .await
        .map_err(|err| OpsError::cloud("open-port check", &err))?
        .ok_or_else(|| OpsError::PortClosed {
            target: search_pattern.to_owned(),
            candidates: candidates.to_vec(),
        })
}

/// Reconciles the context's cached port against the caller's custom port
/// and records the open one in `ctx`.
///
/// # Errors
///
/// Returns [`OpsError::UnresolvedConnection`] when the context has no
/// cached port, plus anything [`find_open_port`] returns.
pub async fn reconcile_open_port<C: CloudApi>(
    cloud: &C,
    host: &HostInfo,
    search_pattern: &str,
    custom_port: u16,
    ctx: &mut ConnectionContext,
) -> Result<PortReconciliation, OpsError> {
    let cached = ctx.ssh_port().ok_or_else(|| OpsError::UnresolvedConnection {
        field: SSH_PORT.to_owned(),
    })?;
    let candidates = candidate_ports(cached, Some(custom_port));
    let port = find_open_port(cloud, host, search_pattern, &candidates).await?;
    let port_was_updated = port != cached;
    if port_was_updated {
        info!(node = %search_pattern, from = cached, to = port, "ssh port updated");
        ctx.set_ssh_port(port);
    }
    Ok(PortReconciliation {
        port,
        port_was_updated,
    })
}
