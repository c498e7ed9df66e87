//! Read-only operations: listing hosts and waiting for SSH.

use serde_json::Value;
use tracing::info;

use super::Orchestrator;
use crate::cloud::CloudApi;
use crate::context::NodeTarget;
use crate::error::OpsError;
use crate::executor::TaskExecutor;
use crate::host::HostInfo;
use crate::reachability::{probe, reconcile_open_port};
use crate::ssh::RemoteShell;

/// Hosts returned by [`Orchestrator::list`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum HostListing {
    /// Every host matching the pattern.
    Many(Vec<HostInfo>),
    /// A single lookup, absent when the host does not exist.
    Single(Option<HostInfo>),
}

impl HostListing {
    /// Renders the listing as JSON. An absent host renders as `null`.
    ///
    /// # Errors
    ///
    /// Returns the serialisation error.
    pub fn to_json(&self) -> Result<Value, serde_json::Error> {
        match self {
            Self::Many(hosts) => serde_json::to_value(hosts),
            Self::Single(host) => serde_json::to_value(host),
        }
    }

    /// Renders the listing as `key=value` lines, one blank line between
    /// hosts. An absent host renders as an empty string.
    #[must_use]
    pub fn to_key_values(&self) -> String {
        match self {
            Self::Many(hosts) => hosts
                .iter()
                .map(HostInfo::to_key_values)
                .collect::<Vec<_>>()
                .join("\n\n"),
            Self::Single(host) => host
                .as_ref()
                .map(HostInfo::to_key_values)
                .unwrap_or_default(),
        }
    }

    /// Whether no host was found.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Many(hosts) => hosts.is_empty(),
            Self::Single(host) => host.is_none(),
        }
    }
}

impl<C, X, S> Orchestrator<C, X, S>
where
    C: CloudApi,
    X: TaskExecutor,
    S: RemoteShell,
{
    /// Lists hosts. With `all` every host matching `pattern` is returned;
    /// otherwise `pattern` is looked up as a single instance name.
    ///
    /// # Errors
    ///
    /// Returns [`OpsError::Cloud`] when the lookup fails.
    pub async fn list(&self, pattern: Option<&str>, all: bool) -> Result<HostListing, OpsError> {
        if all {
            let hosts = self
                .cloud
                .list_hosts(pattern)
                .await
                .map_err(|err| OpsError::cloud("list hosts", &err))?;
            return Ok(HostListing::Many(hosts));
        }
        let Some(name) = pattern else {
            return Err(OpsError::invalid("a host name is required unless listing all hosts"));
        };
        Ok(HostListing::Single(self.lookup(name).await?))
    }

    /// Checks that `target` accepts SSH on whichever of the default and
    /// custom ports is open.
    ///
    /// # Errors
    ///
    /// Returns [`OpsError::HostNotFound`] for a missing node,
    /// [`OpsError::PortClosed`] when neither port is open, or a fatal
    /// [`OpsError::ConnectionFailed`] when the probe fails.
    pub async fn wait_for_ssh(&self, target: &NodeTarget) -> Result<(), OpsError> {
        let host = self.require_host(&target.name).await?;
        let mut ctx = self.host_context(target, &host);
        ctx.apply_address(&host, self.config.default_ssh_port);
        reconcile_open_port(&self.cloud, &host, &target.name, target.custom_ssh_port, &mut ctx)
            .await?;
        let endpoint = ctx.endpoint()?;
        if !probe(&self.shell, &endpoint, self.config.probe_policy()).await {
            return Err(OpsError::ConnectionFailed {
                target: target.name.clone(),
                endpoint: endpoint.to_string(),
            });
        }
        info!(node = %target.name, %endpoint, "ssh is available");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::sample_host;

    #[test]
    fn absent_single_host_renders_nothing() {
        let listing = HostListing::Single(None);
        assert!(listing.is_empty());
        assert_eq!(listing.to_key_values(), "");
        assert_eq!(
            listing.to_json().unwrap_or_else(|err| panic!("json: {err}")),
            Value::Null
        );
    }

    #[test]
    fn many_hosts_are_separated_by_blank_lines() {
        let listing =
            HostListing::Many(vec![sample_host("db-n1", true), sample_host("db-n2", false)]);
        let rendered = listing.to_key_values();
        assert!(rendered.contains("name=db-n1\n"), "rendered: {rendered}");
        assert!(rendered.contains("\n\nname=db-n2"), "rendered: {rendered}");
    }
}
