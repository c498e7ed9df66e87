//! Per-invocation connection state and the caller's view of a target node.
//!
//! A [`ConnectionContext`] is owned by exactly one orchestration call. Steps
//! add variables to it as they learn more about the node; the same map is
//! handed to the task executor as its variable set.

use std::collections::BTreeMap;

use camino::Utf8PathBuf;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::config::OpsConfig;
use crate::error::OpsError;
use crate::host::{HostInfo, ServerType};
use crate::ssh::SshEndpoint;

/// Context key holding the SSH host.
pub const SSH_HOST: &str = "ssh_host";
/// Context key holding the resolved SSH port.
pub const SSH_PORT: &str = "ssh_port";
/// Context key holding the SSH login user.
pub const SSH_USER: &str = "ssh_user";
/// Context key holding the private key path.
pub const PRIVATE_KEY_FILE: &str = "private_key_file";
/// Context key holding the SSH2 flag.
pub const SSH2_ENABLED: &str = "ssh2_enabled";

/// Ordered variable map for one orchestration invocation.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ConnectionContext {
    vars: BTreeMap<String, Value>,
}

impl ConnectionContext {
    /// Creates an empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `key`, replacing any earlier value.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.vars.insert(key.into(), value.into());
    }

    /// Looks up a raw value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.vars.get(key)
    }

    /// Looks up a string value.
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.vars.get(key).and_then(Value::as_str)
    }

    /// Removes `key`, returning the previous value.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.vars.remove(key)
    }

    /// Merges every entry of `other` into this context.
    pub fn extend(&mut self, other: impl IntoIterator<Item = (String, Value)>) {
        self.vars.extend(other);
    }

    /// Borrows the underlying variables.
    #[must_use]
    pub const fn vars(&self) -> &BTreeMap<String, Value> {
        &self.vars
    }

    /// Renders the variables as a JSON object.
    #[must_use]
    pub fn to_json(&self) -> Value {
        Value::Object(self.vars.clone().into_iter().collect::<Map<_, _>>())
    }

    /// SSH host, once a host snapshot has been applied.
    #[must_use]
    pub fn ssh_host(&self) -> Option<&str> {
        self.get_str(SSH_HOST)
    }

    /// Resolved SSH port, if any.
    #[must_use]
    pub fn ssh_port(&self) -> Option<u16> {
        self.vars
            .get(SSH_PORT)
            .and_then(Value::as_u64)
            .and_then(|port| u16::try_from(port).ok())
    }

    /// Records the resolved SSH port.
    pub fn set_ssh_port(&mut self, port: u16) {
        self.set(SSH_PORT, port);
    }

    /// SSH login user.
    #[must_use]
    pub fn ssh_user(&self) -> Option<&str> {
        self.get_str(SSH_USER)
    }

    /// Private key path, if one was supplied.
    #[must_use]
    pub fn private_key_file(&self) -> Option<Utf8PathBuf> {
        self.get_str(PRIVATE_KEY_FILE).map(Utf8PathBuf::from)
    }

    /// Whether the SSH2 clients are in use.
    #[must_use]
    pub fn ssh2_enabled(&self) -> bool {
        self.vars
            .get(SSH2_ENABLED)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Points the context at `host`, selecting `port` for SSH.
    pub fn apply_address(&mut self, host: &HostInfo, port: u16) {
        self.set(SSH_HOST, host.private_ip.clone());
        self.set_ssh_port(port);
    }

    /// Records placement details of `host` for the task executor.
    pub fn apply_host_info(&mut self, host: &HostInfo, cloud_name: &str) {
        self.set("private_ip", host.private_ip.clone());
        self.set(
            "public_ip",
            host.public_ip.clone().map_or(Value::Null, Value::from),
        );
        self.set("placement_cloud", cloud_name);
        self.set("placement_region", host.region.clone());
        self.set("placement_zone", host.zone.clone());
        self.set("instance_name", host.name.clone());
        self.set("instance_type", host.instance_type.clone());
    }

    /// Builds an endpoint from the resolved connection values.
    ///
    /// # Errors
    ///
    /// Returns [`OpsError::UnresolvedConnection`] when the host, port, or
    /// user has not been resolved yet.
    pub fn endpoint(&self) -> Result<SshEndpoint, OpsError> {
        let host = self.ssh_host().ok_or_else(|| unresolved(SSH_HOST))?;
        let port = self.ssh_port().ok_or_else(|| unresolved(SSH_PORT))?;
        let user = self.ssh_user().ok_or_else(|| unresolved(SSH_USER))?;
        Ok(SshEndpoint::new(host, port, user)
            .with_private_key(self.private_key_file())
            .with_ssh2(self.ssh2_enabled()))
    }

    /// Best-effort `user@host:port` label for messages.
    #[must_use]
    pub fn endpoint_label(&self) -> String {
        format!(
            "{}@{}:{}",
            self.ssh_user().unwrap_or("?"),
            self.ssh_host().unwrap_or("?"),
            self.ssh_port()
                .map_or_else(|| String::from("?"), |port| port.to_string())
        )
    }
}

fn unresolved(field: &str) -> OpsError {
    OpsError::UnresolvedConnection {
        field: field.to_owned(),
    }
}

/// Caller-supplied description of the node an operation targets.
#[derive(Clone, Debug, PartialEq)]
pub struct NodeTarget {
    /// Instance identifier used for host lookups.
    pub name: String,
    /// Role the caller expects the node to play.
    pub server_type: ServerType,
    /// Login user for SSH.
    pub ssh_user: String,
    /// Port the node should end up listening on for SSH.
    pub custom_ssh_port: u16,
    /// Private key used to reach the node.
    pub private_key_file: Option<Utf8PathBuf>,
    /// Whether the node only speaks SSH2.
    pub ssh2_enabled: bool,
    /// Executor tags to run.
    pub tags: Option<String>,
    /// Executor tags to skip.
    pub skip_tags: Option<String>,
    /// Additional variables forwarded to the task executor.
    pub extra_vars: BTreeMap<String, Value>,
}

impl NodeTarget {
    /// Describes `name` using the configured SSH defaults.
    pub fn new(name: impl Into<String>, config: &OpsConfig) -> Self {
        Self {
            name: name.into(),
            server_type: ServerType::cluster(),
            ssh_user: config.default_ssh_user.clone(),
            custom_ssh_port: config.default_ssh_port,
            private_key_file: config.private_key_file.as_deref().map(Utf8PathBuf::from),
            ssh2_enabled: false,
            tags: None,
            skip_tags: None,
            extra_vars: BTreeMap::new(),
        }
    }

    /// Sets the expected server type.
    #[must_use]
    pub fn with_server_type(mut self, server_type: ServerType) -> Self {
        self.server_type = server_type;
        self
    }

    /// Sets the SSH user.
    #[must_use]
    pub fn with_ssh_user(mut self, user: impl Into<String>) -> Self {
        self.ssh_user = user.into();
        self
    }

    /// Sets the custom SSH port.
    #[must_use]
    pub const fn with_custom_ssh_port(mut self, port: u16) -> Self {
        self.custom_ssh_port = port;
        self
    }

    /// Sets the private key.
    #[must_use]
    pub fn with_private_key_file(mut self, key: Option<Utf8PathBuf>) -> Self {
        self.private_key_file = key;
        self
    }

    /// Enables the SSH2 clients.
    #[must_use]
    pub const fn with_ssh2(mut self, enabled: bool) -> Self {
        self.ssh2_enabled = enabled;
        self
    }

    /// Sets executor tags.
    #[must_use]
    pub fn with_tags(mut self, tags: Option<String>) -> Self {
        self.tags = tags;
        self
    }

    /// Adds one extra variable for the task executor.
    #[must_use]
    pub fn with_var(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra_vars.insert(key.into(), value.into());
        self
    }

    /// Seeds a fresh context with the caller's arguments.
    ///
    /// The SSH port starts at the custom port; steps that need the default
    /// port overwrite it through [`ConnectionContext::apply_address`].
    #[must_use]
    pub fn base_context(&self) -> ConnectionContext {
        let mut ctx = ConnectionContext::new();
        ctx.extend(self.extra_vars.clone());
        ctx.set("instance_name", self.name.clone());
        ctx.set("server_type", self.server_type.as_str());
        ctx.set(SSH_USER, self.ssh_user.clone());
        ctx.set("custom_ssh_port", self.custom_ssh_port);
        ctx.set_ssh_port(self.custom_ssh_port);
        ctx.set(
            PRIVATE_KEY_FILE,
            self.private_key_file
                .as_ref()
                .map_or(Value::Null, |key| Value::from(key.as_str())),
        );
        ctx.set(SSH2_ENABLED, self.ssh2_enabled);
        ctx.set(
            "tags",
            self.tags.clone().map_or(Value::Null, Value::from),
        );
        ctx.set(
            "skip_tags",
            self.skip_tags.clone().map_or(Value::Null, Value::from),
        );
        ctx
    }

    /// Endpoint for this node at `host` and `port` using the caller's key.
    #[must_use]
    pub fn endpoint_at(&self, host: &HostInfo, port: u16) -> SshEndpoint {
        SshEndpoint::new(host.private_ip.clone(), port, self.ssh_user.clone())
            .with_private_key(self.private_key_file.clone())
            .with_ssh2(self.ssh2_enabled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{sample_host, test_config};

    #[test]
    fn endpoint_requires_resolved_host() {
        let target = NodeTarget::new("db-n1", &test_config());
        let ctx = target.base_context();
        assert_eq!(
            ctx.endpoint(),
            Err(OpsError::UnresolvedConnection {
                field: String::from(SSH_HOST)
            })
        );
    }

    #[test]
    fn apply_address_resolves_endpoint() {
        let target = NodeTarget::new("db-n1", &test_config())
            .with_private_key_file(Some(Utf8PathBuf::from("/keys/a.pem")));
        let mut ctx = target.base_context();
        ctx.apply_address(&sample_host("db-n1", true), 22);

        let endpoint = ctx
            .endpoint()
            .unwrap_or_else(|err| panic!("endpoint should resolve: {err}"));
        assert_eq!(endpoint.port(), 22);
        assert_eq!(endpoint.private_key_file().map(|key| key.as_str()), Some("/keys/a.pem"));
        assert_eq!(ctx.endpoint_label(), endpoint.to_string());
    }

    #[test]
    fn missing_port_is_reported() {
        let mut ctx = ConnectionContext::new();
        ctx.set(SSH_HOST, "10.0.0.5");
        ctx.set(SSH_USER, "centos");
        assert_eq!(
            ctx.endpoint(),
            Err(OpsError::UnresolvedConnection {
                field: String::from(SSH_PORT)
            })
        );
    }

    #[test]
    fn base_context_carries_caller_vars() {
        let target = NodeTarget::new("db-n1", &test_config())
            .with_custom_ssh_port(2222)
            .with_var("mount_points", "/mnt/d0");
        let ctx = target.base_context();
        assert_eq!(ctx.ssh_port(), Some(2222));
        assert_eq!(ctx.get_str("mount_points"), Some("/mnt/d0"));
        assert_eq!(ctx.get_str("server_type"), Some("cluster-server"));
        assert!(!ctx.ssh2_enabled());
    }
}
