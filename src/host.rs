//! Host snapshots reported by the cloud API.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Role tag that identifies database cluster nodes.
pub const CLUSTER_SERVER_TYPE: &str = "cluster-server";

/// Role a node plays in the deployment.
#[derive(Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct ServerType(String);

impl ServerType {
    /// Wraps a role tag.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the database cluster role.
    #[must_use]
    pub fn cluster() -> Self {
        Self::new(CLUSTER_SERVER_TYPE)
    }

    /// Returns `true` for the database cluster role.
    #[must_use]
    pub fn is_cluster(&self) -> bool {
        self.0 == CLUSTER_SERVER_TYPE
    }

    /// Borrows the tag as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Immutable snapshot of a cloud instance.
///
/// Snapshots are re-fetched whenever fresher state is needed; nothing in the
/// crate mutates one after it has been returned by the cloud API.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct HostInfo {
    /// Instance name used as the lookup identifier.
    pub name: String,
    /// Cloud-assigned identifier.
    pub id: String,
    /// Private address used for SSH.
    pub private_ip: String,
    /// Public address, when the instance has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_ip: Option<String>,
    /// Region hosting the instance.
    pub region: String,
    /// Availability zone hosting the instance.
    pub zone: String,
    /// Provider instance type.
    pub instance_type: String,
    /// Whether the provider reports the instance as running.
    pub is_running: bool,
    /// Raw provider state, used in diagnostics.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_state: Option<String>,
    /// Role tag, when the instance carries one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_type: Option<ServerType>,
    /// Secondary subnet descriptor, when a second interface is attached.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secondary_subnet: Option<String>,
}

impl HostInfo {
    /// Describes the provider state for messages, falling back to the
    /// running flag.
    #[must_use]
    pub fn state_label(&self) -> String {
        self.instance_state.clone().unwrap_or_else(|| {
            if self.is_running {
                String::from("running")
            } else {
                String::from("stopped")
            }
        })
    }

    /// Returns `true` when the host carries the database cluster role.
    #[must_use]
    pub fn is_cluster_server(&self) -> bool {
        self.server_type.as_ref().is_some_and(ServerType::is_cluster)
    }

    /// Renders the snapshot as `key=value` lines, omitting absent fields.
    #[must_use]
    pub fn to_key_values(&self) -> String {
        let mut lines = vec![
            format!("name={}", self.name),
            format!("id={}", self.id),
            format!("private_ip={}", self.private_ip),
        ];
        if let Some(public_ip) = &self.public_ip {
            lines.push(format!("public_ip={public_ip}"));
        }
        lines.push(format!("region={}", self.region));
        lines.push(format!("zone={}", self.zone));
        lines.push(format!("instance_type={}", self.instance_type));
        lines.push(format!("is_running={}", self.is_running));
        if let Some(server_type) = &self.server_type {
            lines.push(format!("server_type={server_type}"));
        }
        if let Some(subnet) = &self.secondary_subnet {
            lines.push(format!("secondary_subnet={subnet}"));
        }
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> HostInfo {
        HostInfo {
            name: String::from("db-n1"),
            id: String::from("i-0abc"),
            private_ip: String::from("10.0.0.5"),
            public_ip: None,
            region: String::from("us-west-2"),
            zone: String::from("us-west-2a"),
            instance_type: String::from("c5.large"),
            is_running: false,
            instance_state: None,
            server_type: None,
            secondary_subnet: None,
        }
    }

    #[test]
    fn key_values_omit_absent_server_type() {
        let rendered = sample().to_key_values();
        assert!(!rendered.contains("server_type"), "rendered: {rendered}");
        assert!(rendered.contains("private_ip=10.0.0.5"));
    }

    #[test]
    fn deserialises_helper_payload_without_optional_fields() {
        let payload = r#"{
            "name": "db-n1", "id": "i-0abc", "private_ip": "10.0.0.5",
            "region": "us-west-2", "zone": "us-west-2a",
            "instance_type": "c5.large", "is_running": true,
            "server_type": "cluster-server"
        }"#;
        let host: HostInfo = serde_json::from_str(payload)
            .unwrap_or_else(|err| panic!("payload should parse: {err}"));
        assert!(host.is_cluster_server());
        assert_eq!(host.state_label(), "running");
    }

    #[test]
    fn state_label_prefers_provider_state() {
        let host = HostInfo {
            instance_state: Some(String::from("stopping")),
            ..sample()
        };
        assert_eq!(host.state_label(), "stopping");
    }
}
