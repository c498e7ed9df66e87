//! Orchestration defaults layered with `ortho-config`.
//!
//! Every value that used to be a process-wide default (login user, SSH port,
//! retry ceilings, sleep intervals) lives here and is passed explicitly into
//! each operation so tests can supply deterministic values.

use std::ffi::OsString;
use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::retry::{Backoff, RetryPolicy};

/// Cloud provider name that marks on-premises fleets.
pub const ONPREM_PROVIDER: &str = "onprem";

/// Orchestration settings loaded via `ortho-config`.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "NODEKEEPER",
    discovery(
        app_name = "nodekeeper",
        env_var = "NODEKEEPER_CONFIG_PATH",
        config_file_name = "nodekeeper.toml",
        dotfile_name = ".nodekeeper.toml",
        project_file_name = "nodekeeper.toml"
    )
)]
pub struct OpsConfig {
    /// Cloud provider name forwarded to the executor as `placement_cloud`.
    #[ortho_config(default = "aws".to_owned())]
    pub cloud_provider: String,
    /// Login user when the caller does not supply one.
    #[ortho_config(default = "centos".to_owned())]
    pub default_ssh_user: String,
    /// Port freshly created instances listen on.
    #[ortho_config(default = 22)]
    pub default_ssh_port: u16,
    /// Private key used when the caller does not supply one.
    pub private_key_file: Option<String>,
    /// Account that owns database processes and hook execution.
    #[ortho_config(default = "dbnode".to_owned())]
    pub service_user: String,
    /// Number of host lookups the host waiter performs.
    #[ortho_config(default = 2)]
    pub host_lookup_retries: u32,
    /// Sleep between host waiter iterations, in milliseconds.
    #[ortho_config(default = 1000)]
    pub host_lookup_interval_ms: u64,
    /// Connection attempts per reachability probe during lifecycle steps.
    #[ortho_config(default = 10)]
    pub probe_attempts: u32,
    /// Connection attempts per reachability probe during key rotation.
    #[ortho_config(default = 3)]
    pub key_probe_attempts: u32,
    /// Sleep between probe attempts, in milliseconds.
    #[ortho_config(default = 1000)]
    pub probe_delay_ms: u64,
    /// Number of boot script completion checks after the first one.
    #[ortho_config(default = 5)]
    pub boot_script_retries: u32,
    /// First boot script backoff delay, doubled on every retry, in
    /// milliseconds.
    #[ortho_config(default = 2000)]
    pub boot_script_base_delay_ms: u64,
    /// Remote file whose presence marks boot script completion.
    #[ortho_config(default = "/var/lib/cloud/instance/boot-finished".to_owned())]
    pub boot_script_done_marker: String,
    /// Remote file the boot script writes when it succeeded.
    #[ortho_config(default = "/etc/nodekeeper/boot-script-complete".to_owned())]
    pub boot_script_success_marker: String,
    /// Directory receiving console output captured after failures.
    #[ortho_config(default = "/tmp".to_owned())]
    pub console_log_dir: String,
    /// Directory holding executor playbooks.
    #[ortho_config(default = "/opt/nodekeeper/playbooks".to_owned())]
    pub playbook_dir: String,
    /// Executor binary.
    #[ortho_config(default = "ansible-playbook".to_owned())]
    pub executor_bin: String,
    /// Provider helper binary that speaks JSON on stdout.
    #[ortho_config(default = "nodekeeper-cloud".to_owned())]
    pub cloud_helper_bin: String,
}

/// Errors raised while loading or validating [`OpsConfig`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum OpsConfigError {
    /// Indicates that parsing or merging configuration layers failed.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
    /// Raised when a required value is blank.
    #[error("missing {field}: set NODEKEEPER_{env_suffix} or add {field} to nodekeeper.toml", env_suffix = field.to_uppercase())]
    InvalidConfig {
        /// Configuration field that failed validation.
        field: String,
    },
    /// Raised when a retry ceiling is zero.
    #[error("{field} must be at least 1")]
    ZeroAttempts {
        /// Configuration field that failed validation.
        field: String,
    },
}

impl OpsConfig {
    /// Loads configuration without parsing CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns [`OpsConfigError::Parse`] when merging sources fails.
    pub fn load_without_cli_args() -> Result<Self, OpsConfigError> {
        Self::load_from_iter([OsString::from("nodekeeper")])
            .map_err(|err| OpsConfigError::Parse(err.to_string()))
    }

    /// Ensures required values are present and ceilings are non-zero.
    ///
    /// # Errors
    ///
    /// Returns [`OpsConfigError`] naming the first invalid field.
    pub fn validate(&self) -> Result<(), OpsConfigError> {
        Self::require_value(&self.cloud_provider, "cloud_provider")?;
        Self::require_value(&self.default_ssh_user, "default_ssh_user")?;
        Self::require_value(&self.service_user, "service_user")?;
        Self::require_value(&self.console_log_dir, "console_log_dir")?;
        Self::require_value(&self.playbook_dir, "playbook_dir")?;
        Self::require_value(&self.executor_bin, "executor_bin")?;
        Self::require_value(&self.cloud_helper_bin, "cloud_helper_bin")?;
        Self::require_attempts(self.host_lookup_retries, "host_lookup_retries")?;
        Self::require_attempts(self.probe_attempts, "probe_attempts")?;
        Self::require_attempts(self.key_probe_attempts, "key_probe_attempts")?;
        if let Some(key) = &self.private_key_file {
            Self::require_value(key, "private_key_file")?;
        }
        Ok(())
    }

    /// Whether the fleet is on-premises.
    #[must_use]
    pub fn is_onprem(&self) -> bool {
        self.cloud_provider == ONPREM_PROVIDER
    }

    /// Retry policy for the host waiter.
    #[must_use]
    pub const fn host_wait_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.host_lookup_retries,
            Backoff::Fixed(Duration::from_millis(self.host_lookup_interval_ms)),
        )
    }

    /// Probe policy used by lifecycle steps.
    #[must_use]
    pub const fn probe_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.probe_attempts,
            Backoff::Fixed(Duration::from_millis(self.probe_delay_ms)),
        )
    }

    /// Probe policy used by authorized key rotation.
    #[must_use]
    pub const fn key_probe_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.key_probe_attempts,
            Backoff::Fixed(Duration::from_millis(self.probe_delay_ms)),
        )
    }

    /// Backoff used while waiting for a boot script. The first check is not
    /// counted against the ceiling.
    #[must_use]
    pub const fn boot_script_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.boot_script_retries.saturating_add(1),
            Backoff::Exponential {
                base: Duration::from_millis(self.boot_script_base_delay_ms),
            },
        )
    }

    fn require_value(value: &str, field: &str) -> Result<(), OpsConfigError> {
        if value.trim().is_empty() {
            return Err(OpsConfigError::InvalidConfig {
                field: field.to_owned(),
            });
        }
        Ok(())
    }

    fn require_attempts(value: u32, field: &str) -> Result<(), OpsConfigError> {
        if value == 0 {
            return Err(OpsConfigError::ZeroAttempts {
                field: field.to_owned(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::test_support::test_config;

    #[test]
    fn host_wait_policy_uses_configured_ceiling() {
        let config = OpsConfig {
            host_lookup_retries: 2,
            host_lookup_interval_ms: 1000,
            ..test_config()
        };
        let policy = config.host_wait_policy();
        assert_eq!(policy.max_attempts(), 2);
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(1));
    }

    #[test]
    fn boot_script_policy_doubles_from_base() {
        let config = OpsConfig {
            boot_script_retries: 5,
            boot_script_base_delay_ms: 2000,
            ..test_config()
        };
        let policy = config.boot_script_policy();
        assert_eq!(policy.max_attempts(), 6);
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(5), Duration::from_secs(32));
    }

    #[rstest]
    #[case::blank_user(OpsConfig { default_ssh_user: String::from(" "), ..test_config() }, "default_ssh_user")]
    #[case::blank_key(OpsConfig { private_key_file: Some(String::new()), ..test_config() }, "private_key_file")]
    fn validate_names_blank_fields(#[case] config: OpsConfig, #[case] field: &str) {
        assert_eq!(
            config.validate(),
            Err(OpsConfigError::InvalidConfig {
                field: field.to_owned()
            })
        );
    }

    #[test]
    fn validate_rejects_zero_ceiling() {
        let config = OpsConfig {
            host_lookup_retries: 0,
            ..test_config()
        };
        assert_eq!(
            config.validate(),
            Err(OpsConfigError::ZeroAttempts {
                field: String::from("host_lookup_retries")
            })
        );
    }
}
