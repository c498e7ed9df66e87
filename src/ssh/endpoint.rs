//! Immutable SSH endpoint value.

use std::fmt;

use camino::{Utf8Path, Utf8PathBuf};

/// Fully resolved SSH coordinates for one node.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct SshEndpoint {
    host: String,
    port: u16,
    user: String,
    private_key_file: Option<Utf8PathBuf>,
    ssh2_enabled: bool,
}

impl SshEndpoint {
    /// Creates an endpoint using the caller's default key.
    pub fn new(host: impl Into<String>, port: u16, user: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            user: user.into(),
            private_key_file: None,
            ssh2_enabled: false,
        }
    }

    /// Returns a copy that authenticates with `key`.
    #[must_use]
    pub fn with_private_key(mut self, key: Option<Utf8PathBuf>) -> Self {
        self.private_key_file = key;
        self
    }

    /// Returns a copy that uses the SSH2 client binaries.
    #[must_use]
    pub const fn with_ssh2(mut self, enabled: bool) -> Self {
        self.ssh2_enabled = enabled;
        self
    }

    /// Host name or address.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// SSH port.
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Remote login user.
    #[must_use]
    pub fn user(&self) -> &str {
        &self.user
    }

    /// Private key used for authentication.
    #[must_use]
    pub fn private_key_file(&self) -> Option<&Utf8Path> {
        self.private_key_file.as_deref()
    }

    /// Whether the SSH2 client binaries are used.
    #[must_use]
    pub const fn ssh2_enabled(&self) -> bool {
        self.ssh2_enabled
    }
}

impl fmt::Display for SshEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.user, self.host, self.port)
    }
}
