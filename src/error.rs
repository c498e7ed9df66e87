//! Failure classification shared by every orchestrated operation.
//!
//! Each [`OpsError`] variant maps to exactly one [`ErrorKind`]. Fatal errors
//! signal an invalid precondition or an ambiguous post-mutation state and are
//! never retried automatically. Recoverable errors describe transient state
//! that a caller may resolve by re-invoking the whole operation.

use std::fmt;

use thiserror::Error;

/// Classification attached to every [`OpsError`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    /// The operation cannot succeed without outside intervention.
    Fatal,
    /// The failure is expected to be transient.
    Recoverable,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fatal => f.write_str("fatal"),
            Self::Recoverable => f.write_str("recoverable"),
        }
    }
}

/// Errors surfaced by lifecycle, reachability, and rotation operations.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum OpsError {
    /// Raised by Create when the target already has a host record.
    #[error("host {target} already created")]
    AlreadyExists {
        /// Instance identifier supplied by the caller.
        target: String,
    },
    /// Raised when an operation requires a host record that does not exist.
    #[error("host {target} does not exist")]
    HostNotFound {
        /// Instance identifier supplied by the caller.
        target: String,
    },
    /// Raised when the requested role differs from the one the host carries.
    #[error("host {target} is of type {actual}, expected {expected}")]
    ServerTypeMismatch {
        /// Instance identifier supplied by the caller.
        target: String,
        /// Server type requested by the caller.
        expected: String,
        /// Server type reported by the cloud.
        actual: String,
    },
    /// Raised when an operation needs a running host.
    #[error("host {target} is not running (state: {state})")]
    NotRunning {
        /// Instance identifier supplied by the caller.
        target: String,
        /// Provider state reported for the host.
        state: String,
    },
    /// Raised when caller-supplied arguments are inconsistent or incomplete.
    #[error("invalid request: {message}")]
    InvalidRequest {
        /// Description of the rejected argument combination.
        message: String,
    },
    /// Raised when a remote command is attempted before the connection
    /// context carries the named value.
    #[error("connection context is missing {field}")]
    UnresolvedConnection {
        /// Context key that has not been resolved.
        field: String,
    },
    /// Raised when a reachability check fails where no retry is meaningful.
    #[error("failed to connect to {target} at {endpoint}")]
    ConnectionFailed {
        /// Instance identifier supplied by the caller.
        target: String,
        /// Endpoint that was probed.
        endpoint: String,
    },
    /// Raised when an authorized key edit leaves the node in an unexpected
    /// state, or when no known key can reach it.
    #[error("key rotation on {target} failed: {message}")]
    KeyRotation {
        /// Instance identifier supplied by the caller.
        target: String,
        /// Description of the observed state.
        message: String,
    },
    /// Raised when certificate material cannot be installed or rotated.
    #[error("certificate operation on {target} failed: {message}")]
    Certificate {
        /// Instance identifier supplied by the caller.
        target: String,
        /// Description of the failure.
        message: String,
    },
    /// Wraps a cloud API failure.
    #[error("cloud {operation} failed: {message}")]
    Cloud {
        /// Cloud API call that failed.
        operation: String,
        /// Provider error message.
        message: String,
    },
    /// Wraps a task executor failure.
    #[error("playbook {playbook} failed: {message}")]
    Executor {
        /// Playbook that was being applied.
        playbook: String,
        /// Executor error message.
        message: String,
    },
    /// Raised when a remote command exits unsuccessfully.
    #[error("remote command on {target} failed: {message}")]
    Remote {
        /// Instance identifier supplied by the caller.
        target: String,
        /// Exit status and stderr summary.
        message: String,
    },
    /// Raised when the host waiter exhausts its retry ceiling.
    #[error("timed out waiting for {target} to become reachable at {endpoint}")]
    HostTimeout {
        /// Instance identifier supplied by the caller.
        target: String,
        /// Last endpoint that was probed, if any host record was seen.
        endpoint: String,
    },
    /// Raised when a host is known but not reachable right before the
    /// task executor would run against it.
    #[error("could not connect to {target} at {endpoint}")]
    Unreachable {
        /// Instance identifier supplied by the caller.
        target: String,
        /// Endpoint that was probed.
        endpoint: String,
    },
    /// Raised when none of the candidate SSH ports accepts connections yet.
    #[error("no open ssh port on {target} among {candidates:?}")]
    PortClosed {
        /// Instance identifier supplied by the caller.
        target: String,
        /// Ports that were checked, in order.
        candidates: Vec<u16>,
    },
    /// Raised when the boot script did not report completion in time.
    #[error("boot script on {target} did not complete")]
    BootScript {
        /// Instance identifier supplied by the caller.
        target: String,
    },
    /// Raised when staging a file on the node fails.
    #[error("failed to copy {path} to {target}")]
    Transfer {
        /// Instance identifier supplied by the caller.
        target: String,
        /// Local path that could not be staged.
        path: String,
    },
    /// Raised when a reboot issued over SSH reports an error.
    #[error("failed to reboot {target}: {message}")]
    Reboot {
        /// Instance identifier supplied by the caller.
        target: String,
        /// Stderr reported by the reboot command.
        message: String,
    },
}

impl OpsError {
    /// Returns the classification for this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::HostTimeout { .. }
            | Self::Unreachable { .. }
            | Self::PortClosed { .. }
            | Self::BootScript { .. }
            | Self::Transfer { .. }
            | Self::Reboot { .. } => ErrorKind::Recoverable,
            Self::AlreadyExists { .. }
            | Self::HostNotFound { .. }
            | Self::ServerTypeMismatch { .. }
            | Self::NotRunning { .. }
            | Self::InvalidRequest { .. }
            | Self::UnresolvedConnection { .. }
            | Self::ConnectionFailed { .. }
            | Self::KeyRotation { .. }
            | Self::Certificate { .. }
            | Self::Cloud { .. }
            | Self::Executor { .. }
            | Self::Remote { .. } => ErrorKind::Fatal,
        }
    }

    /// Returns `true` when a caller may retry the whole operation.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Recoverable)
    }

    /// Builds an [`OpsError::InvalidRequest`] from any message.
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Builds an [`OpsError::Cloud`] from a collaborator error.
    pub fn cloud(operation: &str, err: &impl fmt::Display) -> Self {
        Self::Cloud {
            operation: operation.to_owned(),
            message: err.to_string(),
        }
    }

    /// Builds an [`OpsError::Executor`] from a collaborator error.
    pub fn executor(playbook: &str, err: &impl fmt::Display) -> Self {
        Self::Executor {
            playbook: playbook.to_owned(),
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(OpsError::AlreadyExists { target: "n1".to_owned() }, ErrorKind::Fatal)]
    #[case(OpsError::HostTimeout { target: "n1".to_owned(), endpoint: "10.0.0.1:22".to_owned() }, ErrorKind::Recoverable)]
    #[case(OpsError::Unreachable { target: "n1".to_owned(), endpoint: "10.0.0.1:22".to_owned() }, ErrorKind::Recoverable)]
    #[case(OpsError::Transfer { target: "n1".to_owned(), path: "pkg.tgz".to_owned() }, ErrorKind::Recoverable)]
    #[case(OpsError::invalid("bad flags"), ErrorKind::Fatal)]
    #[case(OpsError::Executor { playbook: "configure-cluster-server.yml".to_owned(), message: "exit 2".to_owned() }, ErrorKind::Fatal)]
    fn classifies_variants(#[case] err: OpsError, #[case] expected: ErrorKind) {
        assert_eq!(err.kind(), expected);
        assert_eq!(err.is_recoverable(), expected == ErrorKind::Recoverable);
    }

    #[test]
    fn timeout_message_names_target_and_endpoint() {
        let err = OpsError::HostTimeout {
            target: "db-n1".to_owned(),
            endpoint: "centos@10.0.0.5:22".to_owned(),
        };
        let text = err.to_string();
        assert!(text.contains("db-n1"), "message: {text}");
        assert!(text.contains("centos@10.0.0.5:22"), "message: {text}");
    }
}
