//! Core library for the `nodekeeper` database node orchestrator.
//!
//! The crate drives the lifecycle of database cluster nodes (create,
//! provision, configure, control, destroy) plus day-two maintenance such as
//! reboots, instance type changes, SSH key rotation, and certificate
//! rotation. Machine work is delegated to three collaborators: a
//! [`CloudApi`] that owns instances, a [`TaskExecutor`] that runs playbooks,
//! and a [`RemoteShell`] that runs commands and copies files over SSH.
//!
//! Every failure is an [`OpsError`] classified as recoverable (worth
//! retrying the whole operation) or fatal.

pub mod certs;
pub mod cloud;
pub mod config;
pub mod context;
pub mod credentials;
pub mod error;
pub mod executor;
pub mod failure;
pub mod host;
pub mod lifecycle;
pub mod process;
pub mod reachability;
pub mod retry;
pub mod ssh;
pub mod test_support;

pub use certs::{CertRotateAction, CertificateRequest, CertificateStore, RemoteCertificateStore};
pub use cloud::{CliCloudApi, CliCloudError, CloudApi, CloudFuture};
pub use config::{OpsConfig, OpsConfigError};
pub use context::{ConnectionContext, NodeTarget};
pub use credentials::{KeyEdit, KeyOutcome};
pub use error::{ErrorKind, OpsError};
pub use executor::{AnsibleError, AnsibleExecutor, TaskExecutor, TaskOutput};
pub use failure::ConsoleLogCapture;
pub use host::{HostInfo, ServerType};
pub use lifecycle::Orchestrator;
pub use process::{CommandOutput, CommandRunner, ProcessCommandRunner, SpawnError};
pub use reachability::HostWaiter;
pub use retry::{Backoff, RetryPolicy, retry_recoverable};
pub use ssh::{RemoteCommandOutput, RemoteShell, SshClient, SshConfig, SshEndpoint, SshError};
