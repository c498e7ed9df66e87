//! Cloud provider abstraction.
//!
//! The orchestrator never creates or resizes machines itself; it asks a
//! [`CloudApi`] implementation and classifies whatever error comes back.

use std::future::Future;
use std::pin::Pin;

use crate::host::HostInfo;

mod helper;

pub use helper::{CliCloudApi, CliCloudError};

/// Future returned by cloud operations.
pub type CloudFuture<'a, T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>;

/// Operations the orchestrator needs from a cloud provider.
pub trait CloudApi: Send + Sync {
    /// Provider specific error type.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Provider name recorded as `placement_cloud`.
    fn name(&self) -> &str;

    /// Looks up a single host by instance name.
    fn get_host_info<'a>(&'a self, target: &'a str)
    -> CloudFuture<'a, Option<HostInfo>, Self::Error>;

    /// Lists every host whose name matches `pattern`, or all hosts.
    fn list_hosts<'a>(
        &'a self,
        pattern: Option<&'a str>,
    ) -> CloudFuture<'a, Vec<HostInfo>, Self::Error>;

    /// Stops a running instance.
    fn stop_instance<'a>(&'a self, host: &'a HostInfo) -> CloudFuture<'a, (), Self::Error>;

    /// Starts an instance and waits until one of `ports` accepts SSH.
    fn start_instance<'a>(
        &'a self,
        host: &'a HostInfo,
        ports: &'a [u16],
    ) -> CloudFuture<'a, (), Self::Error>;

    /// Reboots an instance through the provider and waits on `ports`.
    fn reboot_instance<'a>(
        &'a self,
        host: &'a HostInfo,
        ports: &'a [u16],
    ) -> CloudFuture<'a, (), Self::Error>;

    /// Changes the instance type of a stopped instance.
    fn resize_instance<'a>(
        &'a self,
        host: &'a HostInfo,
        instance_type: &'a str,
    ) -> CloudFuture<'a, (), Self::Error>;

    /// Grows the attached data disks to the requested size.
    fn update_disk<'a>(
        &'a self,
        host: &'a HostInfo,
        size_gb: u32,
    ) -> CloudFuture<'a, (), Self::Error>;

    /// Returns the first of `candidates` that currently accepts SSH, or
    /// `None` when none do. Some providers answer from network ACLs instead
    /// of probing.
    fn open_ssh_port<'a>(
        &'a self,
        host: &'a HostInfo,
        candidates: &'a [u16],
    ) -> CloudFuture<'a, Option<u16>, Self::Error>;

    /// Attaches and configures the secondary network interface.
    fn configure_secondary_interface<'a>(
        &'a self,
        host: &'a HostInfo,
    ) -> CloudFuture<'a, (), Self::Error>;

    /// Fetches the serial console output for diagnostics.
    fn console_output<'a>(&'a self, target: &'a str)
    -> CloudFuture<'a, Option<String>, Self::Error>;
}
