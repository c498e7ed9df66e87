//! Configure: stage software, rotate certificates, and apply the
//! configuration playbook.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use camino::Utf8Path;
use regex::Regex;
use serde_json::Value;
use tracing::{info, warn};

use super::Orchestrator;
use crate::certs::{
    CertRotateAction, CertificateOutcome, CertificateRequest, RemoteCertificateStore,
    rotate_certificates,
};
use crate::cloud::CloudApi;
use crate::context::{ConnectionContext, NodeTarget, SSH_USER};
use crate::error::OpsError;
use crate::executor::{INSTALL_THIRD_PARTY, TaskExecutor, configure_playbook};
use crate::host::HostInfo;
use crate::ssh::{RemoteShell, SshEndpoint};

/// Target name that configures the local machine.
const LOCALHOST: &str = "localhost";
/// Tag that limits a run to the software download.
const DOWNLOAD_SOFTWARE_TAG: &str = "download-software";

#[expect(clippy::expect_used, reason = "pattern is a literal")]
static S3_URI: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^s3://(?:[^/]+)/(?:.+)$").expect("valid regex"));

#[expect(clippy::expect_used, reason = "pattern is a literal")]
static GCS_URI: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^gs://(?:[^/]+)/(?:.+)$").expect("valid regex"));

#[expect(clippy::expect_used, reason = "pattern is a literal")]
static HTTP_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^((?:https?)://(?:www\.)?[a-z0-9\.:].*?)(?:\?.*)?$").expect("valid regex")
});

/// How the database package reaches the node.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub enum PackageSource {
    /// Copied from this machine over copy-to-temp.
    #[default]
    LocalCopy,
    /// Downloaded by the node from an `s3://bucket/key` URI.
    S3,
    /// Downloaded by the node from a `gs://bucket/key` URI.
    Gcs,
    /// Downloaded by the node from an HTTP(S) URL.
    Http,
    /// Fetched by the configuration playbook's integration-test tasks from
    /// the given object-store path.
    ITest(String),
}

/// Database process a configuration applies to.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProcessType {
    /// Cluster master.
    Master,
    /// Tablet server.
    Tserver,
}

impl ProcessType {
    /// Lower-case name passed to the executor.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Master => "master",
            Self::Tserver => "tserver",
        }
    }
}

impl fmt::Display for ProcessType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProcessType {
    type Err = OpsError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "master" => Ok(Self::Master),
            "tserver" => Ok(Self::Tserver),
            other => Err(OpsError::invalid(format!("unknown process type {other}"))),
        }
    }
}

/// Options for [`Orchestrator::configure`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConfigureRequest {
    /// Master addresses handed to tablet servers; required.
    pub master_addresses: Option<String>,
    /// Master addresses handed to masters.
    pub master_addresses_for_master: Option<String>,
    /// Addresses the server advertises.
    pub server_broadcast_addresses: Option<String>,
    /// Process the configuration applies to.
    pub process_type: Option<ProcessType>,
    /// Database package to install.
    pub package: Option<String>,
    /// How `package` reaches the node.
    pub package_source: PackageSource,
    /// Full gflag set; mutually exclusive with `package`.
    pub gflags: Option<Value>,
    /// Extra gflags merged into the current set.
    pub extra_gflags: Option<Value>,
    /// Gflags to drop.
    pub gflags_to_remove: Option<Value>,
    /// Access key for S3 downloads.
    pub aws_access_key: Option<String>,
    /// Secret key for S3 downloads.
    pub aws_secret_key: Option<String>,
    /// Service account JSON for GCS downloads.
    pub gcs_credentials_json: Option<String>,
    /// Checksum verified after an HTTP download.
    pub http_package_checksum: String,
    /// Install third-party packages and stop.
    pub install_third_party: bool,
    /// Local directory holding third-party tarballs.
    pub local_package_path: Option<String>,
    /// Certificate work to perform.
    pub certificates: CertificateRequest,
}

/// What [`Orchestrator::configure`] did.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConfigureOutcome {
    /// The configuration playbook ran.
    Configured,
    /// Third-party packages were installed; nothing else ran.
    ThirdPartyInstalled,
    /// Third-party installation was requested without a local path.
    ThirdPartySkipped,
    /// A standalone certificate action ran; nothing else ran.
    CertificateAction(CertRotateAction),
    /// Certificates were rotated; the configuration playbook was skipped.
    CertificatesRotated,
}

impl<C, X, S> Orchestrator<C, X, S>
where
    C: CloudApi,
    X: TaskExecutor,
    S: RemoteShell,
{
    /// Configures a cluster server.
    ///
    /// # Errors
    ///
    /// Returns a fatal error for invalid argument combinations, a missing
    /// host, or a server type mismatch; [`OpsError::Transfer`] when the
    /// package cannot be staged; or whatever the collaborators raise.
    pub async fn configure(
        &self,
        target: &NodeTarget,
        request: &ConfigureRequest,
    ) -> Result<ConfigureOutcome, OpsError> {
        let result = self.configure_node(target, request).await;
        self.with_diagnostics(&target.name, result).await
    }

    async fn configure_node(
        &self,
        target: &NodeTarget,
        request: &ConfigureRequest,
    ) -> Result<ConfigureOutcome, OpsError> {
        let mut ctx = self.configure_context(target, request)?;
        request.certificates.validate()?;

        let remote = if target.name == LOCALHOST {
            None
        } else {
            let host = self.require_host(&target.name).await?;
            check_server_type(target, &host)?;
            ctx.apply_host_info(&host, self.cloud.name());
            ctx.apply_address(&host, target.custom_ssh_port);
            Some(host)
        };

        if let (Some(host), Some(package)) = (&remote, &request.package)
            && target
                .tags
                .as_deref()
                .is_none_or(|tags| tags == DOWNLOAD_SOFTWARE_TAG)
        {
            self.stage_package(target, request, host, package, &mut ctx)?;
        }

        if request.install_third_party {
            let Some(path) = &request.local_package_path else {
                warn!(node = %target.name, "no local package path, skipping third-party install");
                return Ok(ConfigureOutcome::ThirdPartySkipped);
            };
            ctx.set("local_package_path", path.clone());
            self.run_playbook(INSTALL_THIRD_PARTY, &ctx, remote.as_ref())?;
            return Ok(ConfigureOutcome::ThirdPartyInstalled);
        }

        let mut rotated = false;
        if request.certificates.has_work() {
            let Some(host) = &remote else {
                return Err(OpsError::invalid(
                    "certificates can only be installed on a remote host",
                ));
            };
            if let Some(key) = &request.certificates.encryption_key {
                ctx.set("encryption_key_file", key.as_str());
            }
            match self.install_certificates(target, host, &request.certificates)? {
                CertificateOutcome::ActionCompleted(action) => {
                    return Ok(ConfigureOutcome::CertificateAction(action));
                }
                CertificateOutcome::Installed { rotated: was_rotated } => rotated = was_rotated,
            }
        }
        if rotated {
            info!(node = %target.name, "certificates rotated, configuration unchanged");
            return Ok(ConfigureOutcome::CertificatesRotated);
        }

        self.run_playbook(
            &configure_playbook(target.server_type.as_str()),
            &ctx,
            remote.as_ref(),
        )?;
        Ok(ConfigureOutcome::Configured)
    }

    fn configure_context(
        &self,
        target: &NodeTarget,
        request: &ConfigureRequest,
    ) -> Result<ConnectionContext, OpsError> {
        if !target.server_type.is_cluster() {
            return Err(OpsError::invalid(format!(
                "configure supports only cluster-server, not {}",
                target.server_type
            )));
        }
        let Some(masters) = &request.master_addresses else {
            return Err(OpsError::invalid("configure requires master addresses"));
        };
        if request.gflags.is_some() && request.package.is_some() {
            return Err(OpsError::invalid(
                "gflags cannot be changed together with a package",
            ));
        }

        let mut ctx = target.base_context();
        ctx.set("master_addresses_for_tserver", masters.clone());
        let optional = [
            ("master_addresses_for_master", &request.master_addresses_for_master),
            ("server_broadcast_addresses", &request.server_broadcast_addresses),
            ("package", &request.package),
        ];
        for (key, entry) in optional {
            if let Some(value) = entry {
                ctx.set(key, value.clone());
            }
        }
        let flags = [
            ("gflags", &request.gflags),
            ("extra_gflags", &request.extra_gflags),
            ("gflags_to_remove", &request.gflags_to_remove),
        ];
        for (key, entry) in flags {
            if let Some(value) = entry {
                ctx.set(key, value.clone());
            }
        }
        if let Some(process) = request.process_type {
            ctx.set("process_type", process.as_str());
        }
        let dirs = &request.certificates.dirs;
        ctx.set("certs_node_dir", dirs.node.clone());
        ctx.set("certs_client_dir", dirs.client.clone());
        ctx.set("encryption_key_dir", dirs.encryption_keys.clone());
        if let Some(root) = request
            .certificates
            .node_to_node
            .as_ref()
            .map(|material| material.root_cert.as_str().trim())
        {
            ctx.set("root_cert_path", root);
        }
        Ok(ctx)
    }

    fn stage_package(
        &self,
        target: &NodeTarget,
        request: &ConfigureRequest,
        host: &HostInfo,
        package: &str,
        ctx: &mut ConnectionContext,
    ) -> Result<(), OpsError> {
        match &request.package_source {
            PackageSource::S3 => {
                let (Some(access), Some(secret)) =
                    (&request.aws_access_key, &request.aws_secret_key)
                else {
                    return Err(OpsError::invalid(format!(
                        "AWS credentials are required to download {package}"
                    )));
                };
                require_match(&S3_URI, package, "s3 URI")?;
                ctx.set("s3_package_path", package);
                ctx.set("aws_access_key", access.clone());
                ctx.set("aws_secret_key", secret.clone());
            }
            PackageSource::Gcs => {
                let Some(credentials) = &request.gcs_credentials_json else {
                    return Err(OpsError::invalid(format!(
                        "GCS credentials are required to download {package}"
                    )));
                };
                require_match(&GCS_URI, package, "gs URI")?;
                ctx.set("gcs_package_path", package);
                ctx.set("gcs_credentials_json", credentials.clone());
            }
            PackageSource::Http => {
                let (full, stripped) = http_package(package)?;
                ctx.set("package", stripped);
                ctx.set("http_package_path", full);
                ctx.set("http_package_checksum", request.http_package_checksum.clone());
            }
            PackageSource::ITest(path) => {
                let mut itest = ctx.clone();
                itest.set("itest_s3_package_path", path.clone());
                itest.set(SSH_USER, self.config.default_ssh_user.clone());
                itest.set("tags", "itest");
                self.run_playbook(
                    &configure_playbook(target.server_type.as_str()),
                    &itest,
                    Some(host),
                )?;
            }
            PackageSource::LocalCopy => {
                let endpoint = ctx.endpoint()?;
                self.stage(&target.name, &endpoint, Utf8Path::new(package))?;
                info!(node = %target.name, package, "package copied");
                return Ok(());
            }
        }
        info!(node = %target.name, package, "remote download variables added");
        Ok(())
    }

    fn install_certificates(
        &self,
        target: &NodeTarget,
        host: &HostInfo,
        request: &CertificateRequest,
    ) -> Result<CertificateOutcome, OpsError> {
        let endpoint = SshEndpoint::new(
            host.private_ip.clone(),
            target.custom_ssh_port,
            self.config.service_user.clone(),
        )
        .with_private_key(target.private_key_file.clone())
        .with_ssh2(target.ssh2_enabled);
        let store = RemoteCertificateStore::new(&self.shell, endpoint, &target.name);
        info!(node = %target.name, "copying certificates");
        rotate_certificates(&store, request)
    }
}

fn check_server_type(target: &NodeTarget, host: &HostInfo) -> Result<(), OpsError> {
    let actual = host
        .server_type
        .as_ref()
        .map_or("none", |server_type| server_type.as_str());
    if actual == target.server_type.as_str() {
        return Ok(());
    }
    Err(OpsError::ServerTypeMismatch {
        target: target.name.clone(),
        expected: target.server_type.to_string(),
        actual: actual.to_owned(),
    })
}

fn require_match(pattern: &Regex, package: &str, label: &str) -> Result<(), OpsError> {
    if pattern.is_match(package) {
        return Ok(());
    }
    Err(OpsError::invalid(format!(
        "{package} is not a valid {label}, must match {}",
        pattern.as_str()
    )))
}

/// Splits an HTTP package URL into the full URL and the URL without its
/// query string.
fn http_package(package: &str) -> Result<(String, String), OpsError> {
    let captures = HTTP_URL.captures(package).ok_or_else(|| {
        OpsError::invalid(format!(
            "{package} is not a valid HTTP URL, must match {}",
            HTTP_URL.as_str()
        ))
    })?;
    let full = captures.get(0).map_or(package, |m| m.as_str());
    let stripped = captures.get(1).map_or(full, |m| m.as_str());
    Ok((full.to_owned(), stripped.to_owned()))
}
