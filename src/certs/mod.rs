//! TLS certificate rotation.
//!
//! Rotation is driven by an explicit [`CertRotateAction`]. Appending a new
//! root and removing the old one are standalone steps that return
//! immediately. `ROTATE_CERTS` clears stale client material and then runs the
//! normal installation sequence; `UPDATE_CERT_DIRS` runs the installation
//! sequence without clearing anything. Every primitive is safe to re-run.

use std::fmt;
use std::str::FromStr;

use camino::{Utf8Path, Utf8PathBuf};
use tracing::info;

use crate::error::OpsError;

mod remote;

pub use remote::RemoteCertificateStore;

/// Explicit certificate rotation step.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CertRotateAction {
    /// Trust an additional root alongside the current one.
    AppendNewRootCert,
    /// Clear client material, then install the new certificates.
    RotateCerts,
    /// Drop the superseded root.
    RemoveOldRootCert,
    /// Reinstall certificates into the current directory layout.
    UpdateCertDirs,
}

impl CertRotateAction {
    /// Wire name of the action.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AppendNewRootCert => "APPEND_NEW_ROOT_CERT",
            Self::RotateCerts => "ROTATE_CERTS",
            Self::RemoveOldRootCert => "REMOVE_OLD_ROOT_CERT",
            Self::UpdateCertDirs => "UPDATE_CERT_DIRS",
        }
    }
}

impl fmt::Display for CertRotateAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CertRotateAction {
    type Err = OpsError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "APPEND_NEW_ROOT_CERT" => Ok(Self::AppendNewRootCert),
            "ROTATE_CERTS" => Ok(Self::RotateCerts),
            "REMOVE_OLD_ROOT_CERT" => Ok(Self::RemoveOldRootCert),
            "UPDATE_CERT_DIRS" => Ok(Self::UpdateCertDirs),
            other => Err(OpsError::invalid(format!(
                "unknown certificate rotate action {other}"
            ))),
        }
    }
}

/// How much certificate verification the node skips while installing.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SkipCertValidation {
    /// Skip verification entirely.
    All,
    /// Verify the chain but not the host name.
    Hostname,
}

impl FromStr for SkipCertValidation {
    type Err = OpsError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "ALL" => Ok(Self::All),
            "HOSTNAME" => Ok(Self::Hostname),
            other => Err(OpsError::invalid(format!(
                "unknown certificate validation mode {other}"
            ))),
        }
    }
}

/// Where certificate material lives before installation.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum CertLocation {
    /// On the machine running the orchestrator; staged over copy-to-temp.
    #[default]
    Local,
    /// Already on the node.
    Remote,
}

/// Root, certificate, and key for one server trust domain.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ServerCertMaterial {
    /// Root certificate.
    pub root_cert: Utf8PathBuf,
    /// Server certificate.
    pub server_cert: Utf8PathBuf,
    /// Server private key.
    pub server_key: Utf8PathBuf,
}

/// Client certificate and key.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ClientCertMaterial {
    /// Client certificate.
    pub cert: Utf8PathBuf,
    /// Client private key.
    pub key: Utf8PathBuf,
}

/// Remote directories receiving certificate material.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CertDirs {
    /// Node-to-node server certificates.
    pub node: String,
    /// Client-to-server server certificates.
    pub client_to_server: String,
    /// Client certificates used by tools on the node.
    pub client: String,
    /// Encryption-at-rest keys.
    pub encryption_keys: String,
}

impl Default for CertDirs {
    fn default() -> Self {
        Self {
            node: String::from("/home/dbnode/tls/node"),
            client_to_server: String::from("/home/dbnode/tls/client-to-server"),
            client: String::from("/home/dbnode/.dbnode"),
            encryption_keys: String::from("/home/dbnode/encryption-keys"),
        }
    }
}

/// Everything needed to rotate or install certificates on one node.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CertificateRequest {
    /// Explicit rotation step, if any.
    pub rotate_action: Option<CertRotateAction>,
    /// Root appended by `APPEND_NEW_ROOT_CERT` when no node-to-node
    /// server material accompanies it.
    pub new_root_cert: Option<Utf8PathBuf>,
    /// Node-to-node material, installed when its root is supplied.
    pub node_to_node: Option<ServerCertMaterial>,
    /// Client-to-server material, an independent trust domain.
    pub client_to_server: Option<ServerCertMaterial>,
    /// Client material installed on the node.
    pub client: Option<ClientCertMaterial>,
    /// Encryption-at-rest key file.
    pub encryption_key: Option<Utf8PathBuf>,
    /// Where node-to-node material and the appended root live before
    /// installation.
    pub location: CertLocation,
    /// Where client-to-server material lives before installation.
    pub location_client_to_server: CertLocation,
    /// Verification the node skips; passed through unchanged.
    pub skip_validation: Option<SkipCertValidation>,
    /// Target directories.
    pub dirs: CertDirs,
}

impl CertificateRequest {
    /// Whether the request asks for any certificate work at all.
    #[must_use]
    pub const fn has_work(&self) -> bool {
        self.rotate_action.is_some()
            || self.new_root_cert.is_some()
            || self.node_to_node.is_some()
            || self.client_to_server.is_some()
            || self.client.is_some()
            || self.encryption_key.is_some()
    }

    /// Checks that the action has the material it needs.
    ///
    /// # Errors
    ///
    /// Returns [`OpsError::InvalidRequest`] when appending without a root
    /// certificate, or rotating without any server material.
    pub fn validate(&self) -> Result<(), OpsError> {
        match self.rotate_action {
            Some(CertRotateAction::AppendNewRootCert) if self.appended_root().is_none() => Err(
                OpsError::invalid("APPEND_NEW_ROOT_CERT requires a root certificate"),
            ),
            Some(CertRotateAction::RotateCerts)
                if self.node_to_node.is_none() && self.client_to_server.is_none() =>
            {
                Err(OpsError::invalid(
                    "ROTATE_CERTS requires node-to-node or client-to-server certificates",
                ))
            }
            _ => Ok(()),
        }
    }

    /// Root added by `APPEND_NEW_ROOT_CERT`: the standalone root first,
    /// then the node-to-node root.
    #[must_use]
    pub fn appended_root(&self) -> Option<&Utf8Path> {
        self.new_root_cert.as_deref().or_else(|| {
            self.node_to_node
                .as_ref()
                .map(|material| material.root_cert.as_path())
        })
    }

    /// Root preferred for client certificates, with the location it lives
    /// in: client-to-server first.
    #[must_use]
    pub fn client_root(&self) -> Option<(&Utf8Path, CertLocation)> {
        self.client_to_server
            .as_ref()
            .map(|material| (material.root_cert.as_path(), self.location_client_to_server))
            .or_else(|| {
                self.node_to_node
                    .as_ref()
                    .map(|material| (material.root_cert.as_path(), self.location))
            })
    }
}

/// Result of [`rotate_certificates`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CertificateOutcome {
    /// A standalone action ran; the caller must stop here.
    ActionCompleted(CertRotateAction),
    /// The installation sequence ran.
    Installed {
        /// Whether this was a `ROTATE_CERTS` rotation.
        rotated: bool,
    },
}

impl CertificateOutcome {
    /// Whether the rest of the configuration must be skipped.
    #[must_use]
    pub const fn short_circuits(self) -> bool {
        matches!(self, Self::ActionCompleted(_))
    }
}

/// Certificate primitives applied to one node.
pub trait CertificateStore {
    /// Adds `root_cert` to the trusted roots in `dir`, keeping the current
    /// root.
    ///
    /// # Errors
    ///
    /// Returns an [`OpsError`] when staging or the remote edit fails.
    fn append_new_root_cert(
        &self,
        root_cert: &Utf8Path,
        location: CertLocation,
        dir: &str,
    ) -> Result<(), OpsError>;

    /// Drops the superseded root from `dir`.
    ///
    /// # Errors
    ///
    /// Returns an [`OpsError`] when the remote edit fails.
    fn remove_old_root_cert(&self, dir: &str) -> Result<(), OpsError>;

    /// Removes stale client material from `dir`.
    ///
    /// # Errors
    ///
    /// Returns an [`OpsError`] when the remote edit fails.
    fn cleanup_client_certs(&self, dir: &str) -> Result<(), OpsError>;

    /// Installs server material into `dir`.
    ///
    /// # Errors
    ///
    /// Returns an [`OpsError`] when staging, installation, or verification
    /// fails.
    fn copy_server_certs(
        &self,
        material: &ServerCertMaterial,
        location: CertLocation,
        dir: &str,
        rotating: bool,
        skip_validation: Option<SkipCertValidation>,
    ) -> Result<(), OpsError>;

    /// Installs client material, trusting `root_cert`, into `dir`.
    ///
    /// # Errors
    ///
    /// Returns an [`OpsError`] when staging or installation fails.
    fn copy_client_certs(
        &self,
        root_cert: &Utf8Path,
        material: &ClientCertMaterial,
        location: CertLocation,
        dir: &str,
    ) -> Result<(), OpsError>;

    /// Installs an encryption-at-rest key into `dir`.
    ///
    /// # Errors
    ///
    /// Returns an [`OpsError`] when staging or installation fails.
    fn install_encryption_key(&self, key: &Utf8Path, dir: &str) -> Result<(), OpsError>;
}

/// Applies `request` through `store`.
///
/// # Errors
///
/// Returns the first [`OpsError`] raised by validation or by the store.
pub fn rotate_certificates<S>(
    store: &S,
    request: &CertificateRequest,
) -> Result<CertificateOutcome, OpsError>
where
    S: CertificateStore + ?Sized,
{
    request.validate()?;
    let mut rotated = false;

    match request.rotate_action {
        Some(action @ CertRotateAction::AppendNewRootCert) => {
            if let Some(root) = request.appended_root() {
                store.append_new_root_cert(root, request.location, &request.dirs.node)?;
            }
            info!(%action, "appended new root certificate");
            return Ok(CertificateOutcome::ActionCompleted(action));
        }
        Some(action @ CertRotateAction::RemoveOldRootCert) => {
            store.remove_old_root_cert(&request.dirs.node)?;
            info!(%action, "removed old root certificate");
            return Ok(CertificateOutcome::ActionCompleted(action));
        }
        Some(CertRotateAction::RotateCerts) => {
            store.cleanup_client_certs(&request.dirs.client)?;
            rotated = true;
        }
        Some(CertRotateAction::UpdateCertDirs) | None => {}
    }

    install(store, request, rotated)?;
    Ok(CertificateOutcome::Installed { rotated })
}

fn install<S>(store: &S, request: &CertificateRequest, rotating: bool) -> Result<(), OpsError>
where
    S: CertificateStore + ?Sized,
{
    if let Some(material) = &request.node_to_node {
        store.copy_server_certs(
            material,
            request.location,
            &request.dirs.node,
            rotating,
            request.skip_validation,
        )?;
    }
    if let Some(material) = &request.client_to_server {
        store.copy_server_certs(
            material,
            request.location_client_to_server,
            &request.dirs.client_to_server,
            rotating,
            request.skip_validation,
        )?;
    }
    if let (Some(client), Some((root, location))) = (&request.client, request.client_root()) {
        store.copy_client_certs(root, client, location, &request.dirs.client)?;
    }
    if let Some(key) = &request.encryption_key {
        store.install_encryption_key(key, &request.dirs.encryption_keys)?;
    }
    Ok(())
}
