//! Certificate primitives implemented with copy-to-temp plus remote shell
//! commands.
//!
//! Layout per directory: `ca.crt` is the trusted bundle, `ca.crt.old` holds
//! the previous root while a new one is appended, and `ca.crt.new` holds the
//! appended root until the old one is removed. Server material is written as
//! `node.<host>.crt` and `node.<host>.key`.

use camino::Utf8Path;
use shell_escape::unix::escape;
use tracing::debug;

use super::{
    CertLocation, CertificateStore, ClientCertMaterial, ServerCertMaterial, SkipCertValidation,
};
use crate::error::OpsError;
use crate::ssh::{RemoteShell, SshEndpoint};

/// [`CertificateStore`] that edits certificate directories over SSH.
#[derive(Debug)]
pub struct RemoteCertificateStore<'a, S: ?Sized> {
    shell: &'a S,
    endpoint: SshEndpoint,
    target: String,
}

impl<'a, S: RemoteShell + ?Sized> RemoteCertificateStore<'a, S> {
    /// Creates a store for `target` reached at `endpoint`.
    pub fn new(
        shell: &'a S,
        endpoint: SshEndpoint,
        target: impl Into<String>,
    ) -> Self {
        Self {
            shell,
            endpoint,
            target: target.into(),
        }
    }

    /// Returns the remote path of `path`, staging it first when local.
    fn source_path(&self, path: &Utf8Path, location: CertLocation) -> Result<String, OpsError> {
        match location {
            CertLocation::Remote => Ok(path.as_str().to_owned()),
            CertLocation::Local => {
                let output = self
                    .shell
                    .copy_to_tmp(&self.endpoint, path)
                    .map_err(|err| self.failure(&err.to_string()))?;
                if !output.is_success() {
                    return Err(OpsError::Transfer {
                        target: self.target.clone(),
                        path: path.to_string(),
                    });
                }
                Ok(self.shell.staged_path(path))
            }
        }
    }

    fn run(&self, command: &str) -> Result<(), OpsError> {
        debug!(node = %self.target, command, "certificate command");
        let output = self
            .shell
            .execute(&self.endpoint, command)
            .map_err(|err| self.failure(&err.to_string()))?;
        if output.is_success() {
            return Ok(());
        }
        Err(self.failure(output.stderr.trim()))
    }

    fn failure(&self, message: &str) -> OpsError {
        OpsError::Certificate {
            target: self.target.clone(),
            message: message.to_owned(),
        }
    }

    fn verify_command(
        &self,
        dir: &str,
        cert: &str,
        skip_validation: Option<SkipCertValidation>,
    ) -> Option<String> {
        let host = self.endpoint.host();
        let check = match skip_validation {
            Some(SkipCertValidation::All) => return None,
            Some(SkipCertValidation::Hostname) => String::new(),
            None if host.parse::<std::net::IpAddr>().is_ok() => {
                format!(" -verify_ip {}", escape(host.into()))
            }
            None => format!(" -verify_hostname {}", escape(host.into())),
        };
        Some(format!(
            "openssl verify -CAfile {}{check} {cert}",
            quoted(&format!("{dir}/ca.crt"))
        ))
    }
}

fn quoted(value: &str) -> String {
    escape(value.into()).into_owned()
}

impl<S: RemoteShell + ?Sized> CertificateStore for RemoteCertificateStore<'_, S> {
    fn append_new_root_cert(
        &self,
        root_cert: &Utf8Path,
        location: CertLocation,
        dir: &str,
    ) -> Result<(), OpsError> {
        let source = self.source_path(root_cert, location)?;
        let bundle = quoted(&format!("{dir}/ca.crt"));
        let old = quoted(&format!("{dir}/ca.crt.old"));
        let new = quoted(&format!("{dir}/ca.crt.new"));
        self.run(&format!(
            "if [ ! -f {new} ]; then cp {bundle} {old} && cp {src} {new} && cat {old} {new} > {bundle}; fi",
            src = quoted(&source)
        ))
    }

    fn remove_old_root_cert(&self, dir: &str) -> Result<(), OpsError> {
        let bundle = quoted(&format!("{dir}/ca.crt"));
        let old = quoted(&format!("{dir}/ca.crt.old"));
        let new = quoted(&format!("{dir}/ca.crt.new"));
        self.run(&format!(
            "if [ -f {new} ]; then mv {new} {bundle}; fi; rm -f {old}"
        ))
    }

    fn cleanup_client_certs(&self, dir: &str) -> Result<(), OpsError> {
        let dir = quoted(dir);
        self.run(&format!(
            "rm -f {dir}/ca.crt {dir}/client.crt {dir}/client.key"
        ))
    }

    fn copy_server_certs(
        &self,
        material: &ServerCertMaterial,
        location: CertLocation,
        dir: &str,
        rotating: bool,
        skip_validation: Option<SkipCertValidation>,
    ) -> Result<(), OpsError> {
        let root = self.source_path(&material.root_cert, location)?;
        let cert = self.source_path(&material.server_cert, location)?;
        let key = self.source_path(&material.server_key, location)?;
        let host = self.endpoint.host();
        let node_cert = quoted(&format!("{dir}/node.{host}.crt"));
        let node_key = quoted(&format!("{dir}/node.{host}.key"));
        let bundle = quoted(&format!("{dir}/ca.crt"));

        let mut command = format!("mkdir -p {} && ", quoted(dir));
        // Rotation keeps an existing bundle in place.
        if rotating {
            command.push_str(&format!("[ -f {bundle} ] || cp {} {bundle}; ", quoted(&root)));
        } else {
            command.push_str(&format!("cp {} {bundle} && ", quoted(&root)));
        }
        command.push_str(&format!(
            "cp {} {node_cert} && cp {} {node_key} && chmod 400 {node_key}",
            quoted(&cert),
            quoted(&key)
        ));
        self.run(&command)?;

        if let Some(verify) = self.verify_command(dir, &node_cert, skip_validation) {
            self.run(&verify)?;
        }
        Ok(())
    }

    fn copy_client_certs(
        &self,
        root_cert: &Utf8Path,
        material: &ClientCertMaterial,
        location: CertLocation,
        dir: &str,
    ) -> Result<(), OpsError> {
        let root = self.source_path(root_cert, location)?;
        let cert = self.source_path(&material.cert, location)?;
        let key = self.source_path(&material.key, location)?;
        let client_dir = quoted(dir);
        self.run(&format!(
            "mkdir -p {client_dir} && cp {} {client_dir}/ca.crt && cp {} {client_dir}/client.crt \
             && cp {} {client_dir}/client.key && chmod 400 {client_dir}/client.key",
            quoted(&root),
            quoted(&cert),
            quoted(&key)
        ))
    }

    fn install_encryption_key(&self, key: &Utf8Path, dir: &str) -> Result<(), OpsError> {
        let source = self.source_path(key, CertLocation::Local)?;
        let name = key.file_name().unwrap_or(key.as_str());
        let key_dir = quoted(dir);
        let installed = quoted(&format!("{dir}/{name}"));
        self.run(&format!(
            "mkdir -p {key_dir} && mv {} {installed} && chmod 400 {installed}",
            quoted(&source)
        ))
    }
}
