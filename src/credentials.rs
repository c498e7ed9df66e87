//! Authorized key rotation: verify, add, and remove SSH keys on a node.
//!
//! Every operation probes before it mutates and probes again afterwards.
//! Repeated invocations against a node that already reached the requested
//! state perform no executor runs. A failed post-mutation probe leaves the
//! node in an ambiguous state, so it is reported as a fatal
//! [`OpsError::KeyRotation`] rather than retried.

use camino::{Utf8Path, Utf8PathBuf};
use tracing::info;

use crate::cloud::CloudApi;
use crate::context::NodeTarget;
use crate::error::OpsError;
use crate::executor::{EDIT_AUTHORIZED_KEYS, TaskExecutor};
use crate::host::HostInfo;
use crate::lifecycle::Orchestrator;
use crate::reachability::probe;
use crate::ssh::{RemoteShell, SshEndpoint};

const ADD_AUTHORIZED_KEY: &str = "add-authorized-key";
const REMOVE_AUTHORIZED_KEY: &str = "remove-authorized-key";

/// What a key rotation step observed or did.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum KeyOutcome {
    /// The current and requested keys are the same file; nothing was done.
    SameKey,
    /// The current key connects.
    CurrentKeyWorks,
    /// The current key no longer connects but the replacement does.
    NewKeyWorks,
    /// The new key already connected before any edit.
    AlreadyAuthorized,
    /// The new key was added and confirmed.
    Authorized,
    /// The old key already failed to connect before any edit.
    AlreadyRevoked,
    /// The old key was removed and confirmed unusable.
    Revoked,
}

impl KeyOutcome {
    /// Whether the node's `authorized_keys` was edited.
    #[must_use]
    pub const fn mutated(self) -> bool {
        matches!(self, Self::Authorized | Self::Revoked)
    }
}

/// Key material for [`Orchestrator::add_key`] and
/// [`Orchestrator::remove_key`].
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct KeyEdit {
    /// Private key that is being added or removed.
    pub private_key_file: Utf8PathBuf,
    /// Matching public key. When empty it is derived from
    /// `private_key_file`.
    pub public_key_content: String,
}

impl KeyEdit {
    /// Describes an edit whose public key is derived from `private_key_file`.
    pub fn new(private_key_file: impl Into<Utf8PathBuf>) -> Self {
        Self {
            private_key_file: private_key_file.into(),
            public_key_content: String::new(),
        }
    }

    /// Supplies the public key explicitly.
    #[must_use]
    pub fn with_public_key(mut self, content: impl Into<String>) -> Self {
        self.public_key_content = content.into();
        self
    }
}

fn same_key(target: &NodeTarget, other: &Utf8Path) -> bool {
    target.private_key_file.as_deref() == Some(other)
}

impl<C, X, S> Orchestrator<C, X, S>
where
    C: CloudApi,
    X: TaskExecutor,
    S: RemoteShell,
{
    /// Succeeds when either the current key or `new_key` connects.
    ///
    /// # Errors
    ///
    /// Returns [`OpsError::KeyRotation`] when neither key connects, or
    /// [`OpsError::HostNotFound`] for a missing node.
    pub async fn verify_key(
        &self,
        target: &NodeTarget,
        new_key: Option<&Utf8Path>,
    ) -> Result<KeyOutcome, OpsError> {
        if new_key.is_some_and(|key| same_key(target, key)) {
            info!(node = %target.name, "old and new keys are the same, skipping");
            return Ok(KeyOutcome::SameKey);
        }
        let host = self.require_host(&target.name).await?;
        let current = target.private_key_file.clone();
        if self.key_connects(target, &host, current).await {
            info!(node = %target.name, "ssh connection verified with the current key");
            return Ok(KeyOutcome::CurrentKeyWorks);
        }
        let Some(replacement) = new_key else {
            return Err(OpsError::KeyRotation {
                target: target.name.clone(),
                message: String::from(
                    "could not connect with the current key and no replacement was provided",
                ),
            });
        };
        if self
            .key_connects(target, &host, Some(replacement.to_owned()))
            .await
        {
            info!(node = %target.name, "new key connects whereas the current key does not");
            return Ok(KeyOutcome::NewKeyWorks);
        }
        Err(OpsError::KeyRotation {
            target: target.name.clone(),
            message: String::from("could not connect with the current or the new key"),
        })
    }

    /// Authorizes `edit.private_key_file` on the node.
    ///
    /// # Errors
    ///
    /// Returns [`OpsError::KeyRotation`] when the new key still fails after
    /// the edit, [`OpsError::HostNotFound`] for a missing node, or the
    /// executor's failure.
    pub async fn add_key(
        &self,
        target: &NodeTarget,
        edit: &KeyEdit,
    ) -> Result<KeyOutcome, OpsError> {
        if same_key(target, &edit.private_key_file) {
            info!(node = %target.name, "old and new keys are the same, skipping");
            return Ok(KeyOutcome::SameKey);
        }
        let host = self.require_host(&target.name).await?;
        let new_key = Some(edit.private_key_file.clone());
        if self.key_connects(target, &host, new_key.clone()).await {
            info!(node = %target.name, user = %target.ssh_user, "key already authorized");
            return Ok(KeyOutcome::AlreadyAuthorized);
        }

        self.edit_authorized_keys(target, &host, ADD_AUTHORIZED_KEY, edit)?;

        if !self.key_connects(target, &host, new_key).await {
            return Err(OpsError::KeyRotation {
                target: target.name.clone(),
                message: String::from("added key does not connect"),
            });
        }
        info!(node = %target.name, "key added");
        Ok(KeyOutcome::Authorized)
    }

    /// Revokes `edit.private_key_file` on the node.
    ///
    /// # Errors
    ///
    /// Returns [`OpsError::KeyRotation`] when the old key still connects
    /// after the edit, [`OpsError::HostNotFound`] for a missing node, or the
    /// executor's failure.
    pub async fn remove_key(
        &self,
        target: &NodeTarget,
        edit: &KeyEdit,
    ) -> Result<KeyOutcome, OpsError> {
        if same_key(target, &edit.private_key_file) {
            info!(node = %target.name, "old and new keys are the same, skipping");
            return Ok(KeyOutcome::SameKey);
        }
        let host = self.require_host(&target.name).await?;
        let old_key = Some(edit.private_key_file.clone());
        if !self.key_connects(target, &host, old_key.clone()).await {
            info!(node = %target.name, "key already removed");
            return Ok(KeyOutcome::AlreadyRevoked);
        }

        self.edit_authorized_keys(target, &host, REMOVE_AUTHORIZED_KEY, edit)?;

        if self.key_connects(target, &host, old_key).await {
            return Err(OpsError::KeyRotation {
                target: target.name.clone(),
                message: String::from("removed key still connects"),
            });
        }
        info!(node = %target.name, "key removed");
        Ok(KeyOutcome::Revoked)
    }

    async fn key_connects(
        &self,
        target: &NodeTarget,
        host: &HostInfo,
        key: Option<Utf8PathBuf>,
    ) -> bool {
        let endpoint = SshEndpoint::new(
            host.private_ip.clone(),
            target.custom_ssh_port,
            target.ssh_user.clone(),
        )
        .with_private_key(key)
        .with_ssh2(target.ssh2_enabled);
        probe(self.shell(), &endpoint, self.config().key_probe_policy()).await
    }

    fn edit_authorized_keys(
        &self,
        target: &NodeTarget,
        host: &HostInfo,
        command: &str,
        edit: &KeyEdit,
    ) -> Result<(), OpsError> {
        let public_key = if edit.public_key_content.trim().is_empty() {
            self.shell()
                .public_key(&edit.private_key_file)
                .map_err(|err| OpsError::KeyRotation {
                    target: target.name.clone(),
                    message: format!("could not derive the public key: {err}"),
                })?
        } else {
            edit.public_key_content.clone()
        };
        let mut ctx = self.host_context(target, host);
        ctx.apply_address(host, target.custom_ssh_port);
        ctx.set("command", command);
        ctx.set("public_key_content", public_key.trim());
        self.run_playbook(EDIT_AUTHORIZED_KEYS, &ctx, Some(host))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use rstest::{fixture, rstest};

    use super::*;
    use crate::test_support::{SimNode, SimulatedFleet, sample_host, test_config};

    const OLD_KEY: &str = "/keys/old.pem";
    const NEW_KEY: &str = "/keys/new.pem";
    const OLD_PUB: &str = "ssh-ed25519 AAAAold";
    const NEW_PUB: &str = "ssh-ed25519 AAAAnew";

    struct Harness {
        fleet: SimulatedFleet,
        target: NodeTarget,
    }

    #[fixture]
    fn harness() -> Harness {
        let fleet = SimulatedFleet::new();
        fleet.add_keypair(OLD_KEY, OLD_PUB);
        fleet.add_keypair(NEW_KEY, NEW_PUB);
        fleet.add_node(SimNode::new(sample_host("db-n1", true)).with_authorized_key(OLD_PUB));
        let target = NodeTarget::new("db-n1", &test_config())
            .with_private_key_file(Some(Utf8PathBuf::from(OLD_KEY)));
        Harness { fleet, target }
    }

    #[rstest]
    #[tokio::test]
    async fn same_key_short_circuits_without_lookup(harness: Harness) {
        let orchestrator = harness.fleet.orchestrator(test_config());
        let outcome = orchestrator
            .add_key(&harness.target, &KeyEdit::new(OLD_KEY))
            .await
            .unwrap_or_else(|err| panic!("add should skip: {err}"));
        assert_eq!(outcome, KeyOutcome::SameKey);
        assert_eq!(harness.fleet.lookups("db-n1"), 0);
        assert_eq!(harness.fleet.handshakes(), 0);
    }

    #[rstest]
    #[tokio::test]
    async fn add_derives_public_key_from_new_private_key(harness: Harness) {
        let orchestrator = harness.fleet.orchestrator(test_config());
        let outcome = orchestrator
            .add_key(&harness.target, &KeyEdit::new(NEW_KEY))
            .await
            .unwrap_or_else(|err| panic!("add failed: {err}"));
        assert_eq!(outcome, KeyOutcome::Authorized);
        assert!(harness.fleet.authorized_keys("db-n1").contains(NEW_PUB));

        let runs = harness.fleet.playbook_runs();
        let Some(run) = runs.first() else {
            panic!("expected an authorized keys edit");
        };
        assert_eq!(run.playbook, EDIT_AUTHORIZED_KEYS);
        assert_eq!(run.vars.get_str("command"), Some(ADD_AUTHORIZED_KEY));
        assert_eq!(run.vars.get_str("public_key_content"), Some(NEW_PUB));
    }

    #[rstest]
    #[tokio::test]
    async fn add_fails_when_new_key_never_connects(harness: Harness) {
        let orchestrator = harness.fleet.orchestrator(test_config());
        let edit = KeyEdit::new(NEW_KEY).with_public_key("ssh-ed25519 AAAAunrelated");
        let Err(err) = orchestrator.add_key(&harness.target, &edit).await else {
            panic!("a key that never connects must fail");
        };
        assert!(matches!(err, OpsError::KeyRotation { .. }), "got {err:?}");
        assert!(!err.is_recoverable());
    }

    #[rstest]
    #[tokio::test]
    async fn remove_confirms_old_key_is_unusable(harness: Harness) {
        let target = harness
            .target
            .clone()
            .with_private_key_file(Some(Utf8PathBuf::from(NEW_KEY)));
        harness.fleet.add_node(
            SimNode::new(sample_host("db-n1", true))
                .with_authorized_key(OLD_PUB)
                .with_authorized_key(NEW_PUB),
        );
        let orchestrator = harness.fleet.orchestrator(test_config());
        let outcome = orchestrator
            .remove_key(&target, &KeyEdit::new(OLD_KEY).with_public_key(OLD_PUB))
            .await
            .unwrap_or_else(|err| panic!("remove failed: {err}"));
        assert_eq!(outcome, KeyOutcome::Revoked);
        assert!(!harness.fleet.authorized_keys("db-n1").contains(OLD_PUB));
    }

    #[rstest]
    #[tokio::test]
    async fn verify_accepts_either_key(harness: Harness) {
        let orchestrator = harness.fleet.orchestrator(test_config());
        let current = orchestrator
            .verify_key(&harness.target, Some(Utf8Path::new(NEW_KEY)))
            .await
            .unwrap_or_else(|err| panic!("verify failed: {err}"));
        assert_eq!(current, KeyOutcome::CurrentKeyWorks);

        let rotated = harness
            .target
            .clone()
            .with_private_key_file(Some(Utf8PathBuf::from(NEW_KEY)));
        let replacement = orchestrator
            .verify_key(&rotated, Some(Utf8Path::new(OLD_KEY)))
            .await
            .unwrap_or_else(|err| panic!("verify failed: {err}"));
        assert_eq!(replacement, KeyOutcome::NewKeyWorks);
    }

    #[rstest]
    #[tokio::test]
    async fn verify_fails_without_a_working_key(harness: Harness) {
        let target = harness
            .target
            .clone()
            .with_private_key_file(Some(Utf8PathBuf::from(NEW_KEY)));
        let orchestrator = harness.fleet.orchestrator(test_config());
        let Err(err) = orchestrator.verify_key(&target, None).await else {
            panic!("no working key must fail");
        };
        assert!(matches!(err, OpsError::KeyRotation { .. }), "got {err:?}");
        assert_eq!(harness.fleet.mutating_calls(), 0);
    }
}
