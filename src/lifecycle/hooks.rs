//! Custom hooks staged on a node and executed over SSH.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use camino::Utf8PathBuf;
use regex::Regex;
use shell_escape::unix::escape;
use tracing::{info, warn};

use super::Orchestrator;
use crate::cloud::CloudApi;
use crate::context::{NodeTarget, SSH_USER};
use crate::error::OpsError;
use crate::executor::TaskExecutor;
use crate::ssh::RemoteShell;

/// Trigger that runs before the service user exists.
pub const PRE_NODE_PROVISION: &str = "PreNodeProvision";

#[expect(clippy::expect_used, reason = "pattern is a literal")]
static RUNTIME_ARG_KEY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("valid regex"));

/// Interpreter for a hook script.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ExecutionLang {
    /// `bash`.
    Bash,
    /// `python`.
    Python,
}

impl ExecutionLang {
    /// Interpreter command.
    #[must_use]
    pub const fn command(self) -> &'static str {
        match self {
            Self::Bash => "bash",
            Self::Python => "python",
        }
    }
}

impl fmt::Display for ExecutionLang {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bash => f.write_str("Bash"),
            Self::Python => f.write_str("Python"),
        }
    }
}

impl FromStr for ExecutionLang {
    type Err = OpsError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "Bash" => Ok(Self::Bash),
            "Python" => Ok(Self::Python),
            other => Err(OpsError::invalid(format!(
                "execution language {other} is not valid, must be Bash or Python"
            ))),
        }
    }
}

/// A hook to run on one node.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct HookRequest {
    /// Interpreter.
    pub lang: ExecutionLang,
    /// Event that triggered the hook.
    pub trigger: String,
    /// Local path of the hook script.
    pub hook_path: Utf8PathBuf,
    /// Task that is running the hook.
    pub parent_task: String,
    /// Run with `sudo` as the SSH user.
    pub use_sudo: bool,
    /// Extra `--key value` arguments.
    pub runtime_args: BTreeMap<String, String>,
}

impl HookRequest {
    fn runs_before_provisioning(&self) -> bool {
        self.trigger == PRE_NODE_PROVISION
    }

    /// Checks that every runtime argument key is a plain flag name.
    ///
    /// # Errors
    ///
    /// Returns [`OpsError::InvalidRequest`] naming the first key outside
    /// `[A-Za-z0-9_-]`.
    pub fn validate(&self) -> Result<(), OpsError> {
        self.runtime_args
            .keys()
            .find(|key| !RUNTIME_ARG_KEY.is_match(key))
            .map_or(Ok(()), |key| {
                Err(OpsError::invalid(format!(
                    "hook runtime argument {key:?} may only contain letters, digits, '_' and '-'"
                )))
            })
    }

    /// Remote command line for the hook staged at `staged`.
    ///
    /// # Errors
    ///
    /// Returns [`OpsError::InvalidRequest`] when a runtime argument key is
    /// not a plain flag name.
    pub fn command_line(&self, staged: &str) -> Result<String, OpsError> {
        self.validate()?;
        let mut command = String::new();
        if self.use_sudo {
            command.push_str("sudo ");
        }
        command.push_str(&format!(
            "{} {} --parent_task {} --trigger {}",
            self.lang.command(),
            escape(staged.into()),
            escape(self.parent_task.as_str().into()),
            escape(self.trigger.as_str().into()),
        ));
        for (key, value) in &self.runtime_args {
            command.push_str(&format!(" --{key} {}", escape(value.as_str().into())));
        }
        Ok(command)
    }
}

impl<C, X, S> Orchestrator<C, X, S>
where
    C: CloudApi,
    X: TaskExecutor,
    S: RemoteShell,
{
    /// Stages and runs a hook, then removes it.
    ///
    /// Hooks run as the service user unless `use_sudo` is set or the trigger
    /// is [`PRE_NODE_PROVISION`], in which case the SSH user runs them.
    ///
    /// # Errors
    ///
    /// Returns [`OpsError::InvalidRequest`] for malformed runtime argument
    /// keys, a recoverable timeout when the node is unreachable, or a fatal
    /// error when staging or the hook itself fails. A failed cleanup is only
    /// logged.
    pub async fn run_hooks(
        &self,
        target: &NodeTarget,
        hook: &HookRequest,
    ) -> Result<(), OpsError> {
        hook.validate()?;
        let default_preferred = hook.runs_before_provisioning();
        let user = if hook.use_sudo || default_preferred {
            target.ssh_user.clone()
        } else {
            self.config.service_user.clone()
        };

        let mut ctx = target.base_context();
        ctx.set(SSH_USER, user);
        self.waiter()
            .wait_for_host(target, &mut ctx, default_preferred)
            .await?;
        let endpoint = ctx.endpoint()?;

        let staged = self
            .stage(&target.name, &endpoint, &hook.hook_path)
            .map_err(|_| OpsError::Remote {
                target: target.name.clone(),
                message: format!("could not transfer hook {} to the node", hook.hook_path),
            })?;

        info!(node = %target.name, trigger = %hook.trigger, hook = %hook.hook_path, "running hook");
        let output = self.remote(&target.name, &endpoint, &hook.command_line(&staged)?)?;
        if !output.is_success() {
            return Err(OpsError::Remote {
                target: target.name.clone(),
                message: format!("custom hook failed: {}", output.stderr.trim()),
            });
        }

        let cleanup = format!("rm {}", escape(staged.as_str().into()));
        match self.remote(&target.name, &endpoint, &cleanup) {
            Ok(removed) if removed.is_success() => {}
            Ok(removed) => {
                warn!(node = %target.name, stderr = %removed.stderr.trim(), "failed deleting hook");
            }
            Err(err) => warn!(node = %target.name, error = %err, "failed deleting hook"),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn hook(use_sudo: bool) -> HookRequest {
        HookRequest {
            lang: ExecutionLang::Python,
            trigger: String::from("PostNodeProvision"),
            hook_path: Utf8PathBuf::from("/hooks/tune.py"),
            parent_task: String::from("CreateUniverse"),
            use_sudo,
            runtime_args: BTreeMap::from([(String::from("level"), String::from("high"))]),
        }
    }

    fn command_line(hook: &HookRequest, staged: &str) -> String {
        hook.command_line(staged)
            .unwrap_or_else(|err| panic!("command line should build: {err}"))
    }

    #[test]
    fn command_line_includes_runtime_args() {
        assert_eq!(
            command_line(&hook(false), "/tmp/tune.py"),
            "python /tmp/tune.py --parent_task CreateUniverse \
             --trigger PostNodeProvision --level high"
        );
    }

    #[test]
    fn sudo_prefixes_command() {
        let line = command_line(&hook(true), "/var/tmp/tune.py");
        assert!(line.starts_with("sudo python /var/tmp/tune.py"), "got {line}");
    }

    #[rstest]
    #[case("level; rm -rf /")]
    #[case("level high")]
    #[case("$(reboot)")]
    #[case("")]
    fn shell_metacharacters_in_runtime_arg_keys_are_rejected(#[case] key: &str) {
        let mut request = hook(false);
        request.runtime_args.insert(key.to_owned(), String::from("x"));

        let Err(err) = request.command_line("/tmp/tune.py") else {
            panic!("key {key:?} must be rejected");
        };
        assert!(matches!(err, OpsError::InvalidRequest { .. }), "got {err:?}");
    }

    #[test]
    fn dashed_runtime_arg_keys_are_accepted() {
        let mut request = hook(false);
        request.runtime_args.insert(String::from("max-conns_2"), String::from("10"));

        assert!(command_line(&request, "/tmp/tune.py").ends_with("--max-conns_2 10"));
    }

    #[test]
    fn unknown_language_is_rejected() {
        let Err(err) = "Ruby".parse::<ExecutionLang>() else {
            panic!("Ruby is not supported");
        };
        assert!(matches!(err, OpsError::InvalidRequest { .. }));
    }
}
