//! Tests for the SSH adapter.

use camino::{Utf8Path, Utf8PathBuf};
use rstest::{fixture, rstest};

use super::*;
use crate::test_support::{CommandInvocation, ScriptedRunner};

#[fixture]
fn config() -> SshConfig {
    SshConfig {
        ssh_bin: String::from("ssh"),
        scp_bin: String::from("scp"),
        ssh2_bin: String::from("sshg3"),
        scp2_bin: String::from("scpg3"),
        keygen_bin: String::from("ssh-keygen"),
        batch_mode: true,
        strict_host_key_checking: false,
        known_hosts_file: String::from("/dev/null"),
        connect_timeout_secs: 5,
        remote_tmp_dir: String::from("/tmp"),
    }
}

fn endpoint() -> SshEndpoint {
    SshEndpoint::new("10.0.0.5", 2222, "centos")
        .with_private_key(Some(Utf8PathBuf::from("/keys/node.pem")))
}

#[rstest]
fn execute_builds_openssh_arguments(config: SshConfig) {
    let runner = ScriptedRunner::new();
    runner.push_output(Some(0), "ok\n", "");
    let client = SshClient::new(config, runner.clone())
        .unwrap_or_else(|err| panic!("client should build: {err}"));

    let output = client
        .execute(&endpoint(), "sudo reboot")
        .unwrap_or_else(|err| panic!("execute should run: {err}"));

    assert!(output.is_success());
    let invocations = runner.invocations();
    let command = invocations
        .first()
        .unwrap_or_else(|| panic!("ssh should be invoked"))
        .command_string();
    assert_eq!(
        command,
        "ssh -p 2222 -i /keys/node.pem -o BatchMode=yes -o StrictHostKeyChecking=no \
         -o UserKnownHostsFile=/dev/null -o ConnectTimeout=5 centos@10.0.0.5 sudo reboot"
    );
}

#[rstest]
fn ssh2_endpoints_use_ssh2_binaries(config: SshConfig) {
    let runner = ScriptedRunner::new();
    runner.push_success();
    let client = SshClient::new(config, runner.clone())
        .unwrap_or_else(|err| panic!("client should build: {err}"));

    client
        .copy_to_tmp(&endpoint().with_ssh2(true), Utf8Path::new("/pkgs/db.tar.gz"))
        .unwrap_or_else(|err| panic!("copy should run: {err}"));

    let invocations = runner.invocations();
    let invocation = invocations
        .first()
        .unwrap_or_else(|| panic!("scp should be invoked"));
    assert_eq!(invocation.program, "scpg3");
    assert_eq!(
        invocation.command_string(),
        "scpg3 -P 2222 -K /keys/node.pem -B /pkgs/db.tar.gz centos@10.0.0.5:/tmp"
    );
}

#[rstest]
fn handshake_reports_failure_as_false(config: SshConfig) {
    let runner = ScriptedRunner::new();
    runner.push_output(Some(255), "", "Connection refused");
    let client = SshClient::new(config, runner.clone())
        .unwrap_or_else(|err| panic!("client should build: {err}"));

    assert!(!client.handshake(&endpoint()));
    let invocations = runner.invocations();
    let command = invocations
        .first()
        .unwrap_or_else(|| panic!("ssh should be invoked"))
        .command_string();
    assert!(command.ends_with(&format!("centos@10.0.0.5 {HANDSHAKE_COMMAND}")));
}

#[rstest]
fn handshake_treats_spawn_errors_as_unreachable(config: SshConfig) {
    let client = SshClient::new(config, ScriptedRunner::new())
        .unwrap_or_else(|err| panic!("client should build: {err}"));
    assert!(!client.handshake(&endpoint()));
}

#[rstest]
fn public_key_trims_keygen_output(config: SshConfig) {
    let runner = ScriptedRunner::new();
    runner.push_output(Some(0), "ssh-rsa AAAAB3Nza node\n", "");
    let client = SshClient::new(config, runner.clone())
        .unwrap_or_else(|err| panic!("client should build: {err}"));

    let key = client
        .public_key(Utf8Path::new("/keys/node.pem"))
        .unwrap_or_else(|err| panic!("public key should derive: {err}"));

    assert_eq!(key, "ssh-rsa AAAAB3Nza node");
    let invocations = runner.invocations();
    assert_eq!(
        invocations.first().map(CommandInvocation::command_string),
        Some(String::from("ssh-keygen -y -f /keys/node.pem"))
    );
}

#[rstest]
fn public_key_surfaces_keygen_failure(config: SshConfig) {
    let runner = ScriptedRunner::new();
    runner.push_output(Some(1), "", "load failed");
    let client = SshClient::new(config, runner)
        .unwrap_or_else(|err| panic!("client should build: {err}"));

    let Err(err) = client.public_key(Utf8Path::new("/keys/missing.pem")) else {
        panic!("keygen failure should surface");
    };
    assert!(matches!(err, SshError::CommandFailure { ref stderr, .. } if stderr == "load failed"));
}

#[rstest]
fn rejects_blank_binaries(mut config: SshConfig) {
    config.scp_bin = String::from("  ");
    let Err(err) = SshClient::new(config, ScriptedRunner::new()) else {
        panic!("blank scp should fail");
    };
    assert_eq!(
        err,
        SshError::InvalidConfig {
            field: String::from("scp_bin")
        }
    );
}

#[rstest]
#[case("/var/tmp", "/var/tmp/tune.sh")]
#[case("/var/tmp/", "/var/tmp/tune.sh")]
fn staged_path_follows_remote_tmp_dir(
    mut config: SshConfig,
    #[case] remote_tmp_dir: &str,
    #[case] expected: &str,
) {
    config.remote_tmp_dir = remote_tmp_dir.to_owned();
    let client = SshClient::new(config, ScriptedRunner::new())
        .unwrap_or_else(|err| panic!("client should build: {err}"));

    assert_eq!(client.staged_path(Utf8Path::new("/hooks/tune.sh")), expected);
}
