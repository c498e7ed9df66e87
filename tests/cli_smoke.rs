//! Behavioural smoke tests for the CLI entrypoint.

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;

#[test]
fn cli_without_arguments_prints_usage() {
    let mut cmd = cargo_bin_cmd!("nodekeeper");
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn help_lists_lifecycle_subcommands() {
    let mut cmd = cargo_bin_cmd!("nodekeeper");
    cmd.arg("--help");
    cmd.assert().success().stdout(
        predicate::str::contains("provision")
            .and(predicate::str::contains("configure"))
            .and(predicate::str::contains("change-instance-type"))
            .and(predicate::str::contains("run-hooks")),
    );
}

#[test]
fn unknown_subcommand_is_rejected() {
    let mut cmd = cargo_bin_cmd!("nodekeeper");
    cmd.arg("teleport");
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("unrecognized subcommand"));
}

#[test]
fn list_without_pattern_is_a_fatal_error() {
    let mut cmd = cargo_bin_cmd!("nodekeeper");
    cmd.arg("list").env("RUST_LOG", "off");
    cmd.assert()
        .code(1)
        .stdout("")
        .stderr(predicate::str::contains("a host name is required"));
}

#[test]
fn missing_cloud_helper_fails_fatally() {
    let mut cmd = cargo_bin_cmd!("nodekeeper");
    cmd.args(["list", "db-n1"])
        .env("RUST_LOG", "off")
        .env("NODEKEEPER_CLOUD_HELPER_BIN", "/nonexistent/nodekeeper-cloud");
    cmd.assert().code(1).stdout("");
}
