//! Unit tests for the probe, port reconciliation, and host waiter.

use std::time::Duration;

use rstest::rstest;

use super::*;
use crate::context::NodeTarget;
use crate::error::{ErrorKind, OpsError};
use crate::retry::{Backoff, RetryPolicy};
use crate::test_support::{SimCloud, SimNode, SimShell, SimulatedFleet, sample_host, test_config};

fn waiter_for<'a>(cloud: &'a SimCloud, shell: &'a SimShell) -> HostWaiter<'a, SimCloud, SimShell> {
    let config = test_config();
    HostWaiter::new(
        cloud,
        shell,
        config.host_wait_policy(),
        config.probe_policy(),
        config.default_ssh_port,
    )
}

#[rstest]
#[case(22, Some(2222), vec![22, 2222])]
#[case(2222, Some(2222), vec![2222])]
#[case(22, None, vec![22])]
fn candidate_ports_keep_cached_first(
    #[case] cached: u16,
    #[case] custom: Option<u16>,
    #[case] expected: Vec<u16>,
) {
    assert_eq!(candidate_ports(cached, custom), expected);
}

#[tokio::test]
async fn waiter_refetches_until_running() {
    let fleet = SimulatedFleet::new();
    fleet.add_node(SimNode::new(sample_host("db-n1", true)).running_after_lookups(2));
    let (cloud, shell) = (fleet.cloud(), fleet.shell());
    let target = NodeTarget::new("db-n1", &test_config());
    let mut ctx = target.base_context();

    let host = waiter_for(&cloud, &shell)
        .wait_for_host(&target, &mut ctx, true)
        .await
        .unwrap_or_else(|err| panic!("host should become reachable: {err}"));

    assert!(host.is_running);
    assert_eq!(fleet.lookups("db-n1"), 2);
    assert_eq!(ctx.ssh_port(), Some(22));
    assert_eq!(ctx.ssh_host(), Some(host.private_ip.as_str()));
}

#[tokio::test]
async fn waiter_stops_looking_up_once_running() {
    let fleet = SimulatedFleet::new();
    fleet.add_node(SimNode::new(sample_host("db-n1", true)).with_open_ports(&[2222]));
    let (cloud, shell) = (fleet.cloud(), fleet.shell());
    let target = NodeTarget::new("db-n1", &test_config());
    let mut ctx = target.base_context();

    let Err(err) = waiter_for(&cloud, &shell)
        .wait_for_host(&target, &mut ctx, true)
        .await
    else {
        panic!("port 22 is closed so the waiter should time out");
    };

    assert_eq!(err.kind(), ErrorKind::Recoverable);
    assert_eq!(fleet.lookups("db-n1"), 1);
}

#[tokio::test]
async fn waiter_times_out_for_missing_host() {
    let fleet = SimulatedFleet::new();
    let (cloud, shell) = (fleet.cloud(), fleet.shell());
    let target = NodeTarget::new("db-n9", &test_config());
    let mut ctx = target.base_context();

    let Err(err) = waiter_for(&cloud, &shell)
        .wait_for_host(&target, &mut ctx, true)
        .await
    else {
        panic!("a missing host should time out");
    };

    assert!(matches!(&err, OpsError::HostTimeout { target, .. } if target == "db-n9"));
    assert!(err.is_recoverable());
    assert_eq!(fleet.lookups("db-n9"), 2);
    assert_eq!(fleet.handshakes(), 0);
}

#[tokio::test]
async fn waiter_times_out_for_host_that_never_runs() {
    let fleet = SimulatedFleet::new();
    let host = sample_host("db-n1", false);
    fleet.add_node(SimNode::new(host.clone()).stopped());
    let (cloud, shell) = (fleet.cloud(), fleet.shell());
    let target = NodeTarget::new("db-n1", &test_config());
    let mut ctx = target.base_context();

    let Err(err) = waiter_for(&cloud, &shell)
        .wait_for_host(&target, &mut ctx, true)
        .await
    else {
        panic!("a stopped host should time out");
    };

    assert!(
        matches!(
            &err,
            OpsError::HostTimeout { target, endpoint }
                if target == "db-n1" && endpoint.contains(&host.private_ip)
        ),
        "got {err:?}"
    );
    assert!(err.is_recoverable());
    assert_eq!(fleet.lookups("db-n1"), 2);
}

#[tokio::test]
async fn waiter_probes_custom_port_when_default_not_preferred() {
    let fleet = SimulatedFleet::new();
    fleet.add_node(SimNode::new(sample_host("db-n1", true)).with_open_ports(&[2222]));
    let (cloud, shell) = (fleet.cloud(), fleet.shell());
    let target = NodeTarget::new("db-n1", &test_config()).with_custom_ssh_port(2222);
    let mut ctx = target.base_context();

    waiter_for(&cloud, &shell)
        .wait_for_host(&target, &mut ctx, false)
        .await
        .unwrap_or_else(|err| panic!("custom port is open: {err}"));

    assert_eq!(ctx.ssh_port(), Some(2222));
}

#[tokio::test]
async fn waiter_surfaces_lookup_failures() {
    let fleet = SimulatedFleet::new();
    fleet.fail_cloud("host-info");
    let (cloud, shell) = (fleet.cloud(), fleet.shell());
    let target = NodeTarget::new("db-n1", &test_config());
    let mut ctx = target.base_context();

    let Err(err) = waiter_for(&cloud, &shell)
        .wait_for_host(&target, &mut ctx, true)
        .await
    else {
        panic!("the lookup fails");
    };
    assert!(matches!(err, OpsError::Cloud { .. }));
    assert_eq!(err.kind(), ErrorKind::Fatal);
    assert_eq!(fleet.lookups("db-n1"), 1);
}

#[tokio::test]
async fn reconcile_moves_to_open_custom_port() {
    let fleet = SimulatedFleet::new();
    let host = sample_host("db-n1", true);
    fleet.add_node(SimNode::new(host.clone()).with_open_ports(&[2222]));
    let cloud = fleet.cloud();
    let mut ctx = NodeTarget::new("db-n1", &test_config()).base_context();
    ctx.apply_address(&host, 22);

    let result = reconcile_open_port(&cloud, &host, "db-n1", 2222, &mut ctx)
        .await
        .unwrap_or_else(|err| panic!("2222 is open: {err}"));

    assert_eq!(
        result,
        PortReconciliation {
            port: 2222,
            port_was_updated: true
        }
    );
    assert_eq!(ctx.ssh_port(), Some(2222));
}

#[tokio::test]
async fn reconcile_keeps_cached_port_when_open() {
    let fleet = SimulatedFleet::new();
    let host = sample_host("db-n1", true);
    fleet.add_node(SimNode::new(host.clone()).with_open_ports(&[2222]));
    let cloud = fleet.cloud();
    let mut ctx = NodeTarget::new("db-n1", &test_config()).base_context();
    ctx.apply_address(&host, 2222);

    let result = reconcile_open_port(&cloud, &host, "db-n1", 2222, &mut ctx)
        .await
        .unwrap_or_else(|err| panic!("2222 is open: {err}"));

    assert!(!result.port_was_updated);
    assert_eq!(result.port, 2222);
}

#[tokio::test]
async fn closed_ports_are_recoverable() {
    let fleet = SimulatedFleet::new();
    let host = sample_host("db-n1", true);
    fleet.add_node(SimNode::new(host.clone()).with_open_ports(&[]));
    let cloud = fleet.cloud();

    let Err(err) = find_open_port(&cloud, &host, "db-n1", &[22, 2222]).await else {
        panic!("no port is open");
    };

    assert_eq!(
        err,
        OpsError::PortClosed {
            target: String::from("db-n1"),
            candidates: vec![22, 2222]
        }
    );
    assert!(err.is_recoverable());
}

#[tokio::test]
async fn open_port_check_failure_is_fatal() {
    let fleet = SimulatedFleet::new();
    let host = sample_host("db-n1", true);
    fleet.add_node(SimNode::new(host.clone()));
    fleet.fail_cloud("open-port");
    let cloud = fleet.cloud();

    let Err(err) = find_open_port(&cloud, &host, "db-n1", &[22]).await else {
        panic!("the provider check fails");
    };
    assert_eq!(err.kind(), ErrorKind::Fatal);
}

#[tokio::test]
async fn probe_uses_every_attempt_before_giving_up() {
    let fleet = SimulatedFleet::new();
    let host = sample_host("db-n1", true);
    fleet.add_node(SimNode::new(host.clone()).with_open_ports(&[]));
    let shell = fleet.shell();
    let target = NodeTarget::new("db-n1", &test_config());

    let policy = RetryPolicy::new(4, Backoff::Fixed(Duration::ZERO));

    let reachable = probe(&shell, &target.endpoint_at(&host, 22), policy).await;

    assert!(!reachable);
    assert_eq!(fleet.handshakes(), 4);
}

#[tokio::test]
async fn probe_returns_on_first_success() {
    let fleet = SimulatedFleet::new();
    let host = sample_host("db-n1", true);
    fleet.add_node(SimNode::new(host.clone()));
    let shell = fleet.shell();
    let target = NodeTarget::new("db-n1", &test_config());

    assert!(probe(&shell, &target.endpoint_at(&host, 22), test_config().probe_policy()).await);
    assert_eq!(fleet.handshakes(), 1);
}
