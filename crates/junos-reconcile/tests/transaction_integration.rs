//! Transaction integration tests
//!
//! Covers candidate lock exclusivity, rollback and the commit outcome
//! handling of the coordinator when the device or the transport misbehaves.

use std::sync::Arc;
use std::time::Duration;

use junos_common::ErrorKind;
use junos_reconcile::{
    Coordinator, LockManager, LockWait, Outcome, PhysicalInterface, Reconciler, ResourceState,
    ResourceType, RetryPolicy, RoutingInstance, Session, Timeouts,
};
use junos_test::{
    device_with,
    fixtures::{interface_fixtures, routing_fixtures},
    DeviceVerifier, FaultKind, LockHolder, MockDevice, RpcVerifier, Stage,
};
use pretty_assertions::assert_eq;

/// Session that reconnects to `device` after a dropped connection
fn session(device: &MockDevice) -> Session {
    Session::new(Box::new(device.connect()), Timeouts::default())
        .with_connector(Arc::new(device.clone()))
}

fn reconciler_with(locks: Arc<LockManager>) -> Reconciler {
    Reconciler::new(Coordinator::new(
        locks,
        RetryPolicy::new(2, Duration::from_millis(10)),
    ))
}

fn reconciler() -> Reconciler {
    reconciler_with(Arc::new(LockManager::new(LockWait::FailFast)))
}

fn virtual_router(name: &str) -> ResourceState {
    ResourceState::RoutingInstance(RoutingInstance {
        instance_type: Some("virtual-router".to_string()),
        description: Some(format!("tenant {}", name)),
        ..RoutingInstance::new(name)
    })
}

/// Scenario:
/// 1. Session 1 creates "blue" and is parked inside its commit
/// 2. A transaction sharing the lock manager fails fast without touching the device
/// 3. A transaction from another process is refused by the device lock
/// 4. Session 1 finishes; the second object can then be created
#[tokio::test]
async fn test_candidate_lock_is_exclusive() {
    let device = MockDevice::new("vsrx1");
    let locks = Arc::new(LockManager::new(LockWait::FailFast));
    let first = Arc::new(reconciler_with(locks.clone()));
    let gate = device.hold_next_commit();

    // 1. Park the first commit
    let handle = {
        let device = device.clone();
        let first = first.clone();
        tokio::spawn(async move {
            let mut session = session(&device);
            first.create(&mut session, &virtual_router("blue")).await
        })
    };
    gate.wait_reached().await;
    assert!(locks.is_held("vsrx1"));
    assert!(matches!(device.lock_holder(), Some(LockHolder::Session(_))));

    // 2. Same process, same lock manager
    let sibling = reconciler_with(locks.clone());
    let mut sibling_session = session(&device);
    let locks_before = RpcVerifier::new(&device).count("lock");
    let err = sibling
        .create(&mut sibling_session, &virtual_router("green"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::LockConflict);
    assert!(err.to_string().contains("this process"));
    assert_eq!(RpcVerifier::new(&device).count("lock"), locks_before);

    // 3. Another process: only the device lock stands in the way
    let outsider = reconciler();
    let mut outsider_session = session(&device);
    let err = outsider
        .create(&mut outsider_session, &virtual_router("green"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::LockConflict);
    assert!(err.to_string().contains("netconf session"));
    RpcVerifier::new(&device).assert_not_sent("discard-changes").unwrap();

    // 4. Let the first commit through
    gate.release();
    let created = handle.await.unwrap().unwrap();
    assert_eq!(created, virtual_router("blue"));
    assert!(!locks.is_held("vsrx1"));
    assert_eq!(device.lock_holder(), None);

    let created = sibling
        .create(&mut sibling_session, &virtual_router("green"))
        .await
        .unwrap();
    assert_eq!(created, virtual_router("green"));
    assert_eq!(device.commit_count(), 2);
}

#[tokio::test]
async fn test_administrator_lock_blocks_writes() {
    let device = MockDevice::new("vsrx1");
    device.lock_externally("admin");
    let mut session = session(&device);
    let reconciler = reconciler();

    let err = reconciler
        .create(&mut session, &virtual_router("blue"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::LockConflict);
    assert!(err.to_string().contains("admin terminal p0"));

    let rpcs = RpcVerifier::new(&device);
    rpcs.assert_write_count(0).unwrap();
    rpcs.assert_not_sent("unlock").unwrap();
    assert_eq!(device.lock_holder(), Some(LockHolder::External("admin".to_string())));

    device.unlock_externally();
    reconciler
        .create(&mut session, &virtual_router("blue"))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_lock_retries_wait_out_a_short_admin_lock() {
    let device = MockDevice::new("vsrx1");
    device.lock_externally("admin");
    let mut session = session(&device);
    let reconciler = Reconciler::new(
        Coordinator::new(
            Arc::new(LockManager::default()),
            RetryPolicy::new(2, Duration::from_millis(20)),
        )
        .with_lock_retries(3),
    );

    let unlocker = {
        let device = device.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            device.unlock_externally();
        })
    };

    reconciler
        .create(&mut session, &virtual_router("blue"))
        .await
        .unwrap();
    unlocker.await.unwrap();
    assert!(RpcVerifier::new(&device).count("lock") >= 2);
}

#[tokio::test]
async fn test_rejected_update_leaves_device_untouched() {
    let device = device_with([
        interface_fixtures::tagged_physical("ge-0/0/1"),
        interface_fixtures::unit_with_inet("ge-0/0/1", 0, "198.51.100.1/24"),
    ]);
    device.reject(
        Stage::Check,
        "interfaces ge-0/0/1 mtu",
        "mtu 9000 exceeds the maximum supported by this interface",
    );
    let verifier = DeviceVerifier::new(&device);
    let snapshot = verifier.snapshot();
    let mut session = session(&device);

    let desired = ResourceState::InterfacePhysical(PhysicalInterface {
        mtu: Some(9000),
        vlan_tagging: true,
        ..PhysicalInterface::new("ge-0/0/1")
    });
    let err = reconciler()
        .converge(&mut session, &desired)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ConfigConflict);
    let text = err.to_string();
    assert!(text.contains("exceeds the maximum"));
    assert!(text.contains("interface_physical 'ge-0/0/1'"));
    assert!(text.contains("set interfaces ge-0/0/1 mtu 9000"));

    verifier.assert_unchanged(&snapshot).unwrap();
    assert_eq!(device.candidate_lines(), device.committed_lines());
    assert_eq!(device.lock_holder(), None);
    RpcVerifier::new(&device).assert_not_sent("commit").unwrap();
}

#[tokio::test]
async fn test_load_rejection_is_not_retried() {
    let device = MockDevice::new("vsrx1");
    device.reject(
        Stage::Load,
        "routing-instances blue instance-type",
        "syntax error",
    );
    let mut session = session(&device);

    let err = reconciler()
        .create(&mut session, &virtual_router("blue"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConfigConflict);
    assert!(err.paths().contains(&"routing-instances blue instance-type".to_string()));

    RpcVerifier::new(&device)
        .assert_sequence(&[
            "show-configuration",
            "lock",
            "load-configuration",
            "discard-changes",
            "unlock",
        ])
        .unwrap();
    assert!(device.committed_lines().is_empty());
}

#[tokio::test]
async fn test_connection_reset_restarts_the_batch() {
    let device = MockDevice::new("vsrx1");
    device.inject_fault("load-configuration", FaultKind::Reset);
    let mut session = session(&device);
    let desired = virtual_router("blue");
    let statements = desired.build_create().unwrap().len();

    let created = reconciler().create(&mut session, &desired).await.unwrap();
    assert_eq!(created, desired);

    let rpcs = RpcVerifier::new(&device);
    assert_eq!(rpcs.count("load-configuration"), statements + 1);
    // The reset took the first lock with it
    assert_eq!(rpcs.count("lock"), 2);
    assert_eq!(rpcs.count("unlock"), 1);
    rpcs.assert_not_sent("discard-changes").unwrap();
    assert_eq!(rpcs.count("commit"), 1);
    assert_eq!(device.commit_count(), 1);
    assert_eq!(device.lock_holder(), None);
}

#[tokio::test]
async fn test_connection_reset_without_reconnect_gives_up() {
    let device = MockDevice::new("vsrx1");
    device.inject_fault("load-configuration", FaultKind::Reset);
    let mut session = Session::new(Box::new(device.connect()), Timeouts::default());

    let err = reconciler()
        .create(&mut session, &virtual_router("blue"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transport);

    let rpcs = RpcVerifier::new(&device);
    assert_eq!(rpcs.count("load-configuration"), 1);
    assert_eq!(rpcs.count("lock"), 1);
    rpcs.assert_not_sent("unlock").unwrap();
    assert_eq!(device.lock_holder(), None);
    assert!(device.committed_lines().is_empty());
}

#[tokio::test]
async fn test_commit_refused_after_clean_check_is_rolled_back() {
    let device = device_with([routing_fixtures::vrf("red", "65000:10")]);
    device.reject(
        Stage::Commit,
        "routing-instances blue",
        "commit script: tenant instances need a route distinguisher",
    );
    let verifier = DeviceVerifier::new(&device);
    let snapshot = verifier.snapshot();
    let mut session = session(&device);

    let err = reconciler()
        .create(&mut session, &virtual_router("blue"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConfigConflict);
    assert!(err.to_string().contains("route distinguisher"));

    let rpcs = RpcVerifier::new(&device);
    assert_eq!(rpcs.count("commit-check"), 1);
    assert_eq!(rpcs.count("commit"), 1);
    rpcs.assert_sent("discard-changes").unwrap();
    verifier.assert_unchanged(&snapshot).unwrap();
    assert_eq!(device.candidate_lines(), device.committed_lines());
    assert_eq!(device.lock_holder(), None);
}

#[tokio::test]
async fn test_commit_timeout_after_apply_is_reported_unknown() {
    let device = device_with([routing_fixtures::vrf("red", "65000:10")]);
    device.inject_fault("commit", FaultKind::TimeoutAfterApply);
    let mut session = session(&device);
    let reconciler = reconciler();
    let desired = virtual_router("blue");

    let err = reconciler.create(&mut session, &desired).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CommitUnknown);
    assert!(err.to_string().contains("re-read"));
    let rpcs = RpcVerifier::new(&device);
    assert_eq!(rpcs.count("commit"), 1);
    // Nothing more goes over the connection the commit timed out on
    rpcs.assert_not_sent("discard-changes").unwrap();
    rpcs.assert_not_sent("unlock").unwrap();

    // The device did commit; a re-read settles it
    let state = reconciler
        .read(&mut session, ResourceType::RoutingInstance, "blue")
        .await
        .unwrap();
    assert_eq!(state, Some(desired.clone()));

    device.clear_log();
    let outcome = reconciler.converge(&mut session, &desired).await.unwrap();
    assert_eq!(outcome, Outcome::Unchanged);
    RpcVerifier::new(&device).assert_write_count(0).unwrap();
    assert_eq!(device.lock_holder(), None);
}

#[tokio::test(start_paused = true)]
async fn test_hung_commit_times_out_as_unknown() {
    let device = MockDevice::new("vsrx1");
    device.inject_fault("commit", FaultKind::Hang);
    let timeouts = Timeouts {
        command: Duration::from_secs(5),
        commit: Duration::from_secs(30),
    };
    let mut session = Session::new(Box::new(device.connect()), timeouts)
        .with_connector(Arc::new(device.clone()));
    let reconciler = reconciler();

    let err = reconciler
        .create(&mut session, &virtual_router("blue"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CommitUnknown);
    assert_eq!(RpcVerifier::new(&device).count("commit"), 1);

    // The commit never ran: nothing committed, candidate discarded, lock gone
    let state = reconciler
        .read(&mut session, ResourceType::RoutingInstance, "blue")
        .await
        .unwrap();
    assert_eq!(state, None);
    assert!(device.candidate_lines().is_empty());
    assert_eq!(device.lock_holder(), None);
}

#[tokio::test]
async fn test_transient_faults_exhaust_retries() {
    let device = MockDevice::new("vsrx1");
    for _ in 0..3 {
        device.inject_fault("commit-check", FaultKind::Timeout);
    }
    let mut session = session(&device);

    let err = reconciler()
        .create(&mut session, &virtual_router("blue"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transport);
    assert!(err.is_timeout());

    let rpcs = RpcVerifier::new(&device);
    assert_eq!(rpcs.count("commit-check"), 3);
    assert_eq!(rpcs.count("lock"), 3);
    rpcs.assert_not_sent("commit").unwrap();
    assert!(device.committed_lines().is_empty());
    assert_eq!(device.lock_holder(), None);
}

#[tokio::test]
async fn test_commit_comment_is_recorded() {
    let device = MockDevice::new("vsrx1");
    let mut session = session(&device);
    let reconciler = Reconciler::new(
        Coordinator::new(Arc::new(LockManager::default()), RetryPolicy::default())
            .with_commit_comment("change 4711"),
    );

    reconciler
        .create(&mut session, &virtual_router("blue"))
        .await
        .unwrap();
    assert_eq!(device.commit_comments(), vec!["change 4711"]);
}
