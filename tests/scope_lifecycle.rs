//! End-to-end scope lifecycle tests through the public API.

#[macro_use]
mod common;

use common::*;
use scopekeeper::{
    CancelReason, Error, ErrorKind, LateRegistration, ScopeConfig, ScopeManager, ScopeState,
    TerminationSignal,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[test]
fn finalizers_run_in_reverse_with_close_signal() {
    init_test_logging();
    test_phase!("finalizers_run_in_reverse_with_close_signal");
    let manager = ScopeManager::default();
    let scope = manager.create_scope();
    let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));

    for name in ["F1", "F2", "F3"] {
        let seen = Arc::clone(&seen);
        manager
            .add_finalizer(&scope, move |signal| {
                seen.lock()
                    .push((name, signal.success_value::<String>().cloned()));
                Ok(())
            })
            .unwrap();
    }

    manager
        .close_scope(&scope, TerminationSignal::success(String::from("x")))
        .unwrap();

    let seen = seen.lock().clone();
    let expected = vec![
        ("F3", Some(String::from("x"))),
        ("F2", Some(String::from("x"))),
        ("F1", Some(String::from("x"))),
    ];
    assert_with_log!(seen == expected, "reverse order with signal", expected, seen);
    assert_eq!(scope.state(), ScopeState::Closed);
    test_complete!("finalizers_run_in_reverse_with_close_signal");
}

#[test]
fn failing_finalizer_does_not_stop_the_rest() {
    init_test_logging();
    let manager = ScopeManager::default();
    let scope = manager.create_scope();
    let log = RunLog::new();

    scope.add_finalizer(log.ok("F1")).unwrap();
    scope.add_finalizer(log.fail("F2", "boom")).unwrap();
    scope.add_finalizer(log.ok("F3")).unwrap();

    let composite = scope.close(TerminationSignal::unit()).unwrap_err();
    assert_eq!(log.names(), vec!["F3", "F2", "F1"]);
    assert_eq!(composite.len(), 1);
    assert!(composite.contains_message("boom"));
    assert_eq!(composite.scope_id(), scope.id());

    let stats = manager.stats();
    assert_eq!(stats.finalizers_run, 3);
    assert_eq!(stats.finalizer_failures, 1);
}

#[test]
fn double_close_is_idempotent() {
    init_test_logging();
    let scope = ScopeManager::default().create_scope();
    let runs = Arc::new(AtomicUsize::new(0));
    let r = Arc::clone(&runs);
    scope
        .add_finalizer(move |_| {
            r.fetch_add(1, Ordering::SeqCst);
            Err(Error::user("once"))
        })
        .unwrap();

    let first = scope.close(TerminationSignal::unit());
    let second = scope.close(TerminationSignal::cancelled(CancelReason::shutdown()));

    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(
        first.unwrap_err().to_string(),
        second.unwrap_err().to_string()
    );
    // The first signal is the one recorded.
    assert!(scope.close_signal().is_some_and(|s| s.is_success()));
}

#[test]
fn panicking_finalizer_is_captured() {
    init_test_logging();
    let scope = ScopeManager::default().create_scope();
    let log = RunLog::new();
    scope.add_finalizer(log.ok("after")).unwrap();
    scope
        .add_finalizer(|_| -> scopekeeper::Result<()> { panic!("finalizer exploded") })
        .unwrap();

    let composite = scope.close(TerminationSignal::unit()).unwrap_err();
    assert_eq!(log.names(), vec!["after"]);
    assert_eq!(composite.failures()[0].kind(), ErrorKind::Panicked);
    assert!(composite.contains_message("finalizer exploded"));
}

#[test]
fn strict_policy_rejects_after_close() {
    let manager = ScopeManager::default();
    let scope = manager.create_scope();
    scope.close(TerminationSignal::unit()).unwrap();

    let ran = Arc::new(AtomicUsize::new(0));
    let r = Arc::clone(&ran);
    let err = manager
        .add_finalizer(&scope, move |_| {
            r.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ScopeClosed);
    assert_eq!(ran.load(Ordering::SeqCst), 0);
    assert_eq!(manager.stats().rejected_registrations, 1);
}

#[test]
fn lenient_policy_runs_immediately_after_close() {
    init_test_logging();
    let manager = ScopeManager::new(
        ScopeConfig::default().with_late_registration(LateRegistration::Lenient),
    );
    let scope = manager.create_scope();
    scope
        .close(TerminationSignal::cancelled(CancelReason::user("stop")))
        .unwrap();

    let log = RunLog::new();
    manager.add_finalizer(&scope, log.ok("late")).unwrap();
    assert_eq!(log.names(), vec!["late"]);
    assert_eq!(log.labels(), vec!["cancelled"]);

    // Failures are logged, not returned.
    manager
        .add_finalizer(&scope, log.fail("late-fail", "ignored"))
        .unwrap();
    assert_eq!(manager.stats().late_registrations, 2);
}

#[test]
fn extend_then_merge_closes_everything_once() {
    init_test_logging();
    test_phase!("extend_then_merge_closes_everything_once");
    let manager = ScopeManager::default();
    let a = manager.create_scope();
    let b = manager.create_scope();
    let log = RunLog::new();

    log.register(&a, "a1");
    let l = log.clone();
    let into_b = manager.extend_scope(move |cx| cx.add_finalizer(l.ok("via-extend")), &b);
    manager.run_scoped(|cx| into_b(cx)).unwrap();
    log.register(&a, "a2");
    assert!(log.names().is_empty());

    test_section!("merge");
    let merged = manager.merge_scopes(&a, &b);
    assert_eq!(merged.constituents(), vec![a.id(), b.id()]);
    merged.close(TerminationSignal::unit()).unwrap();
    assert_eq!(log.names(), vec!["a2", "via-extend", "a1"]);

    // Constituents are closed with the merged signal; closing again is a no-op.
    assert!(a.close(TerminationSignal::unit()).is_ok());
    assert!(b.is_closed());
    assert_eq!(log.names().len(), 3);
}

#[test]
fn merge_skips_constituent_closed_earlier() {
    let manager = ScopeManager::default();
    let a = manager.create_scope();
    let b = manager.create_scope();
    let log = RunLog::new();
    log.register(&a, "a");
    log.register(&b, "b");

    a.close(TerminationSignal::unit()).unwrap();
    let merged = manager.merge_all(vec![a.clone(), b.clone()]);
    merged
        .close(TerminationSignal::cancelled(CancelReason::shutdown()))
        .unwrap();

    assert_eq!(log.names(), vec!["a", "b"]);
    assert_eq!(log.labels(), vec!["success", "cancelled"]);
}

#[test]
fn run_scoped_releases_acquired_resource() {
    init_test_logging();
    let manager = ScopeManager::default();
    let log = RunLog::new();
    let l = log.clone();

    let len = manager
        .run_scoped(|cx| {
            let buf = manager.acquire_release(
                cx,
                || Ok(vec![0_u8; 16]),
                move |buf: &Vec<u8>, signal| {
                    assert_eq!(buf.len(), 16);
                    l.ok("release")(signal)
                },
            )?;
            Ok(buf.len())
        })
        .unwrap();

    assert_eq!(len, 16);
    assert_eq!(log.names(), vec!["release"]);
    assert_eq!(log.labels(), vec!["success"]);
}

#[test]
fn child_scope_closes_inside_parent_pass() {
    let manager = ScopeManager::default();
    let parent = manager.create_scope();
    let log = RunLog::new();

    log.register(&parent, "parent-first");
    let child = manager.fork_scope(&parent).unwrap();
    log.register(&child, "child");
    log.register(&parent, "parent-last");

    parent
        .close(TerminationSignal::failure(Error::user("parent failed")))
        .unwrap();
    assert_eq!(log.names(), vec!["parent-last", "child", "parent-first"]);
    assert_eq!(log.labels(), vec!["failure", "failure", "failure"]);
    assert!(child.is_closed());
}

#[test]
fn stats_serialize() {
    let manager = ScopeManager::default();
    let scope = manager.create_scope();
    scope.close(TerminationSignal::unit()).unwrap();
    let json = serde_json::to_value(manager.stats()).unwrap();
    assert_eq!(json["scopes_created"], 1);
    assert_eq!(json["scopes_closed"], 1);
    assert_eq!(json["open_scopes"], 0);
}
