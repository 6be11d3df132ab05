//! System-wide lifecycle: boot ordering, failure isolation, idempotency,
//! dependent checks, clean unbind, hook timeouts and state restoration.

mod common;

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use http_body_util::BodyExt;
use tower::ServiceExt;

use common::{calls_of, manifest, registry, CallLog, TestModule};
use modhub::store::InMemoryRuntimeStateRepository;
use modhub::{
    BootOutcome, ErrorKind, Hook, HookError, LifecycleOrchestrator, MenuItem, ModuleError,
    ModuleState,
};

fn module(id: &str, deps: &[&str], log: &CallLog) -> TestModule {
    TestModule::new(manifest(id, deps), log.clone())
}

#[tokio::test]
async fn boot_activates_dependencies_first_with_deterministic_ties() {
    let log = CallLog::default();
    let c = TestModule::new(
        manifest("c", &["a"]).with_menu(MenuItem::new("C", "/c").with_order(-1)),
        log.clone(),
    );
    let orch = LifecycleOrchestrator::new(registry(vec![
        module("b", &["a"], &log),
        c,
        module("a", &[], &log),
    ]));

    let report = orch.boot().await.unwrap();
    assert_eq!(report.order, vec!["a", "c", "b"]);
    assert_eq!(calls_of(&log, "enable"), vec!["a", "c", "b"]);
    assert_eq!(report.activated().collect::<Vec<_>>(), vec!["a", "c", "b"]);
}

#[tokio::test]
async fn failed_install_isolates_dependents_only() {
    let log = CallLog::default();
    let orch = LifecycleOrchestrator::new(registry(vec![
        module("a", &[], &log).failing_install(),
        module("b", &["a"], &log),
        module("c", &["a"], &log),
        module("d", &[], &log),
    ]));

    let report = orch.boot().await.unwrap();

    assert!(matches!(report.outcome("a"), Some(BootOutcome::Failed(_))));
    for id in ["b", "c"] {
        match report.outcome(id) {
            Some(BootOutcome::DependencyUnavailable(dep)) => assert_eq!(dep, "a"),
            other => panic!("{id}: unexpected outcome {other:?}"),
        }
        assert_eq!(orch.state_of(id), Some(ModuleState::Discovered));
    }
    assert_eq!(orch.state_of("a"), Some(ModuleState::Discovered));
    assert!(matches!(report.outcome("d"), Some(BootOutcome::Activated)));
    assert!(orch.is_enabled("d"));
    assert!(calls_of(&log, "install").iter().all(|id| id == "d"));
}

#[tokio::test]
async fn structural_errors_are_fatal_at_boot() {
    let log = CallLog::default();
    let orch = LifecycleOrchestrator::new(registry(vec![
        module("a", &["b"], &log),
        module("b", &["a"], &log),
    ]));
    let err = orch.boot().await.unwrap_err();
    assert!(matches!(err, ModuleError::Resolve(_)));
    assert!(log.lock().is_empty());

    let orch = LifecycleOrchestrator::new(registry(vec![module("a", &["ghost"], &log)]));
    let err = orch.boot().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Invalid);
}

#[tokio::test]
async fn activate_twice_is_a_noop() {
    let log = CallLog::default();
    let orch = LifecycleOrchestrator::new(registry(vec![module("a", &[], &log)]));

    orch.activate("a").await.unwrap();
    orch.activate("a").await.unwrap();

    assert_eq!(calls_of(&log, "install"), vec!["a"]);
    assert_eq!(calls_of(&log, "enable"), vec!["a"]);
    assert_eq!(orch.state_of("a"), Some(ModuleState::Enabled));
}

#[tokio::test]
async fn activate_requires_enabled_dependencies() {
    let log = CallLog::default();
    let orch = LifecycleOrchestrator::new(registry(vec![
        module("a", &[], &log),
        module("b", &["a"], &log),
    ]));

    let err = orch.activate("b").await.unwrap_err();
    assert!(matches!(
        err,
        ModuleError::DependencyUnavailable { ref dependency, .. } if dependency == "a"
    ));
    assert!(log.lock().is_empty());

    orch.activate("a").await.unwrap();
    orch.activate("b").await.unwrap();
}

#[tokio::test]
async fn disable_blocked_by_enabled_dependent() {
    let log = CallLog::default();
    let orch = LifecycleOrchestrator::new(registry(vec![
        module("a", &[], &log),
        module("b", &["a"], &log),
    ]));
    orch.boot().await.unwrap();

    let err = orch.deactivate("a").await.unwrap_err();
    match &err {
        ModuleError::DependentActive { module, dependents } => {
            assert_eq!(module, "a");
            assert_eq!(dependents, &vec!["b".to_string()]);
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert!(orch.is_enabled("a"));

    orch.deactivate("b").await.unwrap();
    orch.deactivate("a").await.unwrap();
    assert_eq!(orch.state_of("a"), Some(ModuleState::Disabled));

    // re-enable runs only on_enable
    orch.activate("a").await.unwrap();
    assert_eq!(calls_of(&log, "install"), vec!["a", "b"]);
    assert_eq!(calls_of(&log, "enable"), vec!["a", "b", "a"]);
}

#[tokio::test]
async fn deactivate_unbinds_routes_and_permissions() {
    let log = CallLog::default();
    let orch = LifecycleOrchestrator::new(registry(vec![module("blog", &[], &log)]));
    let perms = orch.permissions();
    let routes = orch.routes();

    orch.activate("blog").await.unwrap();
    assert!(perms.is_grantable("blog:read"));
    assert!(routes.is_mounted("/blog"));

    let hit = routes.resolve("/blog/ping").unwrap();
    assert_eq!(hit.path, "/ping");
    let req = axum::http::Request::builder()
        .uri(hit.path.as_str())
        .body(Body::empty())
        .unwrap();
    let resp = hit.router.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), 200);
    let body = resp.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], b"pong from blog");

    orch.deactivate("blog").await.unwrap();
    assert_eq!(orch.state_of("blog"), Some(ModuleState::Disabled));
    assert!(!perms.is_grantable("blog:read"));
    assert!(!perms.is_grantable("blog:write"));
    assert!(perms.grantable().is_empty());
    assert!(routes.resolve("/blog/ping").is_none());
    assert!(routes.mounted().is_empty());
}

#[tokio::test]
async fn failed_disable_hook_keeps_module_enabled_and_bound() {
    let log = CallLog::default();
    let orch = LifecycleOrchestrator::new(registry(vec![
        module("blog", &[], &log).failing_disable()
    ]));
    orch.activate("blog").await.unwrap();

    let err = orch.deactivate("blog").await.unwrap_err();
    assert!(matches!(err, ModuleError::HookFailure { hook: Hook::Disable, .. }));
    assert_eq!(err.kind(), ErrorKind::Internal);
    assert!(orch.is_enabled("blog"));
    assert!(orch.permissions().is_grantable("blog:read"));
}

#[tokio::test]
async fn hook_timeout_aborts_and_cancels_context() {
    let log = CallLog::default();
    let slow = module("slow", &[], &log).hanging_install();
    let tokens = slow.tokens();
    let orch = LifecycleOrchestrator::new(registry(vec![slow]))
        .with_hook_timeout(Duration::from_millis(50));

    let err = orch.activate("slow").await.unwrap_err();
    assert!(matches!(
        err,
        ModuleError::HookFailure {
            hook: Hook::Install,
            source: HookError::TimedOut(_),
            ..
        }
    ));
    assert_eq!(orch.state_of("slow"), Some(ModuleState::Discovered));
    assert!(!orch.routes().is_mounted("/slow"));
    assert!(tokens.lock().iter().all(|t| t.is_cancelled()));
    assert_eq!(tokens.lock().len(), 1);
}

#[tokio::test]
async fn enable_timeout_rolls_back_fresh_install() {
    let log = CallLog::default();
    let slow = module("slow", &[], &log).hanging_enable();
    let orch = LifecycleOrchestrator::new(registry(vec![slow]))
        .with_hook_timeout(Duration::from_millis(50));

    let err = orch.activate("slow").await.unwrap_err();
    assert!(matches!(
        err,
        ModuleError::HookFailure {
            hook: Hook::Enable,
            source: HookError::TimedOut(_),
            ..
        }
    ));
    assert_eq!(orch.state_of("slow"), Some(ModuleState::Discovered));
    assert!(!orch.routes().is_mounted("/slow"));
    assert!(!orch.permissions().is_grantable("slow:read"));
    assert_eq!(*log.lock(), vec!["install:slow", "uninstall:slow"]);
}

#[tokio::test]
async fn uninstall_moves_manifest_to_audit_log() {
    let log = CallLog::default();
    let orch = LifecycleOrchestrator::new(registry(vec![
        module("a", &[], &log),
        module("b", &[], &log),
    ]));
    orch.boot().await.unwrap();

    let err = orch.uninstall("a").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    orch.deactivate("a").await.unwrap();
    orch.uninstall("a").await.unwrap();

    let snap = orch.snapshot();
    assert!(snap.registry().get("a").is_err());
    assert_eq!(snap.registry().len(), 1);
    let audit = orch.audit_log();
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0].manifest.id, "a");
    assert_eq!(calls_of(&log, "uninstall"), vec!["a"]);
}

#[tokio::test]
async fn unknown_module_is_not_found() {
    let orch = LifecycleOrchestrator::new(registry(vec![]));
    for err in [
        orch.activate("ghost").await.unwrap_err(),
        orch.deactivate("ghost").await.unwrap_err(),
        orch.uninstall("ghost").await.unwrap_err(),
    ] {
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}

#[tokio::test]
async fn persisted_state_is_restored_on_next_boot() {
    let repo = Arc::new(InMemoryRuntimeStateRepository::default());
    let build = |log: &CallLog| {
        LifecycleOrchestrator::new(registry(vec![
            module("a", &[], log),
            module("b", &["a"], log),
            module("c", &[], log),
            module("d", &[], log),
        ]))
        .with_repository(repo.clone())
    };

    let first_log = CallLog::default();
    let first = build(&first_log);
    first.boot().await.unwrap();
    first.deactivate("b").await.unwrap();
    first.deactivate("d").await.unwrap();
    first.uninstall("d").await.unwrap();

    let log = CallLog::default();
    let second = build(&log);
    let report = second.boot().await.unwrap();

    assert!(matches!(report.outcome("a"), Some(BootOutcome::Activated)));
    assert!(matches!(
        report.outcome("b"),
        Some(BootOutcome::SkippedByPersistedState)
    ));
    assert!(matches!(
        report.outcome("d"),
        Some(BootOutcome::SkippedByPersistedState)
    ));
    assert_eq!(second.state_of("b"), Some(ModuleState::Disabled));
    assert!(second.snapshot().registry().get("d").is_err());
    assert_eq!(second.audit_log().len(), 1);

    // already installed: only on_enable runs
    assert!(calls_of(&log, "install").is_empty());
    assert_eq!(calls_of(&log, "enable"), vec!["a", "c"]);
}

#[tokio::test]
async fn config_override_changes_boot_default() {
    let log = CallLog::default();
    let orch = LifecycleOrchestrator::new(registry(vec![
        TestModule::new(manifest("a", &[]).enabled_by_default(false), log.clone()),
        module("b", &[], &log),
    ]))
    .with_enabled_override("a", true)
    .with_enabled_override("b", false);

    let report = orch.boot().await.unwrap();
    assert!(matches!(report.outcome("a"), Some(BootOutcome::Activated)));
    assert!(matches!(report.outcome("b"), Some(BootOutcome::SkippedByDefault)));
}

#[tokio::test]
async fn concurrent_transitions_never_leave_dependent_without_dependency() {
    let log = CallLog::default();
    let orch = Arc::new(LifecycleOrchestrator::new(registry(vec![
        module("a", &[], &log),
        module("b", &["a"], &log),
    ])));
    orch.activate("a").await.unwrap();

    let mut tasks = Vec::new();
    for i in 0..40 {
        let orch = orch.clone();
        tasks.push(tokio::spawn(async move {
            match i % 4 {
                0 => {
                    let _ = orch.activate("b").await;
                }
                1 => {
                    let _ = orch.deactivate("a").await;
                }
                2 => {
                    let _ = orch.deactivate("b").await;
                }
                _ => {
                    let _ = orch.activate("a").await;
                }
            }
            let snap = orch.snapshot();
            assert!(!snap.is_enabled("b") || snap.is_enabled("a"));
        }));
    }
    for t in tasks {
        t.await.unwrap();
    }
    let snap = orch.snapshot();
    assert!(!snap.is_enabled("b") || snap.is_enabled("a"));
}
