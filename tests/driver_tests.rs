//! Driver runs against small shell children.
#![cfg(unix)]

use batchguard::pipeline::interrupt_channel;
use batchguard::utils::config::RESTART_SENTINEL;
use batchguard::{Driver, DriverConfig, StopReason};
use std::time::{Duration, Instant};

fn quick() -> DriverConfig {
    DriverConfig {
        max_restarts: Some(2),
        pulse: Duration::from_millis(20),
        wait_after_shutdown: Duration::from_secs(5),
    }
}

fn sh(script: &str) -> Vec<String> {
    vec!["sh".into(), "-c".into(), script.into()]
}

#[test]
fn test_restart_budget_is_enforced() {
    let script = format!("echo '{} >> too many consumers timed out' >&2; exit 255", RESTART_SENTINEL);
    let report = Driver::new(sh(&script), quick(), None).run();
    assert_eq!(report.launches, 3);
    assert_eq!(report.restarts, 2);
    assert_eq!(report.stop_reason, StopReason::RestartBudgetExhausted);
}

#[test]
fn test_sentinel_from_running_child_kills_and_relaunches() {
    let script = format!("echo '{} >> hung' >&2; sleep 30", RESTART_SENTINEL);
    let config = DriverConfig {
        max_restarts: Some(1),
        ..quick()
    };
    let started = Instant::now();
    let report = Driver::new(sh(&script), config, None).run();
    assert!(started.elapsed() < Duration::from_secs(20));
    assert_eq!(report.launches, 2);
    assert_eq!(report.restarts, 1);
    assert_eq!(report.stop_reason, StopReason::RestartBudgetExhausted);
    assert_eq!(report.last_exit_code, None);
}

#[test]
fn test_clean_exit_completes() {
    let report = Driver::new(sh("echo done; exit 0"), quick(), None).run();
    assert_eq!(report.launches, 1);
    assert_eq!(report.stop_reason, StopReason::Completed);
    assert_eq!(report.last_exit_code, Some(0));
}

#[test]
fn test_no_restart_code_stops() {
    let report = Driver::new(sh("exit 1"), quick(), None).run();
    assert_eq!(report.launches, 1);
    assert_eq!(report.restarts, 0);
    assert_eq!(report.stop_reason, StopReason::NoRestartRequested);
}

#[test]
fn test_restart_then_success() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("second-run");
    let script = format!(
        "if [ -f '{m}' ]; then exit 0; else touch '{m}'; exit 255; fi",
        m = marker.display()
    );
    let report = Driver::new(sh(&script), quick(), None).run();
    assert_eq!(report.launches, 2);
    assert_eq!(report.restarts, 1);
    assert_eq!(report.stop_reason, StopReason::Completed);
}

#[test]
fn test_spawn_failure_is_reported() {
    let argv = vec!["/nonexistent/batchguard-child".to_string()];
    let report = Driver::new(argv, quick(), None).run();
    assert_eq!(report.launches, 0);
    assert_eq!(report.stop_reason, StopReason::SpawnFailed);
}

#[test]
fn test_interrupt_is_forwarded_and_never_restarts() {
    let (tx, rx) = interrupt_channel();
    tx.send("test".to_string()).unwrap();
    let report = Driver::new(sh("read line; exit 255"), quick(), Some(rx)).run();
    drop(tx);
    assert_eq!(report.launches, 1);
    assert_eq!(report.restarts, 0);
    assert_eq!(report.stop_reason, StopReason::UserInterrupted);
}
