//! Integration tests for the host process runner and result normalization.

use coursebox::sandbox::{
    PathPolicy, ProcessRunner, RunControl, RunFailure, RunSpec, SandboxRunner,
};
use coursebox::verdict::normalize;
use serial_test::serial;
use std::fs;
use std::time::Duration;
use tempfile::TempDir;

fn runner(policy: PathPolicy) -> SandboxRunner {
    SandboxRunner::Process(ProcessRunner::new(policy))
}

#[tokio::test]
async fn test_rejects_home_and_credential_dirs() {
    let home = TempDir::new().unwrap();
    let ssh = home.path().join(".ssh");
    fs::create_dir_all(&ssh).unwrap();
    let runner = runner(PathPolicy::new(Some(home.path().to_path_buf()), None));

    let outcome = runner
        .run(&RunSpec::shell(home.path(), "echo hi"), RunControl::new())
        .await;
    assert!(matches!(outcome.failure, Some(RunFailure::UnsafePath { .. })));
    assert!(outcome.output.is_empty());

    let outcome = runner
        .run(&RunSpec::shell(&ssh, "echo hi"), RunControl::new())
        .await;
    match outcome.failure {
        Some(RunFailure::UnsafePath { reason, .. }) => assert!(reason.contains(".ssh")),
        other => panic!("expected unsafe path, got {other:?}"),
    }

    let outcome = runner
        .run(&RunSpec::shell("/", "echo hi"), RunControl::new())
        .await;
    assert!(matches!(outcome.failure, Some(RunFailure::UnsafePath { .. })));
}

#[tokio::test]
async fn test_exit_status_and_output_drive_verdict() {
    let dir = TempDir::new().unwrap();
    let runner = runner(PathPolicy::default());

    let ok = runner
        .run(
            &RunSpec::shell(dir.path(), "echo 'test add ... ok'"),
            RunControl::new(),
        )
        .await;
    assert!(ok.completed());
    assert!(normalize(ok.completed(), &ok.output).success);

    // exit status zero but a failure marker in the output
    let marked = runner
        .run(
            &RunSpec::shell(dir.path(), "echo 'test add ... FAILED'"),
            RunControl::new(),
        )
        .await;
    assert!(marked.completed());
    assert!(!normalize(marked.completed(), &marked.output).success);

    let nonzero = runner
        .run(&RunSpec::shell(dir.path(), "echo fine; exit 4"), RunControl::new())
        .await;
    assert_eq!(nonzero.exit_code, Some(4));
    assert!(!normalize(nonzero.completed(), &nonzero.output).success);
}

#[tokio::test]
async fn test_stderr_is_captured() {
    let dir = TempDir::new().unwrap();
    let outcome = runner(PathPolicy::default())
        .run(
            &RunSpec::shell(dir.path(), "echo out; echo err 1>&2"),
            RunControl::new(),
        )
        .await;
    assert!(outcome.output.contains("out"));
    assert!(outcome.output.contains("err"));
}

#[tokio::test]
#[serial]
async fn test_timeout_stops_long_runs() {
    let dir = TempDir::new().unwrap();
    let outcome = runner(PathPolicy::default())
        .run(
            &RunSpec::shell(dir.path(), "echo started; sleep 30"),
            RunControl::new().with_timeout(Duration::from_millis(300)),
        )
        .await;

    assert!(matches!(outcome.failure, Some(RunFailure::TimedOut(_))));
    assert!(outcome.duration < Duration::from_secs(10));
    assert!(!normalize(outcome.completed(), &outcome.output).success);
}

#[tokio::test]
#[serial]
async fn test_cancel_stops_run() {
    let dir = TempDir::new().unwrap();
    let (control, cancel) = RunControl::cancellable();
    let handle = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        cancel.cancel();
    });

    let outcome = runner(PathPolicy::default())
        .run(&RunSpec::shell(dir.path(), "sleep 30"), control)
        .await;
    handle.await.unwrap();
    assert_eq!(outcome.failure, Some(RunFailure::Cancelled));
    assert!(outcome.failure.unwrap().is_interruption());
}

#[test]
fn test_rust_compiler_output_is_condensed() {
    let raw = "\
   Compiling hello v0.1.0
error[E0308]: mismatched types
 --> src/main.rs:3:18
  |
3 |     let x: i32 = \"five\";
  |                  ^^^^^^ expected `i32`, found `&str`
  = help: try parsing the string
";
    let verdict = normalize(false, raw);
    assert!(!verdict.success);
    assert_eq!(verdict.raw, raw);
    assert!(!verdict.diagnostics.is_empty());
    let diag = &verdict.diagnostics[0];
    assert_eq!(diag.file.as_deref(), Some("src/main.rs"));
    assert_eq!(diag.line, Some(3));
    assert!(verdict.friendly.is_some());
    assert_ne!(verdict.display_text(), raw);
}
