// tests/task_engine.rs

mod common;
use crate::common::builders::{descriptor, engine_for, fast_config, write_pe, ConfigFileBuilder};
use crate::common::process::{is_alive, wait_gone};
use crate::common::{init_tracing, with_timeout};

use std::error::Error;
use std::time::Duration;

use winepilot::errors::WinepilotError;
use winepilot::exec::{CommandSpec, FailureCause, TaskOutcome, TaskSpec, TaskState};
use winepilot::types::Arch;

type TestResult = Result<(), Box<dyn Error>>;

fn sh(script: &str) -> CommandSpec {
    CommandSpec::new("sh", ["-c", script])
}

#[tokio::test]
async fn completed_task_reports_log_and_exit_code() -> TestResult {
    init_tracing();
    let prefix = tempfile::tempdir()?;
    let engine = engine_for(descriptor(&[Arch::X64]), prefix.path(), &fast_config(prefix.path()));

    let handle = engine.submit(TaskSpec::new("echo").step(sh("echo one; echo two")))?;
    let report = with_timeout(handle.wait()).await;

    assert_eq!(report.outcome, TaskOutcome::Completed { exit_code: 0 });
    assert_eq!(report.log, vec!["one".to_string(), "two".to_string()]);
    assert!(!engine.is_busy());
    Ok(())
}

#[tokio::test]
async fn log_stream_delivers_lines_in_order_then_closes() -> TestResult {
    init_tracing();
    let prefix = tempfile::tempdir()?;
    let engine = engine_for(descriptor(&[Arch::X64]), prefix.path(), &fast_config(prefix.path()));

    let mut handle = engine.submit(
        TaskSpec::new("count").step(sh("for i in 1 2 3 4 5 6 7 8 9 10; do echo line-$i; done")),
    )?;
    let mut logs = handle.take_logs().expect("first take returns the stream");
    assert!(handle.take_logs().is_none());

    let mut seen = Vec::new();
    while let Some(line) = with_timeout(logs.next_line()).await {
        seen.push(line);
    }
    let expected: Vec<String> = (1..=10).map(|i| format!("line-{i}")).collect();
    assert_eq!(seen, expected);

    let report = with_timeout(handle.wait()).await;
    assert_eq!(report.log, expected);
    Ok(())
}

#[tokio::test]
async fn stderr_is_merged_into_the_log() -> TestResult {
    init_tracing();
    let prefix = tempfile::tempdir()?;
    let engine = engine_for(descriptor(&[Arch::X64]), prefix.path(), &fast_config(prefix.path()));

    let handle = engine.submit(TaskSpec::new("stderr").step(sh("echo to-stderr >&2")))?;
    let report = with_timeout(handle.wait()).await;

    assert!(report.outcome.is_success());
    assert_eq!(report.log, vec!["to-stderr".to_string()]);
    Ok(())
}

#[tokio::test]
async fn invalid_utf8_is_replaced_not_fatal() -> TestResult {
    init_tracing();
    let prefix = tempfile::tempdir()?;
    let engine = engine_for(descriptor(&[Arch::X64]), prefix.path(), &fast_config(prefix.path()));

    let handle = engine.submit(TaskSpec::new("bytes").step(sh(r"printf '\377\376 hi\n'; echo after")))?;
    let report = with_timeout(handle.wait()).await;

    assert!(report.outcome.is_success());
    assert_eq!(report.log.len(), 2);
    assert!(report.log[0].contains('\u{FFFD}'));
    assert!(report.log[0].ends_with(" hi"));
    assert_eq!(report.log[1], "after");
    Ok(())
}

#[tokio::test]
async fn child_sees_session_environment_only() -> TestResult {
    init_tracing();
    let prefix = tempfile::tempdir()?;
    let engine = engine_for(descriptor(&[Arch::X64]), prefix.path(), &fast_config(prefix.path()));

    let handle = engine.submit(
        TaskSpec::new("env").step(sh("echo \"$WINEPREFIX\"; echo \"${CARGO_MANIFEST_DIR:-unset}\"")),
    )?;
    let report = with_timeout(handle.wait()).await;

    assert_eq!(report.log[0], prefix.path().display().to_string());
    assert_eq!(report.log[1], "unset");
    Ok(())
}

#[tokio::test]
async fn non_zero_exit_fails_with_code() -> TestResult {
    init_tracing();
    let prefix = tempfile::tempdir()?;
    let engine = engine_for(descriptor(&[Arch::X64]), prefix.path(), &fast_config(prefix.path()));

    let handle = engine.submit(TaskSpec::new("fail").step(sh("echo bad; exit 3")))?;
    let mut state = handle.subscribe();
    let report = with_timeout(handle.wait()).await;

    assert_eq!(report.outcome, TaskOutcome::Failed(FailureCause::NonZeroExit(3)));
    assert_eq!(report.log, vec!["bad".to_string()]);
    assert_eq!(*state.borrow_and_update(), TaskState::Failed(FailureCause::NonZeroExit(3)));
    Ok(())
}

#[tokio::test]
async fn spawn_failure_fails_only_that_task() -> TestResult {
    init_tracing();
    let prefix = tempfile::tempdir()?;
    let engine = engine_for(descriptor(&[Arch::X64]), prefix.path(), &fast_config(prefix.path()));

    let missing = CommandSpec::new("/definitely/not/a/program", Vec::<String>::new());
    let report = with_timeout(engine.submit(TaskSpec::new("missing").step(missing))?.wait()).await;
    assert!(matches!(report.outcome, TaskOutcome::Failed(FailureCause::Spawn(_))));

    let report = with_timeout(engine.submit(TaskSpec::new("next").step(sh("true")))?.wait()).await;
    assert!(report.outcome.is_success());
    Ok(())
}

#[tokio::test]
async fn optional_step_failure_continues() -> TestResult {
    init_tracing();
    let prefix = tempfile::tempdir()?;
    let engine = engine_for(descriptor(&[Arch::X64]), prefix.path(), &fast_config(prefix.path()));

    let spec = TaskSpec::new("steps")
        .step(sh("exit 7").non_fatal().with_label("flaky component"))
        .step(CommandSpec::new("/no/such/tool", ["-q"]).non_fatal())
        .step(sh("echo last"));
    let handle = engine.submit(spec)?;
    let report = with_timeout(handle.wait()).await;

    assert_eq!(report.outcome, TaskOutcome::Completed { exit_code: 0 });
    assert!(report.log.iter().any(|l| l.contains("'flaky component' exited with code 7")));
    assert_eq!(report.log.last().map(String::as_str), Some("last"));
    Ok(())
}

#[tokio::test]
async fn progress_tracks_finished_steps() -> TestResult {
    init_tracing();
    let prefix = tempfile::tempdir()?;
    let engine = engine_for(descriptor(&[Arch::X64]), prefix.path(), &fast_config(prefix.path()));

    let handle = engine.submit(TaskSpec::new("two").step(sh("true")).step(sh("sleep 30")))?;
    assert_eq!(handle.progress().1, 2);

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while handle.progress().0 < 1 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(handle.progress(), (1, 2));

    assert!(engine.cancel(&handle));
    let report = with_timeout(handle.wait()).await;
    assert_eq!(report.outcome, TaskOutcome::Cancelled);
    Ok(())
}

#[tokio::test]
async fn second_submit_while_running_is_busy() -> TestResult {
    init_tracing();
    let prefix = tempfile::tempdir()?;
    let engine = engine_for(descriptor(&[Arch::X64]), prefix.path(), &fast_config(prefix.path()));

    let first = engine.submit(TaskSpec::new("long").step(sh("sleep 30")))?;
    assert_eq!(first.state(), TaskState::Running);

    match engine.submit(TaskSpec::new("second").step(sh("true"))) {
        Err(WinepilotError::Busy(id)) => assert_eq!(id, first.id()),
        other => panic!("expected Busy, got {other:?}"),
    }

    // The running task is unaffected.
    assert_eq!(first.state(), TaskState::Running);
    assert_eq!(engine.active_task().map(|t| t.id), Some(first.id()));

    assert!(engine.cancel(&first));
    let report = with_timeout(first.wait()).await;
    assert_eq!(report.outcome, TaskOutcome::Cancelled);
    Ok(())
}

#[tokio::test]
async fn cancel_kills_process_and_removes_locks() -> TestResult {
    init_tracing();
    let prefix = tempfile::tempdir()?;
    let lock = prefix.path().join("drive_c/users/me/app.lck");
    std::fs::create_dir_all(lock.parent().unwrap())?;
    std::fs::write(&lock, b"")?;
    std::fs::create_dir_all(prefix.path().join(".wineserver"))?;

    let engine = engine_for(descriptor(&[Arch::X64]), prefix.path(), &fast_config(prefix.path()));
    let mut handle = engine.submit(TaskSpec::new("sleeper").step(sh("echo $$; exec sleep 30")))?;

    let mut logs = handle.take_logs().unwrap();
    let pid: u32 = with_timeout(logs.next_line()).await.unwrap().trim().parse()?;
    assert!(is_alive(pid));

    assert!(engine.cancel(&handle));
    assert!(engine.cancel(&handle), "repeated cancel is harmless");
    let report = with_timeout(handle.wait()).await;

    assert_eq!(report.outcome, TaskOutcome::Cancelled);
    assert!(wait_gone(pid, Duration::from_secs(2)).await);
    assert!(!lock.exists());
    assert!(!prefix.path().join(".wineserver").exists());
    assert!(!engine.is_busy());
    Ok(())
}

#[tokio::test]
async fn cancel_sweeps_orphans_outside_the_group() -> TestResult {
    init_tracing();
    let prefix = tempfile::tempdir()?;
    let engine = engine_for(descriptor(&[Arch::X64]), prefix.path(), &fast_config(prefix.path()));

    // The helper moves to its own session, out of reach of the group signal.
    let mut handle = engine.submit(
        TaskSpec::new("orphan").step(sh("setsid sh -c 'echo $$; exec sleep 30' & wait")),
    )?;
    let mut logs = handle.take_logs().unwrap();
    let orphan: u32 = with_timeout(logs.next_line()).await.unwrap().trim().parse()?;
    assert!(is_alive(orphan));

    assert!(engine.cancel(&handle));
    let report = with_timeout(handle.wait()).await;

    assert_eq!(report.outcome, TaskOutcome::Cancelled);
    assert!(wait_gone(orphan, Duration::from_secs(2)).await);
    Ok(())
}

#[tokio::test]
async fn cancel_after_completion_returns_false() -> TestResult {
    init_tracing();
    let prefix = tempfile::tempdir()?;
    let engine = engine_for(descriptor(&[Arch::X64]), prefix.path(), &fast_config(prefix.path()));

    let handle = engine.submit(TaskSpec::new("quick").step(sh("true")))?;
    let id = handle.id();
    let report = with_timeout(handle.wait()).await;
    assert!(report.outcome.is_success());
    assert!(!engine.cancel_id(id));
    Ok(())
}

#[tokio::test]
async fn timeout_fails_task_and_frees_slot() -> TestResult {
    init_tracing();
    let prefix = tempfile::tempdir()?;
    let engine = engine_for(descriptor(&[Arch::X64]), prefix.path(), &fast_config(prefix.path()));

    let handle = engine.submit(
        TaskSpec::new("slow")
            .step(sh("sleep 30"))
            .timeout(Duration::from_millis(300)),
    )?;
    let report = with_timeout(handle.wait()).await;
    assert_eq!(report.outcome, TaskOutcome::Failed(FailureCause::Timeout));

    let next = engine.submit(TaskSpec::new("after").step(sh("echo ok")))?;
    let report = with_timeout(next.wait()).await;
    assert!(report.outcome.is_success());
    Ok(())
}

#[tokio::test]
async fn default_timeout_comes_from_settings() -> TestResult {
    init_tracing();
    let prefix = tempfile::tempdir()?;
    let cfg = ConfigFileBuilder::new()
        .with_prefix(prefix.path())
        .with_default_timeout("250ms")
        .with_grace_period("100ms")
        .with_process_names(&["sleep"])
        .build();
    let engine = engine_for(descriptor(&[Arch::X64]), prefix.path(), &cfg);

    let report = with_timeout(engine.submit(TaskSpec::new("slow").step(sh("sleep 30")))?.wait()).await;
    assert_eq!(report.outcome, TaskOutcome::Failed(FailureCause::Timeout));
    Ok(())
}

#[tokio::test]
async fn architecture_mismatch_spawns_nothing() -> TestResult {
    init_tracing();
    let prefix = tempfile::tempdir()?;
    let target = prefix.path().join("setup32.exe");
    write_pe(&target, 0x014c);
    let marker = prefix.path().join("spawned");

    let engine = engine_for(descriptor(&[Arch::X64]), prefix.path(), &fast_config(prefix.path()));
    let spec = TaskSpec::new("install")
        .step(CommandSpec::new("touch", [marker.display().to_string()]))
        .target(&target);

    match engine.submit(spec) {
        Err(WinepilotError::ArchitectureMismatch { binary, .. }) => assert_eq!(binary, Arch::X86),
        other => panic!("expected ArchitectureMismatch, got {other:?}"),
    }
    assert!(!engine.is_busy());
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!marker.exists());
    Ok(())
}

#[tokio::test]
async fn empty_spec_is_rejected() -> TestResult {
    let prefix = tempfile::tempdir()?;
    let engine = engine_for(descriptor(&[Arch::X64]), prefix.path(), &fast_config(prefix.path()));

    assert!(matches!(
        engine.submit(TaskSpec::new("nothing")),
        Err(WinepilotError::InvalidTask(_))
    ));
    Ok(())
}

#[tokio::test]
async fn cancel_after_exit_while_output_drains_still_tears_down() -> TestResult {
    init_tracing();
    let prefix = tempfile::tempdir()?;
    let lock = prefix.path().join("app.lck");
    std::fs::write(&lock, b"")?;
    let engine = engine_for(descriptor(&[Arch::X64]), prefix.path(), &fast_config(prefix.path()));

    // The shell exits at once; its background child keeps the pipe open.
    let mut handle = engine.submit(TaskSpec::new("leaky").step(sh("sleep 3 & echo $!")))?;
    let mut logs = handle.take_logs().unwrap();
    let helper: u32 = with_timeout(logs.next_line()).await.unwrap().trim().parse()?;
    tokio::time::sleep(Duration::from_millis(150)).await;

    assert!(engine.cancel(&handle));
    let report = with_timeout(handle.wait()).await;

    assert_eq!(report.outcome, TaskOutcome::Cancelled);
    assert!(wait_gone(helper, Duration::from_secs(2)).await);
    assert!(!lock.exists());
    assert!(!engine.is_busy());
    Ok(())
}

#[tokio::test]
async fn oversized_timeout_does_not_wedge_the_engine() -> TestResult {
    init_tracing();
    let prefix = tempfile::tempdir()?;
    let engine = engine_for(descriptor(&[Arch::X64]), prefix.path(), &fast_config(prefix.path()));

    let handle = engine.submit(TaskSpec::new("forever").step(sh("echo ok")).timeout(Duration::MAX))?;
    let report = with_timeout(handle.wait()).await;
    assert_eq!(report.outcome, TaskOutcome::Completed { exit_code: 0 });

    let next = engine.submit(TaskSpec::new("after").step(sh("true")))?;
    assert!(with_timeout(next.wait()).await.outcome.is_success());
    Ok(())
}

#[tokio::test]
async fn reservation_refuses_submissions_until_dropped() -> TestResult {
    init_tracing();
    let prefix = tempfile::tempdir()?;
    let engine = engine_for(descriptor(&[Arch::X64]), prefix.path(), &fast_config(prefix.path()));

    let lease = engine.reserve("maintenance")?;
    assert!(engine.is_busy());
    assert_eq!(engine.active_task().map(|t| t.label), Some("maintenance".to_string()));
    assert_eq!(engine.cancel_active(), None);

    match engine.submit(TaskSpec::new("other").step(sh("true"))) {
        Err(WinepilotError::Busy(id)) => assert_eq!(id, lease.id()),
        other => panic!("expected Busy, got {other:?}"),
    }
    assert!(matches!(engine.reserve("again"), Err(WinepilotError::Busy(id)) if id == lease.id()));

    // Tasks under the lease run one at a time.
    let inner = engine.submit_leased(&lease, TaskSpec::new("inner").step(sh("sleep 30")))?;
    assert!(matches!(
        engine.submit_leased(&lease, TaskSpec::new("second").step(sh("true"))),
        Err(WinepilotError::Busy(id)) if id == inner.id()
    ));
    assert!(engine.cancel(&inner));
    assert_eq!(with_timeout(inner.wait()).await.outcome, TaskOutcome::Cancelled);
    assert!(engine.is_busy(), "the lease outlives its tasks");

    let waiter = engine.clone();
    let idle = tokio::spawn(async move { waiter.wait_idle().await });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!idle.is_finished());

    drop(lease);
    with_timeout(idle).await?;
    assert!(!engine.is_busy());

    let after = engine.submit(TaskSpec::new("after").step(sh("true")))?;
    assert!(with_timeout(after.wait()).await.outcome.is_success());
    Ok(())
}
