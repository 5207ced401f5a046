// src/lib.rs

pub mod backend;
pub mod cleanup;
pub mod cli;
pub mod config;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod fs;
pub mod host;
pub mod logging;
pub mod pe;
pub mod runtime;
pub mod types;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, info};

use crate::cleanup::{ResetRequest, ResetStatus};
use crate::cli::{CliArgs, Command};
use crate::config::load_or_default;
use crate::engine::{Intent, PrerequisiteAction, PrerequisitePlan, Session};
use crate::exec::{FailureCause, TaskHandle, TaskOutcome, TaskSpec};
use crate::fs::RealFileSystem;

/// Exit code used when a task was cancelled (conventional for SIGINT).
const EXIT_CANCELLED: i32 = 130;

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading
/// - runtime resolution and the session
/// - the requested intent, with its log streamed to stdout
/// - Ctrl-C handling (cancels the running task)
///
/// Returns the process exit code.
pub async fn run(args: CliArgs) -> Result<i32> {
    let config_path = PathBuf::from(&args.config);
    let mut cfg = load_or_default(&config_path)?;
    if let Some(prefix) = args.prefix.clone() {
        cfg.session.prefix = Some(prefix);
    }

    let session = Session::open(cfg, Arc::new(RealFileSystem))?;

    match args.command {
        Command::Status => {
            println!("{}", session.status().await);
            Ok(0)
        }
        Command::Setup => run_intent(&session, Intent::Setup, args.dry_run).await,
        Command::Components => run_intent(&session, Intent::Components, args.dry_run).await,
        Command::Install { installer } => {
            run_intent(&session, Intent::Install { installer }, args.dry_run).await
        }
        Command::Launch { exe, handoff } => {
            if handoff && !args.dry_run {
                return Ok(session.handoff(exe).await?);
            }
            run_intent(&session, Intent::Launch { executable: exe }, args.dry_run).await
        }
        Command::Dpi { value: None } => {
            println!("{}", session.current_dpi());
            Ok(0)
        }
        Command::Dpi { value: Some(dpi) } => {
            run_intent(&session, Intent::SetDpi { dpi }, args.dry_run).await
        }
        Command::Tweaks => run_intent(&session, Intent::ApplyTweaks, args.dry_run).await,
        Command::Winecfg => run_intent(&session, Intent::Configure, args.dry_run).await,
        Command::Backend { set, recommend } => run_backend(&session, set, recommend, args.dry_run).await,
        Command::Prerequisites => run_prerequisites(&session, args.dry_run).await,
        Command::Reset {
            repair,
            hard,
            yes,
            yes_delete_prefix,
        } => {
            let request = if hard {
                ResetRequest::Hard {
                    confirm_delete: yes,
                    confirm_again: yes_delete_prefix,
                }
            } else if repair {
                ResetRequest::Repair
            } else {
                ResetRequest::Soft
            };
            run_reset(&session, request, args.dry_run).await
        }
    }
}

async fn run_intent(session: &Session, intent: Intent, dry_run: bool) -> Result<i32> {
    if dry_run {
        print_plan(&session.plan(&intent)?);
        return Ok(0);
    }
    let handle = session.submit(intent)?;
    Ok(follow(session, handle).await)
}

/// Stream a task's log to stdout, cancel it on Ctrl-C, report the outcome.
async fn follow(session: &Session, mut handle: TaskHandle) -> i32 {
    let engine = session.engine().clone();
    let id = handle.id();
    let interrupt = tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            eprintln!("failed to listen for Ctrl+C: {e}");
            return;
        }
        eprintln!("cancelling {id}...");
        engine.cancel_id(id);
    });

    if let Some(mut logs) = handle.take_logs() {
        while let Some(line) = logs.next_line().await {
            println!("{line}");
        }
    }
    let report = handle.wait().await;
    interrupt.abort();

    for hint in session.hints(&report) {
        eprintln!("hint: {hint}");
    }
    report_outcome(&report.label, &report.outcome)
}

fn report_outcome(label: &str, outcome: &TaskOutcome) -> i32 {
    match outcome {
        TaskOutcome::Completed { .. } => {
            info!(%label, "done");
            0
        }
        TaskOutcome::Cancelled => {
            eprintln!("{label}: cancelled");
            EXIT_CANCELLED
        }
        TaskOutcome::Failed(cause) => {
            eprintln!("{label}: {cause}");
            match cause {
                FailureCause::NonZeroExit(code) if *code > 0 => *code,
                _ => 1,
            }
        }
    }
}

async fn run_backend(
    session: &Session,
    set: Option<crate::types::BackendChoice>,
    recommend: bool,
    dry_run: bool,
) -> Result<i32> {
    if recommend {
        match session.recommend_backend().await {
            Some((choice, gpu)) => println!("recommended: {choice} (for {} {})", gpu.vendor, gpu.name),
            None => println!("no recommendation: no supported GPU detected"),
        }
        return Ok(0);
    }

    let Some(target) = set else {
        match session.current_backend() {
            Some(b) => println!("{b}"),
            None => println!("runtime default"),
        }
        return Ok(0);
    };

    if dry_run {
        let plan = session.plan_backend(target);
        if let Some(install) = &plan.install {
            print_plan(install);
        }
        print_plan(&plan.apply);
        return Ok(0);
    }

    let engine = session.engine().clone();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            engine.cancel_active();
        }
    });
    let switch = session.switch_backend(target, |line| println!("{line}")).await;
    interrupt.abort();

    let switch = switch?;
    Ok(report_outcome(&format!("backend {target}"), &switch.outcome()))
}

async fn run_prerequisites(session: &Session, dry_run: bool) -> Result<i32> {
    if dry_run {
        match engine::plan_prerequisites(session.host(), &session.config().session.component_tool) {
            PrerequisitePlan::Task(spec) => print_plan(&spec),
            PrerequisitePlan::Manual(instructions) => println!("{instructions}"),
        }
        return Ok(0);
    }

    match session.install_prerequisites()? {
        PrerequisiteAction::Submitted(handle) => Ok(follow(session, handle).await),
        PrerequisiteAction::Manual { instructions } => {
            println!("{instructions}");
            Ok(0)
        }
    }
}

async fn run_reset(session: &Session, request: ResetRequest, dry_run: bool) -> Result<i32> {
    if dry_run {
        println!("winepilot dry-run: reset");
        println!("  prefix: {}", session.prefix().display());
        if request == ResetRequest::Repair {
            for path in session.config().repair_targets() {
                println!("  repair: {}", path.display());
            }
        } else {
            println!("  component cache: {}", session.config().component_cache().display());
        }
        println!("  deletes prefix: {}", request.is_hard());
        return Ok(0);
    }

    let outcome = session.reset(request).await?;
    let report = &outcome.report;
    if report.status == ResetStatus::ConfirmationRequired {
        eprintln!("hard reset deletes the prefix; pass both --yes and --yes-delete-prefix to confirm");
        return Ok(1);
    }

    for process in &report.terminated {
        println!("terminated {process}");
    }
    for path in &report.locks_removed {
        println!("removed {}", path.display());
    }
    for path in &report.repaired {
        println!("repaired {}", path.display());
    }
    if report.cache_cleared {
        println!("cleared component cache");
    }
    if report.prefix_deleted {
        println!("deleted prefix {}", session.prefix().display());
    }
    for process in &report.remaining {
        eprintln!("still running: {process}");
    }
    println!();
    println!("{}", outcome.status);

    Ok(if report.remaining.is_empty() { 0 } else { 1 })
}

/// Dry-run output: the steps a task would run.
fn print_plan(spec: &TaskSpec) {
    println!("winepilot dry-run: {}", spec.label);
    if let Some(timeout) = spec.timeout {
        println!("  timeout: {timeout:?}");
    }
    if let Some(dir) = &spec.working_dir {
        println!("  working dir: {}", dir.display());
    }
    if let Some(target) = &spec.target {
        println!("  target: {}", target.display());
    }
    for (i, step) in spec.steps.iter().enumerate() {
        let fatal = if step.fatal { "" } else { " (optional)" };
        println!("  {}. {}{fatal}", i + 1, step.label);
        println!("     {} {}", step.program.display(), step.args.join(" "));
    }

    debug!("dry-run complete (no execution)");
}
