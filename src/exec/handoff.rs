// src/exec/handoff.rs

//! Process handoff for direct launches.
//!
//! The child inherits the terminal and its exit status becomes ours. This
//! is the spawn-and-wait form of replacing the current process image.

use std::os::unix::process::ExitStatusExt;
use std::process::{ExitStatus, Stdio};

use anyhow::Context;
use tokio::process::Command;
use tracing::info;

use crate::errors::Result;
use crate::exec::spec::CommandSpec;
use crate::runtime::ProcessEnvironment;

/// Run `step` in the foreground and return the exit code to propagate.
pub async fn handoff(
    step: &CommandSpec,
    env: &ProcessEnvironment,
    working_dir: Option<&std::path::Path>,
) -> Result<i32> {
    info!(program = %step.program.display(), args = ?step.args, "handing off to child process");

    let mut cmd = Command::new(&step.program);
    cmd.args(&step.args)
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit());
    env.apply(&mut cmd);
    if let Some(dir) = working_dir {
        cmd.current_dir(dir);
    }

    let status = cmd
        .status()
        .await
        .with_context(|| format!("running {}", step.program.display()))?;

    let code = exit_code(status);
    info!(code, "child process exited");
    Ok(code)
}

/// Shell convention: the exit code, or `128 + signal` when killed.
pub fn exit_code(status: ExitStatus) -> i32 {
    match (status.code(), status.signal()) {
        (Some(code), _) => code,
        (None, Some(signal)) => 128 + signal,
        (None, None) => 1,
    }
}
