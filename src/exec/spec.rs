// src/exec/spec.rs

//! Declarative description of work handed to the task engine.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::runtime::RuntimeDescriptor;

/// A single program invocation within a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    /// A failing fatal step fails the task; a non-fatal one is logged and skipped.
    pub fatal: bool,
    /// Short description shown in progress output.
    pub label: String,
}

impl CommandSpec {
    pub fn new(program: impl Into<PathBuf>, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        let program = program.into();
        let args: Vec<String> = args.into_iter().map(Into::into).collect();
        let label = std::iter::once(program.display().to_string())
            .chain(args.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ");
        Self {
            program,
            args,
            fatal: true,
            label,
        }
    }

    /// Invoke the runtime executable itself with `args`.
    pub fn runtime(
        runtime: &RuntimeDescriptor,
        args: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self::new(runtime.executable(), args)
    }

    /// Build from a full argv list; `None` when `argv` is empty.
    pub fn from_argv(argv: &[String]) -> Option<Self> {
        let (program, rest) = argv.split_first()?;
        Some(Self::new(program, rest.iter().cloned()))
    }

    pub fn non_fatal(mut self) -> Self {
        self.fatal = false;
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }
}

/// An ordered list of steps run as one cancellable unit.
#[derive(Debug, Clone)]
pub struct TaskSpec {
    pub label: String,
    pub steps: Vec<CommandSpec>,
    pub working_dir: Option<PathBuf>,
    /// Overrides the engine's default timeout.
    pub timeout: Option<Duration>,
    /// Executable that must pass the architecture gate before anything starts.
    pub target: Option<PathBuf>,
}

impl TaskSpec {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            steps: Vec::new(),
            working_dir: None,
            timeout: None,
            target: None,
        }
    }

    pub fn step(mut self, step: CommandSpec) -> Self {
        self.steps.push(step);
        self
    }

    pub fn steps(mut self, steps: impl IntoIterator<Item = CommandSpec>) -> Self {
        self.steps.extend(steps);
        self
    }

    pub fn working_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.working_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn target(mut self, target: impl Into<PathBuf>) -> Self {
        self.target = Some(target.into());
        self
    }
}
