//! Process plumbing for manager CLIs.
//!
//! Backends describe what to run as a [`ProcessSpawnRequest`]; a
//! [`ProcessExecutor`] turns it into a child. Tests swap in scripted
//! executors, so nothing above this module touches `tokio::process`.

use std::collections::BTreeMap;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::time::Duration;

use tokio::sync::mpsc::UnboundedReceiver;

use crate::models::{CoreError, CoreErrorKind, ManagerAction, ManagerId, TaskId, TaskType};

pub mod invocation;
pub mod tokio_process;

pub use invocation::{InvocationOutput, command_line, invoke, invoke_lines};
pub use tokio_process::TokioProcessExecutor;

pub type ExecutionResult<T> = Result<T, CoreError>;

/// Stdout lines delivered while the child is still running.
pub type StdoutLines = UnboundedReceiver<String>;

pub type ProcessWaitFuture = Pin<Box<dyn Future<Output = ExecutionResult<ProcessOutput>> + Send>>;

/// Program, argv and environment of one manager call. Arguments are passed
/// as separate argv entries and never through a shell.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CommandSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub working_dir: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn working_dir(mut self, working_dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(working_dir.into());
        self
    }

    /// First reason this command cannot be handed to the OS, if any.
    fn rejection(&self) -> Option<&'static str> {
        if self.program.as_os_str().is_empty() {
            return Some("no program to run");
        }
        if self.args.iter().any(|arg| arg.is_empty()) {
            return Some("empty argument");
        }
        if self.args.iter().any(|arg| arg.contains('\0')) {
            return Some("argument contains a NUL byte");
        }
        let bad_env = |(key, value): (&String, &String)| {
            key.is_empty() || key.contains('=') || key.contains('\0') || value.contains('\0')
        };
        if self.env.iter().any(bad_env) {
            return Some("malformed environment variable");
        }
        None
    }
}

/// One manager call: what to run plus the manager, action and task it
/// belongs to, so failures and operation records can name them.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProcessSpawnRequest {
    pub manager: ManagerId,
    pub action: ManagerAction,
    pub task_type: TaskType,
    pub task_id: Option<TaskId>,
    pub command: CommandSpec,
    pub requires_elevation: bool,
    pub timeout: Option<Duration>,
}

impl ProcessSpawnRequest {
    pub fn new(manager: ManagerId, action: ManagerAction, command: CommandSpec) -> Self {
        Self {
            manager,
            action,
            task_type: action.task_type(),
            task_id: None,
            command,
            requires_elevation: false,
            timeout: None,
        }
    }

    pub fn task_id(mut self, task_id: TaskId) -> Self {
        self.task_id = Some(task_id);
        self
    }

    pub fn requires_elevation(mut self, requires_elevation: bool) -> Self {
        self.requires_elevation = requires_elevation;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn validate(&self) -> ExecutionResult<()> {
        let rejection = self.command.rejection().or_else(|| {
            self.timeout
                .is_some_and(|timeout| timeout.is_zero())
                .then_some("zero timeout")
        });
        match rejection {
            Some(reason) => Err(CoreError::for_action(
                self.manager,
                self.action,
                CoreErrorKind::InvalidInput,
                format!("refusing to run {}: {reason}", self.command.program.display()),
            )),
            None => Ok(()),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProcessExitStatus {
    Exited(i32),
    /// Ended by a signal, including the kill that enforces a timeout.
    Killed,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProcessOutput {
    pub status: ProcessExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub elapsed: Duration,
}

impl ProcessOutput {
    /// Exit code as domain data. A killed process reports -1.
    pub fn exit_code(&self) -> i32 {
        match self.status {
            ProcessExitStatus::Exited(code) => code,
            ProcessExitStatus::Killed => -1,
        }
    }
}

pub trait RunningProcess: Send + Sync {
    /// Hands out the live stdout line stream, once. Implementations that only
    /// buffer output return `None` and callers split `ProcessOutput::stdout`.
    fn take_stdout_lines(&self) -> Option<StdoutLines> {
        None
    }

    fn wait(self: Box<Self>) -> ProcessWaitFuture;
}

pub trait ProcessExecutor: Send + Sync {
    fn spawn(&self, request: ProcessSpawnRequest) -> ExecutionResult<Box<dyn RunningProcess>>;
}

pub fn spawn_validated(
    executor: &dyn ProcessExecutor,
    request: ProcessSpawnRequest,
) -> ExecutionResult<Box<dyn RunningProcess>> {
    request.validate()?;
    executor.spawn(request)
}
