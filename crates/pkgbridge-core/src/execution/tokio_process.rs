use std::path::PathBuf;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStdout};
use tokio::sync::mpsc::{UnboundedSender, unbounded_channel};
use tokio::task::JoinHandle;

use crate::execution::{
    ExecutionResult, ProcessExecutor, ProcessExitStatus, ProcessOutput, ProcessSpawnRequest,
    ProcessWaitFuture, RunningProcess, StdoutLines,
};
use crate::models::{CoreError, CoreErrorKind, ManagerAction, ManagerId};

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// How long pipes may stay open after the child exited. Descendants that
/// inherited them must not stall the caller.
const PIPE_DRAIN: Duration = Duration::from_millis(250);

/// Reap window after a timeout kill.
const KILL_REAP: Duration = Duration::from_secs(1);

/// Spawns manager executables as tokio child processes.
///
/// Requests flagged with `requires_elevation` are wrapped with the configured
/// elevator program (for example `gsudo` or `sudo`). Without an elevator they
/// run unchanged.
#[derive(Clone, Debug, Default)]
pub struct TokioProcessExecutor {
    elevator: Option<PathBuf>,
}

impl TokioProcessExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_elevator(elevator: impl Into<PathBuf>) -> Self {
        Self {
            elevator: Some(elevator.into()),
        }
    }

    fn command_for(&self, request: &ProcessSpawnRequest) -> tokio::process::Command {
        let mut cmd = match (&self.elevator, request.requires_elevation) {
            (Some(elevator), true) => {
                let mut cmd = tokio::process::Command::new(elevator);
                cmd.arg(&request.command.program);
                cmd
            }
            (None, true) => {
                tracing::warn!(
                    manager = ?request.manager,
                    "elevation requested but no elevator is configured; running unelevated"
                );
                tokio::process::Command::new(&request.command.program)
            }
            _ => tokio::process::Command::new(&request.command.program),
        };
        cmd.args(&request.command.args);
        for (key, value) in &request.command.env {
            cmd.env(key, value);
        }
        if let Some(dir) = &request.command.working_dir {
            cmd.current_dir(dir);
        }
        cmd.stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);
        #[cfg(windows)]
        cmd.creation_flags(CREATE_NO_WINDOW);
        cmd
    }
}

impl ProcessExecutor for TokioProcessExecutor {
    fn spawn(&self, request: ProcessSpawnRequest) -> ExecutionResult<Box<dyn RunningProcess>> {
        let origin = Origin {
            manager: request.manager,
            action: request.action,
        };
        let mut child = self.command_for(&request).spawn().map_err(|error| {
            origin.error(
                CoreErrorKind::ProcessFailure,
                format!("failed to spawn {}: {error}", request.command.program.display()),
            )
        })?;

        // Pipes are drained from the start so a chatty child never blocks on
        // a full buffer before `wait` is polled.
        let (line_sender, line_receiver) = unbounded_channel();
        let stdout = child
            .stdout
            .take()
            .map(|pipe| tokio::spawn(forward_lines(pipe, line_sender)));
        let stderr = child.stderr.take().map(|pipe| tokio::spawn(read_all(pipe)));

        Ok(Box::new(TokioRunningProcess {
            child: Mutex::new(Some(child)),
            stdout,
            stderr,
            lines: Mutex::new(Some(line_receiver)),
            started_at: Instant::now(),
            timeout: request.timeout,
            origin,
        }))
    }
}

#[derive(Clone, Copy, Debug)]
struct Origin {
    manager: ManagerId,
    action: ManagerAction,
}

impl Origin {
    fn error(self, kind: CoreErrorKind, message: String) -> CoreError {
        CoreError::for_action(self.manager, self.action, kind, message)
    }
}

struct TokioRunningProcess {
    child: Mutex<Option<Child>>,
    stdout: Option<JoinHandle<Vec<u8>>>,
    stderr: Option<JoinHandle<Vec<u8>>>,
    lines: Mutex<Option<StdoutLines>>,
    started_at: Instant,
    timeout: Option<Duration>,
    origin: Origin,
}

impl RunningProcess for TokioRunningProcess {
    fn take_stdout_lines(&self) -> Option<StdoutLines> {
        self.lines.lock().ok()?.take()
    }

    fn wait(self: Box<Self>) -> ProcessWaitFuture {
        let TokioRunningProcess {
            child,
            stdout,
            stderr,
            started_at,
            timeout,
            origin,
            ..
        } = *self;

        Box::pin(async move {
            let mut child = child.into_inner().ok().flatten().ok_or_else(|| {
                origin.error(CoreErrorKind::Internal, "child process already consumed".to_string())
            })?;

            let exited = match timeout {
                None => child.wait().await,
                Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
                    Ok(exited) => exited,
                    Err(_) => {
                        kill_tree(&mut child);
                        let _ = tokio::time::timeout(KILL_REAP, child.wait()).await;
                        abort(stdout);
                        abort(stderr);
                        return Err(origin.error(
                            CoreErrorKind::Timeout,
                            format!("process timed out after {}ms", limit.as_millis()),
                        ));
                    }
                },
            };
            let exited = exited.map_err(|error| {
                origin.error(
                    CoreErrorKind::ProcessFailure,
                    format!("failed to wait for process: {error}"),
                )
            })?;

            Ok(ProcessOutput {
                status: exited
                    .code()
                    .map_or(ProcessExitStatus::Killed, ProcessExitStatus::Exited),
                stdout: collect(stdout).await,
                stderr: collect(stderr).await,
                elapsed: started_at.elapsed(),
            })
        })
    }
}

/// Sends each stdout line as it arrives and keeps a copy of all of them.
/// Managers print in the console codepage, so a line that is not UTF-8 is
/// decoded lossily instead of ending the read.
async fn forward_lines(pipe: ChildStdout, sender: UnboundedSender<String>) -> Vec<u8> {
    let mut reader = BufReader::new(pipe);
    let mut buffer = Vec::new();
    let mut raw = Vec::new();
    while let Ok(read) = reader.read_until(b'\n', &mut raw).await {
        if read == 0 {
            break;
        }
        let line = decode_line(&raw);
        buffer.extend_from_slice(line.as_bytes());
        buffer.push(b'\n');
        // The receiver may already be gone; the buffer still keeps the line.
        let _ = sender.send(line);
        raw.clear();
    }
    buffer
}

async fn read_all(mut pipe: impl AsyncRead + Unpin) -> Vec<u8> {
    let mut buffer = Vec::new();
    let _ = pipe.read_to_end(&mut buffer).await;
    buffer
}

async fn collect(reader: Option<JoinHandle<Vec<u8>>>) -> Vec<u8> {
    let Some(mut reader) = reader else {
        return Vec::new();
    };
    match tokio::time::timeout(PIPE_DRAIN, &mut reader).await {
        Ok(Ok(bytes)) => bytes,
        _ => {
            reader.abort();
            Vec::new()
        }
    }
}

fn abort(reader: Option<JoinHandle<Vec<u8>>>) {
    if let Some(reader) = reader {
        reader.abort();
    }
}

fn decode_line(raw: &[u8]) -> String {
    let line = raw.strip_suffix(b"\n").unwrap_or(raw);
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    String::from_utf8_lossy(line).into_owned()
}

#[cfg(unix)]
fn kill_tree(child: &mut Child) {
    if let Some(pid) = child.id() {
        // SAFETY: signals the process group created by `process_group(0)`.
        unsafe {
            libc::kill(-(pid as libc::pid_t), libc::SIGKILL);
        }
    }
}

#[cfg(not(unix))]
fn kill_tree(child: &mut Child) {
    let _ = child.start_kill();
}
