use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use pkgbridge_core::adapters::run_logged;
use pkgbridge_core::execution::{
    CommandSpec, ExecutionResult, ProcessExecutor, ProcessExitStatus, ProcessOutput,
    ProcessSpawnRequest, ProcessWaitFuture, RunningProcess, command_line, spawn_validated,
};
use pkgbridge_core::logging::InMemoryOperationLog;
use pkgbridge_core::models::{CoreError, CoreErrorKind, ManagerAction, ManagerId, TaskId, TaskType};

/// Remembers the last request and exits with a fixed result.
#[derive(Clone)]
struct RecordingExecutor {
    captured: Arc<Mutex<Option<ProcessSpawnRequest>>>,
    output: ProcessOutput,
}

impl RecordingExecutor {
    fn new(output: ProcessOutput) -> Self {
        Self {
            captured: Arc::new(Mutex::new(None)),
            output,
        }
    }

    fn captured_request(&self) -> Option<ProcessSpawnRequest> {
        self.captured.lock().ok()?.clone()
    }
}

struct FinishedProcess(ProcessOutput);

impl RunningProcess for FinishedProcess {
    fn wait(self: Box<Self>) -> ProcessWaitFuture {
        let output = self.0;
        Box::pin(async move { Ok(output) })
    }
}

impl ProcessExecutor for RecordingExecutor {
    fn spawn(&self, request: ProcessSpawnRequest) -> ExecutionResult<Box<dyn RunningProcess>> {
        if let Ok(mut captured) = self.captured.lock() {
            *captured = Some(request);
        }
        Ok(Box::new(FinishedProcess(self.output.clone())))
    }
}

struct RefusingExecutor;

impl ProcessExecutor for RefusingExecutor {
    fn spawn(&self, request: ProcessSpawnRequest) -> ExecutionResult<Box<dyn RunningProcess>> {
        Err(CoreError::for_action(
            request.manager,
            request.action,
            CoreErrorKind::ProcessFailure,
            "The system cannot find the file specified.",
        ))
    }
}

fn finished(code: i32, stdout: &str, stderr: &str) -> ProcessOutput {
    ProcessOutput {
        status: ProcessExitStatus::Exited(code),
        stdout: stdout.as_bytes().to_vec(),
        stderr: stderr.as_bytes().to_vec(),
        elapsed: Duration::from_millis(40),
    }
}

#[test]
fn empty_program_is_refused() {
    let request = ProcessSpawnRequest::new(
        ManagerId::Scoop,
        ManagerAction::Refresh,
        CommandSpec::new(""),
    );

    let error = request.validate().expect_err("expected validation failure");
    assert_eq!(error.kind, CoreErrorKind::InvalidInput);
    assert_eq!(error.manager, Some(ManagerId::Scoop));
    assert_eq!(error.task, Some(TaskType::Refresh));
    assert_eq!(error.action, Some(ManagerAction::Refresh));
    assert!(error.message.contains("no program to run"));
}

#[test]
fn zero_timeout_is_refused() {
    let request = ProcessSpawnRequest::new(
        ManagerId::Npm,
        ManagerAction::Search,
        CommandSpec::new("npm").args(["search", "ripgrep"]),
    )
    .timeout(Duration::ZERO);

    let error = request.validate().expect_err("expected timeout validation failure");
    assert_eq!(error.task, Some(TaskType::Search));
    assert!(error.message.contains("zero timeout"));
}

#[test]
fn empty_arguments_are_refused() {
    let request = ProcessSpawnRequest::new(
        ManagerId::Winget,
        ManagerAction::Install,
        CommandSpec::new("winget.exe").args(["install", ""]),
    );

    let error = request.validate().expect_err("expected validation failure");
    assert_eq!(error.task, Some(TaskType::Install));
    assert!(error.message.starts_with("refusing to run winget.exe"));
}

#[test]
fn environment_keys_with_equals_are_refused() {
    let request = ProcessSpawnRequest::new(
        ManagerId::Pip,
        ManagerAction::ListInstalled,
        CommandSpec::new("python.exe").env("PIP=INDEX", "x"),
    );

    assert!(request.validate().is_err());
}

#[test]
fn action_decides_the_task_type() {
    let request = ProcessSpawnRequest::new(
        ManagerId::PowerShell,
        ManagerAction::AddSource,
        CommandSpec::new("powershell.exe"),
    );

    assert_eq!(request.task_type, TaskType::Sources);
    assert_eq!(request.task_id, None);
    assert!(!request.requires_elevation);
    assert_eq!(request.timeout, None);
}

#[test]
fn command_lines_quote_arguments_with_spaces() {
    let request = ProcessSpawnRequest::new(
        ManagerId::Chocolatey,
        ManagerAction::Install,
        CommandSpec::new("choco.exe").args(["install", "vlc", "--params", "/Language:en US"]),
    );

    assert_eq!(
        command_line(&request),
        "choco.exe install vlc --params \"/Language:en US\""
    );
}

#[tokio::test]
async fn validated_spawn_passes_the_request_through_unchanged() {
    let output = finished(0, "ok", "");
    let executor = RecordingExecutor::new(output.clone());

    let request = ProcessSpawnRequest::new(
        ManagerId::Pip,
        ManagerAction::ListOutdated,
        CommandSpec::new("python.exe")
            .args(["-m", "pip", "list", "--outdated"])
            .env("PIP_DISABLE_PIP_VERSION_CHECK", "1")
            .working_dir(PathBuf::from("/tmp")),
    )
    .task_id(TaskId(7))
    .timeout(Duration::from_secs(10));

    let handle = spawn_validated(&executor, request).expect("validated spawn should succeed");
    let result = handle.wait().await.expect("wait should succeed");
    assert_eq!(result, output);

    let captured = executor
        .captured_request()
        .expect("executor should capture spawn request");
    assert_eq!(captured.command.program, PathBuf::from("python.exe"));
    assert_eq!(captured.command.args, vec!["-m", "pip", "list", "--outdated"]);
    assert_eq!(
        captured.command.env.get("PIP_DISABLE_PIP_VERSION_CHECK"),
        Some(&"1".to_string())
    );
    assert_eq!(captured.command.working_dir, Some(PathBuf::from("/tmp")));
    assert_eq!(captured.task_id, Some(TaskId(7)));
}

#[tokio::test]
async fn invalid_requests_never_reach_the_executor() {
    let executor = RecordingExecutor::new(finished(0, "", ""));
    let request = ProcessSpawnRequest::new(
        ManagerId::Npm,
        ManagerAction::Install,
        CommandSpec::new("npm.cmd").args(["install", "left\0pad"]),
    );

    assert!(spawn_validated(&executor, request).is_err());
    assert!(executor.captured_request().is_none());
}

#[tokio::test]
async fn logged_runs_record_the_combined_output() {
    let executor = RecordingExecutor::new(finished(1, "Installing vlc", "checksum mismatch"));
    let log = InMemoryOperationLog::new();
    let request = ProcessSpawnRequest::new(
        ManagerId::Chocolatey,
        ManagerAction::Install,
        CommandSpec::new("choco.exe").args(["install", "vlc", "-y"]),
    );

    let output = run_logged(&executor, &log, request, |_| {})
        .await
        .expect("a non-zero exit is not an error");

    assert_eq!(output.exit_code, 1);
    let records = log.operations();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].manager, ManagerId::Chocolatey);
    assert_eq!(records[0].command_line, "choco.exe install vlc -y");
    assert_eq!(records[0].output, "Installing vlc\nchecksum mismatch");
    assert_eq!(records[0].exit_code, Some(1));
}

#[tokio::test]
async fn logged_runs_record_spawn_failures_too() {
    let log = InMemoryOperationLog::new();
    let request = ProcessSpawnRequest::new(
        ManagerId::DotnetTool,
        ManagerAction::ListInstalled,
        CommandSpec::new("dotnet.exe").args(["tool", "list", "--global"]),
    );

    let error = run_logged(&RefusingExecutor, &log, request, |_| {})
        .await
        .expect_err("spawn failure should surface");

    assert_eq!(error.kind, CoreErrorKind::ProcessFailure);
    let records = log.operations_for(ManagerId::DotnetTool);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].exit_code, None);
    assert!(records[0].output.contains("cannot find the file"));
}
