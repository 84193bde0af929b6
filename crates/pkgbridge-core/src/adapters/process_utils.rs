use std::path::PathBuf;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use crate::adapters::detect_utils::locate_executable;
use crate::adapters::manager::{AdapterResult, BackendContext};
use crate::execution::{
    CommandSpec, InvocationOutput, ProcessExecutor, ProcessSpawnRequest, command_line,
    invoke_lines,
};
use crate::logging::{LogLevel, ManagerOperationRecord, OperationLog};
use crate::models::{CoreError, CoreErrorKind, ManagerAction, ManagerProperties, ManagerStatus};
use crate::parsing::LineParser;

/// Bound on the version check. Nothing else a backend runs carries a timeout.
pub const DETECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Runs one request and records exactly one manager operation for it, also
/// when the spawn or the wait fails.
pub async fn run_logged<F>(
    executor: &dyn ProcessExecutor,
    log: &dyn OperationLog,
    request: ProcessSpawnRequest,
    on_line: F,
) -> AdapterResult<InvocationOutput>
where
    F: FnMut(&str) + Send,
{
    let manager = request.manager;
    let rendered = command_line(&request);
    match request.task_id {
        Some(task) => tracing::debug!(manager = ?manager, %task, command = %rendered, "running"),
        None => tracing::debug!(manager = ?manager, command = %rendered, "running"),
    }
    let result = invoke_lines(executor, request, on_line).await;

    let record = match &result {
        Ok(output) => {
            ManagerOperationRecord::new(manager, rendered, output.combined(), Some(output.exit_code))
        }
        Err(error) => ManagerOperationRecord::new(manager, rendered, error.to_string(), None),
    };
    log.manager_operation(record);

    result
}

/// Per-backend process plumbing: the resolved executable, the fixed call
/// arguments and the shared collaborators.
pub struct BackendRuntime {
    context: BackendContext,
    properties: &'static ManagerProperties,
    candidates: &'static [&'static str],
    executable: RwLock<Option<PathBuf>>,
}

impl BackendRuntime {
    /// `candidates` are the binary names tried during detection, in order.
    pub fn new(
        context: BackendContext,
        properties: &'static ManagerProperties,
        candidates: &'static [&'static str],
    ) -> Self {
        Self {
            context,
            properties,
            candidates,
            executable: RwLock::new(None),
        }
    }

    pub fn context(&self) -> &BackendContext {
        &self.context
    }

    /// The located executable, or the first candidate name so the OS can
    /// still resolve it.
    pub fn executable(&self) -> PathBuf {
        let located = self
            .executable
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        located.unwrap_or_else(|| {
            PathBuf::from(
                self.candidates
                    .first()
                    .copied()
                    .unwrap_or(self.properties.executable_friendly_name),
            )
        })
    }

    pub fn set_executable(&self, path: Option<PathBuf>) {
        *self
            .executable
            .write()
            .unwrap_or_else(PoisonError::into_inner) = path;
    }

    /// Program plus the manager's fixed call arguments.
    pub fn command(&self) -> CommandSpec {
        CommandSpec::new(self.executable()).args(self.properties.executable_call_args.iter().copied())
    }

    pub fn request(
        &self,
        action: ManagerAction,
        args: impl IntoIterator<Item = impl Into<String>>,
    ) -> ProcessSpawnRequest {
        ProcessSpawnRequest::new(self.properties.id, action, self.command().args(args))
    }

    pub async fn run(&self, request: ProcessSpawnRequest) -> AdapterResult<InvocationOutput> {
        self.run_lines(request, |_| {}).await
    }

    pub async fn run_lines<F>(
        &self,
        request: ProcessSpawnRequest,
        on_line: F,
    ) -> AdapterResult<InvocationOutput>
    where
        F: FnMut(&str) + Send,
    {
        run_logged(
            self.context.executor.as_ref(),
            self.context.log.as_ref(),
            request,
            on_line,
        )
        .await
    }

    /// Like `run`, but a non-zero exit is a `ProcessFailure`. For listings
    /// where an empty parse of a failed run would read as "nothing there".
    pub async fn run_checked(&self, request: ProcessSpawnRequest) -> AdapterResult<InvocationOutput> {
        let action = request.action;
        let output = self.run(request).await?;
        if output.succeeded() {
            return Ok(output);
        }
        Err(CoreError::for_action(
            self.properties.id,
            action,
            CoreErrorKind::ProcessFailure,
            format!("exited with code {}: {}", output.exit_code, output.stderr.trim()),
        ))
    }

    /// Feeds stdout to `parser` while the process runs.
    pub async fn parse<P: LineParser>(
        &self,
        request: ProcessSpawnRequest,
        mut parser: P,
    ) -> AdapterResult<P::Output> {
        self.run_lines(request, |line| parser.push(line)).await?;
        Ok(parser.finish())
    }

    pub fn diagnostic(&self, level: LogLevel, message: &str) {
        self.context.log.diagnostic(level, message);
    }

    /// Locates the executable and runs `version_args` against it. A spawn
    /// failure or a non-zero exit means the manager was not found.
    pub async fn detect(&self, version_args: &[&str]) -> AdapterResult<ManagerStatus> {
        let located = locate_executable(&self.context, self.properties, self.candidates).await;
        self.set_executable(located.clone());

        let request = self
            .request(ManagerAction::Detect, version_args.iter().copied())
            .timeout(DETECT_TIMEOUT);

        match self.run(request).await {
            Ok(output) if output.succeeded() => {
                let version = output.stdout().trim().to_string();
                Ok(ManagerStatus {
                    found: true,
                    executable_path: Some(located.unwrap_or_else(|| self.executable())),
                    version: (!version.is_empty()).then_some(version),
                })
            }
            Ok(output) => {
                tracing::debug!(
                    manager = ?self.properties.id,
                    exit_code = output.exit_code,
                    "version check exited unsuccessfully"
                );
                Ok(ManagerStatus {
                    executable_path: located,
                    ..ManagerStatus::missing()
                })
            }
            Err(error) => {
                tracing::debug!(manager = ?self.properties.id, kind = ?error.kind, "version check failed");
                Ok(ManagerStatus {
                    executable_path: located,
                    ..ManagerStatus::missing()
                })
            }
        }
    }
}
