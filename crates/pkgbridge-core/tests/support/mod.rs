#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use pkgbridge_core::adapters::BackendContext;
use pkgbridge_core::execution::{
    ExecutionResult, ProcessExecutor, ProcessExitStatus, ProcessOutput, ProcessSpawnRequest,
    ProcessWaitFuture, RunningProcess,
};
use pkgbridge_core::logging::InMemoryOperationLog;
use pkgbridge_core::models::{CoreError, CoreErrorKind, ManagerAction, ManagerId};
use pkgbridge_core::settings::InMemorySettings;

/// What one fake invocation prints.
#[derive(Clone, Debug)]
pub enum Reply {
    Exit {
        code: i32,
        stdout: String,
        stderr: String,
        delay: Option<Duration>,
    },
    SpawnFailure(String),
}

impl Reply {
    pub fn ok(stdout: &str) -> Self {
        Self::Exit {
            code: 0,
            stdout: stdout.to_string(),
            stderr: String::new(),
            delay: None,
        }
    }

    pub fn exit(code: i32, stdout: &str, stderr: &str) -> Self {
        Self::Exit {
            code,
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
            delay: None,
        }
    }

    pub fn spawn_failure(message: &str) -> Self {
        Self::SpawnFailure(message.to_string())
    }

    pub fn delayed(self, by: Duration) -> Self {
        match self {
            Self::Exit {
                code,
                stdout,
                stderr,
                ..
            } => Self::Exit {
                code,
                stdout,
                stderr,
                delay: Some(by),
            },
            other => other,
        }
    }
}

/// Replays canned replies keyed by `(manager, action)`. Several replies for
/// one key are handed out in order; the last one repeats. `which`/`where`
/// lookups always miss and unscripted calls exit 1.
#[derive(Default)]
pub struct ScriptedExecutor {
    replies: Mutex<HashMap<(ManagerId, ManagerAction), VecDeque<Reply>>>,
    requests: Mutex<Vec<ProcessSpawnRequest>>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(self, manager: ManagerId, action: ManagerAction, reply: Reply) -> Self {
        self.replies
            .lock()
            .unwrap()
            .entry((manager, action))
            .or_default()
            .push_back(reply);
        self
    }

    /// Answers the version check so the manager counts as found.
    pub fn found(self, manager: ManagerId) -> Self {
        self.on(manager, ManagerAction::Detect, Reply::ok("1.0.0"))
    }

    /// Every request that reached the executor, `which` lookups excluded.
    pub fn requests(&self) -> Vec<ProcessSpawnRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn requests_for(&self, manager: ManagerId, action: ManagerAction) -> Vec<ProcessSpawnRequest> {
        self.requests()
            .into_iter()
            .filter(|request| request.manager == manager && request.action == action)
            .collect()
    }

    fn next_reply(&self, key: (ManagerId, ManagerAction)) -> Reply {
        let mut replies = self.replies.lock().unwrap();
        match replies.get_mut(&key) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap(),
            Some(queue) => queue.front().cloned().unwrap(),
            None => Reply::exit(1, "", "unscripted call"),
        }
    }
}

fn is_path_lookup(request: &ProcessSpawnRequest) -> bool {
    request
        .command
        .program
        .file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name == "which" || name == "where.exe")
}

impl ProcessExecutor for ScriptedExecutor {
    fn spawn(&self, request: ProcessSpawnRequest) -> ExecutionResult<Box<dyn RunningProcess>> {
        if is_path_lookup(&request) {
            return Ok(Box::new(FakeProcess {
                code: 1,
                stdout: String::new(),
                stderr: String::new(),
                delay: None,
            }));
        }

        let key = (request.manager, request.action);
        self.requests.lock().unwrap().push(request.clone());

        match self.next_reply(key) {
            Reply::Exit {
                code,
                stdout,
                stderr,
                delay,
            } => Ok(Box::new(FakeProcess {
                code,
                stdout,
                stderr,
                delay,
            })),
            Reply::SpawnFailure(message) => Err(CoreError {
                manager: Some(request.manager),
                task: Some(request.task_type),
                action: Some(request.action),
                kind: CoreErrorKind::ProcessFailure,
                message,
            }),
        }
    }
}

struct FakeProcess {
    code: i32,
    stdout: String,
    stderr: String,
    delay: Option<Duration>,
}

impl RunningProcess for FakeProcess {
    fn wait(self: Box<Self>) -> ProcessWaitFuture {
        Box::pin(async move {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            Ok(ProcessOutput {
                status: ProcessExitStatus::Exited(self.code),
                stdout: self.stdout.into_bytes(),
                stderr: self.stderr.into_bytes(),
                elapsed: self.delay.unwrap_or_default(),
            })
        })
    }
}

/// Fake collaborators shared by every backend of one test.
pub struct Harness {
    pub executor: Arc<ScriptedExecutor>,
    pub settings: Arc<InMemorySettings>,
    pub log: Arc<InMemoryOperationLog>,
}

impl Harness {
    pub fn new(executor: ScriptedExecutor) -> Self {
        Self {
            executor: Arc::new(executor),
            settings: Arc::new(InMemorySettings::new()),
            log: Arc::new(InMemoryOperationLog::new()),
        }
    }

    pub fn context(&self) -> BackendContext {
        BackendContext::new(
            self.executor.clone(),
            self.settings.clone(),
            self.log.clone(),
        )
    }
}

/// `Name  Id  Version  Source` laid out the way winget pads its columns.
pub fn winget_table(rows: &[(&str, &str, &str, &str)]) -> String {
    let line = |name: &str, id: &str, version: &str, source: &str| {
        format!("{name:<20}{id:<28}{version:<12}{source}")
    };
    let mut lines = vec![line("Name", "Id", "Version", "Source"), "-".repeat(68)];
    lines.extend(
        rows.iter()
            .map(|(name, id, version, source)| line(name, id, version, source)),
    );
    lines.join("\n")
}
