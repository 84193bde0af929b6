use crate::execution::{
    ExecutionResult, ProcessExecutor, ProcessOutput, ProcessSpawnRequest, spawn_validated,
};
use crate::models::{ManagerAction, ManagerId};

/// Everything one backend invocation produced. A non-zero exit code is data.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct InvocationOutput {
    pub exit_code: i32,
    pub stdout_lines: Vec<String>,
    pub stderr: String,
}

impl InvocationOutput {
    pub fn stdout(&self) -> String {
        self.stdout_lines.join("\n")
    }

    /// Stdout followed by stderr; the text verdict classifiers match against.
    pub fn combined(&self) -> String {
        let mut text = self.stdout();
        if !self.stderr.is_empty() {
            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str(&self.stderr);
        }
        text
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.stdout_lines.iter().any(|line| line.contains(needle)) || self.stderr.contains(needle)
    }

    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }
}

/// Runs one request and feeds every stdout line to `on_line` as it arrives.
///
/// When the running process offers a live line stream the callback sees lines
/// while the child is still running; otherwise the buffered stdout is split
/// after exit. Spawn, wait and timeout failures are the only errors.
pub async fn invoke_lines<F>(
    executor: &dyn ProcessExecutor,
    request: ProcessSpawnRequest,
    mut on_line: F,
) -> ExecutionResult<InvocationOutput>
where
    F: FnMut(&str) + Send,
{
    let (manager, action) = (request.manager, request.action);
    let process = spawn_validated(executor, request)?;

    match process.take_stdout_lines() {
        Some(mut receiver) => {
            let mut streamed = Vec::new();
            let drain = async {
                while let Some(line) = receiver.recv().await {
                    on_line(&line);
                    streamed.push(line);
                }
            };
            let (output, ()) = tokio::join!(process.wait(), drain);
            let output = output?;
            trace_exit(manager, action, &output);

            Ok(InvocationOutput {
                exit_code: output.exit_code(),
                stdout_lines: streamed,
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            })
        }
        None => {
            let output = process.wait().await?;
            trace_exit(manager, action, &output);
            let stdout_lines: Vec<String> = String::from_utf8_lossy(&output.stdout)
                .lines()
                .map(str::to_owned)
                .collect();
            for line in &stdout_lines {
                on_line(line);
            }

            Ok(InvocationOutput {
                exit_code: output.exit_code(),
                stdout_lines,
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            })
        }
    }
}

fn trace_exit(manager: ManagerId, action: ManagerAction, output: &ProcessOutput) {
    tracing::debug!(
        manager = ?manager,
        action = ?action,
        exit_code = output.exit_code(),
        elapsed_ms = output.elapsed.as_millis() as u64,
        "process exited"
    );
}

pub async fn invoke(
    executor: &dyn ProcessExecutor,
    request: ProcessSpawnRequest,
) -> ExecutionResult<InvocationOutput> {
    invoke_lines(executor, request, |_| {}).await
}

/// Printable command line for operation logs. Arguments with spaces are quoted.
pub fn command_line(request: &ProcessSpawnRequest) -> String {
    let mut line = request.command.program.display().to_string();
    for arg in &request.command.args {
        line.push(' ');
        if arg.contains(' ') && !arg.starts_with('"') {
            line.push('"');
            line.push_str(arg);
            line.push('"');
        } else {
            line.push_str(arg);
        }
    }
    line
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use super::{InvocationOutput, command_line, invoke_lines};
    use crate::execution::{
        CommandSpec, ExecutionResult, ProcessExecutor, ProcessExitStatus, ProcessOutput,
        ProcessSpawnRequest, ProcessWaitFuture, RunningProcess, StdoutLines,
    };
    use crate::models::{CoreErrorKind, ManagerAction, ManagerId};

    struct CannedProcess {
        status: ProcessExitStatus,
        stdout: &'static str,
        stderr: &'static str,
        stream: Mutex<Option<StdoutLines>>,
    }

    impl RunningProcess for CannedProcess {
        fn take_stdout_lines(&self) -> Option<StdoutLines> {
            self.stream.lock().unwrap().take()
        }

        fn wait(self: Box<Self>) -> ProcessWaitFuture {
            Box::pin(async move {
                Ok(ProcessOutput {
                    status: self.status,
                    stdout: self.stdout.as_bytes().to_vec(),
                    stderr: self.stderr.as_bytes().to_vec(),
                    elapsed: Duration::from_millis(12),
                })
            })
        }
    }

    struct CannedExecutor {
        status: ProcessExitStatus,
        stdout: &'static str,
        stderr: &'static str,
        streamed: bool,
    }

    impl ProcessExecutor for CannedExecutor {
        fn spawn(
            &self,
            _request: ProcessSpawnRequest,
        ) -> ExecutionResult<Box<dyn RunningProcess>> {
            let stream = if self.streamed {
                let (sender, receiver) = tokio::sync::mpsc::unbounded_channel();
                for line in self.stdout.lines() {
                    sender.send(line.to_string()).unwrap();
                }
                Some(receiver)
            } else {
                None
            };
            Ok(Box::new(CannedProcess {
                status: self.status,
                stdout: self.stdout,
                stderr: self.stderr,
                stream: Mutex::new(stream),
            }))
        }
    }

    fn request(args: &[&str]) -> ProcessSpawnRequest {
        ProcessSpawnRequest::new(
            ManagerId::Npm,
            ManagerAction::ListInstalled,
            CommandSpec::new("/usr/bin/npm").args(args.iter().copied()),
        )
    }

    #[tokio::test]
    async fn buffered_output_is_split_into_lines() {
        let executor = CannedExecutor {
            status: ProcessExitStatus::Exited(0),
            stdout: "first\r\nsecond\n",
            stderr: "",
            streamed: false,
        };
        let mut seen = Vec::new();
        let output = invoke_lines(&executor, request(&["list"]), |line| {
            seen.push(line.to_string())
        })
        .await
        .unwrap();

        assert_eq!(seen, vec!["first", "second"]);
        assert_eq!(output.stdout_lines, seen);
    }

    #[tokio::test]
    async fn streamed_lines_reach_the_callback() {
        let executor = CannedExecutor {
            status: ProcessExitStatus::Exited(0),
            stdout: "a\nb\nc",
            stderr: "",
            streamed: true,
        };
        let mut count = 0;
        let output = invoke_lines(&executor, request(&["list"]), |_| count += 1)
            .await
            .unwrap();

        assert_eq!(count, 3);
        assert_eq!(output.stdout_lines, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn non_zero_exit_and_signals_are_data() {
        let executor = CannedExecutor {
            status: ProcessExitStatus::Killed,
            stdout: "",
            stderr: "Access is denied.",
            streamed: false,
        };
        let output = invoke_lines(&executor, request(&["list"]), |_| {})
            .await
            .unwrap();

        assert_eq!(output.exit_code, -1);
        assert!(output.contains("Access is denied"));
        assert!(!output.succeeded());
    }

    #[tokio::test]
    async fn invalid_requests_never_spawn() {
        let executor = CannedExecutor {
            status: ProcessExitStatus::Exited(0),
            stdout: "",
            stderr: "",
            streamed: false,
        };
        let error = invoke_lines(&executor, request(&["bad\0arg"]), |_| {})
            .await
            .unwrap_err();

        assert_eq!(error.kind, CoreErrorKind::InvalidInput);
    }

    #[test]
    fn combined_text_joins_stdout_and_stderr() {
        let output = InvocationOutput {
            exit_code: 1,
            stdout_lines: vec!["one".to_string(), "two".to_string()],
            stderr: "three".to_string(),
        };
        assert_eq!(output.combined(), "one\ntwo\nthree");
    }

    #[test]
    fn command_line_quotes_arguments_with_spaces() {
        let line = command_line(&request(&["search", "visual studio", "--parseable"]));
        assert_eq!(line, "/usr/bin/npm search \"visual studio\" --parseable");
    }
}
