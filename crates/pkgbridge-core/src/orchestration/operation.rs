use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::execution::InvocationOutput;
use crate::logging::LogLevel;
use crate::models::{
    CoreError, InstallationOptions, ManagerId, ManagerSource, OperationKind, OperationState,
    OperationVerdict, Package, PackageTag, SourceOperationKind, TaskId,
};
use crate::orchestration::PackageManager;
use crate::persistence::InstallationOptionsStore;

/// Most `AutoRetry` resubmissions one operation may make. The attempt that
/// would exceed it is reported as failed.
pub const MAX_AUTO_RETRIES: u32 = 3;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct OperationReport {
    pub verdict: OperationVerdict,
    pub attempts: u32,
    /// Output of the last attempt; `None` when nothing ran.
    pub output: Option<InvocationOutput>,
    /// Options as mutated by the retries. Only the caller's own options are
    /// ever remembered.
    pub options: InstallationOptions,
}

impl OperationReport {
    /// Nothing ran: the manager is unavailable or unknown.
    pub fn skipped(options: InstallationOptions) -> Self {
        Self {
            verdict: OperationVerdict::Failed,
            attempts: 0,
            output: None,
            options,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.verdict == OperationVerdict::Succeeded
    }
}

/// Drives install, update, uninstall and source changes through the
/// attempt/classify/retry loop.
#[derive(Default)]
pub struct OperationRunner {
    options_store: Option<Arc<dyn InstallationOptionsStore>>,
    next_task_id: AtomicU64,
}

impl OperationRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options_store(options_store: Arc<dyn InstallationOptionsStore>) -> Self {
        Self {
            options_store: Some(options_store),
            next_task_id: AtomicU64::new(0),
        }
    }

    fn next_task_id(&self) -> TaskId {
        TaskId(self.next_task_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Remembered options for the package, or defaults.
    pub fn stored_options(&self, manager: ManagerId, package_id: &str) -> InstallationOptions {
        let Some(store) = &self.options_store else {
            return InstallationOptions::default();
        };
        match store.load_options(manager, package_id) {
            Ok(options) => options.unwrap_or_default(),
            Err(error) => {
                tracing::warn!(manager = ?manager, kind = ?error.kind, "could not load installation options");
                InstallationOptions::default()
            }
        }
    }

    fn persist_options(&self, manager: ManagerId, package_id: &str, options: &InstallationOptions) {
        if let Some(store) = &self.options_store
            && let Err(error) = store.save_options(manager, package_id, options)
        {
            tracing::warn!(manager = ?manager, kind = ?error.kind, "could not save installation options");
        }
    }

    pub async fn run(
        &self,
        manager: &PackageManager,
        kind: OperationKind,
        package: &Package,
        mut options: InstallationOptions,
    ) -> OperationReport {
        if !manager.is_ready() {
            manager.backend().runtime().diagnostic(
                LogLevel::Warn,
                &format!(
                    "{} is not available; {kind:?} of {} was not attempted",
                    manager.properties().name,
                    package.id
                ),
            );
            return OperationReport::skipped(options);
        }

        let task_id = self.next_task_id();
        let requested = options.clone();
        let previous_tag = package.tag();
        package.set_tag(PackageTag::BeingProcessed);
        let mut state = OperationState::Pending;
        let mut attempts = 0;
        let mut last_output;

        let verdict = loop {
            attempts += 1;
            transition(&mut state, OperationState::Running, manager.id(), attempts);

            let verdict = match manager
                .attempt_operation(kind, package, &options, task_id)
                .await
            {
                Ok(output) => {
                    let verdict = manager
                        .classify_operation(kind, package, &mut options, &output)
                        .await;
                    last_output = output;
                    verdict
                }
                Err(error) => {
                    last_output = error_output(&error);
                    OperationVerdict::Failed
                }
            };
            transition(&mut state, verdict.into(), manager.id(), attempts);

            match verdict {
                OperationVerdict::AutoRetry if attempts > MAX_AUTO_RETRIES => {
                    tracing::warn!(
                        manager = ?manager.id(),
                        package = %package.id,
                        attempts,
                        "retry limit reached"
                    );
                    break OperationVerdict::Failed;
                }
                OperationVerdict::AutoRetry => {
                    transition(&mut state, OperationState::Pending, manager.id(), attempts);
                }
                terminal => break terminal,
            }
        };

        package.set_tag(tag_after(kind, verdict, previous_tag));
        if verdict == OperationVerdict::Succeeded {
            // Retries may elevate or skip the hash check once; that must not
            // carry over to later operations.
            self.persist_options(manager.id(), &package.id, &requested);
        }

        OperationReport {
            verdict,
            attempts,
            output: Some(last_output),
            options,
        }
    }

    pub async fn run_source(
        &self,
        manager: &PackageManager,
        kind: SourceOperationKind,
        source: &ManagerSource,
    ) -> OperationReport {
        if !manager.is_ready() {
            return OperationReport::skipped(InstallationOptions::default());
        }

        let task_id = self.next_task_id();
        let mut attempts = 0;
        let mut last_output;

        let verdict = loop {
            attempts += 1;
            let verdict = match manager.attempt_source_operation(kind, source, task_id).await {
                Ok((verdict, output)) => {
                    last_output = output;
                    verdict
                }
                Err(error) => {
                    last_output = error_output(&error);
                    OperationVerdict::Failed
                }
            };
            match verdict {
                OperationVerdict::AutoRetry if attempts <= MAX_AUTO_RETRIES => continue,
                OperationVerdict::AutoRetry => break OperationVerdict::Failed,
                terminal => break terminal,
            }
        };

        OperationReport {
            verdict,
            attempts,
            output: Some(last_output),
            options: InstallationOptions::default(),
        }
    }
}

/// A pin survives a successful update or uninstall; anything else that was
/// only about the pending work goes back to `Default`.
fn tag_after(kind: OperationKind, verdict: OperationVerdict, previous: PackageTag) -> PackageTag {
    match (verdict, kind, previous) {
        (OperationVerdict::Succeeded, OperationKind::Install, _) => PackageTag::AlreadyInstalled,
        (OperationVerdict::Succeeded, _, PackageTag::Pinned) => PackageTag::Pinned,
        (OperationVerdict::Succeeded, _, _) => PackageTag::Default,
        _ => PackageTag::Failed,
    }
}

fn transition(state: &mut OperationState, next: OperationState, manager: ManagerId, attempt: u32) {
    tracing::debug!(manager = ?manager, attempt, from = ?state, to = ?next, "operation state");
    *state = next;
}

/// A spawn or wait failure, kept in the report as if the process printed it.
fn error_output(error: &CoreError) -> InvocationOutput {
    InvocationOutput {
        exit_code: -1,
        stdout_lines: Vec::new(),
        stderr: error.to_string(),
    }
}
