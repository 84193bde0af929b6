use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use crate::adapters::{AdapterResult, ManagerBackend};
use crate::execution::InvocationOutput;
use crate::logging::LogLevel;
use crate::models::{
    CoreError, InstallationOptions, ManagerAction, ManagerCapabilities, ManagerId,
    ManagerProperties, ManagerSource, ManagerStatus, OperationKind, OperationVerdict, Package,
    PackageDetails, SourceOperationKind, TaskId,
};

/// How long initialization waits for a source listing before falling back
/// to the backend's known sources.
pub const SOURCE_LIST_TIMEOUT: Duration = Duration::from_secs(10);

/// One backend behind the fail-safe boundary.
///
/// Query methods never return errors: a failing backend is logged and
/// contributes nothing. A disabled or missing manager is skipped silently.
pub struct PackageManager {
    backend: Arc<dyn ManagerBackend>,
    status: RwLock<ManagerStatus>,
    loaded_sources: RwLock<Option<Vec<ManagerSource>>>,
}

impl PackageManager {
    pub fn new(backend: Arc<dyn ManagerBackend>) -> Self {
        Self {
            backend,
            status: RwLock::new(ManagerStatus::missing()),
            loaded_sources: RwLock::new(None),
        }
    }

    pub fn id(&self) -> ManagerId {
        self.backend.id()
    }

    pub fn backend(&self) -> &Arc<dyn ManagerBackend> {
        &self.backend
    }

    pub fn properties(&self) -> &'static ManagerProperties {
        self.backend.properties()
    }

    pub fn capabilities(&self) -> &'static ManagerCapabilities {
        self.backend.capabilities()
    }

    pub fn main_source(&self) -> ManagerSource {
        self.backend.main_source()
    }

    pub fn status(&self) -> ManagerStatus {
        self.status
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_enabled(&self) -> bool {
        !self
            .backend
            .runtime()
            .context()
            .settings
            .get_bool(&self.properties().disable_setting_key())
    }

    pub fn is_ready(&self) -> bool {
        self.is_enabled() && self.status().found
    }

    pub fn supports_sources(&self) -> bool {
        self.capabilities().supports_custom_sources && self.backend.multi_source().is_some()
    }

    fn diagnostic(&self, level: LogLevel, message: &str) {
        self.backend.runtime().diagnostic(level, message);
    }

    fn set_status(&self, status: ManagerStatus) {
        *self.status.write().unwrap_or_else(PoisonError::into_inner) = status;
    }

    /// Properties, capabilities and main source are static; status detection
    /// may run the executable; sources are listed last under a timeout.
    pub async fn initialize(&self) {
        let properties = self.properties();
        let main_source = self.main_source();
        tracing::debug!(
            manager = ?self.id(),
            main_source = %main_source.name,
            "initializing manager"
        );

        if !self.is_enabled() {
            self.set_status(ManagerStatus::missing());
            self.diagnostic(
                LogLevel::Info,
                &format!("{} is disabled and will not be loaded", properties.name),
            );
            return;
        }

        let status = match self.backend.load_status().await {
            Ok(status) => status,
            Err(error) => {
                tracing::warn!(manager = ?self.id(), kind = ?error.kind, "status detection failed");
                ManagerStatus::missing()
            }
        };
        self.set_status(status.clone());

        if !status.found {
            self.diagnostic(
                LogLevel::Warn,
                &format!(
                    "{} was not found; {} is unavailable",
                    properties.executable_friendly_name, properties.name
                ),
            );
            return;
        }

        self.diagnostic(
            LogLevel::Info,
            &format!(
                "{} found at {} (version {})",
                properties.name,
                status
                    .executable_path
                    .as_deref()
                    .map(|path| path.display().to_string())
                    .unwrap_or_default(),
                status.version.as_deref().unwrap_or("unknown")
            ),
        );

        if self.supports_sources() {
            self.reload_sources().await;
        }
    }

    /// Lists sources, racing the listing against `SOURCE_LIST_TIMEOUT`.
    /// A failure or a timeout falls back to the known sources.
    pub async fn reload_sources(&self) -> Vec<ManagerSource> {
        let Some(multi) = self.backend.multi_source() else {
            return vec![self.main_source()];
        };

        let listed = match tokio::time::timeout(SOURCE_LIST_TIMEOUT, multi.list_sources()).await {
            Ok(Ok(sources)) => sources,
            Ok(Err(error)) => {
                self.log_failure(ManagerAction::ListSources, &error);
                multi.known_sources()
            }
            Err(_) => {
                self.diagnostic(
                    LogLevel::Warn,
                    &format!(
                        "{} source listing timed out after {}s; using known sources",
                        self.properties().name,
                        SOURCE_LIST_TIMEOUT.as_secs()
                    ),
                );
                multi.known_sources()
            }
        };

        let registry = self.backend.sources();
        for source in &listed {
            registry.add(source.clone());
        }
        *self
            .loaded_sources
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(listed.clone());
        listed
    }

    /// Sources from the last listing, or the known sources before one ran.
    pub fn sources(&self) -> Vec<ManagerSource> {
        if let Some(loaded) = self
            .loaded_sources
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
        {
            return loaded;
        }
        match self.backend.multi_source() {
            Some(multi) => multi.known_sources(),
            None => vec![self.main_source()],
        }
    }

    fn log_failure(&self, action: ManagerAction, error: &CoreError) {
        tracing::error!(
            manager = ?self.id(),
            action = ?action,
            kind = ?error.kind,
            "{}",
            error.message
        );
        self.diagnostic(
            LogLevel::Error,
            &format!("{} {action:?} failed: {error}", self.properties().name),
        );
    }

    fn fail_safe<T>(&self, action: ManagerAction, result: AdapterResult<T>, fallback: T) -> T {
        match result {
            Ok(value) => value,
            Err(error) => {
                self.log_failure(action, &error);
                fallback
            }
        }
    }

    pub async fn find_packages(&self, query: &str) -> Vec<Package> {
        if !self.is_ready() {
            return Vec::new();
        }
        let result = self.backend.find_packages(query).await;
        self.fail_safe(ManagerAction::Search, result, Vec::new())
    }

    pub async fn installed_packages(&self) -> Vec<Package> {
        if !self.is_ready() {
            return Vec::new();
        }
        let result = self.backend.list_installed().await;
        self.fail_safe(ManagerAction::ListInstalled, result, Vec::new())
    }

    pub async fn upgradable_packages(&self) -> Vec<Package> {
        if !self.is_ready() {
            return Vec::new();
        }
        let result = self.backend.list_upgradable().await;
        self.fail_safe(ManagerAction::ListOutdated, result, Vec::new())
    }

    /// Falls back to identity-only details.
    pub async fn package_details(&self, package: &Package) -> PackageDetails {
        if !self.is_ready() {
            return PackageDetails::for_package(package);
        }
        let result = self.backend.package_details(package).await;
        self.fail_safe(
            ManagerAction::Details,
            result,
            PackageDetails::for_package(package),
        )
    }

    pub async fn package_versions(&self, package: &Package) -> Vec<String> {
        if !self.is_ready() || !self.capabilities().supports_custom_versions {
            return Vec::new();
        }
        let result = self.backend.package_versions(package).await;
        self.fail_safe(ManagerAction::Versions, result, Vec::new())
    }

    pub async fn refresh_indexes(&self) {
        if !self.is_ready() {
            return;
        }
        let result = self.backend.refresh_indexes().await;
        self.fail_safe(ManagerAction::Refresh, result, ());
    }

    pub fn operation_args(
        &self,
        kind: OperationKind,
        package: &Package,
        options: &InstallationOptions,
    ) -> Vec<String> {
        match kind {
            OperationKind::Install => self.backend.install_args(package, options),
            OperationKind::Update => self.backend.update_args(package, options),
            OperationKind::Uninstall => self.backend.uninstall_args(package, options),
        }
    }

    /// Runs one attempt of `kind`. Elevation follows the options.
    pub async fn attempt_operation(
        &self,
        kind: OperationKind,
        package: &Package,
        options: &InstallationOptions,
        task_id: TaskId,
    ) -> AdapterResult<InvocationOutput> {
        let runtime = self.backend.runtime();
        let request = runtime
            .request(kind.action(), self.operation_args(kind, package, options))
            .requires_elevation(options.run_as_administrator)
            .task_id(task_id);
        runtime.run(request).await
    }

    pub async fn classify_operation(
        &self,
        kind: OperationKind,
        package: &Package,
        options: &mut InstallationOptions,
        output: &InvocationOutput,
    ) -> OperationVerdict {
        match kind {
            OperationKind::Install => {
                self.backend
                    .classify_install(package, options, output)
                    .await
            }
            OperationKind::Update => self.backend.classify_update(package, options, output).await,
            OperationKind::Uninstall => {
                self.backend
                    .classify_uninstall(package, options, output)
                    .await
            }
        }
    }

    /// Builds, runs and classifies one source change. The registry follows a
    /// successful change.
    pub async fn attempt_source_operation(
        &self,
        kind: SourceOperationKind,
        source: &ManagerSource,
        task_id: TaskId,
    ) -> AdapterResult<(OperationVerdict, InvocationOutput)> {
        let action = kind.action();
        let multi = self
            .backend
            .multi_source()
            .filter(|_| self.capabilities().supports_custom_sources)
            .ok_or_else(|| CoreError::unsupported(self.id(), action))?;

        let args = match kind {
            SourceOperationKind::Add => multi.add_source_args(source),
            SourceOperationKind::Remove => multi.remove_source_args(source),
        };
        let elevated = self.capabilities().sources.must_be_installed_as_admin;
        let runtime = self.backend.runtime();
        let request = runtime
            .request(action, args)
            .requires_elevation(elevated)
            .task_id(task_id);
        let output = runtime.run(request).await?;

        let verdict = match kind {
            SourceOperationKind::Add => multi.classify_add_source(source, &output),
            SourceOperationKind::Remove => multi.classify_remove_source(source, &output),
        };

        if verdict == OperationVerdict::Succeeded {
            let mut loaded = self
                .loaded_sources
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            let sources = loaded.get_or_insert_with(|| multi.known_sources());
            sources.retain(|existing| existing.name != source.name);
            match kind {
                SourceOperationKind::Add => {
                    self.backend.sources().add(source.clone());
                    sources.push(source.clone());
                }
                SourceOperationKind::Remove => self.backend.sources().remove(&source.name),
            }
        }

        Ok((verdict, output))
    }
}
