use std::sync::Arc;

use async_trait::async_trait;

use crate::adapters::process_utils::BackendRuntime;
use crate::adapters::sources::SourceRegistry;
use crate::execution::{InvocationOutput, ProcessExecutor};
use crate::logging::OperationLog;
use crate::models::{
    CoreError, InstallationOptions, ManagerAction, ManagerCapabilities, ManagerId,
    ManagerProperties, ManagerSource, ManagerStatus, OperationVerdict, Package, PackageDetails,
};
use crate::settings::SettingsStore;

pub type AdapterResult<T> = Result<T, CoreError>;

/// Collaborators every backend is constructed with.
#[derive(Clone)]
pub struct BackendContext {
    pub executor: Arc<dyn ProcessExecutor>,
    pub settings: Arc<dyn SettingsStore>,
    pub log: Arc<dyn OperationLog>,
}

impl BackendContext {
    pub fn new(
        executor: Arc<dyn ProcessExecutor>,
        settings: Arc<dyn SettingsStore>,
        log: Arc<dyn OperationLog>,
    ) -> Self {
        Self {
            executor,
            settings,
            log,
        }
    }
}

/// The contract one package manager backend fulfils.
///
/// Query methods return errors freely; the facade turns every error into an
/// empty result. Argument builders and verdict classifiers are pure with
/// respect to the process: they only look at the package, the options and a
/// finished invocation.
#[async_trait]
pub trait ManagerBackend: Send + Sync {
    fn properties(&self) -> &'static ManagerProperties;

    fn capabilities(&self) -> &'static ManagerCapabilities;

    fn runtime(&self) -> &BackendRuntime;

    fn sources(&self) -> &SourceRegistry;

    fn id(&self) -> ManagerId {
        self.properties().id
    }

    fn main_source(&self) -> ManagerSource {
        self.sources().main()
    }

    /// Locates the executable and captures its version.
    async fn load_status(&self) -> AdapterResult<ManagerStatus>;

    async fn find_packages(&self, query: &str) -> AdapterResult<Vec<Package>>;

    async fn list_installed(&self) -> AdapterResult<Vec<Package>>;

    async fn list_upgradable(&self) -> AdapterResult<Vec<Package>>;

    async fn package_details(&self, package: &Package) -> AdapterResult<PackageDetails>;

    async fn package_versions(&self, _package: &Package) -> AdapterResult<Vec<String>> {
        Err(CoreError::unsupported(self.id(), ManagerAction::Versions))
    }

    async fn refresh_indexes(&self) -> AdapterResult<()> {
        Ok(())
    }

    fn install_args(&self, package: &Package, options: &InstallationOptions) -> Vec<String>;

    fn update_args(&self, package: &Package, options: &InstallationOptions) -> Vec<String>;

    fn uninstall_args(&self, package: &Package, options: &InstallationOptions) -> Vec<String>;

    async fn classify_install(
        &self,
        package: &Package,
        options: &mut InstallationOptions,
        output: &InvocationOutput,
    ) -> OperationVerdict;

    async fn classify_update(
        &self,
        package: &Package,
        options: &mut InstallationOptions,
        output: &InvocationOutput,
    ) -> OperationVerdict {
        self.classify_install(package, options, output).await
    }

    async fn classify_uninstall(
        &self,
        package: &Package,
        options: &mut InstallationOptions,
        output: &InvocationOutput,
    ) -> OperationVerdict;

    /// Present only on backends that manage several repositories.
    fn multi_source(&self) -> Option<&dyn MultiSourceBackend> {
        None
    }
}

/// Repository management for backends that have more than one feed.
#[async_trait]
pub trait MultiSourceBackend: Send + Sync {
    /// Hard-coded fallback used when listing the real sources fails or hangs.
    fn known_sources(&self) -> Vec<ManagerSource>;

    async fn list_sources(&self) -> AdapterResult<Vec<ManagerSource>>;

    fn add_source_args(&self, source: &ManagerSource) -> Vec<String>;

    fn remove_source_args(&self, source: &ManagerSource) -> Vec<String>;

    fn classify_add_source(
        &self,
        _source: &ManagerSource,
        output: &InvocationOutput,
    ) -> OperationVerdict {
        exit_code_verdict(output)
    }

    fn classify_remove_source(
        &self,
        _source: &ManagerSource,
        output: &InvocationOutput,
    ) -> OperationVerdict {
        exit_code_verdict(output)
    }
}

/// Zero succeeds, anything else fails.
pub fn exit_code_verdict(output: &InvocationOutput) -> OperationVerdict {
    if output.succeeded() {
        OperationVerdict::Succeeded
    } else {
        OperationVerdict::Failed
    }
}

/// Flips elevation on and asks for a retry, unless the attempt already ran
/// elevated.
pub(crate) fn retry_elevated(options: &mut InstallationOptions) -> Option<OperationVerdict> {
    if options.run_as_administrator {
        return None;
    }
    options.run_as_administrator = true;
    Some(OperationVerdict::AutoRetry)
}
