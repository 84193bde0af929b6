use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinSet;

use crate::adapters::{BackendContext, ManagerBackend};
use crate::cache::{IdentityCache, PackageCaches};
use crate::models::{
    CoreError, CoreErrorKind, InstallationOptions, ManagerId, ManagerSource, OperationKind,
    Package, PackageDetails, PackageTag, SourceOperationKind,
};
use crate::orchestration::{OperationReport, OperationRunner, OrchestrationResult, PackageManager};
use crate::registry;

/// Quiet period a search waits for before it runs.
pub const SEARCH_DEBOUNCE: Duration = Duration::from_millis(300);

type Batch = (ManagerId, Vec<Package>);

/// Fans queries out to every ready manager and reconciles what comes back.
///
/// The identity caches are only written here, as each manager's task
/// completes, never from inside the tasks.
pub struct PackageAggregator {
    managers: Vec<Arc<PackageManager>>,
    caches: PackageCaches,
    runner: OperationRunner,
    current_query: Mutex<String>,
    debounce: Duration,
}

impl PackageAggregator {
    pub fn new(managers: impl IntoIterator<Item = Arc<PackageManager>>) -> Self {
        Self {
            managers: managers.into_iter().collect(),
            caches: PackageCaches::new(),
            runner: OperationRunner::new(),
            current_query: Mutex::new(String::new()),
            debounce: SEARCH_DEBOUNCE,
        }
    }

    pub fn from_backends(backends: impl IntoIterator<Item = Arc<dyn ManagerBackend>>) -> Self {
        Self::new(
            backends
                .into_iter()
                .map(|backend| Arc::new(PackageManager::new(backend))),
        )
    }

    /// Every known manager, built over one shared context.
    pub fn with_all_managers(context: &BackendContext) -> Self {
        Self::from_backends(registry::build_backends(context))
    }

    pub fn with_runner(mut self, runner: OperationRunner) -> Self {
        self.runner = runner;
        self
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    pub fn managers(&self) -> &[Arc<PackageManager>] {
        &self.managers
    }

    pub fn manager(&self, id: ManagerId) -> Option<&Arc<PackageManager>> {
        self.managers.iter().find(|manager| manager.id() == id)
    }

    pub fn require_manager(&self, id: ManagerId) -> OrchestrationResult<&Arc<PackageManager>> {
        self.manager(id).ok_or_else(|| CoreError {
            manager: Some(id),
            task: None,
            action: None,
            kind: CoreErrorKind::InvalidInput,
            message: format!("no manager is registered for '{id}'"),
        })
    }

    pub fn caches(&self) -> &PackageCaches {
        &self.caches
    }

    pub fn runner(&self) -> &OperationRunner {
        &self.runner
    }

    /// Initializes every manager concurrently.
    pub async fn initialize(&self) {
        let mut tasks = JoinSet::new();
        for manager in &self.managers {
            let manager = Arc::clone(manager);
            tasks.spawn(async move { manager.initialize().await });
        }
        while let Some(joined) = tasks.join_next().await {
            if let Err(error) = joined {
                tracing::error!(%error, "manager initialization task did not complete");
            }
        }
    }

    fn spawn_ready<F, Fut>(&self, call: F) -> JoinSet<Batch>
    where
        F: Fn(Arc<PackageManager>) -> Fut,
        Fut: Future<Output = Vec<Package>> + Send + 'static,
    {
        let mut tasks = JoinSet::new();
        for manager in self.managers.iter().filter(|manager| manager.is_ready()) {
            let id = manager.id();
            let call = call(Arc::clone(manager));
            tasks.spawn(async move { (id, call.await) });
        }
        tasks
    }

    /// Awaits every task, reconciling each batch into `cache` as it lands.
    /// Returns `None` as soon as `still_current` says the results went stale.
    async fn collect<C, B>(
        &self,
        mut tasks: JoinSet<Batch>,
        cache: &IdentityCache,
        still_current: C,
        mut on_batch: B,
    ) -> Option<Vec<Arc<Package>>>
    where
        C: Fn() -> bool + Send,
        B: FnMut(ManagerId, &[Arc<Package>]) + Send,
    {
        let mut merged = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            let (manager, batch) = match joined {
                Ok(batch) => batch,
                Err(error) => {
                    tracing::error!(%error, "manager task did not complete");
                    continue;
                }
            };
            if !still_current() {
                tracing::debug!(manager = ?manager, "dropping stale results");
                return None;
            }
            let reconciled = cache.reconcile(batch);
            on_batch(manager, &reconciled);
            merged.extend(reconciled);
        }
        sort_packages(&mut merged);
        Some(merged)
    }

    fn is_current_query(&self, query: &str) -> bool {
        *self
            .current_query
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            == query
    }

    /// Debounced search across every ready manager. `None` means a newer
    /// query superseded this one and its results were dropped.
    pub async fn search(&self, query: &str) -> Option<Vec<Arc<Package>>> {
        self.search_streaming(query, |_, _| {}).await
    }

    /// Like `search`, handing each manager's batch to `on_batch` as soon as it
    /// is reconciled.
    pub async fn search_streaming<B>(&self, query: &str, on_batch: B) -> Option<Vec<Arc<Package>>>
    where
        B: FnMut(ManagerId, &[Arc<Package>]) + Send,
    {
        let query = query.trim().to_string();
        *self
            .current_query
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = query.clone();

        if !self.debounce.is_zero() {
            tokio::time::sleep(self.debounce).await;
        }
        if !self.is_current_query(&query) {
            return None;
        }
        if query.is_empty() {
            return Some(Vec::new());
        }

        let tasks = self.spawn_ready(|manager| {
            let query = query.clone();
            async move { manager.find_packages(&query).await }
        });
        let found = self
            .collect(
                tasks,
                &self.caches.available,
                || self.is_current_query(&query),
                on_batch,
            )
            .await?;

        for package in &found {
            if self.caches.installed.contains(package) && package.tag() == PackageTag::Default {
                package.set_tag(PackageTag::AlreadyInstalled);
            }
        }
        Some(found)
    }

    pub async fn installed(&self) -> Vec<Arc<Package>> {
        let tasks = self.spawn_ready(|manager| async move { manager.installed_packages().await });
        let installed = self
            .collect(tasks, &self.caches.installed, || true, |_, _| {})
            .await
            .unwrap_or_default();

        for package in &installed {
            if self.caches.upgradable.contains(package) && package.tag() == PackageTag::Default {
                package.set_tag(PackageTag::Upgradable);
            }
        }
        installed
    }

    /// Forgets every installed instance, then lists again.
    pub async fn reload_installed(&self) -> Vec<Arc<Package>> {
        self.caches.installed.clear();
        self.installed().await
    }

    pub async fn upgradable(&self) -> Vec<Arc<Package>> {
        let tasks = self.spawn_ready(|manager| async move { manager.upgradable_packages().await });
        let upgradable = self
            .collect(tasks, &self.caches.upgradable, || true, |_, _| {})
            .await
            .unwrap_or_default();

        for package in &upgradable {
            if let Some(installed) = self.caches.installed.get(&package.identity())
                && installed.tag() == PackageTag::Default
            {
                installed.set_tag(PackageTag::Upgradable);
            }
        }
        upgradable
    }

    pub async fn details(&self, package: &Package) -> PackageDetails {
        match self.manager(package.manager()) {
            Some(manager) => manager.package_details(package).await,
            None => PackageDetails::for_package(package),
        }
    }

    pub async fn versions(&self, package: &Package) -> Vec<String> {
        match self.manager(package.manager()) {
            Some(manager) => manager.package_versions(package).await,
            None => Vec::new(),
        }
    }

    pub async fn refresh_indexes(&self) {
        let mut tasks = JoinSet::new();
        for manager in self.managers.iter().filter(|manager| manager.is_ready()) {
            let manager = Arc::clone(manager);
            tasks.spawn(async move { manager.refresh_indexes().await });
        }
        while tasks.join_next().await.is_some() {}
    }

    /// Runs `kind` with `options`, or with the options remembered for the
    /// package, then brings the caches in line with the outcome.
    pub async fn run_operation(
        &self,
        kind: OperationKind,
        package: &Arc<Package>,
        options: Option<InstallationOptions>,
    ) -> OperationReport {
        let options = options
            .unwrap_or_else(|| self.runner.stored_options(package.manager(), &package.id));
        let Some(manager) = self.manager(package.manager()) else {
            tracing::warn!(manager = ?package.manager(), "no manager registered for package");
            return OperationReport::skipped(options);
        };

        let report = self.runner.run(manager, kind, package, options).await;
        if report.succeeded() {
            let identity = package.identity();
            match kind {
                OperationKind::Install => {}
                OperationKind::Update => {
                    self.caches.upgradable.remove(&identity);
                    if let Some(installed) = self.caches.installed.get(&identity)
                        && installed.tag() == PackageTag::Upgradable
                    {
                        installed.set_tag(PackageTag::Default);
                    }
                }
                OperationKind::Uninstall => {
                    self.caches.installed.remove(&identity);
                    self.caches.upgradable.remove(&identity);
                    if let Some(available) = self.caches.available.get(&identity) {
                        available.set_tag(PackageTag::Default);
                    }
                }
            }
        }
        report
    }

    pub async fn install(
        &self,
        package: &Arc<Package>,
        options: Option<InstallationOptions>,
    ) -> OperationReport {
        self.run_operation(OperationKind::Install, package, options)
            .await
    }

    pub async fn update(
        &self,
        package: &Arc<Package>,
        options: Option<InstallationOptions>,
    ) -> OperationReport {
        self.run_operation(OperationKind::Update, package, options)
            .await
    }

    pub async fn uninstall(
        &self,
        package: &Arc<Package>,
        options: Option<InstallationOptions>,
    ) -> OperationReport {
        self.run_operation(OperationKind::Uninstall, package, options)
            .await
    }

    pub async fn change_source(
        &self,
        kind: SourceOperationKind,
        source: &ManagerSource,
    ) -> OperationReport {
        match self.manager(source.manager) {
            Some(manager) => self.runner.run_source(manager, kind, source).await,
            None => OperationReport::skipped(InstallationOptions::default()),
        }
    }
}

/// Final presentation order: name, then id, then manager.
pub fn sort_packages(packages: &mut [Arc<Package>]) {
    packages.sort_by(|left, right| {
        left.name
            .cmp(&right.name)
            .then_with(|| left.id.cmp(&right.id))
            .then_with(|| left.manager().cmp(&right.manager()))
    });
}
