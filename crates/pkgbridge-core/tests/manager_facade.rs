mod support;

use std::sync::Arc;
use std::time::Duration;

use pkgbridge_core::adapters::{ChocolateyBackend, ManagerBackend, WingetBackend};
use pkgbridge_core::logging::LogLevel;
use pkgbridge_core::models::{
    ManagerAction, ManagerId, ManagerSource, OperationVerdict, Package, PackageScope,
    SourceOperationKind,
};
use pkgbridge_core::orchestration::{OperationRunner, PackageAggregator, PackageManager};

use support::{Harness, Reply, ScriptedExecutor, winget_table};

const WINGET_SOURCES: &str = "\
Name    Argument                                      Explicit
---------------------------------------------------------------
winget  https://cdn.winget.microsoft.com/cache        false
msstore https://storeedgefd.dsx.mp.microsoft.com/v9.0 false
company https://packages.example.com/winget           true
";

fn winget(harness: &Harness) -> PackageManager {
    PackageManager::new(Arc::new(WingetBackend::new(harness.context())))
}

#[tokio::test]
async fn failing_backend_degrades_to_empty_results() {
    let harness = Harness::new(
        ScriptedExecutor::new()
            .found(ManagerId::Winget)
            .on(ManagerId::Winget, ManagerAction::ListSources, Reply::ok(WINGET_SOURCES))
            .on(ManagerId::Winget, ManagerAction::Search, Reply::spawn_failure("winget.exe vanished"))
            .on(ManagerId::Winget, ManagerAction::ListInstalled, Reply::spawn_failure("winget.exe vanished"))
            .on(ManagerId::Winget, ManagerAction::ListOutdated, Reply::spawn_failure("winget.exe vanished")),
    );
    let manager = winget(&harness);
    manager.initialize().await;

    assert!(manager.find_packages("firefox").await.is_empty());
    assert!(manager.installed_packages().await.is_empty());
    assert!(manager.upgradable_packages().await.is_empty());

    let errors = harness.log.diagnostics_at_least(LogLevel::Error);
    assert_eq!(errors.len(), 3);
    assert!(errors.iter().all(|line| line.contains("winget.exe vanished")));
}

#[tokio::test]
async fn one_failing_manager_does_not_blank_the_others() {
    let harness = Harness::new(
        ScriptedExecutor::new()
            .found(ManagerId::Winget)
            .found(ManagerId::Chocolatey)
            .on(ManagerId::Winget, ManagerAction::ListInstalled, Reply::spawn_failure("broken pipe"))
            .on(ManagerId::Chocolatey, ManagerAction::ListInstalled, Reply::ok("git 2.43.0\nvlc 3.0.20\n")),
    );
    let context = harness.context();
    let aggregator = PackageAggregator::from_backends([
        Arc::new(WingetBackend::new(context.clone())) as Arc<dyn ManagerBackend>,
        Arc::new(ChocolateyBackend::new(context)),
    ]);
    aggregator.initialize().await;

    let installed = aggregator.installed().await;

    assert_eq!(installed.len(), 2);
    assert!(installed.iter().all(|package| package.manager() == ManagerId::Chocolatey));
}

#[tokio::test]
async fn every_invocation_leaves_exactly_one_record() {
    let listing = winget_table(&[("Mozilla Firefox", "Mozilla.Firefox", "119.0", "winget")]);
    let harness = Harness::new(
        ScriptedExecutor::new()
            .found(ManagerId::Winget)
            .on(ManagerId::Winget, ManagerAction::ListSources, Reply::ok(WINGET_SOURCES))
            .on(ManagerId::Winget, ManagerAction::ListInstalled, Reply::ok(&listing))
            .on(ManagerId::Winget, ManagerAction::Search, Reply::spawn_failure("no such file")),
    );
    let manager = winget(&harness);
    manager.initialize().await;
    manager.installed_packages().await;
    manager.find_packages("firefox").await;

    let records = harness.log.operations_for(ManagerId::Winget);
    assert_eq!(records.len(), harness.executor.requests().len());
    assert_eq!(records.len(), 4);

    let listing_record = &records[2];
    assert!(listing_record.command_line.contains("list"));
    assert_eq!(listing_record.exit_code, Some(0));
    assert!(listing_record.output.contains("Mozilla.Firefox"));

    let failed_record = &records[3];
    assert_eq!(failed_record.exit_code, None);
    assert!(failed_record.output.contains("no such file"));
}

#[tokio::test]
async fn missing_executable_makes_the_manager_unavailable() {
    let harness = Harness::new(ScriptedExecutor::new());
    let manager = winget(&harness);
    manager.initialize().await;

    assert!(manager.is_enabled());
    assert!(!manager.is_ready());
    assert!(!manager.status().found);
    assert!(manager.find_packages("firefox").await.is_empty());
    assert_eq!(
        harness
            .executor
            .requests_for(ManagerId::Winget, ManagerAction::Search)
            .len(),
        0
    );

    let warnings = harness.log.diagnostics_at_least(LogLevel::Warn);
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].contains("winget.exe was not found"));
}

#[tokio::test]
async fn disabled_manager_skips_detection() {
    let harness = Harness::new(ScriptedExecutor::new().found(ManagerId::Chocolatey));
    harness.settings.set_bool("DisableChocolatey", true);
    let manager = PackageManager::new(Arc::new(ChocolateyBackend::new(harness.context())));
    manager.initialize().await;

    assert!(!manager.is_enabled());
    assert!(!manager.is_ready());
    assert!(harness.executor.requests().is_empty());
    assert!(
        harness
            .log
            .diagnostics()
            .iter()
            .any(|(level, line)| *level == LogLevel::Info && line.contains("disabled"))
    );
}

#[tokio::test]
async fn detection_reports_the_version() {
    let harness = Harness::new(ScriptedExecutor::new().on(
        ManagerId::Winget,
        ManagerAction::Detect,
        Reply::ok("v1.7.10861\n"),
    ));
    let manager = winget(&harness);
    manager.initialize().await;

    let status = manager.status();
    assert!(status.found);
    assert_eq!(status.version.as_deref(), Some("v1.7.10861"));
    assert!(status.executable_path.is_some());
}

#[tokio::test]
async fn listed_sources_feed_the_registry() {
    let harness = Harness::new(
        ScriptedExecutor::new()
            .found(ManagerId::Winget)
            .on(ManagerId::Winget, ManagerAction::ListSources, Reply::ok(WINGET_SOURCES)),
    );
    let manager = winget(&harness);
    manager.initialize().await;

    let names: Vec<String> = manager.sources().into_iter().map(|source| source.name).collect();
    assert_eq!(names, vec!["winget", "msstore", "company"]);
    assert_eq!(
        manager.backend().sources().get_if_exists("company").map(|source| source.url),
        Some("https://packages.example.com/winget".to_string())
    );
}

#[tokio::test]
async fn failed_source_listing_falls_back_to_known_sources() {
    let harness = Harness::new(
        ScriptedExecutor::new().found(ManagerId::Winget).on(
            ManagerId::Winget,
            ManagerAction::ListSources,
            Reply::exit(1, "", "Failed when opening source(s)"),
        ),
    );
    let manager = winget(&harness);
    manager.initialize().await;

    let names: Vec<String> = manager.sources().into_iter().map(|source| source.name).collect();
    assert_eq!(names, vec!["winget", "msstore"]);
    let errors = harness.log.diagnostics_at_least(LogLevel::Error);
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("Failed when opening source(s)"));
}

#[tokio::test(start_paused = true)]
async fn hung_source_listing_falls_back_to_known_sources() {
    let harness = Harness::new(
        ScriptedExecutor::new().found(ManagerId::Winget).on(
            ManagerId::Winget,
            ManagerAction::ListSources,
            Reply::ok(WINGET_SOURCES).delayed(Duration::from_secs(120)),
        ),
    );
    let manager = winget(&harness);
    let started = tokio::time::Instant::now();
    manager.initialize().await;

    assert!(started.elapsed() < Duration::from_secs(120));
    assert!(manager.is_ready());
    let names: Vec<String> = manager.sources().into_iter().map(|source| source.name).collect();
    assert_eq!(names, vec!["winget", "msstore"]);
    assert!(
        harness
            .log
            .diagnostics_at_least(LogLevel::Warn)
            .iter()
            .any(|line| line.contains("timed out"))
    );
}

#[tokio::test]
async fn details_fall_back_to_the_identity() {
    let harness = Harness::new(
        ScriptedExecutor::new()
            .found(ManagerId::Winget)
            .on(ManagerId::Winget, ManagerAction::Details, Reply::spawn_failure("gone")),
    );
    let manager = winget(&harness);
    manager.initialize().await;
    let package = Package::new(
        "Mozilla Firefox",
        "Mozilla.Firefox",
        "119.0",
        manager.main_source(),
        PackageScope::User,
    );

    let details = manager.package_details(&package).await;

    assert!(details.is_identity_only());
    assert_eq!(details.id, "Mozilla.Firefox");
    assert_eq!(details.source_name, "winget");
}

#[tokio::test]
async fn source_changes_run_elevated_and_update_the_list() {
    let harness = Harness::new(
        ScriptedExecutor::new()
            .found(ManagerId::Winget)
            .on(ManagerId::Winget, ManagerAction::ListSources, Reply::ok(WINGET_SOURCES))
            .on(ManagerId::Winget, ManagerAction::AddSource, Reply::ok("Done"))
            .on(ManagerId::Winget, ManagerAction::RemoveSource, Reply::ok("Done")),
    );
    let manager = winget(&harness);
    manager.initialize().await;
    let runner = OperationRunner::new();
    let extra = ManagerSource::new(ManagerId::Winget, "mirror", "https://mirror.example.com/winget");

    let added = runner.run_source(&manager, SourceOperationKind::Add, &extra).await;
    assert_eq!(added.verdict, OperationVerdict::Succeeded);
    assert!(manager.sources().contains(&extra));

    let removed = runner
        .run_source(&manager, SourceOperationKind::Remove, &extra)
        .await;
    assert_eq!(removed.verdict, OperationVerdict::Succeeded);
    assert!(!manager.sources().contains(&extra));
    assert!(manager.backend().sources().get_if_exists("mirror").is_none());

    let add_request = &harness
        .executor
        .requests_for(ManagerId::Winget, ManagerAction::AddSource)[0];
    assert!(add_request.requires_elevation);
    assert!(add_request.command.args.contains(&"https://mirror.example.com/winget".to_string()));
}

#[tokio::test]
async fn failed_source_change_leaves_the_list_alone() {
    let harness = Harness::new(
        ScriptedExecutor::new()
            .found(ManagerId::Chocolatey)
            .on(ManagerId::Chocolatey, ManagerAction::AddSource, Reply::exit(1, "", "source exists")),
    );
    let manager = PackageManager::new(Arc::new(ChocolateyBackend::new(harness.context())));
    manager.initialize().await;
    let before = manager.sources();
    let extra = ManagerSource::new(ManagerId::Chocolatey, "internal", "https://nuget.example.com/");

    let report = OperationRunner::new()
        .run_source(&manager, SourceOperationKind::Add, &extra)
        .await;

    assert_eq!(report.verdict, OperationVerdict::Failed);
    assert_eq!(report.attempts, 1);
    assert_eq!(manager.sources(), before);
}
