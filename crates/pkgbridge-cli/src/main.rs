mod cli;
mod output;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use pkgbridge_core::adapters::BackendContext;
use pkgbridge_core::execution::TokioProcessExecutor;
use pkgbridge_core::logging::{TracingOperationLog, init_tracing};
use pkgbridge_core::models::{
    CoreError, ManagerId, ManagerSource, OperationKind, Package, PackageScope,
    SourceOperationKind,
};
use pkgbridge_core::orchestration::{OperationRunner, PackageAggregator, PackageManager};
use pkgbridge_core::parsing::format_as_name;
use pkgbridge_core::registry::{self, ManagerDescriptor};
use pkgbridge_core::sqlite::SqliteStore;

use crate::cli::{Cli, Command, OperationArgs, SourceAction};

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("unknown manager '{0}'")]
    UnknownManager(String),

    #[error("{manager} is not available (disabled or not found)")]
    ManagerUnavailable { manager: &'static str },

    #[error("{manager} has no {what} package '{id}'")]
    PackageNotFound {
        manager: &'static str,
        what: &'static str,
        id: String,
    },

    #[error("{0} does not manage sources")]
    NoSources(&'static str),

    #[error("operation failed")]
    OperationFailed,

    #[error("could not write output: {0}")]
    Output(#[from] serde_json::Error),
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("error: {error}");
            ExitCode::FAILURE
        }
    }
}

fn default_elevator() -> PathBuf {
    PathBuf::from(if cfg!(windows) { "gsudo" } else { "sudo" })
}

fn descriptor(name: &str) -> Result<&'static ManagerDescriptor, CliError> {
    registry::find_manager(name).ok_or_else(|| CliError::UnknownManager(name.to_string()))
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let store = Arc::new(SqliteStore::new(&cli.database));
    store.migrate_to_latest()?;

    // Settings commands never touch a manager.
    match &cli.command {
        Command::Disable { manager } | Command::Enable { manager } => {
            let descriptor = descriptor(manager)?;
            let disabled = matches!(cli.command, Command::Disable { .. });
            store.set_setting(
                &descriptor.properties.disable_setting_key(),
                if disabled { "true" } else { "false" },
            )?;
            println!(
                "{} {}",
                descriptor.display_name(),
                if disabled { "disabled" } else { "enabled" }
            );
            return Ok(());
        }
        _ => {}
    }

    let executor = TokioProcessExecutor::with_elevator(
        cli.elevator.clone().unwrap_or_else(default_elevator),
    );
    let context = BackendContext::new(
        Arc::new(executor),
        store.clone(),
        Arc::new(TracingOperationLog),
    );
    let aggregator = PackageAggregator::with_all_managers(&context)
        .with_runner(OperationRunner::with_options_store(store))
        .with_debounce(Duration::ZERO);
    aggregator.initialize().await;
    tracing::debug!(database = %cli.database.display(), "managers initialized");

    let json = cli.json;
    match cli.command {
        Command::Search { query } => {
            let found = aggregator.search(&query).await.unwrap_or_default();
            output::packages(&found, json)
        }
        Command::List => {
            aggregator.upgradable().await;
            output::packages(&aggregator.installed().await, json)
        }
        Command::Updates => output::packages(&aggregator.upgradable().await, json),
        Command::Install(args) => operate(&aggregator, OperationKind::Install, args).await,
        Command::Update(args) => operate(&aggregator, OperationKind::Update, args).await,
        Command::Uninstall(args) => operate(&aggregator, OperationKind::Uninstall, args).await,
        Command::Show { manager, id } => {
            let manager = ready_manager(&aggregator, &manager)?;
            let package = find_available(&aggregator, manager, &id).await;
            output::details(&aggregator.details(&package).await, json)
        }
        Command::Sources { manager, action } => {
            let manager = ready_manager(&aggregator, &manager)?;
            if !manager.supports_sources() {
                return Err(CliError::NoSources(manager.properties().name));
            }
            match action {
                None => output::sources(&manager.sources(), json),
                Some(action) => {
                    let (kind, source) = match action {
                        SourceAction::Add { name, url } => (
                            SourceOperationKind::Add,
                            ManagerSource::new(manager.id(), name, url),
                        ),
                        SourceAction::Remove { name } => {
                            let source = manager
                                .sources()
                                .into_iter()
                                .find(|source| source.name == name)
                                .unwrap_or_else(|| ManagerSource::new(manager.id(), name, ""));
                            (SourceOperationKind::Remove, source)
                        }
                    };
                    let report = aggregator.change_source(kind, &source).await;
                    output::report(&format!("{kind:?} source {}", source.name), &report);
                    if report.succeeded() {
                        Ok(())
                    } else {
                        Err(CliError::OperationFailed)
                    }
                }
            }
        }
        Command::Managers => output::managers(aggregator.managers(), json),
        Command::Disable { .. } | Command::Enable { .. } => Ok(()),
    }
}

fn ready_manager<'a>(
    aggregator: &'a PackageAggregator,
    name: &str,
) -> Result<&'a Arc<PackageManager>, CliError> {
    let descriptor = descriptor(name)?;
    let manager = aggregator.require_manager(descriptor.id)?;
    if !manager.is_ready() {
        return Err(CliError::ManagerUnavailable {
            manager: descriptor.display_name(),
        });
    }
    Ok(manager)
}

/// The search result with this exact id, or a bare package on the main source.
async fn find_available(
    aggregator: &PackageAggregator,
    manager: &PackageManager,
    id: &str,
) -> Arc<Package> {
    let exact = manager
        .find_packages(id)
        .await
        .into_iter()
        .find(|package| package.id.eq_ignore_ascii_case(id));
    let package = exact.unwrap_or_else(|| {
        Package::new(
            format_as_name(id),
            id,
            "",
            manager.main_source(),
            PackageScope::User,
        )
    });
    aggregator.caches().available.reconcile_one(package)
}

fn find_listed(
    packages: Vec<Arc<Package>>,
    manager: ManagerId,
    id: &str,
) -> Option<Arc<Package>> {
    packages
        .into_iter()
        .find(|package| package.manager() == manager && package.id.eq_ignore_ascii_case(id))
}

async fn operate(
    aggregator: &PackageAggregator,
    kind: OperationKind,
    args: OperationArgs,
) -> Result<(), CliError> {
    let manager = ready_manager(aggregator, &args.manager)?;
    let name = manager.properties().name;

    let package = match kind {
        OperationKind::Install => find_available(aggregator, manager, &args.id).await,
        OperationKind::Update => find_listed(aggregator.upgradable().await, manager.id(), &args.id)
            .ok_or_else(|| CliError::PackageNotFound {
                manager: name,
                what: "upgradable",
                id: args.id.clone(),
            })?,
        OperationKind::Uninstall => {
            find_listed(aggregator.installed().await, manager.id(), &args.id).ok_or_else(|| {
                CliError::PackageNotFound {
                    manager: name,
                    what: "installed",
                    id: args.id.clone(),
                }
            })?
        }
    };

    let report = aggregator
        .run_operation(kind, &package, args.options.to_options())
        .await;
    output::report(&format!("{kind:?} of {}", package.id), &report);
    if report.succeeded() {
        Ok(())
    } else {
        Err(CliError::OperationFailed)
    }
}
