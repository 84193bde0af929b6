use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;

use crate::adapters::manager::{
    AdapterResult, BackendContext, ManagerBackend, MultiSourceBackend, retry_elevated,
};
use crate::adapters::process_utils::BackendRuntime;
use crate::adapters::sources::SourceRegistry;
use crate::execution::{CommandSpec, InvocationOutput, ProcessSpawnRequest};
use crate::logging::LogLevel;
use crate::models::{
    Architecture, CoreError, CoreErrorKind, InstallationOptions, ManagerAction,
    ManagerCapabilities, ManagerId, ManagerProperties, ManagerSource, ManagerStatus,
    OperationVerdict, Package, PackageDetails, PackageScope, SourceCapabilities,
};
use crate::parsing::{HeaderTable, LineParser, NoiseFilter, format_as_name, split_whitespace};

pub const SCOOP_PROPERTIES: ManagerProperties = ManagerProperties {
    id: ManagerId::Scoop,
    name: "Scoop",
    description: "Great repository of unknown but useful utilities and other interesting packages.",
    executable_friendly_name: "scoop",
    executable_call_args: &["-NoProfile", "-ExecutionPolicy", "Bypass", "-Command", "scoop"],
    install_verb: "install",
    update_verb: "update",
    uninstall_verb: "uninstall",
};

pub const SCOOP_CAPABILITIES: ManagerCapabilities = ManagerCapabilities {
    can_run_as_admin: true,
    can_skip_integrity_checks: true,
    can_remove_data_on_uninstall: true,
    supports_custom_architectures: true,
    supported_architectures: &[Architecture::X86, Architecture::X64, Architecture::Arm64],
    supports_custom_scopes: true,
    supports_custom_sources: true,
    sources: SourceCapabilities {
        knows_package_count: true,
        knows_update_date: true,
        must_be_installed_as_admin: false,
    },
    ..ManagerCapabilities::NONE
};

/// Scoop is a PowerShell script; it always runs through a PowerShell host.
const SCOOP_CANDIDATES: &[&str] = &["powershell.exe", "pwsh.exe"];
const SCOOP_SEARCH_PROGRAM: &str = "scoop-search";

const SCOOP_NOISE: NoiseFilter = NoiseFilter::new(
    &["No"],
    &["Matches", "Install", "failed", "failed,", "Manifest", "removed", "removed,"],
);

const MAIN_BUCKET_NAME: &str = "main";
const MAIN_BUCKET_URL: &str = "https://github.com/ScoopInstaller/Main";
const UNKNOWN_BUCKET_URL: &str = "https://scoop.sh/";

const KNOWN_BUCKETS: &[(&str, &str)] = &[
    ("main", "https://github.com/ScoopInstaller/Main"),
    ("extras", "https://github.com/ScoopInstaller/Extras"),
    ("versions", "https://github.com/ScoopInstaller/Versions"),
    ("nirsoft", "https://github.com/kodybrown/scoop-nirsoft"),
    ("sysinternals", "https://github.com/niheaven/scoop-sysinternals"),
    ("php", "https://github.com/ScoopInstaller/PHP"),
    ("nerd-fonts", "https://github.com/matthewjberger/scoop-nerd-fonts"),
    ("nonportable", "https://github.com/ScoopInstaller/Nonportable"),
    ("java", "https://github.com/ScoopInstaller/Java"),
    ("games", "https://github.com/Calinou/scoop-games"),
];

const GLOBAL_INSTALL_MARKER: &str = "Global install";
const GLOBAL_RETRY_MARKER: &str = "Try again with the --global (or -g) flag instead";
const ADMIN_MARKERS: &[&str] = &[
    "requires admin rights",
    "requires administrator rights",
    "you need admin rights to install global apps",
];
const INSTALL_SUCCESS_MARKERS: &[&str] = &[
    "Latest versions for all apps are installed",
    "is already installed",
    "was installed successfully",
];
const UNINSTALL_SUCCESS_MARKER: &str = "was uninstalled";

pub fn scoop_main_source() -> ManagerSource {
    ManagerSource::new(ManagerId::Scoop, MAIN_BUCKET_NAME, MAIN_BUCKET_URL)
}

pub fn scoop_known_sources() -> Vec<ManagerSource> {
    KNOWN_BUCKETS
        .iter()
        .map(|(name, url)| ManagerSource::new(ManagerId::Scoop, *name, *url))
        .collect()
}

fn scoop_request(
    base: CommandSpec,
    action: ManagerAction,
    args: impl IntoIterator<Item = impl Into<String>>,
) -> ProcessSpawnRequest {
    ProcessSpawnRequest::new(ManagerId::Scoop, action, base.args(args))
}

/// `scoop-search` is a standalone binary, not a scoop subcommand.
pub fn scoop_search_request(query: &str) -> ProcessSpawnRequest {
    scoop_request(
        CommandSpec::new(SCOOP_SEARCH_PROGRAM),
        ManagerAction::Search,
        [query],
    )
}

pub fn scoop_list_request(base: CommandSpec) -> ProcessSpawnRequest {
    scoop_request(base, ManagerAction::ListInstalled, ["list"])
}

pub fn scoop_status_request(base: CommandSpec) -> ProcessSpawnRequest {
    scoop_request(base, ManagerAction::ListOutdated, ["status"])
}

pub fn scoop_refresh_request(base: CommandSpec) -> ProcessSpawnRequest {
    scoop_request(base, ManagerAction::Refresh, ["update"])
}

pub fn scoop_manifest_request(base: CommandSpec, package: &Package) -> ProcessSpawnRequest {
    scoop_request(base, ManagerAction::Details, ["cat".to_string(), scoop_target(package)])
}

pub fn scoop_bucket_list_request(base: CommandSpec) -> ProcessSpawnRequest {
    scoop_request(base, ManagerAction::ListSources, ["bucket", "list"])
}

/// `bucket/id`, or the bare id when the bucket column was a truncated path.
pub fn scoop_target(package: &Package) -> String {
    if package.source.name.contains("...") || package.source.name.contains('…') {
        package.id.clone()
    } else {
        format!("{}/{}", package.source.name, package.id)
    }
}

/// Reads `scoop-search`: a `'bucket' bucket:` line switches the current
/// source, indented `id (version)` rows follow.
pub struct ScoopSearchParser<'a> {
    sources: &'a SourceRegistry,
    current: ManagerSource,
    packages: Vec<Package>,
}

impl<'a> ScoopSearchParser<'a> {
    pub fn new(sources: &'a SourceRegistry) -> Self {
        Self {
            sources,
            current: sources.main(),
            packages: Vec::new(),
        }
    }
}

impl LineParser for ScoopSearchParser<'_> {
    type Output = Vec<Package>;

    fn push(&mut self, line: &str) {
        if line.starts_with('\'') {
            let bucket = line.split(' ').next().unwrap_or_default().replace('\'', "");
            self.current = self.sources.get_or_default(&bucket);
            return;
        }

        let cells: Vec<&str> = line.trim().split(' ').map(str::trim).collect();
        let [id, version, ..] = cells.as_slice() else {
            return;
        };
        if SCOOP_NOISE.rejects(id, version) {
            return;
        }
        self.packages.push(Package::new(
            format_as_name(id),
            *id,
            version.replace(['(', ')'], ""),
            self.current.clone(),
            PackageScope::User,
        ));
    }

    fn finish(self) -> Vec<Package> {
        self.packages
    }
}

/// Reads `scoop list`: `id version bucket [updated] [info]` after the dashes.
pub struct ScoopListParser<'a> {
    sources: &'a SourceRegistry,
    table: HeaderTable,
    packages: Vec<Package>,
}

impl<'a> ScoopListParser<'a> {
    pub fn new(sources: &'a SourceRegistry) -> Self {
        Self {
            sources,
            table: HeaderTable::new(),
            packages: Vec::new(),
        }
    }
}

impl LineParser for ScoopListParser<'_> {
    type Output = Vec<Package>;

    fn push(&mut self, line: &str) {
        let Some(row) = self.table.push(line) else {
            return;
        };
        let cells = split_whitespace(row.line());
        let [id, version, bucket, ..] = cells.as_slice() else {
            return;
        };
        if SCOOP_NOISE.rejects(id, version) {
            return;
        }

        let scope = if row.line().contains(GLOBAL_INSTALL_MARKER) {
            PackageScope::Global
        } else {
            PackageScope::User
        };
        self.packages.push(Package::new(
            format_as_name(id),
            *id,
            *version,
            self.sources.get_or_default(bucket),
            scope,
        ));
    }

    fn finish(self) -> Vec<Package> {
        self.packages
    }
}

/// Reads `scoop status`. Its rows carry no bucket, so each one is matched
/// against the installed package with the same id and version and inherits
/// that package's source and scope.
pub struct ScoopStatusParser {
    installed: HashMap<String, Package>,
    table: HeaderTable,
    packages: Vec<Package>,
    unmatched: Vec<String>,
}

impl ScoopStatusParser {
    pub fn new(installed: Vec<Package>) -> Self {
        let mut by_version = HashMap::new();
        for package in installed {
            by_version
                .entry(format!("{}.{}", package.id, package.version))
                .or_insert(package);
        }
        Self {
            installed: by_version,
            table: HeaderTable::new(),
            packages: Vec::new(),
            unmatched: Vec::new(),
        }
    }
}

impl LineParser for ScoopStatusParser {
    /// Upgradable packages, plus the ids that had no installed counterpart.
    type Output = (Vec<Package>, Vec<String>);

    fn push(&mut self, line: &str) {
        let Some(row) = self.table.push(line) else {
            return;
        };
        let cells = split_whitespace(row.line());
        let [id, version, new_version, ..] = cells.as_slice() else {
            return;
        };
        if SCOOP_NOISE.rejects(id, version) || SCOOP_NOISE.false_versions.contains(new_version) {
            return;
        }

        match self.installed.get(&format!("{id}.{version}")) {
            Some(installed) => self.packages.push(Package::upgradable(
                format_as_name(id),
                *id,
                *version,
                *new_version,
                installed.source.clone(),
                installed.scope,
            )),
            None => self.unmatched.push(id.to_string()),
        }
    }

    fn finish(self) -> (Vec<Package>, Vec<String>) {
        (self.packages, self.unmatched)
    }
}

/// Reads `scoop bucket list`. A bucket added from a local path reports the
/// generic scoop url.
pub fn parse_scoop_buckets(lines: &[String]) -> Vec<ManagerSource> {
    let mut table = HeaderTable::new();
    let mut buckets = Vec::new();
    for line in lines {
        let Some(row) = table.push(line) else {
            continue;
        };
        let cleaned = row.line().replace(" AM", "").replace(" PM", "");
        let cells = split_whitespace(&cleaned);
        let [name, url, date, time, count, ..] = cells.as_slice() else {
            continue;
        };
        let url = if url.starts_with("https://") {
            *url
        } else {
            UNKNOWN_BUCKET_URL
        };
        let mut source = ManagerSource::new(ManagerId::Scoop, *name, url);
        source.package_count = count.parse().ok();
        source.update_date = Some(format!("{date} {time}"));
        buckets.push(source);
    }
    buckets
}

/// Details from the JSON manifest printed by `scoop cat`.
pub fn parse_scoop_manifest(package: &Package, raw: &str) -> AdapterResult<PackageDetails> {
    let manifest: Value = serde_json::from_str(raw).map_err(|error| {
        CoreError::for_action(
            ManagerId::Scoop,
            ManagerAction::Details,
            CoreErrorKind::ParseFailure,
            format!("invalid scoop manifest for {}: {error}", package.id),
        )
    })?;

    let mut details = PackageDetails::for_package(package);
    details.manifest_url = scoop_manifest_url(package);
    details.description = text_or_lines(manifest.get("description"));
    details.release_notes = text_or_lines(manifest.get("notes"));

    if let Some(homepage) = manifest.get("homepage").and_then(Value::as_str) {
        details.homepage_url = Some(homepage.to_string());
        details.author = homepage_author(homepage);
    }

    match manifest.get("license") {
        Some(Value::Object(license)) => {
            details.license = license.get("identifier").and_then(Value::as_str).map(str::to_owned);
            details.license_url = license.get("url").and_then(Value::as_str).map(str::to_owned);
        }
        Some(Value::String(license)) => details.license = Some(license.clone()),
        _ => {}
    }

    if manifest.get("url").is_some() {
        details.installer_url = first_string(manifest.get("url"));
        details.installer_hash = first_string(manifest.get("hash"));
    } else if let Some(Value::Object(architectures)) = manifest.get("architecture") {
        let installer = architectures
            .get("64bit")
            .or_else(|| architectures.values().next());
        if let Some(installer) = installer {
            details.installer_url = first_string(installer.get("url"));
            details.installer_hash = first_string(installer.get("hash"));
        }
    }

    if let Some(Value::Object(checkver)) = manifest.get("checkver") {
        details.release_notes_url = checkver.get("url").and_then(Value::as_str).map(str::to_owned);
    }

    details.installer_type = Some(if manifest.get("innosetup") == Some(&Value::Bool(true)) {
        "Inno Setup (extracted)".to_string()
    } else {
        "Scoop package".to_string()
    });

    Ok(details)
}

fn scoop_manifest_url(package: &Package) -> Option<String> {
    let bucket = &package.source.name;
    if bucket.starts_with("http") {
        Some(bucket.clone())
    } else if bucket.contains(":\\") {
        Some(format!("file:///{}", bucket.replace('\\', "/")))
    } else {
        Some(format!(
            "{}/blob/master/bucket/{}.json",
            package.source.url.trim_end_matches('/'),
            package.id
        ))
    }
}

fn text_or_lines(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(text) => Some(text.clone()),
        Value::Array(lines) => Some(
            lines
                .iter()
                .filter_map(Value::as_str)
                .collect::<Vec<_>>()
                .join("\n"),
        ),
        _ => None,
    }
}

fn first_string(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(text) => Some(text.clone()),
        Value::Array(items) => items.first()?.as_str().map(str::to_owned),
        _ => None,
    }
}

/// The GitHub owner, or the second-level domain of any other homepage.
fn homepage_author(homepage: &str) -> Option<String> {
    if let Some(path) = homepage.strip_prefix("https://github.com/") {
        return path.split('/').next().filter(|owner| !owner.is_empty()).map(str::to_owned);
    }

    let host = homepage
        .split_once("://")
        .map_or(homepage, |(_, rest)| rest)
        .split(['/', ':'])
        .next()?;
    let labels: Vec<&str> = host.split('.').collect();
    labels
        .len()
        .checked_sub(2)
        .and_then(|index| labels.get(index))
        .map(|label| label.to_string())
}

pub fn scoop_uninstall_args(package: &Package, options: &InstallationOptions) -> Vec<String> {
    let mut args = operation_args(SCOOP_PROPERTIES.uninstall_verb, package, options);
    if options.remove_data_on_uninstall {
        args.push("--purge".to_string());
    }
    args
}

pub fn scoop_install_args(package: &Package, options: &InstallationOptions) -> Vec<String> {
    let mut args = operation_args(SCOOP_PROPERTIES.install_verb, package, options);
    if let Some(architecture) = options.architecture.and_then(architecture_arg) {
        args.push("--arch".to_string());
        args.push(architecture.to_string());
    }
    if options.skip_hash_check {
        args.push("--skip".to_string());
    }
    args
}

pub fn scoop_update_args(package: &Package, options: &InstallationOptions) -> Vec<String> {
    let mut args = scoop_install_args(package, options);
    args[0] = SCOOP_PROPERTIES.update_verb.to_string();
    args
}

fn operation_args(verb: &str, package: &Package, options: &InstallationOptions) -> Vec<String> {
    let mut args = vec![verb.to_string(), scoop_target(package)];
    if options.effective_scope(package) == PackageScope::Global {
        args.push("--global".to_string());
    }
    args.extend(
        options
            .custom_parameters
            .iter()
            .map(|parameter| parameter.trim())
            .filter(|parameter| !parameter.is_empty())
            .map(str::to_owned),
    );
    args
}

fn architecture_arg(architecture: Architecture) -> Option<&'static str> {
    match architecture {
        Architecture::X64 => Some("64bit"),
        Architecture::X86 => Some("32bit"),
        Architecture::Arm64 => Some("arm64"),
        Architecture::Arm => None,
    }
}

/// Scope and elevation retries shared by every operation kind.
fn retry_verdict(
    package: &Package,
    options: &mut InstallationOptions,
    output: &InvocationOutput,
) -> Option<OperationVerdict> {
    if output.contains(GLOBAL_RETRY_MARKER) && options.effective_scope(package) == PackageScope::User {
        options.scope = Some(PackageScope::Global);
        return Some(OperationVerdict::AutoRetry);
    }

    if ADMIN_MARKERS.iter().any(|marker| output.contains(marker)) {
        return retry_elevated(options);
    }

    None
}

pub fn scoop_install_verdict(
    package: &Package,
    options: &mut InstallationOptions,
    output: &InvocationOutput,
) -> OperationVerdict {
    if let Some(verdict) = retry_verdict(package, options, output) {
        return verdict;
    }

    if INSTALL_SUCCESS_MARKERS
        .iter()
        .any(|marker| output.contains(marker))
    {
        OperationVerdict::Succeeded
    } else {
        OperationVerdict::Failed
    }
}

pub fn scoop_uninstall_verdict(
    package: &Package,
    options: &mut InstallationOptions,
    output: &InvocationOutput,
) -> OperationVerdict {
    if let Some(verdict) = retry_verdict(package, options, output) {
        return verdict;
    }

    if output.contains(UNINSTALL_SUCCESS_MARKER) {
        OperationVerdict::Succeeded
    } else {
        OperationVerdict::Failed
    }
}

pub struct ScoopBackend {
    runtime: BackendRuntime,
    sources: SourceRegistry,
}

impl ScoopBackend {
    pub fn new(context: BackendContext) -> Self {
        Self {
            runtime: BackendRuntime::new(context, &SCOOP_PROPERTIES, SCOOP_CANDIDATES),
            sources: SourceRegistry::new(scoop_main_source(), SCOOP_CAPABILITIES.sources)
                .with_default_url(UNKNOWN_BUCKET_URL),
        }
    }
}

#[async_trait]
impl ManagerBackend for ScoopBackend {
    fn properties(&self) -> &'static ManagerProperties {
        &SCOOP_PROPERTIES
    }

    fn capabilities(&self) -> &'static ManagerCapabilities {
        &SCOOP_CAPABILITIES
    }

    fn runtime(&self) -> &BackendRuntime {
        &self.runtime
    }

    fn sources(&self) -> &SourceRegistry {
        &self.sources
    }

    /// The PowerShell host alone proves nothing; scoop itself must answer.
    async fn load_status(&self) -> AdapterResult<ManagerStatus> {
        self.runtime.detect(&["--version"]).await
    }

    async fn find_packages(&self, query: &str) -> AdapterResult<Vec<Package>> {
        self.runtime
            .parse(scoop_search_request(query), ScoopSearchParser::new(&self.sources))
            .await
    }

    async fn list_installed(&self) -> AdapterResult<Vec<Package>> {
        let request = scoop_list_request(self.runtime.command());
        self.runtime
            .parse(request, ScoopListParser::new(&self.sources))
            .await
    }

    async fn list_upgradable(&self) -> AdapterResult<Vec<Package>> {
        let installed = self.list_installed().await?;
        let request = scoop_status_request(self.runtime.command());
        let (packages, unmatched) = self
            .runtime
            .parse(request, ScoopStatusParser::new(installed))
            .await?;

        for id in unmatched {
            self.runtime.diagnostic(
                LogLevel::Warn,
                &format!("upgradable scoop package {id} is not listed as installed"),
            );
        }
        Ok(packages)
    }

    async fn package_details(&self, package: &Package) -> AdapterResult<PackageDetails> {
        let request = scoop_manifest_request(self.runtime.command(), package);
        let output = self.runtime.run(request).await?;
        parse_scoop_manifest(package, &output.stdout())
    }

    async fn refresh_indexes(&self) -> AdapterResult<()> {
        let request = scoop_refresh_request(self.runtime.command());
        self.runtime.run(request).await.map(|_| ())
    }

    fn install_args(&self, package: &Package, options: &InstallationOptions) -> Vec<String> {
        scoop_install_args(package, options)
    }

    fn update_args(&self, package: &Package, options: &InstallationOptions) -> Vec<String> {
        scoop_update_args(package, options)
    }

    fn uninstall_args(&self, package: &Package, options: &InstallationOptions) -> Vec<String> {
        scoop_uninstall_args(package, options)
    }

    async fn classify_install(
        &self,
        package: &Package,
        options: &mut InstallationOptions,
        output: &InvocationOutput,
    ) -> OperationVerdict {
        scoop_install_verdict(package, options, output)
    }

    async fn classify_uninstall(
        &self,
        package: &Package,
        options: &mut InstallationOptions,
        output: &InvocationOutput,
    ) -> OperationVerdict {
        scoop_uninstall_verdict(package, options, output)
    }

    fn multi_source(&self) -> Option<&dyn MultiSourceBackend> {
        Some(self)
    }
}

#[async_trait]
impl MultiSourceBackend for ScoopBackend {
    fn known_sources(&self) -> Vec<ManagerSource> {
        scoop_known_sources()
    }

    async fn list_sources(&self) -> AdapterResult<Vec<ManagerSource>> {
        let request = scoop_bucket_list_request(self.runtime.command());
        let output = self.runtime.run_checked(request).await?;
        Ok(parse_scoop_buckets(&output.stdout_lines))
    }

    fn add_source_args(&self, source: &ManagerSource) -> Vec<String> {
        vec![
            "bucket".to_string(),
            "add".to_string(),
            source.name.clone(),
            source.url.clone(),
        ]
    }

    fn remove_source_args(&self, source: &ManagerSource) -> Vec<String> {
        vec!["bucket".to_string(), "rm".to_string(), source.name.clone()]
    }
}
