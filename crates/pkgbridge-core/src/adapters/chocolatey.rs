use async_trait::async_trait;

use crate::adapters::manager::{
    AdapterResult, BackendContext, ManagerBackend, MultiSourceBackend, retry_elevated,
};
use crate::adapters::process_utils::BackendRuntime;
use crate::adapters::sources::SourceRegistry;
use crate::execution::{CommandSpec, InvocationOutput, ProcessSpawnRequest};
use crate::models::{
    Architecture, InstallationOptions, ManagerAction, ManagerCapabilities, ManagerId,
    ManagerProperties, ManagerSource, ManagerStatus, OperationVerdict, Package, PackageDetails,
    PackageScope, SourceCapabilities,
};
use crate::parsing::{LineParser, NoiseFilter, format_as_name, split_delimited};

pub const CHOCOLATEY_PROPERTIES: ManagerProperties = ManagerProperties {
    id: ManagerId::Chocolatey,
    name: "Chocolatey",
    description: "The classic package manager for Windows. Contains general software.",
    executable_friendly_name: "choco.exe",
    executable_call_args: &[],
    install_verb: "install",
    update_verb: "upgrade",
    uninstall_verb: "uninstall",
};

pub const CHOCOLATEY_CAPABILITIES: ManagerCapabilities = ManagerCapabilities {
    can_run_as_admin: true,
    can_skip_integrity_checks: true,
    can_run_interactively: true,
    supports_custom_versions: true,
    supports_custom_architectures: true,
    supported_architectures: &[Architecture::X86],
    supports_pre_release: true,
    supports_custom_sources: true,
    sources: SourceCapabilities {
        knows_package_count: false,
        knows_update_date: false,
        must_be_installed_as_admin: false,
    },
    ..ManagerCapabilities::NONE
};

const CHOCOLATEY_CANDIDATES: &[&str] = &["choco.exe"];

const CHOCOLATEY_NOISE: NoiseFilter = NoiseFilter::new(
    &[
        "Directory",
        "",
        "Did",
        "Features?",
        "Validation",
        "-",
        "being",
        "It",
        "Error",
        "L'accs",
        "Maximum",
        "This",
        "Output is package name ",
        "operable",
        "Invalid",
    ],
    &[
        "",
        "Did",
        "Features?",
        "Validation",
        "-",
        "being",
        "It",
        "Error",
        "L'accs",
        "Maximum",
        "This",
        "packages",
        "current version",
        "installed version",
        "is",
        "program",
        "validations",
        "argument",
        "no",
    ],
);

const BANNER_PREFIX: &str = "Chocolatey";

const COMMUNITY_SOURCE_NAME: &str = "community";
const COMMUNITY_SOURCE_URL: &str = "https://community.chocolatey.org/api/v2/";
const LEGACY_COMMUNITY_SOURCE_URL: &str = "https://chocolatey.org/api/v2/";

const SUCCESS_CODES: &[i32] = &[0, 1641, 3010];
const UNINSTALL_SUCCESS_CODES: &[i32] = &[0, 1641, 3010, 1614, 1605];
const ELEVATION_MARKERS: &[&str] = &[
    "Run as administrator",
    "The requested operation requires elevation",
    "Access to the path",
    "Access denied",
    "is denied",
    "access denied",
];

pub fn chocolatey_main_source() -> ManagerSource {
    ManagerSource::new(ManagerId::Chocolatey, COMMUNITY_SOURCE_NAME, COMMUNITY_SOURCE_URL)
}

fn chocolatey_request(
    base: CommandSpec,
    action: ManagerAction,
    args: impl IntoIterator<Item = impl Into<String>>,
) -> ProcessSpawnRequest {
    ProcessSpawnRequest::new(ManagerId::Chocolatey, action, base.args(args))
}

pub fn chocolatey_search_request(base: CommandSpec, query: &str) -> ProcessSpawnRequest {
    chocolatey_request(base, ManagerAction::Search, ["search", query])
}

pub fn chocolatey_list_request(base: CommandSpec) -> ProcessSpawnRequest {
    chocolatey_request(base, ManagerAction::ListInstalled, ["list"])
}

pub fn chocolatey_outdated_request(base: CommandSpec) -> ProcessSpawnRequest {
    chocolatey_request(base, ManagerAction::ListOutdated, ["outdated"])
}

pub fn chocolatey_versions_request(base: CommandSpec, id: &str) -> ProcessSpawnRequest {
    chocolatey_request(base, ManagerAction::Versions, ["find", "-e", id, "-a"])
}

pub fn chocolatey_info_request(base: CommandSpec, id: &str) -> ProcessSpawnRequest {
    chocolatey_request(base, ManagerAction::Details, ["info", id])
}

pub fn chocolatey_source_list_request(base: CommandSpec) -> ProcessSpawnRequest {
    chocolatey_request(base, ManagerAction::ListSources, ["source", "list"])
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ChocolateyTable {
    /// `search` and `list`: `id version ...` separated by single spaces.
    Packages,
    /// `outdated`: `id|current|available|pinned`.
    Outdated,
}

/// Every package Chocolatey prints belongs to its default feed.
pub struct ChocolateyParser {
    table: ChocolateyTable,
    source: ManagerSource,
    packages: Vec<Package>,
}

impl ChocolateyParser {
    pub fn new(table: ChocolateyTable, source: ManagerSource) -> Self {
        Self {
            table,
            source,
            packages: Vec::new(),
        }
    }
}

impl LineParser for ChocolateyParser {
    type Output = Vec<Package>;

    fn push(&mut self, line: &str) {
        if line.starts_with(BANNER_PREFIX) {
            return;
        }

        let package = match self.table {
            ChocolateyTable::Packages => {
                let cells: Vec<&str> = line.split(' ').map(str::trim).collect();
                match cells.as_slice() {
                    [id, version, ..] if CHOCOLATEY_NOISE.accepts(id, version) => Some(Package::new(
                        format_as_name(id),
                        *id,
                        *version,
                        self.source.clone(),
                        PackageScope::Global,
                    )),
                    _ => None,
                }
            }
            ChocolateyTable::Outdated => match split_delimited(line, '|').as_slice() {
                [id, version, new_version, ..]
                    if CHOCOLATEY_NOISE.accepts(id, version) && version != new_version =>
                {
                    Some(Package::upgradable(
                        format_as_name(id),
                        *id,
                        *version,
                        *new_version,
                        self.source.clone(),
                        PackageScope::Global,
                    ))
                }
                _ => None,
            },
        };

        if let Some(package) = package {
            self.packages.push(package);
        }
    }

    fn finish(self) -> Vec<Package> {
        self.packages
    }
}

/// Keeps the version column of rows that name exactly `id`.
pub fn parse_chocolatey_versions(id: &str, lines: &[String]) -> Vec<String> {
    lines
        .iter()
        .filter(|line| !line.starts_with(BANNER_PREFIX))
        .filter_map(|line| {
            let mut cells = line.split(' ').map(str::trim);
            match (cells.next(), cells.next()) {
                (Some(first), Some(version)) if first == id && !version.is_empty() => {
                    Some(version.to_string())
                }
                _ => None,
            }
        })
        .collect()
}

/// Parses `name - url | Priority 0|...` rows. Both community urls map to the
/// `community` name.
pub fn parse_chocolatey_sources(lines: &[String]) -> Vec<ManagerSource> {
    lines
        .iter()
        .map(|line| line.trim())
        .filter(|line| line.contains(" - ") && line.contains("| "))
        .filter_map(|line| {
            let head = line.split('|').next()?.trim();
            let (name, url) = head.split_once(" - ")?;
            let url = url.split_whitespace().next()?;
            if url == COMMUNITY_SOURCE_URL || url == LEGACY_COMMUNITY_SOURCE_URL {
                Some(chocolatey_main_source())
            } else {
                Some(ManagerSource::new(ManagerId::Chocolatey, name.trim(), url))
            }
        })
        .collect()
}

#[derive(Clone, Copy)]
enum Multiline {
    Description,
    ReleaseNotes,
}

/// Reads `choco info`. Fields are indented one space; continuation lines of
/// the description and release notes are indented two.
pub fn parse_chocolatey_details(package: &Package, lines: &[String]) -> PackageDetails {
    let mut details = PackageDetails::for_package(package);

    if package.source.name == COMMUNITY_SOURCE_NAME {
        details.manifest_url = Some(format!(
            "https://community.chocolatey.org/packages/{}",
            package.id
        ));
        details.installer_type = Some("NuPkg (zipped manifest)".to_string());
        details.installer_url = Some(format!(
            "https://packages.chocolatey.org/{}.{}.nupkg",
            package.id, package.version
        ));
    } else if package.source.url.trim_end().ends_with('/') {
        details.manifest_url = Some(format!("{}package/{}", package.source.url.trim(), package.id));
    }

    let mut multiline = None;
    for line in lines {
        let line = line.trim_end();
        if line.is_empty() {
            continue;
        }

        if line.starts_with("  ") {
            match multiline {
                Some(Multiline::Description) => append_line(&mut details.description, line),
                Some(Multiline::ReleaseNotes) => append_line(&mut details.release_notes, line),
                None => {}
            }
            continue;
        }
        multiline = None;

        if !line.starts_with(' ') {
            continue;
        }
        let Some((key, value)) = line.trim_start().split_once(':') else {
            continue;
        };
        let value = value.trim();

        match key {
            "Title" => {
                details.update_date = value
                    .split_once('|')
                    .map(|(_, published)| published.replace("Published:", "").trim().to_string())
                    .filter(|date| !date.is_empty());
            }
            "Author" | "Software Author(s)" => details.author = non_empty(value),
            "Software Site" => details.homepage_url = non_empty(value),
            "Software License" => details.license_url = non_empty(value),
            "Package Checksum" => details.installer_hash = non_empty(&value.replace('\'', "")),
            "Description" => {
                details.description = non_empty(value);
                multiline = Some(Multiline::Description);
            }
            "Release Notes" => {
                if value.starts_with("http") {
                    details.release_notes_url = Some(value.to_string());
                } else {
                    details.release_notes = non_empty(value);
                }
                multiline = Some(Multiline::ReleaseNotes);
            }
            "Tags" => {
                details.tags = value.split_whitespace().map(str::to_owned).collect();
            }
            _ => {}
        }
    }

    details
}

fn append_line(field: &mut Option<String>, line: &str) {
    let line = line.trim();
    match field {
        Some(text) => {
            text.push('\n');
            text.push_str(line);
        }
        None => *field = Some(line.to_string()),
    }
}

fn non_empty(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

pub fn chocolatey_uninstall_args(package: &Package, options: &InstallationOptions) -> Vec<String> {
    let mut args = vec![
        CHOCOLATEY_PROPERTIES.uninstall_verb.to_string(),
        package.id.clone(),
        "-y".to_string(),
    ];
    args.extend(
        options
            .custom_parameters
            .iter()
            .map(|parameter| parameter.trim())
            .filter(|parameter| !parameter.is_empty())
            .map(str::to_owned),
    );
    if options.interactive {
        args.push("--notsilent".to_string());
    }
    args
}

pub fn chocolatey_install_args(package: &Package, options: &InstallationOptions) -> Vec<String> {
    let mut args = chocolatey_uninstall_args(package, options);
    args[0] = CHOCOLATEY_PROPERTIES.install_verb.to_string();
    args.push("--no-progress".to_string());

    if options.architecture == Some(Architecture::X86) {
        args.push("--forcex86".to_string());
    }
    if options.pre_release {
        args.push("--prerelease".to_string());
    }
    if options.skip_hash_check {
        args.extend(["--ignore-checksums", "--force"].map(String::from));
    }
    if let Some(version) = options.requested_version() {
        args.push(format!("--version={version}"));
        args.push("--allow-downgrade".to_string());
    }
    args
}

pub fn chocolatey_update_args(package: &Package, options: &InstallationOptions) -> Vec<String> {
    let mut args = chocolatey_install_args(package, options);
    args[0] = CHOCOLATEY_PROPERTIES.update_verb.to_string();
    args
}

pub fn chocolatey_install_verdict(
    options: &mut InstallationOptions,
    output: &InvocationOutput,
) -> OperationVerdict {
    verdict(SUCCESS_CODES, options, output)
}

pub fn chocolatey_uninstall_verdict(
    options: &mut InstallationOptions,
    output: &InvocationOutput,
) -> OperationVerdict {
    verdict(UNINSTALL_SUCCESS_CODES, options, output)
}

fn verdict(
    success_codes: &[i32],
    options: &mut InstallationOptions,
    output: &InvocationOutput,
) -> OperationVerdict {
    if success_codes.contains(&output.exit_code) {
        return OperationVerdict::Succeeded;
    }

    if ELEVATION_MARKERS.iter().any(|marker| output.contains(marker))
        && let Some(verdict) = retry_elevated(options)
    {
        return verdict;
    }

    OperationVerdict::Failed
}

pub struct ChocolateyBackend {
    runtime: BackendRuntime,
    sources: SourceRegistry,
}

impl ChocolateyBackend {
    pub fn new(context: BackendContext) -> Self {
        Self {
            runtime: BackendRuntime::new(context, &CHOCOLATEY_PROPERTIES, CHOCOLATEY_CANDIDATES),
            sources: SourceRegistry::new(chocolatey_main_source(), CHOCOLATEY_CAPABILITIES.sources),
        }
    }

    fn parser(&self, table: ChocolateyTable) -> ChocolateyParser {
        ChocolateyParser::new(table, self.sources.main())
    }
}

#[async_trait]
impl ManagerBackend for ChocolateyBackend {
    fn properties(&self) -> &'static ManagerProperties {
        &CHOCOLATEY_PROPERTIES
    }

    fn capabilities(&self) -> &'static ManagerCapabilities {
        &CHOCOLATEY_CAPABILITIES
    }

    fn runtime(&self) -> &BackendRuntime {
        &self.runtime
    }

    fn sources(&self) -> &SourceRegistry {
        &self.sources
    }

    async fn load_status(&self) -> AdapterResult<ManagerStatus> {
        self.runtime.detect(&["--version"]).await
    }

    async fn find_packages(&self, query: &str) -> AdapterResult<Vec<Package>> {
        let request = chocolatey_search_request(self.runtime.command(), query);
        self.runtime
            .parse(request, self.parser(ChocolateyTable::Packages))
            .await
    }

    async fn list_installed(&self) -> AdapterResult<Vec<Package>> {
        let request = chocolatey_list_request(self.runtime.command());
        self.runtime
            .parse(request, self.parser(ChocolateyTable::Packages))
            .await
    }

    async fn list_upgradable(&self) -> AdapterResult<Vec<Package>> {
        let request = chocolatey_outdated_request(self.runtime.command());
        self.runtime
            .parse(request, self.parser(ChocolateyTable::Outdated))
            .await
    }

    async fn package_details(&self, package: &Package) -> AdapterResult<PackageDetails> {
        let request = chocolatey_info_request(self.runtime.command(), &package.id);
        let output = self.runtime.run(request).await?;
        Ok(parse_chocolatey_details(package, &output.stdout_lines))
    }

    async fn package_versions(&self, package: &Package) -> AdapterResult<Vec<String>> {
        let request = chocolatey_versions_request(self.runtime.command(), &package.id);
        let output = self.runtime.run(request).await?;
        Ok(parse_chocolatey_versions(&package.id, &output.stdout_lines))
    }

    fn install_args(&self, package: &Package, options: &InstallationOptions) -> Vec<String> {
        chocolatey_install_args(package, options)
    }

    fn update_args(&self, package: &Package, options: &InstallationOptions) -> Vec<String> {
        chocolatey_update_args(package, options)
    }

    fn uninstall_args(&self, package: &Package, options: &InstallationOptions) -> Vec<String> {
        chocolatey_uninstall_args(package, options)
    }

    async fn classify_install(
        &self,
        _package: &Package,
        options: &mut InstallationOptions,
        output: &InvocationOutput,
    ) -> OperationVerdict {
        chocolatey_install_verdict(options, output)
    }

    async fn classify_uninstall(
        &self,
        _package: &Package,
        options: &mut InstallationOptions,
        output: &InvocationOutput,
    ) -> OperationVerdict {
        chocolatey_uninstall_verdict(options, output)
    }

    fn multi_source(&self) -> Option<&dyn MultiSourceBackend> {
        Some(self)
    }
}

#[async_trait]
impl MultiSourceBackend for ChocolateyBackend {
    fn known_sources(&self) -> Vec<ManagerSource> {
        vec![chocolatey_main_source()]
    }

    async fn list_sources(&self) -> AdapterResult<Vec<ManagerSource>> {
        let request = chocolatey_source_list_request(self.runtime.command());
        let output = self.runtime.run_checked(request).await?;
        Ok(parse_chocolatey_sources(&output.stdout_lines))
    }

    fn add_source_args(&self, source: &ManagerSource) -> Vec<String> {
        vec![
            "source".to_string(),
            "add".to_string(),
            "--name".to_string(),
            source.name.clone(),
            "--source".to_string(),
            source.url.clone(),
            "-y".to_string(),
        ]
    }

    fn remove_source_args(&self, source: &ManagerSource) -> Vec<String> {
        vec![
            "source".to_string(),
            "remove".to_string(),
            "--name".to_string(),
            source.name.clone(),
            "-y".to_string(),
        ]
    }
}
