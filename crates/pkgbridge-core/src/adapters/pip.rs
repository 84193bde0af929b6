use async_trait::async_trait;

use crate::adapters::manager::{AdapterResult, BackendContext, ManagerBackend};
use crate::adapters::process_utils::BackendRuntime;
use crate::adapters::sources::SourceRegistry;
use crate::execution::{CommandSpec, InvocationOutput, ProcessSpawnRequest};
use crate::models::{
    InstallationOptions, ManagerAction, ManagerCapabilities, ManagerId, ManagerProperties,
    ManagerSource, ManagerStatus, OperationVerdict, Package, PackageDetails, PackageScope,
};
use crate::parsing::{
    HeaderTable, LineParser, NoiseFilter, format_as_name, key_value_lines, split_delimited,
    split_whitespace,
};

pub const PIP_PROPERTIES: ManagerProperties = ManagerProperties {
    id: ManagerId::Pip,
    name: "Pip",
    description: "Python's library manager. Full of python libraries and other python-related utilities.",
    executable_friendly_name: "pip",
    executable_call_args: &["-m", "pip"],
    install_verb: "install",
    update_verb: "install --upgrade",
    uninstall_verb: "uninstall",
};

pub const PIP_CAPABILITIES: ManagerCapabilities = ManagerCapabilities {
    can_run_as_admin: true,
    supports_custom_versions: true,
    supports_custom_scopes: true,
    supports_pre_release: true,
    ..ManagerCapabilities::NONE
};

const PIP_CANDIDATES: &[&str] = &["python.exe", "python3", "python"];
const PIP_SEARCH_PROGRAM: &str = "parse_pip_search";

const PIP_NOISE: NoiseFilter = NoiseFilter::new(
    &["", "WARNING:", "[notice]", "Package", "DEPRECATION:"],
    &["", "Ignoring", "invalid"],
);

const PYPI_SOURCE_NAME: &str = "pypi";
const PYPI_SOURCE_URL: &str = "https://pypi.org/";

const AVAILABLE_VERSIONS_PREFIX: &str = "Available versions:";
const USER_SCOPE_HINT: &str = "--user";

const UNINSTALL_FLAGS: &[&str] = &[
    "--yes",
    "--no-input",
    "--no-color",
    "--no-python-version-warning",
    "--no-cache",
];

pub fn pip_main_source() -> ManagerSource {
    ManagerSource::new(ManagerId::Pip, PYPI_SOURCE_NAME, PYPI_SOURCE_URL)
}

fn pip_request(
    base: CommandSpec,
    action: ManagerAction,
    args: impl IntoIterator<Item = impl Into<String>>,
) -> ProcessSpawnRequest {
    ProcessSpawnRequest::new(ManagerId::Pip, action, base.args(args))
}

/// pip dropped `pip search`; the `parse_pip_search` helper scrapes PyPI instead.
pub fn pip_search_request(query: &str) -> ProcessSpawnRequest {
    pip_request(CommandSpec::new(PIP_SEARCH_PROGRAM), ManagerAction::Search, [query])
}

pub fn pip_list_request(base: CommandSpec) -> ProcessSpawnRequest {
    pip_request(base, ManagerAction::ListInstalled, ["list"])
}

pub fn pip_outdated_request(base: CommandSpec) -> ProcessSpawnRequest {
    pip_request(base, ManagerAction::ListOutdated, ["list", "--outdated"])
}

pub fn pip_versions_request(base: CommandSpec, id: &str) -> ProcessSpawnRequest {
    pip_request(base, ManagerAction::Versions, ["index", "versions", id])
}

pub fn pip_show_request(base: CommandSpec, id: &str) -> ProcessSpawnRequest {
    pip_request(base, ManagerAction::Details, ["show", id])
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PipTable {
    /// `name | version | released | description` rows from the search helper.
    Search,
    Installed,
    Outdated,
}

pub struct PipParser {
    table: PipTable,
    rows: HeaderTable,
    source: ManagerSource,
    packages: Vec<Package>,
}

impl PipParser {
    pub fn new(table: PipTable, source: ManagerSource) -> Self {
        Self {
            table,
            rows: HeaderTable::new(),
            source,
            packages: Vec::new(),
        }
    }

    fn push_row(&mut self, cells: &[&str]) {
        let (id, version) = match cells {
            [id, version, ..] => (*id, *version),
            _ => return,
        };
        if PIP_NOISE.rejects(id, version) {
            return;
        }

        let package = match (self.table, cells) {
            (PipTable::Outdated, [_, _, latest, ..]) => Package::upgradable(
                format_as_name(id),
                id,
                version,
                *latest,
                self.source.clone(),
                PackageScope::Global,
            ),
            (PipTable::Outdated, _) => return,
            _ => Package::new(
                format_as_name(id),
                id,
                version,
                self.source.clone(),
                PackageScope::Global,
            ),
        };
        self.packages.push(package);
    }
}

impl LineParser for PipParser {
    type Output = Vec<Package>;

    fn push(&mut self, line: &str) {
        let Some(row) = self.rows.push(line) else {
            return;
        };
        let line = row.line().to_string();
        match self.table {
            PipTable::Search => self.push_row(&split_delimited(&line, '|')),
            PipTable::Installed | PipTable::Outdated => self.push_row(&split_whitespace(&line)),
        }
    }

    fn finish(self) -> Vec<Package> {
        self.packages
    }
}

/// Reads the `Available versions:` line of `pip index versions`.
pub fn parse_pip_versions(lines: &[String]) -> Vec<String> {
    lines
        .iter()
        .find_map(|line| line.trim().strip_prefix(AVAILABLE_VERSIONS_PREFIX))
        .map(|versions| {
            versions
                .split(',')
                .map(str::trim)
                .filter(|version| !version.is_empty())
                .map(str::to_owned)
                .collect()
        })
        .unwrap_or_default()
}

/// Details from the `Key: value` block printed by `pip show`.
pub fn parse_pip_details(package: &Package, lines: &[String]) -> PackageDetails {
    let values = key_value_lines(lines.iter().map(String::as_str));
    let mut details = PackageDetails::for_package(package);

    details.description = values.get_owned("Summary");
    details.homepage_url = values.get_owned("Home-page");
    details.author = values.get_owned("Author");
    details.publisher = values
        .get_owned("Author-email")
        .or_else(|| details.author.clone());
    details.license = values.get_owned("License");
    details.manifest_url = Some(format!("https://pypi.org/project/{}/", package.id));
    details.release_notes_url = Some(format!("https://pypi.org/project/{}/#history", package.id));
    details.installer_type = Some("Wheel".to_string());
    details.tags = values
        .get("Requires")
        .map(|requires| {
            split_delimited(requires, ',')
                .into_iter()
                .filter(|name| !name.is_empty())
                .map(str::to_owned)
                .collect()
        })
        .unwrap_or_default();

    details
}

pub fn pip_uninstall_args(package: &Package, options: &InstallationOptions) -> Vec<String> {
    let mut args = vec![PIP_PROPERTIES.uninstall_verb.to_string(), package.id.clone()];
    args.extend(UNINSTALL_FLAGS.iter().map(|flag| flag.to_string()));
    args.extend(
        options
            .custom_parameters
            .iter()
            .filter(|parameter| !parameter.trim().is_empty())
            .cloned(),
    );
    args
}

pub fn pip_update_args(package: &Package, options: &InstallationOptions) -> Vec<String> {
    let mut args: Vec<String> = PIP_PROPERTIES
        .update_verb
        .split(' ')
        .map(str::to_owned)
        .collect();
    args.extend(
        pip_uninstall_args(package, options)
            .into_iter()
            .skip(1)
            .filter(|arg| arg != "--yes"),
    );

    if options.pre_release {
        args.push("--pre".to_string());
    }
    if options.effective_scope(package) == PackageScope::User {
        args.push("--user".to_string());
    }
    if let Some(version) = options.requested_version()
        && let Some(target) = args.iter_mut().find(|arg| **arg == package.id)
    {
        *target = format!("{}=={version}", package.id);
    }
    args
}

pub fn pip_install_args(package: &Package, options: &InstallationOptions) -> Vec<String> {
    let mut args = pip_update_args(package, options);
    args.retain(|arg| arg != "--upgrade");
    args
}

/// A system-wide site-packages that is not writable makes pip suggest
/// `--user`; the retry goes to the user site instead.
pub fn pip_operation_verdict(
    package: &Package,
    options: &mut InstallationOptions,
    output: &InvocationOutput,
) -> OperationVerdict {
    if output.succeeded() {
        return OperationVerdict::Succeeded;
    }

    if output.contains(USER_SCOPE_HINT) && options.effective_scope(package) == PackageScope::Global {
        options.scope = Some(PackageScope::User);
        return OperationVerdict::AutoRetry;
    }

    OperationVerdict::Failed
}

pub struct PipBackend {
    runtime: BackendRuntime,
    sources: SourceRegistry,
}

impl PipBackend {
    pub fn new(context: BackendContext) -> Self {
        Self {
            runtime: BackendRuntime::new(context, &PIP_PROPERTIES, PIP_CANDIDATES),
            sources: SourceRegistry::new(pip_main_source(), PIP_CAPABILITIES.sources),
        }
    }

    fn parser(&self, table: PipTable) -> PipParser {
        PipParser::new(table, self.sources.main())
    }
}

#[async_trait]
impl ManagerBackend for PipBackend {
    fn properties(&self) -> &'static ManagerProperties {
        &PIP_PROPERTIES
    }

    fn capabilities(&self) -> &'static ManagerCapabilities {
        &PIP_CAPABILITIES
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
        self.runtime
            .parse(pip_search_request(query), self.parser(PipTable::Search))
            .await
    }

    async fn list_installed(&self) -> AdapterResult<Vec<Package>> {
        let request = pip_list_request(self.runtime.command());
        self.runtime.parse(request, self.parser(PipTable::Installed)).await
    }

    async fn list_upgradable(&self) -> AdapterResult<Vec<Package>> {
        let request = pip_outdated_request(self.runtime.command());
        self.runtime.parse(request, self.parser(PipTable::Outdated)).await
    }

    async fn package_details(&self, package: &Package) -> AdapterResult<PackageDetails> {
        let request = pip_show_request(self.runtime.command(), &package.id);
        let output = self.runtime.run(request).await?;
        Ok(parse_pip_details(package, &output.stdout_lines))
    }

    async fn package_versions(&self, package: &Package) -> AdapterResult<Vec<String>> {
        let request = pip_versions_request(self.runtime.command(), &package.id);
        let output = self.runtime.run(request).await?;
        Ok(parse_pip_versions(&output.stdout_lines))
    }

    fn install_args(&self, package: &Package, options: &InstallationOptions) -> Vec<String> {
        pip_install_args(package, options)
    }

    fn update_args(&self, package: &Package, options: &InstallationOptions) -> Vec<String> {
        pip_update_args(package, options)
    }

    fn uninstall_args(&self, package: &Package, options: &InstallationOptions) -> Vec<String> {
        pip_uninstall_args(package, options)
    }

    async fn classify_install(
        &self,
        package: &Package,
        options: &mut InstallationOptions,
        output: &InvocationOutput,
    ) -> OperationVerdict {
        pip_operation_verdict(package, options, output)
    }

    async fn classify_uninstall(
        &self,
        package: &Package,
        options: &mut InstallationOptions,
        output: &InvocationOutput,
    ) -> OperationVerdict {
        pip_operation_verdict(package, options, output)
    }
}
