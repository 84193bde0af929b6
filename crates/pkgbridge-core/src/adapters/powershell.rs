use async_trait::async_trait;

use crate::adapters::manager::{
    AdapterResult, BackendContext, ManagerBackend, MultiSourceBackend, retry_elevated,
};
use crate::adapters::process_utils::BackendRuntime;
use crate::adapters::sources::SourceRegistry;
use crate::execution::{CommandSpec, InvocationOutput, ProcessSpawnRequest};
use crate::models::{
    InstallationOptions, ManagerAction, ManagerCapabilities, ManagerId, ManagerProperties,
    ManagerSource, ManagerStatus, OperationVerdict, Package, PackageDetails, PackageScope,
    SourceCapabilities,
};
use crate::parsing::{
    HeaderTable, KeyValues, LineParser, NoiseFilter, format_as_name, key_value_lines,
    split_delimited, split_whitespace,
};

pub const POWERSHELL_PROPERTIES: ManagerProperties = ManagerProperties {
    id: ManagerId::PowerShell,
    name: "PowerShell",
    description: "PowerShell's package manager. Find libraries and scripts to expand PowerShell capabilities.",
    executable_friendly_name: "powershell.exe",
    executable_call_args: &["-NoProfile", "-Command"],
    install_verb: "Install-Module",
    update_verb: "Update-Module",
    uninstall_verb: "Uninstall-Module",
};

pub const POWERSHELL_CAPABILITIES: ManagerCapabilities = ManagerCapabilities {
    can_run_as_admin: true,
    can_skip_integrity_checks: true,
    supports_custom_versions: true,
    supports_custom_scopes: true,
    supports_custom_sources: true,
    supports_pre_release: true,
    sources: SourceCapabilities {
        knows_package_count: false,
        knows_update_date: false,
        must_be_installed_as_admin: false,
    },
    ..ManagerCapabilities::NONE
};

const POWERSHELL_CANDIDATES: &[&str] = &["powershell.exe", "pwsh"];

const POWERSHELL_NOISE: NoiseFilter = NoiseFilter::new(&[""], &[""]);

const GALLERY_NAME: &str = "PSGallery";
const GALLERY_URL: &str = "https://www.powershellgallery.com/api/v2";
const TEST_GALLERY_NAME: &str = "PoshTestGallery";
const TEST_GALLERY_URL: &str = "https://www.poshtestgallery.com/api/v2";

const ADMIN_MARKER: &str = "AdminPrivilegesAreRequired";

/// Resolves each installed module's latest gallery version from the
/// package redirect and prints `name|version|latest|repository` when newer.
const UPDATE_CHECK_SCRIPT: &str = r#"
function Test-GalleryModuleUpdate {
    param (
        [Parameter(Mandatory,ValueFromPipelineByPropertyName)] [string] $Name,
        [Parameter(Mandatory,ValueFromPipelineByPropertyName)] [version] $Version,
        [Parameter(Mandatory,ValueFromPipelineByPropertyName)] [string] $Repository,
        [Parameter(Mandatory,ValueFromPipelineByPropertyName)] [string] $RepositorySourceLocation
    )
    process {
        $page = Invoke-WebRequest -Uri ($RepositorySourceLocation.TrimEnd('/') + "/package/$Name") -UseBasicParsing -Maximum 0 -ea Ignore
        [version]$latest = Split-Path -Path ($page.Headers.Location -replace "$Name." -replace ".nupkg") -Leaf
        if ($latest -gt $Version) {
            Write-Output ($Name + "|" + $Version.ToString() + "|" + $latest.ToString() + "|" + $Repository)
        }
    }
}
Get-InstalledModule | Test-GalleryModuleUpdate
"#;

pub fn powershell_main_source() -> ManagerSource {
    ManagerSource::new(ManagerId::PowerShell, GALLERY_NAME, GALLERY_URL)
}

pub fn powershell_known_sources() -> Vec<ManagerSource> {
    vec![
        powershell_main_source(),
        ManagerSource::new(ManagerId::PowerShell, TEST_GALLERY_NAME, TEST_GALLERY_URL),
    ]
}

fn powershell_request(
    base: CommandSpec,
    action: ManagerAction,
    args: impl IntoIterator<Item = impl Into<String>>,
) -> ProcessSpawnRequest {
    ProcessSpawnRequest::new(ManagerId::PowerShell, action, base.args(args))
}

/// Single-quoted PowerShell literal. Embedded quotes are doubled, so the
/// value can never end the literal and run as script.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

pub fn powershell_search_request(base: CommandSpec, query: &str) -> ProcessSpawnRequest {
    powershell_request(
        base,
        ManagerAction::Search,
        [format!("Find-Module {}", quote_literal(query))],
    )
}

pub fn powershell_list_request(base: CommandSpec) -> ProcessSpawnRequest {
    powershell_request(base, ManagerAction::ListInstalled, ["Get-InstalledModule"])
}

pub fn powershell_updates_request(base: CommandSpec) -> ProcessSpawnRequest {
    powershell_request(base, ManagerAction::ListOutdated, [UPDATE_CHECK_SCRIPT])
}

pub fn powershell_versions_request(base: CommandSpec, id: &str) -> ProcessSpawnRequest {
    powershell_request(
        base,
        ManagerAction::Versions,
        [format!("Find-Module -Name {} -AllVersions", quote_literal(id))],
    )
}

pub fn powershell_details_request(base: CommandSpec, id: &str) -> ProcessSpawnRequest {
    powershell_request(
        base,
        ManagerAction::Details,
        [format!("Find-Module -Name {} | Format-List", quote_literal(id))],
    )
}

pub fn powershell_repositories_request(base: CommandSpec) -> ProcessSpawnRequest {
    powershell_request(base, ManagerAction::ListSources, ["Get-PSRepository"])
}

/// Reads the `Version  Name  Repository  Description` table shared by
/// `Find-Module` and `Get-InstalledModule`.
pub struct ModuleTableParser<'a> {
    sources: &'a SourceRegistry,
    table: HeaderTable,
    packages: Vec<Package>,
}

impl<'a> ModuleTableParser<'a> {
    pub fn new(sources: &'a SourceRegistry) -> Self {
        Self {
            sources,
            table: HeaderTable::new(),
            packages: Vec::new(),
        }
    }
}

impl LineParser for ModuleTableParser<'_> {
    type Output = Vec<Package>;

    fn push(&mut self, line: &str) {
        let Some(row) = self.table.push(line) else {
            return;
        };
        let cells = split_whitespace(row.line());
        let [version, id, repository, ..] = cells.as_slice() else {
            return;
        };
        if POWERSHELL_NOISE.rejects(id, version) {
            return;
        }
        self.packages.push(Package::new(
            format_as_name(id),
            *id,
            *version,
            self.sources.get_or_default(repository),
            PackageScope::User,
        ));
    }

    fn finish(self) -> Vec<Package> {
        self.packages
    }
}

/// Reads the `name|version|latest|repository` lines of the update check.
pub struct ModuleUpdatesParser<'a> {
    sources: &'a SourceRegistry,
    packages: Vec<Package>,
}

impl<'a> ModuleUpdatesParser<'a> {
    pub fn new(sources: &'a SourceRegistry) -> Self {
        Self {
            sources,
            packages: Vec::new(),
        }
    }
}

/// `[version]` prints `1.2` for a gallery version `1.2.0`; those are not upgrades.
fn is_padded_same_version(version: &str, latest: &str) -> bool {
    latest == format!("{version}.0") || latest == format!("{version}.0.0")
}

impl LineParser for ModuleUpdatesParser<'_> {
    type Output = Vec<Package>;

    fn push(&mut self, line: &str) {
        if line.starts_with(">>") {
            return;
        }
        let cells = split_delimited(line, '|');
        let [id, version, latest, repository, ..] = cells.as_slice() else {
            return;
        };
        if POWERSHELL_NOISE.rejects(id, version) || is_padded_same_version(version, latest) {
            return;
        }
        self.packages.push(Package::upgradable(
            format_as_name(id),
            *id,
            *version,
            *latest,
            self.sources.get_or_default(repository),
            PackageScope::User,
        ));
    }

    fn finish(self) -> Vec<Package> {
        self.packages
    }
}

pub fn parse_module_versions(lines: &[String]) -> Vec<String> {
    let mut table = HeaderTable::new();
    lines
        .iter()
        .filter_map(|line| {
            let row = table.push(line)?;
            let cells = split_whitespace(row.line());
            (cells.len() >= 3).then(|| cells[0].to_string())
        })
        .collect()
}

/// `Format-List` prints missing gallery fields as a literal `null`.
fn gallery_value(values: &KeyValues, key: &str) -> Option<String> {
    values
        .get(key)
        .filter(|value| !value.eq_ignore_ascii_case("null"))
        .map(str::to_owned)
}

pub fn parse_module_details(package: &Package, lines: &[String]) -> PackageDetails {
    let values = key_value_lines(lines.iter().map(String::as_str));
    let mut details = PackageDetails::for_package(package);

    details.author = gallery_value(&values, "Author");
    details.publisher = gallery_value(&values, "CompanyName");
    details.license = gallery_value(&values, "Copyright");
    details.license_url = gallery_value(&values, "LicenseUri");
    details.description = gallery_value(&values, "Description");
    details.installer_type = gallery_value(&values, "Type");
    details.homepage_url = gallery_value(&values, "ProjectUri");
    details.update_date = gallery_value(&values, "UpdatedDate")
        .or_else(|| gallery_value(&values, "PublishedDate"));
    details.release_notes = gallery_value(&values, "ReleaseNotes");
    details.tags = gallery_value(&values, "Tags")
        .map(|tags| {
            tags.trim_matches(['{', '}'])
                .split(',')
                .map(str::trim)
                .filter(|tag| !tag.is_empty())
                .map(str::to_owned)
                .collect()
        })
        .unwrap_or_default();
    details.manifest_url = Some(format!(
        "https://www.powershellgallery.com/packages/{}",
        package.id
    ));

    details
}

/// Reads `Get-PSRepository`: name, installation policy, source location.
pub fn parse_repositories(lines: &[String]) -> Vec<ManagerSource> {
    let mut table = HeaderTable::new();
    lines
        .iter()
        .filter_map(|line| {
            let row = table.push(line)?;
            match split_whitespace(row.line()).as_slice() {
                [name, _, url, ..] => Some(ManagerSource::new(ManagerId::PowerShell, *name, *url)),
                _ => None,
            }
        })
        .collect()
}

pub fn powershell_uninstall_args(package: &Package, options: &InstallationOptions) -> Vec<String> {
    let mut args = vec![
        POWERSHELL_PROPERTIES.uninstall_verb.to_string(),
        "-Name".to_string(),
        package.id.clone(),
        "-Confirm:$false".to_string(),
        "-Force".to_string(),
    ];
    args.extend(
        options
            .custom_parameters
            .iter()
            .filter(|parameter| !parameter.trim().is_empty())
            .cloned(),
    );
    args
}

pub fn powershell_update_args(package: &Package, options: &InstallationOptions) -> Vec<String> {
    let mut args = powershell_uninstall_args(package, options);
    args[0] = POWERSHELL_PROPERTIES.update_verb.to_string();
    if options.pre_release {
        args.push("-AllowPrerelease".to_string());
    }
    if options.skip_hash_check {
        args.push("-SkipPublisherCheck".to_string());
    }
    args
}

pub fn powershell_install_args(package: &Package, options: &InstallationOptions) -> Vec<String> {
    let mut args = powershell_update_args(package, options);
    args[0] = POWERSHELL_PROPERTIES.install_verb.to_string();
    args.push("-AllowClobber".to_string());
    args.push("-Scope".to_string());
    args.push(
        match options.effective_scope(package) {
            PackageScope::Global => "AllUsers",
            PackageScope::User => "CurrentUser",
        }
        .to_string(),
    );
    if let Some(version) = options.requested_version() {
        args.push("-RequiredVersion".to_string());
        args.push(version.to_string());
    }
    args
}

pub fn powershell_operation_verdict(
    options: &mut InstallationOptions,
    output: &InvocationOutput,
) -> OperationVerdict {
    if output.contains(ADMIN_MARKER)
        && let Some(verdict) = retry_elevated(options)
    {
        return verdict;
    }

    if output.succeeded() {
        OperationVerdict::Succeeded
    } else {
        OperationVerdict::Failed
    }
}

pub struct PowerShellBackend {
    runtime: BackendRuntime,
    sources: SourceRegistry,
}

impl PowerShellBackend {
    pub fn new(context: BackendContext) -> Self {
        Self {
            runtime: BackendRuntime::new(context, &POWERSHELL_PROPERTIES, POWERSHELL_CANDIDATES),
            sources: SourceRegistry::new(powershell_main_source(), POWERSHELL_CAPABILITIES.sources)
                .with_default_url(GALLERY_URL),
        }
    }
}

#[async_trait]
impl ManagerBackend for PowerShellBackend {
    fn properties(&self) -> &'static ManagerProperties {
        &POWERSHELL_PROPERTIES
    }

    fn capabilities(&self) -> &'static ManagerCapabilities {
        &POWERSHELL_CAPABILITIES
    }

    fn runtime(&self) -> &BackendRuntime {
        &self.runtime
    }

    fn sources(&self) -> &SourceRegistry {
        &self.sources
    }

    async fn load_status(&self) -> AdapterResult<ManagerStatus> {
        self.runtime
            .detect(&["$PSVersionTable.PSVersion.ToString()"])
            .await
    }

    async fn find_packages(&self, query: &str) -> AdapterResult<Vec<Package>> {
        let request = powershell_search_request(self.runtime.command(), query);
        self.runtime
            .parse(request, ModuleTableParser::new(&self.sources))
            .await
    }

    async fn list_installed(&self) -> AdapterResult<Vec<Package>> {
        let request = powershell_list_request(self.runtime.command());
        self.runtime
            .parse(request, ModuleTableParser::new(&self.sources))
            .await
    }

    async fn list_upgradable(&self) -> AdapterResult<Vec<Package>> {
        let request = powershell_updates_request(self.runtime.command());
        self.runtime
            .parse(request, ModuleUpdatesParser::new(&self.sources))
            .await
    }

    async fn package_details(&self, package: &Package) -> AdapterResult<PackageDetails> {
        let request = powershell_details_request(self.runtime.command(), &package.id);
        let output = self.runtime.run(request).await?;
        Ok(parse_module_details(package, &output.stdout_lines))
    }

    async fn package_versions(&self, package: &Package) -> AdapterResult<Vec<String>> {
        let request = powershell_versions_request(self.runtime.command(), &package.id);
        let output = self.runtime.run(request).await?;
        Ok(parse_module_versions(&output.stdout_lines))
    }

    fn install_args(&self, package: &Package, options: &InstallationOptions) -> Vec<String> {
        powershell_install_args(package, options)
    }

    fn update_args(&self, package: &Package, options: &InstallationOptions) -> Vec<String> {
        powershell_update_args(package, options)
    }

    fn uninstall_args(&self, package: &Package, options: &InstallationOptions) -> Vec<String> {
        powershell_uninstall_args(package, options)
    }

    async fn classify_install(
        &self,
        _package: &Package,
        options: &mut InstallationOptions,
        output: &InvocationOutput,
    ) -> OperationVerdict {
        powershell_operation_verdict(options, output)
    }

    async fn classify_uninstall(
        &self,
        _package: &Package,
        options: &mut InstallationOptions,
        output: &InvocationOutput,
    ) -> OperationVerdict {
        powershell_operation_verdict(options, output)
    }

    fn multi_source(&self) -> Option<&dyn MultiSourceBackend> {
        Some(self)
    }
}

#[async_trait]
impl MultiSourceBackend for PowerShellBackend {
    fn known_sources(&self) -> Vec<ManagerSource> {
        powershell_known_sources()
    }

    async fn list_sources(&self) -> AdapterResult<Vec<ManagerSource>> {
        let request = powershell_repositories_request(self.runtime.command());
        let output = self.runtime.run_checked(request).await?;
        Ok(parse_repositories(&output.stdout_lines))
    }

    /// The gallery itself can only be restored with `-Default`.
    fn add_source_args(&self, source: &ManagerSource) -> Vec<String> {
        if source.url == GALLERY_URL {
            return vec!["Register-PSRepository".to_string(), "-Default".to_string()];
        }
        vec![
            "Register-PSRepository".to_string(),
            "-Name".to_string(),
            quote_literal(&source.name),
            "-SourceLocation".to_string(),
            quote_literal(&source.url),
        ]
    }

    fn remove_source_args(&self, source: &ManagerSource) -> Vec<String> {
        vec![
            "Unregister-PSRepository".to_string(),
            "-Name".to_string(),
            quote_literal(&source.name),
        ]
    }
}
