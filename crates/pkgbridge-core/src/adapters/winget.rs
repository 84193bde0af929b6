use async_trait::async_trait;

use crate::adapters::manager::{
    AdapterResult, BackendContext, ManagerBackend, MultiSourceBackend, retry_elevated,
};
use crate::adapters::process_utils::BackendRuntime;
use crate::adapters::sources::SourceRegistry;
use crate::execution::{CommandSpec, InvocationOutput, ProcessSpawnRequest};
use crate::logging::LogLevel;
use crate::models::{
    Architecture, InstallationOptions, ManagerAction, ManagerCapabilities, ManagerId,
    ManagerProperties, ManagerSource, ManagerStatus, OperationVerdict, Package, PackageDetails,
    PackageScope, SourceCapabilities,
};
use crate::parsing::table::char_offset;
use crate::parsing::{
    HeaderTable, LineParser, NoiseFilter, TableRow, key_value_lines, strip_ellipsis, truncated,
};

pub const WINGET_PROPERTIES: ManagerProperties = ManagerProperties {
    id: ManagerId::Winget,
    name: "WinGet",
    description: "Microsoft's official package manager. Contains general software and Microsoft Store apps.",
    executable_friendly_name: "winget.exe",
    executable_call_args: &[],
    install_verb: "install",
    update_verb: "update",
    uninstall_verb: "uninstall",
};

pub const WINGET_CAPABILITIES: ManagerCapabilities = ManagerCapabilities {
    can_run_as_admin: true,
    can_skip_integrity_checks: true,
    can_run_interactively: true,
    supports_custom_versions: true,
    supports_custom_architectures: true,
    supported_architectures: &[Architecture::X86, Architecture::X64, Architecture::Arm64],
    supports_custom_scopes: true,
    supports_custom_locations: true,
    supports_custom_sources: true,
    sources: SourceCapabilities {
        knows_package_count: false,
        knows_update_date: false,
        must_be_installed_as_admin: true,
    },
    ..ManagerCapabilities::NONE
};

const WINGET_CANDIDATES: &[&str] = &["winget.exe"];

const WINGET_NOISE: NoiseFilter = NoiseFilter::new(
    &["", "have", "an", "'winget", "pin'", "Version"],
    &["", "have", "an", "'winget", "pin'", "Version"],
);

const MAIN_SOURCE_NAME: &str = "winget";
const MAIN_SOURCE_URL: &str = "https://cdn.winget.microsoft.com/cache";
const MSSTORE_SOURCE_URL: &str = "https://storeedgefd.dsx.mp.microsoft.com/v9.0";
const UNKNOWN_SOURCE_URL: &str = "https://microsoft.com/winget";
const LOCAL_PC_SOURCE_URL: &str = "https://microsoft.com/local-pc-source";
const GOG_SOURCE_URL: &str = "https://microsoft.com/gog-source";
const MICROSOFT_STORE_SOURCE_URL: &str = "https://microsoft.com/microsoft-store-source";

const DETAILS_LOCALE: &str = "en-US";
const LOCALE_MISSING_MARKERS: &[&str] = &[
    "The value provided for the `locale` argument is invalid",
    "No applicable installer found; see logs for more details.",
];

const REBOOT_REQUIRED: i32 = -1978334967;
const INSTALLER_HASH_MISMATCH: i32 = -1978335215;
const ALREADY_INSTALLED_CODES: &[i32] = &[
    0x8A15_010D_u32 as i32,
    0x8A15_004F_u32 as i32,
    0x8A15_010E_u32 as i32,
];
const REQUIRES_ADMIN_CODES: &[i32] = &[0x8A15_0019_u32 as i32, 0x8007_3D28_u32 as i32];
const NOTHING_TO_UPGRADE_MARKERS: &[&str] = &[
    "No applicable upgrade found",
    "No newer package versions are available from the configured sources",
];
const HASH_OVERRIDE_HINT: &str = "winget settings --enable InstallerHashOverride";
const ACCESS_DENIED: &str = "Access is denied";
const UNINSTALL_ELEVATION_MARKERS: &[&str] = &["1603", "0x80070005", ACCESS_DENIED];

const ID_COLUMN: usize = 0;
const VERSION_COLUMN: usize = 1;
const AVAILABLE_COLUMN: usize = 2;
const SOURCE_COLUMN: usize = 3;

pub fn winget_main_source() -> ManagerSource {
    ManagerSource::new(ManagerId::Winget, MAIN_SOURCE_NAME, MAIN_SOURCE_URL)
}

pub fn winget_known_sources() -> Vec<ManagerSource> {
    vec![
        winget_main_source(),
        ManagerSource::new(ManagerId::Winget, "msstore", MSSTORE_SOURCE_URL),
    ]
}

fn winget_request(
    base: CommandSpec,
    action: ManagerAction,
    args: impl IntoIterator<Item = impl Into<String>>,
) -> ProcessSpawnRequest {
    ProcessSpawnRequest::new(ManagerId::Winget, action, base.args(args))
}

pub fn winget_search_request(base: CommandSpec, query: &str) -> ProcessSpawnRequest {
    winget_request(
        base,
        ManagerAction::Search,
        ["search", query, "--accept-source-agreements"],
    )
}

pub fn winget_list_request(base: CommandSpec) -> ProcessSpawnRequest {
    winget_request(
        base,
        ManagerAction::ListInstalled,
        ["list", "--accept-source-agreements"],
    )
}

pub fn winget_updates_request(base: CommandSpec) -> ProcessSpawnRequest {
    winget_request(
        base,
        ManagerAction::ListOutdated,
        ["update", "--include-unknown", "--accept-source-agreements"],
    )
}

pub fn winget_refresh_request(base: CommandSpec) -> ProcessSpawnRequest {
    winget_request(base, ManagerAction::Refresh, ["source", "update"])
}

pub fn winget_versions_request(base: CommandSpec, package: &Package) -> ProcessSpawnRequest {
    let mut args = vec!["show".to_string()];
    args.extend(package_address(package));
    args.extend(["--versions", "--accept-source-agreements"].map(String::from));
    winget_request(base, ManagerAction::Versions, args)
}

pub fn winget_show_request(
    base: CommandSpec,
    package: &Package,
    locale: Option<&str>,
) -> ProcessSpawnRequest {
    let mut args = vec!["show".to_string()];
    args.extend(package_address(package));
    args.extend(["--disable-interactivity", "--accept-source-agreements"].map(String::from));
    if let Some(locale) = locale {
        args.push("--locale".to_string());
        args.push(locale.to_string());
    }
    winget_request(base, ManagerAction::Details, args)
}

pub fn winget_source_list_request(base: CommandSpec) -> ProcessSpawnRequest {
    winget_request(base, ManagerAction::ListSources, ["source", "list"])
}

/// One-time preparation before retrying with `--ignore-security-hash`.
pub fn winget_hash_override_request(base: CommandSpec) -> ProcessSpawnRequest {
    winget_request(
        base,
        ManagerAction::Install,
        ["settings", "--enable", "InstallerHashOverride"],
    )
    .requires_elevation(true)
}

/// Id addressing, falling back to the name when a table column truncated
/// the id.
pub fn package_address(package: &Package) -> Vec<String> {
    if !truncated(&package.id) {
        vec!["--id".to_string(), package.id.clone(), "--exact".to_string()]
    } else if !truncated(&package.name) {
        vec!["--name".to_string(), package.name.clone(), "--exact".to_string()]
    } else {
        vec!["--id".to_string(), strip_ellipsis(&package.id)]
    }
}

/// Column start offsets in the order id, version, available, source. Some
/// winget builds prefix every header with `Search` and suffix `Available`
/// with `Header`.
pub fn winget_columns(header: &str) -> Vec<Option<usize>> {
    let (prefix, suffix) = if header.contains("SearchId") {
        ("Search", "Header")
    } else {
        ("", "")
    };

    vec![
        char_offset(header, &format!("{prefix}Id")),
        char_offset(header, &format!("{prefix}Version")),
        char_offset(header, &format!("Available{suffix}")),
        char_offset(header, &format!("{prefix}Source")),
    ]
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WingetTable {
    Search,
    Installed,
    Updates,
}

pub struct WingetTableParser<'a> {
    kind: WingetTable,
    table: HeaderTable,
    sources: &'a SourceRegistry,
    packages: Vec<Package>,
}

impl<'a> WingetTableParser<'a> {
    pub fn new(kind: WingetTable, sources: &'a SourceRegistry) -> Self {
        let table = HeaderTable::resolved_by(winget_columns);
        let table = match kind {
            WingetTable::Updates => table.reset_on_blank(),
            _ => table,
        };
        Self {
            kind,
            table,
            sources,
            packages: Vec::new(),
        }
    }
}

impl LineParser for WingetTableParser<'_> {
    type Output = Vec<Package>;

    fn push(&mut self, line: &str) {
        if self.kind == WingetTable::Updates && line.contains("have pins") {
            return;
        }
        let Some(row) = self.table.push(line) else {
            return;
        };
        let package = match self.kind {
            WingetTable::Search => search_row(&row, self.sources),
            WingetTable::Installed => installed_row(&row, self.sources),
            WingetTable::Updates => update_row(&row, self.sources),
        };
        if let Some(package) = package {
            self.packages.push(package);
        }
    }

    fn finish(self) -> Vec<Package> {
        self.packages
    }
}

struct RowStart {
    name: String,
    id: String,
    shift: usize,
    version_start: usize,
}

fn row_start(row: &TableRow<'_>) -> Option<RowStart> {
    let id_start = row.offset(ID_COLUMN)?;
    let version_start = row.offset(VERSION_COLUMN)?;
    if id_start == 0 || id_start >= version_start || version_start >= row.char_len() {
        return None;
    }

    let shift = row.walk_back(ID_COLUMN);
    Some(RowStart {
        name: row.slice(0, Some(id_start - shift)),
        id: row.token_at(id_start - shift),
        shift,
        version_start: version_start - shift,
    })
}

fn named_source(row: &TableRow<'_>, shift: usize, sources: &SourceRegistry) -> Option<ManagerSource> {
    let start = row.offset(SOURCE_COLUMN)?.checked_sub(shift)?;
    if start >= row.char_len() {
        return None;
    }
    let name = row.token_at(start);
    (!name.is_empty()).then(|| sources.get_or_default(&name))
}

fn search_row(row: &TableRow<'_>, sources: &SourceRegistry) -> Option<Package> {
    let start = row_start(row)?;
    let version = row.token_at(start.version_start);
    if WINGET_NOISE.rejects(&start.id, &version) {
        return None;
    }
    let source = named_source(row, start.shift, sources).unwrap_or_else(|| sources.main());
    Some(Package::new(start.name, start.id, version, source, PackageScope::User))
}

fn installed_row(row: &TableRow<'_>, sources: &SourceRegistry) -> Option<Package> {
    let start = row_start(row)?;
    let version_end = row
        .offset(AVAILABLE_COLUMN)
        .or_else(|| row.offset(SOURCE_COLUMN))
        .map(|end| end.saturating_sub(start.shift));
    let version = row.slice(start.version_start, version_end);
    if WINGET_NOISE.rejects(&start.id, &version) {
        return None;
    }
    let source = named_source(row, start.shift, sources).unwrap_or_else(|| local_source(&start.id));
    Some(Package::new(start.name, start.id, version, source, PackageScope::User))
}

fn update_row(row: &TableRow<'_>, sources: &SourceRegistry) -> Option<Package> {
    let available = row.offset(AVAILABLE_COLUMN)?;
    if available <= row.offset(VERSION_COLUMN)? || available >= row.char_len() {
        return None;
    }
    let start = row_start(row)?;
    let available = available - start.shift;

    let version = row.slice(start.version_start, Some(available));
    let new_version = match row.offset(SOURCE_COLUMN) {
        Some(source_start) => row.slice(available, Some(source_start.saturating_sub(start.shift))),
        None => row.token_at(available),
    };
    if WINGET_NOISE.rejects(&start.id, &version) {
        return None;
    }
    let source = named_source(row, start.shift, sources).unwrap_or_else(|| sources.main());
    Some(Package::upgradable(
        start.name,
        start.id,
        version,
        new_version,
        source,
        PackageScope::User,
    ))
}

/// Best guess at where a locally installed package without a source column
/// came from, judged by the shape of its id.
pub fn local_source(id: &str) -> ManagerSource {
    let (name, url) = local_source_kind(id);
    ManagerSource::new(ManagerId::Winget, name, url)
}

fn local_source_kind(id: &str) -> (&'static str, &'static str) {
    let android = id
        .chars()
        .all(|c| c.is_ascii_lowercase() || c == '.' || c == '…')
        && id.matches('.').count() >= 2;
    if android {
        return ("Android Subsystem", LOCAL_PC_SOURCE_URL);
    }

    if id == "Steam" || numbered(id, "Steam App") {
        return ("Steam", LOCAL_PC_SOURCE_URL);
    }

    if id == "Uplay" || numbered(id, "Uplay Install") {
        return ("Ubisoft Connect", LOCAL_PC_SOURCE_URL);
    }

    if let Some(prefix) = id.strip_suffix("_is1")
        && !prefix.is_empty()
        && prefix.chars().all(|c| c.is_ascii_digit())
    {
        return ("GOG", GOG_SOURCE_URL);
    }

    if id.matches('_').count() == 1
        && let Some((_, suffix)) = id.split_once('_')
    {
        let suffix_len = suffix.chars().count();
        if suffix_len == 13 || suffix_len == 14 || (suffix_len <= 13 && id.ends_with('…')) {
            return ("Microsoft Store", MICROSOFT_STORE_SOURCE_URL);
        }
    }

    ("Local PC", LOCAL_PC_SOURCE_URL)
}

fn numbered(id: &str, marker: &str) -> bool {
    id.strip_prefix(marker)
        .map(str::trim)
        .is_some_and(|rest| !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit()))
}

pub struct WingetVersionsParser {
    table: HeaderTable,
    versions: Vec<String>,
}

impl Default for WingetVersionsParser {
    fn default() -> Self {
        Self {
            table: HeaderTable::new(),
            versions: Vec::new(),
        }
    }
}

impl LineParser for WingetVersionsParser {
    type Output = Vec<String>;

    fn push(&mut self, line: &str) {
        if let Some(row) = self.table.push(line) {
            self.versions.push(row.line().trim().to_string());
        }
    }

    fn finish(self) -> Vec<String> {
        self.versions
    }
}

pub fn parse_winget_sources(lines: &[String]) -> Vec<ManagerSource> {
    let mut table = HeaderTable::new();
    let mut sources = Vec::new();
    for line in lines {
        let Some(row) = table.push(line) else {
            continue;
        };
        let cells: Vec<&str> = row.line().split_whitespace().collect();
        if let [name, url, ..] = cells.as_slice() {
            sources.push(ManagerSource::new(ManagerId::Winget, *name, *url));
        }
    }
    sources
}

pub fn winget_manifest_url(package: &Package) -> Option<String> {
    match package.source.name.as_str() {
        MAIN_SOURCE_NAME => {
            let first = package.id.chars().next()?.to_lowercase().to_string();
            let path = if package.id.contains('.') {
                package.id.split('.').collect::<Vec<_>>().join("/")
            } else {
                format!("{0}/{0}", package.id)
            };
            Some(format!(
                "https://github.com/microsoft/winget-pkgs/tree/master/manifests/{first}/{path}"
            ))
        }
        "msstore" => Some(format!("https://apps.microsoft.com/detail/{}", package.id)),
        _ => None,
    }
}

pub fn parse_winget_details(package: &Package, lines: &[String]) -> PackageDetails {
    let values = key_value_lines(lines.iter().map(String::as_str));
    let mut details = PackageDetails::for_package(package);

    details.manifest_url = winget_manifest_url(package);
    details.publisher = values.get_owned("Publisher");
    details.author = values.get_owned("Author");
    details.homepage_url = values.get_owned("Homepage");
    details.license = values.get_owned("License");
    details.license_url = values.get_owned("License Url");
    details.installer_hash = values.get_owned("Installer SHA256");
    details.installer_url = values.get_owned("Installer Url");
    details.installer_type = values.get_owned("Installer Type");
    details.update_date = values.get_owned("Release Date");
    details.release_notes_url = values.get_owned("Release Notes Url");
    details.description = values.get_owned("Description");
    details.release_notes = values.get_owned("Release Notes");
    details.tags = values.get_list("Tags");
    details
}

pub fn winget_uninstall_args(package: &Package, options: &InstallationOptions) -> Vec<String> {
    let mut args = vec![WINGET_PROPERTIES.uninstall_verb.to_string()];
    args.extend(package_address(package));
    args.push("--accept-source-agreements".to_string());

    match options.scope {
        Some(PackageScope::User) => args.extend(["--scope", "user"].map(String::from)),
        Some(PackageScope::Global) => args.extend(["--scope", "machine"].map(String::from)),
        None => {}
    }

    if let Some(version) = options.requested_version() {
        args.extend(["--version".to_string(), version.to_string(), "--force".to_string()]);
    }

    if options.interactive {
        args.push("--interactive".to_string());
    } else {
        args.extend(["--silent", "--disable-interactivity"].map(String::from));
    }

    args.extend(custom_parameters(options));
    args
}

pub fn winget_install_args(package: &Package, options: &InstallationOptions) -> Vec<String> {
    let mut args = winget_uninstall_args(package, options);
    args[0] = WINGET_PROPERTIES.install_verb.to_string();
    args.push("--accept-package-agreements".to_string());

    if options.skip_hash_check {
        args.push("--ignore-security-hash".to_string());
    }

    if let Some(location) = options.install_location() {
        args.push("--location".to_string());
        args.push(location.to_string());
    }

    if let Some(architecture) = options.architecture.and_then(architecture_arg) {
        args.push("--architecture".to_string());
        args.push(architecture.to_string());
    }

    args
}

/// Update arguments. An architecture the caller did not pick is inferred
/// from `64-bit`/`x64` and `32-bit`/`x86` markers in the name or id.
pub fn winget_update_args(package: &Package, options: &InstallationOptions) -> Vec<String> {
    let mut options = options.clone();
    if options.architecture.is_none() {
        options.architecture = inferred_architecture(package);
    }

    let mut args = winget_install_args(package, &options);
    args[0] = WINGET_PROPERTIES.update_verb.to_string();
    if !args.iter().any(|arg| arg == "--force") {
        args.push("--force".to_string());
    }
    args.push("--include-unknown".to_string());
    args
}

fn inferred_architecture(package: &Package) -> Option<Architecture> {
    let id = package.id.to_ascii_lowercase();
    if package.name.contains("64-bit") || id.contains("x64") {
        Some(Architecture::X64)
    } else if package.name.contains("32-bit") || id.contains("x86") {
        Some(Architecture::X86)
    } else {
        None
    }
}

fn architecture_arg(architecture: Architecture) -> Option<&'static str> {
    match architecture {
        Architecture::X86 => Some("x86"),
        Architecture::X64 => Some("x64"),
        Architecture::Arm64 => Some("arm64"),
        Architecture::Arm => None,
    }
}

fn custom_parameters(options: &InstallationOptions) -> impl Iterator<Item = String> + '_ {
    options
        .custom_parameters
        .iter()
        .map(|parameter| parameter.trim())
        .filter(|parameter| !parameter.is_empty())
        .map(str::to_owned)
}

pub fn winget_install_verdict(
    options: &mut InstallationOptions,
    output: &InvocationOutput,
) -> OperationVerdict {
    let code = output.exit_code;
    if code == REBOOT_REQUIRED {
        return OperationVerdict::Succeeded;
    }

    if NOTHING_TO_UPGRADE_MARKERS
        .iter()
        .any(|marker| output.contains(marker))
    {
        return OperationVerdict::Succeeded;
    }

    if ALREADY_INSTALLED_CODES.contains(&code) {
        return OperationVerdict::Succeeded;
    }

    if output.contains(HASH_OVERRIDE_HINT) && !options.skip_hash_check {
        options.skip_hash_check = true;
        return OperationVerdict::AutoRetry;
    }

    if (REQUIRES_ADMIN_CODES.contains(&code) || output.contains(ACCESS_DENIED))
        && let Some(verdict) = retry_elevated(options)
    {
        return verdict;
    }

    if code == INSTALLER_HASH_MISMATCH {
        return OperationVerdict::Failed;
    }

    if code == 0 {
        OperationVerdict::Succeeded
    } else {
        OperationVerdict::Failed
    }
}

pub fn winget_uninstall_verdict(
    options: &mut InstallationOptions,
    output: &InvocationOutput,
) -> OperationVerdict {
    if UNINSTALL_ELEVATION_MARKERS
        .iter()
        .any(|marker| output.contains(marker))
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

pub struct WingetBackend {
    runtime: BackendRuntime,
    sources: SourceRegistry,
}

impl WingetBackend {
    pub fn new(context: BackendContext) -> Self {
        Self {
            runtime: BackendRuntime::new(context, &WINGET_PROPERTIES, WINGET_CANDIDATES),
            sources: SourceRegistry::new(winget_main_source(), WINGET_CAPABILITIES.sources)
                .with_default_url(UNKNOWN_SOURCE_URL),
        }
    }

    async fn enable_hash_override(&self) {
        self.runtime
            .diagnostic(LogLevel::Info, "enabling installer hash override for winget");
        let request = winget_hash_override_request(self.runtime.command());
        match self.runtime.run(request).await {
            Ok(output) if output.succeeded() => {}
            Ok(output) => tracing::warn!(
                manager = ?ManagerId::Winget,
                exit_code = output.exit_code,
                "enabling InstallerHashOverride failed"
            ),
            Err(error) => tracing::warn!(
                manager = ?ManagerId::Winget,
                kind = ?error.kind,
                "enabling InstallerHashOverride failed: {error}"
            ),
        }
    }
}

#[async_trait]
impl ManagerBackend for WingetBackend {
    fn properties(&self) -> &'static ManagerProperties {
        &WINGET_PROPERTIES
    }

    fn capabilities(&self) -> &'static ManagerCapabilities {
        &WINGET_CAPABILITIES
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
        let request = winget_search_request(self.runtime.command(), query);
        self.runtime
            .parse(request, WingetTableParser::new(WingetTable::Search, &self.sources))
            .await
    }

    async fn list_installed(&self) -> AdapterResult<Vec<Package>> {
        let request = winget_list_request(self.runtime.command());
        self.runtime
            .parse(request, WingetTableParser::new(WingetTable::Installed, &self.sources))
            .await
    }

    async fn list_upgradable(&self) -> AdapterResult<Vec<Package>> {
        let request = winget_updates_request(self.runtime.command());
        self.runtime
            .parse(request, WingetTableParser::new(WingetTable::Updates, &self.sources))
            .await
    }

    async fn package_details(&self, package: &Package) -> AdapterResult<PackageDetails> {
        let request = winget_show_request(self.runtime.command(), package, Some(DETAILS_LOCALE));
        let mut output = self.runtime.run(request).await?;

        if LOCALE_MISSING_MARKERS
            .iter()
            .any(|marker| output.contains(marker))
        {
            let request = winget_show_request(self.runtime.command(), package, None);
            output = self.runtime.run(request).await?;
        }

        Ok(parse_winget_details(package, &output.stdout_lines))
    }

    async fn package_versions(&self, package: &Package) -> AdapterResult<Vec<String>> {
        let request = winget_versions_request(self.runtime.command(), package);
        self.runtime
            .parse(request, WingetVersionsParser::default())
            .await
    }

    async fn refresh_indexes(&self) -> AdapterResult<()> {
        let request = winget_refresh_request(self.runtime.command());
        self.runtime.run(request).await.map(|_| ())
    }

    fn install_args(&self, package: &Package, options: &InstallationOptions) -> Vec<String> {
        winget_install_args(package, options)
    }

    fn update_args(&self, package: &Package, options: &InstallationOptions) -> Vec<String> {
        winget_update_args(package, options)
    }

    fn uninstall_args(&self, package: &Package, options: &InstallationOptions) -> Vec<String> {
        winget_uninstall_args(package, options)
    }

    async fn classify_install(
        &self,
        _package: &Package,
        options: &mut InstallationOptions,
        output: &InvocationOutput,
    ) -> OperationVerdict {
        let hash_skipped_before = options.skip_hash_check;
        let verdict = winget_install_verdict(options, output);
        if verdict == OperationVerdict::AutoRetry
            && !hash_skipped_before
            && options.skip_hash_check
        {
            self.enable_hash_override().await;
        }
        verdict
    }

    async fn classify_uninstall(
        &self,
        _package: &Package,
        options: &mut InstallationOptions,
        output: &InvocationOutput,
    ) -> OperationVerdict {
        winget_uninstall_verdict(options, output)
    }

    fn multi_source(&self) -> Option<&dyn MultiSourceBackend> {
        Some(self)
    }
}

#[async_trait]
impl MultiSourceBackend for WingetBackend {
    fn known_sources(&self) -> Vec<ManagerSource> {
        winget_known_sources()
    }

    async fn list_sources(&self) -> AdapterResult<Vec<ManagerSource>> {
        let request = winget_source_list_request(self.runtime.command());
        let output = self.runtime.run_checked(request).await?;
        Ok(parse_winget_sources(&output.stdout_lines))
    }

    fn add_source_args(&self, source: &ManagerSource) -> Vec<String> {
        vec![
            "source".to_string(),
            "add".to_string(),
            "--name".to_string(),
            source.name.clone(),
            "--arg".to_string(),
            source.url.clone(),
            "--accept-source-agreements".to_string(),
            "--disable-interactivity".to_string(),
        ]
    }

    fn remove_source_args(&self, source: &ManagerSource) -> Vec<String> {
        vec![
            "source".to_string(),
            "remove".to_string(),
            "--name".to_string(),
            source.name.clone(),
            "--disable-interactivity".to_string(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::{
        WingetTable, WingetTableParser, WingetVersionsParser, local_source, package_address,
        parse_winget_details, parse_winget_sources, winget_columns, winget_install_args,
        winget_install_verdict, winget_main_source, winget_manifest_url, winget_uninstall_args,
        winget_uninstall_verdict, winget_update_args, winget_updates_request,
        winget_search_request, WINGET_CAPABILITIES, UNKNOWN_SOURCE_URL,
    };
    use crate::adapters::sources::SourceRegistry;
    use crate::execution::{CommandSpec, InvocationOutput};
    use crate::models::{
        Architecture, InstallationOptions, ManagerAction, ManagerId, ManagerSource,
        OperationVerdict, Package, PackageScope,
    };
    use crate::parsing::parse_text;

    fn registry() -> SourceRegistry {
        SourceRegistry::new(winget_main_source(), WINGET_CAPABILITIES.sources)
            .with_default_url(UNKNOWN_SOURCE_URL)
    }

    fn search_line(name: &str, id: &str, version: &str, matched: &str, source: &str) -> String {
        format!("{name:<18}{id:<26}{version:<13}{matched:<14}{source}")
    }

    fn search_fixture() -> String {
        [
            search_line("Name", "Id", "Version", "Match", "Source"),
            "-".repeat(77),
            search_line("Mozilla Firefox", "Mozilla.Firefox", "119.0", "Tag: firefox", "winget"),
            search_line("Firefox Nightly", "Mozilla.Firefox.Nightly", "121.0a1", "", "winget"),
            search_line("Firefox", "9NZVDKPMR9RD", "Unknown", "", "msstore"),
        ]
        .join("\n")
    }

    fn package(name: &str, id: &str) -> Package {
        Package::new(name, id, "1.0", winget_main_source(), PackageScope::User)
    }

    fn failed(code: i32, stderr: &str) -> InvocationOutput {
        InvocationOutput {
            exit_code: code,
            stdout_lines: Vec::new(),
            stderr: stderr.to_string(),
        }
    }

    #[test]
    fn search_request_accepts_source_agreements() {
        let request = winget_search_request(CommandSpec::new("winget.exe"), "firefox");
        assert_eq!(request.action, ManagerAction::Search);
        assert_eq!(
            request.command.args,
            vec!["search", "firefox", "--accept-source-agreements"]
        );
        assert_eq!(request.timeout, None);
    }

    #[test]
    fn updates_request_includes_unknown_versions() {
        let request = winget_updates_request(CommandSpec::new("winget.exe"));
        assert!(request.command.args.contains(&"--include-unknown".to_string()));
    }

    #[test]
    fn search_rows_resolve_sources_by_name() {
        let sources = registry();
        let packages = parse_text(
            WingetTableParser::new(WingetTable::Search, &sources),
            &search_fixture(),
        );

        assert_eq!(packages.len(), 3);
        assert_eq!(packages[0].name, "Mozilla Firefox");
        assert_eq!(packages[0].id, "Mozilla.Firefox");
        assert_eq!(packages[0].version, "119.0");
        assert_eq!(packages[0].source, winget_main_source());
        assert_eq!(packages[1].id, "Mozilla.Firefox.Nightly");
        assert_eq!(packages[2].source.name, "msstore");
        assert_eq!(packages[2].source.url, UNKNOWN_SOURCE_URL);
    }

    #[test]
    fn wide_glyphs_shift_the_row() {
        let sources = registry();
        let fixture = [
            search_line("Name", "Id", "Version", "Match", "Source"),
            "-".repeat(77),
            // Two double-width glyphs: the console padded two columns less.
            format!("{:<16}{:<26}{:<13}{:<14}{}", "微信", "Tencent.WeChat", "3.9.8", "", "winget"),
        ]
        .join("\n");

        let packages = parse_text(WingetTableParser::new(WingetTable::Search, &sources), &fixture);
        assert_eq!(packages.len(), 1);
        assert_eq!(packages[0].name, "微信");
        assert_eq!(packages[0].id, "Tencent.WeChat");
        assert_eq!(packages[0].version, "3.9.8");
        assert_eq!(packages[0].source.name, "winget");
    }

    #[test]
    fn search_without_source_column_uses_main_source() {
        let sources = registry();
        let fixture = format!(
            "{:<18}{:<26}{}\n{}\n{:<18}{:<26}{}",
            "Name", "Id", "Version", "-".repeat(50), "Git", "Git.Git", "2.44.0"
        );
        let packages = parse_text(WingetTableParser::new(WingetTable::Search, &sources), &fixture);
        assert_eq!(packages.len(), 1);
        assert_eq!(packages[0].source, winget_main_source());
    }

    fn list_line(name: &str, id: &str, version: &str, available: &str, source: &str) -> String {
        format!("{name:<20}{id:<44}{version:<14}{available:<12}{source}")
    }

    #[test]
    fn installed_rows_without_source_get_local_sources() {
        let sources = registry();
        let fixture = [
            list_line("Name", "Id", "Version", "Available", "Source"),
            "-".repeat(96),
            list_line("Mozilla Firefox", "Mozilla.Firefox", "119.0", "120.0", "winget"),
            list_line("Git", "Git.Git", "2.44.0", "", "winget"),
            list_line("Steam", "Steam", "2.10.91.91", "", ""),
            list_line("Windows Terminal", "Microsoft.WindowsTerminal_8wekyb3d8bbwe", "1.18.3181.0", "", ""),
            list_line("Cyberpunk 2077", "1207664643_is1", "2.1", "", ""),
            list_line("Chrome", "com.android.chrome", "120.0", "", ""),
            list_line("7-Zip 23.01", "7-Zip", "23.01", "", ""),
        ]
        .join("\n");

        let packages = parse_text(WingetTableParser::new(WingetTable::Installed, &sources), &fixture);
        let source_names: Vec<&str> = packages.iter().map(|p| p.source.name.as_str()).collect();
        assert_eq!(
            source_names,
            vec![
                "winget",
                "winget",
                "Steam",
                "Microsoft Store",
                "GOG",
                "Android Subsystem",
                "Local PC"
            ]
        );
        assert_eq!(packages[0].version, "119.0");
        assert_eq!(packages[2].version, "2.10.91.91");
        assert!(packages.iter().all(|package| !package.is_upgradable()));
    }

    #[test]
    fn local_source_heuristics() {
        assert_eq!(local_source("Steam App 1245620").name, "Steam");
        assert_eq!(local_source("Uplay Install 4553").name, "Ubisoft Connect");
        assert_eq!(local_source("Uplay").name, "Ubisoft Connect");
        assert_eq!(local_source("Microsoft.Paint_8wekyb3d8…").name, "Microsoft Store");
        assert_eq!(local_source("abc_is1").name, "Local PC");
        assert_eq!(local_source("com.example").name, "Local PC");
        assert_eq!(local_source("Steam App x").name, "Local PC");
        assert_eq!(local_source("1207664643_is1").url, "https://microsoft.com/gog-source");
    }

    #[test]
    fn updates_table_restarts_after_blank_lines_and_skips_pins() {
        let sources = registry();
        let header = list_line("Name", "Id", "Version", "Available", "Source");
        let fixture = [
            header.clone(),
            "-".repeat(96),
            list_line("Mozilla Firefox", "Mozilla.Firefox", "119.0", "120.0", "winget"),
            list_line("Microsoft Teams", "Microsoft.Teams", "Unknown", "1.7.00", "winget"),
            String::new(),
            "2 upgrades available.".to_string(),
            "1 package(s) have pins that prevent upgrade.".to_string(),
            String::new(),
            "The following packages have an upgrade available, but require explicit targeting for upgrade:"
                .to_string(),
            header,
            "-".repeat(96),
            list_line("Spotify", "Spotify.Spotify", "1.2.25", "1.2.26", "winget"),
        ]
        .join("\n");

        let packages = parse_text(WingetTableParser::new(WingetTable::Updates, &sources), &fixture);
        assert_eq!(packages.len(), 3);
        assert_eq!(packages[0].new_version.as_deref(), Some("120.0"));
        assert_eq!(packages[1].version, "Unknown");
        assert_eq!(packages[2].id, "Spotify.Spotify");
        assert!(packages.iter().all(Package::is_upgradable));
    }

    #[test]
    fn search_prefixed_headers_are_recognized() {
        let header = "SearchName  SearchId  SearchVersion  AvailableHeader  SearchSource";
        let columns = winget_columns(header);
        assert_eq!(columns, vec![Some(12), Some(22), Some(37), Some(54)]);
    }

    #[test]
    fn noise_ids_are_dropped() {
        let sources = registry();
        let fixture = [
            search_line("Name", "Id", "Version", "Match", "Source"),
            "-".repeat(77),
            search_line("The following", "have", "an", "", ""),
            search_line("Git", "Git.Git", "2.44.0", "", "winget"),
        ]
        .join("\n");
        let packages = parse_text(WingetTableParser::new(WingetTable::Search, &sources), &fixture);
        assert_eq!(packages.len(), 1);
        assert_eq!(packages[0].id, "Git.Git");
    }

    #[test]
    fn truncated_ids_switch_to_name_addressing() {
        assert_eq!(
            package_address(&package("Mozilla Firefox", "Mozilla.Fire…")),
            vec!["--name", "Mozilla Firefox", "--exact"]
        );
        assert_eq!(
            package_address(&package("Mozilla Fi…", "Mozilla.Fire…")),
            vec!["--id", "Mozilla.Fire"]
        );
        assert_eq!(
            package_address(&package("Git", "Git.Git")),
            vec!["--id", "Git.Git", "--exact"]
        );
    }

    #[test]
    fn uninstall_args_follow_options() {
        let options = InstallationOptions {
            scope: Some(PackageScope::Global),
            version: Some("1.2".to_string()),
            ..InstallationOptions::default()
        };
        assert_eq!(
            winget_uninstall_args(&package("Git", "Git.Git"), &options),
            vec![
                "uninstall",
                "--id",
                "Git.Git",
                "--exact",
                "--accept-source-agreements",
                "--scope",
                "machine",
                "--version",
                "1.2",
                "--force",
                "--silent",
                "--disable-interactivity",
            ]
        );
    }

    #[test]
    fn install_args_add_agreements_hash_location_and_architecture() {
        let options = InstallationOptions {
            interactive: true,
            skip_hash_check: true,
            custom_install_location: Some("D:\\Apps\\Git".to_string()),
            architecture: Some(Architecture::Arm64),
            ..InstallationOptions::default()
        };
        let args = winget_install_args(&package("Git", "Git.Git"), &options);
        assert_eq!(args[0], "install");
        assert!(args.contains(&"--interactive".to_string()));
        assert!(args.contains(&"--accept-package-agreements".to_string()));
        assert!(args.contains(&"--ignore-security-hash".to_string()));
        assert!(args.windows(2).any(|pair| pair == ["--location", "D:\\Apps\\Git"]));
        assert!(args.windows(2).any(|pair| pair == ["--architecture", "arm64"]));
    }

    #[test]
    fn update_infers_architecture_without_touching_options() {
        let options = InstallationOptions::default();
        let args = winget_update_args(&package("7-Zip 23.01 (x64)", "7zip.7zip.x64"), &options);
        assert_eq!(args[0], "update");
        assert!(args.windows(2).any(|pair| pair == ["--architecture", "x64"]));
        assert_eq!(args.iter().filter(|arg| *arg == "--force").count(), 1);
        assert_eq!(args.last().map(String::as_str), Some("--include-unknown"));
        assert_eq!(options.architecture, None);

        let args = winget_update_args(&package("Tool (32-bit)", "Vendor.Tool"), &options);
        assert!(args.windows(2).any(|pair| pair == ["--architecture", "x86"]));
    }

    #[test]
    fn reboot_and_already_installed_codes_succeed() {
        let mut options = InstallationOptions::default();
        assert_eq!(
            winget_install_verdict(&mut options, &failed(-1978334967, "")),
            OperationVerdict::Succeeded
        );
        assert_eq!(
            winget_install_verdict(&mut options, &failed(0x8A15_010D_u32 as i32, "")),
            OperationVerdict::Succeeded
        );
        assert_eq!(
            winget_install_verdict(&mut options, &failed(1, "No applicable upgrade found.")),
            OperationVerdict::Succeeded
        );
        assert_eq!(options, InstallationOptions::default());
    }

    #[test]
    fn hash_hint_retries_once_with_skip_hash() {
        let output = failed(
            -1978335215,
            "Installer hash does not match. To override, run winget settings --enable InstallerHashOverride",
        );
        let mut options = InstallationOptions::default();
        assert_eq!(winget_install_verdict(&mut options, &output), OperationVerdict::AutoRetry);
        assert!(options.skip_hash_check);
        assert_eq!(winget_install_verdict(&mut options, &output), OperationVerdict::Failed);
    }

    #[test]
    fn access_denied_retries_elevated_then_fails() {
        let output = failed(5, "Access is denied.");
        let mut options = InstallationOptions::default();

        assert_eq!(winget_install_verdict(&mut options, &output), OperationVerdict::AutoRetry);
        assert!(options.run_as_administrator);

        let snapshot = options.clone();
        assert_eq!(winget_install_verdict(&mut options, &output), OperationVerdict::Failed);
        assert_eq!(options, snapshot);
    }

    #[test]
    fn admin_exit_codes_retry_elevated() {
        let mut options = InstallationOptions::default();
        assert_eq!(
            winget_install_verdict(&mut options, &failed(0x8A15_0019_u32 as i32, "")),
            OperationVerdict::AutoRetry
        );
        assert!(options.run_as_administrator);
    }

    #[test]
    fn uninstall_verdict_elevates_on_msi_errors() {
        let mut options = InstallationOptions::default();
        let output = failed(1603, "Uninstall failed with exit code: 1603");
        assert_eq!(winget_uninstall_verdict(&mut options, &output), OperationVerdict::AutoRetry);
        assert_eq!(winget_uninstall_verdict(&mut options, &output), OperationVerdict::Failed);
        assert_eq!(
            winget_uninstall_verdict(&mut options, &InvocationOutput::default()),
            OperationVerdict::Succeeded
        );
    }

    #[test]
    fn versions_follow_the_dashes() {
        let fixture = "Found Git [Git.Git]\nVersion\n-------\n2.44.0\n2.43.0\n";
        let versions = parse_text(WingetVersionsParser::default(), fixture);
        assert_eq!(versions, vec!["2.44.0", "2.43.0"]);
    }

    #[test]
    fn source_list_rows_become_sources() {
        let lines: Vec<String> = [
            "Name     Argument                                      Explicit",
            "--------------------------------------------------------------",
            "msstore  https://storeedgefd.dsx.mp.microsoft.com/v9.0  false",
            "winget   https://cdn.winget.microsoft.com/cache         false",
        ]
        .map(String::from)
        .to_vec();
        let sources = parse_winget_sources(&lines);
        assert_eq!(sources.len(), 2);
        assert_eq!(sources[1], winget_main_source());
    }

    #[test]
    fn details_read_manifest_fields() {
        let lines: Vec<String> = [
            "Found Git [Git.Git]",
            "Version: 2.44.0",
            "Publisher: The Git Development Community",
            "Author: Linus Torvalds",
            "Homepage: https://gitforwindows.org",
            "License: GPL-2.0",
            "Description:",
            "  Git for Windows focuses on offering a lightweight,",
            "  native set of tools.",
            "Tags:",
            "  git",
            "  vcs",
            "Installer:",
            "  Installer Type: inno",
            "  Installer Url: https://github.com/git-for-windows/git/releases/download/v2.44.0.windows.1/Git-2.44.0-64-bit.exe",
            "  Installer SHA256: 0fd24a1b5b3b3c4a",
            "  Release Date: 2024-02-23",
        ]
        .map(String::from)
        .to_vec();

        let details = parse_winget_details(&package("Git", "Git.Git"), &lines);
        assert_eq!(details.publisher.as_deref(), Some("The Git Development Community"));
        assert_eq!(details.homepage_url.as_deref(), Some("https://gitforwindows.org"));
        assert_eq!(
            details.description.as_deref(),
            Some("Git for Windows focuses on offering a lightweight,\nnative set of tools.")
        );
        assert_eq!(details.tags, vec!["git", "vcs"]);
        assert_eq!(details.installer_type.as_deref(), Some("inno"));
        assert_eq!(details.installer_hash.as_deref(), Some("0fd24a1b5b3b3c4a"));
        assert_eq!(details.update_date.as_deref(), Some("2024-02-23"));
        assert_eq!(
            details.manifest_url.as_deref(),
            Some("https://github.com/microsoft/winget-pkgs/tree/master/manifests/g/Git/Git")
        );
    }

    #[test]
    fn store_packages_link_to_the_store() {
        let store = Package::new(
            "Firefox",
            "9NZVDKPMR9RD",
            "Unknown",
            ManagerSource::new(ManagerId::Winget, "msstore", "https://storeedgefd.dsx.mp.microsoft.com/v9.0"),
            PackageScope::User,
        );
        assert_eq!(
            winget_manifest_url(&store).as_deref(),
            Some("https://apps.microsoft.com/detail/9NZVDKPMR9RD")
        );
    }
}
