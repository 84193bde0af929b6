use async_trait::async_trait;

use crate::adapters::manager::{AdapterResult, BackendContext, ManagerBackend};
use crate::adapters::process_utils::{BackendRuntime, DETECT_TIMEOUT};
use crate::adapters::sources::SourceRegistry;
use crate::execution::{CommandSpec, InvocationOutput, ProcessSpawnRequest};
use crate::models::{
    Architecture, InstallationOptions, ManagerAction, ManagerCapabilities, ManagerId,
    ManagerProperties, ManagerSource, ManagerStatus, OperationVerdict, Package, PackageDetails,
    PackageScope,
};
use crate::parsing::{HeaderTable, LineParser, NoiseFilter, format_as_name, split_whitespace};

pub const DOTNET_PROPERTIES: ManagerProperties = ManagerProperties {
    id: ManagerId::DotnetTool,
    name: ".NET Tool",
    description: "A repository full of tools and executables designed with Microsoft's .NET ecosystem in mind.",
    executable_friendly_name: "dotnet tool",
    executable_call_args: &["tool"],
    install_verb: "install",
    update_verb: "update",
    uninstall_verb: "uninstall",
};

pub const DOTNET_CAPABILITIES: ManagerCapabilities = ManagerCapabilities {
    can_run_as_admin: true,
    supports_custom_versions: true,
    supports_custom_architectures: true,
    supported_architectures: &[
        Architecture::X86,
        Architecture::X64,
        Architecture::Arm,
        Architecture::Arm64,
    ],
    supports_custom_scopes: true,
    supports_pre_release: true,
    supports_custom_locations: true,
    ..ManagerCapabilities::NONE
};

const DOTNET_CANDIDATES: &[&str] = &["dotnet.exe", "dotnet"];
const OUTDATED_PROGRAM: &str = "dotnet-tools-outdated";

const DOTNET_NOISE: NoiseFilter = NoiseFilter::new(&[""], &[""]);

const NUGET_SOURCE_NAME: &str = "nuget.org";
const NUGET_SOURCE_URL: &str = "https://www.nuget.org/api/v2";

pub fn dotnet_main_source() -> ManagerSource {
    ManagerSource::new(ManagerId::DotnetTool, NUGET_SOURCE_NAME, NUGET_SOURCE_URL)
}

fn dotnet_request(
    base: CommandSpec,
    action: ManagerAction,
    args: impl IntoIterator<Item = impl Into<String>>,
) -> ProcessSpawnRequest {
    ProcessSpawnRequest::new(ManagerId::DotnetTool, action, base.args(args))
}

pub fn dotnet_search_request(base: CommandSpec, query: &str) -> ProcessSpawnRequest {
    dotnet_request(base, ManagerAction::Search, ["search", query])
}

pub fn dotnet_list_request(base: CommandSpec) -> ProcessSpawnRequest {
    dotnet_request(base, ManagerAction::ListInstalled, ["list", "--global"])
}

/// Upgrades come from the `dotnet-tools-outdated` global tool, not from the
/// SDK itself.
pub fn dotnet_outdated_request() -> ProcessSpawnRequest {
    dotnet_request(
        CommandSpec::new(OUTDATED_PROGRAM),
        ManagerAction::ListOutdated,
        std::iter::empty::<String>(),
    )
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DotnetTable {
    /// `Package ID  Latest Version  Authors  Downloads  Verified`
    Search,
    /// `Package Id  Version  Commands`
    Installed,
    /// `Name  Installed  Available`
    Outdated,
}

pub struct DotnetParser {
    kind: DotnetTable,
    table: HeaderTable,
    source: ManagerSource,
    packages: Vec<Package>,
}

impl DotnetParser {
    pub fn new(kind: DotnetTable, source: ManagerSource) -> Self {
        Self {
            kind,
            table: HeaderTable::new(),
            source,
            packages: Vec::new(),
        }
    }
}

impl LineParser for DotnetParser {
    type Output = Vec<Package>;

    fn push(&mut self, line: &str) {
        let Some(row) = self.table.push(line) else {
            return;
        };
        let cells = split_whitespace(row.line());
        let (id, version) = match cells.as_slice() {
            [id, version, ..] => (*id, *version),
            _ => return,
        };
        if DOTNET_NOISE.rejects(id, version) {
            return;
        }

        let package = match (self.kind, cells.as_slice()) {
            (DotnetTable::Search, _) => Package::new(
                format_as_name(id),
                id,
                version,
                self.source.clone(),
                PackageScope::User,
            ),
            (DotnetTable::Installed, _) => Package::new(
                format_as_name(id),
                id,
                version,
                self.source.clone(),
                PackageScope::Global,
            ),
            (DotnetTable::Outdated, [_, _, available, ..]) => Package::upgradable(
                format_as_name(id),
                id,
                version,
                *available,
                self.source.clone(),
                PackageScope::Global,
            ),
            (DotnetTable::Outdated, _) => return,
        };
        self.packages.push(package);
    }

    fn finish(self) -> Vec<Package> {
        self.packages
    }
}

/// NuGet-derived links; the tool CLI has no details command of its own.
pub fn dotnet_details(package: &Package) -> PackageDetails {
    let mut details = PackageDetails::for_package(package);
    let version = package.new_version.as_deref().unwrap_or(package.version.as_str());
    details.manifest_url = Some(format!("https://www.nuget.org/packages/{}", package.id));
    details.installer_url = Some(format!(
        "https://globalcdn.nuget.org/packages/{}.{version}.nupkg",
        package.id.to_lowercase()
    ));
    details.installer_type = Some("NuPkg (zipped manifest)".to_string());
    details
}

fn architecture_arg(architecture: Architecture) -> &'static str {
    match architecture {
        Architecture::X86 => "x86",
        Architecture::X64 => "x64",
        Architecture::Arm => "arm32",
        Architecture::Arm64 => "arm64",
    }
}

fn operation_args(verb: &str, package: &Package, options: &InstallationOptions) -> Vec<String> {
    let mut args = vec![verb.to_string(), package.id.clone()];
    args.extend(
        options
            .custom_parameters
            .iter()
            .filter(|parameter| !parameter.trim().is_empty())
            .cloned(),
    );

    if let Some(location) = options.install_location() {
        args.push("--tool-path".to_string());
        args.push(location.to_string());
    } else if options.effective_scope(package) == PackageScope::Global {
        args.push("--global".to_string());
    }
    args
}

pub fn dotnet_uninstall_args(package: &Package, options: &InstallationOptions) -> Vec<String> {
    operation_args(DOTNET_PROPERTIES.uninstall_verb, package, options)
}

pub fn dotnet_update_args(package: &Package, options: &InstallationOptions) -> Vec<String> {
    let mut args = operation_args(DOTNET_PROPERTIES.update_verb, package, options);
    if let Some(architecture) = options.architecture {
        args.push("--arch".to_string());
        args.push(architecture_arg(architecture).to_string());
    }
    args
}

pub fn dotnet_install_args(package: &Package, options: &InstallationOptions) -> Vec<String> {
    let mut args = dotnet_update_args(package, options);
    args[0] = DOTNET_PROPERTIES.install_verb.to_string();
    if let Some(version) = options.requested_version() {
        args.push("--version".to_string());
        args.push(version.to_string());
    }
    if options.pre_release {
        args.push("--prerelease".to_string());
    }
    args
}

/// A tool that is missing from the user manifest is usually a global one;
/// a failed non-global attempt is retried with `--global` once.
pub fn dotnet_operation_verdict(
    package: &Package,
    options: &mut InstallationOptions,
    output: &InvocationOutput,
) -> OperationVerdict {
    if output.succeeded() {
        return OperationVerdict::Succeeded;
    }
    if options.effective_scope(package) != PackageScope::Global && options.install_location().is_none()
    {
        options.scope = Some(PackageScope::Global);
        return OperationVerdict::AutoRetry;
    }
    OperationVerdict::Failed
}

pub struct DotnetBackend {
    runtime: BackendRuntime,
    sources: SourceRegistry,
}

impl DotnetBackend {
    pub fn new(context: BackendContext) -> Self {
        Self {
            runtime: BackendRuntime::new(context, &DOTNET_PROPERTIES, DOTNET_CANDIDATES),
            sources: SourceRegistry::new(dotnet_main_source(), DOTNET_CAPABILITIES.sources),
        }
    }

    fn parser(&self, kind: DotnetTable) -> DotnetParser {
        DotnetParser::new(kind, self.sources.main())
    }
}

#[async_trait]
impl ManagerBackend for DotnetBackend {
    fn properties(&self) -> &'static ManagerProperties {
        &DOTNET_PROPERTIES
    }

    fn capabilities(&self) -> &'static ManagerCapabilities {
        &DOTNET_CAPABILITIES
    }

    fn runtime(&self) -> &BackendRuntime {
        &self.runtime
    }

    fn sources(&self) -> &SourceRegistry {
        &self.sources
    }

    /// `dotnet tool -h` proves the tool command exists; the SDK version is
    /// read separately since the help text carries none.
    async fn load_status(&self) -> AdapterResult<ManagerStatus> {
        let mut status = self.runtime.detect(&["-h"]).await?;
        if !status.found {
            return Ok(status);
        }

        let request = dotnet_request(
            CommandSpec::new(self.runtime.executable()),
            ManagerAction::Detect,
            ["--version"],
        )
        .timeout(DETECT_TIMEOUT);
        status.version = match self.runtime.run(request).await {
            Ok(output) if output.succeeded() => {
                Some(output.stdout().trim().to_string()).filter(|version| !version.is_empty())
            }
            _ => None,
        };
        Ok(status)
    }

    async fn find_packages(&self, query: &str) -> AdapterResult<Vec<Package>> {
        let request = dotnet_search_request(self.runtime.command(), query);
        self.runtime.parse(request, self.parser(DotnetTable::Search)).await
    }

    async fn list_installed(&self) -> AdapterResult<Vec<Package>> {
        let request = dotnet_list_request(self.runtime.command());
        self.runtime
            .parse(request, self.parser(DotnetTable::Installed))
            .await
    }

    async fn list_upgradable(&self) -> AdapterResult<Vec<Package>> {
        self.runtime
            .parse(dotnet_outdated_request(), self.parser(DotnetTable::Outdated))
            .await
    }

    async fn package_details(&self, package: &Package) -> AdapterResult<PackageDetails> {
        Ok(dotnet_details(package))
    }

    fn install_args(&self, package: &Package, options: &InstallationOptions) -> Vec<String> {
        dotnet_install_args(package, options)
    }

    fn update_args(&self, package: &Package, options: &InstallationOptions) -> Vec<String> {
        dotnet_update_args(package, options)
    }

    fn uninstall_args(&self, package: &Package, options: &InstallationOptions) -> Vec<String> {
        dotnet_uninstall_args(package, options)
    }

    async fn classify_install(
        &self,
        package: &Package,
        options: &mut InstallationOptions,
        output: &InvocationOutput,
    ) -> OperationVerdict {
        dotnet_operation_verdict(package, options, output)
    }

    async fn classify_uninstall(
        &self,
        package: &Package,
        options: &mut InstallationOptions,
        output: &InvocationOutput,
    ) -> OperationVerdict {
        dotnet_operation_verdict(package, options, output)
    }
}

#[cfg(test)]
mod tests {
    use super::{
        DotnetParser, DotnetTable, dotnet_details, dotnet_install_args, dotnet_main_source,
        dotnet_operation_verdict, dotnet_outdated_request, dotnet_uninstall_args,
        dotnet_update_args,
    };
    use crate::execution::InvocationOutput;
    use crate::models::{Architecture, InstallationOptions, OperationVerdict, Package, PackageScope};
    use crate::parsing::parse_text;

    fn dotnet_ef(scope: PackageScope) -> Package {
        Package::new("Dotnet Ef", "dotnet-ef", "7.0.14", dotnet_main_source(), scope)
    }

    #[test]
    fn search_rows_after_dashes() {
        let fixture = "\
Package ID                 Latest Version      Authors                 Downloads      Verified
-----------------------------------------------------------------------------------------------
dotnet-ef                  8.0.0               Microsoft               118392018      x
dotnet-outdated-tool       4.6.0               Jerrie Pelser           11838723
";
        let packages = parse_text(
            DotnetParser::new(DotnetTable::Search, dotnet_main_source()),
            fixture,
        );
        assert_eq!(packages.len(), 2);
        assert_eq!(packages[0].id, "dotnet-ef");
        assert_eq!(packages[0].version, "8.0.0");
        assert_eq!(packages[1].name, "Dotnet Outdated Tool");
    }

    #[test]
    fn installed_tools_are_global() {
        let fixture = "\
Package Id           Version      Commands
---------------------------------------------------
dotnet-ef            7.0.14       dotnet-ef
powershell           7.4.0        pwsh
";
        let packages = parse_text(
            DotnetParser::new(DotnetTable::Installed, dotnet_main_source()),
            fixture,
        );
        assert_eq!(packages.len(), 2);
        assert!(packages.iter().all(|package| package.scope == PackageScope::Global));
    }

    #[test]
    fn outdated_rows_from_the_helper_tool() {
        let request = dotnet_outdated_request();
        assert_eq!(request.command.program.to_string_lossy(), "dotnet-tools-outdated");
        assert!(request.command.args.is_empty());

        let fixture = "\
Name              Installed  Available
----------------  ---------  ---------
dotnet-ef         7.0.14     8.0.0
";
        let packages = parse_text(
            DotnetParser::new(DotnetTable::Outdated, dotnet_main_source()),
            fixture,
        );
        assert_eq!(packages.len(), 1);
        assert_eq!(packages[0].new_version.as_deref(), Some("8.0.0"));
    }

    #[test]
    fn arguments_follow_location_scope_and_architecture() {
        let options = InstallationOptions {
            architecture: Some(Architecture::Arm),
            ..InstallationOptions::default()
        };
        assert_eq!(
            dotnet_uninstall_args(&dotnet_ef(PackageScope::Global), &options),
            vec!["uninstall", "dotnet-ef", "--global"]
        );
        assert_eq!(
            dotnet_update_args(&dotnet_ef(PackageScope::Global), &options),
            vec!["update", "dotnet-ef", "--global", "--arch", "arm32"]
        );

        let options = InstallationOptions {
            custom_install_location: Some("C:\\tools".to_string()),
            version: Some("7.0.0".to_string()),
            ..InstallationOptions::default()
        };
        assert_eq!(
            dotnet_install_args(&dotnet_ef(PackageScope::Global), &options),
            vec!["install", "dotnet-ef", "--tool-path", "C:\\tools", "--version", "7.0.0"]
        );
    }

    #[test]
    fn failed_user_attempt_retries_globally_once() {
        let package = dotnet_ef(PackageScope::User);
        let mut options = InstallationOptions::default();
        let failed = InvocationOutput {
            exit_code: 1,
            ..InvocationOutput::default()
        };

        assert_eq!(dotnet_operation_verdict(&package, &mut options, &failed), OperationVerdict::AutoRetry);
        assert_eq!(options.scope, Some(PackageScope::Global));
        assert_eq!(dotnet_operation_verdict(&package, &mut options, &failed), OperationVerdict::Failed);
        assert_eq!(
            dotnet_operation_verdict(&package, &mut options, &InvocationOutput::default()),
            OperationVerdict::Succeeded
        );
    }

    #[test]
    fn details_point_at_nuget() {
        let details = dotnet_details(&dotnet_ef(PackageScope::Global));
        assert_eq!(
            details.installer_url.as_deref(),
            Some("https://globalcdn.nuget.org/packages/dotnet-ef.7.0.14.nupkg")
        );
        assert_eq!(details.manifest_url.as_deref(), Some("https://www.nuget.org/packages/dotnet-ef"));
    }
}
