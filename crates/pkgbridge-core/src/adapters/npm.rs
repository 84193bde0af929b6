use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::Value;

use crate::adapters::manager::{AdapterResult, BackendContext, ManagerBackend, exit_code_verdict};
use crate::adapters::process_utils::BackendRuntime;
use crate::adapters::sources::SourceRegistry;
use crate::execution::{CommandSpec, InvocationOutput, ProcessSpawnRequest};
use crate::models::{
    CoreError, CoreErrorKind, InstallationOptions, ManagerAction, ManagerCapabilities, ManagerId,
    ManagerProperties, ManagerSource, ManagerStatus, OperationVerdict, Package, PackageDetails,
    PackageScope,
};
use crate::parsing::{LineParser, format_as_name};

pub const NPM_PROPERTIES: ManagerProperties = ManagerProperties {
    id: ManagerId::Npm,
    name: "Npm",
    description: "Node JS's package manager. Full of libraries and other utilities that orbit the javascript world.",
    executable_friendly_name: "npm",
    executable_call_args: &[],
    install_verb: "install",
    update_verb: "install",
    uninstall_verb: "uninstall",
};

pub const NPM_CAPABILITIES: ManagerCapabilities = ManagerCapabilities {
    can_run_as_admin: true,
    supports_custom_versions: true,
    supports_custom_scopes: true,
    supports_pre_release: true,
    ..ManagerCapabilities::NONE
};

const NPM_CANDIDATES: &[&str] = &["npm.cmd", "npm"];

const NPMJS_SOURCE_NAME: &str = "npm";
const NPMJS_SOURCE_URL: &str = "https://www.npmjs.com/";

const TREE_MARKERS: &[&str] = &["--", "├─", "└─"];
const TREE_GLYPHS: &[char] = &['+', '`', '|', '-', '├', '└', '─', '│', '┬', ' '];

pub fn npm_main_source() -> ManagerSource {
    ManagerSource::new(ManagerId::Npm, NPMJS_SOURCE_NAME, NPMJS_SOURCE_URL)
}

/// npm resolves the local project from its working directory; queries run
/// from the user's home like an interactive shell would.
fn home_directory() -> Option<PathBuf> {
    std::env::var_os("USERPROFILE")
        .or_else(|| std::env::var_os("HOME"))
        .map(PathBuf::from)
}

fn npm_request(
    base: CommandSpec,
    action: ManagerAction,
    args: impl IntoIterator<Item = impl Into<String>>,
) -> ProcessSpawnRequest {
    let command = match home_directory() {
        Some(home) => base.working_dir(home),
        None => base,
    };
    ProcessSpawnRequest::new(ManagerId::Npm, action, command.args(args))
}

fn scope_flag(scope: PackageScope) -> Option<&'static str> {
    (scope == PackageScope::Global).then_some("--global")
}

pub fn npm_search_request(base: CommandSpec, query: &str) -> ProcessSpawnRequest {
    npm_request(base, ManagerAction::Search, ["search", query, "--parseable"])
}

pub fn npm_list_request(base: CommandSpec, scope: PackageScope) -> ProcessSpawnRequest {
    npm_request(
        base,
        ManagerAction::ListInstalled,
        std::iter::once("list").chain(scope_flag(scope)),
    )
}

pub fn npm_outdated_request(base: CommandSpec, scope: PackageScope) -> ProcessSpawnRequest {
    npm_request(
        base,
        ManagerAction::ListOutdated,
        ["outdated"]
            .into_iter()
            .chain(scope_flag(scope))
            .chain(["--parseable"]),
    )
}

pub fn npm_versions_request(base: CommandSpec, id: &str) -> ProcessSpawnRequest {
    npm_request(base, ManagerAction::Versions, ["show", id, "versions", "--json"])
}

pub fn npm_show_request(base: CommandSpec, id: &str) -> ProcessSpawnRequest {
    npm_request(base, ManagerAction::Details, ["show", id, "--json"])
}

/// Splits `name@version` at the last `@`, so scoped names keep their prefix.
fn split_spec(spec: &str) -> Option<(&str, &str)> {
    let (id, version) = spec.rsplit_once('@')?;
    (!id.is_empty() && !version.is_empty()).then_some((id, version))
}

/// Reads `npm search --parseable`: tab separated name, description, author,
/// date, version and keywords.
pub struct NpmSearchParser {
    source: ManagerSource,
    packages: Vec<Package>,
}

impl NpmSearchParser {
    pub fn new(source: ManagerSource) -> Self {
        Self {
            source,
            packages: Vec::new(),
        }
    }
}

impl LineParser for NpmSearchParser {
    type Output = Vec<Package>;

    fn push(&mut self, line: &str) {
        if line.contains("NAME") {
            return;
        }
        let cells: Vec<&str> = line.split('\t').map(str::trim).collect();
        let [id, _, _, _, version, ..] = cells.as_slice() else {
            return;
        };
        if id.is_empty() || version.is_empty() {
            return;
        }
        self.packages.push(Package::new(
            format_as_name(id),
            *id,
            *version,
            self.source.clone(),
            PackageScope::User,
        ));
    }

    fn finish(self) -> Vec<Package> {
        self.packages
    }
}

/// Reads the dependency tree printed by `npm list`.
pub struct NpmTreeParser {
    source: ManagerSource,
    scope: PackageScope,
    packages: Vec<Package>,
}

impl NpmTreeParser {
    pub fn new(source: ManagerSource, scope: PackageScope) -> Self {
        Self {
            source,
            scope,
            packages: Vec::new(),
        }
    }
}

impl LineParser for NpmTreeParser {
    type Output = Vec<Package>;

    fn push(&mut self, line: &str) {
        if !TREE_MARKERS.iter().any(|marker| line.contains(marker)) {
            return;
        }
        let entry = line.trim_start_matches(TREE_GLYPHS);
        let spec = entry.split_whitespace().next().unwrap_or_default();
        let Some((id, version)) = split_spec(spec) else {
            return;
        };
        self.packages.push(Package::new(
            format_as_name(id),
            id,
            version,
            self.source.clone(),
            self.scope,
        ));
    }

    fn finish(self) -> Vec<Package> {
        self.packages
    }
}

/// Reads `npm outdated --parseable`: `path:wanted:current:latest[:dependent]`.
pub struct NpmOutdatedParser {
    source: ManagerSource,
    scope: PackageScope,
    packages: Vec<Package>,
}

impl NpmOutdatedParser {
    pub fn new(source: ManagerSource, scope: PackageScope) -> Self {
        Self {
            source,
            scope,
            packages: Vec::new(),
        }
    }
}

/// Drops a Windows drive prefix so the path does not add a `:` field.
fn strip_drive(line: &str) -> &str {
    let bytes = line.as_bytes();
    if bytes.len() > 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' {
        &line[2..]
    } else {
        line
    }
}

impl LineParser for NpmOutdatedParser {
    type Output = Vec<Package>;

    fn push(&mut self, line: &str) {
        let fields: Vec<&str> = strip_drive(line.trim()).split(':').collect();
        let [_, wanted, current, _, ..] = fields.as_slice() else {
            return;
        };
        let (Some((id, new_version)), Some((_, version))) = (split_spec(wanted), split_spec(current))
        else {
            return;
        };
        self.packages.push(Package::upgradable(
            format_as_name(id),
            id,
            version,
            new_version,
            self.source.clone(),
            self.scope,
        ));
    }

    fn finish(self) -> Vec<Package> {
        self.packages
    }
}

/// `npm show <id> versions --json` prints an array, or a bare string when
/// only one version was ever published.
pub fn parse_npm_versions(raw: &str) -> AdapterResult<Vec<String>> {
    let parsed: Value = serde_json::from_str(raw.trim()).map_err(|error| {
        CoreError::for_action(
            ManagerId::Npm,
            ManagerAction::Versions,
            CoreErrorKind::ParseFailure,
            format!("invalid npm versions output: {error}"),
        )
    })?;

    Ok(match parsed {
        Value::Array(items) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_owned)
            .collect(),
        Value::String(version) => vec![version],
        _ => Vec::new(),
    })
}

fn person_name(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.split('<').next().unwrap_or(text).trim().to_string()),
        Value::Object(person) => person.get("name").and_then(Value::as_str).map(str::to_owned),
        _ => None,
    }
}

pub fn parse_npm_details(package: &Package, raw: &str) -> AdapterResult<PackageDetails> {
    let manifest: Value = serde_json::from_str(raw.trim()).map_err(|error| {
        CoreError::for_action(
            ManagerId::Npm,
            ManagerAction::Details,
            CoreErrorKind::ParseFailure,
            format!("invalid npm manifest for {}: {error}", package.id),
        )
    })?;

    let mut details = PackageDetails::for_package(package);
    details.installer_type = Some("Tarball".to_string());
    details.manifest_url = Some(format!("https://www.npmjs.com/package/{}", package.id));
    details.release_notes_url = Some(format!(
        "https://www.npmjs.com/package/{}?activeTab=versions",
        package.id
    ));

    details.description = manifest
        .get("description")
        .and_then(Value::as_str)
        .map(str::to_owned);
    details.homepage_url = manifest.get("homepage").and_then(Value::as_str).map(str::to_owned);
    details.license = match manifest.get("license") {
        Some(Value::String(license)) => Some(license.clone()),
        Some(Value::Object(license)) => license.get("type").and_then(Value::as_str).map(str::to_owned),
        _ => None,
    };
    details.author = manifest.get("author").and_then(person_name);
    details.publisher = manifest
        .get("maintainers")
        .and_then(Value::as_array)
        .and_then(|maintainers| maintainers.first())
        .and_then(person_name);

    let released = manifest
        .pointer("/dist-tags/latest")
        .and_then(Value::as_str)
        .unwrap_or(package.version.as_str());
    details.update_date = manifest
        .get("time")
        .and_then(|time| time.get(released))
        .and_then(Value::as_str)
        .map(str::to_owned);

    details.installer_url = manifest
        .pointer("/dist/tarball")
        .and_then(Value::as_str)
        .map(str::to_owned);
    details.installer_hash = manifest
        .pointer("/dist/integrity")
        .and_then(Value::as_str)
        .map(str::to_owned);
    details.tags = manifest
        .get("keywords")
        .and_then(Value::as_array)
        .map(|keywords| {
            keywords
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_owned)
                .collect()
        })
        .unwrap_or_default();

    Ok(details)
}

fn operation_args(
    verb: &str,
    target: String,
    package: &Package,
    options: &InstallationOptions,
) -> Vec<String> {
    let mut args = vec![verb.to_string(), target];
    args.extend(
        options
            .custom_parameters
            .iter()
            .filter(|parameter| !parameter.trim().is_empty())
            .cloned(),
    );
    args.extend(scope_flag(options.effective_scope(package)).map(str::to_owned));
    args
}

pub fn npm_uninstall_args(package: &Package, options: &InstallationOptions) -> Vec<String> {
    operation_args(NPM_PROPERTIES.uninstall_verb, package.id.clone(), package, options)
}

pub fn npm_install_args(package: &Package, options: &InstallationOptions) -> Vec<String> {
    let version = options.requested_version().unwrap_or("latest");
    operation_args(
        NPM_PROPERTIES.install_verb,
        format!("{}@{version}", package.id),
        package,
        options,
    )
}

pub fn npm_update_args(package: &Package, options: &InstallationOptions) -> Vec<String> {
    let version = package.new_version.as_deref().unwrap_or("latest");
    operation_args(
        NPM_PROPERTIES.update_verb,
        format!("{}@{version}", package.id),
        package,
        options,
    )
}

pub struct NpmBackend {
    runtime: BackendRuntime,
    sources: SourceRegistry,
}

impl NpmBackend {
    pub fn new(context: BackendContext) -> Self {
        Self {
            runtime: BackendRuntime::new(context, &NPM_PROPERTIES, NPM_CANDIDATES),
            sources: SourceRegistry::new(npm_main_source(), NPM_CAPABILITIES.sources),
        }
    }
}

#[async_trait]
impl ManagerBackend for NpmBackend {
    fn properties(&self) -> &'static ManagerProperties {
        &NPM_PROPERTIES
    }

    fn capabilities(&self) -> &'static ManagerCapabilities {
        &NPM_CAPABILITIES
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
        let request = npm_search_request(self.runtime.command(), query);
        self.runtime
            .parse(request, NpmSearchParser::new(self.sources.main()))
            .await
    }

    /// Local packages first, then the global ones.
    async fn list_installed(&self) -> AdapterResult<Vec<Package>> {
        let mut packages = Vec::new();
        for scope in [PackageScope::User, PackageScope::Global] {
            let request = npm_list_request(self.runtime.command(), scope);
            let parser = NpmTreeParser::new(self.sources.main(), scope);
            packages.extend(self.runtime.parse(request, parser).await?);
        }
        Ok(packages)
    }

    async fn list_upgradable(&self) -> AdapterResult<Vec<Package>> {
        let mut packages = Vec::new();
        for scope in [PackageScope::User, PackageScope::Global] {
            let request = npm_outdated_request(self.runtime.command(), scope);
            let parser = NpmOutdatedParser::new(self.sources.main(), scope);
            packages.extend(self.runtime.parse(request, parser).await?);
        }
        Ok(packages)
    }

    async fn package_details(&self, package: &Package) -> AdapterResult<PackageDetails> {
        let request = npm_show_request(self.runtime.command(), &package.id);
        let output = self.runtime.run(request).await?;
        parse_npm_details(package, &output.stdout())
    }

    async fn package_versions(&self, package: &Package) -> AdapterResult<Vec<String>> {
        let request = npm_versions_request(self.runtime.command(), &package.id);
        let output = self.runtime.run(request).await?;
        parse_npm_versions(&output.stdout())
    }

    fn install_args(&self, package: &Package, options: &InstallationOptions) -> Vec<String> {
        npm_install_args(package, options)
    }

    fn update_args(&self, package: &Package, options: &InstallationOptions) -> Vec<String> {
        npm_update_args(package, options)
    }

    fn uninstall_args(&self, package: &Package, options: &InstallationOptions) -> Vec<String> {
        npm_uninstall_args(package, options)
    }

    async fn classify_install(
        &self,
        _package: &Package,
        _options: &mut InstallationOptions,
        output: &InvocationOutput,
    ) -> OperationVerdict {
        exit_code_verdict(output)
    }

    async fn classify_uninstall(
        &self,
        _package: &Package,
        _options: &mut InstallationOptions,
        output: &InvocationOutput,
    ) -> OperationVerdict {
        exit_code_verdict(output)
    }
}

#[cfg(test)]
mod tests {
    use super::{
        NpmOutdatedParser, NpmSearchParser, NpmTreeParser, npm_install_args, npm_list_request,
        npm_main_source, npm_outdated_request, npm_uninstall_args, npm_update_args,
        parse_npm_details, parse_npm_versions,
    };
    use crate::execution::CommandSpec;
    use crate::models::{InstallationOptions, Package, PackageScope};
    use crate::parsing::parse_text;

    fn typescript(scope: PackageScope) -> Package {
        Package::upgradable(
            "Typescript",
            "typescript",
            "5.2.2",
            "5.3.2",
            npm_main_source(),
            scope,
        )
    }

    #[test]
    fn global_requests_add_the_flag() {
        let list = npm_list_request(CommandSpec::new("npm"), PackageScope::Global);
        assert_eq!(list.command.args, vec!["list", "--global"]);

        let outdated = npm_outdated_request(CommandSpec::new("npm"), PackageScope::User);
        assert_eq!(outdated.command.args, vec!["outdated", "--parseable"]);
        let outdated = npm_outdated_request(CommandSpec::new("npm"), PackageScope::Global);
        assert_eq!(outdated.command.args, vec!["outdated", "--global", "--parseable"]);
    }

    #[test]
    fn search_rows_are_tab_separated() {
        let fixture = "typescript\tTypeScript is a language for application scale JavaScript development\t=typescript-bot\t2023-11-20 17:05\t5.3.2\ttypescript Microsoft\n\
ts-node\tTypeScript execution environment and REPL for node.js\t=cspotcode\t2023-05-24 01:09\t10.9.1\ttypescript node\n\
broken line\n";
        let packages = parse_text(NpmSearchParser::new(npm_main_source()), fixture);
        assert_eq!(packages.len(), 2);
        assert_eq!(packages[0].version, "5.3.2");
        assert_eq!(packages[1].name, "Ts Node");
    }

    #[test]
    fn tree_lines_keep_scoped_names() {
        let fixture = "\
C:\\Users\\me\\AppData\\Roaming\\npm
+-- @angular/cli@17.0.3
+-- npm@10.2.4
`-- typescript@5.2.2
";
        let packages = parse_text(
            NpmTreeParser::new(npm_main_source(), PackageScope::Global),
            fixture,
        );
        assert_eq!(packages.len(), 3);
        assert_eq!(packages[0].id, "@angular/cli");
        assert_eq!(packages[0].version, "17.0.3");
        assert_eq!(packages[0].name, "Cli");
        assert!(packages.iter().all(|package| package.scope == PackageScope::Global));
    }

    #[test]
    fn unicode_tree_and_empty_projects() {
        let fixture = "/home/me\n├── eslint@8.54.0\n└── prettier@3.1.0\n";
        let packages = parse_text(NpmTreeParser::new(npm_main_source(), PackageScope::User), fixture);
        assert_eq!(packages.len(), 2);
        assert_eq!(packages[1].id, "prettier");

        let empty = parse_text(
            NpmTreeParser::new(npm_main_source(), PackageScope::User),
            "/home/me\n`-- (empty)\n",
        );
        assert!(empty.is_empty());
    }

    #[test]
    fn outdated_rows_handle_drive_letters() {
        let fixture = "\
C:\\Users\\me\\AppData\\Roaming\\npm\\node_modules\\typescript:typescript@5.3.2:typescript@5.2.2:typescript@5.3.2:global
/usr/lib/node_modules/@angular/cli:@angular/cli@17.0.3:@angular/cli@16.2.0:@angular/cli@17.0.3:global
";
        let packages = parse_text(
            NpmOutdatedParser::new(npm_main_source(), PackageScope::Global),
            fixture,
        );
        assert_eq!(packages.len(), 2);
        assert_eq!(packages[0].id, "typescript");
        assert_eq!(packages[0].version, "5.2.2");
        assert_eq!(packages[0].new_version.as_deref(), Some("5.3.2"));
        assert_eq!(packages[1].id, "@angular/cli");
        assert_eq!(packages[1].version, "16.2.0");
    }

    #[test]
    fn versions_accept_arrays_and_single_strings() {
        assert_eq!(
            parse_npm_versions("[\n  \"5.2.2\",\n  \"5.3.2\"\n]\n").unwrap(),
            vec!["5.2.2", "5.3.2"]
        );
        assert_eq!(parse_npm_versions("\"1.0.0\"").unwrap(), vec!["1.0.0"]);
        assert!(parse_npm_versions("npm ERR! 404").is_err());
    }

    #[test]
    fn details_from_the_registry_document() {
        let raw = r#"{
            "name": "typescript",
            "description": "TypeScript is a language for application scale JavaScript development",
            "homepage": "https://www.typescriptlang.org/",
            "license": "Apache-2.0",
            "author": "Microsoft Corp.",
            "maintainers": ["typescript-bot <typescript@microsoft.com>"],
            "keywords": ["TypeScript", "Microsoft"],
            "dist-tags": { "latest": "5.3.2" },
            "time": { "5.3.2": "2023-11-20T17:05:31.000Z" },
            "dist": {
                "tarball": "https://registry.npmjs.org/typescript/-/typescript-5.3.2.tgz",
                "integrity": "sha512-6l+RyNy7oAHDfxC4FzSJcz9vnjTKxrLpDG5M2Vu4SHRVNg6xzqZp6LYSR9zjqQTu8DU/f5xwxUdADOkbrIX2gQ=="
            }
        }"#;
        let details = parse_npm_details(&typescript(PackageScope::Global), raw).unwrap();
        assert_eq!(details.license.as_deref(), Some("Apache-2.0"));
        assert_eq!(details.publisher.as_deref(), Some("typescript-bot"));
        assert_eq!(details.author.as_deref(), Some("Microsoft Corp."));
        assert_eq!(details.update_date.as_deref(), Some("2023-11-20T17:05:31.000Z"));
        assert_eq!(details.installer_type.as_deref(), Some("Tarball"));
        assert_eq!(details.tags, vec!["TypeScript", "Microsoft"]);
    }

    #[test]
    fn operation_arguments() {
        let global = typescript(PackageScope::Global);
        let options = InstallationOptions::default();
        assert_eq!(npm_uninstall_args(&global, &options), vec!["uninstall", "typescript", "--global"]);
        assert_eq!(npm_update_args(&global, &options), vec!["install", "typescript@5.3.2", "--global"]);
        assert_eq!(
            npm_install_args(&typescript(PackageScope::User), &options),
            vec!["install", "typescript@latest"]
        );

        let pinned = InstallationOptions {
            version: Some("5.0.4".to_string()),
            ..InstallationOptions::default()
        };
        assert_eq!(
            npm_install_args(&typescript(PackageScope::User), &pinned),
            vec!["install", "typescript@5.0.4"]
        );
    }
}
