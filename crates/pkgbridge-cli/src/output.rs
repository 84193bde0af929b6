use std::sync::Arc;

use pkgbridge_core::models::{ManagerSource, Package, PackageDetails};
use pkgbridge_core::orchestration::{OperationReport, PackageManager};
use serde::Serialize;

use crate::CliError;

#[derive(Debug, Serialize)]
pub struct PackageRow<'a> {
    pub name: &'a str,
    pub id: &'a str,
    pub version: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_version: Option<&'a str>,
    pub source: &'a str,
    pub manager: &'static str,
}

impl<'a> From<&'a Package> for PackageRow<'a> {
    fn from(package: &'a Package) -> Self {
        Self {
            name: &package.name,
            id: &package.id,
            version: &package.version,
            new_version: package.new_version.as_deref(),
            source: &package.source.name,
            manager: package.manager().as_str(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ManagerRow {
    manager: &'static str,
    name: &'static str,
    enabled: bool,
    found: bool,
    version: Option<String>,
    executable: Option<String>,
}

pub fn packages(packages: &[Arc<Package>], json: bool) -> Result<(), CliError> {
    let rows: Vec<PackageRow<'_>> = packages.iter().map(|package| package.as_ref().into()).collect();
    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    if rows.is_empty() {
        println!("No packages found.");
        return Ok(());
    }

    let name_width = column_width(rows.iter().map(|row| row.name), "Name");
    let id_width = column_width(rows.iter().map(|row| row.id), "Id");
    let version_width = column_width(rows.iter().map(|row| row.version), "Version");
    println!(
        "{:name_width$}  {:id_width$}  {:version_width$}  {:12}  Source",
        "Name", "Id", "Version", "Available"
    );
    for row in &rows {
        println!(
            "{:name_width$}  {:id_width$}  {:version_width$}  {:12}  {} ({})",
            row.name,
            row.id,
            row.version,
            row.new_version.unwrap_or(""),
            row.source,
            row.manager
        );
    }
    println!("\n{} package(s)", rows.len());
    Ok(())
}

fn column_width<'a>(values: impl Iterator<Item = &'a str>, header: &str) -> usize {
    values
        .map(|value| value.chars().count())
        .chain(std::iter::once(header.len()))
        .max()
        .unwrap_or(header.len())
        .min(48)
}

pub fn details(details: &PackageDetails, json: bool) -> Result<(), CliError> {
    if json {
        println!("{}", serde_json::to_string_pretty(details)?);
        return Ok(());
    }

    println!("{} ({})", details.name, details.id);
    let fields = [
        ("Version", Some(details.version.as_str())),
        ("Source", Some(details.source_name.as_str())),
        ("Description", details.description.as_deref()),
        ("Publisher", details.publisher.as_deref()),
        ("Author", details.author.as_deref()),
        ("Homepage", details.homepage_url.as_deref()),
        ("License", details.license.as_deref()),
        ("License url", details.license_url.as_deref()),
        ("Installer", details.installer_url.as_deref()),
        ("Installer hash", details.installer_hash.as_deref()),
        ("Installer type", details.installer_type.as_deref()),
        ("Updated", details.update_date.as_deref()),
        ("Release notes", details.release_notes.as_deref()),
        ("Release notes url", details.release_notes_url.as_deref()),
        ("Manifest", details.manifest_url.as_deref()),
    ];
    for (label, value) in fields {
        if let Some(value) = value.filter(|value| !value.is_empty()) {
            println!("  {label}: {value}");
        }
    }
    if !details.tags.is_empty() {
        println!("  Tags: {}", details.tags.join(", "));
    }
    Ok(())
}

pub fn sources(sources: &[ManagerSource], json: bool) -> Result<(), CliError> {
    if json {
        println!("{}", serde_json::to_string_pretty(sources)?);
        return Ok(());
    }
    for source in sources {
        let mut line = format!("{}  {}", source.name, source.url);
        if let Some(count) = source.package_count {
            line.push_str(&format!("  {count} packages"));
        }
        if let Some(date) = &source.update_date {
            line.push_str(&format!("  updated {date}"));
        }
        println!("{line}");
    }
    Ok(())
}

pub fn managers(managers: &[Arc<PackageManager>], json: bool) -> Result<(), CliError> {
    let rows: Vec<ManagerRow> = managers
        .iter()
        .map(|manager| {
            let status = manager.status();
            ManagerRow {
                manager: manager.id().as_str(),
                name: manager.properties().name,
                enabled: manager.is_enabled(),
                found: status.found,
                version: status.version,
                executable: status
                    .executable_path
                    .map(|path| path.display().to_string()),
            }
        })
        .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }
    for row in rows {
        let state = match (row.enabled, row.found) {
            (false, _) => "disabled",
            (true, false) => "not found",
            (true, true) => "ready",
        };
        println!(
            "{:12}  {:10}  {:10}  {}",
            row.name,
            state,
            row.version.as_deref().unwrap_or("-"),
            row.executable.as_deref().unwrap_or("")
        );
    }
    Ok(())
}

pub fn report(label: &str, report: &OperationReport) {
    let outcome = if report.succeeded() { "succeeded" } else { "failed" };
    println!("{label} {outcome} after {} attempt(s)", report.attempts);
    if !report.succeeded()
        && let Some(output) = &report.output
    {
        let combined = output.combined();
        let tail: Vec<&str> = combined.lines().rev().take(20).collect();
        for line in tail.into_iter().rev() {
            eprintln!("  {line}");
        }
    }
}
