use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::adapters::manager::BackendContext;
use crate::execution::{CommandSpec, ProcessExecutor, ProcessSpawnRequest, invoke};
use crate::models::{ManagerAction, ManagerId, ManagerProperties};
use crate::settings::SettingsStore;

#[cfg(windows)]
const WHICH_COMMAND: &str = "where.exe";
#[cfg(not(windows))]
const WHICH_COMMAND: &str = "/usr/bin/which";

const WHICH_TIMEOUT: Duration = Duration::from_secs(5);

/// Resolves the program a backend should run: the `<Name>ExecutablePath`
/// setting first, then `which`/`where`, then a scan of `PATH`.
pub(crate) async fn locate_executable(
    context: &BackendContext,
    properties: &ManagerProperties,
    candidates: &[&str],
) -> Option<PathBuf> {
    if let Some(path) = override_path(context.settings.as_ref(), properties) {
        return Some(path);
    }

    for candidate in candidates {
        if let Some(found) =
            which_executable(context.executor.as_ref(), properties.id, candidate).await
        {
            return Some(found);
        }
    }

    None
}

fn override_path(settings: &dyn SettingsStore, properties: &ManagerProperties) -> Option<PathBuf> {
    let key = properties.executable_setting_key();
    let raw = settings.get_string(&key)?;
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    let path = PathBuf::from(trimmed);
    if path.is_file() {
        Some(path)
    } else {
        tracing::warn!(manager = ?properties.id, key, path = %trimmed, "executable override does not exist");
        None
    }
}

pub(crate) async fn which_executable(
    executor: &dyn ProcessExecutor,
    manager: ManagerId,
    binary_name: &str,
) -> Option<PathBuf> {
    match which_via_command(executor, manager, binary_name).await {
        Some(found) => Some(found),
        None => discover_executable_path(binary_name),
    }
}

async fn which_via_command(
    executor: &dyn ProcessExecutor,
    manager: ManagerId,
    binary_name: &str,
) -> Option<PathBuf> {
    let request = ProcessSpawnRequest::new(
        manager,
        ManagerAction::Detect,
        CommandSpec::new(WHICH_COMMAND).arg(binary_name),
    )
    .timeout(WHICH_TIMEOUT);

    let output = invoke(executor, request).await.ok()?;
    if !output.succeeded() {
        return None;
    }

    output
        .stdout_lines
        .iter()
        .map(|line| line.trim())
        .find(|line| !line.is_empty())
        .map(PathBuf::from)
}

pub(crate) fn discover_executable_path(binary_name: &str) -> Option<PathBuf> {
    if binary_name.trim().is_empty() {
        return None;
    }

    if binary_name.contains(['/', '\\']) {
        let absolute = PathBuf::from(binary_name);
        return absolute.is_file().then_some(absolute);
    }

    let path_var = std::env::var_os("PATH")?;
    let mut seen = HashSet::new();
    let mut candidates = Vec::new();

    for dir in std::env::split_paths(&path_var) {
        for name in executable_names(binary_name) {
            push_candidate_path(dir.join(name), &mut candidates, &mut seen);
        }
    }

    candidates.into_iter().find(|candidate| candidate.is_file())
}

fn push_candidate_path(
    candidate: PathBuf,
    candidates: &mut Vec<PathBuf>,
    seen: &mut HashSet<String>,
) {
    let rendered = candidate.to_string_lossy().to_string();
    if rendered.is_empty() {
        return;
    }

    if seen.insert(rendered) {
        candidates.push(candidate);
    }
}

#[cfg(windows)]
fn executable_names(binary_name: &str) -> Vec<String> {
    if Path::new(binary_name).extension().is_some() {
        return vec![binary_name.to_string()];
    }

    let extensions = std::env::var("PATHEXT").unwrap_or_else(|_| ".EXE;.CMD;.BAT".to_string());
    extensions
        .split(';')
        .filter(|extension| !extension.is_empty())
        .map(|extension| format!("{binary_name}{}", extension.to_ascii_lowercase()))
        .collect()
}

#[cfg(not(windows))]
fn executable_names(binary_name: &str) -> Vec<String> {
    // `winget.exe` style names are tried without the suffix as well.
    let stem = Path::new(binary_name)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .filter(|_| binary_name.ends_with(".exe"));
    match stem {
        Some(stem) => vec![binary_name.to_string(), stem.to_string()],
        None => vec![binary_name.to_string()],
    }
}

#[cfg(test)]
mod tests {
    use super::discover_executable_path;

    #[test]
    fn blank_names_are_never_found() {
        assert_eq!(discover_executable_path("  "), None);
    }

    #[test]
    fn missing_absolute_paths_are_rejected() {
        assert_eq!(discover_executable_path("/definitely/not/here/winget"), None);
    }

    #[cfg(unix)]
    #[test]
    fn shell_is_found_on_path() {
        if std::env::var_os("PATH").is_none() {
            return;
        }
        let found = discover_executable_path("sh");
        assert!(found.is_some_and(|path| path.ends_with("sh")));
    }

    #[cfg(unix)]
    #[test]
    fn exe_suffix_falls_back_to_stem() {
        assert_eq!(
            super::executable_names("winget.exe"),
            vec!["winget.exe".to_string(), "winget".to_string()]
        );
    }
}
