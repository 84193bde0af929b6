pub mod chocolatey;
pub(crate) mod detect_utils;
pub mod dotnet;
pub mod manager;
pub mod npm;
pub mod pip;
pub mod powershell;
pub mod process_utils;
pub mod scoop;
pub mod sources;
pub mod winget;

pub use chocolatey::{CHOCOLATEY_CAPABILITIES, CHOCOLATEY_PROPERTIES, ChocolateyBackend};
pub use dotnet::{DOTNET_CAPABILITIES, DOTNET_PROPERTIES, DotnetBackend};
pub use manager::{
    AdapterResult, BackendContext, ManagerBackend, MultiSourceBackend, exit_code_verdict,
};
pub use npm::{NPM_CAPABILITIES, NPM_PROPERTIES, NpmBackend};
pub use pip::{PIP_CAPABILITIES, PIP_PROPERTIES, PipBackend};
pub use powershell::{POWERSHELL_CAPABILITIES, POWERSHELL_PROPERTIES, PowerShellBackend};
pub use process_utils::{BackendRuntime, DETECT_TIMEOUT, run_logged};
pub use scoop::{SCOOP_CAPABILITIES, SCOOP_PROPERTIES, ScoopBackend};
pub use sources::SourceRegistry;
pub use winget::{WINGET_CAPABILITIES, WINGET_PROPERTIES, WingetBackend};
