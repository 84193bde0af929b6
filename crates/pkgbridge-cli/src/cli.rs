use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use pkgbridge_core::models::{Architecture, InstallationOptions, PackageScope};

#[derive(Parser, Debug)]
#[command(
    name = "pkgbridge",
    version,
    about = "Search, install, update and remove packages across winget, Chocolatey, Scoop, pip, npm, .NET tools and the PowerShell Gallery"
)]
pub struct Cli {
    /// SQLite file holding settings and remembered installation options
    #[arg(long, env = "PKGBRIDGE_DB", default_value = "pkgbridge.sqlite3", global = true)]
    pub database: PathBuf,

    /// Program used to run elevated attempts (defaults to gsudo on Windows, sudo elsewhere)
    #[arg(long, global = true)]
    pub elevator: Option<PathBuf>,

    /// Print JSON instead of tables
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Search every enabled manager
    Search { query: String },

    /// List installed packages
    List,

    /// List packages with a newer version available
    Updates,

    /// Install a package
    Install(OperationArgs),

    /// Update a package
    Update(OperationArgs),

    /// Uninstall a package
    Uninstall(OperationArgs),

    /// Show details for a package
    Show {
        manager: String,
        id: String,
    },

    /// List or change a manager's sources
    Sources {
        manager: String,

        #[command(subcommand)]
        action: Option<SourceAction>,
    },

    /// Show every manager and whether it is ready
    Managers,

    /// Stop loading a manager
    Disable { manager: String },

    /// Load a manager again
    Enable { manager: String },
}

#[derive(Subcommand, Debug)]
pub enum SourceAction {
    Add { name: String, url: String },
    Remove { name: String },
}

#[derive(Args, Debug)]
pub struct OperationArgs {
    pub manager: String,
    pub id: String,

    #[command(flatten)]
    pub options: OptionArgs,
}

#[derive(Args, Debug, Default)]
pub struct OptionArgs {
    /// Install this exact version
    #[arg(long, value_name = "VERSION", help_heading = "Options")]
    pub target_version: Option<String>,

    #[arg(long, value_enum, help_heading = "Options")]
    pub scope: Option<ScopeArg>,

    #[arg(long, value_enum, help_heading = "Options")]
    pub arch: Option<ArchArg>,

    /// Start elevated instead of waiting for the manager to ask
    #[arg(long, help_heading = "Options")]
    pub admin: bool,

    #[arg(long, help_heading = "Options")]
    pub skip_hash: bool,

    #[arg(long, help_heading = "Options")]
    pub interactive: bool,

    #[arg(long, help_heading = "Options")]
    pub pre_release: bool,

    #[arg(long, help_heading = "Options")]
    pub remove_data: bool,

    #[arg(long, value_name = "PATH", help_heading = "Options")]
    pub location: Option<String>,

    /// Extra argument passed through to the manager (repeatable)
    #[arg(long = "param", value_name = "ARG", allow_hyphen_values = true, help_heading = "Options")]
    pub params: Vec<String>,
}

impl OptionArgs {
    /// `None` when no flag was given, so remembered options apply.
    pub fn to_options(&self) -> Option<InstallationOptions> {
        let options = InstallationOptions {
            skip_hash_check: self.skip_hash,
            interactive: self.interactive,
            run_as_administrator: self.admin,
            version: self.target_version.clone(),
            architecture: self.arch.map(Into::into),
            scope: self.scope.map(Into::into),
            custom_parameters: self.params.clone(),
            remove_data_on_uninstall: self.remove_data,
            pre_release: self.pre_release,
            custom_install_location: self.location.clone(),
        };
        (options != InstallationOptions::default()).then_some(options)
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum ScopeArg {
    User,
    Global,
}

impl From<ScopeArg> for PackageScope {
    fn from(scope: ScopeArg) -> Self {
        match scope {
            ScopeArg::User => PackageScope::User,
            ScopeArg::Global => PackageScope::Global,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum ArchArg {
    X86,
    X64,
    Arm,
    Arm64,
}

impl From<ArchArg> for Architecture {
    fn from(arch: ArchArg) -> Self {
        match arch {
            ArchArg::X86 => Architecture::X86,
            ArchArg::X64 => Architecture::X64,
            ArchArg::Arm => Architecture::Arm,
            ArchArg::Arm64 => Architecture::Arm64,
        }
    }
}
