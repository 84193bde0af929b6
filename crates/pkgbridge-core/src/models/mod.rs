pub mod details;
pub mod error;
pub mod manager;
pub mod operation;
pub mod options;
pub mod package;
pub mod source;

pub use details::PackageDetails;
pub use error::{CoreError, CoreErrorKind};
pub use manager::{
    ActionSafety, Architecture, ManagerAction, ManagerCapabilities, ManagerId, ManagerProperties,
    ManagerStatus, SourceCapabilities,
};
pub use operation::{
    OperationKind, OperationState, OperationVerdict, SourceOperationKind, TaskId, TaskType,
};
pub use options::InstallationOptions;
pub use package::{Package, PackageIdentity, PackageScope, PackageTag};
pub use source::{ManagerSource, PLACEHOLDER_SOURCE_URL};
