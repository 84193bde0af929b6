use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::models::ManagerAction;

/// Number the runner hands each install, update, uninstall or source change.
/// Every process spawned for that operation, retries included, carries it.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct TaskId(pub u64);

impl Display for TaskId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Coarse grouping of manager actions used in errors.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Detection,
    Refresh,
    Search,
    Details,
    Install,
    Update,
    Uninstall,
    Sources,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Install,
    Update,
    Uninstall,
}

impl OperationKind {
    pub fn action(self) -> ManagerAction {
        match self {
            Self::Install => ManagerAction::Install,
            Self::Update => ManagerAction::Update,
            Self::Uninstall => ManagerAction::Uninstall,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceOperationKind {
    Add,
    Remove,
}

impl SourceOperationKind {
    pub fn action(self) -> ManagerAction {
        match self {
            Self::Add => ManagerAction::AddSource,
            Self::Remove => ManagerAction::RemoveSource,
        }
    }
}

/// Classified outcome of one attempt.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationVerdict {
    Succeeded,
    Failed,
    AutoRetry,
}

/// Lifecycle of an operation while it is being driven.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum OperationState {
    Pending,
    Running,
    Succeeded,
    Failed,
    AutoRetry,
}

impl From<OperationVerdict> for OperationState {
    fn from(verdict: OperationVerdict) -> Self {
        match verdict {
            OperationVerdict::Succeeded => Self::Succeeded,
            OperationVerdict::Failed => Self::Failed,
            OperationVerdict::AutoRetry => Self::AutoRetry,
        }
    }
}
