use crate::models::{ManagerAction, ManagerId, TaskType};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum CoreErrorKind {
    NotInstalled,
    UnsupportedCapability,
    InvalidInput,
    ParseFailure,
    Timeout,
    Cancelled,
    ProcessFailure,
    StorageFailure,
    Internal,
}

#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
#[error("{prefix}{kind:?}: {message}", prefix = manager_prefix(.manager))]
pub struct CoreError {
    pub manager: Option<ManagerId>,
    pub task: Option<TaskType>,
    pub action: Option<ManagerAction>,
    pub kind: CoreErrorKind,
    pub message: String,
}

impl CoreError {
    pub fn for_action(
        manager: ManagerId,
        action: ManagerAction,
        kind: CoreErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            manager: Some(manager),
            task: Some(action.task_type()),
            action: Some(action),
            kind,
            message: message.into(),
        }
    }

    pub fn unsupported(manager: ManagerId, action: ManagerAction) -> Self {
        Self::for_action(
            manager,
            action,
            CoreErrorKind::UnsupportedCapability,
            format!("{manager} does not support {action:?}"),
        )
    }
}

fn manager_prefix(manager: &Option<ManagerId>) -> String {
    manager
        .map(|manager| format!("{manager}: "))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::{CoreError, CoreErrorKind};
    use crate::models::{ManagerAction, ManagerId};

    #[test]
    fn display_leads_with_the_manager_when_known() {
        let error = CoreError::for_action(
            ManagerId::Scoop,
            ManagerAction::Install,
            CoreErrorKind::ProcessFailure,
            "bucket not found",
        );
        assert_eq!(error.to_string(), format!("{}: ProcessFailure: bucket not found", ManagerId::Scoop));

        let anonymous = CoreError {
            manager: None,
            ..error
        };
        assert_eq!(anonymous.to_string(), "ProcessFailure: bucket not found");
    }
}
