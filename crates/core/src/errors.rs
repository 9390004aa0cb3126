use thiserror::Error;

use crate::domain::tool::ExecutionResult;
use crate::flows::{ConversationState, FlowTransitionError};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NotFoundKind {
    Tool,
    Session,
}

impl std::fmt::Display for NotFoundKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tool => f.write_str("tool"),
            Self::Session => f.write_str("session"),
        }
    }
}

/// Every failure mode of the dispatch engine. None of these escape the two
/// public entry points; they are rendered into results via [`DispatchError::into_result`].
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("parameter validation failed: {message}")]
    Validation { field: String, message: String },
    #[error("permission denied: tool `{tool}` requires `{permission}`")]
    Permission { tool: String, permission: String },
    #[error("tool `{tool}` requires approval before it can run")]
    ApprovalRequired { tool: String },
    #[error("{kind} not found: {name}")]
    NotFound { kind: NotFoundKind, name: String },
    #[error("language model call failed: {0}")]
    Upstream(String),
    #[error("tool execution failed: {0}")]
    Handler(String),
    #[error("session is already {state:?}")]
    State { state: ConversationState },
    #[error(transparent)]
    Flow(#[from] FlowTransitionError),
}

impl DispatchError {
    pub fn tool_not_found(name: impl Into<String>) -> Self {
        Self::NotFound { kind: NotFoundKind::Tool, name: name.into() }
    }

    pub fn session_not_found(name: impl Into<String>) -> Self {
        Self::NotFound { kind: NotFoundKind::Session, name: name.into() }
    }

    pub fn error_class(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "validation",
            Self::Permission { .. } => "permission",
            Self::ApprovalRequired { .. } => "approval_required",
            Self::NotFound { .. } => "not_found",
            Self::Upstream(_) => "upstream",
            Self::Handler(_) => "handler",
            Self::State { .. } => "state",
            Self::Flow(_) => "flow",
        }
    }

    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "The request is missing information or has invalid values.",
            Self::Permission { .. } => "You do not have permission to perform this operation.",
            Self::ApprovalRequired { .. } => "This operation has been submitted for approval.",
            Self::NotFound { .. } => "The requested operation does not exist.",
            Self::Upstream(_) => "The assistant is temporarily unavailable.",
            Self::Handler(_) => "The operation failed while running.",
            Self::State { .. } => "This operation has finished. Please start again.",
            Self::Flow(_) => "The conversation reached an unexpected state.",
        }
    }

    pub fn into_result(self) -> ExecutionResult {
        match self {
            Self::ApprovalRequired { .. } => ExecutionResult::pending_approval(self.to_string()),
            other => ExecutionResult::failure(other.user_message(), other.to_string()),
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("tool `{0}` is registered more than once")]
    DuplicateTool(String),
    #[error("tool name must not be empty")]
    EmptyName,
}
