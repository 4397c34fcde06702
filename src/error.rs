use std::fmt::{Display, Formatter};

use serde::Serialize;
use thiserror::Error;

use crate::auth::AuthState;

/// Caller-visible failure category. Transport layers map these to their own
/// status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    Auth,
    Mailbox,
    Agent,
    Internal,
}

impl Display for ErrorCategory {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auth => write!(f, "auth"),
            Self::Mailbox => write!(f, "mailbox"),
            Self::Agent => write!(f, "agent"),
            Self::Internal => write!(f, "internal"),
        }
    }
}

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("not authenticated with Gmail; start the OAuth flow first")]
    NotAuthenticated,

    #[error("Gmail authorization must be renewed: {0}")]
    ReauthRequired(String),

    #[error("authorization code rejected: {0}")]
    InvalidCode(String),

    #[error("already authorized; pass force to re-authenticate")]
    AlreadyAuthorized,

    #[error("operation requires auth state {expected}, current state is {actual}")]
    InvalidState {
        expected: AuthState,
        actual: AuthState,
    },

    #[error("email not found: {0}")]
    NotFound(String),

    #[error("Gmail unavailable: {0}")]
    GmailUnavailable(String),

    #[error("sending reply failed: {0}")]
    SendFailed(String),

    #[error("draft generation failed: {0}")]
    DraftGenerationFailed(String),

    #[error("tool loop exceeded {iterations} iterations without a final answer")]
    ToolLoopExceeded { iterations: usize },

    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("invalid tool arguments: {0}")]
    InvalidArguments(String),

    #[error("language model unavailable: {0}")]
    LlmUnavailable(String),

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl AgentError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotAuthenticated => "not_authenticated",
            Self::ReauthRequired(_) => "reauth_required",
            Self::InvalidCode(_) => "invalid_code",
            Self::AlreadyAuthorized => "already_authorized",
            Self::InvalidState { .. } => "invalid_state",
            Self::NotFound(_) => "not_found",
            Self::GmailUnavailable(_) => "gmail_unavailable",
            Self::SendFailed(_) => "send_failed",
            Self::DraftGenerationFailed(_) => "draft_generation_failed",
            Self::ToolLoopExceeded { .. } => "tool_loop_exceeded",
            Self::UnknownTool(_) => "unknown_tool",
            Self::InvalidArguments(_) => "invalid_arguments",
            Self::LlmUnavailable(_) => "llm_unavailable",
            Self::SessionNotFound(_) => "session_not_found",
            Self::Storage(_) => "storage",
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::NotAuthenticated
            | Self::ReauthRequired(_)
            | Self::InvalidCode(_)
            | Self::AlreadyAuthorized
            | Self::InvalidState { .. } => ErrorCategory::Auth,
            Self::NotFound(_) | Self::GmailUnavailable(_) | Self::SendFailed(_) => {
                ErrorCategory::Mailbox
            }
            Self::DraftGenerationFailed(_)
            | Self::ToolLoopExceeded { .. }
            | Self::UnknownTool(_)
            | Self::InvalidArguments(_)
            | Self::LlmUnavailable(_)
            | Self::SessionNotFound(_) => ErrorCategory::Agent,
            Self::Storage(_) => ErrorCategory::Internal,
        }
    }

    /// True when the user has to go through the OAuth flow again.
    pub fn needs_authentication(&self) -> bool {
        matches!(self, Self::NotAuthenticated | Self::ReauthRequired(_))
    }

    pub fn to_payload(&self) -> serde_json::Value {
        serde_json::json!({
            "code": self.code(),
            "category": self.category(),
            "message": self.to_string(),
        })
    }
}

pub type AgentResult<T> = Result<T, AgentError>;

#[cfg(test)]
mod tests {
    use super::{AgentError, ErrorCategory};

    #[test]
    fn auth_errors_are_categorized_as_auth() {
        assert_eq!(
            AgentError::ReauthRequired("revoked".to_string()).category(),
            ErrorCategory::Auth
        );
        assert_eq!(AgentError::NotAuthenticated.category(), ErrorCategory::Auth);
        assert!(AgentError::NotAuthenticated.needs_authentication());
    }

    #[test]
    fn payload_carries_code_category_and_message() {
        let payload = AgentError::NotFound("msg-1".to_string()).to_payload();
        assert_eq!(payload["code"], "not_found");
        assert_eq!(payload["category"], "mailbox");
        assert!(payload["message"]
            .as_str()
            .expect("message string")
            .contains("msg-1"));
    }

    #[test]
    fn storage_errors_wrap_anyhow() {
        let error: AgentError = anyhow::anyhow!("disk full").into();
        assert_eq!(error.code(), "storage");
        assert_eq!(error.category(), ErrorCategory::Internal);
        assert_eq!(error.to_string(), "disk full");
    }
}
