use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::draft::Draft;
use crate::gmail::EmailSummary;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub call_id: String,
    pub name: String,
    pub ok: bool,
    pub payload: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call: Option<ToolCallRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_result: Option<ToolResult>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content.into())
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, content.into())
    }

    pub fn tool_call(call: ToolCallRequest) -> Self {
        Self {
            role: Role::Assistant,
            content: String::new(),
            tool_call: Some(call),
            tool_result: None,
            created_at: Utc::now(),
        }
    }

    pub fn tool_result(result: ToolResult) -> Self {
        Self {
            role: Role::Tool,
            content: result.payload.to_string(),
            tool_call: None,
            tool_result: Some(result),
            created_at: Utc::now(),
        }
    }

    fn plain(role: Role, content: String) -> Self {
        Self {
            role,
            content,
            tool_call: None,
            tool_result: None,
            created_at: Utc::now(),
        }
    }

    pub fn is_final_answer(&self) -> bool {
        self.role == Role::Assistant && self.tool_call.is_none()
    }
}

/// Numbering of the last `list_emails` result, 1-based.
#[derive(Debug, Clone, Default)]
pub struct MailboxIndex {
    entries: Vec<EmailSummary>,
}

impl MailboxIndex {
    pub fn replace(&mut self, emails: &[EmailSummary]) {
        self.entries = emails.to_vec();
    }

    pub fn resolve(&self, number: usize) -> Option<&EmailSummary> {
        number.checked_sub(1).and_then(|index| self.entries.get(index))
    }

    pub fn number_of(&self, message_id: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|entry| entry.id == message_id)
            .map(|index| index + 1)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[derive(Debug, Clone)]
pub struct ConversationSession {
    pub session_id: String,
    messages: Vec<Message>,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
    pub mailbox: MailboxIndex,
    pub last_draft: Option<Draft>,
}

impl ConversationSession {
    pub fn new(session_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            messages: Vec::new(),
            created_at: now,
            last_active_at: now,
            mailbox: MailboxIndex::default(),
            last_draft: None,
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn push(&mut self, message: Message) {
        self.last_active_at = Utc::now();
        self.messages.push(message);
    }

    pub fn reset(&mut self) {
        self.messages.clear();
        self.mailbox.clear();
        self.last_draft = None;
        self.last_active_at = Utc::now();
    }

    /// The trailing messages submitted to the model. The window is widened
    /// rather than starting on a tool result cut off from its call.
    pub fn window(&self, context_window: Option<usize>) -> &[Message] {
        let Some(limit) = context_window else {
            return &self.messages;
        };

        let mut start = self.messages.len().saturating_sub(limit.max(1));
        while start > 0 && self.messages[start].role == Role::Tool {
            start -= 1;
        }
        &self.messages[start..]
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.session_id.clone(),
            created_at: self.created_at,
            last_active_at: self.last_active_at,
            listed_emails: self.mailbox.len(),
            pending_draft_for: self
                .last_draft
                .as_ref()
                .map(|draft| draft.in_reply_to.clone()),
            messages: self.messages.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
    pub listed_emails: usize,
    pub pending_draft_for: Option<String>,
    pub messages: Vec<Message>,
}
