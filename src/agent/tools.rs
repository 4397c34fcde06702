use serde_json::{json, Value};

use crate::draft::Tone;
use crate::error::{AgentError, AgentResult};
use crate::llm::ToolSpec;

pub const LIST_EMAILS: &str = "list_emails";
pub const READ_EMAIL: &str = "read_email";
pub const SEND_EMAIL_REPLY: &str = "send_email_reply";

pub const DEFAULT_LIST_QUERY: &str = "is:unread";
pub const DEFAULT_LIST_MAX: usize = 10;

/// How a tool call names its email: a Gmail id or a number from the last
/// listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmailRef {
    Id(String),
    Number(usize),
}

#[derive(Debug, Clone, PartialEq)]
pub enum AgentTool {
    ListEmails {
        query: String,
        max_results: usize,
    },
    ReadEmail {
        target: EmailRef,
        generate_draft: bool,
        tone: Option<Tone>,
    },
    SendEmailReply {
        target: EmailRef,
        reply_body: Option<String>,
    },
}

impl AgentTool {
    pub fn parse(name: &str, arguments: &Value) -> AgentResult<Self> {
        if !matches!(name, LIST_EMAILS | READ_EMAIL | SEND_EMAIL_REPLY) {
            return Err(AgentError::UnknownTool(name.to_string()));
        }

        let arguments = normalize_arguments(arguments)?;
        match name {
            LIST_EMAILS => Ok(Self::ListEmails {
                query: optional_string(&arguments, "query")
                    .unwrap_or_else(|| DEFAULT_LIST_QUERY.to_string()),
                max_results: optional_usize(&arguments, "max_results")?
                    .unwrap_or(DEFAULT_LIST_MAX),
            }),
            READ_EMAIL => Ok(Self::ReadEmail {
                target: email_ref(&arguments)?,
                generate_draft: optional_bool(&arguments, "generate_draft").unwrap_or(true),
                tone: optional_string(&arguments, "tone")
                    .map(|value| value.parse::<Tone>().map_err(AgentError::InvalidArguments))
                    .transpose()?,
            }),
            SEND_EMAIL_REPLY => Ok(Self::SendEmailReply {
                target: email_ref(&arguments)?,
                reply_body: optional_string(&arguments, "reply_body"),
            }),
            other => Err(AgentError::UnknownTool(other.to_string())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::ListEmails { .. } => LIST_EMAILS,
            Self::ReadEmail { .. } => READ_EMAIL,
            Self::SendEmailReply { .. } => SEND_EMAIL_REPLY,
        }
    }
}

pub fn tool_specs() -> Vec<ToolSpec> {
    vec![
        ToolSpec {
            name: LIST_EMAILS,
            description: "List emails from the Gmail inbox as a numbered list, newest first.",
            parameters: json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "Gmail search query such as 'is:unread', 'from:someone@example.com' or 'subject:meeting' (default: is:unread)"
                    },
                    "max_results": {
                        "type": "integer",
                        "minimum": 1,
                        "maximum": 100,
                        "description": "Maximum number of emails to return (default: 10)"
                    }
                },
                "required": []
            }),
        },
        ToolSpec {
            name: READ_EMAIL,
            description: "Read the full content of an email and generate a draft reply.",
            parameters: json!({
                "type": "object",
                "properties": {
                    "email_number": {
                        "type": "integer",
                        "minimum": 1,
                        "description": "Number of the email in the last list_emails result"
                    },
                    "message_id": {
                        "type": "string",
                        "description": "Gmail message id, as an alternative to email_number"
                    },
                    "generate_draft": {
                        "type": "boolean",
                        "description": "Whether to draft a reply (default: true)"
                    },
                    "tone": {
                        "type": "string",
                        "enum": ["normal", "friendly", "professional"],
                        "description": "Tone of the drafted reply"
                    }
                },
                "required": []
            }),
        },
        ToolSpec {
            name: SEND_EMAIL_REPLY,
            description: "Send a reply to an email. Only use after the user explicitly approves the draft.",
            parameters: json!({
                "type": "object",
                "properties": {
                    "email_number": {
                        "type": "integer",
                        "minimum": 1,
                        "description": "Number of the email to reply to"
                    },
                    "message_id": {
                        "type": "string",
                        "description": "Gmail message id, as an alternative to email_number"
                    },
                    "reply_body": {
                        "type": "string",
                        "description": "Reply text; omit to send the draft generated by read_email"
                    }
                },
                "required": []
            }),
        },
    ]
}

/// Models send arguments either as an object or as a JSON-encoded string.
fn normalize_arguments(arguments: &Value) -> AgentResult<Value> {
    match arguments {
        Value::Null => Ok(json!({})),
        Value::Object(_) => Ok(arguments.clone()),
        Value::String(raw) if raw.trim().is_empty() => Ok(json!({})),
        Value::String(raw) => match serde_json::from_str::<Value>(raw) {
            Ok(value @ Value::Object(_)) => Ok(value),
            Ok(_) => Err(AgentError::InvalidArguments(
                "arguments must be a JSON object".to_string(),
            )),
            Err(error) => Err(AgentError::InvalidArguments(format!(
                "arguments are not valid JSON: {error}"
            ))),
        },
        _ => Err(AgentError::InvalidArguments(
            "arguments must be a JSON object".to_string(),
        )),
    }
}

fn email_ref(arguments: &Value) -> AgentResult<EmailRef> {
    if let Some(id) = optional_string(arguments, "message_id") {
        return Ok(EmailRef::Id(id));
    }
    match optional_usize(arguments, "email_number")? {
        Some(0) => Err(AgentError::InvalidArguments(
            "param 'email_number' starts at 1".to_string(),
        )),
        Some(number) => Ok(EmailRef::Number(number)),
        None => Err(AgentError::InvalidArguments(
            "missing required param 'email_number' or 'message_id'".to_string(),
        )),
    }
}

fn optional_string(arguments: &Value, key: &str) -> Option<String> {
    arguments
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn optional_bool(arguments: &Value, key: &str) -> Option<bool> {
    match arguments.get(key)? {
        Value::Bool(value) => Some(*value),
        Value::String(value) => value.trim().parse().ok(),
        _ => None,
    }
}

/// Accepts integers and numeric strings; some models quote numbers.
fn optional_usize(arguments: &Value, key: &str) -> AgentResult<Option<usize>> {
    let Some(raw) = arguments.get(key).filter(|value| !value.is_null()) else {
        return Ok(None);
    };

    let value = match raw {
        Value::String(text) => text.trim().parse::<u64>().ok(),
        other => other
            .as_u64()
            .or_else(|| other.as_f64().filter(|f| f.fract() == 0.0 && *f >= 0.0).map(|f| f as u64)),
    };
    value
        .map(|value| Some(value as usize))
        .ok_or_else(|| {
            AgentError::InvalidArguments(format!("param '{key}' must be a non-negative integer"))
        })
}
