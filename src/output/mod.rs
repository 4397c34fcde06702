pub mod json;
pub mod table;

use anyhow::Result;

use crate::auth::AuthStatus;
use crate::draft::Draft;
use crate::gmail::{EmailContent, EmailSummary, SentReply};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Table,
    Json,
}

impl OutputFormat {
    pub fn from_json_flag(json: bool) -> Self {
        if json {
            Self::Json
        } else {
            Self::Table
        }
    }
}

pub fn format_email_list(format: OutputFormat, emails: &[EmailSummary]) -> Result<String> {
    match format {
        OutputFormat::Table => Ok(table::format_email_list(emails)),
        OutputFormat::Json => json::format_value(emails),
    }
}

pub fn format_email(format: OutputFormat, email: &EmailContent) -> Result<String> {
    match format {
        OutputFormat::Table => Ok(table::format_email(email)),
        OutputFormat::Json => json::format_value(email),
    }
}

pub fn format_draft(format: OutputFormat, draft: &Draft) -> Result<String> {
    match format {
        OutputFormat::Table => Ok(table::format_draft(draft)),
        OutputFormat::Json => json::format_value(draft),
    }
}

pub fn format_sent_reply(format: OutputFormat, sent: &SentReply) -> Result<String> {
    match format {
        OutputFormat::Table => Ok(table::format_sent_reply(sent)),
        OutputFormat::Json => json::format_value(sent),
    }
}

pub fn format_auth_status(format: OutputFormat, status: &AuthStatus) -> Result<String> {
    match format {
        OutputFormat::Table => Ok(table::format_auth_status(status)),
        OutputFormat::Json => json::format_value(status),
    }
}
