use chrono::{DateTime, Utc};
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

use crate::auth::{AuthState, AuthStatus};
use crate::draft::Draft;
use crate::gmail::{EmailContent, EmailSummary, SentReply};

const NUMBER_WIDTH: usize = 3;
const FROM_WIDTH: usize = 24;
const SUBJECT_WIDTH: usize = 52;
const DATE_WIDTH: usize = 12;

pub fn format_email_list(emails: &[EmailSummary]) -> String {
    if emails.is_empty() {
        return "No emails found.".to_string();
    }

    let mut out = String::new();
    out.push_str(&format!(
        "{:>num$}  {:<from$}  {:<subject$}  {:<date$}  {}\n",
        "#",
        "From",
        "Subject",
        "Date",
        "ID",
        num = NUMBER_WIDTH,
        from = FROM_WIDTH,
        subject = SUBJECT_WIDTH,
        date = DATE_WIDTH,
    ));
    out.push_str(&format!(
        "{}  {}  {}  {}  {}\n",
        "-".repeat(NUMBER_WIDTH),
        "-".repeat(FROM_WIDTH),
        "-".repeat(SUBJECT_WIDTH),
        "-".repeat(DATE_WIDTH),
        "-".repeat(16)
    ));

    for (index, email) in emails.iter().enumerate() {
        let marker = if email.unread { "*" } else { " " };
        let from = pad_to_width(&truncate_for_width(&display_sender(&email.from), FROM_WIDTH), FROM_WIDTH);
        let subject = pad_to_width(
            &truncate_for_width(
                &format!("{marker}{}", non_empty(&email.subject, "(no subject)")),
                SUBJECT_WIDTH,
            ),
            SUBJECT_WIDTH,
        );
        let date = truncate_for_width(&relative_date(email.date), DATE_WIDTH);

        out.push_str(&format!(
            "{:>num$}  {}  {}  {:<date_w$}  {}\n",
            index + 1,
            from,
            subject,
            date,
            email.id,
            num = NUMBER_WIDTH,
            date_w = DATE_WIDTH,
        ));
    }

    out
}

pub fn format_email(email: &EmailContent) -> String {
    let mut out = String::new();
    out.push_str(&format!("ID: {}\n", email.id));
    out.push_str(&format!("Thread: {}\n", email.thread_id));
    out.push_str(&format!(
        "Subject: {}\n",
        non_empty(&email.subject, "(no subject)")
    ));
    out.push_str(&format!("From: {}\n", non_empty(&email.from, "(unknown)")));
    if !email.to.is_empty() {
        out.push_str(&format!("To: {}\n", email.to.join(", ")));
    }
    if let Some(date) = email.date {
        out.push_str(&format!(
            "Date: {} ({})\n",
            date.to_rfc3339(),
            relative_date(Some(date))
        ));
    }
    if !email.labels.is_empty() {
        out.push_str(&format!("Labels: {}\n", email.labels.join(", ")));
    }

    out.push('\n');
    out.push_str("Body\n");
    out.push_str("----\n");
    out.push_str(non_empty(&email.body, "(empty)"));
    out.push('\n');
    out
}

pub fn format_draft(draft: &Draft) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "Draft reply to {} ({} tone, {} in {}ms)\n",
        draft.in_reply_to, draft.tone, draft.model, draft.latency_ms
    ));
    out.push_str(&"-".repeat(60));
    out.push('\n');
    out.push_str(&draft.body);
    out.push('\n');
    out
}

pub fn format_sent_reply(sent: &SentReply) -> String {
    format!(
        "Reply sent to {} (subject: {}, message {}, thread {})",
        sent.to, sent.subject, sent.id, sent.thread_id
    )
}

pub fn format_auth_status(status: &AuthStatus) -> String {
    let mut out = String::new();
    out.push_str("Gmail authorization\n");
    out.push_str("===================\n");
    out.push_str(&format!("State:         {}\n", colorize_state(status.state)));
    out.push_str(&format!(
        "Account:       {}\n",
        status.account.as_deref().unwrap_or("-")
    ));
    if let Some(expires_at) = status.expires_at {
        out.push_str(&format!("Token expires: {}\n", expires_at.to_rfc3339()));
    }
    out.push_str(&format!(
        "Refresh token: {}\n",
        if status.has_refresh_token { "yes" } else { "no" }
    ));
    if !status.scopes.is_empty() {
        out.push_str("Scopes:\n");
        for scope in &status.scopes {
            out.push_str(&format!("  {scope}\n"));
        }
    }
    out
}

fn colorize_state(state: AuthState) -> String {
    match state {
        AuthState::Authorized => format!("\u{1b}[32m{state}\u{1b}[0m"),
        AuthState::Unauthenticated => format!("\u{1b}[31m{state}\u{1b}[0m"),
        _ => format!("\u{1b}[33m{state}\u{1b}[0m"),
    }
}

/// Display name when the header has one, otherwise the address.
fn display_sender(from: &str) -> String {
    let from = from.trim();
    match from.rfind('<') {
        Some(start) if start > 0 => from[..start].trim().trim_matches('"').to_string(),
        Some(start) => from[start + 1..].trim_end_matches('>').to_string(),
        None if from.is_empty() => "(unknown)".to_string(),
        None => from.to_string(),
    }
}

fn non_empty<'a>(value: &'a str, fallback: &'a str) -> &'a str {
    if value.trim().is_empty() {
        fallback
    } else {
        value
    }
}

fn relative_date(input: Option<DateTime<Utc>>) -> String {
    let Some(at) = input else {
        return "-".to_string();
    };

    let age = Utc::now().signed_duration_since(at);
    match (age.num_seconds(), age.num_minutes(), age.num_hours(), age.num_days()) {
        (secs, ..) if secs < 0 => "scheduled".to_string(),
        (_, 0, ..) => "now".to_string(),
        (_, mins, 0, _) => format!("{mins} min"),
        (_, _, hours, 0) => format!("{hours} h"),
        (.., 1) => "yesterday".to_string(),
        (.., days) if days < 7 => format!("{days} days"),
        _ => at.format("%b %d %Y").to_string(),
    }
}

/// Cuts `value` to at most `max_width` display columns, marking the cut
/// with an ellipsis.
fn truncate_for_width(value: &str, max_width: usize) -> String {
    if value.width() <= max_width {
        return value.to_string();
    }

    let budget = max_width.saturating_sub(1);
    let mut used = 0;
    let kept: String = value
        .chars()
        .take_while(|c| {
            used += c.width().unwrap_or(0);
            used <= budget
        })
        .collect();
    format!("{kept}…")
}

/// `format!` pads by char count, which misaligns wide glyphs.
fn pad_to_width(value: &str, width: usize) -> String {
    format!("{value}{}", " ".repeat(width.saturating_sub(value.width())))
}
