use async_trait::async_trait;
use base64::engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{EmailContent, EmailSummary, GmailApi, GmailApiError, SentReply};
use crate::http::{describe_transport_error, redact_response_body};

pub const GMAIL_API_BASE: &str = "https://gmail.googleapis.com/gmail/v1";
pub const MAX_BODY_CHARS: usize = 3000;
const HTML_WRAP_WIDTH: usize = 120;
const SUMMARY_HEADERS: &[&str] = &["From", "Subject", "Date"];
const REPLY_HEADERS: &[&str] = &[
    "From",
    "Reply-To",
    "Subject",
    "Message-ID",
    "References",
];

/// Gmail REST v1 over reqwest. One request per call, no retries.
#[derive(Debug, Clone)]
pub struct GmailRestClient {
    client: Client,
    base_url: String,
}

impl GmailRestClient {
    pub fn new(client: Client) -> Self {
        let base_url = std::env::var("GMAIL_AGENT_GMAIL_API_BASE")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| GMAIL_API_BASE.to_string());
        Self { client, base_url }
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        token: &str,
        path: &str,
        query: &[(&str, String)],
        not_found_id: &str,
    ) -> Result<T, GmailApiError> {
        let url = format!("{}/users/me/{path}", self.base_url);
        let response = self
            .client
            .get(&url)
            .bearer_auth(token)
            .header("accept", "application/json")
            .query(query)
            .send()
            .await
            .map_err(|error| GmailApiError::Unavailable(describe_transport_error(&error)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|error| GmailApiError::Unavailable(describe_transport_error(&error)))?;
        debug!("gmail GET {path} -> {status}");

        if !status.is_success() {
            return Err(classify_status(status, &body, not_found_id));
        }
        serde_json::from_str(&body)
            .map_err(|error| GmailApiError::Unavailable(format!("decode gmail response: {error}")))
    }

    async fn get_message_raw(
        &self,
        token: &str,
        message_id: &str,
        format: &str,
        headers: &[&str],
    ) -> Result<GmailMessage, GmailApiError> {
        let mut query = vec![("format", format.to_string())];
        query.extend(
            headers
                .iter()
                .map(|header| ("metadataHeaders", header.to_string())),
        );
        self.get_json(token, &format!("messages/{message_id}"), &query, message_id)
            .await
    }
}

fn classify_status(status: StatusCode, body: &str, message_id: &str) -> GmailApiError {
    let detail = format!("status={status} body={}", redact_response_body(body));
    match status {
        StatusCode::UNAUTHORIZED => GmailApiError::Unauthorized(detail),
        // Gmail answers 400 "Invalid id value" for malformed ids and 403 for
        // messages outside the granted scope.
        StatusCode::NOT_FOUND | StatusCode::FORBIDDEN | StatusCode::BAD_REQUEST
            if !message_id.is_empty() =>
        {
            GmailApiError::NotFound(message_id.to_string())
        }
        StatusCode::TOO_MANY_REQUESTS => GmailApiError::Unavailable(detail),
        status if status.is_client_error() => GmailApiError::Rejected(detail),
        _ => GmailApiError::Unavailable(detail),
    }
}

#[async_trait]
impl GmailApi for GmailRestClient {
    async fn list_messages(
        &self,
        access_token: &str,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<EmailSummary>, GmailApiError> {
        let mut params = vec![("maxResults", max_results.to_string())];
        if !query.trim().is_empty() {
            params.push(("q", query.trim().to_string()));
        }
        let list: GmailMessageList = self
            .get_json(access_token, "messages", &params, "")
            .await?;

        let mut summaries = Vec::new();
        for stub in list.messages.unwrap_or_default() {
            let fetched = self
                .get_message_raw(access_token, &stub.id, "metadata", SUMMARY_HEADERS)
                .await;
            summaries.extend(listed_summary(fetched)?);
        }
        Ok(summaries)
    }

    async fn get_message(
        &self,
        access_token: &str,
        message_id: &str,
    ) -> Result<EmailContent, GmailApiError> {
        let message = self
            .get_message_raw(access_token, message_id, "full", &[])
            .await?;
        Ok(map_message_to_content(&message))
    }

    async fn send_reply(
        &self,
        access_token: &str,
        message_id: &str,
        body: &str,
    ) -> Result<SentReply, GmailApiError> {
        let original = self
            .get_message_raw(access_token, message_id, "metadata", REPLY_HEADERS)
            .await?;
        let reply = build_reply(&original, body).ok_or_else(|| {
            GmailApiError::Rejected(format!("message {message_id} has no sender to reply to"))
        })?;

        let url = format!("{}/users/me/messages/send", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(access_token)
            .json(&SendRequest {
                raw: URL_SAFE.encode(reply.mime.as_bytes()),
                thread_id: original.thread_id.clone(),
            })
            .send()
            .await
            .map_err(|error| GmailApiError::Unavailable(describe_transport_error(&error)))?;

        let status = response.status();
        let response_body = response
            .text()
            .await
            .map_err(|error| GmailApiError::Unavailable(describe_transport_error(&error)))?;
        if !status.is_success() {
            return Err(classify_status(status, &response_body, ""));
        }

        let sent: SendResponse = serde_json::from_str(&response_body)
            .map_err(|error| GmailApiError::Unavailable(format!("decode send response: {error}")))?;
        Ok(SentReply {
            id: sent.id,
            thread_id: sent.thread_id.unwrap_or(original.thread_id),
            to: reply.to,
            subject: reply.subject,
        })
    }
}

/// A message deleted between the listing and its metadata fetch is left out
/// of the listing.
fn listed_summary(
    fetched: Result<GmailMessage, GmailApiError>,
) -> Result<Option<EmailSummary>, GmailApiError> {
    match fetched {
        Ok(message) => Ok(Some(map_message_to_summary(&message))),
        Err(GmailApiError::NotFound(id)) => {
            debug!("message {id} vanished before its metadata was fetched");
            Ok(None)
        }
        Err(error) => Err(error),
    }
}

struct OutgoingReply {
    to: String,
    subject: String,
    mime: String,
}

fn build_reply(original: &GmailMessage, body: &str) -> Option<OutgoingReply> {
    let payload = original.payload.as_ref();
    let header = |name: &str| payload.and_then(|payload| extract_header(payload, name));

    let sender = header("Reply-To").or_else(|| header("From"))?;
    let (_, address) = parse_from_header(Some(&sender));
    let to = address?;

    let subject = reply_subject(header("Subject").as_deref().unwrap_or_default());
    let message_id = header("Message-ID").or_else(|| header("Message-Id"));
    let references = match (header("References"), &message_id) {
        (Some(existing), Some(id)) => Some(format!("{existing} {id}")),
        (None, Some(id)) => Some(id.clone()),
        (existing, None) => existing,
    };

    let mut mime = String::new();
    mime.push_str(&format!("To: {to}\r\n"));
    mime.push_str(&format!("Subject: {subject}\r\n"));
    if let Some(id) = &message_id {
        mime.push_str(&format!("In-Reply-To: {id}\r\n"));
    }
    if let Some(references) = &references {
        mime.push_str(&format!("References: {references}\r\n"));
    }
    mime.push_str("MIME-Version: 1.0\r\n");
    mime.push_str("Content-Type: text/plain; charset=\"UTF-8\"\r\n");
    mime.push_str("Content-Transfer-Encoding: 8bit\r\n");
    mime.push_str("\r\n");
    mime.push_str(&body.replace("\r\n", "\n").replace('\n', "\r\n"));

    Some(OutgoingReply { to, subject, mime })
}

fn reply_subject(subject: &str) -> String {
    let subject = subject.trim();
    if subject.to_ascii_lowercase().starts_with("re:") {
        subject.to_string()
    } else {
        format!("Re: {subject}")
    }
}

fn map_message_to_summary(message: &GmailMessage) -> EmailSummary {
    let header = |name: &str| {
        message
            .payload
            .as_ref()
            .and_then(|payload| extract_header(payload, name))
    };
    let labels = message.label_ids.clone().unwrap_or_default();

    EmailSummary {
        id: message.id.clone(),
        thread_id: message.thread_id.clone(),
        from: header("From").unwrap_or_default(),
        subject: header("Subject").unwrap_or_default(),
        date: message_date(message),
        snippet: message
            .snippet
            .as_deref()
            .map(html_entity_decode)
            .unwrap_or_default(),
        unread: labels.iter().any(|label| label == "UNREAD"),
        labels,
    }
}

fn map_message_to_content(message: &GmailMessage) -> EmailContent {
    let header = |name: &str| {
        message
            .payload
            .as_ref()
            .and_then(|payload| extract_header(payload, name))
    };
    let from = header("From").unwrap_or_default();
    let (_, from_address) = parse_from_header(Some(&from));
    let labels = message.label_ids.clone().unwrap_or_default();
    let body = message
        .payload
        .as_ref()
        .and_then(extract_body_text)
        .unwrap_or_default();

    EmailContent {
        id: message.id.clone(),
        thread_id: message.thread_id.clone(),
        from_address: from_address.unwrap_or_else(|| from.clone()),
        from,
        to: parse_address_list(header("To").as_deref()),
        subject: header("Subject").unwrap_or_default(),
        date: message_date(message),
        body: truncate_chars(&body, MAX_BODY_CHARS),
        unread: labels.iter().any(|label| label == "UNREAD"),
        labels,
        rfc822_message_id: header("Message-ID").or_else(|| header("Message-Id")),
    }
}

/// `internalDate` (epoch millis) first, then the `Date` header.
fn message_date(message: &GmailMessage) -> Option<DateTime<Utc>> {
    message
        .internal_date
        .as_deref()
        .and_then(|ms| ms.parse::<i64>().ok())
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        .or_else(|| {
            message
                .payload
                .as_ref()
                .and_then(|payload| extract_header(payload, "Date"))
                .and_then(|raw| DateTime::parse_from_rfc2822(raw.trim()).ok())
                .map(|date| date.with_timezone(&Utc))
        })
}

fn extract_header(payload: &GmailPayload, name: &str) -> Option<String> {
    payload
        .headers
        .as_deref()
        .unwrap_or_default()
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case(name))
        .map(|h| h.value.clone())
}

fn parse_from_header(raw: Option<&str>) -> (Option<String>, Option<String>) {
    let Some(raw) = raw else {
        return (None, None);
    };
    let raw = raw.trim();
    if raw.is_empty() {
        return (None, None);
    }

    if let (Some(start), Some(end)) = (raw.rfind('<'), raw.rfind('>')) {
        if start < end {
            let address = raw[start + 1..end].trim();
            let name = raw[..start].trim().trim_matches('"').trim();
            return (
                (!name.is_empty()).then(|| name.to_string()),
                (!address.is_empty()).then(|| address.to_string()),
            );
        }
    }

    if raw.contains('@') {
        return (None, Some(raw.to_string()));
    }
    (Some(raw.to_string()), None)
}

fn parse_address_list(raw: Option<&str>) -> Vec<String> {
    let Some(raw) = raw else {
        return Vec::new();
    };

    let mut addresses = Vec::new();
    let mut quoted = false;
    let mut current = String::new();

    for ch in raw.chars() {
        match ch {
            '"' => {
                quoted = !quoted;
                current.push(ch);
            }
            ',' if !quoted => {
                addresses.extend(parse_from_header(Some(current.trim())).1);
                current.clear();
            }
            _ => current.push(ch),
        }
    }
    addresses.extend(parse_from_header(Some(current.trim())).1);
    addresses
}

/// Plain-text body. Falls back to rendering the HTML part when the message
/// carries no `text/plain` part.
fn extract_body_text(payload: &GmailPayload) -> Option<String> {
    let mut text_body = None;
    let mut html_body = None;
    collect_body_parts(payload, &mut text_body, &mut html_body);

    if let Some(text) = text_body.filter(|text| !text.trim().is_empty()) {
        return Some(text.trim().to_string());
    }

    let html = html_body?;
    let rendered = std::panic::catch_unwind(|| {
        html2text::from_read(html.as_bytes(), HTML_WRAP_WIDTH)
            .lines()
            .map(str::trim_end)
            .collect::<Vec<_>>()
            .join("\n")
            .trim()
            .to_string()
    })
    .ok()?;
    (!rendered.is_empty()).then_some(rendered)
}

fn collect_body_parts(
    payload: &GmailPayload,
    text_body: &mut Option<String>,
    html_body: &mut Option<String>,
) {
    let mime_type = payload
        .mime_type
        .as_deref()
        .unwrap_or("")
        .to_ascii_lowercase();

    if let Some(data) = payload.body.as_ref().and_then(|body| body.data.as_deref()) {
        if let Some(decoded) = decode_body_data(data) {
            if mime_type == "text/plain" && text_body.is_none() {
                *text_body = Some(decoded);
            } else if mime_type == "text/html" && html_body.is_none() {
                *html_body = Some(decoded);
            }
        }
    }

    for part in payload.parts.as_deref().unwrap_or_default() {
        collect_body_parts(part, text_body, html_body);
    }
}

fn decode_body_data(data: &str) -> Option<String> {
    if data.is_empty() {
        return None;
    }
    let bytes = URL_SAFE_NO_PAD.decode(data.trim_end_matches('=')).ok()?;
    Some(String::from_utf8_lossy(&bytes).into_owned())
}

fn html_entity_decode(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

pub(crate) fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((end, _)) => text[..end].to_string(),
        None => text.to_string(),
    }
}

#[derive(Debug, Clone, Deserialize)]
struct GmailMessageList {
    messages: Option<Vec<GmailMessageStub>>,
}

#[derive(Debug, Clone, Deserialize)]
struct GmailMessageStub {
    id: String,
}

#[derive(Debug, Clone, Deserialize)]
struct GmailMessage {
    id: String,
    #[serde(rename = "threadId")]
    thread_id: String,
    #[serde(rename = "labelIds")]
    label_ids: Option<Vec<String>>,
    snippet: Option<String>,
    payload: Option<GmailPayload>,
    #[serde(rename = "internalDate")]
    internal_date: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct GmailPayload {
    #[serde(rename = "mimeType")]
    mime_type: Option<String>,
    headers: Option<Vec<GmailHeader>>,
    body: Option<GmailBody>,
    parts: Option<Vec<GmailPayload>>,
}

#[derive(Debug, Clone, Deserialize)]
struct GmailHeader {
    name: String,
    value: String,
}

#[derive(Debug, Clone, Deserialize)]
struct GmailBody {
    data: Option<String>,
}

#[derive(Debug, Serialize)]
struct SendRequest {
    raw: String,
    #[serde(rename = "threadId")]
    thread_id: String,
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    id: String,
    #[serde(rename = "threadId")]
    thread_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use reqwest::StatusCode;
    use serde_json::json;

    use super::{
        build_reply, classify_status, decode_body_data, html_entity_decode, listed_summary,
        map_message_to_content, map_message_to_summary, parse_address_list, parse_from_header,
        truncate_chars, GmailMessage, MAX_BODY_CHARS,
    };
    use crate::gmail::GmailApiError;

    fn multipart_message() -> GmailMessage {
        serde_json::from_value(json!({
            "id": "18e1234abcd",
            "threadId": "thread-1",
            "labelIds": ["INBOX", "UNREAD", "Label_42"],
            "snippet": "Hello &amp; welcome to the meeting",
            "payload": {
                "mimeType": "multipart/alternative",
                "headers": [
                    { "name": "Subject", "value": "Quarterly Review" },
                    { "name": "From", "value": "Alex Smith <alex@example.com>" },
                    { "name": "To", "value": "team@example.com, Bob <bob@example.com>" },
                    { "name": "Message-ID", "value": "<msg-1@mail.gmail.com>" },
                    { "name": "Date", "value": "Wed, 01 Jan 2026 12:00:00 +0000" }
                ],
                "body": { "size": 0 },
                "parts": [
                    { "mimeType": "text/plain", "body": { "data": "SGVsbG8gdGVhbSE" } },
                    { "mimeType": "text/html", "body": { "data": "PHA-SGVsbG8gPGI-dGVhbTwvYj4hPC9wPg" } }
                ]
            },
            "internalDate": "1735732800000"
        }))
        .expect("deserialize gmail message")
    }

    #[test]
    fn full_message_maps_to_content() {
        let content = map_message_to_content(&multipart_message());

        assert_eq!(content.id, "18e1234abcd");
        assert_eq!(content.thread_id, "thread-1");
        assert_eq!(content.from, "Alex Smith <alex@example.com>");
        assert_eq!(content.from_address, "alex@example.com");
        assert_eq!(content.to, vec!["team@example.com", "bob@example.com"]);
        assert_eq!(content.subject, "Quarterly Review");
        assert_eq!(content.body, "Hello team!");
        assert!(content.unread);
        assert_eq!(
            content.rfc822_message_id.as_deref(),
            Some("<msg-1@mail.gmail.com>")
        );
        assert_eq!(
            content.date.map(|d| d.timestamp_millis()),
            Some(1_735_732_800_000)
        );
    }

    #[test]
    fn metadata_message_maps_to_summary() {
        let summary = map_message_to_summary(&multipart_message());
        assert_eq!(summary.snippet, "Hello & welcome to the meeting");
        assert_eq!(summary.from, "Alex Smith <alex@example.com>");
        assert!(summary.unread);
        assert!(summary.labels.contains(&"Label_42".to_string()));
    }

    #[test]
    fn html_only_message_is_rendered_to_text() {
        let message: GmailMessage = serde_json::from_value(json!({
            "id": "m-html",
            "threadId": "t-html",
            "payload": {
                "mimeType": "text/html",
                "headers": [{ "name": "From", "value": "news@example.com" }],
                "body": { "data": "PHA-SGVsbG8gPGI-dGVhbTwvYj4hPC9wPg" }
            }
        }))
        .expect("deserialize");

        let content = map_message_to_content(&message);
        assert!(content.body.contains("Hello"));
        assert!(!content.body.contains("<p>"));
        assert!(!content.unread);
    }

    #[test]
    fn long_bodies_are_truncated_by_characters() {
        let body = "ü".repeat(MAX_BODY_CHARS + 50);
        let truncated = truncate_chars(&body, MAX_BODY_CHARS);
        assert_eq!(truncated.chars().count(), MAX_BODY_CHARS);
        assert_eq!(truncate_chars("short", MAX_BODY_CHARS), "short");
    }

    #[test]
    fn reply_threads_onto_original() {
        let reply = build_reply(&multipart_message(), "Thanks,\nsee you there").expect("reply");

        assert_eq!(reply.to, "alex@example.com");
        assert_eq!(reply.subject, "Re: Quarterly Review");
        assert!(reply.mime.contains("In-Reply-To: <msg-1@mail.gmail.com>\r\n"));
        assert!(reply.mime.contains("References: <msg-1@mail.gmail.com>\r\n"));
        assert!(reply.mime.ends_with("Thanks,\r\nsee you there"));
    }

    #[test]
    fn reply_keeps_existing_re_prefix_and_extends_references() {
        let message: GmailMessage = serde_json::from_value(json!({
            "id": "m-2",
            "threadId": "t-2",
            "payload": {
                "headers": [
                    { "name": "From", "value": "bob@example.com" },
                    { "name": "Reply-To", "value": "\"Bob, Jr.\" <bob.reply@example.com>" },
                    { "name": "Subject", "value": "RE: lunch" },
                    { "name": "Message-Id", "value": "<b@x>" },
                    { "name": "References", "value": "<a@x>" }
                ]
            }
        }))
        .expect("deserialize");

        let reply = build_reply(&message, "Sure").expect("reply");
        assert_eq!(reply.to, "bob.reply@example.com");
        assert_eq!(reply.subject, "RE: lunch");
        assert!(reply.mime.contains("References: <a@x> <b@x>\r\n"));
    }

    #[test]
    fn from_header_parsing() {
        let (name, addr) = parse_from_header(Some("\"Smith, Alex\" <alex@example.com>"));
        assert_eq!(name.as_deref(), Some("Smith, Alex"));
        assert_eq!(addr.as_deref(), Some("alex@example.com"));

        let (name, addr) = parse_from_header(Some("plain@example.com"));
        assert!(name.is_none());
        assert_eq!(addr.as_deref(), Some("plain@example.com"));
    }

    #[test]
    fn address_list_respects_quoted_commas() {
        let addrs = parse_address_list(Some(
            "team@example.com, \"Bob, Jr.\" <bob@example.com>, alice@example.com",
        ));
        assert_eq!(
            addrs,
            vec!["team@example.com", "bob@example.com", "alice@example.com"]
        );
    }

    #[test]
    fn entity_decode_and_base64url() {
        assert_eq!(html_entity_decode("a &amp;lt; b"), "a &lt; b");
        assert_eq!(decode_body_data("SGVsbG8gV29ybGQ").as_deref(), Some("Hello World"));
        assert_eq!(decode_body_data("SGVsbG8gV29ybGQ=").as_deref(), Some("Hello World"));
    }

    #[test]
    fn status_classification() {
        assert_eq!(
            classify_status(StatusCode::NOT_FOUND, "", "m-1"),
            GmailApiError::NotFound("m-1".to_string())
        );
        assert!(matches!(
            classify_status(StatusCode::UNAUTHORIZED, "invalid credentials", "m-1"),
            GmailApiError::Unauthorized(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::UNAUTHORIZED, "", ""),
            GmailApiError::Unauthorized(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::SERVICE_UNAVAILABLE, "", ""),
            GmailApiError::Unavailable(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_REQUEST, "bad query", ""),
            GmailApiError::Rejected(_)
        ));
    }

    #[test]
    fn vanished_messages_are_skipped_in_listings() {
        let present = listed_summary(Ok(multipart_message())).expect("present message");
        assert_eq!(present.map(|summary| summary.id).as_deref(), Some("18e1234abcd"));

        let vanished = listed_summary(Err(GmailApiError::NotFound("gone".to_string())));
        assert_eq!(vanished, Ok(None));

        let outage = listed_summary(Err(GmailApiError::Unavailable("503".to_string())));
        assert!(matches!(outage, Err(GmailApiError::Unavailable(_))));
    }
}
