//! Mailbox operations guarded by the OAuth lifecycle.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::auth::OAuthLifecycle;
use crate::error::{AgentError, AgentResult};

pub mod client;

pub use client::GmailRestClient;

pub const MAX_LIST_RESULTS: usize = 100;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailSummary {
    pub id: String,
    pub thread_id: String,
    pub from: String,
    pub subject: String,
    pub date: Option<DateTime<Utc>>,
    pub snippet: String,
    pub labels: Vec<String>,
    pub unread: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailContent {
    pub id: String,
    pub thread_id: String,
    pub from: String,
    pub from_address: String,
    pub to: Vec<String>,
    pub subject: String,
    pub date: Option<DateTime<Utc>>,
    pub body: String,
    pub labels: Vec<String>,
    pub unread: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rfc822_message_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentReply {
    pub id: String,
    pub thread_id: String,
    pub to: String,
    pub subject: String,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GmailApiError {
    #[error("message not found: {0}")]
    NotFound(String),
    /// The access token was refused before its recorded expiry, e.g. after
    /// the grant was revoked from the Google account page.
    #[error("gmail refused the access token: {0}")]
    Unauthorized(String),
    #[error("gmail rejected the request: {0}")]
    Rejected(String),
    #[error("gmail unavailable: {0}")]
    Unavailable(String),
}

/// Gmail data capability. Every call carries the access token obtained from
/// the lifecycle, so implementations hold no credential state.
#[async_trait]
pub trait GmailApi: Send + Sync {
    async fn list_messages(
        &self,
        access_token: &str,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<EmailSummary>, GmailApiError>;

    async fn get_message(
        &self,
        access_token: &str,
        message_id: &str,
    ) -> Result<EmailContent, GmailApiError>;

    async fn send_reply(
        &self,
        access_token: &str,
        message_id: &str,
        body: &str,
    ) -> Result<SentReply, GmailApiError>;
}

#[derive(Clone)]
pub struct GmailToolset {
    lifecycle: Arc<OAuthLifecycle>,
    api: Arc<dyn GmailApi>,
}

impl GmailToolset {
    pub fn new(lifecycle: Arc<OAuthLifecycle>, api: Arc<dyn GmailApi>) -> Self {
        Self { lifecycle, api }
    }

    pub fn lifecycle(&self) -> &Arc<OAuthLifecycle> {
        &self.lifecycle
    }

    /// Newest first, at most `max_results` (clamped to 1..=100).
    pub async fn list(&self, query: &str, max_results: usize) -> AgentResult<Vec<EmailSummary>> {
        let credential = self.lifecycle.ensure_valid().await?;
        let limit = max_results.clamp(1, MAX_LIST_RESULTS);

        let mut emails = match self
            .api
            .list_messages(&credential.access_token, query, limit)
            .await
        {
            Ok(emails) => emails,
            // A listing has no single message to be missing.
            Err(GmailApiError::NotFound(id)) => {
                return Err(AgentError::GmailUnavailable(format!(
                    "message {id} disappeared while listing"
                )))
            }
            Err(error) => return Err(self.api_failure(error, AgentError::GmailUnavailable).await),
        };

        emails.sort_by(|a, b| b.date.cmp(&a.date));
        emails.truncate(limit);
        Ok(emails)
    }

    pub async fn read(&self, message_id: &str) -> AgentResult<EmailContent> {
        let message_id = require_message_id(message_id)?;
        let credential = self.lifecycle.ensure_valid().await?;
        match self
            .api
            .get_message(&credential.access_token, message_id)
            .await
        {
            Ok(email) => Ok(email),
            Err(error) => Err(self.api_failure(error, AgentError::GmailUnavailable).await),
        }
    }

    pub async fn reply(&self, message_id: &str, body: &str) -> AgentResult<SentReply> {
        let message_id = require_message_id(message_id)?;
        if body.trim().is_empty() {
            return Err(AgentError::InvalidArguments(
                "reply body must not be empty".to_string(),
            ));
        }

        let credential = self.lifecycle.ensure_valid().await?;
        let sent = match self
            .api
            .send_reply(&credential.access_token, message_id, body)
            .await
        {
            Ok(sent) => sent,
            Err(error) => return Err(self.api_failure(error, AgentError::SendFailed).await),
        };

        info!("sent reply {} in thread {}", sent.id, sent.thread_id);
        Ok(sent)
    }
}

impl GmailToolset {
    /// Maps a Gmail failure onto the operation's error. A refused token is
    /// marked stale so the next call refreshes it.
    async fn api_failure(
        &self,
        error: GmailApiError,
        failed: fn(String) -> AgentError,
    ) -> AgentError {
        match error {
            GmailApiError::NotFound(id) => AgentError::NotFound(id),
            GmailApiError::Unauthorized(message) => {
                self.lifecycle.invalidate_access_token().await;
                AgentError::ReauthRequired(message)
            }
            GmailApiError::Rejected(message) | GmailApiError::Unavailable(message) => {
                failed(message)
            }
        }
    }
}

fn require_message_id(message_id: &str) -> AgentResult<&str> {
    let trimmed = message_id.trim();
    if trimmed.is_empty() {
        return Err(AgentError::InvalidArguments(
            "message id must not be empty".to_string(),
        ));
    }
    Ok(trimmed)
}


#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use chrono::{Duration, TimeZone, Utc};

    use super::{EmailContent, EmailSummary, GmailApi, GmailApiError, GmailToolset, SentReply};
    use crate::auth::{
        AuthProviderError, AuthState, Credential, GmailAuthProvider, MemoryTokenStore,
        OAuthLifecycle,
    };
    use crate::error::AgentError;

    struct NoopProvider;

    #[async_trait]
    impl GmailAuthProvider for NoopProvider {
        fn authorization_url(&self, state: &str) -> Result<String, AuthProviderError> {
            Ok(format!("https://auth.test/?state={state}"))
        }

        async fn exchange_code(&self, _code: &str) -> Result<Credential, AuthProviderError> {
            Err(AuthProviderError::InvalidCode("unused".to_string()))
        }

        async fn refresh(&self, _credential: &Credential) -> Result<Credential, AuthProviderError> {
            Err(AuthProviderError::RefreshRejected("unused".to_string()))
        }
    }

    #[derive(Default)]
    struct RecordingApi {
        sends: Mutex<Vec<(String, String)>>,
        tokens: Mutex<Vec<String>>,
        list_failure: Option<GmailApiError>,
    }

    fn summary(id: &str, minutes_ago: i64) -> EmailSummary {
        EmailSummary {
            id: id.to_string(),
            thread_id: format!("t-{id}"),
            from: "Alex <alex@example.com>".to_string(),
            subject: format!("Subject {id}"),
            date: Some(Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap() - Duration::minutes(minutes_ago)),
            snippet: String::new(),
            labels: vec!["INBOX".to_string()],
            unread: true,
        }
    }

    #[async_trait]
    impl GmailApi for RecordingApi {
        async fn list_messages(
            &self,
            access_token: &str,
            _query: &str,
            max_results: usize,
        ) -> Result<Vec<EmailSummary>, GmailApiError> {
            self.tokens.lock().unwrap().push(access_token.to_string());
            if let Some(error) = &self.list_failure {
                return Err(error.clone());
            }
            let mut all = vec![summary("old", 30), summary("new", 1), summary("mid", 10)];
            all.truncate(max_results.max(1));
            Ok(all)
        }

        async fn get_message(
            &self,
            _access_token: &str,
            message_id: &str,
        ) -> Result<EmailContent, GmailApiError> {
            Err(GmailApiError::NotFound(message_id.to_string()))
        }

        async fn send_reply(
            &self,
            _access_token: &str,
            message_id: &str,
            body: &str,
        ) -> Result<SentReply, GmailApiError> {
            self.sends
                .lock()
                .unwrap()
                .push((message_id.to_string(), body.to_string()));
            Ok(SentReply {
                id: "sent-1".to_string(),
                thread_id: "t-1".to_string(),
                to: "alex@example.com".to_string(),
                subject: "Re: hi".to_string(),
            })
        }
    }

    fn toolset(credential: Option<Credential>) -> (GmailToolset, Arc<RecordingApi>) {
        toolset_with(credential, RecordingApi::default())
    }

    fn toolset_with(
        credential: Option<Credential>,
        api: RecordingApi,
    ) -> (GmailToolset, Arc<RecordingApi>) {
        let lifecycle = OAuthLifecycle::load(
            Arc::new(NoopProvider),
            Arc::new(MemoryTokenStore::new(credential)),
        )
        .expect("load lifecycle");
        let api = Arc::new(api);
        (GmailToolset::new(Arc::new(lifecycle), api.clone()), api)
    }

    fn valid_credential() -> Credential {
        Credential {
            access_token: "ya29.valid".to_string(),
            refresh_token: Some("1//r".to_string()),
            expires_at: Utc::now() + Duration::hours(1),
            scopes: Vec::new(),
            account: None,
        }
    }

    #[tokio::test]
    async fn list_sorts_newest_first_and_passes_token() {
        let (toolset, api) = toolset(Some(valid_credential()));
        let emails = toolset.list("is:unread", 10).await.expect("list");
        let ids: Vec<_> = emails.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["new", "mid", "old"]);
        assert_eq!(api.tokens.lock().unwrap().as_slice(), ["ya29.valid"]);
    }

    #[tokio::test]
    async fn list_clamps_zero_to_one() {
        let (toolset, _api) = toolset(Some(valid_credential()));
        let emails = toolset.list("", 0).await.expect("list");
        assert_eq!(emails.len(), 1);
    }

    #[tokio::test]
    async fn unauthenticated_calls_never_reach_gmail() {
        let (toolset, api) = toolset(None);
        let error = toolset.reply("m-1", "Thanks!").await.expect_err("no credential");
        assert!(matches!(error, AgentError::NotAuthenticated));
        assert!(api.sends.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_reply_body_is_rejected_before_sending() {
        let (toolset, api) = toolset(Some(valid_credential()));
        let error = toolset.reply("m-1", "   ").await.expect_err("empty body");
        assert!(matches!(error, AgentError::InvalidArguments(_)));
        assert!(api.sends.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_message_maps_to_not_found() {
        let (toolset, _api) = toolset(Some(valid_credential()));
        let error = toolset.read("nope").await.expect_err("missing");
        assert_eq!(error.code(), "not_found");
    }

    #[tokio::test]
    async fn refused_token_requires_reauth_and_is_marked_stale() {
        let (toolset, _api) = toolset_with(
            Some(valid_credential()),
            RecordingApi {
                list_failure: Some(GmailApiError::Unauthorized("status=401".to_string())),
                ..RecordingApi::default()
            },
        );

        let error = toolset.list("is:unread", 5).await.expect_err("token refused");
        assert_eq!(error.code(), "reauth_required");
        assert_eq!(toolset.lifecycle().status().await.state, AuthState::Expired);
    }

    #[tokio::test]
    async fn listing_never_reports_a_missing_message() {
        let (toolset, _api) = toolset_with(
            Some(valid_credential()),
            RecordingApi {
                list_failure: Some(GmailApiError::NotFound("gone".to_string())),
                ..RecordingApi::default()
            },
        );

        let error = toolset.list("is:unread", 5).await.expect_err("listing failed");
        assert_eq!(error.code(), "gmail_unavailable");
    }
}
