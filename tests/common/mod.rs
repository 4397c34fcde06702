#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
use serde_json::{json, Value};
use uuid::Uuid;

use gmail_agent::agent::session::Message;
use gmail_agent::auth::{
    AuthProviderError, Credential, GmailAuthProvider, MemoryTokenStore, TokenStore,
};
use gmail_agent::config::{AgentConfig, DraftConfig};
use gmail_agent::gmail::{EmailContent, EmailSummary, GmailApi, GmailApiError, SentReply};
use gmail_agent::llm::{LlmClient, LlmError, LlmReply, ProposedToolCall, ToolSpec};
use gmail_agent::AgentService;

pub const GOOD_CODE: &str = "good-code";

pub fn temp_root(label: &str) -> PathBuf {
    let root = std::env::temp_dir().join(format!("gmail-agent-{label}-{}", Uuid::new_v4()));
    std::fs::create_dir_all(&root).expect("create temp test root");
    root
}

pub fn credential(expires_in_minutes: i64, refresh: Option<&str>) -> Credential {
    Credential {
        access_token: format!("access-{}", Uuid::new_v4().simple()),
        refresh_token: refresh.map(str::to_string),
        expires_at: Utc::now() + Duration::minutes(expires_in_minutes),
        scopes: vec!["https://www.googleapis.com/auth/gmail.readonly".to_string()],
        account: Some("owner@example.com".to_string()),
    }
}

/// Accepts [`GOOD_CODE`] and refreshes by minting a fresh one-hour token.
#[derive(Default)]
pub struct FakeAuthProvider {
    pub exchanges: AtomicUsize,
    pub refreshes: AtomicUsize,
    pub reject_refresh: bool,
}

#[async_trait]
impl GmailAuthProvider for FakeAuthProvider {
    fn authorization_url(&self, state: &str) -> Result<String, AuthProviderError> {
        Ok(format!(
            "https://accounts.example.com/o/oauth2/auth?access_type=offline&prompt=consent&state={state}"
        ))
    }

    async fn exchange_code(&self, code: &str) -> Result<Credential, AuthProviderError> {
        self.exchanges.fetch_add(1, Ordering::SeqCst);
        if code == GOOD_CODE {
            Ok(credential(60, Some("refresh-1")))
        } else {
            Err(AuthProviderError::InvalidCode("invalid_grant".to_string()))
        }
    }

    async fn refresh(&self, previous: &Credential) -> Result<Credential, AuthProviderError> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        if self.reject_refresh {
            return Err(AuthProviderError::RefreshRejected("invalid_grant".to_string()));
        }
        Ok(Credential {
            refresh_token: previous.refresh_token.clone(),
            ..credential(60, None)
        })
    }
}

/// Three-message inbox; records every reply instead of sending it.
/// `send_delay` holds each send open before it is recorded.
#[derive(Default)]
pub struct FakeGmail {
    pub sent: Mutex<Vec<(String, String)>>,
    pub list_calls: AtomicUsize,
    pub send_delay: StdDuration,
}

impl FakeGmail {
    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().expect("lock sent replies").clone()
    }

    fn inbox() -> Vec<EmailSummary> {
        (1..=3)
            .map(|n| EmailSummary {
                id: format!("msg-{n}"),
                thread_id: format!("thread-{n}"),
                from: format!("Sender {n} <sender{n}@example.com>"),
                subject: format!("Subject {n}"),
                date: Utc.with_ymd_and_hms(2026, 10, n, 9, 0, 0).single(),
                snippet: format!("Snippet {n}"),
                labels: vec!["INBOX".to_string(), "UNREAD".to_string()],
                unread: true,
            })
            .collect()
    }
}

#[async_trait]
impl GmailApi for FakeGmail {
    async fn list_messages(
        &self,
        _access_token: &str,
        _query: &str,
        max_results: usize,
    ) -> Result<Vec<EmailSummary>, GmailApiError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        Ok(Self::inbox().into_iter().take(max_results).collect())
    }

    async fn get_message(
        &self,
        _access_token: &str,
        message_id: &str,
    ) -> Result<EmailContent, GmailApiError> {
        let summary = Self::inbox()
            .into_iter()
            .find(|email| email.id == message_id)
            .ok_or_else(|| GmailApiError::NotFound(message_id.to_string()))?;
        Ok(EmailContent {
            id: summary.id,
            thread_id: summary.thread_id,
            from_address: summary
                .from
                .split('<')
                .nth(1)
                .unwrap_or_default()
                .trim_end_matches('>')
                .to_string(),
            from: summary.from,
            to: vec!["owner@example.com".to_string()],
            subject: summary.subject,
            date: summary.date,
            body: "Can we meet on Thursday?".to_string(),
            labels: summary.labels,
            unread: true,
            rfc822_message_id: Some(format!("<{message_id}@mail.example.com>")),
        })
    }

    async fn send_reply(
        &self,
        _access_token: &str,
        message_id: &str,
        body: &str,
    ) -> Result<SentReply, GmailApiError> {
        if !self.send_delay.is_zero() {
            tokio::time::sleep(self.send_delay).await;
        }
        self.sent
            .lock()
            .expect("lock sent replies")
            .push((message_id.to_string(), body.to_string()));
        Ok(SentReply {
            id: format!("sent-{message_id}"),
            thread_id: message_id.replace("msg", "thread"),
            to: "sender@example.com".to_string(),
            subject: "Re: Subject".to_string(),
        })
    }
}

/// Replays queued chat replies; once the queue drains it answers with
/// `fallback`. `generate` always returns `draft_text`.
pub struct ScriptedLlm {
    replies: Mutex<VecDeque<LlmReply>>,
    fallback: LlmReply,
    draft_text: String,
    pub chat_calls: AtomicUsize,
    pub generate_calls: AtomicUsize,
    pub seen_history: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedLlm {
    pub fn new(replies: Vec<LlmReply>) -> Self {
        Self::with_fallback(replies, answer("Done."))
    }

    pub fn with_fallback(replies: Vec<LlmReply>, fallback: LlmReply) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            fallback,
            draft_text: "Thursday works for me.\n\nBest regards,\nModel".to_string(),
            chat_calls: AtomicUsize::new(0),
            generate_calls: AtomicUsize::new(0),
            seen_history: Mutex::new(Vec::new()),
        }
    }

    pub fn chat_calls(&self) -> usize {
        self.chat_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn chat(
        &self,
        _system: &str,
        history: &[Message],
        _tools: &[ToolSpec],
    ) -> Result<LlmReply, LlmError> {
        self.chat_calls.fetch_add(1, Ordering::SeqCst);
        self.seen_history
            .lock()
            .expect("lock seen history")
            .push(history.to_vec());
        let next = self.replies.lock().expect("lock replies").pop_front();
        Ok(next.unwrap_or_else(|| self.fallback.clone()))
    }

    async fn generate(&self, _prompt: &str, _temperature: f32) -> Result<String, LlmError> {
        self.generate_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.draft_text.clone())
    }

    fn model(&self) -> &str {
        "scripted"
    }
}

pub fn answer(text: &str) -> LlmReply {
    LlmReply {
        content: text.to_string(),
        tool_calls: Vec::new(),
    }
}

pub fn tool_call(name: &str, arguments: Value) -> LlmReply {
    LlmReply {
        content: String::new(),
        tool_calls: vec![ProposedToolCall {
            id: None,
            name: name.to_string(),
            arguments,
        }],
    }
}

/// One assistant turn proposing several calls, run in order.
pub fn tool_calls(calls: &[(&str, Value)]) -> LlmReply {
    LlmReply {
        content: String::new(),
        tool_calls: calls
            .iter()
            .map(|(name, arguments)| ProposedToolCall {
                id: None,
                name: name.to_string(),
                arguments: arguments.clone(),
            })
            .collect(),
    }
}

pub fn list_call() -> LlmReply {
    tool_call("list_emails", json!({"query": "is:unread", "max_results": 5}))
}

pub struct Harness {
    pub service: AgentService,
    pub provider: Arc<FakeAuthProvider>,
    pub store: Arc<MemoryTokenStore>,
    pub gmail: Arc<FakeGmail>,
    pub llm: Arc<ScriptedLlm>,
}

pub fn harness(stored: Option<Credential>, llm: ScriptedLlm) -> Harness {
    harness_with(stored, llm, FakeAuthProvider::default())
}

pub fn harness_with(
    stored: Option<Credential>,
    llm: ScriptedLlm,
    provider: FakeAuthProvider,
) -> Harness {
    harness_full(stored, llm, provider, FakeGmail::default())
}

pub fn harness_full(
    stored: Option<Credential>,
    llm: ScriptedLlm,
    provider: FakeAuthProvider,
    gmail: FakeGmail,
) -> Harness {
    let provider = Arc::new(provider);
    let store = Arc::new(MemoryTokenStore::new(stored));
    let gmail = Arc::new(gmail);
    let llm = Arc::new(llm);
    let service = AgentService::from_parts(
        provider.clone(),
        store.clone() as Arc<dyn TokenStore>,
        gmail.clone(),
        llm.clone(),
        AgentConfig::default(),
        DraftConfig::default(),
    )
    .expect("build agent service");

    Harness {
        service,
        provider,
        store,
        gmail,
        llm,
    }
}
