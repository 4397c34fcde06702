//! Conversation orchestration: per-session history and the tool-calling loop.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use serde_json::{json, Value};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::AgentConfig;
use crate::draft::DraftPipeline;
use crate::error::{AgentError, AgentResult};
use crate::gmail::{EmailSummary, GmailToolset};
use crate::llm::{LlmClient, ProposedToolCall, ToolSpec};

pub mod session;
pub mod tools;

use session::{ConversationSession, Message, SessionSnapshot, ToolCallRequest, ToolResult};
use tools::{AgentTool, EmailRef};

const SNIPPET_CHARS: usize = 120;

pub const SYSTEM_PROMPT: &str = "You are a helpful Gmail assistant. You help the user manage their inbox.

Available tools:
1. list_emails - list emails from the inbox. Use the query parameter to filter (e.g. \"is:unread\", \"from:someone@example.com\").
2. read_email - read the full content of an email by its number from the last listing. This also drafts a reply.
3. send_email_reply - send a reply to an email. ONLY use this after the user explicitly approves the draft.

Rules:
- When the user asks to see their emails, use list_emails.
- When the user wants to read an email, use read_email with the email number.
- NEVER send an email without explicit user approval; always show the draft and ask for confirmation first.
- If a tool reports that authentication is needed, tell the user to authorize Gmail access.
- Be helpful and concise.";

struct SessionSlot {
    session: Arc<Mutex<ConversationSession>>,
    touched: Instant,
}

enum LoopState {
    AwaitingModel { round: usize },
    Dispatching { round: usize, calls: Vec<ProposedToolCall> },
    Finished(Message),
}

pub struct ConversationAgent {
    llm: Arc<dyn LlmClient>,
    gmail: GmailToolset,
    drafts: Arc<DraftPipeline>,
    config: AgentConfig,
    tools: Vec<ToolSpec>,
    sessions: Mutex<HashMap<String, SessionSlot>>,
}

impl ConversationAgent {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        gmail: GmailToolset,
        drafts: Arc<DraftPipeline>,
        config: AgentConfig,
    ) -> Self {
        Self {
            llm,
            gmail,
            drafts,
            config,
            tools: tools::tool_specs(),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Runs one user turn to completion and returns the final assistant
    /// message.
    pub async fn handle_message(&self, session_id: &str, text: &str) -> AgentResult<Message> {
        let session = self.session(session_id, true).await?;
        let mut session = session.lock_owned().await;
        session.push(Message::user(text));

        let max_rounds = self.config.max_tool_iterations.max(1);
        let mut state = LoopState::AwaitingModel { round: 1 };

        loop {
            state = match state {
                LoopState::AwaitingModel { round } => {
                    let history = session.window(self.config.context_window);
                    let reply = self
                        .llm
                        .chat(SYSTEM_PROMPT, history, &self.tools)
                        .await
                        .map_err(|error| AgentError::LlmUnavailable(error.to_string()))?;
                    debug!(
                        "session {session_id} round {round}: {} tool call(s)",
                        reply.tool_calls.len()
                    );

                    if reply.tool_calls.is_empty() {
                        LoopState::Finished(Message::assistant(reply.content))
                    } else if round >= max_rounds {
                        warn!("session {session_id} hit the tool loop cap of {max_rounds}");
                        return Err(AgentError::ToolLoopExceeded { iterations: round });
                    } else {
                        LoopState::Dispatching {
                            round,
                            calls: reply.tool_calls,
                        }
                    }
                }
                LoopState::Dispatching { round, calls } => {
                    for proposed in calls {
                        let call = ToolCallRequest {
                            id: proposed
                                .id
                                .filter(|id| !id.trim().is_empty())
                                .unwrap_or_else(|| format!("call_{}", Uuid::new_v4().simple())),
                            name: proposed.name,
                            arguments: proposed.arguments,
                        };
                        session.push(Message::tool_call(call.clone()));
                        session = self.dispatch(session, call).await?;
                    }
                    LoopState::AwaitingModel { round: round + 1 }
                }
                LoopState::Finished(message) => {
                    session.push(message.clone());
                    return Ok(message);
                }
            };
        }
    }

    /// Clears history, mailbox numbering and the pending draft.
    pub async fn reset(&self, session_id: &str) -> AgentResult<()> {
        let session = self.session(session_id, false).await?;
        session.lock().await.reset();
        info!("session {session_id} reset");
        Ok(())
    }

    pub async fn history(&self, session_id: &str) -> AgentResult<SessionSnapshot> {
        let session = self.session(session_id, false).await?;
        let snapshot = session.lock().await.snapshot();
        Ok(snapshot)
    }

    pub async fn session_count(&self) -> usize {
        let mut sessions = self.sessions.lock().await;
        self.prune_idle(&mut sessions);
        sessions.len()
    }

    async fn session(
        &self,
        session_id: &str,
        create: bool,
    ) -> AgentResult<Arc<Mutex<ConversationSession>>> {
        let mut sessions = self.sessions.lock().await;
        self.prune_idle(&mut sessions);

        if let Some(slot) = sessions.get_mut(session_id) {
            slot.touched = Instant::now();
            return Ok(slot.session.clone());
        }
        if !create {
            return Err(AgentError::SessionNotFound(session_id.to_string()));
        }

        let session = Arc::new(Mutex::new(ConversationSession::new(session_id)));
        sessions.insert(
            session_id.to_string(),
            SessionSlot {
                session: session.clone(),
                touched: Instant::now(),
            },
        );
        Ok(session)
    }

    /// Drops sessions idle past the timeout. A session still referenced by a
    /// running turn is kept.
    fn prune_idle(&self, sessions: &mut HashMap<String, SessionSlot>) {
        let timeout = self.config.session_idle_timeout;
        sessions.retain(|id, slot| {
            let keep =
                slot.touched.elapsed() < timeout || Arc::strong_count(&slot.session) > 1;
            if !keep {
                debug!("dropping idle session {id}");
            }
            keep
        });
    }

    /// Runs one tool call and appends its result. A send takes the session
    /// guard into its own task, so the reply, its tool_result and the draft
    /// bookkeeping all land even if the caller stops polling this turn.
    async fn dispatch(
        &self,
        mut session: OwnedMutexGuard<ConversationSession>,
        call: ToolCallRequest,
    ) -> AgentResult<OwnedMutexGuard<ConversationSession>> {
        match AgentTool::parse(&call.name, &call.arguments) {
            Ok(AgentTool::SendEmailReply { target, reply_body }) => {
                let gmail = self.gmail.clone();
                tokio::spawn(async move {
                    let outcome = send_reply(&gmail, &mut session, &target, reply_body).await;
                    session.push(Message::tool_result(tool_result(&call, outcome)));
                    session
                })
                .await
                .map_err(|error| AgentError::SendFailed(format!("send task failed: {error}")))
            }
            parsed => {
                let outcome = match parsed {
                    Ok(tool) => self.run_tool(&mut session, tool).await,
                    Err(error) => Err(error),
                };
                session.push(Message::tool_result(tool_result(&call, outcome)));
                Ok(session)
            }
        }
    }

    async fn run_tool(
        &self,
        session: &mut ConversationSession,
        tool: AgentTool,
    ) -> AgentResult<Value> {
        match tool {
            AgentTool::ListEmails { query, max_results } => {
                let emails = self.gmail.list(&query, max_results).await?;
                session.mailbox.replace(&emails);
                Ok(json!({
                    "ok": true,
                    "query": query,
                    "count": emails.len(),
                    "emails": emails
                        .iter()
                        .enumerate()
                        .map(|(index, email)| numbered_summary(index + 1, email))
                        .collect::<Vec<_>>(),
                }))
            }
            AgentTool::ReadEmail {
                target,
                generate_draft,
                tone,
            } => {
                let message_id = resolve_target(session, &target)?;
                let email = self.gmail.read(&message_id).await?;
                let mut payload = json!({
                    "ok": true,
                    "number": session.mailbox.number_of(&email.id),
                    "email": &email,
                });

                if generate_draft {
                    let tone = tone.unwrap_or_else(|| self.drafts.default_tone());
                    match self.drafts.generate(&email, tone).await {
                        Ok(draft) => {
                            payload["draft"] = json!({
                                "body": draft.body,
                                "tone": draft.tone,
                            });
                            session.last_draft = Some(draft);
                        }
                        Err(error) => {
                            payload["draft_error"] = error.to_payload();
                        }
                    }
                }
                Ok(payload)
            }
            AgentTool::SendEmailReply { target, reply_body } => {
                send_reply(&self.gmail, session, &target, reply_body).await
            }
        }
    }
}

async fn send_reply(
    gmail: &GmailToolset,
    session: &mut ConversationSession,
    target: &EmailRef,
    reply_body: Option<String>,
) -> AgentResult<Value> {
    let message_id = resolve_target(session, target)?;
    let body = match reply_body {
        Some(body) => body,
        None => session
            .last_draft
            .as_ref()
            .filter(|draft| draft.in_reply_to == message_id)
            .map(|draft| draft.body.clone())
            .ok_or_else(|| {
                AgentError::InvalidArguments(
                    "no draft available for this email; read it first or pass reply_body"
                        .to_string(),
                )
            })?,
    };

    let sent = gmail.reply(&message_id, &body).await?;
    if session
        .last_draft
        .as_ref()
        .is_some_and(|draft| draft.in_reply_to == message_id)
    {
        session.last_draft = None;
    }
    Ok(json!({ "ok": true, "sent": sent }))
}

fn tool_result(call: &ToolCallRequest, outcome: AgentResult<Value>) -> ToolResult {
    match outcome {
        Ok(payload) => ToolResult {
            call_id: call.id.clone(),
            name: call.name.clone(),
            ok: true,
            payload,
        },
        Err(error) => {
            let error = surface_auth_error(error);
            debug!("tool {} failed: {}", call.name, error.code());
            ToolResult {
                call_id: call.id.clone(),
                name: call.name.clone(),
                ok: false,
                payload: json!({ "ok": false, "error": error.to_payload() }),
            }
        }
    }
}

fn resolve_target(session: &ConversationSession, target: &EmailRef) -> AgentResult<String> {
    match target {
        EmailRef::Id(id) => Ok(id.clone()),
        EmailRef::Number(number) => session
            .mailbox
            .resolve(*number)
            .map(|email| email.id.clone())
            .ok_or_else(|| {
                AgentError::InvalidArguments(format!(
                    "email number {number} is not in the last listing ({} emails); list emails first",
                    session.mailbox.len()
                ))
            }),
    }
}

/// Missing and unrecoverable credentials both reach the model as
/// `reauth_required`, the one auth failure it is told to act on.
fn surface_auth_error(error: AgentError) -> AgentError {
    match error {
        AgentError::NotAuthenticated => AgentError::ReauthRequired(
            "Gmail is not authorized yet; the user must complete the OAuth flow".to_string(),
        ),
        other => other,
    }
}

fn numbered_summary(number: usize, email: &EmailSummary) -> Value {
    json!({
        "number": number,
        "id": email.id,
        "from": email.from,
        "subject": email.subject,
        "date": email.date,
        "snippet": crate::gmail::client::truncate_chars(&email.snippet, SNIPPET_CHARS),
        "unread": email.unread,
    })
}
