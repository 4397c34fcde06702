//! Language model capability.

use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::agent::session::Message;

pub mod ollama;

pub use ollama::OllamaClient;

/// A tool the model may call, described by a JSON schema for its arguments.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub parameters: Value,
}

/// A tool invocation proposed by the model. Some providers omit the id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposedToolCall {
    pub id: Option<String>,
    pub name: String,
    pub arguments: Value,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LlmReply {
    pub content: String,
    pub tool_calls: Vec<ProposedToolCall>,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LlmError {
    #[error("llm request failed: {0}")]
    Transport(String),

    #[error("llm returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("llm response could not be decoded: {0}")]
    Decode(String),
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    /// One chat round-trip with the tool schema attached.
    async fn chat(
        &self,
        system: &str,
        history: &[Message],
        tools: &[ToolSpec],
    ) -> Result<LlmReply, LlmError>;

    /// Single-prompt text generation at the given sampling temperature.
    async fn generate(&self, prompt: &str, temperature: f32) -> Result<String, LlmError>;

    fn model(&self) -> &str;
}

/// Removes `<think>…</think>` reasoning blocks some models prepend.
pub fn strip_think_blocks(content: &str) -> String {
    static THINK: OnceLock<Option<Regex>> = OnceLock::new();
    let pattern = THINK.get_or_init(|| Regex::new(r"(?s)<think>.*?</think>").ok());

    match pattern {
        Some(pattern) if content.contains("<think>") => {
            pattern.replace_all(content, "").trim().to_string()
        }
        _ => content.trim().to_string(),
    }
}
