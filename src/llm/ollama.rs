use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::{strip_think_blocks, LlmClient, LlmError, LlmReply, ProposedToolCall, ToolSpec};
use crate::agent::session::{Message, Role};
use crate::config::LlmConfig;
use crate::http::{describe_transport_error, redact_response_body};

/// Ollama `/api/chat` client. Works against a local server or Ollama Cloud
/// (bearer key).
#[derive(Debug, Clone)]
pub struct OllamaClient {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
}

#[derive(Debug, Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: Vec<OllamaMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<OllamaTool<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<OllamaOptions>,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct OllamaMessage {
    role: String,
    content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<OllamaToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_name: Option<String>,
}

#[derive(Debug, Serialize)]
struct OllamaTool<'a> {
    #[serde(rename = "type")]
    tool_type: &'static str,
    function: &'a ToolSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct OllamaToolCall {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    function: OllamaFunctionCall,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct OllamaFunctionCall {
    name: String,
    #[serde(default)]
    arguments: Value,
}

#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    #[serde(default)]
    message: Option<OllamaResponseMessage>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OllamaResponseMessage {
    #[serde(default)]
    content: String,
    #[serde(default)]
    tool_calls: Option<Vec<OllamaToolCall>>,
}

impl OllamaClient {
    pub fn new(client: Client, config: &LlmConfig) -> Self {
        Self {
            client,
            endpoint: format!("{}/api/chat", config.base_url.trim_end_matches('/')),
            api_key: config.api_key.clone().filter(|key| !key.trim().is_empty()),
            model: config.model.clone(),
        }
    }

    async fn send(&self, request: &OllamaChatRequest<'_>) -> Result<LlmReply, LlmError> {
        let mut builder = self.client.post(&self.endpoint).json(request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .map_err(|error| LlmError::Transport(describe_transport_error(&error)))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|error| LlmError::Transport(describe_transport_error(&error)))?;
        debug!(
            "ollama {} responded {status} ({} bytes)",
            self.model,
            body.len()
        );

        if !status.is_success() {
            return Err(LlmError::Status {
                status: status.as_u16(),
                body: redact_response_body(&body),
            });
        }
        parse_chat_body(&body)
    }
}

/// Accepts a single JSON object or newline-delimited stream chunks, whose
/// content pieces are concatenated.
fn parse_chat_body(body: &str) -> Result<LlmReply, LlmError> {
    let mut reply = LlmReply::default();
    let mut chunks = 0usize;

    for line in body.lines().map(str::trim).filter(|line| !line.is_empty()) {
        let chunk: OllamaChatResponse =
            serde_json::from_str(line).map_err(|error| LlmError::Decode(error.to_string()))?;
        if let Some(error) = chunk.error {
            return Err(LlmError::Transport(error));
        }
        if let Some(message) = chunk.message {
            reply.content.push_str(&message.content);
            reply.tool_calls.extend(
                message
                    .tool_calls
                    .unwrap_or_default()
                    .into_iter()
                    .map(|call| ProposedToolCall {
                        id: call.id,
                        name: call.function.name,
                        arguments: call.function.arguments,
                    }),
            );
        }
        chunks += 1;
    }

    if chunks == 0 {
        return Err(LlmError::Decode("empty response body".to_string()));
    }
    reply.content = strip_think_blocks(&reply.content);
    Ok(reply)
}

fn to_ollama_message(message: &Message) -> OllamaMessage {
    match message.role {
        Role::User => OllamaMessage {
            role: "user".to_string(),
            content: message.content.clone(),
            tool_calls: None,
            tool_name: None,
        },
        Role::Assistant => OllamaMessage {
            role: "assistant".to_string(),
            content: message.content.clone(),
            tool_calls: message.tool_call.as_ref().map(|call| {
                vec![OllamaToolCall {
                    id: Some(call.id.clone()),
                    function: OllamaFunctionCall {
                        name: call.name.clone(),
                        arguments: call.arguments.clone(),
                    },
                }]
            }),
            tool_name: None,
        },
        Role::Tool => OllamaMessage {
            role: "tool".to_string(),
            content: message.content.clone(),
            tool_calls: None,
            tool_name: message.tool_result.as_ref().map(|result| result.name.clone()),
        },
    }
}

#[async_trait]
impl LlmClient for OllamaClient {
    async fn chat(
        &self,
        system: &str,
        history: &[Message],
        tools: &[ToolSpec],
    ) -> Result<LlmReply, LlmError> {
        let mut messages = Vec::with_capacity(history.len() + 1);
        messages.push(OllamaMessage {
            role: "system".to_string(),
            content: system.to_string(),
            tool_calls: None,
            tool_name: None,
        });
        messages.extend(history.iter().map(to_ollama_message));

        let request = OllamaChatRequest {
            model: &self.model,
            messages,
            stream: false,
            tools: tools
                .iter()
                .map(|spec| OllamaTool {
                    tool_type: "function",
                    function: spec,
                })
                .collect(),
            options: None,
        };
        self.send(&request).await
    }

    async fn generate(&self, prompt: &str, temperature: f32) -> Result<String, LlmError> {
        let request = OllamaChatRequest {
            model: &self.model,
            messages: vec![OllamaMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
                tool_calls: None,
                tool_name: None,
            }],
            stream: false,
            tools: Vec::new(),
            options: Some(OllamaOptions { temperature }),
        };
        Ok(self.send(&request).await?.content)
    }

    fn model(&self) -> &str {
        &self.model
    }
}
