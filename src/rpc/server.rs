use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::debug;
use uuid::Uuid;

use crate::agent::tools::{tool_specs, DEFAULT_LIST_MAX, DEFAULT_LIST_QUERY};
use crate::draft::Tone;
use crate::error::AgentError;
use crate::service::AgentService;

const JSONRPC_VERSION: &str = "2.0";
const DOMAIN_ERROR: i64 = -32000;

#[derive(Debug, Deserialize)]
struct JsonRpcRequest {
    jsonrpc: String,
    id: Option<Value>,
    method: String,
    #[serde(default)]
    params: Value,
}

enum RpcFailure {
    InvalidParams(String),
    MethodNotFound(String),
    Domain(AgentError),
}

impl From<AgentError> for RpcFailure {
    fn from(error: AgentError) -> Self {
        Self::Domain(error)
    }
}

type RpcResult = std::result::Result<Value, RpcFailure>;

/// Serves line-delimited JSON-RPC 2.0 on stdin/stdout until stdin closes.
pub async fn run_stdio_server(service: AgentService) -> Result<()> {
    let mut lines = BufReader::new(io::stdin()).lines();
    let mut stdout = io::stdout();

    while let Some(line) = lines.next_line().await.context("read rpc stdin line")? {
        if line.trim().is_empty() {
            continue;
        }

        if let Some(response_line) = handle_request_line(&service, &line).await {
            stdout
                .write_all(format!("{response_line}\n").as_bytes())
                .await
                .context("write rpc stdout response")?;
            stdout.flush().await.context("flush rpc stdout response")?;
        }
    }

    Ok(())
}

pub async fn handle_request_line(service: &AgentService, line: &str) -> Option<String> {
    let request: JsonRpcRequest = match serde_json::from_str(line) {
        Ok(value) => value,
        Err(error) => {
            return Some(
                jsonrpc_error(None, -32700, "Parse error", Some(json!(error.to_string())))
                    .to_string(),
            );
        }
    };

    if request.jsonrpc != JSONRPC_VERSION {
        return Some(
            jsonrpc_error(
                request.id,
                -32600,
                "Invalid Request",
                Some(json!("jsonrpc must be \"2.0\"")),
            )
            .to_string(),
        );
    }

    debug!("rpc {}", request.method);
    let id = request.id.clone();
    let response = match dispatch(service, &request.method, &request.params).await {
        Ok(result) => jsonrpc_result(id, result),
        Err(RpcFailure::InvalidParams(message)) => {
            jsonrpc_error(id, -32602, "Invalid params", Some(json!(message)))
        }
        Err(RpcFailure::MethodNotFound(method)) => jsonrpc_error(
            id,
            -32601,
            "Method not found",
            Some(json!(format!("Unknown method '{method}'"))),
        ),
        Err(RpcFailure::Domain(error)) => jsonrpc_error(
            id,
            DOMAIN_ERROR,
            &error.to_string(),
            Some(error.to_payload()),
        ),
    };

    if request.id.is_none() {
        return None;
    }
    Some(response.to_string())
}

async fn dispatch(service: &AgentService, method: &str, params: &Value) -> RpcResult {
    match method {
        "initialize" => Ok(json!({
            "serverInfo": {
                "name": env!("CARGO_PKG_NAME"),
                "version": env!("CARGO_PKG_VERSION"),
            },
            "capabilities": {
                "auth": {},
                "mail": {},
                "agent": { "tools": {} }
            }
        })),
        "tools/list" => Ok(json!({
            "tools": tool_specs()
                .into_iter()
                .map(|spec| json!({
                    "name": spec.name,
                    "description": spec.description,
                    "inputSchema": spec.parameters,
                }))
                .collect::<Vec<_>>()
        })),
        "auth/begin" => {
            let force = optional_bool(params, "force").unwrap_or(false);
            to_value(service.lifecycle.begin_auth(force).await?)
        }
        "auth/complete" => {
            let code = required_string(params, "code")?;
            let state = optional_string(params, "state");
            to_value(
                service
                    .lifecycle
                    .complete_auth(&code, state.as_deref())
                    .await?,
            )
        }
        "auth/status" => to_value(service.lifecycle.status().await),
        "auth/refresh" => to_value(service.lifecycle.refresh().await?),
        "auth/revoke" => {
            service.lifecycle.revoke().await?;
            Ok(json!({
                "revoked": true,
                "status": service.lifecycle.status().await,
            }))
        }
        "mail/list" => {
            let query =
                optional_string(params, "query").unwrap_or_else(|| DEFAULT_LIST_QUERY.to_string());
            let max_results = optional_usize(params, "max_results")?.unwrap_or(DEFAULT_LIST_MAX);
            let emails = service.gmail.list(&query, max_results).await?;
            Ok(json!({ "count": emails.len(), "emails": emails }))
        }
        "mail/read" => {
            let message_id = required_string(params, "message_id")?;
            to_value(service.gmail.read(&message_id).await?)
        }
        "mail/draft" => {
            let message_id = required_string(params, "message_id")?;
            let tone = optional_tone(params)?;
            to_value(service.draft(&message_id, tone).await?)
        }
        "mail/reply" => {
            let message_id = required_string(params, "message_id")?;
            let body = required_string(params, "body")?;
            to_value(service.gmail.reply(&message_id, &body).await?)
        }
        "agent/chat" => {
            let message = required_string(params, "message")?;
            let session_id = optional_string(params, "session_id")
                .unwrap_or_else(|| Uuid::new_v4().to_string());
            let reply = service.agent.handle_message(&session_id, &message).await?;
            Ok(json!({ "session_id": session_id, "reply": reply }))
        }
        "agent/reset" => {
            let session_id = required_string(params, "session_id")?;
            service.agent.reset(&session_id).await?;
            Ok(json!({ "session_id": session_id, "reset": true }))
        }
        "agent/history" => {
            let session_id = required_string(params, "session_id")?;
            to_value(service.agent.history(&session_id).await?)
        }
        other => Err(RpcFailure::MethodNotFound(other.to_string())),
    }
}

fn to_value<T: serde::Serialize>(value: T) -> RpcResult {
    serde_json::to_value(value)
        .map_err(|error| RpcFailure::Domain(AgentError::Storage(error.into())))
}

fn required_string(params: &Value, key: &str) -> std::result::Result<String, RpcFailure> {
    optional_string(params, key)
        .ok_or_else(|| RpcFailure::InvalidParams(format!("missing required param '{key}'")))
}

fn optional_string(params: &Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn optional_bool(params: &Value, key: &str) -> Option<bool> {
    params.get(key).and_then(Value::as_bool)
}

fn optional_usize(params: &Value, key: &str) -> std::result::Result<Option<usize>, RpcFailure> {
    let Some(raw) = params.get(key) else {
        return Ok(None);
    };

    let value = raw.as_u64().ok_or_else(|| {
        RpcFailure::InvalidParams(format!("param '{key}' must be a positive integer"))
    })?;
    if value == 0 {
        return Err(RpcFailure::InvalidParams(format!(
            "param '{key}' must be greater than zero"
        )));
    }
    Ok(Some(value as usize))
}

fn optional_tone(params: &Value) -> std::result::Result<Option<Tone>, RpcFailure> {
    optional_string(params, "tone")
        .map(|value| value.parse::<Tone>().map_err(RpcFailure::InvalidParams))
        .transpose()
}

fn jsonrpc_result(id: Option<Value>, result: Value) -> Value {
    json!({
        "jsonrpc": JSONRPC_VERSION,
        "id": id.unwrap_or(Value::Null),
        "result": result
    })
}

fn jsonrpc_error(id: Option<Value>, code: i64, message: &str, data: Option<Value>) -> Value {
    let mut error = json!({
        "code": code,
        "message": message,
    });
    if let Some(data) = data {
        error["data"] = data;
    }

    json!({
        "jsonrpc": JSONRPC_VERSION,
        "id": id.unwrap_or(Value::Null),
        "error": error
    })
}
