use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;

use crate::draft::Tone;

pub const DEFAULT_REDIRECT_URI: &str = "urn:ietf:wg:oauth:2.0:oob";
pub const DEFAULT_OLLAMA_BASE_URL: &str = "https://api.ollama.com";
pub const DEFAULT_OLLAMA_MODEL: &str = "llama3.2";
pub const DEFAULT_MAX_TOOL_ITERATIONS: usize = 6;

const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;
const DEFAULT_LLM_TIMEOUT_SECS: u64 = 120;
const DEFAULT_SESSION_IDLE_SECS: u64 = 3600;
const DATA_DIR_NAME: &str = ".gmail-agent";

pub const GMAIL_SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/gmail.readonly",
    "https://www.googleapis.com/auth/gmail.send",
    "https://www.googleapis.com/auth/gmail.modify",
];

#[derive(Debug, Clone)]
pub struct Config {
    pub oauth: OAuthConfig,
    pub llm: LlmConfig,
    pub agent: AgentConfig,
    pub draft: DraftConfig,
    pub data_dir: PathBuf,
    pub http_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct OAuthConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub max_tool_iterations: usize,
    /// Trailing messages submitted to the model per round-trip. `None` sends
    /// the whole session history.
    pub context_window: Option<usize>,
    pub session_idle_timeout: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_tool_iterations: DEFAULT_MAX_TOOL_ITERATIONS,
            context_window: None,
            session_idle_timeout: Duration::from_secs(DEFAULT_SESSION_IDLE_SECS),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DraftConfig {
    pub signature: Option<String>,
    pub default_tone: Tone,
}

impl Config {
    /// Resolve configuration from the process environment, after loading an
    /// optional `.env` from the working directory.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();

        let data_dir = match env_string("GMAIL_AGENT_DATA_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => default_data_dir()?,
        };

        let credentials_file = env_string("CREDENTIALS_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("credentials.json"));
        let oauth = OAuthConfig::resolve(&credentials_file)?;

        let llm = LlmConfig {
            base_url: env_string("OLLAMA_BASE_URL")
                .unwrap_or_else(|| DEFAULT_OLLAMA_BASE_URL.to_string()),
            api_key: env_string("OLLAMA_API_KEY"),
            model: env_string("OLLAMA_MODEL").unwrap_or_else(|| DEFAULT_OLLAMA_MODEL.to_string()),
            timeout: Duration::from_secs(
                env_u64("GMAIL_AGENT_LLM_TIMEOUT_SECS")?.unwrap_or(DEFAULT_LLM_TIMEOUT_SECS),
            ),
        };

        let max_tool_iterations = env_u64("GMAIL_AGENT_MAX_TOOL_ITERATIONS")?
            .map(|value| value as usize)
            .unwrap_or(DEFAULT_MAX_TOOL_ITERATIONS);
        if max_tool_iterations == 0 {
            return Err(anyhow!("GMAIL_AGENT_MAX_TOOL_ITERATIONS must be greater than zero"));
        }

        let agent = AgentConfig {
            max_tool_iterations,
            context_window: env_u64("GMAIL_AGENT_CONTEXT_WINDOW")?
                .map(|value| value as usize)
                .filter(|value| *value > 0),
            session_idle_timeout: Duration::from_secs(
                env_u64("GMAIL_AGENT_SESSION_IDLE_SECS")?.unwrap_or(DEFAULT_SESSION_IDLE_SECS),
            ),
        };

        let draft = DraftConfig {
            signature: env_string("GMAIL_AGENT_SIGNATURE").map(|value| value.replace("\\n", "\n")),
            default_tone: env_string("GMAIL_AGENT_DEFAULT_TONE")
                .map(|value| value.parse::<Tone>().map_err(anyhow::Error::msg))
                .transpose()?
                .unwrap_or_default(),
        };

        Ok(Self {
            oauth,
            llm,
            agent,
            draft,
            data_dir,
            http_timeout: Duration::from_secs(
                env_u64("GMAIL_AGENT_HTTP_TIMEOUT_SECS")?.unwrap_or(DEFAULT_HTTP_TIMEOUT_SECS),
            ),
        })
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("agent.db")
    }

    pub fn token_key_path(&self) -> PathBuf {
        self.data_dir.join("token.key")
    }
}

impl OAuthConfig {
    fn resolve(credentials_file: &Path) -> Result<Self> {
        let from_file = if credentials_file.exists() {
            Some(load_client_secrets(credentials_file)?)
        } else {
            None
        };

        let client_id = env_string("GMAIL_CLIENT_ID")
            .or_else(|| from_file.as_ref().map(|secrets| secrets.client_id.clone()))
            .ok_or_else(|| {
                anyhow!(
                    "missing gmail client id (GMAIL_CLIENT_ID or {})",
                    credentials_file.display()
                )
            })?;

        let client_secret = env_string("GMAIL_CLIENT_SECRET")
            .or_else(|| from_file.as_ref().map(|secrets| secrets.client_secret.clone()))
            .ok_or_else(|| {
                anyhow!(
                    "missing gmail client secret (GMAIL_CLIENT_SECRET or {})",
                    credentials_file.display()
                )
            })?;

        let redirect_uri = env_string("GMAIL_REDIRECT_URI")
            .unwrap_or_else(|| DEFAULT_REDIRECT_URI.to_string());

        Ok(Self {
            client_id,
            client_secret,
            redirect_uri,
            scopes: GMAIL_SCOPES.iter().map(|scope| scope.to_string()).collect(),
        })
    }
}

/// Google's downloaded client secrets file. Desktop clients are stored under
/// `installed`, web clients under `web`.
#[derive(Debug, Deserialize)]
struct ClientSecretsFile {
    installed: Option<ClientSecrets>,
    web: Option<ClientSecrets>,
}

#[derive(Debug, Clone, Deserialize)]
struct ClientSecrets {
    client_id: String,
    client_secret: String,
}

fn load_client_secrets(path: &Path) -> Result<ClientSecrets> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("read client secrets {}", path.display()))?;
    parse_client_secrets(&raw).with_context(|| format!("parse client secrets {}", path.display()))
}

fn parse_client_secrets(raw: &str) -> Result<ClientSecrets> {
    let file: ClientSecretsFile = serde_json::from_str(raw)?;
    file.installed
        .or(file.web)
        .ok_or_else(|| anyhow!("client secrets must contain an 'installed' or 'web' section"))
}

fn default_data_dir() -> Result<PathBuf> {
    let home = dirs::home_dir().ok_or_else(|| anyhow!("failed to determine home directory"))?;
    Ok(home.join(DATA_DIR_NAME))
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_u64(key: &str) -> Result<Option<u64>> {
    env_string(key)
        .map(|value| {
            value
                .parse::<u64>()
                .with_context(|| format!("{key} must be a non-negative integer, got '{value}'"))
        })
        .transpose()
}
