//! Wiring of the lifecycle, mailbox, drafting and agent layers.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use crate::agent::ConversationAgent;
use crate::auth::{crypto, GmailAuthProvider, GoogleOAuthClient, OAuthLifecycle, SqliteTokenStore, TokenStore};
use crate::config::{AgentConfig, Config, DraftConfig};
use crate::draft::{Draft, DraftPipeline, Tone};
use crate::error::AgentResult;
use crate::gmail::{GmailApi, GmailRestClient, GmailToolset};
use crate::http::build_client;
use crate::llm::{LlmClient, OllamaClient};

#[derive(Clone)]
pub struct AgentService {
    pub lifecycle: Arc<OAuthLifecycle>,
    pub gmail: GmailToolset,
    pub drafts: Arc<DraftPipeline>,
    pub agent: Arc<ConversationAgent>,
}

impl AgentService {
    /// Production wiring: Google OAuth, Gmail REST and Ollama over reqwest,
    /// with the credential in the encrypted SQLite store.
    pub fn from_config(config: &Config) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir)
            .with_context(|| format!("create data dir {}", config.data_dir.display()))?;

        let key = crypto::resolve_key(&config.token_key_path())?;
        let store = SqliteTokenStore::open(&config.db_path(), key)?;

        let http = build_client(config.http_timeout)?;
        let llm_http = build_client(config.llm.timeout)?;

        let service = Self::from_parts(
            Arc::new(GoogleOAuthClient::new(http.clone(), config.oauth.clone())),
            Arc::new(store),
            Arc::new(GmailRestClient::new(http)),
            Arc::new(OllamaClient::new(llm_http, &config.llm)),
            config.agent.clone(),
            config.draft.clone(),
        )?;
        info!(
            "gmail agent ready (model {}, data dir {})",
            config.llm.model,
            config.data_dir.display()
        );
        Ok(service)
    }

    pub fn from_parts(
        provider: Arc<dyn GmailAuthProvider>,
        store: Arc<dyn TokenStore>,
        api: Arc<dyn GmailApi>,
        llm: Arc<dyn LlmClient>,
        agent_config: AgentConfig,
        draft_config: DraftConfig,
    ) -> AgentResult<Self> {
        let lifecycle = Arc::new(OAuthLifecycle::load(provider, store)?);
        let gmail = GmailToolset::new(lifecycle.clone(), api);
        let drafts = Arc::new(DraftPipeline::new(llm.clone(), draft_config));
        let agent = Arc::new(ConversationAgent::new(
            llm,
            gmail.clone(),
            drafts.clone(),
            agent_config,
        ));

        Ok(Self {
            lifecycle,
            gmail,
            drafts,
            agent,
        })
    }

    /// Reads `message_id` and drafts a reply without sending anything.
    pub async fn draft(&self, message_id: &str, tone: Option<Tone>) -> AgentResult<Draft> {
        let email = self.gmail.read(message_id).await?;
        let tone = tone.unwrap_or_else(|| self.drafts.default_tone());
        self.drafts.generate(&email, tone).await
    }
}
