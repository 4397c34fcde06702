//! OAuth lifecycle for Gmail access.
//!
//! [`OAuthLifecycle`] owns the single process-wide [`Credential`] and the
//! [`AuthState`] machine:
//!
//! ```text
//! Unauthenticated --begin_auth--> PendingCode --complete_auth(ok)--> Authorized
//! PendingCode --complete_auth(err)--> PendingCode
//! Authorized --expired, refresh ok--> Authorized
//! Authorized --refresh rejected / revoke--> Unauthenticated
//! ```
//!
//! State and credential live behind one async mutex, so the
//! read-check-refresh-write sequence in [`OAuthLifecycle::ensure_valid`] is
//! atomic across concurrent Gmail calls.

use std::fmt::{Display, Formatter};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{AgentError, AgentResult};

pub mod crypto;
pub mod google;
pub mod store;

pub use google::GoogleOAuthClient;
pub use store::{MemoryTokenStore, SqliteTokenStore, TokenStore};

/// Access tokens this close to expiry are treated as expired.
const EXPIRY_SKEW_SECONDS: i64 = 60;

#[derive(Clone, Serialize, Deserialize, PartialEq)]
pub struct Credential {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub account: Option<String>,
}

impl Credential {
    pub fn is_usable(&self) -> bool {
        self.expires_at > Utc::now() + Duration::seconds(EXPIRY_SKEW_SECONDS)
    }

    pub fn has_refresh_token(&self) -> bool {
        self.refresh_token
            .as_deref()
            .is_some_and(|token| !token.trim().is_empty())
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &"<redacted>")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "<redacted>"),
            )
            .field("expires_at", &self.expires_at)
            .field("scopes", &self.scopes)
            .field("account", &self.account)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthState {
    Unauthenticated,
    PendingCode,
    Authorized,
    Expired,
}

impl Display for AuthState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unauthenticated => write!(f, "unauthenticated"),
            Self::PendingCode => write!(f, "pending_code"),
            Self::Authorized => write!(f, "authorized"),
            Self::Expired => write!(f, "expired"),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AuthStatus {
    pub state: AuthState,
    pub expires_at: Option<DateTime<Utc>>,
    pub account: Option<String>,
    pub has_refresh_token: bool,
    pub scopes: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuthorizationRequest {
    pub url: String,
    pub state: String,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthProviderError {
    #[error("authorization code rejected: {0}")]
    InvalidCode(String),

    #[error("refresh rejected: {0}")]
    RefreshRejected(String),

    #[error("oauth transport failure: {0}")]
    Transport(String),
}

/// Gmail authorization capability (Google's OAuth endpoints in production).
#[async_trait]
pub trait GmailAuthProvider: Send + Sync {
    fn authorization_url(&self, state: &str) -> Result<String, AuthProviderError>;

    async fn exchange_code(&self, code: &str) -> Result<Credential, AuthProviderError>;

    async fn refresh(&self, credential: &Credential) -> Result<Credential, AuthProviderError>;

    async fn revoke(&self, _credential: &Credential) -> Result<(), AuthProviderError> {
        Ok(())
    }
}

struct LifecycleInner {
    state: AuthState,
    credential: Option<Credential>,
    pending_state: Option<String>,
}

impl LifecycleInner {
    fn effective_state(&self) -> AuthState {
        match (&self.state, &self.credential) {
            (AuthState::Authorized, Some(credential)) if !credential.is_usable() => {
                AuthState::Expired
            }
            (state, _) => *state,
        }
    }

    /// Moves to `state` unless an authorization flow is in progress.
    fn settle(&mut self, state: AuthState) {
        if self.state != AuthState::PendingCode {
            self.state = state;
        }
    }
}

pub struct OAuthLifecycle {
    provider: Arc<dyn GmailAuthProvider>,
    store: Arc<dyn TokenStore>,
    inner: Mutex<LifecycleInner>,
}

impl OAuthLifecycle {
    /// Build the lifecycle from whatever credential the store holds.
    pub fn load(
        provider: Arc<dyn GmailAuthProvider>,
        store: Arc<dyn TokenStore>,
    ) -> AgentResult<Self> {
        let credential = store.load()?;
        let state = match &credential {
            Some(credential) if credential.is_usable() => AuthState::Authorized,
            Some(_) => AuthState::Expired,
            None => AuthState::Unauthenticated,
        };
        info!("gmail oauth lifecycle loaded in state {state}");

        Ok(Self {
            provider,
            store,
            inner: Mutex::new(LifecycleInner {
                state,
                credential,
                pending_state: None,
            }),
        })
    }

    pub async fn begin_auth(&self, force: bool) -> AgentResult<AuthorizationRequest> {
        let mut inner = self.inner.lock().await;
        if inner.effective_state() == AuthState::Authorized && !force {
            return Err(AgentError::AlreadyAuthorized);
        }

        let state = Uuid::new_v4().simple().to_string();
        let url = self
            .provider
            .authorization_url(&state)
            .map_err(|error| AgentError::GmailUnavailable(error.to_string()))?;

        inner.state = AuthState::PendingCode;
        inner.pending_state = Some(state.clone());
        info!("gmail oauth flow started");
        Ok(AuthorizationRequest { url, state })
    }

    /// Exchange an authorization code. `returned_state`, when the redirect
    /// carried one, must match the value issued by [`Self::begin_auth`].
    pub async fn complete_auth(
        &self,
        code: &str,
        returned_state: Option<&str>,
    ) -> AgentResult<AuthStatus> {
        let mut inner = self.inner.lock().await;
        if inner.state != AuthState::PendingCode {
            return Err(AgentError::InvalidState {
                expected: AuthState::PendingCode,
                actual: inner.effective_state(),
            });
        }

        if let (Some(returned), Some(expected)) = (returned_state, inner.pending_state.as_deref())
        {
            if returned != expected {
                return Err(AgentError::InvalidCode(
                    "state parameter does not match the pending authorization".to_string(),
                ));
            }
        }

        let code = code.trim();
        if code.is_empty() {
            return Err(AgentError::InvalidCode(
                "authorization code is empty".to_string(),
            ));
        }

        let credential = match self.provider.exchange_code(code).await {
            Ok(credential) => credential,
            Err(AuthProviderError::Transport(message)) => {
                return Err(AgentError::GmailUnavailable(message))
            }
            Err(error) => {
                warn!("gmail authorization code exchange rejected");
                return Err(AgentError::InvalidCode(error.to_string()));
            }
        };

        self.store.save(&credential)?;
        inner.credential = Some(credential);
        inner.state = AuthState::Authorized;
        inner.pending_state = None;
        info!("gmail oauth flow completed");
        Ok(status_of(&inner))
    }

    /// Return a usable credential, refreshing it when expired. Called before
    /// every Gmail operation.
    pub async fn ensure_valid(&self) -> AgentResult<Credential> {
        let mut inner = self.inner.lock().await;
        let Some(credential) = inner.credential.clone() else {
            inner.settle(AuthState::Unauthenticated);
            return Err(AgentError::NotAuthenticated);
        };

        if credential.is_usable() {
            inner.settle(AuthState::Authorized);
            return Ok(credential);
        }

        self.refresh_locked(&mut inner, credential).await
    }

    /// Refresh the stored credential regardless of its expiry.
    pub async fn refresh(&self) -> AgentResult<AuthStatus> {
        let mut inner = self.inner.lock().await;
        let Some(credential) = inner.credential.clone() else {
            return Err(AgentError::NotAuthenticated);
        };

        self.refresh_locked(&mut inner, credential).await?;
        Ok(status_of(&inner))
    }

    pub async fn revoke(&self) -> AgentResult<()> {
        let mut inner = self.inner.lock().await;
        if let Some(credential) = inner.credential.take() {
            if let Err(error) = self.provider.revoke(&credential).await {
                warn!("remote gmail token revocation failed: {error}");
            }
        }

        inner.state = AuthState::Unauthenticated;
        inner.pending_state = None;
        self.store.delete()?;
        info!("gmail credential revoked");
        Ok(())
    }

    pub async fn status(&self) -> AuthStatus {
        let inner = self.inner.lock().await;
        status_of(&inner)
    }

    /// Mark the cached access token stale after Gmail refused it. The next
    /// [`Self::ensure_valid`] goes through a refresh.
    pub async fn invalidate_access_token(&self) {
        let mut inner = self.inner.lock().await;
        let Some(credential) = inner.credential.as_mut() else {
            return;
        };
        credential.expires_at = Utc::now() - Duration::seconds(1);
        inner.settle(AuthState::Expired);
        warn!("gmail refused the cached access token; it will be refreshed on next use");
    }

    async fn refresh_locked(
        &self,
        inner: &mut LifecycleInner,
        credential: Credential,
    ) -> AgentResult<Credential> {
        if !credential.has_refresh_token() {
            self.discard_locked(inner)?;
            return Err(AgentError::ReauthRequired(
                "access token expired and no refresh token is stored".to_string(),
            ));
        }

        match self.provider.refresh(&credential).await {
            Ok(mut fresh) => {
                if !fresh.has_refresh_token() {
                    fresh.refresh_token = credential.refresh_token.clone();
                }
                if fresh.scopes.is_empty() {
                    fresh.scopes = credential.scopes.clone();
                }
                if fresh.account.is_none() {
                    fresh.account = credential.account.clone();
                }

                self.store.save(&fresh)?;
                inner.credential = Some(fresh.clone());
                inner.settle(AuthState::Authorized);
                info!("gmail access token refreshed");
                Ok(fresh)
            }
            Err(AuthProviderError::Transport(message)) => {
                inner.settle(AuthState::Expired);
                Err(AgentError::GmailUnavailable(message))
            }
            Err(error) => {
                warn!("gmail refresh token rejected; discarding credential");
                self.discard_locked(inner)?;
                Err(AgentError::ReauthRequired(error.to_string()))
            }
        }
    }

    fn discard_locked(&self, inner: &mut LifecycleInner) -> AgentResult<()> {
        inner.credential = None;
        inner.settle(AuthState::Unauthenticated);
        self.store.delete()?;
        Ok(())
    }
}

fn status_of(inner: &LifecycleInner) -> AuthStatus {
    let credential = inner.credential.as_ref();
    AuthStatus {
        state: inner.effective_state(),
        expires_at: credential.map(|credential| credential.expires_at),
        account: credential.and_then(|credential| credential.account.clone()),
        has_refresh_token: credential.is_some_and(Credential::has_refresh_token),
        scopes: credential
            .map(|credential| credential.scopes.clone())
            .unwrap_or_default(),
    }
}
