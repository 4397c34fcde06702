use async_trait::async_trait;
use chrono::{Duration, Utc};
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use tracing::warn;

use super::{AuthProviderError, Credential, GmailAuthProvider};
use crate::config::OAuthConfig;
use crate::gmail::client::GMAIL_API_BASE;
use crate::http::{describe_transport_error, redact_response_body};

const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const GOOGLE_REVOKE_URL: &str = "https://oauth2.googleapis.com/revoke";

/// Google's OAuth 2.0 endpoints for an installed (desktop) client.
#[derive(Debug, Clone)]
pub struct GoogleOAuthClient {
    client: Client,
    config: OAuthConfig,
    token_url: String,
}

#[derive(Debug, Clone, Deserialize)]
struct OAuthTokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: u64,
    scope: Option<String>,
    #[allow(dead_code)]
    token_type: Option<String>,
}

impl OAuthTokenResponse {
    fn into_credential(self) -> Credential {
        Credential {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at: Utc::now() + Duration::seconds(self.expires_in as i64),
            scopes: self
                .scope
                .map(|scope| scope.split_whitespace().map(str::to_string).collect())
                .unwrap_or_default(),
            account: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct GmailProfile {
    #[serde(rename = "emailAddress")]
    email_address: String,
}

impl GoogleOAuthClient {
    pub fn new(client: Client, config: OAuthConfig) -> Self {
        let token_url = std::env::var("GMAIL_AGENT_TOKEN_URL")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| GOOGLE_TOKEN_URL.to_string());

        Self {
            client,
            config,
            token_url,
        }
    }

    async fn post_token_form(
        &self,
        form: &[(&str, &str)],
    ) -> Result<(StatusCode, String), AuthProviderError> {
        let response = self
            .client
            .post(&self.token_url)
            .form(form)
            .send()
            .await
            .map_err(|error| AuthProviderError::Transport(describe_transport_error(&error)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|error| AuthProviderError::Transport(describe_transport_error(&error)))?;
        Ok((status, body))
    }

    /// Best-effort lookup of the authorized mailbox address.
    async fn fetch_account(&self, access_token: &str) -> Option<String> {
        let response = self
            .client
            .get(format!("{GMAIL_API_BASE}/users/me/profile"))
            .bearer_auth(access_token)
            .send()
            .await
            .ok()?;
        if !response.status().is_success() {
            return None;
        }
        response
            .json::<GmailProfile>()
            .await
            .ok()
            .map(|profile| profile.email_address)
    }
}

fn decode_token_response(body: &str) -> Result<Credential, AuthProviderError> {
    serde_json::from_str::<OAuthTokenResponse>(body)
        .map(OAuthTokenResponse::into_credential)
        .map_err(|error| AuthProviderError::Transport(format!("decode token response: {error}")))
}

#[async_trait]
impl GmailAuthProvider for GoogleOAuthClient {
    fn authorization_url(&self, state: &str) -> Result<String, AuthProviderError> {
        let scope = self.config.scopes.join(" ");
        Url::parse_with_params(
            GOOGLE_AUTH_URL,
            &[
                ("client_id", self.config.client_id.as_str()),
                ("redirect_uri", self.config.redirect_uri.as_str()),
                ("response_type", "code"),
                ("scope", scope.as_str()),
                ("access_type", "offline"),
                ("include_granted_scopes", "true"),
                ("prompt", "consent"),
                ("state", state),
            ],
        )
        .map(String::from)
        .map_err(|error| AuthProviderError::Transport(format!("build authorization url: {error}")))
    }

    async fn exchange_code(&self, code: &str) -> Result<Credential, AuthProviderError> {
        let (status, body) = self
            .post_token_form(&[
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
                ("code", code),
                ("grant_type", "authorization_code"),
                ("redirect_uri", self.config.redirect_uri.as_str()),
            ])
            .await?;

        if status.is_client_error() {
            return Err(AuthProviderError::InvalidCode(format!(
                "status={status} body={}",
                redact_response_body(&body)
            )));
        }
        if !status.is_success() {
            return Err(AuthProviderError::Transport(format!(
                "token endpoint failed: status={status} body={}",
                redact_response_body(&body)
            )));
        }

        let mut credential = decode_token_response(&body)?;
        credential.account = self.fetch_account(&credential.access_token).await;
        Ok(credential)
    }

    async fn refresh(&self, credential: &Credential) -> Result<Credential, AuthProviderError> {
        let refresh_token = credential.refresh_token.as_deref().ok_or_else(|| {
            AuthProviderError::RefreshRejected("no refresh token available".to_string())
        })?;

        let (status, body) = self
            .post_token_form(&[
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
                ("refresh_token", refresh_token),
                ("grant_type", "refresh_token"),
            ])
            .await?;

        if status.is_client_error() {
            return Err(AuthProviderError::RefreshRejected(format!(
                "status={status} body={}",
                redact_response_body(&body)
            )));
        }
        if !status.is_success() {
            return Err(AuthProviderError::Transport(format!(
                "token endpoint failed: status={status} body={}",
                redact_response_body(&body)
            )));
        }

        decode_token_response(&body)
    }

    async fn revoke(&self, credential: &Credential) -> Result<(), AuthProviderError> {
        let token = credential
            .refresh_token
            .as_deref()
            .unwrap_or(credential.access_token.as_str());

        let response = self
            .client
            .post(GOOGLE_REVOKE_URL)
            .form(&[("token", token)])
            .send()
            .await
            .map_err(|error| AuthProviderError::Transport(describe_transport_error(&error)))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        warn!("google token revocation returned status {status}");
        Err(AuthProviderError::Transport(format!(
            "revoke failed: status={status} body={}",
            redact_response_body(&body)
        )))
    }
}
