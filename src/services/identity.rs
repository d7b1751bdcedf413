// src/services/identity.rs
use crate::errors::StudioError;
use async_trait::async_trait;
use log::{info, warn};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::RwLock;

/// Session handed over by the identity provider after sign-in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserSession {
    pub user_id: String,
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn current_user(&self) -> Option<UserSession>;
    async fn refresh(&self) -> Result<UserSession, StudioError>;
    async fn sign_out(&self);
}

pub struct SessionIdentity {
    session: RwLock<Option<UserSession>>,
    auth_url: Option<String>,
    anon_key: Option<String>,
    client: Client,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    user: TokenUser,
}

#[derive(Deserialize)]
struct TokenUser {
    id: String,
}

impl SessionIdentity {
    pub fn new(auth_url: Option<String>, anon_key: Option<String>, client: Client) -> Self {
        Self {
            session: RwLock::new(None),
            auth_url,
            anon_key,
            client,
        }
    }

    pub async fn sign_in(&self, session: UserSession) {
        info!("Session set for user {}", session.user_id);
        *self.session.write().await = Some(session);
    }
}

#[async_trait]
impl IdentityProvider for SessionIdentity {
    async fn current_user(&self) -> Option<UserSession> {
        self.session.read().await.clone()
    }

    async fn refresh(&self) -> Result<UserSession, StudioError> {
        let auth_url = self
            .auth_url
            .as_ref()
            .ok_or_else(|| StudioError::Config("Identity provider URL not configured".to_string()))?;

        let refresh_token = self
            .session
            .read()
            .await
            .as_ref()
            .and_then(|s| s.refresh_token.clone())
            .ok_or(StudioError::AuthRequired)?;

        let mut request = self
            .client
            .post(format!("{}/auth/v1/token?grant_type=refresh_token", auth_url))
            .json(&json!({ "refresh_token": refresh_token }));
        if let Some(key) = &self.anon_key {
            request = request.header("apikey", key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| StudioError::Http(format!("Session refresh failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            warn!("Session refresh rejected with {}", status);
            return Err(StudioError::AuthRequired);
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| StudioError::Http(format!("Failed to parse refresh response: {}", e)))?;

        let session = UserSession {
            user_id: token.user.id,
            access_token: token.access_token,
            refresh_token: token.refresh_token.or(Some(refresh_token)),
        };
        *self.session.write().await = Some(session.clone());
        info!("Session refreshed for user {}", session.user_id);
        Ok(session)
    }

    async fn sign_out(&self) {
        if self.session.write().await.take().is_some() {
            info!("Signed out");
        }
    }
}
