//! Viewer identity providers.
//!
//! The gateway and the session routes authenticate viewers by exchanging the
//! bearer token for a [`UserIdentity`] with an external identity service.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;

use opsroom_core::{Error, IdentityProvider, Result, UserIdentity};

use crate::config::IdentityConfig;

/// Request timeout for identity lookups.
const IDENTITY_TIMEOUT_SECS: u64 = 5;

/// Identity service over HTTP: `GET <url>/user` with the bearer token.
pub struct HttpIdentityProvider {
    client: reqwest::Client,
    user_url: String,
    api_key: Option<String>,
}

impl HttpIdentityProvider {
    pub fn new(config: &IdentityConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(IDENTITY_TIMEOUT_SECS))
            .build()
            .map_err(|e| Error::Config(format!("Failed to build identity client: {}", e)))?;
        Ok(Self {
            client,
            user_url: format!("{}/user", config.url.trim_end_matches('/')),
            api_key: config.api_key.clone(),
        })
    }
}

#[async_trait]
impl IdentityProvider for HttpIdentityProvider {
    async fn authenticate(&self, token: &str) -> Result<UserIdentity> {
        if token.trim().is_empty() {
            return Err(Error::Unauthorized("Missing token".to_string()));
        }

        let mut request = self.client.get(&self.user_url).bearer_auth(token);
        if let Some(key) = &self.api_key {
            request = request.header("apikey", key);
        }

        let response = request.send().await.map_err(|e| {
            Error::UpstreamUnavailable(format!("Identity service unreachable: {}", e))
        })?;

        match response.status() {
            status if status.is_success() => {
                let identity: UserIdentity = response.json().await.map_err(|e| {
                    Error::UpstreamUnavailable(format!("Invalid identity response: {}", e))
                })?;
                Ok(identity)
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(Error::Unauthorized("Invalid or expired token".to_string()))
            }
            status => Err(Error::UpstreamUnavailable(format!(
                "Identity service returned {}",
                status
            ))),
        }
    }
}

/// Fixed token table, for tests and local development.
#[derive(Debug, Clone, Default)]
pub struct StaticIdentityProvider {
    tokens: HashMap<String, UserIdentity>,
}

impl StaticIdentityProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept `token` as `user_id`.
    pub fn with_token(mut self, token: impl Into<String>, user_id: impl Into<String>) -> Self {
        self.tokens.insert(
            token.into(),
            UserIdentity {
                user_id: user_id.into(),
                email: None,
            },
        );
        self
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentityProvider {
    async fn authenticate(&self, token: &str) -> Result<UserIdentity> {
        self.tokens
            .get(token)
            .cloned()
            .ok_or_else(|| Error::Unauthorized("Invalid or expired token".to_string()))
    }
}
