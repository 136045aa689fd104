//! Request authentication for the Databricks APIs.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use reqwest::RequestBuilder;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, instrument};
use url::Url;

use crate::config::{clone_secret, AuthMode, DatabricksConfig};
use crate::endpoints::Scope;
use crate::error::{DatabricksError, DatabricksResult};

/// OAuth2 scope granting access to every Databricks API.
const OAUTH_SCOPE: &str = "all-apis";

/// OAuth2 token response from the account OIDC endpoint.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

/// Cached OAuth2 access token.
#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: Option<DateTime<Utc>>,
}

impl CachedToken {
    /// Returns true if the token is expired or will expire within the grace period.
    fn is_expired(&self, grace_period: Duration) -> bool {
        self.expires_at
            .is_some_and(|expires_at| Utc::now() + grace_period >= expires_at)
    }
}

/// Caches OAuth2 client-credentials tokens for the account service principal.
pub struct TokenCache {
    client_id: String,
    client_secret: SecretString,
    token_url: Url,
    http_client: reqwest::Client,
    cached_token: Arc<RwLock<Option<CachedToken>>>,
    /// Grace period before expiry to trigger refresh (default: 5 minutes).
    grace_period: Duration,
}

impl fmt::Debug for TokenCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenCache")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("token_url", &self.token_url.as_str())
            .finish_non_exhaustive()
    }
}

impl TokenCache {
    #[must_use]
    pub fn new(
        client_id: impl Into<String>,
        client_secret: SecretString,
        token_url: Url,
        http_client: reqwest::Client,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret,
            token_url,
            http_client,
            cached_token: Arc::new(RwLock::new(None)),
            grace_period: Duration::minutes(5),
        }
    }

    /// Gets a valid access token, refreshing if necessary.
    #[instrument(skip(self), fields(client_id = %self.client_id))]
    pub async fn get_token(&self) -> DatabricksResult<String> {
        {
            let cache = self.cached_token.read().await;
            if let Some(ref token) = *cache {
                if !token.is_expired(self.grace_period) {
                    debug!("Using cached token");
                    return Ok(token.access_token.clone());
                }
            }
        }

        debug!("Refreshing access token");
        let new_token = self.acquire_token().await?;

        {
            let mut cache = self.cached_token.write().await;
            *cache = Some(new_token.clone());
        }

        Ok(new_token.access_token)
    }

    async fn acquire_token(&self) -> DatabricksResult<CachedToken> {
        let params = [("grant_type", "client_credentials"), ("scope", OAUTH_SCOPE)];

        let response = self
            .http_client
            .post(self.token_url.clone())
            .basic_auth(&self.client_id, Some(self.client_secret.expose_secret()))
            .form(&params)
            .send()
            .await
            .map_err(|e| DatabricksError::Auth(format!("Token request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(DatabricksError::Auth(format!(
                "Token request failed with status {status}: {body}"
            )));
        }

        let token_response: TokenResponse = response
            .json()
            .await
            .map_err(|e| DatabricksError::Auth(format!("Failed to parse token response: {e}")))?;

        let expires_at = token_response
            .expires_in
            .map(|secs| Utc::now() + Duration::seconds(secs));

        debug!(?expires_at, "Acquired new token");

        Ok(CachedToken {
            access_token: token_response.access_token,
            expires_at,
        })
    }

    /// Invalidates the cached token, forcing a refresh on next use.
    pub async fn invalidate(&self) {
        let mut cache = self.cached_token.write().await;
        *cache = None;
    }
}

/// Credentials applied to outgoing requests.
#[derive(Clone)]
pub enum Auth {
    /// Send requests unauthenticated.
    None,
    /// Personal access tokens keyed by workspace deployment name.
    WorkspaceTokens(Arc<HashMap<String, SecretString>>),
    /// HTTP basic auth.
    Basic {
        username: String,
        password: Arc<SecretString>,
    },
    /// OAuth2 client credentials with a cached bearer token.
    OAuth2(Arc<TokenCache>),
}

impl fmt::Debug for Auth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::WorkspaceTokens(tokens) => f
                .debug_struct("WorkspaceTokens")
                .field("workspaces", &tokens.keys().collect::<Vec<_>>())
                .finish(),
            Self::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .field("password", &"[REDACTED]")
                .finish(),
            Self::OAuth2(cache) => f.debug_tuple("OAuth2").field(cache).finish(),
        }
    }
}

impl Auth {
    /// Builds the auth strategy chosen by [`DatabricksConfig::auth_mode`].
    #[must_use]
    pub fn from_config(
        config: &DatabricksConfig,
        token_url: Url,
        http_client: reqwest::Client,
    ) -> Self {
        match config.auth_mode() {
            AuthMode::Basic => Self::Basic {
                username: config.username.clone().unwrap_or_default(),
                password: Arc::new(
                    config
                        .password
                        .as_ref()
                        .map(clone_secret)
                        .unwrap_or_else(|| SecretString::from(String::new())),
                ),
            },
            AuthMode::OAuth2 => Self::OAuth2(Arc::new(TokenCache::new(
                config.client_id.clone().unwrap_or_default(),
                config
                    .client_secret
                    .as_ref()
                    .map(clone_secret)
                    .unwrap_or_else(|| SecretString::from(String::new())),
                token_url,
                http_client,
            ))),
            AuthMode::WorkspaceTokens => Self::WorkspaceTokens(Arc::new(
                config
                    .workspaces
                    .iter()
                    .cloned()
                    .zip(config.workspace_tokens.iter().map(clone_secret))
                    .collect(),
            )),
            AuthMode::None => Self::None,
        }
    }

    /// Returns true when credentials only reach individual workspaces.
    #[must_use]
    pub fn is_token_auth(&self) -> bool {
        matches!(self, Self::WorkspaceTokens(_))
    }

    /// Applies credentials for `scope` to a request builder.
    ///
    /// # Errors
    ///
    /// Returns `DatabricksError::Auth` when workspace tokens are asked to sign
    /// an account request or a workspace without a token, or when the OAuth2
    /// token cannot be obtained.
    pub async fn apply(
        &self,
        builder: RequestBuilder,
        scope: &Scope,
    ) -> DatabricksResult<RequestBuilder> {
        match self {
            Self::None => Ok(builder),
            Self::Basic { username, password } => {
                Ok(builder.basic_auth(username, Some(password.expose_secret())))
            }
            Self::OAuth2(cache) => {
                let token = cache.get_token().await?;
                Ok(builder.bearer_auth(token))
            }
            Self::WorkspaceTokens(tokens) => {
                let workspace = scope.workspace().ok_or_else(|| {
                    DatabricksError::Auth(
                        "workspace access tokens cannot be used with the account API".into(),
                    )
                })?;
                let token = tokens.get(workspace).ok_or_else(|| {
                    DatabricksError::Auth(format!("no access token configured for {workspace}"))
                })?;
                Ok(builder.bearer_auth(token.expose_secret()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cached_token_expiry() {
        let token = CachedToken {
            access_token: "test".to_string(),
            expires_at: Some(Utc::now() + Duration::minutes(10)),
        };

        assert!(!token.is_expired(Duration::minutes(5)));
        assert!(token.is_expired(Duration::minutes(15)));
    }

    #[test]
    fn test_token_without_expiry_never_expires() {
        let token = CachedToken {
            access_token: "test".to_string(),
            expires_at: None,
        };
        assert!(!token.is_expired(Duration::minutes(5)));
    }

    fn tokens_auth() -> Auth {
        let config = DatabricksConfig::builder()
            .account_id("acc-1")
            .workspace_token("dbc-1", "tok-1")
            .build()
            .unwrap();
        Auth::from_config(
            &config,
            Url::parse("https://accounts.example.com/token").unwrap(),
            reqwest::Client::new(),
        )
    }

    #[tokio::test]
    async fn test_workspace_token_selected_by_scope() {
        let auth = tokens_auth();
        assert!(auth.is_token_auth());

        let client = reqwest::Client::new();
        let request = auth
            .apply(
                client.get("https://dbc-1.example.com"),
                &Scope::Workspace("dbc-1".into()),
            )
            .await
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(
            request.headers().get("authorization").unwrap(),
            "Bearer tok-1"
        );
    }

    #[tokio::test]
    async fn test_workspace_tokens_reject_account_scope() {
        let auth = tokens_auth();
        let client = reqwest::Client::new();

        let err = auth
            .apply(client.get("https://accounts.example.com"), &Scope::Account)
            .await
            .unwrap_err();
        assert!(matches!(err, DatabricksError::Auth(_)));

        let err = auth
            .apply(
                client.get("https://dbc-2.example.com"),
                &Scope::Workspace("dbc-2".into()),
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("dbc-2"));
    }

    #[tokio::test]
    async fn test_basic_auth_header() {
        let config = DatabricksConfig::builder()
            .account_id("acc-1")
            .basic_auth("admin", "pw")
            .build()
            .unwrap();
        let auth = Auth::from_config(
            &config,
            Url::parse("https://accounts.example.com/token").unwrap(),
            reqwest::Client::new(),
        );
        let request = auth
            .apply(reqwest::Client::new().get("https://x.example.com"), &Scope::Account)
            .await
            .unwrap()
            .build()
            .unwrap();
        // base64("admin:pw")
        assert_eq!(
            request.headers().get("authorization").unwrap(),
            "Basic YWRtaW46cHc="
        );
        assert!(!format!("{auth:?}").contains("pw\""));
    }
}
