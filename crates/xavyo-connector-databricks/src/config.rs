//! Databricks connector configuration.
//!
//! The connector talks to two APIs: the account API (`accounts.<hostname>`)
//! and one workspace API per deployment (`<workspace>.<hostname>`). Exactly one
//! credential family is used for both: OAuth2 client credentials, a
//! username/password pair, or personal access tokens scoped to individual
//! workspaces.

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer};
use tracing::{info, warn};
use url::Url;

use crate::error::{DatabricksError, DatabricksResult};

/// Default Databricks hostname.
pub const DEFAULT_HOSTNAME: &str = "cloud.databricks.com";

/// Default request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Credential family selected from the configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    /// Username and password sent as HTTP basic auth.
    Basic,
    /// OAuth2 client-credentials flow against the account OIDC endpoint.
    OAuth2,
    /// One personal access token per configured workspace.
    WorkspaceTokens,
    /// No credentials. Requests will almost certainly be rejected.
    None,
}

/// Configuration for the Databricks connector.
#[derive(Debug)]
pub struct DatabricksConfig {
    /// Databricks account ID.
    pub account_id: String,
    /// Base hostname, e.g. `cloud.databricks.com`.
    pub hostname: String,
    /// Account API hostname. Defaults to `accounts.<hostname>`.
    pub account_hostname: Option<String>,
    /// OAuth2 client ID of a service principal.
    pub client_id: Option<String>,
    /// OAuth2 client secret.
    pub client_secret: Option<SecretString>,
    pub username: Option<String>,
    pub password: Option<SecretString>,
    /// Workspaces to sync. Empty means every workspace in the account.
    pub workspaces: Vec<String>,
    /// Access tokens, positionally matched with `workspaces`.
    pub workspace_tokens: Vec<SecretString>,
    /// Overrides the account API base URL (proxies, mock servers).
    pub account_base_url: Option<Url>,
    /// Overrides the base URL of every workspace API.
    pub workspace_base_url: Option<Url>,
    /// HTTP request timeout in seconds.
    pub timeout_secs: u64,
}

impl DatabricksConfig {
    /// Creates a new configuration builder.
    #[must_use]
    pub fn builder() -> DatabricksConfigBuilder {
        DatabricksConfigBuilder::new()
    }

    /// Returns the hostname of the account API.
    #[must_use]
    pub fn account_host(&self) -> String {
        match self.account_hostname.as_deref() {
            Some(host) if !host.is_empty() => host.to_string(),
            _ => format!("accounts.{}", self.hostname),
        }
    }

    /// Validates the credential combination.
    ///
    /// # Errors
    ///
    /// Returns `DatabricksError::Config` describing the first violated rule.
    pub fn validate(&self) -> DatabricksResult<()> {
        if self.account_id.trim().is_empty() {
            return Err(DatabricksError::Config("account_id is required".into()));
        }
        if self.hostname.trim().is_empty() {
            return Err(DatabricksError::Config("hostname cannot be empty".into()));
        }

        let has_client_id = is_set(self.client_id.as_deref());
        let has_username = is_set(self.username.as_deref());
        let has_tokens = !self.workspace_tokens.is_empty();

        let used = [has_client_id, has_username, has_tokens]
            .iter()
            .filter(|used| **used)
            .count();
        if used == 0 {
            return Err(DatabricksError::Config(
                "one of client_id, username or workspace_tokens must be set".into(),
            ));
        }
        if used > 1 {
            return Err(DatabricksError::Config(
                "client_id, username and workspace_tokens are mutually exclusive".into(),
            ));
        }

        let has_client_secret = is_secret_set(self.client_secret.as_ref());
        if has_client_id != has_client_secret {
            return Err(DatabricksError::Config(
                "client_id and client_secret must be set together".into(),
            ));
        }

        let has_password = is_secret_set(self.password.as_ref());
        if has_username != has_password {
            return Err(DatabricksError::Config(
                "username and password must be set together".into(),
            ));
        }

        if has_tokens && self.workspaces.len() != self.workspace_tokens.len() {
            return Err(DatabricksError::Config(format!(
                "workspace_tokens requires one workspace per token ({} workspaces, {} tokens)",
                self.workspaces.len(),
                self.workspace_tokens.len()
            )));
        }

        Ok(())
    }

    /// Picks the credential family to use.
    ///
    /// Basic auth wins over OAuth2, which wins over workspace tokens. When
    /// nothing usable is configured the connector falls back to sending
    /// unauthenticated requests.
    #[must_use]
    pub fn auth_mode(&self) -> AuthMode {
        if is_set(self.username.as_deref()) && is_secret_set(self.password.as_ref()) {
            info!(account_id = %self.account_id, "Using basic auth");
            return AuthMode::Basic;
        }
        if is_set(self.client_id.as_deref()) && is_secret_set(self.client_secret.as_ref()) {
            info!(account_id = %self.account_id, "Using OAuth2 client credentials");
            return AuthMode::OAuth2;
        }
        if !self.workspace_tokens.is_empty()
            && self.workspaces.len() == self.workspace_tokens.len()
        {
            info!(account_id = %self.account_id, "Using workspace access tokens");
            return AuthMode::WorkspaceTokens;
        }

        warn!(
            "No valid authentication method configured, falling back to unauthenticated requests. \
             Configure client_id/client_secret, username/password, or workspaces/workspace_tokens"
        );
        AuthMode::None
    }
}

impl Clone for DatabricksConfig {
    fn clone(&self) -> Self {
        Self {
            account_id: self.account_id.clone(),
            hostname: self.hostname.clone(),
            account_hostname: self.account_hostname.clone(),
            client_id: self.client_id.clone(),
            client_secret: self.client_secret.as_ref().map(clone_secret),
            username: self.username.clone(),
            password: self.password.as_ref().map(clone_secret),
            workspaces: self.workspaces.clone(),
            workspace_tokens: self.workspace_tokens.iter().map(clone_secret).collect(),
            account_base_url: self.account_base_url.clone(),
            workspace_base_url: self.workspace_base_url.clone(),
            timeout_secs: self.timeout_secs,
        }
    }
}

/// Serialized form of the configuration, with secrets as plain strings.
#[derive(Deserialize)]
struct RawConfig {
    account_id: String,
    #[serde(default = "default_hostname")]
    hostname: String,
    #[serde(default)]
    account_hostname: Option<String>,
    #[serde(default)]
    client_id: Option<String>,
    #[serde(default)]
    client_secret: Option<String>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
    #[serde(default)]
    workspaces: Vec<String>,
    #[serde(default)]
    workspace_tokens: Vec<String>,
    #[serde(default)]
    account_base_url: Option<String>,
    #[serde(default)]
    workspace_base_url: Option<String>,
    #[serde(default = "default_timeout_secs")]
    timeout_secs: u64,
}

impl<'de> Deserialize<'de> for DatabricksConfig {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        use serde::de::Error;

        let raw = RawConfig::deserialize(deserializer)?;
        let parse = |value: Option<String>| -> Result<Option<Url>, D::Error> {
            value
                .filter(|v| !v.is_empty())
                .map(|v| Url::parse(&v).map_err(D::Error::custom))
                .transpose()
        };

        Ok(Self {
            account_id: raw.account_id,
            hostname: raw.hostname,
            account_hostname: raw.account_hostname,
            client_id: raw.client_id,
            client_secret: raw.client_secret.map(SecretString::from),
            username: raw.username,
            password: raw.password.map(SecretString::from),
            workspaces: raw.workspaces,
            workspace_tokens: raw
                .workspace_tokens
                .into_iter()
                .map(SecretString::from)
                .collect(),
            account_base_url: parse(raw.account_base_url)?,
            workspace_base_url: parse(raw.workspace_base_url)?,
            timeout_secs: raw.timeout_secs,
        })
    }
}

fn default_hostname() -> String {
    DEFAULT_HOSTNAME.to_string()
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn is_set(value: Option<&str>) -> bool {
    value.is_some_and(|v| !v.is_empty())
}

fn is_secret_set(value: Option<&SecretString>) -> bool {
    value.is_some_and(|v| !v.expose_secret().is_empty())
}

pub(crate) fn clone_secret(secret: &SecretString) -> SecretString {
    SecretString::from(secret.expose_secret().to_owned())
}

/// Builder for `DatabricksConfig`.
#[derive(Debug, Default)]
pub struct DatabricksConfigBuilder {
    account_id: Option<String>,
    hostname: Option<String>,
    account_hostname: Option<String>,
    client_id: Option<String>,
    client_secret: Option<SecretString>,
    username: Option<String>,
    password: Option<SecretString>,
    workspaces: Vec<String>,
    workspace_tokens: Vec<SecretString>,
    account_base_url: Option<String>,
    workspace_base_url: Option<String>,
    timeout_secs: Option<u64>,
}

impl DatabricksConfigBuilder {
    /// Creates a new builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn account_id(mut self, account_id: impl Into<String>) -> Self {
        self.account_id = Some(account_id.into());
        self
    }

    pub fn hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = Some(hostname.into());
        self
    }

    pub fn account_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.account_hostname = Some(hostname.into());
        self
    }

    /// Sets OAuth2 client credentials.
    pub fn oauth2(mut self, client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self.client_secret = Some(SecretString::from(client_secret.into()));
        self
    }

    /// Sets basic auth credentials.
    pub fn basic_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(SecretString::from(password.into()));
        self
    }

    /// Adds a workspace to the allow-list.
    pub fn workspace(mut self, workspace: impl Into<String>) -> Self {
        self.workspaces.push(workspace.into());
        self
    }

    /// Adds a workspace together with its access token.
    pub fn workspace_token(
        mut self,
        workspace: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        self.workspaces.push(workspace.into());
        self.workspace_tokens.push(SecretString::from(token.into()));
        self
    }

    pub fn account_base_url(mut self, url: impl Into<String>) -> Self {
        self.account_base_url = Some(url.into());
        self
    }

    pub fn workspace_base_url(mut self, url: impl Into<String>) -> Self {
        self.workspace_base_url = Some(url.into());
        self
    }

    #[must_use]
    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    /// Builds and validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if a base URL cannot be parsed or validation fails.
    pub fn build(self) -> DatabricksResult<DatabricksConfig> {
        let account_id = self
            .account_id
            .ok_or_else(|| DatabricksError::Config("account_id is required".into()))?;

        let config = DatabricksConfig {
            account_id,
            hostname: self.hostname.unwrap_or_else(default_hostname),
            account_hostname: self.account_hostname,
            client_id: self.client_id,
            client_secret: self.client_secret,
            username: self.username,
            password: self.password,
            workspaces: self.workspaces,
            workspace_tokens: self.workspace_tokens,
            account_base_url: self.account_base_url.as_deref().map(Url::parse).transpose()?,
            workspace_base_url: self
                .workspace_base_url
                .as_deref()
                .map(Url::parse)
                .transpose()?,
            timeout_secs: self.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS),
        };

        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let config = DatabricksConfig::builder()
            .account_id("acc-1")
            .oauth2("client", "secret")
            .build()
            .unwrap();

        assert_eq!(config.hostname, DEFAULT_HOSTNAME);
        assert_eq!(config.account_host(), "accounts.cloud.databricks.com");
        assert_eq!(config.timeout_secs, DEFAULT_TIMEOUT_SECS);
        assert_eq!(config.auth_mode(), AuthMode::OAuth2);
    }

    #[test]
    fn test_account_hostname_override() {
        let config = DatabricksConfig::builder()
            .account_id("acc-1")
            .hostname("azuredatabricks.net")
            .basic_auth("admin", "pw")
            .build()
            .unwrap();
        assert_eq!(config.account_host(), "accounts.azuredatabricks.net");

        let config = DatabricksConfig::builder()
            .account_id("acc-1")
            .account_hostname("accounts.gcp.databricks.com")
            .basic_auth("admin", "pw")
            .build()
            .unwrap();
        assert_eq!(config.account_host(), "accounts.gcp.databricks.com");
    }

    #[test]
    fn test_requires_credentials() {
        let err = DatabricksConfig::builder()
            .account_id("acc-1")
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("must be set"));
    }

    #[test]
    fn test_credentials_are_mutually_exclusive() {
        let err = DatabricksConfig::builder()
            .account_id("acc-1")
            .oauth2("client", "secret")
            .basic_auth("admin", "pw")
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("mutually exclusive"));
    }

    #[test]
    fn test_missing_account_id() {
        let err = DatabricksConfig::builder()
            .basic_auth("admin", "pw")
            .build()
            .unwrap_err();
        assert!(matches!(err, DatabricksError::Config(_)));
    }

    #[test]
    fn test_workspace_tokens_must_match_workspaces() {
        let config = DatabricksConfig::builder()
            .account_id("acc-1")
            .workspace_token("dbc-1", "tok-1")
            .workspace_token("dbc-2", "tok-2")
            .build()
            .unwrap();
        assert_eq!(config.auth_mode(), AuthMode::WorkspaceTokens);

        let err = DatabricksConfig::builder()
            .account_id("acc-1")
            .workspace_token("dbc-1", "tok-1")
            .workspace("dbc-2")
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("one workspace per token"));
    }

    #[test]
    fn test_basic_auth_wins() {
        let mut config = DatabricksConfig::builder()
            .account_id("acc-1")
            .basic_auth("admin", "pw")
            .build()
            .unwrap();
        config.client_id = Some("client".into());
        config.client_secret = Some(SecretString::from("secret"));
        assert_eq!(config.auth_mode(), AuthMode::Basic);
    }

    #[test]
    fn test_no_auth_fallback() {
        let mut config = DatabricksConfig::builder()
            .account_id("acc-1")
            .basic_auth("admin", "pw")
            .build()
            .unwrap();
        config.password = None;
        assert_eq!(config.auth_mode(), AuthMode::None);
    }

    #[test]
    fn test_deserialize() {
        let json = r#"{
            "account_id": "acc-1",
            "client_id": "client",
            "client_secret": "secret",
            "workspaces": ["dbc-1"],
            "account_base_url": "http://127.0.0.1:8080"
        }"#;
        let config: DatabricksConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.hostname, DEFAULT_HOSTNAME);
        assert_eq!(config.workspaces, vec!["dbc-1".to_string()]);
        assert_eq!(
            config.account_base_url.as_ref().map(Url::as_str),
            Some("http://127.0.0.1:8080/")
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let config = DatabricksConfig::builder()
            .account_id("acc-1")
            .oauth2("client", "super-secret-value")
            .build()
            .unwrap();
        let debug = format!("{config:?}");
        assert!(!debug.contains("super-secret-value"));
        assert!(debug.contains("client"));
    }
}
