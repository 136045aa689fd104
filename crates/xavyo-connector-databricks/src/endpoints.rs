//! Endpoint resolution for the account and workspace APIs.
//!
//! Every request names a logical [`Endpoint`] and a [`Scope`]. The resolver
//! looks the pair up in a single routing table; a pair missing from the table
//! is an `UnknownEndpoint` error rather than a silently wrong URL.

use std::fmt;
use std::str::FromStr;

use url::Url;

use crate::config::DatabricksConfig;
use crate::error::{DatabricksError, DatabricksResult};

/// Which API a call targets.
///
/// Passed by value into every client call; the client keeps no notion of a
/// current workspace.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scope {
    /// The account-wide API.
    Account,
    /// The API of one workspace, identified by its deployment name.
    Workspace(String),
}

impl Scope {
    /// Builds a scope from a possibly-empty workspace name.
    ///
    /// An empty name means the account scope.
    pub fn from_workspace(workspace: impl Into<String>) -> Self {
        let workspace = workspace.into();
        if workspace.is_empty() {
            Self::Account
        } else {
            Self::Workspace(workspace)
        }
    }

    #[must_use]
    pub fn kind(&self) -> ScopeKind {
        match self {
            Self::Account => ScopeKind::Account,
            Self::Workspace(_) => ScopeKind::Workspace,
        }
    }

    /// Workspace deployment name, if this is a workspace scope.
    #[must_use]
    pub fn workspace(&self) -> Option<&str> {
        match self {
            Self::Account => None,
            Self::Workspace(name) => Some(name),
        }
    }

    #[must_use]
    pub fn is_account(&self) -> bool {
        matches!(self, Self::Account)
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Account => write!(f, "account"),
            Self::Workspace(name) => write!(f, "workspace {name}"),
        }
    }
}

/// Scope discriminant used as the routing-table key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScopeKind {
    Account,
    Workspace,
}

impl ScopeKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Account => "account",
            Self::Workspace => "workspace",
        }
    }
}

impl fmt::Display for ScopeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Logical API endpoint families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Users,
    Groups,
    ServicePrincipals,
    Roles,
    RuleSets,
    Workspaces,
}

impl Endpoint {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Users => "Users",
            Self::Groups => "Groups",
            Self::ServicePrincipals => "ServicePrincipals",
            Self::Roles => "assignable-roles",
            Self::RuleSets => "rule-sets",
            Self::Workspaces => "workspaces",
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Endpoint {
    type Err = DatabricksError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim_start_matches('/');
        match name {
            "Users" => Ok(Self::Users),
            "Groups" => Ok(Self::Groups),
            "ServicePrincipals" => Ok(Self::ServicePrincipals),
            "assignable-roles" => Ok(Self::Roles),
            "rule-sets" => Ok(Self::RuleSets),
            "workspaces" => Ok(Self::Workspaces),
            _ => Err(DatabricksError::UnknownEndpoint {
                endpoint: s.to_string(),
                scope: "any".to_string(),
            }),
        }
    }
}

/// Path templates keyed by `(endpoint, scope)`. `{account_id}` is substituted.
const ROUTES: &[(Endpoint, ScopeKind, &str)] = &[
    (
        Endpoint::Users,
        ScopeKind::Account,
        "/api/2.0/accounts/{account_id}/scim/v2/Users",
    ),
    (
        Endpoint::Users,
        ScopeKind::Workspace,
        "/api/2.0/preview/scim/v2/Users",
    ),
    (
        Endpoint::Groups,
        ScopeKind::Account,
        "/api/2.0/accounts/{account_id}/scim/v2/Groups",
    ),
    (
        Endpoint::Groups,
        ScopeKind::Workspace,
        "/api/2.0/preview/scim/v2/Groups",
    ),
    (
        Endpoint::ServicePrincipals,
        ScopeKind::Account,
        "/api/2.0/accounts/{account_id}/scim/v2/ServicePrincipals",
    ),
    (
        Endpoint::ServicePrincipals,
        ScopeKind::Workspace,
        "/api/2.0/preview/scim/v2/ServicePrincipals",
    ),
    (
        Endpoint::Roles,
        ScopeKind::Account,
        "/api/2.0/preview/accounts/{account_id}/access-control/assignable-roles",
    ),
    (
        Endpoint::Roles,
        ScopeKind::Workspace,
        "/api/2.0/preview/accounts/access-control/assignable-roles",
    ),
    (
        Endpoint::RuleSets,
        ScopeKind::Account,
        "/api/2.0/preview/accounts/{account_id}/access-control/rule-sets",
    ),
    (
        Endpoint::RuleSets,
        ScopeKind::Workspace,
        "/api/2.0/preview/accounts/access-control/rule-sets",
    ),
    (
        Endpoint::Workspaces,
        ScopeKind::Account,
        "/api/2.0/accounts/{account_id}/workspaces",
    ),
];

/// How workspace hosts are derived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkspaceBase {
    /// `https://<workspace>.<hostname>`.
    Subdomain(String),
    /// Every workspace is served from the same base URL.
    Fixed(Url),
}

/// Resolves `(endpoint, scope)` pairs into absolute URLs.
#[derive(Debug, Clone)]
pub struct EndpointResolver {
    account_id: String,
    account_base: Url,
    workspace_base: WorkspaceBase,
}

impl EndpointResolver {
    #[must_use]
    pub fn new(account_id: impl Into<String>, account_base: Url, workspace_base: WorkspaceBase) -> Self {
        Self {
            account_id: account_id.into(),
            account_base,
            workspace_base,
        }
    }

    /// Builds a resolver from the connector configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the account host does not form a valid URL.
    pub fn from_config(config: &DatabricksConfig) -> DatabricksResult<Self> {
        let account_base = match &config.account_base_url {
            Some(url) => url.clone(),
            None => Url::parse(&format!("https://{}", config.account_host()))?,
        };
        let workspace_base = match &config.workspace_base_url {
            Some(url) => WorkspaceBase::Fixed(url.clone()),
            None => WorkspaceBase::Subdomain(config.hostname.clone()),
        };
        Ok(Self::new(&config.account_id, account_base, workspace_base))
    }

    #[must_use]
    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    /// Base URL (scheme and host) for a scope.
    ///
    /// # Errors
    ///
    /// Returns an error if the workspace name does not form a valid host.
    pub fn base_url(&self, scope: &Scope) -> DatabricksResult<Url> {
        match scope {
            Scope::Account => Ok(self.account_base.clone()),
            Scope::Workspace(workspace) => match &self.workspace_base {
                WorkspaceBase::Fixed(url) => Ok(url.clone()),
                WorkspaceBase::Subdomain(hostname) => {
                    Ok(Url::parse(&format!("https://{workspace}.{hostname}"))?)
                }
            },
        }
    }

    /// Path of an endpoint in a scope.
    ///
    /// # Errors
    ///
    /// Returns `UnknownEndpoint` if the endpoint has no route for the scope.
    pub fn path(&self, endpoint: Endpoint, kind: ScopeKind) -> DatabricksResult<String> {
        ROUTES
            .iter()
            .find(|(e, k, _)| *e == endpoint && *k == kind)
            .map(|(_, _, template)| template.replace("{account_id}", &self.account_id))
            .ok_or_else(|| DatabricksError::UnknownEndpoint {
                endpoint: endpoint.to_string(),
                scope: kind.to_string(),
            })
    }

    /// Absolute URL of an endpoint in a scope.
    ///
    /// # Errors
    ///
    /// Returns `UnknownEndpoint` for unrouted pairs, or a URL error.
    pub fn resolve(&self, endpoint: Endpoint, scope: &Scope) -> DatabricksResult<Url> {
        let path = self.path(endpoint, scope.kind())?;
        let base = self.base_url(scope)?;
        Ok(join_path(&base, &path))
    }

    /// Like [`resolve`](Self::resolve), with extra path segments appended.
    ///
    /// # Errors
    ///
    /// Same as [`resolve`](Self::resolve).
    pub fn resolve_with(
        &self,
        endpoint: Endpoint,
        scope: &Scope,
        segments: &[&str],
    ) -> DatabricksResult<Url> {
        let url = self.resolve(endpoint, scope)?;
        append_segments(url, segments)
    }

    /// OIDC token endpoint used by the OAuth2 client-credentials flow.
    ///
    /// # Errors
    ///
    /// Returns a URL error if the account base URL cannot carry a path.
    pub fn token_url(&self) -> DatabricksResult<Url> {
        let path = format!("/oidc/accounts/{}/v1/token", self.account_id);
        Ok(join_path(&self.account_base, &path))
    }
}

fn join_path(base: &Url, path: &str) -> Url {
    let mut url = base.clone();
    let prefix = base.path().trim_end_matches('/');
    url.set_path(&format!("{prefix}{path}"));
    url.set_query(None);
    url
}

fn append_segments(mut url: Url, segments: &[&str]) -> DatabricksResult<Url> {
    let base = url.to_string();
    {
        let mut path = url
            .path_segments_mut()
            .map_err(|()| DatabricksError::Config(format!("URL cannot be a base: {base}")))?;
        path.pop_if_empty();
        for segment in segments.iter().filter(|s| !s.is_empty()) {
            path.push(segment);
        }
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> EndpointResolver {
        EndpointResolver::new(
            "acc-1",
            Url::parse("https://accounts.cloud.databricks.com").unwrap(),
            WorkspaceBase::Subdomain("cloud.databricks.com".into()),
        )
    }

    #[test]
    fn test_append_segments() {
        let url = Url::parse("https://accounts.cloud.databricks.com/api/2.0/Users/").unwrap();
        let url = append_segments(url, &["42", "", "roles"]).unwrap();
        assert_eq!(url.path(), "/api/2.0/Users/42/roles");
    }

    #[test]
    fn test_append_segments_rejects_cannot_be_a_base() {
        let url = Url::parse("mailto:admin@example.com").unwrap();
        let err = append_segments(url, &["42"]).unwrap_err();
        assert!(matches!(err, DatabricksError::Config(_)));
        assert!(err.to_string().contains("mailto:admin@example.com"));
    }

    #[test]
    fn test_account_scope_paths() {
        let r = resolver();
        let url = r.resolve(Endpoint::Users, &Scope::Account).unwrap();
        assert_eq!(
            url.as_str(),
            "https://accounts.cloud.databricks.com/api/2.0/accounts/acc-1/scim/v2/Users"
        );

        let url = r.resolve(Endpoint::RuleSets, &Scope::Account).unwrap();
        assert_eq!(
            url.path(),
            "/api/2.0/preview/accounts/acc-1/access-control/rule-sets"
        );
    }

    #[test]
    fn test_workspace_scope_paths() {
        let r = resolver();
        let scope = Scope::Workspace("dbc-123".into());

        let url = r.resolve(Endpoint::Groups, &scope).unwrap();
        assert_eq!(
            url.as_str(),
            "https://dbc-123.cloud.databricks.com/api/2.0/preview/scim/v2/Groups"
        );

        let url = r.resolve(Endpoint::Roles, &scope).unwrap();
        assert_eq!(
            url.path(),
            "/api/2.0/preview/accounts/access-control/assignable-roles"
        );
    }

    #[test]
    fn test_workspaces_unrouted_in_workspace_scope() {
        let err = resolver()
            .resolve(Endpoint::Workspaces, &Scope::Workspace("dbc-1".into()))
            .unwrap_err();
        assert!(matches!(err, DatabricksError::UnknownEndpoint { .. }));
        assert!(err.to_string().contains("workspaces"));
    }

    #[test]
    fn test_unknown_endpoint_name() {
        assert_eq!("/Users".parse::<Endpoint>().unwrap(), Endpoint::Users);
        assert_eq!("rule-sets".parse::<Endpoint>().unwrap(), Endpoint::RuleSets);
        let err = "/Clusters".parse::<Endpoint>().unwrap_err();
        assert!(matches!(err, DatabricksError::UnknownEndpoint { .. }));
    }

    #[test]
    fn test_fixed_base_keeps_prefix() {
        let r = EndpointResolver::new(
            "acc-1",
            Url::parse("http://127.0.0.1:9000/proxy/").unwrap(),
            WorkspaceBase::Fixed(Url::parse("http://127.0.0.1:9001").unwrap()),
        );
        let url = r.resolve(Endpoint::Workspaces, &Scope::Account).unwrap();
        assert_eq!(
            url.as_str(),
            "http://127.0.0.1:9000/proxy/api/2.0/accounts/acc-1/workspaces"
        );

        let url = r
            .resolve(Endpoint::Users, &Scope::Workspace("anything".into()))
            .unwrap();
        assert_eq!(url.as_str(), "http://127.0.0.1:9001/api/2.0/preview/scim/v2/Users");
    }

    #[test]
    fn test_resolve_with_segments() {
        let url = resolver()
            .resolve_with(
                Endpoint::Workspaces,
                &Scope::Account,
                &["42", "permissionassignments", "principals", "7"],
            )
            .unwrap();
        assert_eq!(
            url.path(),
            "/api/2.0/accounts/acc-1/workspaces/42/permissionassignments/principals/7"
        );
    }

    #[test]
    fn test_token_url() {
        let url = resolver().token_url().unwrap();
        assert_eq!(
            url.as_str(),
            "https://accounts.cloud.databricks.com/oidc/accounts/acc-1/v1/token"
        );
    }

    #[test]
    fn test_scope_from_workspace() {
        assert_eq!(Scope::from_workspace(""), Scope::Account);
        assert_eq!(
            Scope::from_workspace("dbc-1").workspace(),
            Some("dbc-1")
        );
    }
}
