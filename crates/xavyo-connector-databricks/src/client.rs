//! Typed client for the Databricks account and workspace APIs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::de::{DeserializeOwned, IgnoredAny};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, instrument};

use crate::auth::Auth;
use crate::config::DatabricksConfig;
use crate::endpoints::{Endpoint, EndpointResolver, Scope};
use crate::error::{DatabricksError, DatabricksResult};
use crate::models::{
    CreateUserBody, Group, ListResponse, Principal, PrincipalKind, Role, RuleSet,
    ServicePrincipal, User, Workspace, WorkspaceAssignment,
};
use crate::rate_limit::RateLimitInfo;
use crate::transport::HttpTransport;
use crate::vars::{FilterVars, NameVars, PaginationVars, QueryVars, ResourceVars};

const PERMISSION_ASSIGNMENTS: &str = "permissionassignments";

/// One page of a SCIM listing.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Total number of matching items across all pages.
    pub total: u32,
    pub rate_limit: RateLimitInfo,
}

/// Object whose assignable roles and rule set are addressed by the
/// access-control API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessTarget {
    /// The account itself.
    Account,
    /// A group (by id) or service principal (by application id).
    Principal { kind: PrincipalKind, id: String },
}

impl AccessTarget {
    pub fn group(id: impl Into<String>) -> Self {
        Self::Principal {
            kind: PrincipalKind::Group,
            id: id.into(),
        }
    }

    pub fn service_principal(application_id: impl Into<String>) -> Self {
        Self::Principal {
            kind: PrincipalKind::ServicePrincipal,
            id: application_id.into(),
        }
    }

    /// `accounts/<acct>[/<kind>/<id>]`, skipping empty segments.
    #[must_use]
    pub fn resource_name(&self, account_id: &str) -> String {
        let mut parts = vec!["accounts", account_id];
        if let Self::Principal { kind, id } = self {
            parts.push(kind.rule_set_prefix());
            parts.push(id);
        }
        parts
            .into_iter()
            .filter(|p| !p.is_empty())
            .collect::<Vec<_>>()
            .join("/")
    }

    /// Name of the target's default rule set.
    #[must_use]
    pub fn rule_set_name(&self, account_id: &str) -> String {
        format!("{}/ruleSets/default", self.resource_name(account_id))
    }
}

#[derive(Debug, Deserialize)]
struct RolesResponse {
    #[serde(default)]
    roles: Vec<Role>,
}

#[derive(Debug, Default, Deserialize)]
struct RuleSetResponse {
    #[serde(default)]
    grant_rules: Vec<RuleSet>,
    #[serde(default)]
    etag: String,
}

#[derive(Debug, Deserialize)]
struct AssignmentsResponse {
    #[serde(default)]
    permission_assignments: Vec<WorkspaceAssignment>,
}

#[derive(Debug, Serialize)]
struct RuleSetBody<'a> {
    name: &'a str,
    etag: &'a str,
    grant_rules: &'a [RuleSet],
}

#[derive(Debug, Serialize)]
struct UpdateRuleSetRequest<'a> {
    name: &'a str,
    rule_set: RuleSetBody<'a>,
}

#[derive(Debug, Serialize)]
struct WorkspacePermissions {
    permissions: [&'static str; 1],
}

/// Databricks REST client.
///
/// Stateless with respect to scope: every call names the API it targets. The
/// only mutable state is the etag store and the API availability flags.
#[derive(Debug)]
pub struct DatabricksClient {
    transport: HttpTransport,
    resolver: EndpointResolver,
    /// Last etag observed per rule-set name.
    etags: Mutex<HashMap<String, String>>,
    account_api_available: AtomicBool,
    workspace_api_available: AtomicBool,
}

impl DatabricksClient {
    /// Creates a client from the connector configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created or the hosts do
    /// not form valid URLs.
    pub fn new(config: &DatabricksConfig) -> DatabricksResult<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| DatabricksError::Config(format!("Failed to create HTTP client: {e}")))?;

        let resolver = EndpointResolver::from_config(config)?;
        let auth = Auth::from_config(config, resolver.token_url()?, http_client.clone());

        Ok(Self::with_parts(
            HttpTransport::new(http_client, auth),
            resolver,
        ))
    }

    #[must_use]
    pub fn with_parts(transport: HttpTransport, resolver: EndpointResolver) -> Self {
        Self {
            transport,
            resolver,
            etags: Mutex::new(HashMap::new()),
            account_api_available: AtomicBool::new(true),
            workspace_api_available: AtomicBool::new(true),
        }
    }

    #[must_use]
    pub fn account_id(&self) -> &str {
        self.resolver.account_id()
    }

    #[must_use]
    pub fn resolver(&self) -> &EndpointResolver {
        &self.resolver
    }

    /// Returns true when credentials only reach individual workspaces.
    #[must_use]
    pub fn is_token_auth(&self) -> bool {
        self.transport.auth().is_token_auth()
    }

    /// Records which APIs accepted the configured credentials.
    pub fn update_availability(&self, account_api: bool, workspace_api: bool) {
        self.account_api_available
            .store(account_api, Ordering::Relaxed);
        self.workspace_api_available
            .store(workspace_api, Ordering::Relaxed);
    }

    #[must_use]
    pub fn is_account_api_available(&self) -> bool {
        self.account_api_available.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn is_workspace_api_available(&self) -> bool {
        self.workspace_api_available.load(Ordering::Relaxed)
    }

    /// Last etag recorded for a rule set.
    pub async fn etag(&self, rule_set_name: &str) -> Option<String> {
        self.etags.lock().await.get(rule_set_name).cloned()
    }

    async fn record_etag(&self, rule_set_name: &str, etag: String) {
        debug!(rule_set = rule_set_name, etag = %etag, "Recording rule set etag");
        self.etags
            .lock()
            .await
            .insert(rule_set_name.to_string(), etag);
    }

    async fn list<T: DeserializeOwned>(
        &self,
        endpoint: Endpoint,
        scope: &Scope,
        vars: &[&dyn QueryVars],
    ) -> DatabricksResult<Page<T>> {
        let url = self.resolver.resolve(endpoint, scope)?;
        let (res, rate_limit): (ListResponse<T>, _) = self.transport.get(scope, url, vars).await?;
        Ok(Page {
            items: res.resources,
            total: res.total_results,
            rate_limit,
        })
    }

    async fn get_one<T: DeserializeOwned>(
        &self,
        endpoint: Endpoint,
        scope: &Scope,
        id: &str,
    ) -> DatabricksResult<(T, RateLimitInfo)> {
        let url = self.resolver.resolve_with(endpoint, scope, &[id])?;
        self.transport.get(scope, url, &[]).await
    }

    async fn put_one<B: Serialize>(
        &self,
        endpoint: Endpoint,
        scope: &Scope,
        id: &str,
        body: &B,
    ) -> DatabricksResult<RateLimitInfo> {
        let url = self.resolver.resolve_with(endpoint, scope, &[id])?;
        let (_, rate_limit): (IgnoredAny, _) =
            self.transport.put(scope, url, Some(body), &[]).await?;
        Ok(rate_limit)
    }

    /// First match of `<field> eq '<value>'`, projected through `pick`.
    async fn find_first<T: DeserializeOwned>(
        &self,
        endpoint: Endpoint,
        scope: &Scope,
        field: &str,
        value: &str,
        pick: impl FnOnce(T) -> String,
    ) -> DatabricksResult<Option<String>> {
        let page: Page<T> = self
            .list(
                endpoint,
                scope,
                &[&PaginationVars::single(), &FilterVars::eq(field, value)],
            )
            .await?;
        Ok(page.items.into_iter().next().map(pick))
    }

    // ------------------------------------------------------------------
    // Users
    // ------------------------------------------------------------------

    /// Lists users.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    #[instrument(skip(self, vars))]
    pub async fn list_users(
        &self,
        scope: &Scope,
        vars: &[&dyn QueryVars],
    ) -> DatabricksResult<Page<User>> {
        self.list(Endpoint::Users, scope, vars).await
    }

    /// Gets a user by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    #[instrument(skip(self))]
    pub async fn get_user(&self, scope: &Scope, id: &str) -> DatabricksResult<(User, RateLimitInfo)> {
        self.get_one(Endpoint::Users, scope, id).await
    }

    /// Replaces a user.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    #[instrument(skip(self, user), fields(user_id = %user.id))]
    pub async fn update_user(&self, scope: &Scope, user: &User) -> DatabricksResult<RateLimitInfo> {
        self.put_one(Endpoint::Users, scope, &user.id, user).await
    }

    /// Looks up a user id by username.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails. `Ok(None)` means no such user.
    #[instrument(skip(self))]
    pub async fn find_user_id(&self, scope: &Scope, username: &str) -> DatabricksResult<Option<String>> {
        self.find_first(Endpoint::Users, scope, "userName", username, |u: User| u.id)
            .await
    }

    /// Looks up a username by user id.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails. `Ok(None)` means no such user.
    #[instrument(skip(self))]
    pub async fn find_username(&self, scope: &Scope, id: &str) -> DatabricksResult<Option<String>> {
        self.find_first(Endpoint::Users, scope, "id", id, |u: User| u.user_name)
            .await
    }

    /// Creates an account-level user.
    ///
    /// # Errors
    ///
    /// Returns `InvalidScope` for workspace scopes, or a request error.
    #[instrument(skip(self, body), fields(user_name = %body.user_name))]
    pub async fn create_user(
        &self,
        scope: &Scope,
        body: &CreateUserBody,
    ) -> DatabricksResult<(User, RateLimitInfo)> {
        require_account_scope(scope, "create_user")?;
        let url = self.resolver.resolve(Endpoint::Users, scope)?;
        self.transport.post(scope, url, body, &[]).await
    }

    /// Deletes an account-level user.
    ///
    /// # Errors
    ///
    /// Returns `InvalidScope` for workspace scopes, or a request error.
    #[instrument(skip(self))]
    pub async fn delete_user(&self, scope: &Scope, id: &str) -> DatabricksResult<RateLimitInfo> {
        require_account_scope(scope, "delete_user")?;
        let url = self.resolver.resolve_with(Endpoint::Users, scope, &[id])?;
        self.transport.delete(scope, url).await
    }

    // ------------------------------------------------------------------
    // Groups
    // ------------------------------------------------------------------

    /// Lists groups.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    #[instrument(skip(self, vars))]
    pub async fn list_groups(
        &self,
        scope: &Scope,
        vars: &[&dyn QueryVars],
    ) -> DatabricksResult<Page<Group>> {
        self.list(Endpoint::Groups, scope, vars).await
    }

    /// Gets a group by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    #[instrument(skip(self))]
    pub async fn get_group(&self, scope: &Scope, id: &str) -> DatabricksResult<(Group, RateLimitInfo)> {
        self.get_one(Endpoint::Groups, scope, id).await
    }

    /// Replaces a group, including its member list.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    #[instrument(skip(self, group), fields(group_id = %group.id))]
    pub async fn update_group(&self, scope: &Scope, group: &Group) -> DatabricksResult<RateLimitInfo> {
        self.put_one(Endpoint::Groups, scope, &group.id, group).await
    }

    /// Looks up a group id by display name.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails. `Ok(None)` means no such group.
    #[instrument(skip(self))]
    pub async fn find_group_id(
        &self,
        scope: &Scope,
        display_name: &str,
    ) -> DatabricksResult<Option<String>> {
        self.find_first(Endpoint::Groups, scope, "displayName", display_name, |g: Group| {
            g.id
        })
        .await
    }

    /// Looks up a group display name by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails. `Ok(None)` means no such group.
    #[instrument(skip(self))]
    pub async fn find_group_display_name(
        &self,
        scope: &Scope,
        id: &str,
    ) -> DatabricksResult<Option<String>> {
        self.find_first(Endpoint::Groups, scope, "id", id, |g: Group| g.display_name)
            .await
    }

    // ------------------------------------------------------------------
    // Service principals
    // ------------------------------------------------------------------

    /// Lists service principals.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    #[instrument(skip(self, vars))]
    pub async fn list_service_principals(
        &self,
        scope: &Scope,
        vars: &[&dyn QueryVars],
    ) -> DatabricksResult<Page<ServicePrincipal>> {
        self.list(Endpoint::ServicePrincipals, scope, vars).await
    }

    /// Gets a service principal by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    #[instrument(skip(self))]
    pub async fn get_service_principal(
        &self,
        scope: &Scope,
        id: &str,
    ) -> DatabricksResult<(ServicePrincipal, RateLimitInfo)> {
        self.get_one(Endpoint::ServicePrincipals, scope, id).await
    }

    /// Replaces a service principal.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    #[instrument(skip(self, sp), fields(service_principal_id = %sp.id))]
    pub async fn update_service_principal(
        &self,
        scope: &Scope,
        sp: &ServicePrincipal,
    ) -> DatabricksResult<RateLimitInfo> {
        self.put_one(Endpoint::ServicePrincipals, scope, &sp.id, sp)
            .await
    }

    /// Looks up a service principal id by application id.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails. `Ok(None)` means not found.
    #[instrument(skip(self))]
    pub async fn find_service_principal_id(
        &self,
        scope: &Scope,
        application_id: &str,
    ) -> DatabricksResult<Option<String>> {
        self.find_first(
            Endpoint::ServicePrincipals,
            scope,
            "applicationId",
            application_id,
            |sp: ServicePrincipal| sp.id,
        )
        .await
    }

    /// Looks up a service principal application id by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails. `Ok(None)` means not found.
    #[instrument(skip(self))]
    pub async fn find_service_principal_app_id(
        &self,
        scope: &Scope,
        id: &str,
    ) -> DatabricksResult<Option<String>> {
        self.find_first(Endpoint::ServicePrincipals, scope, "id", id, |sp: ServicePrincipal| {
            sp.application_id
        })
        .await
    }

    // ------------------------------------------------------------------
    // Principals
    // ------------------------------------------------------------------

    /// Gets a user, group or service principal by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub async fn get_principal(
        &self,
        scope: &Scope,
        kind: PrincipalKind,
        id: &str,
    ) -> DatabricksResult<(Principal, RateLimitInfo)> {
        Ok(match kind {
            PrincipalKind::User => {
                let (u, rl) = self.get_user(scope, id).await?;
                (Principal::User(u), rl)
            }
            PrincipalKind::Group => {
                let (g, rl) = self.get_group(scope, id).await?;
                (Principal::Group(g), rl)
            }
            PrincipalKind::ServicePrincipal => {
                let (sp, rl) = self.get_service_principal(scope, id).await?;
                (Principal::ServicePrincipal(sp), rl)
            }
        })
    }

    /// Replaces a user, group or service principal.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub async fn update_principal(
        &self,
        scope: &Scope,
        principal: &Principal,
    ) -> DatabricksResult<RateLimitInfo> {
        match principal {
            Principal::User(u) => self.update_user(scope, u).await,
            Principal::Group(g) => self.update_group(scope, g).await,
            Principal::ServicePrincipal(sp) => self.update_service_principal(scope, sp).await,
        }
    }

    /// Natural key used for a principal in rule sets (username, display name
    /// or application id).
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails. `Ok(None)` means not found.
    pub async fn find_natural_key(
        &self,
        scope: &Scope,
        kind: PrincipalKind,
        id: &str,
    ) -> DatabricksResult<Option<String>> {
        match kind {
            PrincipalKind::User => self.find_username(scope, id).await,
            PrincipalKind::Group => self.find_group_display_name(scope, id).await,
            PrincipalKind::ServicePrincipal => self.find_service_principal_app_id(scope, id).await,
        }
    }

    /// Resolves a natural key back to the platform id.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails. `Ok(None)` means not found.
    pub async fn find_principal_id(
        &self,
        scope: &Scope,
        kind: PrincipalKind,
        key: &str,
    ) -> DatabricksResult<Option<String>> {
        match kind {
            PrincipalKind::User => self.find_user_id(scope, key).await,
            PrincipalKind::Group => self.find_group_id(scope, key).await,
            PrincipalKind::ServicePrincipal => self.find_service_principal_id(scope, key).await,
        }
    }

    // ------------------------------------------------------------------
    // Roles and rule sets
    // ------------------------------------------------------------------

    /// Lists the roles assignable on `target`.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    #[instrument(skip(self))]
    pub async fn list_roles(
        &self,
        scope: &Scope,
        target: &AccessTarget,
    ) -> DatabricksResult<(Vec<Role>, RateLimitInfo)> {
        let url = self.resolver.resolve(Endpoint::Roles, scope)?;
        let resource = ResourceVars::new(target.resource_name(self.account_id()));
        let (res, rate_limit): (RolesResponse, _) =
            self.transport.get(scope, url, &[&resource]).await?;
        Ok((res.roles, rate_limit))
    }

    /// Reads the grant rules of `target`'s rule set and records its etag.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    #[instrument(skip(self))]
    pub async fn list_rule_sets(
        &self,
        scope: &Scope,
        target: &AccessTarget,
    ) -> DatabricksResult<(Vec<RuleSet>, RateLimitInfo)> {
        let url = self.resolver.resolve(Endpoint::RuleSets, scope)?;
        let name = target.rule_set_name(self.account_id());
        let etag = self.etag(&name).await.unwrap_or_default();

        let (res, rate_limit): (RuleSetResponse, _) = self
            .transport
            .get(scope, url, &[&NameVars::new(&name, etag)])
            .await?;

        self.record_etag(&name, res.etag).await;
        Ok((res.grant_rules, rate_limit))
    }

    /// Replaces the grant rules of `target`'s rule set.
    ///
    /// Sends the etag recorded by the last read or write of this rule set.
    /// A stale etag is rejected by the platform and surfaces as an
    /// [`ApiError`](crate::ApiError) with `is_conflict()`; no retry is attempted.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    #[instrument(skip(self, rules), fields(rules = rules.len()))]
    pub async fn update_rule_sets(
        &self,
        scope: &Scope,
        target: &AccessTarget,
        rules: &[RuleSet],
    ) -> DatabricksResult<RateLimitInfo> {
        let url = self.resolver.resolve(Endpoint::RuleSets, scope)?;
        let name = target.rule_set_name(self.account_id());
        let etag = self.etag(&name).await.unwrap_or_default();

        let body = UpdateRuleSetRequest {
            name: &name,
            rule_set: RuleSetBody {
                name: &name,
                etag: &etag,
                grant_rules: rules,
            },
        };

        let (res, rate_limit): (Option<RuleSetResponse>, _) = self
            .transport
            .put(scope, url, Some(&body), &[&NameVars::new(&name, &etag)])
            .await?;

        if let Some(res) = res.filter(|r| !r.etag.is_empty()) {
            self.record_etag(&name, res.etag).await;
        }
        Ok(rate_limit)
    }

    // ------------------------------------------------------------------
    // Workspaces
    // ------------------------------------------------------------------

    /// Lists the account's workspaces.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    #[instrument(skip(self))]
    pub async fn list_workspaces(&self) -> DatabricksResult<(Vec<Workspace>, RateLimitInfo)> {
        let scope = Scope::Account;
        let url = self.resolver.resolve(Endpoint::Workspaces, &scope)?;
        let (workspaces, rate_limit): (Option<Vec<Workspace>>, _) =
            self.transport.get(&scope, url, &[]).await?;
        Ok((workspaces.unwrap_or_default(), rate_limit))
    }

    /// Lists a workspace's permission assignments.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails. Workspaces without the
    /// permission assignment API answer 400; see
    /// [`ApiError::is_permission_api_unavailable`](crate::ApiError::is_permission_api_unavailable).
    #[instrument(skip(self))]
    pub async fn list_workspace_members(
        &self,
        workspace_id: i64,
    ) -> DatabricksResult<(Vec<WorkspaceAssignment>, RateLimitInfo)> {
        let scope = Scope::Account;
        let id = workspace_id.to_string();
        let url = self.resolver.resolve_with(
            Endpoint::Workspaces,
            &scope,
            &[&id, PERMISSION_ASSIGNMENTS],
        )?;
        let (res, rate_limit): (AssignmentsResponse, _) =
            self.transport.get(&scope, url, &[]).await?;
        Ok((res.permission_assignments, rate_limit))
    }

    /// Grants a principal `USER` access to a workspace.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    #[instrument(skip(self))]
    pub async fn create_or_update_workspace_member(
        &self,
        workspace_id: i64,
        principal_id: &str,
    ) -> DatabricksResult<RateLimitInfo> {
        let body = WorkspacePermissions {
            permissions: ["USER"],
        };
        self.put_workspace_member(workspace_id, principal_id, Some(&body))
            .await
    }

    /// Removes a principal from a workspace (a bodiless PUT).
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    #[instrument(skip(self))]
    pub async fn remove_workspace_member(
        &self,
        workspace_id: i64,
        principal_id: &str,
    ) -> DatabricksResult<RateLimitInfo> {
        self.put_workspace_member(workspace_id, principal_id, None)
            .await
    }

    async fn put_workspace_member(
        &self,
        workspace_id: i64,
        principal_id: &str,
        body: Option<&WorkspacePermissions>,
    ) -> DatabricksResult<RateLimitInfo> {
        let scope = Scope::Account;
        let id = workspace_id.to_string();
        let url = self.resolver.resolve_with(
            Endpoint::Workspaces,
            &scope,
            &[&id, PERMISSION_ASSIGNMENTS, "principals", principal_id],
        )?;
        let (_, rate_limit): (IgnoredAny, _) = self.transport.put(&scope, url, body, &[]).await?;
        Ok(rate_limit)
    }
}

fn require_account_scope(scope: &Scope, operation: &str) -> DatabricksResult<()> {
    if scope.is_account() {
        Ok(())
    } else {
        Err(DatabricksError::InvalidScope(format!(
            "{operation} is only available on the account API, got {scope}"
        )))
    }
}
