//! Static account roles and workspace entitlements.
//!
//! Databricks has no endpoint listing the holders of a role, so grants are
//! found by paging through users, groups and service principals in turn and
//! checking each one's `roles` (account) or `entitlements` (workspace).

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, instrument};

use crate::account::ACCOUNT_ADMIN_ROLE;
use crate::client::DatabricksClient;
use crate::endpoints::Scope;
use crate::error::{DatabricksError, DatabricksResult};
use crate::helpers::{
    account_resource_id, expand_group_grant, principal_platform_id, require_principal,
    scope_from_profile, workspace_role_name, PROFILE_PARENT_ID, PROFILE_PARENT_TYPE,
};
use crate::models::{HasPermissions, PermissionKind};
use crate::pagination::{parse_page_token, prepare_next_token, PageState, RESOURCES_PAGE_SIZE};
use crate::syncer::{
    Entitlement, Grant, Resource, ResourceCache, ResourceId, ResourceSyncer, ResourceType,
    SyncPage, ACCOUNT, GROUP, MEMBER_ENTITLEMENT, ROLE, SERVICE_PRINCIPAL, USER, WORKSPACE,
};
use crate::vars::{AttrVars, PaginationVars};

/// Workspace entitlement granting access to the workspace.
pub const WORKSPACE_ACCESS: &str = "workspace-access";
/// Workspace entitlement granting Databricks SQL access.
pub const SQL_ACCESS: &str = "databricks-sql-access";
/// Workspace entitlement allowing cluster creation.
pub const CLUSTER_CREATE: &str = "allow-cluster-create";
/// Workspace entitlement allowing instance pool creation.
pub const INSTANCE_POOL_CREATE: &str = "allow-instance-pool-create";

/// Roles listed under the account.
pub const ACCOUNT_ROLES: [&str; 1] = [ACCOUNT_ADMIN_ROLE];

/// Entitlements listed under each workspace.
pub const WORKSPACE_ENTITLEMENTS: [&str; 4] = [
    WORKSPACE_ACCESS,
    SQL_ACCESS,
    CLUSTER_CREATE,
    INSTANCE_POOL_CREATE,
];

const PROFILE_ROLE_NAME: &str = "role_name";

pub struct RoleSyncer {
    client: Arc<DatabricksClient>,
    cache: Arc<ResourceCache>,
}

impl RoleSyncer {
    #[must_use]
    pub fn new(client: Arc<DatabricksClient>, cache: Arc<ResourceCache>) -> Self {
        Self { client, cache }
    }

    async fn user_grants(
        &self,
        resource: &Resource,
        scope: &Scope,
        role: &str,
        start: u32,
    ) -> DatabricksResult<(Vec<Grant>, String)> {
        let page = self
            .client
            .list_users(
                scope,
                &[
                    &PaginationVars::new(start, RESOURCES_PAGE_SIZE),
                    &AttrVars::user_roles(),
                ],
            )
            .await?;

        let kind = PermissionKind::for_scope(scope);
        let grants = page
            .items
            .iter()
            .filter(|u| u.has_permission(kind, role))
            .map(|u| Grant::new(resource, MEMBER_ENTITLEMENT, ResourceId::new(USER.id, &u.id)))
            .collect();

        Ok((
            grants,
            prepare_next_token(start, page.items.len(), page.total),
        ))
    }

    async fn group_grants(
        &self,
        resource: &Resource,
        scope: &Scope,
        role: &str,
        start: u32,
    ) -> DatabricksResult<(Vec<Grant>, String)> {
        let page = self
            .client
            .list_groups(
                scope,
                &[
                    &PaginationVars::new(start, RESOURCES_PAGE_SIZE),
                    &AttrVars::group_roles(),
                ],
            )
            .await?;

        let kind = PermissionKind::for_scope(scope);
        let account = account_resource_id(&self.client);
        let mut grants = Vec::new();
        // Workspace-local groups (admins, users) are skipped.
        for group in page
            .items
            .iter()
            .filter(|g| g.is_account_group() && g.has_permission(kind, role))
        {
            let (principal, expandable) =
                expand_group_grant(&self.cache, &group.id, &account).await;
            grants.push(
                Grant::new(resource, MEMBER_ENTITLEMENT, principal)
                    .with_expandable(Some(expandable)),
            );
        }

        Ok((
            grants,
            prepare_next_token(start, page.items.len(), page.total),
        ))
    }

    async fn service_principal_grants(
        &self,
        resource: &Resource,
        scope: &Scope,
        role: &str,
        start: u32,
    ) -> DatabricksResult<(Vec<Grant>, String)> {
        let page = self
            .client
            .list_service_principals(
                scope,
                &[
                    &PaginationVars::new(start, RESOURCES_PAGE_SIZE),
                    &AttrVars::service_principal_roles(),
                ],
            )
            .await?;

        let kind = PermissionKind::for_scope(scope);
        let grants = page
            .items
            .iter()
            .filter(|sp| sp.has_permission(kind, role))
            .map(|sp| {
                Grant::new(
                    resource,
                    MEMBER_ENTITLEMENT,
                    ResourceId::new(SERVICE_PRINCIPAL.id, &sp.id),
                )
            })
            .collect();

        Ok((
            grants,
            prepare_next_token(start, page.items.len(), page.total),
        ))
    }

    /// Adds or removes the role on the principal and writes it back.
    async fn set_permission(
        &self,
        principal: &ResourceId,
        role: &Resource,
        granted: bool,
    ) -> DatabricksResult<()> {
        let kind = require_principal(principal, "role membership")?;
        let scope = scope_from_profile(role)?;
        let permission = permission_name(role, &scope)?;
        let permission_kind = PermissionKind::for_scope(&scope);

        let id = principal_platform_id(principal)?;
        let (mut target, _) = self.client.get_principal(&scope, kind, &id).await?;

        let changed = if granted {
            target.grant_permission(permission_kind, &permission)
        } else {
            target.revoke_permission(permission_kind, &permission)
        };
        if !changed {
            info!(
                principal = %principal,
                permission = %permission,
                granted,
                "Role membership already in the requested state"
            );
            return Ok(());
        }

        self.client.update_principal(&scope, &target).await?;
        Ok(())
    }
}

fn role_resource(role: &str, parent: &ResourceId) -> Resource {
    let id = if parent.resource_type == WORKSPACE.id {
        format!("{}:{role}", parent.resource)
    } else {
        role.to_string()
    };

    Resource::new(&ROLE, id, role)
        .with_parent(Some(parent.clone()))
        .with_profile(PROFILE_ROLE_NAME, role)
        .with_profile(PROFILE_PARENT_TYPE, parent.resource_type.as_str())
        .with_profile(PROFILE_PARENT_ID, parent.resource.as_str())
}

/// Role or entitlement name a role resource stands for.
fn permission_name(role: &Resource, scope: &Scope) -> DatabricksResult<String> {
    let name = if scope.is_account() {
        Some(role.id.resource.as_str())
    } else {
        workspace_role_name(&role.id.resource)
    };

    name.or_else(|| role.profile_str(PROFILE_ROLE_NAME))
        .map(str::to_string)
        .ok_or_else(|| {
            DatabricksError::InvalidResourceId(format!("{}: cannot derive role name", role.id))
        })
}

#[async_trait]
impl ResourceSyncer for RoleSyncer {
    fn resource_type(&self) -> &'static ResourceType {
        &ROLE
    }

    async fn list(
        &self,
        parent: Option<&ResourceId>,
        _page_token: &str,
    ) -> DatabricksResult<SyncPage<Resource>> {
        let Some(parent) = parent else {
            return Ok(SyncPage::empty());
        };

        let names: &[&str] = match parent.resource_type.as_str() {
            t if t == ACCOUNT.id => &ACCOUNT_ROLES,
            t if t == WORKSPACE.id => &WORKSPACE_ENTITLEMENTS,
            _ => &[],
        };

        Ok(SyncPage::last(
            names.iter().map(|r| role_resource(r, parent)).collect(),
        ))
    }

    async fn entitlements(
        &self,
        resource: &Resource,
        _page_token: &str,
    ) -> DatabricksResult<SyncPage<Entitlement>> {
        let name = &resource.display_name;
        Ok(SyncPage::last(vec![Entitlement::assignment(
            resource,
            MEMBER_ENTITLEMENT,
        )
        .with_display_name(format!("{name} role"))
        .with_description(format!("{name} Databricks role"))]))
    }

    #[instrument(skip(self, resource), fields(role = %resource.id.resource))]
    async fn grants(
        &self,
        resource: &Resource,
        page_token: &str,
    ) -> DatabricksResult<SyncPage<Grant>> {
        let scope = scope_from_profile(resource)?;
        let role = resource.require_profile_str(PROFILE_ROLE_NAME)?;
        let (mut bag, start) = parse_page_token(page_token, ROLE.id)?;

        let frame = bag.resource_type_id().to_string();
        let grants = match frame.as_str() {
            t if t == ROLE.id => {
                bag.pop();
                bag.push(PageState::for_type(USER.id));
                bag.push(PageState::for_type(GROUP.id));
                bag.push(PageState::for_type(SERVICE_PRINCIPAL.id));
                Vec::new()
            }
            t if t == USER.id => {
                let (grants, next) = self.user_grants(resource, &scope, role, start).await?;
                bag.next(&next)?;
                grants
            }
            t if t == GROUP.id => {
                let (grants, next) = self.group_grants(resource, &scope, role, start).await?;
                bag.next(&next)?;
                grants
            }
            t if t == SERVICE_PRINCIPAL.id => {
                let (grants, next) = self
                    .service_principal_grants(resource, &scope, role, start)
                    .await?;
                bag.next(&next)?;
                grants
            }
            other => {
                return Err(DatabricksError::InvalidPageToken(format!(
                    "unexpected resource type {other}"
                )))
            }
        };

        Ok(SyncPage::new(grants, bag.marshal()?))
    }

    #[instrument(skip(self, entitlement), fields(role = %entitlement.resource.id.resource))]
    async fn grant(
        &self,
        principal: &ResourceId,
        entitlement: &Entitlement,
    ) -> DatabricksResult<()> {
        self.set_permission(principal, &entitlement.resource, true)
            .await
    }

    #[instrument(skip(self, grant), fields(grant = %grant.id))]
    async fn revoke(&self, grant: &Grant) -> DatabricksResult<()> {
        self.set_permission(&grant.principal, &grant.entitlement.resource, false)
            .await
    }
}
