//! Workspace resources and workspace membership.
//!
//! Membership is managed through the account API's permission assignments,
//! so entitlements and grants are only produced when that API is reachable.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, instrument, warn};

use crate::client::DatabricksClient;
use crate::error::{DatabricksError, DatabricksResult};
use crate::helpers::{
    account_resource_id, principal_platform_id, principal_resource, require_principal,
};
use crate::models::Workspace;
use crate::syncer::{
    Entitlement, Grant, Resource, ResourceCache, ResourceId, ResourceSyncer, ResourceType,
    SyncPage, MEMBER_ENTITLEMENT, ROLE, WORKSPACE,
};

const PROFILE_WORKSPACE_ID: &str = "workspace_id";

pub struct WorkspaceSyncer {
    client: Arc<DatabricksClient>,
    cache: Arc<ResourceCache>,
    /// Deployment names to sync; empty means all.
    allowed: Vec<String>,
}

impl WorkspaceSyncer {
    #[must_use]
    pub fn new(
        client: Arc<DatabricksClient>,
        cache: Arc<ResourceCache>,
        allowed: Vec<String>,
    ) -> Self {
        Self {
            client,
            cache,
            allowed,
        }
    }

    fn is_allowed(&self, workspace: &Workspace) -> bool {
        self.allowed.is_empty() || self.allowed.contains(&workspace.deployment_name)
    }
}

fn workspace_resource(workspace: &Workspace, parent: &ResourceId) -> Resource {
    Resource::new(&WORKSPACE, &workspace.deployment_name, &workspace.name)
        .with_parent(Some(parent.clone()))
        .with_profile(PROFILE_WORKSPACE_ID, workspace.id)
        .with_child_type(&ROLE)
}

fn workspace_id(resource: &Resource) -> DatabricksResult<i64> {
    resource.profile_i64(PROFILE_WORKSPACE_ID).ok_or_else(|| {
        DatabricksError::InvalidResourceId(format!("{}: missing workspace id", resource.id))
    })
}

#[async_trait]
impl ResourceSyncer for WorkspaceSyncer {
    fn resource_type(&self) -> &'static ResourceType {
        &WORKSPACE
    }

    async fn list(
        &self,
        parent: Option<&ResourceId>,
        _page_token: &str,
    ) -> DatabricksResult<SyncPage<Resource>> {
        let Some(parent) = parent else {
            return Ok(SyncPage::empty());
        };

        let (workspaces, rate_limit) = self.client.list_workspaces().await?;
        let resources = workspaces
            .iter()
            .filter(|w| self.is_allowed(w))
            .map(|w| workspace_resource(w, parent))
            .collect();

        Ok(SyncPage::last(resources).with_rate_limit(rate_limit))
    }

    async fn entitlements(
        &self,
        resource: &Resource,
        _page_token: &str,
    ) -> DatabricksResult<SyncPage<Entitlement>> {
        if !self.client.is_account_api_available() {
            return Ok(SyncPage::empty());
        }

        let name = &resource.display_name;
        Ok(SyncPage::last(vec![Entitlement::assignment(
            resource,
            MEMBER_ENTITLEMENT,
        )
        .with_display_name(format!("{name} {MEMBER_ENTITLEMENT}"))
        .with_description(format!("{name} {MEMBER_ENTITLEMENT} in Databricks"))]))
    }

    #[instrument(skip(self, resource, _page_token), fields(workspace = %resource.id.resource))]
    async fn grants(
        &self,
        resource: &Resource,
        _page_token: &str,
    ) -> DatabricksResult<SyncPage<Grant>> {
        if !self.client.is_account_api_available() {
            return Ok(SyncPage::empty());
        }

        let workspace_id = workspace_id(resource)?;
        let (assignments, rate_limit) = match self.client.list_workspace_members(workspace_id).await
        {
            Ok(res) => res,
            Err(e) => {
                if let Some(api) = e.as_api() {
                    if api.is_permission_api_unavailable() {
                        info!(
                            workspace_id,
                            workspace_name = %resource.display_name,
                            "Workspace does not have the permission assignment API, skipping"
                        );
                        return Ok(SyncPage::empty().with_rate_limit(api.rate_limit.clone()));
                    }
                    if api.status == 400 {
                        warn!(
                            workspace_id,
                            workspace_name = %resource.display_name,
                            error_message = %api.message,
                            error_detail = %api.detail,
                            "Unexpected 400 listing workspace members"
                        );
                    }
                }
                return Err(e);
            }
        };

        debug!(workspace_id, count = assignments.len(), "Listed workspace assignments");

        let account = account_resource_id(&self.client);
        let mut grants = Vec::with_capacity(assignments.len());
        for assignment in &assignments {
            let principal = assignment.principal.as_ref().ok_or_else(|| {
                DatabricksError::InvalidPrincipal("assignment without principal".into())
            })?;
            let kind = principal.kind().ok_or_else(|| {
                DatabricksError::InvalidPrincipal(format!("unknown principal {}", principal.id))
            })?;

            let (principal_id, expandable) = principal_resource(
                &self.cache,
                kind,
                &principal.id.to_string(),
                &account,
            )
            .await;

            grants.push(
                Grant::new(resource, MEMBER_ENTITLEMENT, principal_id).with_expandable(expandable),
            );
        }

        Ok(SyncPage::last(grants).with_rate_limit(rate_limit))
    }

    #[instrument(skip(self, entitlement), fields(workspace = %entitlement.resource.id.resource))]
    async fn grant(
        &self,
        principal: &ResourceId,
        entitlement: &Entitlement,
    ) -> DatabricksResult<()> {
        require_principal(principal, "workspace membership")?;
        let workspace_id = workspace_id(&entitlement.resource)?;
        let principal_id = principal_platform_id(principal)?;

        self.client
            .create_or_update_workspace_member(workspace_id, &principal_id)
            .await?;
        Ok(())
    }

    #[instrument(skip(self, grant), fields(grant = %grant.id))]
    async fn revoke(&self, grant: &Grant) -> DatabricksResult<()> {
        require_principal(&grant.principal, "workspace membership")?;
        let workspace_id = workspace_id(&grant.entitlement.resource)?;
        let principal_id = principal_platform_id(&grant.principal)?;

        self.client
            .remove_workspace_member(workspace_id, &principal_id)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workspace_resource_shape() {
        let ws = Workspace {
            id: 1234,
            name: "Production".into(),
            status: "RUNNING".into(),
            deployment_name: "dbc-prod".into(),
        };
        let parent = ResourceId::new("account", "acc");
        let r = workspace_resource(&ws, &parent);

        assert_eq!(r.id, ResourceId::new("workspace", "dbc-prod"));
        assert_eq!(r.display_name, "Production");
        assert_eq!(r.parent, Some(parent));
        assert_eq!(workspace_id(&r).unwrap(), 1234);
        assert_eq!(r.child_types, vec!["role"]);
    }
}
