//! Service principal resources.
//!
//! Roles on a service principal live in its rule set, which is addressed by
//! application id rather than by the opaque platform id.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::instrument;

use crate::client::{AccessTarget, DatabricksClient};
use crate::endpoints::Scope;
use crate::error::DatabricksResult;
use crate::helpers::{
    require_principal, rule_principal_ref, rule_principal_resource, scope_for_parent,
    scope_from_profile, PROFILE_PARENT_ID, PROFILE_PARENT_TYPE,
};
use crate::models::ServicePrincipal;
use crate::pagination::{parse_page_token, prepare_next_token, RESOURCES_PAGE_SIZE};
use crate::rule_sets::RoleMatch;
use crate::syncer::{
    Entitlement, Grant, Resource, ResourceCache, ResourceId, ResourceSyncer, ResourceType,
    SyncPage, ACCOUNT, SERVICE_PRINCIPAL,
};
use crate::vars::{AttrVars, PaginationVars};

const PROFILE_APPLICATION_ID: &str = "application_id";

pub struct ServicePrincipalSyncer {
    client: Arc<DatabricksClient>,
    cache: Arc<ResourceCache>,
}

impl ServicePrincipalSyncer {
    #[must_use]
    pub fn new(client: Arc<DatabricksClient>, cache: Arc<ResourceCache>) -> Self {
        Self { client, cache }
    }
}

fn service_principal_resource(sp: &ServicePrincipal, parent: &ResourceId) -> Resource {
    let resource = Resource::new(&SERVICE_PRINCIPAL, &sp.id, &sp.display_name)
        .with_profile(PROFILE_APPLICATION_ID, sp.application_id.as_str())
        .with_profile("display_name", sp.display_name.as_str())
        .with_profile(PROFILE_PARENT_TYPE, parent.resource_type.as_str())
        .with_profile(PROFILE_PARENT_ID, parent.resource.as_str());

    if parent.resource_type == ACCOUNT.id {
        resource.with_parent(Some(parent.clone()))
    } else {
        resource
    }
}

/// Scope and application id recorded on a service principal resource.
fn rule_set_target(resource: &Resource) -> DatabricksResult<(Scope, AccessTarget)> {
    let scope = scope_from_profile(resource)?;
    let application_id = resource.require_profile_str(PROFILE_APPLICATION_ID)?;
    Ok((scope, AccessTarget::service_principal(application_id)))
}

#[async_trait]
impl ResourceSyncer for ServicePrincipalSyncer {
    fn resource_type(&self) -> &'static ResourceType {
        &SERVICE_PRINCIPAL
    }

    #[instrument(skip(self))]
    async fn list(
        &self,
        parent: Option<&ResourceId>,
        page_token: &str,
    ) -> DatabricksResult<SyncPage<Resource>> {
        let Some(parent) = parent else {
            return Ok(SyncPage::empty());
        };

        let scope = scope_for_parent(Some(parent));
        let (mut bag, start) = parse_page_token(page_token, SERVICE_PRINCIPAL.id)?;

        let page = self
            .client
            .list_service_principals(
                &scope,
                &[
                    &PaginationVars::new(start, RESOURCES_PAGE_SIZE),
                    &AttrVars::service_principal(),
                ],
            )
            .await?;

        let resources = page
            .items
            .iter()
            .map(|sp| service_principal_resource(sp, parent))
            .collect();

        let next = bag.next_token(&prepare_next_token(start, page.items.len(), page.total))?;
        Ok(SyncPage::new(resources, next).with_rate_limit(page.rate_limit))
    }

    async fn entitlements(
        &self,
        resource: &Resource,
        _page_token: &str,
    ) -> DatabricksResult<SyncPage<Entitlement>> {
        let (scope, target) = rule_set_target(resource)?;
        let (roles, rate_limit) = self.client.list_roles(&scope, &target).await?;

        let entitlements = roles
            .iter()
            .map(|role| {
                Entitlement::permission(resource, &role.name)
                    .with_display_name(format!("{} role", role.name))
                    .with_description(format!("{} role in Databricks", role.name))
            })
            .collect();

        Ok(SyncPage::last(entitlements).with_rate_limit(rate_limit))
    }

    #[instrument(skip(self, resource, _page_token), fields(service_principal = %resource.id.resource))]
    async fn grants(
        &self,
        resource: &Resource,
        _page_token: &str,
    ) -> DatabricksResult<SyncPage<Grant>> {
        let (scope, target) = rule_set_target(resource)?;
        let (rules, rate_limit) = self.client.list_rule_sets(&scope, &target).await?;

        let mut grants = Vec::new();
        for rule in &rules {
            for raw in &rule.principals {
                let (principal, expandable) =
                    rule_principal_resource(&self.client, &self.cache, &scope, raw).await?;
                grants.push(Grant::new(resource, &rule.role, principal).with_expandable(expandable));
            }
        }

        Ok(SyncPage::last(grants).with_rate_limit(rate_limit))
    }

    #[instrument(skip(self, entitlement), fields(slug = %entitlement.slug))]
    async fn grant(
        &self,
        principal: &ResourceId,
        entitlement: &Entitlement,
    ) -> DatabricksResult<()> {
        require_principal(principal, "service principal permissions")?;
        let (scope, target) = rule_set_target(&entitlement.resource)?;
        let principal = rule_principal_ref(&self.client, &scope, principal).await?;

        self.client
            .grant_rule(
                &scope,
                &target,
                RoleMatch::Exact(&entitlement.slug),
                &entitlement.slug,
                &principal,
            )
            .await?;
        Ok(())
    }

    #[instrument(skip(self, grant), fields(grant = %grant.id))]
    async fn revoke(&self, grant: &Grant) -> DatabricksResult<()> {
        require_principal(&grant.principal, "service principal permissions")?;
        let (scope, target) = rule_set_target(&grant.entitlement.resource)?;
        let principal = rule_principal_ref(&self.client, &scope, &grant.principal).await?;

        self.client
            .revoke_rule(
                &scope,
                &target,
                RoleMatch::Exact(&grant.entitlement.slug),
                &principal,
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_set_target_from_profile() {
        let sp = ServicePrincipal {
            id: "9".into(),
            display_name: "ci-bot".into(),
            active: true,
            application_id: "app-1".into(),
            ..ServicePrincipal::default()
        };

        let r = service_principal_resource(&sp, &ResourceId::new("workspace", "dbc-1"));
        assert!(r.parent.is_none());
        let (scope, target) = rule_set_target(&r).unwrap();
        assert_eq!(scope, Scope::Workspace("dbc-1".into()));
        assert_eq!(target, AccessTarget::service_principal("app-1"));

        let r = service_principal_resource(&sp, &ResourceId::new("account", "acc"));
        assert_eq!(r.parent, Some(ResourceId::new("account", "acc")));
        assert_eq!(rule_set_target(&r).unwrap().0, Scope::Account);
    }
}
