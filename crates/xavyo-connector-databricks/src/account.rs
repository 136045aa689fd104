//! Account resource: the root of the resource tree.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, instrument};

use crate::client::{AccessTarget, DatabricksClient};
use crate::endpoints::Scope;
use crate::error::DatabricksResult;
use crate::helpers::{rule_principal_ref, rule_principal_resource};
use crate::rule_sets::{qualified_role, RoleMatch};
use crate::syncer::{
    Entitlement, Grant, Resource, ResourceCache, ResourceId, ResourceSyncer, ResourceType,
    SyncPage, ACCOUNT, GROUP, ROLE, SERVICE_PRINCIPAL, USER, WORKSPACE,
};

/// Account role granting full account administration.
pub const ACCOUNT_ADMIN_ROLE: &str = "account_admin";
/// Account role granting marketplace administration.
pub const MARKETPLACE_ADMIN_ROLE: &str = "marketplace.admin";

pub struct AccountSyncer {
    client: Arc<DatabricksClient>,
    cache: Arc<ResourceCache>,
}

impl AccountSyncer {
    #[must_use]
    pub fn new(client: Arc<DatabricksClient>, cache: Arc<ResourceCache>) -> Self {
        Self { client, cache }
    }

    fn account_resource(&self) -> Resource {
        let account_id = self.client.account_id();
        let mut resource =
            Resource::new(&ACCOUNT, account_id, account_id).with_child_type(&WORKSPACE);

        if self.client.is_account_api_available() {
            resource = resource
                .with_child_type(&USER)
                .with_child_type(&GROUP)
                .with_child_type(&SERVICE_PRINCIPAL)
                .with_child_type(&ROLE);
        }

        resource
    }
}

#[async_trait]
impl ResourceSyncer for AccountSyncer {
    fn resource_type(&self) -> &'static ResourceType {
        &ACCOUNT
    }

    async fn list(
        &self,
        _parent: Option<&ResourceId>,
        _page_token: &str,
    ) -> DatabricksResult<SyncPage<Resource>> {
        Ok(SyncPage::last(vec![self.account_resource()]))
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
        Ok(SyncPage::last(vec![Entitlement::permission(
            resource,
            MARKETPLACE_ADMIN_ROLE,
        )
        .with_display_name(format!("{name} {MARKETPLACE_ADMIN_ROLE} role"))
        .with_description(format!(
            "{name} {MARKETPLACE_ADMIN_ROLE} role in Databricks"
        ))]))
    }

    #[instrument(skip(self, resource, _page_token), fields(account = %resource.id.resource))]
    async fn grants(
        &self,
        resource: &Resource,
        _page_token: &str,
    ) -> DatabricksResult<SyncPage<Grant>> {
        if !self.client.is_account_api_available() {
            return Ok(SyncPage::empty());
        }

        let scope = Scope::Account;
        let (rules, rate_limit) = self
            .client
            .list_rule_sets(&scope, &AccessTarget::Account)
            .await?;

        let role = RoleMatch::Containing(MARKETPLACE_ADMIN_ROLE);
        let mut grants = Vec::new();
        for rule in rules.iter().filter(|r| role.matches(&r.role)) {
            for raw in &rule.principals {
                let (principal, expandable) =
                    rule_principal_resource(&self.client, &self.cache, &scope, raw).await?;
                grants.push(
                    Grant::new(resource, MARKETPLACE_ADMIN_ROLE, principal)
                        .with_expandable(expandable),
                );
            }
        }

        debug!(count = grants.len(), "Listed account grants");
        Ok(SyncPage::last(grants).with_rate_limit(rate_limit))
    }

    #[instrument(skip(self, entitlement), fields(slug = %entitlement.slug))]
    async fn grant(
        &self,
        principal: &ResourceId,
        entitlement: &Entitlement,
    ) -> DatabricksResult<()> {
        let scope = Scope::Account;
        let principal = rule_principal_ref(&self.client, &scope, principal).await?;
        let slug = entitlement.slug.as_str();

        self.client
            .grant_rule(
                &scope,
                &AccessTarget::Account,
                RoleMatch::Containing(slug),
                &qualified_role(slug),
                &principal,
            )
            .await?;
        Ok(())
    }

    #[instrument(skip(self, grant), fields(grant = %grant.id))]
    async fn revoke(&self, grant: &Grant) -> DatabricksResult<()> {
        let scope = Scope::Account;
        let principal = rule_principal_ref(&self.client, &scope, &grant.principal).await?;

        self.client
            .revoke_rule(
                &scope,
                &AccessTarget::Account,
                RoleMatch::Containing(&grant.entitlement.slug),
                &principal,
            )
            .await?;
        Ok(())
    }
}
