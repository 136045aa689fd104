//! Group resources.
//!
//! Groups expose two kinds of entitlement: `member`, backed by the group's own
//! member list, and one permission per assignable role, backed by the group's
//! rule set.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, instrument};

use crate::client::{AccessTarget, DatabricksClient};
use crate::error::DatabricksResult;
use crate::helpers::{
    account_resource_id, group_resource_id, parse_resource_id, principal_platform_id, principal_resource,
    require_principal, rule_principal_ref, rule_principal_resource, scope_for_parent,
    PROFILE_PARENT_ID, PROFILE_PARENT_TYPE,
};
use crate::models::{Group, Member};
use crate::pagination::{parse_page_token, prepare_next_token, RESOURCES_PAGE_SIZE};
use crate::rule_sets::RoleMatch;
use crate::syncer::{
    Entitlement, Grant, Resource, ResourceCache, ResourceId, ResourceSyncer, ResourceType,
    SyncPage, GROUP, MEMBER_ENTITLEMENT,
};
use crate::vars::{AttrVars, PaginationVars};

const PROFILE_MEMBERS: &str = "members";

pub struct GroupSyncer {
    client: Arc<DatabricksClient>,
    cache: Arc<ResourceCache>,
}

impl GroupSyncer {
    #[must_use]
    pub fn new(client: Arc<DatabricksClient>, cache: Arc<ResourceCache>) -> Self {
        Self { client, cache }
    }
}

fn group_resource(group: &Group, parent: &ResourceId) -> Resource {
    let mut resource = Resource::new(
        &GROUP,
        group_resource_id(&group.id, Some(parent)),
        &group.display_name,
    )
    .with_parent(Some(parent.clone()))
    .with_profile("display_name", group.display_name.as_str())
    .with_profile("group_id", group.id.as_str())
    .with_profile(PROFILE_PARENT_TYPE, parent.resource_type.as_str())
    .with_profile(PROFILE_PARENT_ID, parent.resource.as_str());

    let members: Vec<&str> = group.members.iter().map(|m| m.reference.as_str()).collect();
    if !members.is_empty() {
        resource = resource.with_profile(PROFILE_MEMBERS, members.join(","));
    }

    resource
}

/// Parent and opaque group id encoded in a group resource id.
fn split_group_id(resource: &Resource) -> DatabricksResult<(Option<ResourceId>, String)> {
    let (parent, id) = parse_resource_id(&resource.id.resource)?;
    Ok((parent, id.resource))
}

#[async_trait]
impl ResourceSyncer for GroupSyncer {
    fn resource_type(&self) -> &'static ResourceType {
        &GROUP
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
        let (mut bag, start) = parse_page_token(page_token, GROUP.id)?;
        if page_token.is_empty() {
            self.cache.clear().await;
        }

        let page = self
            .client
            .list_groups(
                &scope,
                &[
                    &PaginationVars::new(start, RESOURCES_PAGE_SIZE),
                    &AttrVars::group(),
                ],
            )
            .await?;

        let mut resources = Vec::with_capacity(page.items.len());
        for group in &page.items {
            let resource = group_resource(group, parent);
            self.cache.set(&group.id, resource.clone()).await;
            resources.push(resource);
        }

        let next = bag.next_token(&prepare_next_token(start, page.items.len(), page.total))?;
        Ok(SyncPage::new(resources, next).with_rate_limit(page.rate_limit))
    }

    #[instrument(skip(self, resource, _page_token), fields(group = %resource.id.resource))]
    async fn entitlements(
        &self,
        resource: &Resource,
        _page_token: &str,
    ) -> DatabricksResult<SyncPage<Entitlement>> {
        let name = &resource.display_name;
        let mut entitlements = vec![Entitlement::assignment(resource, MEMBER_ENTITLEMENT)
            .with_display_name(format!("{name} {MEMBER_ENTITLEMENT}"))
            .with_description(format!("{name} {MEMBER_ENTITLEMENT} in Databricks"))];

        let (_, group_id) = split_group_id(resource)?;
        let scope = scope_for_parent(resource.parent.as_ref());
        let (roles, rate_limit) = self
            .client
            .list_roles(&scope, &AccessTarget::group(group_id))
            .await?;

        entitlements.extend(roles.iter().map(|role| {
            Entitlement::permission(resource, &role.name)
                .with_display_name(format!("{} role", role.name))
                .with_description(format!("{} role in Databricks", role.name))
        }));

        Ok(SyncPage::last(entitlements).with_rate_limit(rate_limit))
    }

    #[instrument(skip(self, resource, _page_token), fields(group = %resource.id.resource))]
    async fn grants(
        &self,
        resource: &Resource,
        _page_token: &str,
    ) -> DatabricksResult<SyncPage<Grant>> {
        let (_, group_id) = split_group_id(resource)?;
        let scope = scope_for_parent(resource.parent.as_ref());
        let mut grants = Vec::new();

        let account = account_resource_id(&self.client);

        if let Some(members) = resource.profile_str(PROFILE_MEMBERS) {
            for reference in members.split(',').filter(|m| !m.is_empty()) {
                let member = Member {
                    reference: reference.to_string(),
                    ..Member::default()
                };
                let (kind, id) = member.parse_ref()?;
                let (principal, expandable) =
                    principal_resource(&self.cache, kind, &id, &account).await;
                grants.push(
                    Grant::new(resource, MEMBER_ENTITLEMENT, principal).with_expandable(expandable),
                );
            }
        }

        let (rules, rate_limit) = self
            .client
            .list_rule_sets(&scope, &AccessTarget::group(&group_id))
            .await?;
        for rule in &rules {
            for raw in &rule.principals {
                let (principal, expandable) =
                    rule_principal_resource(&self.client, &self.cache, &scope, raw).await?;
                grants.push(Grant::new(resource, &rule.role, principal).with_expandable(expandable));
            }
        }

        debug!(count = grants.len(), "Listed group grants");
        Ok(SyncPage::last(grants).with_rate_limit(rate_limit))
    }

    #[instrument(skip(self, entitlement), fields(group = %entitlement.resource.id.resource, slug = %entitlement.slug))]
    async fn grant(
        &self,
        principal: &ResourceId,
        entitlement: &Entitlement,
    ) -> DatabricksResult<()> {
        require_principal(principal, "group permissions")?;
        let (parent, group_id) = split_group_id(&entitlement.resource)?;
        let scope = scope_for_parent(parent.as_ref());

        if entitlement.slug == MEMBER_ENTITLEMENT {
            let member_id = principal_platform_id(principal)?;
            let (mut group, _) = self.client.get_group(&scope, &group_id).await?;

            if !group.add_member(&member_id) {
                info!(member_id = %member_id, "Group already has the member");
                return Ok(());
            }

            self.client.update_group(&scope, &group).await?;
            return Ok(());
        }

        let principal = rule_principal_ref(&self.client, &scope, principal).await?;
        self.client
            .grant_rule(
                &scope,
                &AccessTarget::group(group_id),
                RoleMatch::Exact(&entitlement.slug),
                &entitlement.slug,
                &principal,
            )
            .await?;
        Ok(())
    }

    #[instrument(skip(self, grant), fields(grant = %grant.id))]
    async fn revoke(&self, grant: &Grant) -> DatabricksResult<()> {
        let principal = &grant.principal;
        let entitlement = &grant.entitlement;
        require_principal(principal, "group permissions")?;
        let (parent, group_id) = split_group_id(&entitlement.resource)?;
        let scope = scope_for_parent(parent.as_ref());

        if entitlement.slug == MEMBER_ENTITLEMENT {
            let member_id = principal_platform_id(principal)?;
            let (mut group, _) = self.client.get_group(&scope, &group_id).await?;

            if !group.remove_member(&member_id) {
                info!(member_id = %member_id, "Group does not have the member");
                return Ok(());
            }

            self.client.update_group(&scope, &group).await?;
            return Ok(());
        }

        let principal = rule_principal_ref(&self.client, &scope, principal).await?;
        self.client
            .revoke_rule(
                &scope,
                &AccessTarget::group(group_id),
                RoleMatch::Exact(&entitlement.slug),
                &principal,
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_group_resource_profile() {
        let group: Group = serde_json::from_value(json!({
            "id": "g1",
            "displayName": "Engineers",
            "members": [
                {"value": "7", "$ref": "Users/7"},
                {"value": "g2", "$ref": "Groups/g2"}
            ]
        }))
        .unwrap();
        let parent = ResourceId::new("workspace", "dbc-1");
        let r = group_resource(&group, &parent);

        assert_eq!(r.id.resource, "workspace/dbc-1/group/g1");
        assert_eq!(r.profile_str("group_id"), Some("g1"));
        assert_eq!(r.profile_str("parent_type"), Some("workspace"));
        assert_eq!(r.profile_str("members"), Some("Users/7,Groups/g2"));

        let (p, id) = split_group_id(&r).unwrap();
        assert_eq!(p, Some(parent));
        assert_eq!(id, "g1");
    }

    #[test]
    fn test_group_without_members_has_no_members_profile() {
        let group = Group {
            id: "g1".into(),
            display_name: "Empty".into(),
            ..Group::default()
        };
        let r = group_resource(&group, &ResourceId::new("account", "acc"));
        assert!(r.profile_str("members").is_none());
    }
}
