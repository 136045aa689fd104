//! Helpers shared by the resource adapters.

use tracing::warn;

use crate::client::DatabricksClient;
use crate::endpoints::Scope;
use crate::error::{DatabricksError, DatabricksResult};
use crate::models::{PrincipalKind, PrincipalRef};
use crate::syncer::{
    entitlement_id, GrantExpandable, Resource, ResourceCache, ResourceId, ACCOUNT, GROUP,
    MEMBER_ENTITLEMENT, SERVICE_PRINCIPAL, USER, WORKSPACE,
};

pub(crate) const PROFILE_PARENT_TYPE: &str = "parent_type";
pub(crate) const PROFILE_PARENT_ID: &str = "parent_id";

/// Splits `<type>/<id>` or `<parent type>/<parent id>/<type>/<id>`.
///
/// # Errors
///
/// Returns `InvalidResourceId` for any other shape.
pub fn parse_resource_id(id: &str) -> DatabricksResult<(Option<ResourceId>, ResourceId)> {
    let parts: Vec<&str> = id.split('/').collect();
    match parts.as_slice() {
        [kind, res] => Ok((None, ResourceId::new(*kind, *res))),
        [parent_kind, parent, kind, res] => Ok((
            Some(ResourceId::new(*parent_kind, *parent)),
            ResourceId::new(*kind, *res),
        )),
        _ => Err(DatabricksError::InvalidResourceId(id.to_string())),
    }
}

/// Resource id of a group: `group/<id>`, prefixed by its parent when known.
#[must_use]
pub fn group_resource_id(group_id: &str, parent: Option<&ResourceId>) -> String {
    match parent {
        Some(p) => format!("{}/{}/{}/{group_id}", p.resource_type, p.resource, GROUP.id),
        None => format!("{}/{group_id}", GROUP.id),
    }
}

/// API scope for resources listed under `parent`.
#[must_use]
pub fn scope_for_parent(parent: Option<&ResourceId>) -> Scope {
    match parent {
        Some(p) if p.resource_type == WORKSPACE.id => Scope::Workspace(p.resource.clone()),
        _ => Scope::Account,
    }
}

/// API scope recorded in a resource's `parent_type`/`parent_id` profile.
///
/// # Errors
///
/// Returns `InvalidResourceId` if the profile lacks either key.
pub fn scope_from_profile(resource: &Resource) -> DatabricksResult<Scope> {
    let parent_type = resource.require_profile_str(PROFILE_PARENT_TYPE)?;
    let parent_id = resource.require_profile_str(PROFILE_PARENT_ID)?;
    Ok(if parent_type == WORKSPACE.id {
        Scope::Workspace(parent_id.to_string())
    } else {
        Scope::Account
    })
}

/// Checks that `principal` is a user, group or service principal.
///
/// # Errors
///
/// Returns `InvalidPrincipal` otherwise.
pub fn require_principal(principal: &ResourceId, target: &str) -> DatabricksResult<PrincipalKind> {
    principal.principal_kind().ok_or_else(|| {
        warn!(
            principal = %principal,
            principal_type = %principal.resource_type,
            "Only users, groups and service principals can be granted {target}"
        );
        DatabricksError::InvalidPrincipal(format!(
            "only users, groups and service principals can be granted {target}"
        ))
    })
}

/// Opaque platform id of a principal resource. Group resources carry a
/// composite id; users and service principals use the platform id directly.
///
/// # Errors
///
/// Returns `InvalidResourceId` for a malformed group id.
pub fn principal_platform_id(principal: &ResourceId) -> DatabricksResult<String> {
    if principal.resource_type == GROUP.id && principal.resource.contains('/') {
        let (_, id) = parse_resource_id(&principal.resource)?;
        Ok(id.resource)
    } else {
        Ok(principal.resource.clone())
    }
}

/// Resource id of the account. Groups are always listed under it.
#[must_use]
pub fn account_resource_id(client: &DatabricksClient) -> ResourceId {
    ResourceId::new(ACCOUNT.id, client.account_id())
}

/// Principal resource for a nested group, with the annotation asking the host
/// to expand the grant to the group's members.
///
/// A cache miss builds the same id the group listing produces under
/// `account`, so grants stay valid when no listing ran in this process.
pub async fn expand_group_grant(
    cache: &ResourceCache,
    group_id: &str,
    account: &ResourceId,
) -> (ResourceId, GrantExpandable) {
    let id = match cache.get(group_id).await {
        Some(resource) => resource.id,
        None => ResourceId::new(GROUP.id, group_resource_id(group_id, Some(account))),
    };
    let expandable = GrantExpandable {
        entitlement_ids: vec![entitlement_id(&id, MEMBER_ENTITLEMENT)],
    };
    (id, expandable)
}

/// Principal resource for a principal found by platform id.
pub async fn principal_resource(
    cache: &ResourceCache,
    kind: PrincipalKind,
    id: &str,
    account: &ResourceId,
) -> (ResourceId, Option<GrantExpandable>) {
    match kind {
        PrincipalKind::User => (ResourceId::new(USER.id, id), None),
        PrincipalKind::ServicePrincipal => (ResourceId::new(SERVICE_PRINCIPAL.id, id), None),
        PrincipalKind::Group => {
            let (rid, expandable) = expand_group_grant(cache, id, account).await;
            (rid, Some(expandable))
        }
    }
}

/// Principal resource for a rule-set principal (`<kind>/<natural key>`).
///
/// # Errors
///
/// Returns `InvalidPrincipal` if the reference is malformed or no longer
/// resolves, or a request error.
pub async fn rule_principal_resource(
    client: &DatabricksClient,
    cache: &ResourceCache,
    scope: &Scope,
    raw: &str,
) -> DatabricksResult<(ResourceId, Option<GrantExpandable>)> {
    let principal: PrincipalRef = raw.parse()?;
    let id = client.resolve_principal_ref(scope, &principal).await?;
    let account = account_resource_id(client);
    Ok(principal_resource(cache, principal.kind, &id, &account).await)
}

/// Rule-set principal for a principal resource.
///
/// # Errors
///
/// Returns `InvalidPrincipal` if the resource is not a principal or no longer
/// exists, or a request error.
pub async fn rule_principal_ref(
    client: &DatabricksClient,
    scope: &Scope,
    principal: &ResourceId,
) -> DatabricksResult<PrincipalRef> {
    let kind = require_principal(principal, "rule-set roles")?;
    let id = principal_platform_id(principal)?;
    client.principal_ref(scope, kind, &id).await
}

/// Workspace entitlement name from a workspace role resource id
/// (`<workspace>:<entitlement>`).
#[must_use]
pub fn workspace_role_name(role_id: &str) -> Option<&str> {
    match role_id.split(':').collect::<Vec<_>>().as_slice() {
        [_, name] if !name.is_empty() => Some(name),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_resource_id() {
        let (parent, id) = parse_resource_id("group/g1").unwrap();
        assert!(parent.is_none());
        assert_eq!(id, ResourceId::new("group", "g1"));

        let (parent, id) = parse_resource_id("workspace/dbc-1/group/g1").unwrap();
        assert_eq!(parent, Some(ResourceId::new("workspace", "dbc-1")));
        assert_eq!(id, ResourceId::new("group", "g1"));

        assert!(parse_resource_id("g1").is_err());
        assert!(parse_resource_id("a/b/c").is_err());
    }

    #[test]
    fn test_group_resource_id() {
        assert_eq!(group_resource_id("g1", None), "group/g1");
        let parent = ResourceId::new("account", "acc");
        assert_eq!(group_resource_id("g1", Some(&parent)), "account/acc/group/g1");
    }

    #[test]
    fn test_scopes() {
        assert_eq!(scope_for_parent(None), Scope::Account);
        assert_eq!(
            scope_for_parent(Some(&ResourceId::new("account", "acc"))),
            Scope::Account
        );
        assert_eq!(
            scope_for_parent(Some(&ResourceId::new("workspace", "dbc-1"))),
            Scope::Workspace("dbc-1".into())
        );

        let role = Resource::new(&crate::syncer::ROLE, "dbc-1:workspace-access", "workspace-access")
            .with_profile(PROFILE_PARENT_TYPE, "workspace")
            .with_profile(PROFILE_PARENT_ID, "dbc-1");
        assert_eq!(
            scope_from_profile(&role).unwrap(),
            Scope::Workspace("dbc-1".into())
        );

        let bare = Resource::new(&crate::syncer::ROLE, "account_admin", "account_admin");
        assert!(scope_from_profile(&bare).is_err());
    }

    #[test]
    fn test_principal_platform_id() {
        assert_eq!(
            principal_platform_id(&ResourceId::new("group", "workspace/dbc-1/group/g1")).unwrap(),
            "g1"
        );
        assert_eq!(
            principal_platform_id(&ResourceId::new("group", "g1")).unwrap(),
            "g1"
        );
        assert_eq!(
            principal_platform_id(&ResourceId::new("user", "42")).unwrap(),
            "42"
        );
    }

    #[test]
    fn test_require_principal() {
        assert_eq!(
            require_principal(&ResourceId::new("user", "1"), "membership").unwrap(),
            PrincipalKind::User
        );
        assert!(matches!(
            require_principal(&ResourceId::new("role", "x"), "membership"),
            Err(DatabricksError::InvalidPrincipal(_))
        ));
    }

    #[test]
    fn test_workspace_role_name() {
        assert_eq!(workspace_role_name("dbc-1:workspace-access"), Some("workspace-access"));
        assert_eq!(workspace_role_name("account_admin"), None);
    }

    #[tokio::test]
    async fn test_expand_group_grant_prefers_cache() {
        let cache = ResourceCache::new();
        let account = ResourceId::new("account", "acc");
        let (id, exp) = expand_group_grant(&cache, "g1", &account).await;
        assert_eq!(id.resource, "account/acc/group/g1");
        assert_eq!(exp.entitlement_ids, vec!["group:account/acc/group/g1:member"]);

        cache
            .set(
                "g1",
                Resource::new(&GROUP, "workspace/dbc-1/group/g1", "Engineers"),
            )
            .await;
        let (id, exp) = expand_group_grant(&cache, "g1", &account).await;
        assert_eq!(id.resource, "workspace/dbc-1/group/g1");
        assert_eq!(
            exp.entitlement_ids,
            vec!["group:workspace/dbc-1/group/g1:member"]
        );
    }
}
