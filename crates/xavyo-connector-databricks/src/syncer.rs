//! Resource, entitlement and grant vocabulary exchanged with the sync host.

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::RwLock;

use crate::error::{DatabricksError, DatabricksResult};
use crate::models::PrincipalKind;
use crate::rate_limit::RateLimitInfo;

/// Shape a resource type presents to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceTrait {
    User,
    Group,
    Role,
}

/// Static description of a resource type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceType {
    pub id: &'static str,
    pub display_name: &'static str,
    pub traits: &'static [ResourceTrait],
    /// Users carry no entitlements or grants of their own.
    pub skip_entitlements_and_grants: bool,
}

pub const ACCOUNT: ResourceType = ResourceType {
    id: "account",
    display_name: "Account",
    traits: &[],
    skip_entitlements_and_grants: false,
};

pub const WORKSPACE: ResourceType = ResourceType {
    id: "workspace",
    display_name: "Workspace",
    traits: &[ResourceTrait::Group],
    skip_entitlements_and_grants: false,
};

pub const USER: ResourceType = ResourceType {
    id: "user",
    display_name: "User",
    traits: &[ResourceTrait::User],
    skip_entitlements_and_grants: true,
};

pub const GROUP: ResourceType = ResourceType {
    id: "group",
    display_name: "Group",
    traits: &[ResourceTrait::Group],
    skip_entitlements_and_grants: false,
};

pub const SERVICE_PRINCIPAL: ResourceType = ResourceType {
    id: "service_principal",
    display_name: "Service Principal",
    traits: &[ResourceTrait::Group],
    skip_entitlements_and_grants: false,
};

pub const ROLE: ResourceType = ResourceType {
    id: "role",
    display_name: "Role",
    traits: &[ResourceTrait::Role],
    skip_entitlements_and_grants: false,
};

/// Entitlement slug for membership of groups, workspaces and roles.
pub const MEMBER_ENTITLEMENT: &str = "member";

/// Principal resource types every grantable entitlement accepts.
pub const PRINCIPAL_TYPES: [&str; 3] = [USER.id, GROUP.id, SERVICE_PRINCIPAL.id];

/// Typed reference to a resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceId {
    pub resource_type: String,
    pub resource: String,
}

impl ResourceId {
    pub fn new(resource_type: impl Into<String>, resource: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            resource: resource.into(),
        }
    }

    /// Principal kind for user, group and service principal resources.
    #[must_use]
    pub fn principal_kind(&self) -> Option<PrincipalKind> {
        match self.resource_type.as_str() {
            t if t == USER.id => Some(PrincipalKind::User),
            t if t == GROUP.id => Some(PrincipalKind::Group),
            t if t == SERVICE_PRINCIPAL.id => Some(PrincipalKind::ServicePrincipal),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_principal(&self) -> bool {
        self.principal_kind().is_some()
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.resource_type, self.resource)
    }
}

/// User account status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserStatus {
    Enabled,
    Disabled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserEmail {
    pub address: String,
    pub primary: bool,
}

/// Extra attributes of user resources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserDetails {
    pub login: String,
    pub status: UserStatus,
    pub emails: Vec<UserEmail>,
}

/// A synced object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub id: ResourceId,
    pub display_name: String,
    pub parent: Option<ResourceId>,
    /// Free-form attributes; adapters read back what they stored here.
    pub profile: Map<String, Value>,
    /// Resource types the host should list under this resource.
    pub child_types: Vec<String>,
    pub user: Option<UserDetails>,
}

impl Resource {
    pub fn new(
        resource_type: &ResourceType,
        id: impl Into<String>,
        display_name: impl Into<String>,
    ) -> Self {
        Self {
            id: ResourceId::new(resource_type.id, id),
            display_name: display_name.into(),
            parent: None,
            profile: Map::new(),
            child_types: Vec::new(),
            user: None,
        }
    }

    #[must_use]
    pub fn with_parent(mut self, parent: Option<ResourceId>) -> Self {
        self.parent = parent;
        self
    }

    #[must_use]
    pub fn with_profile(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.profile.insert(key.to_string(), value.into());
        self
    }

    #[must_use]
    pub fn with_child_type(mut self, resource_type: &ResourceType) -> Self {
        self.child_types.push(resource_type.id.to_string());
        self
    }

    #[must_use]
    pub fn profile_str(&self, key: &str) -> Option<&str> {
        self.profile.get(key).and_then(Value::as_str)
    }

    #[must_use]
    pub fn profile_i64(&self, key: &str) -> Option<i64> {
        self.profile.get(key).and_then(Value::as_i64)
    }

    /// Profile string that must be present.
    ///
    /// # Errors
    ///
    /// Returns `InvalidResourceId` naming the missing key.
    pub fn require_profile_str(&self, key: &str) -> DatabricksResult<&str> {
        self.profile_str(key).ok_or_else(|| {
            DatabricksError::InvalidResourceId(format!("{}: profile has no {key}", self.id))
        })
    }
}

/// Whether an entitlement models membership or a permission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntitlementPurpose {
    Assignment,
    Permission,
}

/// A grantable capability on a resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entitlement {
    /// `<resource type>:<resource id>:<slug>`.
    pub id: String,
    pub resource: Resource,
    pub slug: String,
    pub display_name: String,
    pub description: String,
    pub purpose: EntitlementPurpose,
    pub grantable_to: Vec<String>,
}

impl Entitlement {
    fn new(resource: &Resource, slug: &str, purpose: EntitlementPurpose) -> Self {
        Self {
            id: entitlement_id(&resource.id, slug),
            resource: resource.clone(),
            slug: slug.to_string(),
            display_name: String::new(),
            description: String::new(),
            purpose,
            grantable_to: PRINCIPAL_TYPES.iter().map(|t| (*t).to_string()).collect(),
        }
    }

    #[must_use]
    pub fn assignment(resource: &Resource, slug: &str) -> Self {
        Self::new(resource, slug, EntitlementPurpose::Assignment)
    }

    #[must_use]
    pub fn permission(resource: &Resource, slug: &str) -> Self {
        Self::new(resource, slug, EntitlementPurpose::Permission)
    }

    #[must_use]
    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = display_name.into();
        self
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// `<resource type>:<resource id>:<slug>`.
#[must_use]
pub fn entitlement_id(resource: &ResourceId, slug: &str) -> String {
    format!("{}:{}:{slug}", resource.resource_type, resource.resource)
}

/// Tells the host to also grant the members of the principal group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantExpandable {
    pub entitlement_ids: Vec<String>,
}

/// A principal holding an entitlement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Grant {
    pub id: String,
    pub entitlement: Entitlement,
    pub principal: ResourceId,
    pub expandable: Option<GrantExpandable>,
}

impl Grant {
    #[must_use]
    pub fn new(resource: &Resource, slug: &str, principal: ResourceId) -> Self {
        let entitlement = Entitlement::permission(resource, slug);
        Self {
            id: format!("{}:{principal}", entitlement.id),
            entitlement,
            principal,
            expandable: None,
        }
    }

    #[must_use]
    pub fn with_expandable(mut self, expandable: Option<GrantExpandable>) -> Self {
        self.expandable = expandable;
        self
    }
}

/// One page of sync results.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncPage<T> {
    pub items: Vec<T>,
    /// Empty when there are no further pages.
    pub next_page_token: String,
    pub rate_limit: Option<RateLimitInfo>,
}

impl<T> SyncPage<T> {
    #[must_use]
    pub fn new(items: Vec<T>, next_page_token: String) -> Self {
        Self {
            items,
            next_page_token,
            rate_limit: None,
        }
    }

    /// A single page holding `items`.
    #[must_use]
    pub fn last(items: Vec<T>) -> Self {
        Self::new(items, String::new())
    }

    #[must_use]
    pub fn empty() -> Self {
        Self::last(Vec::new())
    }

    #[must_use]
    pub fn with_rate_limit(mut self, rate_limit: RateLimitInfo) -> Self {
        self.rate_limit = Some(rate_limit);
        self
    }
}

/// Sync and provisioning operations for one resource type.
#[async_trait]
pub trait ResourceSyncer: Send + Sync {
    fn resource_type(&self) -> &'static ResourceType;

    /// Lists resources under `parent`. A `None` parent lists nothing except
    /// for the root account type.
    async fn list(
        &self,
        parent: Option<&ResourceId>,
        page_token: &str,
    ) -> DatabricksResult<SyncPage<Resource>>;

    async fn entitlements(
        &self,
        resource: &Resource,
        page_token: &str,
    ) -> DatabricksResult<SyncPage<Entitlement>>;

    async fn grants(&self, resource: &Resource, page_token: &str)
        -> DatabricksResult<SyncPage<Grant>>;

    async fn grant(&self, principal: &ResourceId, entitlement: &Entitlement)
        -> DatabricksResult<()>;

    async fn revoke(&self, grant: &Grant) -> DatabricksResult<()>;
}

/// Group resources built while listing groups, keyed by opaque group id.
///
/// Shared by every adapter of a connector. The group listing clears it when
/// it starts a fresh pass.
#[derive(Debug, Default)]
pub struct ResourceCache {
    groups: RwLock<HashMap<String, Resource>>,
}

impl ResourceCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set(&self, id: &str, resource: Resource) {
        self.groups.write().await.insert(id.to_string(), resource);
    }

    pub async fn get(&self, id: &str) -> Option<Resource> {
        self.groups.read().await.get(id).cloned()
    }

    pub async fn clear(&self) {
        self.groups.write().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.groups.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.groups.read().await.is_empty()
    }
}
