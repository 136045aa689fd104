//! Databricks API data models.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};

use crate::endpoints::Scope;
use crate::error::DatabricksError;

/// SCIM list response envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct ListResponse<T> {
    #[serde(rename = "Resources", default = "Vec::new")]
    pub resources: Vec<T>,
    #[serde(rename = "totalResults", default)]
    pub total_results: u32,
}

/// A single role or entitlement value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionValue {
    pub value: String,
}

impl PermissionValue {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
        }
    }
}

/// Roles (account API) and entitlements (workspace API) held directly by a principal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permissions {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub roles: Vec<PermissionValue>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entitlements: Vec<PermissionValue>,
}

/// Which permission list a value lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionKind {
    /// Account-level role, e.g. `account_admin`.
    Role,
    /// Workspace-level entitlement, e.g. `workspace-access`.
    Entitlement,
}

impl PermissionKind {
    /// Account scopes carry roles, workspace scopes carry entitlements.
    #[must_use]
    pub fn for_scope(scope: &Scope) -> Self {
        if scope.is_account() {
            Self::Role
        } else {
            Self::Entitlement
        }
    }
}

impl Permissions {
    fn list(&self, kind: PermissionKind) -> &Vec<PermissionValue> {
        match kind {
            PermissionKind::Role => &self.roles,
            PermissionKind::Entitlement => &self.entitlements,
        }
    }

    fn list_mut(&mut self, kind: PermissionKind) -> &mut Vec<PermissionValue> {
        match kind {
            PermissionKind::Role => &mut self.roles,
            PermissionKind::Entitlement => &mut self.entitlements,
        }
    }

    #[must_use]
    pub fn contains(&self, kind: PermissionKind, value: &str) -> bool {
        self.list(kind).iter().any(|p| p.value == value)
    }

    /// Adds a value. Returns false if it was already present.
    pub fn add(&mut self, kind: PermissionKind, value: &str) -> bool {
        if self.contains(kind, value) {
            return false;
        }
        self.list_mut(kind).push(PermissionValue::new(value));
        true
    }

    /// Removes a value. Returns false if it was not present.
    pub fn remove(&mut self, kind: PermissionKind, value: &str) -> bool {
        let list = self.list_mut(kind);
        match list.iter().position(|p| p.value == value) {
            Some(index) => {
                list.remove(index);
                true
            }
            None => false,
        }
    }
}

/// Shared capability of users, groups and service principals.
pub trait HasPermissions {
    fn permissions(&self) -> &Permissions;

    fn permissions_mut(&mut self) -> &mut Permissions;

    fn has_role(&self, role: &str) -> bool {
        self.permissions().contains(PermissionKind::Role, role)
    }

    fn has_entitlement(&self, entitlement: &str) -> bool {
        self.permissions()
            .contains(PermissionKind::Entitlement, entitlement)
    }

    fn has_permission(&self, kind: PermissionKind, value: &str) -> bool {
        self.permissions().contains(kind, value)
    }

    /// Returns true if the permission was added.
    fn grant_permission(&mut self, kind: PermissionKind, value: &str) -> bool {
        self.permissions_mut().add(kind, value)
    }

    /// Returns true if the permission was removed.
    fn revoke_permission(&mut self, kind: PermissionKind, value: &str) -> bool {
        self.permissions_mut().remove(kind, value)
    }
}

/// Accepts ids serialized either as strings or numbers.
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Str(String),
        Num(i64),
    }

    Ok(match Option::<Id>::deserialize(deserializer)? {
        Some(Id::Str(s)) => s,
        Some(Id::Num(n)) => n.to_string(),
        None => String::new(),
    })
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Email {
    #[serde(default)]
    pub primary: bool,
    #[serde(default)]
    pub value: String,
}

/// SCIM user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(default, deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub schemas: Vec<String>,
    #[serde(default)]
    pub emails: Vec<Email>,
    #[serde(default)]
    pub user_name: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub active: bool,
    #[serde(flatten)]
    pub permissions: Permissions,
}

impl User {
    /// Primary email, if one is flagged.
    #[must_use]
    pub fn primary_email(&self) -> Option<&str> {
        self.emails
            .iter()
            .find(|e| e.primary)
            .map(|e| e.value.as_str())
    }
}

/// Group member reference.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    /// Opaque id of the member.
    #[serde(rename = "value", default)]
    pub id: String,
    #[serde(rename = "display", default, skip_serializing_if = "String::is_empty")]
    pub display_name: String,
    /// `<Kind>/<id>`, e.g. `Users/123`.
    #[serde(rename = "$ref", default, skip_serializing_if = "String::is_empty")]
    pub reference: String,
}

impl Member {
    /// A bare membership by id, as sent when adding a member.
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    /// Kind and id decoded from `$ref`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidPrincipal` if the reference is not `<Kind>/<id>` with a
    /// known kind.
    pub fn parse_ref(&self) -> Result<(PrincipalKind, String), DatabricksError> {
        let (kind, id) = self
            .reference
            .split_once('/')
            .filter(|(_, id)| !id.is_empty() && !id.contains('/'))
            .ok_or_else(|| DatabricksError::InvalidPrincipal(self.reference.clone()))?;
        Ok((kind.parse()?, id.to_string()))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupMeta {
    #[serde(rename = "resourceType", default)]
    pub resource_type: String,
}

impl GroupMeta {
    fn is_empty(&self) -> bool {
        self.resource_type.is_empty()
    }
}

/// SCIM group.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    #[serde(default, deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub members: Vec<Member>,
    #[serde(default, skip_serializing_if = "GroupMeta::is_empty")]
    pub meta: GroupMeta,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub schemas: Vec<String>,
    #[serde(flatten)]
    pub permissions: Permissions,
}

impl Group {
    /// Account groups report `meta.resourceType == "Group"`; workspace-local
    /// groups (`admins`, `users`) report `WorkspaceGroup`.
    #[must_use]
    pub fn is_account_group(&self) -> bool {
        self.meta.resource_type == "Group"
    }

    #[must_use]
    pub fn has_member(&self, id: &str) -> bool {
        self.members.iter().any(|m| m.id == id)
    }

    /// Adds a member by id. Returns false if already a member.
    pub fn add_member(&mut self, id: &str) -> bool {
        if self.has_member(id) {
            return false;
        }
        self.members.push(Member::with_id(id));
        true
    }

    /// Removes a member by id. Returns false if not a member.
    pub fn remove_member(&mut self, id: &str) -> bool {
        let before = self.members.len();
        self.members.retain(|m| m.id != id);
        self.members.len() != before
    }
}

/// SCIM service principal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServicePrincipal {
    #[serde(default, deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub application_id: String,
    #[serde(flatten)]
    pub permissions: Permissions,
}

impl HasPermissions for User {
    fn permissions(&self) -> &Permissions {
        &self.permissions
    }

    fn permissions_mut(&mut self) -> &mut Permissions {
        &mut self.permissions
    }
}

impl HasPermissions for Group {
    fn permissions(&self) -> &Permissions {
        &self.permissions
    }

    fn permissions_mut(&mut self) -> &mut Permissions {
        &mut self.permissions
    }
}

impl HasPermissions for ServicePrincipal {
    fn permissions(&self) -> &Permissions {
        &self.permissions
    }

    fn permissions_mut(&mut self) -> &mut Permissions {
        &mut self.permissions
    }
}

/// Kind of grantable identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrincipalKind {
    User,
    Group,
    ServicePrincipal,
}

impl PrincipalKind {
    /// Prefix used in rule-set principals and resource paths (`users`, ...).
    #[must_use]
    pub fn rule_set_prefix(&self) -> &'static str {
        match self {
            Self::User => "users",
            Self::Group => "groups",
            Self::ServicePrincipal => "servicePrincipals",
        }
    }

    /// Prefix used in group member `$ref` values (`Users`, ...).
    #[must_use]
    pub fn scim_ref_prefix(&self) -> &'static str {
        match self {
            Self::User => "Users",
            Self::Group => "Groups",
            Self::ServicePrincipal => "ServicePrincipals",
        }
    }
}

impl FromStr for PrincipalKind {
    type Err = DatabricksError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "users" => Ok(Self::User),
            "groups" => Ok(Self::Group),
            "serviceprincipals" => Ok(Self::ServicePrincipal),
            _ => Err(DatabricksError::InvalidPrincipal(format!(
                "unknown principal type: {s}"
            ))),
        }
    }
}

/// A rule-set principal: `<kind>/<natural key>`.
///
/// The key is the username, group display name or application id, never the
/// opaque platform id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PrincipalRef {
    pub kind: PrincipalKind,
    pub key: String,
}

impl PrincipalRef {
    pub fn new(kind: PrincipalKind, key: impl Into<String>) -> Self {
        Self {
            kind,
            key: key.into(),
        }
    }
}

impl fmt::Display for PrincipalRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind.rule_set_prefix(), self.key)
    }
}

impl FromStr for PrincipalRef {
    type Err = DatabricksError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, key) = s
            .split_once('/')
            .filter(|(_, key)| !key.is_empty() && !key.contains('/'))
            .ok_or_else(|| {
                DatabricksError::InvalidPrincipal(format!("invalid principal format: {s}"))
            })?;
        Ok(Self::new(kind.parse()?, key))
    }
}

/// Any grantable identity, for uniform get/update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Principal {
    User(User),
    Group(Group),
    ServicePrincipal(ServicePrincipal),
}

impl Principal {
    #[must_use]
    pub fn kind(&self) -> PrincipalKind {
        match self {
            Self::User(_) => PrincipalKind::User,
            Self::Group(_) => PrincipalKind::Group,
            Self::ServicePrincipal(_) => PrincipalKind::ServicePrincipal,
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::User(u) => &u.id,
            Self::Group(g) => &g.id,
            Self::ServicePrincipal(sp) => &sp.id,
        }
    }
}

impl HasPermissions for Principal {
    fn permissions(&self) -> &Permissions {
        match self {
            Self::User(u) => u.permissions(),
            Self::Group(g) => g.permissions(),
            Self::ServicePrincipal(sp) => sp.permissions(),
        }
    }

    fn permissions_mut(&mut self) -> &mut Permissions {
        match self {
            Self::User(u) => u.permissions_mut(),
            Self::Group(g) => g.permissions_mut(),
            Self::ServicePrincipal(sp) => sp.permissions_mut(),
        }
    }
}

/// Databricks workspace (deployment).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workspace {
    #[serde(rename = "workspace_id", default)]
    pub id: i64,
    #[serde(rename = "workspace_name", default)]
    pub name: String,
    #[serde(rename = "workspace_status", default)]
    pub status: String,
    #[serde(default)]
    pub deployment_name: String,
}

/// Principal of a workspace permission assignment. Exactly one name is set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspacePrincipal {
    #[serde(rename = "service_principal_name", default)]
    pub service_principal_app_id: String,
    #[serde(rename = "group_name", default)]
    pub group_display_name: String,
    #[serde(default)]
    pub user_name: String,
    #[serde(rename = "principal_id", default)]
    pub id: i64,
}

impl WorkspacePrincipal {
    /// Kind of the assigned principal, from whichever name is set.
    #[must_use]
    pub fn kind(&self) -> Option<PrincipalKind> {
        if !self.user_name.is_empty() {
            Some(PrincipalKind::User)
        } else if !self.group_display_name.is_empty() {
            Some(PrincipalKind::Group)
        } else if !self.service_principal_app_id.is_empty() {
            Some(PrincipalKind::ServicePrincipal)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceAssignment {
    #[serde(default)]
    pub principal: Option<WorkspacePrincipal>,
    #[serde(default)]
    pub permissions: Vec<String>,
}

/// Assignable role.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub name: String,
}

/// One grant rule of a rule set: a role and the principals holding it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSet {
    #[serde(default)]
    pub principals: Vec<String>,
    pub role: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserName {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub given_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub family_name: String,
}

/// Body of an account-level user creation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateUserBody {
    pub user_name: String,
    pub display_name: String,
    #[serde(default)]
    pub name: UserName,
    #[serde(default)]
    pub active: bool,
}
