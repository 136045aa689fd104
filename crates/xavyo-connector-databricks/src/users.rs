//! User resources and account-level user provisioning.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::{info, instrument};

use crate::client::DatabricksClient;
use crate::endpoints::Scope;
use crate::error::{DatabricksError, DatabricksResult};
use crate::helpers::scope_for_parent;
use crate::models::{CreateUserBody, User, UserName};
use crate::pagination::{parse_page_token, prepare_next_token, RESOURCES_PAGE_SIZE};
use crate::syncer::{
    Entitlement, Grant, Resource, ResourceId, ResourceSyncer, ResourceType, SyncPage,
    UserDetails, UserEmail, UserStatus, ACCOUNT, USER,
};
use crate::vars::{AttrVars, PaginationVars};

pub struct UserSyncer {
    client: Arc<DatabricksClient>,
}

impl UserSyncer {
    #[must_use]
    pub fn new(client: Arc<DatabricksClient>) -> Self {
        Self { client }
    }

    /// Creates an account-level user from a host-supplied profile
    /// (`userName`, `displayName`, `givenName`, `familyName`, `active`) and
    /// returns it as a resource.
    ///
    /// # Errors
    ///
    /// Returns `Config` for a missing username or display name, and
    /// `InvalidScope` when the account API is not available.
    #[instrument(skip(self, profile))]
    pub async fn create_account(&self, profile: &Map<String, Value>) -> DatabricksResult<Resource> {
        let body = create_user_body(profile)?;
        let scope = Scope::Account;

        let (created, _) = self.client.create_user(&scope, &body).await?;
        info!(user_id = %created.id, user_name = %created.user_name, "Created user");

        let (user, _) = self.client.get_user(&scope, &created.id).await?;
        let parent = ResourceId::new(ACCOUNT.id, self.client.account_id());
        Ok(user_resource(&user, &parent))
    }

    /// Deletes an account-level user.
    ///
    /// # Errors
    ///
    /// Returns `InvalidPrincipal` for non-user resources, or a request error.
    #[instrument(skip(self))]
    pub async fn delete(&self, resource: &ResourceId) -> DatabricksResult<()> {
        if resource.resource_type != USER.id {
            return Err(DatabricksError::InvalidPrincipal(format!(
                "only users can be deleted, got {resource}"
            )));
        }
        self.client
            .delete_user(&Scope::Account, &resource.resource)
            .await?;
        Ok(())
    }
}

fn profile_string(profile: &Map<String, Value>, key: &str) -> Option<String> {
    profile
        .get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn create_user_body(profile: &Map<String, Value>) -> DatabricksResult<CreateUserBody> {
    let user_name = profile_string(profile, "userName")
        .or_else(|| profile_string(profile, "email"))
        .filter(|v| !v.is_empty())
        .ok_or_else(|| DatabricksError::Config("username is required to create a user".into()))?;
    let display_name = profile_string(profile, "displayName")
        .filter(|v| !v.is_empty())
        .ok_or_else(|| {
            DatabricksError::Config("displayName is required to create a user".into())
        })?;

    Ok(CreateUserBody {
        user_name,
        display_name,
        name: UserName {
            given_name: profile_string(profile, "givenName").unwrap_or_default(),
            family_name: profile_string(profile, "familyName").unwrap_or_default(),
        },
        active: profile
            .get("active")
            .and_then(Value::as_bool)
            .unwrap_or(true),
    })
}

/// Splits a display name into first and last name at the first space.
fn split_full_name(name: &str) -> (&str, &str) {
    match name.trim().split_once(' ') {
        Some((first, last)) => (first, last.trim()),
        None => (name.trim(), ""),
    }
}

fn user_resource(user: &User, parent: &ResourceId) -> Resource {
    let primary_email = user.primary_email().unwrap_or_default();
    let (first_name, last_name) = split_full_name(&user.display_name);

    let mut emails: Vec<UserEmail> = user
        .emails
        .iter()
        .map(|e| UserEmail {
            address: e.value.clone(),
            primary: e.primary,
        })
        .collect();
    if emails.is_empty() && !primary_email.is_empty() {
        emails.push(UserEmail {
            address: primary_email.to_string(),
            primary: true,
        });
    }

    let mut resource = Resource::new(&USER, &user.id, &user.display_name)
        .with_profile("first_name", first_name)
        .with_profile("last_name", last_name)
        .with_profile("email", primary_email)
        .with_profile("user_id", user.id.as_str())
        .with_profile("login", user.user_name.as_str());

    // Users listed under a workspace are the same account users; only the
    // account is kept as parent.
    if parent.resource_type == ACCOUNT.id {
        resource = resource.with_parent(Some(parent.clone()));
    }

    resource.user = Some(UserDetails {
        login: user.user_name.clone(),
        status: if user.active {
            UserStatus::Enabled
        } else {
            UserStatus::Disabled
        },
        emails,
    });
    resource
}

#[async_trait]
impl ResourceSyncer for UserSyncer {
    fn resource_type(&self) -> &'static ResourceType {
        &USER
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
        let (mut bag, start) = parse_page_token(page_token, USER.id)?;

        let page = self
            .client
            .list_users(
                &scope,
                &[
                    &PaginationVars::new(start, RESOURCES_PAGE_SIZE),
                    &AttrVars::user(),
                ],
            )
            .await?;

        let resources = page
            .items
            .iter()
            .map(|u| user_resource(u, parent))
            .collect();

        let next = bag.next_token(&prepare_next_token(start, page.items.len(), page.total))?;
        Ok(SyncPage::new(resources, next).with_rate_limit(page.rate_limit))
    }

    async fn entitlements(
        &self,
        _resource: &Resource,
        _page_token: &str,
    ) -> DatabricksResult<SyncPage<Entitlement>> {
        Ok(SyncPage::empty())
    }

    async fn grants(
        &self,
        _resource: &Resource,
        _page_token: &str,
    ) -> DatabricksResult<SyncPage<Grant>> {
        Ok(SyncPage::empty())
    }

    async fn grant(
        &self,
        _principal: &ResourceId,
        _entitlement: &Entitlement,
    ) -> DatabricksResult<()> {
        Err(DatabricksError::Unsupported(
            "users have no entitlements to grant".into(),
        ))
    }

    async fn revoke(&self, _grant: &Grant) -> DatabricksResult<()> {
        Err(DatabricksError::Unsupported(
            "users have no entitlements to revoke".into(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Email;
    use serde_json::json;

    #[test]
    fn test_split_full_name() {
        assert_eq!(split_full_name("Alice Smith"), ("Alice", "Smith"));
        assert_eq!(split_full_name("Alice van Dyke"), ("Alice", "van Dyke"));
        assert_eq!(split_full_name("Alice"), ("Alice", ""));
    }

    #[test]
    fn test_user_resource_profile() {
        let user = User {
            id: "42".into(),
            user_name: "alice@example.com".into(),
            display_name: "Alice Smith".into(),
            active: false,
            emails: vec![Email {
                primary: true,
                value: "alice@example.com".into(),
            }],
            ..User::default()
        };

        let account = ResourceId::new("account", "acc");
        let r = user_resource(&user, &account);
        assert_eq!(r.id, ResourceId::new("user", "42"));
        assert_eq!(r.parent, Some(account));
        assert_eq!(r.profile_str("first_name"), Some("Alice"));
        assert_eq!(r.profile_str("last_name"), Some("Smith"));
        assert_eq!(r.profile_str("email"), Some("alice@example.com"));
        assert_eq!(r.profile_str("login"), Some("alice@example.com"));

        let details = r.user.unwrap();
        assert_eq!(details.status, UserStatus::Disabled);
        assert_eq!(details.emails.len(), 1);

        let ws = user_resource(&user, &ResourceId::new("workspace", "dbc-1"));
        assert!(ws.parent.is_none());
    }

    #[test]
    fn test_create_user_body() {
        let profile = json!({
            "email": "bob@example.com",
            "displayName": "Bob",
            "givenName": "Bob",
            "familyName": "Jones",
            "active": false
        });
        let body = create_user_body(profile.as_object().unwrap()).unwrap();
        assert_eq!(body.user_name, "bob@example.com");
        assert_eq!(body.name.family_name, "Jones");
        assert!(!body.active);

        let missing = json!({"email": "bob@example.com"});
        assert!(create_user_body(missing.as_object().unwrap()).is_err());
    }
}
