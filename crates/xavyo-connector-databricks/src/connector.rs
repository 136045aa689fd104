//! Databricks connector implementation
//!
//! Wires the client, the shared group cache and the resource adapters
//! together, and validates credentials against both APIs.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::account::AccountSyncer;
use crate::client::{AccessTarget, DatabricksClient};
use crate::config::DatabricksConfig;
use crate::endpoints::Scope;
use crate::error::{DatabricksError, DatabricksResult};
use crate::groups::GroupSyncer;
use crate::roles::RoleSyncer;
use crate::service_principals::ServicePrincipalSyncer;
use crate::syncer::{ResourceCache, ResourceSyncer};
use crate::users::UserSyncer;
use crate::workspaces::WorkspaceSyncer;

/// Which APIs accepted the configured credentials.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ApiAvailability {
    pub account: bool,
    pub workspace: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    String,
    Bool,
}

/// One field of the account creation form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountField {
    pub name: &'static str,
    pub display_name: &'static str,
    pub description: &'static str,
    pub required: bool,
    pub kind: FieldKind,
    pub placeholder: &'static str,
    pub order: u32,
}

/// Static description of the connector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectorMetadata {
    pub display_name: &'static str,
    pub description: &'static str,
    pub account_creation_schema: Vec<AccountField>,
}

/// Databricks connector for account and workspace identity governance.
#[derive(Debug)]
pub struct DatabricksConnector {
    config: DatabricksConfig,
    client: Arc<DatabricksClient>,
    cache: Arc<ResourceCache>,
}

impl DatabricksConnector {
    /// Create a new connector with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the HTTP client
    /// cannot be built.
    pub fn new(config: DatabricksConfig) -> DatabricksResult<Self> {
        config.validate()?;
        let client = DatabricksClient::new(&config)?;

        info!(
            account_id = %config.account_id,
            hostname = %config.hostname,
            workspaces = config.workspaces.len(),
            "Created Databricks connector"
        );

        Ok(Self {
            config,
            client: Arc::new(client),
            cache: Arc::new(ResourceCache::new()),
        })
    }

    #[must_use]
    pub fn client(&self) -> &Arc<DatabricksClient> {
        &self.client
    }

    #[must_use]
    pub fn config(&self) -> &DatabricksConfig {
        &self.config
    }

    /// One adapter per resource type.
    #[must_use]
    pub fn resource_syncers(&self) -> Vec<Box<dyn ResourceSyncer>> {
        vec![
            Box::new(AccountSyncer::new(
                Arc::clone(&self.client),
                Arc::clone(&self.cache),
            )),
            Box::new(GroupSyncer::new(
                Arc::clone(&self.client),
                Arc::clone(&self.cache),
            )),
            Box::new(ServicePrincipalSyncer::new(
                Arc::clone(&self.client),
                Arc::clone(&self.cache),
            )),
            Box::new(self.users()),
            Box::new(WorkspaceSyncer::new(
                Arc::clone(&self.client),
                Arc::clone(&self.cache),
                self.config.workspaces.clone(),
            )),
            Box::new(RoleSyncer::new(
                Arc::clone(&self.client),
                Arc::clone(&self.cache),
            )),
        ]
    }

    /// User adapter, which also carries account provisioning.
    #[must_use]
    pub fn users(&self) -> UserSyncer {
        UserSyncer::new(Arc::clone(&self.client))
    }

    #[must_use]
    pub fn metadata(&self) -> ConnectorMetadata {
        ConnectorMetadata {
            display_name: "Databricks",
            description: "Connector syncing Databricks workspaces, users, groups, service principals and roles",
            account_creation_schema: vec![
                AccountField {
                    name: "email",
                    display_name: "Email",
                    description: "The email address of the user.",
                    required: true,
                    kind: FieldKind::String,
                    placeholder: "Email",
                    order: 1,
                },
                AccountField {
                    name: "displayName",
                    display_name: "Display Name",
                    description: "User's display name",
                    required: true,
                    kind: FieldKind::String,
                    placeholder: "Display Name",
                    order: 2,
                },
                AccountField {
                    name: "givenName",
                    display_name: "Given Name",
                    description: "User's given name",
                    required: false,
                    kind: FieldKind::String,
                    placeholder: "Given Name",
                    order: 3,
                },
                AccountField {
                    name: "familyName",
                    display_name: "Family Name",
                    description: "User's family name",
                    required: false,
                    kind: FieldKind::String,
                    placeholder: "Family Name",
                    order: 4,
                },
                AccountField {
                    name: "active",
                    display_name: "Active",
                    description: "If the user is active",
                    required: false,
                    kind: FieldKind::Bool,
                    placeholder: "active",
                    order: 5,
                },
            ],
        }
    }

    /// Exercises the credentials against the account API and every targeted
    /// workspace, then records which APIs are usable.
    ///
    /// A workspace probe failure is fatal only when the account API is
    /// unavailable too.
    ///
    /// # Errors
    ///
    /// Returns an error if no API accepts the credentials, or if workspaces
    /// cannot be listed when none are configured.
    #[instrument(skip(self))]
    pub async fn validate(&self) -> DatabricksResult<ApiAvailability> {
        let mut account = false;
        let mut workspace = false;

        if !self.client.is_token_auth() {
            match self.client.list_roles(&Scope::Account, &AccessTarget::Account).await {
                Ok(_) => account = true,
                Err(e) => debug!(error = %e, "Account API probe failed"),
            }
        }

        let workspaces = if self.config.workspaces.is_empty() {
            let (listed, _) = self.client.list_workspaces().await.map_err(|e| {
                warn!(error = %e, "Failed to list workspaces");
                e
            })?;
            listed.into_iter().map(|w| w.deployment_name).collect()
        } else {
            self.config.workspaces.clone()
        };

        for name in workspaces {
            let scope = Scope::Workspace(name.clone());
            if let Err(e) = self.client.list_roles(&scope, &AccessTarget::Account).await {
                if !account {
                    return Err(DatabricksError::Auth(format!(
                        "failed to validate credentials for workspace {name}: {e}"
                    )));
                }
                debug!(workspace = %name, error = %e, "Workspace API probe failed");
            }
            workspace = true;
        }

        if !account && !workspace {
            return Err(DatabricksError::Auth("failed to validate credentials".into()));
        }

        self.client.update_availability(account, workspace);
        info!(account_api = account, workspace_api = workspace, "Validated Databricks credentials");

        Ok(ApiAvailability { account, workspace })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connector() -> DatabricksConnector {
        let config = DatabricksConfig::builder()
            .account_id("acc")
            .oauth2("client", "secret")
            .build()
            .unwrap();
        DatabricksConnector::new(config).unwrap()
    }

    #[test]
    fn test_metadata() {
        let meta = connector().metadata();
        assert_eq!(meta.display_name, "Databricks");
        let names: Vec<_> = meta.account_creation_schema.iter().map(|f| f.name).collect();
        assert_eq!(
            names,
            vec!["email", "displayName", "givenName", "familyName", "active"]
        );
        assert!(meta.account_creation_schema[0].required);
        assert_eq!(meta.account_creation_schema[4].kind, FieldKind::Bool);
    }

    #[test]
    fn test_resource_syncers_cover_every_type() {
        let ids: Vec<_> = connector()
            .resource_syncers()
            .iter()
            .map(|s| s.resource_type().id)
            .collect();
        assert_eq!(
            ids,
            vec!["account", "group", "service_principal", "user", "workspace", "role"]
        );
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = DatabricksConfig {
            account_id: String::new(),
            ..connector().config().clone()
        };
        assert!(DatabricksConnector::new(config).is_err());
    }
}
