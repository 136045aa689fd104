//! Databricks Connector for xavyo
//!
//! This crate syncs identities and access from a Databricks account and its
//! workspaces through the account and workspace SCIM, access-control and
//! permission-assignment APIs.
//!
//! # Features
//!
//! - `OAuth2` client credentials, basic auth or per-workspace access tokens
//! - Account, workspace, user, group, service principal and role resources
//! - Rule-set role grants with etag concurrency control
//! - Workspace permission assignments and workspace entitlements
//! - Account-level user provisioning
//!
//! # Example
//!
//! ```no_run
//! use xavyo_connector_databricks::{DatabricksConfig, DatabricksConnector};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = DatabricksConfig::builder()
//!     .account_id("your-account-id")
//!     .oauth2("your-client-id", "your-client-secret")
//!     .build()?;
//!
//! let connector = DatabricksConnector::new(config)?;
//! let availability = connector.validate().await?;
//!
//! for syncer in connector.resource_syncers() {
//!     let page = syncer.list(None, "").await?;
//!     println!("{}: {} resources", syncer.resource_type().id, page.items.len());
//! }
//! # let _ = availability;
//! # Ok(())
//! # }
//! ```

mod account;
mod auth;
mod client;
mod config;
mod connector;
mod endpoints;
mod error;
mod groups;
mod helpers;
mod models;
mod pagination;
mod rate_limit;
mod roles;
mod rule_sets;
mod service_principals;
mod syncer;
mod transport;
mod users;
mod vars;
mod workspaces;

// Re-exports
pub use account::{AccountSyncer, ACCOUNT_ADMIN_ROLE, MARKETPLACE_ADMIN_ROLE};
pub use auth::{Auth, TokenCache};
pub use client::{AccessTarget, DatabricksClient, Page};
pub use config::{
    AuthMode, DatabricksConfig, DatabricksConfigBuilder, DEFAULT_HOSTNAME, DEFAULT_TIMEOUT_SECS,
};
pub use connector::{
    AccountField, ApiAvailability, ConnectorMetadata, DatabricksConnector, FieldKind,
};
pub use endpoints::{Endpoint, EndpointResolver, Scope, ScopeKind, WorkspaceBase};
pub use error::{ApiError, DatabricksError, DatabricksResult};
pub use groups::GroupSyncer;
pub use helpers::{group_resource_id, parse_resource_id};
pub use models::{
    CreateUserBody, Email, Group, GroupMeta, HasPermissions, Member, PermissionKind,
    PermissionValue, Permissions, Principal, PrincipalKind, PrincipalRef, Role, RuleSet,
    ServicePrincipal, User, UserName, Workspace, WorkspaceAssignment, WorkspacePrincipal,
};
pub use pagination::{
    parse_page_token, prepare_next_token, PageBag, PageState, RESOURCES_PAGE_SIZE,
};
pub use rate_limit::{RateLimitInfo, RateLimitStatus};
pub use roles::{
    RoleSyncer, CLUSTER_CREATE, INSTANCE_POOL_CREATE, SQL_ACCESS, WORKSPACE_ACCESS,
};
pub use rule_sets::{add_principal, qualified_role, remove_principal, RoleMatch};
pub use service_principals::ServicePrincipalSyncer;
pub use syncer::{
    Entitlement, EntitlementPurpose, Grant, GrantExpandable, Resource, ResourceCache,
    ResourceId, ResourceSyncer, ResourceTrait, ResourceType, SyncPage, UserDetails, UserEmail,
    UserStatus, ACCOUNT, GROUP, MEMBER_ENTITLEMENT, ROLE, SERVICE_PRINCIPAL, USER, WORKSPACE,
};
pub use transport::HttpTransport;
pub use users::UserSyncer;
pub use vars::{AttrVars, FilterVars, NameVars, PaginationVars, QueryParams, QueryVars, ResourceVars};
pub use workspaces::WorkspaceSyncer;
