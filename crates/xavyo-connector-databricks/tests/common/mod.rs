//! Common test utilities for xavyo-connector-databricks integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Once};

use serde_json::{json, Value};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};
use xavyo_connector_databricks::{DatabricksClient, DatabricksConfig};

pub const ACCOUNT_ID: &str = "acc-1";
pub const USERNAME: &str = "admin";
pub const PASSWORD: &str = "secret";

pub const ACCOUNT_RULE_SETS: &str = "/api/2.0/preview/accounts/acc-1/access-control/rule-sets";
pub const ACCOUNT_ROLES: &str = "/api/2.0/preview/accounts/acc-1/access-control/assignable-roles";
pub const WORKSPACE_ROLES: &str = "/api/2.0/preview/accounts/access-control/assignable-roles";
pub const ACCOUNT_USERS: &str = "/api/2.0/accounts/acc-1/scim/v2/Users";
pub const ACCOUNT_GROUPS: &str = "/api/2.0/accounts/acc-1/scim/v2/Groups";
pub const ACCOUNT_SERVICE_PRINCIPALS: &str = "/api/2.0/accounts/acc-1/scim/v2/ServicePrincipals";
pub const WORKSPACES: &str = "/api/2.0/accounts/acc-1/workspaces";

/// Name of the account's default rule set.
pub const ACCOUNT_RULE_SET_NAME: &str = "accounts/acc-1/ruleSets/default";

static INIT: Once = Once::new();

/// Initialize logging for tests (once, only when RUST_LOG is set).
pub fn init_test_logging() {
    INIT.call_once(|| {
        if std::env::var("RUST_LOG").is_ok() {
            tracing_subscriber::fmt()
                .with_test_writer()
                .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
                .try_init()
                .ok();
        }
    });
}

/// Config pointing both APIs at the mock server, with basic auth.
pub fn test_config(server: &MockServer, workspaces: &[&str]) -> DatabricksConfig {
    init_test_logging();
    let mut builder = DatabricksConfig::builder()
        .account_id(ACCOUNT_ID)
        .basic_auth(USERNAME, PASSWORD)
        .account_base_url(server.uri())
        .workspace_base_url(server.uri())
        .timeout_secs(5);
    for ws in workspaces {
        builder = builder.workspace(*ws);
    }
    builder.build().unwrap()
}

pub fn test_client(server: &MockServer) -> Arc<DatabricksClient> {
    Arc::new(DatabricksClient::new(&test_config(server, &[])).unwrap())
}

/// SCIM list envelope.
pub fn scim_list(resources: Vec<Value>, total: u32) -> Value {
    json!({
        "Resources": resources,
        "totalResults": total,
        "startIndex": 1,
        "itemsPerPage": resources.len()
    })
}

pub fn test_user(id: &str, user_name: &str) -> Value {
    json!({
        "id": id,
        "userName": user_name,
        "displayName": format!("User {id}"),
        "active": true,
        "emails": [{"primary": true, "value": user_name}]
    })
}

pub fn rule_set(etag: &str, rules: Value) -> Value {
    json!({
        "name": ACCOUNT_RULE_SET_NAME,
        "etag": etag,
        "grant_rules": rules
    })
}

/// Mounts a single-user lookup answering `<field> eq '<value>'` filters.
pub async fn mount_user_lookup(server: &MockServer, id: &str, user_name: &str) {
    Mock::given(method("GET"))
        .and(path(ACCOUNT_USERS))
        .and(wiremock::matchers::query_param(
            "filter",
            format!("userName eq '{user_name}'"),
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(scim_list(
            vec![test_user(id, user_name)],
            1,
        )))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path(ACCOUNT_USERS))
        .and(wiremock::matchers::query_param("filter", format!("id eq '{id}'")))
        .respond_with(ResponseTemplate::new(200).set_body_json(scim_list(
            vec![test_user(id, user_name)],
            1,
        )))
        .mount(server)
        .await;
}

/// Requests the server received with the given method and path.
pub async fn requests_to(server: &MockServer, http_method: &str, request_path: &str) -> Vec<Request> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .into_iter()
        .filter(|r| r.method.as_str() == http_method && r.url.path() == request_path)
        .collect()
}

/// JSON body of a captured request.
pub fn body_json(request: &Request) -> Value {
    serde_json::from_slice(&request.body).unwrap()
}
