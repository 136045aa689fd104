//! Integration tests for credential validation and API availability.

mod common;

use common::*;
use serde_json::json;
use wiremock::matchers::{bearer_token, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};
use xavyo_connector_databricks::{ApiAvailability, DatabricksConfig, DatabricksConnector, ACCOUNT};

fn roles_response() -> serde_json::Value {
    json!({"roles": [{"name": "roles/marketplace.admin"}]})
}

async fn mount_account_roles(server: &MockServer, status: u16) {
    Mock::given(method("GET"))
        .and(path(ACCOUNT_ROLES))
        .and(query_param("resource", "accounts/acc-1"))
        .respond_with(ResponseTemplate::new(status).set_body_json(roles_response()))
        .mount(server)
        .await;
}

async fn mount_workspace_roles(server: &MockServer, status: u16) {
    Mock::given(method("GET"))
        .and(path(WORKSPACE_ROLES))
        .respond_with(ResponseTemplate::new(status).set_body_json(roles_response()))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_validate_with_both_apis() {
    let server = MockServer::start().await;
    mount_account_roles(&server, 200).await;
    mount_workspace_roles(&server, 200).await;

    let connector = DatabricksConnector::new(test_config(&server, &["dbc-1"])).unwrap();
    let availability = connector.validate().await.unwrap();

    assert_eq!(
        availability,
        ApiAvailability {
            account: true,
            workspace: true
        }
    );
    assert!(connector.client().is_account_api_available());
    assert!(connector.client().is_workspace_api_available());
}

#[tokio::test]
async fn test_validate_workspace_only_credentials() {
    let server = MockServer::start().await;
    mount_account_roles(&server, 403).await;
    mount_workspace_roles(&server, 200).await;

    let connector = DatabricksConnector::new(test_config(&server, &["dbc-1"])).unwrap();
    let availability = connector.validate().await.unwrap();

    assert!(!availability.account);
    assert!(availability.workspace);
    assert!(!connector.client().is_account_api_available());

    // Without the account API the account only exposes workspaces.
    let syncers = connector.resource_syncers();
    let account_syncer = syncers
        .iter()
        .find(|s| s.resource_type().id == ACCOUNT.id)
        .unwrap();
    let page = account_syncer.list(None, "").await.unwrap();
    let account = &page.items[0];
    assert_eq!(account.child_types, vec!["workspace"]);

    let entitlements = account_syncer.entitlements(account, "").await.unwrap();
    assert!(entitlements.items.is_empty());
}

#[tokio::test]
async fn test_validate_fails_when_workspace_rejects_without_account() {
    let server = MockServer::start().await;
    mount_account_roles(&server, 403).await;
    mount_workspace_roles(&server, 401).await;

    let connector = DatabricksConnector::new(test_config(&server, &["dbc-1"])).unwrap();
    let err = connector.validate().await.unwrap_err();

    assert!(err.to_string().contains("dbc-1"));
}

#[tokio::test]
async fn test_validate_tolerates_workspace_failure_with_account() {
    let server = MockServer::start().await;
    mount_account_roles(&server, 200).await;
    mount_workspace_roles(&server, 500).await;

    Mock::given(method("GET"))
        .and(path(WORKSPACES))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"workspace_id": 1, "workspace_name": "A", "deployment_name": "dbc-a"},
            {"workspace_id": 2, "workspace_name": "B", "deployment_name": "dbc-b"}
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let connector = DatabricksConnector::new(test_config(&server, &[])).unwrap();
    let availability = connector.validate().await.unwrap();

    assert!(availability.account);
    assert!(availability.workspace);

    let probes = requests_to(&server, "GET", WORKSPACE_ROLES).await;
    assert_eq!(probes.len(), 2);
}

#[tokio::test]
async fn test_validate_fails_when_workspaces_cannot_be_listed() {
    let server = MockServer::start().await;
    mount_account_roles(&server, 200).await;

    Mock::given(method("GET"))
        .and(path(WORKSPACES))
        .respond_with(ResponseTemplate::new(500).set_body_raw("boom", "text/plain"))
        .mount(&server)
        .await;

    let connector = DatabricksConnector::new(test_config(&server, &[])).unwrap();
    let err = connector.validate().await.unwrap_err();

    assert_eq!(err.as_api().map(|e| e.status), Some(500));
}

#[tokio::test]
async fn test_validate_with_workspace_tokens_skips_account_probe() {
    let server = MockServer::start().await;
    mount_account_roles(&server, 200).await;

    Mock::given(method("GET"))
        .and(path(WORKSPACE_ROLES))
        .and(bearer_token("dapi-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(roles_response()))
        .expect(1)
        .mount(&server)
        .await;

    let config = DatabricksConfig::builder()
        .account_id(ACCOUNT_ID)
        .workspace_token("dbc-1", "dapi-token")
        .account_base_url(server.uri())
        .workspace_base_url(server.uri())
        .build()
        .unwrap();
    let connector = DatabricksConnector::new(config).unwrap();
    let availability = connector.validate().await.unwrap();

    assert!(!availability.account);
    assert!(availability.workspace);
    assert!(requests_to(&server, "GET", ACCOUNT_ROLES).await.is_empty());
}

#[tokio::test]
async fn test_oauth2_token_is_fetched_once_and_reused() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/oidc/accounts/acc-1/v1/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "oauth-token",
            "token_type": "Bearer",
            "expires_in": 3600
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(ACCOUNT_ROLES))
        .and(bearer_token("oauth-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(roles_response()))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(WORKSPACE_ROLES))
        .and(bearer_token("oauth-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(roles_response()))
        .mount(&server)
        .await;

    let config = DatabricksConfig::builder()
        .account_id(ACCOUNT_ID)
        .oauth2("client-id", "client-secret")
        .workspace("dbc-1")
        .account_base_url(server.uri())
        .workspace_base_url(server.uri())
        .build()
        .unwrap();
    let connector = DatabricksConnector::new(config).unwrap();
    let availability = connector.validate().await.unwrap();

    assert!(availability.account);
    assert!(availability.workspace);

    let token_requests = requests_to(&server, "POST", "/oidc/accounts/acc-1/v1/token").await;
    let form = String::from_utf8(token_requests[0].body.clone()).unwrap();
    assert!(form.contains("grant_type=client_credentials"));
    assert!(form.contains("scope=all-apis"));
}
