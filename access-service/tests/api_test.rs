//! HTTP surface tests driven through the router with `oneshot`.

mod common;

use access_service::services::InvitationRequest;
use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    response::Response,
};
use common::{TestApp, TEST_SERVICE_ACCOUNT_ID, TEST_SERVICE_ACCOUNT_SECRET};
use serde_json::{json, Value};
use tower::util::ServiceExt;
use uuid::Uuid;

async fn body_json(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

fn json_request(method: &str, uri: &str, bearer: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = bearer {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn get_request(uri: &str, bearer: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().uri(uri);
    if let Some(token) = bearer {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    builder.body(Body::empty()).unwrap()
}

#[tokio::test]
async fn test_health_check() {
    let app = TestApp::spawn().await;

    let response = app.router().oneshot(get_request("/health", None)).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));
    assert_eq!(response.headers()[header::CACHE_CONTROL], "no-store");
    let body = body_json(response).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["checks"]["store"], "up");
}

#[tokio::test]
async fn test_openapi_document_is_served() {
    let app = TestApp::spawn().await;

    let response = app
        .router()
        .oneshot(get_request("/.well-known/openapi.json", None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert!(body["paths"]["/api/token"].is_object());
    assert!(body["components"]["securitySchemes"]["bearer_auth"].is_object());
}

#[tokio::test]
async fn test_client_credentials_over_http() {
    let app = TestApp::spawn().await;

    let response = app
        .router()
        .oneshot(json_request(
            "POST",
            "/api/token",
            None,
            json!({
                "grant_type": "client_credentials",
                "client_id": TEST_SERVICE_ACCOUNT_ID,
                "client_secret": TEST_SERVICE_ACCOUNT_SECRET,
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["token_type"], "Bearer");
    assert!(body["access_token"].as_str().is_some());
    assert!(body.get("refresh_token").is_none());
}

#[tokio::test]
async fn test_token_endpoint_rejects_bad_grants() {
    let app = TestApp::spawn().await;

    let unsupported = app
        .router()
        .oneshot(json_request(
            "POST",
            "/api/token",
            None,
            json!({ "grant_type": "password" }),
        ))
        .await
        .unwrap();
    let missing_secret = app
        .router()
        .oneshot(json_request(
            "POST",
            "/api/token",
            None,
            json!({ "grant_type": "client_credentials", "client_id": TEST_SERVICE_ACCOUNT_ID }),
        ))
        .await
        .unwrap();
    let wrong_secret = app
        .router()
        .oneshot(json_request(
            "POST",
            "/api/token",
            None,
            json!({
                "grant_type": "client_credentials",
                "client_id": TEST_SERVICE_ACCOUNT_ID,
                "client_secret": "nope",
            }),
        ))
        .await
        .unwrap();

    assert_eq!(unsupported.status(), StatusCode::BAD_REQUEST);
    assert_eq!(missing_secret.status(), StatusCode::BAD_REQUEST);
    assert_eq!(wrong_secret.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_protected_routes_require_bearer_token() {
    let app = TestApp::spawn().await;
    let uri = format!("/api/resources/{}/scopes", Uuid::new_v4());

    let missing = app.router().oneshot(get_request(&uri, None)).await.unwrap();
    let garbage = app
        .router()
        .oneshot(get_request(&uri, Some("not-a-jwt")))
        .await
        .unwrap();

    assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(garbage.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_scopes_endpoint_reports_cached_privileges() {
    let app = TestApp::spawn().await;
    let bob = app.create_user("bob").await;
    let team = app.create_team("platform", None).await;
    let team_resource = team.resource_id.unwrap();
    app.state
        .role_graph
        .add_member(bob.identity_id, team_resource)
        .await
        .unwrap();
    let tokens = app.login(bob.identity_id).await;

    let response = app
        .router()
        .oneshot(get_request(
            &format!("/api/resources/{}/scopes", team_resource),
            Some(&tokens.access_token),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["resource_id"], team_resource.to_string());
    assert_eq!(body["scopes"], json!(["view"]));

    let unknown = app
        .router()
        .oneshot(get_request(
            &format!("/api/resources/{}/scopes", Uuid::new_v4()),
            Some(&tokens.access_token),
        ))
        .await
        .unwrap();
    assert_eq!(unknown.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_invitation_issue_and_accept_with_redirect() {
    // Arrange
    let app = TestApp::spawn().await;
    let admin = app.create_user("alice").await;
    let bob = app.create_user("bob").await;
    let team = app.create_team("platform", None).await;
    let team_resource = team.resource_id.unwrap();
    let admin_role = app.team_admin_role().await;
    app.state
        .role_graph
        .assign_role(admin.identity_id, team_resource, admin_role.role_id)
        .await
        .unwrap();
    let tokens = app.login(admin.identity_id).await;

    // Act: issue
    let response = app
        .router()
        .oneshot(json_request(
            "POST",
            &format!("/api/invitations/{}", team.identity_id),
            Some(&tokens.access_token),
            json!({
                "invitations": [{
                    "identity_id": bob.identity_id,
                    "member": true,
                    "redirect_on_success": "https://app.example.com/welcome",
                }]
            }),
        ))
        .await
        .unwrap();

    // Assert: issue
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_json(response).await;
    assert_eq!(body.as_array().unwrap().len(), 1);
    assert_eq!(body[0]["identity_id"], bob.identity_id.to_string());
    assert!(body[0].get("accept_code").is_none());

    let listed = app
        .router()
        .oneshot(get_request(
            &format!("/api/invitations/{}", team_resource),
            Some(&tokens.access_token),
        ))
        .await
        .unwrap();
    assert_eq!(listed.status(), StatusCode::OK);
    assert_eq!(body_json(listed).await.as_array().unwrap().len(), 1);

    // Act: accept
    let code = app.accept_code_for(bob.identity_id);
    let accepted = app
        .router()
        .oneshot(get_request(&format!("/api/invitations/accept/{}", code), None))
        .await
        .unwrap();

    // Assert: accept
    assert_eq!(accepted.status(), StatusCode::SEE_OTHER);
    assert_eq!(
        accepted.headers()[header::LOCATION],
        "https://app.example.com/welcome"
    );

    let reused = app
        .router()
        .oneshot(get_request(&format!("/api/invitations/accept/{}", code), None))
        .await
        .unwrap();
    assert_eq!(reused.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_accept_without_redirect_returns_resource() {
    let app = TestApp::spawn().await;
    let admin = app.create_user("alice").await;
    let bob = app.create_user("bob").await;
    let team = app.create_team("platform", None).await;
    let team_resource = team.resource_id.unwrap();
    let admin_role = app.team_admin_role().await;
    app.state
        .role_graph
        .assign_role(admin.identity_id, team_resource, admin_role.role_id)
        .await
        .unwrap();
    app.state
        .invitations
        .issue(
            admin.identity_id,
            team_resource,
            vec![InvitationRequest::member_of(bob.identity_id)],
        )
        .await
        .unwrap();
    let code = app.accept_code_for(bob.identity_id);

    let response = app
        .router()
        .oneshot(get_request(&format!("/api/invitations/accept/{}", code), None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["resource_id"], team_resource.to_string());
}

#[tokio::test]
async fn test_issue_rejects_empty_batch_and_forbids_outsiders() {
    let app = TestApp::spawn().await;
    let outsider = app.create_user("mallory").await;
    let bob = app.create_user("bob").await;
    let team = app.create_team("platform", None).await;
    let tokens = app.login(outsider.identity_id).await;
    let uri = format!("/api/invitations/{}", team.identity_id);

    let empty = app
        .router()
        .oneshot(json_request(
            "POST",
            &uri,
            Some(&tokens.access_token),
            json!({ "invitations": [] }),
        ))
        .await
        .unwrap();
    let forbidden = app
        .router()
        .oneshot(json_request(
            "POST",
            &uri,
            Some(&tokens.access_token),
            json!({ "invitations": [{ "identity_id": bob.identity_id, "member": true }] }),
        ))
        .await
        .unwrap();

    assert_eq!(empty.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(forbidden.status(), StatusCode::FORBIDDEN);
    assert_eq!(app.notifications.call_count(), 0);
}

#[tokio::test]
async fn test_rescind_over_http() {
    let app = TestApp::spawn().await;
    let admin = app.create_user("alice").await;
    let bob = app.create_user("bob").await;
    let team = app.create_team("platform", None).await;
    let team_resource = team.resource_id.unwrap();
    let admin_role = app.team_admin_role().await;
    app.state
        .role_graph
        .assign_role(admin.identity_id, team_resource, admin_role.role_id)
        .await
        .unwrap();
    let issued = app
        .state
        .invitations
        .issue(
            admin.identity_id,
            team_resource,
            vec![InvitationRequest::member_of(bob.identity_id)],
        )
        .await
        .unwrap();
    let tokens = app.login(admin.identity_id).await;

    let request = Request::builder()
        .method("DELETE")
        .uri(format!("/api/invitations/{}", issued[0].invitation_id))
        .header(header::AUTHORIZATION, format!("Bearer {}", tokens.access_token))
        .body(Body::empty())
        .unwrap();
    let response = app.router().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert!(app
        .state
        .invitations
        .find(issued[0].invitation_id)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_audit_and_logout_over_http() {
    let app = TestApp::spawn().await;
    let owner = app.create_user("owner").await;
    let space = app.create_space("demo", owner.identity_id, None).await;
    let tokens = app.login(owner.identity_id).await;
    let audit_uri = format!("/api/token/audit?resource_id={}", space.resource_id);

    let audit = app
        .router()
        .oneshot(json_request("POST", &audit_uri, Some(&tokens.access_token), json!({})))
        .await
        .unwrap();
    assert_eq!(audit.status(), StatusCode::OK);
    let body = body_json(audit).await;
    assert_eq!(body["status"], "reissued");
    let rpt = body["token"]["access_token"].as_str().unwrap().to_string();

    let again = app
        .router()
        .oneshot(json_request("POST", &audit_uri, Some(&rpt), json!({})))
        .await
        .unwrap();
    assert_eq!(body_json(again).await["status"], "unchanged");

    let logout = app
        .router()
        .oneshot(json_request("POST", "/api/logout", Some(&tokens.access_token), json!({})))
        .await
        .unwrap();
    assert_eq!(logout.status(), StatusCode::OK);
    assert_eq!(body_json(logout).await["tokens_logged_out"], 3);

    let after = app
        .router()
        .oneshot(json_request("POST", &audit_uri, Some(&rpt), json!({})))
        .await
        .unwrap();
    assert_eq!(after.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_refresh_over_http() {
    let app = TestApp::spawn().await;
    let bob = app.create_user("bob").await;
    let tokens = app.login(bob.identity_id).await;
    let refresh_token = tokens.refresh_token.unwrap();

    let first = app
        .router()
        .oneshot(json_request(
            "POST",
            "/api/token/refresh",
            None,
            json!({ "refresh_token": refresh_token }),
        ))
        .await
        .unwrap();
    let second = app
        .router()
        .oneshot(json_request(
            "POST",
            "/api/token/refresh",
            None,
            json!({ "refresh_token": refresh_token }),
        ))
        .await
        .unwrap();

    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(second.status(), StatusCode::UNAUTHORIZED);
}
