//! Token lifecycle integration tests.

mod common;

use access_service::{
    models::{resource_type::VIEW_SCOPE, TokenStatus, TokenType},
    repository::TokenRepository,
    services::{AuditOutcome, TokenGrant, TokenPurgeJob},
};
use chrono::{Duration, Utc};
use common::{TestApp, TEST_SERVICE_ACCOUNT_ID, TEST_SERVICE_ACCOUNT_SECRET};
use service_core::error::AppError;
use std::sync::Arc;
use uuid::Uuid;

#[tokio::test]
async fn test_stale_flag_is_idempotent_and_keeps_other_flags() {
    // Arrange
    let app = TestApp::spawn().await;
    let bob = app.create_user("bob").await;
    let issued = app.login(bob.identity_id).await;
    let access = app.state.tokens.authenticate(&issued.access_token).await.unwrap();
    assert!(access.token.valid());

    // Act
    app.state.tokens.mark_stale(bob.identity_id).await.unwrap();
    app.state.tokens.mark_stale(bob.identity_id).await.unwrap();

    // Assert
    let token = app.state.store.load_token(access.token.token_id).await.unwrap();
    assert_eq!(token.status(), TokenStatus::STALE);
    assert!(!token.valid());

    app.state.tokens.revoke(token.token_id).await.unwrap();
    let token = app.state.store.load_token(token.token_id).await.unwrap();
    assert!(token.has_status(TokenStatus::STALE));
    assert!(token.has_status(TokenStatus::REVOKED));
}

#[tokio::test]
async fn test_stale_tokens_still_authenticate() {
    let app = TestApp::spawn().await;
    let bob = app.create_user("bob").await;
    let issued = app.login(bob.identity_id).await;

    app.state.tokens.mark_stale(bob.identity_id).await.unwrap();

    let authenticated = app.state.tokens.authenticate(&issued.access_token).await.unwrap();
    assert_eq!(authenticated.identity_id(), bob.identity_id);
}

#[tokio::test]
async fn test_revoked_and_logged_out_tokens_are_rejected() {
    let app = TestApp::spawn().await;
    let bob = app.create_user("bob").await;
    let carol = app.create_user("carol").await;
    let bob_tokens = app.login(bob.identity_id).await;
    let carol_tokens = app.login(carol.identity_id).await;

    let bob_access = app.state.tokens.authenticate(&bob_tokens.access_token).await.unwrap();
    app.state.tokens.revoke(bob_access.token.token_id).await.unwrap();
    let logged_out = app.state.tokens.logout(carol.identity_id).await.unwrap();

    assert_eq!(logged_out, 2);
    assert!(matches!(
        app.state.tokens.authenticate(&bob_tokens.access_token).await,
        Err(AppError::Unauthorized(_))
    ));
    assert!(matches!(
        app.state.tokens.authenticate(&carol_tokens.access_token).await,
        Err(AppError::Unauthorized(_))
    ));
    let refresh = carol_tokens.refresh_token.unwrap();
    assert!(matches!(
        app.state.tokens.refresh(&refresh).await,
        Err(AppError::Unauthorized(_))
    ));
}

#[tokio::test]
async fn test_malformed_and_unknown_tokens_are_rejected() {
    let app = TestApp::spawn().await;

    let garbage = app.state.tokens.authenticate("not-a-jwt").await;
    assert!(matches!(garbage, Err(AppError::InvalidToken(_))));

    let bob = app.create_user("bob").await;
    let issued = app.login(bob.identity_id).await;
    let access = app.state.tokens.authenticate(&issued.access_token).await.unwrap();
    app.state.tokens.delete_token(access.token.token_id).await.unwrap();

    let deleted = app.state.tokens.authenticate(&issued.access_token).await;
    assert!(matches!(deleted, Err(AppError::Unauthorized(_))));
}

#[tokio::test]
async fn test_refresh_rotates_and_rejects_reuse() {
    // Arrange
    let app = TestApp::spawn().await;
    let bob = app.create_user("bob").await;
    let issued = app.login(bob.identity_id).await;
    let refresh_token = issued.refresh_token.clone().unwrap();

    // Act
    let rotated = app.state.tokens.refresh(&refresh_token).await.unwrap();
    let reuse = app.state.tokens.refresh(&refresh_token).await;

    // Assert
    assert_ne!(rotated.access_token, issued.access_token);
    assert!(rotated.refresh_token.is_some());
    assert!(matches!(reuse, Err(AppError::Unauthorized(_))));

    let new_refresh = rotated.refresh_token.unwrap();
    assert!(app.state.tokens.refresh(&new_refresh).await.is_ok());
}

#[tokio::test]
async fn test_refresh_requires_a_refresh_token() {
    let app = TestApp::spawn().await;
    let bob = app.create_user("bob").await;
    let issued = app.login(bob.identity_id).await;

    let result = app.state.tokens.refresh(&issued.access_token).await;

    assert!(matches!(result, Err(AppError::Unauthorized(_))));
}

#[tokio::test]
async fn test_revoke_keeps_flags_set_after_the_token_was_read() {
    // Arrange
    let app = TestApp::spawn().await;
    let bob = app.create_user("bob").await;
    let issued = app.login(bob.identity_id).await;
    let access = app.state.tokens.authenticate(&issued.access_token).await.unwrap();
    let snapshot = app.state.store.load_token(access.token.token_id).await.unwrap();

    // Act
    app.state.tokens.logout(bob.identity_id).await.unwrap();
    app.state.store.save_token(&snapshot).await.unwrap();
    app.state.tokens.revoke(snapshot.token_id).await.unwrap();

    // Assert
    let token = app.state.store.load_token(snapshot.token_id).await.unwrap();
    assert_eq!(token.status(), TokenStatus::LOGGED_OUT | TokenStatus::REVOKED);
}

#[tokio::test]
async fn test_revoke_of_unknown_token_is_not_found() {
    let app = TestApp::spawn().await;

    let result = app.state.tokens.revoke(Uuid::new_v4()).await;

    assert!(matches!(result, Err(AppError::NotFound(_))));
}

#[tokio::test]
async fn test_concurrent_refreshes_rotate_exactly_once() {
    let app = TestApp::spawn().await;
    let bob = app.create_user("bob").await;
    let refresh_token = app.login(bob.identity_id).await.refresh_token.unwrap();

    let attempts = (0..8).map(|_| {
        let tokens = Arc::clone(&app.state.tokens);
        let refresh_token = refresh_token.clone();
        tokio::spawn(async move { tokens.refresh(&refresh_token).await })
    });
    let results: Vec<_> = futures::future::join_all(attempts)
        .await
        .into_iter()
        .map(|r| r.expect("refresh task panicked"))
        .collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| matches!(e, AppError::Unauthorized(_))));
    // One original pair plus one rotated pair.
    assert_eq!(app.state.tokens.list_tokens(bob.identity_id).await.unwrap().len(), 4);
}

#[tokio::test]
async fn test_client_credentials_issue_a_pat_for_the_service_account() {
    let app = TestApp::spawn().await;
    let client_id: Uuid = TEST_SERVICE_ACCOUNT_ID.parse().unwrap();

    let issued = app
        .state
        .tokens
        .exchange(TokenGrant::ClientCredentials {
            client_id,
            client_secret: TEST_SERVICE_ACCOUNT_SECRET.to_string(),
        })
        .await
        .unwrap();

    assert!(issued.refresh_token.is_none());
    let authenticated = app.state.tokens.authenticate(&issued.access_token).await.unwrap();
    assert_eq!(authenticated.identity_id(), client_id);
    assert_eq!(authenticated.claims.token_type(), Some(TokenType::Pat));

    // A second exchange reuses the registered service identity.
    let again = app
        .state
        .tokens
        .exchange(TokenGrant::ClientCredentials {
            client_id,
            client_secret: TEST_SERVICE_ACCOUNT_SECRET.to_string(),
        })
        .await;
    assert!(again.is_ok());
}

#[tokio::test]
async fn test_client_credentials_reject_bad_secret_and_unknown_client() {
    let app = TestApp::spawn().await;

    let wrong_secret = app
        .state
        .tokens
        .exchange(TokenGrant::ClientCredentials {
            client_id: TEST_SERVICE_ACCOUNT_ID.parse().unwrap(),
            client_secret: "wrong".to_string(),
        })
        .await;
    let unknown = app
        .state
        .tokens
        .exchange(TokenGrant::ClientCredentials {
            client_id: Uuid::new_v4(),
            client_secret: TEST_SERVICE_ACCOUNT_SECRET.to_string(),
        })
        .await;

    assert!(matches!(wrong_secret, Err(AppError::Unauthorized(_))));
    assert!(matches!(unknown, Err(AppError::Unauthorized(_))));
}

#[tokio::test]
async fn test_audit_reissues_after_role_change_and_is_stable_otherwise() {
    // Arrange
    let app = TestApp::spawn().await;
    let owner = app.create_user("owner").await;
    let bob = app.create_user("bob").await;
    let space = app.create_space("demo", owner.identity_id, None).await;
    let contributor = app.space_contributor_role().await;
    let issued = app.login(bob.identity_id).await;

    // Act: a plain access token has no linked snapshot yet.
    let first = app
        .state
        .tokens
        .audit(&issued.access_token, space.resource_id)
        .await
        .unwrap();
    let AuditOutcome::Reissued(rpt) = first else {
        panic!("expected a reissued token");
    };
    let claims = app.state.jwt.validate(&rpt.access_token).unwrap();
    let permissions = claims.permissions.unwrap();
    assert_eq!(permissions.len(), 1);
    assert!(permissions[0].scopes.is_empty());

    let unchanged = app
        .state
        .tokens
        .audit(&rpt.access_token, space.resource_id)
        .await
        .unwrap();
    assert!(matches!(unchanged, AuditOutcome::Unchanged));

    app.state
        .role_graph
        .assign_role(bob.identity_id, space.resource_id, contributor.role_id)
        .await
        .unwrap();

    let after_change = app
        .state
        .tokens
        .audit(&rpt.access_token, space.resource_id)
        .await
        .unwrap();

    // Assert
    let AuditOutcome::Reissued(updated) = after_change else {
        panic!("expected a reissued token after the role change");
    };
    let claims = app.state.jwt.validate(&updated.access_token).unwrap();
    let permissions = claims.permissions.unwrap();
    assert_eq!(permissions[0].resource_id, space.resource_id);
    assert!(permissions[0].scopes.contains(&VIEW_SCOPE.to_string()));
}

#[tokio::test]
async fn test_audit_carries_other_linked_resources_forward() {
    let app = TestApp::spawn().await;
    let owner = app.create_user("owner").await;
    let bob = app.create_user("bob").await;
    let first_space = app.create_space("first", owner.identity_id, None).await;
    let second_space = app.create_space("second", owner.identity_id, None).await;
    let issued = app.login(bob.identity_id).await;

    let AuditOutcome::Reissued(rpt) = app
        .state
        .tokens
        .audit(&issued.access_token, first_space.resource_id)
        .await
        .unwrap()
    else {
        panic!("expected a reissued token");
    };
    let AuditOutcome::Reissued(both) = app
        .state
        .tokens
        .audit(&rpt.access_token, second_space.resource_id)
        .await
        .unwrap()
    else {
        panic!("expected a reissued token");
    };

    let claims = app.state.jwt.validate(&both.access_token).unwrap();
    let mut resources: Vec<Uuid> = claims
        .permissions
        .unwrap()
        .into_iter()
        .map(|p| p.resource_id)
        .collect();
    resources.sort();
    let mut expected = vec![first_space.resource_id, second_space.resource_id];
    expected.sort();
    assert_eq!(resources, expected);
}

#[tokio::test]
async fn test_audit_of_unknown_resource_is_not_found() {
    let app = TestApp::spawn().await;
    let bob = app.create_user("bob").await;
    let issued = app.login(bob.identity_id).await;

    let result = app
        .state
        .tokens
        .audit(&issued.access_token, Uuid::new_v4())
        .await;

    assert!(matches!(result, Err(AppError::NotFound(_))));
}

#[tokio::test]
async fn test_purge_removes_only_tokens_past_retention() {
    // Arrange
    let app = TestApp::spawn().await;
    let bob = app.create_user("bob").await;
    app.login(bob.identity_id).await;
    let tokens = app.state.tokens.list_tokens(bob.identity_id).await.unwrap();
    assert_eq!(tokens.len(), 2);

    app.memory
        .set_token_expiry(tokens[0].token_id, Utc::now() - Duration::hours(48))
        .await
        .unwrap();
    app.memory
        .set_token_expiry(tokens[1].token_id, Utc::now() - Duration::hours(1))
        .await
        .unwrap();

    // Act
    let purged = app.state.tokens.purge_expired(24).await.unwrap();

    // Assert
    assert_eq!(purged, 1);
    let remaining = app.state.tokens.list_tokens(bob.identity_id).await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].token_id, tokens[1].token_id);
}

#[tokio::test]
async fn test_purge_job_runs_and_stops_on_cancel() {
    let app = TestApp::spawn().await;
    let bob = app.create_user("bob").await;
    app.login(bob.identity_id).await;
    let tokens = app.state.tokens.list_tokens(bob.identity_id).await.unwrap();
    for token in &tokens {
        app.memory
            .set_token_expiry(token.token_id, Utc::now() - Duration::hours(72))
            .await
            .unwrap();
    }

    let job = TokenPurgeJob::new(Arc::clone(&app.state.tokens), &app.state.config.maintenance);
    assert_eq!(job.run_once().await.unwrap(), 2);

    let shutdown = job.shutdown_token();
    let handle = job.start();
    shutdown.cancel();
    tokio::time::timeout(std::time::Duration::from_secs(5), handle)
        .await
        .expect("purge job did not stop")
        .expect("purge job panicked");
}
