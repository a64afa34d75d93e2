use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use chrono::{Duration, Utc};
use http_body_util::BodyExt;
use jsonwebtoken::{EncodingKey, Header};
use serde_json::{Value, json};
use tower::ServiceExt;

use forgecrm_api::app::build_app;
use forgecrm_api::app::services::AppServices;
use forgecrm_auth::{Actor, AuthConfig, JwtClaims, NewUser, Role, UserStore, password};

const SECRET: &str = "test-secret";
const PASSWORD: &str = "correct horse battery";

struct Harness {
    app: Router,
    services: Arc<AppServices>,
}

impl Harness {
    fn new() -> Self {
        let config = AuthConfig::new(SECRET, "test-pepper").with_bcrypt_cost(4);
        let services = Arc::new(AppServices::in_memory(&config).unwrap());
        Self {
            app: build_app(Arc::clone(&services)),
            services,
        }
    }

    async fn user(&self, email: &str, role: Role) -> Actor {
        self.services
            .crm
            .store()
            .insert_user(NewUser {
                email: email.to_string(),
                password_hash: password::hash_password(PASSWORD, 4).unwrap(),
                first_name: "Test".to_string(),
                last_name: "User".to_string(),
                role,
            })
            .await
            .unwrap()
            .actor()
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    async fn login(&self, email: &str) -> String {
        let (status, body) = self
            .send(post_json("/auth/login", json!({ "email": email, "password": PASSWORD })))
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        body["access_token"].as_str().unwrap().to_string()
    }
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get_with(uri: &str, header: &str, value: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header(header, value)
        .body(Body::empty())
        .unwrap()
}

fn bearer(token: &str) -> String {
    format!("Bearer {token}")
}

fn mint(secret: &str, actor: &Actor, issued_at: chrono::DateTime<Utc>, ttl: Duration) -> String {
    let claims = JwtClaims::new(actor, "someone@example.com", issued_at, ttl);
    jsonwebtoken::encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .unwrap()
}

#[tokio::test]
async fn health_needs_no_credentials() {
    let harness = Harness::new();
    let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let response = harness.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn protected_routes_reject_missing_credentials() {
    let harness = Harness::new();
    let request = Request::builder().uri("/auth/me").body(Body::empty()).unwrap();
    let (status, body) = harness.send(request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "unauthorized");
}

#[tokio::test]
async fn login_then_whoami() {
    let harness = Harness::new();
    let alice = harness.user("alice@example.com", Role::Sales).await;

    let (status, body) = harness
        .send(post_json(
            "/auth/login",
            json!({ "email": "alice@example.com", "password": "wrong password" }),
        ))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "invalid_credentials");

    let token = harness.login("Alice@Example.com").await;
    let (status, body) = harness
        .send(get_with("/auth/me", "authorization", &bearer(&token)))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user_id"], alice.id.get());
    assert_eq!(body["role"], "sales");
    assert_eq!(body["credential"], "token");
}

#[tokio::test]
async fn disabled_account_cannot_log_in() {
    let harness = Harness::new();
    let admin = harness.user("admin@example.com", Role::Admin).await;
    let alice = harness.user("alice@example.com", Role::Sales).await;
    harness.services.crm.delete_user(&admin, alice.id).await.unwrap();

    let (status, body) = harness
        .send(post_json(
            "/auth/login",
            json!({ "email": "alice@example.com", "password": PASSWORD }),
        ))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "account_disabled");
}

#[tokio::test]
async fn expired_and_forged_tokens_are_distinguished() {
    let harness = Harness::new();
    let alice = harness.user("alice@example.com", Role::Sales).await;

    let expired = mint(SECRET, &alice, Utc::now() - Duration::hours(2), Duration::minutes(5));
    let (status, body) = harness
        .send(get_with("/auth/me", "authorization", &bearer(&expired)))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "token_expired");

    let forged = mint("other-secret", &alice, Utc::now(), Duration::minutes(5));
    let (status, body) = harness
        .send(get_with("/auth/me", "authorization", &bearer(&forged)))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "token_invalid");
}

#[tokio::test]
async fn api_key_lifecycle() {
    let harness = Harness::new();
    harness.user("alice@example.com", Role::Sales).await;
    let token = harness.login("alice@example.com").await;

    let create = Request::builder()
        .method(Method::POST)
        .uri("/auth/api-keys")
        .header("authorization", bearer(&token))
        .header("content-type", "application/json")
        .body(Body::from(json!({ "name": "ci" }).to_string()))
        .unwrap();
    let (status, body) = harness.send(create).await;
    assert_eq!(status, StatusCode::CREATED);
    let raw = body["key"].as_str().unwrap().to_string();
    let key_id = body["api_key"]["id"].as_u64().unwrap();
    assert!(body["api_key"].get("key_hash").is_none());

    let (status, body) = harness.send(get_with("/auth/me", "x-api-key", &raw)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["credential"], "api_key");

    let (status, body) = harness
        .send(get_with("/auth/api-keys", "authorization", &bearer(&token)))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);

    let revoke = Request::builder()
        .method(Method::DELETE)
        .uri(format!("/auth/api-keys/{key_id}"))
        .header("authorization", bearer(&token))
        .body(Body::empty())
        .unwrap();
    let (status, _) = harness.send(revoke).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body) = harness.send(get_with("/auth/me", "x-api-key", &raw)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "api_key_invalid");
}

#[tokio::test]
async fn sales_cannot_issue_keys_for_others() {
    let harness = Harness::new();
    harness.user("alice@example.com", Role::Sales).await;
    let bob = harness.user("bob@example.com", Role::Sales).await;
    let token = harness.login("alice@example.com").await;

    let create = Request::builder()
        .method(Method::POST)
        .uri("/auth/api-keys")
        .header("authorization", bearer(&token))
        .header("content-type", "application/json")
        .body(Body::from(json!({ "name": "sneaky", "user_id": bob.id }).to_string()))
        .unwrap();
    let (status, body) = harness.send(create).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "forbidden");
}

#[tokio::test]
async fn policy_matrix_is_admin_only() {
    let harness = Harness::new();
    harness.user("admin@example.com", Role::Admin).await;
    harness.user("alice@example.com", Role::Sales).await;

    let sales_token = harness.login("alice@example.com").await;
    let (status, _) = harness
        .send(get_with("/admin/policy", "authorization", &bearer(&sales_token)))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let admin_token = harness.login("admin@example.com").await;
    let (status, body) = harness
        .send(get_with("/admin/policy", "authorization", &bearer(&admin_token)))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(!body.as_array().unwrap().is_empty());

    let (status, body) = harness
        .send(get_with(
            "/auth/explain?resource=ticket&operation=list",
            "authorization",
            &bearer(&sales_token),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["granted"], false);
    assert_eq!(body["permission"], "ticket.list");
}
