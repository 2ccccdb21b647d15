use std::sync::{Arc, Mutex};

use axum::{body::Body, extract::State, http::Request, Json, Router};
use reqwest::StatusCode;
use serde_json::{json, Value};

use gatehouse_api::app::services::{build_in_memory_services, AppServices};
use gatehouse_api::config::RateLimitConfig;
use gatehouse_api::GatewayConfig;
use gatehouse_core::UserId;

const JWT_SECRET: &str = "test-secret";

#[derive(Debug, Clone)]
struct Hit {
    method: String,
    path_and_query: String,
    user_id: Option<String>,
}

/// Records every request it receives and answers 200.
struct StubUpstream {
    base_url: String,
    hits: Arc<Mutex<Vec<Hit>>>,
    handle: tokio::task::JoinHandle<()>,
}

impl StubUpstream {
    async fn spawn() -> Self {
        let hits: Arc<Mutex<Vec<Hit>>> = Arc::default();

        async fn record(State(hits): State<Arc<Mutex<Vec<Hit>>>>, req: Request<Body>) -> Json<Value> {
            hits.lock().unwrap().push(Hit {
                method: req.method().to_string(),
                path_and_query: req
                    .uri()
                    .path_and_query()
                    .map(|p| p.to_string())
                    .unwrap_or_default(),
                user_id: req
                    .headers()
                    .get("x-user-id")
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string),
            });
            Json(json!({ "upstream": "problem" }))
        }

        let app = Router::new().fallback(record).with_state(hits.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind stub upstream");
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { base_url, hits, handle }
    }

    fn hits(&self) -> Vec<Hit> {
        self.hits.lock().unwrap().clone()
    }
}

impl Drop for StubUpstream {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

struct TestServer {
    base_url: String,
    services: Arc<AppServices>,
    upstream: StubUpstream,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn() -> Self {
        Self::spawn_with(|_| {}).await
    }

    /// Same router as prod, in-memory store, submission service unusable.
    async fn spawn_with(configure: impl FnOnce(&mut GatewayConfig)) -> Self {
        let upstream = StubUpstream::spawn().await;

        let mut config = GatewayConfig {
            jwt_secret: JWT_SECRET.to_string(),
            problem_service: upstream.base_url.clone(),
            submission_service: "not a url".to_string(),
            rate_limit: RateLimitConfig::disabled(),
            ..GatewayConfig::default()
        };
        configure(&mut config);
        let services = Arc::new(build_in_memory_services(config).await.unwrap());
        let app = gatehouse_api::build_app(services.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url,
            services,
            upstream,
            handle,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Token for `id` after granting it `roles`.
    async fn token_with_roles(&self, id: i64, email: &str, roles: &[&str]) -> String {
        let user = UserId::new(id);
        for name in roles {
            let role = self.services.engine.role_by_name(name).await.unwrap();
            self.services.engine.assign_role(user, role.id).await.unwrap();
        }
        self.services.sessions.issue(user, email).unwrap()
    }

    async fn signup(&self, client: &reqwest::Client, email: &str, password: &str) -> Value {
        let res = client
            .post(self.url("/api/v1/auth/signup"))
            .json(&json!({ "email": email, "password": password, "username": "tester" }))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        res.json().await.unwrap()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[tokio::test]
async fn health_is_public() {
    let srv = TestServer::spawn().await;
    let res = reqwest::get(srv.url("/health")).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn auth_required_for_protected_endpoints() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client.get(srv.url("/api/v1/whoami")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["status"], "failed");

    let res = client
        .get(srv.url("/api/v1/whoami"))
        .bearer_auth("not-a-token")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn token_on_protected_route_succeeds_end_to_end() {
    let srv = TestServer::spawn().await;
    let token = srv.services.sessions.issue(UserId::new(7), "a@b.com").unwrap();

    let res = reqwest::Client::new()
        .get(srv.url("/api/v1/whoami"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["status"], "success");
    assert_eq!(body["data"]["id"], 7);
    assert_eq!(body["data"]["email"], "a@b.com");
}

#[tokio::test]
async fn gateway_forwards_reads_with_user_id() {
    let srv = TestServer::spawn().await;
    let token = srv.token_with_roles(7, "a@b.com", &["user"]).await;

    let res = reqwest::Client::new()
        .get(srv.url("/api/v1/problem/42?lang=rust"))
        .bearer_auth(&token)
        .header("x-user-id", "999")
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["upstream"], "problem");

    let hits = srv.upstream.hits();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].method, "GET");
    assert_eq!(hits[0].path_and_query, "/api/v1/problem/42?lang=rust");
    assert_eq!(hits[0].user_id.as_deref(), Some("7"));
}

#[tokio::test]
async fn gateway_forwards_prefix_with_trailing_slash() {
    let srv = TestServer::spawn().await;
    let token = srv.token_with_roles(7, "a@b.com", &["user"]).await;

    let res = reqwest::Client::new()
        .get(srv.url("/api/v1/problem/"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::OK);
    let hits = srv.upstream.hits();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].path_and_query, "/api/v1/problem/");
}

#[tokio::test]
async fn gateway_rejects_writes_from_non_admins_before_proxying() {
    let srv = TestServer::spawn().await;
    let token = srv.token_with_roles(7, "a@b.com", &["user"]).await;

    let res = reqwest::Client::new()
        .delete(srv.url("/api/v1/problem/42"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "Forbidden: You do not have the required roles");
    assert!(srv.upstream.hits().is_empty());
}

#[tokio::test]
async fn gateway_forwards_writes_from_admins() {
    let srv = TestServer::spawn().await;
    let token = srv.token_with_roles(1, "admin@b.com", &["admin"]).await;

    let res = reqwest::Client::new()
        .delete(srv.url("/api/v1/company/3"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::OK);
    let hits = srv.upstream.hits();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].method, "DELETE");
    assert_eq!(hits[0].path_and_query, "/api/v1/company/3");
}

#[tokio::test]
async fn gateway_requires_a_role_for_reads() {
    let srv = TestServer::spawn().await;
    let token = srv.token_with_roles(9, "nobody@b.com", &[]).await;

    let res = reqwest::Client::new()
        .get(srv.url("/api/v1/problem"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    assert!(srv.upstream.hits().is_empty());
}

#[tokio::test]
async fn explanation_is_read_only() {
    let srv = TestServer::spawn().await;
    let token = srv.token_with_roles(1, "admin@b.com", &["admin"]).await;

    let res = reqwest::Client::new()
        .post(srv.url("/api/v1/explanation/1"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert!(srv.upstream.hits().is_empty());
}

#[tokio::test]
async fn invalid_upstream_is_bad_gateway() {
    let srv = TestServer::spawn().await;
    let token = srv.token_with_roles(7, "a@b.com", &["user"]).await;

    let res = reqwest::Client::new()
        .get(srv.url("/api/v1/submission/5"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::BAD_GATEWAY);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["message"], "Bad Gateway");
}

#[tokio::test]
async fn unreachable_upstream_is_bad_gateway() {
    // Nothing listens on port 1.
    let srv = TestServer::spawn_with(|cfg| cfg.problem_service = "http://127.0.0.1:1".to_string()).await;
    let token = srv.token_with_roles(7, "a@b.com", &["user"]).await;

    let res = reqwest::Client::new()
        .get(srv.url("/api/v1/problem/42"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::BAD_GATEWAY);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["status"], "failed");
    assert_eq!(body["message"], "Bad Gateway");
}

#[tokio::test]
async fn unknown_body_fields_are_rejected_before_the_handler() {
    let srv = TestServer::spawn().await;

    let res = reqwest::Client::new()
        .post(srv.url("/api/v1/auth/signup"))
        .json(&json!({
            "email": "a@b.com",
            "password": "password1",
            "username": "ab",
            "is_admin": true,
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    assert!(srv.services.users.all_users().await.unwrap().is_empty());
}

#[tokio::test]
async fn signup_validation_reports_fields() {
    let srv = TestServer::spawn().await;

    let res = reqwest::Client::new()
        .post(srv.url("/api/v1/auth/signup"))
        .json(&json!({ "email": "nope", "password": "short", "username": "ab" }))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: Value = res.json().await.unwrap();
    let fields: Vec<&str> = body["error"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["field"].as_str().unwrap())
        .collect();
    assert_eq!(fields, vec!["email", "password"]);
}

#[tokio::test]
async fn signin_sets_cookie_and_logout_clears_it() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    srv.signup(&client, "a@b.com", "password1").await;

    let res = client
        .post(srv.url("/api/v1/auth/signin"))
        .json(&json!({ "email": "a@b.com", "password": "password1" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let cookie = res.headers()["set-cookie"].to_str().unwrap().to_string();
    assert!(cookie.starts_with("access_token="));
    assert!(cookie.contains("HttpOnly"));
    assert!(cookie.contains("Path=/"));

    let body: Value = res.json().await.unwrap();
    assert_eq!(body["message"], "User logged in successfully");
    assert_eq!(body["data"]["user"]["email"], "a@b.com");
    assert!(body["data"]["user"].get("password_hash").is_none());
    let token = body["data"]["token"].as_str().unwrap().to_string();

    // The cookie alone authenticates.
    let res = client
        .get(srv.url("/api/v1/auth/validate-session"))
        .header("cookie", format!("access_token={token}"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["message"], "User session validated successfully");

    let res = client
        .get(srv.url("/api/v1/auth/logout"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let cleared = res.headers()["set-cookie"].to_str().unwrap();
    assert!(cleared.starts_with("access_token=;"));
    assert!(cleared.contains("Max-Age=-1"));
}

#[tokio::test]
async fn signin_failures() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    srv.signup(&client, "a@b.com", "password1").await;

    let res = client
        .post(srv.url("/api/v1/auth/signin"))
        .json(&json!({ "email": "a@b.com", "password": "password2" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "invalid credentials");

    let res = client
        .post(srv.url("/api/v1/auth/signin"))
        .json(&json!({ "email": "who@b.com", "password": "password1" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "user not found");
}

#[tokio::test]
async fn duplicate_signup_is_a_conflict() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    srv.signup(&client, "a@b.com", "password1").await;

    let res = client
        .post(srv.url("/api/v1/auth/signup"))
        .json(&json!({ "email": "a@b.com", "password": "password1", "username": "again" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn users_may_read_only_themselves() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let me = srv.signup(&client, "me@b.com", "password1").await;
    let other = srv.signup(&client, "other@b.com", "password1").await;
    let me_id = me["data"]["id"].as_i64().unwrap();
    let other_id = other["data"]["id"].as_i64().unwrap();

    let token = srv.token_with_roles(me_id, "me@b.com", &["user"]).await;

    let res = client
        .get(srv.url(&format!("/api/v1/auth/user/{me_id}")))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["data"]["email"], "me@b.com");

    let res = client
        .get(srv.url(&format!("/api/v1/auth/user/{other_id}")))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    let res = client
        .get(srv.url("/api/v1/auth/user/abc"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn admins_may_read_any_user_and_list_users() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let someone = srv.signup(&client, "someone@b.com", "password1").await;
    let someone_id = someone["data"]["id"].as_i64().unwrap();

    let token = srv.token_with_roles(100, "admin@b.com", &["admin"]).await;

    let res = client
        .get(srv.url(&format!("/api/v1/auth/user/{someone_id}")))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let res = client
        .get(srv.url("/api/v1/auth/users"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn role_administration_lifecycle() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let token = srv.token_with_roles(1, "admin@b.com", &["admin"]).await;

    let res = client
        .post(srv.url("/api/v1/roles"))
        .bearer_auth(&token)
        .json(&json!({ "name": "editor", "description": "edits problems" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["message"], "Role created successfully");
    let role_id = body["data"]["id"].as_i64().unwrap();

    let res = client
        .post(srv.url("/api/v1/roles"))
        .bearer_auth(&token)
        .json(&json!({ "name": "editor" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CONFLICT);

    let res = client
        .put(srv.url(&format!("/api/v1/roles/{role_id}")))
        .bearer_auth(&token)
        .json(&json!({ "description": "edits everything" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["data"]["name"], "editor");
    assert_eq!(body["data"]["description"], "edits everything");

    let res = client
        .get(srv.url("/api/v1/roles/name?query=editor"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let res = client
        .post(srv.url(&format!("/api/v1/roles/assign/5/{role_id}")))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    let assignment_id = body["data"]["id"].as_i64().unwrap();
    assert!(srv.services.engine.has_role(UserId::new(5), "editor").await.unwrap());

    let res = client
        .delete(srv.url(&format!("/api/v1/roles/remove/{assignment_id}")))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert!(!srv.services.engine.has_role(UserId::new(5), "editor").await.unwrap());

    let res = client
        .delete(srv.url(&format!("/api/v1/roles/remove/{assignment_id}")))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn role_routes_require_admin() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let token = srv.token_with_roles(7, "a@b.com", &["user"]).await;

    let res = client
        .get(srv.url("/api/v1/roles/roles"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let admin = srv.token_with_roles(1, "admin@b.com", &["admin"]).await;
    let res = client
        .get(srv.url("/api/v1/roles/roles"))
        .bearer_auth(&admin)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["data"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn role_lookup_input_errors() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let token = srv.token_with_roles(1, "admin@b.com", &["admin"]).await;

    let res = client
        .get(srv.url("/api/v1/roles/name?query="))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "Invalid query");

    let res = client
        .get(srv.url("/api/v1/roles/abc"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "Invalid role id");

    let res = client
        .get(srv.url("/api/v1/roles/999"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "role not found");
}
