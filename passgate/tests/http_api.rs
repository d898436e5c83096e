//! HTTP API tests against the full router on the in-memory repository.
//!
//! Run with: `cargo test -p passgate --test http_api`

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)] // Test code

use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum_test::{TestRequest, TestServer};
use passgate::server::{build_router, AppState};
use passgate::{
    InMemoryPassRepository, PassEnvironment, PassRepository, PassService, RandomTokenGenerator,
    UserId, VerifyLinks,
};
use passgate_testing::{init_test_tracing, test_clock};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

struct Caller {
    id: UserId,
    name: &'static str,
    role: &'static str,
}

impl Caller {
    fn member(name: &'static str) -> Self {
        Self {
            id: UserId::new(),
            name,
            role: "member",
        }
    }

    fn staff(name: &'static str) -> Self {
        Self {
            id: UserId::new(),
            name,
            role: "staff",
        }
    }

    fn admin() -> Self {
        Self {
            id: UserId::new(),
            name: "Office",
            role: "admin",
        }
    }

    fn sign(&self, request: TestRequest) -> TestRequest {
        request
            .add_header(
                HeaderName::from_static("x-user-id"),
                HeaderValue::from_str(&self.id.to_string()).unwrap(),
            )
            .add_header(
                HeaderName::from_static("x-user-name"),
                HeaderValue::from_static(self.name),
            )
            .add_header(
                HeaderName::from_static("x-user-role"),
                HeaderValue::from_static(self.role),
            )
    }
}

fn server() -> TestServer {
    init_test_tracing();
    let repository: Arc<dyn PassRepository> = Arc::new(InMemoryPassRepository::new());
    let env = PassEnvironment::new(
        Arc::new(test_clock()),
        Arc::new(RandomTokenGenerator),
        Arc::clone(&repository),
    );
    let service = PassService::new(env, VerifyLinks::new("https://club.example"));
    let state = AppState::new(service, repository);

    TestServer::new(build_router(state, Duration::from_secs(10))).unwrap()
}

async fn register_ticket(server: &TestServer, admin: &Caller, owner: &Caller) -> String {
    let response = admin
        .sign(server.post("/api/admin/tickets"))
        .json(&json!({
            "owner_id": owner.id.to_string(),
            "amount": 2500,
            "currency": "eur",
            "event_name": "Summer Social",
        }))
        .await;
    response.assert_status(StatusCode::CREATED);

    let body = response.json::<Value>();
    assert_eq!(body["type"], "ticket");
    assert_eq!(body["currency"], "EUR");
    assert_eq!(body["status"], "paid");
    body["id"].as_str().unwrap().to_string()
}

async fn issue(server: &TestServer, owner: &Caller, ticket_id: &str) -> Value {
    let response = owner
        .sign(server.post("/api/qr/issue"))
        .json(&json!({ "ticket_id": ticket_id }))
        .await;
    response.assert_status_ok();
    response.json::<Value>()
}

async fn validate(server: &TestServer, caller: &Caller, body: &Value) -> Value {
    let response = caller.sign(server.post("/api/qr/validate")).json(body).await;
    response.assert_status_ok();
    response.json::<Value>()
}

#[tokio::test]
async fn health_and_readiness_report_ok() {
    let server = server();

    let health = server.get("/health").await;
    health.assert_status_ok();
    assert_eq!(health.json::<Value>()["status"], "ok");

    let ready = server.get("/ready").await;
    ready.assert_status_ok();
    assert_eq!(ready.json::<Value>(), json!({ "ready": true, "database": true }));
}

#[tokio::test]
async fn metrics_are_not_served_without_a_recorder() {
    let server = server();
    server
        .get("/metrics")
        .await
        .assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn requests_without_a_session_are_unauthenticated() {
    let server = server();

    let response = server
        .post("/api/qr/issue")
        .json(&json!({ "ticket_id": UserId::new().to_string() }))
        .await;
    response.assert_status(StatusCode::UNAUTHORIZED);

    let response = server
        .get("/api/passes")
        .add_header(
            HeaderName::from_static("x-user-id"),
            HeaderValue::from_static("not-a-uuid"),
        )
        .await;
    response.assert_status(StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn issue_returns_links_and_is_stable() {
    let server = server();
    let admin = Caller::admin();
    let owner = Caller::member("Ana");
    let ticket_id = register_ticket(&server, &admin, &owner).await;

    let first = issue(&server, &owner, &ticket_id).await;
    let second = issue(&server, &owner, &ticket_id).await;

    let token = first["qr_code_token"].as_str().unwrap();
    assert_eq!(first["type"], "ticket");
    assert_eq!(second["qr_code_token"], first["qr_code_token"]);
    assert_eq!(second["qr_code_data"], first["qr_code_data"]);
    assert!(first["verify_url"]
        .as_str()
        .unwrap()
        .starts_with("https://club.example/verify?token="));
    assert!(first["verify_url"].as_str().unwrap().ends_with(token));

    let payload: Value = serde_json::from_str(first["qr_code_data"].as_str().unwrap()).unwrap();
    assert_eq!(payload["type"], "ticket");
    assert_eq!(payload["token"], token);
}

#[tokio::test]
async fn issue_needs_exactly_one_id() {
    let server = server();
    let owner = Caller::member("Ana");

    owner
        .sign(server.post("/api/qr/issue"))
        .json(&json!({
            "ticket_id": UserId::new().to_string(),
            "subscription_id": UserId::new().to_string(),
        }))
        .await
        .assert_status(StatusCode::BAD_REQUEST);

    owner
        .sign(server.post("/api/qr/issue"))
        .json(&json!({}))
        .await
        .assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn issue_for_someone_elses_ticket_is_not_found() {
    let server = server();
    let admin = Caller::admin();
    let owner = Caller::member("Ana");
    let stranger = Caller::member("Ben");
    let ticket_id = register_ticket(&server, &admin, &owner).await;

    stranger
        .sign(server.post("/api/qr/issue"))
        .json(&json!({ "ticket_id": ticket_id }))
        .await
        .assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn scan_then_redeem_then_rescan() {
    let server = server();
    let admin = Caller::admin();
    let owner = Caller::member("Ana");
    let door = Caller::staff("North gate");
    let ticket_id = register_ticket(&server, &admin, &owner).await;
    let token = issue(&server, &owner, &ticket_id).await["qr_code_token"].clone();

    let check = validate(&server, &door, &json!({ "qr_code_token": token })).await;
    assert_eq!(check["valid"], true);
    assert_eq!(check["code"], "accepted");
    assert_eq!(check["ticket_info"]["event_name"], "Summer Social");
    assert_eq!(check["ticket_info"]["price"], "25.00 EUR");
    assert!(check.get("used_at").is_none());

    let redeem = validate(
        &server,
        &door,
        &json!({ "qr_code_token": token, "mark_as_used": true }),
    )
    .await;
    assert_eq!(redeem["valid"], true);
    assert_eq!(redeem["used_by"], "North gate");

    let again = validate(
        &server,
        &door,
        &json!({ "qr_code_token": token, "mark_as_used": true }),
    )
    .await;
    assert_eq!(again["valid"], false);
    assert_eq!(again["code"], "already_redeemed");
    assert_eq!(again["used_by"], "North gate");
    assert_eq!(again["used_at"], redeem["used_at"]);
    assert!(again["reason"].as_str().unwrap().contains("already used"));
}

#[tokio::test]
async fn members_cannot_redeem() {
    let server = server();
    let admin = Caller::admin();
    let owner = Caller::member("Ana");
    let ticket_id = register_ticket(&server, &admin, &owner).await;
    let token = issue(&server, &owner, &ticket_id).await["qr_code_token"].clone();

    owner
        .sign(server.post("/api/qr/validate"))
        .json(&json!({ "qr_code_token": token, "mark_as_used": true }))
        .await
        .assert_status(StatusCode::FORBIDDEN);

    let check = validate(&server, &owner, &json!({ "qr_code_token": token })).await;
    assert_eq!(check["valid"], true);
}

#[tokio::test]
async fn unknown_and_blank_tokens() {
    let server = server();
    let door = Caller::staff("North gate");

    let unknown = validate(&server, &door, &json!({ "qr_code_token": "nope" })).await;
    assert_eq!(unknown["valid"], false);
    assert_eq!(unknown["code"], "unknown_token");
    assert!(unknown.get("type").is_none());

    door.sign(server.post("/api/qr/validate"))
        .json(&json!({ "qr_code_token": "   " }))
        .await
        .assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn public_view_needs_no_session_and_never_redeems() {
    let server = server();
    let admin = Caller::admin();
    let owner = Caller::member("Ana");
    let ticket_id = register_ticket(&server, &admin, &owner).await;
    let token = issue(&server, &owner, &ticket_id).await["qr_code_token"]
        .as_str()
        .unwrap()
        .to_string();

    for _ in 0..2 {
        let response = server
            .get("/api/qr/public")
            .add_query_param("qr_code_token", &token)
            .await;
        response.assert_status_ok();
        let body = response.json::<Value>();
        assert_eq!(body["valid"], true);
        assert_eq!(body["type"], "ticket");
    }

    let passes = owner.sign(server.get("/api/passes")).await.json::<Value>();
    assert!(passes[0].get("used_at").is_none());
}

#[tokio::test]
async fn admin_reset_reopens_a_redeemed_ticket() {
    let server = server();
    let admin = Caller::admin();
    let owner = Caller::member("Ana");
    let door = Caller::staff("North gate");
    let ticket_id = register_ticket(&server, &admin, &owner).await;
    let token = issue(&server, &owner, &ticket_id).await["qr_code_token"].clone();
    let reset_path = format!("/api/admin/tickets/{ticket_id}/reset");

    admin
        .sign(server.post(&reset_path))
        .await
        .assert_status(StatusCode::CONFLICT);

    validate(
        &server,
        &door,
        &json!({ "qr_code_token": token, "mark_as_used": true }),
    )
    .await;

    door.sign(server.post(&reset_path))
        .await
        .assert_status(StatusCode::FORBIDDEN);

    let reset = admin.sign(server.post(&reset_path)).await;
    reset.assert_status_ok();
    let body = reset.json::<Value>();
    assert_eq!(body["ticket_id"], ticket_id.as_str());
    assert_eq!(body["previous_used_by"], "North gate");

    let redeem = validate(
        &server,
        &door,
        &json!({ "qr_code_token": token, "mark_as_used": true }),
    )
    .await;
    assert_eq!(redeem["valid"], true);
}

#[tokio::test]
async fn status_changes_follow_the_lifecycle() {
    let server = server();
    let admin = Caller::admin();
    let owner = Caller::member("Ana");
    let door = Caller::staff("North gate");
    let ticket_id = register_ticket(&server, &admin, &owner).await;
    let token = issue(&server, &owner, &ticket_id).await["qr_code_token"].clone();
    let status_path = format!("/api/admin/tickets/{ticket_id}/status");

    let refunded = admin
        .sign(server.put(&status_path))
        .json(&json!({ "status": "refunded" }))
        .await;
    refunded.assert_status_ok();
    assert_eq!(refunded.json::<Value>()["status"], "refunded");

    admin
        .sign(server.put(&status_path))
        .json(&json!({ "status": "paid" }))
        .await
        .assert_status(StatusCode::CONFLICT);

    admin
        .sign(server.put(&status_path))
        .json(&json!({ "status": "lost" }))
        .await
        .assert_status(StatusCode::BAD_REQUEST);

    let check = validate(&server, &door, &json!({ "qr_code_token": token })).await;
    assert_eq!(check["valid"], false);
    assert_eq!(check["code"], "unpaid");
}

#[tokio::test]
async fn subscriptions_are_registered_and_listed() {
    let server = server();
    let admin = Caller::admin();
    let owner = Caller::member("Ana");

    let created = admin
        .sign(server.post("/api/admin/subscriptions"))
        .json(&json!({
            "owner_id": owner.id.to_string(),
            "plan": "annual",
            "current_period_end": "2030-01-01T00:00:00Z",
        }))
        .await;
    created.assert_status(StatusCode::CREATED);
    let subscription = created.json::<Value>();
    assert_eq!(subscription["type"], "subscription");
    assert_eq!(subscription["status"], "active");
    assert_eq!(subscription["qr_code_token"], Value::Null);

    let issued = owner
        .sign(server.post("/api/qr/issue"))
        .json(&json!({ "subscription_id": subscription["id"] }))
        .await;
    issued.assert_status_ok();
    let token = issued.json::<Value>()["qr_code_token"].clone();

    let passes = owner.sign(server.get("/api/passes")).await;
    passes.assert_status_ok();
    let passes = passes.json::<Value>();
    assert_eq!(passes.as_array().unwrap().len(), 1);
    assert_eq!(passes[0]["qr_code_token"], token);

    owner
        .sign(server.post("/api/admin/subscriptions"))
        .json(&json!({
            "owner_id": owner.id.to_string(),
            "plan": "annual",
            "current_period_end": "2030-01-01T00:00:00Z",
        }))
        .await
        .assert_status(StatusCode::FORBIDDEN);
}
