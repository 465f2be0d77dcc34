use std::path::PathBuf;

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use chrono::{Duration, NaiveTime, Utc};
use dance_studio_api::auth::{hash_password, issue_token};
use dance_studio_api::models::{BookingStatus, ClassInput, ClassOccurrence, User};
use dance_studio_api::settings::Settings;
use dance_studio_api::store::{Database, NewUser};
use dance_studio_api::{AppState, build_router};
use hmac::{Hmac, Mac};
use httpmock::prelude::*;
use serde_json::{Value, json};
use sha2::Sha256;
use tower::Service;
use url::Url;

const ADMIN_TOKEN: &str = "admin-secret";
const WEBHOOK_SECRET: &str = "whsec_test";

/// Helper function to create test app state backed by an in-memory database
async fn create_test_state(stripe_url: Url, resend_url: Url) -> AppState {
    create_test_state_with_db(stripe_url, resend_url, "sqlite::memory:").await
}

async fn create_test_state_with_db(stripe_url: Url, resend_url: Url, database_url: &str) -> AppState {
    let settings = Settings {
        port: 1337,
        debug: true,
        enable_swagger: true,
        database_url: database_url.to_string(),
        frontend_url: Url::parse("http://localhost:3000").unwrap(),
        admin_token: ADMIN_TOKEN.to_string(),
        jwt_secret: "jwt-secret".to_string(),
        jwt_ttl_hours: 1,
        stripe_secret_key: "sk_test_123".to_string(),
        stripe_webhook_secret: WEBHOOK_SECRET.to_string(),
        stripe_api_base: stripe_url,
        webhook_tolerance_secs: 300,
        currency: "gbp".to_string(),
        resend_api_key: "re_test".to_string(),
        resend_api_base: resend_url,
        email_from: "Test Studio <no-reply@example.com>".to_string(),
        contact_email: "studio@example.com".to_string(),
        studio_name: "Test Studio".to_string(),
        timezone: "Europe/London".to_string(),
        reset_token_ttl_minutes: 60,
    };

    let db = Database::connect(&settings.database_url).await.unwrap();
    db.migrate().await.unwrap();
    AppState::new(settings, db)
}

async fn offline_state() -> AppState {
    create_test_state(
        Url::parse("http://127.0.0.1:9").unwrap(),
        Url::parse("http://127.0.0.1:9").unwrap(),
    )
    .await
}

/// On-disk database file shared by a multi-connection pool, deleted on drop.
struct TempDatabase(PathBuf);

impl Drop for TempDatabase {
    fn drop(&mut self) {
        for suffix in ["", "-wal", "-shm"] {
            let _ = std::fs::remove_file(format!("{}{suffix}", self.0.display()));
        }
    }
}

async fn file_backed_state() -> (AppState, TempDatabase) {
    let path = std::env::temp_dir().join(format!("dance-studio-it-{:016x}.db", rand::random::<u64>()));
    let offline = Url::parse("http://127.0.0.1:9").unwrap();
    let state =
        create_test_state_with_db(offline.clone(), offline, &format!("sqlite://{}", path.display())).await;
    (state, TempDatabase(path))
}

/// Helper to extract response body as string
async fn response_body_string(body: Body) -> String {
    let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn response_json(body: Body) -> Value {
    serde_json::from_str(&response_body_string(body).await).unwrap()
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn authed_json_request(method: &str, uri: &str, token: &str, body: Value) -> Request<Body> {
    let mut request = json_request(method, uri, body);
    request.headers_mut().insert(
        header::AUTHORIZATION,
        format!("Bearer {token}").parse().unwrap(),
    );
    request
}

fn sign(payload: &str, timestamp: i64) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(WEBHOOK_SECRET.as_bytes()).unwrap();
    mac.update(format!("{timestamp}.{payload}").as_bytes());
    format!("t={timestamp},v1={}", hex::encode(mac.finalize().into_bytes()))
}

fn webhook_request(payload: &str, signature: Option<String>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/stripe/webhook")
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(signature) = signature {
        builder = builder.header("stripe-signature", signature);
    }
    builder.body(Body::from(payload.to_string())).unwrap()
}

fn checkout_completed(session_id: &str, metadata: Value) -> String {
    json!({
        "id": format!("evt_{session_id}"),
        "type": "checkout.session.completed",
        "data": {
            "object": {
                "id": session_id,
                "amount_total": 1200,
                "currency": "gbp",
                "payment_intent": "pi_123",
                "customer_email": "asha@example.com",
                "metadata": metadata
            }
        }
    })
    .to_string()
}

fn class_input(title: &str, capacity: i64) -> ClassInput {
    ClassInput {
        title: title.to_string(),
        slug: None,
        description: Some("High energy Bollywood choreography".to_string()),
        date: Utc::now().date_naive() + Duration::days(30),
        start_time: NaiveTime::from_hms_opt(18, 0, 0).unwrap(),
        end_time: NaiveTime::from_hms_opt(19, 0, 0).unwrap(),
        price: 1200,
        max_capacity: capacity,
        level: Some("Beginner".to_string()),
        location: Some("Studio 1".to_string()),
        instructor: Some("Luna".to_string()),
        thumbnail_url: None,
        is_active: true,
    }
}

async fn seed_class(state: &AppState, title: &str, capacity: i64) -> ClassOccurrence {
    let input = class_input(title, capacity);
    let slug = dance_studio_api::validation::slugify(title);
    state.db.create_class(&input, &slug).await.unwrap()
}

async fn seed_user(state: &AppState, email: &str, password: &str) -> User {
    state
        .db
        .create_user(&NewUser {
            username: email.to_string(),
            email: email.to_string(),
            password_hash: hash_password(password).unwrap(),
            first_name: Some("Asha".to_string()),
            last_name: Some("Rai".to_string()),
            phone: None,
            address: None,
            hear_about_us: None,
        })
        .await
        .unwrap()
}

async fn booked_count(state: &AppState, class_id: i64) -> i64 {
    state.db.get_class(class_id).await.unwrap().unwrap().booked_count
}

async fn call(app: &mut Router, request: Request<Body>) -> axum::response::Response {
    app.call(request).await.unwrap()
}

#[tokio::test]
async fn test_root_endpoint() {
    // Arrange
    let state = offline_state().await;
    let mut app = build_router(state);

    // Act
    let response = call(&mut app, Request::builder().uri("/").body(Body::empty()).unwrap()).await;

    // Assert
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_body_string(response.into_body()).await;
    assert!(body.contains("Dance Studio Booking API"));
    assert!(body.contains("/class-occurrences"));
}

#[tokio::test]
async fn test_healthz_endpoints() {
    // Arrange
    let state = offline_state().await;
    let mut app = build_router(state);

    // Act
    let live = call(&mut app, Request::builder().uri("/healthz/live").body(Body::empty()).unwrap()).await;
    let ready = call(&mut app, Request::builder().uri("/healthz/ready").body(Body::empty()).unwrap()).await;

    // Assert
    assert_eq!(live.status(), StatusCode::OK);
    assert_eq!(ready.status(), StatusCode::OK);
    let body = response_body_string(ready.into_body()).await;
    assert!(body.contains(r#""status":"ok"#));
}

#[tokio::test]
async fn test_openapi_document_is_served() {
    // Arrange
    let state = offline_state().await;
    let mut app = build_router(state);

    // Act
    let response = call(&mut app, Request::builder().uri("/openapi.json").body(Body::empty()).unwrap()).await;

    // Assert
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_body_string(response.into_body()).await;
    assert!(body.contains("/stripe/create-checkout-session"));
}

#[tokio::test]
async fn test_list_classes_filters_and_orders() {
    // Arrange
    let state = offline_state().await;
    let later = seed_class(&state, "Kathak Flow", 10).await;
    let mut earlier_input = class_input("Bhangra Beats", 10);
    earlier_input.date -= Duration::days(7);
    let earlier = state.db.create_class(&earlier_input, "bhangra-beats").await.unwrap();
    let mut inactive_input = class_input("Retired Class", 10);
    inactive_input.is_active = false;
    state.db.create_class(&inactive_input, "retired-class").await.unwrap();
    let mut app = build_router(state);

    // Act
    let response = call(
        &mut app,
        Request::builder()
            .uri("/class-occurrences?isActive=true&upcoming=true")
            .body(Body::empty())
            .unwrap(),
    )
    .await;

    // Assert
    assert_eq!(response.status(), StatusCode::OK);
    let classes = response_json(response.into_body()).await;
    let ids: Vec<i64> = classes
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c["id"].as_i64().unwrap())
        .collect();
    assert_eq!(ids, vec![earlier.id, later.id]);
    assert_eq!(classes[0]["maxCapacity"], 10);
    assert_eq!(classes[0]["bookedCount"], 0);
}

#[tokio::test]
async fn test_list_classes_rejects_inverted_range() {
    // Arrange
    let state = offline_state().await;
    let mut app = build_router(state);

    // Act
    let response = call(
        &mut app,
        Request::builder()
            .uri("/class-occurrences?startDate=2030-02-01&endDate=2030-01-01")
            .body(Body::empty())
            .unwrap(),
    )
    .await;

    // Assert
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_get_class_by_slug() {
    // Arrange
    let state = offline_state().await;
    let class = seed_class(&state, "Bollywood Beginners", 10).await;
    let mut app = build_router(state);

    // Act
    let found = call(
        &mut app,
        Request::builder()
            .uri("/class-occurrences/slug/bollywood-beginners")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    let missing = call(
        &mut app,
        Request::builder()
            .uri("/class-occurrences/slug/no-such-class")
            .body(Body::empty())
            .unwrap(),
    )
    .await;

    // Assert
    assert_eq!(found.status(), StatusCode::OK);
    let body = response_json(found.into_body()).await;
    assert_eq!(body["id"], class.id);
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    let body = response_json(missing.into_body()).await;
    assert_eq!(body["error"], "Class not found");
}

#[tokio::test]
async fn test_ical_feed() {
    // Arrange
    let state = offline_state().await;
    seed_class(&state, "Semi Classical", 10).await;
    let mut app = build_router(state);

    // Act
    let response = call(
        &mut app,
        Request::builder()
            .uri("/class-occurrences.ics")
            .body(Body::empty())
            .unwrap(),
    )
    .await;

    // Assert
    assert_eq!(response.status(), StatusCode::OK);
    assert!(
        response.headers()["content-type"]
            .to_str()
            .unwrap()
            .starts_with("text/calendar")
    );
    let body = response_body_string(response.into_body()).await;
    assert!(body.contains("BEGIN:VCALENDAR"));
    assert!(body.contains("SUMMARY:Semi Classical"));
}

#[tokio::test]
async fn test_admin_class_crud_requires_token() {
    // Arrange
    let state = offline_state().await;
    let mut app = build_router(state);
    let payload = json!({
        "title": "Bhangra Beats",
        "date": "2030-03-14",
        "startTime": "18:00:00",
        "endTime": "19:00:00",
        "price": 1200,
        "maxCapacity": 12
    });

    // Act
    let unauthorized = call(&mut app, json_request("POST", "/class-occurrences", payload.clone())).await;
    let created = call(
        &mut app,
        json_request("POST", &format!("/class-occurrences?token={ADMIN_TOKEN}"), payload.clone()),
    )
    .await;
    let duplicate = call(
        &mut app,
        authed_json_request("POST", "/class-occurrences", ADMIN_TOKEN, payload),
    )
    .await;

    // Assert
    assert_eq!(unauthorized.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(created.status(), StatusCode::CREATED);
    let class = response_json(created.into_body()).await;
    assert_eq!(class["slug"], "bhangra-beats");
    assert_eq!(class["isActive"], true);
    assert_eq!(duplicate.status(), StatusCode::CONFLICT);

    let delete = call(
        &mut app,
        Request::builder()
            .method("DELETE")
            .uri(format!("/class-occurrences/{}?token={ADMIN_TOKEN}", class["id"]))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(delete.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn test_register_login_and_profile() {
    // Arrange
    let state = offline_state().await;
    let mut app = build_router(state);

    // Act
    let registered = call(
        &mut app,
        json_request(
            "POST",
            "/auth/local/register",
            json!({"email": "Priya@Example.com", "password": "secret1", "firstName": "Priya"}),
        ),
    )
    .await;
    let duplicate = call(
        &mut app,
        json_request(
            "POST",
            "/auth/local/register",
            json!({"email": "priya@example.com", "password": "secret1"}),
        ),
    )
    .await;
    let bad_login = call(
        &mut app,
        json_request("POST", "/auth/local", json!({"identifier": "priya@example.com", "password": "wrong"})),
    )
    .await;
    let login = call(
        &mut app,
        json_request("POST", "/auth/local", json!({"identifier": "priya@example.com", "password": "secret1"})),
    )
    .await;

    // Assert
    assert_eq!(registered.status(), StatusCode::OK);
    let body = response_json(registered.into_body()).await;
    assert_eq!(body["user"]["email"], "priya@example.com");
    assert!(body["user"].get("passwordHash").is_none());
    assert_eq!(duplicate.status(), StatusCode::BAD_REQUEST);
    let body = response_json(duplicate.into_body()).await;
    assert_eq!(body["error"], "Email or username already exists");
    assert_eq!(bad_login.status(), StatusCode::BAD_REQUEST);
    let body = response_json(bad_login.into_body()).await;
    assert_eq!(body["error"], "Invalid identifier or password");
    assert_eq!(login.status(), StatusCode::OK);

    let jwt = response_json(login.into_body()).await["jwt"]
        .as_str()
        .unwrap()
        .to_string();
    let updated = call(
        &mut app,
        authed_json_request("PUT", "/users/me", &jwt, json!({"phone": "07700 900123"})),
    )
    .await;
    assert_eq!(updated.status(), StatusCode::OK);
    let body = response_json(updated.into_body()).await;
    assert_eq!(body["phone"], "07700 900123");
    assert_eq!(body["firstName"], "Priya");
}

#[tokio::test]
async fn test_blocked_user_cannot_login() {
    // Arrange
    let state = offline_state().await;
    let user = seed_user(&state, "blocked@example.com", "secret1").await;
    state.db.set_user_blocked(user.id, true).await.unwrap();
    let mut app = build_router(state);

    // Act
    let response = call(
        &mut app,
        json_request("POST", "/auth/local", json!({"identifier": "blocked@example.com", "password": "secret1"})),
    )
    .await;

    // Assert
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = response_json(response.into_body()).await;
    assert_eq!(body["error"], "Your account has been blocked");
}

#[tokio::test]
async fn test_forgot_password_response_does_not_leak_accounts() {
    // Arrange
    let resend = MockServer::start();
    let email_mock = resend.mock(|when, then| {
        when.method(POST)
            .path("/emails")
            .body_includes("valid@example.com")
            .body_includes("reset-password?code=");
        then.status(200).json_body(json!({ "id": "email_reset" }));
    });
    let state = create_test_state(
        Url::parse("http://127.0.0.1:9").unwrap(),
        Url::parse(&resend.base_url()).unwrap(),
    )
    .await;
    seed_user(&state, "valid@example.com", "secret1").await;
    let blocked = seed_user(&state, "blocked@example.com", "secret1").await;
    state.db.set_user_blocked(blocked.id, true).await.unwrap();
    let mut app = build_router(state.clone());

    // Act
    let mut bodies = Vec::new();
    for email in ["nobody@example.com", "blocked@example.com", "valid@example.com"] {
        let response = call(
            &mut app,
            json_request("POST", "/custom-auth/forgot-password", json!({ "email": email })),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        bodies.push(response_body_string(response.into_body()).await);
    }
    let missing = call(&mut app, json_request("POST", "/auth/forgot-password", json!({}))).await;

    // Assert
    assert!(bodies.iter().all(|b| b == r#"{"ok":true}"#));
    email_mock.assert_async().await;
    let blocked = state.db.find_user(blocked.id).await.unwrap().unwrap();
    assert!(blocked.reset_password_token.is_none());
    assert_eq!(missing.status(), StatusCode::BAD_REQUEST);
    let body = response_json(missing.into_body()).await;
    assert_eq!(body["error"], "Please provide an email address");
}

#[tokio::test]
async fn test_reset_password_flow() {
    // Arrange
    let state = offline_state().await;
    let user = seed_user(&state, "asha@example.com", "old-secret").await;
    state
        .db
        .set_reset_token(user.id, "fresh-code", Utc::now())
        .await
        .unwrap();
    let mut app = build_router(state.clone());

    // Act
    let mismatch = call(
        &mut app,
        json_request(
            "POST",
            "/auth/reset-password",
            json!({"code": "fresh-code", "password": "new-secret", "passwordConfirmation": "other"}),
        ),
    )
    .await;
    let wrong_code = call(
        &mut app,
        json_request(
            "POST",
            "/auth/reset-password",
            json!({"code": "nope", "password": "new-secret", "passwordConfirmation": "new-secret"}),
        ),
    )
    .await;
    let reset = call(
        &mut app,
        json_request(
            "POST",
            "/auth/reset-password",
            json!({"code": "fresh-code", "password": "new-secret", "passwordConfirmation": "new-secret"}),
        ),
    )
    .await;
    let login = call(
        &mut app,
        json_request("POST", "/auth/local", json!({"identifier": "asha@example.com", "password": "new-secret"})),
    )
    .await;

    // Assert
    assert_eq!(mismatch.status(), StatusCode::BAD_REQUEST);
    assert_eq!(response_json(mismatch.into_body()).await["error"], "Passwords do not match");
    assert_eq!(wrong_code.status(), StatusCode::BAD_REQUEST);
    assert_eq!(response_json(wrong_code.into_body()).await["error"], "Incorrect code provided");
    assert_eq!(reset.status(), StatusCode::OK);
    assert!(response_json(reset.into_body()).await["jwt"].is_string());
    assert_eq!(login.status(), StatusCode::OK);
    let user = state.db.find_user(user.id).await.unwrap().unwrap();
    assert!(user.reset_password_token.is_none());
}

#[tokio::test]
async fn test_reset_password_rejects_expired_code() {
    // Arrange
    let state = offline_state().await;
    let user = seed_user(&state, "asha@example.com", "old-secret").await;
    state
        .db
        .set_reset_token(user.id, "stale-code", Utc::now() - Duration::hours(2))
        .await
        .unwrap();
    let mut app = build_router(state);

    // Act
    let response = call(
        &mut app,
        json_request(
            "POST",
            "/auth/reset-password",
            json!({"code": "stale-code", "password": "new-secret", "passwordConfirmation": "new-secret"}),
        ),
    )
    .await;

    // Assert
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(response_json(response.into_body()).await["error"], "Incorrect code provided");
}

#[tokio::test]
async fn test_create_checkout_session() {
    // Arrange
    let stripe = MockServer::start();
    let state = create_test_state(
        Url::parse(&stripe.base_url()).unwrap(),
        Url::parse("http://127.0.0.1:9").unwrap(),
    )
    .await;
    let class = seed_class(&state, "Bollywood Beginners", 10).await;
    let user = seed_user(&state, "asha@example.com", "secret1").await;
    let jwt = issue_token(&state.settings, user.id).unwrap();
    let stripe_mock = stripe.mock(|when, then| {
        when.method(POST)
            .path("/v1/checkout/sessions")
            .header("authorization", "Bearer sk_test_123")
            .body_includes("mode=payment")
            .body_includes("unit_amount%5D=1200")
            .body_includes(format!("metadata%5BclassId%5D={}", class.id))
            .body_includes(format!("metadata%5BuserId%5D={}", user.id))
            .body_includes("CLASS+DETAILS");
        then.status(200).json_body(json!({
            "id": "cs_test_1",
            "url": "https://checkout.stripe.com/c/pay/cs_test_1"
        }));
    });
    let mut app = build_router(state);

    // Act
    let response = call(
        &mut app,
        authed_json_request(
            "POST",
            "/stripe/create-checkout-session",
            &jwt,
            json!({"classId": class.id, "price": 1200}),
        ),
    )
    .await;

    // Assert
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response.into_body()).await;
    assert_eq!(body["url"], "https://checkout.stripe.com/c/pay/cs_test_1");
    stripe_mock.assert_async().await;
}

#[tokio::test]
async fn test_checkout_session_guards() {
    // Arrange
    let state = offline_state().await;
    let class = seed_class(&state, "Bollywood Beginners", 1).await;
    let full = seed_class(&state, "Sold Out", 0).await;
    let user = seed_user(&state, "asha@example.com", "secret1").await;
    let jwt = issue_token(&state.settings, user.id).unwrap();
    let mut app = build_router(state);

    // Act
    let missing = call(
        &mut app,
        authed_json_request("POST", "/stripe/create-checkout-session", &jwt, json!({"classId": class.id})),
    )
    .await;
    let anonymous = call(
        &mut app,
        json_request("POST", "/stripe/create-checkout-session", json!({"classId": class.id, "price": 1200})),
    )
    .await;
    let unknown = call(
        &mut app,
        authed_json_request("POST", "/stripe/create-checkout-session", &jwt, json!({"classId": 999, "price": 1200})),
    )
    .await;
    let sold_out = call(
        &mut app,
        authed_json_request("POST", "/stripe/create-checkout-session", &jwt, json!({"classId": full.id, "price": 1200})),
    )
    .await;
    let mismatch = call(
        &mut app,
        authed_json_request("POST", "/stripe/create-checkout-session", &jwt, json!({"classId": class.id, "price": 1})),
    )
    .await;

    // Assert
    assert_eq!(missing.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        response_json(missing.into_body()).await["error"],
        "Class ID and price are required"
    );
    assert_eq!(anonymous.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        response_json(anonymous.into_body()).await["error"],
        "You must be logged in to book a class"
    );
    assert_eq!(unknown.status(), StatusCode::NOT_FOUND);
    assert_eq!(sold_out.status(), StatusCode::CONFLICT);
    assert_eq!(mismatch.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_webhook_duplicate_delivery_books_once() {
    // Arrange
    let resend = MockServer::start();
    let email_mock = resend.mock(|when, then| {
        when.method(POST)
            .path("/emails")
            .body_includes("Booking Confirmed - Bollywood Beginners");
        then.status(200).json_body(json!({ "id": "email_confirm" }));
    });
    let state = create_test_state(
        Url::parse("http://127.0.0.1:9").unwrap(),
        Url::parse(&resend.base_url()).unwrap(),
    )
    .await;
    let class = seed_class(&state, "Bollywood Beginners", 10).await;
    let user = seed_user(&state, "asha@example.com", "secret1").await;
    let payload = checkout_completed(
        "cs_test_dup",
        json!({"classId": class.id.to_string(), "userId": user.id.to_string()}),
    );
    let mut app = build_router(state.clone());

    // Act
    let first = call(&mut app, webhook_request(&payload, Some(sign(&payload, Utc::now().timestamp())))).await;
    let second = call(&mut app, webhook_request(&payload, Some(sign(&payload, Utc::now().timestamp())))).await;

    // Assert
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(second.status(), StatusCode::OK);
    assert_eq!(response_body_string(second.into_body()).await, r#"{"received":true}"#);
    assert_eq!(state.db.count_bookings_for_session("cs_test_dup").await.unwrap(), 1);
    assert_eq!(booked_count(&state, class.id).await, 1);
    email_mock.assert_async().await;

    let bookings = state.db.list_bookings_for_user(user.id).await.unwrap();
    assert_eq!(bookings.len(), 1);
    assert_eq!(bookings[0].booking.status, BookingStatus::Confirmed);
    assert_eq!(bookings[0].booking.stripe_payment_id.as_deref(), Some("pi_123"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_webhook_concurrent_delivery_books_once() {
    // Arrange
    let (state, _file) = file_backed_state().await;
    let class = seed_class(&state, "Bollywood Beginners", 10).await;
    let user = seed_user(&state, "asha@example.com", "secret1").await;
    let payload = checkout_completed(
        "cs_test_race",
        json!({"classId": class.id.to_string(), "userId": user.id.to_string()}),
    );

    // Act
    let deliveries: Vec<_> = (0..8)
        .map(|_| {
            let mut app = build_router(state.clone());
            let request = webhook_request(&payload, Some(sign(&payload, Utc::now().timestamp())));
            tokio::spawn(async move { app.call(request).await.unwrap().status() })
        })
        .collect();

    // Assert
    for delivery in deliveries {
        assert_eq!(delivery.await.unwrap(), StatusCode::OK);
    }
    assert_eq!(state.db.count_bookings_for_session("cs_test_race").await.unwrap(), 1);
    assert_eq!(booked_count(&state, class.id).await, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_webhook_concurrent_payment_success_confirms_every_booking() {
    // Arrange
    let (state, _file) = file_backed_state().await;
    let class = seed_class(&state, "Kathak Evening", 20).await;
    let mut payloads = Vec::new();
    for n in 0..8 {
        let user = seed_user(&state, &format!("dancer{n}@example.com"), "secret1").await;
        let booking = state
            .db
            .create_booking(&dance_studio_api::models::BookingInput {
                class_occurrence_id: class.id,
                user_id: user.id,
                status: BookingStatus::Pending,
                stripe_session_id: None,
                stripe_payment_id: None,
            })
            .await
            .unwrap();
        payloads.push(
            json!({
                "id": format!("evt_paid_{n}"),
                "type": "payment_intent.succeeded",
                "data": {"object": {"id": format!("pi_paid_{n}"), "metadata": {"bookingId": booking.id.to_string()}}}
            })
            .to_string(),
        );
    }

    // Act
    let deliveries: Vec<_> = payloads
        .iter()
        .map(|payload| {
            let mut app = build_router(state.clone());
            let request = webhook_request(payload, Some(sign(payload, Utc::now().timestamp())));
            tokio::spawn(async move { app.call(request).await.unwrap().status() })
        })
        .collect();

    // Assert
    for delivery in deliveries {
        assert_eq!(delivery.await.unwrap(), StatusCode::OK);
    }
    let bookings = state.db.list_bookings().await.unwrap();
    assert_eq!(bookings.len(), 8);
    assert!(bookings.iter().all(|b| b.booking.status == BookingStatus::Confirmed));
    assert_eq!(booked_count(&state, class.id).await, 8);
}

#[tokio::test]
async fn test_webhook_missing_metadata_creates_nothing() {
    // Arrange
    let state = offline_state().await;
    let class = seed_class(&state, "Bollywood Beginners", 10).await;
    let mut app = build_router(state.clone());
    let no_class = checkout_completed("cs_no_class", json!({"userId": "1"}));
    let undefined_user = checkout_completed(
        "cs_undefined_user",
        json!({"classId": class.id.to_string(), "userId": "undefined"}),
    );

    // Act
    let first = call(&mut app, webhook_request(&no_class, Some(sign(&no_class, Utc::now().timestamp())))).await;
    let second = call(
        &mut app,
        webhook_request(&undefined_user, Some(sign(&undefined_user, Utc::now().timestamp()))),
    )
    .await;

    // Assert
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(second.status(), StatusCode::OK);
    assert!(state.db.list_bookings().await.unwrap().is_empty());
    assert_eq!(booked_count(&state, class.id).await, 0);
}

#[tokio::test]
async fn test_webhook_rejects_bad_signatures() {
    // Arrange
    let state = offline_state().await;
    let mut app = build_router(state.clone());
    let payload = checkout_completed("cs_bad", json!({"classId": "1", "userId": "1"}));
    let now = Utc::now().timestamp();
    let tampered = payload.replace("cs_bad", "cs_evil");

    // Act
    let missing = call(&mut app, webhook_request(&payload, None)).await;
    let garbage = call(&mut app, webhook_request(&payload, Some("v1=deadbeef".to_string()))).await;
    let stale = call(&mut app, webhook_request(&payload, Some(sign(&payload, now - 3_600)))).await;
    let forged = call(&mut app, webhook_request(&tampered, Some(sign(&payload, now)))).await;

    // Assert
    for response in [missing, garbage, stale, forged] {
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = response_json(response.into_body()).await;
        assert!(body["error"].as_str().unwrap().starts_with("Webhook Error:"));
    }
    assert!(state.db.list_bookings().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_webhook_payment_failed_cancels_booking() {
    // Arrange
    let state = offline_state().await;
    let class = seed_class(&state, "Bollywood Beginners", 10).await;
    let user = seed_user(&state, "asha@example.com", "secret1").await;
    let booking = state
        .db
        .create_booking(&dance_studio_api::models::BookingInput {
            class_occurrence_id: class.id,
            user_id: user.id,
            status: BookingStatus::Confirmed,
            stripe_session_id: None,
            stripe_payment_id: None,
        })
        .await
        .unwrap();
    assert_eq!(booked_count(&state, class.id).await, 1);
    let payload = json!({
        "id": "evt_failed",
        "type": "payment_intent.payment_failed",
        "data": {"object": {"id": "pi_failed", "metadata": {"bookingId": booking.id.to_string()}}}
    })
    .to_string();
    let mut app = build_router(state.clone());

    // Act
    let response = call(&mut app, webhook_request(&payload, Some(sign(&payload, Utc::now().timestamp())))).await;
    let replay = call(&mut app, webhook_request(&payload, Some(sign(&payload, Utc::now().timestamp())))).await;

    // Assert
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(replay.status(), StatusCode::OK);
    let booking = state.db.get_booking(booking.id).await.unwrap().unwrap();
    assert_eq!(booking.status, BookingStatus::Cancelled);
    assert_eq!(booked_count(&state, class.id).await, 0);
}

#[tokio::test]
async fn test_my_bookings_requires_login() {
    // Arrange
    let state = offline_state().await;
    let class = seed_class(&state, "Bollywood Beginners", 10).await;
    let user = seed_user(&state, "asha@example.com", "secret1").await;
    let other = seed_user(&state, "other@example.com", "secret1").await;
    for owner in [user.id, other.id] {
        state
            .db
            .create_booking(&dance_studio_api::models::BookingInput {
                class_occurrence_id: class.id,
                user_id: owner,
                status: BookingStatus::Pending,
                stripe_session_id: None,
                stripe_payment_id: None,
            })
            .await
            .unwrap();
    }
    let jwt = issue_token(&state.settings, user.id).unwrap();
    let mut app = build_router(state);

    // Act
    let anonymous = call(&mut app, Request::builder().uri("/bookings/me").body(Body::empty()).unwrap()).await;
    let mine = call(
        &mut app,
        Request::builder()
            .uri("/bookings/me")
            .header(header::AUTHORIZATION, format!("Bearer {jwt}"))
            .body(Body::empty())
            .unwrap(),
    )
    .await;

    // Assert
    assert_eq!(anonymous.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(mine.status(), StatusCode::OK);
    let bookings = response_json(mine.into_body()).await;
    let bookings = bookings.as_array().unwrap();
    assert_eq!(bookings.len(), 1);
    assert_eq!(bookings[0]["userId"], user.id);
    assert_eq!(bookings[0]["classOccurrence"]["title"], "Bollywood Beginners");
    assert_eq!(bookings[0]["user"]["email"], "asha@example.com");
}

#[tokio::test]
async fn test_admin_booking_status_updates_counter() {
    // Arrange
    let state = offline_state().await;
    let class = seed_class(&state, "Bollywood Beginners", 10).await;
    let user = seed_user(&state, "asha@example.com", "secret1").await;
    let mut app = build_router(state.clone());

    // Act
    let created = call(
        &mut app,
        authed_json_request(
            "POST",
            "/bookings",
            ADMIN_TOKEN,
            json!({"classOccurrenceId": class.id, "userId": user.id}),
        ),
    )
    .await;
    let booking_id = response_json(created.into_body()).await["id"].as_i64().unwrap();
    let confirmed = call(
        &mut app,
        authed_json_request("PUT", &format!("/bookings/{booking_id}"), ADMIN_TOKEN, json!({"status": "confirmed"})),
    )
    .await;
    let count_after_confirm = booked_count(&state, class.id).await;
    let cancelled = call(
        &mut app,
        authed_json_request("PUT", &format!("/bookings/{booking_id}"), ADMIN_TOKEN, json!({"status": "cancelled"})),
    )
    .await;

    // Assert
    assert_eq!(confirmed.status(), StatusCode::OK);
    assert_eq!(count_after_confirm, 1);
    assert_eq!(cancelled.status(), StatusCode::OK);
    assert_eq!(booked_count(&state, class.id).await, 0);
}

#[tokio::test]
async fn test_contact_form() {
    // Arrange
    let resend = MockServer::start();
    let email_mock = resend.mock(|when, then| {
        when.method(POST)
            .path("/emails")
            .body_includes("studio@example.com")
            .body_includes("New Contact Form: General Inquiry")
            .body_includes("priya@example.com");
        then.status(200).json_body(json!({ "id": "email_contact" }));
    });
    let state = create_test_state(
        Url::parse("http://127.0.0.1:9").unwrap(),
        Url::parse(&resend.base_url()).unwrap(),
    )
    .await;
    let mut app = build_router(state);

    // Act
    let missing = call(&mut app, json_request("POST", "/contact", json!({"name": "Priya"}))).await;
    let sent = call(
        &mut app,
        json_request(
            "POST",
            "/contact",
            json!({"name": "Priya", "email": "priya@example.com", "message": "Do you run private lessons?"}),
        ),
    )
    .await;

    // Assert
    assert_eq!(missing.status(), StatusCode::BAD_REQUEST);
    assert_eq!(response_json(missing.into_body()).await["error"], "Missing required fields");
    assert_eq!(sent.status(), StatusCode::OK);
    let body = response_json(sent.into_body()).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["messageId"], "email_contact");
    email_mock.assert_async().await;
}

#[tokio::test]
async fn test_contact_form_provider_failure() {
    // Arrange
    let resend = MockServer::start();
    resend.mock(|when, then| {
        when.method(POST).path("/emails");
        then.status(500).body("upstream down");
    });
    let state = create_test_state(
        Url::parse("http://127.0.0.1:9").unwrap(),
        Url::parse(&resend.base_url()).unwrap(),
    )
    .await;
    let mut app = build_router(state);

    // Act
    let response = call(
        &mut app,
        json_request(
            "POST",
            "/contact",
            json!({"name": "Priya", "email": "priya@example.com", "message": "Hello"}),
        ),
    )
    .await;

    // Assert
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(response_json(response.into_body()).await["error"], "Failed to send email");
}
