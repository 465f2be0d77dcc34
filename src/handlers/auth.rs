use axum::{Json, extract::State};
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use utoipa::ToSchema;

use crate::{
    AppState,
    auth::{AuthUser, generate_reset_token, hash_password, issue_token, verify_password},
    email::password_reset_html,
    error::ApiError,
    models::{ProfileUpdate, User},
    store::{NewUser, StoreError},
    validation::{required, validate_email, validate_password},
};

#[derive(Debug, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub hear_about_us: Option<String>,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
#[serde(default)]
pub struct LoginRequest {
    pub identifier: String,
    pub password: String,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct ForgotPasswordRequest {
    pub email: Option<String>,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct ResetPasswordRequest {
    pub code: String,
    pub password: String,
    pub password_confirmation: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AuthResponse {
    pub jwt: String,
    pub user: User,
}

fn session_for(state: &AppState, user: User) -> Result<Json<AuthResponse>, ApiError> {
    let jwt = issue_token(&state.settings, user.id)?;
    Ok(Json(AuthResponse { jwt, user }))
}

#[utoipa::path(
    post,
    path = "/auth/local/register",
    request_body = RegisterRequest,
    responses(
        (status = 200, description = "Account created", body = AuthResponse),
        (status = 400, description = "Invalid input or email already registered")
    ),
    tag = "auth"
)]
pub async fn register(
    State(state): State<AppState>,
    Json(body): Json<RegisterRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    let email = validate_email(&body.email)?;
    validate_password(&body.password)?;
    let username = required(body.username.as_deref())
        .map(str::to_string)
        .unwrap_or_else(|| email.clone());

    let new_user = NewUser {
        username,
        email,
        password_hash: hash_password(&body.password)?,
        first_name: body.first_name,
        last_name: body.last_name,
        phone: body.phone,
        address: body.address,
        hear_about_us: body.hear_about_us,
    };
    let user = match state.db.create_user(&new_user).await {
        Ok(user) => user,
        Err(StoreError::Conflict(msg)) => return Err(ApiError::BadRequest(msg)),
        Err(e) => return Err(e.into()),
    };
    info!(user_id = user.id, "User registered");
    session_for(&state, user)
}

#[utoipa::path(
    post,
    path = "/auth/local",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Signed in", body = AuthResponse),
        (status = 400, description = "Invalid credentials or blocked account")
    ),
    tag = "auth"
)]
pub async fn login(
    State(state): State<AppState>,
    Json(body): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    let invalid = || ApiError::BadRequest("Invalid identifier or password".into());

    let identifier = required(Some(body.identifier.as_str())).ok_or_else(invalid)?;
    let user = state
        .db
        .find_user_by_identifier(identifier)
        .await?
        .ok_or_else(invalid)?;
    if !verify_password(&body.password, &user.password_hash) {
        return Err(invalid());
    }
    if user.blocked {
        return Err(ApiError::BadRequest("Your account has been blocked".into()));
    }
    session_for(&state, user)
}

#[utoipa::path(
    post,
    path = "/auth/forgot-password",
    request_body = ForgotPasswordRequest,
    responses(
        (status = 200, description = "Always `{ok: true}` once an email is supplied"),
        (status = 400, description = "Please provide an email address")
    ),
    tag = "auth"
)]
pub async fn forgot_password(
    State(state): State<AppState>,
    Json(body): Json<ForgotPasswordRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let email = required(body.email.as_deref())
        .ok_or_else(|| ApiError::BadRequest("Please provide an email address".into()))?;

    send_reset_link(&state, email).await;
    Ok(Json(serde_json::json!({"ok": true})))
}

/// Same flow as `/auth/forgot-password`, kept at the path the frontend calls.
#[utoipa::path(
    post,
    path = "/custom-auth/forgot-password",
    request_body = ForgotPasswordRequest,
    responses(
        (status = 200, description = "Always `{ok: true}` once an email is supplied"),
        (status = 400, description = "Please provide an email address")
    ),
    tag = "auth"
)]
pub async fn custom_forgot_password(
    state: State<AppState>,
    body: Json<ForgotPasswordRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    forgot_password(state, body).await
}

/// Failures are logged only, so the response never reveals whether the
/// address belongs to an account.
async fn send_reset_link(state: &AppState, email: &str) {
    let user = match state.db.find_user_by_email(email).await {
        Ok(Some(user)) => user,
        Ok(None) => {
            info!("Password reset requested for unknown email");
            return;
        }
        Err(e) => {
            error!("Password reset lookup failed: {e}");
            return;
        }
    };
    if user.blocked {
        info!(user_id = user.id, "Password reset requested for blocked user");
        return;
    }

    let token = generate_reset_token();
    if let Err(e) = state.db.set_reset_token(user.id, &token, Utc::now()).await {
        error!(user_id = user.id, "Could not store reset token: {e}");
        return;
    }

    let reset_url = state
        .settings
        .frontend_link(&format!("/reset-password?code={token}"));
    let greeting = user
        .first_name
        .as_deref()
        .and_then(|name| required(Some(name)))
        .unwrap_or(user.username.as_str());
    let html = password_reset_html(&state.settings.studio_name, greeting, &reset_url);
    let subject = format!("Reset Your Password - {}", state.settings.studio_name);

    match state.mailer.send(&state.mailer.message(&user.email, subject, html)).await {
        Ok(_) => info!(user_id = user.id, "Password reset email sent"),
        Err(e) => warn!(user_id = user.id, "Password reset email failed: {e}"),
    }
}

#[utoipa::path(
    post,
    path = "/auth/reset-password",
    request_body = ResetPasswordRequest,
    responses(
        (status = 200, description = "Password changed and signed in", body = AuthResponse),
        (status = 400, description = "Mismatched passwords or incorrect code")
    ),
    tag = "auth"
)]
pub async fn reset_password(
    State(state): State<AppState>,
    Json(body): Json<ResetPasswordRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    if body.password != body.password_confirmation {
        return Err(ApiError::BadRequest("Passwords do not match".into()));
    }
    let incorrect = || ApiError::BadRequest("Incorrect code provided".into());

    let code = required(Some(body.code.as_str())).ok_or_else(incorrect)?;
    let user = state
        .db
        .find_user_by_reset_token(code)
        .await?
        .ok_or_else(incorrect)?;
    let ttl = Duration::minutes(state.settings.reset_token_ttl_minutes);
    match user.reset_password_sent_at {
        Some(sent_at) if sent_at + ttl >= Utc::now() => {}
        _ => return Err(incorrect()),
    }
    validate_password(&body.password)?;

    let user = state
        .db
        .set_password(user.id, &hash_password(&body.password)?)
        .await?;
    info!(user_id = user.id, "Password reset");
    session_for(&state, user)
}

#[utoipa::path(
    get,
    path = "/users/me",
    responses(
        (status = 200, description = "Signed-in user", body = User),
        (status = 401, description = "Missing or invalid token")
    ),
    security(("bearer_auth" = [])),
    tag = "auth"
)]
pub async fn me(AuthUser(user): AuthUser) -> Json<User> {
    Json(user)
}

#[utoipa::path(
    put,
    path = "/users/me",
    request_body = ProfileUpdate,
    responses(
        (status = 200, description = "Updated user", body = User),
        (status = 401, description = "Missing or invalid token")
    ),
    security(("bearer_auth" = [])),
    tag = "auth"
)]
pub async fn update_me(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Json(profile): Json<ProfileUpdate>,
) -> Result<Json<User>, ApiError> {
    Ok(Json(state.db.update_profile(user.id, &profile).await?))
}
