use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use axum::extract::{FromRequestParts, Query};
use axum::http::request::Parts;
use axum_extra::extract::TypedHeader;
use axum_extra::headers::Authorization;
use axum_extra::headers::authorization::Bearer;
use chrono::{Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::AppState;
use crate::error::ApiError;
use crate::models::User;
use crate::settings::Settings;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub id: i64,
    pub iat: usize,
    pub exp: usize,
}

pub fn issue_token(settings: &Settings, user_id: i64) -> Result<String, ApiError> {
    let now = Utc::now();
    let exp = Duration::try_hours(settings.jwt_ttl_hours)
        .and_then(|ttl| now.checked_add_signed(ttl))
        .and_then(|exp| usize::try_from(exp.timestamp()).ok())
        .ok_or_else(|| {
            error!("JWT lifetime of {} hours is out of range", settings.jwt_ttl_hours);
            ApiError::Internal("Internal server error".into())
        })?;
    let claims = Claims {
        id: user_id,
        iat: now.timestamp() as usize,
        exp,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(settings.jwt_secret.as_bytes()),
    )
    .map_err(|e| {
        error!("Failed to sign token: {e}");
        ApiError::Internal("Internal server error".into())
    })
}

pub fn decode_token(settings: &Settings, token: &str) -> Result<Claims, ApiError> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(settings.jwt_secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|e| {
        debug!("Rejected token: {e}");
        ApiError::Unauthorized("Invalid or expired token".into())
    })
}

pub fn hash_password(password: &str) -> Result<String, ApiError> {
    let mut salt = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut salt);
    let salt = SaltString::encode_b64(&salt).map_err(|e| {
        error!("Failed to encode salt: {e}");
        ApiError::Internal("Internal server error".into())
    })?;
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| {
            error!("Failed to hash password: {e}");
            ApiError::Internal("Internal server error".into())
        })
}

pub fn verify_password(password: &str, hash: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

/// 64 random bytes, hex encoded.
pub fn generate_reset_token() -> String {
    let mut bytes = [0u8; 64];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

pub fn verify_token(
    settings: &Settings,
    auth: Option<Authorization<Bearer>>,
    query_token: Option<&str>,
) -> Result<(), ApiError> {
    let provided_token = auth
        .map(|a| a.token().to_string())
        .or_else(|| query_token.map(|s| s.to_string()));
    match provided_token {
        Some(token) if token == settings.admin_token => Ok(()),
        _ => Err(ApiError::Unauthorized(
            "Invalid authentication token".into(),
        )),
    }
}

/// Signed-in, non-blocked account resolved from the Bearer JWT.
#[derive(Debug, Clone)]
pub struct AuthUser(pub User);

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) =
            TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
                .await
                .map_err(|_| ApiError::Unauthorized("Missing or invalid authorization header".into()))?;

        let claims = decode_token(&state.settings, bearer.token())?;
        let user = state
            .db
            .find_user(claims.id)
            .await?
            .ok_or_else(|| ApiError::Unauthorized("Invalid or expired token".into()))?;
        if user.blocked {
            return Err(ApiError::Unauthorized("Your account has been blocked".into()));
        }
        Ok(AuthUser(user))
    }
}

#[derive(Debug, Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

/// Caller presented the admin API token, as a Bearer header or `?token=`.
#[derive(Debug, Clone, Copy)]
pub struct AdminAccess;

impl FromRequestParts<AppState> for AdminAccess {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let auth = TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
            .await
            .ok()
            .map(|TypedHeader(a)| a);
        let query = Query::<TokenQuery>::try_from_uri(&parts.uri)
            .ok()
            .and_then(|Query(q)| q.token);
        verify_token(&state.settings, auth, query.as_deref())?;
        Ok(AdminAccess)
    }
}
