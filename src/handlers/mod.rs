pub mod auth;
pub mod bookings;
pub mod classes;
pub mod contact;
pub mod stripe;

use axum::{Json, extract::State, response::IntoResponse};
use tracing::error;

use crate::{AppState, error::ApiError};

#[utoipa::path(get, path = "/", tag = "service")]
pub async fn root() -> impl IntoResponse {
    Json(serde_json::json!({
        "message": "Dance Studio Booking API",
        "endpoints": {
            "/class-occurrences": "List scheduled classes",
            "/class-occurrences.ics": "Download upcoming classes as iCal file",
            "/bookings/me": "Bookings of the signed-in user",
            "/auth/local": "Sign in",
            "/auth/local/register": "Create an account",
            "/stripe/create-checkout-session": "Start paying for a class",
            "/contact": "Send a message to the studio"
        }
    }))
}

#[utoipa::path(get, path = "/healthz/live", tag = "service")]
pub async fn healthz_live() -> impl IntoResponse {
    Json(serde_json::json!({"status": "ok"}))
}

#[utoipa::path(
    get,
    path = "/healthz/ready",
    responses(
        (status = 200, description = "Database reachable"),
        (status = 503, description = "Database unavailable")
    ),
    tag = "service"
)]
pub async fn healthz_ready(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    state.db.ping().await.map_err(|e| {
        error!("Readiness check failed: {e}");
        ApiError::Unavailable("Database unavailable".into())
    })?;
    Ok(Json(serde_json::json!({"status": "ok"})))
}
