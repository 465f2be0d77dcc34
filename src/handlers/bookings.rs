use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::info;

use crate::{
    AppState,
    auth::{AdminAccess, AuthUser},
    error::ApiError,
    models::{Booking, BookingDetails, BookingInput, BookingUpdate},
};

fn booking_not_found() -> ApiError {
    ApiError::NotFound("Booking not found".into())
}

#[utoipa::path(
    get,
    path = "/bookings/me",
    responses(
        (status = 200, description = "Bookings of the signed-in user, newest first", body = [BookingDetails]),
        (status = 401, description = "Missing or invalid token")
    ),
    security(("bearer_auth" = [])),
    tag = "bookings"
)]
pub async fn my_bookings(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
) -> Result<Json<Vec<BookingDetails>>, ApiError> {
    Ok(Json(state.db.list_bookings_for_user(user.id).await?))
}

#[utoipa::path(
    get,
    path = "/bookings",
    responses(
        (status = 200, description = "All bookings, newest first", body = [BookingDetails]),
        (status = 401, description = "Invalid authentication token")
    ),
    security(("bearer_auth" = []), ("query_token" = [])),
    tag = "bookings"
)]
pub async fn list_bookings(
    _admin: AdminAccess,
    State(state): State<AppState>,
) -> Result<Json<Vec<BookingDetails>>, ApiError> {
    Ok(Json(state.db.list_bookings().await?))
}

#[utoipa::path(
    get,
    path = "/bookings/{id}",
    params(("id" = i64, Path, description = "Booking id")),
    responses(
        (status = 200, description = "Booking with class and user summary", body = BookingDetails),
        (status = 401, description = "Invalid authentication token"),
        (status = 404, description = "Booking not found")
    ),
    security(("bearer_auth" = []), ("query_token" = [])),
    tag = "bookings"
)]
pub async fn get_booking(
    _admin: AdminAccess,
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<BookingDetails>, ApiError> {
    let booking = state
        .db
        .get_booking_details(id)
        .await?
        .ok_or_else(booking_not_found)?;
    Ok(Json(booking))
}

#[utoipa::path(
    post,
    path = "/bookings",
    request_body = BookingInput,
    responses(
        (status = 201, description = "Booking created", body = Booking),
        (status = 401, description = "Invalid authentication token"),
        (status = 404, description = "Class or user not found"),
        (status = 409, description = "Checkout session already booked")
    ),
    security(("bearer_auth" = []), ("query_token" = [])),
    tag = "bookings"
)]
pub async fn create_booking(
    _admin: AdminAccess,
    State(state): State<AppState>,
    Json(input): Json<BookingInput>,
) -> Result<impl IntoResponse, ApiError> {
    if state.db.get_class(input.class_occurrence_id).await?.is_none() {
        return Err(ApiError::NotFound("Class not found".into()));
    }
    if state.db.find_user(input.user_id).await?.is_none() {
        return Err(ApiError::NotFound("User not found".into()));
    }

    let booking = state.db.create_booking(&input).await?;
    info!(
        booking_id = booking.id,
        class_id = booking.class_occurrence_id,
        user_id = booking.user_id,
        status = %booking.status,
        "Booking created"
    );
    Ok((StatusCode::CREATED, Json(booking)))
}

#[utoipa::path(
    put,
    path = "/bookings/{id}",
    params(("id" = i64, Path, description = "Booking id")),
    request_body = BookingUpdate,
    responses(
        (status = 200, description = "Booking updated", body = Booking),
        (status = 401, description = "Invalid authentication token"),
        (status = 404, description = "Booking not found"),
        (status = 409, description = "Booking changed concurrently")
    ),
    security(("bearer_auth" = []), ("query_token" = [])),
    tag = "bookings"
)]
pub async fn update_booking(
    _admin: AdminAccess,
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(update): Json<BookingUpdate>,
) -> Result<Json<Booking>, ApiError> {
    let current = state.db.get_booking(id).await?.ok_or_else(booking_not_found)?;
    let status = update.status.unwrap_or(current.status);

    let booking = state
        .db
        .set_booking_status(id, status, update.stripe_payment_id.as_deref())
        .await?
        .ok_or_else(booking_not_found)?;
    info!(booking_id = id, from = %current.status, to = %booking.status, "Booking updated");
    Ok(Json(booking))
}

#[utoipa::path(
    delete,
    path = "/bookings/{id}",
    params(("id" = i64, Path, description = "Booking id")),
    responses(
        (status = 204, description = "Booking deleted"),
        (status = 401, description = "Invalid authentication token"),
        (status = 404, description = "Booking not found")
    ),
    security(("bearer_auth" = []), ("query_token" = [])),
    tag = "bookings"
)]
pub async fn delete_booking(
    _admin: AdminAccess,
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    if !state.db.delete_booking(id).await? {
        return Err(booking_not_found());
    }
    info!(booking_id = id, "Booking deleted");
    Ok(StatusCode::NO_CONTENT)
}
