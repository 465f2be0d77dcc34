use axum::{
    Json,
    body::Bytes,
    extract::State,
    http::HeaderMap,
};
use serde::Deserialize;
use tracing::{info, warn};
use utoipa::ToSchema;

use crate::{
    AppState,
    auth::AuthUser,
    error::ApiError,
    payments::{CheckoutRequest, PaymentError, StripeEvent, product_description},
    webhook::process_event,
};

const SUCCESS_PATH: &str = "/dashboard?session_id={CHECKOUT_SESSION_ID}&payment=success";
const CANCEL_PATH: &str = "/classes";

#[derive(Debug, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutSessionRequest {
    pub class_id: Option<i64>,
    /// Expected price in pence; must match the stored class price.
    pub price: Option<i64>,
}

#[utoipa::path(
    post,
    path = "/stripe/create-checkout-session",
    request_body = CheckoutSessionRequest,
    responses(
        (status = 200, description = "Hosted checkout URL, as `{url}`"),
        (status = 400, description = "Missing fields, inactive class or price mismatch"),
        (status = 401, description = "You must be logged in to book a class"),
        (status = 404, description = "Class not found"),
        (status = 409, description = "Class is fully booked"),
        (status = 500, description = "Could not create checkout session")
    ),
    security(("bearer_auth" = [])),
    tag = "payments"
)]
pub async fn create_checkout_session(
    State(state): State<AppState>,
    auth: Result<AuthUser, ApiError>,
    Json(body): Json<CheckoutSessionRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let (Some(class_id), Some(price)) = (body.class_id, body.price) else {
        return Err(ApiError::BadRequest("Class ID and price are required".into()));
    };
    let AuthUser(user) =
        auth.map_err(|_| ApiError::Unauthorized("You must be logged in to book a class".into()))?;

    let class = state
        .db
        .get_class(class_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Class not found".into()))?;
    if !class.is_active {
        return Err(ApiError::BadRequest("This class is not available for booking".into()));
    }
    if class.is_full() {
        return Err(ApiError::Conflict("This class is fully booked".into()));
    }
    if price != class.price {
        warn!(class_id, requested = price, expected = class.price, "Checkout price mismatch");
        return Err(ApiError::BadRequest("Price does not match the class price".into()));
    }

    let request = CheckoutRequest {
        class_id: class.id,
        user_id: user.id,
        customer_email: Some(user.email.clone()),
        product_name: class.title.clone(),
        product_description: product_description(&class),
        image_url: class.thumbnail_url.clone(),
        unit_amount: class.price,
        currency: state.settings.currency.clone(),
        success_url: state.settings.frontend_link(SUCCESS_PATH),
        cancel_url: state.settings.frontend_link(CANCEL_PATH),
    };
    let session = state.payments.create_checkout_session(&request).await?;
    let url = session.url.ok_or(PaymentError::MissingUrl)?;

    info!(session_id = %session.id, class_id, user_id = user.id, "Checkout started");
    Ok(Json(serde_json::json!({ "url": url })))
}

#[utoipa::path(
    post,
    path = "/stripe/webhook",
    request_body(content = String, description = "Raw Stripe event payload", content_type = "application/json"),
    params(("stripe-signature" = String, Header, description = "Stripe signature header")),
    responses(
        (status = 200, description = "Event acknowledged, as `{received: true}`"),
        (status = 400, description = "Webhook Error")
    ),
    tag = "payments"
)]
pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<serde_json::Value>, ApiError> {
    let signature = headers
        .get("stripe-signature")
        .and_then(|value| value.to_str().ok());
    state
        .payments
        .verify_webhook_signature(&body, signature)
        .map_err(|e| {
            warn!("Webhook signature verification failed: {e}");
            ApiError::BadRequest(format!("Webhook Error: {e}"))
        })?;

    let event: StripeEvent = serde_json::from_slice(&body).map_err(|e| {
        warn!("Webhook payload is not a Stripe event: {e}");
        ApiError::BadRequest(format!("Webhook Error: {e}"))
    })?;

    let outcome = process_event(&state, &event).await;
    info!(event_id = %event.id, ?outcome, "Webhook processed");
    Ok(Json(serde_json::json!({ "received": true })))
}
