use axum::{Json, extract::State};
use serde::Deserialize;
use tracing::{error, info};
use utoipa::ToSchema;

use crate::{
    AppState,
    email::{ContactForm, contact_form_html},
    error::ApiError,
    validation::required,
};

#[derive(Debug, Default, Deserialize, ToSchema)]
#[serde(default)]
pub struct ContactRequest {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub subject: Option<String>,
    pub message: Option<String>,
}

#[utoipa::path(
    post,
    path = "/contact",
    request_body = ContactRequest,
    responses(
        (status = 200, description = "Message sent, as `{success, messageId}`"),
        (status = 400, description = "Missing required fields"),
        (status = 500, description = "Failed to send email")
    ),
    tag = "contact"
)]
pub async fn contact(
    State(state): State<AppState>,
    Json(body): Json<ContactRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let (Some(name), Some(email), Some(message)) = (
        required(body.name.as_deref()),
        required(body.email.as_deref()),
        required(body.message.as_deref()),
    ) else {
        return Err(ApiError::BadRequest("Missing required fields".into()));
    };
    let subject = required(body.subject.as_deref());

    let html = contact_form_html(&ContactForm {
        studio_name: &state.settings.studio_name,
        name,
        email,
        phone: required(body.phone.as_deref()),
        subject,
        message,
    });
    let mut outgoing = state.mailer.message(
        &state.settings.contact_email,
        format!("New Contact Form: {}", subject.unwrap_or("General Inquiry")),
        html,
    );
    outgoing.reply_to = Some(email.to_string());

    let message_id = state.mailer.send(&outgoing).await.map_err(|e| {
        error!("Contact form email failed: {e}");
        ApiError::Internal("Failed to send email".into())
    })?;
    info!(message_id = %message_id, "Contact form forwarded");
    Ok(Json(serde_json::json!({ "success": true, "messageId": message_id })))
}
