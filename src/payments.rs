use std::collections::HashMap;
use std::sync::Arc;

use chrono::{NaiveDate, NaiveTime, Utc};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use thiserror::Error;
use tracing::{debug, info};
use url::Url;
use url::form_urlencoded;

use crate::models::ClassOccurrence;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Stripe API error ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("Stripe response did not include a checkout URL")]
    MissingUrl,
    #[error("Stripe secret key is not configured")]
    NotConfigured,
}

#[derive(Debug, Error, PartialEq)]
pub enum SignatureError {
    #[error("No stripe-signature header value was provided")]
    MissingHeader,
    #[error("Unable to extract timestamp and signatures from header")]
    MalformedHeader,
    #[error("Timestamp outside the tolerance zone")]
    TimestampOutsideTolerance,
    #[error("No signatures found matching the expected signature for payload")]
    NoMatchingSignature,
}

/// Parameters for a single-class checkout.
#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    pub class_id: i64,
    pub user_id: i64,
    pub customer_email: Option<String>,
    pub product_name: String,
    pub product_description: String,
    pub image_url: Option<String>,
    pub unit_amount: i64,
    pub currency: String,
    pub success_url: String,
    pub cancel_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutSessionCreated {
    pub id: String,
    pub url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StripeErrorBody {
    error: StripeErrorDetail,
}

#[derive(Debug, Deserialize)]
struct StripeErrorDetail {
    message: Option<String>,
}

#[derive(Clone)]
pub struct StripeClient {
    client: reqwest::Client,
    api_base: Arc<Url>,
    secret_key: String,
    webhook_secret: String,
    tolerance_secs: i64,
}

impl StripeClient {
    pub fn new(api_base: Url, secret_key: String, webhook_secret: String, tolerance_secs: i64) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base: Arc::new(api_base),
            secret_key,
            webhook_secret,
            tolerance_secs,
        }
    }

    fn form_body(request: &CheckoutRequest) -> String {
        let mut form = form_urlencoded::Serializer::new(String::new());
        form.append_pair("mode", "payment")
            .append_pair("payment_method_types[0]", "card")
            .append_pair("line_items[0][quantity]", "1")
            .append_pair("line_items[0][price_data][currency]", &request.currency)
            .append_pair(
                "line_items[0][price_data][unit_amount]",
                &request.unit_amount.to_string(),
            )
            .append_pair(
                "line_items[0][price_data][product_data][name]",
                &request.product_name,
            )
            .append_pair(
                "line_items[0][price_data][product_data][description]",
                &request.product_description,
            )
            .append_pair("success_url", &request.success_url)
            .append_pair("cancel_url", &request.cancel_url)
            .append_pair("metadata[classId]", &request.class_id.to_string())
            .append_pair("metadata[userId]", &request.user_id.to_string());
        if let Some(image) = &request.image_url {
            form.append_pair("line_items[0][price_data][product_data][images][0]", image);
        }
        if let Some(email) = &request.customer_email {
            form.append_pair("customer_email", email);
        }
        form.finish()
    }

    pub async fn create_checkout_session(
        &self,
        request: &CheckoutRequest,
    ) -> Result<CheckoutSessionCreated, PaymentError> {
        if self.secret_key.is_empty() {
            return Err(PaymentError::NotConfigured);
        }
        let endpoint = format!(
            "{}/v1/checkout/sessions",
            self.api_base.as_str().trim_end_matches('/')
        );
        debug!(class_id = request.class_id, user_id = request.user_id, "creating checkout session");

        let response = self
            .client
            .post(endpoint)
            .bearer_auth(&self.secret_key)
            .header("content-type", "application/x-www-form-urlencoded")
            .body(Self::form_body(request))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .json::<StripeErrorBody>()
                .await
                .ok()
                .and_then(|body| body.error.message)
                .unwrap_or_else(|| "unknown error".to_string());
            return Err(PaymentError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let session: CheckoutSessionCreated = response.json().await?;
        if session.url.is_none() {
            return Err(PaymentError::MissingUrl);
        }
        info!(session_id = %session.id, class_id = request.class_id, "checkout session created");
        Ok(session)
    }

    pub fn verify_webhook_signature(&self, payload: &[u8], header: Option<&str>) -> Result<(), SignatureError> {
        verify_signature_at(
            payload,
            header,
            &self.webhook_secret,
            self.tolerance_secs,
            Utc::now().timestamp(),
        )
    }
}

/// Checks a `t=<unix>,v1=<hex>` header against HMAC-SHA256 of `"{t}.{payload}"`.
pub fn verify_signature_at(
    payload: &[u8],
    header: Option<&str>,
    secret: &str,
    tolerance_secs: i64,
    now: i64,
) -> Result<(), SignatureError> {
    let header = header
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .ok_or(SignatureError::MissingHeader)?;

    let mut timestamp: Option<(&str, i64)> = None;
    let mut signatures: Vec<Vec<u8>> = Vec::new();
    for part in header.split(',') {
        let Some((key, value)) = part.trim().split_once('=') else {
            continue;
        };
        match key {
            "t" => timestamp = value.parse().ok().map(|t| (value, t)),
            "v1" => {
                if let Ok(bytes) = hex::decode(value) {
                    signatures.push(bytes);
                }
            }
            _ => {}
        }
    }
    let (raw_timestamp, timestamp) = timestamp.ok_or(SignatureError::MalformedHeader)?;
    if signatures.is_empty() {
        return Err(SignatureError::MalformedHeader);
    }

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| SignatureError::NoMatchingSignature)?;
    mac.update(raw_timestamp.as_bytes());
    mac.update(b".");
    mac.update(payload);

    let matched = signatures
        .iter()
        .any(|candidate| mac.clone().verify_slice(candidate).is_ok());
    if !matched {
        return Err(SignatureError::NoMatchingSignature);
    }
    if now.abs_diff(timestamp) > tolerance_secs.unsigned_abs() {
        return Err(SignatureError::TimestampOutsideTolerance);
    }
    Ok(())
}

pub fn format_class_date(date: NaiveDate) -> String {
    date.format("%A, %-d %B %Y").to_string()
}

pub fn format_class_time(time: NaiveTime) -> String {
    time.format("%-I:%M %p").to_string()
}

/// Product description shown on the hosted checkout page.
pub fn product_description(class: &ClassOccurrence) -> String {
    let mut parts: Vec<String> = Vec::new();
    if let Some(description) = class.description.as_deref().filter(|d| !d.trim().is_empty()) {
        parts.push(description.to_string());
        parts.push(String::new());
        parts.push(String::new());
    }
    parts.push(String::new());
    parts.push("CLASS DETAILS".to_string());
    parts.push("────────────────".to_string());
    parts.push(String::new());
    parts.push(format!("Date: {}", format_class_date(class.date)));
    parts.push(format!(
        "Time: {} - {}",
        format_class_time(class.start_time),
        format_class_time(class.end_time)
    ));
    if let Some(location) = &class.location {
        parts.push(format!("Location: {location}"));
    }
    parts.join("\n")
}

// ---- webhook payloads ----

#[derive(Debug, Clone, Deserialize)]
pub struct StripeEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: StripeEventData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeEventData {
    pub object: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    pub amount_total: Option<i64>,
    pub currency: Option<String>,
    pub payment_intent: Option<String>,
    pub customer_email: Option<String>,
    pub customer_details: Option<CustomerDetails>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CustomerDetails {
    pub email: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentIntent {
    pub id: String,
    pub amount: Option<i64>,
    pub currency: Option<String>,
    pub receipt_email: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}
