//! Stripe webhook event processing.
//!
//! Everything here runs after the signature has been verified. Failures are
//! logged and reported through [`WebhookOutcome`]; the HTTP layer always
//! acknowledges the delivery so Stripe does not retry.

use std::collections::HashMap;

use serde::de::DeserializeOwned;
use tracing::{error, info, warn};

use crate::AppState;
use crate::email::{BookingConfirmation, booking_confirmation_html};
use crate::models::BookingStatus;
use crate::payments::{
    CheckoutSession, PaymentIntent, StripeEvent, format_class_date, format_class_time,
};
use crate::store::CheckoutBooking;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    BookingCreated(i64),
    DuplicateSession,
    InvalidMetadata(&'static str),
    BookingConfirmed(i64),
    BookingCancelled(i64),
    BookingNotFound(i64),
    Failed,
    Ignored,
}

/// Reads a numeric id from event metadata; `"null"` and `"undefined"` count as absent.
fn metadata_id(metadata: &HashMap<String, String>, key: &str) -> Option<i64> {
    metadata
        .get(key)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty() && *v != "null" && *v != "undefined")
        .and_then(|v| v.parse().ok())
}

fn event_object<T: DeserializeOwned>(event: &StripeEvent) -> Option<T> {
    match serde_json::from_value(event.data.object.clone()) {
        Ok(object) => Some(object),
        Err(e) => {
            error!(event_id = %event.id, event_type = %event.event_type, "Unreadable event object: {e}");
            None
        }
    }
}

pub async fn process_event(state: &AppState, event: &StripeEvent) -> WebhookOutcome {
    info!(event_id = %event.id, event_type = %event.event_type, "Received webhook event");

    match event.event_type.as_str() {
        "checkout.session.completed" => match event_object::<CheckoutSession>(event) {
            Some(session) => handle_checkout_completed(state, &session).await,
            None => WebhookOutcome::Failed,
        },
        "payment_intent.succeeded" => match event_object::<PaymentIntent>(event) {
            Some(intent) => handle_payment_succeeded(state, &intent).await,
            None => WebhookOutcome::Failed,
        },
        "payment_intent.payment_failed" => match event_object::<PaymentIntent>(event) {
            Some(intent) => handle_payment_failed(state, &intent).await,
            None => WebhookOutcome::Failed,
        },
        "payment_intent.created" | "charge.succeeded" | "charge.updated" => {
            info!(event_type = %event.event_type, "No action needed");
            WebhookOutcome::Ignored
        }
        other => {
            info!("Unhandled event type: {other}");
            WebhookOutcome::Ignored
        }
    }
}

async fn handle_checkout_completed(state: &AppState, session: &CheckoutSession) -> WebhookOutcome {
    info!(
        session_id = %session.id,
        amount_total = ?session.amount_total,
        currency = ?session.currency,
        payment_intent = ?session.payment_intent,
        "Checkout session completed"
    );

    let Some(class_id) = metadata_id(&session.metadata, "classId") else {
        error!(session_id = %session.id, metadata = ?session.metadata, "Missing classId in metadata");
        return WebhookOutcome::InvalidMetadata("classId");
    };
    let Some(user_id) = metadata_id(&session.metadata, "userId") else {
        error!(session_id = %session.id, metadata = ?session.metadata, "Missing or invalid userId in metadata");
        return WebhookOutcome::InvalidMetadata("userId");
    };

    let checkout = CheckoutBooking {
        class_occurrence_id: class_id,
        user_id,
        stripe_session_id: session.id.clone(),
        stripe_payment_id: session.payment_intent.clone(),
    };
    let booking = match state.db.create_booking_for_checkout(&checkout).await {
        Ok(Some(booking)) => booking,
        Ok(None) => {
            warn!(session_id = %session.id, "Booking already exists for session");
            return WebhookOutcome::DuplicateSession;
        }
        Err(e) => {
            error!(session_id = %session.id, class_id, user_id, "Booking creation failed: {e}");
            return WebhookOutcome::Failed;
        }
    };
    info!(booking_id = booking.id, class_id, user_id, session_id = %session.id, "Booking created");

    let fallback_email = session
        .customer_email
        .clone()
        .or_else(|| session.customer_details.as_ref().and_then(|d| d.email.clone()));
    send_confirmation(
        state,
        booking.id,
        session.amount_total,
        session.currency.as_deref(),
        fallback_email.as_deref(),
    )
    .await;

    WebhookOutcome::BookingCreated(booking.id)
}

async fn handle_payment_succeeded(state: &AppState, intent: &PaymentIntent) -> WebhookOutcome {
    let Some(booking_id) = metadata_id(&intent.metadata, "bookingId") else {
        info!(payment_intent = %intent.id, "Payment succeeded");
        return WebhookOutcome::Ignored;
    };

    match state
        .db
        .set_booking_status(booking_id, BookingStatus::Confirmed, Some(&intent.id))
        .await
    {
        Ok(Some(_)) => {
            info!(booking_id, payment_intent = %intent.id, "Booking confirmed via webhook");
            send_confirmation(
                state,
                booking_id,
                intent.amount,
                intent.currency.as_deref(),
                intent.receipt_email.as_deref(),
            )
            .await;
            WebhookOutcome::BookingConfirmed(booking_id)
        }
        Ok(None) => {
            warn!(booking_id, "Booking referenced by payment intent does not exist");
            WebhookOutcome::BookingNotFound(booking_id)
        }
        Err(e) => {
            error!(booking_id, "Error confirming booking via webhook: {e}");
            WebhookOutcome::Failed
        }
    }
}

async fn handle_payment_failed(state: &AppState, intent: &PaymentIntent) -> WebhookOutcome {
    let Some(booking_id) = metadata_id(&intent.metadata, "bookingId") else {
        info!(payment_intent = %intent.id, "Payment failed");
        return WebhookOutcome::Ignored;
    };

    match state
        .db
        .set_booking_status(booking_id, BookingStatus::Cancelled, None)
        .await
    {
        Ok(Some(_)) => {
            info!(booking_id, "Booking cancelled due to payment failure");
            WebhookOutcome::BookingCancelled(booking_id)
        }
        Ok(None) => {
            warn!(booking_id, "Booking referenced by failed payment does not exist");
            WebhookOutcome::BookingNotFound(booking_id)
        }
        Err(e) => {
            error!(booking_id, "Error cancelling booking via webhook: {e}");
            WebhookOutcome::Failed
        }
    }
}

/// Best effort: any failure is logged and swallowed.
async fn send_confirmation(
    state: &AppState,
    booking_id: i64,
    amount: Option<i64>,
    currency: Option<&str>,
    fallback_email: Option<&str>,
) {
    let details = match state.db.get_booking_details(booking_id).await {
        Ok(Some(details)) => details,
        Ok(None) => {
            warn!(booking_id, "Booking vanished before confirmation email");
            return;
        }
        Err(e) => {
            error!(booking_id, "Could not load booking for confirmation email: {e}");
            return;
        }
    };

    let to = if details.user.email.is_empty() {
        fallback_email.map(str::to_string)
    } else {
        Some(details.user.email.clone())
    };
    let Some(to) = to else {
        warn!(booking_id, "No email address found for booking");
        return;
    };

    let class = &details.class_occurrence;
    let class_date = format_class_date(class.date);
    let class_time = format!(
        "{} - {}",
        format_class_time(class.start_time),
        format_class_time(class.end_time)
    );
    let customer_name = details.user.display_name();
    let dashboard_url = state.settings.frontend_link("/dashboard");
    let currency = currency.unwrap_or(&state.settings.currency);
    let html = booking_confirmation_html(&BookingConfirmation {
        studio_name: &state.settings.studio_name,
        customer_name: &customer_name,
        class_name: &class.title,
        class_date: &class_date,
        class_time: &class_time,
        amount,
        currency,
        booking_id,
        dashboard_url: &dashboard_url,
    });
    let subject = format!("Booking Confirmed - {} on {}", class.title, class_date);

    match state.mailer.send(&state.mailer.message(&to, subject, html)).await {
        Ok(_) => info!(booking_id, to = %to, "Confirmation email sent"),
        Err(e) => error!(booking_id, "Error sending confirmation email: {e}"),
    }
}
