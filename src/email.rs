use std::sync::Arc;

use chrono::{Datelike, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

#[derive(Debug, Error)]
pub enum EmailError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("email API error ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("email API key is not configured")]
    NotConfigured,
}

#[derive(Debug, Clone, Serialize)]
pub struct EmailMessage {
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub html: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    id: String,
}

/// Transactional mail through the Resend HTTP API.
#[derive(Clone)]
pub struct Mailer {
    client: reqwest::Client,
    api_base: Arc<Url>,
    api_key: String,
    from: String,
}

impl Mailer {
    pub fn new(api_base: Url, api_key: String, from: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base: Arc::new(api_base),
            api_key,
            from,
        }
    }

    /// Sends `message` and returns the provider's message id.
    pub async fn send(&self, message: &EmailMessage) -> Result<String, EmailError> {
        if self.api_key.is_empty() {
            return Err(EmailError::NotConfigured);
        }
        let endpoint = format!("{}/emails", self.api_base.as_str().trim_end_matches('/'));
        debug!(to = ?message.to, subject = %message.subject, "sending email");

        let response = self
            .client
            .post(endpoint)
            .bearer_auth(&self.api_key)
            .json(message)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(EmailError::Api {
                status: status.as_u16(),
                message,
            });
        }
        let sent: SendResponse = response.json().await?;
        info!(message_id = %sent.id, "email sent");
        Ok(sent.id)
    }

    pub fn message(&self, to: &str, subject: String, html: String) -> EmailMessage {
        EmailMessage {
            from: self.from.clone(),
            to: vec![to.to_string()],
            subject,
            html,
            reply_to: None,
        }
    }
}

pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

/// `1250, "gbp"` renders as `£12.50`; other currencies keep their code.
pub fn format_amount(minor_units: i64, currency: &str) -> String {
    let sign = if minor_units < 0 { "-" } else { "" };
    let abs = minor_units.unsigned_abs();
    let major = format!("{}.{:02}", abs / 100, abs % 100);
    match currency.to_ascii_uppercase().as_str() {
        "GBP" => format!("{sign}£{major}"),
        "EUR" => format!("{sign}€{major}"),
        "USD" => format!("{sign}${major}"),
        other => format!("{sign}{major} {other}"),
    }
}

pub struct BookingConfirmation<'a> {
    pub studio_name: &'a str,
    pub customer_name: &'a str,
    pub class_name: &'a str,
    pub class_date: &'a str,
    pub class_time: &'a str,
    pub amount: Option<i64>,
    pub currency: &'a str,
    pub booking_id: i64,
    pub dashboard_url: &'a str,
}

pub fn booking_confirmation_html(c: &BookingConfirmation<'_>) -> String {
    let amount_row = match c.amount {
        Some(amount) => format!(
            r#"<tr>
                <td style="padding: 10px 0; border-bottom: 1px solid #e0e0e0;"><strong>Amount Paid:</strong></td>
                <td style="padding: 10px 0; border-bottom: 1px solid #e0e0e0; text-align: right; color: #10b981; font-weight: bold;">{}</td>
              </tr>"#,
            escape_html(&format_amount(amount, c.currency))
        ),
        None => String::new(),
    };
    format!(
        r#"<!DOCTYPE html>
<html>
  <head>
    <meta charset="utf-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Booking Confirmation</title>
  </head>
  <body style="font-family: Arial, sans-serif; line-height: 1.6; color: #333; max-width: 600px; margin: 0 auto; padding: 20px;">
    <div style="background: linear-gradient(135deg, #eb1c23 0%, #7b1c11 100%); padding: 30px; text-align: center; border-radius: 10px 10px 0 0;">
      <h1 style="color: white; margin: 0; font-size: 28px;">Booking Confirmed!</h1>
    </div>
    <div style="background: #f9f9f9; padding: 30px; border-radius: 0 0 10px 10px; border: 1px solid #e0e0e0;">
      <p style="font-size: 16px;">Dear {customer},</p>
      <p style="font-size: 16px;">Thank you for booking with {studio}! Your payment has been processed and your class booking is confirmed.</p>
      <div style="background: white; padding: 20px; border-radius: 8px; border-left: 4px solid #eb1c23;">
        <h2 style="color: #eb1c23; margin-top: 0; font-size: 20px;">Booking Details</h2>
        <table style="width: 100%; border-collapse: collapse;">
          <tr>
            <td style="padding: 10px 0; border-bottom: 1px solid #e0e0e0;"><strong>Class:</strong></td>
            <td style="padding: 10px 0; border-bottom: 1px solid #e0e0e0; text-align: right;">{class}</td>
          </tr>
          <tr>
            <td style="padding: 10px 0; border-bottom: 1px solid #e0e0e0;"><strong>Date:</strong></td>
            <td style="padding: 10px 0; border-bottom: 1px solid #e0e0e0; text-align: right;">{date}</td>
          </tr>
          <tr>
            <td style="padding: 10px 0; border-bottom: 1px solid #e0e0e0;"><strong>Time:</strong></td>
            <td style="padding: 10px 0; border-bottom: 1px solid #e0e0e0; text-align: right;">{time}</td>
          </tr>
          {amount_row}
          <tr>
            <td style="padding: 10px 0;"><strong>Booking Reference:</strong></td>
            <td style="padding: 10px 0; text-align: right; font-family: monospace;">#{booking_id}</td>
          </tr>
        </table>
      </div>
      <p style="text-align: center; margin: 30px 0;">
        <a href="{dashboard}" style="display: inline-block; padding: 15px 30px; background: #eb1c23; color: white; text-decoration: none; border-radius: 8px; font-weight: bold;">View My Bookings</a>
      </p>
      <p style="font-size: 14px; color: #666;">Please arrive 10 minutes before your class starts. We look forward to dancing with you!</p>
    </div>
    <div style="text-align: center; padding: 20px; color: #666; font-size: 12px;">
      <p>&copy; {year} {studio}. All rights reserved.</p>
    </div>
  </body>
</html>"#,
        customer = escape_html(c.customer_name),
        studio = escape_html(c.studio_name),
        class = escape_html(c.class_name),
        date = escape_html(c.class_date),
        time = escape_html(c.class_time),
        amount_row = amount_row,
        booking_id = c.booking_id,
        dashboard = escape_html(c.dashboard_url),
        year = Utc::now().year(),
    )
}

pub fn password_reset_html(studio_name: &str, greeting_name: &str, reset_url: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
  <head>
    <meta charset="utf-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Reset Your Password - {studio}</title>
  </head>
  <body style="font-family: Arial, sans-serif; line-height: 1.6; color: #333; max-width: 600px; margin: 0 auto; padding: 20px;">
    <div style="background: linear-gradient(135deg, #eb1c23 0%, #7b1c11 100%); padding: 30px; text-align: center; border-radius: 10px 10px 0 0;">
      <h1 style="color: white; margin: 0; font-size: 28px;">Password Reset Request</h1>
    </div>
    <div style="background: #f9f9f9; padding: 30px; border-radius: 0 0 10px 10px; border: 1px solid #e0e0e0;">
      <p style="font-size: 16px;">Hello {name},</p>
      <p style="font-size: 16px;">We received a request to reset the password for your {studio} account. Click the button below to choose a new password:</p>
      <div style="text-align: center; margin: 30px 0;">
        <a href="{url}" style="display: inline-block; padding: 15px 30px; background: #eb1c23; color: white; text-decoration: none; border-radius: 8px; font-weight: bold;">Reset Password</a>
      </div>
      <p style="font-size: 14px; color: #666;">Or copy and paste this link into your browser:<br><a href="{url}" style="color: #eb1c23; word-break: break-all;">{url}</a></p>
      <div style="background: #fff3cd; border: 1px solid #ffc107; padding: 15px; border-radius: 8px;">
        <p style="margin: 0; font-size: 14px; color: #856404;"><strong>Important:</strong> This link will expire in 1 hour. If you didn't request a password reset, please ignore this email.</p>
      </div>
    </div>
    <div style="text-align: center; padding: 20px; color: #666; font-size: 12px;">
      <p>This is an automated email. Please do not reply to this email.</p>
      <p>&copy; {year} {studio}. All rights reserved.</p>
    </div>
  </body>
</html>"#,
        studio = escape_html(studio_name),
        name = escape_html(greeting_name),
        url = escape_html(reset_url),
        year = Utc::now().year(),
    )
}

pub struct ContactForm<'a> {
    pub studio_name: &'a str,
    pub name: &'a str,
    pub email: &'a str,
    pub phone: Option<&'a str>,
    pub subject: Option<&'a str>,
    pub message: &'a str,
}

pub fn contact_form_html(form: &ContactForm<'_>) -> String {
    let name = escape_html(form.name);
    let email = escape_html(form.email);
    let phone = form
        .phone
        .map(|p| format!(r#"<p style="margin: 10px 0;"><strong>Phone:</strong> {}</p>"#, escape_html(p)))
        .unwrap_or_default();
    let subject = form
        .subject
        .map(|s| format!(r#"<p style="margin: 10px 0;"><strong>Subject:</strong> {}</p>"#, escape_html(s)))
        .unwrap_or_default();
    format!(
        r#"<div style="font-family: Arial, sans-serif; max-width: 600px; margin: 0 auto;">
  <div style="background: linear-gradient(135deg, #eb1c23 0%, #7b1c11 100%); padding: 30px; border-radius: 10px 10px 0 0;">
    <h1 style="color: white; margin: 0; font-size: 24px;">New Contact Form Submission</h1>
  </div>
  <div style="background: #f9f9f9; padding: 30px; border-radius: 0 0 10px 10px;">
    <div style="background: white; padding: 20px; border-radius: 8px; margin-bottom: 20px;">
      <h2 style="color: #eb1c23; margin-top: 0;">Contact Details</h2>
      <p style="margin: 10px 0;"><strong>Name:</strong> {name}</p>
      <p style="margin: 10px 0;"><strong>Email:</strong> <a href="mailto:{email}">{email}</a></p>
      {phone}
      {subject}
    </div>
    <div style="background: white; padding: 20px; border-radius: 8px;">
      <h2 style="color: #eb1c23; margin-top: 0;">Message</h2>
      <p style="line-height: 1.6; color: #333; white-space: pre-wrap;">{message}</p>
    </div>
    <div style="margin-top: 20px; padding: 15px; background: #fff3cd; border-left: 4px solid #ffc107; border-radius: 4px;">
      <p style="margin: 0; font-size: 14px;"><strong>Quick Reply:</strong> hit "Reply" to respond directly to {name} at {email}</p>
    </div>
  </div>
  <div style="text-align: center; padding: 20px; color: #666; font-size: 12px;">
    <p>Sent from the {studio} contact form</p>
  </div>
</div>"#,
        message = escape_html(form.message),
        studio = escape_html(form.studio_name),
    )
}
