use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, sqlx::FromRow, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClassOccurrence {
    pub id: i64,
    pub title: String,
    pub slug: String,
    pub description: Option<String>,
    #[schema(value_type = String, format = "date", example = "2025-11-24")]
    pub date: NaiveDate,
    #[schema(value_type = String, example = "18:00:00")]
    pub start_time: NaiveTime,
    #[schema(value_type = String, example = "19:00:00")]
    pub end_time: NaiveTime,
    /// Minor currency units (pence).
    pub price: i64,
    pub max_capacity: i64,
    pub booked_count: i64,
    pub level: Option<String>,
    pub location: Option<String>,
    pub instructor: Option<String>,
    pub thumbnail_url: Option<String>,
    pub is_active: bool,
    #[schema(value_type = String, format = "date-time")]
    pub created_at: DateTime<Utc>,
    #[schema(value_type = String, format = "date-time")]
    pub updated_at: DateTime<Utc>,
}

impl ClassOccurrence {
    pub fn spots_left(&self) -> i64 {
        (self.max_capacity - self.booked_count).max(0)
    }

    pub fn is_full(&self) -> bool {
        self.booked_count >= self.max_capacity
    }
}

/// Payload for creating or replacing a class occurrence.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClassInput {
    pub title: String,
    pub slug: Option<String>,
    pub description: Option<String>,
    #[schema(value_type = String, format = "date")]
    pub date: NaiveDate,
    #[schema(value_type = String)]
    pub start_time: NaiveTime,
    #[schema(value_type = String)]
    pub end_time: NaiveTime,
    pub price: i64,
    pub max_capacity: i64,
    pub level: Option<String>,
    pub location: Option<String>,
    pub instructor: Option<String>,
    pub thumbnail_url: Option<String>,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    #[serde(alias = "canceled")]
    Cancelled,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Cancelled => "cancelled",
        }
    }

    /// Change to `bookedCount` when a booking moves from `self` to `next`.
    pub fn capacity_delta(self, next: BookingStatus) -> i64 {
        match (self == BookingStatus::Confirmed, next == BookingStatus::Confirmed) {
            (false, true) => 1,
            (true, false) => -1,
            _ => 0,
        }
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, sqlx::FromRow, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Booking {
    pub id: i64,
    pub class_occurrence_id: i64,
    pub user_id: i64,
    pub status: BookingStatus,
    pub stripe_session_id: Option<String>,
    pub stripe_payment_id: Option<String>,
    #[schema(value_type = String, format = "date-time")]
    pub booking_date: DateTime<Utc>,
    #[schema(value_type = String, format = "date-time")]
    pub created_at: DateTime<Utc>,
    #[schema(value_type = String, format = "date-time")]
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClassSummary {
    pub title: String,
    #[schema(value_type = String, format = "date")]
    pub date: NaiveDate,
    #[schema(value_type = String)]
    pub start_time: NaiveTime,
    #[schema(value_type = String)]
    pub end_time: NaiveTime,
    pub price: i64,
    pub location: Option<String>,
    pub instructor: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub email: String,
    pub username: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

impl UserSummary {
    pub fn display_name(&self) -> String {
        match (&self.first_name, &self.last_name) {
            (Some(first), Some(last)) => format!("{first} {last}"),
            (Some(first), None) => first.clone(),
            _ => self.username.clone(),
        }
    }
}

/// Booking joined with the class and user it references.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BookingDetails {
    #[serde(flatten)]
    pub booking: Booking,
    pub class_occurrence: ClassSummary,
    pub user: UserSummary,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BookingInput {
    pub class_occurrence_id: i64,
    pub user_id: i64,
    #[serde(default = "default_status")]
    pub status: BookingStatus,
    pub stripe_session_id: Option<String>,
    pub stripe_payment_id: Option<String>,
}

fn default_status() -> BookingStatus {
    BookingStatus::Pending
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BookingUpdate {
    pub status: Option<BookingStatus>,
    pub stripe_payment_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, sqlx::FromRow, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    #[serde(skip)]
    pub password_hash: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub hear_about_us: Option<String>,
    pub confirmed: bool,
    pub blocked: bool,
    #[serde(skip)]
    pub reset_password_token: Option<String>,
    #[serde(skip)]
    pub reset_password_sent_at: Option<DateTime<Utc>>,
    #[schema(value_type = String, format = "date-time")]
    pub created_at: DateTime<Utc>,
    #[schema(value_type = String, format = "date-time")]
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdate {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub hear_about_us: Option<String>,
}
