use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{QueryBuilder, Sqlite, SqliteConnection, SqlitePool, Transaction};
use thiserror::Error;
use tracing::{debug, info};

use crate::models::{
    Booking, BookingDetails, BookingInput, BookingStatus, ClassInput, ClassOccurrence,
    ClassSummary, ProfileUpdate, User, UserSummary,
};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("{0}")]
    Conflict(String),
}

fn unique_violation(err: sqlx::Error, message: &str) -> StoreError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            StoreError::Conflict(message.to_string())
        }
        _ => StoreError::Database(err),
    }
}

#[derive(Debug, Clone, Default)]
pub struct ClassFilter {
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub is_active: Option<bool>,
    pub not_before: Option<NaiveDate>,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub hear_about_us: Option<String>,
}

/// Booking produced by a completed checkout session.
#[derive(Debug, Clone)]
pub struct CheckoutBooking {
    pub class_occurrence_id: i64,
    pub user_id: i64,
    pub stripe_session_id: String,
    pub stripe_payment_id: Option<String>,
}

#[derive(sqlx::FromRow)]
struct BookingRow {
    #[sqlx(flatten)]
    booking: Booking,
    class_title: String,
    class_date: NaiveDate,
    class_start_time: NaiveTime,
    class_end_time: NaiveTime,
    class_price: i64,
    class_location: Option<String>,
    class_instructor: Option<String>,
    user_email: String,
    user_username: String,
    user_first_name: Option<String>,
    user_last_name: Option<String>,
}

impl From<BookingRow> for BookingDetails {
    fn from(row: BookingRow) -> Self {
        BookingDetails {
            booking: row.booking,
            class_occurrence: ClassSummary {
                title: row.class_title,
                date: row.class_date,
                start_time: row.class_start_time,
                end_time: row.class_end_time,
                price: row.class_price,
                location: row.class_location,
                instructor: row.class_instructor,
            },
            user: UserSummary {
                email: row.user_email,
                username: row.user_username,
                first_name: row.user_first_name,
                last_name: row.user_last_name,
            },
        }
    }
}

const BOOKING_DETAILS_SELECT: &str = "SELECT b.id, b.class_occurrence_id, b.user_id, b.status, \
     b.stripe_session_id, b.stripe_payment_id, b.booking_date, b.created_at, b.updated_at, \
     c.title AS class_title, c.date AS class_date, c.start_time AS class_start_time, \
     c.end_time AS class_end_time, c.price AS class_price, c.location AS class_location, \
     c.instructor AS class_instructor, u.email AS user_email, u.username AS user_username, \
     u.first_name AS user_first_name, u.last_name AS user_last_name \
     FROM bookings b \
     JOIN class_occurrences c ON c.id = b.class_occurrence_id \
     JOIN users u ON u.id = b.user_id";

#[derive(Clone)]
pub struct Database {
    pub pool: SqlitePool,
}

impl Database {
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        // every connection to `sqlite::memory:` opens its own database
        let in_memory = url.contains(":memory:");
        let mut options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));
        if !in_memory {
            options = options.journal_mode(SqliteJournalMode::Wal);
        }

        let mut pool_options = SqlitePoolOptions::new()
            .max_connections(if in_memory { 1 } else { 5 })
            .acquire_timeout(Duration::from_secs(3));
        if in_memory {
            pool_options = pool_options
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
        }

        let pool = pool_options.connect_with(options).await?;
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        info!("Running database migrations...");
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Migrations completed successfully.");
        Ok(())
    }

    /// Opens a transaction that takes the write lock on its first statement,
    /// so a read inside it can never need a lock upgrade later.
    async fn begin_write(&self) -> Result<Transaction<'static, Sqlite>, StoreError> {
        Ok(self.pool.begin_with("BEGIN IMMEDIATE").await?)
    }

    pub async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    // ---- class occurrences ----

    pub async fn list_classes(&self, filter: &ClassFilter) -> Result<Vec<ClassOccurrence>, StoreError> {
        let mut query: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT * FROM class_occurrences WHERE 1 = 1");
        if let Some(start) = filter.start_date {
            query.push(" AND date >= ").push_bind(start);
        }
        if let Some(end) = filter.end_date {
            query.push(" AND date <= ").push_bind(end);
        }
        if let Some(not_before) = filter.not_before {
            query.push(" AND date >= ").push_bind(not_before);
        }
        if let Some(active) = filter.is_active {
            query.push(" AND is_active = ").push_bind(active);
        }
        query.push(" ORDER BY date ASC, start_time ASC, id ASC");

        let classes = query
            .build_query_as::<ClassOccurrence>()
            .fetch_all(&self.pool)
            .await?;
        Ok(classes)
    }

    pub async fn get_class(&self, id: i64) -> Result<Option<ClassOccurrence>, StoreError> {
        let class = sqlx::query_as::<_, ClassOccurrence>("SELECT * FROM class_occurrences WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(class)
    }

    pub async fn get_class_by_slug(&self, slug: &str) -> Result<Option<ClassOccurrence>, StoreError> {
        let class =
            sqlx::query_as::<_, ClassOccurrence>("SELECT * FROM class_occurrences WHERE slug = ?")
                .bind(slug)
                .fetch_optional(&self.pool)
                .await?;
        Ok(class)
    }

    /// Inserts a class under an already-resolved `slug`.
    pub async fn create_class(&self, input: &ClassInput, slug: &str) -> Result<ClassOccurrence, StoreError> {
        let now = Utc::now();
        sqlx::query_as::<_, ClassOccurrence>(
            "INSERT INTO class_occurrences (title, slug, description, date, start_time, end_time, \
             price, max_capacity, booked_count, level, location, instructor, thumbnail_url, \
             is_active, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, 0, ?, ?, ?, ?, ?, ?, ?) RETURNING *",
        )
        .bind(&input.title)
        .bind(slug)
        .bind(&input.description)
        .bind(input.date)
        .bind(input.start_time)
        .bind(input.end_time)
        .bind(input.price)
        .bind(input.max_capacity)
        .bind(&input.level)
        .bind(&input.location)
        .bind(&input.instructor)
        .bind(&input.thumbnail_url)
        .bind(input.is_active)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| unique_violation(e, "A class with this slug already exists"))
    }

    /// Replaces editable fields; `booked_count` is owned by booking transitions.
    pub async fn update_class(
        &self,
        id: i64,
        input: &ClassInput,
        slug: &str,
    ) -> Result<Option<ClassOccurrence>, StoreError> {
        sqlx::query_as::<_, ClassOccurrence>(
            "UPDATE class_occurrences SET title = ?, slug = ?, description = ?, date = ?, \
             start_time = ?, end_time = ?, price = ?, max_capacity = ?, level = ?, location = ?, \
             instructor = ?, thumbnail_url = ?, is_active = ?, updated_at = ? \
             WHERE id = ? RETURNING *",
        )
        .bind(&input.title)
        .bind(slug)
        .bind(&input.description)
        .bind(input.date)
        .bind(input.start_time)
        .bind(input.end_time)
        .bind(input.price)
        .bind(input.max_capacity)
        .bind(&input.level)
        .bind(&input.location)
        .bind(&input.instructor)
        .bind(&input.thumbnail_url)
        .bind(input.is_active)
        .bind(Utc::now())
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| unique_violation(e, "A class with this slug already exists"))
    }

    pub async fn delete_class(&self, id: i64) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM class_occurrences WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    // ---- users ----

    pub async fn create_user(&self, user: &NewUser) -> Result<User, StoreError> {
        let now = Utc::now();
        sqlx::query_as::<_, User>(
            "INSERT INTO users (username, email, password_hash, first_name, last_name, phone, \
             address, hear_about_us, confirmed, blocked, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, 1, 0, ?, ?) RETURNING *",
        )
        .bind(&user.username)
        .bind(user.email.to_lowercase())
        .bind(&user.password_hash)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(&user.phone)
        .bind(&user.address)
        .bind(&user.hear_about_us)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| unique_violation(e, "Email or username already exists"))
    }

    pub async fn find_user(&self, id: i64) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    pub async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = ?")
            .bind(email.trim().to_lowercase())
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    /// Looks a user up by email or username, as the login form allows either.
    pub async fn find_user_by_identifier(&self, identifier: &str) -> Result<Option<User>, StoreError> {
        let identifier = identifier.trim();
        let user = sqlx::query_as::<_, User>(
            "SELECT * FROM users WHERE email = ? OR username = ? ORDER BY id LIMIT 1",
        )
        .bind(identifier.to_lowercase())
        .bind(identifier)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    pub async fn find_user_by_reset_token(&self, token: &str) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE reset_password_token = ?")
            .bind(token)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    pub async fn set_reset_token(
        &self,
        user_id: i64,
        token: &str,
        sent_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE users SET reset_password_token = ?, reset_password_sent_at = ?, updated_at = ? \
             WHERE id = ?",
        )
        .bind(token)
        .bind(sent_at)
        .bind(Utc::now())
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Stores a new password hash and clears any outstanding reset token.
    pub async fn set_password(&self, user_id: i64, password_hash: &str) -> Result<User, StoreError> {
        let user = sqlx::query_as::<_, User>(
            "UPDATE users SET password_hash = ?, reset_password_token = NULL, \
             reset_password_sent_at = NULL, updated_at = ? WHERE id = ? RETURNING *",
        )
        .bind(password_hash)
        .bind(Utc::now())
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(user)
    }

    pub async fn update_profile(&self, user_id: i64, profile: &ProfileUpdate) -> Result<User, StoreError> {
        let user = sqlx::query_as::<_, User>(
            "UPDATE users SET first_name = COALESCE(?, first_name), \
             last_name = COALESCE(?, last_name), phone = COALESCE(?, phone), \
             address = COALESCE(?, address), hear_about_us = COALESCE(?, hear_about_us), \
             updated_at = ? WHERE id = ? RETURNING *",
        )
        .bind(&profile.first_name)
        .bind(&profile.last_name)
        .bind(&profile.phone)
        .bind(&profile.address)
        .bind(&profile.hear_about_us)
        .bind(Utc::now())
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(user)
    }

    pub async fn set_user_blocked(&self, user_id: i64, blocked: bool) -> Result<(), StoreError> {
        sqlx::query("UPDATE users SET blocked = ?, updated_at = ? WHERE id = ?")
            .bind(blocked)
            .bind(Utc::now())
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ---- bookings ----

    pub async fn get_booking(&self, id: i64) -> Result<Option<Booking>, StoreError> {
        let booking = sqlx::query_as::<_, Booking>("SELECT * FROM bookings WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(booking)
    }

    pub async fn get_booking_details(&self, id: i64) -> Result<Option<BookingDetails>, StoreError> {
        let row = sqlx::query_as::<_, BookingRow>(&format!("{BOOKING_DETAILS_SELECT} WHERE b.id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(BookingDetails::from))
    }

    pub async fn list_bookings(&self) -> Result<Vec<BookingDetails>, StoreError> {
        let rows = sqlx::query_as::<_, BookingRow>(&format!(
            "{BOOKING_DETAILS_SELECT} ORDER BY b.booking_date DESC, b.id DESC"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(BookingDetails::from).collect())
    }

    pub async fn list_bookings_for_user(&self, user_id: i64) -> Result<Vec<BookingDetails>, StoreError> {
        let rows = sqlx::query_as::<_, BookingRow>(&format!(
            "{BOOKING_DETAILS_SELECT} WHERE b.user_id = ? ORDER BY b.booking_date DESC, b.id DESC"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(BookingDetails::from).collect())
    }

    pub async fn count_bookings_for_session(&self, session_id: &str) -> Result<i64, StoreError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM bookings WHERE stripe_session_id = ?")
                .bind(session_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    pub async fn create_booking(&self, input: &BookingInput) -> Result<Booking, StoreError> {
        let mut tx = self.begin_write().await?;
        let now = Utc::now();
        let booking = sqlx::query_as::<_, Booking>(
            "INSERT INTO bookings (class_occurrence_id, user_id, status, stripe_session_id, \
             stripe_payment_id, booking_date, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?) RETURNING *",
        )
        .bind(input.class_occurrence_id)
        .bind(input.user_id)
        .bind(input.status)
        .bind(&input.stripe_session_id)
        .bind(&input.stripe_payment_id)
        .bind(now)
        .bind(now)
        .bind(now)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| unique_violation(e, "A booking for this checkout session already exists"))?;

        if booking.status == BookingStatus::Confirmed {
            adjust_booked_count(&mut *tx, booking.class_occurrence_id, 1).await?;
        }
        tx.commit().await?;
        Ok(booking)
    }

    /// Inserts a confirmed booking for a checkout session and bumps the class
    /// counter in one transaction. Returns `None` when the session already has
    /// a booking.
    pub async fn create_booking_for_checkout(
        &self,
        checkout: &CheckoutBooking,
    ) -> Result<Option<Booking>, StoreError> {
        let mut tx = self.begin_write().await?;
        let now = Utc::now();
        let inserted = sqlx::query_as::<_, Booking>(
            "INSERT INTO bookings (class_occurrence_id, user_id, status, stripe_session_id, \
             stripe_payment_id, booking_date, created_at, updated_at) \
             VALUES (?, ?, 'confirmed', ?, ?, ?, ?, ?) \
             ON CONFLICT (stripe_session_id) DO NOTHING RETURNING *",
        )
        .bind(checkout.class_occurrence_id)
        .bind(checkout.user_id)
        .bind(&checkout.stripe_session_id)
        .bind(&checkout.stripe_payment_id)
        .bind(now)
        .bind(now)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(booking) = inserted else {
            tx.rollback().await?;
            return Ok(None);
        };

        adjust_booked_count(&mut *tx, booking.class_occurrence_id, 1).await?;
        tx.commit().await?;
        Ok(Some(booking))
    }

    /// Moves a booking to `status`, applying the matching counter change in the
    /// same transaction. Returns `None` when the booking does not exist.
    pub async fn set_booking_status(
        &self,
        id: i64,
        status: BookingStatus,
        stripe_payment_id: Option<&str>,
    ) -> Result<Option<Booking>, StoreError> {
        let mut tx = self.begin_write().await?;

        let current = sqlx::query_as::<_, Booking>("SELECT * FROM bookings WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;
        let Some(current) = current else {
            tx.rollback().await?;
            return Ok(None);
        };

        // compare-and-set on the status we read
        let updated = sqlx::query_as::<_, Booking>(
            "UPDATE bookings SET status = ?, stripe_payment_id = COALESCE(?, stripe_payment_id), \
             updated_at = ? WHERE id = ? AND status = ? RETURNING *",
        )
        .bind(status)
        .bind(stripe_payment_id)
        .bind(Utc::now())
        .bind(id)
        .bind(current.status)
        .fetch_optional(&mut *tx)
        .await?;
        let Some(updated) = updated else {
            tx.rollback().await?;
            return Err(StoreError::Conflict(format!(
                "Booking {id} changed while updating its status"
            )));
        };

        let delta = current.status.capacity_delta(status);
        adjust_booked_count(&mut *tx, current.class_occurrence_id, delta).await?;
        tx.commit().await?;

        debug!(booking_id = id, from = %current.status, to = %status, delta, "booking status updated");
        Ok(Some(updated))
    }

    pub async fn delete_booking(&self, id: i64) -> Result<bool, StoreError> {
        let mut tx = self.begin_write().await?;
        let deleted = sqlx::query_as::<_, Booking>("DELETE FROM bookings WHERE id = ? RETURNING *")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;
        let Some(deleted) = deleted else {
            tx.rollback().await?;
            return Ok(false);
        };
        if deleted.status == BookingStatus::Confirmed {
            adjust_booked_count(&mut *tx, deleted.class_occurrence_id, -1).await?;
        }
        tx.commit().await?;
        Ok(true)
    }
}

/// Single-statement counter change; never drops below zero.
async fn adjust_booked_count(
    conn: &mut SqliteConnection,
    class_id: i64,
    delta: i64,
) -> Result<(), StoreError> {
    if delta == 0 {
        return Ok(());
    }
    sqlx::query(
        "UPDATE class_occurrences SET booked_count = MAX(booked_count + ?, 0), updated_at = ? \
         WHERE id = ?",
    )
    .bind(delta)
    .bind(Utc::now())
    .bind(class_id)
    .execute(conn)
    .await?;
    Ok(())
}
