use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::ApiError;
use crate::models::ClassInput;

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("regex compiles"));
static SLUG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9]+(?:-[a-z0-9]+)*$").expect("regex compiles"));
static NON_SLUG_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^a-z0-9]+").expect("regex compiles"));

pub const MIN_PASSWORD_LEN: usize = 6;

pub fn validate_email(value: &str) -> Result<String, ApiError> {
    let email = value.trim().to_lowercase();
    if EMAIL_RE.is_match(&email) {
        Ok(email)
    } else {
        Err(ApiError::BadRequest("email must be a valid email".into()))
    }
}

pub fn validate_password(value: &str) -> Result<(), ApiError> {
    if value.chars().count() >= MIN_PASSWORD_LEN {
        Ok(())
    } else {
        Err(ApiError::BadRequest(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )))
    }
}

pub fn slugify(title: &str) -> String {
    let lower = title.to_lowercase();
    NON_SLUG_CHARS
        .replace_all(&lower, "-")
        .trim_matches('-')
        .to_string()
}

/// Checks a class payload and returns the slug it should be stored under.
pub fn validate_class(input: &ClassInput) -> Result<String, ApiError> {
    if input.title.trim().is_empty() {
        return Err(ApiError::BadRequest("title is required".into()));
    }
    if input.end_time <= input.start_time {
        return Err(ApiError::BadRequest("endTime must be after startTime".into()));
    }
    if input.price < 0 {
        return Err(ApiError::BadRequest("price cannot be negative".into()));
    }
    if input.max_capacity < 0 {
        return Err(ApiError::BadRequest("maxCapacity cannot be negative".into()));
    }

    let slug = match input.slug.as_deref().map(str::trim) {
        Some(slug) if !slug.is_empty() => slug.to_string(),
        _ => {
            let slug = slugify(&input.title);
            if slug.is_empty() {
                return Err(ApiError::BadRequest(
                    "title needs a letter or digit to build a slug from; provide a slug".into(),
                ));
            }
            slug
        }
    };
    if !SLUG_RE.is_match(&slug) {
        return Err(ApiError::BadRequest(
            "slug may only contain lowercase letters, digits and dashes".into(),
        ));
    }
    Ok(slug)
}

pub fn validate_date_range(start: Option<NaiveDate>, end: Option<NaiveDate>) -> Result<(), ApiError> {
    match (start, end) {
        (Some(start), Some(end)) if start > end => Err(ApiError::BadRequest(
            "startDate must not be after endDate".into(),
        )),
        _ => Ok(()),
    }
}

/// Treats a missing, empty or whitespace-only field as absent.
pub fn required(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
