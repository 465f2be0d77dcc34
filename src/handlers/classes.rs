use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use tracing::info;

use crate::{
    AppState,
    auth::AdminAccess,
    error::ApiError,
    models::{ClassInput, ClassOccurrence},
    store::ClassFilter,
    validation::{validate_class, validate_date_range},
};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassQuery {
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub is_active: Option<bool>,
    #[serde(default)]
    pub upcoming: bool,
}

fn class_not_found() -> ApiError {
    ApiError::NotFound("Class not found".into())
}

fn studio_today(state: &AppState) -> NaiveDate {
    Utc::now().with_timezone(&state.settings.tz()).date_naive()
}

#[utoipa::path(
    get,
    path = "/class-occurrences",
    params(
        ("startDate" = Option<String>, Query, description = "First date to include (YYYY-MM-DD)"),
        ("endDate" = Option<String>, Query, description = "Last date to include (YYYY-MM-DD)"),
        ("isActive" = Option<bool>, Query, description = "Only classes with this active flag"),
        ("upcoming" = Option<bool>, Query, description = "Only classes from today onwards")
    ),
    responses(
        (status = 200, description = "Classes ordered by date and start time", body = [ClassOccurrence]),
        (status = 400, description = "Invalid date range")
    ),
    tag = "classes"
)]
pub async fn list_classes(
    State(state): State<AppState>,
    Query(query): Query<ClassQuery>,
) -> Result<Json<Vec<ClassOccurrence>>, ApiError> {
    validate_date_range(query.start_date, query.end_date)?;

    let filter = ClassFilter {
        start_date: query.start_date,
        end_date: query.end_date,
        is_active: query.is_active,
        not_before: query.upcoming.then(|| studio_today(&state)),
    };
    Ok(Json(state.db.list_classes(&filter).await?))
}

#[utoipa::path(
    get,
    path = "/class-occurrences/{id}",
    params(("id" = i64, Path, description = "Class occurrence id")),
    responses(
        (status = 200, description = "Class occurrence", body = ClassOccurrence),
        (status = 404, description = "Class not found")
    ),
    tag = "classes"
)]
pub async fn get_class(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ClassOccurrence>, ApiError> {
    let class = state.db.get_class(id).await?.ok_or_else(class_not_found)?;
    Ok(Json(class))
}

#[utoipa::path(
    get,
    path = "/class-occurrences/slug/{slug}",
    params(("slug" = String, Path, description = "Class occurrence slug")),
    responses(
        (status = 200, description = "Class occurrence", body = ClassOccurrence),
        (status = 404, description = "Class not found")
    ),
    tag = "classes"
)]
pub async fn get_class_by_slug(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> Result<Json<ClassOccurrence>, ApiError> {
    let class = state
        .db
        .get_class_by_slug(&slug)
        .await?
        .ok_or_else(class_not_found)?;
    Ok(Json(class))
}

#[utoipa::path(
    get,
    path = "/class-occurrences.ics",
    responses(
        (status = 200, description = "iCal file with upcoming active classes", content_type = "text/calendar")
    ),
    tag = "classes"
)]
pub async fn get_ical(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let filter = ClassFilter {
        is_active: Some(true),
        not_before: Some(studio_today(&state)),
        ..ClassFilter::default()
    };
    let classes = state.db.list_classes(&filter).await?;

    let body = state
        .exporter
        .generate(&classes, &state.settings.studio_name, state.settings.tz());
    Ok((
        StatusCode::OK,
        [
            ("content-type", "text/calendar; charset=utf-8"),
            ("content-disposition", "attachment; filename=classes.ics"),
        ],
        body,
    ))
}

#[utoipa::path(
    post,
    path = "/class-occurrences",
    request_body = ClassInput,
    responses(
        (status = 201, description = "Class created", body = ClassOccurrence),
        (status = 400, description = "Invalid class"),
        (status = 401, description = "Invalid authentication token"),
        (status = 409, description = "Slug already in use")
    ),
    security(("bearer_auth" = []), ("query_token" = [])),
    tag = "classes"
)]
pub async fn create_class(
    _admin: AdminAccess,
    State(state): State<AppState>,
    Json(input): Json<ClassInput>,
) -> Result<impl IntoResponse, ApiError> {
    let slug = validate_class(&input)?;
    let class = state.db.create_class(&input, &slug).await?;
    info!(class_id = class.id, slug = %class.slug, "Class created");
    Ok((StatusCode::CREATED, Json(class)))
}

#[utoipa::path(
    put,
    path = "/class-occurrences/{id}",
    params(("id" = i64, Path, description = "Class occurrence id")),
    request_body = ClassInput,
    responses(
        (status = 200, description = "Class updated", body = ClassOccurrence),
        (status = 400, description = "Invalid class"),
        (status = 401, description = "Invalid authentication token"),
        (status = 404, description = "Class not found"),
        (status = 409, description = "Slug already in use")
    ),
    security(("bearer_auth" = []), ("query_token" = [])),
    tag = "classes"
)]
pub async fn update_class(
    _admin: AdminAccess,
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(input): Json<ClassInput>,
) -> Result<Json<ClassOccurrence>, ApiError> {
    let slug = validate_class(&input)?;
    let class = state
        .db
        .update_class(id, &input, &slug)
        .await?
        .ok_or_else(class_not_found)?;
    info!(class_id = id, "Class updated");
    Ok(Json(class))
}

#[utoipa::path(
    delete,
    path = "/class-occurrences/{id}",
    params(("id" = i64, Path, description = "Class occurrence id")),
    responses(
        (status = 204, description = "Class deleted"),
        (status = 401, description = "Invalid authentication token"),
        (status = 404, description = "Class not found")
    ),
    security(("bearer_auth" = []), ("query_token" = [])),
    tag = "classes"
)]
pub async fn delete_class(
    _admin: AdminAccess,
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    if !state.db.delete_class(id).await? {
        return Err(class_not_found());
    }
    info!(class_id = id, "Class deleted");
    Ok(StatusCode::NO_CONTENT)
}
