use axum::{extract::State, Json};
use chrono::Utc;
use diesel::{dsl::count_star, prelude::*, PgConnection};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::{
    auth::AuthenticatedUser,
    error::{AppError, AppResult},
    models::User,
    schema::{case_participants, cases, users},
    state::AppState,
    utils::json::{optional_text_field, required_text_field},
    utils::limits::{
        check_length, BAR_NUMBER_MAX, NAME_MAX, ORGANIZATION_MAX, PHONE_NUMBER_MAX, TITLE_MAX,
    },
};

use super::documents::to_iso;

#[derive(Debug, AsChangeset, Default)]
#[diesel(table_name = users)]
struct ProfileChangeset {
    full_name: Option<String>,
    title: Option<Option<String>>,
    phone_number: Option<Option<String>>,
    bar_number: Option<Option<String>>,
    organization: Option<Option<String>>,
    preferences: Option<Value>,
}

impl ProfileChangeset {
    fn is_empty(&self) -> bool {
        self.full_name.is_none()
            && self.title.is_none()
            && self.phone_number.is_none()
            && self.bar_number.is_none()
            && self.organization.is_none()
            && self.preferences.is_none()
    }
}

#[derive(Serialize)]
pub struct ProfileResponse {
    pub id: Uuid,
    pub email: String,
    pub full_name: String,
    pub title: Option<String>,
    pub phone_number: Option<String>,
    pub bar_number: Option<String>,
    pub organization: Option<String>,
    pub preferences: Value,
    pub role: String,
    pub last_login: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub case_count: i64,
    pub participation_count: i64,
}

pub async fn get_profile(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<ProfileResponse>> {
    let mut conn = state.db()?;
    Ok(Json(load_profile(&mut conn, user.user_id)?))
}

pub async fn update_profile(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(body): Json<Value>,
) -> AppResult<Json<ProfileResponse>> {
    let changeset = parse_profile_changes(&body)?;

    let mut conn = state.db()?;
    if !changeset.is_empty() {
        let now = Utc::now().naive_utc();
        let updated = diesel::update(users::table.find(user.user_id))
            .set((&changeset, users::updated_at.eq(now)))
            .execute(&mut conn)?;
        if updated == 0 {
            return Err(AppError::not_found_with("User not found"));
        }
    }

    Ok(Json(load_profile(&mut conn, user.user_id)?))
}

fn parse_profile_changes(body: &Value) -> AppResult<ProfileChangeset> {
    if !body.is_object() {
        return Err(AppError::bad_request("expected a JSON object"));
    }

    let mut changeset = ProfileChangeset {
        full_name: required_text_field(body, "full_name").map_err(AppError::bad_request)?,
        title: optional_text_field(body, "title").map_err(AppError::bad_request)?,
        phone_number: optional_text_field(body, "phone_number").map_err(AppError::bad_request)?,
        bar_number: optional_text_field(body, "bar_number").map_err(AppError::bad_request)?,
        organization: optional_text_field(body, "organization").map_err(AppError::bad_request)?,
        preferences: None,
    };

    if changeset
        .full_name
        .as_deref()
        .is_some_and(|name| name.chars().count() < 2)
    {
        return Err(AppError::bad_request(
            "full_name must be at least 2 characters long",
        ));
    }

    let mut errors = Vec::new();
    check_length("full_name", changeset.full_name.as_deref(), NAME_MAX, &mut errors);
    for (label, value, max) in [
        ("title", &changeset.title, TITLE_MAX),
        ("phone_number", &changeset.phone_number, PHONE_NUMBER_MAX),
        ("bar_number", &changeset.bar_number, BAR_NUMBER_MAX),
        ("organization", &changeset.organization, ORGANIZATION_MAX),
    ] {
        check_length(label, value.as_ref().and_then(Option::as_deref), max, &mut errors);
    }
    if !errors.is_empty() {
        return Err(AppError::validation(errors));
    }

    match body.get("preferences") {
        None => {}
        Some(Value::Null) => changeset.preferences = Some(Value::Object(Default::default())),
        Some(value @ Value::Object(_)) => changeset.preferences = Some(value.clone()),
        Some(_) => return Err(AppError::bad_request("preferences must be an object")),
    }

    Ok(changeset)
}

fn load_profile(conn: &mut PgConnection, user_id: Uuid) -> AppResult<ProfileResponse> {
    let user: User = users::table
        .find(user_id)
        .first(conn)
        .optional()?
        .ok_or_else(|| AppError::not_found_with("User not found"))?;

    let case_count: i64 = cases::table
        .filter(cases::user_id.eq(user_id))
        .select(count_star())
        .first(conn)?;
    let participation_count: i64 = case_participants::table
        .filter(case_participants::user_id.eq(user_id))
        .select(count_star())
        .first(conn)?;

    Ok(ProfileResponse {
        id: user.id,
        email: user.email,
        full_name: user.full_name,
        title: user.title,
        phone_number: user.phone_number,
        bar_number: user.bar_number,
        organization: user.organization,
        preferences: user.preferences,
        role: user.role,
        last_login: user.last_login.map(to_iso),
        created_at: to_iso(user.created_at),
        updated_at: to_iso(user.updated_at),
        case_count,
        participation_count,
    })
}
