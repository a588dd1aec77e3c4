use axum::{extract::State, http::StatusCode, Json};
use chrono::Utc;
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel::PgConnection;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    auth::{password, validation, AuthenticatedUser},
    error::{AppError, AppResult},
    models::{NewRefreshToken, NewUser, RefreshToken, User, UserRole},
    schema::{refresh_tokens, users},
    state::AppState,
};

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub email: Option<String>,
    pub password: Option<String>,
    pub name: Option<String>,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: Option<String>,
    pub password: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    pub refresh_token: Option<String>,
}

#[derive(Serialize)]
pub struct UserSummary {
    pub id: Uuid,
    pub email: String,
    pub name: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

#[derive(Serialize)]
pub struct AuthResponse {
    pub user: UserSummary,
    pub tokens: TokenPair,
}

#[derive(Serialize)]
pub struct RefreshResponse {
    pub tokens: TokenPair,
}

impl From<&User> for UserSummary {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            email: user.email.clone(),
            name: user.full_name.clone(),
        }
    }
}

pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> AppResult<(StatusCode, Json<AuthResponse>)> {
    let errors = validation::validate_registration(
        payload.email.as_deref(),
        payload.password.as_deref(),
        payload.name.as_deref(),
    );
    if !errors.is_empty() {
        return Err(AppError::validation(errors));
    }

    let email = normalize_email(payload.email.as_deref().unwrap_or_default());
    let name = payload.name.as_deref().unwrap_or_default().trim().to_string();
    let plain = payload.password.unwrap_or_default();

    let mut conn = state.db()?;

    let existing = users::table
        .filter(users::email.eq(&email))
        .select(users::id)
        .first::<Uuid>(&mut conn)
        .optional()?;
    if existing.is_some() {
        return Err(AppError::conflict("User already exists"));
    }

    let new_user = NewUser {
        id: Uuid::new_v4(),
        email,
        password_hash: password::hash_password(&plain)?,
        full_name: name,
        preferences: serde_json::json!({}),
        role: UserRole::Client.as_str().to_string(),
    };

    match diesel::insert_into(users::table)
        .values(&new_user)
        .execute(&mut conn)
    {
        Ok(_) => {}
        Err(DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _)) => {
            return Err(AppError::conflict("User already exists"));
        }
        Err(err) => return Err(AppError::from(err)),
    }

    let user: User = users::table.find(new_user.id).first(&mut conn)?;
    let tokens = issue_tokens(&state, &mut conn, user.id)?;

    info!(user_id = %user.id, "user registered");

    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            user: UserSummary::from(&user),
            tokens,
        }),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> AppResult<Json<AuthResponse>> {
    let errors = validation::validate_login(payload.email.as_deref(), payload.password.as_deref());
    if !errors.is_empty() {
        return Err(AppError::validation(errors));
    }

    let email = normalize_email(payload.email.as_deref().unwrap_or_default());
    let mut conn = state.db()?;

    let user: User = users::table
        .filter(users::email.eq(&email))
        .first(&mut conn)
        .optional()?
        .ok_or_else(AppError::invalid_credentials)?;

    let valid = password::verify_password(
        payload.password.as_deref().unwrap_or_default(),
        &user.password_hash,
    )
    .map_err(|_| AppError::invalid_credentials())?;

    if !valid {
        return Err(AppError::invalid_credentials());
    }

    let now = Utc::now().naive_utc();
    diesel::update(users::table.find(user.id))
        .set(users::last_login.eq(Some(now)))
        .execute(&mut conn)?;

    let tokens = issue_tokens(&state, &mut conn, user.id)?;

    Ok(Json(AuthResponse {
        user: UserSummary::from(&user),
        tokens,
    }))
}

pub async fn refresh_token(
    State(state): State<AppState>,
    Json(payload): Json<RefreshRequest>,
) -> AppResult<Json<RefreshResponse>> {
    let presented = payload
        .refresh_token
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| AppError::bad_request("Refresh token is required"))?;

    let claims = state
        .jwt
        .verify_refresh_token(presented.trim())
        .map_err(|_| invalid_refresh_token())?;

    let hashed = hash_refresh_token(presented.trim());
    let mut conn = state.db()?;
    let now = Utc::now().naive_utc();

    let record = refresh_tokens::table
        .filter(refresh_tokens::token_hash.eq(&hashed))
        .filter(refresh_tokens::revoked_at.is_null())
        .filter(refresh_tokens::expires_at.gt(now))
        .first::<RefreshToken>(&mut conn)
        .optional()?;

    let record = match record {
        Some(record) if record.user_id == claims.user_id => record,
        _ => {
            warn!(user_id = %claims.user_id, "refresh token rejected: unknown or revoked");
            return Err(invalid_refresh_token());
        }
    };

    diesel::update(refresh_tokens::table.find(record.id))
        .set((
            refresh_tokens::revoked_at.eq(Some(now)),
            refresh_tokens::updated_at.eq(now),
        ))
        .execute(&mut conn)?;

    let user_exists: bool = diesel::select(diesel::dsl::exists(
        users::table.filter(users::id.eq(record.user_id)),
    ))
    .get_result(&mut conn)?;
    if !user_exists {
        return Err(invalid_refresh_token());
    }

    let tokens = issue_tokens(&state, &mut conn, record.user_id)?;
    Ok(Json(RefreshResponse { tokens }))
}

pub async fn logout(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    payload: Option<Json<RefreshRequest>>,
) -> AppResult<StatusCode> {
    let mut conn = state.db()?;
    let now = Utc::now().naive_utc();
    let mut rows_affected = 0;

    if let Some(value) = payload.and_then(|Json(body)| body.refresh_token) {
        let hashed = hash_refresh_token(value.trim());
        rows_affected = diesel::update(
            refresh_tokens::table
                .filter(refresh_tokens::token_hash.eq(hashed))
                .filter(refresh_tokens::user_id.eq(user.user_id))
                .filter(refresh_tokens::revoked_at.is_null()),
        )
        .set((
            refresh_tokens::revoked_at.eq(Some(now)),
            refresh_tokens::updated_at.eq(now),
        ))
        .execute(&mut conn)?;
    }

    if rows_affected == 0 {
        diesel::update(
            refresh_tokens::table
                .filter(refresh_tokens::user_id.eq(user.user_id))
                .filter(refresh_tokens::revoked_at.is_null()),
        )
        .set((
            refresh_tokens::revoked_at.eq(Some(now)),
            refresh_tokens::updated_at.eq(now),
        ))
        .execute(&mut conn)?;
    }

    Ok(StatusCode::NO_CONTENT)
}

/// Mints an access/refresh pair and records the refresh token's digest.
fn issue_tokens(
    state: &AppState,
    conn: &mut PgConnection,
    user_id: Uuid,
) -> AppResult<TokenPair> {
    let access_token = state.jwt.generate_access_token(user_id)?;
    let refresh_token = state.jwt.generate_refresh_token(user_id)?;

    let now = Utc::now();
    let record = NewRefreshToken {
        id: Uuid::new_v4(),
        user_id,
        token_hash: hash_refresh_token(&refresh_token),
        issued_at: now.naive_utc(),
        expires_at: (now + state.jwt.refresh_expiry()).naive_utc(),
    };

    diesel::insert_into(refresh_tokens::table)
        .values(&record)
        .execute(conn)?;

    Ok(TokenPair {
        access_token,
        refresh_token,
        token_type: "Bearer".to_string(),
        expires_in: state.jwt.access_expiry_seconds(),
    })
}

fn invalid_refresh_token() -> AppError {
    AppError::new(StatusCode::UNAUTHORIZED, "Invalid refresh token")
}

fn normalize_email(raw: &str) -> String {
    raw.trim().to_lowercase()
}

fn hash_refresh_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}
