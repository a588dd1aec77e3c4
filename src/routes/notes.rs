use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use diesel::{prelude::*, PgConnection};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    access::{authorize_case, AuthorizedCase},
    auth::AuthenticatedUser,
    error::{AppError, AppResult},
    models::{CaseNote, NewCaseNote, User},
    schema::{case_notes, users},
    state::AppState,
};

use super::documents::{to_iso, UserRef};

#[derive(Deserialize)]
pub struct CreateNoteRequest {
    pub content: Option<String>,
    #[serde(default)]
    pub is_private: bool,
}

#[derive(Deserialize)]
pub struct UpdateNoteRequest {
    pub content: Option<String>,
    pub is_private: Option<bool>,
}

#[derive(AsChangeset, Default)]
#[diesel(table_name = case_notes)]
struct NoteChangeset {
    content: Option<String>,
    is_private: Option<bool>,
}

#[derive(Serialize)]
pub struct NoteResponse {
    pub id: Uuid,
    pub case_id: Uuid,
    pub user_id: Uuid,
    pub content: String,
    pub is_private: bool,
    pub created_at: String,
    pub updated_at: String,
    pub author: UserRef,
}

pub async fn list_notes(
    State(state): State<AppState>,
    Path(case_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<Json<Vec<NoteResponse>>> {
    let mut conn = state.db()?;
    let authorized = authorize_case(&mut conn, case_id, user.user_id)?;
    Ok(Json(load_visible_notes(&mut conn, &authorized)?))
}

pub async fn create_note(
    State(state): State<AppState>,
    Path(case_id): Path<Uuid>,
    user: AuthenticatedUser,
    Json(payload): Json<CreateNoteRequest>,
) -> AppResult<(StatusCode, Json<NoteResponse>)> {
    let mut conn = state.db()?;
    authorize_case(&mut conn, case_id, user.user_id)?;

    let content = payload
        .content
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| AppError::validation(vec!["Content is required".to_string()]))?;

    let new_note = NewCaseNote {
        id: Uuid::new_v4(),
        case_id,
        user_id: user.user_id,
        content: content.to_string(),
        is_private: payload.is_private,
    };
    diesel::insert_into(case_notes::table)
        .values(&new_note)
        .execute(&mut conn)?;

    let note = load_note_with_author(&mut conn, new_note.id)?;
    Ok((StatusCode::CREATED, Json(note)))
}

pub async fn update_note(
    State(state): State<AppState>,
    Path((case_id, note_id)): Path<(Uuid, Uuid)>,
    user: AuthenticatedUser,
    Json(payload): Json<UpdateNoteRequest>,
) -> AppResult<Json<NoteResponse>> {
    let mut conn = state.db()?;
    let authorized = authorize_case(&mut conn, case_id, user.user_id)?;
    let note = load_note(&mut conn, &authorized, note_id)?;
    authorized.require_creator(note.user_id, "Only the note creator can update")?;

    let mut changeset = NoteChangeset {
        is_private: payload.is_private,
        ..NoteChangeset::default()
    };
    if let Some(content) = payload.content {
        let trimmed = content.trim();
        if trimmed.is_empty() {
            return Err(AppError::bad_request("content must not be empty"));
        }
        changeset.content = Some(trimmed.to_string());
    }

    if changeset.content.is_none() && changeset.is_private.is_none() {
        return Err(AppError::bad_request("no changes provided"));
    }

    let now = Utc::now().naive_utc();
    diesel::update(case_notes::table.find(note.id))
        .set((&changeset, case_notes::updated_at.eq(now)))
        .execute(&mut conn)?;

    Ok(Json(load_note_with_author(&mut conn, note.id)?))
}

pub async fn delete_note(
    State(state): State<AppState>,
    Path((case_id, note_id)): Path<(Uuid, Uuid)>,
    user: AuthenticatedUser,
) -> AppResult<impl IntoResponse> {
    let mut conn = state.db()?;
    let authorized = authorize_case(&mut conn, case_id, user.user_id)?;
    let note = load_note(&mut conn, &authorized, note_id)?;
    authorized.require_modify(note.user_id, "Only the note author or case owner can delete")?;

    diesel::delete(case_notes::table.find(note.id)).execute(&mut conn)?;
    Ok(StatusCode::NO_CONTENT)
}

/// Notes of the case the requester may see, newest first.
pub(crate) fn load_visible_notes(
    conn: &mut PgConnection,
    authorized: &AuthorizedCase,
) -> AppResult<Vec<NoteResponse>> {
    let rows: Vec<(CaseNote, User)> = case_notes::table
        .inner_join(users::table)
        .filter(case_notes::case_id.eq(authorized.case.id))
        .order(case_notes::created_at.desc())
        .select((case_notes::all_columns, users::all_columns))
        .load(conn)?;

    Ok(rows
        .into_iter()
        .filter(|(note, _)| {
            authorized
                .access
                .can_view_note(authorized.requester, note.user_id, note.is_private)
        })
        .map(|(note, author)| to_note_response(note, author))
        .collect())
}

/// A private note that the requester cannot see is reported as missing.
fn load_note(
    conn: &mut PgConnection,
    authorized: &AuthorizedCase,
    note_id: Uuid,
) -> AppResult<CaseNote> {
    case_notes::table
        .filter(case_notes::id.eq(note_id))
        .filter(case_notes::case_id.eq(authorized.case.id))
        .first::<CaseNote>(conn)
        .optional()?
        .filter(|note| {
            authorized
                .access
                .can_view_note(authorized.requester, note.user_id, note.is_private)
        })
        .ok_or_else(|| AppError::not_found_with("Note not found"))
}

fn load_note_with_author(conn: &mut PgConnection, note_id: Uuid) -> AppResult<NoteResponse> {
    let (note, author): (CaseNote, User) = case_notes::table
        .inner_join(users::table)
        .filter(case_notes::id.eq(note_id))
        .select((case_notes::all_columns, users::all_columns))
        .first(conn)?;
    Ok(to_note_response(note, author))
}

fn to_note_response(note: CaseNote, author: User) -> NoteResponse {
    NoteResponse {
        id: note.id,
        case_id: note.case_id,
        user_id: note.user_id,
        content: note.content,
        is_private: note.is_private,
        created_at: to_iso(note.created_at),
        updated_at: to_iso(note.updated_at),
        author: UserRef {
            id: author.id,
            email: author.email,
            full_name: author.full_name,
        },
    }
}
