use std::collections::HashMap;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use diesel::{dsl::count_star, prelude::*, PgConnection};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use crate::{
    access::{authorize_case, CaseAccess},
    auth::AuthenticatedUser,
    error::{AppError, AppResult},
    models::{Case, CaseStatus, NewCase},
    schema::{case_participants, cases, document_versions, documents},
    state::AppState,
    utils::json::{optional_text_field, required_text_field},
    utils::limits::{check_length, CASE_NUMBER_MAX, TITLE_MAX},
};

use super::documents::{
    discard_blob, load_case_documents, to_document_response, to_iso, DocumentResponse,
};
use super::notes::{load_visible_notes, NoteResponse};
use super::participants::{load_participants, ParticipantResponse};

#[derive(Deserialize, Default)]
pub struct ListCasesQuery {
    #[serde(default)]
    pub include_shared: bool,
}

#[derive(Deserialize)]
pub struct CreateCaseRequest {
    pub title: Option<String>,
    pub case_number: Option<String>,
    pub description: Option<String>,
}

#[derive(AsChangeset, Default)]
#[diesel(table_name = cases)]
struct CaseChangeset {
    title: Option<String>,
    case_number: Option<Option<String>>,
    description: Option<Option<String>>,
    status: Option<String>,
}

#[derive(Serialize)]
pub struct CaseResponse {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub case_number: Option<String>,
    pub description: Option<String>,
    pub status: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Serialize)]
pub struct CaseSummary {
    #[serde(flatten)]
    pub case: CaseResponse,
    pub access: CaseAccess,
    pub document_count: i64,
    pub participant_count: i64,
}

#[derive(Serialize)]
pub struct CaseDetail {
    #[serde(flatten)]
    pub case: CaseResponse,
    pub access: CaseAccess,
    pub documents: Vec<DocumentResponse>,
    pub participants: Vec<ParticipantResponse>,
    pub notes: Vec<NoteResponse>,
}

pub async fn list_cases(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(query): Query<ListCasesQuery>,
) -> AppResult<Json<Vec<CaseSummary>>> {
    let mut conn = state.db()?;

    let mut rows: Vec<Case> = cases::table
        .filter(cases::user_id.eq(user.user_id))
        .order(cases::created_at.desc())
        .load(&mut conn)?;

    let mut roles: HashMap<Uuid, String> = HashMap::new();
    if query.include_shared {
        let shared: Vec<(Case, String)> = cases::table
            .inner_join(case_participants::table)
            .filter(case_participants::user_id.eq(user.user_id))
            .filter(cases::user_id.ne(user.user_id))
            .order(cases::created_at.desc())
            .select((cases::all_columns, case_participants::role))
            .load(&mut conn)?;
        for (case, role) in shared {
            roles.insert(case.id, role);
            rows.push(case);
        }
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    }

    let case_ids: Vec<Uuid> = rows.iter().map(|case| case.id).collect();
    let document_counts = count_by_case(
        documents::table
            .filter(documents::case_id.eq_any(&case_ids))
            .group_by(documents::case_id)
            .select((documents::case_id, count_star()))
            .load(&mut conn)?,
    );
    let participant_counts = count_by_case(
        case_participants::table
            .filter(case_participants::case_id.eq_any(&case_ids))
            .group_by(case_participants::case_id)
            .select((case_participants::case_id, count_star()))
            .load(&mut conn)?,
    );

    let response = rows
        .into_iter()
        .map(|case| {
            let access = match roles.get(&case.id).and_then(|role| role.parse().ok()) {
                Some(role) => CaseAccess::Participant(role),
                None => CaseAccess::Owner,
            };
            CaseSummary {
                document_count: document_counts.get(&case.id).copied().unwrap_or(0),
                participant_count: participant_counts.get(&case.id).copied().unwrap_or(0),
                access,
                case: to_case_response(case),
            }
        })
        .collect();

    Ok(Json(response))
}

pub async fn create_case(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<CreateCaseRequest>,
) -> AppResult<(StatusCode, Json<CaseResponse>)> {
    let title = payload
        .title
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| AppError::validation(vec!["Title is required".to_string()]))?;
    let case_number = non_blank(payload.case_number);

    let mut errors = Vec::new();
    check_length("Title", Some(title), TITLE_MAX, &mut errors);
    check_length(
        "Case number",
        case_number.as_deref(),
        CASE_NUMBER_MAX,
        &mut errors,
    );
    if !errors.is_empty() {
        return Err(AppError::validation(errors));
    }

    let new_case = NewCase {
        id: Uuid::new_v4(),
        user_id: user.user_id,
        title: title.to_string(),
        case_number,
        description: non_blank(payload.description),
        status: CaseStatus::Active.as_str().to_string(),
    };

    let mut conn = state.db()?;
    diesel::insert_into(cases::table)
        .values(&new_case)
        .execute(&mut conn)?;
    let case: Case = cases::table.find(new_case.id).first(&mut conn)?;

    info!(case_id = %case.id, user_id = %user.user_id, "case created");
    Ok((StatusCode::CREATED, Json(to_case_response(case))))
}

pub async fn get_case(
    State(state): State<AppState>,
    Path(case_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<Json<CaseDetail>> {
    let mut conn = state.db()?;
    let authorized = authorize_case(&mut conn, case_id, user.user_id)?;

    let documents = load_case_documents(&mut conn, case_id)?
        .into_iter()
        .map(to_document_response)
        .collect();
    let participants = load_participants(&mut conn, case_id)?;
    let notes = load_visible_notes(&mut conn, &authorized)?;

    Ok(Json(CaseDetail {
        case: to_case_response(authorized.case),
        access: authorized.access,
        documents,
        participants,
        notes,
    }))
}

pub async fn update_case(
    State(state): State<AppState>,
    Path(case_id): Path<Uuid>,
    user: AuthenticatedUser,
    Json(body): Json<Value>,
) -> AppResult<Json<CaseResponse>> {
    let mut conn = state.db()?;
    let authorized = authorize_case(&mut conn, case_id, user.user_id)?;
    authorized.require_owner("Only the case owner can update the case")?;

    let mut changeset = CaseChangeset {
        title: required_text_field(&body, "title").map_err(AppError::bad_request)?,
        case_number: optional_text_field(&body, "case_number").map_err(AppError::bad_request)?,
        description: optional_text_field(&body, "description")
            .map_err(AppError::bad_request)?,
        status: None,
    };

    let mut errors = Vec::new();
    check_length("Title", changeset.title.as_deref(), TITLE_MAX, &mut errors);
    check_length(
        "Case number",
        changeset.case_number.as_ref().and_then(Option::as_deref),
        CASE_NUMBER_MAX,
        &mut errors,
    );
    if !errors.is_empty() {
        return Err(AppError::validation(errors));
    }

    if let Some(raw) = required_text_field(&body, "status").map_err(AppError::bad_request)? {
        let status = raw
            .parse::<CaseStatus>()
            .map_err(|err| AppError::bad_request(err.to_string()))?;
        changeset.status = Some(status.as_str().to_string());
    }

    if changeset.title.is_none()
        && changeset.case_number.is_none()
        && changeset.description.is_none()
        && changeset.status.is_none()
    {
        return Ok(Json(to_case_response(authorized.case)));
    }

    let now = Utc::now().naive_utc();
    diesel::update(cases::table.find(case_id))
        .set((&changeset, cases::updated_at.eq(now)))
        .execute(&mut conn)?;

    let updated: Case = cases::table.find(case_id).first(&mut conn)?;
    Ok(Json(to_case_response(updated)))
}

pub async fn delete_case(
    State(state): State<AppState>,
    Path(case_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<impl IntoResponse> {
    let keys = {
        let mut conn = state.db()?;
        let authorized = authorize_case(&mut conn, case_id, user.user_id)?;
        authorized.require_owner("Only the case owner can delete the case")?;
        let keys = collect_case_blob_keys(&mut conn, case_id)?;
        diesel::delete(cases::table.find(case_id)).execute(&mut conn)?;
        keys
    };

    for key in &keys {
        discard_blob(&state, key).await;
    }

    info!(case_id = %case_id, blobs = keys.len(), "case deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// Storage keys of every document and version in the case.
fn collect_case_blob_keys(conn: &mut PgConnection, case_id: Uuid) -> AppResult<Vec<String>> {
    let mut keys: Vec<String> = documents::table
        .filter(documents::case_id.eq(case_id))
        .select(documents::file_path)
        .load(conn)?;
    let version_keys: Vec<String> = document_versions::table
        .inner_join(documents::table)
        .filter(documents::case_id.eq(case_id))
        .select(document_versions::file_path)
        .load(conn)?;
    keys.extend(version_keys);
    Ok(keys)
}

fn count_by_case(rows: Vec<(Uuid, i64)>) -> HashMap<Uuid, i64> {
    rows.into_iter().collect()
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub(crate) fn to_case_response(case: Case) -> CaseResponse {
    CaseResponse {
        id: case.id,
        user_id: case.user_id,
        title: case.title,
        case_number: case.case_number,
        description: case.description,
        status: case.status,
        created_at: to_iso(case.created_at),
        updated_at: to_iso(case.updated_at),
    }
}
