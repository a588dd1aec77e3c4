use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use diesel::{prelude::*, result::DatabaseErrorKind, PgConnection};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::{
    access::authorize_case,
    auth::AuthenticatedUser,
    error::{AppError, AppResult},
    models::{NewParticipant, Participant, ParticipantRole, User},
    schema::{case_participants, users},
    state::AppState,
};

use super::documents::{to_iso, UserRef};

#[derive(Deserialize)]
pub struct AddParticipantRequest {
    pub email: Option<String>,
    pub role: Option<String>,
}

#[derive(Deserialize)]
pub struct UpdateParticipantRequest {
    pub role: Option<String>,
}

#[derive(Serialize)]
pub struct ParticipantResponse {
    pub id: Uuid,
    pub case_id: Uuid,
    pub user_id: Uuid,
    pub role: String,
    pub added_at: String,
    pub user: UserRef,
}

pub async fn list_participants(
    State(state): State<AppState>,
    Path(case_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<Json<Vec<ParticipantResponse>>> {
    let mut conn = state.db()?;
    authorize_case(&mut conn, case_id, user.user_id)?
        .require_owner("Only the case owner can view participants")?;

    Ok(Json(load_participants(&mut conn, case_id)?))
}

pub async fn add_participant(
    State(state): State<AppState>,
    Path(case_id): Path<Uuid>,
    user: AuthenticatedUser,
    Json(payload): Json<AddParticipantRequest>,
) -> AppResult<(StatusCode, Json<ParticipantResponse>)> {
    let mut conn = state.db()?;
    let authorized = authorize_case(&mut conn, case_id, user.user_id)?;
    authorized.require_owner("Only the case owner can add participants")?;

    let mut errors = Vec::new();
    let email = payload
        .email
        .as_deref()
        .map(|value| value.trim().to_lowercase())
        .filter(|value| !value.is_empty());
    if email.is_none() {
        errors.push("Email is required".to_string());
    }
    let role = match payload.role.as_deref() {
        Some(raw) => match raw.parse::<ParticipantRole>() {
            Ok(role) => Some(role),
            Err(err) => {
                errors.push(err.to_string());
                None
            }
        },
        None => {
            errors.push("Role is required".to_string());
            None
        }
    };
    let (Some(email), Some(role)) = (email, role) else {
        return Err(AppError::validation(errors));
    };

    let invitee: User = users::table
        .filter(users::email.eq(&email))
        .first(&mut conn)
        .optional()?
        .ok_or_else(|| AppError::not_found_with("User not found"))?;

    if invitee.id == authorized.case.user_id {
        return Err(AppError::conflict("The case owner cannot be added as a participant"));
    }

    let already_present: bool = diesel::select(diesel::dsl::exists(
        case_participants::table
            .filter(case_participants::case_id.eq(case_id))
            .filter(case_participants::user_id.eq(invitee.id)),
    ))
    .get_result(&mut conn)?;
    if already_present {
        return Err(AppError::conflict("User is already a participant"));
    }

    let new_participant = NewParticipant {
        id: Uuid::new_v4(),
        case_id,
        user_id: invitee.id,
        role: role.as_str().to_string(),
    };

    // Guards the check-then-insert window against a concurrent add.
    match diesel::insert_into(case_participants::table)
        .values(&new_participant)
        .execute(&mut conn)
    {
        Ok(_) => {}
        Err(diesel::result::Error::DatabaseError(DatabaseErrorKind::UniqueViolation, _)) => {
            return Err(AppError::conflict("User is already a participant"));
        }
        Err(err) => return Err(AppError::from(err)),
    }

    let participant: Participant = case_participants::table
        .find(new_participant.id)
        .first(&mut conn)?;

    info!(
        case_id = %case_id,
        participant_user_id = %invitee.id,
        role = %role,
        "participant added"
    );

    Ok((
        StatusCode::CREATED,
        Json(to_participant_response(participant, invitee)),
    ))
}

pub async fn update_participant(
    State(state): State<AppState>,
    Path((case_id, participant_id)): Path<(Uuid, Uuid)>,
    user: AuthenticatedUser,
    Json(payload): Json<UpdateParticipantRequest>,
) -> AppResult<Json<ParticipantResponse>> {
    let mut conn = state.db()?;
    authorize_case(&mut conn, case_id, user.user_id)?
        .require_owner("Only the case owner can update participants")?;

    let role = payload
        .role
        .as_deref()
        .ok_or_else(|| AppError::validation(vec!["Role is required".to_string()]))?
        .parse::<ParticipantRole>()
        .map_err(|err| AppError::bad_request(err.to_string()))?;

    let existing = load_participant(&mut conn, case_id, participant_id)?;

    diesel::update(case_participants::table.find(existing.id))
        .set(case_participants::role.eq(role.as_str()))
        .execute(&mut conn)?;

    let (participant, member): (Participant, User) = case_participants::table
        .inner_join(users::table)
        .filter(case_participants::id.eq(existing.id))
        .select((case_participants::all_columns, users::all_columns))
        .first(&mut conn)?;

    Ok(Json(to_participant_response(participant, member)))
}

pub async fn remove_participant(
    State(state): State<AppState>,
    Path((case_id, participant_id)): Path<(Uuid, Uuid)>,
    user: AuthenticatedUser,
) -> AppResult<impl IntoResponse> {
    let mut conn = state.db()?;
    authorize_case(&mut conn, case_id, user.user_id)?
        .require_owner("Only the case owner can remove participants")?;

    let existing = load_participant(&mut conn, case_id, participant_id)?;
    diesel::delete(case_participants::table.find(existing.id)).execute(&mut conn)?;

    info!(case_id = %case_id, participant_id = %participant_id, "participant removed");
    Ok(StatusCode::NO_CONTENT)
}

fn load_participant(
    conn: &mut PgConnection,
    case_id: Uuid,
    participant_id: Uuid,
) -> AppResult<Participant> {
    case_participants::table
        .filter(case_participants::id.eq(participant_id))
        .filter(case_participants::case_id.eq(case_id))
        .first(conn)
        .optional()?
        .ok_or_else(|| AppError::not_found_with("Participant not found"))
}

pub(crate) fn load_participants(
    conn: &mut PgConnection,
    case_id: Uuid,
) -> AppResult<Vec<ParticipantResponse>> {
    let rows: Vec<(Participant, User)> = case_participants::table
        .inner_join(users::table)
        .filter(case_participants::case_id.eq(case_id))
        .order(case_participants::added_at.asc())
        .select((case_participants::all_columns, users::all_columns))
        .load(conn)?;

    Ok(rows
        .into_iter()
        .map(|(participant, member)| to_participant_response(participant, member))
        .collect())
}

fn to_participant_response(participant: Participant, member: User) -> ParticipantResponse {
    ParticipantResponse {
        id: participant.id,
        case_id: participant.case_id,
        user_id: participant.user_id,
        role: participant.role,
        added_at: to_iso(participant.added_at),
        user: UserRef {
            id: member.id,
            email: member.email,
            full_name: member.full_name,
        },
    }
}
