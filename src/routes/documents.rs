use axum::extract::{Json, Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, NaiveDateTime, Utc};
use diesel::{prelude::*, result::DatabaseErrorKind, PgConnection};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::access::authorize_case;
use crate::auth::AuthenticatedUser;
use crate::error::{AppError, AppResult};
use crate::models::{
    Document, DocumentStatus, DocumentVersion, NewDocument, NewDocumentVersion, User,
};
use crate::schema::{document_versions, documents, users};
use crate::state::AppState;
use crate::storage::{document_key, inline_content_disposition, version_key};
use crate::utils::limits::{check_length, CONTENT_TYPE_MAX, DOCUMENT_TYPE_MAX, TITLE_MAX};

/// Upper bound on version-number allocation retries under concurrent uploads.
const MAX_VERSION_ALLOCATION_ATTEMPTS: usize = 5;

#[derive(Deserialize)]
pub struct UploadDocumentRequest {
    pub title: Option<String>,
    pub document_type: Option<String>,
    /// Base64-encoded file bytes.
    pub content: Option<String>,
    pub file_type: Option<String>,
}

#[derive(Deserialize)]
pub struct UploadVersionRequest {
    pub content: Option<String>,
    pub file_type: Option<String>,
    pub comment: Option<String>,
}

#[derive(Deserialize)]
pub struct UpdateDocumentRequest {
    pub title: Option<String>,
    pub document_type: Option<String>,
    pub status: Option<String>,
}

#[derive(AsChangeset, Default)]
#[diesel(table_name = documents)]
struct UpdateDocumentChangeset {
    title: Option<String>,
    document_type: Option<String>,
    status: Option<String>,
    updated_at: Option<NaiveDateTime>,
}

#[derive(Serialize, Clone)]
pub struct DocumentResponse {
    pub id: Uuid,
    pub case_id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub document_type: String,
    pub status: String,
    pub file_path: String,
    pub content_type: Option<String>,
    pub size_bytes: i64,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Serialize)]
pub struct UserRef {
    pub id: Uuid,
    pub email: String,
    pub full_name: String,
}

#[derive(Serialize)]
pub struct DocumentVersionResponse {
    pub id: Uuid,
    pub document_id: Uuid,
    pub version_number: i32,
    pub file_path: String,
    pub created_by: Uuid,
    pub comment: Option<String>,
    pub content_type: Option<String>,
    pub size_bytes: i64,
    pub created_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creator: Option<UserRef>,
}

#[derive(Serialize)]
pub struct SignedUrlResponse {
    pub url: String,
    pub expires_in: u64,
    pub file_path: String,
    pub content_type: Option<String>,
}

pub async fn list_documents(
    State(state): State<AppState>,
    Path(case_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<Json<Vec<DocumentResponse>>> {
    let mut conn = state.db()?;
    authorize_case(&mut conn, case_id, user.user_id)?;

    let rows = load_case_documents(&mut conn, case_id)?;
    Ok(Json(rows.into_iter().map(to_document_response).collect()))
}

pub async fn upload_document(
    State(state): State<AppState>,
    Path(case_id): Path<Uuid>,
    user: AuthenticatedUser,
    Json(payload): Json<UploadDocumentRequest>,
) -> AppResult<(StatusCode, Json<DocumentResponse>)> {
    {
        let mut conn = state.db()?;
        authorize_case(&mut conn, case_id, user.user_id)?;
    }

    let mut errors = Vec::new();
    let title = required_text(payload.title.as_deref(), "Title is required", &mut errors);
    let document_type = required_text(
        payload.document_type.as_deref(),
        "Document type is required",
        &mut errors,
    );
    if payload.content.is_none() {
        errors.push("Content is required".to_string());
    }
    check_length("Title", title.as_deref(), TITLE_MAX, &mut errors);
    check_length(
        "Document type",
        document_type.as_deref(),
        DOCUMENT_TYPE_MAX,
        &mut errors,
    );
    check_length(
        "File type",
        payload.file_type.as_deref().map(str::trim),
        CONTENT_TYPE_MAX,
        &mut errors,
    );
    if !errors.is_empty() {
        return Err(AppError::validation(errors));
    }

    let title = title.unwrap_or_default();
    let bytes = decode_content(payload.content.as_deref().unwrap_or_default())?;
    let content_type = resolve_content_type(payload.file_type.as_deref(), &title);
    let size_bytes = bytes.len() as i64;
    let key = document_key(case_id, Utc::now().timestamp_millis(), &title);

    state
        .storage
        .put_object(
            &key,
            bytes,
            Some(content_type.clone()),
            inline_content_disposition(&title),
        )
        .await
        .map_err(|err| {
            error!(error = %err, key = %key, "failed to store document");
            AppError::storage(err)
        })?;

    let new_document = NewDocument {
        id: Uuid::new_v4(),
        case_id,
        user_id: user.user_id,
        title: title.clone(),
        document_type: document_type.unwrap_or_default(),
        status: DocumentStatus::Draft.as_str().to_string(),
        file_path: key.clone(),
        content_type: Some(content_type),
        size_bytes,
    };

    let inserted = state.db().and_then(|mut conn| {
        diesel::insert_into(documents::table)
            .values(&new_document)
            .execute(&mut conn)?;
        Ok(documents::table
            .find(new_document.id)
            .first::<Document>(&mut conn)?)
    });

    let document = match inserted {
        Ok(document) => document,
        Err(err) => {
            error!(error = %err, key = %key, "document metadata write failed; removing blob");
            discard_blob(&state, &key).await;
            return Err(err);
        }
    };

    info!(
        document_id = %document.id,
        case_id = %case_id,
        size_bytes,
        "document upload succeeded"
    );

    Ok((StatusCode::CREATED, Json(to_document_response(document))))
}

pub async fn get_document(
    State(state): State<AppState>,
    Path((case_id, document_id)): Path<(Uuid, Uuid)>,
    user: AuthenticatedUser,
) -> AppResult<Json<SignedUrlResponse>> {
    let document = {
        let mut conn = state.db()?;
        authorize_case(&mut conn, case_id, user.user_id)?;
        load_document(&mut conn, case_id, document_id)?
    };

    signed_url(&state, document.file_path, document.content_type).await
}

pub async fn update_document(
    State(state): State<AppState>,
    Path((case_id, document_id)): Path<(Uuid, Uuid)>,
    user: AuthenticatedUser,
    Json(payload): Json<UpdateDocumentRequest>,
) -> AppResult<Json<DocumentResponse>> {
    let mut conn = state.db()?;
    let authorized = authorize_case(&mut conn, case_id, user.user_id)?;
    let document = load_document(&mut conn, case_id, document_id)?;
    authorized.require_modify(
        document.user_id,
        "Only the document creator or case owner can update",
    )?;

    let mut changeset = UpdateDocumentChangeset::default();

    if let Some(title) = payload.title {
        let trimmed = title.trim();
        if trimmed.is_empty() {
            return Err(AppError::bad_request("title must not be empty"));
        }
        changeset.title = Some(trimmed.to_string());
    }

    if let Some(document_type) = payload.document_type {
        let trimmed = document_type.trim();
        if trimmed.is_empty() {
            return Err(AppError::bad_request("document_type must not be empty"));
        }
        changeset.document_type = Some(trimmed.to_string());
    }

    let mut errors = Vec::new();
    check_length("Title", changeset.title.as_deref(), TITLE_MAX, &mut errors);
    check_length(
        "Document type",
        changeset.document_type.as_deref(),
        DOCUMENT_TYPE_MAX,
        &mut errors,
    );
    if !errors.is_empty() {
        return Err(AppError::validation(errors));
    }

    if let Some(status) = payload.status {
        let parsed = status
            .parse::<DocumentStatus>()
            .map_err(|err| AppError::bad_request(err.to_string()))?;
        changeset.status = Some(parsed.as_str().to_string());
    }

    if changeset.title.is_none() && changeset.document_type.is_none() && changeset.status.is_none()
    {
        return Err(AppError::bad_request("no changes provided"));
    }

    changeset.updated_at = Some(Utc::now().naive_utc());
    diesel::update(documents::table.find(document_id))
        .set(&changeset)
        .execute(&mut conn)?;

    let updated: Document = documents::table.find(document_id).first(&mut conn)?;
    Ok(Json(to_document_response(updated)))
}

pub async fn delete_document(
    State(state): State<AppState>,
    Path((case_id, document_id)): Path<(Uuid, Uuid)>,
    user: AuthenticatedUser,
) -> AppResult<impl IntoResponse> {
    let keys = {
        let mut conn = state.db()?;
        let authorized = authorize_case(&mut conn, case_id, user.user_id)?;
        let document = load_document(&mut conn, case_id, document_id)?;
        authorized.require_modify(
            document.user_id,
            "Insufficient permissions to delete",
        )?;

        let mut keys: Vec<String> = document_versions::table
            .filter(document_versions::document_id.eq(document_id))
            .select(document_versions::file_path)
            .load(&mut conn)?;
        keys.push(document.file_path);

        // Versions go with the row through ON DELETE CASCADE.
        diesel::delete(documents::table.find(document_id)).execute(&mut conn)?;
        keys
    };

    for key in &keys {
        discard_blob(&state, key).await;
    }

    info!(document_id = %document_id, blobs = keys.len(), "document deleted");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_versions(
    State(state): State<AppState>,
    Path((case_id, document_id)): Path<(Uuid, Uuid)>,
    user: AuthenticatedUser,
) -> AppResult<Json<Vec<DocumentVersionResponse>>> {
    let mut conn = state.db()?;
    authorize_case(&mut conn, case_id, user.user_id)?;
    load_document(&mut conn, case_id, document_id)?;

    let rows: Vec<(DocumentVersion, User)> = document_versions::table
        .inner_join(users::table.on(users::id.eq(document_versions::created_by)))
        .filter(document_versions::document_id.eq(document_id))
        .order(document_versions::version_number.desc())
        .select((document_versions::all_columns, users::all_columns))
        .load(&mut conn)?;

    Ok(Json(
        rows.into_iter()
            .map(|(version, creator)| {
                let mut response = to_version_response(version);
                response.creator = Some(UserRef {
                    id: creator.id,
                    email: creator.email,
                    full_name: creator.full_name,
                });
                response
            })
            .collect(),
    ))
}

pub async fn upload_version(
    State(state): State<AppState>,
    Path((case_id, document_id)): Path<(Uuid, Uuid)>,
    user: AuthenticatedUser,
    Json(payload): Json<UploadVersionRequest>,
) -> AppResult<(StatusCode, Json<DocumentVersionResponse>)> {
    let document = {
        let mut conn = state.db()?;
        let authorized = authorize_case(&mut conn, case_id, user.user_id)?;
        let document = load_document(&mut conn, case_id, document_id)?;
        authorized.require_modify(
            document.user_id,
            "Only the document creator or case owner can upload versions",
        )?;
        document
    };

    let content = payload
        .content
        .as_deref()
        .ok_or_else(|| AppError::validation(vec!["Content is required".to_string()]))?;
    let mut errors = Vec::new();
    check_length(
        "File type",
        payload.file_type.as_deref().map(str::trim),
        CONTENT_TYPE_MAX,
        &mut errors,
    );
    if !errors.is_empty() {
        return Err(AppError::validation(errors));
    }
    let bytes = decode_content(content)?;
    let content_type = resolve_content_type(payload.file_type.as_deref(), &document.title);
    let comment = payload
        .comment
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty());

    // The row claims the version number before any bytes are written, so two
    // uploads never share a key and a conflict never touches storage.
    let version = {
        let mut conn = state.db()?;
        reserve_version(
            &mut conn,
            case_id,
            document_id,
            user.user_id,
            comment,
            &content_type,
            bytes.len() as i64,
        )?
    };

    if let Err(err) = state
        .storage
        .put_object(
            &version.file_path,
            bytes,
            Some(content_type),
            inline_content_disposition(&document.title),
        )
        .await
    {
        error!(
            error = %err,
            key = %version.file_path,
            "failed to store document version; releasing row"
        );
        release_version(&state, version.id);
        return Err(AppError::storage(err));
    }

    info!(
        document_id = %document_id,
        version_number = version.version_number,
        "document version stored"
    );
    Ok((StatusCode::CREATED, Json(to_version_response(version))))
}

/// Inserts the next version row, retrying when a concurrent upload takes the
/// same number first.
fn reserve_version(
    conn: &mut PgConnection,
    case_id: Uuid,
    document_id: Uuid,
    created_by: Uuid,
    comment: Option<String>,
    content_type: &str,
    size_bytes: i64,
) -> AppResult<DocumentVersion> {
    for attempt in 1..=MAX_VERSION_ALLOCATION_ATTEMPTS {
        let version_number = next_version_number(conn, document_id)?;
        let new_version = NewDocumentVersion {
            id: Uuid::new_v4(),
            document_id,
            version_number,
            file_path: version_key(
                case_id,
                document_id,
                version_number,
                Utc::now().timestamp_millis(),
            ),
            created_by,
            comment: comment.clone(),
            content_type: Some(content_type.to_string()),
            size_bytes,
        };

        match diesel::insert_into(document_versions::table)
            .values(&new_version)
            .execute(conn)
        {
            Ok(_) => return Ok(document_versions::table.find(new_version.id).first(conn)?),
            Err(diesel::result::Error::DatabaseError(DatabaseErrorKind::UniqueViolation, _)) => {
                warn!(
                    document_id = %document_id,
                    version_number,
                    attempt,
                    "version number taken by a concurrent upload; retrying"
                );
            }
            Err(err) => return Err(err.into()),
        }
    }

    Err(AppError::persistence(
        "could not allocate a version number; retry the upload",
    ))
}

/// Drops a reserved version row whose blob never made it to storage.
fn release_version(state: &AppState, version_id: Uuid) {
    let released = state.db().and_then(|mut conn| {
        Ok(diesel::delete(document_versions::table.find(version_id)).execute(&mut conn)?)
    });
    if let Err(err) = released {
        warn!(error = %err, version_id = %version_id, "failed to release version row");
    }
}

pub async fn get_version(
    State(state): State<AppState>,
    Path((case_id, document_id, version_id)): Path<(Uuid, Uuid, Uuid)>,
    user: AuthenticatedUser,
) -> AppResult<Json<SignedUrlResponse>> {
    let version = {
        let mut conn = state.db()?;
        authorize_case(&mut conn, case_id, user.user_id)?;
        load_document(&mut conn, case_id, document_id)?;
        document_versions::table
            .filter(document_versions::id.eq(version_id))
            .filter(document_versions::document_id.eq(document_id))
            .first::<DocumentVersion>(&mut conn)
            .optional()?
            .ok_or_else(|| AppError::not_found_with("Version not found"))?
    };

    signed_url(&state, version.file_path, version.content_type).await
}

pub(crate) fn load_case_documents(
    conn: &mut PgConnection,
    case_id: Uuid,
) -> AppResult<Vec<Document>> {
    Ok(documents::table
        .filter(documents::case_id.eq(case_id))
        .order(documents::created_at.desc())
        .load(conn)?)
}

fn load_document(conn: &mut PgConnection, case_id: Uuid, document_id: Uuid) -> AppResult<Document> {
    documents::table
        .filter(documents::id.eq(document_id))
        .filter(documents::case_id.eq(case_id))
        .first::<Document>(conn)
        .optional()?
        .ok_or_else(|| AppError::not_found_with("Document not found"))
}

/// `max(version_number) + 1`, or 1 for a document without versions.
fn next_version_number(conn: &mut PgConnection, document_id: Uuid) -> AppResult<i32> {
    let current: Option<i32> = document_versions::table
        .filter(document_versions::document_id.eq(document_id))
        .select(diesel::dsl::max(document_versions::version_number))
        .first(conn)?;
    Ok(current.unwrap_or(0) + 1)
}

async fn signed_url(
    state: &AppState,
    key: String,
    content_type: Option<String>,
) -> AppResult<Json<SignedUrlResponse>> {
    let ttl = state.signed_url_ttl();
    let url = state
        .storage
        .presign_get_object(&key, ttl)
        .await
        .map_err(|err| AppError::storage(format!("failed to generate download URL: {err}")))?;

    Ok(Json(SignedUrlResponse {
        url,
        expires_in: ttl.as_secs(),
        file_path: key,
        content_type,
    }))
}

/// Best-effort removal used by compensation and cascading deletes.
pub(crate) async fn discard_blob(state: &AppState, key: &str) {
    if let Err(err) = state.storage.delete_object(key).await {
        warn!(error = %err, key = %key, "failed to delete blob; it is now orphaned");
    }
}

fn decode_content(encoded: &str) -> AppResult<Vec<u8>> {
    // Data URLs from browser file readers carry a `data:<mime>;base64,` prefix.
    let payload = encoded
        .split_once(";base64,")
        .map(|(_, rest)| rest)
        .unwrap_or(encoded)
        .trim();
    let bytes = STANDARD
        .decode(payload)
        .map_err(|_| AppError::bad_request("content must be valid base64"))?;
    if bytes.is_empty() {
        return Err(AppError::bad_request("content must not be empty"));
    }
    Ok(bytes)
}

fn resolve_content_type(declared: Option<&str>, title: &str) -> String {
    declared
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_owned)
        .unwrap_or_else(|| {
            mime_guess::from_path(title)
                .first_or_octet_stream()
                .essence_str()
                .to_owned()
        })
}

fn required_text(value: Option<&str>, message: &str, errors: &mut Vec<String>) -> Option<String> {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        Some(text) => Some(text.to_string()),
        None => {
            errors.push(message.to_string());
            None
        }
    }
}

pub(crate) fn to_document_response(document: Document) -> DocumentResponse {
    DocumentResponse {
        id: document.id,
        case_id: document.case_id,
        user_id: document.user_id,
        title: document.title,
        document_type: document.document_type,
        status: document.status,
        file_path: document.file_path,
        content_type: document.content_type,
        size_bytes: document.size_bytes,
        created_at: to_iso(document.created_at),
        updated_at: to_iso(document.updated_at),
    }
}

fn to_version_response(version: DocumentVersion) -> DocumentVersionResponse {
    DocumentVersionResponse {
        id: version.id,
        document_id: version.document_id,
        version_number: version.version_number,
        file_path: version.file_path,
        created_by: version.created_by,
        comment: version.comment,
        content_type: version.content_type,
        size_bytes: version.size_bytes,
        created_at: to_iso(version.created_at),
        creator: None,
    }
}

pub(crate) fn to_iso(dt: NaiveDateTime) -> String {
    DateTime::<Utc>::from_naive_utc_and_offset(dt, Utc).to_rfc3339()
}
