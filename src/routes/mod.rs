use axum::http::HeaderValue;
use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, patch, post},
    Router,
};
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::{auth::AuthenticatedUser, state::AppState};

pub mod auth;
pub mod cases;
pub mod chat;
pub mod documents;
pub mod health;
pub mod notes;
pub mod participants;
pub mod users;

/// Uploads arrive base64-encoded inside JSON, so the limit sits above the
/// largest accepted file.
const MAX_BODY_BYTES: usize = 64 * 1024 * 1024;

pub fn create_router(state: AppState) -> Router<()> {
    let allow_origin = match state.config.cors_allowed_origin.as_ref() {
        Some(origins) => {
            let headers: Vec<HeaderValue> = origins
                .split(',')
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .filter_map(|value| match value.parse::<HeaderValue>() {
                    Ok(header) => Some(header),
                    Err(_) => {
                        tracing::warn!(origin = value, "ignoring invalid CORS origin");
                        None
                    }
                })
                .collect();
            AllowOrigin::list(headers)
        }
        None => AllowOrigin::mirror_request(),
    };

    let cors = CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true);

    // Logout authenticates through its own `AuthenticatedUser` argument.
    let auth_routes = Router::new()
        .route("/register", post(auth::register))
        .route("/login", post(auth::login))
        .route("/refresh-token", post(auth::refresh_token))
        .route("/logout", post(auth::logout));

    let case_routes = Router::new()
        .route("/", get(cases::list_cases).post(cases::create_case))
        .route(
            "/:id",
            get(cases::get_case)
                .patch(cases::update_case)
                .delete(cases::delete_case),
        )
        .route(
            "/:id/documents",
            get(documents::list_documents).post(documents::upload_document),
        )
        .route(
            "/:id/documents/:document_id",
            get(documents::get_document)
                .patch(documents::update_document)
                .delete(documents::delete_document),
        )
        .route(
            "/:id/documents/:document_id/versions",
            get(documents::list_versions).post(documents::upload_version),
        )
        .route(
            "/:id/documents/:document_id/versions/:version_id",
            get(documents::get_version),
        )
        .route(
            "/:id/notes",
            get(notes::list_notes).post(notes::create_note),
        )
        .route(
            "/:id/notes/:note_id",
            patch(notes::update_note).delete(notes::delete_note),
        )
        .route(
            "/:id/participants",
            get(participants::list_participants).post(participants::add_participant),
        )
        .route(
            "/:id/participants/:participant_id",
            patch(participants::update_participant)
                .delete(participants::remove_participant),
        );

    let user_routes = Router::new().route(
        "/profile",
        get(users::get_profile).patch(users::update_profile),
    );

    let protected_state = state.clone();
    let protected_routes = Router::new()
        .nest("/api/cases", case_routes)
        .nest("/api/users", user_routes)
        .layer(middleware::from_extractor_with_state::<AuthenticatedUser, _>(protected_state));

    Router::new()
        .merge(protected_routes)
        .nest("/api/auth", auth_routes)
        .route("/api/health", get(health::health_check))
        .route("/ws", get(chat::ws_handler))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
}
