use axum::{extract::State, http::StatusCode, response::Json};
use diesel::{sql_query, RunQueryDsl};
use serde_json::json;
use tracing::warn;

use crate::state::AppState;

pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    let database = match state.db().map(|mut conn| sql_query("SELECT 1").execute(&mut conn)) {
        Ok(Ok(_)) => "ok",
        Ok(Err(err)) => {
            warn!(error = %err, "health check query failed");
            "unavailable"
        }
        Err(err) => {
            warn!(error = %err, "health check could not reach the pool");
            "unavailable"
        }
    };

    (
        StatusCode::OK,
        Json(json!({ "status": "healthy", "database": database })),
    )
}
