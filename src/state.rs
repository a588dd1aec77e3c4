use std::{sync::Arc, time::Duration};

use diesel::{
    pg::PgConnection,
    r2d2::{ConnectionManager, PooledConnection},
};

use crate::{
    auth::jwt::JwtService,
    config::AppConfig,
    crypto::EncryptionService,
    db::PgPool,
    error::{AppError, AppResult},
    storage::ObjectStorage,
};

type PgPooledConnection = PooledConnection<ConnectionManager<PgConnection>>;

/// Process-wide handles, built once at start-up and shared by every request.
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Arc<AppConfig>,
    pub storage: Arc<dyn ObjectStorage>,
    pub jwt: JwtService,
    pub encryption: Option<EncryptionService>,
}

impl AppState {
    pub fn new(
        pool: PgPool,
        config: AppConfig,
        storage: Arc<dyn ObjectStorage>,
        jwt: JwtService,
    ) -> Self {
        let encryption = config.encryption_master_key.as_deref().and_then(|key| {
            EncryptionService::new(key)
                .map_err(|err| tracing::warn!(error = %err, "encryption helper disabled"))
                .ok()
        });
        Self {
            pool,
            config: Arc::new(config),
            storage,
            jwt,
            encryption,
        }
    }

    pub fn db(&self) -> AppResult<PgPooledConnection> {
        self.pool
            .get()
            .map_err(|err| AppError::internal(format!("database pool error: {err}")))
    }

    pub fn signed_url_ttl(&self) -> Duration {
        Duration::from_secs(self.config.signed_url_expiry_seconds)
    }
}
