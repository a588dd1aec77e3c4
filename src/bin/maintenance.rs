use std::collections::HashSet;
use std::env;

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use diesel::prelude::*;
use tracing_subscriber::EnvFilter;

use legalmind::{
    config::AppConfig,
    db,
    schema::{document_versions, documents, refresh_tokens},
    storage::{orphaned_keys, ObjectStorage, S3Storage},
};

const USAGE: &str = "Usage: maintenance <prune-refresh-tokens | purge-orphaned-blobs [--dry-run] [--grace-minutes N]>";

/// Blobs younger than this may belong to an upload whose row is not yet committed.
const DEFAULT_GRACE_MINUTES: i64 = 60;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .compact()
        .init();

    let mut args = env::args().skip(1);
    match args.next().as_deref() {
        Some("prune-refresh-tokens") => prune_refresh_tokens()?,
        Some("purge-orphaned-blobs") => {
            let options: Vec<String> = args.collect();
            let dry_run = options.iter().any(|arg| arg == "--dry-run");
            let grace_minutes = match options.iter().position(|arg| arg == "--grace-minutes") {
                Some(index) => options
                    .get(index + 1)
                    .context("--grace-minutes needs a value")?
                    .parse::<i64>()
                    .context("--grace-minutes must be a whole number")?,
                None => DEFAULT_GRACE_MINUTES,
            };
            purge_orphaned_blobs(dry_run, grace_minutes).await?
        }
        Some(cmd) => {
            eprintln!("Unknown command: {cmd}\n{USAGE}");
            std::process::exit(1);
        }
        None => {
            eprintln!("{USAGE}");
            std::process::exit(1);
        }
    }

    Ok(())
}

fn load_config() -> Result<AppConfig> {
    let config = AppConfig::from_env()?;
    tracing::info!(
        component = "maintenance",
        database_url = %config.redacted_database_url(),
        s3_bucket = %config.s3_bucket,
        "loaded configuration"
    );
    Ok(config)
}

/// Removes refresh-token records that are expired or were revoked.
fn prune_refresh_tokens() -> Result<()> {
    let config = load_config()?;
    let pool = db::init_pool_with_size(&config.database_url, 1)?;
    let mut conn = pool.get().context("failed to get database connection")?;

    let now = Utc::now().naive_utc();
    let removed = diesel::delete(
        refresh_tokens::table.filter(
            refresh_tokens::expires_at
                .le(now)
                .or(refresh_tokens::revoked_at.is_not_null()),
        ),
    )
    .execute(&mut conn)
    .context("failed to prune refresh tokens")?;

    println!("Removed {removed} refresh token records.");
    Ok(())
}

/// Deletes blobs in the bucket that no document or version row references.
/// These are left behind when a best-effort cleanup fails. The bucket is
/// listed before the rows are read, and blobs written within the grace
/// window are left alone.
async fn purge_orphaned_blobs(dry_run: bool, grace_minutes: i64) -> Result<()> {
    let config = load_config()?;
    let pool = db::init_pool_with_size(&config.database_url, 1)?;
    let storage = S3Storage::connect(&config).await?;

    let cutoff_millis = (Utc::now() - Duration::minutes(grace_minutes)).timestamp_millis();
    let stored = storage.list_objects("").await?;

    let referenced: HashSet<String> = {
        let mut conn = pool.get().context("failed to get database connection")?;
        let mut keys: HashSet<String> = documents::table
            .select(documents::file_path)
            .load::<String>(&mut conn)
            .context("failed to load document keys")?
            .into_iter()
            .collect();
        keys.extend(
            document_versions::table
                .select(document_versions::file_path)
                .load::<String>(&mut conn)
                .context("failed to load version keys")?,
        );
        keys
    };

    let orphaned = orphaned_keys(&stored, &referenced, cutoff_millis);
    tracing::info!(
        stored = stored.len(),
        referenced = referenced.len(),
        orphaned = orphaned.len(),
        grace_minutes,
        "orphan scan finished"
    );

    if orphaned.is_empty() {
        println!("No orphaned blobs found ({} objects checked).", stored.len());
        return Ok(());
    }

    if dry_run {
        for key in &orphaned {
            println!("{key}");
        }
        println!("{} orphaned blobs would be deleted.", orphaned.len());
        return Ok(());
    }

    println!("Deleting {} orphaned blobs…", orphaned.len());
    let mut failed = 0usize;
    for key in orphaned {
        if let Err(err) = storage.delete_object(key).await {
            failed += 1;
            eprintln!("Failed to delete object {key} from storage: {err}");
        }
    }

    if failed > 0 {
        anyhow::bail!("{failed} blobs could not be deleted");
    }
    println!("Orphaned blobs deleted.");
    Ok(())
}
