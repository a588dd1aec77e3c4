use std::collections::HashSet;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_config::{meta::region::RegionProviderChain, BehaviorVersion};
use aws_credential_types::Credentials;
use aws_sdk_s3::config::{Builder as S3ConfigBuilder, Region};
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use uuid::Uuid;

use crate::config::AppConfig;

#[async_trait]
pub trait ObjectStorage: Send + Sync + 'static {
    async fn put_object(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: Option<String>,
        content_disposition: Option<String>,
    ) -> Result<()>;

    async fn presign_get_object(&self, key: &str, expires_in: Duration) -> Result<String>;

    async fn delete_object(&self, key: &str) -> Result<()>;

    async fn list_objects(&self, prefix: &str) -> Result<Vec<String>>;
}

/// Key of a document's original upload: `{caseId}/{epochMillis}-{slug}`.
pub fn document_key(case_id: Uuid, epoch_millis: i64, title: &str) -> String {
    format!("{case_id}/{epoch_millis}-{}", slugify_title(title))
}

/// Key of an uploaded revision: `{caseId}/{documentId}/v{n}-{epochMillis}`.
pub fn version_key(
    case_id: Uuid,
    document_id: Uuid,
    version_number: i32,
    epoch_millis: i64,
) -> String {
    format!("{case_id}/{document_id}/v{version_number}-{epoch_millis}")
}

/// Upload time encoded in a key produced by [`document_key`] or
/// [`version_key`]. Keys of any other shape yield `None`.
pub fn key_timestamp_millis(key: &str) -> Option<i64> {
    let (case_id, rest) = key.split_once('/')?;
    Uuid::parse_str(case_id).ok()?;

    if let Some((document_id, tail)) = rest.split_once('/') {
        if Uuid::parse_str(document_id).is_ok() {
            let (number, millis) = tail.strip_prefix('v')?.split_once('-')?;
            number.parse::<i32>().ok()?;
            return millis.parse().ok();
        }
    }

    let (millis, _slug) = rest.split_once('-')?;
    millis.parse().ok()
}

/// Stored keys that no row references and that were written before
/// `cutoff_millis`. Recent keys may belong to an upload still in flight.
pub fn orphaned_keys<'a>(
    stored: &'a [String],
    referenced: &HashSet<String>,
    cutoff_millis: i64,
) -> Vec<&'a str> {
    stored
        .iter()
        .filter(|key| !referenced.contains(key.as_str()))
        .filter(|key| key_timestamp_millis(key).is_some_and(|millis| millis < cutoff_millis))
        .map(String::as_str)
        .collect()
}

/// Replaces every run of whitespace with a single `-`.
pub fn slugify_title(title: &str) -> String {
    title.split_whitespace().collect::<Vec<_>>().join("-")
}

pub fn inline_content_disposition(filename: &str) -> Option<String> {
    if filename.is_empty() {
        return None;
    }

    let sanitized: String = filename
        .chars()
        .map(|ch| match ch {
            '"' | '\\' => '_',
            _ => ch,
        })
        .collect();

    let encoded =
        percent_encoding::utf8_percent_encode(&sanitized, percent_encoding::NON_ALPHANUMERIC);
    Some(format!(
        "inline; filename=\"{}\"; filename*=UTF-8''{}",
        sanitized, encoded
    ))
}

pub struct S3Storage {
    client: S3Client,
    bucket: String,
}

impl S3Storage {
    pub fn new(client: S3Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }

    /// Builds a path-style client for the configured bucket. Static
    /// credentials win over the default provider chain when both keys are set.
    pub async fn connect(config: &AppConfig) -> Result<Self> {
        let region_provider =
            RegionProviderChain::first_try(Some(Region::new(config.aws_region.clone())))
                .or_default_provider()
                .or_else("us-east-1");

        let mut loader = aws_config::defaults(BehaviorVersion::latest()).region(region_provider);

        if let Some(endpoint) = &config.aws_endpoint_url {
            loader = loader.endpoint_url(endpoint);
        }

        if let (Some(access_key), Some(secret_key)) = (
            config.aws_access_key_id.clone(),
            config.aws_secret_access_key.clone(),
        ) {
            loader = loader.credentials_provider(Credentials::new(
                access_key, secret_key, None, None, "static",
            ));
        }

        let shared = loader.load().await;
        let s3_config = S3ConfigBuilder::from(&shared).force_path_style(true).build();

        Ok(Self::new(
            S3Client::from_conf(s3_config),
            config.s3_bucket.clone(),
        ))
    }
}

#[async_trait]
impl ObjectStorage for S3Storage {
    async fn put_object(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: Option<String>,
        content_disposition: Option<String>,
    ) -> Result<()> {
        let mut request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(bytes));

        if let Some(content_type) = content_type {
            request = request.content_type(content_type);
        }

        if let Some(content_disposition) = content_disposition {
            request = request.content_disposition(content_disposition);
        }

        request
            .send()
            .await
            .context("failed to upload object to S3")?;

        Ok(())
    }

    async fn presign_get_object(&self, key: &str, expires_in: Duration) -> Result<String> {
        let presign_config = PresigningConfig::builder()
            .expires_in(expires_in)
            .build()
            .context("failed to build S3 presigning config")?;

        let presigned = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(presign_config)
            .await
            .context("failed to generate presigned download URL")?;

        Ok(presigned.uri().to_string())
    }

    async fn delete_object(&self, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .context("failed to delete object from S3")?;
        Ok(())
    }

    async fn list_objects(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut pages = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(prefix)
            .into_paginator()
            .send();

        while let Some(page) = pages.next().await {
            let page = page.context("failed to list objects in S3")?;
            keys.extend(
                page.contents()
                    .iter()
                    .filter_map(|object| object.key().map(str::to_owned)),
            );
        }

        Ok(keys)
    }
}
