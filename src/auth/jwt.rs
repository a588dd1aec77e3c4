use anyhow::Result;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::AppConfig;

#[derive(Clone)]
pub struct JwtService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    issuer: String,
    audience: String,
    expiry: Duration,
    refresh_audience: String,
    refresh_expiry: Duration,
}

impl JwtService {
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        Ok(Self {
            encoding: EncodingKey::from_secret(config.jwt_secret.as_bytes()),
            decoding: DecodingKey::from_secret(config.jwt_secret.as_bytes()),
            issuer: config.jwt_issuer.clone(),
            audience: config.jwt_audience.clone(),
            expiry: Duration::minutes(config.jwt_expiry_minutes),
            refresh_audience: config.jwt_refresh_audience.clone(),
            refresh_expiry: Duration::days(config.refresh_token_expiry_days),
        })
    }

    pub fn access_expiry_seconds(&self) -> i64 {
        self.expiry.num_seconds()
    }

    pub fn refresh_expiry(&self) -> Duration {
        self.refresh_expiry
    }

    pub fn generate_access_token(&self, user_id: Uuid) -> Result<String> {
        self.sign(user_id, &self.audience, self.expiry)
    }

    pub fn verify_access_token(&self, token: &str) -> Result<Claims> {
        self.verify(token, &self.audience)
    }

    pub fn generate_refresh_token(&self, user_id: Uuid) -> Result<String> {
        self.sign(user_id, &self.refresh_audience, self.refresh_expiry)
    }

    pub fn verify_refresh_token(&self, token: &str) -> Result<Claims> {
        self.verify(token, &self.refresh_audience)
    }

    fn sign(&self, user_id: Uuid, audience: &str, lifetime: Duration) -> Result<String> {
        let now = Utc::now();
        let exp = now + lifetime;
        let claims = Claims {
            user_id,
            jti: Uuid::new_v4(),
            iss: self.issuer.clone(),
            aud: audience.to_owned(),
            iat: now.timestamp() as usize,
            exp: exp.timestamp() as usize,
        };

        Ok(encode(&Header::default(), &claims, &self.encoding)?)
    }

    fn verify(&self, token: &str, audience: &str) -> Result<Claims> {
        let mut validation = Validation::default();
        validation.set_audience(&[audience]);
        validation.set_issuer(&[self.issuer.clone()]);
        let data = decode::<Claims>(token, &self.decoding, &validation)?;
        Ok(data.claims)
    }
}

/// Token claims. `userId` is the only application claim; `jti` keeps two
/// tokens minted in the same second distinct.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    #[serde(rename = "userId")]
    pub user_id: Uuid,
    pub jti: Uuid,
    pub iss: String,
    pub aud: String,
    pub iat: usize,
    pub exp: usize,
}
