//! Service-account authentication for Google APIs.
//!
//! The key file is read once; a signed JWT assertion is exchanged for an OAuth
//! access token at the key's `token_uri`.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

pub const BIGQUERY_SCOPE: &str = "https://www.googleapis.com/auth/bigquery";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME_SECS: i64 = 3600;
/// Lifetime assumed when the token endpoint does not say.
const DEFAULT_TOKEN_LIFETIME_SECS: u64 = 3600;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("failed to read credentials {path}: {source}")]
    ReadKey {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("credentials {path} are not a service-account key: {source}")]
    ParseKey {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to sign token assertion: {0}")]
    Sign(#[from] jsonwebtoken::errors::Error),

    #[error("token request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("token exchange failed with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("access token is not a valid header value: {0}")]
    InvalidToken(#[from] reqwest::header::InvalidHeaderValue),
}

/// The fields of a Google service-account JSON key that matter here.
#[derive(Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
    #[serde(default)]
    pub project_id: Option<String>,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

impl std::fmt::Debug for ServiceAccountKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceAccountKey")
            .field("client_email", &self.client_email)
            .field("token_uri", &self.token_uri)
            .field("project_id", &self.project_id)
            .finish_non_exhaustive()
    }
}

impl ServiceAccountKey {
    pub fn from_file(path: &Path) -> Result<Self, AuthError> {
        let content = std::fs::read_to_string(path).map_err(|source| AuthError::ReadKey {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| AuthError::ParseKey {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub iss: String,
    pub scope: String,
    pub aud: String,
    pub iat: i64,
    pub exp: i64,
}

/// Builds the RS256-signed JWT presented to the token endpoint.
pub fn signed_assertion(
    key: &ServiceAccountKey,
    scope: &str,
    now: DateTime<Utc>,
) -> Result<String, AuthError> {
    let claims = Claims {
        iss: key.client_email.clone(),
        scope: scope.to_string(),
        aud: key.token_uri.clone(),
        iat: now.timestamp(),
        exp: (now + Duration::seconds(ASSERTION_LIFETIME_SECS)).timestamp(),
    };
    let encoding_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())?;
    Ok(jsonwebtoken::encode(
        &Header::new(Algorithm::RS256),
        &claims,
        &encoding_key,
    )?)
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

/// An OAuth access token and how long it stays valid from when it was issued.
pub struct AccessToken {
    pub token: String,
    pub lifetime: std::time::Duration,
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessToken")
            .field("lifetime", &self.lifetime)
            .finish_non_exhaustive()
    }
}

impl AccessToken {
    fn from_response(resp: TokenResponse) -> Self {
        Self {
            token: resp.access_token,
            lifetime: std::time::Duration::from_secs(
                resp.expires_in.unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS),
            ),
        }
    }
}

/// Exchanges a service-account key for an access token carrying `scope`.
#[tracing::instrument(skip(key), fields(client_email = %key.client_email))]
pub async fn fetch_access_token(
    key: &ServiceAccountKey,
    scope: &str,
) -> Result<AccessToken, AuthError> {
    let assertion = signed_assertion(key, scope, Utc::now())?;

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(30))
        .connect_timeout(std::time::Duration::from_secs(10))
        .build()?;

    let response = client
        .post(&key.token_uri)
        .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
        .send()
        .await?;

    if !response.status().is_success() {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        return Err(AuthError::Rejected { status, body });
    }

    let token: TokenResponse = response.json().await?;
    info!(expires_in = token.expires_in, "Obtained access token");
    Ok(AccessToken::from_response(token))
}
