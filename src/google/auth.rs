//! Service account authentication: a signed RS256 assertion is exchanged for
//! a short-lived bearer token, which is cached until shortly before expiry.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::config::CredentialSource;
use crate::errors::{RelayError, RelayResult};

pub const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
pub const SCOPES: &str =
    "https://www.googleapis.com/auth/drive https://www.googleapis.com/auth/spreadsheets";

const ASSERTION_LIFETIME_SECS: i64 = 3600;
const EXPIRY_MARGIN_SECS: i64 = 60;

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

impl ServiceAccountKey {
    pub fn parse(raw: &str) -> RelayResult<Self> {
        let key: ServiceAccountKey = serde_json::from_str(raw)
            .map_err(|e| RelayError::CredentialsInvalid(format!("malformed key JSON: {e}")))?;
        if key.client_email.trim().is_empty() {
            return Err(RelayError::CredentialsInvalid(
                "client_email is empty".to_string(),
            ));
        }
        Ok(key)
    }

    pub fn load(source: &CredentialSource) -> RelayResult<Self> {
        match source {
            CredentialSource::Inline(blob) => Self::parse(blob),
            CredentialSource::File(path) => {
                let raw = std::fs::read_to_string(path).map_err(|e| {
                    RelayError::CredentialsInvalid(format!(
                        "cannot read {}: {e}",
                        path.to_string_lossy()
                    ))
                })?;
                Self::parse(&raw)
            }
        }
    }
}

#[derive(Debug, Serialize)]
struct Claims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

struct CachedToken {
    value: String,
    expires_at: DateTime<Utc>,
}

pub struct TokenProvider {
    key: ServiceAccountKey,
    signing_key: EncodingKey,
    http: reqwest::Client,
    cache: Mutex<Option<CachedToken>>,
}

impl TokenProvider {
    /// Fails with `CredentialsInvalid` when the private key is not a usable RSA PEM.
    pub fn new(key: ServiceAccountKey, http: reqwest::Client) -> RelayResult<Self> {
        let signing_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
            .map_err(|e| RelayError::CredentialsInvalid(format!("bad private key: {e}")))?;
        Ok(Self {
            key,
            signing_key,
            http,
            cache: Mutex::new(None),
        })
    }

    fn assertion(&self, now: DateTime<Utc>) -> RelayResult<String> {
        let claims = Claims {
            iss: &self.key.client_email,
            scope: SCOPES,
            aud: &self.key.token_uri,
            iat: now.timestamp(),
            exp: now.timestamp() + ASSERTION_LIFETIME_SECS,
        };
        encode(&Header::new(Algorithm::RS256), &claims, &self.signing_key)
            .map_err(|e| RelayError::CredentialsInvalid(format!("cannot sign assertion: {e}")))
    }

    pub async fn access_token(&self) -> RelayResult<String> {
        let mut cache = self.cache.lock().await;
        let now = Utc::now();
        if let Some(token) = cache.as_ref() {
            if token.expires_at > now {
                return Ok(token.value.clone());
            }
        }

        log::debug!("Requesting access token for {}", self.key.client_email);
        let assertion = self.assertion(now)?;
        let resp = self
            .http
            .post(&self.key.token_uri)
            .form(&[
                ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                ("assertion", assertion.as_str()),
            ])
            .send()
            .await
            .map_err(|e| RelayError::Unavailable(format!("token request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            log::error!("Token endpoint returned {status}: {body}");
            return Err(RelayError::from_status(
                "token endpoint",
                status,
                RelayError::CredentialsInvalid,
            ));
        }

        let token: TokenResponse = resp
            .json()
            .await
            .map_err(|e| RelayError::Internal(format!("bad token response: {e}")))?;
        let lifetime = token.expires_in.unwrap_or(ASSERTION_LIFETIME_SECS);
        *cache = Some(CachedToken {
            value: token.access_token.clone(),
            expires_at: now + Duration::seconds(lifetime - EXPIRY_MARGIN_SECS),
        });
        Ok(token.access_token)
    }
}
