use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// The identity a bearer token resolves to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: i64,
    pub username: String,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid token")]
    Invalid,
    #[error("token expired")]
    Expired,
    #[error("token validator unreachable: {0}")]
    Unreachable(String),
}

/// Maps an opaque bearer token to an identity. Implementations must be
/// cheap to share; the dispatcher bounds each call with a 5 s deadline.
#[rocket::async_trait]
pub trait TokenValidator: Send + Sync {
    async fn validate(&self, token: &str) -> Result<Identity, AuthError>;

    /// Short backend label used as the `type` label on auth metrics.
    fn kind(&self) -> &'static str;
}

// --- Local shared-secret validator ---

/// Self-contained tokens: `{user_id}.{b64(username)}.{expires}.{sig}`
/// where `sig = hex(HMAC-SHA256(secret, "{user_id}.{b64(username)}.{expires}"))`.
pub struct HmacTokenValidator {
    secret: Vec<u8>,
}

impl HmacTokenValidator {
    pub fn new(secret: &str) -> Self {
        HmacTokenValidator {
            secret: secret.as_bytes().to_vec(),
        }
    }

    /// Mint a token for `identity` valid until `expires` (unix seconds).
    /// Used by operator tooling and tests; issuance in production belongs
    /// to the external auth service that shares the secret.
    pub fn issue(&self, identity: &Identity, expires: i64) -> String {
        use base64::Engine;
        let name = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .encode(identity.username.as_bytes());
        let body = format!("{}.{}.{}", identity.user_id, name, expires);
        let mut mac = HmacSha256::new_from_slice(&self.secret).expect("hmac accepts any key length");
        mac.update(body.as_bytes());
        let sig = hex::encode(mac.finalize().into_bytes());
        format!("{body}.{sig}")
    }

    fn check(&self, token: &str) -> Result<Identity, AuthError> {
        use base64::Engine;

        let mut parts = token.split('.');
        let (user_id, name, expires, sig) = match (
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
        ) {
            (Some(a), Some(b), Some(c), Some(d), None) => (a, b, c, d),
            _ => return Err(AuthError::Invalid),
        };

        let body = format!("{user_id}.{name}.{expires}");
        let mut mac = HmacSha256::new_from_slice(&self.secret).expect("hmac accepts any key length");
        mac.update(body.as_bytes());
        let sig = hex::decode(sig).map_err(|_| AuthError::Invalid)?;
        mac.verify_slice(&sig).map_err(|_| AuthError::Invalid)?;

        let expires: i64 = expires.parse().map_err(|_| AuthError::Invalid)?;
        if expires < chrono::Utc::now().timestamp() {
            return Err(AuthError::Expired);
        }

        let user_id: i64 = user_id.parse().map_err(|_| AuthError::Invalid)?;
        if user_id <= 0 {
            return Err(AuthError::Invalid);
        }
        let username = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(name)
            .ok()
            .and_then(|b| String::from_utf8(b).ok())
            .ok_or(AuthError::Invalid)?;
        if username.is_empty() {
            return Err(AuthError::Invalid);
        }

        Ok(Identity { user_id, username })
    }
}

#[rocket::async_trait]
impl TokenValidator for HmacTokenValidator {
    async fn validate(&self, token: &str) -> Result<Identity, AuthError> {
        self.check(token)
    }

    fn kind(&self) -> &'static str {
        "hmac"
    }
}

// --- Remote validator ---

#[derive(Debug, Deserialize)]
struct RemoteIdentity {
    user_id: i64,
    username: String,
}

/// Delegates validation to an external auth service:
/// `POST {base}/validate {"token": "..."}` → 200 `{user_id, username}`.
pub struct RemoteTokenValidator {
    client: reqwest::Client,
    base_url: String,
}

impl RemoteTokenValidator {
    pub fn new(base_url: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(5))
            .build()
            .expect("failed to build HTTP client");
        RemoteTokenValidator {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Startup reachability probe; failure means exit code 2.
    pub async fn probe(&self) -> Result<(), AuthError> {
        let url = format!("{}/health", self.base_url);
        self.client
            .get(&url)
            .send()
            .await
            .map_err(|e| AuthError::Unreachable(e.to_string()))?;
        Ok(())
    }
}

#[rocket::async_trait]
impl TokenValidator for RemoteTokenValidator {
    async fn validate(&self, token: &str) -> Result<Identity, AuthError> {
        let url = format!("{}/validate", self.base_url);
        let resp = self
            .client
            .post(&url)
            .json(&serde_json::json!({ "token": token }))
            .send()
            .await
            .map_err(|e| AuthError::Unreachable(e.to_string()))?;

        if resp.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(AuthError::Invalid);
        }
        if !resp.status().is_success() {
            return Err(AuthError::Unreachable(format!("HTTP {}", resp.status())));
        }

        let identity: RemoteIdentity = resp.json().await.map_err(|_| AuthError::Invalid)?;
        if identity.user_id <= 0 || identity.username.is_empty() {
            return Err(AuthError::Invalid);
        }
        Ok(Identity {
            user_id: identity.user_id,
            username: identity.username,
        })
    }

    fn kind(&self) -> &'static str {
        "remote"
    }
}
