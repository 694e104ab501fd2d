use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::{
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use dashmap::DashMap;
use serde::Deserialize;
use serde_json::json;
use sha2::{Digest, Sha256};

const IDENTITY_LOOKUP_URL: &str = "https://identitytoolkit.googleapis.com/v1/accounts:lookup";

/// Hash a token with SHA-256 so raw tokens never sit in the cache.
fn hash_key(key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
#[path = "auth_tests.rs"]
mod auth_tests;

/// Identity of the caller, inserted into request extensions once verified.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VerifiedUser {
    pub uid: String,
}

/// Checks an ID token against an identity provider.
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<VerifiedUser, AuthError>;
}

/// Verifies ID tokens with the identity-toolkit `accounts:lookup` call.
pub struct IdentityToolkitVerifier {
    client: reqwest::Client,
    api_key: String,
    lookup_url: String,
}

#[derive(Deserialize)]
struct LookupResponse {
    #[serde(default)]
    users: Vec<LookupUser>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LookupUser {
    local_id: String,
}

impl IdentityToolkitVerifier {
    pub fn new(api_key: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            api_key: api_key.into(),
            lookup_url: IDENTITY_LOOKUP_URL.to_string(),
        }
    }

    pub fn with_lookup_url(mut self, url: impl Into<String>) -> Self {
        self.lookup_url = url.into();
        self
    }
}

#[async_trait]
impl TokenVerifier for IdentityToolkitVerifier {
    async fn verify(&self, token: &str) -> Result<VerifiedUser, AuthError> {
        let response = self
            .client
            .post(&self.lookup_url)
            .query(&[("key", self.api_key.as_str())])
            .json(&json!({ "idToken": token }))
            .send()
            .await
            .map_err(|e| {
                tracing::error!("Identity provider unreachable: {}", e);
                AuthError::ProviderUnavailable
            })?;

        let status = response.status();
        if status.is_server_error() {
            tracing::error!("Identity provider returned {}", status);
            return Err(AuthError::ProviderUnavailable);
        }
        if !status.is_success() {
            return Err(AuthError::InvalidToken);
        }

        let body: LookupResponse = response.json().await.map_err(|e| {
            tracing::warn!("Unreadable identity lookup response: {}", e);
            AuthError::ProviderUnavailable
        })?;
        body.users
            .into_iter()
            .next()
            .map(|user| VerifiedUser { uid: user.local_id })
            .ok_or(AuthError::InvalidToken)
    }
}

struct CacheEntry {
    user: VerifiedUser,
    cached_at: Instant,
}

/// Caches successful verifications by token hash for a fixed TTL.
pub struct CachedVerifier<V> {
    inner: V,
    ttl: Duration,
    cache: DashMap<String, CacheEntry>,
}

impl<V: TokenVerifier> CachedVerifier<V> {
    pub fn new(inner: V, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            cache: DashMap::new(),
        }
    }

    pub fn cached_tokens(&self) -> usize {
        self.cache.len()
    }
}

#[async_trait]
impl<V: TokenVerifier> TokenVerifier for CachedVerifier<V> {
    async fn verify(&self, token: &str) -> Result<VerifiedUser, AuthError> {
        let key = hash_key(token);
        if let Some(entry) = self.cache.get(&key) {
            if entry.cached_at.elapsed() < self.ttl {
                return Ok(entry.user.clone());
            }
        }
        self.cache.remove(&key);

        let user = self.inner.verify(token).await?;
        self.cache
            .retain(|_, entry| entry.cached_at.elapsed() < self.ttl);
        self.cache.insert(
            key,
            CacheEntry {
                user: user.clone(),
                cached_at: Instant::now(),
            },
        );
        Ok(user)
    }
}

/// Bearer-token middleware. Every route behind it sees a `VerifiedUser`
/// extension.
pub async fn auth_middleware(
    State(state): State<crate::AppState>,
    headers: HeaderMap,
    mut request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let token = extract_bearer_token(&headers)?;

    let user = match state.verifier.verify(&token).await {
        Ok(user) => user,
        Err(e) => {
            tracing::warn!("Token {} rejected: {}", mask_token(&token), e);
            return Err(e);
        }
    };
    tracing::debug!("Verified {} for uid {}", mask_token(&token), user.uid);

    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}

pub(crate) fn extract_bearer_token(headers: &HeaderMap) -> Result<String, AuthError> {
    let header = headers
        .get("Authorization")
        .ok_or(AuthError::MissingToken)?
        .to_str()
        .map_err(|_| AuthError::MalformedHeader)?;

    match header.strip_prefix("Bearer ") {
        Some(token) if !token.trim().is_empty() => Ok(token.trim().to_string()),
        _ => Err(AuthError::MalformedHeader),
    }
}

/// Mask a token for logging (first 4 and last 4 characters)
pub(crate) fn mask_token(token: &str) -> String {
    if token.len() <= 8 || !token.is_ascii() {
        return "****".to_string();
    }
    format!("{}...{}", &token[..4], &token[token.len() - 4..])
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    MissingToken,
    MalformedHeader,
    InvalidToken,
    ProviderUnavailable,
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthError::MissingToken => write!(f, "Missing bearer token"),
            AuthError::MalformedHeader => write!(f, "Malformed Authorization header"),
            AuthError::InvalidToken => write!(f, "Invalid or expired token"),
            AuthError::ProviderUnavailable => write!(f, "Identity provider unavailable"),
        }
    }
}

impl std::error::Error for AuthError {}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AuthError::MissingToken => (
                StatusCode::UNAUTHORIZED,
                "Missing token. Provide it via an Authorization: Bearer header.",
            ),
            AuthError::MalformedHeader => (
                StatusCode::UNAUTHORIZED,
                "Malformed Authorization header. Expected 'Bearer <token>'.",
            ),
            AuthError::InvalidToken => (StatusCode::UNAUTHORIZED, "Invalid or expired token."),
            AuthError::ProviderUnavailable => (
                StatusCode::SERVICE_UNAVAILABLE,
                "Identity provider unavailable. Please retry later.",
            ),
        };

        (
            status,
            Json(json!({
                "success": false,
                "error": message,
            })),
        )
            .into_response()
    }
}
