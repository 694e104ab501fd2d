#[cfg(test)]
mod tests {
    use super::super::*;
    use axum::http::{HeaderMap, HeaderValue};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Accepts tokens starting with "good-" and counts provider calls.
    struct CountingVerifier {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl TokenVerifier for CountingVerifier {
        async fn verify(&self, token: &str) -> Result<VerifiedUser, AuthError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match token.strip_prefix("good-") {
                Some(uid) => Ok(VerifiedUser {
                    uid: uid.to_string(),
                }),
                None => Err(AuthError::InvalidToken),
            }
        }
    }

    fn counting() -> (CountingVerifier, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (
            CountingVerifier {
                calls: calls.clone(),
            },
            calls,
        )
    }

    #[test]
    fn test_mask_token() {
        assert_eq!(mask_token("abcd1234efgh5678"), "abcd...5678");
        assert_eq!(mask_token("short"), "****");
    }

    #[test]
    fn test_hash_key_is_stable_hex() {
        let hashed = hash_key("token");
        assert_eq!(hashed.len(), 64);
        assert_eq!(hashed, hash_key("token"));
        assert_ne!(hashed, hash_key("token2"));
    }

    #[test]
    fn test_extract_bearer_token() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "Authorization",
            HeaderValue::from_static("Bearer test_token_456"),
        );
        assert_eq!(extract_bearer_token(&headers).unwrap(), "test_token_456");
    }

    #[test]
    fn test_extract_bearer_token_missing() {
        let headers = HeaderMap::new();
        assert_eq!(
            extract_bearer_token(&headers).unwrap_err(),
            AuthError::MissingToken
        );
    }

    #[test]
    fn test_extract_bearer_token_wrong_scheme() {
        let mut headers = HeaderMap::new();
        headers.insert("Authorization", HeaderValue::from_static("Basic dXNlcjpwYXNz"));
        assert_eq!(
            extract_bearer_token(&headers).unwrap_err(),
            AuthError::MalformedHeader
        );

        headers.insert("Authorization", HeaderValue::from_static("Bearer   "));
        assert_eq!(
            extract_bearer_token(&headers).unwrap_err(),
            AuthError::MalformedHeader
        );
    }

    #[test]
    fn test_auth_error_status_codes() {
        assert_eq!(
            AuthError::MissingToken.into_response().status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            AuthError::InvalidToken.into_response().status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            AuthError::ProviderUnavailable.into_response().status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[tokio::test]
    async fn test_cached_verifier_hits_provider_once() {
        let (inner, calls) = counting();
        let verifier = CachedVerifier::new(inner, Duration::from_secs(300));

        let first = verifier.verify("good-alice").await.unwrap();
        let second = verifier.verify("good-alice").await.unwrap();
        assert_eq!(first.uid, "alice");
        assert_eq!(first, second);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(verifier.cached_tokens(), 1);
    }

    #[tokio::test]
    async fn test_cached_verifier_does_not_cache_failures() {
        let (inner, calls) = counting();
        let verifier = CachedVerifier::new(inner, Duration::from_secs(300));

        assert!(verifier.verify("bad").await.is_err());
        assert!(verifier.verify("bad").await.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(verifier.cached_tokens(), 0);
    }

    #[tokio::test]
    async fn test_cached_verifier_expires_entries() {
        let (inner, calls) = counting();
        let verifier = CachedVerifier::new(inner, Duration::ZERO);

        verifier.verify("good-bob").await.unwrap();
        verifier.verify("good-bob").await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cached_verifier_sweeps_stale_tokens() {
        let (inner, _) = counting();
        let verifier = CachedVerifier::new(inner, Duration::from_millis(50));

        verifier.verify("good-a").await.unwrap();
        verifier.verify("good-b").await.unwrap();
        assert_eq!(verifier.cached_tokens(), 2);

        tokio::time::sleep(Duration::from_millis(80)).await;
        verifier.verify("good-c").await.unwrap();
        assert_eq!(verifier.cached_tokens(), 1);
    }

    #[tokio::test]
    async fn test_identity_provider_unreachable() {
        let verifier =
            IdentityToolkitVerifier::new("key").with_lookup_url("http://127.0.0.1:9/lookup");
        assert_eq!(
            verifier.verify("any-token").await.unwrap_err(),
            AuthError::ProviderUnavailable
        );
    }
}
