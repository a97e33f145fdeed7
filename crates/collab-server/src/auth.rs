//! Bearer token verification for WebSocket upgrades.
//!
//! Tokens are HS256 JWTs issued by the auth service. The token may arrive as
//! a `?token=` query parameter (browsers cannot set headers on WebSocket
//! requests) or as an `Authorization: Bearer` header.

use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use collab_core::UserIdentity;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

/// Claims carried by an access token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Claims {
    /// Stable user id.
    pub user_id: String,
    /// Email address.
    #[serde(default)]
    pub email: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Role name.
    #[serde(default)]
    pub role: String,
    /// Permission strings.
    #[serde(default)]
    pub permissions: Vec<String>,
    /// Auth session id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Expiry, seconds since the Unix epoch.
    pub exp: u64,
}

impl From<Claims> for UserIdentity {
    fn from(claims: Claims) -> Self {
        Self {
            user_id: claims.user_id,
            email: claims.email,
            name: claims.name,
            role: claims.role,
            permissions: claims.permissions,
            session_id: claims.session_id,
        }
    }
}

/// Why an upgrade request was not authenticated.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// Neither the query parameter nor the header carried a token.
    #[error("missing access token")]
    MissingToken,
    /// Signature, expiry or claims did not check out.
    #[error("invalid access token: {0}")]
    Invalid(#[from] jsonwebtoken::errors::Error),
    /// Token verified but names no user.
    #[error("access token has no user id")]
    MissingUser,
    /// Tokens are required but no signing secret is configured.
    #[error("token verification is not configured")]
    NotConfigured,
}

/// Verifies HS256 access tokens against a shared secret.
pub struct TokenVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    /// Verifier for tokens signed with `secret`.
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_required_spec_claims(&["exp"]);
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    /// Verify `token` and return the identity it carries.
    pub fn verify(&self, token: &str) -> Result<UserIdentity, AuthError> {
        let data = jsonwebtoken::decode::<Claims>(token, &self.key, &self.validation)?;
        if data.claims.user_id.trim().is_empty() {
            return Err(AuthError::MissingUser);
        }
        Ok(data.claims.into())
    }
}

impl std::fmt::Debug for TokenVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenVerifier").finish_non_exhaustive()
    }
}

/// Pick the token from the query parameter, falling back to the
/// `Authorization: Bearer` header.
pub fn extract_token(query_token: Option<&str>, headers: &HeaderMap) -> Option<String> {
    if let Some(token) = query_token.map(str::trim).filter(|t| !t.is_empty()) {
        return Some(token.to_owned());
    }
    headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_owned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use axum::http::HeaderValue;
    use jsonwebtoken::{EncodingKey, Header};

    const SECRET: &str = "test-secret";

    fn claims(user_id: &str, exp: u64) -> Claims {
        Claims {
            user_id: user_id.into(),
            email: format!("{user_id}@example.com"),
            name: "Alice".into(),
            role: "editor".into(),
            permissions: vec!["forms:edit".into()],
            session_id: Some("s1".into()),
            exp,
        }
    }

    fn future_exp() -> u64 {
        u64::try_from(chrono::Utc::now().timestamp()).unwrap() + 3600
    }

    fn mint(claims: &Claims, secret: &str) -> String {
        jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn valid_token_yields_identity() {
        let token = mint(&claims("alice", future_exp()), SECRET);
        let identity = TokenVerifier::new(SECRET).verify(&token).unwrap();
        assert_eq!(identity.user_id, "alice");
        assert_eq!(identity.role, "editor");
        assert_eq!(identity.permissions, vec!["forms:edit"]);
        assert_eq!(identity.session_id.as_deref(), Some("s1"));
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = mint(&claims("alice", future_exp()), "other");
        assert_matches!(
            TokenVerifier::new(SECRET).verify(&token),
            Err(AuthError::Invalid(_))
        );
    }

    #[test]
    fn expired_token_is_rejected() {
        let token = mint(&claims("alice", 1_000), SECRET);
        assert_matches!(
            TokenVerifier::new(SECRET).verify(&token),
            Err(AuthError::Invalid(_))
        );
    }

    #[test]
    fn empty_user_is_rejected() {
        let token = mint(&claims("", future_exp()), SECRET);
        assert_matches!(
            TokenVerifier::new(SECRET).verify(&token),
            Err(AuthError::MissingUser)
        );
    }

    #[test]
    fn garbage_is_rejected() {
        assert_matches!(
            TokenVerifier::new(SECRET).verify("not-a-jwt"),
            Err(AuthError::Invalid(_))
        );
    }

    #[test]
    fn query_token_wins_over_header() {
        let mut headers = HeaderMap::new();
        let _ = headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer from-header"));
        assert_eq!(
            extract_token(Some("from-query"), &headers).as_deref(),
            Some("from-query")
        );
        assert_eq!(extract_token(None, &headers).as_deref(), Some("from-header"));
        assert_eq!(extract_token(Some(""), &headers).as_deref(), Some("from-header"));
    }

    #[test]
    fn non_bearer_header_is_ignored() {
        let mut headers = HeaderMap::new();
        let _ = headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert!(extract_token(None, &headers).is_none());
        assert!(extract_token(None, &HeaderMap::new()).is_none());
    }
}
