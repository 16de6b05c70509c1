//! Session token validation and issuance.
//!
//! Tokens are HS256 JWTs carried in the `session` cookie. The connection
//! handler only needs the three-way outcome: valid (with claims), expired,
//! or invalid. Any decoding fault that is not an expiry maps to invalid so
//! a malformed token can never take the handler down.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Claims carried by a session token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject: the authenticated username.
    pub sub: String,
    /// Display name, when the identity provider supplied one.
    #[serde(default)]
    pub name: Option<String>,
    /// Verified primary email, when available.
    #[serde(default)]
    pub email: Option<String>,
    /// Issued-at, seconds since the epoch.
    pub iat: i64,
    /// Expiry, seconds since the epoch.
    pub exp: i64,
}

/// Outcome of validating a presented session token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenOutcome {
    /// Signature and expiry check out.
    Valid(Claims),
    /// Correctly signed but past its expiry claim.
    Expired,
    /// Anything else: bad signature, malformed, missing subject.
    Invalid,
}

/// Errors from token issuance.
#[derive(Debug, Error)]
pub enum AuthError {
    /// System clock is before the Unix epoch.
    #[error("system time error: {0}")]
    Clock(String),

    /// JWT encoding failed.
    #[error("token encoding failed: {0}")]
    Encoding(#[from] jsonwebtoken::errors::Error),
}

/// Validates and issues HS256 session tokens with a shared secret.
pub struct TokenValidator {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    ttl: Duration,
}

impl TokenValidator {
    /// Creates a validator for the given shared secret and token lifetime.
    pub fn new(secret: &str, ttl: Duration) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp"]);

        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            ttl,
        }
    }

    /// Classifies a presented token. Never panics and never errors: every
    /// fault degenerates to [`TokenOutcome::Invalid`].
    pub fn validate(&self, token: &str) -> TokenOutcome {
        match decode::<Claims>(token, &self.decoding, &self.validation) {
            Ok(data) if !data.claims.sub.is_empty() => TokenOutcome::Valid(data.claims),
            Ok(_) => TokenOutcome::Invalid,
            Err(e) => match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => TokenOutcome::Expired,
                _ => TokenOutcome::Invalid,
            },
        }
    }

    /// Issues a fresh token for an authenticated subject.
    pub fn issue(
        &self,
        sub: &str,
        name: Option<String>,
        email: Option<String>,
    ) -> Result<String, AuthError> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| AuthError::Clock(e.to_string()))?
            .as_secs() as i64;

        let claims = Claims {
            sub: sub.to_string(),
            name,
            email,
            iat: now,
            exp: now + self.ttl.as_secs() as i64,
        };

        Ok(encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)?)
    }

    /// The configured token lifetime.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret";

    fn validator() -> TokenValidator {
        TokenValidator::new(SECRET, Duration::from_secs(3600))
    }

    fn encode_raw(claims: &Claims, secret: &str) -> String {
        encode(
            &Header::new(Algorithm::HS256),
            claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    fn now_secs() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs() as i64
    }

    #[test]
    fn test_issue_then_validate() {
        let v = validator();
        let token = v
            .issue("octocat", Some("The Octocat".to_string()), None)
            .unwrap();

        match v.validate(&token) {
            TokenOutcome::Valid(claims) => {
                assert_eq!(claims.sub, "octocat");
                assert_eq!(claims.name.as_deref(), Some("The Octocat"));
                assert_eq!(claims.exp - claims.iat, 3600);
            }
            other => panic!("expected valid, got {other:?}"),
        }
    }

    #[test]
    fn test_expired_token() {
        let v = validator();
        let claims = Claims {
            sub: "octocat".to_string(),
            name: None,
            email: None,
            iat: now_secs() - 7200,
            exp: now_secs() - 3600,
        };
        let token = encode_raw(&claims, SECRET);
        assert_eq!(v.validate(&token), TokenOutcome::Expired);
    }

    #[test]
    fn test_wrong_secret_is_invalid() {
        let v = validator();
        let claims = Claims {
            sub: "octocat".to_string(),
            name: None,
            email: None,
            iat: now_secs(),
            exp: now_secs() + 3600,
        };
        let token = encode_raw(&claims, "other-secret");
        assert_eq!(v.validate(&token), TokenOutcome::Invalid);
    }

    #[test]
    fn test_garbage_token_is_invalid() {
        let v = validator();
        assert_eq!(v.validate("not.a.jwt"), TokenOutcome::Invalid);
        assert_eq!(v.validate(""), TokenOutcome::Invalid);
    }

    #[test]
    fn test_empty_subject_is_invalid() {
        let v = validator();
        let claims = Claims {
            sub: String::new(),
            name: None,
            email: None,
            iat: now_secs(),
            exp: now_secs() + 3600,
        };
        let token = encode_raw(&claims, SECRET);
        assert_eq!(v.validate(&token), TokenOutcome::Invalid);
    }
}
