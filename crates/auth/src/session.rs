//! Session tokens (HS256).
//!
//! A token carries exactly two claims, `id` and `email`. There is no `exp`
//! claim: lifetime is bounded by the `access_token` cookie that carries the
//! token, so a copied token stays valid until the signing secret rotates.

use std::sync::Arc;

use jsonwebtoken::{decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use gatehouse_core::UserId;

use crate::Principal;

/// Wire claims of a session token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
    pub id: i64,
    pub email: String,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("signing secret is empty")]
    MissingSecret,

    #[error("token is malformed")]
    Malformed,

    #[error("token signature is invalid")]
    InvalidSignature,

    #[error("token claims are missing or have the wrong type")]
    InvalidClaims,

    #[error("failed to sign token: {0}")]
    Signing(String),
}

/// Issues and verifies session tokens against one process-wide secret.
///
/// Cheap to clone; keys are shared behind `Arc`.
#[derive(Clone)]
pub struct SessionManager {
    encoding_key: Arc<EncodingKey>,
    decoding_key: Arc<DecodingKey>,
    validation: Arc<Validation>,
}

impl SessionManager {
    pub fn new(secret: impl AsRef<[u8]>) -> Result<Self, SessionError> {
        let secret = secret.as_ref();
        if secret.is_empty() {
            return Err(SessionError::MissingSecret);
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.required_spec_claims.clear();
        validation.validate_exp = false;
        validation.validate_aud = false;

        Ok(Self {
            encoding_key: Arc::new(EncodingKey::from_secret(secret)),
            decoding_key: Arc::new(DecodingKey::from_secret(secret)),
            validation: Arc::new(validation),
        })
    }

    pub fn issue(&self, subject_id: UserId, email: &str) -> Result<String, SessionError> {
        let claims = SessionClaims {
            id: subject_id.get(),
            email: email.to_string(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| SessionError::Signing(e.to_string()))
    }

    pub fn verify(&self, token: &str) -> Result<Principal, SessionError> {
        let data = decode::<SessionClaims>(token, &self.decoding_key, &self.validation).map_err(
            |e| match e.kind() {
                ErrorKind::InvalidSignature => SessionError::InvalidSignature,
                ErrorKind::Json(_) | ErrorKind::MissingRequiredClaim(_) => SessionError::InvalidClaims,
                _ => SessionError::Malformed,
            },
        )?;

        Ok(Principal::new(UserId::new(data.claims.id), data.claims.email))
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("algorithm", &Algorithm::HS256)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn manager() -> SessionManager {
        SessionManager::new("test-secret").unwrap()
    }

    /// Replace the first character of the signature segment with a different one.
    fn tamper_signature(token: &str) -> String {
        let (head, sig) = token.rsplit_once('.').unwrap();
        let mut chars: Vec<char> = sig.chars().collect();
        chars[0] = if chars[0] == 'A' { 'B' } else { 'A' };
        format!("{head}.{}", chars.into_iter().collect::<String>())
    }

    fn sign_raw(secret: &str, claims: &serde_json::Value) -> String {
        encode(
            &Header::new(Algorithm::HS256),
            claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn issue_then_verify_returns_same_identity() {
        let m = manager();
        let token = m.issue(UserId::new(7), "a@b.com").unwrap();

        let principal = m.verify(&token).unwrap();
        assert_eq!(principal.subject_id(), UserId::new(7));
        assert_eq!(principal.email(), "a@b.com");
    }

    #[test]
    fn flipped_signature_is_rejected() {
        let m = manager();
        let token = m.issue(UserId::new(7), "a@b.com").unwrap();

        let err = m.verify(&tamper_signature(&token)).unwrap_err();
        assert_eq!(err, SessionError::InvalidSignature);
    }

    #[test]
    fn garbage_is_rejected() {
        let m = manager();
        assert!(m.verify("not-a-token").is_err());
        assert!(m.verify("").is_err());
        assert!(m.verify("a.b.c").is_err());
    }

    #[test]
    fn token_from_another_secret_is_rejected() {
        let other = SessionManager::new("other-secret").unwrap();
        let token = other.issue(UserId::new(1), "x@y.z").unwrap();

        assert_eq!(manager().verify(&token).unwrap_err(), SessionError::InvalidSignature);
    }

    #[test]
    fn missing_or_mistyped_claims_are_rejected() {
        let m = manager();

        let no_email = sign_raw("test-secret", &serde_json::json!({ "id": 1 }));
        assert_eq!(m.verify(&no_email).unwrap_err(), SessionError::InvalidClaims);

        let string_id = sign_raw("test-secret", &serde_json::json!({ "id": "1", "email": "a@b.com" }));
        assert_eq!(m.verify(&string_id).unwrap_err(), SessionError::InvalidClaims);
    }

    #[test]
    fn tokens_carry_no_expiry() {
        let token = manager().issue(UserId::new(3), "c@d.com").unwrap();

        // default validation insists on `exp`
        let strict = Validation::new(Algorithm::HS256);
        let err = decode::<SessionClaims>(&token, &DecodingKey::from_secret(b"test-secret"), &strict)
            .unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::MissingRequiredClaim(c) if c == "exp"));
    }

    #[test]
    fn empty_secret_is_refused() {
        assert_eq!(SessionManager::new("").unwrap_err(), SessionError::MissingSecret);
    }

    proptest! {
        #[test]
        fn round_trip_holds_for_any_identity(id in any::<i64>(), email in "[a-z0-9.]{1,16}@[a-z]{1,8}\\.[a-z]{2,4}") {
            let m = manager();
            let token = m.issue(UserId::new(id), &email).unwrap();
            let principal = m.verify(&token).unwrap();
            prop_assert_eq!(principal.subject_id().get(), id);
            prop_assert_eq!(principal.email(), email.as_str());
        }
    }
}
