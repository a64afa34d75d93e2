use chrono::{DateTime, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use forgecrm_core::UserId;

use crate::{Actor, Role};

/// JWT claims model.
///
/// Timestamps are Unix seconds, as the JWT registered claims require.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JwtClaims {
    pub user_id: UserId,
    pub email: String,
    pub role: Role,

    /// Issued-at timestamp.
    pub iat: i64,

    /// Expiration timestamp.
    pub exp: i64,

    /// Token identifier, for correlating log lines; never used for lookups.
    pub jti: Uuid,
}

impl JwtClaims {
    pub fn new(actor: &Actor, email: impl Into<String>, issued_at: DateTime<Utc>, ttl: chrono::Duration) -> Self {
        Self {
            user_id: actor.id,
            email: email.into(),
            role: actor.role,
            iat: issued_at.timestamp(),
            exp: (issued_at + ttl).timestamp(),
            jti: Uuid::now_v7(),
        }
    }

    pub fn actor(&self) -> Actor {
        Actor::new(self.user_id, self.role)
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.exp, 0)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenValidationError {
    #[error("token has expired")]
    Expired,

    #[error("token is invalid: {0}")]
    Invalid(String),
}

/// Deterministically validate the time window of already-decoded claims.
pub fn validate_claims(claims: &JwtClaims, now: DateTime<Utc>) -> Result<(), TokenValidationError> {
    let now = now.timestamp();
    if claims.exp <= claims.iat {
        return Err(TokenValidationError::Invalid(
            "invalid token time window (exp <= iat)".to_string(),
        ));
    }
    if now < claims.iat {
        return Err(TokenValidationError::Invalid(
            "token not yet valid (iat is in the future)".to_string(),
        ));
    }
    if now >= claims.exp {
        return Err(TokenValidationError::Expired);
    }
    Ok(())
}

/// HS256 signing material derived from the process-wide secret.
///
/// Built once at startup and shared read-only afterwards.
pub struct JwtKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl JwtKeys {
    pub fn from_secret(secret: &[u8]) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.validate_exp = true;
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation,
        }
    }

    pub fn sign(&self, claims: &JwtClaims) -> Result<String, jsonwebtoken::errors::Error> {
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), claims, &self.encoding)
    }

    /// Verify signature and expiry, then hand back the claims.
    ///
    /// Nothing inside the token is looked at before the signature checks out.
    pub fn verify(&self, token: &str, now: DateTime<Utc>) -> Result<JwtClaims, TokenValidationError> {
        let data = jsonwebtoken::decode::<JwtClaims>(token, &self.decoding, &self.validation)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => TokenValidationError::Expired,
                _ => TokenValidationError::Invalid(e.to_string()),
            })?;
        validate_claims(&data.claims, now)?;
        Ok(data.claims)
    }
}

impl core::fmt::Debug for JwtKeys {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("JwtKeys")
            .field("algorithm", &Algorithm::HS256)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn claims_at(issued_at: DateTime<Utc>, ttl: Duration) -> JwtClaims {
        JwtClaims::new(
            &Actor::new(UserId::new(7), Role::Sales),
            "sam@example.com",
            issued_at,
            ttl,
        )
    }

    #[test]
    fn signed_token_verifies_and_yields_claims() {
        let keys = JwtKeys::from_secret(b"secret-a");
        let now = Utc::now();
        let claims = claims_at(now, Duration::minutes(5));
        let token = keys.sign(&claims).unwrap();

        let decoded = keys.verify(&token, now).unwrap();
        assert_eq!(decoded, claims);
        assert_eq!(decoded.actor(), Actor::new(UserId::new(7), Role::Sales));
    }

    #[test]
    fn expired_and_forged_tokens_are_distinguished() {
        let keys = JwtKeys::from_secret(b"secret-a");
        let other = JwtKeys::from_secret(b"secret-b");
        let now = Utc::now();

        let expired = keys
            .sign(&claims_at(now - Duration::hours(2), Duration::hours(1)))
            .unwrap();
        assert_eq!(keys.verify(&expired, now), Err(TokenValidationError::Expired));

        let forged = other.sign(&claims_at(now, Duration::hours(1))).unwrap();
        assert!(matches!(
            keys.verify(&forged, now),
            Err(TokenValidationError::Invalid(_))
        ));

        assert!(matches!(
            keys.verify("not.a.token", now),
            Err(TokenValidationError::Invalid(_))
        ));
    }

    #[test]
    fn claims_issued_in_the_future_are_rejected() {
        let now = Utc::now();
        let claims = claims_at(now + Duration::minutes(10), Duration::hours(1));
        assert!(matches!(
            validate_claims(&claims, now),
            Err(TokenValidationError::Invalid(msg)) if msg.contains("not yet valid")
        ));
    }
}
