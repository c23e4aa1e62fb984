use axum::{extract::FromRequestParts, http::request::Parts};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};
use jsonwebtoken::{decode, errors::ErrorKind, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::api::error::ApiError;
use crate::controller::AppState;

/// Session token claims issued by the user service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    #[serde(default)]
    pub email: Option<String>,
    pub exp: usize,
}

/// Authenticated caller
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Identity {
    pub subject: String,
    pub email: Option<String>,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing bearer token")]
    Missing,
    #[error("token expired")]
    Expired,
    #[error("invalid token: {0}")]
    Invalid(jsonwebtoken::errors::Error),
}

/// Validates an opaque session token. The issuer lives outside this service.
pub trait CredentialValidator: Send + Sync {
    fn validate(&self, token: &str) -> Result<Identity, AuthError>;
}

/// HS256 JWT validator sharing a secret with the issuer
pub struct JwtValidator {
    key: DecodingKey,
    validation: Validation,
}

impl JwtValidator {
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 5;
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }
}

impl CredentialValidator for JwtValidator {
    fn validate(&self, token: &str) -> Result<Identity, AuthError> {
        if token.is_empty() {
            return Err(AuthError::Missing);
        }
        let data = decode::<Claims>(token, &self.key, &self.validation).map_err(|e| match e.kind() {
            ErrorKind::ExpiredSignature => AuthError::Expired,
            _ => AuthError::Invalid(e),
        })?;
        Ok(Identity {
            subject: data.claims.sub,
            email: data.claims.email,
        })
    }
}

/// Extractor for routes that require a valid `Authorization: Bearer` token
#[derive(Debug, Clone)]
pub struct AuthBearer(pub Identity);

#[axum::async_trait]
impl FromRequestParts<AppState> for AuthBearer {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) =
            TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
                .await
                .map_err(|_| ApiError::Unauthorized)?;
        state
            .auth
            .validate(bearer.token())
            .map(AuthBearer)
            .map_err(|e| {
                tracing::debug!(error = %e, "bearer token rejected");
                ApiError::Unauthorized
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    const SECRET: &str = "test-secret-with-enough-entropy-0123456789";

    fn token(secret: &str, exp_offset_secs: i64) -> String {
        let claims = Claims {
            sub: "user-1".into(),
            email: Some("ops@example.com".into()),
            exp: (chrono::Utc::now().timestamp() + exp_offset_secs) as usize,
        };
        encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes())).unwrap()
    }

    #[test]
    fn test_valid_token() {
        let identity = JwtValidator::new(SECRET).validate(&token(SECRET, 600)).unwrap();
        assert_eq!(identity.subject, "user-1");
        assert_eq!(identity.email.as_deref(), Some("ops@example.com"));
    }

    #[test]
    fn test_expired_token() {
        let err = JwtValidator::new(SECRET).validate(&token(SECRET, -600)).unwrap_err();
        assert!(matches!(err, AuthError::Expired));
    }

    #[test]
    fn test_wrong_secret() {
        let err = JwtValidator::new(SECRET).validate(&token("other-secret", 600)).unwrap_err();
        assert!(matches!(err, AuthError::Invalid(_)));
    }

    #[test]
    fn test_empty_and_garbage() {
        let v = JwtValidator::new(SECRET);
        assert!(matches!(v.validate(""), Err(AuthError::Missing)));
        assert!(matches!(v.validate("not.a.jwt"), Err(AuthError::Invalid(_))));
    }
}
