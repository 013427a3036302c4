//! JWT adapter for session validation.
//!
//! Implements the `SessionValidator` port against HS256-signed tokens
//! issued by the auth service. Validates expiry and audience claims and
//! maps the subject to the domain `AuthenticatedUser`.
//!
//! # Example
//!
//! ```ignore
//! let config = JwtConfig::new(jwt_secret, "apcs-prep-api");
//! let validator = JwtSessionValidator::new(config);
//! let user = validator.validate("eyJ...").await?;
//! ```

use async_trait::async_trait;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::domain::foundation::{AuthError, AuthenticatedUser, UserId};
use crate::ports::SessionValidator;

/// Configuration for the JWT validator.
#[derive(Clone)]
pub struct JwtConfig {
    /// Shared HMAC signing secret.
    secret: SecretString,

    /// Expected audience claim. Tokens without it are rejected.
    audience: String,
}

impl JwtConfig {
    pub fn new(secret: impl Into<String>, audience: impl Into<String>) -> Self {
        Self {
            secret: SecretString::new(secret.into()),
            audience: audience.into(),
        }
    }
}

/// Claims read from the session token.
#[derive(Debug, Deserialize)]
struct SessionClaims {
    /// Subject - the user id.
    sub: String,

    #[serde(default)]
    email: Option<String>,
}

/// HS256 session validator.
pub struct JwtSessionValidator {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtSessionValidator {
    pub fn new(config: JwtConfig) -> Self {
        let decoding_key = DecodingKey::from_secret(config.secret.expose_secret().as_bytes());
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_audience(&[config.audience.as_str()]);
        validation.validate_exp = true;
        // No clock-skew tolerance; the library defaults to 60 seconds.
        // Session expiry is exact.
        validation.leeway = 0;

        Self {
            decoding_key,
            validation,
        }
    }
}

#[async_trait]
impl SessionValidator for JwtSessionValidator {
    async fn validate(&self, token: &str) -> Result<AuthenticatedUser, AuthError> {
        let data = decode::<SessionClaims>(token, &self.decoding_key, &self.validation).map_err(
            |e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                _ => AuthError::InvalidToken(e.to_string()),
            },
        )?;

        let user_id = UserId::new(data.claims.sub)
            .map_err(|e| AuthError::InvalidToken(format!("bad subject claim: {}", e)))?;

        Ok(AuthenticatedUser::new(user_id, data.claims.email))
    }
}
