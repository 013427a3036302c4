//! Authentication configuration

use serde::Deserialize;

use super::error::ValidationError;

/// Authentication configuration (session JWT validation)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthConfig {
    /// HMAC secret used to verify session tokens
    pub jwt_secret: String,

    /// Expected audience claim for session tokens
    pub jwt_audience: String,
}

impl AuthConfig {
    /// Validate authentication configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.jwt_secret.is_empty() {
            return Err(ValidationError::MissingRequired("JWT_SECRET"));
        }
        if self.jwt_secret.len() < 32 {
            return Err(ValidationError::JwtSecretTooShort);
        }
        if self.jwt_audience.is_empty() {
            return Err(ValidationError::MissingRequired("JWT_AUDIENCE"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_missing_secret() {
        let config = AuthConfig::default();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_short_secret() {
        let config = AuthConfig {
            jwt_secret: "too-short".to_string(),
            jwt_audience: "apcs-prep".to_string(),
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_missing_audience() {
        let config = AuthConfig {
            jwt_secret: "a".repeat(32),
            jwt_audience: String::new(),
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_valid_config() {
        let config = AuthConfig {
            jwt_secret: "0123456789abcdef0123456789abcdef".to_string(),
            jwt_audience: "apcs-prep".to_string(),
        };
        assert!(config.validate().is_ok());
    }
}
